//! Binds a server-owned state tree to a live DOM subtree.
//!
//! The [`binding::Binder`] maps [`tree::StateNode`]s onto DOM nodes exactly once (through a [`dom::DomHost`]),
//! keeps properties, attributes, inline style, class lists, child lists and event listeners in sync through
//! fine-grained [`reactive`] computations, and routes DOM events back to the server through a
//! [`connector::ServerConnector`], coalescing them with the [`debounce`] state machine where requested.
//!
//! Two hosts are included: [`memory::MemoryDom`], an in-process document used by tests and non-browser embedders,
//! and [`web::WebDom`], which drives a real browser DOM through [`web_sys`].

#![doc(html_root_url = "https://docs.rs/statetree-dom/0.0.3")]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

#[cfg(doctest)]
pub mod readme {
	doc_comment::doctest!("../README.md");
}

pub mod binding;
pub mod config;
pub mod connector;
pub mod constant_pool;
pub mod debounce;
pub mod dom;
pub mod error;
pub mod expression;
mod listeners;
pub mod memory;
pub mod reactive;
pub mod registry;
pub mod server_event;
pub mod timer;
pub mod tree;
pub mod web;

pub use binding::{Binder, BinderContext, BindingStrategy};
pub use config::BinderConfig;
pub use error::{BindError, CallError, ExpressionError};
pub use listeners::EventRemover;
pub use registry::Registry;
