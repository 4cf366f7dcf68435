//! Binding of state nodes to DOM nodes.
//!
//! A [`Binder`] picks the single applicable [`BindingStrategy`] for a [`StateNode`] and lets it materialize and wire the DOM node.
//! Strategies recurse into descendants through a [`BinderContext`], without knowing each other.

use crate::{
	dom::DomId,
	error::BindError,
	registry::Registry,
	server_event::MethodTable,
	tree::{features, StateNode, StateTree},
};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{debug, instrument, trace};

mod children;
mod element;
mod events;
mod model;
mod text;

pub use element::ElementBindingStrategy;
pub use model::{InitialPropertyUpdate, UpdatableModelProperties};
pub use text::TextBindingStrategy;

/// The closed set of binding strategies, in selection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingStrategy {
	Element,
	Text,
}
impl BindingStrategy {
	pub const ALL: [BindingStrategy; 2] = [BindingStrategy::Element, BindingStrategy::Text];

	#[must_use]
	pub fn is_applicable(self, node: &StateNode) -> bool {
		match self {
			BindingStrategy::Element => ElementBindingStrategy::is_applicable(node),
			BindingStrategy::Text => TextBindingStrategy::is_applicable(node),
		}
	}

	/// Creates a fresh DOM node for `node`.
	///
	/// # Errors
	///
	/// Iff `node` lacks the data needed to create its DOM node.
	pub fn create(self, binder: &Binder, node: &StateNode) -> Result<DomId, BindError> {
		match self {
			BindingStrategy::Element => binder.0.element.create(binder, node),
			BindingStrategy::Text => Ok(binder.0.text.create(binder, node)),
		}
	}

	/// Binds `node` to `dom`. Binding an already bound node does nothing.
	///
	/// # Errors
	///
	/// Iff `dom` doesn't match `node` or binding a descendant fails.
	pub fn bind(self, binder: &Binder, node: &StateNode, dom: DomId) -> Result<(), BindError> {
		match self {
			BindingStrategy::Element => binder.0.element.bind(binder, node, dom),
			BindingStrategy::Text => {
				binder.0.text.bind(binder, node, dom);
				Ok(())
			}
		}
	}
}

struct BinderInner {
	tree: StateTree,
	registry: Registry,
	element: ElementBindingStrategy,
	text: TextBindingStrategy,
}

/// Entry point of the binding core.
#[derive(Clone)]
pub struct Binder(Rc<BinderInner>);
impl Binder {
	pub fn new(tree: StateTree, registry: Registry) -> Self {
		Self(Rc::new(BinderInner {
			tree,
			registry,
			element: ElementBindingStrategy::default(),
			text: TextBindingStrategy::default(),
		}))
	}

	#[must_use]
	pub fn tree(&self) -> &StateTree {
		&self.0.tree
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.0.registry
	}

	#[must_use]
	pub fn context(&self) -> BinderContext {
		BinderContext(Rc::downgrade(&self.0))
	}

	/// Binds `node` to the existing DOM node `dom`.
	///
	/// Must not be called while the tree is being updated.
	///
	/// # Errors
	///
	/// Iff no single strategy applies to `node`, `dom` has the wrong tag or binding a descendant fails.
	#[instrument(skip(self, node), fields(node = node.id()))]
	pub fn bind(&self, node: &StateNode, dom: DomId) -> Result<(), BindError> {
		debug_assert!(!self.0.tree.is_updating(), "Binding while the state tree is being updated.");
		let strategy = self.applicable_strategy(node)?;
		if node.dom_node().is_none() {
			node.set_dom_node(Some(dom));
		}
		strategy.bind(self, node, dom)
	}

	/// Binds `node` to its DOM node, creating one first if needed.
	///
	/// # Errors
	///
	/// See [`bind`](`Binder::bind`).
	#[instrument(skip(self, node), fields(node = node.id()))]
	pub fn create_and_bind(&self, node: &StateNode) -> Result<DomId, BindError> {
		let strategy = self.applicable_strategy(node)?;
		let dom = match node.dom_node() {
			Some(dom) => dom,
			None => {
				let dom = strategy.create(self, node)?;
				node.set_dom_node(Some(dom));
				trace!(?dom, ?strategy, "Created DOM node.");
				dom
			}
		};
		strategy.bind(self, node, dom)?;
		Ok(dom)
	}

	/// The one strategy applicable to `node`.
	///
	/// # Errors
	///
	/// Iff none or more than one strategy applies.
	pub fn applicable_strategy(&self, node: &StateNode) -> Result<BindingStrategy, BindError> {
		let mut applicable = BindingStrategy::ALL.iter().copied().filter(|strategy| strategy.is_applicable(node));
		match (applicable.next(), applicable.next()) {
			(Some(strategy), None) => Ok(strategy),
			(None, _) => Err(BindError::NoApplicableStrategy { node: node.id() }),
			(Some(_), Some(_)) => Err(BindError::AmbiguousStrategy { node: node.id() }),
		}
	}

	/// Synchronizes model property changes reported by the templating element `element` to the server.
	pub fn handle_model_properties_changed(&self, element: DomId, changes: &[(String, Value)]) {
		match self.0.tree.node_for_dom(element) {
			Some(node) => model::handle_properties_changed(&node, changes),
			None => debug!(?element, "Ignoring model changes of an unbound element."),
		}
	}

	/// Settles the `$server` call `promise_id` of `element` with the server's response.
	pub fn complete_server_call(&self, element: DomId, promise_id: u32, result: Result<Value, Value>) {
		match self.0.registry.server_object(element, MethodTable::Server) {
			Some(object) => object.complete(promise_id, result),
			None => debug!(?element, promise_id, "Ignoring completion for an element without server object."),
		}
	}

	/// Whether `node` is bound by the element strategy, and if so whether fully (`Some(true)`) or only partially (`Some(false)`).
	#[must_use]
	pub fn element_binding_state(&self, node: &StateNode) -> Option<bool> {
		self.0.element.binding_state(node)
	}

	#[must_use]
	pub fn is_text_bound(&self, node: &StateNode) -> bool {
		self.0.text.is_bound(node)
	}
}
impl core::fmt::Debug for Binder {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Binder").field("tree", &self.0.tree).field("registry", &self.0.registry).finish()
	}
}

/// Lets strategies bind descendants without holding on to the [`Binder`].
#[derive(Clone)]
pub struct BinderContext(Weak<BinderInner>);
impl BinderContext {
	#[must_use]
	pub fn binder(&self) -> Option<Binder> {
		self.0.upgrade().map(Binder)
	}

	/// # Errors
	///
	/// See [`Binder::create_and_bind`]. Fails with [`BindError::BinderDropped`] if the [`Binder`] is gone.
	pub fn create_and_bind(&self, node: &StateNode) -> Result<DomId, BindError> {
		self.binder().ok_or(BindError::BinderDropped)?.create_and_bind(node)
	}

	/// # Errors
	///
	/// See [`Binder::bind`]. Fails with [`BindError::BinderDropped`] if the [`Binder`] is gone.
	pub fn bind(&self, node: &StateNode, dom: DomId) -> Result<(), BindError> {
		self.binder().ok_or(BindError::BinderDropped)?.bind(node, dom)
	}
}
impl core::fmt::Debug for BinderContext {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_tuple("BinderContext").field(&(self.0.strong_count() > 0)).finish()
	}
}

/// Whether `node` is the root of its tree.
fn is_root(node: &StateNode) -> bool {
	node.tree().map_or(false, |tree| tree.root_node().ptr_eq(node))
}

/// The tag of an element node, if set.
fn tag_of(node: &StateNode) -> Option<String> {
	if !node.has_feature(features::ELEMENT_DATA) {
		return None;
	}
	crate::reactive::untracked(|| node.map(features::ELEMENT_DATA).property(crate::tree::properties::TAG).value())
		.and_then(|tag| tag.as_str().map(ToOwned::to_owned))
}
