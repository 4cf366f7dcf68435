use super::Binder;
use crate::{
	dom::DomId,
	reactive::{self, Computation},
	tree::{features, properties, NodeId, StateNode, TreeValue},
};
use core::cell::RefCell;
use hashbrown::HashMap;
use serde_json::Value;
use tracing::trace;

/// Binds state nodes with a [`TEXT_NODE`](`features::TEXT_NODE`) feature to DOM text nodes.
#[derive(Default)]
pub struct TextBindingStrategy {
	bound: RefCell<HashMap<NodeId, Computation>>,
}
impl TextBindingStrategy {
	#[must_use]
	pub fn is_applicable(node: &StateNode) -> bool {
		node.has_feature(features::TEXT_NODE)
	}

	pub(super) fn create(&self, binder: &Binder, _node: &StateNode) -> DomId {
		binder.registry().host().create_text("")
	}

	pub(super) fn bind(&self, binder: &Binder, node: &StateNode, dom: DomId) {
		if self.bound.borrow().contains_key(&node.id()) {
			return;
		}

		let host = binder.registry().host().clone();
		let text = node.map(features::TEXT_NODE).property(properties::TEXT);
		let computation = reactive::run_when_dependencies_change(move || {
			let value = match text.value() {
				Some(TreeValue::Json(Value::String(text))) => text,
				Some(TreeValue::Json(Value::Null)) | None => String::new(),
				Some(TreeValue::Json(other)) => other.to_string(),
				Some(TreeValue::Node(_)) => String::new(),
			};
			trace!(?dom, "Updating text.");
			host.set_text(dom, &value)
		});
		self.bound.borrow_mut().insert(node.id(), computation);

		let context = binder.context();
		node.add_unregister_listener(move |node| {
			if let Some(binder) = context.binder() {
				let computation = binder.0.text.bound.borrow_mut().remove(&node.id());
				if let Some(computation) = computation {
					computation.stop();
					binder.registry().host().release(dom);
				}
			}
		})
		.forget();
	}

	pub(super) fn is_bound(&self, node: &StateNode) -> bool {
		self.bound.borrow().contains_key(&node.id())
	}
}
impl core::fmt::Debug for TextBindingStrategy {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("TextBindingStrategy").field("bound", &self.bound.borrow().len()).finish()
	}
}
