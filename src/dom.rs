//! The host DOM seam.
//!
//! All DOM access of the binding core goes through [`DomHost`], addressing nodes by opaque [`DomId`]s.
//! Property and model values cross the seam as JSON, with [`None`] standing in for `undefined`.

use crate::server_event::{MethodTable, ServerMethod};
use serde_json::{Map, Value};
use std::rc::Rc;

pub const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";
pub const SVG_NAMESPACE: &str = "http://www.w3.org/2000/svg";

/// Identifies a DOM node of a [`DomHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DomId(pub u32);

/// Identifies a registered event listener of a [`DomHost`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
	Element,
	Text,
	ShadowRoot,
	Other,
}

/// A DOM event as seen by handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct DomEvent {
	pub event_type: String,
	pub target: Option<DomId>,
	/// Further event properties (like `key` or `detail`), as far as the host can provide them.
	pub properties: Map<String, Value>,
}
impl DomEvent {
	#[must_use]
	pub fn new(event_type: impl Into<String>) -> Self {
		Self {
			event_type: event_type.into(),
			target: None,
			properties: Map::new(),
		}
	}

	#[must_use]
	pub fn with_target(mut self, target: DomId) -> Self {
		self.target = Some(target);
		self
	}

	#[must_use]
	pub fn with_property(mut self, name: impl Into<String>, value: Value) -> Self {
		self.properties.insert(name.into(), value);
		self
	}
}

pub type EventHandler = Rc<dyn Fn(&DomEvent)>;

/// Receives `(path, value)` pairs of model properties changed by the host element itself.
pub type ModelObserver = Rc<dyn Fn(&[(String, Value)])>;

/// A live document the binding core can read and mutate.
pub trait DomHost {
	fn create_element(&self, tag: &str, namespace: Option<&str>) -> DomId;
	fn create_text(&self, text: &str) -> DomId;
	/// Releases a node that was created but never attached, like a scratch element.
	fn dispose(&self, _node: DomId) {}
	/// Forgets what the host keeps about `node` once its state node is gone. The node itself stays where it is.
	fn release(&self, _node: DomId) {}

	fn kind(&self, node: DomId) -> NodeKind;
	/// The element's tag name, in upper case for HTML elements.
	fn tag_name(&self, node: DomId) -> Option<String>;
	fn local_name(&self, node: DomId) -> Option<String>;
	fn namespace_uri(&self, node: DomId) -> Option<String>;

	fn text(&self, node: DomId) -> Option<String>;
	fn set_text(&self, node: DomId, text: &str);

	fn parent(&self, node: DomId) -> Option<DomId>;
	fn child_nodes(&self, node: DomId) -> Vec<DomId>;
	fn insert_before(&self, parent: DomId, child: DomId, before: Option<DomId>);
	fn remove_child(&self, parent: DomId, child: DomId);

	fn first_child(&self, node: DomId) -> Option<DomId> {
		self.child_nodes(node).first().copied()
	}

	fn next_sibling(&self, node: DomId) -> Option<DomId> {
		let parent = self.parent(node)?;
		let siblings = self.child_nodes(parent);
		let index = siblings.iter().position(|sibling| *sibling == node)?;
		siblings.get(index + 1).copied()
	}

	fn append_child(&self, parent: DomId, child: DomId) {
		self.insert_before(parent, child, None)
	}

	/// The element children only.
	fn children(&self, node: DomId) -> Vec<DomId> {
		self.child_nodes(node)
			.into_iter()
			.filter(|child| self.kind(*child) == NodeKind::Element)
			.collect()
	}

	/// The topmost ancestor, which is a shadow root for nodes inside a shadow tree.
	fn root_node(&self, node: DomId) -> DomId {
		let mut current = node;
		while let Some(parent) = self.parent(current) {
			current = parent;
		}
		current
	}

	fn is_in_shadow_scope(&self, node: DomId) -> bool {
		self.kind(self.root_node(node)) == NodeKind::ShadowRoot
	}

	/// The first descendant element of `root` (in document order) whose attribute `name` equals `value`.
	fn find_by_attribute(&self, root: DomId, name: &str, value: &str) -> Option<DomId> {
		for child in self.children(root) {
			if self.attribute(child, name).as_deref() == Some(value) {
				return Some(child);
			}
			if let Some(found) = self.find_by_attribute(child, name, value) {
				return Some(found);
			}
		}
		None
	}

	/// The property value, [`None`] if undefined.
	fn property(&self, node: DomId, name: &str) -> Option<Value>;
	fn has_own_property(&self, node: DomId, name: &str) -> bool;
	/// Sets a property, to `undefined` for [`None`].
	fn set_property(&self, node: DomId, name: &str, value: Option<Value>);
	fn delete_property(&self, node: DomId, name: &str);

	fn attribute(&self, node: DomId, name: &str) -> Option<String>;
	fn set_attribute(&self, node: DomId, name: &str, value: &str);
	fn remove_attribute(&self, node: DomId, name: &str);

	/// The inline style value, empty if unset.
	fn style_property(&self, node: DomId, name: &str) -> String;
	/// `"important"` or empty.
	fn style_priority(&self, node: DomId, name: &str) -> String;
	fn set_style_property(&self, node: DomId, name: &str, value: &str, priority: &str);
	fn remove_style_property(&self, node: DomId, name: &str);

	fn add_class(&self, node: DomId, class: &str);
	fn remove_class(&self, node: DomId, class: &str);
	fn has_class(&self, node: DomId, class: &str) -> bool;

	fn add_event_listener(&self, node: DomId, event_type: &str, handler: EventHandler) -> ListenerId;
	fn remove_event_listener(&self, node: DomId, listener: ListenerId);

	fn shadow_root(&self, node: DomId) -> Option<DomId>;
	/// Returns the existing shadow root if there is one.
	fn attach_shadow(&self, node: DomId) -> DomId;

	/// Runs `callback` once `node` is upgraded (for custom elements) or right away otherwise.
	///
	/// May run asynchronously.
	fn when_ready(&self, node: DomId, callback: Box<dyn FnOnce()>);

	/// Whether `node` exposes a templating model (`set(path, value)`/`splice(...)`).
	fn supports_model(&self, _node: DomId) -> bool {
		false
	}
	fn set_model_value(&self, _node: DomId, _path: &str, _value: Value) {}
	fn splice_model_list(&self, _node: DomId, _path: &str, _index: usize, _remove: usize, _add: Vec<Value>) {}
	/// Calls `observer` for model properties the element changes itself.
	fn observe_model(&self, _node: DomId, _observer: ModelObserver) {}

	/// Exposes a callable method, for example as `element.$server.<name>(...)`.
	fn define_server_method(&self, _node: DomId, _table: MethodTable, _name: &str, _method: ServerMethod) {}
	fn remove_server_method(&self, _node: DomId, _table: MethodTable, _name: &str) {}
}
