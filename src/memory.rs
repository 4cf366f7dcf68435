//! An in-process document implementing [`DomHost`].
//!
//! [`MemoryDom`] models just enough of the browser DOM for the binding core: element and text nodes, shadow roots,
//! ordered attributes, own and per-tag inherited properties, inline style with priorities, class lists, bubbling event dispatch,
//! custom element readiness and a templating model for opted-in tags.
//! It's used by the native tests and can serve non-browser embedders.

use crate::{
	dom::{DomEvent, DomHost, DomId, EventHandler, ListenerId, ModelObserver, NodeKind, HTML_NAMESPACE},
	server_event::{MethodTable, ServerMethod},
	timer,
};
use core::cell::{Cell, RefCell};
use hashbrown::{HashMap, HashSet};
use serde_json::{Map, Value};
use std::rc::Rc;
use tracing::{trace, warn};

struct StyleEntry {
	name: String,
	value: String,
	priority: String,
}

struct MemoryNode {
	kind: NodeKind,
	local_name: String,
	namespace: Option<String>,
	text: String,
	parent: Option<DomId>,
	children: Vec<DomId>,
	attributes: Vec<(String, String)>,
	properties: Map<String, Value>,
	undefined_properties: HashSet<String>,
	style: Vec<StyleEntry>,
	classes: Vec<String>,
	listeners: Vec<(ListenerId, String, EventHandler)>,
	shadow_root: Option<DomId>,
	model: Option<Value>,
	model_observers: Vec<ModelObserver>,
	server_methods: HashMap<(MethodTable, String), ServerMethod>,
}
impl MemoryNode {
	fn new(kind: NodeKind, local_name: String, namespace: Option<String>) -> Self {
		Self {
			kind,
			local_name,
			namespace,
			text: String::new(),
			parent: None,
			children: Vec::new(),
			attributes: Vec::new(),
			properties: Map::new(),
			undefined_properties: HashSet::new(),
			style: Vec::new(),
			classes: Vec::new(),
			listeners: Vec::new(),
			shadow_root: None,
			model: None,
			model_observers: Vec::new(),
			server_methods: HashMap::new(),
		}
	}
}

/// An in-process [`DomHost`].
#[derive(Default)]
pub struct MemoryDom {
	nodes: RefCell<HashMap<DomId, MemoryNode>>,
	next_id: Cell<u32>,
	next_listener: Cell<u64>,
	prototypes: RefCell<HashMap<String, Map<String, Value>>>,
	important_dropping: RefCell<HashSet<String>>,
	model_tags: RefCell<HashSet<String>>,
	defined_tags: RefCell<HashSet<String>>,
	pending_ready: RefCell<Vec<(DomId, Box<dyn FnOnce()>)>>,
	released: RefCell<HashSet<DomId>>,
}
impl MemoryDom {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Whether the binding core [released](`DomHost::release`) `node`.
	#[must_use]
	pub fn is_released(&self, node: DomId) -> bool {
		self.released.borrow().contains(&node)
	}

	/// Creates a detached `<body>` to use as binding root.
	pub fn create_body(&self) -> DomId {
		self.create_element("body", None)
	}

	/// Makes elements with local name `tag` inherit a property `name` with `value`.
	pub fn set_prototype_property(&self, tag: &str, name: &str, value: Value) {
		self.prototypes.borrow_mut().entry(tag.to_ascii_lowercase()).or_default().insert(name.to_owned(), value);
	}

	/// Makes `!important` declarations of the style property `name` lose their priority, like some shorthands in browsers.
	pub fn drop_important_for(&self, name: &str) {
		self.important_dropping.borrow_mut().insert(name.to_owned());
	}

	/// Elements with local name `tag` created from now on expose a templating model.
	pub fn enable_model_for(&self, tag: &str) {
		self.model_tags.borrow_mut().insert(tag.to_ascii_lowercase());
	}

	/// Defines the custom element `tag`, which resolves pending [`when_ready`](`DomHost::when_ready`) callbacks for it as microtasks.
	pub fn define_custom_element(&self, tag: &str) {
		let tag = tag.to_ascii_lowercase();
		self.defined_tags.borrow_mut().insert(tag.clone());
		let ready: Vec<_> = {
			let nodes = self.nodes.borrow();
			let mut pending = self.pending_ready.borrow_mut();
			let (ready, waiting) = core::mem::take(&mut *pending)
				.into_iter()
				.partition(|(node, _)| nodes.get(node).map_or(true, |node| node.local_name == tag));
			*pending = waiting;
			ready
		};
		for (_, callback) in ready {
			timer::queue_microtask(callback)
		}
	}

	#[must_use]
	pub fn pending_ready_count(&self) -> usize {
		self.pending_ready.borrow().len()
	}

	/// Dispatches `event` at `target`, bubbling up through its ancestors.
	///
	/// [`DomEvent::target`] is set to `target`.
	pub fn dispatch_event(&self, target: DomId, event: DomEvent) {
		let event = DomEvent { target: Some(target), ..event };
		let mut current = Some(target);
		while let Some(node) = current {
			let handlers: Vec<EventHandler> = self.with_node(node, |node| {
				node.listeners
					.iter()
					.filter(|(_, event_type, _)| *event_type == event.event_type)
					.map(|(_, _, handler)| Rc::clone(handler))
					.collect()
			});
			for handler in handlers {
				handler(&event)
			}
			current = self.parent(node);
		}
	}

	/// Dispatches an event without further properties, see [`dispatch_event`](`MemoryDom::dispatch_event`).
	pub fn dispatch(&self, target: DomId, event_type: &str) {
		self.dispatch_event(target, DomEvent::new(event_type))
	}

	#[must_use]
	pub fn listener_count(&self, node: DomId) -> usize {
		self.with_node(node, |node| node.listeners.len())
	}

	#[must_use]
	pub fn listener_count_for(&self, node: DomId, event_type: &str) -> usize {
		self.with_node(node, |node| node.listeners.iter().filter(|(_, t, _)| t == event_type).count())
	}

	/// The class list in insertion order.
	#[must_use]
	pub fn classes(&self, node: DomId) -> Vec<String> {
		self.with_node(node, |node| node.classes.clone())
	}

	/// The value at `path` of `node`'s templating model.
	#[must_use]
	pub fn model_value(&self, node: DomId, path: &str) -> Option<Value> {
		self.with_node(node, |node| {
			let mut current = node.model.as_ref()?;
			for segment in path.split('.') {
				current = match current {
					Value::Object(object) => object.get(segment)?,
					Value::Array(array) => array.get(segment.parse::<usize>().ok()?)?,
					_ => return None,
				};
			}
			Some(current.clone())
		})
	}

	/// Simulates the element changing its own model, notifying observers like a templating library would.
	pub fn report_model_change(&self, node: DomId, path: &str, value: Value) {
		self.with_node_mut(node, |node| {
			if let Some(model) = &mut node.model {
				set_path(model, path, value.clone());
			}
		});
		let observers = self.with_node(node, |node| node.model_observers.clone());
		let changes = [(path.to_owned(), value)];
		for observer in observers {
			observer(&changes)
		}
	}

	#[must_use]
	pub fn server_method_names(&self, node: DomId, table: MethodTable) -> Vec<String> {
		let mut names: Vec<_> = self.with_node(node, |node| {
			node.server_methods
				.keys()
				.filter(|(method_table, _)| *method_table == table)
				.map(|(_, name)| name.clone())
				.collect()
		});
		names.sort();
		names
	}

	#[must_use]
	pub fn server_method(&self, node: DomId, table: MethodTable, name: &str) -> Option<ServerMethod> {
		self.with_node(node, |node| node.server_methods.get(&(table, name.to_owned())).cloned())
	}

	/// Serializes `node` and its descendants, without shadow trees.
	#[must_use]
	pub fn outer_html(&self, node: DomId) -> String {
		let mut html = String::new();
		self.write_html(node, &mut html);
		html
	}

	#[must_use]
	pub fn node_count(&self) -> usize {
		self.nodes.borrow().len()
	}

	fn write_html(&self, node: DomId, html: &mut String) {
		let (kind, local_name, text, attributes, style, classes, children) = self.with_node(node, |node| {
			(
				node.kind,
				node.local_name.clone(),
				node.text.clone(),
				node.attributes.clone(),
				node.style.iter().map(|entry| format!("{}: {}", entry.name, entry.value)).collect::<Vec<_>>(),
				node.classes.clone(),
				node.children.clone(),
			)
		});
		match kind {
			NodeKind::Text => return html.push_str(&text),
			NodeKind::ShadowRoot | NodeKind::Other => {
				for child in children {
					self.write_html(child, html)
				}
				return;
			}
			NodeKind::Element => (),
		}
		html.push('<');
		html.push_str(&local_name);
		for (name, value) in attributes {
			html.push_str(&format!(" {}=\"{}\"", name, value));
		}
		if !classes.is_empty() {
			html.push_str(&format!(" class=\"{}\"", classes.join(" ")));
		}
		if !style.is_empty() {
			html.push_str(&format!(" style=\"{}\"", style.join("; ")));
		}
		html.push('>');
		for child in children {
			self.write_html(child, html)
		}
		html.push_str(&format!("</{}>", local_name));
	}

	fn allocate(&self, node: MemoryNode) -> DomId {
		let id = DomId(self.next_id.get());
		self.next_id.set(id.0 + 1);
		self.nodes.borrow_mut().insert(id, node);
		id
	}

	/// # Panics
	///
	/// Iff `node` doesn't belong to this document.
	fn with_node<T>(&self, node: DomId, f: impl FnOnce(&MemoryNode) -> T) -> T {
		match self.nodes.borrow().get(&node) {
			Some(node) => f(node),
			None => panic!("Unknown DOM node {:?}.", node),
		}
	}

	fn with_node_mut<T>(&self, node: DomId, f: impl FnOnce(&mut MemoryNode) -> T) -> T {
		match self.nodes.borrow_mut().get_mut(&node) {
			Some(node) => f(node),
			None => panic!("Unknown DOM node {:?}.", node),
		}
	}

	fn detach(&self, child: DomId) {
		if let Some(parent) = self.with_node_mut(child, |child| child.parent.take()) {
			self.with_node_mut(parent, |parent| parent.children.retain(|c| *c != child));
		}
	}
}

fn set_path(model: &mut Value, path: &str, value: Value) {
	let segments: Vec<&str> = path.split('.').collect();
	set_segments(model, &segments, value)
}

fn set_segments(model: &mut Value, segments: &[&str], value: Value) {
	let (segment, rest) = match segments.split_first() {
		Some(split) => split,
		None => return *model = value,
	};
	if !model.is_object() && !model.is_array() {
		*model = Value::Object(Map::new());
	}
	let next = match model {
		Value::Array(array) => match segment.parse::<usize>() {
			Ok(index) if index < array.len() => &mut array[index],
			_ => return,
		},
		Value::Object(object) => object.entry((*segment).to_owned()).or_insert(Value::Null),
		_ => return,
	};
	set_segments(next, rest, value)
}

fn path_mut<'a>(model: &'a mut Value, segments: &[&str]) -> Option<&'a mut Value> {
	match segments.split_first() {
		None => Some(model),
		Some((segment, rest)) => match model {
			Value::Object(object) => path_mut(object.get_mut(*segment)?, rest),
			_ => None,
		},
	}
}

impl DomHost for MemoryDom {
	fn create_element(&self, tag: &str, namespace: Option<&str>) -> DomId {
		let html = namespace.map_or(true, |namespace| namespace == HTML_NAMESPACE);
		let local_name = if html { tag.to_ascii_lowercase() } else { tag.to_owned() };
		let model = if html && self.model_tags.borrow().contains(&local_name) {
			Some(Value::Object(Map::new()))
		} else {
			None
		};
		let mut node = MemoryNode::new(NodeKind::Element, local_name, Some(namespace.unwrap_or(HTML_NAMESPACE).to_owned()));
		node.model = model;
		let id = self.allocate(node);
		trace!(?id, tag, "Created element.");
		id
	}

	fn create_text(&self, text: &str) -> DomId {
		let mut node = MemoryNode::new(NodeKind::Text, "#text".to_owned(), None);
		node.text = text.to_owned();
		self.allocate(node)
	}

	fn dispose(&self, node: DomId) {
		self.detach(node);
		self.nodes.borrow_mut().remove(&node);
	}

	fn release(&self, node: DomId) {
		trace!(?node, "Releasing node.");
		if let Some(node) = self.nodes.borrow_mut().get_mut(&node) {
			node.model_observers.clear();
		}
		self.released.borrow_mut().insert(node);
	}

	fn kind(&self, node: DomId) -> NodeKind {
		self.with_node(node, |node| node.kind)
	}

	fn tag_name(&self, node: DomId) -> Option<String> {
		self.with_node(node, |node| match node.kind {
			NodeKind::Element if node.namespace.as_deref() == Some(HTML_NAMESPACE) => Some(node.local_name.to_ascii_uppercase()),
			NodeKind::Element => Some(node.local_name.clone()),
			_ => None,
		})
	}

	fn local_name(&self, node: DomId) -> Option<String> {
		self.with_node(node, |node| (node.kind == NodeKind::Element).then(|| node.local_name.clone()))
	}

	fn namespace_uri(&self, node: DomId) -> Option<String> {
		self.with_node(node, |node| node.namespace.clone())
	}

	fn text(&self, node: DomId) -> Option<String> {
		self.with_node(node, |node| (node.kind == NodeKind::Text).then(|| node.text.clone()))
	}

	fn set_text(&self, node: DomId, text: &str) {
		self.with_node_mut(node, |node| node.text = text.to_owned())
	}

	fn parent(&self, node: DomId) -> Option<DomId> {
		self.with_node(node, |node| node.parent)
	}

	fn child_nodes(&self, node: DomId) -> Vec<DomId> {
		self.with_node(node, |node| node.children.clone())
	}

	fn insert_before(&self, parent: DomId, child: DomId, before: Option<DomId>) {
		self.detach(child);
		self.with_node_mut(parent, |parent_node| {
			let index = match before {
				None => parent_node.children.len(),
				Some(before) => match parent_node.children.iter().position(|c| *c == before) {
					Some(index) => index,
					None => {
						warn!(?before, "Reference node is not a child; appending instead.");
						parent_node.children.len()
					}
				},
			};
			parent_node.children.insert(index, child);
		});
		self.with_node_mut(child, |child| child.parent = Some(parent));
	}

	fn remove_child(&self, parent: DomId, child: DomId) {
		if self.parent(child) == Some(parent) {
			self.detach(child)
		}
	}

	fn property(&self, node: DomId, name: &str) -> Option<Value> {
		self.with_node(node, |node| {
			if node.undefined_properties.contains(name) {
				return None;
			}
			if let Some(value) = node.properties.get(name) {
				return Some(value.clone());
			}
			self.prototypes.borrow().get(&node.local_name).and_then(|prototype| prototype.get(name).cloned())
		})
	}

	fn has_own_property(&self, node: DomId, name: &str) -> bool {
		self.with_node(node, |node| node.properties.contains_key(name) || node.undefined_properties.contains(name))
	}

	fn set_property(&self, node: DomId, name: &str, value: Option<Value>) {
		self.with_node_mut(node, |node| match value {
			Some(value) => {
				node.undefined_properties.remove(name);
				node.properties.insert(name.to_owned(), value);
			}
			None => {
				node.properties.remove(name);
				node.undefined_properties.insert(name.to_owned());
			}
		})
	}

	fn delete_property(&self, node: DomId, name: &str) {
		self.with_node_mut(node, |node| {
			node.properties.remove(name);
			node.undefined_properties.remove(name);
		})
	}

	fn attribute(&self, node: DomId, name: &str) -> Option<String> {
		self.with_node(node, |node| node.attributes.iter().find(|(n, _)| n == name).map(|(_, value)| value.clone()))
	}

	fn set_attribute(&self, node: DomId, name: &str, value: &str) {
		self.with_node_mut(node, |node| match node.attributes.iter_mut().find(|(n, _)| n == name) {
			Some((_, existing)) => *existing = value.to_owned(),
			None => node.attributes.push((name.to_owned(), value.to_owned())),
		})
	}

	fn remove_attribute(&self, node: DomId, name: &str) {
		self.with_node_mut(node, |node| node.attributes.retain(|(n, _)| n != name))
	}

	fn style_property(&self, node: DomId, name: &str) -> String {
		self.with_node(node, |node| {
			node.style
				.iter()
				.find(|entry| entry.name == name)
				.map_or_else(String::new, |entry| entry.value.clone())
		})
	}

	fn style_priority(&self, node: DomId, name: &str) -> String {
		self.with_node(node, |node| {
			node.style
				.iter()
				.find(|entry| entry.name == name)
				.map_or_else(String::new, |entry| entry.priority.clone())
		})
	}

	fn set_style_property(&self, node: DomId, name: &str, value: &str, priority: &str) {
		if value.is_empty() {
			return self.remove_style_property(node, name);
		}
		let priority = if priority == "important" && !self.important_dropping.borrow().contains(name) {
			"important"
		} else {
			""
		};
		self.with_node_mut(node, |node| match node.style.iter_mut().find(|entry| entry.name == name) {
			Some(entry) => {
				entry.value = value.to_owned();
				entry.priority = priority.to_owned();
			}
			None => node.style.push(StyleEntry {
				name: name.to_owned(),
				value: value.to_owned(),
				priority: priority.to_owned(),
			}),
		})
	}

	fn remove_style_property(&self, node: DomId, name: &str) {
		self.with_node_mut(node, |node| node.style.retain(|entry| entry.name != name))
	}

	fn add_class(&self, node: DomId, class: &str) {
		self.with_node_mut(node, |node| {
			if !node.classes.iter().any(|c| c == class) {
				node.classes.push(class.to_owned())
			}
		})
	}

	fn remove_class(&self, node: DomId, class: &str) {
		self.with_node_mut(node, |node| node.classes.retain(|c| c != class))
	}

	fn has_class(&self, node: DomId, class: &str) -> bool {
		self.with_node(node, |node| node.classes.iter().any(|c| c == class))
	}

	fn add_event_listener(&self, node: DomId, event_type: &str, handler: EventHandler) -> ListenerId {
		let id = ListenerId(self.next_listener.get());
		self.next_listener.set(id.0 + 1);
		self.with_node_mut(node, |node| node.listeners.push((id, event_type.to_owned(), handler)));
		id
	}

	fn remove_event_listener(&self, node: DomId, listener: ListenerId) {
		self.with_node_mut(node, |node| node.listeners.retain(|(id, _, _)| *id != listener))
	}

	fn shadow_root(&self, node: DomId) -> Option<DomId> {
		self.with_node(node, |node| node.shadow_root)
	}

	fn attach_shadow(&self, node: DomId) -> DomId {
		if let Some(existing) = self.shadow_root(node) {
			return existing;
		}
		let shadow_root = self.allocate(MemoryNode::new(NodeKind::ShadowRoot, "#shadow-root".to_owned(), None));
		self.with_node_mut(node, |node| node.shadow_root = Some(shadow_root));
		shadow_root
	}

	fn when_ready(&self, node: DomId, callback: Box<dyn FnOnce()>) {
		let local_name = self.with_node(node, |node| node.local_name.clone());
		if !local_name.contains('-') || self.defined_tags.borrow().contains(&local_name) {
			timer::queue_microtask(callback)
		} else {
			self.pending_ready.borrow_mut().push((node, callback))
		}
	}

	fn supports_model(&self, node: DomId) -> bool {
		self.with_node(node, |node| node.model.is_some())
	}

	fn set_model_value(&self, node: DomId, path: &str, value: Value) {
		self.with_node_mut(node, |node| {
			if let Some(model) = &mut node.model {
				set_path(model, path, value)
			}
		})
	}

	fn splice_model_list(&self, node: DomId, path: &str, index: usize, remove: usize, add: Vec<Value>) {
		self.with_node_mut(node, |node| {
			let model = match &mut node.model {
				Some(model) => model,
				None => return,
			};
			let segments: Vec<&str> = path.split('.').collect();
			let current = match path_mut(model, &segments) {
				Some(current) => current,
				None => return,
			};
			if let Value::Array(array) = current {
				let index = index.min(array.len());
				let end = (index + remove).min(array.len());
				array.splice(index..end, add);
			}
		})
	}

	fn observe_model(&self, node: DomId, observer: ModelObserver) {
		self.with_node_mut(node, |node| node.model_observers.push(observer))
	}

	fn define_server_method(&self, node: DomId, table: MethodTable, name: &str, method: ServerMethod) {
		self.with_node_mut(node, |node| node.server_methods.insert((table, name.to_owned()), method));
	}

	fn remove_server_method(&self, node: DomId, table: MethodTable, name: &str) {
		self.with_node_mut(node, |node| node.server_methods.remove(&(table, name.to_owned())));
	}
}

impl core::fmt::Debug for MemoryDom {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("MemoryDom").field("nodes", &self.nodes.borrow().len()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn events_bubble_to_ancestors() {
		let dom = MemoryDom::new();
		let outer = dom.create_element("div", None);
		let inner = dom.create_element("span", None);
		dom.append_child(outer, inner);

		let seen = Rc::new(RefCell::new(Vec::new()));
		let listener = dom.add_event_listener(
			outer,
			"click",
			Rc::new({
				let seen = Rc::clone(&seen);
				move |event: &DomEvent| seen.borrow_mut().push(event.target)
			}),
		);
		dom.dispatch(inner, "click");
		dom.dispatch(inner, "input");
		assert_eq!(*seen.borrow(), vec![Some(inner)]);

		dom.remove_event_listener(outer, listener);
		dom.dispatch(inner, "click");
		assert_eq!(seen.borrow().len(), 1);
	}

	#[test]
	fn inherited_properties_cannot_be_deleted() {
		let dom = MemoryDom::new();
		dom.set_prototype_property("input", "value", json!(""));
		let input = dom.create_element("input", None);
		assert_eq!(dom.property(input, "value"), Some(json!("")));
		assert!(!dom.has_own_property(input, "value"));

		dom.set_property(input, "value", Some(json!("x")));
		assert!(dom.has_own_property(input, "value"));
		dom.delete_property(input, "value");
		assert_eq!(dom.property(input, "value"), Some(json!("")));

		dom.set_property(input, "value", None);
		assert_eq!(dom.property(input, "value"), None);
	}

	#[test]
	fn important_can_be_dropped() {
		let dom = MemoryDom::new();
		dom.drop_important_for("background");
		let div = dom.create_element("div", None);
		dom.set_style_property(div, "color", "red", "important");
		dom.set_style_property(div, "background", "blue", "important");
		assert_eq!(dom.style_priority(div, "color"), "important");
		assert_eq!(dom.style_priority(div, "background"), "");
		assert_eq!(dom.outer_html(div), "<div style=\"color: red; background: blue\"></div>");
	}

	#[test]
	fn models_accept_paths_and_splices() {
		let dom = MemoryDom::new();
		dom.enable_model_for("my-template");
		let element = dom.create_element("my-template", None);
		assert!(dom.supports_model(element));
		dom.set_model_value(element, "person.name", json!("Ada"));
		dom.set_model_value(element, "items", json!([1, 2, 3]));
		dom.splice_model_list(element, "items", 1, 1, vec![json!(9), json!(8)]);
		assert_eq!(dom.model_value(element, "person.name"), Some(json!("Ada")));
		assert_eq!(dom.model_value(element, "items"), Some(json!([1, 9, 8, 3])));
	}
}
