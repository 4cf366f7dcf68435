//! The client-local mirror of the server-owned state tree.
//!
//! The tree is populated by whatever applies the server's changes (not part of this crate).
//! The binding core only reads it, listens to it and, for client→server property synchronization, writes single property values.

use crate::{
	connector::ServerConnector,
	dom::DomId,
	listeners::{EventRemover, Listeners},
	reactive::Dependency,
};
use core::{
	any::{Any, TypeId},
	cell::{Cell, RefCell},
};
use hashbrown::HashMap;
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{trace, warn};

/// Stable state node id, assigned by the server.
pub type NodeId = i32;

/// The "not found" sentinel used where a node id is expected.
pub const NO_NODE: NodeId = -1;

/// Identifies a typed feature of a [`StateNode`].
pub type FeatureId = u32;

/// Feature ids of the wire protocol.
pub mod features {
	use super::FeatureId;

	pub const ELEMENT_DATA: FeatureId = 0;
	pub const ELEMENT_PROPERTIES: FeatureId = 1;
	pub const ELEMENT_CHILDREN: FeatureId = 2;
	pub const ELEMENT_ATTRIBUTES: FeatureId = 3;
	pub const ELEMENT_LISTENERS: FeatureId = 4;
	pub const TEXT_NODE: FeatureId = 7;
	pub const CLASS_LIST: FeatureId = 11;
	pub const ELEMENT_STYLE_PROPERTIES: FeatureId = 12;
	pub const TEMPLATE_MODELLIST: FeatureId = 16;
	pub const POLYMER_SERVER_EVENT_HANDLERS: FeatureId = 17;
	pub const POLYMER_EVENT_LISTENERS: FeatureId = 18;
	pub const CLIENT_DELEGATE_HANDLERS: FeatureId = 19;
	pub const SHADOW_ROOT_DATA: FeatureId = 20;
	pub const BASIC_TYPE_VALUE: FeatureId = 23;
	pub const VIRTUAL_CHILDREN: FeatureId = 24;
}

/// Property names and payload constants of the wire protocol.
pub mod properties {
	pub const TAG: &str = "tag";
	pub const NAMESPACE: &str = "namespace";
	pub const PAYLOAD: &str = "payload";
	pub const TYPE: &str = "type";
	pub const VISIBLE: &str = "visible";
	pub const SHADOW_ROOT: &str = "shadowRoot";
	pub const TEXT: &str = "text";
	pub const VALUE: &str = "value";
	pub const URI: &str = "uri";
	pub const ID: &str = "id";

	pub const INJECT_BY_ID: &str = "@id";
	pub const INJECT_BY_NAME: &str = "@name";
	pub const TEMPLATE_IN_TEMPLATE: &str = "subTemplate";
	pub const IN_MEMORY_CHILD: &str = "inMemory";
}

/// A value held by a [`MapProperty`] or [`NodeList`].
#[derive(Debug, Clone)]
pub enum TreeValue {
	Json(Value),
	Node(StateNode),
}
impl TreeValue {
	#[must_use]
	pub fn as_json(&self) -> Option<&Value> {
		match self {
			TreeValue::Json(value) => Some(value),
			TreeValue::Node(_) => None,
		}
	}

	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		self.as_json().and_then(Value::as_str)
	}

	#[must_use]
	pub fn as_node(&self) -> Option<&StateNode> {
		match self {
			TreeValue::Json(_) => None,
			TreeValue::Node(node) => Some(node),
		}
	}
}
impl PartialEq for TreeValue {
	fn eq(&self, other: &Self) -> bool {
		match (self, other) {
			(TreeValue::Json(a), TreeValue::Json(b)) => a == b,
			(TreeValue::Node(a), TreeValue::Node(b)) => a.ptr_eq(b),
			_ => false,
		}
	}
}
impl From<Value> for TreeValue {
	fn from(value: Value) -> Self {
		Self::Json(value)
	}
}
impl From<&str> for TreeValue {
	fn from(value: &str) -> Self {
		Self::Json(Value::String(value.to_owned()))
	}
}
impl From<StateNode> for TreeValue {
	fn from(node: StateNode) -> Self {
		Self::Node(node)
	}
}

struct TreeInner {
	connector: Rc<dyn ServerConnector>,
	nodes: RefCell<HashMap<NodeId, StateNode>>,
	dom_index: RefCell<HashMap<DomId, NodeId>>,
	updating: Cell<bool>,
}

/// The node registry plus the outbound RPC forwarders.
#[derive(Clone)]
pub struct StateTree(Rc<TreeInner>);
impl StateTree {
	pub const ROOT_ID: NodeId = 1;

	pub fn new(connector: Rc<dyn ServerConnector>) -> Self {
		let tree = Self(Rc::new(TreeInner {
			connector,
			nodes: RefCell::default(),
			dom_index: RefCell::default(),
			updating: Cell::new(false),
		}));
		tree.create_node(Self::ROOT_ID);
		tree
	}

	#[must_use]
	pub fn root_node(&self) -> StateNode {
		match self.node(Self::ROOT_ID) {
			Some(root) => root,
			None => unreachable!("The root node is never unregistered."),
		}
	}

	/// Creates and registers a new node.
	///
	/// An already registered id is replaced, which unregisters the previous node.
	pub fn create_node(&self, id: NodeId) -> StateNode {
		let node = StateNode(Rc::new(NodeInner {
			id,
			tree: Rc::downgrade(&self.0),
			parent: RefCell::new(None),
			features: RefCell::default(),
			dom_node: Cell::new(None),
			node_data: RefCell::default(),
			unregister_listeners: Listeners::new(),
			unregistered: Cell::new(false),
		}));
		let previous = self.0.nodes.borrow_mut().insert(id, node.clone());
		if let Some(previous) = previous {
			warn!(id, "Replacing a registered state node.");
			previous.unregister();
		}
		trace!(id, "Created state node.");
		node
	}

	#[must_use]
	pub fn node(&self, id: NodeId) -> Option<StateNode> {
		self.0.nodes.borrow().get(&id).cloned()
	}

	/// Unregisters `node`, firing its unregister listeners exactly once.
	pub fn unregister_node(&self, node: &StateNode) {
		{
			let mut nodes = self.0.nodes.borrow_mut();
			if nodes.get(&node.id()).map_or(false, |registered| registered.ptr_eq(node)) {
				nodes.remove(&node.id());
			}
		}
		node.unregister();
	}

	/// The state node currently bound to `dom`, if any.
	#[must_use]
	pub fn node_for_dom(&self, dom: DomId) -> Option<StateNode> {
		let id = *self.0.dom_index.borrow().get(&dom)?;
		self.node(id)
	}

	/// Marks the tree as being mid-update, during which binding must not happen.
	pub fn set_updating(&self, updating: bool) {
		self.0.updating.set(updating)
	}

	#[must_use]
	pub fn is_updating(&self) -> bool {
		self.0.updating.get()
	}

	#[must_use]
	pub fn connector(&self) -> &Rc<dyn ServerConnector> {
		&self.0.connector
	}

	pub fn send_event_to_server(&self, node: &StateNode, event_type: &str, event_data: Option<Value>) {
		self.0.connector.send_event(node.id(), event_type, event_data)
	}

	pub fn send_template_event_to_server(&self, node: &StateNode, method: &str, arguments: Vec<Value>, promise_id: Option<u32>) {
		self.0.connector.send_template_event(node.id(), method, arguments, promise_id)
	}

	pub fn send_existing_element_attach_to_server(&self, parent: &StateNode, requested: NodeId, assigned: NodeId, id: Option<&str>) {
		self.0.connector.send_existing_element_attach(parent.id(), requested, assigned, id)
	}

	pub fn send_node_property_sync_to_server(&self, property: &MapProperty) {
		let (node, feature) = match property.map() {
			Some(map) => (map.node(), map.id()),
			None => return,
		};
		let node = match node {
			Some(node) => node,
			None => return,
		};
		let value = property.peek().and_then(|value| value.as_json().cloned()).unwrap_or(Value::Null);
		self.0.connector.send_property_sync(node.id(), feature, property.name(), value)
	}

	fn index_dom(&self, node: NodeId, previous: Option<DomId>, dom: Option<DomId>) {
		let mut dom_index = self.0.dom_index.borrow_mut();
		if let Some(previous) = previous {
			if dom_index.get(&previous) == Some(&node) {
				dom_index.remove(&previous);
			}
		}
		if let Some(dom) = dom {
			dom_index.insert(dom, node);
		}
	}
}
impl core::fmt::Debug for StateTree {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("StateTree")
			.field("nodes", &self.0.nodes.borrow().len())
			.field("updating", &self.0.updating.get())
			.finish()
	}
}

enum Feature {
	Map(NodeMap),
	List(NodeList),
}

struct NodeInner {
	id: NodeId,
	tree: Weak<TreeInner>,
	parent: RefCell<Option<Weak<NodeInner>>>,
	features: RefCell<HashMap<FeatureId, Feature>>,
	dom_node: Cell<Option<DomId>>,
	node_data: RefCell<HashMap<TypeId, Rc<dyn Any>>>,
	unregister_listeners: Listeners<StateNode>,
	unregistered: Cell<bool>,
}

/// A node of the [`StateTree`].
#[derive(Clone)]
pub struct StateNode(Rc<NodeInner>);
impl StateNode {
	#[must_use]
	pub fn id(&self) -> NodeId {
		self.0.id
	}

	#[must_use]
	pub fn tree(&self) -> Option<StateTree> {
		self.0.tree.upgrade().map(StateTree)
	}

	#[must_use]
	pub fn parent(&self) -> Option<StateNode> {
		self.0.parent.borrow().as_ref().and_then(Weak::upgrade).map(StateNode)
	}

	pub fn set_parent(&self, parent: Option<&StateNode>) {
		*self.0.parent.borrow_mut() = parent.map(|parent| Rc::downgrade(&parent.0))
	}

	#[must_use]
	pub fn has_feature(&self, feature: FeatureId) -> bool {
		self.0.features.borrow().contains_key(&feature)
	}

	/// The map feature `feature`, created on first access.
	///
	/// # Panics
	///
	/// Iff `feature` was previously accessed as list.
	#[must_use]
	pub fn map(&self, feature: FeatureId) -> NodeMap {
		let mut features = self.0.features.borrow_mut();
		match features.entry(feature).or_insert_with(|| {
			Feature::Map(NodeMap(Rc::new(MapInner {
				node: Rc::downgrade(&self.0),
				id: feature,
				properties: RefCell::default(),
				add_listeners: Listeners::new(),
			})))
		}) {
			Feature::Map(map) => map.clone(),
			Feature::List(_) => panic!("Feature {} of node {} is a list.", feature, self.0.id),
		}
	}

	/// The list feature `feature`, created on first access.
	///
	/// # Panics
	///
	/// Iff `feature` was previously accessed as map.
	#[must_use]
	pub fn list(&self, feature: FeatureId) -> NodeList {
		let mut features = self.0.features.borrow_mut();
		match features.entry(feature).or_insert_with(|| {
			Feature::List(NodeList(Rc::new(ListInner {
				node: Rc::downgrade(&self.0),
				id: feature,
				items: RefCell::default(),
				dependency: Dependency::new(),
				splice_listeners: Listeners::new(),
			})))
		}) {
			Feature::List(list) => list.clone(),
			Feature::Map(_) => panic!("Feature {} of node {} is a map.", feature, self.0.id),
		}
	}

	#[must_use]
	pub fn dom_node(&self) -> Option<DomId> {
		self.0.dom_node.get()
	}

	pub fn set_dom_node(&self, dom: Option<DomId>) {
		let previous = self.0.dom_node.replace(dom);
		if let Some(tree) = self.tree() {
			tree.index_dom(self.0.id, previous, dom);
		}
	}

	/// Node-local typed data, see [`set_node_data`](`StateNode::set_node_data`).
	#[must_use]
	pub fn node_data<T: Any>(&self) -> Option<Rc<T>> {
		let data = self.0.node_data.borrow().get(&TypeId::of::<T>()).cloned()?;
		data.downcast().ok()
	}

	pub fn set_node_data<T: Any>(&self, data: Rc<T>) {
		self.0.node_data.borrow_mut().insert(TypeId::of::<T>(), data);
	}

	pub fn clear_node_data<T: Any>(&self) -> Option<Rc<T>> {
		let data = self.0.node_data.borrow_mut().remove(&TypeId::of::<T>())?;
		data.downcast().ok()
	}

	/// Calls `listener` once when this node is unregistered.
	pub fn add_unregister_listener(&self, listener: impl Fn(&StateNode) + 'static) -> EventRemover {
		self.0.unregister_listeners.add(listener)
	}

	#[must_use]
	pub fn is_unregistered(&self) -> bool {
		self.0.unregistered.get()
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	fn unregister(&self) {
		if self.0.unregistered.replace(true) {
			return;
		}
		trace!(id = self.0.id, "Unregistering state node.");
		self.0.unregister_listeners.fire(self);
		self.0.unregister_listeners.clear();
		self.set_dom_node(None);
	}
}
impl core::fmt::Debug for StateNode {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("StateNode")
			.field("id", &self.0.id)
			.field("dom_node", &self.0.dom_node.get())
			.field("unregistered", &self.0.unregistered.get())
			.finish()
	}
}

struct MapInner {
	node: Weak<NodeInner>,
	id: FeatureId,
	properties: RefCell<Vec<MapProperty>>,
	add_listeners: Listeners<MapProperty>,
}

/// A map feature: named [`MapProperty`]s, created on first access.
#[derive(Clone)]
pub struct NodeMap(Rc<MapInner>);
impl NodeMap {
	#[must_use]
	pub fn id(&self) -> FeatureId {
		self.0.id
	}

	#[must_use]
	pub fn node(&self) -> Option<StateNode> {
		self.0.node.upgrade().map(StateNode)
	}

	/// The property named `name`. Creating it notifies the property add listeners.
	#[must_use]
	pub fn property(&self, name: &str) -> MapProperty {
		if let Some(existing) = self.0.properties.borrow().iter().find(|property| property.name() == name) {
			return existing.clone();
		}
		let property = MapProperty(Rc::new(PropertyInner {
			name: name.to_owned(),
			map: Rc::downgrade(&self.0),
			value: RefCell::new(None),
			dependency: Dependency::new(),
			change_listeners: Listeners::new(),
			previous_dom_value: RefCell::new(None),
		}));
		self.0.properties.borrow_mut().push(property.clone());
		self.0.add_listeners.fire(&property);
		property
	}

	#[must_use]
	pub fn has_property(&self, name: &str) -> bool {
		self.0.properties.borrow().iter().any(|property| property.name() == name)
	}

	/// Whether property `name` exists and has a value. Tracked if it exists.
	#[must_use]
	pub fn has_property_value(&self, name: &str) -> bool {
		let property = self.0.properties.borrow().iter().find(|property| property.name() == name).cloned();
		property.map_or(false, |property| property.has_value())
	}

	#[must_use]
	pub fn property_names(&self) -> Vec<String> {
		self.0.properties.borrow().iter().map(|property| property.name().to_owned()).collect()
	}

	/// Calls `f` for each property in creation order. Properties created by `f` are not visited.
	pub fn for_each_property(&self, mut f: impl FnMut(&MapProperty)) {
		let snapshot = self.0.properties.borrow().clone();
		for property in &snapshot {
			f(property)
		}
	}

	pub fn add_property_add_listener(&self, listener: impl Fn(&MapProperty) + 'static) -> EventRemover {
		self.0.add_listeners.add(listener)
	}
}
impl core::fmt::Debug for NodeMap {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("NodeMap").field("id", &self.0.id).field("properties", &self.property_names()).finish()
	}
}

/// Passed to [`MapProperty`] change listeners.
#[derive(Debug, Clone)]
pub struct PropertyChangeEvent {
	pub property: MapProperty,
	pub old_value: Option<TreeValue>,
	pub new_value: Option<TreeValue>,
}

struct PropertyInner {
	name: String,
	map: Weak<MapInner>,
	value: RefCell<Option<TreeValue>>,
	dependency: Dependency,
	change_listeners: Listeners<PropertyChangeEvent>,
	previous_dom_value: RefCell<Option<Option<Value>>>,
}

/// A single named value of a [`NodeMap`].
#[derive(Clone)]
pub struct MapProperty(Rc<PropertyInner>);
impl MapProperty {
	#[must_use]
	pub fn name(&self) -> &str {
		&self.0.name
	}

	#[must_use]
	pub fn map(&self) -> Option<NodeMap> {
		self.0.map.upgrade().map(NodeMap)
	}

	/// The current value. Tracked.
	#[must_use]
	pub fn value(&self) -> Option<TreeValue> {
		self.0.dependency.track();
		self.0.value.borrow().clone()
	}

	/// The current value, without tracking.
	#[must_use]
	pub fn peek(&self) -> Option<TreeValue> {
		self.0.value.borrow().clone()
	}

	/// Whether this property currently has a value. Tracked.
	#[must_use]
	pub fn has_value(&self) -> bool {
		self.0.dependency.track();
		self.0.value.borrow().is_some()
	}

	/// Sets the value, notifying dependents and change listeners iff it changed.
	pub fn set_value(&self, value: impl Into<TreeValue>) {
		self.replace_value(Some(value.into()))
	}

	pub fn remove_value(&self) {
		self.replace_value(None)
	}

	fn replace_value(&self, value: Option<TreeValue>) {
		if *self.0.value.borrow() == value {
			return;
		}
		if let Some(TreeValue::Node(child)) = &value {
			if let Some(node) = self.map().and_then(|map| map.node()) {
				child.set_parent(Some(&node));
			}
		}
		let old_value = self.0.value.replace(value.clone());
		self.0.dependency.notify();
		self.0.change_listeners.fire(&PropertyChangeEvent {
			property: self.clone(),
			old_value,
			new_value: value,
		});
	}

	pub fn add_change_listener(&self, listener: impl Fn(&PropertyChangeEvent) + 'static) -> EventRemover {
		self.0.change_listeners.add(listener)
	}

	/// The DOM value captured when a client→server synchronization of this property was last initiated.
	///
	/// The outer [`Option`] is [`None`] iff there is no snapshot, the inner one is [`None`] for an undefined DOM value.
	#[must_use]
	pub fn previous_dom_value(&self) -> Option<Option<Value>> {
		self.0.previous_dom_value.borrow().clone()
	}

	pub fn set_previous_dom_value(&self, dom_value: Option<Value>) {
		*self.0.previous_dom_value.borrow_mut() = Some(dom_value)
	}

	pub fn clear_previous_dom_value(&self) {
		self.0.previous_dom_value.borrow_mut().take();
	}

	/// Creates a command that stores `value` in this property and sends it to the server.
	///
	/// The command does nothing if `value` already equals the tree value.
	#[must_use]
	pub fn sync_to_server_command(&self, value: Value) -> SyncCommand {
		let current = self.0.value.borrow().clone();
		let unchanged = match &current {
			Some(TreeValue::Json(current)) => *current == value,
			Some(TreeValue::Node(_)) => false,
			None => value.is_null(),
		};
		if unchanged {
			return SyncCommand { property: self.clone(), action: None };
		}

		let property = self.clone();
		SyncCommand {
			property: self.clone(),
			action: Some(Rc::new(move || {
				property.set_value(value.clone());
				let tree = property.map().and_then(|map| map.node()).and_then(|node| node.tree());
				if let Some(tree) = tree {
					tree.send_node_property_sync_to_server(&property);
				}
			})),
		}
	}

	/// Stores `value` and sends it to the server, unless it's already the tree value.
	pub fn sync_to_server(&self, value: Value) {
		self.sync_to_server_command(value).run()
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl core::fmt::Debug for MapProperty {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let mut debug = f.debug_struct("MapProperty");
		debug.field("name", &self.0.name);
		#[cfg(feature = "dangerous-logging")]
		debug.field("value", &self.0.value.borrow());
		debug.finish()
	}
}

/// A deferred client→server property synchronization, see [`MapProperty::sync_to_server_command`].
#[derive(Clone)]
pub struct SyncCommand {
	property: MapProperty,
	action: Option<Rc<dyn Fn()>>,
}
impl SyncCommand {
	#[must_use]
	pub fn property(&self) -> &MapProperty {
		&self.property
	}

	/// Whether running this command would do nothing.
	#[must_use]
	pub fn is_noop(&self) -> bool {
		self.action.is_none()
	}

	pub fn run(&self) {
		if let Some(action) = &self.action {
			action()
		}
	}
}
impl core::fmt::Debug for SyncCommand {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("SyncCommand")
			.field("property", &self.property.name())
			.field("noop", &self.is_noop())
			.finish()
	}
}

/// Passed to [`NodeList`] splice listeners.
#[derive(Debug, Clone)]
pub struct ListSpliceEvent {
	pub list: NodeList,
	pub index: usize,
	pub removed: Vec<TreeValue>,
	pub added: Vec<TreeValue>,
	/// Whether this event replaces the whole list. `removed` then holds all previous items.
	pub clear: bool,
}

struct ListInner {
	node: Weak<NodeInner>,
	id: FeatureId,
	items: RefCell<Vec<TreeValue>>,
	dependency: Dependency,
	splice_listeners: Listeners<ListSpliceEvent>,
}

/// A list feature.
#[derive(Clone)]
pub struct NodeList(Rc<ListInner>);
impl NodeList {
	#[must_use]
	pub fn id(&self) -> FeatureId {
		self.0.id
	}

	#[must_use]
	pub fn node(&self) -> Option<StateNode> {
		self.0.node.upgrade().map(StateNode)
	}

	/// Tracked.
	#[must_use]
	pub fn len(&self) -> usize {
		self.0.dependency.track();
		self.0.items.borrow().len()
	}

	/// Tracked.
	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	/// Tracked.
	#[must_use]
	pub fn get(&self, index: usize) -> Option<TreeValue> {
		self.0.dependency.track();
		self.0.items.borrow().get(index).cloned()
	}

	/// A snapshot of all items. Tracked.
	#[must_use]
	pub fn items(&self) -> Vec<TreeValue> {
		self.0.dependency.track();
		self.0.items.borrow().clone()
	}

	/// Removes `remove` items at `index` and inserts `add` there.
	///
	/// # Panics
	///
	/// Iff the removed range is out of bounds.
	pub fn splice(&self, index: usize, remove: usize, add: Vec<TreeValue>) {
		let owner = self.node();
		for item in &add {
			if let (TreeValue::Node(child), Some(owner)) = (item, &owner) {
				child.set_parent(Some(owner));
			}
		}
		let removed: Vec<_> = self.0.items.borrow_mut().splice(index..index + remove, add.iter().cloned()).collect();
		self.0.dependency.notify();
		self.0.splice_listeners.fire(&ListSpliceEvent {
			list: self.clone(),
			index,
			removed,
			added: add,
			clear: false,
		});
	}

	pub fn add(&self, index: usize, item: impl Into<TreeValue>) {
		self.splice(index, 0, vec![item.into()])
	}

	pub fn push(&self, item: impl Into<TreeValue>) {
		let index = self.0.items.borrow().len();
		self.add(index, item)
	}

	pub fn remove(&self, index: usize) {
		self.splice(index, 1, Vec::new())
	}

	pub fn clear(&self) {
		let removed = core::mem::take(&mut *self.0.items.borrow_mut());
		self.0.dependency.notify();
		self.0.splice_listeners.fire(&ListSpliceEvent {
			list: self.clone(),
			index: 0,
			removed,
			added: Vec::new(),
			clear: true,
		});
	}

	pub fn add_splice_listener(&self, listener: impl Fn(&ListSpliceEvent) + 'static) -> EventRemover {
		self.0.splice_listeners.add(listener)
	}
}
impl core::fmt::Debug for NodeList {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("NodeList").field("id", &self.0.id).field("len", &self.0.items.borrow().len()).finish()
	}
}
