#![allow(dead_code)]

use serde_json::Value;
use statetree_dom::{
	connector::MessageQueue,
	dom::DomId,
	memory::MemoryDom,
	reactive,
	tree::{features, properties, StateNode, StateTree},
	Binder, BinderConfig, Registry,
};
use std::rc::Rc;

/// A tree bound to a `<body>` of an in-memory document.
pub struct Fixture {
	pub dom: Rc<MemoryDom>,
	pub queue: Rc<MessageQueue>,
	pub tree: StateTree,
	pub registry: Registry,
	pub binder: Binder,
	pub body: DomId,
}
impl Fixture {
	pub fn new() -> Self {
		Self::with_config(BinderConfig::default())
	}

	pub fn with_config(config: BinderConfig) -> Self {
		Self::with_dom(MemoryDom::new(), config)
	}

	pub fn with_dom(dom: MemoryDom, config: BinderConfig) -> Self {
		let dom = Rc::new(dom);
		let queue = Rc::new(MessageQueue::new());
		let tree = StateTree::new(queue.clone());
		let registry = Registry::builder(dom.clone()).config(config).build();
		let binder = Binder::new(tree.clone(), registry.clone());
		let body = dom.create_body();
		Self {
			dom,
			queue,
			tree,
			registry,
			binder,
			body,
		}
	}

	pub fn root(&self) -> StateNode {
		self.tree.root_node()
	}

	pub fn bind_root(&self) {
		self.binder.bind(&self.root(), self.body).unwrap();
		reactive::flush();
	}

	pub fn element(&self, id: i32, tag: &str) -> StateNode {
		let node = self.tree.create_node(id);
		node.map(features::ELEMENT_DATA).property(properties::TAG).set_value(tag);
		node
	}

	pub fn text(&self, id: i32, text: &str) -> StateNode {
		let node = self.tree.create_node(id);
		node.map(features::TEXT_NODE).property(properties::TEXT).set_value(text);
		node
	}

	pub fn append(&self, parent: &StateNode, child: &StateNode) {
		parent.list(features::ELEMENT_CHILDREN).push(child.clone())
	}

	/// Declares a DOM listener for `event_type` on `node` with the given expression settings.
	pub fn listen(&self, node: &StateNode, event_type: &str, settings: Value) {
		let key = format!("{}-{}", node.id(), event_type);
		self.registry.constant_pool().insert(key.clone(), settings);
		node.map(features::ELEMENT_LISTENERS).property(event_type).set_value(key.as_str());
	}

	pub fn html(&self) -> String {
		self.dom.outer_html(self.body)
	}
}
