mod common;

use common::Fixture;
use serde_json::{json, Value};
use statetree_dom::{
	connector::ServerMessage,
	dom::{DomHost, DomId},
	reactive, timer,
	tree::{features, properties, StateNode, NO_NODE},
};

fn virtual_child(fixture: &Fixture, id: i32, tag: &str, payload: Value) -> StateNode {
	let child = fixture.element(id, tag);
	child.map(features::ELEMENT_DATA).property(properties::PAYLOAD).set_value(payload);
	child
}

/// Binds a `tag` element as node 2 and returns its DOM element.
fn host_element(fixture: &Fixture, tag: &str) -> (StateNode, DomId) {
	let view = fixture.element(2, tag);
	fixture.append(&fixture.root(), &view);
	fixture.bind_root();
	let element = view.dom_node().unwrap();
	(view, element)
}

fn template_field(fixture: &Fixture, element: DomId) -> DomId {
	let shadow_root = fixture.dom.attach_shadow(element);
	let wrapper = fixture.dom.create_element("div", None);
	let field = fixture.dom.create_element("input", None);
	fixture.dom.set_attribute(field, "id", "field");
	fixture.dom.append_child(wrapper, field);
	fixture.dom.append_child(shadow_root, wrapper);
	field
}

#[test]
fn attaches_by_id_without_reporting() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "div");
	let field = template_field(&fixture, element);

	let child = virtual_child(&fixture, 3, "input", json!({ "type": "@id", "value": "field" }));
	child.map(features::ELEMENT_ATTRIBUTES).property("placeholder").set_value("name");
	view.list(features::VIRTUAL_CHILDREN).push(child.clone());
	reactive::flush();

	assert_eq!(child.dom_node(), Some(field));
	assert_eq!(fixture.dom.attribute(field, "placeholder").as_deref(), Some("name"));
	assert_eq!(fixture.binder.element_binding_state(&child), Some(true));
	assert!(fixture.queue.is_empty());
	assert_eq!(fixture.registry.pending_claim_count(), 0);
}

#[test]
fn attaches_by_path() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "div");
	let field = template_field(&fixture, element);

	let child = virtual_child(&fixture, 3, "input", json!({ "type": "subTemplate", "value": [0, 0] }));
	view.list(features::VIRTUAL_CHILDREN).push(child.clone());
	reactive::flush();
	assert_eq!(child.dom_node(), Some(field));
}

#[test]
fn reports_missing_and_mismatched_elements() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "div");
	template_field(&fixture, element);

	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 3, "input", json!({ "type": "@id", "value": "missing" })));
	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 4, "select", json!({ "type": "@id", "value": "field" })));
	reactive::flush();

	assert_eq!(
		fixture.queue.drain(),
		vec![
			ServerMessage::AttachExistingElement {
				node: 2,
				requested: 3,
				assigned: NO_NODE,
				id: Some("missing".to_owned()),
			},
			ServerMessage::AttachExistingElement {
				node: 2,
				requested: 4,
				assigned: NO_NODE,
				id: Some("field".to_owned()),
			},
		]
	);
}

#[test]
fn reports_the_node_already_bound_to_the_element() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "div");
	let field = template_field(&fixture, element);

	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 3, "input", json!({ "type": "@id", "value": "field" })));
	reactive::flush();
	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 4, "input", json!({ "type": "@name", "value": "other" })));
	fixture.dom.set_attribute(field, "name", "other");
	reactive::flush();

	assert_eq!(
		fixture.queue.drain(),
		vec![ServerMessage::AttachExistingElement {
			node: 2,
			requested: 4,
			assigned: 3,
			id: None,
		}]
	);
}

#[test]
fn waits_for_the_custom_element_to_be_ready() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "my-view");

	let child = virtual_child(&fixture, 3, "input", json!({ "type": "@id", "value": "field" }));
	view.list(features::VIRTUAL_CHILDREN).push(child.clone());
	reactive::flush();
	assert_eq!(child.dom_node(), None);
	assert_eq!(fixture.registry.pending_claim_count(), 1);

	// A second request for the same element while the first is pending is a conflict.
	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 4, "input", json!({ "type": "@id", "value": "field" })));
	reactive::flush();
	assert_eq!(
		fixture.queue.drain(),
		vec![ServerMessage::AttachExistingElement {
			node: 2,
			requested: 4,
			assigned: 3,
			id: Some("field".to_owned()),
		}]
	);

	let field = template_field(&fixture, element);
	fixture.dom.define_custom_element("my-view");
	timer::run_microtasks();
	assert_eq!(child.dom_node(), Some(field));
	assert!(fixture.queue.is_empty());
	assert_eq!(fixture.registry.pending_claim_count(), 0);

	// The fallback timer is disarmed.
	timer::advance(u64::from(fixture.registry.config().ready_timeout_ms));
	assert!(fixture.queue.is_empty());
}

#[test]
fn gives_up_after_the_ready_timeout() {
	let fixture = Fixture::new();
	let (view, _) = host_element(&fixture, "my-view");

	view.list(features::VIRTUAL_CHILDREN)
		.push(virtual_child(&fixture, 3, "input", json!({ "type": "@id", "value": "field" })));
	reactive::flush();
	timer::advance(u64::from(fixture.registry.config().ready_timeout_ms));

	assert_eq!(
		fixture.queue.drain(),
		vec![ServerMessage::AttachExistingElement {
			node: 2,
			requested: 3,
			assigned: NO_NODE,
			id: Some("field".to_owned()),
		}]
	);
	assert_eq!(fixture.registry.pending_claim_count(), 0);
}

#[test]
fn in_memory_children_get_fresh_elements() {
	let fixture = Fixture::new();
	let (view, element) = host_element(&fixture, "div");

	let child = virtual_child(&fixture, 3, "span", json!({ "type": "inMemory" }));
	view.list(features::VIRTUAL_CHILDREN).push(child.clone());
	reactive::flush();

	let dom = child.dom_node().unwrap();
	assert_eq!(fixture.dom.parent(dom), None);
	assert!(fixture.dom.child_nodes(element).is_empty());
}
