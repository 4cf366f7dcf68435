mod common;

use common::Fixture;
use serde_json::{json, Value};
use statetree_dom::{
	connector::ServerMessage,
	dom::{DomEvent, DomHost},
	reactive, timer,
	tree::{features, NodeId},
};

fn events(fixture: &Fixture) -> Vec<(NodeId, String, Option<Value>)> {
	fixture
		.queue
		.drain()
		.into_iter()
		.filter_map(|message| match message {
			ServerMessage::Event { node, event, data } => Some((node, event, data)),
			_ => None,
		})
		.collect()
}

#[test]
fn event_data_is_evaluated() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	fixture.listen(&input, "keydown", json!({ "event.key": false, "element.value": false, "element.tagName": false }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	fixture.dom.set_property(element, "value", Some(json!("abc")));
	fixture
		.dom
		.dispatch_event(element, DomEvent::new("keydown").with_property("key", json!("Enter")));
	assert_eq!(
		events(&fixture),
		vec![(
			2,
			"keydown".to_owned(),
			Some(json!({ "event.key": "Enter", "element.value": "abc", "element.tagName": "INPUT" }))
		)]
	);
}

#[test]
fn filters_gate_sending() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	fixture.listen(&input, "keydown", json!({ "event.key === 'Enter'": true, "event.key": false }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	fixture.dom.dispatch_event(element, DomEvent::new("keydown").with_property("key", json!("a")));
	assert!(fixture.queue.is_empty());

	fixture.dom.dispatch_event(element, DomEvent::new("keydown").with_property("key", json!("Enter")));
	assert_eq!(
		events(&fixture),
		vec![(
			2,
			"keydown".to_owned(),
			Some(json!({ "event.key === 'Enter'": true, "event.key": "Enter" }))
		)]
	);
}

#[test]
fn state_node_mapping_walks_up_to_bound_elements() {
	let fixture = Fixture::new();
	let root = fixture.root();
	fixture.listen(&root, "click", json!({ "]": false, "]event.target.parentElement": false }));
	let div = fixture.element(2, "div");
	fixture.append(&root, &div);
	fixture.bind_root();

	let inner = fixture.dom.create_element("b", None);
	fixture.dom.append_child(div.dom_node().unwrap(), inner);
	fixture.dom.dispatch(inner, "click");
	assert_eq!(
		events(&fixture),
		vec![(1, "click".to_owned(), Some(json!({ "]": 2, "]event.target.parentElement": 2 })))]
	);
}

#[test]
fn trailing_debounce_sends_the_last_event_once() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	fixture.listen(&input, "input", json!({ "": [[300, "trailing"]], "element.value": false }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	for value in ["a", "ab", "abc"] {
		fixture.dom.set_property(element, "value", Some(json!(value)));
		fixture.dom.dispatch(element, "input");
		timer::advance(100);
	}
	assert!(fixture.queue.is_empty());
	assert_eq!(fixture.registry.debouncers().len(), 1);

	timer::advance(300);
	assert_eq!(
		events(&fixture),
		vec![(2, "input".to_owned(), Some(json!({ "element.value": "abc", "for": "trailing" })))]
	);
	assert!(fixture.registry.debouncers().is_empty());
}

#[test]
fn intermediate_debounce_sends_periodically() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	fixture.listen(&input, "input", json!({ "": [[100, "intermediate"]], "element.value": false }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	fixture.dom.set_property(element, "value", Some(json!("a")));
	fixture.dom.dispatch(element, "input");
	timer::advance(60);
	fixture.dom.set_property(element, "value", Some(json!("ab")));
	fixture.dom.dispatch(element, "input");
	assert!(fixture.queue.is_empty());

	timer::advance(40);
	assert_eq!(
		events(&fixture),
		vec![(2, "input".to_owned(), Some(json!({ "element.value": "ab", "for": "intermediate" })))]
	);

	fixture.dom.set_property(element, "value", Some(json!("abc")));
	fixture.dom.dispatch(element, "input");
	timer::advance(100);
	assert_eq!(
		events(&fixture),
		vec![(2, "input".to_owned(), Some(json!({ "element.value": "abc", "for": "intermediate" })))]
	);

	// A quiet period ends the cadence.
	timer::advance(100);
	assert!(fixture.queue.is_empty());
	assert!(fixture.registry.debouncers().is_empty());
}

#[test]
fn leading_and_trailing_debounce() {
	let fixture = Fixture::new();
	let button = fixture.element(2, "button");
	fixture.listen(&button, "click", json!({ "": [[200, "leading", "trailing"]] }));
	fixture.append(&fixture.root(), &button);
	fixture.bind_root();

	let element = button.dom_node().unwrap();
	fixture.dom.dispatch(element, "click");
	assert_eq!(events(&fixture), vec![(2, "click".to_owned(), Some(json!({})))]);

	timer::advance(50);
	fixture.dom.dispatch(element, "click");
	assert!(fixture.queue.is_empty());

	timer::advance(200);
	assert_eq!(events(&fixture), vec![(2, "click".to_owned(), Some(json!({ "for": "trailing" })))]);
}

#[test]
fn buffered_events_are_flushed_before_other_events_of_the_element() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	fixture.listen(&input, "input", json!({ "": [[1000, "trailing"]] }));
	fixture.listen(&input, "blur", json!({}));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	fixture.dom.dispatch(element, "input");
	fixture.dom.dispatch(element, "blur");
	assert_eq!(
		events(&fixture),
		vec![
			(2, "input".to_owned(), Some(json!({ "for": "trailing" }))),
			(2, "blur".to_owned(), None),
		]
	);

	timer::advance(1000);
	assert!(fixture.queue.is_empty());
}

#[test]
fn listeners_follow_the_listener_map() {
	let fixture = Fixture::new();
	let div = fixture.element(2, "div");
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let element = div.dom_node().unwrap();
	assert_eq!(fixture.dom.listener_count(element), 0);

	fixture.listen(&div, "click", json!({}));
	reactive::flush();
	assert_eq!(fixture.dom.listener_count_for(element, "click"), 1);

	div.map(features::ELEMENT_LISTENERS).property("click").remove_value();
	reactive::flush();
	assert_eq!(fixture.dom.listener_count(element), 0);
}
