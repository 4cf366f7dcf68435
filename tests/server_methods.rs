mod common;

use common::Fixture;
use serde_json::json;
use statetree_dom::{
	connector::ServerMessage,
	server_event::MethodTable,
	tree::{features, StateNode},
	CallError,
};

fn bound_div(fixture: &Fixture) -> StateNode {
	let div = fixture.element(2, "div");
	div.list(features::CLIENT_DELEGATE_HANDLERS).push("save");
	div.list(features::POLYMER_SERVER_EVENT_HANDLERS).push("notify");
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();
	div
}

#[test]
fn server_methods_return_promises() {
	let fixture = Fixture::new();
	let div = bound_div(&fixture);
	let element = div.dom_node().unwrap();
	assert_eq!(fixture.dom.server_method_names(element, MethodTable::Server), vec!["save".to_owned()]);

	let save = fixture.dom.server_method(element, MethodTable::Server, "save").unwrap();
	let mut first = save(vec![json!(1)]).unwrap().unwrap();
	let mut second = save(vec![]).unwrap().unwrap();
	assert_eq!(
		fixture.queue.drain(),
		vec![
			ServerMessage::PublishedEventHandler {
				node: 2,
				method: "save".to_owned(),
				arguments: vec![json!(1)],
				promise_id: Some(0),
			},
			ServerMessage::PublishedEventHandler {
				node: 2,
				method: "save".to_owned(),
				arguments: vec![],
				promise_id: Some(1),
			},
		]
	);

	fixture.binder.complete_server_call(element, 1, Err(json!("nope")));
	fixture.binder.complete_server_call(element, 0, Ok(json!("done")));
	fixture.binder.complete_server_call(element, 7, Ok(json!("stale")));
	assert_eq!(first.try_recv().unwrap(), Some(Ok(json!("done"))));
	assert_eq!(second.try_recv().unwrap(), Some(Err(json!("nope"))));
}

#[test]
fn element_methods_are_fire_and_forget() {
	let fixture = Fixture::new();
	let div = bound_div(&fixture);
	let element = div.dom_node().unwrap();

	let notify = fixture.dom.server_method(element, MethodTable::Element, "notify").unwrap();
	assert!(notify(vec![json!("x")]).unwrap().is_none());
	assert_eq!(
		fixture.queue.drain(),
		vec![ServerMessage::PublishedEventHandler {
			node: 2,
			method: "notify".to_owned(),
			arguments: vec![json!("x")],
			promise_id: None,
		}]
	);
}

#[test]
fn methods_follow_the_name_list() {
	let fixture = Fixture::new();
	let div = bound_div(&fixture);
	let element = div.dom_node().unwrap();
	let save = fixture.dom.server_method(element, MethodTable::Server, "save").unwrap();

	div.list(features::CLIENT_DELEGATE_HANDLERS).remove(0);
	div.list(features::CLIENT_DELEGATE_HANDLERS).push("load");
	assert_eq!(fixture.dom.server_method_names(element, MethodTable::Server), vec!["load".to_owned()]);
	assert_eq!(save(vec![]).err(), Some(CallError::UnknownMethod("save".to_owned())));

	let load = fixture.dom.server_method(element, MethodTable::Server, "load").unwrap();
	fixture.tree.unregister_node(&div);
	assert_eq!(load(vec![]).err(), Some(CallError::Detached));
	assert!(fixture.queue.is_empty());
}
