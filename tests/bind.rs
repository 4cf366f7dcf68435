mod common;

use common::Fixture;
use serde_json::json;
use statetree_dom::{
	connector::ServerMessage,
	dom::{DomHost, HTML_NAMESPACE, SVG_NAMESPACE},
	memory::MemoryDom,
	reactive, timer,
	tree::{features, properties},
	BindError, BinderConfig,
};

#[test]
fn binding_twice_is_a_no_op() {
	let fixture = Fixture::new();
	fixture.listen(&fixture.root(), "click", json!({}));
	fixture.bind_root();
	fixture.bind_root();
	assert_eq!(fixture.dom.listener_count_for(fixture.body, "click"), 1);

	fixture.dom.dispatch(fixture.body, "click");
	assert_eq!(
		fixture.queue.drain(),
		vec![ServerMessage::Event {
			node: 1,
			event: "click".to_owned(),
			data: None,
		}]
	);
}

#[test]
fn exactly_one_strategy_must_apply() {
	let fixture = Fixture::new();

	let both = fixture.element(2, "div");
	both.map(features::TEXT_NODE).property(properties::TEXT).set_value("x");
	assert_eq!(fixture.binder.create_and_bind(&both), Err(BindError::AmbiguousStrategy { node: 2 }));

	let neither = fixture.tree.create_node(3);
	assert_eq!(fixture.binder.create_and_bind(&neither), Err(BindError::NoApplicableStrategy { node: 3 }));

	let element = fixture.element(4, "span");
	let div = fixture.dom.create_element("div", None);
	assert!(matches!(fixture.binder.bind(&element, div), Err(BindError::TagMismatch { node: 4, .. })));
}

#[test]
fn children_follow_splices() {
	let fixture = Fixture::new();
	let root = fixture.root();
	let div = fixture.element(2, "div");
	fixture.append(&div, &fixture.text(3, "hi"));
	fixture.append(&root, &div);
	fixture.append(&root, &fixture.element(4, "span"));
	fixture.bind_root();
	assert_eq!(fixture.html(), "<body><div>hi</div><span></span></body>");

	root.list(features::ELEMENT_CHILDREN).add(1, fixture.element(5, "p"));
	fixture.tree.node(3).unwrap().map(features::TEXT_NODE).property(properties::TEXT).set_value("hello");
	assert_eq!(fixture.html(), "<body><div>hi</div><span></span></body>");
	reactive::flush();
	assert_eq!(fixture.html(), "<body><div>hello</div><p></p><span></span></body>");
}

#[test]
fn clearing_removes_foreign_nodes_but_removing_does_not() {
	let fixture = Fixture::new();
	let root = fixture.root();
	fixture.append(&root, &fixture.element(2, "div"));
	fixture.append(&root, &fixture.element(3, "span"));
	fixture.bind_root();

	let foreign = fixture.dom.create_text("foreign");
	fixture.dom.append_child(fixture.body, foreign);

	root.list(features::ELEMENT_CHILDREN).remove(0);
	reactive::flush();
	assert_eq!(fixture.html(), "<body><span></span>foreign</body>");

	root.list(features::ELEMENT_CHILDREN).clear();
	reactive::flush();
	assert_eq!(fixture.html(), "<body></body>");
}

#[test]
fn attributes_style_and_classes() {
	let dom = MemoryDom::new();
	dom.drop_important_for("background");
	let fixture = Fixture::with_dom(dom, BinderConfig::default());

	let div = fixture.element(2, "div");
	div.map(features::ELEMENT_ATTRIBUTES).property("title").set_value("t");
	div.map(features::ELEMENT_STYLE_PROPERTIES).property("color").set_value("red !important");
	div.map(features::ELEMENT_STYLE_PROPERTIES).property("background").set_value("blue !important");
	div.list(features::CLASS_LIST).push("a");
	div.list(features::CLASS_LIST).push("b");
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let element = div.dom_node().unwrap();
	assert_eq!(
		fixture.html(),
		"<body><div title=\"t\" class=\"a b\" style=\"color: red; background: blue\"></div></body>"
	);
	assert_eq!(fixture.dom.style_priority(element, "color"), "important");
	assert_eq!(fixture.dom.style_priority(element, "background"), "");

	div.list(features::CLASS_LIST).remove(0);
	assert_eq!(fixture.dom.classes(element), vec!["b".to_owned()]);

	div.map(features::ELEMENT_ATTRIBUTES).property("title").set_value(json!(null));
	div.map(features::ELEMENT_ATTRIBUTES).property("tabindex").set_value(json!(3));
	reactive::flush();
	assert_eq!(fixture.dom.attribute(element, "title"), None);
	assert_eq!(fixture.dom.attribute(element, "tabindex").as_deref(), Some("3"));
}

#[test]
fn uri_attributes_resolve_in_web_component_mode() {
	let fixture = Fixture::with_config(BinderConfig {
		web_component_mode: true,
		service_url: "http://host/app/".to_owned(),
		..BinderConfig::default()
	});
	let img = fixture.element(2, "img");
	img.map(features::ELEMENT_ATTRIBUTES).property("src").set_value(json!({ "uri": "img/logo.png" }));
	fixture.append(&fixture.root(), &img);
	fixture.bind_root();

	assert_eq!(
		fixture.dom.attribute(img.dom_node().unwrap(), "src").as_deref(),
		Some("http://host/app/img/logo.png")
	);
}

#[test]
fn user_edits_are_not_overwritten_by_their_own_echo() {
	let dom = MemoryDom::new();
	dom.set_prototype_property("input", "value", json!(""));
	let fixture = Fixture::with_dom(dom, BinderConfig::default());

	let input = fixture.element(2, "input");
	input.map(features::ELEMENT_PROPERTIES).property("value").set_value("server");
	fixture.listen(&input, "change", json!({ "}value": false }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("server")));

	fixture.dom.set_property(element, "value", Some(json!("typed")));
	fixture.dom.dispatch(element, "change");
	assert_eq!(
		fixture.queue.drain(),
		vec![
			ServerMessage::PropertySync {
				node: 2,
				feature: features::ELEMENT_PROPERTIES,
				property: "value".to_owned(),
				value: json!("typed"),
			},
			ServerMessage::Event {
				node: 2,
				event: "change".to_owned(),
				data: Some(json!({})),
			},
		]
	);

	reactive::flush();
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("typed")));
	assert_eq!(input.map(features::ELEMENT_PROPERTIES).property("value").previous_dom_value(), None);

	input.map(features::ELEMENT_PROPERTIES).property("value").set_value("C");
	reactive::flush();
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("C")));

	input.map(features::ELEMENT_PROPERTIES).property("value").remove_value();
	reactive::flush();
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("")));
}

#[test]
fn buffered_edits_survive_server_updates_during_the_round_trip() {
	let fixture = Fixture::new();
	let input = fixture.element(2, "input");
	let value = input.map(features::ELEMENT_PROPERTIES).property("value");
	value.set_value("server");
	fixture.listen(&input, "change", json!({ "}value": false, "": [[100, "trailing"]] }));
	fixture.append(&fixture.root(), &input);
	fixture.bind_root();

	let element = input.dom_node().unwrap();
	fixture.dom.set_property(element, "value", Some(json!("typed")));
	fixture.dom.dispatch(element, "change");
	assert!(fixture.queue.is_empty());
	assert_eq!(value.previous_dom_value(), Some(Some(json!("typed"))));

	// The server re-sends its stale value while the edit is still buffered.
	value.remove_value();
	value.set_value("server");
	reactive::flush();
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("typed")));
	assert_eq!(value.previous_dom_value(), None);

	timer::advance(100);
	reactive::flush();
	assert_eq!(
		fixture.queue.drain(),
		vec![
			ServerMessage::PropertySync {
				node: 2,
				feature: features::ELEMENT_PROPERTIES,
				property: "value".to_owned(),
				value: json!("typed"),
			},
			ServerMessage::Event {
				node: 2,
				event: "change".to_owned(),
				data: Some(json!({ "for": "trailing" })),
			},
		]
	);
	assert_eq!(fixture.dom.property(element, "value"), Some(json!("typed")));
}

#[test]
fn invisible_elements_bind_partially_until_shown() {
	let fixture = Fixture::new();
	let div = fixture.element(2, "div");
	div.map(features::ELEMENT_DATA).property(properties::VISIBLE).set_value(json!(false));
	fixture.listen(&div, "click", json!({}));
	fixture.append(&div, &fixture.text(3, "content"));
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let element = div.dom_node().unwrap();
	assert_eq!(fixture.binder.element_binding_state(&div), Some(false));
	assert_eq!(fixture.dom.attribute(element, "hidden").as_deref(), Some("true"));
	assert_eq!(fixture.dom.listener_count_for(element, "click"), 0);
	assert_eq!(fixture.html(), "<body><div hidden=\"true\"></div></body>");

	div.map(features::ELEMENT_DATA).property(properties::VISIBLE).set_value(json!(true));
	reactive::flush();
	assert_eq!(fixture.binder.element_binding_state(&div), Some(true));
	assert_eq!(fixture.dom.attribute(element, "hidden"), None);
	assert_eq!(fixture.dom.listener_count_for(element, "click"), 1);
	assert_eq!(fixture.html(), "<body><div>content</div></body>");

	div.map(features::ELEMENT_DATA).property(properties::VISIBLE).set_value(json!(false));
	reactive::flush();
	div.map(features::ELEMENT_DATA).property(properties::VISIBLE).set_value(json!(true));
	reactive::flush();
	assert_eq!(fixture.binder.element_binding_state(&div), Some(true));
	assert_eq!(fixture.dom.listener_count_for(element, "click"), 1);
	assert_eq!(fixture.html(), "<body><div>content</div></body>");
}

#[test]
fn showing_restores_the_initial_hidden_attribute() {
	let fixture = Fixture::new();
	fixture.dom.set_attribute(fixture.body, "hidden", "until-found");
	let root = fixture.root();
	let visible = root.map(features::ELEMENT_DATA).property(properties::VISIBLE);
	visible.set_value(json!(false));
	fixture.append(&root, &fixture.element(2, "div"));
	fixture.bind_root();
	assert_eq!(fixture.dom.attribute(fixture.body, "hidden").as_deref(), Some("true"));
	assert_eq!(fixture.html(), "<body hidden=\"true\"></body>");

	visible.set_value(json!(true));
	reactive::flush();
	assert_eq!(fixture.dom.attribute(fixture.body, "hidden").as_deref(), Some("until-found"));
	assert_eq!(fixture.html(), "<body hidden=\"until-found\"><div></div></body>");

	visible.set_value(json!(false));
	assert_eq!(fixture.dom.attribute(fixture.body, "hidden").as_deref(), Some("true"));
	visible.set_value(json!(true));
	assert_eq!(fixture.dom.attribute(fixture.body, "hidden").as_deref(), Some("until-found"));
}

#[test]
fn hiding_inside_a_shadow_root_overrides_display() {
	let fixture = Fixture::new();
	let host = fixture.element(2, "div");
	let shadow = fixture.tree.create_node(5);
	let span = fixture.element(6, "span");
	span.map(features::ELEMENT_STYLE_PROPERTIES).property("display").set_value("flex");
	fixture.append(&shadow, &span);
	host.map(features::SHADOW_ROOT_DATA).property(properties::SHADOW_ROOT).set_value(shadow);
	fixture.append(&fixture.root(), &host);
	fixture.bind_root();

	let element = span.dom_node().unwrap();
	assert!(fixture.dom.is_in_shadow_scope(element));
	assert_eq!(fixture.dom.style_property(element, "display"), "flex");

	let visible = span.map(features::ELEMENT_DATA).property(properties::VISIBLE);
	visible.set_value(json!(false));
	reactive::flush();
	assert_eq!(fixture.dom.attribute(element, "hidden").as_deref(), Some("true"));
	assert_eq!(fixture.dom.style_property(element, "display"), "none");

	visible.set_value(json!(true));
	reactive::flush();
	assert_eq!(fixture.dom.attribute(element, "hidden"), None);
	assert_eq!(fixture.dom.style_property(element, "display"), "flex");

	// Outside of shadow roots, the hidden attribute is enough.
	let div = fixture.element(7, "div");
	div.map(features::ELEMENT_STYLE_PROPERTIES).property("display").set_value("grid");
	fixture.append(&fixture.root(), &div);
	reactive::flush();
	div.map(features::ELEMENT_DATA).property(properties::VISIBLE).set_value(json!(false));
	reactive::flush();
	let element = div.dom_node().unwrap();
	assert_eq!(fixture.dom.attribute(element, "hidden").as_deref(), Some("true"));
	assert_eq!(fixture.dom.style_property(element, "display"), "grid");
}

#[test]
fn namespaces_are_explicit_or_inherited() {
	let fixture = Fixture::new();
	let svg = fixture.element(2, "svg");
	svg.map(features::ELEMENT_DATA).property(properties::NAMESPACE).set_value(SVG_NAMESPACE);
	let circle = fixture.element(3, "circle");
	fixture.append(&svg, &circle);
	let div = fixture.element(4, "div");
	fixture.append(&fixture.root(), &svg);
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let namespace = |node: &statetree_dom::tree::StateNode| fixture.dom.namespace_uri(node.dom_node().unwrap());
	assert_eq!(namespace(&svg).as_deref(), Some(SVG_NAMESPACE));
	assert_eq!(namespace(&circle).as_deref(), Some(SVG_NAMESPACE));
	assert_eq!(namespace(&div).as_deref(), Some(HTML_NAMESPACE));
	assert_eq!(fixture.dom.tag_name(circle.dom_node().unwrap()).as_deref(), Some("circle"));

	// Added later, the child still picks up its parent's namespace.
	let rect = fixture.element(5, "rect");
	fixture.append(&svg, &rect);
	reactive::flush();
	assert_eq!(namespace(&rect).as_deref(), Some(SVG_NAMESPACE));
}

#[test]
fn unregistering_tears_the_binding_down() {
	let fixture = Fixture::new();
	let div = fixture.element(2, "div");
	fixture.listen(&div, "click", json!({}));
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let element = div.dom_node().unwrap();
	assert_eq!(fixture.dom.listener_count(element), 1);
	fixture.tree.unregister_node(&div);
	assert_eq!(fixture.dom.listener_count(element), 0);
	assert_eq!(fixture.binder.element_binding_state(&div), None);

	fixture.dom.dispatch(element, "click");
	assert!(fixture.queue.is_empty());
	assert!(fixture.dom.is_released(element));
	assert!(!fixture.dom.is_released(fixture.body));
}

#[test]
fn updates_keep_flowing_after_the_initial_render() {
	let fixture = Fixture::new();
	let div = fixture.element(2, "div");
	let title = div.map(features::ELEMENT_ATTRIBUTES).property("title");
	title.set_value("one");
	fixture.append(&fixture.root(), &div);
	fixture.bind_root();

	let element = div.dom_node().unwrap();
	assert_eq!(fixture.dom.attribute(element, "title").as_deref(), Some("one"));
	title.set_value("two");
	reactive::flush();
	assert_eq!(fixture.dom.attribute(element, "title").as_deref(), Some("two"));

	div.map(features::ELEMENT_ATTRIBUTES).property("lang").set_value("en");
	div.list(features::CLASS_LIST).push("late");
	reactive::flush();
	assert_eq!(fixture.dom.attribute(element, "lang").as_deref(), Some("en"));
	assert_eq!(fixture.dom.classes(element), vec!["late".to_owned()]);
}

#[test]
fn unregistered_text_nodes_are_released() {
	let fixture = Fixture::new();
	let text = fixture.text(2, "gone soon");
	fixture.append(&fixture.root(), &text);
	fixture.bind_root();

	let dom = text.dom_node().unwrap();
	fixture.tree.unregister_node(&text);
	assert!(fixture.dom.is_released(dom));
	text.map(features::TEXT_NODE).property(properties::TEXT).set_value("changed");
	reactive::flush();
	assert_eq!(fixture.dom.text(dom).as_deref(), Some("gone soon"));
}

#[test]
fn shadow_root_children_are_bound() {
	let fixture = Fixture::new();
	let host = fixture.element(2, "div");
	let shadow = fixture.tree.create_node(5);
	fixture.append(&shadow, &fixture.element(6, "span"));
	host.map(features::SHADOW_ROOT_DATA).property(properties::SHADOW_ROOT).set_value(shadow.clone());
	fixture.append(&fixture.root(), &host);
	fixture.bind_root();

	let shadow_root = fixture.dom.shadow_root(host.dom_node().unwrap()).unwrap();
	assert_eq!(shadow.dom_node(), Some(shadow_root));
	assert_eq!(fixture.dom.outer_html(shadow_root), "<span></span>");
	assert_eq!(fixture.html(), "<body><div></div></body>");
}
