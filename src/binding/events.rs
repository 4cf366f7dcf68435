//! DOM event listeners declared by the server, and what to send when they fire.
//!
//! The listener map ([`ELEMENT_LISTENERS`](`features::ELEMENT_LISTENERS`)) maps each event type to a constant pool key.
//! The constant is a JSON object whose keys are event data expressions and whose values say how each is used:
//!
//! * `false`: plain event data,
//! * `true`: a filter, the event is only sent if at least one filter is truthy,
//! * `[[timeout, phase...], ...]`: a filter whose matches are debounced.
//!
//! Expression keys starting with `}` name a DOM property to synchronize before sending.
//! `]` maps the event target, and `]expression` the element the expression yields, to the closest state node id.

use super::element::BindingContext;
use crate::{
	debounce::{DebouncePhase, PhaseSet, SendCommand},
	dom::{DomEvent, DomId, EventHandler},
	expression::{evaluate_all, ExprValue, ExpressionScope},
	reactive,
	tree::{features, MapProperty, NodeId, StateTree, SyncCommand, TreeValue, NO_NODE},
};
use serde_json::{Map, Value};
use std::rc::Rc;
use tracing::{debug, trace, trace_span, warn};

const SYNCHRONIZE_PROPERTY_TOKEN: &str = "}";
const MAP_STATE_NODE_EVENT_DATA: &str = "]";
const DEBOUNCE_PHASE_KEY: &str = "for";

pub(super) fn bind_dom_event_listeners(context: &Rc<BindingContext>) {
	let listeners = context.node.map(features::ELEMENT_LISTENERS);
	listeners.for_each_property(|property| bind_event_handler_property(context, property));
	let weak = Rc::downgrade(context);
	context.push_remover(listeners.add_property_add_listener(move |property| {
		if let Some(context) = weak.upgrade() {
			bind_event_handler_property(&context, property)
		}
	}));
}

/// Keeps one DOM listener registered for as long as the event type has a value in the listener map.
fn bind_event_handler_property(context: &Rc<BindingContext>, property: &MapProperty) {
	if !context.mark_property_bound(features::ELEMENT_LISTENERS, property.name()) {
		return;
	}
	let weak = Rc::downgrade(context);
	let property = property.clone();
	context.push_computation(reactive::run_when_dependencies_change(move || {
		let has_value = property.has_value();
		let context = match weak.upgrade() {
			Some(context) => context,
			None => return,
		};
		let event_type = property.name();
		let host = context.host();
		match (has_value, context.dom_listener(event_type)) {
			(true, None) => {
				let weak = Rc::downgrade(&context);
				let handler: EventHandler = Rc::new(move |event| {
					if let Some(context) = weak.upgrade() {
						handle_dom_event(&context, event)
					}
				});
				let listener = host.add_event_listener(context.element, event_type, handler);
				context.set_dom_listener(event_type, Some(listener));
				trace!(event_type, "Added DOM event listener.");
			}
			(false, Some(listener)) => {
				host.remove_event_listener(context.element, listener);
				context.set_dom_listener(event_type, None);
				trace!(event_type, "Removed DOM event listener.");
			}
			_ => (),
		}
	}));
}

fn handle_dom_event(context: &BindingContext, event: &DomEvent) {
	let span = trace_span!("handle_dom_event", node = context.node.id(), event_type = event.event_type.as_str());
	let _enter = span.enter();

	let node = &context.node;
	let element = context.element;
	let host = context.host();
	let tree = match node.tree() {
		Some(tree) if !node.is_unregistered() => tree,
		_ => return debug!("Ignoring event of a detached node."),
	};

	let key = reactive::untracked(|| node.map(features::ELEMENT_LISTENERS).property(&event.event_type).value());
	let key = match key.as_ref().and_then(TreeValue::as_str) {
		Some(key) => key.to_owned(),
		None => return debug!("No listener settings for this event type."),
	};
	let settings = match context.registry.constant_pool().get(&key) {
		Some(Value::Object(settings)) => settings,
		_ => return warn!(key = key.as_str(), "Listener settings constant is missing or not an object."),
	};

	let scope = ExpressionScope {
		event: Some(event),
		element: Some(element),
		host: &**host,
	};
	let evaluator = context.registry.evaluator();

	let mut event_data = if settings.is_empty() { None } else { Some(Map::new()) };
	let mut synchronized = Vec::new();
	let mut plain = Vec::new();
	for expression in settings.keys() {
		if let Some(name) = expression.strip_prefix(SYNCHRONIZE_PROPERTY_TOKEN) {
			synchronized.push(name);
		} else if expression == MAP_STATE_NODE_EVENT_DATA {
			let id = closest_state_node_id(&tree, &scope, event.target);
			event_data.get_or_insert_with(Map::new).insert(expression.clone(), id.into());
		} else if let Some(mapped) = expression.strip_prefix(MAP_STATE_NODE_EVENT_DATA) {
			let target = match evaluator.evaluate(mapped, &scope) {
				Ok(ExprValue::Node(target)) => Some(target),
				Ok(_) => None,
				Err(error) => {
					debug!(expression = mapped, %error, "Element expression failed.");
					None
				}
			};
			let id = closest_state_node_id(&tree, &scope, target);
			event_data.get_or_insert_with(Map::new).insert(expression.clone(), id.into());
		} else if !expression.is_empty() {
			plain.push(expression.clone());
		}
	}
	if let Some(event_data) = &mut event_data {
		event_data.extend(evaluate_all(&**evaluator, &plain, &scope));
	}

	let sync_commands: Vec<SyncCommand> = synchronized
		.into_iter()
		.map(|name| {
			let dom_value = host.property(element, name);
			let property = node.map(features::ELEMENT_PROPERTIES).property(name);
			property.set_previous_dom_value(dom_value.clone());
			property.sync_to_server_command(dom_value.unwrap_or(Value::Null))
		})
		.collect();

	let send = {
		let node = node.clone();
		let event_type = event.event_type.clone();
		let event_data = event_data.clone();
		SendCommand::new(move |phase: Option<DebouncePhase>| {
			let tree = match node.tree() {
				Some(tree) => tree,
				None => return,
			};
			let mut event_data = event_data.clone();
			if let Some(phase) = phase {
				event_data.get_or_insert_with(Map::new).insert(DEBOUNCE_PHASE_KEY.to_owned(), phase.as_str().into());
			}
			tree.send_event_to_server(&node, &event_type, event_data.map(Value::Object))
		})
	};

	if resolve_filters(context, &event.event_type, &settings, event_data.as_ref(), &send, &sync_commands) {
		// Buffered events of this element must not arrive after this one.
		let executed = context.registry.debouncers().flush_all_for(element);
		if executed.iter().any(|command| command.ptr_eq(&send)) {
			return;
		}
		for sync_command in &sync_commands {
			sync_command.run()
		}
		send.run(None)
	} else {
		trace!("Event filtered out or buffered.");
	}
}

/// Whether to send right away: if there are no filters or at least one matched eagerly.
fn resolve_filters(
	context: &BindingContext,
	event_type: &str,
	settings: &Map<String, Value>,
	event_data: Option<&Map<String, Value>>,
	send: &SendCommand,
	sync_commands: &[SyncCommand],
) -> bool {
	let mut no_filters = true;
	let mut matched = false;
	for (expression, setting) in settings {
		let debounces = setting.as_array();
		if debounces.is_none() && !setting.as_bool().unwrap_or(false) {
			continue;
		}
		no_filters = false;

		let mut filter_matched = expression.is_empty()
			|| event_data
				.and_then(|data| data.get(expression))
				.map_or(false, |value| ExprValue::Json(value.clone()).is_truthy());
		if let (Some(debounces), true) = (debounces, filter_matched) {
			let identifier = format!("on-{}:{}", event_type, expression);
			filter_matched = resolve_debounces(context, &identifier, debounces, send, sync_commands);
		}
		matched |= filter_matched;
	}
	no_filters || matched
}

/// Feeds the event into each configured debouncer, returning whether any of them wants it sent right away.
fn resolve_debounces(context: &BindingContext, identifier: &str, debounces: &[Value], send: &SendCommand, sync_commands: &[SyncCommand]) -> bool {
	let mut eager = false;
	for settings in debounces {
		let settings = match settings.as_array() {
			Some(settings) => settings,
			None => {
				warn!(identifier, "Malformed debounce settings.");
				continue;
			}
		};
		let timeout = settings
			.first()
			.and_then(Value::as_u64)
			.and_then(|timeout| u32::try_from(timeout).ok())
			.unwrap_or(0);
		if timeout == 0 {
			eager = true;
			continue;
		}
		let phases: PhaseSet = settings
			.iter()
			.skip(1)
			.filter_map(Value::as_str)
			.filter_map(DebouncePhase::parse)
			.collect();
		let debouncer = context.registry.debouncers().get_or_create(context.element, identifier, timeout);
		eager |= debouncer.trigger(phases, send.clone(), sync_commands.to_vec());
	}
	eager
}

/// Walks up from `dom` to the first DOM node bound to a state node.
fn closest_state_node_id(tree: &StateTree, scope: &ExpressionScope<'_>, dom: Option<DomId>) -> NodeId {
	let mut current = dom;
	while let Some(dom) = current {
		if let Some(node) = tree.node_for_dom(dom) {
			return node.id();
		}
		current = scope.host.parent(dom);
	}
	debug!(?dom, "No state node found for the element.");
	NO_NODE
}
