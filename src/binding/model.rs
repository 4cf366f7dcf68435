//! The bridge to templating elements with their own data model.
//!
//! Tree properties are pushed into the element's model by path (`a.b.c`), model lists are spliced in place,
//! and model changes the element makes itself are synchronized back to the server.

use super::element::BindingContext;
use crate::{
	dom::ModelObserver,
	reactive, timer,
	tree::{features, properties, StateNode, SyncCommand, TreeValue},
};
use core::cell::RefCell;
use hashbrown::HashSet;
use serde_json::{Map, Value};
use std::rc::Rc;
use tracing::{debug, trace, trace_span};

/// Node data restricting which model paths the element may synchronize back to the server.
///
/// Without it, any path that exists in the tree is accepted.
#[derive(Debug, Default, Clone)]
pub struct UpdatableModelProperties(pub HashSet<String>);
impl UpdatableModelProperties {
	#[must_use]
	pub fn contains(&self, path: &str) -> bool {
		self.0.contains(path)
	}
}

/// Node data buffering model synchronizations that arrive before the bind's first flush completed.
#[derive(Default)]
pub struct InitialPropertyUpdate {
	commands: RefCell<Vec<SyncCommand>>,
}
impl InitialPropertyUpdate {
	fn push(&self, command: SyncCommand) {
		self.commands.borrow_mut().push(command)
	}

	#[must_use]
	pub fn pending_count(&self) -> usize {
		self.commands.borrow().len()
	}
}
impl core::fmt::Debug for InitialPropertyUpdate {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("InitialPropertyUpdate").field("pending", &self.pending_count()).finish()
	}
}

/// Buffers model synchronizations of `node` until right after the next flush.
pub(super) fn schedule_initial_execution(node: &StateNode) {
	let update = Rc::new(InitialPropertyUpdate::default());
	node.set_node_data(Rc::clone(&update));
	let node = node.clone();
	reactive::add_post_flush_listener(move || {
		timer::queue_microtask(move || {
			if node.node_data::<InitialPropertyUpdate>().map_or(false, |current| Rc::ptr_eq(&current, &update)) {
				node.clear_node_data::<InitialPropertyUpdate>();
			}
			let commands = update.commands.take();
			if commands.is_empty() {
				return;
			}
			trace!(node = node.id(), count = commands.len(), "Replaying buffered model changes.");
			for command in commands {
				command.run()
			}
			reactive::flush()
		})
	});
}

pub(super) fn bind_model_properties(context: &Rc<BindingContext>) {
	let host = context.host();
	if host.supports_model(context.element) {
		return bind_model(context);
	}
	// Custom elements only get their model once upgraded.
	if host.local_name(context.element).map_or(false, |name| name.contains('-')) {
		let weak = Rc::downgrade(context);
		host.when_ready(
			context.element,
			Box::new(move || {
				if let Some(context) = weak.upgrade() {
					if !context.is_torn_down() && context.host().supports_model(context.element) {
						bind_model(&context);
						reactive::flush()
					}
				}
			}),
		)
	}
}

fn bind_model(context: &Rc<BindingContext>) {
	trace!(element = ?context.element, "Binding model properties.");
	let binder = context.binder.clone();
	let element = context.element;
	let observer: ModelObserver = Rc::new(move |changes| {
		if let Some(binder) = binder.binder() {
			binder.handle_model_properties_changed(element, changes)
		}
	});
	context.host().observe_model(element, observer);
	bind_model_properties_at(context, &context.node, "");
}

fn bind_model_properties_at(context: &Rc<BindingContext>, node: &StateNode, path: &str) {
	let weak = Rc::downgrade(context);
	let node = node.clone();
	let path = path.to_owned();
	context.push_computation(reactive::run_when_dependencies_change(move || {
		if let Some(context) = weak.upgrade() {
			node.map(features::ELEMENT_PROPERTIES)
				.for_each_property(|property| set_sub_property(&context, property.name(), property.value(), &path))
		}
	}));
}

fn set_sub_property(context: &Rc<BindingContext>, name: &str, value: Option<TreeValue>, path: &str) {
	let host = context.host();
	let element = context.element;
	let path = if path.is_empty() { name.to_owned() } else { format!("{}.{}", path, name) };
	match value {
		Some(TreeValue::Node(list)) if list.has_feature(features::TEMPLATE_MODELLIST) => {
			host.set_model_value(element, &path, reactive::untracked(|| convert_to_json(&list)));
			if context.mark_model_binding(&path, list.id()) {
				bind_model_list(context, &list, path)
			}
		}
		Some(TreeValue::Node(object)) => {
			if context.mark_model_binding(&path, object.id()) {
				host.set_model_value(element, &path, Value::Object(Map::new()));
				bind_model_properties_at(context, &object, &path)
			}
		}
		Some(TreeValue::Json(value)) => host.set_model_value(element, &path, value),
		None => host.set_model_value(element, &path, Value::Null),
	}
}

fn bind_model_list(context: &Rc<BindingContext>, list: &StateNode, path: String) {
	let weak = Rc::downgrade(context);
	context.push_remover(list.list(features::TEMPLATE_MODELLIST).add_splice_listener(move |event| {
		let weak = weak.clone();
		let path = path.clone();
		let event = event.clone();
		reactive::add_flush_listener(move || {
			if let Some(context) = weak.upgrade() {
				let added = event.added.iter().map(to_json).collect();
				context
					.host()
					.splice_model_list(context.element, &path, event.index, event.removed.len(), added)
			}
		})
	}));
}

fn to_json(value: &TreeValue) -> Value {
	match value {
		TreeValue::Json(value) => value.clone(),
		TreeValue::Node(node) => convert_to_json(node),
	}
}

/// The JSON form of a structured tree value: an array for model lists, the plain value for basic type values,
/// and otherwise an object of the node's properties plus its `nodeId`.
pub(super) fn convert_to_json(node: &StateNode) -> Value {
	if node.has_feature(features::TEMPLATE_MODELLIST) {
		return Value::Array(node.list(features::TEMPLATE_MODELLIST).items().iter().map(to_json).collect());
	}
	if node.has_feature(features::BASIC_TYPE_VALUE) {
		return node
			.map(features::BASIC_TYPE_VALUE)
			.property(properties::VALUE)
			.value()
			.as_ref()
			.map_or(Value::Null, to_json);
	}
	let mut object = Map::new();
	if node.has_feature(features::ELEMENT_PROPERTIES) {
		node.map(features::ELEMENT_PROPERTIES).for_each_property(|property| {
			let value = property.value().as_ref().map_or(Value::Null, to_json);
			object.insert(property.name().to_owned(), value);
		});
	}
	object.insert("nodeId".to_owned(), node.id().into());
	Value::Object(object)
}

pub(super) fn handle_properties_changed(node: &StateNode, changes: &[(String, Value)]) {
	let span = trace_span!("handle_model_properties_changed", node = node.id());
	let _enter = span.enter();
	for (path, value) in changes {
		handle_property_change(node, path, value.clone())
	}
}

fn handle_property_change(node: &StateNode, path: &str, value: Value) {
	if let Some(updatable) = node.node_data::<UpdatableModelProperties>() {
		if !updatable.contains(path) {
			return debug!(path, "Ignoring change of a model property that isn't updatable from the client.");
		}
	}

	let mut model = node.clone();
	let mut property = None;
	for segment in path.split('.') {
		let known = model.has_feature(features::ELEMENT_PROPERTIES)
			&& reactive::untracked(|| model.map(features::ELEMENT_PROPERTIES).has_property_value(segment));
		if !known {
			return debug!(path, "Ignoring change of a model property the tree doesn't have.");
		}
		let current = model.map(features::ELEMENT_PROPERTIES).property(segment);
		if let Some(TreeValue::Node(child)) = current.peek() {
			model = child;
		}
		property = Some(current);
	}
	let property = match property {
		Some(property) => property,
		None => return,
	};
	if let Some(TreeValue::Node(_)) = property.peek() {
		return debug!(path, "Ignoring change of a structured model property.");
	}

	let command = property.sync_to_server_command(value);
	match node.node_data::<InitialPropertyUpdate>() {
		Some(initial) => {
			trace!(path, "Buffering model change until the initial update.");
			initial.push(command)
		}
		None => command.run(),
	}
}
