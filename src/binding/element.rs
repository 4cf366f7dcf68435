use super::{children, events, is_root, model, tag_of, Binder, BinderContext};
use crate::{
	dom::{DomHost, DomId, ListenerId, HTML_NAMESPACE},
	error::BindError,
	listeners::EventRemover,
	reactive::{self, Computation},
	registry::Registry,
	server_event::{bind_server_event_handler_names, MethodTable},
	tree::{features, properties, FeatureId, MapProperty, NodeId, StateNode, TreeValue},
};
use core::cell::RefCell;
use hashbrown::{HashMap, HashSet};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{debug, error, trace, trace_span};

const HIDDEN_ATTRIBUTE: &str = "hidden";
const DISPLAY: &str = "display";
const IMPORTANT: &str = "!important";

/// Binds element nodes (those with [`ELEMENT_DATA`](`features::ELEMENT_DATA`), and the tree root) to DOM elements.
///
/// An element whose node is invisible when bound is only bound *partially*: just enough to track its visibility.
/// The first time it becomes visible, it is rebound fully.
#[derive(Default)]
pub struct ElementBindingStrategy {
	/// Live bindings, which are owned here until teardown.
	bound: RefCell<HashMap<NodeId, Bound>>,
}

struct Bound {
	/// `true` for fully bound nodes, `false` for partially bound ones.
	full: bool,
	_context: Rc<BindingContext>,
}
impl ElementBindingStrategy {
	#[must_use]
	pub fn is_applicable(node: &StateNode) -> bool {
		node.has_feature(features::ELEMENT_DATA) || is_root(node)
	}

	pub(super) fn binding_state(&self, node: &StateNode) -> Option<bool> {
		self.bound.borrow().get(&node.id()).map(|bound| bound.full)
	}

	pub(super) fn create(&self, binder: &Binder, node: &StateNode) -> Result<DomId, BindError> {
		let tag = tag_of(node).ok_or(BindError::MissingTag { node: node.id() })?;
		let namespace = namespace_of(binder, node);
		Ok(binder.registry().host().create_element(&tag, namespace.as_deref()))
	}

	pub(super) fn bind(&self, binder: &Binder, node: &StateNode, element: DomId) -> Result<(), BindError> {
		let host = binder.registry().host();
		if let Some(expected) = tag_of(node) {
			let actual = host.tag_name(element).unwrap_or_default();
			if !actual.eq_ignore_ascii_case(&expected) {
				return Err(BindError::TagMismatch {
					node: node.id(),
					expected,
					actual,
				});
			}
		}
		if self.bound.borrow().contains_key(&node.id()) {
			trace!(node = node.id(), "Already bound.");
			return Ok(());
		}

		let span = trace_span!("ElementBindingStrategy::bind", node = node.id(), ?element);
		let _enter = span.enter();

		let visible = is_visible(node);
		let context = Rc::new(BindingContext::new(node.clone(), element, binder));
		self.bound.borrow_mut().insert(
			node.id(),
			Bound {
				full: visible,
				_context: Rc::clone(&context),
			},
		);
		remember_initial_visibility(&context);
		context.push_remover(bind_visibility(&context));
		context.push_remover(node.add_unregister_listener({
			let context = Rc::downgrade(&context);
			move |_| {
				if let Some(context) = context.upgrade() {
					remove(&context, true)
				}
			}
		}));

		if visible {
			if let Err(error) = bind_features(&context) {
				remove(&context, false);
				return Err(error);
			}
		} else {
			debug!("Binding invisible element partially.");
			update_visibility(&context, false);
		}

		model::schedule_initial_execution(node);
		Ok(())
	}
}
impl core::fmt::Debug for ElementBindingStrategy {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ElementBindingStrategy").field("bound", &self.bound.borrow().len()).finish()
	}
}

#[derive(Default)]
struct ContextState {
	torn_down: bool,
	computations: Vec<Computation>,
	bound_properties: HashSet<(FeatureId, String)>,
	model_bindings: HashSet<(String, NodeId)>,
	dom_listeners: HashMap<String, ListenerId>,
	removers: Vec<EventRemover>,
	shadow_root: Option<NodeId>,
}

/// Everything one element binding owns, released together on teardown.
pub(super) struct BindingContext {
	pub node: StateNode,
	pub element: DomId,
	pub binder: BinderContext,
	pub registry: Registry,
	state: RefCell<ContextState>,
}
impl BindingContext {
	fn new(node: StateNode, element: DomId, binder: &Binder) -> Self {
		Self {
			node,
			element,
			binder: binder.context(),
			registry: binder.registry().clone(),
			state: RefCell::default(),
		}
	}

	pub fn host(&self) -> &Rc<dyn DomHost> {
		self.registry.host()
	}

	pub fn is_torn_down(&self) -> bool {
		self.state.borrow().torn_down
	}

	/// Keeps `remover` until teardown, or removes it right away if that already happened.
	pub fn push_remover(&self, remover: EventRemover) {
		let rejected = {
			let mut state = self.state.borrow_mut();
			if state.torn_down {
				Some(remover)
			} else {
				state.removers.push(remover);
				None
			}
		};
		if let Some(remover) = rejected {
			remover.remove()
		}
	}

	pub fn push_computation(&self, computation: Computation) {
		if self.is_torn_down() {
			return computation.stop();
		}
		self.state.borrow_mut().computations.push(computation)
	}

	pub fn dom_listener(&self, event_type: &str) -> Option<ListenerId> {
		self.state.borrow().dom_listeners.get(event_type).copied()
	}

	pub fn set_dom_listener(&self, event_type: &str, listener: Option<ListenerId>) -> Option<ListenerId> {
		let mut state = self.state.borrow_mut();
		match listener {
			Some(listener) => state.dom_listeners.insert(event_type.to_owned(), listener),
			None => state.dom_listeners.remove(event_type),
		}
	}

	/// Whether the property wasn't bound yet, marking it bound.
	pub fn mark_property_bound(&self, feature: FeatureId, name: &str) -> bool {
		self.state.borrow_mut().bound_properties.insert((feature, name.to_owned()))
	}

	/// Whether the model at `path` wasn't bound to `node` yet, marking it bound.
	pub fn mark_model_binding(&self, path: &str, node: NodeId) -> bool {
		self.state.borrow_mut().model_bindings.insert((path.to_owned(), node))
	}

	fn claim_shadow_root(&self, shadow_node: NodeId) -> bool {
		let mut state = self.state.borrow_mut();
		if state.shadow_root == Some(shadow_node) {
			return false;
		}
		state.shadow_root = Some(shadow_node);
		true
	}
}

/// Releases everything `context` holds. The DOM is left as is.
fn remove(context: &BindingContext, unregistered: bool) {
	let state = {
		let mut state = context.state.borrow_mut();
		if state.torn_down {
			return;
		}
		let taken = core::mem::take(&mut *state);
		state.torn_down = true;
		taken
	};
	trace!(node = context.node.id(), unregistered, "Tearing down element binding.");

	for computation in state.computations {
		computation.stop()
	}
	let host = context.host();
	for (_, listener) in state.dom_listeners {
		host.remove_event_listener(context.element, listener)
	}
	for remover in state.removers {
		remover.remove()
	}
	context.registry.release_server_objects(context.element);
	if unregistered {
		context.registry.debouncers().remove_all_for(context.element);
		host.release(context.element);
	}
	// The caller keeps `context` alive until it returns.
	if let Some(binder) = context.binder.binder() {
		let owned = binder.0.element.bound.borrow_mut().remove(&context.node.id());
		drop(owned);
	}
}

fn bind_features(context: &Rc<BindingContext>) -> Result<(), BindError> {
	let node = &context.node;
	let element = context.element;

	context.push_remover(bind_server_event_handler_names(&context.registry, element, node, MethodTable::Server));
	context.push_remover(bind_server_event_handler_names(&context.registry, element, node, MethodTable::Element));
	events::bind_dom_event_listeners(context);
	children::bind_virtual_children(context);
	let children = children::bind_children(context, node, element)?;
	context.push_remover(children);
	bind_shadow_root(context)?;
	bind_class_list(context);
	bind_map(context, features::ELEMENT_STYLE_PROPERTIES, update_style);
	bind_map(context, features::ELEMENT_ATTRIBUTES, update_attribute);
	bind_map(context, features::ELEMENT_PROPERTIES, update_property);
	model::bind_model_properties(context);
	Ok(())
}

fn namespace_of(binder: &Binder, node: &StateNode) -> Option<String> {
	let explicit = reactive::untracked(|| {
		let data = node.map(features::ELEMENT_DATA);
		if data.has_property(properties::NAMESPACE) {
			data.property(properties::NAMESPACE).value()
		} else {
			None
		}
	});
	if let Some(namespace) = explicit.as_ref().and_then(TreeValue::as_str) {
		return Some(namespace.to_owned());
	}
	let parent = node.parent()?.dom_node()?;
	binder.registry().host().namespace_uri(parent).filter(|namespace| namespace != HTML_NAMESPACE)
}

fn is_visible(node: &StateNode) -> bool {
	if !node.has_feature(features::ELEMENT_DATA) {
		return true;
	}
	let data = node.map(features::ELEMENT_DATA);
	reactive::untracked(|| {
		!data.has_property(properties::VISIBLE)
			|| !matches!(data.property(properties::VISIBLE).value(), Some(TreeValue::Json(Value::Bool(false))))
	})
}

/// The element's own visibility styling from before it was first hidden.
struct InitialVisibility {
	hidden: Option<String>,
	display: RefCell<Option<String>>,
}

fn remember_initial_visibility(context: &BindingContext) {
	if context.node.node_data::<InitialVisibility>().is_none() {
		context.node.set_node_data(Rc::new(InitialVisibility {
			hidden: context.host().attribute(context.element, HIDDEN_ATTRIBUTE),
			display: RefCell::default(),
		}))
	}
}

fn bind_visibility(context: &Rc<BindingContext>) -> EventRemover {
	let weak = Rc::downgrade(context);
	context
		.node
		.map(features::ELEMENT_DATA)
		.property(properties::VISIBLE)
		.add_change_listener(move |_| {
			if let Some(context) = weak.upgrade() {
				visibility_changed(&context)
			}
		})
}

fn visibility_changed(context: &Rc<BindingContext>) {
	let visible = is_visible(&context.node);
	let needs_rebind = context
		.binder
		.binder()
		.map_or(false, |binder| binder.0.element.binding_state(&context.node) == Some(false));

	if visible && needs_rebind {
		debug!(node = context.node.id(), "Rebinding element that became visible.");
		remove(context, false);
		let binder = context.binder.clone();
		let node = context.node.clone();
		let element = context.element;
		reactive::add_flush_listener(move || {
			if node.is_unregistered() {
				return;
			}
			if let Err(error) = binder.bind(&node, element) {
				error!(%error, "Rebinding a visible element failed.")
			}
		});
	}
	update_visibility(context, visible)
}

fn update_visibility(context: &BindingContext, visible: bool) {
	let host = context.host();
	let element = context.element;
	let initial = context.node.node_data::<InitialVisibility>();
	if visible {
		match initial.as_ref().and_then(|initial| initial.hidden.clone()) {
			Some(hidden) => host.set_attribute(element, HIDDEN_ATTRIBUTE, &hidden),
			None => host.remove_attribute(element, HIDDEN_ATTRIBUTE),
		}
		let display = initial.and_then(|initial| initial.display.borrow_mut().take());
		match display.as_deref() {
			Some("") => host.remove_style_property(element, DISPLAY),
			Some(display) => host.set_style_property(element, DISPLAY, display, ""),
			None => (),
		}
	} else {
		host.set_attribute(element, HIDDEN_ATTRIBUTE, "true");
		// The hidden attribute alone doesn't hide elements whose shadow styles set `display`.
		if host.is_in_shadow_scope(element) {
			if let Some(initial) = initial {
				let mut display = initial.display.borrow_mut();
				if display.is_none() {
					*display = Some(host.style_property(element, DISPLAY));
				}
			}
			host.set_style_property(element, DISPLAY, "none", "");
		}
	}
}

type PropertyUpdate = fn(&BindingContext, &MapProperty);

fn bind_map(context: &Rc<BindingContext>, feature: FeatureId, update: PropertyUpdate) {
	let map = context.node.map(feature);
	map.for_each_property(|property| bind_property(context, feature, property, update));
	let weak = Rc::downgrade(context);
	context.push_remover(map.add_property_add_listener(move |property| {
		if let Some(context) = weak.upgrade() {
			bind_property(&context, feature, property, update)
		}
	}));
}

fn bind_property(context: &Rc<BindingContext>, feature: FeatureId, property: &MapProperty, update: PropertyUpdate) {
	if !context.mark_property_bound(feature, property.name()) {
		return;
	}
	let weak: Weak<BindingContext> = Rc::downgrade(context);
	let property = property.clone();
	let mut initial = true;
	context.push_computation(reactive::run_when_dependencies_change(move || {
		// A property that never had a value leaves the DOM alone.
		if core::mem::replace(&mut initial, false) && !property.has_value() {
			return;
		}
		if let Some(context) = weak.upgrade() {
			update(&context, &property)
		}
	}));
}

fn update_property(context: &BindingContext, property: &MapProperty) {
	let host = context.host();
	let element = context.element;
	let name = property.name();
	let tree_value = match property.value() {
		Some(TreeValue::Json(value)) => Some(value),
		Some(TreeValue::Node(node)) => Some(model::convert_to_json(&node)),
		None => None,
	};
	// Templating elements receive their properties through the model instead.
	if host.supports_model(element) {
		return;
	}

	match tree_value {
		Some(tree_value) => {
			let dom_value = host.property(element, name);
			let edited_meanwhile = property.previous_dom_value().map_or(false, |previous| previous == dom_value);
			if !edited_meanwhile && dom_value.as_ref() != Some(&tree_value) {
				trace!(name, "Setting property.");
				host.set_property(element, name, Some(tree_value))
			}
		}
		None if host.has_own_property(element, name) => host.delete_property(element, name),
		None => host.set_property(element, name, None),
	}
	property.clear_previous_dom_value();
}

fn update_attribute(context: &BindingContext, property: &MapProperty) {
	let host = context.host();
	let element = context.element;
	let name = property.name();
	match property.value() {
		None | Some(TreeValue::Json(Value::Null)) => host.remove_attribute(element, name),
		Some(TreeValue::Json(Value::String(value))) => host.set_attribute(element, name, &value),
		Some(TreeValue::Json(Value::Object(object))) => match object.get(properties::URI).and_then(Value::as_str) {
			Some(uri) => {
				let config = context.registry.config();
				let uri = if config.web_component_mode { config.resolve_uri(uri) } else { uri.to_owned() };
				host.set_attribute(element, name, &uri)
			}
			None => unsupported_attribute(context, name),
		},
		Some(TreeValue::Json(value)) => host.set_attribute(element, name, &value.to_string()),
		Some(TreeValue::Node(_)) => unsupported_attribute(context, name),
	}
}

fn unsupported_attribute(context: &BindingContext, name: &str) {
	let error = BindError::UnsupportedAttributeValue {
		node: context.node.id(),
		name: name.to_owned(),
	};
	error!(%error, "Skipping attribute.")
}

fn update_style(context: &BindingContext, property: &MapProperty) {
	let host = context.host();
	let element = context.element;
	let name = property.name();
	let value = match property.value() {
		Some(TreeValue::Json(Value::String(value))) => value,
		Some(TreeValue::Json(Value::Null)) | Some(TreeValue::Node(_)) | None => return host.remove_style_property(element, name),
		Some(TreeValue::Json(value)) => value.to_string(),
	};

	match value.find(IMPORTANT) {
		Some(index) => {
			let stripped = value[..index].trim_end();
			if supports_important(&**host, element, name, stripped) {
				host.set_style_property(element, name, stripped, "important")
			} else {
				debug!(name, "The host dropped the `important` priority; setting the plain value.");
				host.set_style_property(element, name, stripped, "")
			}
		}
		None => host.set_style_property(element, name, &value, ""),
	}
}

/// Probes on a scratch element whether the host keeps `!important` for `name: value`.
fn supports_important(host: &dyn DomHost, element: DomId, name: &str, value: &str) -> bool {
	let tag = host.local_name(element).unwrap_or_else(|| "div".to_owned());
	let namespace = host.namespace_uri(element);
	let scratch = host.create_element(&tag, namespace.as_deref());
	host.set_style_property(scratch, name, value, "important");
	let supported = host.style_priority(scratch, name) == "important";
	host.dispose(scratch);
	supported
}

fn bind_class_list(context: &Rc<BindingContext>) {
	let host = context.host();
	let list = context.node.list(features::CLASS_LIST);
	for class in reactive::untracked(|| list.items()) {
		if let Some(class) = class.as_str() {
			host.add_class(context.element, class)
		}
	}

	let weak = Rc::downgrade(context);
	context.push_remover(list.add_splice_listener(move |event| {
		if let Some(context) = weak.upgrade() {
			let host = context.host();
			for class in event.removed.iter().filter_map(TreeValue::as_str) {
				host.remove_class(context.element, class)
			}
			for class in event.added.iter().filter_map(TreeValue::as_str) {
				host.add_class(context.element, class)
			}
		}
	}));
}

fn bind_shadow_root(context: &Rc<BindingContext>) -> Result<(), BindError> {
	let weak = Rc::downgrade(context);
	context.push_remover(context.node.map(features::SHADOW_ROOT_DATA).add_property_add_listener(move |property| {
		if property.name() != properties::SHADOW_ROOT {
			return;
		}
		let weak = weak.clone();
		reactive::add_flush_listener(move || {
			if let Some(context) = weak.upgrade() {
				if let Err(error) = attach_shadow_root(&context) {
					error!(%error, "Binding the shadow root failed.")
				}
			}
		})
	}));
	attach_shadow_root(context)
}

fn attach_shadow_root(context: &Rc<BindingContext>) -> Result<(), BindError> {
	if context.is_torn_down() {
		return Ok(());
	}
	let data = context.node.map(features::SHADOW_ROOT_DATA);
	if !data.has_property(properties::SHADOW_ROOT) {
		return Ok(());
	}
	let shadow_node = match data.property(properties::SHADOW_ROOT).peek() {
		Some(TreeValue::Node(shadow_node)) => shadow_node,
		_ => return Ok(()),
	};
	if !context.claim_shadow_root(shadow_node.id()) {
		return Ok(());
	}

	let shadow_root = context.host().attach_shadow(context.element);
	if shadow_node.dom_node().is_none() {
		shadow_node.set_dom_node(Some(shadow_root));
	}
	debug!(?shadow_root, shadow_node = shadow_node.id(), "Attached shadow root.");
	let children = children::bind_children(context, &shadow_node, shadow_root)?;
	context.push_remover(children);
	Ok(())
}
