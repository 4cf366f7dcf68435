//! [`DomHost`] on a browser DOM, through [`web_sys`].
//!
//! Nodes are registered lazily: each DOM node that crosses the seam gets a [`DomId`], stored in a hidden property on the node itself.
//! Event listeners and server methods share one [`Closure`] each, which is bound to a per-registration key.

use crate::{
	dom::{DomEvent, DomHost, DomId, EventHandler, ListenerId, ModelObserver, NodeKind, HTML_NAMESPACE},
	reactive,
	server_event::{MethodTable, ServerMethod},
	timer,
};
use core::cell::{Cell, RefCell};
use hashbrown::HashMap;
use js_sys::{Array, Function, Object, Reflect, JSON};
use serde_json::Value;
use std::rc::{Rc, Weak};
use tracing::{debug, trace, trace_span, warn};
use wasm_bindgen::{closure::Closure, throw_str, JsCast, JsValue, UnwrapThrowExt};
use wasm_bindgen_futures::{future_to_promise, spawn_local, JsFuture};

const ID_KEY: &str = "__statetreeDomId";
const SERVER_OBJECT_KEY: &str = "$server";

/// Event properties copied into [`DomEvent::properties`] where present.
const EVENT_PROPERTIES: &[&str] = &[
	"key", "code", "button", "buttons", "clientX", "clientY", "altKey", "ctrlKey", "metaKey", "shiftKey", "detail", "deltaX", "deltaY",
];

struct Listener {
	element: DomId,
	event_type: String,
	handler: EventHandler,
	function: Function,
}

struct Method {
	target: Object,
	name: String,
	method: ServerMethod,
}

#[derive(Default)]
struct Registrations {
	nodes: HashMap<DomId, web_sys::Node>,
	listeners: HashMap<ListenerId, Listener>,
	methods: HashMap<u64, Method>,
	method_keys: HashMap<(DomId, MethodTable, String), u64>,
	model_observers: HashMap<DomId, Vec<ModelObserver>>,
}

struct WebInner {
	document: web_sys::Document,
	next_id: Cell<u32>,
	next_key: Cell<u64>,
	registrations: RefCell<Registrations>,
}
impl WebInner {
	fn register(&self, node: &web_sys::Node) -> DomId {
		if let Some(id) = Reflect::get(node, &ID_KEY.into()).ok().and_then(|id| id.as_f64()) {
			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			return DomId(id as u32);
		}
		let id = DomId(self.next_id.get());
		self.next_id.set(id.0 + 1);
		Reflect::set(node, &ID_KEY.into(), &JsValue::from(id.0)).unwrap_throw();
		self.registrations.borrow_mut().nodes.insert(id, node.clone());
		id
	}

	fn node(&self, id: DomId) -> web_sys::Node {
		self.registrations
			.borrow()
			.nodes
			.get(&id)
			.cloned()
			.expect_throw("statetree-dom: Unknown `DomId`.")
	}

	fn element(&self, id: DomId) -> Option<web_sys::Element> {
		self.node(id).dyn_into().ok()
	}

	fn style(&self, id: DomId) -> Option<web_sys::CssStyleDeclaration> {
		let node = self.node(id);
		if let Some(html) = node.dyn_ref::<web_sys::HtmlElement>() {
			Some(html.style())
		} else {
			node.dyn_ref::<web_sys::SvgElement>().map(web_sys::SvgElement::style)
		}
	}

	fn next_key(&self) -> u64 {
		let key = self.next_key.get();
		self.next_key.set(key + 1);
		key
	}
}

/// A [`DomHost`] on the DOM of `document`.
pub struct WebDom {
	inner: Rc<WebInner>,
	common_handler: Closure<dyn Fn(JsValue, web_sys::Event)>,
	common_method: Closure<dyn Fn(JsValue, Array) -> JsValue>,
	common_model_observer: Closure<dyn Fn(JsValue, JsValue)>,
}
impl WebDom {
	#[must_use]
	pub fn new(document: web_sys::Document) -> Self {
		let inner = Rc::new(WebInner {
			document,
			next_id: Cell::new(0),
			next_key: Cell::new(0),
			registrations: RefCell::default(),
		});
		Self {
			common_handler: common_handler(Rc::downgrade(&inner)),
			common_method: common_method(Rc::downgrade(&inner)),
			common_model_observer: common_model_observer(Rc::downgrade(&inner)),
			inner,
		}
	}

	/// A [`WebDom`] on the current window's document.
	#[must_use]
	pub fn from_window() -> Self {
		let document = web_sys::window()
			.and_then(|window| window.document())
			.expect_throw("statetree-dom: No document found.");
		Self::new(document)
	}

	/// The [`DomId`] of `node`, registering it if needed.
	pub fn register(&self, node: &web_sys::Node) -> DomId {
		self.inner.register(node)
	}

	/// The DOM node registered as `id`.
	///
	/// # Panics
	///
	/// Iff `id` is unknown (throws into JavaScript on Wasm).
	#[must_use]
	pub fn node(&self, id: DomId) -> web_sys::Node {
		self.inner.node(id)
	}

	/// Whether `id` still refers to a DOM node.
	#[must_use]
	pub fn is_registered(&self, id: DomId) -> bool {
		self.inner.registrations.borrow().nodes.contains_key(&id)
	}

	fn bound_function(&self, closure: &JsValue, key: u64) -> Function {
		#[allow(clippy::cast_precision_loss)]
		closure.unchecked_ref::<Function>().bind1(&JsValue::UNDEFINED, &JsValue::from_f64(key as f64))
	}
}
impl core::fmt::Debug for WebDom {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		let registrations = self.inner.registrations.borrow();
		f.debug_struct("WebDom")
			.field("nodes", &registrations.nodes.len())
			.field("listeners", &registrations.listeners.len())
			.field("methods", &registrations.methods.len())
			.finish()
	}
}

fn key_of(key: &JsValue) -> u64 {
	#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
	key.as_f64().map_or(u64::MAX, |key| key as u64)
}

fn common_handler(inner: Weak<WebInner>) -> Closure<dyn Fn(JsValue, web_sys::Event)> {
	Closure::wrap(Box::new(move |key: JsValue, event: web_sys::Event| {
		let span = trace_span!("common_handler", key = ?&key, event_type = event.type_().as_str());
		let _enter = span.enter();

		let inner = match inner.upgrade() {
			Some(inner) => inner,
			None => throw_str("statetree-dom: The `WebDom` was dropped."),
		};
		let handler = match inner.registrations.borrow().listeners.get(&ListenerId(key_of(&key))) {
			Some(listener) => Rc::clone(&listener.handler),
			None => return debug!("Listener was removed meanwhile."),
		};

		let mut dom_event = DomEvent::new(event.type_());
		if let Some(target) = event.target().and_then(|target| target.dyn_into::<web_sys::Node>().ok()) {
			dom_event.target = Some(inner.register(&target));
		}
		for name in EVENT_PROPERTIES {
			if let Some(value) = Reflect::get(&event, &(*name).into()).ok().and_then(|value| from_js(&value)) {
				dom_event.properties.insert((*name).to_owned(), value);
			}
		}
		handler(&dom_event);
		reactive::flush()
	}) as Box<dyn Fn(JsValue, web_sys::Event)>)
}

fn common_method(inner: Weak<WebInner>) -> Closure<dyn Fn(JsValue, Array) -> JsValue> {
	Closure::wrap(Box::new(move |key: JsValue, arguments: Array| {
		let inner = match inner.upgrade() {
			Some(inner) => inner,
			None => throw_str("statetree-dom: The `WebDom` was dropped."),
		};
		let method = match inner.registrations.borrow().methods.get(&key_of(&key)) {
			Some(method) => Rc::clone(&method.method),
			None => throw_str("statetree-dom: The server method was removed."),
		};
		let arguments = arguments.iter().map(|argument| from_js(&argument).unwrap_or(Value::Null)).collect();
		let result = match method(arguments) {
			Ok(Some(pending)) => future_to_promise(async move {
				match pending.await {
					Ok(Ok(value)) => Ok(to_js(&value)),
					Ok(Err(reason)) => Err(to_js(&reason)),
					Err(_) => Err(JsValue::from_str("statetree-dom: The server call was abandoned.")),
				}
			})
			.into(),
			Ok(None) => JsValue::UNDEFINED,
			Err(error) => throw_str(&error.to_string()),
		};
		reactive::flush();
		result
	}) as Box<dyn Fn(JsValue, Array) -> JsValue>)
}

fn common_model_observer(inner: Weak<WebInner>) -> Closure<dyn Fn(JsValue, JsValue)> {
	Closure::wrap(Box::new(move |key: JsValue, changed: JsValue| {
		let inner = match inner.upgrade() {
			Some(inner) => inner,
			None => return,
		};
		#[allow(clippy::cast_possible_truncation)]
		let element = DomId(key_of(&key) as u32);
		let observers = inner.registrations.borrow().model_observers.get(&element).cloned().unwrap_or_default();
		let changed = match changed.dyn_into::<Object>() {
			Ok(changed) => changed,
			Err(_) => return,
		};
		let changes: Vec<(String, Value)> = Object::entries(&changed)
			.iter()
			.filter_map(|entry| {
				let entry: Array = entry.unchecked_into();
				Some((entry.get(0).as_string()?, from_js(&entry.get(1)).unwrap_or(Value::Null)))
			})
			.collect();
		for observer in observers {
			observer(&changes)
		}
		reactive::flush()
	}) as Box<dyn Fn(JsValue, JsValue)>)
}

/// Converts JSON into a JavaScript value.
#[must_use]
pub fn to_js(value: &Value) -> JsValue {
	JSON::parse(&value.to_string()).unwrap_throw()
}

/// Converts a JavaScript value into JSON. `undefined` becomes [`None`], DOM nodes and functions become `null`.
#[must_use]
pub fn from_js(value: &JsValue) -> Option<Value> {
	if value.is_undefined() {
		return None;
	}
	if value.is_instance_of::<web_sys::Node>() || value.is_function() {
		return Some(Value::Null);
	}
	let json = JSON::stringify(value).ok().and_then(|json| json.as_string());
	Some(json.and_then(|json| serde_json::from_str(&json).ok()).unwrap_or(Value::Null))
}

impl DomHost for WebDom {
	fn create_element(&self, tag: &str, namespace: Option<&str>) -> DomId {
		let element = match namespace {
			Some(namespace) if namespace != HTML_NAMESPACE => self.inner.document.create_element_ns(Some(namespace), tag),
			_ => self.inner.document.create_element(tag),
		}
		.unwrap_throw();
		self.register(&element)
	}

	fn create_text(&self, text: &str) -> DomId {
		let text = self.inner.document.create_text_node(text);
		self.register(&text)
	}

	fn dispose(&self, node: DomId) {
		self.release(node)
	}

	fn release(&self, node: DomId) {
		let removed = {
			let mut registrations = self.inner.registrations.borrow_mut();
			registrations.model_observers.remove(&node);
			let keys: Vec<u64> = registrations
				.method_keys
				.iter()
				.filter(|((element, _, _), _)| *element == node)
				.map(|(_, key)| *key)
				.collect();
			registrations.method_keys.retain(|(element, _, _), _| *element != node);
			for key in keys {
				registrations.methods.remove(&key);
			}
			registrations.nodes.remove(&node)
		};
		// A stale id would be handed out again by `register` otherwise.
		if let Some(removed) = removed {
			if let Err(error) = Reflect::delete_property(removed.unchecked_ref::<Object>(), &ID_KEY.into()) {
				warn!(?node, ?error, "Clearing the node id failed.")
			}
		}
	}

	fn kind(&self, node: DomId) -> NodeKind {
		let node = self.node(node);
		match node.node_type() {
			web_sys::Node::ELEMENT_NODE => NodeKind::Element,
			web_sys::Node::TEXT_NODE => NodeKind::Text,
			web_sys::Node::DOCUMENT_FRAGMENT_NODE if node.is_instance_of::<web_sys::ShadowRoot>() => NodeKind::ShadowRoot,
			_ => NodeKind::Other,
		}
	}

	fn tag_name(&self, node: DomId) -> Option<String> {
		self.inner.element(node).map(|element| element.tag_name())
	}

	fn local_name(&self, node: DomId) -> Option<String> {
		self.inner.element(node).map(|element| element.local_name())
	}

	fn namespace_uri(&self, node: DomId) -> Option<String> {
		self.inner.element(node).and_then(|element| element.namespace_uri())
	}

	fn text(&self, node: DomId) -> Option<String> {
		self.node(node).dyn_ref::<web_sys::CharacterData>().map(web_sys::CharacterData::data)
	}

	fn set_text(&self, node: DomId, text: &str) {
		let node = self.node(node);
		match node.dyn_ref::<web_sys::CharacterData>() {
			Some(data) => data.set_data(text),
			None => node.set_text_content(Some(text)),
		}
	}

	fn parent(&self, node: DomId) -> Option<DomId> {
		self.node(node).parent_node().map(|parent| self.register(&parent))
	}

	fn child_nodes(&self, node: DomId) -> Vec<DomId> {
		let child_nodes = self.node(node).child_nodes();
		(0..child_nodes.length())
			.filter_map(|i| child_nodes.get(i))
			.map(|child| self.register(&child))
			.collect()
	}

	fn insert_before(&self, parent: DomId, child: DomId, before: Option<DomId>) {
		let before = before.map(|before| self.node(before));
		self.node(parent).insert_before(&self.node(child), before.as_ref()).unwrap_throw();
	}

	fn remove_child(&self, parent: DomId, child: DomId) {
		if let Err(error) = self.node(parent).remove_child(&self.node(child)) {
			warn!(?error, "Removing a child node failed.")
		}
	}

	fn first_child(&self, node: DomId) -> Option<DomId> {
		self.node(node).first_child().map(|child| self.register(&child))
	}

	fn next_sibling(&self, node: DomId) -> Option<DomId> {
		self.node(node).next_sibling().map(|sibling| self.register(&sibling))
	}

	fn property(&self, node: DomId, name: &str) -> Option<Value> {
		Reflect::get(&self.node(node), &name.into()).ok().and_then(|value| from_js(&value))
	}

	fn has_own_property(&self, node: DomId, name: &str) -> bool {
		self.node(node).unchecked_ref::<Object>().has_own_property(&name.into())
	}

	fn set_property(&self, node: DomId, name: &str, value: Option<Value>) {
		let value = value.as_ref().map_or(JsValue::UNDEFINED, to_js);
		if let Err(error) = Reflect::set(&self.node(node), &name.into(), &value) {
			warn!(name, ?error, "Setting a DOM property failed.")
		}
	}

	fn delete_property(&self, node: DomId, name: &str) {
		if let Err(error) = Reflect::delete_property(self.node(node).unchecked_ref(), &name.into()) {
			warn!(name, ?error, "Deleting a DOM property failed.")
		}
	}

	fn attribute(&self, node: DomId, name: &str) -> Option<String> {
		self.inner.element(node).and_then(|element| element.get_attribute(name))
	}

	fn set_attribute(&self, node: DomId, name: &str, value: &str) {
		if let Some(element) = self.inner.element(node) {
			if let Err(error) = element.set_attribute(name, value) {
				warn!(name, ?error, "Setting an attribute failed.")
			}
		}
	}

	fn remove_attribute(&self, node: DomId, name: &str) {
		if let Some(element) = self.inner.element(node) {
			element.remove_attribute(name).unwrap_throw()
		}
	}

	fn style_property(&self, node: DomId, name: &str) -> String {
		self.inner
			.style(node)
			.and_then(|style| style.get_property_value(name).ok())
			.unwrap_or_default()
	}

	fn style_priority(&self, node: DomId, name: &str) -> String {
		self.inner.style(node).map(|style| style.get_property_priority(name)).unwrap_or_default()
	}

	fn set_style_property(&self, node: DomId, name: &str, value: &str, priority: &str) {
		if let Some(style) = self.inner.style(node) {
			if let Err(error) = style.set_property_with_priority(name, value, priority) {
				warn!(name, ?error, "Setting a style property failed.")
			}
		}
	}

	fn remove_style_property(&self, node: DomId, name: &str) {
		if let Some(style) = self.inner.style(node) {
			style.remove_property(name).unwrap_throw();
		}
	}

	fn add_class(&self, node: DomId, class: &str) {
		if let Some(element) = self.inner.element(node) {
			element.class_list().add_1(class).unwrap_throw()
		}
	}

	fn remove_class(&self, node: DomId, class: &str) {
		if let Some(element) = self.inner.element(node) {
			element.class_list().remove_1(class).unwrap_throw()
		}
	}

	fn has_class(&self, node: DomId, class: &str) -> bool {
		self.inner.element(node).map_or(false, |element| element.class_list().contains(class))
	}

	fn add_event_listener(&self, node: DomId, event_type: &str, handler: EventHandler) -> ListenerId {
		let id = ListenerId(self.inner.next_key());
		let function = self.bound_function(self.common_handler.as_ref(), id.0);
		self.node(node)
			.add_event_listener_with_callback(event_type, &function)
			.unwrap_throw();
		trace!(?id, event_type, "Added event listener.");
		self.inner.registrations.borrow_mut().listeners.insert(
			id,
			Listener {
				element: node,
				event_type: event_type.to_owned(),
				handler,
				function,
			},
		);
		id
	}

	fn remove_event_listener(&self, node: DomId, listener: ListenerId) {
		let removed = self.inner.registrations.borrow_mut().listeners.remove(&listener);
		match removed {
			Some(removed) => {
				debug_assert_eq!(removed.element, node);
				self.node(removed.element)
					.remove_event_listener_with_callback(&removed.event_type, &removed.function)
					.unwrap_throw()
			}
			None => warn!(?listener, "Tried to remove an unknown event listener."),
		}
	}

	fn shadow_root(&self, node: DomId) -> Option<DomId> {
		let shadow_root = self.inner.element(node)?.shadow_root()?;
		Some(self.register(&shadow_root))
	}

	fn attach_shadow(&self, node: DomId) -> DomId {
		if let Some(existing) = self.shadow_root(node) {
			return existing;
		}
		let element = self.inner.element(node).expect_throw("statetree-dom: Can't attach a shadow root to a non-element.");
		let shadow_root = element
			.attach_shadow(&web_sys::ShadowRootInit::new(web_sys::ShadowRootMode::Open))
			.unwrap_throw();
		self.register(&shadow_root)
	}

	fn when_ready(&self, node: DomId, callback: Box<dyn FnOnce()>) {
		let local_name = self.local_name(node).unwrap_or_default();
		let defined = if local_name.contains('-') {
			web_sys::window()
				.and_then(|window| window.custom_elements().when_defined(&local_name).ok())
				.map(JsFuture::from)
		} else {
			None
		};
		spawn_local(async move {
			if let Some(defined) = defined {
				if let Err(error) = defined.await {
					warn!(?error, "Waiting for the custom element definition failed.");
				}
			}
			callback();
			reactive::flush()
		})
	}

	fn supports_model(&self, node: DomId) -> bool {
		let node = self.node(node);
		["set", "splice"]
			.iter()
			.all(|name| Reflect::get(&node, &(*name).into()).map_or(false, |value| value.is_function()))
	}

	fn set_model_value(&self, node: DomId, path: &str, value: Value) {
		let node = self.node(node);
		if let Ok(set) = Reflect::get(&node, &"set".into()).and_then(JsCast::dyn_into::<Function>) {
			if let Err(error) = set.call2(&node, &path.into(), &to_js(&value)) {
				warn!(path, ?error, "Setting a model value failed.")
			}
		}
	}

	fn splice_model_list(&self, node: DomId, path: &str, index: usize, remove: usize, add: Vec<Value>) {
		let node = self.node(node);
		if let Ok(splice) = Reflect::get(&node, &"splice".into()).and_then(JsCast::dyn_into::<Function>) {
			#[allow(clippy::cast_precision_loss)]
			let arguments: Array = [JsValue::from(path), JsValue::from_f64(index as f64), JsValue::from_f64(remove as f64)]
				.into_iter()
				.chain(add.iter().map(to_js))
				.collect();
			if let Err(error) = splice.apply(&node, &arguments) {
				warn!(path, ?error, "Splicing a model list failed.")
			}
		}
	}

	fn observe_model(&self, node: DomId, observer: ModelObserver) {
		let first = {
			let mut registrations = self.inner.registrations.borrow_mut();
			let observers = registrations.model_observers.entry(node).or_default();
			observers.push(observer);
			observers.len() == 1
		};
		if !first {
			return;
		}
		let hook = Function::new_with_args(
			"element, observer",
			"const original = element._propertiesChanged; \
			 element._propertiesChanged = function (current, changed, old) { \
			 	if (original) { original.call(this, current, changed, old); } \
			 	if (changed) { observer(changed); } \
			 };",
		);
		let observer = self.bound_function(self.common_model_observer.as_ref(), node.0.into());
		if let Err(error) = hook.call2(&JsValue::UNDEFINED, &self.node(node), &observer) {
			warn!(?error, "Observing the model failed.")
		}
	}

	fn define_server_method(&self, node: DomId, table: MethodTable, name: &str, method: ServerMethod) {
		self.remove_server_method(node, table, name);

		let element = self.node(node);
		let target: Object = match table {
			MethodTable::Server => match Reflect::get(&element, &SERVER_OBJECT_KEY.into()) {
				Ok(existing) if existing.is_object() => existing.unchecked_into(),
				_ => {
					let object = Object::new();
					Reflect::set(&element, &SERVER_OBJECT_KEY.into(), &object).unwrap_throw();
					object
				}
			},
			MethodTable::Element => element.unchecked_into(),
		};

		let key = self.inner.next_key();
		let bound = self.bound_function(self.common_method.as_ref(), key);
		// Collects the arguments, as the shared closure has a fixed arity.
		let variadic = Function::new_with_args("f", "return function () { return f(Array.prototype.slice.call(arguments)); };")
			.call1(&JsValue::UNDEFINED, &bound)
			.unwrap_throw();
		Reflect::set(&target, &name.into(), &variadic).unwrap_throw();

		let mut registrations = self.inner.registrations.borrow_mut();
		registrations.method_keys.insert((node, table, name.to_owned()), key);
		registrations.methods.insert(
			key,
			Method {
				target,
				name: name.to_owned(),
				method,
			},
		);
	}

	fn remove_server_method(&self, node: DomId, table: MethodTable, name: &str) {
		let removed = {
			let mut registrations = self.inner.registrations.borrow_mut();
			registrations
				.method_keys
				.remove(&(node, table, name.to_owned()))
				.and_then(|key| registrations.methods.remove(&key))
		};
		if let Some(removed) = removed {
			if let Err(error) = Reflect::delete_property(&removed.target, &removed.name.as_str().into()) {
				warn!(name, ?error, "Removing a server method failed.")
			}
		}
	}
}

/// Drives [`timer`] from `setTimeout` for as long as it's alive.
pub struct TimerPump {
	_callback: Closure<dyn Fn()>,
}
impl TimerPump {
	/// Installs the pump as [`timer`] wakeup hook.
	///
	/// The virtual clock follows `performance.now()` from here on.
	#[must_use]
	pub fn install() -> Self {
		let window = web_sys::window().expect_throw("statetree-dom: No window found.");
		let performance = window.performance().expect_throw("statetree-dom: No performance API found.");
		#[allow(clippy::cast_precision_loss)]
		let origin = performance.now() - timer::now() as f64;

		let callback = Closure::wrap(Box::new(move || {
			#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
			let target = (performance.now() - origin).max(0.0) as u64;
			timer::advance_to(target);
			reactive::flush()
		}) as Box<dyn Fn()>);

		let pending = Cell::new(None::<i32>);
		let function: Function = callback.as_ref().unchecked_ref::<Function>().clone();
		timer::set_wakeup_hook(move |delay| {
			if let Some(handle) = pending.take() {
				window.clear_timeout_with_handle(handle)
			}
			let delay = i32::try_from(delay).unwrap_or(i32::MAX);
			match window.set_timeout_with_callback_and_timeout_and_arguments_0(&function, delay) {
				Ok(handle) => pending.set(Some(handle)),
				Err(error) => warn!(?error, "Scheduling the timer pump failed."),
			}
		});
		Self { _callback: callback }
	}
}
impl Drop for TimerPump {
	fn drop(&mut self) {
		timer::clear_wakeup_hook();
		trace!("Uninstalled timer pump.");
	}
}
impl core::fmt::Debug for TimerPump {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("TimerPump").finish_non_exhaustive()
	}
}
