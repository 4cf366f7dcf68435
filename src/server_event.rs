//! Server-callable method tables (`element.$server`).
//!
//! Each bound element gets at most one [`ServerEventObject`] per [`MethodTable`], whose methods mirror a list feature of the element's state node.
//! Calling a method sends a template event to the server and, for promise-returning methods, hands out a [`PendingCall`]
//! that's settled by [`ServerEventObject::complete`] once the server answers.

use crate::{
	dom::{DomEvent, DomId},
	error::CallError,
	expression::{evaluate_all, ExpressionScope},
	listeners::EventRemover,
	reactive,
	registry::{Registry, WeakRegistry},
	tree::{features, FeatureId, StateNode, TreeValue},
};
use core::cell::{Cell, RefCell};
use futures::channel::oneshot;
use hashbrown::HashMap;
use serde_json::{Map, Value};
use std::rc::{Rc, Weak};
use tracing::{debug, trace, trace_span, warn};

/// Which method namespace of an element a [`ServerEventObject`] populates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodTable {
	/// `element.$server`, driven by [`features::CLIENT_DELEGATE_HANDLERS`]. Methods return promises.
	Server,
	/// Methods on the element itself, driven by [`features::POLYMER_SERVER_EVENT_HANDLERS`] (legacy template event handlers).
	Element,
}
impl MethodTable {
	#[must_use]
	pub fn feature(self) -> FeatureId {
		match self {
			MethodTable::Server => features::CLIENT_DELEGATE_HANDLERS,
			MethodTable::Element => features::POLYMER_SERVER_EVENT_HANDLERS,
		}
	}

	#[must_use]
	pub fn returns_promise(self) -> bool {
		matches!(self, MethodTable::Server)
	}
}

/// The eventual outcome of a promise-returning server method: the return value or the rejection reason.
pub type PendingCall = oneshot::Receiver<Result<Value, Value>>;

/// A host-exposable handle to one method of a [`ServerEventObject`].
pub type ServerMethod = Rc<dyn Fn(Vec<Value>) -> Result<Option<PendingCall>, CallError>>;

struct ObjectInner {
	element: DomId,
	table: MethodTable,
	node: StateNode,
	registry: WeakRegistry,
	methods: RefCell<HashMap<String, bool>>,
	next_promise_id: Cell<u32>,
	promises: RefCell<HashMap<u32, oneshot::Sender<Result<Value, Value>>>>,
}

/// The callable method namespace of one element.
#[derive(Clone)]
pub struct ServerEventObject(Rc<ObjectInner>);
impl ServerEventObject {
	/// The object of `element` for `table`, created on first access.
	pub fn get(registry: &Registry, element: DomId, node: &StateNode, table: MethodTable) -> Self {
		if let Some(existing) = registry.server_object(element, table) {
			return existing;
		}
		let object = Self(Rc::new(ObjectInner {
			element,
			table,
			node: node.clone(),
			registry: registry.downgrade(),
			methods: RefCell::default(),
			next_promise_id: Cell::new(0),
			promises: RefCell::default(),
		}));
		registry.insert_server_object(element, table, object.clone());
		object
	}

	#[must_use]
	pub fn element(&self) -> DomId {
		self.0.element
	}

	#[must_use]
	pub fn table(&self) -> MethodTable {
		self.0.table
	}

	#[must_use]
	pub fn has_method(&self, name: &str) -> bool {
		self.0.methods.borrow().contains_key(name)
	}

	#[must_use]
	pub fn method_names(&self) -> Vec<String> {
		let mut names: Vec<_> = self.0.methods.borrow().keys().cloned().collect();
		names.sort();
		names
	}

	/// Number of calls still waiting for [`complete`](`ServerEventObject::complete`).
	#[must_use]
	pub fn pending_count(&self) -> usize {
		self.0.promises.borrow().len()
	}

	/// Installs (or replaces) method `name`.
	pub fn define_method(&self, name: &str, returns_promise: bool) {
		trace!(name, table = ?self.0.table, "Defining server method.");
		self.0.methods.borrow_mut().insert(name.to_owned(), returns_promise);
		if let Some(registry) = self.0.registry.upgrade() {
			let this: Weak<ObjectInner> = Rc::downgrade(&self.0);
			let method_name = name.to_owned();
			let method: ServerMethod = Rc::new(move |arguments| match this.upgrade() {
				Some(this) => ServerEventObject(this).call(&method_name, arguments),
				None => Err(CallError::Detached),
			});
			registry.host().define_server_method(self.0.element, self.0.table, name, method);
		}
	}

	pub fn remove_method(&self, name: &str) {
		if self.0.methods.borrow_mut().remove(name).is_none() {
			return;
		}
		trace!(name, table = ?self.0.table, "Removing server method.");
		if let Some(registry) = self.0.registry.upgrade() {
			registry.host().remove_server_method(self.0.element, self.0.table, name);
		}
	}

	/// Sends a call of `name` to the server.
	///
	/// If the server declared event data expressions for `name`, they're evaluated against the first argument (as event)
	/// and replace `arguments`.
	///
	/// # Errors
	///
	/// Iff `name` is not a method of this object or the element's state node is gone.
	pub fn call(&self, name: &str, arguments: Vec<Value>) -> Result<Option<PendingCall>, CallError> {
		let span = trace_span!("ServerEventObject::call", name);
		let _enter = span.enter();

		let returns_promise = match self.0.methods.borrow().get(name) {
			Some(returns_promise) => *returns_promise,
			None => return Err(CallError::UnknownMethod(name.to_owned())),
		};
		let node = &self.0.node;
		let tree = match node.tree() {
			Some(tree) if !node.is_unregistered() => tree,
			_ => return Err(CallError::Detached),
		};

		let arguments = match self.event_data(name, arguments.first()) {
			Some(event_data) => event_data,
			None => arguments,
		};

		let promise = if returns_promise {
			let id = self.0.next_promise_id.get();
			self.0.next_promise_id.set(id.wrapping_add(1));
			let (sender, receiver) = oneshot::channel();
			self.0.promises.borrow_mut().insert(id, sender);
			Some((id, receiver))
		} else {
			None
		};

		let (promise_id, receiver) = match promise {
			Some((id, receiver)) => (Some(id), Some(receiver)),
			None => (None, None),
		};
		tree.send_template_event_to_server(node, name, arguments, promise_id);
		Ok(receiver)
	}

	/// Settles the call `promise_id` with the server's response.
	///
	/// Unknown ids are ignored: they belong to calls issued before the element was recreated.
	pub fn complete(&self, promise_id: u32, result: Result<Value, Value>) {
		let sender = self.0.promises.borrow_mut().remove(&promise_id);
		match sender {
			Some(sender) => {
				if sender.send(result).is_err() {
					trace!(promise_id, "Server call result was no longer awaited.");
				}
			}
			None => debug!(promise_id, "Ignoring completion of an unknown server call."),
		}
	}

	fn event_data(&self, name: &str, event: Option<&Value>) -> Option<Vec<Value>> {
		let registry = self.0.registry.upgrade()?;
		let listeners = self.0.node.map(features::POLYMER_EVENT_LISTENERS);
		let key = reactive::untracked(|| listeners.has_property(name).then(|| listeners.property(name).value()).flatten())?;
		let key = match key {
			TreeValue::Json(Value::String(key)) => key,
			_ => return None,
		};
		let expressions = match registry.constant_pool().get(&key) {
			Some(Value::Array(expressions)) => expressions.into_iter().filter_map(|e| e.as_str().map(ToOwned::to_owned)).collect::<Vec<_>>(),
			_ => {
				warn!(name, key = key.as_str(), "Event data constant is missing or not an array.");
				return None;
			}
		};

		let event = event.map(|event| {
			let properties = match event {
				Value::Object(properties) => properties.clone(),
				_ => Map::new(),
			};
			DomEvent {
				event_type: properties.get("type").and_then(Value::as_str).unwrap_or_default().to_owned(),
				target: None,
				properties,
			}
		});
		let host = registry.host();
		let scope = ExpressionScope {
			event: event.as_ref(),
			element: Some(self.0.element),
			host: &**host,
		};
		let data = evaluate_all(&**registry.evaluator(), &expressions, &scope);
		Some(expressions.iter().map(|expression| data.get(expression).cloned().unwrap_or(Value::Null)).collect())
	}
}
impl core::fmt::Debug for ServerEventObject {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("ServerEventObject")
			.field("element", &self.0.element)
			.field("table", &self.0.table)
			.field("methods", &self.method_names())
			.finish()
	}
}

/// Keeps the methods of `element`'s [`ServerEventObject`] for `table` in sync with the corresponding list feature of `node`.
pub fn bind_server_event_handler_names(registry: &Registry, element: DomId, node: &StateNode, table: MethodTable) -> EventRemover {
	let object = ServerEventObject::get(registry, element, node, table);
	let list = node.list(table.feature());
	let returns_promise = table.returns_promise();

	for item in reactive::untracked(|| list.items()) {
		if let Some(name) = item.as_str() {
			object.define_method(name, returns_promise)
		}
	}

	list.add_splice_listener(move |event| {
		for removed in &event.removed {
			if let Some(name) = removed.as_str() {
				object.remove_method(name)
			}
		}
		for added in &event.added {
			if let Some(name) = added.as_str() {
				object.define_method(name, returns_promise)
			}
		}
	})
}
