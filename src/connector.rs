//! The outbound RPC seam.

use crate::tree::{FeatureId, NodeId};
use core::cell::RefCell;
use serde::Serialize;
use serde_json::Value;
use tracing::trace;

/// Receives everything the binding core sends to the server.
///
/// Implementations typically queue messages for the next round trip.
pub trait ServerConnector {
	/// A DOM event of `event_type` happened on `node`'s element.
	fn send_event(&self, node: NodeId, event_type: &str, event_data: Option<Value>);

	/// A `$server` method was called. `promise_id` is present iff the caller awaits a result.
	fn send_template_event(&self, node: NodeId, method: &str, arguments: Vec<Value>, promise_id: Option<u32>);

	/// Reports the outcome of a virtual child attach request.
	///
	/// `assigned` is `requested` on success, [`NO_NODE`](`crate::tree::NO_NODE`) if the element was not found
	/// and otherwise the id of the node that already claimed it.
	fn send_existing_element_attach(&self, parent: NodeId, requested: NodeId, assigned: NodeId, id: Option<&str>);

	/// A property value changed on the client.
	fn send_property_sync(&self, node: NodeId, feature: FeatureId, property: &str, value: Value);
}

/// A message in the shape of the server's RPC protocol.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
	#[serde(rename = "event")]
	Event {
		node: NodeId,
		event: String,
		#[serde(skip_serializing_if = "Option::is_none")]
		data: Option<Value>,
	},
	#[serde(rename = "publishedEventHandler")]
	PublishedEventHandler {
		node: NodeId,
		#[serde(rename = "templateEventMethodName")]
		method: String,
		#[serde(rename = "templateEventMethodArgs")]
		arguments: Vec<Value>,
		#[serde(rename = "promise", skip_serializing_if = "Option::is_none")]
		promise_id: Option<u32>,
	},
	#[serde(rename = "attachExistingElementById")]
	AttachExistingElement {
		node: NodeId,
		#[serde(rename = "attachReqId")]
		requested: NodeId,
		#[serde(rename = "attachAssignedId")]
		assigned: NodeId,
		#[serde(rename = "attachId", skip_serializing_if = "Option::is_none")]
		id: Option<String>,
	},
	#[serde(rename = "mSync")]
	PropertySync {
		node: NodeId,
		feature: FeatureId,
		property: String,
		value: Value,
	},
}

/// A [`ServerConnector`] that queues [`ServerMessage`]s until they are [`drain`](`MessageQueue::drain`)ed.
#[derive(Debug, Default)]
pub struct MessageQueue {
	messages: RefCell<Vec<ServerMessage>>,
}
impl MessageQueue {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Takes all queued messages.
	pub fn drain(&self) -> Vec<ServerMessage> {
		core::mem::take(&mut *self.messages.borrow_mut())
	}

	/// Takes all queued messages as JSON array in RPC shape.
	///
	/// # Errors
	///
	/// Iff a message can't be serialized, which only happens for non-string map keys in event data.
	pub fn drain_json(&self) -> serde_json::Result<Value> {
		serde_json::to_value(self.drain())
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.messages.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.messages.borrow().is_empty()
	}

	fn push(&self, message: ServerMessage) {
		trace!(?message, "Queued server message.");
		self.messages.borrow_mut().push(message)
	}
}
impl ServerConnector for MessageQueue {
	fn send_event(&self, node: NodeId, event_type: &str, event_data: Option<Value>) {
		self.push(ServerMessage::Event {
			node,
			event: event_type.to_owned(),
			data: event_data,
		})
	}

	fn send_template_event(&self, node: NodeId, method: &str, arguments: Vec<Value>, promise_id: Option<u32>) {
		self.push(ServerMessage::PublishedEventHandler {
			node,
			method: method.to_owned(),
			arguments,
			promise_id,
		})
	}

	fn send_existing_element_attach(&self, parent: NodeId, requested: NodeId, assigned: NodeId, id: Option<&str>) {
		self.push(ServerMessage::AttachExistingElement {
			node: parent,
			requested,
			assigned,
			id: id.map(ToOwned::to_owned),
		})
	}

	fn send_property_sync(&self, node: NodeId, feature: FeatureId, property: &str, value: Value) {
		self.push(ServerMessage::PropertySync {
			node,
			feature,
			property: property.to_owned(),
			value,
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn serializes_in_rpc_shape() {
		let queue = MessageQueue::new();
		queue.send_event(3, "click", None);
		queue.send_property_sync(3, 1, "value", json!("x"));
		queue.send_existing_element_attach(2, 5, -1, Some("field"));
		assert_eq!(
			queue.drain_json().unwrap(),
			json!([
				{ "type": "event", "node": 3, "event": "click" },
				{ "type": "mSync", "node": 3, "feature": 1, "property": "value", "value": "x" },
				{ "type": "attachExistingElementById", "node": 2, "attachReqId": 5, "attachAssignedId": -1, "attachId": "field" },
			])
		);
		assert!(queue.is_empty());
	}
}
