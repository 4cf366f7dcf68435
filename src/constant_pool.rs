//! Interned values shared by many nodes, referenced by short string keys.

use core::cell::RefCell;
use hashbrown::HashMap;
use serde_json::{Map, Value};
use tracing::trace;

/// Server-provided table of interned JSON values.
#[derive(Debug, Default)]
pub struct ConstantPool {
	constants: RefCell<HashMap<String, Value>>,
}
impl ConstantPool {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Imports all entries of a constant pool update. Existing keys are never overwritten.
	pub fn import_from_json(&self, update: &Map<String, Value>) {
		let mut constants = self.constants.borrow_mut();
		for (key, value) in update {
			constants.entry(key.clone()).or_insert_with(|| value.clone());
		}
		trace!(count = update.len(), "Imported constants.");
	}

	pub fn insert(&self, key: impl Into<String>, value: Value) {
		self.constants.borrow_mut().insert(key.into(), value);
	}

	#[must_use]
	pub fn has(&self, key: &str) -> bool {
		self.constants.borrow().contains_key(key)
	}

	#[must_use]
	pub fn get(&self, key: &str) -> Option<Value> {
		self.constants.borrow().get(key).cloned()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[test]
	fn imports_keep_existing_values() {
		let pool = ConstantPool::new();
		pool.insert("a", json!(1));
		let update = match json!({"a": 2, "b": ["event.type"]}) {
			Value::Object(update) => update,
			_ => unreachable!(),
		};
		pool.import_from_json(&update);
		assert_eq!(pool.get("a"), Some(json!(1)));
		assert_eq!(pool.get("b"), Some(json!(["event.type"])));
		assert!(!pool.has("c"));
	}
}
