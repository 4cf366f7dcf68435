//! Child lists and virtual children.

use super::{element::BindingContext, tag_of};
use crate::{
	dom::DomId,
	error::BindError,
	listeners::EventRemover,
	reactive,
	timer::Timer,
	tree::{features, properties, ListSpliceEvent, NodeId, StateNode, TreeValue, NO_NODE},
};
use core::cell::Cell;
use serde_json::Value;
use std::rc::Rc;
use tracing::{debug, error, trace, trace_span, warn};

/// Creates and appends the DOM nodes of `node`'s children to `parent`, then keeps them in sync.
///
/// Splices are applied during the next reactive flush.
pub(super) fn bind_children(context: &Rc<BindingContext>, node: &StateNode, parent: DomId) -> Result<EventRemover, BindError> {
	let host = context.host();
	let children = node.list(features::ELEMENT_CHILDREN);
	for child in reactive::untracked(|| children.items()) {
		if let TreeValue::Node(child) = child {
			let dom = context.binder.create_and_bind(&child)?;
			host.append_child(parent, dom);
		}
	}

	let weak = Rc::downgrade(context);
	let node = node.clone();
	Ok(children.add_splice_listener(move |event| {
		let weak = weak.clone();
		let node = node.clone();
		let event = event.clone();
		reactive::add_flush_listener(move || {
			if let Some(context) = weak.upgrade() {
				if !context.is_torn_down() {
					apply_splice(&context, &node, parent, &event)
				}
			}
		})
	}))
}

fn apply_splice(context: &BindingContext, node: &StateNode, parent: DomId, event: &ListSpliceEvent) {
	let span = trace_span!("apply_splice", node = node.id(), index = event.index, clear = event.clear);
	let _enter = span.enter();
	let host = context.host();

	if event.clear {
		// Clearing removes everything, including DOM nodes the tree doesn't know about.
		for child in host.child_nodes(parent) {
			host.remove_child(parent, child)
		}
	} else {
		for removed in &event.removed {
			let dom = match removed {
				TreeValue::Node(removed) => removed.dom_node(),
				TreeValue::Json(_) => None,
			};
			match dom {
				Some(dom) if host.parent(dom) == Some(parent) => host.remove_child(parent, dom),
				Some(_) => trace!("Removed child is no longer attached here."),
				None => warn!(?removed, "Removed child has no DOM node."),
			}
		}
	}

	if !event.added.is_empty() {
		add_children(context, node, parent, event.index, &event.added)
	}
}

fn add_children(context: &BindingContext, node: &StateNode, parent: DomId, index: usize, added: &[TreeValue]) {
	let host = context.host();
	let items = reactive::untracked(|| node.list(features::ELEMENT_CHILDREN).items());

	let mut before = if index == 0 {
		host.first_child(parent)
	} else {
		match previous_sibling(index, &items).and_then(|sibling| sibling.dom_node()) {
			Some(sibling) if host.parent(sibling) == Some(parent) => host.next_sibling(sibling),
			_ => None,
		}
	};

	for child in added {
		let child = match child {
			TreeValue::Node(child) => child,
			TreeValue::Json(_) => continue,
		};
		match context.binder.create_and_bind(child) {
			Ok(dom) => {
				host.insert_before(parent, dom, before);
				before = host.next_sibling(dom);
			}
			Err(error) => error!(%error, child = child.id(), "Binding an added child failed."),
		}
	}
}

/// The child preceding position `index` among the children that already have DOM nodes.
fn previous_sibling(index: usize, items: &[TreeValue]) -> Option<StateNode> {
	let mut count = 0;
	let mut previous = None;
	for item in items {
		if count == index {
			return previous;
		}
		if let TreeValue::Node(node) = item {
			if node.dom_node().is_some() {
				count += 1;
			}
			previous = Some(node.clone());
		}
	}
	previous
}

/// Binds the virtual children of the context node: nodes bound to existing DOM elements instead of newly created ones.
pub(super) fn bind_virtual_children(context: &Rc<BindingContext>) {
	let list = context.node.list(features::VIRTUAL_CHILDREN);
	for child in reactive::untracked(|| list.items()) {
		if let TreeValue::Node(child) = child {
			append_virtual_child(context, &child, true)
		}
	}

	let weak = Rc::downgrade(context);
	context.push_remover(list.add_splice_listener(move |event| {
		let weak = weak.clone();
		let added = event.added.clone();
		reactive::add_flush_listener(move || {
			if let Some(context) = weak.upgrade() {
				for child in added {
					if let TreeValue::Node(child) = child {
						append_virtual_child(&context, &child, true)
					}
				}
			}
		})
	}));
}

/// Where a virtual child should be found.
#[derive(Debug, Clone, PartialEq)]
enum Address {
	Id(String),
	Name(String),
	Path(Vec<usize>),
	InMemory,
}
impl Address {
	fn of(child: &StateNode) -> Option<Self> {
		let payload = reactive::untracked(|| child.map(features::ELEMENT_DATA).property(properties::PAYLOAD).value());
		let payload = match payload {
			Some(TreeValue::Json(Value::Object(payload))) => payload,
			_ => return None,
		};
		let value = payload.get(properties::VALUE);
		match payload.get(properties::TYPE).and_then(Value::as_str)? {
			properties::INJECT_BY_ID => Some(Address::Id(value?.as_str()?.to_owned())),
			properties::INJECT_BY_NAME => Some(Address::Name(value?.as_str()?.to_owned())),
			properties::TEMPLATE_IN_TEMPLATE => Some(Address::Path(
				value?.as_array()?
					.iter()
					.map(|index| index.as_u64().and_then(|index| usize::try_from(index).ok()))
					.collect::<Option<_>>()?,
			)),
			properties::IN_MEMORY_CHILD => Some(Address::InMemory),
			_ => None,
		}
	}

	/// Identifies the address for duplicate detection.
	fn key(&self) -> String {
		match self {
			Address::Id(id) => format!("id='{}'", id),
			Address::Name(name) => format!("name='{}'", name),
			Address::Path(path) => format!("path='{:?}'", path),
			Address::InMemory => "inMemory".to_owned(),
		}
	}

	/// The `id` reported with attach failures.
	fn reported_id(&self) -> Option<&str> {
		match self {
			Address::Id(id) => Some(id),
			_ => None,
		}
	}
}

fn append_virtual_child(context: &Rc<BindingContext>, child: &StateNode, first_attempt: bool) {
	let span = trace_span!("append_virtual_child", child = child.id(), first_attempt);
	let _enter = span.enter();

	let address = match Address::of(child) {
		Some(address) => address,
		None => return warn!("Virtual child has no usable payload."),
	};
	if address == Address::InMemory {
		if let Err(error) = context.binder.create_and_bind(child) {
			error!(%error, "Binding an in-memory child failed.")
		}
		return;
	}

	let tree = match context.node.tree() {
		Some(tree) => tree,
		None => return,
	};
	let parent_id = context.node.id();
	let key = address.key();

	if first_attempt {
		if let Err(existing) = context.registry.claim_existing_element(parent_id, &key, child.id()) {
			warn!(address = key.as_str(), existing, "Another virtual child already requested this element.");
			return tree.send_existing_element_attach_to_server(&context.node, child.id(), existing, address.reported_id());
		}
	}

	let host = context.host();
	let root = match host.shadow_root(context.element) {
		Some(root) => root,
		None if first_attempt => return defer_until_ready(context, child),
		None => {
			warn!(address = key.as_str(), "The element never got a template root.");
			context.registry.release_existing_element(parent_id, &key, child.id());
			return tree.send_existing_element_attach_to_server(&context.node, child.id(), NO_NODE, address.reported_id());
		}
	};

	let found = match &address {
		Address::Id(id) => host.find_by_attribute(root, "id", id),
		Address::Name(name) => host.find_by_attribute(root, "name", name),
		Address::Path(path) => path.iter().try_fold(root, |current, index| host.children(current).get(*index).copied()),
		Address::InMemory => None,
	};
	context.registry.release_existing_element(parent_id, &key, child.id());

	match verify(context, child, found) {
		Ok(found) => {
			child.set_dom_node(Some(found));
			if let Err(error) = context.binder.create_and_bind(child) {
				error!(%error, "Binding a virtual child failed.")
			}
			debug!(address = key.as_str(), ?found, "Attached virtual child.");
		}
		Err(assigned) => tree.send_existing_element_attach_to_server(&context.node, child.id(), assigned, address.reported_id()),
	}

	if !first_attempt {
		// Deferred attaches happen outside of any flush.
		reactive::flush()
	}
}

/// Checks the found element, returning the id to report back on failure.
fn verify(context: &BindingContext, child: &StateNode, found: Option<DomId>) -> Result<DomId, NodeId> {
	let found = match found {
		Some(found) => found,
		None => {
			warn!("The requested element wasn't found in the template.");
			return Err(NO_NODE);
		}
	};
	if let Some(tag) = tag_of(child) {
		let actual = context.host().tag_name(found).unwrap_or_default();
		if !actual.eq_ignore_ascii_case(&tag) {
			warn!(expected = tag.as_str(), actual = actual.as_str(), "The requested element has a different tag.");
			return Err(NO_NODE);
		}
	}
	let existing = context.node.tree().and_then(|tree| tree.node_for_dom(found));
	match existing {
		Some(existing) if existing.id() != child.id() => {
			warn!(existing = existing.id(), "The requested element is already bound to another node.");
			Err(existing.id())
		}
		_ => Ok(found),
	}
}

/// Retries once the element is upgraded, or after the configured timeout, whichever comes first.
fn defer_until_ready(context: &Rc<BindingContext>, child: &StateNode) {
	trace!("Waiting for the template root.");
	let done = Rc::new(Cell::new(false));
	let weak = Rc::downgrade(context);
	let child = child.clone();
	let retry = Rc::new(move || {
		if done.replace(true) {
			return;
		}
		if let Some(context) = weak.upgrade() {
			if !context.is_torn_down() {
				return append_virtual_child(&context, &child, false);
			}
			if let Some(address) = Address::of(&child) {
				context.registry.release_existing_element(context.node.id(), &address.key(), child.id());
			}
		}
	});

	let fallback = Timer::new({
		let retry = Rc::clone(&retry);
		move || retry()
	});
	fallback.schedule(u64::from(context.registry.config().ready_timeout_ms));
	context.host().when_ready(
		context.element,
		Box::new(move || {
			fallback.cancel();
			retry()
		}),
	);
}
