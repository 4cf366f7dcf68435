use core::cell::RefCell;
use std::rc::{Rc, Weak};

/// Removes a previously registered listener when [`remove`](`EventRemover::remove`)d.
///
/// Dropping an [`EventRemover`] does **not** remove the listener.
#[must_use = "Dropping an `EventRemover` leaves the listener registered."]
pub struct EventRemover(Option<Box<dyn FnOnce()>>);
impl EventRemover {
	pub fn new(remove: impl FnOnce() + 'static) -> Self {
		Self(Some(Box::new(remove)))
	}

	/// An [`EventRemover`] that does nothing.
	pub fn noop() -> Self {
		Self(None)
	}

	pub fn remove(mut self) {
		if let Some(remove) = self.0.take() {
			remove()
		}
	}

	/// Keeps the listener registered for good.
	pub fn forget(self) {}
}
impl core::fmt::Debug for EventRemover {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_tuple("EventRemover").field(&self.0.is_some()).finish()
	}
}

type Slot<E> = (u64, Rc<dyn Fn(&E)>);

struct Slots<E> {
	next_id: u64,
	slots: Vec<Slot<E>>,
}

/// An ordered listener list that tolerates registration and removal during dispatch.
pub(crate) struct Listeners<E>(Rc<RefCell<Slots<E>>>);
impl<E: 'static> Listeners<E> {
	pub fn new() -> Self {
		Self(Rc::new(RefCell::new(Slots { next_id: 0, slots: Vec::new() })))
	}

	pub fn add(&self, listener: impl Fn(&E) + 'static) -> EventRemover {
		let id = {
			let mut slots = self.0.borrow_mut();
			let id = slots.next_id;
			slots.next_id += 1;
			slots.slots.push((id, Rc::new(listener)));
			id
		};
		let slots: Weak<RefCell<Slots<E>>> = Rc::downgrade(&self.0);
		EventRemover::new(move || {
			if let Some(slots) = slots.upgrade() {
				slots.borrow_mut().slots.retain(|(slot_id, _)| *slot_id != id);
			}
		})
	}

	pub fn fire(&self, event: &E) {
		let snapshot: Vec<_> = self.0.borrow().slots.iter().map(|(_, listener)| Rc::clone(listener)).collect();
		for listener in snapshot {
			listener(event)
		}
	}

	pub fn len(&self) -> usize {
		self.0.borrow().slots.len()
	}

	pub fn clear(&self) {
		self.0.borrow_mut().slots.clear()
	}
}
