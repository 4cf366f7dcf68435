//! Coalescing of repeated events into leading, intermediate and trailing sends.
//!
//! There's one [`Debouncer`] per (element, identifier, timeout), created on first [`trigger`](`Debouncer::trigger`)
//! and removed from its [`Debouncers`] registry again as soon as neither of its timers is running.

use crate::{dom::DomId, timer::Timer, tree::SyncCommand};
use core::cell::RefCell;
use hashbrown::HashMap;
use std::rc::{Rc, Weak};
use tracing::{trace, trace_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DebouncePhase {
	/// Sent on the first event of a burst.
	Leading,
	/// Sent periodically while events keep arriving.
	Intermediate,
	/// Sent once events stopped for the whole timeout.
	Trailing,
}
impl DebouncePhase {
	#[must_use]
	pub fn as_str(self) -> &'static str {
		match self {
			DebouncePhase::Leading => "leading",
			DebouncePhase::Intermediate => "intermediate",
			DebouncePhase::Trailing => "trailing",
		}
	}

	#[must_use]
	pub fn parse(phase: &str) -> Option<Self> {
		match phase {
			"leading" => Some(DebouncePhase::Leading),
			"intermediate" => Some(DebouncePhase::Intermediate),
			"trailing" => Some(DebouncePhase::Trailing),
			_ => None,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseSet {
	pub leading: bool,
	pub intermediate: bool,
	pub trailing: bool,
}
impl PhaseSet {
	#[must_use]
	pub fn contains(self, phase: DebouncePhase) -> bool {
		match phase {
			DebouncePhase::Leading => self.leading,
			DebouncePhase::Intermediate => self.intermediate,
			DebouncePhase::Trailing => self.trailing,
		}
	}

	pub fn insert(&mut self, phase: DebouncePhase) {
		match phase {
			DebouncePhase::Leading => self.leading = true,
			DebouncePhase::Intermediate => self.intermediate = true,
			DebouncePhase::Trailing => self.trailing = true,
		}
	}

	#[must_use]
	pub fn is_empty(self) -> bool {
		!(self.leading || self.intermediate || self.trailing)
	}
}
impl FromIterator<DebouncePhase> for PhaseSet {
	fn from_iter<T: IntoIterator<Item = DebouncePhase>>(iter: T) -> Self {
		let mut set = Self::default();
		for phase in iter {
			set.insert(phase)
		}
		set
	}
}

/// Sends an event, annotated with the phase it's sent for ([`None`] when sent right away).
#[derive(Clone)]
pub struct SendCommand(Rc<dyn Fn(Option<DebouncePhase>)>);
impl SendCommand {
	pub fn new(send: impl Fn(Option<DebouncePhase>) + 'static) -> Self {
		Self(Rc::new(send))
	}

	pub fn run(&self, phase: Option<DebouncePhase>) {
		(self.0)(phase)
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl core::fmt::Debug for SendCommand {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_tuple("SendCommand").field(&Rc::as_ptr(&self.0).cast::<()>()).finish()
	}
}

/// A buffered send with the property synchronizations to run right before it.
#[derive(Debug, Clone)]
struct Action {
	command: SendCommand,
	sync_commands: Vec<SyncCommand>,
}
impl Action {
	fn run(&self, phase: DebouncePhase) {
		for sync_command in &self.sync_commands {
			sync_command.run()
		}
		self.command.run(Some(phase))
	}

	/// Buffers `next` on top of `self`. The newest synchronization per property wins.
	fn merge(self, next: Action) -> Action {
		let mut sync_commands = self.sync_commands;
		for sync_command in next.sync_commands {
			sync_commands.retain(|existing| !existing.property().ptr_eq(sync_command.property()));
			sync_commands.push(sync_command);
		}
		Action {
			command: next.command,
			sync_commands,
		}
	}
}

type Key = (DomId, String, u32);
type Registry = RefCell<HashMap<Key, Debouncer>>;

#[derive(Default)]
struct DebouncerState {
	phases: PhaseSet,
	idle_timer: Option<Timer>,
	intermediate_timer: Option<Timer>,
	pending: Option<Action>,
	potential_trailing: Option<Action>,
}

struct DebouncerInner {
	key: Key,
	registry: Weak<Registry>,
	state: RefCell<DebouncerState>,
}

/// The debounce state machine of one (element, identifier, timeout) triple.
#[derive(Clone)]
pub struct Debouncer(Rc<DebouncerInner>);
impl Debouncer {
	#[must_use]
	pub fn element(&self) -> DomId {
		self.0.key.0
	}

	#[must_use]
	pub fn identifier(&self) -> &str {
		&self.0.key.1
	}

	#[must_use]
	pub fn timeout(&self) -> u32 {
		self.0.key.2
	}

	/// Whether any timer is running.
	#[must_use]
	pub fn is_active(&self) -> bool {
		let state = self.0.state.borrow();
		state.idle_timer.as_ref().map_or(false, Timer::is_running) || state.intermediate_timer.as_ref().map_or(false, Timer::is_running)
	}

	/// Feeds one event into the state machine.
	///
	/// Returns `true` iff the caller should send the event right away as leading event,
	/// which happens only if [`DebouncePhase::Leading`] is requested and no burst is in progress.
	/// The [`SyncCommand`]s then are the caller's to run, too.
	pub fn trigger(&self, phases: PhaseSet, command: SendCommand, sync_commands: Vec<SyncCommand>) -> bool {
		let span = trace_span!("Debouncer::trigger", identifier = self.identifier(), timeout = self.timeout(), ?phases);
		let _enter = span.enter();

		let mut state = self.0.state.borrow_mut();
		state.phases = phases;

		let idle = !state.idle_timer.as_ref().map_or(false, Timer::is_running) && !state.intermediate_timer.as_ref().map_or(false, Timer::is_running);
		let fire_leading = phases.leading && idle;
		if fire_leading && !phases.trailing && !phases.intermediate {
			trace!("Leading only, firing right away.");
			return true;
		}

		if !fire_leading && (phases.trailing || phases.intermediate) {
			let action = Action { command, sync_commands };
			state.pending = Some(match state.pending.take() {
				Some(previous) => previous.merge(action),
				None => action,
			});
			state.potential_trailing = None;
		}

		let timeout = u64::from(self.timeout());
		if phases.leading || phases.trailing {
			let idle_timer = state.idle_timer.get_or_insert_with(|| {
				let this = Rc::downgrade(&self.0);
				Timer::new(move || {
					if let Some(this) = this.upgrade() {
						Debouncer(this).idle_timeout()
					}
				})
			});
			idle_timer.schedule(timeout);
		}

		if phases.intermediate {
			let this = Rc::downgrade(&self.0);
			let intermediate_timer = state.intermediate_timer.get_or_insert_with(|| {
				Timer::new(move || {
					if let Some(this) = this.upgrade() {
						Debouncer(this).intermediate_tick()
					}
				})
			});
			if !intermediate_timer.is_running() {
				intermediate_timer.schedule_repeating(timeout);
			}
		}

		fire_leading
	}

	fn idle_timeout(&self) {
		let (action, quirk) = {
			let mut state = self.0.state.borrow_mut();
			let trailing = state.phases.trailing;
			match state.pending.take().filter(|_| trailing) {
				Some(action) => (Some(action), false),
				None => (state.potential_trailing.take(), true),
			}
		};
		if let Some(action) = action {
			if quirk {
				trace!(identifier = self.identifier(), "Re-sending the last intermediate action as trailing.");
			}
			action.run(DebouncePhase::Trailing);
		}
		self.unregister();
	}

	fn intermediate_tick(&self) {
		let action = {
			let mut state = self.0.state.borrow_mut();
			let action = state.pending.take();
			if state.phases.trailing {
				state.potential_trailing = action.clone();
			}
			action
		};
		match action {
			Some(action) => action.run(DebouncePhase::Intermediate),
			None => self.unregister(),
		}
	}

	/// Runs the buffered action (if any) ahead of schedule, see [`Debouncers::flush_all`].
	fn flush(&self) -> Option<SendCommand> {
		let (action, phase) = {
			let mut state = self.0.state.borrow_mut();
			let action = state.pending.take()?;
			state.potential_trailing = None;
			if state.idle_timer.as_ref().map_or(false, Timer::is_running) {
				(action, DebouncePhase::Trailing)
			} else {
				if let Some(intermediate_timer) = &state.intermediate_timer {
					intermediate_timer.schedule_repeating(u64::from(self.timeout()));
				}
				(action, DebouncePhase::Intermediate)
			}
		};
		action.run(phase);
		Some(action.command)
	}

	fn unregister(&self) {
		{
			let state = self.0.state.borrow();
			for timer in state.idle_timer.iter().chain(state.intermediate_timer.iter()) {
				timer.cancel()
			}
		}
		if let Some(registry) = self.0.registry.upgrade() {
			let mut registry = registry.borrow_mut();
			if registry.get(&self.0.key).map_or(false, |registered| Rc::ptr_eq(&registered.0, &self.0)) {
				registry.remove(&self.0.key);
				trace!(identifier = self.identifier(), "Unregistered debouncer.");
			}
		}
	}
}
impl core::fmt::Debug for Debouncer {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Debouncer")
			.field("element", &self.0.key.0)
			.field("identifier", &self.0.key.1)
			.field("timeout", &self.0.key.2)
			.field("active", &self.is_active())
			.finish()
	}
}

/// The registry of live [`Debouncer`]s.
#[derive(Clone, Default)]
pub struct Debouncers(Rc<Registry>);
impl Debouncers {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn get_or_create(&self, element: DomId, identifier: &str, timeout: u32) -> Debouncer {
		let key = (element, identifier.to_owned(), timeout);
		if let Some(existing) = self.0.borrow().get(&key) {
			return existing.clone();
		}
		let debouncer = Debouncer(Rc::new(DebouncerInner {
			key: key.clone(),
			registry: Rc::downgrade(&self.0),
			state: RefCell::default(),
		}));
		self.0.borrow_mut().insert(key, debouncer.clone());
		debouncer
	}

	#[must_use]
	pub fn get(&self, element: DomId, identifier: &str, timeout: u32) -> Option<Debouncer> {
		self.0.borrow().get(&(element, identifier.to_owned(), timeout)).cloned()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.0.borrow().len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.0.borrow().is_empty()
	}

	/// Runs every buffered action right away and returns the commands that ran.
	///
	/// Debouncers with a running idle timer send their action as trailing event,
	/// the others as intermediate event (restarting their cadence).
	pub fn flush_all(&self) -> Vec<SendCommand> {
		self.flush_where(|_| true)
	}

	/// [`flush_all`](`Debouncers::flush_all`), limited to the debouncers of `element`.
	pub fn flush_all_for(&self, element: DomId) -> Vec<SendCommand> {
		self.flush_where(|key| key.0 == element)
	}

	/// Drops all debouncers of `element` without running anything.
	pub fn remove_all_for(&self, element: DomId) {
		let removed: Vec<_> = {
			let registry = self.0.borrow();
			registry.iter().filter(|(key, _)| key.0 == element).map(|(_, debouncer)| debouncer.clone()).collect()
		};
		for debouncer in removed {
			debouncer.unregister()
		}
	}

	fn flush_where(&self, filter: impl Fn(&Key) -> bool) -> Vec<SendCommand> {
		let mut debouncers: Vec<_> = self.0.borrow().iter().filter(|(key, _)| filter(key)).map(|(_, debouncer)| debouncer.clone()).collect();
		// Deterministic order.
		debouncers.sort_by(|a, b| a.0.key.cmp(&b.0.key));
		debouncers.iter().filter_map(Debouncer::flush).collect()
	}
}
impl core::fmt::Debug for Debouncers {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Debouncers").field("len", &self.len()).finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::timer;
	use core::cell::Cell;

	fn recorder() -> (Rc<RefCell<Vec<Option<DebouncePhase>>>>, impl Fn() -> SendCommand) {
		let log = Rc::new(RefCell::new(Vec::new()));
		let factory = {
			let log = Rc::clone(&log);
			move || {
				let log = Rc::clone(&log);
				SendCommand::new(move |phase| log.borrow_mut().push(phase))
			}
		};
		(log, factory)
	}

	fn phases(phases: &[DebouncePhase]) -> PhaseSet {
		phases.iter().copied().collect()
	}

	#[test]
	fn leading_only_fires_right_away_without_timers() {
		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(1), "on-click:", 100);
		let (log, command) = recorder();
		assert!(debouncer.trigger(phases(&[DebouncePhase::Leading]), command(), Vec::new()));
		assert!(!debouncer.is_active());
		assert!(log.borrow().is_empty());
	}

	#[test]
	fn trailing_coalesces_to_the_last_command() {
		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(1), "on-input:", 100);
		let sent = Rc::new(Cell::new(0));
		let mut commands = Vec::new();
		for i in 1..=3 {
			let sent = Rc::clone(&sent);
			commands.push(SendCommand::new(move |phase| {
				assert_eq!(phase, Some(DebouncePhase::Trailing));
				sent.set(sent.get() * 10 + i);
			}));
		}
		for command in &commands {
			assert!(!debouncer.trigger(phases(&[DebouncePhase::Trailing]), command.clone(), Vec::new()));
			timer::advance(50);
		}
		assert_eq!(sent.get(), 0);
		timer::advance(50);
		assert_eq!(sent.get(), 3);
		assert!(debouncers.is_empty());
	}

	#[test]
	fn leading_and_trailing_suppress_the_burst() {
		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(2), "on-input:", 100);
		let (log, command) = recorder();
		let both = phases(&[DebouncePhase::Leading, DebouncePhase::Trailing]);

		assert!(debouncer.trigger(both, command(), Vec::new()));
		assert!(!debouncer.trigger(both, command(), Vec::new()));
		timer::advance(100);
		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Trailing)]);
		assert!(debouncers.is_empty());
	}

	#[test]
	fn intermediate_ticks_and_trailing_quirk() {
		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(3), "on-input:", 100);
		let (log, command) = recorder();
		let set = phases(&[DebouncePhase::Intermediate, DebouncePhase::Trailing]);

		assert!(!debouncer.trigger(set, command(), Vec::new()));
		timer::advance(60);
		assert!(!debouncer.trigger(set, command(), Vec::new()));
		timer::advance(40);
		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Intermediate)]);

		// Nothing arrives after the tick: the idle timeout re-sends the ticked action as trailing.
		timer::advance(60);
		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Intermediate), Some(DebouncePhase::Trailing)]);
		assert!(debouncers.is_empty());
	}

	#[test]
	fn newest_sync_wins_even_if_it_does_nothing() {
		use crate::{
			connector::MessageQueue,
			tree::{features, StateTree},
		};

		let queue = Rc::new(MessageQueue::new());
		let tree = StateTree::new(queue.clone());
		let node = tree.create_node(7);
		let value = node.map(features::ELEMENT_PROPERTIES).property("value");
		value.set_value("x");

		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(5), "on-input:", 100);
		let (log, command) = recorder();
		let trailing = phases(&[DebouncePhase::Trailing]);

		let edited = value.sync_to_server_command("a".into());
		let edited_back = value.sync_to_server_command("x".into());
		assert!(!edited.is_noop());
		assert!(edited_back.is_noop());
		assert!(!debouncer.trigger(trailing, command(), vec![edited]));
		assert!(!debouncer.trigger(trailing, command(), vec![edited_back]));
		timer::advance(100);

		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Trailing)]);
		assert_eq!(value.peek(), Some("x".into()));
		assert!(queue.is_empty());
	}

	#[test]
	fn a_burst_after_the_idle_timeout_starts_empty() {
		let debouncers = Debouncers::new();
		let (log, command) = recorder();
		let trailing = phases(&[DebouncePhase::Trailing]);

		let first = debouncers.get_or_create(DomId(6), "on-input:", 100);
		assert!(!first.trigger(trailing, command(), Vec::new()));
		timer::advance(100);
		assert!(debouncers.is_empty());

		let second = debouncers.get_or_create(DomId(6), "on-input:", 100);
		assert!(!Rc::ptr_eq(&first.0, &second.0));
		assert!(second.flush().is_none());
		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Trailing)]);
	}

	#[test]
	fn flush_all_runs_pending_trailing_once() {
		let debouncers = Debouncers::new();
		let debouncer = debouncers.get_or_create(DomId(4), "on-input:", 100);
		let (log, command) = recorder();
		let pending = command();
		assert!(!debouncer.trigger(phases(&[DebouncePhase::Trailing]), pending.clone(), Vec::new()));

		let executed = debouncers.flush_all();
		assert_eq!(executed.len(), 1);
		assert!(executed[0].ptr_eq(&pending));
		assert_eq!(*log.borrow(), vec![Some(DebouncePhase::Trailing)]);

		timer::advance(100);
		assert_eq!(log.borrow().len(), 1);
		assert!(debouncers.flush_all().is_empty());
	}
}
