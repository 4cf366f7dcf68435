//! Cancellable timers and a microtask queue on a host-driven clock.
//!
//! Nothing here waits on its own: the host moves the clock forward with [`advance`] or [`advance_to`]
//! (the browser host does so from `setTimeout` through [`set_wakeup_hook`]), which runs every due timer in deadline order.

use core::cell::{Cell, RefCell};
use std::{
	collections::{BTreeMap, VecDeque},
	rc::Rc,
};
use tracing::{trace, trace_span};

type Microtask = Box<dyn FnOnce()>;

#[derive(Default)]
struct TimerQueue {
	now: u64,
	next_sequence: u64,
	scheduled: BTreeMap<(u64, u64), Rc<TimerInner>>,
	microtasks: VecDeque<Microtask>,
	wakeup_hook: Option<Rc<dyn Fn(u64)>>,
}

thread_local! {
	static TIMERS: RefCell<TimerQueue> = RefCell::default();
}

/// The current virtual time in milliseconds.
#[must_use]
pub fn now() -> u64 {
	TIMERS.with(|timers| timers.borrow().now)
}

/// Moves the clock forward by `ms` milliseconds, running all timers that become due.
pub fn advance(ms: u64) {
	advance_to(now().saturating_add(ms))
}

/// Moves the clock to `target` (if it's in the future), running all timers due at or before it in deadline order.
///
/// Pending microtasks run before the first timer and after each timer callback.
pub fn advance_to(target: u64) {
	let span = trace_span!("advance_to", target);
	let _enter = span.enter();

	run_microtasks();
	loop {
		let due = TIMERS.with(|timers| {
			let mut timers = timers.borrow_mut();
			let key = *timers.scheduled.keys().next().filter(|(deadline, _)| *deadline <= target)?;
			let timer = timers.scheduled.remove(&key)?;
			timers.now = timers.now.max(key.0);
			Some(timer)
		});
		let timer = match due {
			Some(timer) => timer,
			None => break,
		};
		timer.key.set(None);
		if let Some(period) = timer.period.get() {
			Timer(Rc::clone(&timer)).arm(period);
		}
		timer.fire();
		run_microtasks();
	}
	TIMERS.with(|timers| {
		let mut timers = timers.borrow_mut();
		timers.now = timers.now.max(target);
	});
	wake();
}

/// The deadline of the earliest scheduled timer, if any.
#[must_use]
pub fn next_deadline() -> Option<u64> {
	TIMERS.with(|timers| timers.borrow().scheduled.keys().next().map(|(deadline, _)| *deadline))
}

/// Queues `task` to run at the next [`run_microtasks`], which also happens whenever the clock advances.
pub fn queue_microtask(task: impl FnOnce() + 'static) {
	TIMERS.with(|timers| timers.borrow_mut().microtasks.push_back(Box::new(task)));
	wake();
}

/// Runs queued microtasks, including ones queued meanwhile, until the queue is empty.
pub fn run_microtasks() {
	while let Some(task) = TIMERS.with(|timers| timers.borrow_mut().microtasks.pop_front()) {
		task()
	}
}

/// Sets a callback that's notified of the earliest deadline whenever the timer queue changes.
///
/// The hook receives the delay in milliseconds from [`now`], `0` if microtasks are pending.
pub fn set_wakeup_hook(hook: impl Fn(u64) + 'static) {
	TIMERS.with(|timers| timers.borrow_mut().wakeup_hook = Some(Rc::new(hook)));
	wake();
}

pub fn clear_wakeup_hook() {
	TIMERS.with(|timers| timers.borrow_mut().wakeup_hook = None)
}

fn wake() {
	let wakeup = TIMERS.with(|timers| {
		let timers = timers.borrow();
		let hook = timers.wakeup_hook.clone()?;
		let delay = if timers.microtasks.is_empty() {
			timers.scheduled.keys().next()?.0.saturating_sub(timers.now)
		} else {
			0
		};
		Some((hook, delay))
	});
	if let Some((hook, delay)) = wakeup {
		hook(delay)
	}
}

struct TimerInner {
	callback: RefCell<Option<Box<dyn FnMut()>>>,
	key: Cell<Option<(u64, u64)>>,
	period: Cell<Option<u64>>,
}
impl TimerInner {
	fn fire(&self) {
		let mut callback = match self.callback.borrow_mut().take() {
			Some(callback) => callback,
			None => return,
		};
		callback();
		let mut slot = self.callback.borrow_mut();
		if slot.is_none() {
			*slot = Some(callback);
		}
	}
}

/// A cancellable one-shot or repeating timer.
///
/// Scheduled timers are kept alive by the queue, so dropping the handle does not cancel them.
#[derive(Clone)]
pub struct Timer(Rc<TimerInner>);
impl Timer {
	pub fn new(callback: impl FnMut() + 'static) -> Self {
		Self(Rc::new(TimerInner {
			callback: RefCell::new(Some(Box::new(callback))),
			key: Cell::new(None),
			period: Cell::new(None),
		}))
	}

	/// Runs the callback once after `delay_ms`. Rescheduling a running timer restarts its countdown.
	pub fn schedule(&self, delay_ms: u64) {
		self.cancel();
		self.arm(delay_ms);
	}

	/// Runs the callback every `period_ms` (at least `1`) until cancelled.
	pub fn schedule_repeating(&self, period_ms: u64) {
		self.cancel();
		let period_ms = period_ms.max(1);
		self.0.period.set(Some(period_ms));
		self.arm(period_ms);
	}

	pub fn cancel(&self) {
		self.0.period.set(None);
		if let Some(key) = self.0.key.take() {
			TIMERS.with(|timers| timers.borrow_mut().scheduled.remove(&key));
			trace!("Cancelled timer.");
		}
	}

	#[must_use]
	pub fn is_running(&self) -> bool {
		self.0.key.get().is_some()
	}

	#[must_use]
	pub fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}

	fn arm(&self, delay_ms: u64) {
		TIMERS.with(|timers| {
			let mut timers = timers.borrow_mut();
			let key = (timers.now.saturating_add(delay_ms), timers.next_sequence);
			timers.next_sequence += 1;
			timers.scheduled.insert(key, Rc::clone(&self.0));
			self.0.key.set(Some(key));
		});
		wake();
	}
}
impl core::fmt::Debug for Timer {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Timer")
			.field("deadline", &self.0.key.get().map(|(deadline, _)| deadline))
			.field("period", &self.0.period.get())
			.finish()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rescheduling_resets_the_countdown() {
		let fired = Rc::new(Cell::new(0));
		let timer = Timer::new({
			let fired = Rc::clone(&fired);
			move || fired.set(fired.get() + 1)
		});
		timer.schedule(100);
		advance(60);
		timer.schedule(100);
		advance(60);
		assert_eq!(fired.get(), 0);
		assert!(timer.is_running());
		advance(40);
		assert_eq!(fired.get(), 1);
		assert!(!timer.is_running());
	}

	#[test]
	fn repeating_timers_tick_until_cancelled() {
		let fired = Rc::new(Cell::new(0));
		let timer = Timer::new({
			let fired = Rc::clone(&fired);
			move || fired.set(fired.get() + 1)
		});
		timer.schedule_repeating(10);
		advance(35);
		assert_eq!(fired.get(), 3);
		timer.cancel();
		advance(100);
		assert_eq!(fired.get(), 3);
	}

	#[test]
	fn timers_cancelling_themselves_stop_repeating() {
		let fired = Rc::new(Cell::new(0));
		let slot: Rc<RefCell<Option<Timer>>> = Rc::default();
		let timer = Timer::new({
			let fired = Rc::clone(&fired);
			let slot = Rc::clone(&slot);
			move || {
				fired.set(fired.get() + 1);
				if let Some(timer) = slot.borrow().as_ref() {
					timer.cancel();
				}
			}
		});
		*slot.borrow_mut() = Some(timer.clone());
		timer.schedule_repeating(5);
		advance(50);
		assert_eq!(fired.get(), 1);
		slot.borrow_mut().take();
	}

	#[test]
	fn microtasks_run_on_advance() {
		let ran = Rc::new(Cell::new(false));
		queue_microtask({
			let ran = Rc::clone(&ran);
			move || ran.set(true)
		});
		advance(0);
		assert!(ran.get());
	}
}
