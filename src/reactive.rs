//! Fine-grained dependency tracking with a deferred, batched flush.
//!
//! A [`Computation`] runs its command once immediately and records every [`Dependency`] read while doing so.
//! When any of them [`notify`](`Dependency::notify`)s, the computation is invalidated and re-run on the next [`flush`].
//!
//! All state is thread-local: the engine is single-threaded and cooperative.

use core::cell::{Cell, RefCell};
use std::{
	collections::VecDeque,
	rc::{Rc, Weak},
};
use tracing::{trace, trace_span};

type Listener = Box<dyn FnOnce()>;

#[derive(Default)]
struct ReactiveState {
	flush_listeners: VecDeque<Listener>,
	post_flush_listeners: VecDeque<Listener>,
	current: Option<Computation>,
	flushing: bool,
}

thread_local! {
	static REACTIVE: RefCell<ReactiveState> = RefCell::default();
}

/// Runs `listener` during the next [`flush`], before any post-flush listeners.
///
/// Listeners added while flushing run in the same flush.
pub fn add_flush_listener(listener: impl FnOnce() + 'static) {
	REACTIVE.with(|reactive| reactive.borrow_mut().flush_listeners.push_back(Box::new(listener)))
}

/// Runs `listener` once all flush listeners of the next [`flush`] have run.
pub fn add_post_flush_listener(listener: impl FnOnce() + 'static) {
	REACTIVE.with(|reactive| reactive.borrow_mut().post_flush_listeners.push_back(Box::new(listener)))
}

/// Whether there is any pending work for [`flush`].
#[must_use]
pub fn has_pending_work() -> bool {
	REACTIVE.with(|reactive| {
		let reactive = reactive.borrow();
		!reactive.flush_listeners.is_empty() || !reactive.post_flush_listeners.is_empty()
	})
}

struct FlushGuard;
impl Drop for FlushGuard {
	fn drop(&mut self) {
		REACTIVE.with(|reactive| reactive.borrow_mut().flushing = false)
	}
}

/// Runs all flush listeners (including invalidated computations), then all post-flush listeners,
/// until neither queue has any work left.
///
/// Calling this while already flushing does nothing: the outer flush picks up any new work.
pub fn flush() {
	let already_flushing = REACTIVE.with(|reactive| core::mem::replace(&mut reactive.borrow_mut().flushing, true));
	if already_flushing {
		return trace!("Ignoring re-entrant flush.");
	}
	let _guard = FlushGuard;

	let span = trace_span!("flush");
	let _enter = span.enter();

	let mut count = 0_usize;
	loop {
		let next = REACTIVE.with(|reactive| {
			let mut reactive = reactive.borrow_mut();
			match reactive.flush_listeners.pop_front() {
				Some(listener) => Some(listener),
				None => reactive.post_flush_listeners.pop_front(),
			}
		});
		match next {
			Some(listener) => {
				listener();
				count += 1;
			}
			None => break,
		}
	}
	trace!("Flushed {} listener(s).", count);
}

struct CurrentGuard(Option<Computation>);
impl Drop for CurrentGuard {
	fn drop(&mut self) {
		let previous = self.0.take();
		REACTIVE.with(|reactive| reactive.borrow_mut().current = previous)
	}
}

fn enter(computation: Option<Computation>) -> CurrentGuard {
	CurrentGuard(REACTIVE.with(|reactive| core::mem::replace(&mut reactive.borrow_mut().current, computation)))
}

/// Runs `f` without recording any dependency reads for the current computation.
pub fn untracked<T>(f: impl FnOnce() -> T) -> T {
	let _guard = enter(None);
	f()
}

/// Creates a [`Computation`] that runs `command` now, and again during each flush after a tracked dependency changed.
pub fn run_when_dependencies_change(command: impl FnMut() + 'static) -> Computation {
	let computation = Computation(Rc::new(ComputationInner {
		command: RefCell::new(Some(Box::new(command))),
		invalidated: Cell::new(false),
		stopped: Cell::new(false),
		dependencies: RefCell::new(Vec::new()),
	}));
	computation.run();
	computation
}

struct ComputationInner {
	command: RefCell<Option<Box<dyn FnMut()>>>,
	invalidated: Cell<bool>,
	stopped: Cell<bool>,
	dependencies: RefCell<Vec<Weak<DependencyInner>>>,
}

/// A re-runnable command, see [`run_when_dependencies_change`].
#[derive(Clone)]
pub struct Computation(Rc<ComputationInner>);
impl Computation {
	/// Stops this computation permanently and releases its command.
	pub fn stop(&self) {
		if self.0.stopped.replace(true) {
			return;
		}
		self.detach();
		// Dropped outside of the borrow, as the command may own the last reference to things that stop computations.
		let command = self.0.command.borrow_mut().take();
		drop(command);
	}

	#[must_use]
	pub fn is_stopped(&self) -> bool {
		self.0.stopped.get()
	}

	#[must_use]
	pub fn is_invalidated(&self) -> bool {
		self.0.invalidated.get()
	}

	/// Schedules a re-run during the next flush.
	pub fn invalidate(&self) {
		if self.0.stopped.get() || self.0.invalidated.replace(true) {
			return;
		}
		self.detach();
		let this = self.clone();
		add_flush_listener(move || this.recompute());
	}

	fn recompute(&self) {
		if self.0.stopped.get() || !self.0.invalidated.replace(false) {
			return;
		}
		self.run()
	}

	fn run(&self) {
		let mut command = match self.0.command.borrow_mut().take() {
			Some(command) => command,
			None => return,
		};
		{
			let _guard = enter(Some(self.clone()));
			command();
		}
		if !self.0.stopped.get() {
			*self.0.command.borrow_mut() = Some(command);
		}
	}

	fn detach(&self) {
		let dependencies = core::mem::take(&mut *self.0.dependencies.borrow_mut());
		let this = Rc::downgrade(&self.0);
		for dependency in dependencies.iter().filter_map(Weak::upgrade) {
			dependency.dependents.borrow_mut().retain(|dependent| !dependent.ptr_eq(&this));
		}
	}

	fn ptr_eq(&self, other: &Self) -> bool {
		Rc::ptr_eq(&self.0, &other.0)
	}
}
impl core::fmt::Debug for Computation {
	fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
		f.debug_struct("Computation")
			.field("invalidated", &self.0.invalidated.get())
			.field("stopped", &self.0.stopped.get())
			.field("dependencies", &self.0.dependencies.borrow().len())
			.finish()
	}
}

#[derive(Default)]
struct DependencyInner {
	dependents: RefCell<Vec<Weak<ComputationInner>>>,
}

/// Something a [`Computation`] can depend on.
#[derive(Default, Clone)]
pub struct Dependency(Rc<DependencyInner>);
impl Dependency {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a read by the currently running computation, if any.
	pub fn track(&self) {
		let current = REACTIVE.with(|reactive| reactive.borrow().current.clone());
		let current = match current {
			Some(current) => current,
			None => return,
		};
		if current.is_stopped() {
			return;
		}

		let weak_current = Rc::downgrade(&current.0);
		let mut dependents = self.0.dependents.borrow_mut();
		if dependents.iter().any(|dependent| dependent.ptr_eq(&weak_current)) {
			return;
		}
		dependents.push(weak_current);
		current.0.dependencies.borrow_mut().push(Rc::downgrade(&self.0));
	}

	/// Invalidates every computation that read this dependency since its last run.
	pub fn notify(&self) {
		let dependents = core::mem::take(&mut *self.0.dependents.borrow_mut());
		let current = REACTIVE.with(|reactive| reactive.borrow().current.clone());
		for dependent in dependents.into_iter().filter_map(|dependent| dependent.upgrade()) {
			let dependent = Computation(dependent);
			if current.as_ref().map_or(false, |current| current.ptr_eq(&dependent)) {
				// A computation writing what it reads does not re-run itself.
				continue;
			}
			dependent.invalidate()
		}
	}

	#[must_use]
	pub fn dependent_count(&self) -> usize {
		self.0.dependents.borrow().len()
	}
}
