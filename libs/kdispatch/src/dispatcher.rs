// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod table;

use crate::park::{DefaultPark, Park};
use crate::task::{ErasedPend, Schedulable, TaskBuilder, TaskId, TaskState};
use crate::{Context, Pendable, Poll, Task};
use crate::loom::hint;
use crate::loom::sync::atomic::{AtomicUsize, Ordering};
use crate::loom::sync::{Arc, Mutex};
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use core::{fmt, mem};
use static_assertions::assert_impl_all;
use table::TaskTable;

/// The run loop that polls [`Task`]s.
///
/// Tasks are posted onto the dispatcher, which keeps them in a FIFO run queue while they are
/// woken and in its task table while they sleep. Only the thread currently inside one of the
/// `run_*` methods ever polls a task, and it polls exactly one task at a time. [`Waker`]s,
/// [`Dispatcher::post`] and [`Dispatcher::post_owned`] may be used from any thread.
///
/// Dropping the dispatcher forcibly deregisters every remaining task (running its destroy hook)
/// and turns every outstanding [`Waker`] into a no-op.
///
/// [`Waker`]: crate::Waker
pub struct Dispatcher {
    pub(crate) shared: Arc<Shared>,
}
assert_impl_all!(Dispatcher: Send, Sync);

/// State shared between the dispatcher and every waker pointing into it.
pub(crate) struct Shared {
    /// The one lock guarding all task and waker linkage.
    ///
    /// No user code ever runs while this is held, destroy hooks (drops) run after it is released.
    core: Mutex<Core>,
    park: Box<dyn Park>,
    tasks_polled: AtomicUsize,
}

struct Core {
    tasks: TaskTable<TaskSlot>,
    /// Holds every `Woken` task exactly once. Its capacity never drops below the number of
    /// registered tasks, so waking a task never allocates.
    run_queue: VecDeque<TaskId>,
    /// How many entries at the front of the run queue belong to the current pass.
    pass_remaining: usize,
    /// The task currently being polled, if any.
    current: Option<TaskId>,
    dispatching: bool,
    /// Set right before the dispatch thread parks, whoever makes a task ready next must unpark it.
    wants_unpark: bool,
    #[cfg(feature = "std")]
    dispatch_thread: Option<crate::loom::thread::ThreadId>,
}

struct TaskSlot {
    state: TaskState,
    /// Number of live wakers pointing at this registration.
    wakers: usize,
    woken_while_running: bool,
    span: tracing::Span,
    storage: Storage,
}

/// How the dispatcher holds on to a registered task.
pub(crate) enum Storage {
    /// The caller owns the task, the dispatcher keeps a reference while it is registered.
    Caller(Arc<dyn Schedulable>),
    /// The dispatcher owns the task and drops it once it completes or is deregistered.
    ///
    /// `None` while the task is being polled.
    Owned(Option<Box<dyn ErasedPend + Send>>),
    /// A pendable borrowed for the duration of [`Dispatcher::run_pendable_until_stalled`].
    Borrowed,
}

enum Polling {
    Caller(Arc<dyn Schedulable>),
    Owned(Box<dyn ErasedPend + Send>),
    Borrowed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Requeued,
    Sleeping,
    Unscheduled,
    /// Pending without a live waker, nothing could ever wake it again.
    Abandoned,
}

type BorrowedPend<'a> = &'a mut (dyn FnMut(&mut Context<'_>) -> Poll + 'a);

// === impl Dispatcher ===

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl Dispatcher {
    /// Creates a dispatcher that blocks through the [`DefaultPark`] in
    /// [`Dispatcher::run_to_completion`].
    pub fn new() -> Self {
        Self::with_park(DefaultPark::new())
    }

    /// Creates a dispatcher with room for `capacity` tasks before it needs to reallocate.
    pub fn with_capacity(capacity: usize) -> Self {
        Self::build(Box::new(DefaultPark::new()), capacity)
    }

    /// Creates a dispatcher that blocks through the given [`Park`] implementation.
    pub fn with_park(park: impl Park + 'static) -> Self {
        Self::build(Box::new(park), 0)
    }

    fn build(park: Box<dyn Park>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                core: Mutex::new(Core {
                    tasks: TaskTable::with_capacity(capacity),
                    run_queue: VecDeque::with_capacity(capacity),
                    current: None,
                    dispatching: false,
                    pass_remaining: 0,
                    wants_unpark: false,
                    #[cfg(feature = "std")]
                    dispatch_thread: None,
                }),
                park,
                tasks_polled: AtomicUsize::new(0),
            }),
        }
    }

    /// Registers a caller-owned task and marks it as woken.
    ///
    /// Posting a task that is already registered with this dispatcher does nothing.
    ///
    /// # Panics
    ///
    /// Panics if the task is currently registered with a *different* dispatcher.
    pub fn post<P>(&self, task: &Arc<Task<P>>)
    where
        P: Pendable + Send + 'static,
    {
        Task::post_to(task, &self.shared);
    }

    /// Moves `pendable` into the dispatcher as a self-owned task.
    ///
    /// The dispatcher drops the pendable exactly once: when it completes, when it is deregistered
    /// or un-scheduled, or when the dispatcher itself is dropped.
    #[track_caller]
    pub fn post_owned<P>(&self, pendable: P) -> TaskId
    where
        P: Pendable + Send + 'static,
    {
        TaskBuilder::new().post_owned(self, pendable)
    }

    /// Polls woken tasks until none of them can make further progress.
    ///
    /// Returns [`Poll::Ready`] if no tasks remain registered, [`Poll::Pending`] if some of them
    /// are asleep waiting for a wakeup. This never blocks on external events.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already running, e.g. when called from within a task.
    pub fn run_until_stalled(&self) -> Poll {
        self.run_until_stalled_inner(None, None)
    }

    /// Like [`Dispatcher::run_until_stalled`], but returns [`Poll::Ready`] as soon as `task`
    /// completes (or right away if it isn't registered here).
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already running, e.g. when called from within a task.
    pub fn run_task_until_stalled<P>(&self, task: &Task<P>) -> Poll {
        match task.registration_on(&self.shared) {
            Some(id) => self.run_until_stalled_inner(Some(id), None),
            None => Poll::Ready(()),
        }
    }

    /// Polls a borrowed pendable as a transient task, together with every other woken task, until
    /// it completes or nothing can make progress anymore.
    ///
    /// If the pendable is still pending when the dispatcher stalls it is deregistered again, so
    /// wakers it stored become no-ops. Calling this again simply re-polls it.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already running, e.g. when called from within a task.
    #[track_caller]
    pub fn run_pendable_until_stalled<P>(&self, pendable: &mut P) -> Poll<P::Output>
    where
        P: Pendable,
    {
        let span = TaskBuilder::new()
            .kind("pendable")
            .span(core::any::type_name::<P::Output>());
        let id = self.shared.insert(Storage::Borrowed, span);

        let mut output = None;
        let res = {
            let mut pend = pend_with(|cx| match pendable.pend(cx) {
                Poll::Ready(value) => {
                    output = Some(value);
                    Poll::Ready(())
                }
                Poll::Pending => Poll::Pending,
            });
            let pend: BorrowedPend<'_> = &mut pend;
            self.run_until_stalled_inner(Some(id), Some(pend))
        };

        if res.is_pending() {
            self.shared.deregister(id);
        }

        output.map_or(Poll::Pending, Poll::Ready)
    }

    /// Polls tasks until no task remains registered, parking the calling thread whenever every
    /// registered task is asleep.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already running, e.g. when called from within a task.
    pub fn run_to_completion(&self) {
        self.run_to_completion_inner(None);
    }

    /// Like [`Dispatcher::run_to_completion`] but returns as soon as `task` has completed.
    ///
    /// # Panics
    ///
    /// Panics if the dispatcher is already running, e.g. when called from within a task.
    pub fn run_task_to_completion<P>(&self, task: &Task<P>) {
        if let Some(id) = task.registration_on(&self.shared) {
            self.run_to_completion_inner(Some(id));
        }
    }

    /// Returns `true` if `id` refers to a task that is still registered here.
    pub fn is_registered(&self, id: TaskId) -> bool {
        self.shared.contains(id)
    }

    /// Removes a task from the dispatcher, invalidating all of its wakers and running its destroy
    /// hook. Returns `false` if the task wasn't registered.
    ///
    /// If the task is currently being polled on another thread this waits for the poll to end.
    ///
    /// # Panics
    ///
    /// Panics if a task tries to deregister itself from within its own poll.
    pub fn deregister(&self, id: TaskId) -> bool {
        self.shared.deregister(id)
    }

    /// Returns the lifecycle state of the task identified by `id`.
    pub fn task_state(&self, id: TaskId) -> TaskState {
        self.shared.task_state(id)
    }

    /// The number of currently registered tasks, woken, running and sleeping.
    pub fn num_registered(&self) -> usize {
        self.shared.core.lock().tasks.len()
    }

    /// The number of polls this dispatcher has performed so far.
    pub fn tasks_polled(&self) -> usize {
        self.shared.tasks_polled.load(Ordering::Relaxed)
    }

    fn run_until_stalled_inner(
        &self,
        target: Option<TaskId>,
        mut borrowed: Option<BorrowedPend<'_>>,
    ) -> Poll {
        let _guard = self.enter();

        loop {
            // every task that is woken at the start of a pass is polled once in that pass, tasks
            // woken during the pass go to the back of the queue and run in the next one
            let queued = {
                let mut core = self.shared.core.lock();
                core.pass_remaining = core.run_queue.len();
                core.pass_remaining
            };
            if queued == 0 {
                break;
            }
            tracing::debug!(queued, "dispatcher pass");

            while let Some((id, polling, span)) = self.next_ready() {
                let completed = self.poll_task(id, polling, &span, borrowed.as_deref_mut());
                if completed && target == Some(id) {
                    return Poll::Ready(());
                }
            }
        }

        let core = self.shared.core.lock();
        let done = match target {
            Some(id) => !core.tasks.contains(id),
            None => core.tasks.is_empty(),
        };
        tracing::trace!(done, registered = core.tasks.len(), "dispatcher stalled");

        if done { Poll::Ready(()) } else { Poll::Pending }
    }

    #[tracing::instrument(level = "debug", skip(self))]
    fn run_to_completion_inner(&self, target: Option<TaskId>) {
        loop {
            if self.run_until_stalled_inner(target, None).is_ready() {
                return;
            }

            {
                let mut core = self.shared.core.lock();
                // a wakeup arrived between stalling and getting here
                if !core.run_queue.is_empty() {
                    continue;
                }
                core.wants_unpark = true;
            }

            tracing::debug!("all tasks asleep, parking");
            self.shared.park.park();
        }
    }

    fn enter(&self) -> DispatchGuard<'_> {
        let mut core = self.shared.core.lock();
        assert!(
            !core.dispatching,
            "dispatcher is already running (dispatching is not re-entrant)"
        );
        core.dispatching = true;
        #[cfg(feature = "std")]
        {
            core.dispatch_thread = Some(crate::loom::thread::current().id());
        }

        DispatchGuard {
            shared: &self.shared,
        }
    }

    /// Dequeue the next woken task of the current pass and transition it to `Running`.
    fn next_ready(&self) -> Option<(TaskId, Polling, tracing::Span)> {
        let mut guard = self.shared.core.lock();
        let core = &mut *guard;

        while core.pass_remaining > 0 {
            core.pass_remaining -= 1;
            let Some(id) = core.run_queue.pop_front() else {
                break;
            };
            let Some(slot) = core.tasks.get_mut(id) else {
                continue;
            };
            debug_assert_eq!(slot.state, TaskState::Woken);

            slot.state = TaskState::Running;
            slot.woken_while_running = false;

            let polling = match &mut slot.storage {
                Storage::Caller(task) => Polling::Caller(Arc::clone(task)),
                Storage::Owned(task) => {
                    Polling::Owned(task.take().expect("owned task is already being polled"))
                }
                Storage::Borrowed => Polling::Borrowed,
            };

            core.current = Some(id);
            return Some((id, polling, slot.span.clone()));
        }

        None
    }

    /// Poll a single task, returns `true` if it completed.
    fn poll_task(
        &self,
        id: TaskId,
        mut polling: Polling,
        span: &tracing::Span,
        borrowed: Option<&mut (dyn FnMut(&mut Context<'_>) -> Poll + '_)>,
    ) -> bool {
        let mut cx = Context::new(self, id);

        let poll = {
            let _enter = span.enter();
            tracing::trace!("polling task");

            match &mut polling {
                Polling::Caller(task) => task.poll(&mut cx),
                Polling::Owned(task) => task.pend_erased(&mut cx),
                Polling::Borrowed => match borrowed {
                    Some(pend) => pend(&mut cx),
                    // the borrow ended without the transient task being cleaned up
                    None => cx.unschedule(),
                },
            }
        };
        self.shared.tasks_polled.fetch_add(1, Ordering::Relaxed);

        let unscheduled = cx.is_unscheduled();
        self.finish_poll(id, polling, poll, unscheduled)
    }

    /// Transition a task out of `Running` according to its poll result.
    fn finish_poll(&self, id: TaskId, polling: Polling, poll: Poll, unscheduled: bool) -> bool {
        let (outcome, removed, polling) = {
            let mut guard = self.shared.core.lock();
            let core = &mut *guard;
            core.current = None;

            let slot = core
                .tasks
                .get_mut(id)
                .expect("task was removed from the dispatcher while being polled");

            let outcome = if poll.is_ready() {
                Outcome::Completed
            } else if unscheduled {
                Outcome::Unscheduled
            } else if slot.woken_while_running {
                slot.state = TaskState::Woken;
                core.run_queue.push_back(id);
                Outcome::Requeued
            } else if slot.wakers > 0 {
                slot.state = TaskState::Sleeping;
                Outcome::Sleeping
            } else {
                Outcome::Abandoned
            };

            match outcome {
                Outcome::Requeued | Outcome::Sleeping => match polling {
                    Polling::Owned(task) => {
                        slot.storage = Storage::Owned(Some(task));
                        (outcome, None, None)
                    }
                    other => (outcome, None, Some(other)),
                },
                _ => (outcome, core.tasks.remove(id), Some(polling)),
            }
        };

        if outcome == Outcome::Abandoned {
            tracing::warn!(
                task.id = %id,
                "task returned pending without registering a waker, it won't be polled again until re-posted"
            );
        } else {
            tracing::trace!(task.id = %id, ?outcome, "task polled");
        }

        // run destroy hooks outside of the lock
        drop(removed);
        drop(polling);

        outcome == Outcome::Completed
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        let remaining = {
            let mut core = self.shared.core.lock();
            core.run_queue.clear();
            core.tasks.take_all()
        };

        if !remaining.is_empty() {
            tracing::debug!(
                remaining = remaining.len(),
                "dispatcher dropped with registered tasks, destroying them"
            );
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Dispatcher");
        if let Some(core) = self.shared.core.try_lock() {
            s.field("registered", &core.tasks.len())
                .field("queued", &core.run_queue.len())
                .field("dispatching", &core.dispatching);
        }
        s.field("tasks_polled", &self.tasks_polled())
            .finish_non_exhaustive()
    }
}

/// Forces closure signature inference for the borrowed pendable trampoline.
fn pend_with<F>(f: F) -> F
where
    F: FnMut(&mut Context<'_>) -> Poll,
{
    f
}

struct DispatchGuard<'a> {
    shared: &'a Shared,
}

impl Drop for DispatchGuard<'_> {
    fn drop(&mut self) {
        let panicked = {
            let mut core = self.shared.core.lock();
            core.dispatching = false;
            core.pass_remaining = 0;
            #[cfg(feature = "std")]
            {
                core.dispatch_thread = None;
            }
            // only set if a poll unwound before `finish_poll`
            core.current.take().and_then(|id| core.tasks.remove(id))
        };

        if panicked.is_some() {
            tracing::warn!("task panicked while being polled, it was deregistered");
        }
    }
}

// === impl Core ===

impl Core {
    /// Remove a `Woken` task from the run queue, keeping the current pass's budget in sync.
    fn dequeue(&mut self, id: TaskId) {
        if let Some(position) = self.run_queue.iter().position(|queued| *queued == id) {
            self.run_queue.remove(position);
            if position < self.pass_remaining {
                self.pass_remaining -= 1;
            }
        }
    }

    /// Whether `id` is the task being polled by the calling thread.
    fn is_polling_on_this_thread(&self, id: TaskId) -> bool {
        if self.current != Some(id) {
            return false;
        }

        cfg_if::cfg_if! {
            if #[cfg(feature = "std")] {
                self.dispatch_thread == Some(crate::loom::thread::current().id())
            } else {
                // without threads the only context a task can run on is the dispatch context
                true
            }
        }
    }
}

// === impl Shared ===

impl Shared {
    /// Registers a new task in the `Woken` state.
    pub(crate) fn insert(&self, storage: Storage, span: tracing::Span) -> TaskId {
        let (id, unpark) = {
            let mut guard = self.core.lock();
            let core = &mut *guard;

            let id = core.tasks.insert(TaskSlot {
                state: TaskState::Woken,
                wakers: 0,
                woken_while_running: false,
                span: span.clone(),
                storage,
            });
            let missing = core.tasks.len().saturating_sub(core.run_queue.len());
            core.run_queue.reserve(missing);
            core.run_queue.push_back(id);

            (id, mem::take(&mut core.wants_unpark))
        };

        span.record("task.id", tracing::field::display(id));
        tracing::trace!(task.id = %id, "posted task");

        if unpark {
            self.park.unpark();
        }

        id
    }

    pub(crate) fn contains(&self, id: TaskId) -> bool {
        self.core.lock().tasks.contains(id)
    }

    pub(crate) fn task_state(&self, id: TaskId) -> TaskState {
        self.core
            .lock()
            .tasks
            .get(id)
            .map_or(TaskState::Unposted, |slot| slot.state)
    }

    /// Account for a new waker pointing at `id`, returns `false` if the task is gone.
    pub(crate) fn retain_waker(&self, id: TaskId) -> bool {
        match self.core.lock().tasks.get_mut(id) {
            Some(slot) => {
                slot.wakers += 1;
                true
            }
            None => false,
        }
    }

    pub(crate) fn release_waker(&self, id: TaskId) {
        if let Some(slot) = self.core.lock().tasks.get_mut(id) {
            slot.wakers = slot.wakers.saturating_sub(1);
        }
    }

    /// Consume one waker of `id`, making the task ready if it was asleep.
    pub(crate) fn wake(&self, id: TaskId) {
        let unpark = {
            let mut guard = self.core.lock();
            let core = &mut *guard;

            let Some(slot) = core.tasks.get_mut(id) else {
                drop(guard);
                tracing::trace!(task.id = %id, "ignoring wakeup for deregistered task");
                return;
            };
            slot.wakers = slot.wakers.saturating_sub(1);

            match slot.state {
                TaskState::Sleeping => {
                    slot.state = TaskState::Woken;
                    core.run_queue.push_back(id);
                    mem::take(&mut core.wants_unpark)
                }
                TaskState::Running => {
                    slot.woken_while_running = true;
                    false
                }
                TaskState::Woken | TaskState::Unposted => false,
            }
        };

        tracing::trace!(task.id = %id, unpark, "woke task");
        if unpark {
            self.park.unpark();
        }
    }

    pub(crate) fn deregister(&self, id: TaskId) -> bool {
        loop {
            let mut core = self.core.lock();
            let Some(slot) = core.tasks.get(id) else {
                return false;
            };

            let state = slot.state;
            match state {
                TaskState::Running => {
                    assert!(
                        !core.is_polling_on_this_thread(id),
                        "a task must not deregister itself from within its own poll"
                    );

                    // wait for the poll on the other thread to end
                    drop(core);
                    hint::spin_loop();
                    continue;
                }
                TaskState::Woken => core.dequeue(id),
                TaskState::Sleeping | TaskState::Unposted => {}
            }

            let removed = core.tasks.remove(id);
            drop(core);

            tracing::trace!(task.id = %id, "deregistered task");
            drop(removed);
            return true;
        }
    }
}
