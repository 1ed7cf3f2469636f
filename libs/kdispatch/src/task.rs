// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

mod builder;
mod callback;
mod cancel;
mod id;

use crate::dispatcher::{Shared, Storage};
use crate::loom::sync::{Mutex, MutexGuard};
use crate::{Context, Pendable, Poll};
use alloc::sync::{Arc, Weak};
use core::fmt;

pub use builder::TaskBuilder;
pub use callback::{OneshotCallback, RecurringCallback};
pub use cancel::{CancelHandle, Cancellable};
pub use id::TaskId;

/// Where a task currently is in its lifecycle.
///
/// ```text
/// Unposted --post--> Woken --dequeue--> Running --pending + waker--> Sleeping --wake--> Woken
///                                          |
///                                          +--ready / unschedule / deregister--> Unposted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Not registered with any dispatcher.
    Unposted,
    /// Registered and sitting in the run queue.
    Woken,
    /// Being polled by the dispatch thread right now.
    Running,
    /// Registered and waiting for one of its wakers to fire.
    Sleeping,
}

/// A unit of work that is polled by a [`Dispatcher`][crate::Dispatcher].
///
/// Tasks are owned by the caller through an `Arc` and may be posted any number of times: once a
/// task completes (or is [deregistered][Task::deregister]) it goes back to being unposted and
/// [`Dispatcher::post`][crate::Dispatcher::post] registers it again with a fresh [`TaskId`].
///
/// The body is an arbitrary [`Pendable`]; its output is dropped by the dispatcher, tasks that need
/// to hand results somewhere do so through their own state (see [`OneshotCallback`]).
pub struct Task<P> {
    header: Header,
    body: Mutex<P>,
}

struct Header {
    /// Lock order: always taken before the dispatcher lock.
    registration: Mutex<Option<Registration>>,
    name: Option<&'static str>,
    kind: &'static str,
    span: tracing::Span,
}

struct Registration {
    shared: Weak<Shared>,
    id: TaskId,
}

/// A type-erased caller-owned task as the dispatcher sees it.
pub(crate) trait Schedulable: Send + Sync {
    fn poll(&self, cx: &mut Context<'_>) -> Poll;
}

/// A type-erased dispatcher-owned pendable, the output is discarded.
pub(crate) trait ErasedPend {
    fn pend_erased(&mut self, cx: &mut Context<'_>) -> Poll;
}

impl<P: Pendable> ErasedPend for P {
    fn pend_erased(&mut self, cx: &mut Context<'_>) -> Poll {
        self.pend(cx).readiness()
    }
}

// === impl Task ===

impl<P> Task<P>
where
    P: Pendable + Send + 'static,
{
    /// Create a new unposted task with default metadata, see [`TaskBuilder`] for more options.
    #[inline]
    #[track_caller]
    pub fn new(body: P) -> Arc<Self> {
        TaskBuilder::new().build(body)
    }

    pub(crate) fn post_to(this: &Arc<Self>, shared: &Arc<Shared>) {
        let mut registration = this.header.registration.lock();

        if let Some(current) = registration.as_ref() {
            if let Some(owner) = current.shared.upgrade() {
                if owner.contains(current.id) {
                    assert!(
                        Arc::ptr_eq(&owner, shared),
                        "task is already registered with another dispatcher"
                    );
                    tracing::trace!(task.id = %current.id, "task is already registered");
                    return;
                }
            }
        }

        let schedulable: Arc<dyn Schedulable> = this.clone();
        let id = shared.insert(Storage::Caller(schedulable), this.header.span.clone());
        *registration = Some(Registration {
            shared: Arc::downgrade(shared),
            id,
        });
    }
}

impl<P> Task<P> {
    pub fn name(&self) -> Option<&'static str> {
        self.header.name
    }

    pub fn kind(&self) -> &'static str {
        self.header.kind
    }

    /// The ID of the task's current registration, `None` when unposted.
    pub fn id(&self) -> Option<TaskId> {
        self.live_registration().map(|(_, id)| id)
    }

    pub fn is_registered(&self) -> bool {
        self.live_registration().is_some()
    }

    /// Returns the tasks current lifecycle state.
    pub fn state(&self) -> TaskState {
        self.live_registration()
            .map_or(TaskState::Unposted, |(shared, id)| shared.task_state(id))
    }

    /// Remove the task from its dispatcher, if it is registered anywhere.
    ///
    /// Every waker pointing at the task becomes a no-op. Deregistering a task that is being polled
    /// on the dispatch thread waits until that poll returns.
    ///
    /// # Panics
    ///
    /// Panics if called by the task on itself from within its own poll, use
    /// [`Context::unschedule`] for that instead.
    pub fn deregister(&self) {
        let Some((shared, id)) = self
            .header
            .registration
            .lock()
            .as_ref()
            .map(|registration| (registration.shared.clone(), registration.id))
        else {
            return;
        };

        // keep reporting the registration until the task is actually gone, the dispatch thread
        // may still be polling it
        if let Some(shared) = shared.upgrade() {
            shared.deregister(id);
        }

        let mut registration = self.header.registration.lock();
        if registration.as_ref().is_some_and(|current| current.id == id) {
            *registration = None;
        }
    }

    /// Lock the task's body.
    ///
    /// The dispatcher holds this lock for the duration of every poll.
    pub fn body(&self) -> MutexGuard<'_, P> {
        self.body.lock()
    }

    /// The ID of the registration with the given dispatcher, if it is live.
    pub(crate) fn registration_on(&self, shared: &Arc<Shared>) -> Option<TaskId> {
        self.live_registration()
            .and_then(|(owner, id)| Arc::ptr_eq(&owner, shared).then_some(id))
    }

    fn live_registration(&self) -> Option<(Arc<Shared>, TaskId)> {
        let registration = self.header.registration.lock();
        let Registration { shared, id } = registration.as_ref()?;
        let shared = shared.upgrade()?;

        if shared.contains(*id) {
            Some((shared, *id))
        } else {
            None
        }
    }
}

impl<P> Task<P>
where
    P: Pendable,
{
    /// Poll the task's body directly as part of another pendable.
    ///
    /// This lets tasks be composed: a parent may drive children it owns without posting them. The
    /// wakers the child stores wake the *parent*, as they are created from the parent's `cx`.
    ///
    /// # Panics
    ///
    /// Panics if the task is registered with a dispatcher and currently being polled by it.
    #[track_caller]
    pub fn pend(&self, cx: &mut Context<'_>) -> Poll {
        if let Some((shared, id)) = self.live_registration() {
            assert_ne!(
                shared.task_state(id),
                TaskState::Running,
                "task is already being polled by its dispatcher"
            );
        }

        self.body.lock().pend(cx).readiness()
    }
}

impl<P> Schedulable for Task<P>
where
    P: Pendable + Send,
{
    fn poll(&self, cx: &mut Context<'_>) -> Poll {
        self.body.lock().pend(cx).readiness()
    }
}

impl<P> fmt::Debug for Task<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.header.name)
            .field("kind", &self.header.kind)
            .field("id", &self.id())
            .finish_non_exhaustive()
    }
}
