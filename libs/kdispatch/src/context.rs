// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::sync::WakerQueue;
use crate::task::TaskId;
use crate::{Dispatcher, Poll, Waker};
use core::fmt;

/// The context of a single poll of a task.
///
/// It is handed to [`Pendable::pend`][crate::Pendable::pend] and is the only way to obtain
/// [`Waker`]s for the task being polled. All methods are only meaningful for the duration of the
/// poll, which is why the context can't outlive it.
pub struct Context<'a> {
    dispatcher: &'a Dispatcher,
    task: TaskId,
    unscheduled: bool,
}

impl<'a> Context<'a> {
    pub(crate) fn new(dispatcher: &'a Dispatcher, task: TaskId) -> Self {
        Self {
            dispatcher,
            task,
            unscheduled: false,
        }
    }

    /// The dispatcher polling the current task.
    pub fn dispatcher(&self) -> &'a Dispatcher {
        self.dispatcher
    }

    /// The ID of the task being polled.
    pub fn task_id(&self) -> TaskId {
        self.task
    }

    /// Create a new waker for the current task.
    ///
    /// Prefer the [`store_waker!`][crate::store_waker] family of macros, they record why the task
    /// went to sleep.
    pub fn waker(&self) -> Waker {
        Waker::for_task(&self.dispatcher.shared, self.task)
    }

    /// Ask for the current task to be polled again, after every other task that is already woken.
    ///
    /// This is how a task yields: return [`Poll::Pending`] right after calling this.
    pub fn re_enqueue(&self) {
        tracing::trace!(task.id = %self.task, "task re-enqueued itself");
        self.waker().wake();
    }

    /// Remove the current task from the dispatcher once this poll returns.
    ///
    /// Takes precedence over wakeups that happened during the poll: the task won't be polled
    /// again until it is explicitly posted again. Meant to be used as the return value.
    ///
    /// ```
    /// # use kdispatch::{Context, Poll};
    /// fn pend(cx: &mut Context<'_>) -> Poll<u32> {
    ///     cx.unschedule()
    /// }
    /// ```
    pub fn unschedule<T>(&mut self) -> Poll<T> {
        tracing::trace!(task.id = %self.task, "task unscheduled itself");
        self.unscheduled = true;
        Poll::Pending
    }

    pub(crate) fn is_unscheduled(&self) -> bool {
        self.unscheduled
    }

    /// Store a waker for the current task in `slot`, releasing whatever waker was there before.
    pub fn store_waker(&self, slot: &mut Waker, reason: &'static str) {
        if slot.points_to(&self.dispatcher.shared, self.task) {
            return;
        }

        tracing::trace!(task.id = %self.task, reason, "storing waker");
        *slot = self.waker();
    }

    /// Store a waker for the current task in `slot` unless it holds a live waker for a different
    /// task.
    ///
    /// Returns `false` (leaving the slot untouched) if the slot belongs to someone else. This is
    /// used by single-waiter primitives to detect a second concurrent waiter.
    pub fn try_store_waker(&self, slot: &mut Waker, reason: &'static str) -> bool {
        if !slot.is_empty() && !slot.points_to(&self.dispatcher.shared, self.task) {
            tracing::trace!(task.id = %self.task, reason, "waker slot is occupied");
            return false;
        }

        self.store_waker(slot, reason);
        true
    }

    /// Add a waker for the current task to `queue`.
    ///
    /// Adding the same task twice is a no-op that succeeds. Wakers of tasks that are gone are
    /// dropped to make room, returns `false` if the queue is still full after that.
    pub fn store_waker_in_queue<const N: usize>(
        &self,
        queue: &mut WakerQueue<N>,
        reason: &'static str,
    ) -> bool {
        if queue.contains_task(&self.dispatcher.shared, self.task) {
            return true;
        }

        if queue.is_full() {
            let pruned = queue.prune();
            tracing::trace!(pruned, "waker queue full, dropped dead wakers");
        }

        tracing::trace!(task.id = %self.task, reason, "adding waker to queue");
        queue.add(self.waker())
    }
}

impl fmt::Debug for Context<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("task", &self.task)
            .field("unscheduled", &self.unscheduled)
            .finish_non_exhaustive()
    }
}

/// Store a waker for the current task in a [`Waker`] slot, see [`Context::store_waker`].
///
/// The optional third argument documents why the task sleeps, it defaults to the call site.
#[macro_export]
macro_rules! store_waker {
    ($cx:expr, $slot:expr $(,)?) => {
        $cx.store_waker(&mut $slot, concat!(file!(), ":", line!()))
    };
    ($cx:expr, $slot:expr, $reason:expr $(,)?) => {
        $cx.store_waker(&mut $slot, $reason)
    };
}

/// Try to store a waker for the current task, see [`Context::try_store_waker`].
#[macro_export]
macro_rules! try_store_waker {
    ($cx:expr, $slot:expr $(,)?) => {
        $cx.try_store_waker(&mut $slot, concat!(file!(), ":", line!()))
    };
    ($cx:expr, $slot:expr, $reason:expr $(,)?) => {
        $cx.try_store_waker(&mut $slot, $reason)
    };
}

/// Add a waker for the current task to a [`WakerQueue`][crate::sync::WakerQueue], see
/// [`Context::store_waker_in_queue`].
#[macro_export]
macro_rules! store_waker_in_queue {
    ($cx:expr, $queue:expr $(,)?) => {
        $cx.store_waker_in_queue(&mut $queue, concat!(file!(), ":", line!()))
    };
    ($cx:expr, $queue:expr, $reason:expr $(,)?) => {
        $cx.store_waker_in_queue(&mut $queue, $reason)
    };
}
