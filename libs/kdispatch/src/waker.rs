// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::dispatcher::Shared;
use crate::task::TaskId;
use alloc::sync::{Arc, Weak};
use core::{fmt, mem};
use static_assertions::assert_impl_all;

/// A handle that makes a sleeping task runnable again.
///
/// Wakers are created through a task's [`Context`][crate::Context] and count as one pending
/// wakeup each: a task that returns [`Poll::Pending`][crate::Poll::Pending] while at least one of
/// its wakers is alive is put to sleep, otherwise it is dropped from the dispatcher.
///
/// A waker is either *empty* or points at a single registration of a single task. It turns empty
/// when it is woken, [cleared][Waker::clear] or moved out of (via [`mem::take`]), and it behaves
/// as empty once the task it points to is deregistered or its dispatcher is dropped. Waking an
/// empty waker does nothing.
///
/// Wakers are `Send` and `Sync` and can be fired from any thread.
#[derive(Default)]
pub struct Waker {
    inner: Option<WakerRef>,
}
assert_impl_all!(Waker: Send, Sync);

struct WakerRef {
    shared: Weak<Shared>,
    task: TaskId,
}

impl Waker {
    /// Create an empty waker.
    pub const fn new() -> Self {
        Self { inner: None }
    }

    /// Create a waker that counts towards the live wakers of `task`.
    ///
    /// Returns an empty waker if the task is not registered (anymore).
    pub(crate) fn for_task(shared: &Arc<Shared>, task: TaskId) -> Self {
        if shared.retain_waker(task) {
            Self {
                inner: Some(WakerRef {
                    shared: Arc::downgrade(shared),
                    task,
                }),
            }
        } else {
            Self::default()
        }
    }

    /// Wake the task this waker points to.
    ///
    /// If the task is asleep it is moved to the back of the run queue, if it is currently being
    /// polled it will be polled again right after.
    pub fn wake(mut self) {
        if let Some(inner) = self.inner.take() {
            if let Some(shared) = inner.shared.upgrade() {
                shared.wake(inner.task);
            }
        }
    }

    /// Wake the task, leaving this waker empty.
    pub fn wake_by_ref(&mut self) {
        mem::take(self).wake();
    }

    /// Release this waker without waking the task.
    pub fn clear(&mut self) {
        drop(mem::take(self));
    }

    /// Returns `true` if waking this waker would have no effect.
    pub fn is_empty(&self) -> bool {
        self.live().is_none()
    }

    /// The task this waker points to, `None` if it is empty.
    pub fn task_id(&self) -> Option<TaskId> {
        self.live().map(|(_, id)| id)
    }

    /// Returns `true` if both wakers would wake the same task registration.
    pub fn will_wake(&self, other: &Self) -> bool {
        match (&self.inner, &other.inner) {
            (Some(a), Some(b)) => a.task == b.task && Weak::ptr_eq(&a.shared, &b.shared),
            _ => false,
        }
    }

    /// Returns `true` if this waker points at the registration `task` of `shared`.
    pub(crate) fn points_to(&self, shared: &Arc<Shared>, task: TaskId) -> bool {
        self.inner.as_ref().is_some_and(|inner| {
            inner.task == task && core::ptr::eq(Weak::as_ptr(&inner.shared), Arc::as_ptr(shared))
        })
    }

    fn live(&self) -> Option<(Arc<Shared>, TaskId)> {
        let inner = self.inner.as_ref()?;
        let shared = inner.shared.upgrade()?;
        if shared.contains(inner.task) {
            Some((shared, inner.task))
        } else {
            None
        }
    }
}

impl Clone for Waker {
    /// Cloning registers an additional wakeup with the task, cloning a stale waker yields an
    /// empty one.
    fn clone(&self) -> Self {
        match &self.inner {
            Some(inner) => match inner.shared.upgrade() {
                Some(shared) => Self::for_task(&shared, inner.task),
                None => Self::default(),
            },
            None => Self::default(),
        }
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.take() {
            if let Some(shared) = inner.shared.upgrade() {
                shared.release_waker(inner.task);
            }
        }
    }
}

impl fmt::Debug for Waker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Some(inner) => f.debug_tuple("Waker").field(&inner.task).finish(),
            None => f.write_str("Waker(<empty>)"),
        }
    }
}
