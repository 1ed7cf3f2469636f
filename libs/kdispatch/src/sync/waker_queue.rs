// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::dispatcher::Shared;
use crate::task::TaskId;
use crate::{DEFAULT_WAKER_QUEUE_CAPACITY, Waker};
use alloc::sync::Arc;
use arrayvec::ArrayVec;
use core::fmt;

/// A fixed-capacity FIFO of [`Waker`]s for conditions more than one task may wait on.
///
/// Wakers are woken in the order they were added. The queue never allocates, [`WakerQueue::add`]
/// refuses new wakers once `N` are stored.
pub struct WakerQueue<const N: usize = DEFAULT_WAKER_QUEUE_CAPACITY> {
    inner: ArrayVec<Waker, N>,
}

impl<const N: usize> Default for WakerQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> WakerQueue<N> {
    pub const fn new() -> Self {
        Self {
            inner: ArrayVec::new_const(),
        }
    }

    /// Appends a waker, returning `false` (and dropping it) if the queue is full.
    pub fn add(&mut self, waker: Waker) -> bool {
        self.inner.try_push(waker).is_ok()
    }

    /// Wakes the longest waiting task, returns `false` if the queue was empty.
    pub fn wake_one(&mut self) -> bool {
        if self.inner.is_empty() {
            return false;
        }
        self.inner.remove(0).wake();
        true
    }

    /// Wakes the `num` longest waiting tasks (or all of them, if there are fewer).
    pub fn wake_many(&mut self, num: usize) {
        let num = num.min(self.inner.len());
        for waker in self.inner.drain(..num) {
            waker.wake();
        }
    }

    pub fn wake_all(&mut self) {
        for waker in self.inner.drain(..) {
            waker.wake();
        }
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.inner.is_full()
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    /// Drops every waker without waking it.
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Drops wakers whose task has completed or was deregistered, returns how many were removed.
    pub fn prune(&mut self) -> usize {
        let before = self.inner.len();
        self.inner.retain(|waker| !waker.is_empty());
        before - self.inner.len()
    }

    pub(crate) fn contains_task(&self, shared: &Arc<Shared>, task: TaskId) -> bool {
        self.inner.iter().any(|waker| waker.points_to(shared, task))
    }
}

impl<const N: usize> fmt::Debug for WakerQueue<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WakerQueue")
            .field("len", &self.inner.len())
            .field("capacity", &N)
            .finish()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::test_util::init_tracing;
    use crate::{Dispatcher, Poll, pend_fn, store_waker_in_queue};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::vec::Vec;

    /// Posts `n` tasks that each park a waker in `queue` and record the order they were polled in.
    fn waiters<const N: usize>(
        dispatcher: &Dispatcher,
        queue: &Arc<spin::Mutex<WakerQueue<N>>>,
        n: usize,
    ) -> Arc<spin::Mutex<Vec<usize>>> {
        let order = Arc::new(spin::Mutex::new(Vec::new()));
        for i in 0..n {
            let queue = queue.clone();
            let order = order.clone();
            let polls = AtomicUsize::new(0);
            dispatcher.post_owned(pend_fn(move |cx| {
                if polls.fetch_add(1, Ordering::Relaxed) > 0 {
                    order.lock().push(i);
                    return Poll::Ready(());
                }
                assert!(store_waker_in_queue!(cx, *queue.lock(), "test waiter"));
                Poll::Pending
            }));
        }
        assert!(dispatcher.run_until_stalled().is_pending());
        order
    }

    #[test]
    fn add_fails_when_full() {
        let mut queue = WakerQueue::<2>::new();
        assert!(queue.add(Waker::new()));
        assert!(queue.add(Waker::new()));
        assert!(queue.is_full());
        assert!(!queue.add(Waker::new()));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.capacity(), 2);

        queue.clear();
        assert!(queue.is_empty());
        assert!(!queue.wake_one());
    }

    #[test]
    fn wake_many_is_fifo_and_clamped() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(spin::Mutex::new(WakerQueue::<4>::new()));
        let order = waiters(&dispatcher, &queue, 4);
        assert_eq!(queue.lock().len(), 4);

        queue.lock().wake_many(2);
        assert_eq!(queue.lock().len(), 2);
        assert!(dispatcher.run_until_stalled().is_pending());
        assert_eq!(*order.lock(), [0, 1]);

        queue.lock().wake_many(10);
        assert!(queue.lock().is_empty());
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(*order.lock(), [0, 1, 2, 3]);
    }

    #[test]
    fn wake_one_wakes_oldest() {
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(spin::Mutex::new(WakerQueue::<3>::new()));
        let order = waiters(&dispatcher, &queue, 3);

        assert!(queue.lock().wake_one());
        assert!(dispatcher.run_until_stalled().is_pending());
        assert_eq!(*order.lock(), [0]);

        queue.lock().wake_all();
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(*order.lock(), [0, 1, 2]);
    }

    #[test]
    fn prune_drops_dead_wakers_only() {
        let dispatcher = Dispatcher::new();
        let queue = Arc::new(spin::Mutex::new(WakerQueue::<3>::new()));
        let _order = waiters(&dispatcher, &queue, 3);
        assert!(queue.lock().is_full());

        let dead = queue.lock().inner[1].task_id().unwrap();
        assert!(dispatcher.deregister(dead));

        assert_eq!(queue.lock().prune(), 1);
        assert_eq!(queue.lock().len(), 2);
        assert!(!queue.lock().is_full());
        assert_eq!(queue.lock().prune(), 0);
    }
}
