// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::loom::sync::Mutex;
use crate::sync::AsyncCountAndCapacity;
use crate::{Context, DEFAULT_WAKER_QUEUE_CAPACITY, Poll};
use alloc::collections::VecDeque;
use core::fmt;

/// A bounded FIFO queue that tasks can wait on for free space or for elements.
///
/// The queue may be shared between tasks (and threads) by reference or through an `Arc`. Up to
/// `N` tasks may wait on it at the same time.
///
/// ```
/// # use kdispatch::{Dispatcher, Poll, pend_fn};
/// # use kdispatch::sync::BoundedQueue;
/// let dispatcher = Dispatcher::new();
/// let queue = BoundedQueue::<u32>::new(2);
///
/// let mut producer = pend_fn(|cx| {
///     kdispatch::ready!(queue.pend_has_space(cx, 1));
///     queue.push(7).unwrap();
///     Poll::Ready(())
/// });
/// assert!(dispatcher.run_pendable_until_stalled(&mut producer).is_ready());
///
/// let mut consumer = pend_fn(|cx| queue.pend_pop(cx));
/// assert_eq!(dispatcher.run_pendable_until_stalled(&mut consumer), Poll::Ready(7));
/// ```
pub struct BoundedQueue<T, const N: usize = DEFAULT_WAKER_QUEUE_CAPACITY> {
    inner: Mutex<Inner<T, N>>,
}

struct Inner<T, const N: usize> {
    items: VecDeque<T>,
    counter: AsyncCountAndCapacity<N>,
}

impl<T, const N: usize> BoundedQueue<T, N> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                counter: AsyncCountAndCapacity::new(capacity),
            }),
        }
    }

    /// Wait until `num` elements can be pushed, reserving the space for the caller.
    ///
    /// # Panics
    ///
    /// Panics if `num` exceeds the queue's capacity.
    #[track_caller]
    pub fn pend_has_space(&self, cx: &mut Context<'_>, num: usize) -> Poll {
        self.inner.lock().counter.pend_has_space(cx, num)
    }

    /// Append an element.
    ///
    /// # Errors
    ///
    /// Returns the value back if the queue is full.
    pub fn push(&self, value: T) -> Result<(), T> {
        let mut inner = self.inner.lock();
        if inner.counter.is_full() {
            return Err(value);
        }

        inner.items.push_back(value);
        inner.counter.increment_count(1);
        Ok(())
    }

    /// Wait until the queue holds an element, reserving it for the caller.
    pub fn pend_not_empty(&self, cx: &mut Context<'_>) -> Poll {
        self.inner.lock().counter.pend_not_empty(cx)
    }

    /// Remove the oldest element, if any.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock();
        let value = inner.items.pop_front()?;
        inner.counter.decrement_count(1);
        Some(value)
    }

    /// Wait for an element and pop it.
    #[expect(clippy::missing_panics_doc, reason = "internal assertion")]
    pub fn pend_pop(&self, cx: &mut Context<'_>) -> Poll<T> {
        let mut inner = self.inner.lock();
        crate::ready!(inner.counter.pend_not_empty(cx));

        let value = inner
            .items
            .pop_front()
            .expect("count and queue length diverged");
        inner.counter.decrement_count(1);
        Poll::Ready(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().counter.capacity()
    }

    /// Drop every element, waking all waiters.
    pub fn clear(&self) {
        let items = {
            let mut inner = self.inner.lock();
            inner.counter.set_count(0);
            core::mem::take(&mut inner.items)
        };
        drop(items);
    }

    /// Change the capacity.
    ///
    /// # Panics
    ///
    /// Panics if the queue currently holds more than `capacity` elements.
    #[track_caller]
    pub fn set_capacity(&self, capacity: usize) {
        self.inner.lock().counter.set_capacity(capacity);
    }
}

impl<T, const N: usize> fmt::Debug for BoundedQueue<T, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("BoundedQueue")
            .field("len", &inner.items.len())
            .field("counter", &inner.counter)
            .finish_non_exhaustive()
    }
}
