// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::sync::WakerQueue;
use crate::{Context, DEFAULT_WAKER_QUEUE_CAPACITY, Poll};

/// Count and capacity bookkeeping for bounded containers with waiting producers and consumers.
///
/// The owning container keeps one of these next to its storage and updates it on every push and
/// pop. Producers call [`pend_has_space`][Self::pend_has_space] before pushing and consumers call
/// [`pend_not_empty`][Self::pend_not_empty] before popping.
///
/// # Reservations
///
/// A successful `pend_has_space(cx, n)` *reserves* `n` slots for the caller and a successful
/// `pend_not_empty` reserves the next element. While a reservation is outstanding every other
/// caller of the same kind is sent to sleep, even if there would be room, so that one push or pop
/// never wakes more waiters than can make progress. The reservation is released by the matching
/// [`increment_count`][Self::increment_count] or [`decrement_count`][Self::decrement_count].
///
/// Waiters are woken all at once and re-check their condition when polled, so the first one to
/// be polled wins. Wakeup order is not a consumption order.
#[derive(Debug)]
pub struct AsyncCountAndCapacity<const N: usize = DEFAULT_WAKER_QUEUE_CAPACITY> {
    count: usize,
    capacity: usize,
    pushes_reserved: usize,
    pop_reserved: bool,
    waiters: WakerQueue<N>,
}

impl<const N: usize> AsyncCountAndCapacity<N> {
    pub const fn new(capacity: usize) -> Self {
        Self {
            count: 0,
            capacity,
            pushes_reserved: 0,
            pop_reserved: false,
            waiters: WakerQueue::new(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of free slots, not taking outstanding reservations into account.
    pub fn available(&self) -> usize {
        self.capacity - self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Number of slots reserved by a producer that haven't been filled yet.
    pub fn pushes_reserved(&self) -> usize {
        self.pushes_reserved
    }

    /// Whether a consumer holds the reservation for the next element.
    pub fn pop_reserved(&self) -> bool {
        self.pop_reserved
    }

    /// Number of tasks waiting for either condition.
    pub fn num_waiters(&self) -> usize {
        self.waiters.len()
    }

    /// Wait until `num` slots are free and no other push reservation is outstanding.
    ///
    /// # Panics
    ///
    /// Panics if `num` exceeds the capacity, which could never be satisfied, or if more than `N`
    /// tasks wait at the same time.
    #[track_caller]
    pub fn pend_has_space(&mut self, cx: &mut Context<'_>, num: usize) -> Poll {
        assert!(
            num <= self.capacity,
            "waiting for {num} free slots in a container of capacity {}",
            self.capacity
        );

        if self.pushes_reserved == 0 && num <= self.available() {
            self.pushes_reserved = num;
            return Poll::Ready(());
        }

        self.wait(cx, "waiting for space");
        Poll::Pending
    }

    /// Wait until the container holds at least one element and no other pop reservation is
    /// outstanding.
    ///
    /// # Panics
    ///
    /// Panics if more than `N` tasks wait at the same time.
    #[track_caller]
    pub fn pend_not_empty(&mut self, cx: &mut Context<'_>) -> Poll {
        if !self.pop_reserved && self.count > 0 {
            self.pop_reserved = true;
            return Poll::Ready(());
        }

        self.wait(cx, "waiting for an element");
        Poll::Pending
    }

    /// Record that `num` elements were pushed, consuming (part of) the push reservation.
    ///
    /// # Panics
    ///
    /// Panics if the count would exceed the capacity.
    #[track_caller]
    pub fn increment_count(&mut self, num: usize) {
        assert!(
            num <= self.available(),
            "pushing {num} elements into a container with {} free slots",
            self.available()
        );

        self.count += num;
        self.pushes_reserved = self.pushes_reserved.saturating_sub(num);
        self.waiters.wake_all();
    }

    /// Record that `num` elements were popped, releasing the pop reservation.
    ///
    /// # Panics
    ///
    /// Panics if more elements are popped than are present.
    #[track_caller]
    pub fn decrement_count(&mut self, num: usize) {
        assert!(
            num <= self.count,
            "popping {num} elements from a container holding {}",
            self.count
        );

        self.count -= num;
        self.pop_reserved = false;
        self.waiters.wake_all();
    }

    /// Overwrite the count (e.g. after clearing the container), dropping all reservations.
    ///
    /// # Panics
    ///
    /// Panics if `count` exceeds the capacity.
    #[track_caller]
    pub fn set_count(&mut self, count: usize) {
        assert!(count <= self.capacity, "count exceeds capacity");

        self.count = count;
        self.pushes_reserved = 0;
        self.pop_reserved = false;
        self.waiters.wake_all();
    }

    /// Change the capacity.
    ///
    /// # Panics
    ///
    /// Panics if the container currently holds more than `capacity` elements.
    #[track_caller]
    pub fn set_capacity(&mut self, capacity: usize) {
        assert!(
            self.count <= capacity,
            "shrinking capacity below the current count"
        );

        self.capacity = capacity;
        self.pushes_reserved = self.pushes_reserved.min(capacity - self.count);
        self.waiters.wake_all();
    }

    #[track_caller]
    fn wait(&mut self, cx: &mut Context<'_>, reason: &'static str) {
        let stored = cx.store_waker_in_queue(&mut self.waiters, reason);
        assert!(stored, "too many tasks waiting on a single container");
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::test_util::init_tracing;
    use crate::{Dispatcher, Pendable, Task, pend_fn};
    use proptest::prelude::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::vec::Vec;

    type SharedCounter = Arc<spin::Mutex<AsyncCountAndCapacity<4>>>;

    fn counter(capacity: usize) -> SharedCounter {
        Arc::new(spin::Mutex::new(AsyncCountAndCapacity::new(capacity)))
    }

    #[test]
    fn has_space_reserves_once() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let counter = counter(4);
        let granted = Arc::new(spin::Mutex::new(Vec::new()));

        // two producers both want space in an empty container, only the first gets a reservation
        for i in 0..2 {
            let counter = counter.clone();
            let granted = granted.clone();
            dispatcher.post_owned(pend_fn(move |cx| {
                crate::ready!(counter.lock().pend_has_space(cx, 1));
                granted.lock().push(i);
                Poll::Ready(())
            }));
        }

        assert!(dispatcher.run_until_stalled().is_pending());
        assert_eq!(*granted.lock(), [0]);
        assert_eq!(counter.lock().pushes_reserved(), 1);
        assert_eq!(counter.lock().num_waiters(), 1);

        // the push fulfills the reservation and lets the second producer in
        counter.lock().increment_count(1);
        assert_eq!(counter.lock().pushes_reserved(), 0);
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(*granted.lock(), [0, 1]);
        assert_eq!(counter.lock().pushes_reserved(), 1);
    }

    #[test]
    fn not_empty_reserves_once() {
        let dispatcher = Dispatcher::new();
        let counter = counter(4);
        let popped = Arc::new(spin::Mutex::new(Vec::new()));

        for i in 0..3 {
            let counter = counter.clone();
            let popped = popped.clone();
            dispatcher.post_owned(pend_fn(move |cx| {
                let mut counter = counter.lock();
                crate::ready!(counter.pend_not_empty(cx));
                counter.decrement_count(1);
                popped.lock().push(i);
                Poll::Ready(())
            }));
        }
        assert!(dispatcher.run_until_stalled().is_pending());
        assert_eq!(counter.lock().num_waiters(), 3);

        counter.lock().increment_count(2);
        assert!(dispatcher.run_until_stalled().is_pending());
        // exactly two consumers got an element, the third went back to sleep
        assert_eq!(*popped.lock(), [0, 1]);
        assert_eq!(counter.lock().count(), 0);
        assert!(!counter.lock().pop_reserved());
        assert_eq!(counter.lock().num_waiters(), 1);
    }

    #[test]
    fn count_never_exceeds_capacity() {
        let mut counter = AsyncCountAndCapacity::<1>::new(3);
        counter.increment_count(2);
        assert_eq!(counter.available(), 1);
        counter.set_capacity(2);
        assert!(counter.is_full());
        counter.set_count(0);
        assert!(counter.is_empty());
        assert_eq!(counter.capacity(), 2);
    }

    #[test]
    #[should_panic(expected = "free slots")]
    fn overfilling_panics() {
        let mut counter = AsyncCountAndCapacity::<1>::new(2);
        counter.increment_count(3);
    }

    #[test]
    #[should_panic(expected = "waiting for 3 free slots")]
    fn waiting_for_more_than_capacity_panics() {
        let dispatcher = Dispatcher::new();
        let mut counter = AsyncCountAndCapacity::<1>::new(2);
        let mut pendable = pend_fn(|cx| counter.pend_has_space(cx, 3));
        let _ = dispatcher.run_pendable_until_stalled(&mut pendable);
    }

    #[test]
    fn waiters_that_went_away_free_their_slot() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(spin::Mutex::new(AsyncCountAndCapacity::<1>::new(1)));

        let first = dispatcher.post_owned(pend_fn({
            let counter = counter.clone();
            move |cx| counter.lock().pend_not_empty(cx)
        }));
        assert!(dispatcher.run_until_stalled().is_pending());
        assert!(dispatcher.deregister(first));
        assert_eq!(dispatcher.num_registered(), 0);
        // the dead waker is still queued until someone needs its slot
        assert_eq!(counter.lock().num_waiters(), 1);

        let second = Task::new(pend_fn({
            let counter = counter.clone();
            move |cx| counter.lock().pend_not_empty(cx)
        }));
        dispatcher.post(&second);
        assert!(dispatcher.run_until_stalled().is_pending());
        assert_eq!(counter.lock().num_waiters(), 1);

        counter.lock().increment_count(1);
        assert!(dispatcher.run_until_stalled().is_ready());
        assert!(counter.lock().pop_reserved());
    }

    const MAX_TASKS: usize = 8;
    const CAPACITY: usize = 4;

    type BigCounter = Arc<spin::Mutex<AsyncCountAndCapacity<MAX_TASKS>>>;

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Produce(usize),
        Consume,
        Run,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (1..CAPACITY).prop_map(Op::Produce),
            Just(Op::Consume),
            Just(Op::Run),
        ]
    }

    /// How many tasks currently hold a push and a pop reservation.
    #[derive(Debug, Default)]
    struct Holders {
        push: AtomicUsize,
        pop: AtomicUsize,
    }

    /// Reserves `num` slots in one poll and fills them in the next.
    fn producer(
        counter: BigCounter,
        holders: Arc<Holders>,
        num: usize,
    ) -> impl Pendable<Output = ()> + Send + 'static {
        let mut reserved = false;
        pend_fn(move |cx| {
            let mut counter = counter.lock();
            if !reserved {
                crate::ready!(counter.pend_has_space(cx, num));
                assert_eq!(holders.push.fetch_add(1, Ordering::SeqCst), 0);
                assert!(counter.count() + counter.pushes_reserved() <= counter.capacity());
                reserved = true;
                cx.re_enqueue();
                return Poll::Pending;
            }

            holders.push.fetch_sub(1, Ordering::SeqCst);
            counter.increment_count(num);
            Poll::Ready(())
        })
    }

    /// Reserves an element in one poll and takes it in the next.
    fn consumer(
        counter: BigCounter,
        holders: Arc<Holders>,
    ) -> impl Pendable<Output = ()> + Send + 'static {
        let mut reserved = false;
        pend_fn(move |cx| {
            let mut counter = counter.lock();
            if !reserved {
                crate::ready!(counter.pend_not_empty(cx));
                assert_eq!(holders.pop.fetch_add(1, Ordering::SeqCst), 0);
                assert!(counter.count() > 0);
                reserved = true;
                cx.re_enqueue();
                return Poll::Pending;
            }

            holders.pop.fetch_sub(1, Ordering::SeqCst);
            counter.decrement_count(1);
            Poll::Ready(())
        })
    }

    fn check_invariants(counter: &AsyncCountAndCapacity<MAX_TASKS>, holders: &Holders) {
        assert!(counter.count() <= counter.capacity());
        assert!(counter.count() + counter.pushes_reserved() <= counter.capacity());
        assert!(!counter.pop_reserved() || counter.count() > 0);
        assert_eq!(
            counter.pushes_reserved() > 0,
            holders.push.load(Ordering::SeqCst) == 1
        );
        assert_eq!(counter.pop_reserved(), holders.pop.load(Ordering::SeqCst) == 1);
    }

    proptest! {
        #[test]
        fn reservations_hold_for_any_sequence(ops in proptest::collection::vec(op(), 1..64)) {
            let dispatcher = Dispatcher::new();
            let counter: BigCounter =
                Arc::new(spin::Mutex::new(AsyncCountAndCapacity::new(CAPACITY)));
            let holders = Arc::new(Holders::default());

            for op in ops {
                let room = dispatcher.num_registered() < MAX_TASKS;
                match op {
                    Op::Produce(num) if room => {
                        dispatcher.post_owned(producer(counter.clone(), holders.clone(), num));
                    }
                    Op::Consume if room => {
                        dispatcher.post_owned(consumer(counter.clone(), holders.clone()));
                    }
                    Op::Produce(_) | Op::Consume => {}
                    Op::Run => {
                        let _ = dispatcher.run_until_stalled();
                    }
                }

                check_invariants(&counter.lock(), &holders);
            }

            let _ = dispatcher.run_until_stalled();
            check_invariants(&counter.lock(), &holders);
        }
    }
}
