// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::loom::sync::Mutex;
use crate::{Context, Pendable, Poll, Waker, try_store_waker};
use alloc::sync::Arc;
use core::fmt;

/// Wraps a pendable so that it can be stopped from the outside through a [`CancelHandle`].
///
/// The cancellation flag is checked before every poll of the inner pendable: once
/// [`CancelHandle::cancel`] was called the wrapper completes with `None` without polling the
/// inner pendable again. Otherwise it completes with `Some(output)` when the inner pendable does.
pub struct Cancellable<P> {
    pendable: P,
    state: Arc<Mutex<CancelState>>,
}

/// Requests cancellation of a [`Cancellable`], may be cloned and sent to other threads.
#[derive(Clone)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

#[derive(Default)]
struct CancelState {
    cancelled: bool,
    waker: Waker,
}

impl<P: Pendable> Cancellable<P> {
    pub fn new(pendable: P) -> (Self, CancelHandle) {
        let state = Arc::new(Mutex::new(CancelState::default()));
        let handle = CancelHandle {
            state: state.clone(),
        };
        (Self { pendable, state }, handle)
    }
}

impl<P> Cancellable<P> {
    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl<P: Pendable> Pendable for Cancellable<P> {
    type Output = Option<P::Output>;

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        {
            let mut state = self.state.lock();
            if state.cancelled {
                tracing::trace!(task.id = %cx.task_id(), "pendable cancelled");
                return Poll::Ready(None);
            }

            // a cancel request has to be able to wake us even if the inner pendable sleeps
            if !try_store_waker!(cx, state.waker, "cancellation") {
                tracing::trace!("cancel waker slot is held by another task");
            }
        }

        self.pendable.pend(cx).map(Some)
    }
}

impl<P: fmt::Debug> fmt::Debug for Cancellable<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cancellable")
            .field("pendable", &self.pendable)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelHandle {
    /// Request cancellation and wake the task driving the [`Cancellable`].
    ///
    /// Calling this more than once has no further effect.
    pub fn cancel(&self) {
        let waker = {
            let mut state = self.state.lock();
            if state.cancelled {
                return;
            }
            state.cancelled = true;
            core::mem::take(&mut state.waker)
        };

        waker.wake();
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::value;
    use crate::task::{OneshotCallback, RecurringCallback};
    use crate::test_util::init_tracing;
    use crate::{Dispatcher, Task, pend_fn};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn cancel_before_first_poll() {
        let dispatcher = Dispatcher::new();
        let polls = Arc::new(AtomicUsize::new(0));

        let (mut cancellable, handle) = Cancellable::new(pend_fn({
            let polls = polls.clone();
            move |_cx| {
                polls.fetch_add(1, Ordering::Relaxed);
                Poll::Ready(())
            }
        }));
        handle.cancel();

        assert_eq!(
            dispatcher.run_pendable_until_stalled(&mut cancellable),
            Poll::Ready(None)
        );
        assert_eq!(polls.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn cancel_stops_recurring_task() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));

        // produces a value every time it is polled
        let (cancellable, handle) = Cancellable::new(RecurringCallback::new(
            pend_fn(|_cx| Poll::Ready(())),
            {
                let counter = counter.clone();
                move |()| {
                    counter.fetch_add(1, Ordering::Relaxed);
                }
            },
        ));
        let task = Task::new(cancellable);
        dispatcher.post(&task);

        let remote = thread::spawn({
            let counter = counter.clone();
            move || {
                while counter.load(Ordering::Relaxed) < 5 {
                    thread::yield_now();
                }
                handle.cancel();
            }
        });

        dispatcher.run_to_completion();
        remote.join().unwrap();

        assert!(task.body().is_cancelled());
        assert!(!task.is_registered());
        assert!(counter.load(Ordering::Relaxed) >= 5);
    }

    #[test]
    fn cancel_wins_over_a_value_ready_in_the_same_pass() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let (provider, receiver) = value::channel::<u32>();
        let fired = Arc::new(AtomicUsize::new(0));

        let (cancellable, handle) = Cancellable::new(OneshotCallback::new(
            pend_fn({
                let mut receiver = receiver;
                move |cx| receiver.pend_value(cx)
            }),
            {
                let fired = fired.clone();
                move |_value| {
                    fired.fetch_add(1, Ordering::Relaxed);
                }
            },
        ));
        let task = Task::new(cancellable);
        dispatcher.post(&task);
        assert!(dispatcher.run_until_stalled().is_pending());

        provider.set(3).unwrap();
        handle.cancel();
        assert_eq!(dispatcher.run_until_stalled(), Poll::Ready(()));

        assert_eq!(fired.load(Ordering::Relaxed), 0);
        assert!(task.body().is_cancelled());
        assert!(!task.is_registered());
    }

    #[test]
    fn cancelled_pendable_completes_with_none() {
        let dispatcher = Dispatcher::new();
        let (provider, receiver) = value::channel::<u32>();

        let (mut cancellable, handle) = Cancellable::new(pend_fn({
            let mut receiver = receiver;
            move |cx| receiver.pend_value(cx)
        }));

        provider.set(3).unwrap();
        handle.cancel();
        assert_eq!(
            dispatcher.run_pendable_until_stalled(&mut cancellable),
            Poll::Ready(None)
        );
    }

    #[test]
    fn cancel_wakes_sleeping_task() {
        let dispatcher = Dispatcher::new();
        let (cancellable, handle) = Cancellable::new(pend_fn(|_cx| Poll::<u8>::Pending));
        let task = Task::new(cancellable);

        dispatcher.post(&task);
        // only the cancellation waker keeps the task registered
        assert!(dispatcher.run_until_stalled().is_pending());
        assert!(task.is_registered());

        handle.cancel();
        handle.cancel();
        assert!(handle.is_cancelled());
        assert_eq!(dispatcher.run_until_stalled(), Poll::Ready(()));
        assert!(!task.is_registered());
    }
}
