// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Context, Pendable, Poll};
use core::fmt;

/// Runs a pendable to completion once and hands its output to a callback.
///
/// The callback runs on the dispatch thread, inside the poll that produced the value. After that
/// the adapter is done and reports [`Poll::Ready`] on every further poll without touching the
/// inner pendable again.
pub struct OneshotCallback<P, F> {
    pendable: P,
    callback: Option<F>,
}

impl<P, F> OneshotCallback<P, F>
where
    P: Pendable,
    F: FnOnce(P::Output),
{
    pub fn new(pendable: P, callback: F) -> Self {
        Self {
            pendable,
            callback: Some(callback),
        }
    }

    /// Returns `true` once the callback has been invoked.
    pub fn is_done(&self) -> bool {
        self.callback.is_none()
    }

    pub fn inner(&self) -> &P {
        &self.pendable
    }
}

impl<P, F> Pendable for OneshotCallback<P, F>
where
    P: Pendable,
    F: FnOnce(P::Output),
{
    type Output = ();

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll {
        if self.callback.is_none() {
            return Poll::Ready(());
        }

        let value = crate::ready!(self.pendable.pend(cx));
        if let Some(callback) = self.callback.take() {
            callback(value);
        }
        Poll::Ready(())
    }
}

impl<P: fmt::Debug, F> fmt::Debug for OneshotCallback<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneshotCallback")
            .field("pendable", &self.pendable)
            .field("done", &self.callback.is_none())
            .finish()
    }
}

/// Repeatedly polls a pendable, handing every value it produces to a callback.
///
/// Each time the inner pendable is ready the callback is invoked and the task re-enqueues itself so
/// the pendable is polled again on the next dispatcher pass. The adapter itself never completes,
/// stop it by deregistering the task (or wrap it in a [`Cancellable`][super::Cancellable]).
pub struct RecurringCallback<P, F> {
    pendable: P,
    callback: F,
}

impl<P, F> RecurringCallback<P, F>
where
    P: Pendable,
    F: FnMut(P::Output),
{
    pub fn new(pendable: P, callback: F) -> Self {
        Self { pendable, callback }
    }

    pub fn inner(&self) -> &P {
        &self.pendable
    }
}

impl<P, F> Pendable for RecurringCallback<P, F>
where
    P: Pendable,
    F: FnMut(P::Output),
{
    type Output = ();

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll {
        let value = crate::ready!(self.pendable.pend(cx));
        (self.callback)(value);
        cx.re_enqueue();
        Poll::Pending
    }
}

impl<P: fmt::Debug, F> fmt::Debug for RecurringCallback<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecurringCallback")
            .field("pendable", &self.pendable)
            .finish_non_exhaustive()
    }
}

#[cfg(all(test, not(loom)))]
mod tests {
    use super::*;
    use crate::sync::value;
    use crate::test_util::init_tracing;
    use crate::{Dispatcher, Task, TaskState, pend_fn};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn oneshot_delivers_value_once() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let (provider, receiver) = value::channel::<u32>();
        let received = Arc::new(spin::Mutex::new(None));

        let task = Task::new(OneshotCallback::new(
            pend_fn({
                let mut receiver = receiver;
                move |cx| receiver.pend_value(cx)
            }),
            {
                let received = received.clone();
                move |value| *received.lock() = Some(value)
            },
        ));
        dispatcher.post(&task);

        assert!(dispatcher.run_until_stalled().is_pending());
        assert!(!task.body().is_done());
        assert_eq!(*received.lock(), None);

        provider.set(42).unwrap();
        assert!(dispatcher.run_until_stalled().is_ready());
        assert!(task.body().is_done());
        assert_eq!(*received.lock(), Some(Ok(42)));
        assert!(!task.is_registered());
    }

    #[test]
    fn oneshot_ignores_values_after_completion() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let (provider, receiver) = value::channel::<u32>();
        let calls = Arc::new(AtomicUsize::new(0));

        let task = Task::new(OneshotCallback::new(
            pend_fn({
                let mut receiver = receiver;
                move |cx| receiver.pend_value(cx)
            }),
            {
                let calls = calls.clone();
                move |value| {
                    assert_eq!(value, Ok(1));
                    calls.fetch_add(1, Ordering::Relaxed);
                }
            },
        ));
        dispatcher.post(&task);

        provider.set(1).unwrap();
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(!task.is_registered());

        // the receiver lives on inside the finished adapter, so the second value is accepted but
        // nobody is waiting for it
        provider.set(2).unwrap();
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(dispatcher.num_registered(), 0);

        // reposting the finished adapter completes immediately without touching the receiver
        dispatcher.post(&task);
        assert!(dispatcher.run_until_stalled().is_ready());
        assert_eq!(calls.load(Ordering::Relaxed), 1);
        assert!(task.body().is_done());
    }

    #[test]
    fn recurring_delivers_every_wake() {
        let _trace = init_tracing();
        let dispatcher = Dispatcher::new();
        let (provider, receiver) = value::channel::<usize>();
        let seen = Arc::new(spin::Mutex::new(Vec::new()));

        let task = Task::new(RecurringCallback::new(
            pend_fn({
                let mut receiver = receiver;
                move |cx| receiver.pend_value(cx)
            }),
            {
                let seen = seen.clone();
                move |value| seen.lock().push(value.unwrap())
            },
        ));
        dispatcher.post(&task);
        assert!(dispatcher.run_until_stalled().is_pending());

        for value in 0..10 {
            provider.set(value).unwrap();
            assert!(dispatcher.run_until_stalled().is_pending());
            assert_eq!(task.state(), TaskState::Sleeping);
        }

        assert_eq!(*seen.lock(), (0..10).collect::<Vec<_>>());
        assert!(task.is_registered());

        task.deregister();
        assert!(dispatcher.run_until_stalled().is_ready());
    }

    #[test]
    fn recurring_runs_until_deregistered() {
        let dispatcher = Dispatcher::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let mut next = 0_usize;
        let task = Task::new(RecurringCallback::new(
            pend_fn(move |_cx| {
                next += 1;
                Poll::Ready(next)
            }),
            {
                let counter = counter.clone();
                move |value| counter.store(value, Ordering::Relaxed)
            },
        ));
        dispatcher.post(&task);

        for _ in 0..10 {
            // drive exactly one pass at a time through the target-task entry point
            let polled = dispatcher.tasks_polled();
            let mut step = pend_fn(|_cx| Poll::Ready(()));
            assert!(dispatcher.run_pendable_until_stalled(&mut step).is_ready());
            assert!(dispatcher.tasks_polled() > polled);
        }

        assert_eq!(counter.load(Ordering::Relaxed), 10);
        assert!(task.is_registered());

        task.deregister();
        assert_eq!(dispatcher.run_until_stalled(), Poll::Ready(()));
    }
}
