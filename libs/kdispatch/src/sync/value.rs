// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! A single-reader slot for values produced outside the dispatcher.
//!
//! This is the shape of most event sources: an interrupt handler, a driver callback or another
//! thread calls [`ValueProvider::set`], which stores the value and wakes the task waiting in
//! [`ValueReceiver::pend_value`]. Setting a new value before the previous one was received
//! overwrites it.

use crate::error::{Closed, RecvError};
use crate::loom::sync::Mutex;
use crate::{Context, Poll, Waker, try_store_waker};
use alloc::sync::Arc;
use core::fmt;

pub fn channel<T>() -> (ValueProvider<T>, ValueReceiver<T>) {
    let inner = Arc::new(Mutex::new(Inner {
        value: None,
        waker: Waker::new(),
        provider_closed: false,
        receiver_closed: false,
    }));

    let provider = ValueProvider {
        inner: inner.clone(),
    };
    let receiver = ValueReceiver { inner };

    (provider, receiver)
}

pub struct ValueProvider<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

pub struct ValueReceiver<T> {
    inner: Arc<Mutex<Inner<T>>>,
}

struct Inner<T> {
    value: Option<T>,
    waker: Waker,
    provider_closed: bool,
    receiver_closed: bool,
}

// === impl ValueProvider ===

impl<T> ValueProvider<T> {
    /// Store `value` and wake the waiting task, if any.
    ///
    /// This never blocks on the dispatcher and may be called from any thread.
    ///
    /// # Errors
    ///
    /// Returns [`Closed`] if the [`ValueReceiver`] has been dropped.
    pub fn set(&self, value: T) -> Result<(), Closed> {
        let waker = {
            let mut inner = self.inner.lock();
            if inner.receiver_closed {
                return Err(Closed(()));
            }
            inner.value = Some(value);
            core::mem::take(&mut inner.waker)
        };

        tracing::trace!(waker = ?waker, "value set");
        waker.wake();
        Ok(())
    }

    /// Returns `true` if the receiver has been dropped.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().receiver_closed
    }
}

impl<T> Drop for ValueProvider<T> {
    fn drop(&mut self) {
        let waker = {
            let mut inner = self.inner.lock();
            inner.provider_closed = true;
            core::mem::take(&mut inner.waker)
        };
        waker.wake();
    }
}

impl<T> fmt::Debug for ValueProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueProvider")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

// === impl ValueReceiver ===

impl<T> ValueReceiver<T> {
    /// Take the current value, or register the calling task to be woken once one is set.
    ///
    /// A value that was set before the provider was dropped is still delivered.
    ///
    /// # Errors
    ///
    /// - [`RecvError::Closed`] if the provider was dropped and no value is left.
    /// - [`RecvError::Busy`] if a different task is already waiting on this receiver.
    pub fn pend_value(&mut self, cx: &mut Context<'_>) -> Poll<Result<T, RecvError>> {
        let mut inner = self.inner.lock();

        if let Some(value) = inner.value.take() {
            return Poll::Ready(Ok(value));
        }
        if inner.provider_closed {
            return Poll::Ready(Err(RecvError::Closed));
        }

        if try_store_waker!(cx, inner.waker, "waiting for value") {
            Poll::Pending
        } else {
            Poll::Ready(Err(RecvError::Busy))
        }
    }

    /// Take the current value without waiting.
    pub fn try_take(&mut self) -> Option<T> {
        self.inner.lock().value.take()
    }
}

impl<T> Drop for ValueReceiver<T> {
    fn drop(&mut self) {
        let waker = {
            let mut inner = self.inner.lock();
            inner.receiver_closed = true;
            core::mem::take(&mut inner.waker)
        };
        drop(waker);
    }
}

impl<T> fmt::Debug for ValueReceiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValueReceiver").finish_non_exhaustive()
    }
}
