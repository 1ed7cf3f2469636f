// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

/// The result of a single attempt to make progress.
///
/// Unlike [`core::task::Poll`] the payload defaults to `()` so `Poll` on its own reads as
/// "done or not yet", which is what tasks and most collaborators report.
#[must_use = "this `Poll` may be `Pending`, which should be handled"]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Poll<T = ()> {
    /// Not done yet. Carries nothing.
    Pending,
    /// Done, with the produced value.
    Ready(T),
}

impl<T> Poll<T> {
    #[inline]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Poll::Ready(_))
    }

    #[inline]
    pub const fn is_pending(&self) -> bool {
        matches!(self, Poll::Pending)
    }

    /// Returns a reference to the ready value.
    ///
    /// # Panics
    ///
    /// Panics if `self` is [`Poll::Pending`].
    #[inline]
    #[track_caller]
    pub fn value(&self) -> &T {
        match self {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("called `Poll::value()` on a `Pending` value"),
        }
    }

    /// Returns a mutable reference to the ready value.
    ///
    /// # Panics
    ///
    /// Panics if `self` is [`Poll::Pending`].
    #[inline]
    #[track_caller]
    pub fn value_mut(&mut self) -> &mut T {
        match self {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("called `Poll::value_mut()` on a `Pending` value"),
        }
    }

    /// Consumes `self`, returning the ready value.
    ///
    /// # Panics
    ///
    /// Panics if `self` is [`Poll::Pending`].
    #[inline]
    #[track_caller]
    pub fn into_value(self) -> T {
        match self {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("called `Poll::into_value()` on a `Pending` value"),
        }
    }

    /// Converts into an [`Option`], discarding the distinction between "pending" and "no value".
    #[inline]
    pub fn ready(self) -> Option<T> {
        match self {
            Poll::Ready(value) => Some(value),
            Poll::Pending => None,
        }
    }

    #[inline]
    pub const fn as_ref(&self) -> Poll<&T> {
        match self {
            Poll::Ready(value) => Poll::Ready(value),
            Poll::Pending => Poll::Pending,
        }
    }

    #[inline]
    pub fn map<U, F>(self, f: F) -> Poll<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Poll::Ready(value) => Poll::Ready(f(value)),
            Poll::Pending => Poll::Pending,
        }
    }

    /// Projects to a payload-less `Poll`, keeping only whether progress completed.
    #[inline]
    pub fn readiness(&self) -> Poll {
        match self {
            Poll::Ready(_) => Poll::Ready(()),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<T, E> Poll<Result<T, E>> {
    /// Maps the success value of a ready result, leaving errors and `Pending` untouched.
    #[inline]
    pub fn map_ok<U, F>(self, f: F) -> Poll<Result<U, E>>
    where
        F: FnOnce(T) -> U,
    {
        self.map(|res| res.map(f))
    }
}

impl<T> From<T> for Poll<T> {
    #[inline]
    fn from(value: T) -> Self {
        Poll::Ready(value)
    }
}

impl<T> From<core::task::Poll<T>> for Poll<T> {
    #[inline]
    fn from(value: core::task::Poll<T>) -> Self {
        match value {
            core::task::Poll::Ready(value) => Poll::Ready(value),
            core::task::Poll::Pending => Poll::Pending,
        }
    }
}

impl<T> From<Poll<T>> for core::task::Poll<T> {
    #[inline]
    fn from(value: Poll<T>) -> Self {
        match value {
            Poll::Ready(value) => core::task::Poll::Ready(value),
            Poll::Pending => core::task::Poll::Pending,
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Poll<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Poll::Pending => f.write_str("Pending"),
            Poll::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
        }
    }
}

/// Extracts the value of a [`Poll::Ready`], returning [`Poll::Pending`] from the enclosing
/// function otherwise.
#[macro_export]
macro_rules! ready {
    ($e:expr $(,)?) => {
        match $e {
            $crate::Poll::Ready(value) => value,
            $crate::Poll::Pending => return $crate::Poll::Pending,
        }
    };
}
