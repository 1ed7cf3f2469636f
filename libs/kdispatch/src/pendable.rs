// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::{Context, Poll};
use alloc::boxed::Box;
use core::fmt;

/// Something that can be asked to make progress.
///
/// A call to [`pend`][Pendable::pend] must never block. If it cannot complete it has to arrange
/// for the current task to be woken (by storing a [`Waker`][crate::Waker] obtained from `cx`)
/// before returning [`Poll::Pending`]. Pendables compose by calling each others `pend` directly.
pub trait Pendable {
    type Output;

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output>;
}

impl<P: Pendable + ?Sized> Pendable for &mut P {
    type Output = P::Output;

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        P::pend(self, cx)
    }
}

impl<P: Pendable + ?Sized> Pendable for Box<P> {
    type Output = P::Output;

    fn pend(&mut self, cx: &mut Context<'_>) -> Poll<Self::Output> {
        P::pend(self, cx)
    }
}

/// A [`Pendable`] backed by a closure, see [`pend_fn`].
#[derive(Clone)]
pub struct PendFn<F>(F);

/// Turns a closure into a [`Pendable`].
///
/// ```
/// # use kdispatch::{Poll, Pendable};
/// let mut polls = 0;
/// let _pendable = kdispatch::pend_fn(move |_cx| {
///     polls += 1;
///     Poll::Ready(polls)
/// });
/// ```
pub fn pend_fn<T, F>(f: F) -> PendFn<F>
where
    F: FnMut(&mut Context<'_>) -> Poll<T>,
{
    PendFn(f)
}

impl<T, F> Pendable for PendFn<F>
where
    F: FnMut(&mut Context<'_>) -> Poll<T>,
{
    type Output = T;

    #[inline]
    fn pend(&mut self, cx: &mut Context<'_>) -> Poll<T> {
        (self.0)(cx)
    }
}

impl<F> fmt::Debug for PendFn<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendFn").finish_non_exhaustive()
    }
}
