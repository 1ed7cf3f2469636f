// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Cooperative, single-dispatch-thread task scheduler.
//!
//! Tasks make incremental progress by implementing [`Pendable`]: every call either finishes with
//! [`Poll::Ready`] or registers a [`Waker`] through its [`Context`] and returns [`Poll::Pending`].
//! The [`Dispatcher`] polls woken tasks one at a time in FIFO order, wakers may be fired from any
//! thread (or interrupt handler) to make a sleeping task runnable again.
//!
//! Bounded containers participate through [`sync::AsyncCountAndCapacity`], which hands out
//! "has space"/"not empty" reservations so that a single push or pop never wakes more waiters
//! than can actually make progress.

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

mod context;
pub mod dispatcher;
pub mod error;
mod loom;
pub mod park;
mod pendable;
mod poll;
pub mod sync;
pub mod task;
#[cfg(test)]
mod test_util;
mod waker;

pub use context::Context;
pub use dispatcher::Dispatcher;
pub use pendable::{PendFn, Pendable, pend_fn};
pub use poll::Poll;
pub use task::{Task, TaskBuilder, TaskId, TaskState};
pub use waker::Waker;

/// The number of wakers a [`sync::WakerQueue`] holds when no explicit capacity is given.
pub const DEFAULT_WAKER_QUEUE_CAPACITY: usize = 8;
