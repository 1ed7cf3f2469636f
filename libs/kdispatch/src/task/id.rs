// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

/// An opaque ID that identifies a task registration on a [`Dispatcher`][crate::Dispatcher].
///
/// # Notes
///
/// - IDs are unique relative to other *currently registered* tasks of the same dispatcher. Once a
///   task completes or is deregistered its slot may be reused, but with a different generation,
///   so an old `TaskId` (and every [`Waker`][crate::Waker] holding it) will never refer to the
///   new occupant.
/// - Posting the same [`Task`][crate::Task] again after it completed yields a fresh ID.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct TaskId {
    index: u32,
    generation: u32,
}

impl TaskId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    pub(crate) const fn index(self) -> u32 {
        self.index
    }

    pub(crate) const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}
