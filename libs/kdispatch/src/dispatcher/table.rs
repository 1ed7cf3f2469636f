// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::task::TaskId;
use alloc::vec::Vec;
use wasmtime_slab::{Id, Slab};

/// Registered tasks, keyed by [`TaskId`].
///
/// The slab hands freed slots out again, so every entry remembers the generation it was inserted
/// with. A stale [`TaskId`] (held by a waker or a task's registration) carries an older generation
/// and stops resolving as soon as its task is gone.
pub(super) struct TaskTable<T> {
    slab: Slab<Entry<T>>,
    next_generation: u32,
    /// One past the highest slot index ever handed out, the slab never shrinks below it.
    extent: u32,
}

struct Entry<T> {
    generation: u32,
    value: T,
}

impl<T> TaskTable<T> {
    pub(super) fn with_capacity(capacity: usize) -> Self {
        Self {
            slab: Slab::with_capacity(capacity),
            next_generation: 0,
            extent: 0,
        }
    }

    pub(super) fn len(&self) -> usize {
        self.slab.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(super) fn insert(&mut self, value: T) -> TaskId {
        let generation = self.next_generation;
        self.next_generation = generation.wrapping_add(1);

        let index = self.slab.alloc(Entry { generation, value }).into_raw();
        self.extent = self.extent.max(index + 1);
        TaskId::new(index, generation)
    }

    pub(super) fn get(&self, id: TaskId) -> Option<&T> {
        let slot = self.slot(id)?;
        self.slab
            .get(slot)
            .filter(|entry| entry.generation == id.generation())
            .map(|entry| &entry.value)
    }

    pub(super) fn get_mut(&mut self, id: TaskId) -> Option<&mut T> {
        let slot = self.slot(id)?;
        self.slab
            .get_mut(slot)
            .filter(|entry| entry.generation == id.generation())
            .map(|entry| &mut entry.value)
    }

    pub(super) fn contains(&self, id: TaskId) -> bool {
        self.get(id).is_some()
    }

    pub(super) fn remove(&mut self, id: TaskId) -> Option<T> {
        self.get(id)?;
        let slot = self.slot(id)?;
        Some(self.slab.dealloc(slot).value)
    }

    /// Removes every task, invalidating all outstanding IDs.
    pub(super) fn take_all(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len());
        for index in 0..self.extent {
            let slot = Id::from_raw(index);
            if self.slab.get(slot).is_some() {
                out.push(self.slab.dealloc(slot).value);
            }
        }
        out
    }

    /// IDs minted by a different dispatcher may point past the end of the slab.
    fn slot(&self, id: TaskId) -> Option<Id> {
        (id.index() < self.extent).then(|| Id::from_raw(id.index()))
    }
}
