// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::dispatcher::Storage;
use crate::loom::sync::Mutex;
use crate::task::{Header, Task, TaskId};
use crate::{Dispatcher, Pendable};
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::any::type_name;
use core::panic::Location;

/// Configures the diagnostic metadata of tasks before they are created.
///
/// ```
/// # use kdispatch::{Dispatcher, Poll, TaskBuilder, pend_fn};
/// let dispatcher = Dispatcher::new();
/// let task = TaskBuilder::new()
///     .name("blinky")
///     .build(pend_fn(|_cx| Poll::Ready(())));
///
/// dispatcher.post(&task);
/// assert!(dispatcher.run_until_stalled().is_ready());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct TaskBuilder {
    location: Option<&'static Location<'static>>,
    name: Option<&'static str>,
    kind: &'static str,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    pub const fn new() -> Self {
        Self {
            location: None,
            name: None,
            kind: "task",
        }
    }

    /// Override the name of tasks created by this builder.
    ///
    /// By default, tasks are unnamed.
    pub fn name(mut self, name: &'static str) -> Self {
        self.name = Some(name);
        self
    }

    /// Override the kind string of tasks created by this builder, this will only show up
    /// in debug messages and spans.
    ///
    /// By default, tasks are of kind `"task"`.
    pub fn kind(mut self, kind: &'static str) -> Self {
        self.kind = kind;
        self
    }

    /// Override the source code location that will be associated with tasks created by this builder.
    ///
    /// By default, tasks will inherit the source code location of where they have been created.
    pub fn location(mut self, location: &'static Location<'static>) -> Self {
        self.location = Some(location);
        self
    }

    /// Create a caller-owned task, ready to be [posted][Dispatcher::post].
    #[inline]
    #[track_caller]
    pub fn build<P>(self, body: P) -> Arc<Task<P>>
    where
        P: Pendable + Send + 'static,
    {
        Arc::new(Task {
            header: Header {
                registration: Mutex::new(None),
                name: self.name,
                kind: self.kind,
                span: self.span(type_name::<P::Output>()),
            },
            body: Mutex::new(body),
        })
    }

    /// Move `pendable` into `dispatcher` as a self-owned task.
    ///
    /// See [`Dispatcher::post_owned`].
    #[inline]
    #[track_caller]
    pub fn post_owned<P>(self, dispatcher: &Dispatcher, pendable: P) -> TaskId
    where
        P: Pendable + Send + 'static,
    {
        let span = self.span(type_name::<P::Output>());
        dispatcher
            .shared
            .insert(Storage::Owned(Some(Box::new(pendable))), span)
    }

    /// The span every poll of the task is entered in. `task.id` is recorded once the task is posted.
    #[track_caller]
    pub(crate) fn span(&self, output: &'static str) -> tracing::Span {
        let loc = self.location.unwrap_or(Location::caller());
        tracing::trace_span!(
            "task",
            task.id = tracing::field::Empty,
            task.name = ?self.name,
            task.kind = self.kind,
            task.output = %output,
            loc.file = loc.file(),
            loc.line = loc.line(),
            loc.col = loc.column(),
        )
    }
}
