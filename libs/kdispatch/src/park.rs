// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Blocking the dispatch thread while every task is asleep.
//!
//! [`Dispatcher::run_to_completion`][crate::Dispatcher::run_to_completion] parks through a
//! [`Park`] implementation once no task is ready, and [`Waker::wake`][crate::Waker::wake] unparks
//! it. Implementations must have *token* semantics: an `unpark` that happens before the
//! corresponding `park` makes that `park` return immediately, otherwise a wakeup racing with the
//! dispatcher going to sleep would be lost.

use crate::loom::hint;
use crate::loom::sync::atomic::{AtomicBool, Ordering};
use core::fmt;

pub trait Park: Send + Sync {
    /// Block the current thread until [`unpark`][Park::unpark] is called.
    ///
    /// May return spuriously.
    fn park(&self);

    /// Wake up the parked thread, or make its next `park` call return immediately.
    ///
    /// This must be callable from any thread and from interrupt context.
    fn unpark(&self);
}

/// Parks by busy-waiting on a flag. Useful on targets without any thread support where the
/// wakeup comes from an interrupt handler.
pub struct SpinPark {
    notified: AtomicBool,
}

impl SpinPark {
    pub fn new() -> Self {
        Self {
            notified: AtomicBool::new(false),
        }
    }
}

impl Default for SpinPark {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SpinPark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinPark")
            .field("notified", &self.notified.load(Ordering::Relaxed))
            .finish()
    }
}

impl Park for SpinPark {
    fn park(&self) {
        while !self.notified.swap(false, Ordering::Acquire) {
            hint::spin_loop();
        }
    }

    fn unpark(&self) {
        self.notified.store(true, Ordering::Release);
    }
}

cfg_if::cfg_if! {
    if #[cfg(feature = "std")] {
        pub use std_park::StdPark;

        /// The parker [`Dispatcher::new`][crate::Dispatcher::new] uses.
        pub type DefaultPark = StdPark;
    } else {
        /// The parker [`Dispatcher::new`][crate::Dispatcher::new] uses.
        pub type DefaultPark = SpinPark;
    }
}

#[cfg(feature = "std")]
mod std_park {
    use super::Park;
    use crate::loom::sync::{Condvar, StdMutex};
    use core::fmt;
    use std::sync::PoisonError;

    /// Parks the calling OS thread on a condition variable.
    ///
    /// Unlike `std::thread::park` this isn't tied to a particular thread, so the same dispatcher
    /// may be driven from different threads over its lifetime.
    pub struct StdPark {
        notified: StdMutex<bool>,
        condvar: Condvar,
    }

    impl StdPark {
        pub fn new() -> Self {
            Self {
                notified: StdMutex::new(false),
                condvar: Condvar::new(),
            }
        }
    }

    impl Default for StdPark {
        fn default() -> Self {
            Self::new()
        }
    }

    impl fmt::Debug for StdPark {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("StdPark").finish_non_exhaustive()
        }
    }

    impl Park for StdPark {
        fn park(&self) {
            tracing::trace!("parking dispatch thread...");
            let mut notified = self
                .notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            while !*notified {
                notified = self
                    .condvar
                    .wait(notified)
                    .unwrap_or_else(PoisonError::into_inner);
            }
            *notified = false;
            tracing::trace!("dispatch thread unparked");
        }

        fn unpark(&self) {
            let mut notified = self
                .notified
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            *notified = true;
            self.condvar.notify_one();
        }
    }
}
