// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use cfg_if::cfg_if;

cfg_if! {
    if #[cfg(loom)] {
        pub(crate) use loom::hint;
        pub(crate) use loom::model;
        pub(crate) use loom::thread;

        pub(crate) mod sync {
            pub use alloc::sync::{Arc, Weak};
            pub use loom::sync::atomic;
            pub use loom::sync::{Condvar, MutexGuard};
            use std::sync::PoisonError;

            /// A `loom` mutex with the `spin::Mutex` API.
            pub struct Mutex<T>(loom::sync::Mutex<T>);

            impl<T> Mutex<T> {
                pub fn new(data: T) -> Self {
                    Self(loom::sync::Mutex::new(data))
                }

                pub fn lock(&self) -> MutexGuard<'_, T> {
                    self.0.lock().unwrap_or_else(PoisonError::into_inner)
                }

                pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
                    self.0.try_lock().ok()
                }
            }

            /// The blocking mutex the std parker waits on.
            pub(crate) type StdMutex<T> = loom::sync::Mutex<T>;
        }
    } else {
        #[cfg(any(test, feature = "std"))]
        pub(crate) use std::thread;

        #[cfg(test)]
        #[inline(always)]
        pub(crate) fn model<R>(f: impl FnOnce() -> R) -> R {
            f()
        }

        pub(crate) mod hint {
            use spin::relax::{RelaxStrategy, Spin};

            #[inline(always)]
            pub(crate) fn spin_loop() {
                Spin::relax();
            }
        }

        pub(crate) mod sync {
            pub use alloc::sync::*;
            pub use core::sync::*;
            pub use spin::{Mutex, MutexGuard};

            #[cfg(feature = "std")]
            pub use std::sync::Condvar;

            /// The blocking mutex the std parker waits on.
            #[cfg(feature = "std")]
            pub(crate) type StdMutex<T> = std::sync::Mutex<T>;
        }
    }
}
