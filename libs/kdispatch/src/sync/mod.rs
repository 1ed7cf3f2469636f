// Copyright 2025 Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Building blocks for things tasks wait on.

mod count_and_capacity;
mod queue;
pub mod value;
mod waker_queue;

pub use count_and_capacity::AsyncCountAndCapacity;
pub use queue::BoundedQueue;
pub use waker_queue::WakerQueue;
