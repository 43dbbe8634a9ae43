//! Time utilities.
//!
//! This module provides timers driven by the runtime:
//! - [`sleep`] suspends the current task until a deadline,
//! - [`timeout`] bounds the time a future may take.
//!
//! A task waiting on an armed timer is never reported as deadlocked; the
//! blocking drivers sleep the thread until the earliest deadline.

mod sleep;
mod timeout;

#[doc(inline)]
pub use sleep::{Sleep, sleep};

#[doc(inline)]
pub use timeout::{Elapsed, Timeout, timeout};
