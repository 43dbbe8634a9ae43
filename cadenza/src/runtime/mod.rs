//! Core runtime components.
//!
//! This module contains the fundamental building blocks of the runtime:
//! - the task record and its join handle,
//! - the run queue and the dispatcher draining it,
//! - the host-integration hook and the blocking drivers,
//! - cooperative yielding.
//!
//! Everything runs on the thread that owns the [`Runtime`]. Tasks interleave
//! at their suspension points and never run in parallel.

mod core;
mod scheduler;
mod timer;

pub(crate) mod builder;
pub(crate) mod context;
pub(crate) mod yield_now;

pub mod task;

pub use self::core::{Handle, Runtime};

use std::time::Instant;

/// What the runtime waits for after a drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Turn {
    /// No task is left.
    Done,

    /// Every task is parked; the earliest timer fires at this instant.
    Waiting(Instant),

    /// Every task is parked and no timer is armed. Only the host can make
    /// progress, by resuming a task or dispatching a callback.
    Idle,

    /// A drain was already in progress, so this call did nothing.
    Deferred,
}

/// Snapshot of the scheduler's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stats {
    /// Tasks not yet finished.
    pub live: usize,

    /// Live tasks that are not parked.
    pub awake: usize,

    /// Tasks waiting in the run queue.
    pub queued: usize,

    /// Timers registered, including cancelled ones not yet purged.
    pub timers: usize,
}
