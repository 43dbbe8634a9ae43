//! Task primitives.
//!
//! This module defines how the runtime represents, launches and joins tasks:
//! - task identity and scheduling state,
//! - the per-task record kept by the scheduler,
//! - join handles for awaiting task completion,
//! - the wakers handed to task bodies.
//!
//! Most users interact with this module through [`spawn`] and
//! [`JoinHandle`].

pub(crate) mod handle;
pub(crate) mod state;
pub(crate) mod waker;

mod core;

pub(crate) use self::core::{Launch, TaskExit, TaskRecord};

pub use self::core::{Completion, Dispatch, TaskId, current, spawn, spawn_with};
pub use handle::JoinHandle;
pub use state::TaskState;
