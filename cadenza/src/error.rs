//! Error types surfaced by the runtime.
//!
//! Three families are kept apart:
//! - [`UsageError`] values are raised as unwinds when a primitive is misused
//!   (sending on a closed channel, closing twice, ...). They cannot be
//!   intercepted.
//! - [`JoinError`] is what a [`JoinHandle`](crate::task::JoinHandle) yields
//!   when its task did not return a value.
//! - [`Error`] is returned by the blocking drivers and the host hook when the
//!   runtime as a whole cannot make progress.

use crate::task::TaskId;
use crate::unwind::Unwinding;

/// Misuse of a runtime primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum UsageError {
    #[error("send on closed channel")]
    SendOnClosed,

    #[error("close of closed channel")]
    CloseOfClosed,

    #[error("select with more than one default case")]
    MultipleDefaults,
}

/// Reason a task finished without producing its value.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// An unwind reached the task boundary without being intercepted.
    #[error("task terminated by an uncaught unwind: {message}")]
    Unwound { message: String },

    /// The task body panicked.
    #[error("task panicked: {message}")]
    Panicked { message: String },

    /// The root frame intercepted an unwind, so there is no value to return.
    #[error("task recovered from an unwind at its root and returned no value")]
    Recovered,

    /// The runtime was dropped or failed before the task finished.
    #[error("task was aborted before completion")]
    Aborted,
}

/// A fatal runtime condition.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Every live task is parked and nothing can wake any of them.
    #[error("all tasks are asleep - deadlock ({live} live task(s))")]
    Deadlock { live: usize },

    /// An unwind escaped a task whose termination is fatal to the runtime.
    #[error("task {task} terminated by an uncaught unwind")]
    Unwound {
        task: TaskId,
        #[source]
        unwinding: Unwinding,
    },

    /// A task panicked while being polled.
    #[error("task {task} panicked: {message}")]
    Panicked { task: TaskId, message: String },

    /// Code running on behalf of a host callback tried to suspend.
    #[error("attempted to suspend inside a host callback that may not block")]
    BlockingForbidden,

    /// A blocking driver was entered while the runtime was already draining.
    #[error("the runtime is already being driven on this thread")]
    Reentrant,

    #[error(transparent)]
    Join(#[from] JoinError),
}
