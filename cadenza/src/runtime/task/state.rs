/// Scheduling state of a task.
///
/// A task is *awake* in every state except [`Suspended`](Self::Suspended);
/// the scheduler's awake counter tracks exactly that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Waiting in the run queue.
    Queued,

    /// Currently being polled.
    ///
    /// At most one task observes this state at a time.
    Running,

    /// Woken while running; re-queued as soon as the current poll returns.
    Notified,

    /// Parked until some wakeup arrives.
    Suspended,
}

impl TaskState {
    /// Whether the task counts as awake.
    pub fn is_awake(self) -> bool {
        !matches!(self, TaskState::Suspended)
    }
}
