use crate::error::JoinError;
use crate::runtime::context;
use crate::runtime::task::handle::{JoinHandle, JoinSlot, Joinable};
use crate::runtime::task::state::TaskState;
use crate::unwind::{self, UnwindState, Unwinding};

use std::cell::RefCell;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

/// Opaque identity of a task, unique within its runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// How a newly launched task reaches the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dispatch {
    /// Appended to the run queue; runs on this or the next turn.
    #[default]
    Deferred,

    /// Direct-call fast path: polled immediately when no turn is draining,
    /// otherwise placed at the front of the run queue so it runs before any
    /// other queued work without yielding to the host.
    Direct,
}

/// Output of a task body.
///
/// A task either returns nothing or returns `Result<T, Unwinding>`; an `Err`
/// that reaches the task boundary is an uncaught unwind.
pub trait Completion: 'static {
    /// Value handed to the [`JoinHandle`].
    type Value: 'static;

    fn into_result(self) -> Result<Self::Value, Unwinding>;
}

impl Completion for () {
    type Value = ();

    fn into_result(self) -> Result<(), Unwinding> {
        Ok(())
    }
}

impl<T: 'static> Completion for Result<T, Unwinding> {
    type Value = T;

    fn into_result(self) -> Result<T, Unwinding> {
        self
    }
}

/// How a task body ended.
pub(crate) enum TaskExit {
    /// The body returned a value.
    Returned,

    /// The root frame intercepted an unwind.
    Recovered,

    /// An unwind reached the task boundary.
    Unwound(Unwinding),
}

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = TaskExit>>>;

/// Per-task record owned by the scheduler.
pub(crate) struct TaskRecord {
    pub(crate) state: TaskState,

    /// False while the task runs on behalf of a host callback.
    pub(crate) may_block: bool,

    /// Whether an uncaught unwind is handed to a waiting host caller
    /// (`block_on`, `dispatch_callback`) instead of the fault policy.
    pub(crate) surface: bool,

    /// The wrapped body; taken out while the task is being polled.
    pub(crate) future: Option<TaskFuture>,

    pub(crate) unwind: Rc<RefCell<UnwindState>>,

    pub(crate) join: Rc<dyn Joinable>,
}

/// Options a task is launched with.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Launch {
    pub(crate) dispatch: Dispatch,
    pub(crate) may_block: bool,
    pub(crate) surface: bool,
}

impl Launch {
    pub(crate) const fn background(dispatch: Dispatch) -> Self {
        Self {
            dispatch,
            may_block: true,
            surface: false,
        }
    }
}

impl TaskRecord {
    /// Wraps `future` in a root frame and builds its record.
    ///
    /// The returned handle observes the task's value.
    pub(crate) fn new<F>(
        id: TaskId,
        future: F,
        launch: Launch,
    ) -> (Self, JoinHandle<<F::Output as Completion>::Value>)
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        let slot = Rc::new(JoinSlot::new());
        let body_slot = slot.clone();

        let body = async move {
            let exit = unwind::scope(async move { future.await.into_result() }).await;

            match exit {
                Ok(Some(value)) => {
                    body_slot.complete(Ok(value));
                    TaskExit::Returned
                }
                Ok(None) => {
                    body_slot.complete(Err(JoinError::Recovered));
                    TaskExit::Recovered
                }
                Err(unwinding) => {
                    body_slot.complete(Err(JoinError::Unwound {
                        message: unwinding.to_string(),
                    }));
                    TaskExit::Unwound(unwinding)
                }
            }
        };

        let record = Self {
            state: TaskState::Queued,
            may_block: launch.may_block,
            surface: launch.surface,
            future: Some(Box::pin(body)),
            unwind: Rc::new(RefCell::new(UnwindState::default())),
            join: slot.clone(),
        };

        (record, JoinHandle::new(id, slot))
    }
}

/// Spawns a task onto the runtime driving the current task.
///
/// The task is appended to the run queue. Its body may return `()` or
/// `Result<T, Unwinding>`; see [`Completion`].
///
/// # Panics
///
/// Panics if called outside the context of a running runtime.
///
/// # Examples
///
/// ```rust,ignore
/// let handle = task::spawn(async {
///     Ok::<_, Unwinding>(21 * 2)
/// });
/// assert_eq!(handle.await.unwrap(), 42);
/// ```
pub fn spawn<F>(future: F) -> JoinHandle<<F::Output as Completion>::Value>
where
    F: Future + 'static,
    F::Output: Completion,
{
    spawn_with(Dispatch::Deferred, future)
}

/// Spawns a task with an explicit [`Dispatch`] mode.
///
/// # Panics
///
/// Panics if called outside the context of a running runtime.
pub fn spawn_with<F>(dispatch: Dispatch, future: F) -> JoinHandle<<F::Output as Completion>::Value>
where
    F: Future + 'static,
    F::Output: Completion,
{
    let scheduler =
        context::scheduler().expect("spawn must be called within the context of a runtime");

    scheduler.launch(future, Launch::background(dispatch))
}

/// Identity of the task currently running, if any.
pub fn current() -> Option<TaskId> {
    context::task_id()
}
