use crate::runtime::scheduler::Scheduler;
use crate::runtime::task::TaskId;
use crate::unwind::UnwindState;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// The task currently being polled on this thread.
pub(crate) struct Current {
    /// Scheduler that owns the task.
    pub(crate) scheduler: Rc<Scheduler>,

    /// Identity of the running task.
    pub(crate) task: TaskId,

    /// Whether the running task may suspend.
    pub(crate) may_block: bool,

    /// Unwind bookkeeping of the running task.
    pub(crate) unwind: Rc<RefCell<UnwindState>>,
}

thread_local! {
    /// The running task, installed by the dispatcher for the duration of a poll.
    ///
    /// Scoped rather than global: several runtimes can live on one thread, and
    /// each poll sees only the scheduler that owns the task being polled.
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
}

/// Installs `current` for the duration of `f`.
///
/// The previous context is restored afterwards, so a task polled directly from
/// inside another task's poll (a host callback) sees its own context and hands
/// the outer one back when it returns.
pub(crate) fn enter<R>(current: Current, f: impl FnOnce() -> R) -> R {
    struct Restore(Option<Current>);

    impl Drop for Restore {
        fn drop(&mut self) {
            let prev = self.0.take();
            CURRENT.with(|cell| *cell.borrow_mut() = prev);
        }
    }

    let prev = CURRENT.with(|cell| cell.borrow_mut().replace(current));
    let _restore = Restore(prev);

    f()
}

/// Scheduler of the running task, if any.
pub(crate) fn scheduler() -> Option<Rc<Scheduler>> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|c| c.scheduler.clone()))
}

/// Identity of the running task, if any.
pub(crate) fn task_id() -> Option<TaskId> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|c| c.task))
}

/// Whether the running code may suspend.
///
/// Code running outside of any task is driven by some other executor and is
/// allowed to suspend.
pub(crate) fn may_block() -> bool {
    CURRENT.with(|cell| cell.borrow().as_ref().is_none_or(|c| c.may_block))
}

/// Unwind bookkeeping of the running task, if any.
pub(crate) fn unwind_state() -> Option<Rc<RefCell<UnwindState>>> {
    CURRENT.with(|cell| cell.borrow().as_ref().map(|c| c.unwind.clone()))
}

/// A parked task that a resumer may schedule ahead of the run queue.
///
/// Holds the scheduler weakly: the task owning the parked future keeps the
/// scheduler's records alive, not the other way around.
pub(crate) struct DirectWake {
    scheduler: Weak<Scheduler>,
    task: TaskId,
}

impl DirectWake {
    /// Captures the running task, if any.
    pub(crate) fn capture() -> Option<Self> {
        CURRENT.with(|cell| {
            cell.borrow().as_ref().map(|c| Self {
                scheduler: Rc::downgrade(&c.scheduler),
                task: c.task,
            })
        })
    }

    /// Runs the captured task next, if its runtime is still alive.
    pub(crate) fn dispatch(self) {
        if let Some(scheduler) = self.scheduler.upgrade() {
            scheduler.wake_direct(self.task);
        }
    }
}
