use super::builder::Config;
use super::scheduler::Scheduler;
use super::task::{Completion, Dispatch, JoinHandle, Launch, TaskId, TaskState};
use super::{Stats, Turn};
use crate::error::Error;
use crate::runtime::context;

use std::future::Future;
use std::rc::Rc;
use std::thread;
use std::time::Instant;

/// The main runtime handle.
///
/// `Runtime` is responsible for:
/// - spawning tasks,
/// - draining the run queue when the host asks for a [`turn`](Self::turn),
/// - providing blocking entry points ([`block_on`](Self::block_on) and
///   [`run`](Self::run)) that sleep the thread until the next timer when
///   nothing is runnable.
///
/// Dropping the runtime aborts every unfinished task; their join handles
/// resolve to [`JoinError::Aborted`](crate::error::JoinError::Aborted).
pub struct Runtime {
    handle: Handle,
}

impl Runtime {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            handle: Handle {
                scheduler: Scheduler::new(config),
            },
        }
    }

    /// A cloneable handle to this runtime.
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns a task onto the runtime.
    ///
    /// The task is queued and first runs during the next turn.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// runtime.spawn(async {
    ///     // background task
    /// });
    /// ```
    pub fn spawn<F>(&self, future: F) -> JoinHandle<<F::Output as Completion>::Value>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        self.handle.spawn(future)
    }

    /// Drains the run queue once. See [`Handle::turn`].
    pub fn turn(&self) -> Result<Turn, Error> {
        self.handle.turn()
    }

    /// Runs a future to completion, blocking the current thread.
    ///
    /// The future becomes the main task. Other tasks keep running while it
    /// waits; when none is runnable the thread sleeps until the next timer
    /// deadline.
    ///
    /// # Errors
    ///
    /// - [`Error::Unwound`] if an unwind escapes the main task,
    /// - [`Error::Deadlock`] if every task is parked and no timer is armed,
    /// - [`Error::Reentrant`] if called while this runtime is already
    ///   draining (from inside one of its tasks),
    /// - any fault recorded by the runtime's [`FaultPolicy`](super::FaultPolicy).
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// let value = runtime.block_on(async { Ok::<_, Unwinding>(42) })?;
    /// assert_eq!(value, 42);
    /// ```
    pub fn block_on<F>(&self, future: F) -> Result<<F::Output as Completion>::Value, Error>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        let scheduler = &self.handle.scheduler;

        if scheduler.is_draining() {
            return Err(Error::Reentrant);
        }

        let main = scheduler.launch(
            future,
            Launch {
                dispatch: Dispatch::Deferred,
                may_block: true,
                surface: true,
            },
        );

        loop {
            let turn = scheduler.turn();

            if let Some(outcome) = main.try_take() {
                return scheduler.settle(main.id(), outcome);
            }

            match turn? {
                Turn::Waiting(deadline) => sleep_until(deadline),
                Turn::Done | Turn::Idle => {
                    return Err(Error::Deadlock {
                        live: scheduler.live(),
                    });
                }
                Turn::Deferred => return Err(Error::Reentrant),
            }
        }
    }

    /// Drives the runtime until every task has finished.
    ///
    /// # Errors
    ///
    /// Fails with the first fault the runtime records, or
    /// [`Error::Deadlock`] when tasks remain but none can run.
    pub fn run(&self) -> Result<(), Error> {
        let scheduler = &self.handle.scheduler;

        if scheduler.is_draining() {
            return Err(Error::Reentrant);
        }

        loop {
            match scheduler.turn()? {
                Turn::Done => return Ok(()),
                Turn::Waiting(deadline) => sleep_until(deadline),
                Turn::Idle => {
                    return Err(Error::Deadlock {
                        live: scheduler.live(),
                    });
                }
                Turn::Deferred => return Err(Error::Reentrant),
            }
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.handle.scheduler.shutdown();
    }
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

/// A cloneable reference to a runtime, usable from host code and from tasks.
///
/// This is the host-integration hook: an embedding event loop calls
/// [`turn`](Self::turn) whenever it has delivered events, and
/// [`dispatch_callback`](Self::dispatch_callback) to run user code on behalf
/// of a host callback.
#[derive(Clone)]
pub struct Handle {
    scheduler: Rc<Scheduler>,
}

impl Handle {
    /// Handle of the runtime driving the current task.
    ///
    /// # Panics
    ///
    /// Panics if called outside the context of a running runtime.
    pub fn current() -> Self {
        Self::try_current().expect("Handle::current called outside of a runtime")
    }

    /// Handle of the runtime driving the current task, if any.
    pub fn try_current() -> Option<Self> {
        context::scheduler().map(|scheduler| Self { scheduler })
    }

    /// Spawns a task, appended to the run queue.
    pub fn spawn<F>(&self, future: F) -> JoinHandle<<F::Output as Completion>::Value>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        self.spawn_with(Dispatch::Deferred, future)
    }

    /// Spawns a task with an explicit [`Dispatch`] mode.
    pub fn spawn_with<F>(
        &self,
        dispatch: Dispatch,
        future: F,
    ) -> JoinHandle<<F::Output as Completion>::Value>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        self.scheduler.launch(future, Launch::background(dispatch))
    }

    /// Runs every queued task until the run queue is empty, including tasks
    /// queued while draining, then reports what the runtime waits for.
    ///
    /// A call made while a drain is already in progress (from inside a task)
    /// returns [`Turn::Deferred`] immediately.
    ///
    /// # Errors
    ///
    /// Returns the fault recorded during the drain, such as a deadlock or an
    /// uncaught unwind fatal under the [`FaultPolicy`](super::FaultPolicy).
    pub fn turn(&self) -> Result<Turn, Error> {
        self.scheduler.turn()
    }

    /// Runs `future` on behalf of a host callback.
    ///
    /// The future runs as a task that may not suspend and is polled exactly
    /// once, right away, even when a drain is in progress. Its value is
    /// returned directly.
    ///
    /// # Errors
    ///
    /// - [`Error::BlockingForbidden`] if the future tried to suspend; the
    ///   task is dropped,
    /// - [`Error::Unwound`] or [`Error::Panicked`] if it terminated abruptly.
    pub fn dispatch_callback<F>(&self, future: F) -> Result<<F::Output as Completion>::Value, Error>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        self.scheduler.dispatch_callback(future)
    }

    /// Task counters and queue lengths.
    pub fn stats(&self) -> Stats {
        self.scheduler.stats()
    }

    /// Scheduling state of a live task, or `None` once it has finished.
    pub fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.scheduler.task_state(id)
    }
}
