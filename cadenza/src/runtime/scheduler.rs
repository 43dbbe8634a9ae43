use crate::error::{Error, JoinError};
use crate::runtime::builder::{Config, FaultPolicy};
use crate::runtime::context::{self, Current};
use crate::runtime::task::waker::{Inbox, make_waker};
use crate::runtime::task::{Completion, Dispatch, JoinHandle, Launch, TaskExit, TaskId, TaskRecord, TaskState};
use crate::runtime::timer::Timers;
use crate::runtime::{Stats, Turn};
use crate::unwind::Unwinding;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::Instant;

/// Mutable scheduler state.
///
/// Never borrowed across a task poll: a task may spawn, wake or register
/// timers while it runs.
struct Core {
    tasks: HashMap<TaskId, TaskRecord>,
    run_queue: VecDeque<TaskId>,
    next_id: u64,

    /// Tasks not yet retired.
    live: usize,

    /// Live tasks that are queued, running or notified.
    awake: usize,

    timers: Timers,

    /// First fatal condition recorded since the last drain returned.
    fault: Option<Error>,

    /// Uncaught unwinds of tasks whose caller collects them.
    surfaced: HashMap<TaskId, Unwinding>,
}

/// The single-threaded scheduler behind a [`Runtime`](crate::Runtime).
pub(crate) struct Scheduler {
    core: RefCell<Core>,
    inbox: Arc<Inbox>,
    rng: RefCell<StdRng>,
    draining: Cell<bool>,
    config: Config,
}

/// Marks the scheduler as draining for as long as it lives.
struct DrainGuard<'a>(&'a Cell<bool>);

impl<'a> DrainGuard<'a> {
    fn enter(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl Scheduler {
    pub(crate) fn new(config: Config) -> Rc<Self> {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        Rc::new(Self {
            core: RefCell::new(Core {
                tasks: HashMap::new(),
                run_queue: VecDeque::new(),
                next_id: 1,
                live: 0,
                awake: 0,
                timers: Timers::default(),
                fault: None,
                surfaced: HashMap::new(),
            }),
            inbox: Arc::new(Inbox::new()),
            rng: RefCell::new(rng),
            draining: Cell::new(false),
            config,
        })
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.draining.get()
    }

    /// Creates the record for `future` without scheduling it.
    fn insert<F>(&self, future: F, launch: Launch) -> JoinHandle<<F::Output as Completion>::Value>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        let mut core = self.core.borrow_mut();

        let id = TaskId::new(core.next_id);
        core.next_id += 1;

        let (record, handle) = TaskRecord::new(id, future, launch);
        core.tasks.insert(id, record);
        core.live += 1;
        core.awake += 1;

        tracing::trace!(task = %id, dispatch = ?launch.dispatch, live = core.live, "spawn");

        handle
    }

    /// Creates a task and schedules it according to its dispatch mode.
    pub(crate) fn launch<F>(
        self: &Rc<Self>,
        future: F,
        launch: Launch,
    ) -> JoinHandle<<F::Output as Completion>::Value>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        let handle = self.insert(future, launch);
        let id = handle.id();

        match launch.dispatch {
            Dispatch::Deferred => self.core.borrow_mut().run_queue.push_back(id),
            Dispatch::Direct if self.draining.get() => {
                self.core.borrow_mut().run_queue.push_front(id)
            }
            Dispatch::Direct => {
                let _drain = DrainGuard::enter(&self.draining);
                self.poll_task(id);
            }
        }

        handle
    }

    /// Polls one task once.
    ///
    /// The task's future is taken out of its record for the duration of the
    /// poll, so the scheduler state stays free for whatever the task does.
    pub(crate) fn poll_task(self: &Rc<Self>, id: TaskId) {
        let (mut future, may_block, unwind) = {
            let mut core = self.core.borrow_mut();
            let Some(record) = core.tasks.get_mut(&id) else {
                return;
            };
            let Some(future) = record.future.take() else {
                return;
            };
            record.state = TaskState::Running;
            (future, record.may_block, record.unwind.clone())
        };

        let waker = make_waker(id, self.inbox.clone());
        let mut cx = Context::from_waker(&waker);

        let current = Current {
            scheduler: self.clone(),
            task: id,
            may_block,
            unwind,
        };

        let span = tracing::trace_span!("task", id = %id);
        let _span = span.enter();

        let poll = context::enter(current, || {
            panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)))
        });

        match poll {
            Ok(Poll::Pending) => {
                if let Some(record) = self.core.borrow_mut().tasks.get_mut(&id) {
                    record.future = Some(future);
                }
                self.absorb_wakeups();
                self.suspend(id);
            }
            Ok(Poll::Ready(exit)) => {
                drop(future);
                self.absorb_wakeups();
                self.retire(id, exit);
            }
            Err(payload) => {
                drop(future);
                self.absorb_wakeups();
                self.retire_panicked(id, payload);
            }
        }
    }

    /// Runs a woken task ahead of the run queue.
    ///
    /// Outside of a drain the task is polled before this returns; during a
    /// drain it moves to the front of the queue and runs next.
    pub(crate) fn wake_direct(self: &Rc<Self>, id: TaskId) {
        self.absorb_wakeups();
        let draining = self.draining.get();

        {
            let mut core = self.core.borrow_mut();
            let queued = core
                .tasks
                .get(&id)
                .is_some_and(|record| record.state == TaskState::Queued);
            if !queued {
                return;
            }

            core.run_queue.retain(|queued| *queued != id);
            if draining {
                core.run_queue.push_front(id);
            }
        }

        tracing::trace!(task = %id, draining, "direct wake");

        if !draining {
            let _drain = DrainGuard::enter(&self.draining);
            self.poll_task(id);
        }
    }

    /// Applies the wakeups recorded by wakers since the last call.
    fn absorb_wakeups(&self) {
        let woken = self.inbox.drain();
        if woken.is_empty() {
            return;
        }

        let mut core = self.core.borrow_mut();
        for id in woken {
            core.wake(id);
        }
    }

    /// Parks a task whose poll returned `Pending`, or re-queues it if it was
    /// woken while running.
    fn suspend(&self, id: TaskId) {
        let mut core = self.core.borrow_mut();
        let Some(record) = core.tasks.get_mut(&id) else {
            return;
        };

        if record.state == TaskState::Notified {
            record.state = TaskState::Queued;
            core.run_queue.push_back(id);
            return;
        }

        record.state = TaskState::Suspended;
        let may_block = record.may_block;
        core.awake -= 1;

        tracing::trace!(task = %id, awake = core.awake, "park");

        if may_block {
            core.check_progress(self.config.deadlock_detection);
        }
    }

    /// Removes a finished task and applies the fault policy.
    fn retire(&self, id: TaskId, exit: TaskExit) {
        let mut core = self.core.borrow_mut();
        let Some(record) = core.tasks.remove(&id) else {
            return;
        };

        core.live -= 1;
        core.awake -= 1;

        match exit {
            TaskExit::Returned => tracing::trace!(task = %id, live = core.live, "exit"),
            TaskExit::Recovered => {
                tracing::warn!(task = %id, "task recovered from an unwind at its root")
            }
            TaskExit::Unwound(unwinding) => {
                tracing::error!(task = %id, %unwinding, "uncaught unwind");

                if record.surface {
                    core.surfaced.insert(id, unwinding);
                } else if self.config.fault_policy == FaultPolicy::Abort || core.live == 0 {
                    core.record_fault(Error::Unwound { task: id, unwinding });
                }
            }
        }

        core.check_progress(self.config.deadlock_detection);
        drop(core);
        drop(record);
    }

    fn retire_panicked(&self, id: TaskId, payload: Box<dyn Any + Send>) {
        let message = panic_message(payload.as_ref());
        tracing::error!(task = %id, %message, "task panicked");

        let mut core = self.core.borrow_mut();
        let Some(record) = core.tasks.remove(&id) else {
            return;
        };

        core.live -= 1;
        core.awake -= 1;

        if !record.surface
            && (self.config.fault_policy == FaultPolicy::Abort || core.live == 0)
        {
            core.record_fault(Error::Panicked {
                task: id,
                message: message.clone(),
            });
        }

        drop(core);

        // The joiner is woken before progress is checked.
        record.join.fail(JoinError::Panicked { message });
        self.absorb_wakeups();

        self.core
            .borrow_mut()
            .check_progress(self.config.deadlock_detection);
    }

    /// Drops a task that is not allowed to finish, failing its join handle.
    fn abort_task(&self, id: TaskId) {
        let mut core = self.core.borrow_mut();
        let Some(record) = core.tasks.remove(&id) else {
            return;
        };

        core.live -= 1;
        if record.state.is_awake() {
            core.awake -= 1;
        }
        core.run_queue.retain(|queued| *queued != id);
        core.surfaced.remove(&id);
        drop(core);

        tracing::trace!(task = %id, "abort");

        record.join.fail(JoinError::Aborted);
        drop(record);
        self.absorb_wakeups();
    }

    /// Drains the run queue, including tasks queued while draining.
    ///
    /// A nested call made while a drain is in progress returns
    /// [`Turn::Deferred`] without doing anything.
    pub(crate) fn turn(self: &Rc<Self>) -> Result<Turn, Error> {
        if self.draining.get() {
            tracing::trace!("nested turn deferred");
            return Ok(Turn::Deferred);
        }

        let _drain = DrainGuard::enter(&self.draining);

        self.fire_timers();
        self.absorb_wakeups();

        loop {
            if let Some(fault) = self.core.borrow_mut().fault.take() {
                return Err(fault);
            }

            let next = self.core.borrow_mut().run_queue.pop_front();
            let Some(id) = next else {
                break;
            };

            self.poll_task(id);
        }

        Ok(self.status())
    }

    fn fire_timers(&self) {
        let due = self.core.borrow_mut().timers.expire(Instant::now());

        for waker in due {
            waker.wake();
        }
    }

    fn status(&self) -> Turn {
        let mut core = self.core.borrow_mut();

        if core.tasks.is_empty() {
            Turn::Done
        } else if let Some(deadline) = core.timers.next_deadline() {
            Turn::Waiting(deadline)
        } else {
            Turn::Idle
        }
    }

    /// Registers a timer waking `waker` at `deadline`.
    pub(crate) fn register_timer(&self, deadline: Instant, waker: Waker, cancelled: Rc<Cell<bool>>) {
        self.core
            .borrow_mut()
            .timers
            .insert(deadline, waker, cancelled);
    }

    /// Uniform index in `0..n`, drawn from the runtime's generator.
    pub(crate) fn random_index(&self, n: usize) -> usize {
        self.rng.borrow_mut().random_range(0..n)
    }

    /// Runs `future` as a task that may not suspend, polling it exactly once.
    pub(crate) fn dispatch_callback<F>(
        self: &Rc<Self>,
        future: F,
    ) -> Result<<F::Output as Completion>::Value, Error>
    where
        F: Future + 'static,
        F::Output: Completion,
    {
        let launch = Launch {
            dispatch: Dispatch::Direct,
            may_block: false,
            surface: true,
        };

        let handle = self.insert(future, launch);
        let id = handle.id();

        self.poll_task(id);

        match handle.try_take() {
            Some(outcome) => self.settle(id, outcome),
            None => {
                tracing::error!(task = %id, "host callback tried to suspend");
                self.abort_task(id);
                Err(Error::BlockingForbidden)
            }
        }
    }

    /// Turns the outcome of a task whose caller collects it into the
    /// runtime's error type.
    pub(crate) fn settle<T>(&self, id: TaskId, outcome: Result<T, JoinError>) -> Result<T, Error> {
        let surfaced = self.core.borrow_mut().surfaced.remove(&id);

        match outcome {
            Ok(value) => Ok(value),
            Err(JoinError::Unwound { message }) => match surfaced {
                Some(unwinding) => Err(Error::Unwound { task: id, unwinding }),
                None => Err(Error::Join(JoinError::Unwound { message })),
            },
            Err(JoinError::Panicked { message }) => Err(Error::Panicked { task: id, message }),
            Err(other) => Err(Error::Join(other)),
        }
    }

    pub(crate) fn live(&self) -> usize {
        self.core.borrow().live
    }

    pub(crate) fn stats(&self) -> Stats {
        self.absorb_wakeups();
        let core = self.core.borrow();

        Stats {
            live: core.live,
            awake: core.awake,
            queued: core.run_queue.len(),
            timers: core.timers.len(),
        }
    }

    pub(crate) fn task_state(&self, id: TaskId) -> Option<TaskState> {
        self.absorb_wakeups();
        self.core.borrow().tasks.get(&id).map(|record| record.state)
    }

    /// Drops every remaining task, failing their join handles.
    pub(crate) fn shutdown(&self) {
        let records: Vec<TaskRecord> = {
            let mut core = self.core.borrow_mut();
            core.run_queue.clear();
            core.timers.clear();
            core.surfaced.clear();
            core.live = 0;
            core.awake = 0;
            core.tasks.drain().map(|(_, record)| record).collect()
        };

        if !records.is_empty() {
            tracing::debug!(tasks = records.len(), "shutdown aborts unfinished tasks");
        }

        for record in &records {
            record.join.fail(JoinError::Aborted);
        }

        drop(records);
        self.inbox.drain();
    }
}

impl Core {
    fn wake(&mut self, id: TaskId) {
        let Some(record) = self.tasks.get_mut(&id) else {
            return;
        };

        match record.state {
            TaskState::Running => record.state = TaskState::Notified,
            TaskState::Suspended => {
                record.state = TaskState::Queued;
                self.awake += 1;
                self.run_queue.push_back(id);
                tracing::trace!(task = %id, awake = self.awake, "wake");
            }
            TaskState::Queued | TaskState::Notified => {}
        }
    }

    fn record_fault(&mut self, error: Error) {
        if self.fault.is_none() {
            self.fault = Some(error);
        }
    }

    /// Records a deadlock when every live task is parked and no timer can
    /// wake any of them.
    fn check_progress(&mut self, detection: bool) {
        if !detection || self.live == 0 || self.awake > 0 || self.fault.is_some() {
            return;
        }

        if self.timers.armed() {
            return;
        }

        tracing::error!(live = self.live, "all tasks are asleep - deadlock");
        self.fault = Some(Error::Deadlock { live: self.live });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(text) = payload.downcast_ref::<&str>() {
        (*text).to_owned()
    } else if let Some(text) = payload.downcast_ref::<String>() {
        text.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}
