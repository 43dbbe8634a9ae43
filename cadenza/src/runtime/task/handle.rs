use crate::error::JoinError;
use crate::runtime::task::TaskId;

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Where a task leaves its result for its [`JoinHandle`].
pub(crate) struct JoinSlot<T> {
    outcome: RefCell<Option<Result<T, JoinError>>>,
    finished: Cell<bool>,
    waker: RefCell<Option<Waker>>,
}

impl<T> JoinSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            outcome: RefCell::new(None),
            finished: Cell::new(false),
            waker: RefCell::new(None),
        }
    }

    /// Stores the task outcome and wakes the joiner. Only the first call has
    /// an effect.
    pub(crate) fn complete(&self, outcome: Result<T, JoinError>) {
        if self.finished.replace(true) {
            return;
        }

        *self.outcome.borrow_mut() = Some(outcome);

        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// Type-erased view of a [`JoinSlot`] kept by the scheduler, which does not
/// know the task's output type.
pub(crate) trait Joinable {
    /// Finishes the task without a value.
    fn fail(&self, error: JoinError);
}

impl<T> Joinable for JoinSlot<T> {
    fn fail(&self, error: JoinError) {
        self.complete(Err(error));
    }
}

/// A handle to a spawned task.
///
/// A `JoinHandle` is a future resolving once the task has finished. It yields
/// the task's value, or the [`JoinError`] explaining why there is none.
///
/// Dropping the `JoinHandle` does **not** cancel the task; it only discards
/// the ability to observe its result.
pub struct JoinHandle<T> {
    id: TaskId,
    slot: Rc<JoinSlot<T>>,
}

impl<T> JoinHandle<T> {
    pub(crate) fn new(id: TaskId, slot: Rc<JoinSlot<T>>) -> Self {
        Self { id, slot }
    }

    /// Identity of the task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task has finished.
    pub fn is_finished(&self) -> bool {
        self.slot.finished.get()
    }

    /// Takes the outcome if the task has finished.
    pub(crate) fn try_take(&self) -> Option<Result<T, JoinError>> {
        self.slot.outcome.borrow_mut().take()
    }
}

impl<T> Future for JoinHandle<T> {
    type Output = Result<T, JoinError>;

    /// Polls the join handle.
    ///
    /// The waker is stored before returning `Pending`; the slot wakes it when
    /// the task finishes.
    ///
    /// # Panics
    ///
    /// Panics if polled again after returning `Ready`.
    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.slot.finished.get() {
            let outcome = self
                .slot
                .outcome
                .borrow_mut()
                .take()
                .expect("JoinHandle polled after completion");
            return Poll::Ready(outcome);
        }

        *self.slot.waker.borrow_mut() = Some(cx.waker().clone());
        Poll::Pending
    }
}
