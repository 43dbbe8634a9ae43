//! Suspension and resumption.
//!
//! A task suspends by returning `Poll::Pending` from its top-level future and
//! is resumed through the [`Waker`] it was polled with. This module holds the
//! pieces every suspending primitive shares:
//! - [`Token`], the one-shot claim deciding which registration of a parked
//!   operation completes it,
//! - [`Waiter`], one registration of a parked operation on a wait queue,
//! - [`park`], a bare suspension point resumed by whoever holds its
//!   [`Resume`] half, either through the run queue or directly,
//! - the check refusing suspension inside host callbacks.

use crate::runtime::context::{self, DirectWake};

use std::cell::{Cell, RefCell};
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll, Waker};

/// Whether the running code may suspend.
///
/// Suspending primitives call this before registering anything. Inside a host
/// callback the refusal is logged and the primitive returns `Pending` without
/// side effects; the dispatcher then reports the violation.
pub(crate) fn may_suspend() -> bool {
    if context::may_block() {
        return true;
    }

    tracing::error!(
        task = ?context::task_id(),
        "attempted to suspend inside a host callback"
    );
    false
}

/// One-shot resumption right shared by every registration of a parked
/// operation.
///
/// The first counterpart to claim it decides which case completes; later
/// claims fail, so the other registrations become stale.
pub(crate) struct Token {
    claimed: Cell<Option<usize>>,
    waker: RefCell<Option<Waker>>,
}

impl Token {
    pub(crate) fn new(waker: &Waker) -> Rc<Self> {
        Rc::new(Self {
            claimed: Cell::new(None),
            waker: RefCell::new(Some(waker.clone())),
        })
    }

    fn claim(&self, case: usize) -> bool {
        if self.claimed.get().is_some() {
            return false;
        }

        self.claimed.set(Some(case));
        true
    }

    /// The case that claimed the token.
    pub(crate) fn claimed(&self) -> Option<usize> {
        self.claimed.get()
    }

    /// Replaces the waker if the parked future was polled with a new one.
    pub(crate) fn register(&self, waker: &Waker) {
        let mut slot = self.waker.borrow_mut();

        match slot.as_ref() {
            Some(current) if current.will_wake(waker) => {}
            _ => *slot = Some(waker.clone()),
        }
    }

    fn wake(&self) {
        let waker = self.waker.borrow_mut().take();
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

/// How a registration was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Outcome {
    Waiting,

    /// A counterpart completed the operation.
    Completed,

    /// The channel was closed, or the resumer gave up.
    Closed,
}

/// One registration of a parked operation.
///
/// A send registration carries the value to deliver; a receive registration
/// gets the delivered value put in.
pub(crate) struct Waiter<T> {
    token: Rc<Token>,
    case: usize,
    value: RefCell<Option<T>>,
    outcome: Cell<Outcome>,
}

impl<T> Waiter<T> {
    pub(crate) fn new(token: Rc<Token>, case: usize, value: Option<T>) -> Rc<Self> {
        Rc::new(Self {
            token,
            case,
            value: RefCell::new(value),
            outcome: Cell::new(Outcome::Waiting),
        })
    }

    /// False once another registration of the same operation won.
    pub(crate) fn is_live(&self) -> bool {
        self.token.claimed().is_none()
    }

    pub(crate) fn try_claim(&self) -> bool {
        self.token.claim(self.case)
    }

    pub(crate) fn take_value(&self) -> Option<T> {
        self.value.borrow_mut().take()
    }

    pub(crate) fn put_value(&self, value: T) {
        *self.value.borrow_mut() = Some(value);
    }

    /// Resolves the registration and wakes the parked task.
    pub(crate) fn finish(&self, outcome: Outcome) {
        self.outcome.set(outcome);
        self.token.wake();
    }

    pub(crate) fn outcome(&self) -> Outcome {
        self.outcome.get()
    }

    pub(crate) fn token(&self) -> &Rc<Token> {
        &self.token
    }
}

/// Creates a bare suspension point.
///
/// Awaiting the [`Park`] half suspends the task until the [`Resume`] half is
/// used. `Resume` is the single owning resumption callback: it cannot be
/// cloned and [`Resume::resume`] consumes it. Dropping it without resuming
/// completes the `Park` with `None`.
///
/// # Examples
///
/// ```rust,ignore
/// let (park, resume) = suspend::park();
/// task::spawn(async move { resume.resume(5) });
/// assert_eq!(park.await, Some(5));
/// ```
pub fn park<T>() -> (Park<T>, Resume<T>) {
    let slot = Waiter::new(Token::new(Waker::noop()), 0, None);
    let parked = Rc::new(RefCell::new(None));

    (
        Park {
            slot: slot.clone(),
            parked: parked.clone(),
        },
        Resume {
            slot: Some(slot),
            parked,
        },
    )
}

/// The waiting half of [`park`].
pub struct Park<T> {
    slot: Rc<Waiter<T>>,
    parked: Rc<RefCell<Option<DirectWake>>>,
}

impl<T> Future for Park<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.slot.outcome() {
            Outcome::Completed => Poll::Ready(self.slot.take_value()),
            Outcome::Closed => Poll::Ready(None),
            Outcome::Waiting => {
                if !may_suspend() {
                    return Poll::Pending;
                }

                self.slot.token().register(cx.waker());
                *self.parked.borrow_mut() = DirectWake::capture();
                Poll::Pending
            }
        }
    }
}

/// The resuming half of [`park`].
pub struct Resume<T> {
    slot: Option<Rc<Waiter<T>>>,
    parked: Rc<RefCell<Option<DirectWake>>>,
}

impl<T> Resume<T> {
    /// Hands `value` to the parked task and makes it runnable.
    ///
    /// The task is queued behind the tasks already waiting to run.
    pub fn resume(mut self, value: T) {
        self.complete(value);
    }

    /// Hands `value` to the parked task and runs it next.
    ///
    /// Called outside of a drain (from the host or a host callback), the task
    /// is polled before this returns. During a drain it goes to the front of
    /// the run queue instead of the back. If the task has not parked yet this
    /// behaves like [`resume`](Self::resume).
    pub fn resume_direct(mut self, value: T) {
        self.complete(value);

        let parked = self.parked.borrow_mut().take();
        if let Some(parked) = parked {
            parked.dispatch();
        }
    }

    fn complete(&mut self, value: T) {
        if let Some(slot) = self.slot.take() {
            slot.try_claim();
            slot.put_value(value);
            slot.finish(Outcome::Completed);
        }
    }
}

impl<T> Drop for Resume<T> {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            slot.try_claim();
            slot.finish(Outcome::Closed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::task::Wake;

    struct CountingWaker(AtomicUsize);

    impl Wake for CountingWaker {
        fn wake(self: Arc<Self>) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn first_claim_wins() {
        let token = Token::new(Waker::noop());
        let first = Waiter::new(token.clone(), 0, Some("a"));
        let second = Waiter::new(token.clone(), 1, Some("b"));

        assert!(second.try_claim());
        assert!(!first.try_claim());
        assert!(!first.is_live());
        assert_eq!(token.claimed(), Some(1));
    }

    #[test]
    fn resume_wakes_once_and_delivers() {
        let counter = Arc::new(CountingWaker(AtomicUsize::new(0)));
        let waker = Waker::from(counter.clone());
        let mut cx = Context::from_waker(&waker);

        let (mut park, resume) = park::<u8>();
        assert!(Pin::new(&mut park).poll(&mut cx).is_pending());

        resume.resume(9);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(Pin::new(&mut park).poll(&mut cx), Poll::Ready(Some(9)));
    }

    #[test]
    fn dropped_resume_completes_with_none() {
        let (mut park, resume) = park::<u8>();
        drop(resume);

        let mut cx = Context::from_waker(Waker::noop());
        assert_eq!(Pin::new(&mut park).poll(&mut cx), Poll::Ready(None));
    }
}
