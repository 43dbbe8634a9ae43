//! Waiting on several channel operations at once.
//!
//! [`select`] takes a list of [`Case`]s, each pairing a send or a receive with
//! a continuation, plus at most one default. When several operations can
//! complete right away, one is chosen uniformly at random so that no case
//! starves the others.
//!
//! ```rust,ignore
//! let picked = select(vec![
//!     Case::recv(&numbers, |n| format!("number {n:?}")),
//!     Case::send(&acks, (), || "acked".to_owned()),
//!     Case::default(|| "nothing ready".to_owned()),
//! ])
//! .await?;
//! ```

use super::{Channel, Shared, TryRecv, TrySend};
use crate::error::UsageError;
use crate::runtime::context;
use crate::suspend::{self, Outcome, Token, Waiter};
use crate::unwind::Unwinding;

use rand::Rng;

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// A channel operation taking part in a select.
trait Operation<R> {
    /// Whether this is a send on a closed channel.
    fn is_doomed(&self) -> bool;

    /// Whether the operation would complete without parking. Has no side
    /// effects.
    fn is_ready(&self) -> bool;

    /// Performs the operation if it can complete right away.
    fn attempt(&mut self) -> Option<Result<R, Unwinding>>;

    /// Parks the operation on its channel under `token`.
    fn register(&mut self, token: &Rc<Token>, case: usize);

    /// Removes a registration that did not win.
    fn withdraw(&mut self);

    /// Runs the continuation of the registration that won.
    fn complete(&mut self) -> Option<Result<R, Unwinding>>;
}

struct SendOperation<'a, T, R> {
    shared: Rc<RefCell<Shared<T>>>,
    value: Option<T>,
    then: Option<Box<dyn FnOnce() -> R + 'a>>,
    waiter: Option<Rc<Waiter<T>>>,
}

impl<T, R> Operation<R> for SendOperation<'_, T, R> {
    fn is_doomed(&self) -> bool {
        self.shared.borrow().is_closed()
    }

    fn is_ready(&self) -> bool {
        self.shared.borrow().send_ready()
    }

    fn attempt(&mut self) -> Option<Result<R, Unwinding>> {
        let value = self.value.take()?;

        let offered = self.shared.borrow_mut().offer(value);
        match offered {
            Ok(TrySend::Sent) => self.then.take().map(|then| Ok(then())),
            Ok(TrySend::Full(value)) => {
                self.value = Some(value);
                None
            }
            Err(unwinding) => Some(Err(unwinding)),
        }
    }

    fn register(&mut self, token: &Rc<Token>, case: usize) {
        let waiter = Waiter::new(token.clone(), case, self.value.take());
        self.shared.borrow_mut().push_sender(waiter.clone());
        self.waiter = Some(waiter);
    }

    fn withdraw(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.shared.borrow_mut().withdraw_sender(&waiter);
        }
    }

    fn complete(&mut self) -> Option<Result<R, Unwinding>> {
        match self.waiter.as_ref()?.outcome() {
            Outcome::Waiting => None,
            Outcome::Completed => {
                self.waiter = None;
                self.then.take().map(|then| Ok(then()))
            }
            Outcome::Closed => {
                self.waiter = None;
                Some(Err(Unwinding::usage(UsageError::SendOnClosed)))
            }
        }
    }
}

struct RecvOperation<'a, T, R> {
    shared: Rc<RefCell<Shared<T>>>,
    then: Option<Box<dyn FnOnce(Option<T>) -> R + 'a>>,
    waiter: Option<Rc<Waiter<T>>>,
}

impl<T, R> Operation<R> for RecvOperation<'_, T, R> {
    fn is_doomed(&self) -> bool {
        false
    }

    fn is_ready(&self) -> bool {
        self.shared.borrow().recv_ready()
    }

    fn attempt(&mut self) -> Option<Result<R, Unwinding>> {
        let received = self.shared.borrow_mut().take();
        let value = match received {
            TryRecv::Value(value) => Some(value),
            TryRecv::Closed => None,
            TryRecv::Empty => return None,
        };

        self.then.take().map(|then| Ok(then(value)))
    }

    fn register(&mut self, token: &Rc<Token>, case: usize) {
        let waiter = Waiter::new(token.clone(), case, None);
        self.shared.borrow_mut().push_receiver(waiter.clone());
        self.waiter = Some(waiter);
    }

    fn withdraw(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            self.shared.borrow_mut().withdraw_receiver(&waiter);
        }
    }

    fn complete(&mut self) -> Option<Result<R, Unwinding>> {
        let waiter = self.waiter.as_ref()?;

        let value = match waiter.outcome() {
            Outcome::Waiting => return None,
            Outcome::Completed => waiter.take_value(),
            Outcome::Closed => None,
        };
        self.waiter = None;

        self.then.take().map(|then| Ok(then(value)))
    }
}

/// A send or receive case of a [`select`].
pub struct Arm<'a, R>(Box<dyn Operation<R> + 'a>);

/// One case of a [`select`].
pub enum Case<'a, R> {
    Send(Arm<'a, R>),
    Recv(Arm<'a, R>),

    /// Runs when no other case is ready.
    Default(Box<dyn FnOnce() -> R + 'a>),
}

impl<'a, R: 'a> Case<'a, R> {
    /// Sends `value` on `channel`, then runs `then`.
    pub fn send<T: 'a>(channel: &Channel<T>, value: T, then: impl FnOnce() -> R + 'a) -> Self {
        Self::Send(Arm(Box::new(SendOperation {
            shared: channel.shared().clone(),
            value: Some(value),
            then: Some(Box::new(then)),
            waiter: None,
        })))
    }

    /// Receives from `channel`, then runs `then` with the value, or `None` if
    /// the channel is closed and drained.
    pub fn recv<T: 'a>(channel: &Channel<T>, then: impl FnOnce(Option<T>) -> R + 'a) -> Self {
        Self::Recv(Arm(Box::new(RecvOperation {
            shared: channel.shared().clone(),
            then: Some(Box::new(then)),
            waiter: None,
        })))
    }

    /// Runs `then` when no other case is ready.
    pub fn default(then: impl FnOnce() -> R + 'a) -> Self {
        Self::Default(Box::new(then))
    }
}

/// Waits until one of `cases` completes and returns its continuation's
/// value.
///
/// Cases that are ready when the select starts are chosen from uniformly at
/// random, using the runtime's seedable generator. If none is ready the
/// default case runs; without one the task parks on every channel at once,
/// and the registrations that did not win are withdrawn when it resumes.
///
/// The future resolves to an error unwind when more than one default is
/// given, or when a send case targets a closed channel. A select without any
/// case and without a default never completes.
pub fn select<'a, R>(cases: Vec<Case<'a, R>>) -> Select<'a, R> {
    let mut arms = Vec::with_capacity(cases.len());
    let mut defaults = Vec::new();

    for case in cases {
        match case {
            Case::Send(arm) | Case::Recv(arm) => arms.push(arm),
            Case::Default(then) => defaults.push(then),
        }
    }

    Select {
        arms,
        defaults,
        token: None,
    }
}

/// Future returned by [`select`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Select<'a, R> {
    arms: Vec<Arm<'a, R>>,
    defaults: Vec<Box<dyn FnOnce() -> R + 'a>>,

    /// Present once the select has parked.
    token: Option<Rc<Token>>,
}

impl<R> Select<'_, R> {
    fn withdraw_all(&mut self, except: Option<usize>) {
        for (case, arm) in self.arms.iter_mut().enumerate() {
            if Some(case) != except {
                arm.0.withdraw();
            }
        }
    }

    /// Polls a select that is parked on its channels.
    fn poll_parked(&mut self, token: Rc<Token>, cx: &mut Context<'_>) -> Poll<Result<R, Unwinding>> {
        let Some(case) = token.claimed() else {
            token.register(cx.waker());
            self.token = Some(token);
            return Poll::Pending;
        };

        self.withdraw_all(Some(case));

        match self.arms[case].0.complete() {
            Some(result) => Poll::Ready(result),
            None => {
                self.token = Some(token);
                Poll::Pending
            }
        }
    }
}

impl<R> Future for Select<'_, R> {
    type Output = Result<R, Unwinding>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(token) = this.token.take() {
            return this.poll_parked(token, cx);
        }

        if this.defaults.len() > 1 {
            return Poll::Ready(Err(Unwinding::usage(UsageError::MultipleDefaults)));
        }

        if this.arms.iter().any(|arm| arm.0.is_doomed()) {
            return Poll::Ready(Err(Unwinding::usage(UsageError::SendOnClosed)));
        }

        let ready: Vec<usize> = this
            .arms
            .iter()
            .enumerate()
            .filter(|(_, arm)| arm.0.is_ready())
            .map(|(case, _)| case)
            .collect();

        if !ready.is_empty() {
            let case = ready[random_index(ready.len())];
            tracing::trace!(case, ready = ready.len(), "select case chosen");

            if let Some(result) = this.arms[case].0.attempt() {
                return Poll::Ready(result);
            }
        }

        if let Some(then) = this.defaults.pop() {
            return Poll::Ready(Ok(then()));
        }

        if !suspend::may_suspend() {
            return Poll::Pending;
        }

        let token = Token::new(cx.waker());
        for (case, arm) in this.arms.iter_mut().enumerate() {
            arm.0.register(&token, case);
        }
        this.token = Some(token);

        Poll::Pending
    }
}

impl<R> Drop for Select<'_, R> {
    fn drop(&mut self) {
        if self.token.take().is_some() {
            self.withdraw_all(None);
        }
    }
}

/// Uniform index in `0..n`, from the runtime's generator when one is running.
fn random_index(n: usize) -> usize {
    match context::scheduler() {
        Some(scheduler) => scheduler.random_index(n),
        None => rand::rng().random_range(0..n),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::task::Waker;

    fn poll_once<R>(select: &mut Select<'_, R>) -> Poll<Result<R, Unwinding>> {
        let mut cx = Context::from_waker(Waker::noop());
        Pin::new(select).poll(&mut cx)
    }

    #[test]
    fn ready_case_beats_default() {
        let ch = Channel::new(1);
        ch.try_send(3).unwrap();

        let mut sel = select(vec![
            Case::recv(&ch, |v| v.unwrap_or(0) * 2),
            Case::default(|| -1),
        ]);

        assert!(matches!(poll_once(&mut sel), Poll::Ready(Ok(6))));
    }

    #[test]
    fn default_runs_when_nothing_is_ready() {
        let ch = Channel::<u8>::new(0);

        let mut sel = select(vec![
            Case::recv(&ch, |_| "recv"),
            Case::send(&ch, 1, || "send"),
            Case::default(|| "default"),
        ]);

        assert!(matches!(poll_once(&mut sel), Poll::Ready(Ok("default"))));
        assert_eq!(ch.waiting_receivers(), 0);
        assert_eq!(ch.waiting_senders(), 0);
    }

    #[test]
    fn two_defaults_are_rejected() {
        let mut sel = select::<()>(vec![Case::default(|| ()), Case::default(|| ())]);

        let Poll::Ready(Err(unwinding)) = poll_once(&mut sel) else {
            panic!("select with two defaults must fail");
        };
        assert_eq!(unwinding.usage_error(), Some(UsageError::MultipleDefaults));
    }

    #[test]
    fn send_case_on_closed_channel_fails() {
        let open = Channel::new(1);
        open.try_send(1).unwrap();
        let closed = Channel::new(1);
        closed.close().unwrap();

        let mut sel = select(vec![
            Case::recv(&open, |_| ()),
            Case::send(&closed, 2, || ()),
        ]);

        let Poll::Ready(Err(unwinding)) = poll_once(&mut sel) else {
            panic!("send on a closed channel must fail the select");
        };
        assert_eq!(unwinding.usage_error(), Some(UsageError::SendOnClosed));
        assert_eq!(open.len(), 1);
    }

    #[test]
    fn parked_select_registers_everywhere_and_withdraws_on_drop() {
        let a = Channel::<u8>::new(0);
        let b = Channel::<u8>::new(0);

        let mut sel = select(vec![Case::recv(&a, |_| 'a'), Case::recv(&b, |_| 'b')]);
        assert!(poll_once(&mut sel).is_pending());
        assert_eq!(a.waiting_receivers(), 1);
        assert_eq!(b.waiting_receivers(), 1);

        drop(sel);
        assert_eq!(a.waiting_receivers(), 0);
        assert_eq!(b.waiting_receivers(), 0);
    }

    #[test]
    fn counterpart_completes_one_case_and_others_go_stale() {
        let a = Channel::<u8>::new(0);
        let b = Channel::<u8>::new(0);

        let mut sel = select(vec![Case::recv(&a, |v| (0, v)), Case::recv(&b, |v| (1, v))]);
        assert!(poll_once(&mut sel).is_pending());

        assert_eq!(b.try_send(7).unwrap(), TrySend::Sent);
        assert_eq!(a.waiting_receivers(), 0);
        assert_eq!(a.try_send(8).unwrap(), TrySend::Full(8));

        assert!(matches!(poll_once(&mut sel), Poll::Ready(Ok((1, Some(7))))));
    }
}
