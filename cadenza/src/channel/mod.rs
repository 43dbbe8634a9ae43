//! Typed message queues between tasks.
//!
//! A [`Channel`] has a fixed capacity. With capacity `0` every send waits for
//! a receiver (rendezvous); otherwise up to `capacity` values are buffered.
//! Parked senders and receivers are served in FIFO order, and a send that
//! finds a parked receiver hands its value over directly.
//!
//! ```rust,ignore
//! let ch = Channel::new(1);
//! let tx = ch.clone();
//!
//! task::spawn(async move {
//!     tx.send(1).await?;
//!     tx.send(2).await?;
//!     tx.close()
//! });
//!
//! assert_eq!(ch.recv().await, Some(1));
//! assert_eq!(ch.recv().await, Some(2));
//! assert_eq!(ch.recv().await, None);
//! ```

pub mod select;

use crate::error::UsageError;
use crate::suspend::{self, Outcome, Token, Waiter};
use crate::unwind::Unwinding;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::mem;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

pub use select::{Case, Select, select};

/// State shared by every clone of a channel.
pub(crate) struct Shared<T> {
    capacity: usize,
    buffer: VecDeque<T>,
    senders: VecDeque<Rc<Waiter<T>>>,
    receivers: VecDeque<Rc<Waiter<T>>>,
    closed: bool,
}

impl<T> Shared<T> {
    fn has_live_sender(&self) -> bool {
        self.senders.iter().any(|waiter| waiter.is_live())
    }

    fn has_live_receiver(&self) -> bool {
        self.receivers.iter().any(|waiter| waiter.is_live())
    }

    /// Whether a send would complete without parking.
    pub(crate) fn send_ready(&self) -> bool {
        self.closed || self.has_live_receiver() || self.buffer.len() < self.capacity
    }

    /// Whether a receive would complete without parking.
    pub(crate) fn recv_ready(&self) -> bool {
        self.closed || self.has_live_sender() || !self.buffer.is_empty()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }

    pub(crate) fn push_sender(&mut self, waiter: Rc<Waiter<T>>) {
        self.senders.push_back(waiter);
    }

    pub(crate) fn push_receiver(&mut self, waiter: Rc<Waiter<T>>) {
        self.receivers.push_back(waiter);
    }

    pub(crate) fn withdraw_sender(&mut self, waiter: &Rc<Waiter<T>>) {
        self.senders.retain(|queued| !Rc::ptr_eq(queued, waiter));
    }

    pub(crate) fn withdraw_receiver(&mut self, waiter: &Rc<Waiter<T>>) {
        self.receivers.retain(|queued| !Rc::ptr_eq(queued, waiter));
    }

    /// Sends without parking: hands the value to the first live receiver,
    /// or buffers it.
    pub(crate) fn offer(&mut self, value: T) -> Result<TrySend<T>, Unwinding> {
        if self.closed {
            return Err(Unwinding::usage(UsageError::SendOnClosed));
        }

        while let Some(receiver) = self.receivers.pop_front() {
            if receiver.try_claim() {
                receiver.put_value(value);
                receiver.finish(Outcome::Completed);
                return Ok(TrySend::Sent);
            }
        }

        if self.buffer.len() < self.capacity {
            self.buffer.push_back(value);
            return Ok(TrySend::Sent);
        }

        Ok(TrySend::Full(value))
    }

    /// Receives without parking.
    ///
    /// A parked sender only exists when the buffer is full, so its value goes
    /// to the tail while the head is returned.
    pub(crate) fn take(&mut self) -> TryRecv<T> {
        while let Some(sender) = self.senders.pop_front() {
            if !sender.try_claim() {
                continue;
            }

            let Some(value) = sender.take_value() else {
                continue;
            };
            sender.finish(Outcome::Completed);

            return match self.buffer.pop_front() {
                Some(head) => {
                    self.buffer.push_back(value);
                    TryRecv::Value(head)
                }
                None => TryRecv::Value(value),
            };
        }

        if let Some(value) = self.buffer.pop_front() {
            return TryRecv::Value(value);
        }

        if self.closed {
            TryRecv::Closed
        } else {
            TryRecv::Empty
        }
    }
}

/// Result of [`Channel::try_send`].
#[derive(Debug, PartialEq, Eq)]
pub enum TrySend<T> {
    /// The value was handed to a receiver or buffered.
    Sent,

    /// The send would have to wait; the value is given back.
    Full(T),
}

/// Result of [`Channel::try_recv`].
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecv<T> {
    Value(T),

    /// Nothing to receive yet.
    Empty,

    /// The channel is closed and drained.
    Closed,
}

/// A bounded FIFO channel shared by its clones.
///
/// Every clone refers to the same queue; any clone may send, receive or
/// close.
pub struct Channel<T> {
    shared: Rc<RefCell<Shared<T>>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shared = self.shared.borrow();

        f.debug_struct("Channel")
            .field("capacity", &shared.capacity)
            .field("len", &shared.buffer.len())
            .field("closed", &shared.closed)
            .finish()
    }
}

impl<T> Channel<T> {
    /// Creates a channel buffering up to `capacity` values. A capacity of
    /// zero makes every send wait for a receiver.
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Rc::new(RefCell::new(Shared {
                capacity,
                buffer: VecDeque::new(),
                senders: VecDeque::new(),
                receivers: VecDeque::new(),
                closed: false,
            })),
        }
    }

    /// Creates a channel whose sends never wait.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    pub(crate) fn shared(&self) -> &Rc<RefCell<Shared<T>>> {
        &self.shared
    }

    /// Sends `value`, waiting while the channel is full.
    ///
    /// The future resolves to an error unwind if the channel is closed, either
    /// before the send or while it waits. Dropping the future while it waits
    /// withdraws the send.
    pub fn send(&self, value: T) -> Sending<T> {
        Sending {
            shared: self.shared.clone(),
            value: Some(value),
            waiter: None,
        }
    }

    /// Receives the next value, waiting while the channel is empty.
    ///
    /// Resolves to `None` once the channel is closed and drained.
    pub fn recv(&self) -> Receiving<T> {
        Receiving {
            shared: self.shared.clone(),
            waiter: None,
        }
    }

    /// Sends without waiting.
    ///
    /// # Errors
    ///
    /// Fails with the send-on-closed unwind if the channel is closed.
    pub fn try_send(&self, value: T) -> Result<TrySend<T>, Unwinding> {
        self.shared.borrow_mut().offer(value)
    }

    /// Receives without waiting.
    pub fn try_recv(&self) -> TryRecv<T> {
        self.shared.borrow_mut().take()
    }

    /// Closes the channel.
    ///
    /// Every parked receiver resumes with `None` and every parked sender with
    /// the send-on-closed unwind. Buffered values stay available to
    /// receivers.
    ///
    /// # Errors
    ///
    /// Fails with the close-of-closed unwind if the channel is already
    /// closed.
    pub fn close(&self) -> Result<(), Unwinding> {
        let (senders, receivers) = {
            let mut shared = self.shared.borrow_mut();
            if shared.closed {
                return Err(Unwinding::usage(UsageError::CloseOfClosed));
            }

            shared.closed = true;
            (
                mem::take(&mut shared.senders),
                mem::take(&mut shared.receivers),
            )
        };

        tracing::debug!(
            senders = senders.len(),
            receivers = receivers.len(),
            "channel closed"
        );

        for waiter in receivers.iter().chain(senders.iter()) {
            if waiter.try_claim() {
                waiter.finish(Outcome::Closed);
            }
        }

        Ok(())
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.shared.borrow().buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.shared.borrow().buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.shared.borrow().capacity
    }

    pub fn is_closed(&self) -> bool {
        self.shared.borrow().closed
    }

    /// Number of senders parked on the channel, stale select registrations
    /// excluded.
    pub fn waiting_senders(&self) -> usize {
        let shared = self.shared.borrow();
        shared.senders.iter().filter(|w| w.is_live()).count()
    }

    /// Number of receivers parked on the channel, stale select registrations
    /// excluded.
    pub fn waiting_receivers(&self) -> usize {
        let shared = self.shared.borrow();
        shared.receivers.iter().filter(|w| w.is_live()).count()
    }
}

/// Future returned by [`Channel::send`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sending<T> {
    shared: Rc<RefCell<Shared<T>>>,
    value: Option<T>,
    waiter: Option<Rc<Waiter<T>>>,
}

impl<T> Unpin for Sending<T> {}

impl<T> Future for Sending<T> {
    type Output = Result<(), Unwinding>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(waiter) = &this.waiter {
            return match waiter.outcome() {
                Outcome::Completed => {
                    this.waiter = None;
                    Poll::Ready(Ok(()))
                }
                Outcome::Closed => {
                    this.waiter = None;
                    Poll::Ready(Err(Unwinding::usage(UsageError::SendOnClosed)))
                }
                Outcome::Waiting => {
                    waiter.token().register(cx.waker());
                    Poll::Pending
                }
            };
        }

        let Some(value) = this.value.take() else {
            return Poll::Ready(Ok(()));
        };

        let mut shared = this.shared.borrow_mut();
        let value = match shared.offer(value) {
            Ok(TrySend::Sent) => return Poll::Ready(Ok(())),
            Ok(TrySend::Full(value)) => value,
            Err(unwinding) => return Poll::Ready(Err(unwinding)),
        };

        if !suspend::may_suspend() {
            this.value = Some(value);
            return Poll::Pending;
        }

        let waiter = Waiter::new(Token::new(cx.waker()), 0, Some(value));
        shared.push_sender(waiter.clone());
        this.waiter = Some(waiter);

        Poll::Pending
    }
}

impl<T> Drop for Sending<T> {
    fn drop(&mut self) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };

        if waiter.outcome() == Outcome::Waiting {
            self.shared.borrow_mut().withdraw_sender(&waiter);
        }
    }
}

/// Future returned by [`Channel::recv`].
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Receiving<T> {
    shared: Rc<RefCell<Shared<T>>>,
    waiter: Option<Rc<Waiter<T>>>,
}

impl<T> Unpin for Receiving<T> {}

impl<T> Future for Receiving<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(waiter) = &this.waiter {
            return match waiter.outcome() {
                Outcome::Completed => {
                    let value = waiter.take_value();
                    this.waiter = None;
                    Poll::Ready(value)
                }
                Outcome::Closed => {
                    this.waiter = None;
                    Poll::Ready(None)
                }
                Outcome::Waiting => {
                    waiter.token().register(cx.waker());
                    Poll::Pending
                }
            };
        }

        let mut shared = this.shared.borrow_mut();
        match shared.take() {
            TryRecv::Value(value) => return Poll::Ready(Some(value)),
            TryRecv::Closed => return Poll::Ready(None),
            TryRecv::Empty => {}
        }

        if !suspend::may_suspend() {
            return Poll::Pending;
        }

        let waiter = Waiter::new(Token::new(cx.waker()), 0, None);
        shared.push_receiver(waiter.clone());
        this.waiter = Some(waiter);

        Poll::Pending
    }
}

impl<T> Drop for Receiving<T> {
    fn drop(&mut self) {
        let Some(waiter) = self.waiter.take() else {
            return;
        };

        if waiter.outcome() == Outcome::Waiting {
            self.shared.borrow_mut().withdraw_receiver(&waiter);
        }
    }
}
