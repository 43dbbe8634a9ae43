use crate::runtime::context;
use crate::suspend;

use std::cell::Cell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

/// Creates a future that completes after the given duration.
///
/// The returned sleep future registers a timer with the runtime driving the
/// current task and completes once the duration has elapsed.
///
/// # Panics
///
/// Panics if polled outside of a running runtime.
///
/// # Examples
///
/// ```rust,ignore
/// use std::time::Duration;
///
/// sleep(Duration::from_millis(10)).await;
/// ```
pub fn sleep(duration: Duration) -> Sleep {
    Sleep::new(duration)
}

/// A future that completes once a specific deadline is reached.
///
/// The timer is registered on first poll and cancelled if the future is
/// dropped before completion, so an abandoned sleep never wakes its task.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Sleep {
    /// Absolute point in time when the sleep completes.
    deadline: Instant,

    /// Whether the timer has already been registered.
    registered: bool,

    /// Cancellation flag shared with the timer queue.
    cancelled: Rc<Cell<bool>>,
}

impl Sleep {
    pub(crate) fn new(duration: Duration) -> Self {
        Self {
            deadline: Instant::now() + duration,
            registered: false,
            cancelled: Rc::new(Cell::new(false)),
        }
    }

    /// The instant at which the sleep completes.
    pub fn deadline(&self) -> Instant {
        self.deadline
    }
}

impl Future for Sleep {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if Instant::now() >= this.deadline {
            return Poll::Ready(());
        }

        if !this.registered {
            if !suspend::may_suspend() {
                return Poll::Pending;
            }

            let scheduler = context::scheduler().expect("Sleep polled outside of runtime");
            scheduler.register_timer(this.deadline, cx.waker().clone(), this.cancelled.clone());
            this.registered = true;
        }

        Poll::Pending
    }
}

impl Drop for Sleep {
    fn drop(&mut self) {
        self.cancelled.set(true);
    }
}
