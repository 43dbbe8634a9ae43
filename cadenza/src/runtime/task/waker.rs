use crate::runtime::task::TaskId;

use std::collections::VecDeque;
use std::mem;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{RawWaker, RawWakerVTable, Waker};

/// Wakeups recorded since the scheduler last looked.
///
/// Wakers only append task ids here; the scheduler turns them into state
/// transitions between polls, so waking never re-enters scheduler state that
/// is borrowed by the task doing the waking.
pub(crate) struct Inbox {
    woken: Mutex<VecDeque<TaskId>>,
}

impl Inbox {
    pub(crate) fn new() -> Self {
        Self {
            woken: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, task: TaskId) {
        self.woken
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(task);
    }

    /// Takes every recorded wakeup, oldest first.
    pub(crate) fn drain(&self) -> VecDeque<TaskId> {
        mem::take(&mut *self.woken.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

/// Data behind a task waker.
struct WakeHandle {
    task: TaskId,
    inbox: Arc<Inbox>,
}

static VTABLE: RawWakerVTable = RawWakerVTable::new(clone_raw, wake_raw, wake_by_ref_raw, drop_raw);

/// Creates the [`Waker`] handed to `task` while it is polled.
///
/// # Safety
///
/// The pointer stored inside the `RawWaker` comes from `Arc::into_raw` and
/// every vtable function below keeps the reference count balanced.
pub(crate) fn make_waker(task: TaskId, inbox: Arc<Inbox>) -> Waker {
    let handle = Arc::new(WakeHandle { task, inbox });
    unsafe { Waker::from_raw(RawWaker::new(Arc::into_raw(handle).cast(), &VTABLE)) }
}

fn clone_raw(ptr: *const ()) -> RawWaker {
    let arc = unsafe { Arc::<WakeHandle>::from_raw(ptr.cast()) };
    let cloned = arc.clone();
    mem::forget(arc);

    RawWaker::new(Arc::into_raw(cloned).cast(), &VTABLE)
}

fn wake_raw(ptr: *const ()) {
    let arc = unsafe { Arc::<WakeHandle>::from_raw(ptr.cast()) };
    arc.inbox.push(arc.task);
}

fn wake_by_ref_raw(ptr: *const ()) {
    let arc = unsafe { Arc::<WakeHandle>::from_raw(ptr.cast()) };
    arc.inbox.push(arc.task);
    mem::forget(arc);
}

fn drop_raw(ptr: *const ()) {
    unsafe { drop(Arc::<WakeHandle>::from_raw(ptr.cast())) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wakes_are_recorded_in_order() {
        let inbox = Arc::new(Inbox::new());
        let first = make_waker(TaskId::new(1), inbox.clone());
        let second = make_waker(TaskId::new(2), inbox.clone());

        second.wake_by_ref();
        first.clone().wake();
        second.wake();

        let woken: Vec<_> = inbox.drain().into_iter().collect();
        assert_eq!(
            woken,
            [TaskId::new(2), TaskId::new(1), TaskId::new(2)]
        );
        assert!(inbox.drain().is_empty());
    }

    #[test]
    fn dropping_wakers_releases_the_handle() {
        let inbox = Arc::new(Inbox::new());
        let waker = make_waker(TaskId::new(7), inbox.clone());
        let clone = waker.clone();

        assert_eq!(Arc::strong_count(&inbox), 2);
        drop(waker);
        drop(clone);
        assert_eq!(Arc::strong_count(&inbox), 1);
    }
}
