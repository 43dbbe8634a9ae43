use std::cell::Cell;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;
use std::task::Waker;
use std::time::Instant;

/// An entry in the timer queue.
///
/// `TimerEntry` represents a scheduled wake-up at a specific deadline. The
/// entry may be cancelled before it fires by the sleep future that owns it.
pub(crate) struct TimerEntry {
    /// The time at which the timer should fire.
    pub(crate) deadline: Instant,

    /// Insertion order, breaking ties between equal deadlines.
    seq: u64,

    /// Waker to notify when the deadline is reached.
    pub(crate) waker: Waker,

    /// Cancellation flag shared with the associated sleep future.
    pub(crate) cancelled: Rc<Cell<bool>>,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Reversed so that a `BinaryHeap<TimerEntry>` pops the earliest
    /// deadline first.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .deadline
            .cmp(&self.deadline)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Min-heap of pending timers.
#[derive(Default)]
pub(crate) struct Timers {
    heap: BinaryHeap<TimerEntry>,
    next_seq: u64,
}

impl Timers {
    pub(crate) fn insert(&mut self, deadline: Instant, waker: Waker, cancelled: Rc<Cell<bool>>) {
        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(TimerEntry {
            deadline,
            seq,
            waker,
            cancelled,
        });
    }

    /// Removes every timer due at `now` and returns the wakers to notify.
    pub(crate) fn expire(&mut self, now: Instant) -> Vec<Waker> {
        let mut due = Vec::new();

        while self.heap.peek().is_some_and(|entry| entry.deadline <= now) {
            let Some(entry) = self.heap.pop() else { break };

            if !entry.cancelled.get() {
                due.push(entry.waker);
            }
        }

        due
    }

    /// Earliest deadline among timers that were not cancelled.
    pub(crate) fn next_deadline(&mut self) -> Option<Instant> {
        while self.heap.peek().is_some_and(|entry| entry.cancelled.get()) {
            self.heap.pop();
        }

        self.heap.peek().map(|entry| entry.deadline)
    }

    /// Whether some timer can still fire.
    pub(crate) fn armed(&mut self) -> bool {
        self.next_deadline().is_some()
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    pub(crate) fn clear(&mut self) {
        self.heap.clear();
    }
}
