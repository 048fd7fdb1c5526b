//! Timer message queue for the port's cooperative scheduling.
//!
//! Delays and retries are expressed by posting messages here and returning;
//! the embedder drives delivery by calling back into the port at
//! `poll_timeout()`. Messages posted with a zero delay run on the next
//! processing pass, never synchronously from the posting call.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Index of an entry in the port's entry arena. Entries are never removed
/// before the port itself, so indices stay valid for the port's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct EntryId(pub(crate) usize);

/// Timer messages addressed to port components.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) enum TimerMessage {
    /// Soft connect timeout for an entry's in-flight server attempt; also
    /// posted with zero delay to re-enter failover after a synchronous
    /// socket-creation failure.
    ConnectTimeout(EntryId),
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Scheduled {
    due: Instant,
    seq: u64,
    message: TimerMessage,
}

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    heap: BinaryHeap<Reverse<Scheduled>>,
    seq: u64,
}

impl TimerQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Post a message for the next processing pass.
    pub(crate) fn post(&mut self, now: Instant, message: TimerMessage) {
        self.post_delayed(now, Duration::ZERO, message);
    }

    /// Post a message due `delay` after `now`.
    pub(crate) fn post_delayed(&mut self, now: Instant, delay: Duration, message: TimerMessage) {
        self.seq += 1;
        self.heap.push(Reverse(Scheduled {
            due: now + delay,
            seq: self.seq,
            message,
        }));
    }

    /// Pop the next message due at or before `now`, in (due, post) order.
    pub(crate) fn pop_due(&mut self, now: Instant) -> Option<TimerMessage> {
        if self.heap.peek().is_some_and(|Reverse(s)| s.due <= now) {
            self.heap.pop().map(|Reverse(s)| s.message)
        } else {
            None
        }
    }

    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        self.heap.peek().map(|Reverse(s)| s.due)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_delay_is_not_synchronous() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.post(now, TimerMessage::ConnectTimeout(EntryId(0)));
        // Due immediately, but only on an explicit pop.
        assert_eq!(queue.next_deadline(), Some(now));
        assert_eq!(
            queue.pop_due(now),
            Some(TimerMessage::ConnectTimeout(EntryId(0)))
        );
        assert_eq!(queue.pop_due(now), None);
    }

    #[test]
    fn test_delivery_order_by_due_then_post() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.post_delayed(
            now,
            Duration::from_millis(20),
            TimerMessage::ConnectTimeout(EntryId(2)),
        );
        queue.post(now, TimerMessage::ConnectTimeout(EntryId(0)));
        queue.post(now, TimerMessage::ConnectTimeout(EntryId(1)));

        let later = now + Duration::from_millis(20);
        assert_eq!(
            queue.pop_due(later),
            Some(TimerMessage::ConnectTimeout(EntryId(0)))
        );
        assert_eq!(
            queue.pop_due(later),
            Some(TimerMessage::ConnectTimeout(EntryId(1)))
        );
        assert_eq!(
            queue.pop_due(later),
            Some(TimerMessage::ConnectTimeout(EntryId(2)))
        );
    }

    #[test]
    fn test_future_message_not_popped() {
        let mut queue = TimerQueue::new();
        let now = Instant::now();
        queue.post_delayed(
            now,
            Duration::from_secs(3),
            TimerMessage::ConnectTimeout(EntryId(0)),
        );
        assert_eq!(queue.pop_due(now), None);
        assert_eq!(queue.next_deadline(), Some(now + Duration::from_secs(3)));
    }
}
