//! The private, priority-ordered inbound queue of one agent.
//!
//! Higher-priority messages drain first; equal priorities drain in arrival
//! order. The queue is unbounded. Only the owning agent can receive from it;
//! everything else reaches it through `Inbox::deliver` or
//! `Agent::receive_message`.

use std::{
    cmp::Ordering,
    collections::BinaryHeap,
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tokio::{sync::Notify, time::Instant};

use conductor_contracts::message::Message;

/// A queued message plus its arrival sequence number.
struct Queued {
    sequence: u64,
    message: Message,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap is a max-heap: higher priority first, then the older arrival.
    fn cmp(&self, other: &Self) -> Ordering {
        self.message
            .priority()
            .cmp(&other.message.priority())
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

struct Queue {
    heap: BinaryHeap<Queued>,
    next_sequence: u64,
}

pub(crate) struct Mailbox {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl Mailbox {
    pub(crate) fn new() -> Self {
        Self {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                next_sequence: 0,
            }),
            notify: Notify::new(),
        }
    }

    pub(crate) fn push(&self, message: Message) {
        {
            let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
            let sequence = queue.next_sequence;
            queue.next_sequence += 1;
            queue.heap.push(Queued { sequence, message });
        }
        self.notify.notify_one();
    }

    pub(crate) fn try_pop(&self) -> Option<Message> {
        let mut queue = self.queue.lock().unwrap_or_else(PoisonError::into_inner);
        queue.heap.pop().map(|q| q.message)
    }

    /// Wait up to `timeout` for the highest-priority message.
    ///
    /// Returns `None` on timeout, or early when woken with nothing queued
    /// (a `wake()` nudge or a stale notification). Callers treat `None` as
    /// "nothing yet" and poll again.
    pub(crate) async fn recv_timeout(&self, timeout: Duration) -> Option<Message> {
        let notified = self.notify.notified();
        if let Some(message) = self.try_pop() {
            return Some(message);
        }
        let _ = tokio::time::timeout_at(Instant::now() + timeout, notified).await;
        self.try_pop()
    }

    /// Wake a pending `recv_timeout` without enqueuing anything.
    pub(crate) fn wake(&self) {
        self.notify.notify_one();
    }

    pub(crate) fn len(&self) -> usize {
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .heap
            .len()
    }
}
