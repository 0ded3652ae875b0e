#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::os::fd::RawFd;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use socket2::SockAddr;

/// Owned copy of everything needed to replay a datagram on the next layer.
///
/// Payload and address are deep copies taken at enqueue time; the caller's
/// buffers are dead the moment the interposed call returns.
pub struct EgressItem {
    pub fd: RawFd,
    pub payload: Vec<u8>,
    pub addr: SockAddr,
    pub flags: i32,
    pub deadline: Instant,
}

impl EgressItem {
    /// The deadline is assigned by [`TimedQueue::push`].
    pub fn new(fd: RawFd, payload: Vec<u8>, addr: SockAddr, flags: i32) -> Self {
        EgressItem { fd, payload, addr, flags, deadline: Instant::now() }
    }
}

struct QueueEntry {
    item: EgressItem,
    seq: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.item.deadline == other.item.deadline && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the binary heap pops the earliest deadline first.
        other
            .item
            .deadline
            .cmp(&self.item.deadline)
            .then(other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct Inner {
    heap: BinaryHeap<QueueEntry>,
    next_seq: u64,
}

/// Priority queue keyed by absolute wall-clock deadline.
///
/// `pop` parks on a condvar timed wait against the head's deadline and is
/// re-evaluated whenever an insertion displaces the head. Built for a single
/// consumer.
pub struct TimedQueue {
    inner: Mutex<Inner>,
    ready: Condvar,
}

impl Default for TimedQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TimedQueue {
    pub fn new() -> Self {
        TimedQueue {
            inner: Mutex::new(Inner { heap: BinaryHeap::new(), next_seq: 0 }),
            ready: Condvar::new(),
        }
    }

    /// Insert with a deadline `delay_ms` from now. A non-positive delay means
    /// the deadline is already in the past and the item pops immediately.
    pub fn push(&self, mut item: EgressItem, delay_ms: i64) {
        item.deadline = Instant::now() + Duration::from_millis(delay_ms.max(0) as u64);
        let mut inner = self.inner.lock().unwrap();
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.heap.push(QueueEntry { item, seq });
        self.ready.notify_one();
    }

    /// Remove and return the head once its deadline has passed. Blocks while
    /// the queue is empty or the head is still in the future.
    pub fn pop(&self) -> EgressItem {
        let mut inner = self.inner.lock().unwrap();
        loop {
            match inner.heap.peek().map(|e| e.item.deadline) {
                None => {
                    inner = self.ready.wait(inner).unwrap();
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if deadline <= now {
                        return inner.heap.pop().unwrap().item;
                    }
                    let (guard, _timeout) =
                        self.ready.wait_timeout(inner, deadline - now).unwrap();
                    inner = guard;
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
