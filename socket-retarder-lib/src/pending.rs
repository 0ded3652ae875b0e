#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::os::fd::RawFd;
use std::sync::{Arc, Condvar, Mutex};

use tracing::warn;

/// Per-descriptor wait-capable counter record.
struct Entry {
    count: i64,
    drained: Arc<Condvar>,
}

impl Entry {
    fn new(count: i64) -> Self {
        Entry { count, drained: Arc::new(Condvar::new()) }
    }
}

/// Tracks bytes the application believes were accepted for transmission but
/// that have not yet been handed to the next layer.
///
/// `close` on a retarded descriptor must not return while its count is
/// non-zero, otherwise pipelined data would be cut off behind the
/// application's back. One mutex guards the map and every counter; each entry
/// carries its own condvar so a closing thread only wakes for its own
/// descriptor.
#[derive(Default)]
pub struct PendingBytes {
    entries: Mutex<HashMap<RawFd, Entry>>,
}

impl PendingBytes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entry with count 0 if none exists.
    pub fn insert(&self, fd: RawFd) {
        let mut entries = self.entries.lock().unwrap();
        entries.entry(fd).or_insert_with(|| Entry::new(0));
    }

    /// Add `n` bytes, creating the entry if needed.
    pub fn add(&self, fd: RawFd, n: usize) {
        let mut entries = self.entries.lock().unwrap();
        entries
            .entry(fd)
            .and_modify(|e| e.count += n as i64)
            .or_insert_with(|| Entry::new(n as i64));
    }

    /// Add `n` bytes only if the descriptor is already tracked.
    ///
    /// This is the `send` path: accounting applies only to descriptors that
    /// were routed through the interposition machinery.
    pub fn add_if_present(&self, fd: RawFd, n: usize) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&fd) {
            e.count += n as i64;
        }
    }

    /// Release `n` bytes; wakes all waiters when the count reaches zero.
    ///
    /// Unknown descriptors are a silent no-op (the descriptor was never
    /// retarded). A count driven below zero is clamped back to zero.
    pub fn sub(&self, fd: RawFd, n: usize) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&fd) {
            e.count -= n as i64;
            if e.count < 0 {
                warn!(fd, count = e.count, "pending byte count underflow, clamping");
                e.count = 0;
            }
            if e.count == 0 {
                e.drained.notify_all();
            }
        }
    }

    /// Block until the descriptor's count reaches zero, then forget it.
    ///
    /// No-op for untracked descriptors.
    pub fn wait_and_remove(&self, fd: RawFd) {
        let mut entries = self.entries.lock().unwrap();
        let drained = match entries.get(&fd) {
            Some(e) => Arc::clone(&e.drained),
            None => return,
        };
        loop {
            let outstanding = entries.get(&fd).map(|e| e.count).unwrap_or(0);
            if outstanding == 0 {
                break;
            }
            entries = drained.wait(entries).unwrap();
        }
        entries.remove(&fd);
    }

    /// Zero the count and wake all waiters, keeping the entry.
    ///
    /// Used when the path that would have drained the bytes is gone (a relay
    /// worker died with data still accounted): whatever is left can never
    /// drain, and a subsequent `close` must not hang on it.
    pub fn release_all(&self, fd: RawFd) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(e) = entries.get_mut(&fd) {
            if e.count != 0 {
                e.count = 0;
                e.drained.notify_all();
            }
        }
    }

    /// Current count, if the descriptor is tracked.
    pub fn count(&self, fd: RawFd) -> Option<i64> {
        self.entries.lock().unwrap().get(&fd).map(|e| e.count)
    }
}
