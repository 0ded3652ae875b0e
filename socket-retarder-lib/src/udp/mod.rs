#![forbid(unsafe_code)]

pub mod queue;
pub mod worker;

use std::os::fd::RawFd;
use std::sync::Arc;

use socket2::SockAddr;
use tracing::trace;

use crate::delay::DelaySampler;
use crate::fault::FaultSampler;
use crate::pending::PendingBytes;
use crate::udp::queue::{EgressItem, TimedQueue};

/// Retarded `sendto` path: damage, account, enqueue, maybe duplicate.
///
/// The drop roll happens before this point (a dropped datagram is never
/// copied at all). Returns the length the application is told was sent,
/// which is always the full request.
pub fn submit(
    queue: &Arc<TimedQueue>,
    pending: &PendingBytes,
    delays: &DelaySampler,
    faults: &FaultSampler,
    fd: RawFd,
    mut payload: Vec<u8>,
    addr: SockAddr,
    flags: i32,
) -> usize {
    let len = payload.len();

    if faults.roll_damage() {
        faults.damage(&mut payload);
    }

    // A duplicate accounts its own bytes so close blocks until both copies
    // have drained. Each copy gets an independently drawn delay.
    if faults.roll_duplicate() {
        pending.add(fd, len);
        let delay = delays.sample();
        trace!(fd, len, delay, "datagram duplicated");
        queue.push(EgressItem::new(fd, payload.clone(), addr.clone(), flags), delay);
    }

    pending.add(fd, len);
    let delay = delays.sample();
    trace!(fd, len, delay, "datagram enqueued");
    queue.push(EgressItem::new(fd, payload, addr, flags), delay);

    len
}
