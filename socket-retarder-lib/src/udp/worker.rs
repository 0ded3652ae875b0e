#![forbid(unsafe_code)]

use std::sync::Arc;
use std::thread;

use tracing::{debug, warn};

use crate::pending::PendingBytes;
use crate::udp::queue::{EgressItem, TimedQueue};

/// Seam between the egress worker and the next-layer `sendto`.
///
/// Production wraps the resolved libc symbol; tests record dispatches.
pub trait Transmit: Send + Sync + 'static {
    fn transmit(&self, item: &EgressItem) -> std::io::Result<usize>;
}

impl<F> Transmit for F
where
    F: Fn(&EgressItem) -> std::io::Result<usize> + Send + Sync + 'static,
{
    fn transmit(&self, item: &EgressItem) -> std::io::Result<usize> {
        self(item)
    }
}

/// Single consumer thread draining the timed queue into the next layer.
pub struct EgressWorker;

impl EgressWorker {
    /// Spawn the worker. It runs for the life of the process; the handle is
    /// detached.
    pub fn spawn(
        queue: Arc<TimedQueue>,
        pending: Arc<PendingBytes>,
        transmit: Arc<dyn Transmit>,
    ) {
        let spawned = thread::Builder::new()
            .name("sockret-udp".into())
            .spawn(move || Self::run(queue, pending, transmit));
        if let Err(e) = spawned {
            crate::fatal!("cannot spawn udp egress worker: {e}");
        }
    }

    fn run(queue: Arc<TimedQueue>, pending: Arc<PendingBytes>, transmit: Arc<dyn Transmit>) {
        loop {
            let item = queue.pop();
            let len = item.payload.len();
            // No locks held across the next-layer call. Failures are not
            // retried; the pending bytes are released either way so a close
            // blocked on this descriptor cannot hang. The descriptor may
            // legitimately already be gone (EBADF) if the application closed
            // it between enqueue and dispatch.
            match transmit.transmit(&item) {
                Ok(sent) => {
                    debug!(fd = item.fd, len, sent, "datagram dispatched");
                }
                Err(e) => {
                    warn!(fd = item.fd, len, error = %e, "next-layer sendto failed, dropping datagram");
                }
            }
            pending.sub(item.fd, len);
        }
    }
}
