//! Process-wide singleton wiring the interposition surface to the delay
//! machinery. Everything here is written exactly once, on the first
//! interposed call that needs it, and read without synchronization after.

use std::cell::Cell;
use std::io;
use std::sync::{Arc, OnceLock};

use libc::c_void;
use socket_retarder_lib::udp::queue::EgressItem;
use socket_retarder_lib::udp::worker::Transmit;
use socket_retarder_lib::{
    config, fatal, tcp, telemetry, Config, DelaySampler, EgressWorker, FaultSampler,
    PendingBytes, TimedQueue,
};
use tokio::runtime::Runtime;
use tokio::sync::oneshot;
use tracing::info;

use crate::next;

thread_local! {
    /// Set on threads owned by the retarder itself. Their socket calls must
    /// reach the next layer untouched, otherwise the proxy's own dial of the
    /// original destination would be diverted right back at the proxy.
    static INTERNAL: Cell<bool> = const { Cell::new(false) };
}

pub fn in_internal_thread() -> bool {
    INTERNAL.with(Cell::get)
}

fn mark_internal_thread() {
    INTERNAL.with(|flag| flag.set(true));
}

pub struct Retarder {
    pub config: Config,
    pub pending: Arc<PendingBytes>,
    pub queue: Arc<TimedQueue>,
    pub delays: DelaySampler,
    pub faults: FaultSampler,
    pub proxy_port: u16,
    /// Keeps the proxy's reactor threads alive for the process lifetime.
    _runtime: Runtime,
}

static STATE: OnceLock<Retarder> = OnceLock::new();

/// Full initialization: configuration, telemetry, next-layer symbols, the
/// UDP egress worker, and the TCP proxy. Returns only after the proxy
/// listener is accepting, so callers never observe a half-started retarder.
pub fn state() -> &'static Retarder {
    STATE.get_or_init(init)
}

/// Non-blocking lookup for paths (`send`, `close`) that have nothing to do
/// before the first retarded descriptor exists.
pub fn try_state() -> Option<&'static Retarder> {
    STATE.get()
}

fn init() -> Retarder {
    // Telemetry first so configuration diagnostics have somewhere to go.
    let verbosity = std::env::var("SOCKET_RETARDER_DEBUG")
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0);
    telemetry::init(verbosity);

    let config = config::load_from_env();
    let _ = next::next();

    let pending = Arc::new(PendingBytes::new());
    let queue = Arc::new(TimedQueue::new());
    let delays = DelaySampler::new(config.distribution);
    let faults = FaultSampler::new(config.faults);

    EgressWorker::spawn(Arc::clone(&queue), Arc::clone(&pending), Arc::new(NextTransmit));

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .thread_name("sockret-proxy")
        .on_thread_start(mark_internal_thread)
        .build()
        .unwrap_or_else(|e| fatal!("cannot start proxy runtime: {e}"));

    let (port_tx, port_rx) = oneshot::channel();
    runtime.spawn(tcp::run(Arc::clone(&pending), delays, port_tx));
    let proxy_port = port_rx
        .blocking_recv()
        .unwrap_or_else(|_| fatal!("proxy acceptor died before publishing its port"));

    info!(proxy_port, ?config.distribution, "socket retarder initialized");

    Retarder { config, pending, queue, delays, faults, proxy_port, _runtime: runtime }
}

/// Next-layer `sendto` behind the egress worker's transmit seam.
struct NextTransmit;

impl Transmit for NextTransmit {
    fn transmit(&self, item: &EgressItem) -> io::Result<usize> {
        let next = next::next();
        let rc = unsafe {
            (next.sendto)(
                item.fd,
                item.payload.as_ptr() as *const c_void,
                item.payload.len(),
                item.flags,
                item.addr.as_ptr().cast(),
                item.addr.len(),
            )
        };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(rc as usize)
        }
    }
}
