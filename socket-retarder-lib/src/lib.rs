pub mod classify;
pub mod config;
pub mod delay;
pub mod error;
pub mod fault;
pub mod frame;
pub mod pending;
pub mod tcp;
pub mod telemetry;
pub mod udp;

pub use config::{Config, Distribution, FaultProfile};
pub use delay::DelaySampler;
pub use error::{Result, RetarderError};
pub use fault::FaultSampler;
pub use frame::ConnectRequest;
pub use pending::PendingBytes;
pub use udp::queue::{EgressItem, TimedQueue};
pub use udp::worker::{EgressWorker, Transmit};

/// Kills the process after reporting an unrecoverable setup failure.
///
/// Interposition has no error channel back to the application: if the next
/// layer cannot be resolved or the proxy cannot come up, continuing would
/// silently change the semantics of every socket call in the host process.
#[macro_export]
macro_rules! fatal {
    ($($arg:tt)*) => {{
        let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
        eprintln!(
            "socket_retarder: fatal: {} ({}:{}, errno {})",
            format_args!($($arg)*),
            file!(),
            line!(),
            errno
        );
        std::process::abort()
    }};
}
