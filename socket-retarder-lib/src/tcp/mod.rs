#![forbid(unsafe_code)]

pub mod handler;

use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::ops::RangeInclusive;
use std::sync::Arc;

use socket2::{Domain, Socket, Type};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::info;

use crate::delay::DelaySampler;
use crate::error::{Result, RetarderError};
use crate::fatal;
use crate::pending::PendingBytes;
use handler::ProxyHandler;

/// Loopback ports probed for the indirection listener, first free wins.
pub const PORT_RANGE: RangeInclusive<u16> = 20000..=20500;

/// Accept backlog; the proxy only ever serves descriptors of one process.
const BACKLOG: i32 = 10;

/// Bind the first free loopback port in [`PORT_RANGE`].
fn bind_in_range() -> Result<(StdTcpListener, u16)> {
    for port in PORT_RANGE {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, None)?;
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
        if socket.bind(&addr.into()).is_err() {
            continue;
        }
        socket.listen(BACKLOG)?;
        socket.set_nonblocking(true)?;
        return Ok((socket.into(), port));
    }
    Err(RetarderError::NoProxyPort(*PORT_RANGE.start(), *PORT_RANGE.end()))
}

/// Bind the indirection listener, publish the chosen port, and serve
/// forever.
///
/// The port is delivered through `port_tx` only once the listener is
/// accepting, so a receiver blocked on it needs no spin-wait: when it wakes,
/// diverted connects cannot race the acceptor. Binding failures are fatal;
/// without a listener every diverted connect in the host process would hang.
pub async fn run(
    pending: Arc<PendingBytes>,
    delays: DelaySampler,
    port_tx: oneshot::Sender<u16>,
) {
    let (std_listener, port) = match bind_in_range() {
        Ok(bound) => bound,
        Err(e) => fatal!("cannot bind proxy listener: {e}"),
    };
    let listener = match TcpListener::from_std(std_listener) {
        Ok(l) => l,
        Err(e) => fatal!("cannot register proxy listener: {e}"),
    };
    info!(port, "proxy listener bound");
    let _ = port_tx.send(port);

    let handler = ProxyHandler::new(pending, delays);
    handler.run(listener).await;
}
