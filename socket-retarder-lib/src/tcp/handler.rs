#![forbid(unsafe_code)]

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::delay::DelaySampler;
use crate::error::{Result, RetarderError};
use crate::frame::{self, ConnectRequest, FRAME_LEN};
use crate::pending::PendingBytes;

const RELAY_BUF_LEN: usize = 64 * 1024;

/// Outcome of draining one readable wakeup.
enum Drained {
    /// The peer closed; a readable notification yielded zero bytes.
    Eof,
    /// Bytes moved downstream this burst (possibly zero on a spurious wakeup).
    Bytes(usize),
}

/// Accepts diverted connections and runs one relay worker per client.
pub struct ProxyHandler {
    pending: Arc<PendingBytes>,
    delays: DelaySampler,
}

impl ProxyHandler {
    pub fn new(pending: Arc<PendingBytes>, delays: DelaySampler) -> Self {
        Self { pending, delays }
    }

    pub async fn run(&self, listener: TcpListener) {
        loop {
            let (client, addr) = match listener.accept().await {
                Ok(pair) => pair,
                // A dead acceptor would leave every subsequent diverted
                // connect hanging against the loopback listener.
                Err(e) => crate::fatal!("cannot accept diverted connection: {e}"),
            };
            debug!(%addr, "accepted diverted connection");

            let pending = Arc::clone(&self.pending);
            let delays = self.delays;
            tokio::spawn(async move {
                match serve(pending, delays, client).await {
                    Ok(()) => debug!(%addr, "relay finished"),
                    Err(e) => debug!(%addr, error = %e, "relay terminated"),
                }
            });
        }
    }
}

/// Per-client worker: control handshake, downstream dial, then the relay.
async fn serve(pending: Arc<PendingBytes>, delays: DelaySampler, client: TcpStream) -> Result<()> {
    // The control frame always precedes application payload on the diverted
    // descriptor, so a straight blocking read cannot swallow data.
    let mut raw = [0u8; FRAME_LEN];
    read_exact(&client, &mut raw).await?;
    let request = ConnectRequest::decode(&raw)?;
    info!(fd = request.fd, dest = %request.dest, "relaying diverted connection");

    // Worker threads carry the reentrancy guard, so this dial reaches the
    // next layer instead of re-entering the interposed connect.
    let upstream = TcpStream::connect(SocketAddr::V4(request.dest)).await;
    let upstream = match upstream {
        Ok(s) => s,
        Err(e) => {
            let rc = -e.raw_os_error().unwrap_or(libc::ECONNREFUSED);
            warn!(dest = %request.dest, error = %e, "upstream connect failed");
            let _ = write_all(&client, &frame::encode_reply(rc)).await;
            return Err(RetarderError::Proxy(format!("upstream connect failed: {e}")));
        }
    };
    write_all(&client, &frame::encode_reply(0)).await?;

    let result = relay(&pending, &delays, request.fd, &client, &upstream).await;
    // Bytes still accounted to the diverted descriptor can never drain once
    // the relay is gone; release them so a pending close does not hang.
    pending.release_all(request.fd);
    result
}

/// Bidirectional shuttle. Client→server bursts are held back by a freshly
/// sampled delay and released from the original descriptor's pending count;
/// server→client bursts pass straight through.
async fn relay(
    pending: &PendingBytes,
    delays: &DelaySampler,
    app_fd: i32,
    client: &TcpStream,
    upstream: &TcpStream,
) -> Result<()> {
    let mut buf = vec![0u8; RELAY_BUF_LEN];
    loop {
        tokio::select! {
            ready = client.readable() => {
                ready?;
                // Delay is applied per readable burst, not per byte: the
                // sleep shapes latency while the drain keeps throughput.
                let delay = delays.sample();
                if delay > 0 {
                    sleep(Duration::from_millis(delay as u64)).await;
                }
                match drain(client, upstream, &mut buf).await? {
                    Drained::Eof => break,
                    Drained::Bytes(n) if n > 0 => pending.sub(app_fd, n),
                    Drained::Bytes(_) => {}
                }
            }
            ready = upstream.readable() => {
                ready?;
                match drain(upstream, client, &mut buf).await? {
                    Drained::Eof => break,
                    Drained::Bytes(_) => {}
                }
            }
        }
    }
    Ok(())
}

/// Move every currently readable byte from `from` to `to`.
async fn drain(from: &TcpStream, to: &TcpStream, buf: &mut [u8]) -> io::Result<Drained> {
    let mut total = 0;
    loop {
        match from.try_read(buf) {
            Ok(0) => {
                if total == 0 {
                    return Ok(Drained::Eof);
                }
                // The close races the data; report the bytes now, the next
                // wakeup observes the EOF.
                return Ok(Drained::Bytes(total));
            }
            Ok(n) => {
                write_all(to, &buf[..n]).await?;
                total += n;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) => return Err(e),
        }
    }
    Ok(Drained::Bytes(total))
}

async fn write_all(to: &TcpStream, mut data: &[u8]) -> io::Result<()> {
    while !data.is_empty() {
        to.writable().await?;
        match to.try_write(data) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => data = &data[n..],
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

async fn read_exact(from: &TcpStream, mut buf: &mut [u8]) -> io::Result<()> {
    while !buf.is_empty() {
        from.readable().await?;
        match from.try_read(buf) {
            Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
            Ok(n) => {
                let rest = buf;
                buf = &mut rest[n..];
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
