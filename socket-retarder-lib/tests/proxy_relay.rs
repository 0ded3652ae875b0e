#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use socket_retarder_lib::config::Distribution;
use socket_retarder_lib::frame::{self, ConnectRequest, REPLY_LEN};
use socket_retarder_lib::{tcp, DelaySampler, PendingBytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Descriptor handle the fake application claims in its control frames.
const APP_FD: i32 = 777;

async fn spawn_proxy(distribution: Distribution) -> (Arc<PendingBytes>, u16) {
    let pending = Arc::new(PendingBytes::new());
    let delays = DelaySampler::new(distribution);
    let (port_tx, port_rx) = oneshot::channel();
    tokio::spawn(tcp::run(Arc::clone(&pending), delays, port_tx));
    let port = port_rx.await.expect("proxy did not publish a port");
    (pending, port)
}

fn no_delay() -> Distribution {
    Distribution::Uniform { lower_ms: 0, upper_ms: 0 }
}

async fn spawn_echo_server() -> TestResult<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((mut s, _)) = listener.accept().await else {
                continue;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                while let Ok(n) = s.read(&mut buf).await {
                    if n == 0 {
                        break;
                    }
                    if s.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
    Ok(addr)
}

/// Connect to the proxy and run the control handshake for `dest`.
async fn divert(port: u16, dest: SocketAddr) -> TestResult<(TcpStream, i32)> {
    let SocketAddr::V4(dest) = dest else {
        return Err("expected an ipv4 destination".into());
    };
    let mut client = TcpStream::connect(("127.0.0.1", port)).await?;
    let request = ConnectRequest::new(APP_FD, dest);
    client.write_all(&request.encode()).await?;
    let mut reply = [0u8; REPLY_LEN];
    client.read_exact(&mut reply).await?;
    Ok((client, frame::decode_reply(&reply)))
}

#[tokio::test]
async fn echo_round_trip_preserves_bytes() -> TestResult<()> {
    let (pending, port) = spawn_proxy(no_delay()).await;
    let echo = spawn_echo_server().await?;

    let (mut client, rc) = divert(port, echo).await?;
    assert_eq!(rc, 0, "handshake reply should be success");

    let payload: Vec<u8> = (0x01..=0x10).collect();
    pending.insert(APP_FD);
    pending.add(APP_FD, payload.len());
    client.write_all(&payload).await?;

    let mut received = vec![0u8; payload.len()];
    timeout(Duration::from_secs(5), client.read_exact(&mut received)).await??;
    assert_eq!(received, payload);

    // The client->server burst has traversed the relay, so the accounted
    // bytes must be gone by the time the echo came back.
    assert_eq!(pending.count(APP_FD), Some(0));
    Ok(())
}

#[tokio::test]
async fn failed_upstream_connect_reports_errno() -> TestResult<()> {
    let (_pending, port) = spawn_proxy(no_delay()).await;

    // Bind then drop to get a loopback port with nothing listening.
    let unused = TcpListener::bind("127.0.0.1:0").await?;
    let dead = unused.local_addr()?;
    drop(unused);

    let (_client, rc) = divert(port, dead).await?;
    assert_eq!(rc, -libc::ECONNREFUSED);
    Ok(())
}

#[tokio::test]
async fn client_to_server_bursts_are_delayed() -> TestResult<()> {
    let delay = Distribution::Uniform { lower_ms: 150, upper_ms: 151 };
    let (pending, port) = spawn_proxy(delay).await;
    let echo = spawn_echo_server().await?;

    let (mut client, rc) = divert(port, echo).await?;
    assert_eq!(rc, 0);

    pending.insert(APP_FD);
    pending.add(APP_FD, 4);
    let start = Instant::now();
    client.write_all(b"ping").await?;
    let mut received = [0u8; 4];
    timeout(Duration::from_secs(5), client.read_exact(&mut received)).await??;
    assert!(
        start.elapsed() >= Duration::from_millis(150),
        "burst arrived after {:?}",
        start.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn server_to_client_direction_is_not_delayed() -> TestResult<()> {
    let delay = Distribution::Uniform { lower_ms: 2_000, upper_ms: 2_001 };
    let (_pending, port) = spawn_proxy(delay).await;

    // Greeter pushes bytes as soon as the connection lands; the client never
    // writes, so the configured delay has nothing to shape.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let greeter = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((mut s, _)) = listener.accept().await else {
                continue;
            };
            let _ = s.write_all(b"hello").await;
        }
    });

    let (mut client, rc) = divert(port, greeter).await?;
    assert_eq!(rc, 0);

    let start = Instant::now();
    let mut received = [0u8; 5];
    timeout(Duration::from_secs(5), client.read_exact(&mut received)).await??;
    assert_eq!(&received, b"hello");
    assert!(
        start.elapsed() < Duration::from_millis(1_000),
        "reverse direction stalled for {:?}",
        start.elapsed()
    );
    Ok(())
}

#[tokio::test]
async fn relay_delivers_split_writes_in_order() -> TestResult<()> {
    let (pending, port) = spawn_proxy(no_delay()).await;
    let echo = spawn_echo_server().await?;

    let (mut client, rc) = divert(port, echo).await?;
    assert_eq!(rc, 0);

    pending.insert(APP_FD);
    let chunks: Vec<Vec<u8>> = vec![b"alpha".to_vec(), b"beta".to_vec(), b"gamma".to_vec()];
    let total: usize = chunks.iter().map(Vec::len).sum();
    for chunk in &chunks {
        pending.add(APP_FD, chunk.len());
        client.write_all(chunk).await?;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let mut received = vec![0u8; total];
    timeout(Duration::from_secs(5), client.read_exact(&mut received)).await??;
    let expected: Vec<u8> = chunks.concat();
    assert_eq!(received, expected);
    assert_eq!(pending.count(APP_FD), Some(0));
    Ok(())
}

#[tokio::test]
async fn client_close_reaches_the_server_as_eof() -> TestResult<()> {
    let (_pending, port) = spawn_proxy(no_delay()).await;

    // Server counts bytes until EOF and reports the total.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let sink = listener.local_addr()?;
    let (total_tx, mut total_rx) = mpsc::channel::<usize>(1);
    tokio::spawn(async move {
        let Ok((mut s, _)) = listener.accept().await else {
            return;
        };
        let mut buf = [0u8; 1024];
        let mut total = 0;
        while let Ok(n) = s.read(&mut buf).await {
            if n == 0 {
                break;
            }
            total += n;
        }
        let _ = total_tx.send(total).await;
    });

    let (mut client, rc) = divert(port, sink).await?;
    assert_eq!(rc, 0);
    client.write_all(&[0xAB; 10]).await?;
    drop(client);

    let total = timeout(Duration::from_secs(5), total_rx.recv())
        .await?
        .ok_or("server never reported")?;
    assert_eq!(total, 10);
    Ok(())
}

#[tokio::test]
async fn dead_relay_releases_pending_bytes() -> TestResult<()> {
    let (pending, port) = spawn_proxy(no_delay()).await;

    // Upstream slams the door immediately after accepting.
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let slammer = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((s, _)) = listener.accept().await else {
                continue;
            };
            drop(s);
        }
    });

    // Account bytes the relay will never get to drain, before it can even
    // start: its exit path must still release them.
    pending.insert(APP_FD);
    pending.add(APP_FD, 2_048);

    let (client, rc) = divert(port, slammer).await?;
    assert_eq!(rc, 0);
    drop(client);

    let drained = timeout(Duration::from_secs(5), async {
        loop {
            if pending.count(APP_FD) == Some(0) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;
    assert!(drained.is_ok(), "pending bytes were never released");
    Ok(())
}
