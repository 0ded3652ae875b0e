//! Replacement implementations of the interposed socket symbols.
//!
//! Every entry point forwards untouched unless classification selects the
//! retarded path, and always presents the exact calling convention of the
//! primitive it replaces.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::slice;
use std::thread;
use std::time::Duration;

use libc::{c_int, c_void, msghdr, size_t, sockaddr, socklen_t, ssize_t};
use socket2::SockAddr;
use socket_retarder_lib::frame::{self, ConnectRequest, REPLY_LEN};
use socket_retarder_lib::{classify, fatal, udp};
use tracing::debug;

use crate::next;
use crate::state;

/// # Safety
///
/// Called by the dynamic loader in place of libc `connect`; `addr` follows
/// the kernel contract for that call.
#[no_mangle]
pub unsafe extern "C" fn connect(fd: c_int, addr: *const sockaddr, addrlen: socklen_t) -> c_int {
    let next = next::next();
    if state::in_internal_thread() {
        return (next.connect)(fd, addr, addrlen);
    }
    let Some(dest) = classify::sockaddr_to_v4(addr, addrlen) else {
        return (next.connect)(fd, addr, addrlen);
    };

    let st = state::state();
    if !classify::should_retard(fd, &dest, st.config.dns_retard) {
        return (next.connect)(fd, addr, addrlen);
    }
    debug!(fd, dest = %dest, "diverting connect through proxy");

    let delay = st.delays.sample();
    if delay > 0 {
        thread::sleep(Duration::from_millis(delay as u64));
    }

    // The synthetic loopback connect must be synchronous even on a
    // non-blocking descriptor; the application's flags are restored before
    // it can observe them.
    let flags = libc::fcntl(fd, libc::F_GETFL);
    if flags < 0 {
        fatal!("fcntl(F_GETFL) failed for diverted descriptor {fd}");
    }
    let nonblocking = flags & libc::O_NONBLOCK != 0;
    if nonblocking {
        libc::fcntl(fd, libc::F_SETFL, flags & !libc::O_NONBLOCK);
    }

    let proxy = SockAddr::from(SocketAddrV4::new(Ipv4Addr::LOCALHOST, st.proxy_port));
    if (next.connect)(fd, proxy.as_ptr().cast(), proxy.len()) != 0 {
        fatal!("connect to in-process proxy on port {} failed", st.proxy_port);
    }

    if nonblocking {
        libc::fcntl(fd, libc::F_SETFL, flags);
    }

    // Control frame first, ahead of any application payload.
    let request = ConnectRequest { fd, dest, addrlen: addrlen as u32 };
    if send_all(fd, &request.encode()) < 0 {
        return -1;
    }

    st.pending.insert(fd);

    // The worker replies once the real connect has finished; its result is
    // what the application gets to see.
    let mut reply = [0u8; REPLY_LEN];
    if recv_exact(fd, &mut reply) < 0 {
        return -1;
    }
    let rc = frame::decode_reply(&reply);
    debug!(fd, rc, "proxy connect reply");
    if rc < 0 {
        *libc::__errno_location() = -rc;
        return -1;
    }
    0
}

/// # Safety
///
/// Called by the dynamic loader in place of libc `sendto`; `buf` and
/// `dest_addr` follow the kernel contract for that call.
#[no_mangle]
pub unsafe extern "C" fn sendto(
    fd: c_int,
    buf: *const c_void,
    len: size_t,
    flags: c_int,
    dest_addr: *const sockaddr,
    addrlen: socklen_t,
) -> ssize_t {
    let next = next::next();
    if state::in_internal_thread() || len == 0 {
        return (next.sendto)(fd, buf, len, flags, dest_addr, addrlen);
    }

    let st = state::state();
    if st.faults.roll_drop() {
        // Silently swallowed: the application is told the full length went
        // out and nothing is copied or enqueued.
        debug!(fd, len, "datagram dropped");
        return len as ssize_t;
    }

    let Some(dest) = classify::sockaddr_to_v4(dest_addr, addrlen) else {
        return (next.sendto)(fd, buf, len, flags, dest_addr, addrlen);
    };
    if !classify::udp_eligible(&dest, st.config.dns_retard) {
        return (next.sendto)(fd, buf, len, flags, dest_addr, addrlen);
    }

    // Owned copies; the caller may reuse or free its buffers the moment we
    // return.
    let payload = slice::from_raw_parts(buf as *const u8, len).to_vec();
    let addr = SockAddr::from(dest);
    let sent = udp::submit(&st.queue, &st.pending, &st.delays, &st.faults, fd, payload, addr, flags);
    sent as ssize_t
}

/// # Safety
///
/// Called by the dynamic loader in place of libc `sendmsg`.
#[no_mangle]
pub unsafe extern "C" fn sendmsg(fd: c_int, msg: *const msghdr, flags: c_int) -> ssize_t {
    let next = next::next();
    if !state::in_internal_thread() {
        // Delay only; scatter-gather payloads are not queued or accounted.
        let st = state::state();
        let delay = st.delays.sample();
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
    }
    (next.sendmsg)(fd, msg, flags)
}

/// # Safety
///
/// Called by the dynamic loader in place of libc `send`.
#[no_mangle]
pub unsafe extern "C" fn send(fd: c_int, buf: *const c_void, len: size_t, flags: c_int) -> ssize_t {
    let next = next::next();
    if state::in_internal_thread() {
        return (next.send)(fd, buf, len, flags);
    }
    let Some(st) = state::try_state() else {
        return (next.send)(fd, buf, len, flags);
    };

    // Accounting applies only to descriptors already routed through the
    // machinery; everything else is a plain passthrough.
    st.pending.add_if_present(fd, len);
    let rc = (next.send)(fd, buf, len, flags);
    // Reconcile with what the next layer actually accepted, so close never
    // waits on bytes that were never in flight.
    if rc < 0 {
        st.pending.sub(fd, len);
    } else if (rc as size_t) < len {
        st.pending.sub(fd, len - rc as size_t);
    }
    rc
}

/// # Safety
///
/// Called by the dynamic loader in place of libc `close`.
#[no_mangle]
pub unsafe extern "C" fn close(fd: c_int) -> c_int {
    let next = next::next();
    if !state::in_internal_thread() {
        if let Some(st) = state::try_state() {
            // Hold the descriptor open until every accounted byte has been
            // handed to the next layer.
            st.pending.wait_and_remove(fd);
        }
    }
    (next.close)(fd)
}

/// Push the whole buffer through the next-layer `send`.
unsafe fn send_all(fd: c_int, data: &[u8]) -> c_int {
    let next = next::next();
    let mut off = 0;
    while off < data.len() {
        // MSG_NOSIGNAL: a dead proxy must surface as EPIPE, not kill the
        // host application with SIGPIPE.
        let rc = (next.send)(
            fd,
            data[off..].as_ptr() as *const c_void,
            data.len() - off,
            libc::MSG_NOSIGNAL,
        );
        if rc < 0 {
            if *libc::__errno_location() == libc::EINTR {
                continue;
            }
            return -1;
        }
        off += rc as usize;
    }
    0
}

/// Blocking read of an exact number of bytes, waiting on readability first
/// so a restored non-blocking flag cannot surface a spurious EAGAIN.
unsafe fn recv_exact(fd: c_int, buf: &mut [u8]) -> c_int {
    let mut off = 0;
    while off < buf.len() {
        let mut pfd = libc::pollfd { fd, events: libc::POLLIN, revents: 0 };
        let rc = libc::poll(&mut pfd, 1, -1);
        if rc < 0 {
            if *libc::__errno_location() == libc::EINTR {
                continue;
            }
            return -1;
        }
        let rc = libc::recv(
            fd,
            buf[off..].as_mut_ptr() as *mut c_void,
            buf.len() - off,
            0,
        );
        if rc < 0 {
            let err = *libc::__errno_location();
            if err == libc::EINTR || err == libc::EAGAIN || err == libc::EWOULDBLOCK {
                continue;
            }
            return -1;
        }
        if rc == 0 {
            *libc::__errno_location() = libc::ECONNRESET;
            return -1;
        }
        off += rc as usize;
    }
    0
}
