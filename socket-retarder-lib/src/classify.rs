use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::fd::RawFd;

pub const DNS_PORT: u16 = 53;

/// Interpret a raw `sockaddr` pointer as an IPv4 destination.
///
/// Returns `None` for null pointers, short lengths, and non-AF_INET
/// families; those destinations are never retarded.
///
/// # Safety
///
/// `addr`, when non-null, must point to at least `addrlen` readable bytes,
/// which is exactly the contract the application already owes the kernel for
/// the call being interposed.
pub unsafe fn sockaddr_to_v4(
    addr: *const libc::sockaddr,
    addrlen: libc::socklen_t,
) -> Option<SocketAddrV4> {
    if addr.is_null() || (addrlen as usize) < mem::size_of::<libc::sockaddr_in>() {
        return None;
    }
    if (*addr).sa_family != libc::AF_INET as libc::sa_family_t {
        return None;
    }
    let sin = &*(addr as *const libc::sockaddr_in);
    let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
    let port = u16::from_be(sin.sin_port);
    Some(SocketAddrV4::new(ip, port))
}

/// `getsockopt(SO_TYPE)` for the descriptor, or `None` for non-sockets.
pub fn socket_type(fd: RawFd) -> Option<libc::c_int> {
    let mut ty: libc::c_int = 0;
    let mut len = mem::size_of::<libc::c_int>() as libc::socklen_t;
    let rc = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_TYPE,
            &mut ty as *mut libc::c_int as *mut libc::c_void,
            &mut len,
        )
    };
    if rc == 0 {
        Some(ty)
    } else {
        None
    }
}

/// Port-53 traffic is left alone unless DNS retarding was opted into.
fn port_eligible(dest: &SocketAddrV4, dns_retard: bool) -> bool {
    dest.port() != DNS_PORT || dns_retard
}

/// Classification for the interposed `connect`: IPv4 destination, non-DNS
/// (unless opted in), and a stream socket.
pub fn should_retard(fd: RawFd, dest: &SocketAddrV4, dns_retard: bool) -> bool {
    port_eligible(dest, dns_retard) && socket_type(fd) == Some(libc::SOCK_STREAM)
}

/// Classification for the interposed `sendto`: the destination must already
/// have parsed as IPv4; only the DNS exclusion applies.
pub fn udp_eligible(dest: &SocketAddrV4, dns_retard: bool) -> bool {
    port_eligible(dest, dns_retard)
}
