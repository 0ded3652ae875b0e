//! Next-layer resolution through the dynamic loader.

use std::mem;
use std::sync::OnceLock;

use libc::{c_char, c_int, c_void, msghdr, size_t, sockaddr, socklen_t, ssize_t};
use socket_retarder_lib::fatal;

pub type ConnectFn = unsafe extern "C" fn(c_int, *const sockaddr, socklen_t) -> c_int;
pub type SendToFn = unsafe extern "C" fn(
    c_int,
    *const c_void,
    size_t,
    c_int,
    *const sockaddr,
    socklen_t,
) -> ssize_t;
pub type SendMsgFn = unsafe extern "C" fn(c_int, *const msghdr, c_int) -> ssize_t;
pub type SendFn = unsafe extern "C" fn(c_int, *const c_void, size_t, c_int) -> ssize_t;
pub type CloseFn = unsafe extern "C" fn(c_int) -> c_int;

/// Original implementations of every interposed symbol. Resolved once,
/// immutable afterwards.
pub struct NextLayer {
    pub connect: ConnectFn,
    pub sendto: SendToFn,
    pub sendmsg: SendMsgFn,
    pub send: SendFn,
    pub close: CloseFn,
}

static NEXT: OnceLock<NextLayer> = OnceLock::new();

pub fn next() -> &'static NextLayer {
    NEXT.get_or_init(|| unsafe {
        NextLayer {
            connect: mem::transmute::<*mut c_void, ConnectFn>(resolve(c"connect")),
            sendto: mem::transmute::<*mut c_void, SendToFn>(resolve(c"sendto")),
            sendmsg: mem::transmute::<*mut c_void, SendMsgFn>(resolve(c"sendmsg")),
            send: mem::transmute::<*mut c_void, SendFn>(resolve(c"send")),
            close: mem::transmute::<*mut c_void, CloseFn>(resolve(c"close")),
        }
    })
}

/// `dlsym(RTLD_NEXT)` lookup. A miss means the loader cannot give us back
/// the real implementation, and every interposed call would recurse into
/// itself; nothing to do but abort.
unsafe fn resolve(symbol: &std::ffi::CStr) -> *mut c_void {
    let ptr = libc::dlsym(libc::RTLD_NEXT, symbol.as_ptr() as *const c_char);
    if ptr.is_null() {
        fatal!("cannot resolve next-layer symbol {:?}", symbol);
    }
    ptr
}
