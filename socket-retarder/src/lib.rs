//! `LD_PRELOAD` surface: replacement socket symbols that divert traffic
//! through the in-process delay machinery while the original libc
//! implementations stay reachable as the next layer.

mod hooks;
mod next;
mod state;

pub use hooks::{close, connect, send, sendmsg, sendto};
