//
// src/proxy/mod.rs
//
mod backend;
mod context;
mod proxy;

pub use backend::{Backend, ConnectionGuard, DEFAULT_FAILURE_THRESHOLD};
pub use context::RequestContext;
pub use proxy::{PeerAddr, Proxy, ProxyError};
