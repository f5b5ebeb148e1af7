//! Upstream module: reaching original destinations through an HTTP proxy
//!
//! [`HttpConnectDialer`] implements [`TunnelDialer`] by issuing an HTTP
//! CONNECT to the configured [`ProxyTarget`]. The handler only sees the
//! trait, so tests can substitute any dialer.

mod http_connect;
mod proxy;

pub use http_connect::{
    build_connect_request, parse_response_head, read_response_head, ConnectReply, HttpConnectDialer,
    TunnelDialer, MAX_RESPONSE_HEAD,
};
pub use proxy::{ProxyTarget, ProxyUrl};
