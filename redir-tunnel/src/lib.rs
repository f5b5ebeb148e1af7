//! redir-tunnel: transparent TCP tunnel through an HTTP CONNECT proxy
//!
//! Connections that a NAT `REDIRECT` rule sends to a local port are accepted,
//! their original destination is recovered with `SO_ORIGINAL_DST`, and the
//! bytes are relayed through an HTTP proxy tunnel to that destination.
//! A companion resolver answers which process owns a local TCP port, so the
//! NAT rules can exempt the proxy itself.
//!
//! # Architecture
//!
//! ```text
//! Client → iptables REDIRECT → redir-tunnel → CONNECT via HTTP proxy → Destination
//!                                   ↓
//!                           SO_ORIGINAL_DST
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use redir_tunnel::config::TunnelConfig;
//! use redir_tunnel::connection::{run_accept_loop, TunnelHandler};
//! use redir_tunnel::redirect::{default_destination_resolver, RedirectListener};
//! use redir_tunnel::upstream::HttpConnectDialer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = TunnelConfig::from_args(["8080", "9090"])?;
//!
//! let listener = RedirectListener::bind(&config.listen)?;
//! let dialer = HttpConnectDialer::new(config.upstream.proxy_target());
//! let handler = Arc::new(TunnelHandler::new(
//!     default_destination_resolver(),
//!     Arc::new(dialer),
//! ));
//!
//! run_accept_loop(listener, handler).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types, argument parsing and env overrides
//! - [`connection`]: Accept loop and per-connection handler
//! - [`error`]: Error types
//! - [`io`]: Bidirectional relay
//! - [`owner`]: Port to PID resolution over procfs
//! - [`redirect`]: Listener socket and original destination recovery
//! - [`upstream`]: HTTP CONNECT dialer

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod connection;
pub mod error;
pub mod io;
pub mod owner;
pub mod redirect;
pub mod upstream;

// Re-export commonly used types
pub use config::{ListenConfig, TunnelConfig, UpstreamConfig};
pub use connection::{run_accept_loop, TunnelHandler};
pub use error::{
    ConfigError, LookupError, RedirectError, RelayError, ScanError, TunnelError, UpstreamError,
};
pub use io::{relay, RelayOutcome};
pub use owner::PortOwnerResolver;
pub use redirect::{RedirectListener, RedirectedConnection, SockoptResolver};
pub use upstream::{HttpConnectDialer, ProxyTarget, ProxyUrl, TunnelDialer};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
