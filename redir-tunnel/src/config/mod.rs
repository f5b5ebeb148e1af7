//! Configuration module for redir-tunnel
//!
//! The tunnel is configured from two positional arguments (proxy port and
//! tunnel port) plus a handful of environment overrides.
//!
//! # Example
//!
//! ```
//! use redir_tunnel::config::TunnelConfig;
//!
//! let config = TunnelConfig::from_args(["8080", "9090"]).unwrap();
//! assert_eq!(config.listen.address.port(), 9090);
//! assert_eq!(config.upstream.proxy_url.to_string(), "http://127.0.0.1:8080");
//! ```

mod loader;
mod types;

pub use loader::{
    ENV_CONNECT_TIMEOUT_SECS, ENV_LOG_FORMAT, ENV_LOG_LEVEL, USAGE_ARGS,
};
pub use types::{ListenConfig, LogConfig, LogFormat, TunnelConfig, UpstreamConfig};
