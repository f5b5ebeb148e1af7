//! Error types for redir-tunnel
//!
//! Errors are grouped by subsystem. Configuration and bind errors abort the
//! process; [`TunnelError`] and [`RelayError`] only close the affected
//! connection.

use std::io;
use std::net::{SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failure that closed one redirected connection before its relay started
#[derive(Debug, Error)]
pub enum TunnelError {
    /// The original destination could not be recovered
    #[error("Redirect error: {0}")]
    Redirect(#[from] RedirectError),

    /// The upstream proxy could not open a tunnel
    #[error("Upstream error: {0}")]
    Upstream(#[from] UpstreamError),
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Wrong number of positional arguments
    #[error("{0}")]
    MissingArgument(String),

    /// A positional argument could not be parsed
    #[error("{0}")]
    InvalidArgument(String),

    /// The upstream proxy URL is not a usable `http://host:port` URL
    #[error("Invalid proxy url '{url}': {reason}")]
    InvalidProxyUrl { url: String, reason: String },

    /// Environment variable override error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// Validation error (invalid values)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl ConfigError {
    /// Create an invalid proxy URL error
    pub fn invalid_proxy_url(url: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidProxyUrl {
            url: url.into(),
            reason: reason.into(),
        }
    }
}

/// Listener and original-destination errors
#[derive(Debug, Error)]
pub enum RedirectError {
    /// Failed to create socket
    #[error("Failed to create listener socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option (SO_REUSEADDR, IP_TRANSPARENT, ...)
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept connection
    #[error("Accept error: {0}")]
    AcceptError(String),

    /// The kernel refused the original-destination query
    #[error("Failed to get original destination: {0}")]
    ResolutionFailed(String),

    /// The kernel answered but the address it returned is unusable
    #[error("Malformed original destination: {0}")]
    MalformedOriginalDst(String),

    /// Permission denied (IP_TRANSPARENT requires CAP_NET_ADMIN)
    #[error("Permission denied: IP_TRANSPARENT requires CAP_NET_ADMIN capability")]
    PermissionDenied,
}

impl RedirectError {
    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Upstream proxy errors
///
/// Every variant means the upstream is unavailable for this one connection.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// TCP connection to the proxy failed
    #[error("Failed to connect to proxy {proxy}: {reason}")]
    ConnectionFailed { proxy: String, reason: String },

    /// The dial did not complete within the connect timeout
    #[error("CONNECT to {target} via {proxy} timed out after {timeout:?}")]
    Timeout {
        proxy: String,
        target: SocketAddrV4,
        timeout: Duration,
    },

    /// The proxy answered the CONNECT with a non-2xx status
    #[error("Proxy rejected CONNECT to {target}: {status} {reason}")]
    Rejected {
        target: SocketAddrV4,
        status: u16,
        reason: String,
    },

    /// The proxy answered with something that is not an HTTP response
    #[error("Malformed proxy response: {0}")]
    MalformedResponse(String),

    /// I/O error during the handshake
    #[error("Upstream I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl UpstreamError {
    /// Create a connection failed error
    pub fn connection_failed(proxy: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            proxy: proxy.into(),
            reason: reason.into(),
        }
    }

    /// Create a malformed response error
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedResponse(msg.into())
    }
}

/// Errors from one direction of a relay
#[derive(Debug, Error)]
#[error("{direction} transfer failed after {bytes} bytes: {source}")]
pub struct RelayError {
    /// Which direction failed ("client->upstream" or "upstream->client")
    pub direction: &'static str,
    /// Bytes successfully written before the failure
    pub bytes: u64,
    /// Underlying I/O error
    #[source]
    pub source: io::Error,
}

/// Port owner lookup errors
#[derive(Debug, Error)]
pub enum LookupError {
    /// No row of the kernel TCP table carries this local port
    #[error("couldn't find any process listening on port {port}")]
    NoProcessForPort { port: u16 },

    /// The port has an inode but no process holds a descriptor for it
    #[error("couldn't find any process listening on port {port}: got inode {inode}, but couldn't find its PID: {source}")]
    UnclaimedInode {
        port: u16,
        inode: u64,
        #[source]
        source: ScanError,
    },

    /// The kernel TCP table could not be opened
    #[error("couldn't open {}: {source}", path.display())]
    TableUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl LookupError {
    /// True for every outcome that means "no owning process was found".
    ///
    /// `UnclaimedInode` and `TableUnavailable` carry an extra cause but are
    /// still absences from the caller's point of view.
    #[must_use]
    pub const fn is_no_process_for_port(&self) -> bool {
        matches!(
            self,
            Self::NoProcessForPort { .. }
                | Self::UnclaimedInode { .. }
                | Self::TableUnavailable { .. }
        )
    }

    /// True when the table had a row but the process scan did not match it
    #[must_use]
    pub const fn is_inconsistent(&self) -> bool {
        matches!(self, Self::UnclaimedInode { .. })
    }
}

/// Process descriptor scan errors
#[derive(Debug, Error)]
pub enum ScanError {
    /// The process root itself could not be listed
    #[error("couldn't read {}: {source}", path.display())]
    ProcUnreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// No process holds a descriptor for this socket inode
    #[error("no process found for inode {inode}")]
    NoOwner { inode: u64 },
}
