//! Configuration types for redir-tunnel

use std::fmt;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;
use crate::upstream::{ProxyTarget, ProxyUrl};

/// Default CONNECT timeout in seconds
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Default listen backlog
pub const DEFAULT_BACKLOG: u32 = 128;

/// Root configuration structure
#[derive(Debug, Clone)]
pub struct TunnelConfig {
    /// Where redirected connections arrive
    pub listen: ListenConfig,

    /// The HTTP proxy every connection is tunneled through
    pub upstream: UpstreamConfig,

    /// Logging configuration
    pub log: LogConfig,
}

impl TunnelConfig {
    /// Build the configuration for a proxy on `127.0.0.1:<proxy_port>` and a
    /// tunnel listening on `127.0.0.1:<tunnel_port>`.
    #[must_use]
    pub fn new(proxy_port: u16, tunnel_port: u16) -> Self {
        Self {
            listen: ListenConfig::on_port(tunnel_port),
            upstream: UpstreamConfig::local(proxy_port),
            log: LogConfig::default(),
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.upstream.validate()?;

        if self.listen.address.port() == 0 {
            return Err(ConfigError::ValidationError(
                "tunnel port must be greater than 0".into(),
            ));
        }

        // The tunnel must never dial itself
        if self.upstream.proxy_url.is_loopback()
            && self.upstream.proxy_url.port() == self.listen.address.port()
        {
            return Err(ConfigError::ValidationError(format!(
                "proxy port and tunnel port are both {}",
                self.listen.address.port()
            )));
        }

        Ok(())
    }
}

/// Listen configuration for the redirect target socket
#[derive(Debug, Clone)]
pub struct ListenConfig {
    /// Listen address, always IPv4 loopback in production
    pub address: SocketAddrV4,

    /// TCP accept backlog
    pub backlog: u32,

    /// Enable `SO_REUSEPORT`
    pub reuse_port: bool,

    /// Enable `IP_TRANSPARENT` (only needed for TPROXY-style rules)
    pub transparent: bool,
}

impl ListenConfig {
    /// Listen on `127.0.0.1:<port>` with default socket options
    #[must_use]
    pub fn on_port(port: u16) -> Self {
        Self {
            address: SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
            ..Self::default()
        }
    }

    /// Validate listen configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the backlog is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "backlog must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
            backlog: DEFAULT_BACKLOG,
            reuse_port: true,
            transparent: false,
        }
    }
}

/// Upstream HTTP proxy configuration
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Proxy URL, `http://host:port`
    pub proxy_url: ProxyUrl,

    /// Timeout for the whole dial (TCP connect + CONNECT handshake)
    pub connect_timeout_secs: u64,
}

impl UpstreamConfig {
    /// Proxy on `127.0.0.1:<port>` with the default timeout
    #[must_use]
    pub fn local(port: u16) -> Self {
        Self {
            proxy_url: ProxyUrl::local(port),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }

    /// Validate upstream configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` on a zero timeout or port.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connect_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "connect_timeout_secs must be greater than 0".into(),
            ));
        }
        if self.proxy_url.port() == 0 {
            return Err(ConfigError::ValidationError(
                "proxy port must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    /// Get the connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// The read-only dial target shared by every connection
    #[must_use]
    pub fn proxy_target(&self) -> ProxyTarget {
        ProxyTarget::new(self.proxy_url.clone(), self.connect_timeout())
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::ValidationError(format!(
                "unknown log format '{other}' (expected text or json)"
            ))),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Level: trace, debug, info, warn, error
    pub level: String,

    /// Output format
    pub format: LogFormat,

    /// Include the event target (module path)
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: LogFormat::Text,
            target: false,
        }
    }
}
