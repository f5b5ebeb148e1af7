//! Upstream proxy address and dial target

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;
use std::time::Duration;

use http::Uri;

use crate::error::ConfigError;

/// A plain `http://host:port` proxy URL
///
/// Only the authority matters for CONNECT; credentials, paths other than `/`,
/// queries and IPv6 literals are rejected at parse time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyUrl {
    host: String,
    port: u16,
}

impl ProxyUrl {
    /// `http://127.0.0.1:<port>`
    #[must_use]
    pub fn local(port: u16) -> Self {
        Self {
            host: Ipv4Addr::LOCALHOST.to_string(),
            port,
        }
    }

    /// Proxy host, a hostname or IPv4 literal
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Proxy port
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, suitable for `TcpStream::connect`
    #[must_use]
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Whether the proxy lives on this host
    #[must_use]
    pub fn is_loopback(&self) -> bool {
        self.host.eq_ignore_ascii_case("localhost")
            || self
                .host
                .parse::<IpAddr>()
                .is_ok_and(|ip| ip.is_loopback())
    }
}

impl FromStr for ProxyUrl {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri: Uri = s
            .parse()
            .map_err(|e| ConfigError::invalid_proxy_url(s, format!("{e}")))?;

        let scheme = uri.scheme_str().unwrap_or("");
        if scheme != "http" {
            return Err(ConfigError::invalid_proxy_url(
                s,
                format!("scheme must be http, got '{scheme}'"),
            ));
        }

        let authority = uri
            .authority()
            .ok_or_else(|| ConfigError::invalid_proxy_url(s, "missing host"))?;
        if authority.as_str().contains('@') {
            return Err(ConfigError::invalid_proxy_url(
                s,
                "credentials are not supported",
            ));
        }

        let host = authority.host();
        if host.is_empty() {
            return Err(ConfigError::invalid_proxy_url(s, "missing host"));
        }
        if host.starts_with('[') {
            return Err(ConfigError::invalid_proxy_url(s, "IPv6 proxies are not supported"));
        }

        let port = authority
            .port_u16()
            .ok_or_else(|| ConfigError::invalid_proxy_url(s, "missing port"))?;
        if port == 0 {
            return Err(ConfigError::invalid_proxy_url(s, "port must be greater than 0"));
        }

        if !matches!(uri.path(), "" | "/") || uri.query().is_some() {
            return Err(ConfigError::invalid_proxy_url(
                s,
                "path and query are not allowed",
            ));
        }

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for ProxyUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "http://{}:{}", self.host, self.port)
    }
}

/// Read-only dial target shared by all connections
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyTarget {
    url: ProxyUrl,
    connect_timeout: Duration,
}

impl ProxyTarget {
    /// Create a new proxy target
    #[must_use]
    pub const fn new(url: ProxyUrl, connect_timeout: Duration) -> Self {
        Self {
            url,
            connect_timeout,
        }
    }

    /// The proxy URL
    #[must_use]
    pub const fn url(&self) -> &ProxyUrl {
        &self.url
    }

    /// Upper bound on connect plus handshake
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }
}
