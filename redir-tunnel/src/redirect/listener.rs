//! Redirect TCP listener
//!
//! Binds the loopback socket that NAT REDIRECT rules point at.

use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};

use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

use super::socket::create_listener_socket;
use crate::config::ListenConfig;
use crate::error::RedirectError;

/// Listener for redirected TCP connections
#[derive(Debug)]
pub struct RedirectListener {
    /// The underlying tokio TCP listener
    listener: TcpListener,

    /// Actual bound address (resolves port 0)
    local_addr: SocketAddr,
}

impl RedirectListener {
    /// Create and bind a new listener.
    ///
    /// # Errors
    ///
    /// Returns `RedirectError` if:
    /// - Socket creation or an option fails
    /// - Binding fails (port in use)
    /// - `IP_TRANSPARENT` was requested without `CAP_NET_ADMIN`
    pub fn bind(config: &ListenConfig) -> Result<Self, RedirectError> {
        let address = SocketAddr::V4(config.address);
        debug!("Creating redirect listener on {}", address);

        let socket = create_listener_socket(config)?;

        socket
            .bind(&address.into())
            .map_err(|e| RedirectError::bind(address, e.to_string()))?;

        let backlog = i32::try_from(config.backlog).unwrap_or(i32::MAX);
        socket
            .listen(backlog)
            .map_err(|e| RedirectError::socket_option("listen", e.to_string()))?;

        // Safety: we own the socket and it is a valid listening socket
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(socket.into_raw_fd()) };

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| RedirectError::SocketCreation(e.to_string()))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| RedirectError::SocketCreation(e.to_string()))?;

        info!(
            "Redirect listener ready on {} (backlog={})",
            local_addr, config.backlog
        );

        Ok(Self {
            listener,
            local_addr,
        })
    }

    /// Accept the next connection.
    ///
    /// The original destination is not queried here; the per-connection
    /// handler does that so a slow or failing query never stalls accepts.
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::AcceptError` if accept fails.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr), RedirectError> {
        let (stream, client_addr) = self
            .listener
            .accept()
            .await
            .map_err(|e| RedirectError::AcceptError(e.to_string()))?;

        debug!("Accepted connection from {}", client_addr);
        Ok((stream, client_addr))
    }

    /// Get the bound address.
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
