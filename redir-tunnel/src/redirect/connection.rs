//! Redirected connection representation
//!
//! A `RedirectedConnection` pairs an accepted TCP stream with the destination
//! the client originally dialed before NAT rewrote it.

use std::net::{SocketAddr, SocketAddrV4};

use tokio::net::TcpStream;
use tracing::debug;

use super::socket::DestinationResolver;
use crate::error::RedirectError;

/// An accepted connection with its recovered original destination
#[derive(Debug)]
pub struct RedirectedConnection {
    /// The accepted client stream
    stream: TcpStream,

    /// Client's source address
    client_addr: SocketAddr,

    /// Where the client wanted to connect
    original_dst: SocketAddrV4,
}

impl RedirectedConnection {
    /// Recover the original destination of `stream` with `resolver`.
    ///
    /// # Errors
    ///
    /// Returns the resolver's `RedirectError`. The stream is dropped, and
    /// thereby closed, on failure.
    pub fn resolve(
        stream: TcpStream,
        client_addr: SocketAddr,
        resolver: &dyn DestinationResolver,
    ) -> Result<Self, RedirectError> {
        let original_dst = resolver.original_destination(&stream)?;

        debug!(
            "Redirected connection: {} -> {} (original)",
            client_addr, original_dst
        );

        Ok(Self::with_destination(stream, client_addr, original_dst))
    }

    const fn with_destination(
        stream: TcpStream,
        client_addr: SocketAddr,
        original_dst: SocketAddrV4,
    ) -> Self {
        Self {
            stream,
            client_addr,
            original_dst,
        }
    }

    /// Consume the connection and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get the original destination address
    #[must_use]
    pub const fn original_dst(&self) -> SocketAddrV4 {
        self.original_dst
    }
}
