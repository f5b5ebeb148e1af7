//! Per-connection handling
//!
//! Every accepted connection runs resolve, dial and relay in that order on
//! its own task. A failure at any stage closes that connection only.

use std::fmt;
use std::net::{SocketAddr, SocketAddrV4};
use std::sync::Arc;

use tokio::net::TcpStream;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::error::TunnelError;
use crate::io::{relay, RelayOutcome};
use crate::redirect::{DestinationResolver, RedirectedConnection};
use crate::upstream::TunnelDialer;

/// Where a connection's handling stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Original destination recovery
    Resolve,
    /// CONNECT through the upstream proxy
    Dial,
    /// Byte relay
    Relay,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resolve => write!(f, "resolve"),
            Self::Dial => write!(f, "dial"),
            Self::Relay => write!(f, "relay"),
        }
    }
}

/// Result of handling one redirected connection
#[derive(Debug)]
pub struct TunnelConnectionResult {
    /// Client address
    pub client_addr: SocketAddr,
    /// Original destination, once resolved
    pub original_dst: Option<SocketAddrV4>,
    /// Relay outcome, if the relay ran
    pub relay: Option<RelayOutcome>,
    /// Resolve or dial failure; relay errors stay in `relay`
    pub failure: Option<(Stage, TunnelError)>,
}

impl TunnelConnectionResult {
    fn new(client_addr: SocketAddr) -> Self {
        Self {
            client_addr,
            original_dst: None,
            relay: None,
            failure: None,
        }
    }

    /// The stage that failed, if any
    #[must_use]
    pub fn failed_stage(&self) -> Option<Stage> {
        if let Some((stage, _)) = &self.failure {
            return Some(*stage);
        }
        self.relay
            .as_ref()
            .filter(|outcome| !outcome.is_clean())
            .map(|_| Stage::Relay)
    }
}

/// Drives resolve, dial and relay for accepted connections.
///
/// Holds only read-only collaborators, so one handler is shared by every
/// connection task.
pub struct TunnelHandler {
    resolver: Arc<dyn DestinationResolver>,
    dialer: Arc<dyn TunnelDialer>,
}

impl TunnelHandler {
    /// Create a handler from its collaborators
    pub fn new(resolver: Arc<dyn DestinationResolver>, dialer: Arc<dyn TunnelDialer>) -> Self {
        Self { resolver, dialer }
    }

    /// Handle one accepted connection to completion.
    pub async fn handle(&self, stream: TcpStream, client_addr: SocketAddr) -> TunnelConnectionResult {
        let span = info_span!("redirected", client = %client_addr);
        self.handle_inner(stream, client_addr).instrument(span).await
    }

    async fn handle_inner(
        &self,
        stream: TcpStream,
        client_addr: SocketAddr,
    ) -> TunnelConnectionResult {
        let mut result = TunnelConnectionResult::new(client_addr);

        // Resolution always completes before anything is dialed
        let conn = match RedirectedConnection::resolve(stream, client_addr, self.resolver.as_ref())
        {
            Ok(conn) => conn,
            Err(e) => {
                warn!(stage = %Stage::Resolve, "Closing {}: {}", client_addr, e);
                result.failure = Some((Stage::Resolve, e.into()));
                return result;
            }
        };

        let original_dst = conn.original_dst();
        result.original_dst = Some(original_dst);
        debug!("Original destination {}", original_dst);

        let upstream = match self.dialer.dial(original_dst).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(
                    stage = %Stage::Dial,
                    "Closing {} -> {}: {}",
                    client_addr, original_dst, e
                );
                result.failure = Some((Stage::Dial, e.into()));
                return result;
            }
        };

        info!("Tunneling {} -> {}", client_addr, original_dst);

        let outcome = relay(conn.into_stream(), upstream).await;
        for e in outcome.errors() {
            debug!(
                stage = %Stage::Relay,
                "{} -> {}: {}",
                client_addr, original_dst, e
            );
        }

        info!(
            "Connection closed: {} -> {}, {} up / {} down bytes",
            client_addr, original_dst, outcome.client_to_upstream, outcome.upstream_to_client
        );

        result.relay = Some(outcome);
        result
    }
}

impl fmt::Debug for TunnelHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelHandler").finish_non_exhaustive()
    }
}
