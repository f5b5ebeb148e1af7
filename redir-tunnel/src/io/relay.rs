//! Bidirectional relay between two streams
//!
//! Each direction copies until its source reports EOF or an error, then shuts
//! down the destination's write half so the far peer sees the close. The
//! relay returns only after both directions have finished.

use std::io;

use tokio::io::{split, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

use crate::error::RelayError;

/// Per-direction copy buffer size
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// Direction label for bytes read from `a` and written to `b`
pub const CLIENT_TO_UPSTREAM: &str = "client->upstream";

/// Direction label for bytes read from `b` and written to `a`
pub const UPSTREAM_TO_CLIENT: &str = "upstream->client";

/// What happened in each direction of a relay
#[derive(Debug, Default)]
pub struct RelayOutcome {
    /// Bytes written from client to upstream
    pub client_to_upstream: u64,
    /// Bytes written from upstream to client
    pub upstream_to_client: u64,
    /// Error that ended the client to upstream direction, if any
    pub client_to_upstream_error: Option<RelayError>,
    /// Error that ended the upstream to client direction, if any
    pub upstream_to_client_error: Option<RelayError>,
}

impl RelayOutcome {
    /// Total bytes transferred in both directions
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.client_to_upstream + self.upstream_to_client
    }

    /// Whether both directions ended with a clean EOF
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.client_to_upstream_error.is_none() && self.upstream_to_client_error.is_none()
    }

    /// Iterate over the errors of both directions
    pub fn errors(&self) -> impl Iterator<Item = &RelayError> {
        self.client_to_upstream_error
            .iter()
            .chain(self.upstream_to_client_error.iter())
    }
}

/// Relay bytes between `a` (client) and `b` (upstream) until both sides finish.
///
/// The `a -> b` direction runs on a spawned task, `b -> a` runs on the
/// caller's task. Both streams are dropped before this returns.
pub async fn relay<A, B>(a: A, b: B) -> RelayOutcome
where
    A: AsyncRead + AsyncWrite + Send + 'static,
    B: AsyncRead + AsyncWrite + Send + 'static,
{
    let (a_read, a_write) = split(a);
    let (b_read, b_write) = split(b);

    let forward = tokio::spawn(copy_direction(a_read, b_write, CLIENT_TO_UPSTREAM));
    let (upstream_to_client, upstream_to_client_error) =
        copy_direction(b_read, a_write, UPSTREAM_TO_CLIENT).await;

    let (client_to_upstream, client_to_upstream_error) = match forward.await {
        Ok(result) => result,
        Err(e) => (
            0,
            Some(RelayError {
                direction: CLIENT_TO_UPSTREAM,
                bytes: 0,
                source: io::Error::other(format!("copy task failed: {e}")),
            }),
        ),
    };

    RelayOutcome {
        client_to_upstream,
        upstream_to_client,
        client_to_upstream_error,
        upstream_to_client_error,
    }
}

/// Copy one direction, then shut down the writer.
async fn copy_direction<R, W>(
    mut reader: R,
    mut writer: W,
    direction: &'static str,
) -> (u64, Option<RelayError>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; DEFAULT_BUFFER_SIZE].into_boxed_slice();
    let mut bytes = 0u64;

    let error = loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break None,
            Ok(n) => n,
            Err(e) => break Some(e),
        };
        if let Err(e) = writer.write_all(&buf[..n]).await {
            break Some(e);
        }
        bytes += n as u64;
    };

    // Propagate the close even when the copy failed
    if let Err(e) = writer.shutdown().await {
        trace!("{} shutdown failed: {}", direction, e);
    }

    match error {
        None => {
            debug!("{} finished after {} bytes", direction, bytes);
            (bytes, None)
        }
        Some(source) => {
            debug!("{} failed after {} bytes: {}", direction, bytes, source);
            (
                bytes,
                Some(RelayError {
                    direction,
                    bytes,
                    source,
                }),
            )
        }
    }
}
