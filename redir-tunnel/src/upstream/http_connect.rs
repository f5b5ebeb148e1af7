//! HTTP CONNECT tunnel dialer
//!
//! Opens a TCP connection to the HTTP proxy and asks it to tunnel to the
//! original destination:
//!
//! ```text
//! CONNECT 93.184.216.34:80 HTTP/1.1
//! Host: 93.184.216.34:80
//! User-Agent: redir-tunnel/0.1.0
//! Proxy-Connection: Keep-Alive
//!
//! ```
//!
//! The response head is read one byte at a time so no tunneled payload is
//! consumed; any 2xx status hands back the raw stream.

use std::net::SocketAddrV4;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use super::proxy::ProxyTarget;
use crate::error::UpstreamError;

/// Upper bound on the proxy's response head
pub const MAX_RESPONSE_HEAD: usize = 8 * 1024;

const MAX_HEADERS: usize = 32;

/// Opens tunnels to original destinations.
#[async_trait]
pub trait TunnelDialer: Send + Sync {
    /// Return a stream whose bytes flow to and from `target`.
    ///
    /// # Errors
    ///
    /// Returns `UpstreamError` if the tunnel could not be established.
    async fn dial(&self, target: SocketAddrV4) -> Result<TcpStream, UpstreamError>;
}

/// Dialer that tunnels through an HTTP proxy with CONNECT
#[derive(Debug, Clone)]
pub struct HttpConnectDialer {
    proxy: ProxyTarget,
}

impl HttpConnectDialer {
    /// Create a dialer for `proxy`
    #[must_use]
    pub const fn new(proxy: ProxyTarget) -> Self {
        Self { proxy }
    }

    async fn connect_and_handshake(&self, target: SocketAddrV4) -> Result<TcpStream, UpstreamError> {
        let authority = self.proxy.url().authority();

        let mut stream = TcpStream::connect(authority.as_str())
            .await
            .map_err(|e| UpstreamError::connection_failed(&authority, e.to_string()))?;

        // Disable Nagle's algorithm for lower latency
        if let Err(e) = stream.set_nodelay(true) {
            warn!("Failed to set TCP_NODELAY on proxy connection: {}", e);
        }

        let request = build_connect_request(target);
        trace!("Sending CONNECT request for {}", target);
        stream.write_all(request.as_bytes()).await?;

        let ConnectReply { status, reason } = read_response_head(&mut stream).await?;

        if !(200..300).contains(&status) {
            return Err(UpstreamError::Rejected {
                target,
                status,
                reason,
            });
        }

        debug!("Proxy {} opened tunnel to {} ({})", authority, target, status);
        Ok(stream)
    }
}

#[async_trait]
impl TunnelDialer for HttpConnectDialer {
    async fn dial(&self, target: SocketAddrV4) -> Result<TcpStream, UpstreamError> {
        let limit = self.proxy.connect_timeout();
        match timeout(limit, self.connect_and_handshake(target)).await {
            Ok(result) => result,
            Err(_) => Err(UpstreamError::Timeout {
                proxy: self.proxy.url().authority(),
                target,
                timeout: limit,
            }),
        }
    }
}

/// Build the CONNECT request for `target`.
#[must_use]
pub fn build_connect_request(target: SocketAddrV4) -> String {
    format!(
        "CONNECT {target} HTTP/1.1\r\n\
         Host: {target}\r\n\
         User-Agent: redir-tunnel/{}\r\n\
         Proxy-Connection: Keep-Alive\r\n\
         \r\n",
        crate::VERSION
    )
}

/// Status and reason of the proxy's CONNECT reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectReply {
    pub status: u16,
    pub reason: String,
}

/// Read and parse the response head up to and including the blank line.
///
/// Reads byte-wise so bytes after the head stay in the socket. The buffer is
/// handed to `httparse` at every line end until it reports a complete head.
///
/// # Errors
///
/// Returns `UpstreamError::MalformedResponse` if the head does not parse, on
/// EOF before the blank line, or when the head exceeds [`MAX_RESPONSE_HEAD`].
pub async fn read_response_head<R>(reader: &mut R) -> Result<ConnectReply, UpstreamError>
where
    R: AsyncRead + Unpin,
{
    let mut head = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    loop {
        if head.len() >= MAX_RESPONSE_HEAD {
            return Err(UpstreamError::malformed(format!(
                "response head exceeds {MAX_RESPONSE_HEAD} bytes"
            )));
        }
        if reader.read(&mut byte).await? == 0 {
            return Err(UpstreamError::malformed(format!(
                "proxy closed connection after {} bytes of response head",
                head.len()
            )));
        }
        head.push(byte[0]);

        if byte[0] != b'\n' {
            continue;
        }
        if let Some(reply) = parse_response_head(&head)? {
            return Ok(reply);
        }
    }
}

/// Parse a buffered response head.
///
/// Returns `Ok(None)` while the head is still incomplete.
///
/// # Errors
///
/// Returns `UpstreamError::MalformedResponse` if `httparse` rejects the bytes.
pub fn parse_response_head(head: &[u8]) -> Result<Option<ConnectReply>, UpstreamError> {
    let mut headers = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut resp = httparse::Response::new(&mut headers);

    match resp.parse(head) {
        Ok(httparse::Status::Complete(_)) => {
            let status = resp
                .code
                .ok_or_else(|| UpstreamError::malformed("response has no status code"))?;
            let reason = resp.reason.unwrap_or("").trim().to_string();
            trace!("Proxy replied {} {:?} with {} headers", status, reason, resp.headers.len());
            Ok(Some(ConnectReply { status, reason }))
        }
        Ok(httparse::Status::Partial) => Ok(None),
        Err(e) => Err(UpstreamError::malformed(format!("bad response head: {e}"))),
    }
}
