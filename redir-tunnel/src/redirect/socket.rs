//! Redirect socket utilities
//!
//! Low-level socket operations for NAT-redirected connections:
//! - `SO_ORIGINAL_DST`: retrieves the pre-NAT destination of an accepted connection
//! - `IP_TRANSPARENT`: optional, only required for TPROXY-style rules
//!
//! # Destination Resolver Trait
//!
//! The original-destination query sits behind [`DestinationResolver`] so the
//! connection handler can be driven with a fixed destination in tests.
//! Production code uses [`SockoptResolver`].

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::ListenConfig;
use crate::error::RedirectError;

/// Linux kernel constant: `IP_TRANSPARENT` socket option (`SOL_IP` level)
pub const IP_TRANSPARENT: libc::c_int = 19;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
///
/// Netfilter stores the pre-NAT destination of a REDIRECTed connection and
/// exposes it through `getsockopt` with this option.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Size of `struct sockaddr_in`
pub const SOCKADDR_IN_LEN: usize = 16;

/// Minimum bytes needed to decode family, port and address
const SOCKADDR_IN_MIN_LEN: usize = 8;

// =============================================================================
// Destination Resolver Trait
// =============================================================================

/// Recovers the destination a redirected connection was originally headed to.
pub trait DestinationResolver: Send + Sync {
    /// Return the original IPv4 destination of `stream`.
    ///
    /// # Errors
    ///
    /// Returns `RedirectError::ResolutionFailed` if the query fails, or
    /// `RedirectError::MalformedOriginalDst` if the answer is unusable.
    fn original_destination(&self, stream: &TcpStream) -> Result<SocketAddrV4, RedirectError>;
}

/// Kernel-backed resolver using `getsockopt(SOL_IP, SO_ORIGINAL_DST)`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SockoptResolver;

impl SockoptResolver {
    /// Create a new sockopt resolver.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl DestinationResolver for SockoptResolver {
    fn original_destination(&self, stream: &TcpStream) -> Result<SocketAddrV4, RedirectError> {
        query_original_dst(stream.as_raw_fd())
    }
}

/// Get the default destination resolver (production implementation).
#[must_use]
pub fn default_destination_resolver() -> Arc<dyn DestinationResolver> {
    Arc::new(SockoptResolver::new())
}

// =============================================================================
// SO_ORIGINAL_DST
// =============================================================================

/// Query `SO_ORIGINAL_DST` on a raw descriptor and decode the result.
///
/// # Errors
///
/// Returns `RedirectError::ResolutionFailed` if `getsockopt` fails
/// (`ENOPROTOOPT`/`ENOENT` mean the connection was never redirected), or
/// `RedirectError::MalformedOriginalDst` if decoding fails.
pub fn query_original_dst(fd: RawFd) -> Result<SocketAddrV4, RedirectError> {
    let mut buf = [0u8; SOCKADDR_IN_LEN];
    let mut len = SOCKADDR_IN_LEN as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            buf.as_mut_ptr().cast::<libc::c_void>(),
            &raw mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            Some(libc::ENOPROTOOPT | libc::ENOENT) => Err(RedirectError::ResolutionFailed(
                format!("SO_ORIGINAL_DST not available, not a redirected connection? ({err})"),
            )),
            _ => Err(RedirectError::ResolutionFailed(format!(
                "getsockopt SO_ORIGINAL_DST failed: {err}"
            ))),
        };
    }

    let len = (len as usize).min(SOCKADDR_IN_LEN);
    decode_original_dst(&buf[..len])
}

/// Decode a `sockaddr_in` returned by `SO_ORIGINAL_DST`.
///
/// Layout: bytes 0..2 family (host order), 2..4 port (network order),
/// 4..8 IPv4 address (network order), 8..16 padding.
///
/// # Errors
///
/// Returns `RedirectError::MalformedOriginalDst` for a short buffer, a
/// non-`AF_INET` family, or an all-zero address or port.
pub fn decode_original_dst(buf: &[u8]) -> Result<SocketAddrV4, RedirectError> {
    if buf.len() < SOCKADDR_IN_MIN_LEN {
        return Err(RedirectError::MalformedOriginalDst(format!(
            "sockaddr_in too short: {} bytes",
            buf.len()
        )));
    }

    let family = u16::from_ne_bytes([buf[0], buf[1]]);
    if libc::c_int::from(family) != libc::AF_INET {
        return Err(RedirectError::MalformedOriginalDst(format!(
            "unexpected address family {family}"
        )));
    }

    let port = u16::from_be_bytes([buf[2], buf[3]]);
    let ip = Ipv4Addr::new(buf[4], buf[5], buf[6], buf[7]);

    if ip.is_unspecified() || port == 0 {
        return Err(RedirectError::MalformedOriginalDst(format!(
            "unusable destination {ip}:{port}"
        )));
    }

    Ok(SocketAddrV4::new(ip, port))
}

// =============================================================================
// Listener Socket Creation
// =============================================================================

/// Create the listening socket described by `config`, not yet bound.
///
/// The socket has `SO_REUSEADDR`, `SO_REUSEPORT` when configured,
/// `IP_TRANSPARENT` when configured, and is non-blocking.
///
/// # Errors
///
/// Returns `RedirectError::SocketCreation` if socket creation fails,
/// `RedirectError::SocketOption` if setting an option fails, or
/// `RedirectError::PermissionDenied` if `IP_TRANSPARENT` needs `CAP_NET_ADMIN`.
pub fn create_listener_socket(config: &ListenConfig) -> Result<Socket, RedirectError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| RedirectError::SocketCreation(e.to_string()))?;

    // Quick restart while old connections linger in TIME_WAIT
    socket
        .set_reuse_address(true)
        .map_err(|e| RedirectError::socket_option("SO_REUSEADDR", e.to_string()))?;

    if config.reuse_port {
        socket
            .set_reuse_port(true)
            .map_err(|e| RedirectError::socket_option("SO_REUSEPORT", e.to_string()))?;
    }

    if config.transparent {
        set_ip_transparent(&socket)?;
    }

    // Set non-blocking for tokio compatibility
    socket
        .set_nonblocking(true)
        .map_err(|e| RedirectError::socket_option("O_NONBLOCK", e.to_string()))?;

    debug!(
        "Created listener socket (reuse_port={}, transparent={})",
        config.reuse_port, config.transparent
    );
    Ok(socket)
}

/// Set `IP_TRANSPARENT` socket option.
///
/// # Errors
///
/// Returns `RedirectError::PermissionDenied` on `EPERM`, otherwise
/// `RedirectError::SocketOption`.
fn set_ip_transparent(socket: &Socket) -> Result<(), RedirectError> {
    let fd = socket.as_raw_fd();
    let one: libc::c_int = 1;

    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_IP,
            IP_TRANSPARENT,
            std::ptr::addr_of!(one).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return Err(RedirectError::PermissionDenied);
        }
        return Err(RedirectError::socket_option("IP_TRANSPARENT", err.to_string()));
    }

    Ok(())
}
