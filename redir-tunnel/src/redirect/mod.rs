//! Redirect module: the receiving end of NAT REDIRECT rules
//!
//! Connections that iptables rewrote to `127.0.0.1:<tunnel port>` arrive at
//! [`RedirectListener`]. The kernel still remembers where each one was headed;
//! [`SockoptResolver`] reads that back with `SO_ORIGINAL_DST`.
//!
//! # Example iptables Setup
//!
//! ```bash
//! # Send outbound HTTP from uid 1000 through the tunnel on port 9090
//! iptables -t nat -A OUTPUT -p tcp --dport 80 -m owner --uid-owner 1000 \
//!     -j REDIRECT --to-ports 9090
//! ```
//!
//! # IPv4 Only
//!
//! Only `sockaddr_in` answers are decoded; IPv6 redirects are out of scope.

mod connection;
mod listener;
mod socket;

pub use connection::RedirectedConnection;
pub use listener::RedirectListener;
pub use socket::{
    create_listener_socket, decode_original_dst, default_destination_resolver,
    query_original_dst, DestinationResolver, SockoptResolver, IP_TRANSPARENT, SOCKADDR_IN_LEN,
    SO_ORIGINAL_DST,
};
