//! Connection handling module
//!
//! This module provides:
//! - The accept loop that spawns one task per redirected connection
//! - The per-connection handler (resolve, dial, relay)

mod acceptor;
mod handler;

pub use acceptor::{run_accept_loop, ACCEPT_ERROR_BACKOFF};
pub use handler::{Stage, TunnelConnectionResult, TunnelHandler};
