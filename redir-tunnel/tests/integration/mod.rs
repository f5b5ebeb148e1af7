//! Integration tests for redir-tunnel
//!
//! # Test Organization
//!
//! - `tunnel_e2e`: accept loop, CONNECT dialer and relay against a mock proxy
//! - `owner_lookup`: port owner resolution over a fabricated `/proc` tree
//!
//! # Test Requirements
//!
//! - Most tests use mock servers and temporary directories
//! - Tests marked with `#[ignore]` need root and an iptables REDIRECT rule

mod owner_lookup;
mod tunnel_e2e;
