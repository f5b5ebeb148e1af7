//! Kernel TCP table reader
//!
//! Parses `/proc/net/tcp`:
//!
//! ```text
//!   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
//!    0: 0100007F:1F90 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 48213 1 ...
//! ```
//!
//! The local address is the kernel's `__be32` printed with `%08X`, so it is
//! decoded with host byte order; the port is a plain hex number.

use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;
use tracing::{trace, warn};

use crate::error::LookupError;

/// Default location of the IPv4 TCP table
pub const PROC_NET_TCP: &str = "/proc/net/tcp";

/// Column of the local `address:port` field
const LOCAL_ADDRESS_COLUMN: usize = 1;
/// Column of the connection state
const STATE_COLUMN: usize = 3;
/// Column of the socket inode
const INODE_COLUMN: usize = 9;

/// Port to inode lookup against the kernel's TCP table.
pub trait KernelSocketTable: Send + Sync {
    /// Return the inode of the first row whose local port is `port`.
    ///
    /// Rows match on port alone, whatever their state. A `TIME_WAIT` row
    /// ahead of the listener reports inode `0`, which no process claims.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::NoProcessForPort` when no row matches, or
    /// `LookupError::TableUnavailable` when the table cannot be opened.
    fn find_inode_for_port(&self, port: u16) -> Result<u64, LookupError>;
}

/// One parsed row of the TCP table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpTableEntry {
    /// Local IPv4 address
    pub local_addr: Ipv4Addr,
    /// Local port
    pub local_port: u16,
    /// Kernel TCP state (`0A` is LISTEN)
    pub state: u8,
    /// Socket inode
    pub inode: u64,
}

/// Why a table row was dropped
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RowError {
    /// Fewer columns than the inode column needs
    #[error("expected at least 10 fields, got {0}")]
    TooFewFields(usize),

    /// Local address is not `XXXXXXXX:XXXX`
    #[error("Couldn't parse local address from '{0}'")]
    BadAddress(String),

    /// Port half of the local address is not hex
    #[error("Couldn't parse port number from '{0}'")]
    BadPort(String),

    /// State column is not a hex byte
    #[error("Couldn't parse state from '{0}'")]
    BadState(String),

    /// Inode column is not a decimal number
    #[error("Couldn't parse inode from '{0}'")]
    BadInode(String),
}

impl FromStr for TcpTableEntry {
    type Err = RowError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() <= INODE_COLUMN {
            return Err(RowError::TooFewFields(fields.len()));
        }

        let local = fields[LOCAL_ADDRESS_COLUMN];
        let (addr_hex, port_hex) = local
            .split_once(':')
            .ok_or_else(|| RowError::BadAddress(local.to_string()))?;

        if addr_hex.len() != 8 {
            return Err(RowError::BadAddress(local.to_string()));
        }
        let raw = u32::from_str_radix(addr_hex, 16)
            .map_err(|_| RowError::BadAddress(local.to_string()))?;
        let local_addr = Ipv4Addr::from(raw.to_ne_bytes());

        if port_hex.is_empty() || port_hex.len() > 4 {
            return Err(RowError::BadPort(port_hex.to_string()));
        }
        let local_port = u16::from_str_radix(port_hex, 16)
            .map_err(|_| RowError::BadPort(port_hex.to_string()))?;

        let state_hex = fields[STATE_COLUMN];
        let state = u8::from_str_radix(state_hex, 16)
            .map_err(|_| RowError::BadState(state_hex.to_string()))?;

        let inode_text = fields[INODE_COLUMN];
        let inode = inode_text
            .parse::<u64>()
            .map_err(|_| RowError::BadInode(inode_text.to_string()))?;

        Ok(Self {
            local_addr,
            local_port,
            state,
            inode,
        })
    }
}

/// Lazy iterator over the well-formed rows of a TCP table.
///
/// The header line is skipped. Malformed rows are logged and dropped; a read
/// error ends the iteration.
#[derive(Debug)]
pub struct TcpTableRows<R> {
    lines: io::Lines<R>,
    header_skipped: bool,
}

impl<R: BufRead> TcpTableRows<R> {
    /// Iterate the rows of `reader`
    pub fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            header_skipped: false,
        }
    }
}

impl<R: BufRead> Iterator for TcpTableRows<R> {
    type Item = TcpTableEntry;

    fn next(&mut self) -> Option<Self::Item> {
        if !self.header_skipped {
            self.header_skipped = true;
            self.lines.next()?.ok()?;
        }

        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopped reading TCP table: {}", e);
                    return None;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match line.parse::<TcpTableEntry>() {
                Ok(entry) => return Some(entry),
                Err(e) => warn!("{}", e),
            }
        }
    }
}

/// TCP table backed by a procfs file
#[derive(Debug, Clone)]
pub struct ProcNetTcp {
    path: PathBuf,
}

impl ProcNetTcp {
    /// Read `/proc/net/tcp`
    #[must_use]
    pub fn new() -> Self {
        Self::with_path(PROC_NET_TCP)
    }

    /// Read a table at another path
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the table file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the table and iterate its rows.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::TableUnavailable` if the file cannot be opened.
    pub fn rows(&self) -> Result<TcpTableRows<BufReader<File>>, LookupError> {
        let file = File::open(&self.path).map_err(|source| LookupError::TableUnavailable {
            path: self.path.clone(),
            source,
        })?;
        Ok(TcpTableRows::new(BufReader::new(file)))
    }
}

impl Default for ProcNetTcp {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelSocketTable for ProcNetTcp {
    fn find_inode_for_port(&self, port: u16) -> Result<u64, LookupError> {
        let entry = self
            .rows()?
            .find(|entry| entry.local_port == port)
            .ok_or(LookupError::NoProcessForPort { port })?;

        trace!(
            "Port {} is {}:{} inode {} (state {:02X})",
            port,
            entry.local_addr,
            entry.local_port,
            entry.inode,
            entry.state
        );
        Ok(entry.inode)
    }
}
