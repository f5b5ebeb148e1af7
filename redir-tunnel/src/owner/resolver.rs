//! Port owner resolution: port -> inode -> PID

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use super::fd_scan::{ProcFdScanner, ProcessFdScanner};
use super::tcp_table::{KernelSocketTable, ProcNetTcp};
use crate::error::LookupError;

/// Finds the process that owns a local TCP port.
///
/// Each call is a fresh point-in-time snapshot. The filesystem reads are
/// blocking; async callers should use `spawn_blocking`.
#[derive(Clone)]
pub struct PortOwnerResolver {
    table: Arc<dyn KernelSocketTable>,
    scanner: Arc<dyn ProcessFdScanner>,
}

impl PortOwnerResolver {
    /// Resolver over the live `/proc`
    #[must_use]
    pub fn new() -> Self {
        Self::with_sources(Arc::new(ProcNetTcp::new()), Arc::new(ProcFdScanner::new()))
    }

    /// Resolver over custom sources
    pub fn with_sources(
        table: Arc<dyn KernelSocketTable>,
        scanner: Arc<dyn ProcessFdScanner>,
    ) -> Self {
        Self { table, scanner }
    }

    /// Return the PID of the process owning local TCP `port`.
    ///
    /// Processes are only scanned once the table has produced an inode.
    ///
    /// # Errors
    ///
    /// Returns `LookupError::NoProcessForPort` or
    /// `LookupError::TableUnavailable` when the table has no usable row, and
    /// `LookupError::UnclaimedInode` when an inode was found but no process
    /// holds it.
    pub fn resolve_owner(&self, port: u16) -> Result<u32, LookupError> {
        let inode = self.table.find_inode_for_port(port)?;
        debug!("Port {} has socket inode {}", port, inode);

        let pid = self
            .scanner
            .find_process_for_inode(inode)
            .map_err(|source| LookupError::UnclaimedInode {
                port,
                inode,
                source,
            })?;

        debug!("Port {} is owned by PID {}", port, pid);
        Ok(pid)
    }
}

impl Default for PortOwnerResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PortOwnerResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PortOwnerResolver").finish_non_exhaustive()
    }
}
