//! Process descriptor scanner
//!
//! Walks `/proc/<pid>/fd/*` looking for a descriptor whose link target is
//! `socket:[<inode>]`. Processes that exit mid-scan and descriptor
//! directories owned by other users are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::trace;

use crate::error::ScanError;

/// Default procfs mount point
pub const PROC_ROOT: &str = "/proc";

/// Inode to PID lookup over open file descriptors.
pub trait ProcessFdScanner: Send + Sync {
    /// Return the PID of the first process holding a descriptor for `inode`.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::NoOwner` if no process holds it, or
    /// `ScanError::ProcUnreadable` if the process root cannot be listed.
    fn find_process_for_inode(&self, inode: u64) -> Result<u32, ScanError>;
}

/// Scanner over a procfs tree
#[derive(Debug, Clone)]
pub struct ProcFdScanner {
    root: PathBuf,
}

impl ProcFdScanner {
    /// Scan `/proc`
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(PROC_ROOT)
    }

    /// Scan a tree laid out like `/proc`
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The scanned root
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Lazily list `(pid, process directory)` for every numeric entry.
    ///
    /// # Errors
    ///
    /// Returns `ScanError::ProcUnreadable` if the root cannot be listed.
    pub fn processes(&self) -> Result<impl Iterator<Item = (u32, PathBuf)>, ScanError> {
        let entries = fs::read_dir(&self.root).map_err(|source| ScanError::ProcUnreadable {
            path: self.root.clone(),
            source,
        })?;

        Ok(entries.filter_map(Result::ok).filter_map(|entry| {
            let pid = parse_pid(entry.file_name().to_str()?)?;
            Some((pid, entry.path()))
        }))
    }
}

impl Default for ProcFdScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessFdScanner for ProcFdScanner {
    fn find_process_for_inode(&self, inode: u64) -> Result<u32, ScanError> {
        self.processes()?
            .find(|(_, dir)| socket_inodes(dir).any(|candidate| candidate == inode))
            .map(|(pid, _)| pid)
            .ok_or(ScanError::NoOwner { inode })
    }
}

/// Lazily yield the socket inodes held open by the process at `process_dir`.
///
/// An unreadable `fd/` directory yields nothing; non-socket descriptors are
/// dropped.
pub fn socket_inodes(process_dir: &Path) -> impl Iterator<Item = u64> {
    let fd_dir = process_dir.join("fd");
    let entries = match fs::read_dir(&fd_dir) {
        Ok(entries) => Some(entries),
        Err(e) => {
            trace!("Skipping {}: {}", fd_dir.display(), e);
            None
        }
    };

    entries
        .into_iter()
        .flatten()
        .filter_map(Result::ok)
        .filter_map(|entry| fs::read_link(entry.path()).ok())
        .filter_map(|target| parse_socket_inode(target.to_str()?))
}

/// Parse a descriptor link target of the exact form `socket:[<decimal>]`.
#[must_use]
pub fn parse_socket_inode(link: &str) -> Option<u64> {
    let digits = link.strip_prefix("socket:[")?.strip_suffix(']')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Parse a process directory name; only all-digit names are processes.
fn parse_pid(name: &str) -> Option<u32> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}
