//! Port owner module: which process is listening on a local TCP port?
//!
//! Resolution composes two procfs lookups:
//! 1. [`KernelSocketTable`]: `/proc/net/tcp` maps the port to a socket inode
//! 2. [`ProcessFdScanner`]: `/proc/<pid>/fd/*` maps the inode to a PID
//!
//! Both scans are best effort. Malformed rows and unreadable descriptor
//! directories are skipped; only a total miss is reported.
//!
//! # Example
//!
//! ```no_run
//! use redir_tunnel::owner::PortOwnerResolver;
//!
//! match PortOwnerResolver::new().resolve_owner(8080) {
//!     Ok(pid) => println!("port 8080 belongs to PID {pid}"),
//!     Err(e) if e.is_no_process_for_port() => println!("{e}"),
//!     Err(e) => eprintln!("lookup failed: {e}"),
//! }
//! ```

mod fd_scan;
mod resolver;
mod tcp_table;

pub use fd_scan::{parse_socket_inode, socket_inodes, ProcFdScanner, ProcessFdScanner, PROC_ROOT};
pub use resolver::PortOwnerResolver;
pub use tcp_table::{
    KernelSocketTable, ProcNetTcp, RowError, TcpTableEntry, TcpTableRows, PROC_NET_TCP,
};
