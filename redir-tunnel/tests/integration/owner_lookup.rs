//! Port owner resolution against a fabricated procfs tree
//!
//! The tree mirrors the layout the resolver reads:
//!
//! ```text
//! <root>/net/tcp
//! <root>/<pid>/fd/<n> -> socket:[<inode>]
//! ```

use std::fs;
use std::io::Write;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::sync::Arc;

use redir_tunnel::error::{LookupError, ScanError};
use redir_tunnel::owner::{PortOwnerResolver, ProcFdScanner, ProcNetTcp};

const HEADER: &str = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode";

/// One `/proc/net/tcp` row for a socket on 127.0.0.1
fn tcp_row(sl: u32, port_hex: &str, state: &str, inode: u64) -> String {
    format!(
        "{sl:4}: 0100007F:{port_hex} 00000000:0000 {state} 00000000:00000000 00:00000000 00000000  1000        0 {inode} 1 0000000000000000 100 0 0 10 0"
    )
}

struct FakeProc {
    dir: tempfile::TempDir,
}

impl FakeProc {
    fn new(rows: &[String]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("net")).unwrap();
        let mut table = fs::File::create(dir.path().join("net/tcp")).unwrap();
        writeln!(table, "{HEADER}").unwrap();
        for row in rows {
            writeln!(table, "{row}").unwrap();
        }
        Self { dir }
    }

    fn process(self, pid: u32, links: &[&str]) -> Self {
        let fd_dir = self.dir.path().join(pid.to_string()).join("fd");
        fs::create_dir_all(&fd_dir).unwrap();
        for (n, target) in links.iter().enumerate() {
            symlink(target, fd_dir.join(n.to_string())).unwrap();
        }
        self
    }

    fn root(&self) -> &Path {
        self.dir.path()
    }

    fn resolver(&self) -> PortOwnerResolver {
        PortOwnerResolver::with_sources(
            Arc::new(ProcNetTcp::with_path(self.root().join("net/tcp"))),
            Arc::new(ProcFdScanner::with_root(self.root())),
        )
    }
}

#[test]
fn test_resolves_listening_proxy() {
    let fake = FakeProc::new(&[
        tcp_row(0, "0016", "0A", 1001),
        tcp_row(1, "1F90", "0A", 48213),
    ])
    .process(1, &["/dev/null", "socket:[1001]"])
    .process(4321, &["pipe:[9]", "anon_inode:[eventpoll]", "socket:[48213]"]);

    assert_eq!(fake.resolver().resolve_owner(8080).unwrap(), 4321);
    assert_eq!(fake.resolver().resolve_owner(22).unwrap(), 1);
}

#[test]
fn test_unbound_port_is_not_found() {
    let fake = FakeProc::new(&[tcp_row(0, "1F90", "0A", 48213)]).process(4321, &["socket:[48213]"]);

    let err = fake.resolver().resolve_owner(9090).unwrap_err();
    assert!(matches!(err, LookupError::NoProcessForPort { port: 9090 }));
    assert!(err.is_no_process_for_port());
    assert!(!err.is_inconsistent());
}

#[test]
fn test_malformed_row_does_not_abort_scan() {
    let fake = FakeProc::new(&[
        tcp_row(0, "GGGG", "0A", 1),
        "   1: garbage".to_string(),
        tcp_row(2, "0CEA", "0A", 777),
    ])
    .process(99, &["socket:[777]"]);

    assert_eq!(fake.resolver().resolve_owner(3306).unwrap(), 99);
}

#[test]
fn test_only_malformed_rows_is_not_found() {
    let fake = FakeProc::new(&[tcp_row(0, "GGGG", "0A", 1)]).process(99, &["socket:[1]"]);

    let err = fake.resolver().resolve_owner(80).unwrap_err();
    assert!(matches!(err, LookupError::NoProcessForPort { port: 80 }));
}

#[test]
fn test_unclaimed_inode_reports_cause() {
    // Table knows the socket, but the owning process already exited
    let fake = FakeProc::new(&[tcp_row(0, "1F90", "0A", 555)]).process(10, &["socket:[556]"]);

    let err = fake.resolver().resolve_owner(8080).unwrap_err();
    assert!(err.is_no_process_for_port());
    assert!(err.is_inconsistent());
    match err {
        LookupError::UnclaimedInode {
            port,
            inode,
            source,
        } => {
            assert_eq!(port, 8080);
            assert_eq!(inode, 555);
            assert!(matches!(source, ScanError::NoOwner { inode: 555 }));
        }
        other => panic!("expected unclaimed inode, got {other}"),
    }
}

#[test]
fn test_process_without_fd_access_is_skipped() {
    let fake = FakeProc::new(&[tcp_row(0, "1F90", "0A", 48213)]).process(500, &["socket:[48213]"]);
    // Exited process: directory present, fd/ missing
    fs::create_dir_all(fake.root().join("400")).unwrap();

    assert_eq!(fake.resolver().resolve_owner(8080).unwrap(), 500);
}

#[test]
fn test_missing_table_is_not_found() {
    let fake = FakeProc::new(&[]);
    fs::remove_file(fake.root().join("net/tcp")).unwrap();

    let err = fake.resolver().resolve_owner(8080).unwrap_err();
    assert!(matches!(err, LookupError::TableUnavailable { .. }));
    assert!(err.is_no_process_for_port());
}

#[test]
fn test_resolves_own_listener_on_live_proc() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    // Restricted containers may hide /proc entries; only a hit is asserted
    if let Ok(pid) = PortOwnerResolver::new().resolve_owner(port) {
        assert_eq!(pid, std::process::id());
    }
}
