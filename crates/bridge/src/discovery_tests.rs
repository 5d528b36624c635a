// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serial_test::serial;
use yare::parameterized;

use super::{parse_sock_name, probe_tcp, scan_proc_in, scan_sockets_in, socket_dir, Candidate};

#[parameterized(
    bare = { "rdbg-123", Some((123, None)) },
    named = { "rdbg-456-myapp", Some((456, Some("myapp"))) },
    multi_dash_name = { "rdbg-789-my-app", Some((789, Some("my-app"))) },
    not_rdbg = { "other-123", None },
    no_pid = { "rdbg-", None },
    garbage_pid = { "rdbg-abc", None },
)]
fn socket_name_parsing(name: &str, expected: Option<(i32, Option<&str>)>) {
    let parsed = parse_sock_name(name);
    let expected = expected.map(|(pid, tag)| (pid, tag.map(str::to_owned)));
    assert_eq!(parsed, expected);
}

#[test]
fn scan_sockets_in_finds_rdbg_files() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    std::fs::write(dir.path().join("rdbg-100"), b"")?;
    std::fs::write(dir.path().join("rdbg-50-web"), b"")?;
    std::fs::write(dir.path().join("unrelated.sock"), b"")?;

    let found = scan_sockets_in(dir.path());
    assert_eq!(found.len(), 2);
    // Sorted by PID.
    assert_eq!(found[0].pid, Some(50));
    assert_eq!(found[0].name.as_deref(), Some("web"));
    assert_eq!(found[1].pid, Some(100));
    assert!(found.iter().all(|c| c.source == "socket"));
    Ok(())
}

#[test]
fn scan_sockets_in_missing_dir_is_empty() {
    assert!(scan_sockets_in(std::path::Path::new("/definitely/not/here")).is_empty());
}

#[test]
fn scan_proc_reads_environ_blocks() -> anyhow::Result<()> {
    let root = tempfile::tempdir()?;
    let proc_dir = root.path().join("4242");
    std::fs::create_dir(&proc_dir)?;
    std::fs::write(proc_dir.join("environ"), b"PATH=/usr/bin\0RUBY_DEBUG_PORT=5678\0HOME=/root\0")?;

    let other = root.path().join("4243");
    std::fs::create_dir(&other)?;
    std::fs::write(other.join("environ"), b"PATH=/usr/bin\0")?;

    // Non-numeric entries are skipped.
    std::fs::create_dir(root.path().join("self"))?;

    let found = scan_proc_in(root.path());
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].pid, Some(4242));
    assert_eq!(found[0].port, Some(5678));
    assert_eq!(found[0].source, "proc");
    Ok(())
}

#[test]
#[serial]
fn socket_dir_prefers_explicit_override() {
    std::env::set_var("RUBY_DEBUG_SOCK_DIR", "/custom/sock/dir");
    std::env::set_var("XDG_RUNTIME_DIR", "/run/user/1000");
    assert_eq!(socket_dir(), Some("/custom/sock/dir".into()));

    std::env::remove_var("RUBY_DEBUG_SOCK_DIR");
    assert_eq!(socket_dir(), Some("/run/user/1000".into()));

    std::env::remove_var("XDG_RUNTIME_DIR");
    assert_eq!(socket_dir(), None);
}

#[tokio::test]
async fn probe_tcp_distinguishes_listeners() -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    assert!(probe_tcp("127.0.0.1", port).await);
    drop(listener);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!probe_tcp("127.0.0.1", port).await);
    Ok(())
}

#[test]
fn candidate_targets_and_description() {
    let socket = Candidate {
        host: "local".to_owned(),
        port: None,
        socket: Some("/run/rdbg-9".into()),
        pid: Some(9),
        name: None,
        source: "socket",
    };
    assert!(matches!(socket.target(), Some(crate::wire::Target::Unix { .. })));
    assert!(socket.describe().contains("/run/rdbg-9"));
    assert!(socket.describe().contains("pid=9"));

    let tcp = Candidate {
        host: "127.0.0.1".to_owned(),
        port: Some(5678),
        socket: None,
        pid: None,
        name: Some("web-1".to_owned()),
        source: "docker",
    };
    assert!(matches!(tcp.target(), Some(crate::wire::Target::Tcp { port: 5678, .. })));
    assert!(tcp.describe().contains("127.0.0.1:5678"));
    assert!(tcp.describe().contains("name=web-1"));
}
