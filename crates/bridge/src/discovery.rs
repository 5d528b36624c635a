// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debuggee discovery: local rdbg sockets, docker containers advertising a
//! debug port, and (on Linux) local processes with the same env var.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Serialize;
use tokio::net::TcpStream;
use tracing::debug;

use crate::wire::Target;

/// Env var naming the debug port inside containers and processes.
pub const DEBUG_PORT_ENV: &str = "RUBY_DEBUG_PORT";

/// Reachability probe deadline per candidate.
const PROBE_TIMEOUT: Duration = Duration::from_millis(300);

/// One discovered attach point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Candidate {
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socket: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Where this candidate came from: `socket`, `docker`, `proc`.
    pub source: &'static str,
}

impl Candidate {
    pub fn target(&self) -> Option<Target> {
        if let Some(ref socket) = self.socket {
            return Some(Target::Unix { path: socket.clone() });
        }
        self.port.map(|port| Target::Tcp { host: self.host.clone(), port })
    }

    pub fn describe(&self) -> String {
        let location = match (&self.socket, self.port) {
            (Some(path), _) => path.display().to_string(),
            (None, Some(port)) => format!("{}:{port}", self.host),
            (None, None) => self.host.clone(),
        };
        let mut out = format!("{location} (source: {})", self.source);
        if let Some(pid) = self.pid {
            out.push_str(&format!(" pid={pid}"));
        }
        if let Some(ref name) = self.name {
            out.push_str(&format!(" name={name}"));
        }
        out
    }
}

/// The directory rdbg drops its attach sockets in:
/// `$RUBY_DEBUG_SOCK_DIR`, falling back to `$XDG_RUNTIME_DIR`.
pub fn socket_dir() -> Option<PathBuf> {
    socket_dir_with(|name| std::env::var(name).ok())
}

fn socket_dir_with(get_env: impl Fn(&str) -> Option<String>) -> Option<PathBuf> {
    get_env("RUBY_DEBUG_SOCK_DIR")
        .or_else(|| get_env("XDG_RUNTIME_DIR"))
        .map(PathBuf::from)
}

/// Parse an rdbg socket filename: `rdbg-PID` or `rdbg-PID-name`.
pub fn parse_sock_name(name: &str) -> Option<(i32, Option<String>)> {
    let rest = name.strip_prefix("rdbg-")?;
    let (pid_part, tag) = match rest.split_once('-') {
        Some((pid, tag)) => (pid, Some(tag.to_owned())),
        None => (rest, None),
    };
    Some((pid_part.parse().ok()?, tag))
}

/// Scan the rdbg socket directory for attachable sessions.
pub fn scan_sockets() -> Vec<Candidate> {
    match socket_dir() {
        Some(dir) => scan_sockets_in(&dir),
        None => Vec::new(),
    }
}

/// Scan a specific directory (exposed for tests).
pub fn scan_sockets_in(dir: &Path) -> Vec<Candidate> {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut found: Vec<Candidate> = entries
        .filter_map(|e| e.ok())
        .filter_map(|entry| {
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let (pid, name) = parse_sock_name(&file_name)?;
            Some(Candidate {
                host: "local".to_owned(),
                port: None,
                socket: Some(entry.path()),
                pid: Some(pid),
                name,
                source: "socket",
            })
        })
        .collect();
    found.sort_by_key(|c| c.pid);
    found
}

/// Enumerate running docker containers whose environment names a debug
/// port; report the ones that answer on that port.
pub async fn scan_docker() -> Vec<Candidate> {
    let Ok(output) = tokio::process::Command::new("docker")
        .args(["ps", "--format", "{{.ID}}\t{{.Names}}"])
        .output()
        .await
    else {
        return Vec::new();
    };
    if !output.status.success() {
        return Vec::new();
    }

    let mut found = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let Some((id, name)) = line.split_once('\t') else { continue };
        let Ok(inspect) = tokio::process::Command::new("docker")
            .args(["inspect", "--format", "{{range .Config.Env}}{{println .}}{{end}}", id])
            .output()
            .await
        else {
            continue;
        };
        let env = String::from_utf8_lossy(&inspect.stdout).into_owned();
        let Some(port) = port_from_env_block(&env, '\n') else { continue };
        if !probe_tcp("127.0.0.1", port).await {
            debug!(name, port, "container advertises a debug port but it is unreachable");
            continue;
        }
        found.push(Candidate {
            host: "127.0.0.1".to_owned(),
            port: Some(port),
            socket: None,
            pid: None,
            name: Some(name.to_owned()),
            source: "docker",
        });
    }
    found
}

/// Enumerate `/proc/*/environ` for local processes exporting the debug
/// port env var. Linux only; elsewhere this returns nothing.
pub fn scan_proc() -> Vec<Candidate> {
    scan_proc_in(Path::new("/proc"))
}

/// Scan a specific proc-like tree (exposed for tests).
pub fn scan_proc_in(root: &Path) -> Vec<Candidate> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let mut found = Vec::new();
    for entry in entries.filter_map(|e| e.ok()) {
        let file_name = entry.file_name().to_string_lossy().into_owned();
        let Ok(pid) = file_name.parse::<i32>() else { continue };
        let Ok(environ) = std::fs::read(entry.path().join("environ")) else { continue };
        let environ = String::from_utf8_lossy(&environ).into_owned();
        let Some(port) = port_from_env_block(&environ, '\0') else { continue };
        found.push(Candidate {
            host: "127.0.0.1".to_owned(),
            port: Some(port),
            socket: None,
            pid: Some(pid),
            name: None,
            source: "proc",
        });
    }
    found.sort_by_key(|c| c.pid);
    found
}

/// Check whether anything is listening on `host:port`.
pub async fn probe_tcp(host: &str, port: u16) -> bool {
    tokio::time::timeout(PROBE_TIMEOUT, TcpStream::connect((host, port)))
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

/// All discovery sources combined, in socket/docker/proc order.
pub async fn discover_all() -> Vec<Candidate> {
    let mut found = scan_sockets();
    found.extend(scan_docker().await);
    if cfg!(target_os = "linux") {
        found.extend(scan_proc());
    }
    found
}

fn port_from_env_block(block: &str, separator: char) -> Option<u16> {
    block.split(separator).find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        (key == DEBUG_PORT_ENV).then(|| value.trim().parse().ok()).flatten()
    })
}

#[cfg(test)]
#[path = "discovery_tests.rs"]
mod tests;
