// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Script launcher: spawn a script under `rdbg` and attach to it.

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{BridgeError, Result};

/// How long we poll for the debug socket to appear after spawning.
const SOCKET_WAIT: Duration = Duration::from_secs(10);

const SOCKET_POLL: Duration = Duration::from_millis(100);

/// Spawn `rdbg --open --sock-path … <file> <args…>` and wait for its attach
/// socket. Returns the socket path and the child handle; the child is
/// killed when the handle drops.
pub async fn launch(file: &str, args: &[String]) -> Result<(PathBuf, Child)> {
    if !std::path::Path::new(file).exists() {
        return Err(BridgeError::session(format!("script '{file}' does not exist")));
    }

    let sock_dir = crate::discovery::socket_dir().unwrap_or_else(std::env::temp_dir);
    let sock_path = sock_dir.join(format!("rdbg-bridge-{}.sock", uuid::Uuid::new_v4()));

    let mut command = Command::new("rdbg");
    command
        .arg("--open")
        .arg("--sock-path")
        .arg(&sock_path)
        .arg(file)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command
        .spawn()
        .map_err(|e| BridgeError::session(format!("failed to spawn rdbg: {e} (is rdbg installed?)")))?;

    forward_output(&mut child, file);

    let deadline = tokio::time::Instant::now() + SOCKET_WAIT;
    loop {
        if sock_path.exists() {
            debug!(sock = %sock_path.display(), "debug socket ready");
            return Ok((sock_path, child));
        }
        if let Ok(Some(status)) = child.try_wait() {
            return Err(BridgeError::session(format!(
                "rdbg exited with {status} before opening its socket"
            )));
        }
        if tokio::time::Instant::now() >= deadline {
            let _ = child.start_kill();
            return Err(BridgeError::timeout("wait for rdbg socket", SOCKET_WAIT));
        }
        tokio::time::sleep(SOCKET_POLL).await;
    }
}

/// Drain the child's stdout/stderr into the log so script output is not
/// lost and the pipes never fill up.
fn forward_output(child: &mut Child, file: &str) {
    if let Some(stdout) = child.stdout.take() {
        let file = file.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!(script = %file, line, "script stdout");
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let file = file.to_owned();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(script = %file, line, "script stderr");
            }
        });
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
