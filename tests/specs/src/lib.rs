// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end scenario and smoke tests.
//!
//! Spawns the real `rdbg-bridge` binary and speaks MCP to it over stdio or
//! HTTP; the scenario tests drive the library's public tool surface against
//! the in-process `MockDebugger`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};

const RPC_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolve the path to the compiled `rdbg-bridge` binary.
pub fn bridge_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("rdbg-bridge")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

/// A spawned bridge speaking newline-delimited JSON-RPC on stdio.
pub struct BridgeProcess {
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
    next_id: u64,
}

impl BridgeProcess {
    pub fn start_stdio() -> anyhow::Result<Self> {
        let mut child = Command::new(bridge_binary())
            .arg("--transport")
            .arg("stdio")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .context("spawn rdbg-bridge (run `cargo build` first?)")?;
        let stdin = child.stdin.take().context("child stdin")?;
        let stdout = child.stdout.take().context("child stdout")?;
        Ok(Self { child, stdin, stdout: BufReader::new(stdout).lines(), next_id: 1 })
    }

    /// Send one request and read one response line.
    pub async fn request(
        &mut self,
        method: &str,
        params: serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        let id = self.next_id;
        self.next_id += 1;
        let raw = serde_json::json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        })
        .to_string();
        self.stdin.write_all(raw.as_bytes()).await?;
        self.stdin.write_all(b"\n").await?;
        self.stdin.flush().await?;

        let line = tokio::time::timeout(RPC_TIMEOUT, self.stdout.next_line())
            .await
            .context("bridge response timed out")??
            .context("bridge closed stdout")?;
        let response: serde_json::Value = serde_json::from_str(&line)?;
        anyhow::ensure!(response["id"] == id, "response id mismatch: {line}");
        Ok(response)
    }

    /// Call a tool and return its text payload.
    pub async fn call_tool(
        &mut self,
        name: &str,
        arguments: serde_json::Value,
    ) -> anyhow::Result<String> {
        let response = self
            .request("tools/call", serde_json::json!({ "name": name, "arguments": arguments }))
            .await?;
        response["result"]["content"][0]["text"]
            .as_str()
            .map(str::to_owned)
            .with_context(|| format!("no text content in {response}"))
    }

    /// Close stdin and wait for a clean exit.
    pub async fn shutdown(mut self) -> anyhow::Result<()> {
        drop(self.stdin);
        let status = tokio::time::timeout(RPC_TIMEOUT, self.child.wait())
            .await
            .context("bridge did not exit after stdin closed")??;
        anyhow::ensure!(status.success(), "bridge exited with {status}");
        Ok(())
    }
}

/// Spawn the bridge with the HTTP transport on `port`.
pub fn start_http(port: u16) -> anyhow::Result<Child> {
    Command::new(bridge_binary())
        .args(["--transport", "http", "--port", &port.to_string()])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .context("spawn rdbg-bridge")
}

/// Poll the health endpoint until the server answers.
pub async fn wait_healthy(port: u16, deadline: Duration) -> anyhow::Result<()> {
    let url = format!("http://127.0.0.1:{port}/healthz");
    let end = tokio::time::Instant::now() + deadline;
    loop {
        if let Ok(resp) = reqwest::get(&url).await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        anyhow::ensure!(tokio::time::Instant::now() < end, "bridge never became healthy");
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
