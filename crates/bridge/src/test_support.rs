// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted in-process debugger endpoint and
//! registry builders.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::registry::{ConnectParams, SessionRegistry};
use crate::wire::Target;

/// Default PID announced by the mock's greeting.
pub const MOCK_PID: i32 = 12345;

/// What the mock sends back for one received command.
#[derive(Debug, Clone, Default)]
pub struct MockReply {
    pub lines: Vec<String>,
    pub prompt: bool,
}

impl MockReply {
    /// Echo plus output lines, terminated by a prompt.
    pub fn with_prompt(lines: &[&str]) -> Self {
        Self { lines: lines.iter().map(|s| (*s).to_owned()).collect(), prompt: true }
    }

    /// No reply at all (e.g. a `pause` the mock chooses to sit on).
    pub fn silent() -> Self {
        Self::default()
    }

    /// Output without a prompt: the target is running.
    pub fn running(lines: &[&str]) -> Self {
        Self { lines: lines.iter().map(|s| (*s).to_owned()).collect(), prompt: false }
    }
}

/// Per-command response function. Receives the raw command line.
pub type MockHandler = Arc<dyn Fn(&str) -> MockReply + Send + Sync>;

/// Configuration for a [`MockDebugger`].
pub struct MockScript {
    pub pid: i32,
    pub greeting: Vec<String>,
    pub handler: MockHandler,
}

impl Default for MockScript {
    fn default() -> Self {
        Self { pid: MOCK_PID, greeting: default_greeting(MOCK_PID), handler: echo_handler() }
    }
}

impl MockScript {
    pub fn with_handler(handler: MockHandler) -> Self {
        Self { handler, ..Self::default() }
    }
}

/// Banner, PID announcement, frame summary, and the initial prompt — the
/// shape of a real attach exchange.
pub fn default_greeting(pid: i32) -> Vec<String> {
    vec![
        "DEBUGGER: wait for client connection at /tmp/rdbg-mock".to_owned(),
        format!("DEBUGGER: Connected. (ruby:{pid})"),
        "[1, 4] in app.rb".to_owned(),
        "=>   2| value = compute".to_owned(),
        "=>#0  <main> at app.rb:2".to_owned(),
        "(rdbg)".to_owned(),
    ]
}

/// Echoes every command and answers `nil`, like an idle debugger.
pub fn echo_handler() -> MockHandler {
    Arc::new(|cmd: &str| MockReply { lines: vec![cmd.to_owned(), "nil".to_owned()], prompt: true })
}

/// An echo handler with per-prefix overrides, first match wins.
pub fn scripted_handler(rules: Vec<(&'static str, MockReply)>) -> MockHandler {
    Arc::new(move |cmd: &str| {
        for (prefix, reply) in &rules {
            if cmd.starts_with(prefix) {
                let mut reply = reply.clone();
                if !reply.lines.is_empty() || reply.prompt {
                    reply.lines.insert(0, cmd.to_owned());
                }
                return reply;
            }
        }
        MockReply { lines: vec![cmd.to_owned(), "nil".to_owned()], prompt: true }
    })
}

/// Stop-notification lines for a line breakpoint hit.
pub fn stop_lines(bp: u32, file: &str, line: u32) -> Vec<String> {
    vec![
        format!("Stop by #{bp}  BP - Line  {file}:{line} (line)"),
        format!("=>#0  <main> at {file}:{line}"),
        "(rdbg)".to_owned(),
    ]
}

/// Final lines of a target that ran to completion.
pub fn exit_lines() -> Vec<String> {
    vec!["DEBUGGER: the debuggee process exited".to_owned()]
}

/// A scripted rdbg endpoint on a loopback TCP port. Records every received
/// line and can emit unsolicited output mid-session.
pub struct MockDebugger {
    addr: std::net::SocketAddr,
    received: Arc<Mutex<Vec<String>>>,
    inject_tx: mpsc::UnboundedSender<Vec<String>>,
    cancel: CancellationToken,
}

impl MockDebugger {
    pub async fn start(script: MockScript) -> anyhow::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let (inject_tx, mut inject_rx) = mpsc::unbounded_channel::<Vec<String>>();
        let cancel = CancellationToken::new();

        let task_received = Arc::clone(&received);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else { return };
            let (read, mut write) = stream.into_split();

            for line in &script.greeting {
                if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                    return;
                }
            }

            let mut lines = BufReader::new(read).lines();
            loop {
                tokio::select! {
                    injected = inject_rx.recv() => {
                        let Some(injected) = injected else { continue };
                        for line in injected {
                            if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                                return;
                            }
                        }
                    }
                    line = lines.next_line() => {
                        let Ok(Some(command)) = line else { return };
                        lock(&task_received).push(command.clone());
                        let reply = (script.handler)(&command);
                        for line in reply.lines {
                            if write.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                                return;
                            }
                        }
                        if reply.prompt
                            && write.write_all(b"(rdbg)\n").await.is_err()
                        {
                            return;
                        }
                    }
                    _ = task_cancel.cancelled() => return,
                }
            }
        });

        Ok(Self { addr, received, inject_tx, cancel })
    }

    pub fn target(&self) -> Target {
        Target::Tcp { host: "127.0.0.1".to_owned(), port: self.addr.port() }
    }

    pub fn received(&self) -> Vec<String> {
        lock(&self.received).clone()
    }

    pub fn count_received(&self, prefix: &str) -> usize {
        lock(&self.received).iter().filter(|l| l.starts_with(prefix)).count()
    }

    /// Push unsolicited lines (stop notifications, target stdout).
    pub fn inject(&self, lines: Vec<String>) {
        let _ = self.inject_tx.send(lines);
    }

    /// Drop the connection, simulating a vanished target.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

impl Drop for MockDebugger {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Registry connected to a mock, with the idle timeout supplied by the
/// test so reap scenarios don't wait on production constants.
pub async fn registry_with_mock(
    mock: &MockDebugger,
    timeout: Duration,
) -> anyhow::Result<(Arc<SessionRegistry>, String)> {
    let registry = Arc::new(SessionRegistry::new(timeout));
    let (id, _) = registry.connect(mock.target(), ConnectParams::default()).await?;
    Ok((registry, id))
}

/// Wait until `predicate` is true or the deadline passes.
pub async fn wait_until(deadline: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let end = tokio::time::Instant::now() + deadline;
    while tokio::time::Instant::now() < end {
        if predicate() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    predicate()
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
