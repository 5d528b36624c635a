// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Synchronous request/response discipline on top of the full-duplex wire.
//!
//! The debugger connection is an event stream with no response framing: a
//! dedicated reader task consumes every inbound line, feeds it through the
//! [`StateTracker`], and appends it to a shared line log. `send_command`
//! writes one command and waits for the prompt sentinel that follows the
//! command's own output; unsolicited prompts (stop notifications arriving
//! while nothing is in flight) never terminate a response.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::error::{BridgeError, Result};
use crate::state::StateTracker;
use crate::wire::{WireReader, WireWriter};

/// Deadline for ordinary commands.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Deadline for `c` — the target may run a while before the next stop.
pub const CONTINUE_TIMEOUT: Duration = Duration::from_secs(30);

/// Output width configured at connect so values are not line-wrapped.
pub const OUTPUT_WIDTH: u16 = 500;

/// How often an interrupt-check predicate is evaluated while waiting.
const INTERRUPT_POLL: Duration = Duration::from_millis(100);

/// Predicate evaluated periodically during a continue-wait so an auxiliary
/// event (e.g. an HTTP response) can unblock the wait before a stop occurs.
pub type InterruptCheck = Arc<dyn Fn() -> bool + Send + Sync>;

/// Result of waiting for the target to stop (or fail to).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopWait {
    /// The target stopped; payload is the output since the resume.
    Stopped(String),
    /// The interrupt check fired before a stop was observed.
    Interrupted(String),
    /// The target process terminated; payload is its final output.
    Exited(String),
}

#[derive(Debug, Clone)]
struct LogEntry {
    text: String,
    prompt: bool,
}

#[derive(Default, Debug)]
struct LineLog {
    entries: Vec<LogEntry>,
}

/// Tunables for a session's command channel.
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub prompt_pattern: String,
    pub default_timeout: Duration,
    pub continue_timeout: Duration,
}

impl Default for ChannelSettings {
    fn default() -> Self {
        Self {
            prompt_pattern: crate::state::DEFAULT_PROMPT_PATTERN.to_owned(),
            default_timeout: DEFAULT_TIMEOUT,
            continue_timeout: CONTINUE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub struct CommandChannel {
    writer: WireWriter,
    tracker: Arc<StateTracker>,
    log: Arc<Mutex<LineLog>>,
    line_notify: Arc<Notify>,
    /// Single-command discipline: at most one send_command/send_continue in
    /// flight per session.
    inflight: tokio::sync::Mutex<()>,
    /// Writes of `pause PID` since connect, for the stale-pause invariant.
    pause_writes: AtomicUsize,
    shutdown: CancellationToken,
    settings: ChannelSettings,
}

impl CommandChannel {
    /// Build the channel and spawn its reader task.
    pub fn new(
        mut reader: WireReader,
        writer: WireWriter,
        tracker: Arc<StateTracker>,
        settings: ChannelSettings,
    ) -> Arc<Self> {
        let log = Arc::new(Mutex::new(LineLog::default()));
        let line_notify = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();

        let channel = Arc::new(Self {
            writer,
            tracker: Arc::clone(&tracker),
            log: Arc::clone(&log),
            line_notify: Arc::clone(&line_notify),
            inflight: tokio::sync::Mutex::new(()),
            pause_writes: AtomicUsize::new(0),
            shutdown: shutdown.clone(),
            settings,
        });

        tokio::spawn(async move {
            loop {
                let line = tokio::select! {
                    result = reader.read_line(None) => result,
                    _ = shutdown.cancelled() => break,
                };
                match line {
                    Ok(line) => {
                        let obs = tracker.observe(&line);
                        {
                            let mut log = lock(&log);
                            log.entries.push(LogEntry { text: line, prompt: obs.prompt });
                        }
                        line_notify.notify_waiters();
                    }
                    Err(e) => {
                        debug!(err = %e, "reader stopped");
                        tracker.mark_closed();
                        line_notify.notify_waiters();
                        break;
                    }
                }
            }
        });

        channel
    }

    pub fn settings(&self) -> &ChannelSettings {
        &self.settings
    }

    /// Current position in the line log; later used with [`drain_since`].
    ///
    /// [`drain_since`]: CommandChannel::drain_since
    pub fn mark(&self) -> usize {
        lock(&self.log).entries.len()
    }

    /// Non-prompt lines observed since `mark`, joined with newlines.
    pub fn drain_since(&self, mark: usize) -> String {
        let log = lock(&self.log);
        let lines: Vec<&str> = log.entries[mark.min(log.entries.len())..]
            .iter()
            .filter(|e| !e.prompt)
            .map(|e| e.text.as_str())
            .collect();
        lines.join("\n")
    }

    /// Number of `pause PID` commands written since connect.
    pub fn pause_write_count(&self) -> usize {
        self.pause_writes.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tracker.is_closed() || self.writer.is_closed()
    }

    /// Write a command and wait for its prompt-terminated response.
    ///
    /// The sentinel is qualified: it must follow the command's own echo or
    /// first output line. A prompt that arrives with nothing between it and
    /// the write is a leftover from an earlier event and is skipped.
    pub async fn send_command(&self, text: &str, timeout: Option<Duration>) -> Result<String> {
        let timeout = timeout.unwrap_or(self.settings.default_timeout);
        let _guard = self.inflight.lock().await;
        self.ensure_open()?;

        let start = self.mark();
        self.write_tracked(text).await?;

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(response) = self.response_since(start, text) {
                return Ok(response);
            }
            if self.tracker.is_closed() {
                return Err(BridgeError::connection_with_output(
                    "debugger connection closed mid-command",
                    self.drain_since(start),
                ));
            }
            let notified = self.line_notify.notified();
            if let Some(response) = self.response_since(start, text) {
                return Ok(response);
            }
            tokio::select! {
                _ = notified => {}
                _ = tokio::time::sleep_until(deadline) => {
                    return Err(BridgeError::timeout(command_label(text), timeout));
                }
            }
        }
    }

    /// Write a command without waiting for a response. Refused while the
    /// target is running unless `force` is set.
    pub async fn send_command_no_wait(&self, text: &str, force: bool) -> Result<()> {
        self.ensure_open()?;
        if !force && !self.tracker.is_paused() {
            return Err(BridgeError::session(format!(
                "target is running; refusing to send '{text}' without force"
            )));
        }
        self.write_tracked(text).await
    }

    /// Resume the target with `c` and wait for the next stop, interrupt, or
    /// exit. The caller maps a timeout error into its own outcome type.
    pub async fn send_continue(
        &self,
        timeout: Duration,
        interrupt: Option<InterruptCheck>,
    ) -> Result<StopWait> {
        let _guard = self.inflight.lock().await;
        self.ensure_open()?;
        let mark = self.mark();
        self.tracker.set_running();
        self.write_tracked("c").await?;
        self.wait_for_stop(mark, timeout, interrupt).await
    }

    /// Wait for the target to reach a paused state (a prompt), the process
    /// to exit, or the connection to close. Sends nothing.
    pub async fn wait_for_stop(
        &self,
        mark: usize,
        timeout: Duration,
        interrupt: Option<InterruptCheck>,
    ) -> Result<StopWait> {
        let mut events = self.tracker.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = self.tracker.snapshot();
            if state.process_exited {
                return Ok(StopWait::Exited(self.drain_since(mark)));
            }
            if state.closed {
                return Ok(StopWait::Exited(self.drain_since(mark)));
            }
            if state.paused {
                return Ok(StopWait::Stopped(self.drain_since(mark)));
            }
            if let Some(ref check) = interrupt {
                if check() {
                    return Ok(StopWait::Interrupted(self.drain_since(mark)));
                }
            }
            let poll = if interrupt.is_some() {
                INTERRUPT_POLL.min(deadline.saturating_duration_since(tokio::time::Instant::now()))
            } else {
                deadline.saturating_duration_since(tokio::time::Instant::now())
            };
            if poll.is_zero() {
                return Err(BridgeError::timeout("wait for stop", timeout));
            }
            tokio::select! {
                changed = events.changed() => {
                    if changed.is_err() {
                        // Tracker gone; treat as closed.
                        return Ok(StopWait::Exited(self.drain_since(mark)));
                    }
                }
                _ = tokio::time::sleep(poll) => {
                    if interrupt.is_none() {
                        return Err(BridgeError::timeout("wait for stop", timeout));
                    }
                }
            }
        }
    }

    /// Configure a wide output width so values are not truncated. The target
    /// may ignore this; silence is accepted.
    pub async fn configure_width(&self) {
        match self.send_command(&format!("config set width {OUTPUT_WIDTH}"), Some(Duration::from_secs(2))).await {
            Ok(_) => trace!("output width configured"),
            Err(e) => debug!(err = %e, "width configuration not acknowledged"),
        }
    }

    /// Stop the reader task and latch the connection closed. Idempotent.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.writer.close();
        self.tracker.mark_closed();
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(BridgeError::connection("debugger connection closed"));
        }
        Ok(())
    }

    async fn write_tracked(&self, text: &str) -> Result<()> {
        if text.starts_with("pause ") {
            self.pause_writes.fetch_add(1, Ordering::Relaxed);
        }
        match self.writer.write_line(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!(err = %e, "command write failed");
                self.tracker.mark_closed();
                Err(e)
            }
        }
    }

    /// Scan the log for a qualified sentinel; build the response if found.
    fn response_since(&self, start: usize, command: &str) -> Option<String> {
        let log = lock(&self.log);
        let entries = &log.entries[start.min(log.entries.len())..];
        let mut saw_output = false;
        for (i, entry) in entries.iter().enumerate() {
            if entry.prompt {
                if !saw_output {
                    continue; // sentinel before the command's echo: stale
                }
                let mut lines: Vec<&str> = entries[..i]
                    .iter()
                    .filter(|e| !e.prompt)
                    .map(|e| e.text.as_str())
                    .collect();
                if lines.first() == Some(&command) {
                    lines.remove(0); // command echo
                }
                return Some(lines.join("\n"));
            }
            saw_output = true;
        }
        None
    }
}

impl Drop for CommandChannel {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn command_label(text: &str) -> String {
    let head: String = text.chars().take(32).collect();
    if head.len() < text.len() {
        format!("command '{head}…'")
    } else {
        format!("command '{head}'")
    }
}

fn lock(log: &Mutex<LineLog>) -> MutexGuard<'_, LineLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
