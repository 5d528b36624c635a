// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pause/resume reconciliation.
//!
//! The target accepts two pause mechanisms: the textual `pause PID` command
//! and an out-of-band SIGURG. Every unconsumed `pause` message becomes a
//! queued signal that re-pauses the process later with no client attached,
//! so the controller enforces a strict discipline: exactly one `pause PID`
//! write per repause cycle, with all retries going through the passive
//! [`PauseController::check_paused`] path.

use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::channel::{CommandChannel, InterruptCheck, StopWait};
use crate::error::{BridgeError, Result};
use crate::state::StateTracker;

/// Result of resuming the target and waiting for the next event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Stopped at a breakpoint, step boundary, or explicit pause.
    Breakpoint(String),
    /// The interrupt check fired before any stop was observed.
    Interrupted,
    /// No stop within the deadline; the target keeps running.
    Timeout,
    /// The target process terminated.
    Exited(String),
}

/// How a trap-context escape is attempted.
#[derive(Debug, Clone)]
pub enum EscapeStrategy {
    /// Set a one-shot breakpoint on the framework dispatch path, then knock
    /// on the target's listen port so the next request trips it.
    HttpNudge { dispatch_target: String, port: u16 },
}

#[derive(Debug)]
pub struct PauseController {
    channel: Arc<CommandChannel>,
    tracker: Arc<StateTracker>,
    /// SIGURG can only reach host-local processes (Unix-socket targets).
    signal_reachable: bool,
}

impl PauseController {
    pub fn new(
        channel: Arc<CommandChannel>,
        tracker: Arc<StateTracker>,
        signal_reachable: bool,
    ) -> Self {
        Self { channel, tracker, signal_reachable }
    }

    /// Wait passively until the target is paused. Emits zero pause messages:
    /// the target may be about to stop on its own (e.g. an in-flight HTTP
    /// request is heading for a breakpoint).
    pub async fn ensure_paused(&self, timeout: Duration) -> Result<String> {
        if self.tracker.is_paused() {
            return Ok(String::new());
        }
        self.check_paused(timeout).await
    }

    /// Actively force a pause: exactly ONE `pause PID` message plus one
    /// out-of-band SIGURG when the target is host-local, then wait.
    pub async fn repause(&self, timeout: Duration) -> Result<String> {
        if self.tracker.is_paused() {
            return Ok(String::new());
        }
        let pid = self
            .tracker
            .pid()
            .ok_or_else(|| BridgeError::session("target PID unknown; cannot pause"))?;
        let mark = self.channel.mark();
        self.channel.send_command_no_wait(&format!("pause {pid}"), true).await?;
        if self.signal_reachable {
            if let Err(e) = kill(Pid::from_raw(pid), Signal::SIGURG) {
                debug!(pid, err = %e, "SIGURG delivery failed, relying on pause command");
            }
        }
        self.wait_paused(mark, timeout).await
    }

    /// Wait for the paused state WITHOUT sending another pause message.
    /// Retry paths use this after a prior [`repause`] so stale signals never
    /// accumulate.
    ///
    /// [`repause`]: PauseController::repause
    pub async fn check_paused(&self, timeout: Duration) -> Result<String> {
        let mark = self.channel.mark();
        self.wait_paused(mark, timeout).await
    }

    /// Resume execution and wait for the next stop, interrupt, or exit.
    pub async fn continue_and_wait(
        &self,
        timeout: Duration,
        interrupt: Option<InterruptCheck>,
    ) -> Result<Outcome> {
        let state = self.tracker.snapshot();
        if state.process_exited || state.closed {
            return Ok(Outcome::Exited(String::new()));
        }
        match self.channel.send_continue(timeout, interrupt).await {
            Ok(StopWait::Stopped(text)) => Ok(Outcome::Breakpoint(text)),
            Ok(StopWait::Interrupted(_)) => Ok(Outcome::Interrupted),
            Ok(StopWait::Exited(text)) => Ok(Outcome::Exited(text)),
            Err(e) if e.is_timeout() => Ok(Outcome::Timeout),
            Err(e) => Err(e),
        }
    }

    /// Yank a running target back into a paused state so cleanup commands
    /// can be issued. One active repause; one passive retry.
    pub async fn interrupt_and_wait(&self, timeout: Duration) -> Result<String> {
        if self.tracker.is_paused() {
            return Ok(String::new());
        }
        match self.repause(timeout).await {
            Ok(text) => Ok(text),
            Err(e) if e.is_timeout() => {
                debug!("pause not yet observed, waiting once more without re-sending");
                self.check_paused(timeout).await
            }
            Err(e) => Err(e),
        }
    }

    /// Repeated-wait helper for disconnect paths: one `repause`, then up to
    /// `retries` passive waits. Returns the actual paused flag.
    pub async fn auto_repause(&self, timeout: Duration, retries: u32) -> bool {
        if self.tracker.is_paused() {
            return true;
        }
        match self.repause(timeout).await {
            Ok(_) => return true,
            Err(e) => debug!(err = %e, "initial repause did not land"),
        }
        for attempt in 0..retries {
            match self.check_paused(timeout).await {
                Ok(_) => return true,
                Err(e) => debug!(attempt = attempt + 1, err = %e, "pause retry"),
            }
        }
        self.tracker.is_paused()
    }

    /// Try to move the target out of a signal-trap context.
    ///
    /// Sets a one-shot breakpoint on the framework dispatch path, resumes,
    /// and knocks on the target's listen port so the next request trips the
    /// breakpoint in a normal frame. Returns the actual paused flag; after a
    /// failed escape the controller forces an active repause rather than
    /// declaring success.
    pub async fn attempt_trap_escape(&self, strategy: &EscapeStrategy, timeout: Duration) -> Result<bool> {
        let EscapeStrategy::HttpNudge { dispatch_target, port } = strategy;

        let response = self
            .channel
            .send_command(&format!("break {dispatch_target}"), None)
            .await?;
        let bp = crate::breakpoint::parse_set_response(&response);
        debug!(target = %dispatch_target, bp = ?bp, "trap escape breakpoint set");

        let url = format!("http://127.0.0.1:{port}/");
        tokio::spawn(async move {
            let client = reqwest::Client::builder()
                .timeout(Duration::from_secs(5))
                .build()
                .unwrap_or_default();
            if let Err(e) = client.get(&url).send().await {
                debug!(url, err = %e, "trap escape nudge request failed");
            }
        });

        match self.continue_and_wait(timeout, None).await? {
            Outcome::Breakpoint(_) => {
                self.tracker.set_trap_context(false);
                if let Some(n) = bp {
                    let _ = self.channel.send_command(&format!("delete {n}"), None).await;
                }
                Ok(true)
            }
            Outcome::Exited(_) => Ok(false),
            Outcome::Interrupted | Outcome::Timeout => self.attempt_repause_after_no_hit(timeout).await,
        }
    }

    /// The dispatch breakpoint never fired: force the target back to a
    /// paused state and report what actually happened.
    async fn attempt_repause_after_no_hit(&self, timeout: Duration) -> Result<bool> {
        if let Err(e) = self.repause(timeout).await {
            warn!(err = %e, "repause after failed trap escape did not land");
        }
        Ok(self.tracker.is_paused())
    }

    async fn wait_paused(&self, mark: usize, timeout: Duration) -> Result<String> {
        match self.channel.wait_for_stop(mark, timeout, None).await? {
            StopWait::Stopped(text) => Ok(text),
            StopWait::Interrupted(text) => Ok(text),
            StopWait::Exited(text) => Err(BridgeError::session_with_output(
                "target process exited while waiting for pause",
                text,
            )),
        }
    }
}

/// Liveness probe via `kill(pid, 0)`.
pub fn pid_alive(pid: i32) -> bool {
    kill(Pid::from_raw(pid), None).is_ok()
}

#[cfg(test)]
#[path = "pause_tests.rs"]
mod tests;
