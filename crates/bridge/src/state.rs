// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound-line interpretation: pause state, stop events, trap context,
//! process exit, prompt boundaries.
//!
//! The channel's reader task feeds every line through [`StateTracker::observe`]
//! before logging it. Waiters subscribe to the tracker's event sequence via a
//! watch channel, so a stop observed between a check and a sleep is never
//! missed.

use std::sync::{Mutex, MutexGuard, PoisonError};

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::error::{BridgeError, Result};

/// Default prompt sentinel: `(rdbg)` plus versioned/multi-process variants
/// such as `(rdbg:remote)` or `(rdbg@worker)`.
pub const DEFAULT_PROMPT_PATTERN: &str = r"^\(rdbg[:@]?[^)]*\)";

/// The event kind carried by a debugger stop notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopEvent {
    Line,
    Call,
    Return,
    BCall,
    BReturn,
    CReturn,
}

impl StopEvent {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "line" => Some(Self::Line),
            "call" => Some(Self::Call),
            "return" => Some(Self::Return),
            "b_call" => Some(Self::BCall),
            "b_return" => Some(Self::BReturn),
            "c_return" => Some(Self::CReturn),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Line => "line",
            Self::Call => "call",
            Self::Return => "return",
            Self::BCall => "b_call",
            Self::BReturn => "b_return",
            Self::CReturn => "c_return",
        }
    }
}

impl std::fmt::Display for StopEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of everything the tracker has learned from the wire.
#[derive(Debug, Clone, Default)]
pub struct TrackerState {
    pub pid: Option<i32>,
    pub paused: bool,
    pub last_stop_event: Option<StopEvent>,
    /// Breakpoint number of the most recent stop, for one-shot cleanup.
    pub last_stop_bp: Option<u32>,
    /// Current binding is a signal-trap frame.
    pub trap_context: bool,
    /// A `Catch` stop fired; `$!` holds the pending exception.
    pub pending_exception: bool,
    pub process_exited: bool,
    pub closed: bool,
}

/// What a single observed line meant, for the reader's bookkeeping.
#[derive(Debug, Clone, Copy, Default)]
pub struct Observation {
    /// The line is the prompt sentinel.
    pub prompt: bool,
    /// The line is a stop notification (`Stop by #N …`).
    pub stopped: bool,
}

#[derive(Debug)]
struct Patterns {
    prompt: Regex,
    pid: Regex,
    stop: Regex,
    catch: Regex,
    trap: Regex,
}

#[derive(Debug)]
pub struct StateTracker {
    state: Mutex<TrackerState>,
    patterns: Patterns,
    /// Bumped on prompt, close, and process exit — the three conditions a
    /// stop-waiter cares about.
    event_tx: watch::Sender<u64>,
}

impl StateTracker {
    pub fn new(prompt_pattern: &str) -> Result<Self> {
        let prompt = Regex::new(prompt_pattern)
            .map_err(|e| BridgeError::protocol(format!("invalid prompt pattern: {e}")))?;
        let patterns = Patterns {
            prompt,
            pid: compiled(r"\(ruby:(\d+)\)"),
            stop: compiled(r"^Stop by #(\d+)\s+BP - (\S+).*\((line|call|return|b_call|b_return|c_return)\)"),
            catch: compiled(r#"^Stop by #(\d+)\s+BP - Catch\s+"([^"]+)""#),
            trap: compiled(r"signal:SIG\w+|trap_handler"),
        };
        let (event_tx, _) = watch::channel(0);
        Ok(Self { state: Mutex::new(TrackerState::default()), patterns, event_tx })
    }

    /// Interpret one inbound line, updating state. Order matters: exit and
    /// close checks run before the stop patterns so a final `Bye` is not
    /// mistaken for output.
    pub fn observe(&self, line: &str) -> Observation {
        let mut obs = Observation::default();
        let mut bump = false;
        {
            let mut state = self.lock();

            if is_exit_line(line) {
                state.process_exited = true;
                state.paused = false;
                bump = true;
            } else if line == "Bye." || line == "Bye" {
                state.closed = true;
                bump = true;
            } else if let Some(caps) = self.patterns.catch.captures(line) {
                obs.stopped = true;
                state.paused = true;
                state.pending_exception = true;
                state.last_stop_bp = caps.get(1).and_then(|m| m.as_str().parse().ok());
                state.last_stop_event = None;
            } else if let Some(caps) = self.patterns.stop.captures(line) {
                obs.stopped = true;
                state.paused = true;
                state.last_stop_bp = caps.get(1).and_then(|m| m.as_str().parse().ok());
                state.last_stop_event =
                    caps.get(3).and_then(|m| StopEvent::parse(m.as_str()));
            } else if self.patterns.prompt.is_match(line) {
                // The debugger only prompts while the target is stopped.
                obs.prompt = true;
                state.paused = true;
                bump = true;
            } else {
                if let Some(caps) = self.patterns.pid.captures(line) {
                    if state.pid.is_none() {
                        state.pid = caps.get(1).and_then(|m| m.as_str().parse().ok());
                    }
                }
                if self.patterns.trap.is_match(line) {
                    state.trap_context = true;
                }
            }
        }
        if bump {
            self.bump();
        }
        obs
    }

    pub fn snapshot(&self) -> TrackerState {
        self.lock().clone()
    }

    pub fn pid(&self) -> Option<i32> {
        self.snapshot().pid
    }

    pub fn is_paused(&self) -> bool {
        self.snapshot().paused
    }

    pub fn is_closed(&self) -> bool {
        let s = self.snapshot();
        s.closed || s.process_exited
    }

    /// Mark the target running (called when a resume command is written).
    pub fn set_running(&self) {
        self.with_state(|s| s.paused = false);
    }

    pub fn set_pid(&self, pid: i32) {
        self.with_state(|s| s.pid = Some(pid));
    }

    pub fn set_trap_context(&self, value: bool) {
        self.with_state(|s| s.trap_context = value);
    }

    pub fn clear_pending_exception(&self) {
        self.with_state(|s| s.pending_exception = false);
    }

    /// Latch the closed flag (EOF on the socket) and wake waiters.
    pub fn mark_closed(&self) {
        self.with_state(|s| s.closed = true);
        self.bump();
    }

    /// Subscribe to pause/exit/close transitions.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.event_tx.subscribe()
    }

    fn with_state(&self, f: impl FnOnce(&mut TrackerState)) {
        let mut state = self.lock();
        f(&mut state);
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump(&self) {
        self.event_tx.send_modify(|seq| *seq += 1);
    }
}

// Patterns are compile-time constants.
#[allow(clippy::unwrap_used)]
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Terminal lines the debugger emits when the target process finishes.
fn is_exit_line(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed == "exited" || trimmed == "exit" || (trimmed.starts_with("DEBUGGER:") && trimmed.contains("exited"))
}

#[cfg(test)]
#[path = "state_tests.rs"]
mod tests;
