// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Breakpoint specs, live-list parsing, and the replay ledger.
//!
//! A spec is the agent-level string the bridge replays to recreate a
//! breakpoint after a reconnect: `break FILE:LINE`, `break CLASS#METHOD`,
//! or `catch CLASS`, with an optional ` if: EXPR` condition clause.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{BridgeError, Result};
use crate::state::StopEvent;

static LINE_TARGET: LazyLock<Regex> = LazyLock::new(|| compiled(r"^(.+):(\d+)$"));
static METHOD_TARGET: LazyLock<Regex> =
    LazyLock::new(|| compiled(r"^([A-Z][A-Za-z0-9_:]*)([#.])([a-zA-Z_][a-zA-Z0-9_]*[?!=]?)$"));
static SET_RESPONSE: LazyLock<Regex> = LazyLock::new(|| compiled(r"^#(\d+)\s+BP - "));
static LIST_ENTRY: LazyLock<Regex> = LazyLock::new(|| compiled(r"^\s*#(\d+)\s+BP - (.+)$"));

// Patterns are compile-time constants.
#[allow(clippy::unwrap_used)]
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Where a breakpoint attaches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakpointTarget {
    Line { file: String, line: u32 },
    /// `Class#method` (instance) or `Class.method` (singleton).
    Method { receiver: String, separator: char, method: String },
    Catch { exception: String },
}

/// A parsed breakpoint request with its optional condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSpec {
    pub target: BreakpointTarget,
    pub condition: Option<String>,
}

impl BreakpointSpec {
    /// Parse an agent-supplied location string. Accepted forms:
    /// `file.rb:15`, `Class#method`, `Class.method`, `catch SomeError`.
    pub fn parse(location: &str, condition: Option<&str>) -> Result<Self> {
        let location = location.trim();
        if location.contains('\n') || condition.is_some_and(|c| c.contains('\n')) {
            return Err(BridgeError::protocol("breakpoint specs must be single-line"));
        }
        let condition = condition.map(str::trim).filter(|c| !c.is_empty()).map(str::to_owned);

        if let Some(exception) = location.strip_prefix("catch ") {
            let exception = exception.trim();
            if exception.is_empty() {
                return Err(BridgeError::protocol("catch breakpoint needs an exception class"));
            }
            return Ok(Self { target: BreakpointTarget::Catch { exception: exception.to_owned() }, condition });
        }
        let location = location.strip_prefix("break ").unwrap_or(location).trim();

        if let Some(caps) = METHOD_TARGET.captures(location) {
            let separator = if &caps[2] == "#" { '#' } else { '.' };
            return Ok(Self {
                target: BreakpointTarget::Method {
                    receiver: caps[1].to_owned(),
                    separator,
                    method: caps[3].to_owned(),
                },
                condition,
            });
        }

        if let Some(caps) = LINE_TARGET.captures(location) {
            let line: u32 = caps[2]
                .parse()
                .map_err(|_| BridgeError::protocol(format!("invalid line number in '{location}'")))?;
            return Ok(Self {
                target: BreakpointTarget::Line { file: caps[1].to_owned(), line },
                condition,
            });
        }

        Err(BridgeError::protocol(format!(
            "unrecognized breakpoint location '{location}' (expected FILE:LINE, Class#method, Class.method, or catch ExceptionClass)"
        )))
    }

    /// Parse a ledger replay string (`break FILE:LINE if: EXPR`, `catch X`)
    /// back into a spec.
    pub fn parse_replay(command: &str) -> Result<Self> {
        match command.split_once(" if: ") {
            Some((location, condition)) => Self::parse(location, Some(condition)),
            None => Self::parse(command, None),
        }
    }

    /// The wire command that creates this breakpoint, which doubles as the
    /// replay string recorded in the ledger.
    pub fn to_command(&self) -> String {
        let base = match &self.target {
            BreakpointTarget::Line { file, line } => format!("break {file}:{line}"),
            BreakpointTarget::Method { receiver, separator, method } => {
                format!("break {receiver}{separator}{method}")
            }
            BreakpointTarget::Catch { exception } => format!("catch {exception}"),
        };
        match &self.condition {
            Some(cond) => format!("{base} if: {cond}"),
            None => base,
        }
    }

    /// Stop-event hint the agent can expect when this breakpoint fires.
    pub fn stop_event_hint(&self) -> StopEvent {
        match &self.target {
            BreakpointTarget::Line { .. } => StopEvent::Line,
            BreakpointTarget::Method { .. } => StopEvent::Call,
            BreakpointTarget::Catch { .. } => StopEvent::Line,
        }
    }
}

/// One entry of `info breakpoints` output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveBreakpoint {
    pub number: u32,
    pub description: String,
}

/// Extract the assigned breakpoint number from a `break`/`catch` response.
pub fn parse_set_response(response: &str) -> Option<u32> {
    response
        .lines()
        .find_map(|line| SET_RESPONSE.captures(line.trim()))
        .and_then(|caps| caps[1].parse().ok())
}

/// Parse `info breakpoints` output into live entries.
pub fn parse_breakpoint_list(response: &str) -> Vec<LiveBreakpoint> {
    response
        .lines()
        .filter_map(|line| LIST_ENTRY.captures(line))
        .filter_map(|caps| {
            Some(LiveBreakpoint { number: caps[1].parse().ok()?, description: caps[2].trim().to_owned() })
        })
        .collect()
}

/// Registry-owned bag of replay strings, deduplicated on insertion.
#[derive(Debug, Default)]
pub struct BreakpointLedger {
    specs: Vec<String>,
}

impl BreakpointLedger {
    pub fn record(&mut self, spec: impl Into<String>) {
        let spec = spec.into();
        if !self.specs.contains(&spec) {
            self.specs.push(spec);
        }
    }

    /// Remove every spec containing `pattern` as a substring. Returns how
    /// many were removed.
    pub fn remove_matching(&mut self, pattern: &str) -> usize {
        let before = self.specs.len();
        self.specs.retain(|s| !s.contains(pattern));
        before - self.specs.len()
    }

    pub fn clear(&mut self) {
        self.specs.clear();
    }

    pub fn specs(&self) -> Vec<String> {
        self.specs.clone()
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
#[path = "breakpoint_tests.rs"]
mod tests;
