// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::time::Duration;

/// Errors produced by the debug-session coordination layer.
///
/// Four kinds, matching the operational boundaries of the bridge:
/// transport failures, session-state failures, elapsed deadlines, and
/// unparseable debugger responses. The first two carry any diagnostic
/// text the peer emitted before the terminal state (`final_output`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    /// Transport failure: connect refused, broken pipe, socket closed
    /// mid-operation.
    Connection { message: String, final_output: Option<String> },
    /// The session was not found, was reaped, or the target process is
    /// not in the state the operation requires.
    Session { message: String, final_output: Option<String> },
    /// A blocking operation's deadline elapsed without the expected event.
    Timeout { operation: String, after: Duration },
    /// A response could not be parsed into the expected shape.
    Protocol { message: String },
}

pub type Result<T> = std::result::Result<T, BridgeError>;

impl BridgeError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), final_output: None }
    }

    pub fn connection_with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        Self::Connection {
            message: message.into(),
            final_output: (!output.is_empty()).then_some(output),
        }
    }

    pub fn session(message: impl Into<String>) -> Self {
        Self::Session { message: message.into(), final_output: None }
    }

    pub fn session_with_output(message: impl Into<String>, output: impl Into<String>) -> Self {
        let output = output.into();
        Self::Session {
            message: message.into(),
            final_output: (!output.is_empty()).then_some(output),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout { operation: operation.into(), after }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol { message: message.into() }
    }

    /// Stable lowercase tag for logs and tool responses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connection { .. } => "connection",
            Self::Session { .. } => "session",
            Self::Timeout { .. } => "timeout",
            Self::Protocol { .. } => "protocol",
        }
    }

    /// Diagnostic text the peer sent before the terminal state, if any.
    pub fn final_output(&self) -> Option<&str> {
        match self {
            Self::Connection { final_output, .. } | Self::Session { final_output, .. } => {
                final_output.as_deref()
            }
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    pub fn is_connection(&self) -> bool {
        matches!(self, Self::Connection { .. })
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection { message, .. } => write!(f, "connection error: {message}"),
            Self::Session { message, .. } => write!(f, "{message}"),
            Self::Timeout { operation, after } => {
                write!(f, "{operation} timed out after {:.1}s", after.as_secs_f64())
            }
            Self::Protocol { message } => write!(f, "protocol error: {message}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self {
        Self::connection(e.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
