// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-level framing over TCP or Unix-domain sockets.
//!
//! A [`Wire`] is split at open into a reader half and a writer half so the
//! channel's dedicated reader task can own the inbound stream while
//! operations write commands concurrently. Both halves share a latched
//! closed flag: once the peer goes away every later operation fails with
//! the same connection error.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use bytes::BytesMut;
use regex::Regex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};
use tokio::sync::Mutex;
use tracing::trace;

use crate::error::{BridgeError, Result};

/// Deadline for establishing the socket connection itself.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ANSI CSI sequences: `ESC '[' any* letter`.
static ANSI_CSI: LazyLock<Regex> = LazyLock::new(|| compiled("\x1b\\[[^A-Za-z]*[A-Za-z]"));

// The pattern is a compile-time constant.
#[allow(clippy::unwrap_used)]
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// A debugger endpoint address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Tcp { host: String, port: u16 },
    Unix { path: PathBuf },
}

impl Target {
    /// TCP targets are treated as remote: the target process may live in a
    /// container, so signals and direct file access don't reach it.
    pub fn is_remote(&self) -> bool {
        matches!(self, Self::Tcp { .. })
    }

    pub fn port(&self) -> Option<u16> {
        match self {
            Self::Tcp { port, .. } => Some(*port),
            Self::Unix { .. } => None,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp { host, port } => write!(f, "{host}:{port}"),
            Self::Unix { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Remove ANSI CSI escape sequences from a line.
pub fn strip_ansi(line: &str) -> String {
    ANSI_CSI.replace_all(line, "").into_owned()
}

/// Inbound half: buffered line reads with optional deadlines.
pub struct WireReader {
    inner: Box<dyn AsyncRead + Send + Unpin>,
    buf: BytesMut,
    closed: Arc<AtomicBool>,
}

/// Outbound half: whole-command line writes.
pub struct WireWriter {
    inner: Mutex<Box<dyn AsyncWrite + Send + Unpin>>,
    closed: Arc<AtomicBool>,
}

impl std::fmt::Debug for WireWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WireWriter").finish_non_exhaustive()
    }
}

/// Open a connection to the debugger endpoint and split it.
pub async fn open(target: &Target) -> Result<(WireReader, WireWriter)> {
    match target {
        Target::Tcp { host, port } => {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), *port)))
                .await
                .map_err(|_| BridgeError::timeout(format!("connect to {target}"), CONNECT_TIMEOUT))?
                .map_err(|e| BridgeError::connection(format!("connect to {target}: {e}")))?;
            let (r, w) = stream.into_split();
            Ok(pair(r, w))
        }
        Target::Unix { path } => {
            let stream = tokio::time::timeout(CONNECT_TIMEOUT, UnixStream::connect(path))
                .await
                .map_err(|_| BridgeError::timeout(format!("connect to {target}"), CONNECT_TIMEOUT))?
                .map_err(|e| BridgeError::connection(format!("connect to {target}: {e}")))?;
            let (r, w) = stream.into_split();
            Ok(pair(r, w))
        }
    }
}

/// Wrap arbitrary stream halves (used by tests with `tokio::io::duplex`).
pub fn pair(
    read: impl AsyncRead + Send + Unpin + 'static,
    write: impl AsyncWrite + Send + Unpin + 'static,
) -> (WireReader, WireWriter) {
    let closed = Arc::new(AtomicBool::new(false));
    (
        WireReader { inner: Box::new(read), buf: BytesMut::with_capacity(8192), closed: Arc::clone(&closed) },
        WireWriter { inner: Mutex::new(Box::new(write)), closed },
    )
}

fn closed_error() -> BridgeError {
    BridgeError::connection("debugger connection closed")
}

impl WireReader {
    /// Read one line, stripped of the trailing newline and of ANSI CSI
    /// sequences. `deadline = None` waits until data or EOF.
    pub async fn read_line(&mut self, deadline: Option<Duration>) -> Result<String> {
        match deadline {
            Some(d) => match tokio::time::timeout(d, self.read_line_inner()).await {
                Ok(result) => result,
                Err(_) => Err(BridgeError::timeout("read line", d)),
            },
            None => self.read_line_inner().await,
        }
    }

    async fn read_line_inner(&mut self) -> Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line = self.buf.split_to(pos + 1);
                line.truncate(pos);
                if line.last() == Some(&b'\r') {
                    line.truncate(line.len() - 1);
                }
                let text = String::from_utf8_lossy(&line).into_owned();
                let text = strip_ansi(&text);
                trace!(line = %text, "wire read");
                return Ok(text);
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(closed_error());
            }
            let n = self.inner.read_buf(&mut self.buf).await?;
            if n == 0 {
                self.closed.store(true, Ordering::Release);
                // Surface a final unterminated fragment before reporting EOF.
                if !self.buf.is_empty() {
                    let line = self.buf.split();
                    let text = strip_ansi(&String::from_utf8_lossy(&line));
                    return Ok(text);
                }
                return Err(closed_error());
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl WireWriter {
    /// Write one command as a single `\n`-terminated write. Commands are
    /// never split across writes.
    pub async fn write_line(&self, command: &str) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(closed_error());
        }
        let mut frame = String::with_capacity(command.len() + 1);
        frame.push_str(command);
        frame.push('\n');
        let mut inner = self.inner.lock().await;
        trace!(command, "wire write");
        if let Err(e) = inner.write_all(frame.as_bytes()).await {
            self.closed.store(true, Ordering::Release);
            return Err(BridgeError::connection(format!("write failed: {e}")));
        }
        inner.flush().await.map_err(|e| {
            self.closed.store(true, Ordering::Release);
            BridgeError::connection(format!("flush failed: {e}"))
        })
    }

    /// Latch the closed flag and drop the peer on next use. Idempotent.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
