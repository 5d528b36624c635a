// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP trigger against the debugged application.
//!
//! The agent sets a breakpoint, then asks the bridge to issue a request at
//! the target's listen port. The request runs on a background task while the
//! session resumes; the continue-wait is interrupted either by the
//! breakpoint firing or by the response completing, whichever comes first.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::channel::InterruptCheck;
use crate::error::{BridgeError, Result};

/// Deadline for the triggered request itself.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Handle describing an in-flight request the agent issued against the
/// debugged app. Owned by the session; the done flag feeds the
/// continue-wait's interrupt check.
#[derive(Debug, Clone)]
pub struct PendingHttp {
    pub method: String,
    pub url: String,
    done: Arc<AtomicBool>,
    outcome: Arc<Mutex<Option<String>>>,
}

impl PendingHttp {
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Interrupt-check predicate for `continue_and_wait`.
    pub fn interrupt_check(&self) -> InterruptCheck {
        let done = Arc::clone(&self.done);
        Arc::new(move || done.load(Ordering::Acquire))
    }

    /// The response summary or error text, once done.
    pub fn outcome(&self) -> Option<String> {
        self.outcome.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn finish(&self, text: String) {
        *self.outcome.lock().unwrap_or_else(PoisonError::into_inner) = Some(text);
        self.done.store(true, Ordering::Release);
    }
}

/// Validate and normalize the method name.
pub fn parse_method(method: &str) -> Result<reqwest::Method> {
    method
        .to_uppercase()
        .parse()
        .map_err(|_| BridgeError::protocol(format!("invalid HTTP method '{method}'")))
}

/// Start a request on a background task and return its pending handle.
pub fn start_request(method: reqwest::Method, url: String, body: Option<String>) -> PendingHttp {
    let pending = PendingHttp {
        method: method.to_string(),
        url: url.clone(),
        done: Arc::new(AtomicBool::new(false)),
        outcome: Arc::new(Mutex::new(None)),
    };

    let handle = pending.clone();
    tokio::spawn(async move {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_default();
        let mut req = client.request(method, &url);
        if let Some(body) = body {
            req = req.header("content-type", "application/json").body(body);
        }
        let text = match req.send().await {
            Ok(resp) => {
                let status = resp.status();
                let body = resp.text().await.unwrap_or_default();
                let body = truncate(&body, 4096);
                format!("{status}\n{body}")
            }
            Err(e) => {
                debug!(url, err = %e, "triggered request failed");
                format!("request failed: {e}")
            }
        };
        handle.finish(text);
    });

    pending
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_owned();
    }
    let mut cut = max;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}… ({} bytes total)", &s[..cut], s.len())
}

#[cfg(test)]
#[path = "trigger_tests.rs"]
mod tests;
