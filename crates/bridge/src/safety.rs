// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Code-safety pattern matcher for agent-submitted evaluation payloads.
//!
//! Matching is advisory: flagged code is refused with a category-tagged
//! warning until the agent acknowledges the category for the session, then
//! it runs unchanged.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Warning category attached to a safety match or session condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCategory {
    /// Bulk-destructive database operations.
    DestructiveDb,
    /// Process control: exits, forks, shell-outs.
    ProcessControl,
    /// Filesystem writes and deletions.
    FileMutation,
    /// The current binding is a signal-trap frame; thread creation, DB
    /// access, and autoloading are illegal there.
    TrapContext,
}

impl WarningCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DestructiveDb => "destructive_db",
            Self::ProcessControl => "process_control",
            Self::FileMutation => "file_mutation",
            Self::TrapContext => "trap_context",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "destructive_db" => Some(Self::DestructiveDb),
            "process_control" => Some(Self::ProcessControl),
            "file_mutation" => Some(Self::FileMutation),
            "trap_context" => Some(Self::TrapContext),
            _ => None,
        }
    }
}

impl std::fmt::Display for WarningCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One pattern match in a submitted payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafetyWarning {
    pub category: WarningCategory,
    pub matched: String,
}

static RULES: LazyLock<Vec<(WarningCategory, Regex)>> = LazyLock::new(|| {
    vec![
        (WarningCategory::DestructiveDb, compiled(r"\b(?:delete_all|destroy_all|drop_table|truncate)\b")),
        (WarningCategory::ProcessControl, compiled(r"(?:\bexit!|\bexec\b|\bfork\b|\bsystem\s*\(|\bspawn\b|`[^`]*`)")),
        (WarningCategory::FileMutation, compiled(r"(?:File\.(?:delete|unlink|write|rename)|FileUtils\.(?:rm|remove|mv)\w*)")),
    ]
});

// Patterns are compile-time constants.
#[allow(clippy::unwrap_used)]
fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

/// Scan an evaluation payload for destructive patterns. Each category is
/// reported at most once, with its first match as evidence.
pub fn scan(code: &str) -> Vec<SafetyWarning> {
    let mut warnings = Vec::new();
    for (category, pattern) in RULES.iter() {
        if let Some(m) = pattern.find(code) {
            warnings.push(SafetyWarning { category: *category, matched: m.as_str().to_owned() });
        }
    }
    warnings
}

/// User-facing refusal text for unacknowledged warnings.
pub fn describe(warnings: &[SafetyWarning]) -> String {
    let mut out = String::from("Refusing to evaluate: the code matches destructive patterns.\n");
    for w in warnings {
        out.push_str(&format!("  - [{}] matched `{}`\n", w.category, w.matched));
    }
    out.push_str("Re-run with acknowledge=true to run it anyway (acknowledgement is remembered for this session).");
    out
}

#[cfg(test)]
#[path = "safety_tests.rs"]
mod tests;
