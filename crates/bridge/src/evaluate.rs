// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Debugger-side glue for code evaluation.
//!
//! User code is executed in the stopped binding through a synthetic wrapper
//! that swaps `$stdout` for a capturing sink, runs the code inside a rescue
//! that stashes any exception into a shared variable, restores `$stdout`,
//! and pretty-prints the return value. The code itself travels as a base64
//! literal decoded on the debugger side (`unpack1("m0")`, so no `require`
//! is needed); this is part of the wire contract and sidesteps every
//! quoting and non-ASCII hazard.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Follow-up query for the captured stdout of the last evaluation.
pub const CAPTURED_QUERY: &str = "pp $__bridge_captured";

/// Follow-up query for the stashed exception of the last evaluation.
pub const ERROR_QUERY: &str =
    r##"pp($__bridge_error ? "#{$__bridge_error.class}: #{$__bridge_error.message}" : nil)"##;

/// Structured result of a three-command evaluation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    pub value: String,
    pub captured_stdout: String,
    pub error: Option<String>,
}

/// Build the single-line wrapper command for `code`.
pub fn eval_command(code: &str) -> String {
    let payload = STANDARD.encode(code);
    format!(
        "begin; $__bridge_prev_out = $stdout; $stdout = StringIO.new; \
         __bridge_result = eval(\"{payload}\".unpack1(\"m0\")); $__bridge_error = nil; \
         rescue Exception => __bridge_e; $__bridge_error = __bridge_e; __bridge_result = nil; \
         ensure; $__bridge_captured = $stdout.string; $stdout = $__bridge_prev_out; end; \
         pp __bridge_result"
    )
}

/// Command that restores the previous SIGINT handler installed by
/// [`force_quit_trap_command`].
pub fn restore_trap_command() -> String {
    r#"Signal.trap("INT", $__bridge_prev_int || "DEFAULT"); nil"#.to_owned()
}

/// Command that installs a force-quit SIGINT handler on the remote so a
/// runaway target can be killed from the terminal.
pub fn force_quit_trap_command() -> String {
    r#"$__bridge_prev_int = Signal.trap("INT") { Kernel.exit!(1) }; nil"#.to_owned()
}

/// Compile-only probe for a breakpoint condition: reports a syntax error
/// without executing anything.
pub fn condition_probe_command(condition: &str) -> String {
    let payload = STANDARD.encode(condition);
    format!(
        "begin; RubyVM::InstructionSequence.compile(\"{payload}\".unpack1(\"m0\")); pp \"ok\"; \
         rescue SyntaxError => __bridge_e; pp \"syntax error: #{{__bridge_e.message}}\"; end"
    )
}

/// Interpret the captured-stdout query response. `pp` renders the empty
/// string as `""` and nil as `nil`.
pub fn parse_captured(response: &str) -> String {
    let trimmed = response.trim();
    if trimmed == "nil" || trimmed == "\"\"" {
        return String::new();
    }
    // pp renders the capture as an escaped Ruby string literal.
    unquote(trimmed)
}

/// Interpret the error query response: `nil` means no exception.
pub fn parse_error(response: &str) -> Option<String> {
    let trimmed = response.trim();
    if trimmed.is_empty() || trimmed == "nil" {
        return None;
    }
    Some(unquote(trimmed))
}

/// Assemble the user-facing result. When the captured stdout is exactly the
/// pretty-printed value (e.g. the user code itself ended in `pp`), the
/// capture is dropped so the value appears once.
pub fn format_result(eval: &Evaluation) -> String {
    let mut out = String::new();
    match &eval.error {
        Some(err) => {
            out.push_str("raised: ");
            out.push_str(err);
        }
        None => {
            out.push_str("=> ");
            out.push_str(eval.value.trim());
        }
    }
    let captured = eval.captured_stdout.trim();
    if !captured.is_empty() && captured != eval.value.trim() {
        out.push_str("\n\n--- stdout ---\n");
        out.push_str(captured);
    }
    out
}

/// Strip one level of Ruby string-literal quoting and unescape the common
/// sequences `pp` produces.
fn unquote(s: &str) -> String {
    let Some(inner) = s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) else {
        return s.to_owned();
    };
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('"') => out.push('"'),
            Some('\\') => out.push('\\'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

#[cfg(test)]
#[path = "evaluate_tests.rs"]
mod tests;
