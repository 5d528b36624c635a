// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tool handlers: the MCP-facing surface over the [`SessionRegistry`].
//!
//! Every handler resolves its session through the registry, runs typed
//! operations, and renders a plain-text result. Errors never cross the RPC
//! boundary; they are embedded as `Error: MESSAGE` prefixes.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use crate::breakpoint::BreakpointSpec;
use crate::channel::CONTINUE_TIMEOUT;
use crate::discovery;
use crate::error::BridgeError;
use crate::evaluate;
use crate::pause::Outcome;
use crate::registry::{ConnectParams, SessionRegistry};
use crate::safety::{self, WarningCategory};
use crate::spawn;
use crate::trigger;
use crate::wire::Target;

/// Responses are capped so a stray `pp` of a huge object cannot flood the
/// agent's context.
const MAX_RESPONSE: usize = 50_000;

/// A tool exposed through `tools/list`.
pub struct ToolDef {
    pub name: &'static str,
    pub description: &'static str,
    pub input_schema: Value,
}

/// The exhaustive tool table.
pub fn definitions() -> Vec<ToolDef> {
    fn schema(properties: Value, required: &[&str]) -> Value {
        json!({ "type": "object", "properties": properties, "required": required })
    }
    fn session_id() -> Value {
        json!({ "type": "string", "description": "Session id; optional when exactly one session is active" })
    }

    vec![
        ToolDef {
            name: "list_debug_sessions",
            description: "List active debug sessions and discoverable attach points (rdbg sockets, docker containers, local processes).",
            input_schema: schema(json!({}), &[]),
        },
        ToolDef {
            name: "connect",
            description: "Attach to an rdbg endpoint via Unix socket path or TCP host/port.",
            input_schema: schema(
                json!({
                    "socket_path": { "type": "string", "description": "Absolute path of the rdbg Unix socket" },
                    "host": { "type": "string", "description": "TCP host (default 127.0.0.1)" },
                    "port": { "type": "integer", "description": "TCP port" },
                    "session_id": { "type": "string", "description": "Explicit id for the new session" },
                    "pre_cleanup_pid": { "type": "integer", "description": "Disconnect any existing session with this target PID first" },
                    "pre_cleanup_port": { "type": "integer", "description": "Disconnect any existing session on this TCP port first" },
                    "clear_breakpoints": { "type": "boolean", "description": "Remove breakpoints already set on the target" },
                    "restore_breakpoints": { "type": "boolean", "description": "Replay breakpoints recorded from earlier sessions" },
                    "timeout_secs": { "type": "integer", "description": "Idle timeout override for this session" },
                    "wake_port": { "type": "integer", "description": "App port to knock on if the target is blocked in accept()" },
                    "auto_trap_escape": { "type": "boolean", "description": "Escape a signal-trap context automatically after connect" }
                }),
                &[],
            ),
        },
        ToolDef {
            name: "list_paused_sessions",
            description: "List only the sessions currently stopped at a breakpoint or pause, with stop-event detail.",
            input_schema: schema(json!({}), &[]),
        },
        ToolDef {
            name: "evaluate_code",
            description: "Evaluate Ruby code in the paused frame. Returns the value plus captured stdout; exceptions are reported, not raised.",
            input_schema: schema(
                json!({
                    "code": { "type": "string", "description": "Ruby code to evaluate" },
                    "session_id": session_id(),
                    "acknowledge": { "type": "boolean", "description": "Acknowledge destructive-pattern warnings for this session and run anyway" }
                }),
                &["code"],
            ),
        },
        ToolDef {
            name: "inspect_object",
            description: "Structured inspection of an expression: value, class, instance variables (and class variables for modules).",
            input_schema: schema(
                json!({
                    "expression": { "type": "string" },
                    "session_id": session_id()
                }),
                &["expression"],
            ),
        },
        ToolDef {
            name: "get_context",
            description: "Backtrace, source window, and local variables at the current stop.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "get_source",
            description: "Source for a method (Class#name or Class.name) or the current stop location.",
            input_schema: schema(
                json!({
                    "target": { "type": "string", "description": "Method reference; empty for the current location" },
                    "session_id": session_id()
                }),
                &[],
            ),
        },
        ToolDef {
            name: "read_file",
            description: "Read a file as the debugged process sees it (works for files inside the target's container).",
            input_schema: schema(
                json!({
                    "path": { "type": "string" },
                    "start_line": { "type": "integer" },
                    "end_line": { "type": "integer" },
                    "session_id": session_id()
                }),
                &["path"],
            ),
        },
        ToolDef {
            name: "list_files",
            description: "List a directory as the debugged process sees it, with an optional glob.",
            input_schema: schema(
                json!({
                    "dir": { "type": "string" },
                    "glob": { "type": "string", "description": "e.g. *.rb" },
                    "session_id": session_id()
                }),
                &["dir"],
            ),
        },
        ToolDef {
            name: "set_breakpoint",
            description: "Set a breakpoint: FILE:LINE, Class#method, Class.method, or `catch ExceptionClass`, with an optional condition.",
            input_schema: schema(
                json!({
                    "location": { "type": "string" },
                    "condition": { "type": "string", "description": "Ruby expression; the breakpoint fires when it is truthy" },
                    "one_shot": { "type": "boolean", "description": "Delete automatically after the first hit" },
                    "session_id": session_id()
                }),
                &["location"],
            ),
        },
        ToolDef {
            name: "remove_breakpoint",
            description: "Remove a breakpoint by number or by matching its location.",
            input_schema: schema(
                json!({
                    "selector": { "type": "string", "description": "Breakpoint number, FILE:LINE, method, or exception class" },
                    "session_id": session_id()
                }),
                &["selector"],
            ),
        },
        ToolDef {
            name: "continue_execution",
            description: "Resume the target and wait for the next stop or exit.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "step",
            description: "Step into the next call.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "next",
            description: "Step over the current line.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "finish",
            description: "Run until the current frame returns.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "run_debug_command",
            description: "Run a raw rdbg command. Commands that would wedge the session (c, quit, pause, …) are routed to their typed tools.",
            input_schema: schema(
                json!({
                    "command": { "type": "string" },
                    "session_id": session_id()
                }),
                &["command"],
            ),
        },
        ToolDef {
            name: "disconnect",
            description: "Detach from the target: delete breakpoints, restore handlers, resume, close. `force` skips cleanup.",
            input_schema: schema(
                json!({
                    "session_id": session_id(),
                    "force": { "type": "boolean" }
                }),
                &[],
            ),
        },
        ToolDef {
            name: "run_script",
            description: "Launch a Ruby script under rdbg and attach to it.",
            input_schema: schema(
                json!({
                    "file": { "type": "string" },
                    "args": { "type": "array", "items": { "type": "string" } }
                }),
                &["file"],
            ),
        },
        ToolDef {
            name: "trigger_request",
            description: "Issue an HTTP request against the debugged app and resume until a breakpoint fires or the response completes.",
            input_schema: schema(
                json!({
                    "method": { "type": "string", "description": "GET, POST, …" },
                    "path": { "type": "string", "description": "Request path, e.g. /users/1" },
                    "port": { "type": "integer", "description": "App port; defaults to the detected listen port" },
                    "body": { "type": "string", "description": "JSON request body" },
                    "session_id": session_id()
                }),
                &["path"],
            ),
        },
        ToolDef {
            name: "rails_routes",
            description: "List the Rails application's routes.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
        ToolDef {
            name: "rails_model",
            description: "Columns and associations of an ActiveRecord model.",
            input_schema: schema(
                json!({
                    "name": { "type": "string", "description": "Model class name, e.g. User" },
                    "session_id": session_id()
                }),
                &["name"],
            ),
        },
        ToolDef {
            name: "rails_info",
            description: "Rails/Ruby versions, environment, root, and database adapter.",
            input_schema: schema(json!({ "session_id": session_id() }), &[]),
        },
    ]
}

/// Run one tool call. The result is always plain text; failures are
/// rendered as `Error: …`.
pub async fn dispatch(registry: &Arc<SessionRegistry>, name: &str, args: &Value) -> String {
    let result = match name {
        "list_debug_sessions" => list_debug_sessions(registry).await,
        "connect" => connect(registry, args).await,
        "list_paused_sessions" => list_paused_sessions(registry).await,
        "evaluate_code" => evaluate_code(registry, args).await,
        "inspect_object" => inspect_object(registry, args).await,
        "get_context" => get_context(registry, args).await,
        "get_source" => get_source(registry, args).await,
        "read_file" => read_file(registry, args).await,
        "list_files" => list_files(registry, args).await,
        "set_breakpoint" => set_breakpoint(registry, args).await,
        "remove_breakpoint" => remove_breakpoint(registry, args).await,
        "continue_execution" => step_like(registry, args, StepKind::Continue).await,
        "step" => step_like(registry, args, StepKind::Into).await,
        "next" => step_like(registry, args, StepKind::Over).await,
        "finish" => step_like(registry, args, StepKind::Finish).await,
        "run_debug_command" => run_debug_command(registry, args).await,
        "disconnect" => disconnect(registry, args).await,
        "run_script" => run_script(registry, args).await,
        "trigger_request" => trigger_request(registry, args).await,
        "rails_routes" => rails_tool(registry, args, RailsTool::Routes).await,
        "rails_model" => rails_tool(registry, args, RailsTool::Model).await,
        "rails_info" => rails_tool(registry, args, RailsTool::Info).await,
        other => Err(BridgeError::protocol(format!("unknown tool '{other}'"))),
    };
    match result {
        Ok(text) => truncate(&text),
        Err(e) => render_error(&e),
    }
}

fn render_error(e: &BridgeError) -> String {
    let mut out = format!("Error: {e}");
    if let Some(final_output) = e.final_output() {
        out.push_str("\n--- last output ---\n");
        out.push_str(final_output);
    }
    out
}

fn truncate(text: &str) -> String {
    if text.len() <= MAX_RESPONSE {
        return text.to_owned();
    }
    let mut cut = MAX_RESPONSE;
    while !text.is_char_boundary(cut) {
        cut -= 1;
    }
    format!("{}\n... (truncated, {} bytes total)", &text[..cut], text.len())
}

type ToolResult = crate::error::Result<String>;

async fn list_debug_sessions(registry: &Arc<SessionRegistry>) -> ToolResult {
    let mut out = String::new();
    let active = registry.active_sessions().await;
    if active.is_empty() {
        out.push_str("No active sessions.\n");
    } else {
        out.push_str("Active sessions:\n");
        for row in &active {
            out.push_str(&format!(
                "  {}  target={} pid={} {} idle={}s\n",
                row.id,
                row.status.target,
                row.status.pid.map_or("?".to_owned(), |p| p.to_string()),
                if row.status.paused { "paused" } else { "running" },
                row.idle.as_secs(),
            ));
        }
    }
    let candidates = discovery::discover_all().await;
    if candidates.is_empty() {
        out.push_str("No attachable debuggees discovered.");
    } else {
        out.push_str("Discovered attach points:\n");
        for c in &candidates {
            out.push_str(&format!("  {}\n", c.describe()));
        }
    }
    Ok(out.trim_end().to_owned())
}

async fn list_paused_sessions(registry: &Arc<SessionRegistry>) -> ToolResult {
    let rows: Vec<String> = registry
        .active_sessions()
        .await
        .into_iter()
        .filter(|row| row.status.paused)
        .map(|row| {
            let mut line = format!(
                "  {}  target={} stop={}",
                row.id,
                row.status.target,
                row.status.stop_event.map_or("pause".to_owned(), |e| e.to_string()),
            );
            if row.status.trap_context {
                line.push_str(" [trap context]");
            }
            if row.status.pending_exception {
                line.push_str(" [pending exception]");
            }
            line
        })
        .collect();
    if rows.is_empty() {
        return Ok("No paused sessions.".to_owned());
    }
    Ok(format!("Paused sessions:\n{}", rows.join("\n")))
}

async fn connect(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let target = match (arg_str(args, "socket_path"), arg_u64(args, "port")) {
        (Some(path), _) => Target::Unix { path: path.into() },
        (None, Some(port)) => Target::Tcp {
            host: arg_str(args, "host").unwrap_or_else(|| "127.0.0.1".to_owned()),
            port: port as u16,
        },
        (None, None) => {
            return Err(BridgeError::protocol("connect needs socket_path or port"));
        }
    };
    let params = ConnectParams {
        session_id: arg_str(args, "session_id"),
        pre_cleanup_pid: arg_i64(args, "pre_cleanup_pid").map(|p| p as i32),
        pre_cleanup_port: arg_u64(args, "pre_cleanup_port").map(|p| p as u16),
        clear_breakpoints: arg_bool(args, "clear_breakpoints").unwrap_or(false),
        restore_breakpoints: arg_bool(args, "restore_breakpoints").unwrap_or(false),
        timeout_secs: arg_u64(args, "timeout_secs"),
        wake_port: arg_u64(args, "wake_port").map(|p| p as u16),
        auto_trap_escape: arg_bool(args, "auto_trap_escape").unwrap_or(true),
    };
    let (id, info) = registry.connect(target, params).await?;
    let status = info.session.status();
    let mut out = format!(
        "Connected to {} as session {id} (pid {}).",
        status.target,
        status.pid.map_or("unknown".to_owned(), |p| p.to_string()),
    );
    if status.paused {
        out.push_str(" The target is paused.");
    } else {
        out.push_str(" The target is running.");
    }
    if status.trap_context {
        out.push_str(
            "\nWARNING: stopped inside a signal trap handler; thread creation, DB access and autoloading are restricted here.",
        );
    }
    Ok(out)
}

async fn evaluate_code(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let code = require_str(args, "code")?;
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let acknowledge = arg_bool(args, "acknowledge").unwrap_or(false);

    let warnings = safety::scan(&code);
    let blocking: Vec<_> =
        warnings.iter().filter(|w| !info.is_acknowledged(w.category)).collect();
    if !blocking.is_empty() {
        if acknowledge {
            for w in &warnings {
                info.acknowledge(w.category);
            }
        } else {
            return Ok(safety::describe(&warnings));
        }
    }

    let eval = info.session.evaluate(&code).await?;
    info.touch();
    let mut out = evaluate::format_result(&eval);
    if info.session.status().trap_context && !info.is_acknowledged(WarningCategory::TrapContext) {
        out.push_str("\nNote: evaluated inside a signal trap handler; results may be restricted.");
    }
    Ok(out)
}

async fn inspect_object(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let expr = require_str(args, "expression")?;
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = info.session.inspect(&expr).await?;
    info.touch();
    Ok(out)
}

async fn get_context(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = info.session.get_context().await?;
    info.touch();
    Ok(out)
}

async fn get_source(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let target = arg_str(args, "target").unwrap_or_default();
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = info.session.get_source(&target).await?;
    info.touch();
    Ok(out)
}

async fn read_file(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let path = require_str(args, "path")?;
    let range = match (arg_u64(args, "start_line"), arg_u64(args, "end_line")) {
        (Some(s), Some(e)) => Some((s as u32, e as u32)),
        (Some(s), None) => Some((s as u32, s as u32 + 50)),
        _ => None,
    };
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = info.session.read_file(&path, range).await?;
    info.touch();
    Ok(out)
}

async fn list_files(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let dir = require_str(args, "dir")?;
    let glob = arg_str(args, "glob");
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let entries = info.session.list_files(&dir, glob.as_deref()).await?;
    info.touch();
    if entries.is_empty() {
        return Ok(format!("No entries in {dir}."));
    }
    Ok(entries.join("\n"))
}

async fn set_breakpoint(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let location = require_str(args, "location")?;
    let condition = arg_str(args, "condition");
    let one_shot = arg_bool(args, "one_shot").unwrap_or(false);
    let spec = BreakpointSpec::parse(&location, condition.as_deref())?;
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;

    let set = info.session.set_breakpoint(&spec, one_shot).await?;
    info.touch();
    if !one_shot && set.number.is_some() {
        registry.record_breakpoint(spec.to_command());
        info.record_owned_breakpoint(spec.to_command());
    }

    let mut out = match set.number {
        Some(n) => format!("Breakpoint #{n} set ({}).", set.stop_event_hint),
        None => "Breakpoint requested; the debugger did not report a number.".to_owned(),
    };
    if !set.response.is_empty() {
        out.push('\n');
        out.push_str(&set.response);
    }
    for w in &set.warnings {
        out.push_str(&format!("\nWARNING: {w}"));
    }
    Ok(out)
}

async fn remove_breakpoint(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let selector = require_str(args, "selector")?;
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let removed = info.session.remove_breakpoint(&selector).await?;
    info.touch();

    registry.remove_breakpoint_specs_matching(&selector);
    info.remove_owned_breakpoints_matching(&selector);
    if let Some(token) = location_token(&removed.description) {
        registry.remove_breakpoint_specs_matching(&token);
        info.remove_owned_breakpoints_matching(&token);
    }
    Ok(format!("Removed breakpoint #{} ({}).", removed.number, removed.description))
}

enum StepKind {
    Continue,
    Into,
    Over,
    Finish,
}

async fn step_like(registry: &Arc<SessionRegistry>, args: &Value, kind: StepKind) -> ToolResult {
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let outcome = match kind {
        StepKind::Continue => info.session.continue_execution().await?,
        StepKind::Into => info.session.step().await?,
        StepKind::Over => info.session.next_line().await?,
        StepKind::Finish => info.session.finish().await?,
    };
    info.touch();
    Ok(render_outcome(&outcome))
}

fn render_outcome(outcome: &Outcome) -> String {
    match outcome {
        Outcome::Breakpoint(text) if text.is_empty() => "Stopped.".to_owned(),
        Outcome::Breakpoint(text) => format!("Stopped.\n{text}"),
        Outcome::Interrupted => "Interrupted before any stop.".to_owned(),
        Outcome::Timeout => {
            "No stop observed before the deadline; the target is still running.".to_owned()
        }
        Outcome::Exited(text) if text.is_empty() => "The target process exited.".to_owned(),
        Outcome::Exited(text) => format!("The target process exited.\n{text}"),
    }
}

async fn run_debug_command(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let command = require_str(args, "command")?;
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = info.session.run_debug_command(&command).await?;
    info.touch();
    if out.is_empty() {
        return Ok("(no output)".to_owned());
    }
    Ok(out)
}

async fn disconnect(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let force = arg_bool(args, "force").unwrap_or(false);
    registry.disconnect(arg_str(args, "session_id").as_deref(), force).await
}

async fn run_script(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let file = require_str(args, "file")?;
    let script_args: Vec<String> = args
        .get("args")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).map(str::to_owned).collect())
        .unwrap_or_default();

    let (sock_path, child) = spawn::launch(&file, &script_args).await?;
    let params = ConnectParams {
        restore_breakpoints: arg_bool(args, "restore_breakpoints").unwrap_or(false),
        ..ConnectParams::default()
    };
    let (id, info) = registry.connect(Target::Unix { path: sock_path }, params).await?;
    info.session.set_script(file.clone(), script_args);
    info.session.adopt_child(child).await;
    Ok(format!(
        "Launched {file} under rdbg as session {id} (pid {}). The script is paused at its first line.",
        info.session.pid().map_or("unknown".to_owned(), |p| p.to_string()),
    ))
}

async fn trigger_request(registry: &Arc<SessionRegistry>, args: &Value) -> ToolResult {
    let path = require_str(args, "path")?;
    let method = trigger::parse_method(&arg_str(args, "method").unwrap_or_else(|| "GET".to_owned()))?;
    let body = arg_str(args, "body");
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;

    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path.clone()
    } else {
        let port = arg_u64(args, "port")
            .map(|p| p as u16)
            .or_else(|| info.session.listen_ports().first().copied())
            .ok_or_else(|| {
                BridgeError::session(
                    "no listen port detected for the target; pass port explicitly",
                )
            })?;
        format!("http://127.0.0.1:{port}{}", if path.starts_with('/') { path.clone() } else { format!("/{path}") })
    };

    let pending = trigger::start_request(method, url.clone(), body);
    info.session.set_pending_http(pending.clone());

    let outcome = if info.session.is_paused() {
        info.session
            .continue_and_wait(CONTINUE_TIMEOUT, Some(pending.interrupt_check()))
            .await?
    } else {
        wait_for_stop_or_response(&info.session, &pending).await
    };
    info.touch();

    let text = match outcome {
        Outcome::Breakpoint(text) => {
            format!("Request to {url} hit a stop:\n{text}\n(The HTTP response completes once execution continues.)")
        }
        Outcome::Interrupted => {
            info.session.take_pending_http();
            format!(
                "Request to {url} completed without hitting a breakpoint.\n{}",
                pending.outcome().unwrap_or_else(|| "(no response recorded)".to_owned())
            )
        }
        Outcome::Timeout => format!(
            "Request to {url} neither stopped nor completed before the deadline; the target is still running."
        ),
        Outcome::Exited(text) => format!("The target process exited while handling the request.\n{text}"),
    };
    Ok(text)
}

/// The target was already running: watch for either the response or a stop.
async fn wait_for_stop_or_response(
    session: &crate::session::DebugSession,
    pending: &trigger::PendingHttp,
) -> Outcome {
    let deadline = tokio::time::Instant::now() + CONTINUE_TIMEOUT;
    loop {
        if session.is_paused() {
            return Outcome::Breakpoint(String::new());
        }
        if pending.is_done() {
            return Outcome::Interrupted;
        }
        if session.is_closed() {
            return Outcome::Exited(String::new());
        }
        if tokio::time::Instant::now() >= deadline {
            return Outcome::Timeout;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

enum RailsTool {
    Routes,
    Model,
    Info,
}

async fn rails_tool(registry: &Arc<SessionRegistry>, args: &Value, which: RailsTool) -> ToolResult {
    let (_, info) = registry.client(arg_str(args, "session_id").as_deref()).await?;
    let out = match which {
        RailsTool::Routes => crate::rails::routes(&info.session).await?,
        RailsTool::Model => {
            let name = require_str(args, "name")?;
            crate::rails::model(&info.session, &name).await?
        }
        RailsTool::Info => crate::rails::info(&info.session).await?,
    };
    info.touch();
    Ok(out)
}

/// `file:line` token inside a live-breakpoint description, used to purge
/// the matching ledger spec.
fn location_token(description: &str) -> Option<String> {
    description
        .split_whitespace()
        .find(|token| {
            token.rsplit_once(':').is_some_and(|(file, line)| {
                !file.is_empty() && line.chars().all(|c| c.is_ascii_digit()) && !line.is_empty()
            })
        })
        .map(str::to_owned)
}

fn arg_str(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_owned)
}

fn arg_u64(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

fn arg_i64(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

fn arg_bool(args: &Value, key: &str) -> Option<bool> {
    args.get(key).and_then(Value::as_bool)
}

fn require_str(args: &Value, key: &str) -> crate::error::Result<String> {
    arg_str(args, key).ok_or_else(|| BridgeError::protocol(format!("missing required argument '{key}'")))
}

#[cfg(test)]
#[path = "tools_tests.rs"]
mod tests;
