// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The typed operation surface for one debugged process.
//!
//! A [`DebugSession`] bundles the wire, the command channel, the state
//! tracker, and the pause controller for a single target. Every public
//! operation serializes on the session's operation lock; the channel's
//! reader task is the only concurrent participant.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::breakpoint::{parse_breakpoint_list, parse_set_response, BreakpointSpec, LiveBreakpoint};
use crate::channel::{ChannelSettings, CommandChannel, InterruptCheck};
use crate::error::{BridgeError, Result};
use crate::evaluate::{self, Evaluation};
use crate::pause::{EscapeStrategy, Outcome, PauseController};
use crate::state::{StateTracker, StopEvent, TrackerState};
use crate::trigger::PendingHttp;
use crate::wire::{self, Target, WireReader, WireWriter};

/// Deadline for the banner/prompt exchange after the socket opens.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Short passive wait used by operations that need a paused target.
const ENSURE_PAUSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Pause deadline during graceful disconnect.
const DISCONNECT_PAUSE_TIMEOUT: Duration = Duration::from_secs(3);

/// Commands that would wedge the synchronous channel or kill the target if
/// issued raw; each is routed to its typed equivalent instead.
const RAW_COMMAND_BLOCKLIST: &[(&str, &str)] = &[
    ("c", "use continue_execution"),
    ("continue", "use continue_execution"),
    ("q", "use disconnect"),
    ("quit", "use disconnect"),
    ("kill", "use disconnect"),
    ("pause", "the bridge manages pausing itself"),
    ("irb", "interactive subshells are not usable over the bridge"),
    ("console", "interactive subshells are not usable over the bridge"),
];

/// Options applied while establishing a session.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Clear breakpoints already present on the target before handing it to
    /// the agent.
    pub clear_breakpoints: bool,
    /// Knock on this port if the handshake stalls because the target is
    /// blocked in `IO#select`/`accept`.
    pub wake_port: Option<u16>,
    /// Escape a signal-trap context automatically after connect.
    pub auto_trap_escape: bool,
}

/// Result of creating a breakpoint.
#[derive(Debug, Clone)]
pub struct SetBreakpoint {
    pub number: Option<u32>,
    pub stop_event_hint: StopEvent,
    pub warnings: Vec<String>,
    pub response: String,
}

/// Point-in-time view of a session for listings.
#[derive(Debug, Clone)]
pub struct SessionStatus {
    pub target: String,
    pub remote: bool,
    pub pid: Option<i32>,
    pub paused: bool,
    pub stop_event: Option<StopEvent>,
    pub trap_context: bool,
    pub pending_exception: bool,
    pub script: Option<String>,
}

#[derive(Debug)]
struct ScriptInfo {
    file: String,
    args: Vec<String>,
}

#[derive(Debug)]
pub struct DebugSession {
    target: Target,
    tracker: Arc<StateTracker>,
    channel: Arc<CommandChannel>,
    pause: PauseController,
    op_lock: tokio::sync::Mutex<()>,
    one_shot_bps: Mutex<HashSet<u32>>,
    pending_http: Mutex<Option<PendingHttp>>,
    listen_ports: Mutex<Vec<u16>>,
    escape_target: Mutex<Option<String>>,
    script: Mutex<Option<ScriptInfo>>,
    child: tokio::sync::Mutex<Option<Child>>,
}

impl DebugSession {
    /// Open the transport, perform the handshake, and prepare the session.
    pub async fn connect(target: Target, opts: &ConnectOptions, settings: ChannelSettings) -> Result<Arc<Self>> {
        let (reader, writer) = wire::open(&target).await?;
        let session = Self::from_parts(target, reader, writer, settings)?;
        session.handshake(opts).await?;
        Ok(session)
    }

    /// Assemble a session from pre-opened stream halves (tests use
    /// `tokio::io::duplex` pairs here).
    pub fn from_parts(
        target: Target,
        reader: WireReader,
        writer: WireWriter,
        settings: ChannelSettings,
    ) -> Result<Arc<Self>> {
        let tracker = Arc::new(StateTracker::new(&settings.prompt_pattern)?);
        let channel = CommandChannel::new(reader, writer, Arc::clone(&tracker), settings);
        let pause =
            PauseController::new(Arc::clone(&channel), Arc::clone(&tracker), !target.is_remote());
        Ok(Arc::new(Self {
            target,
            tracker,
            channel,
            pause,
            op_lock: tokio::sync::Mutex::new(()),
            one_shot_bps: Mutex::new(HashSet::new()),
            pending_http: Mutex::new(None),
            listen_ports: Mutex::new(Vec::new()),
            escape_target: Mutex::new(None),
            script: Mutex::new(None),
            child: tokio::sync::Mutex::new(None),
        }))
    }

    /// Consume the banner exchange and prepare the paused target: width,
    /// force-quit trap, optional breakpoint clearing, listen-port and
    /// dispatch-path detection, optional trap escape.
    pub async fn handshake(&self, opts: &ConnectOptions) -> Result<()> {
        let _op = self.op_lock.lock().await;

        if let Err(e) = self.pause.ensure_paused(HANDSHAKE_TIMEOUT).await {
            // The target may be blocked on I/O (e.g. a server waiting in
            // accept). A request against its listen port unblocks it.
            let Some(port) = opts.wake_port else { return Err(e) };
            debug!(port, "handshake stalled, knocking on listen port");
            let url = format!("http://127.0.0.1:{port}/");
            tokio::spawn(async move {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(3))
                    .build()
                    .unwrap_or_default();
                let _ = client.get(&url).send().await;
            });
            self.pause.ensure_paused(HANDSHAKE_TIMEOUT).await?;
        }

        self.channel.configure_width().await;

        if let Err(e) = self.channel.send_command(&evaluate::force_quit_trap_command(), None).await {
            debug!(err = %e, "force-quit trap installation failed");
        }

        if opts.clear_breakpoints {
            let cleared = self.clear_all_breakpoints_inner().await.unwrap_or(0);
            if cleared > 0 {
                info!(cleared, "removed pre-existing breakpoints");
            }
        }

        self.detect_environment().await;

        if self.tracker.snapshot().trap_context && opts.auto_trap_escape {
            self.escape_trap_context_inner().await;
        }

        Ok(())
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn pid(&self) -> Option<i32> {
        self.tracker.pid()
    }

    pub fn is_paused(&self) -> bool {
        self.tracker.is_paused()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub fn tracker_state(&self) -> TrackerState {
        self.tracker.snapshot()
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.tracker.snapshot();
        SessionStatus {
            target: self.target.to_string(),
            remote: self.target.is_remote(),
            pid: state.pid,
            paused: state.paused,
            stop_event: state.last_stop_event,
            trap_context: state.trap_context,
            pending_exception: state.pending_exception,
            script: lock(&self.script).as_ref().map(|s| s.file.clone()),
        }
    }

    pub fn listen_ports(&self) -> Vec<u16> {
        lock(&self.listen_ports).clone()
    }

    pub fn escape_target(&self) -> Option<String> {
        lock(&self.escape_target).clone()
    }

    /// Number of `pause PID` commands written since connect (stale-pause
    /// accounting, exposed for diagnostics and tests).
    pub fn pause_write_count(&self) -> usize {
        self.channel.pause_write_count()
    }

    pub fn set_script(&self, file: String, args: Vec<String>) {
        *lock(&self.script) = Some(ScriptInfo { file, args });
    }

    pub fn script_file(&self) -> Option<String> {
        lock(&self.script).as_ref().map(|s| s.file.clone())
    }

    pub fn script_args(&self) -> Vec<String> {
        lock(&self.script).as_ref().map(|s| s.args.clone()).unwrap_or_default()
    }

    pub async fn adopt_child(&self, child: Child) {
        *self.child.lock().await = Some(child);
    }

    pub fn set_pending_http(&self, pending: PendingHttp) {
        *lock(&self.pending_http) = Some(pending);
    }

    pub fn take_pending_http(&self) -> Option<PendingHttp> {
        lock(&self.pending_http).take()
    }

    pub fn pending_http(&self) -> Option<PendingHttp> {
        lock(&self.pending_http).clone()
    }

    /// Used by the reaper: probe without blocking behind a long operation.
    pub fn try_lock_op(&self) -> Option<tokio::sync::MutexGuard<'_, ()>> {
        self.op_lock.try_lock().ok()
    }

    /// Evaluate code in the stopped binding, capturing stdout and any
    /// raised exception. Three wire commands: wrapper, capture read, error
    /// read.
    pub async fn evaluate(&self, code: &str) -> Result<Evaluation> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        self.evaluate_inner(code).await
    }

    async fn evaluate_inner(&self, code: &str) -> Result<Evaluation> {
        let value = self.channel.send_command(&evaluate::eval_command(code), None).await?;
        let captured = self.channel.send_command(evaluate::CAPTURED_QUERY, None).await?;
        let error = self.channel.send_command(evaluate::ERROR_QUERY, None).await?;
        Ok(Evaluation {
            value: value.trim().to_owned(),
            captured_stdout: evaluate::parse_captured(&captured),
            error: evaluate::parse_error(&error),
        })
    }

    /// Create a breakpoint. An invalid condition produces a warning but the
    /// breakpoint is still set, matching the debugger's own behavior.
    pub async fn set_breakpoint(&self, spec: &BreakpointSpec, one_shot: bool) -> Result<SetBreakpoint> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;

        let mut warnings = Vec::new();
        if let Some(ref condition) = spec.condition {
            match self
                .channel
                .send_command(&evaluate::condition_probe_command(condition), None)
                .await
            {
                Ok(resp) if resp.contains("syntax error") => {
                    warnings.push(format!("condition `{condition}` does not parse: {}", resp.trim()));
                }
                Ok(_) => {}
                Err(e) => warnings.push(format!("condition probe failed: {e}")),
            }
        }

        let response = self.channel.send_command(&spec.to_command(), None).await?;
        let number = parse_set_response(&response);
        if number.is_none() {
            warnings.push("debugger did not acknowledge the breakpoint with a number".to_owned());
        }
        if one_shot {
            if let Some(n) = number {
                lock(&self.one_shot_bps).insert(n);
            }
        }
        Ok(SetBreakpoint {
            number,
            stop_event_hint: spec.stop_event_hint(),
            warnings,
            response: response.trim().to_owned(),
        })
    }

    /// Delete a breakpoint by number or by matching its listed description
    /// (file:line, method, or exception class).
    pub async fn remove_breakpoint(&self, selector: &str) -> Result<LiveBreakpoint> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;

        let live = self.live_breakpoints().await?;
        let found = if let Ok(number) = selector.trim().parse::<u32>() {
            live.into_iter().find(|bp| bp.number == number)
        } else {
            live.into_iter().find(|bp| bp.description.contains(selector.trim()))
        };
        let Some(bp) = found else {
            return Err(BridgeError::session(format!("no breakpoint matching '{selector}'")));
        };
        self.channel.send_command(&format!("delete {}", bp.number), None).await?;
        lock(&self.one_shot_bps).remove(&bp.number);
        Ok(bp)
    }

    pub async fn list_breakpoints(&self) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        self.channel.send_command("info breakpoints", None).await
    }

    async fn live_breakpoints(&self) -> Result<Vec<LiveBreakpoint>> {
        let response = self.channel.send_command("info breakpoints", None).await?;
        Ok(parse_breakpoint_list(&response))
    }

    async fn clear_all_breakpoints_inner(&self) -> Result<usize> {
        let live = self.live_breakpoints().await?;
        let mut removed = 0;
        for bp in live {
            if self.channel.send_command(&format!("delete {}", bp.number), None).await.is_ok() {
                removed += 1;
            }
        }
        lock(&self.one_shot_bps).clear();
        Ok(removed)
    }

    /// Resume and wait for the next stop.
    pub async fn continue_execution(&self) -> Result<Outcome> {
        let _op = self.op_lock.lock().await;
        let timeout = self.channel.settings().continue_timeout;
        let outcome = self.pause.continue_and_wait(timeout, None).await?;
        self.after_stop(&outcome).await;
        Ok(outcome)
    }

    /// Resume with an interrupt check (used by the HTTP trigger).
    pub async fn continue_and_wait(&self, timeout: Duration, interrupt: Option<InterruptCheck>) -> Result<Outcome> {
        let _op = self.op_lock.lock().await;
        let outcome = self.pause.continue_and_wait(timeout, interrupt).await?;
        self.after_stop(&outcome).await;
        Ok(outcome)
    }

    /// Step into the next call.
    pub async fn step(&self) -> Result<Outcome> {
        self.step_command("s").await
    }

    /// Step over the current line.
    pub async fn next_line(&self) -> Result<Outcome> {
        self.step_command("n").await
    }

    /// Run until the current frame returns.
    pub async fn finish(&self) -> Result<Outcome> {
        self.step_command("finish").await
    }

    async fn step_command(&self, command: &str) -> Result<Outcome> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        let mark = self.channel.mark();
        self.tracker.set_running();
        self.channel.send_command_no_wait(command, true).await?;
        let timeout = self.channel.settings().default_timeout;
        let outcome = match self.channel.wait_for_stop(mark, timeout, None).await {
            Ok(crate::channel::StopWait::Stopped(text)) => Outcome::Breakpoint(text),
            Ok(crate::channel::StopWait::Interrupted(_)) => Outcome::Interrupted,
            Ok(crate::channel::StopWait::Exited(text)) => Outcome::Exited(text),
            Err(e) if e.is_timeout() => Outcome::Timeout,
            Err(e) => return Err(e),
        };
        self.after_stop(&outcome).await;
        Ok(outcome)
    }

    /// One-shot cleanup once a stop lands: a breakpoint the handler layer
    /// marked single-use is deleted after its first hit.
    async fn after_stop(&self, outcome: &Outcome) {
        if !matches!(outcome, Outcome::Breakpoint(_)) {
            return;
        }
        let Some(bp) = self.tracker.snapshot().last_stop_bp else { return };
        let was_one_shot = lock(&self.one_shot_bps).remove(&bp);
        if was_one_shot {
            if let Err(e) = self.channel.send_command(&format!("delete {bp}"), None).await {
                debug!(bp, err = %e, "one-shot breakpoint cleanup failed");
            }
        }
        self.tracker.clear_pending_exception();
    }

    /// Three structured queries: value, class, instance/class variables.
    pub async fn inspect(&self, expr: &str) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;

        let value = self.channel.send_command(&format!("pp ({expr})"), None).await?;
        let class = self.channel.send_command(&format!("pp ({expr}).class"), None).await?;
        let vars = self
            .channel
            .send_command(&format!(
                "__bridge_obj = ({expr}); __bridge_vars = {{ ivars: __bridge_obj.instance_variables.to_h {{ |v| [v, __bridge_obj.instance_variable_get(v)] }} }}; __bridge_vars[:cvars] = __bridge_obj.class_variables.to_h {{ |v| [v, __bridge_obj.class_variable_get(v)] }} if __bridge_obj.is_a?(Module); pp __bridge_vars"
            ), None)
            .await?;

        Ok(format!(
            "{}\nclass: {}\n{}",
            value.trim(),
            class.trim(),
            vars.trim()
        ))
    }

    /// Current frame, backtrace, source window, and locals.
    pub async fn get_context(&self) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        let bt = self.channel.send_command("bt", None).await?;
        let source = self.channel.send_command("list", None).await?;
        let locals = self.channel.send_command("info locals", None).await?;
        Ok(format!(
            "--- backtrace ---\n{}\n\n--- source ---\n{}\n\n--- locals ---\n{}",
            bt.trim(),
            source.trim(),
            locals.trim()
        ))
    }

    /// Source for a method (`Class#name` / `Class.name`) or the current
    /// stop location when `target` is empty.
    pub async fn get_source(&self, target: &str) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        let target = target.trim();
        if target.is_empty() {
            return self.channel.send_command("list", None).await;
        }
        let glue = if let Some((receiver, method)) = target.split_once('#') {
            format!("pp {receiver}.instance_method(:{method}).source_location")
        } else if let Some((receiver, method)) = target.split_once('.') {
            format!("pp {receiver}.method(:{method}).source_location")
        } else {
            return self.channel.send_command(&format!("list {target}"), None).await;
        };
        let location = self.channel.send_command(&glue, None).await?;
        let Some((file, line)) = parse_source_location(&location) else {
            return Err(BridgeError::protocol(format!(
                "no source location for '{target}': {}",
                location.trim()
            )));
        };
        let start = line.saturating_sub(5).max(1);
        let body = self.read_file_inner(&file, Some((start, line + 20))).await?;
        Ok(format!("{file}:{line}\n{body}"))
    }

    /// Read a file as the target sees it. Remote sessions go over the wire
    /// so files inside the target's container are visible.
    pub async fn read_file(&self, path: &str, range: Option<(u32, u32)>) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        self.read_file_inner(path, range).await
    }

    async fn read_file_inner(&self, path: &str, range: Option<(u32, u32)>) -> Result<String> {
        if self.target.is_remote() {
            let code = match range {
                Some((start, end)) => format!(
                    "File.readlines({path:?})[{}..{}].join",
                    start.saturating_sub(1),
                    end.saturating_sub(1)
                ),
                None => format!("File.read({path:?})"),
            };
            let eval = self.evaluate_inner(&code).await?;
            if let Some(err) = eval.error {
                return Err(BridgeError::session(format!("remote read of {path} failed: {err}")));
            }
            return Ok(evaluate::parse_captured(&eval.value));
        }
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| BridgeError::session(format!("cannot read {path}: {e}")))?;
        Ok(match range {
            Some((start, end)) => {
                let start = start.saturating_sub(1) as usize;
                contents
                    .lines()
                    .skip(start)
                    .take((end as usize).saturating_sub(start))
                    .collect::<Vec<_>>()
                    .join("\n")
            }
            None => contents,
        })
    }

    /// List a directory as the target sees it, with an optional glob.
    pub async fn list_files(&self, dir: &str, glob: Option<&str>) -> Result<Vec<String>> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        if self.target.is_remote() {
            let pattern = match glob {
                Some(g) => format!("{}/{}", dir.trim_end_matches('/'), g),
                None => format!("{}/*", dir.trim_end_matches('/')),
            };
            let eval = self.evaluate_inner(&format!("puts Dir.glob({pattern:?}).sort.join(\"\\n\")")).await?;
            if let Some(err) = eval.error {
                return Err(BridgeError::session(format!("remote listing of {dir} failed: {err}")));
            }
            return Ok(eval
                .captured_stdout
                .lines()
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect());
        }
        let mut entries = Vec::new();
        let mut reader = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| BridgeError::session(format!("cannot list {dir}: {e}")))?;
        while let Ok(Some(entry)) = reader.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            if glob.map_or(true, |g| wildcard_match(g, &name)) {
                entries.push(format!("{}/{name}", dir.trim_end_matches('/')));
            }
        }
        entries.sort();
        Ok(entries)
    }

    /// Raw command escape hatch. Commands that would wedge the channel are
    /// routed to their typed equivalents.
    pub async fn run_debug_command(&self, command: &str) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.require_paused().await?;
        if command.contains('\n') {
            return Err(BridgeError::protocol("raw debugger commands must be a single line"));
        }
        let head = command.split_whitespace().next().unwrap_or("");
        if let Some((_, guidance)) = RAW_COMMAND_BLOCKLIST.iter().find(|(cmd, _)| *cmd == head) {
            return Err(BridgeError::session(format!("'{head}' is not available here; {guidance}")));
        }
        self.channel.send_command(command, None).await
    }

    /// Passive pause-wait exposed for handlers that want to synchronize on
    /// an expected stop (zero pause messages).
    pub async fn wait_until_paused(&self, timeout: Duration) -> Result<String> {
        let _op = self.op_lock.lock().await;
        self.pause.ensure_paused(timeout).await
    }

    /// Escape a signal-trap context via the framework dispatch path.
    pub async fn escape_trap_context(&self) -> Result<bool> {
        let _op = self.op_lock.lock().await;
        Ok(self.escape_trap_context_inner().await)
    }

    async fn escape_trap_context_inner(&self) -> bool {
        let Some(dispatch_target) = self.escape_target() else {
            debug!("no dispatch path detected, cannot escape trap context");
            return false;
        };
        let Some(port) = self.listen_ports().first().copied() else {
            debug!("no listen port detected, cannot escape trap context");
            return false;
        };
        let strategy = EscapeStrategy::HttpNudge { dispatch_target, port };
        let timeout = self.channel.settings().default_timeout;
        match self.pause.attempt_trap_escape(&strategy, timeout).await {
            Ok(escaped) => {
                if !escaped {
                    warn!("trap-context escape did not land; operations stay restricted");
                }
                escaped
            }
            Err(e) => {
                warn!(err = %e, "trap-context escape failed");
                false
            }
        }
    }

    /// Tear the session down.
    ///
    /// `force` drops the socket without cleanup (the caller accepts stale
    /// breakpoints on the target). The graceful path deletes live
    /// breakpoints, restores the SIGINT handler, resumes the target, and
    /// only then closes; if the target cannot be paused the cleanup is
    /// flushed through the nested `command PID …` form and the message is
    /// annotated with a WARNING.
    pub async fn disconnect(&self, force: bool) -> Result<String> {
        let _op = self.op_lock.lock().await;

        if force {
            self.channel.shutdown();
            self.reap_child().await;
            return Ok("Disconnected (forced). Breakpoints on the target were left in place.".to_owned());
        }

        if self.channel.is_closed() {
            self.reap_child().await;
            return Ok("Disconnected (connection was already closed).".to_owned());
        }

        let mut warnings: Vec<String> = Vec::new();
        let paused = self.tracker.is_paused()
            || self.pause.auto_repause(DISCONNECT_PAUSE_TIMEOUT, 2).await;

        if paused {
            match self.clear_all_breakpoints_inner().await {
                Ok(n) if n > 0 => debug!(removed = n, "breakpoints removed at disconnect"),
                Ok(_) => {}
                Err(e) => warnings.push(format!("breakpoint cleanup failed: {e}")),
            }
            if let Err(e) = self.channel.send_command(&evaluate::restore_trap_command(), None).await {
                debug!(err = %e, "SIGINT handler restore failed");
            }
            if let Err(e) = self.channel.send_command_no_wait("c", false).await {
                debug!(err = %e, "final continue failed");
            }
        } else if let Some(pid) = self.tracker.pid() {
            // Could not regain the prompt: flush cleanup without waiting.
            warnings.push("WARNING: target could not be paused; cleanup was flushed blind".to_owned());
            let restore = evaluate::restore_trap_command();
            let _ = self
                .channel
                .send_command_no_wait(&format!("command {pid} 500 {restore}"), true)
                .await;
            let _ = self.channel.send_command_no_wait(&format!("command {pid} 500 c"), true).await;
        } else {
            warnings.push("WARNING: target unreachable; socket dropped without cleanup".to_owned());
        }

        self.channel.shutdown();
        self.reap_child().await;

        let mut message = String::from("Disconnected; target resumed.");
        for w in warnings {
            message.push('\n');
            message.push_str(&w);
        }
        Ok(message)
    }

    async fn reap_child(&self) {
        let mut slot = self.child.lock().await;
        if let Some(mut child) = slot.take() {
            let _ = child.start_kill();
            let _ = tokio::time::timeout(Duration::from_secs(2), child.wait()).await;
        }
    }

    async fn require_paused(&self) -> Result<()> {
        match self.pause.ensure_paused(ENSURE_PAUSE_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_timeout() => Err(BridgeError::session(
                "target is running, not paused. Set a breakpoint and trigger it (or wait for a stop) first",
            )),
            Err(e) => Err(e),
        }
    }

    /// Best-effort probes run once at connect while the target is paused:
    /// listening ports (for the HTTP trigger and trap escape) and the web
    /// framework's dispatch path (for trap escape).
    async fn detect_environment(&self) {
        let ports_cmd = "pp ObjectSpace.each_object(TCPServer).map { |s| s.addr[1] rescue nil }.compact.uniq";
        if let Ok(response) = self.channel.send_command(ports_cmd, None).await {
            let ports = parse_port_list(&response);
            if !ports.is_empty() {
                debug!(?ports, "detected listen ports");
                *lock(&self.listen_ports) = ports;
            }
        }

        let dispatch_cmd = "pp(defined?(ActionController::Metal) ? \"ActionController::Metal#dispatch\" : (defined?(Rack::Builder) ? \"Rack::Builder#call\" : nil))";
        if let Ok(response) = self.channel.send_command(dispatch_cmd, None).await {
            let trimmed = response.trim();
            if trimmed != "nil" && !trimmed.is_empty() {
                let target = trimmed.trim_matches('"').to_owned();
                debug!(target, "detected dispatch path for trap escape");
                *lock(&self.escape_target) = Some(target);
            }
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Parse `pp [3000, 9394]` style output.
fn parse_port_list(response: &str) -> Vec<u16> {
    let trimmed = response.trim();
    let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) else {
        return Vec::new();
    };
    inner.split(',').filter_map(|p| p.trim().parse().ok()).collect()
}

/// Parse `pp ["/app/foo.rb", 12]` source-location output.
fn parse_source_location(response: &str) -> Option<(String, u32)> {
    let trimmed = response.trim();
    let inner = trimmed.strip_prefix('[')?.strip_suffix(']')?;
    let (file, line) = inner.rsplit_once(',')?;
    let file = file.trim().trim_matches('"').to_owned();
    let line = line.trim().parse().ok()?;
    Some((file, line))
}

/// Minimal `*`-only wildcard match for local directory listings.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    if !pattern.contains('*') {
        return pattern == name;
    }
    let mut rest = name;
    let parts: Vec<&str> = pattern.split('*').collect();
    for (i, part) in parts.iter().enumerate() {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(pos) => {
                if i == 0 && pos != 0 {
                    return false;
                }
                rest = &rest[pos + part.len()..];
            }
            None => return false,
        }
    }
    if let Some(last) = parts.last() {
        if !last.is_empty() && !name.ends_with(last) {
            return false;
        }
    }
    true
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
