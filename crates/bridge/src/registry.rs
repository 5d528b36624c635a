// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session collection, lifecycle, and the idle reaper.
//!
//! The registry owns every [`DebugSession`], keyed by a stable session id.
//! A background reaper prunes idle and dead sessions; recently-destroyed
//! ids are remembered for a while so the next lookup gets a specific
//! explanation instead of a bare "not found".

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::breakpoint::{BreakpointLedger, BreakpointSpec};
use crate::channel::ChannelSettings;
use crate::error::{BridgeError, Result};
use crate::pause::pid_alive;
use crate::safety::WarningCategory;
use crate::session::{ConnectOptions, DebugSession, SessionStatus};
use crate::wire::Target;

/// How often the background reaper runs.
pub const REAPER_INTERVAL: Duration = Duration::from_secs(60);

/// How long a reaped id keeps its diagnostic entry.
pub const RECENTLY_REAPED_TTL: Duration = Duration::from_secs(600);

/// Default idle timeout for a session.
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(1800);

/// Per-session bookkeeping owned exclusively by the registry.
#[derive(Debug)]
pub struct SessionInfo {
    pub session: Arc<DebugSession>,
    pub connected_at: Instant,
    pub timeout: Duration,
    last_activity: Mutex<Instant>,
    acknowledged: Mutex<HashSet<WarningCategory>>,
    owned_breakpoints: Mutex<HashSet<String>>,
}

impl SessionInfo {
    fn new(session: Arc<DebugSession>, timeout: Duration) -> Self {
        let now = Instant::now();
        Self {
            session,
            connected_at: now,
            timeout,
            last_activity: Mutex::new(now),
            acknowledged: Mutex::new(HashSet::new()),
            owned_breakpoints: Mutex::new(HashSet::new()),
        }
    }

    /// Bump the activity stamp. Monotonically non-decreasing.
    pub fn touch(&self) {
        let mut stamp = lock(&self.last_activity);
        let now = Instant::now();
        if now > *stamp {
            *stamp = now;
        }
    }

    pub fn last_activity(&self) -> Instant {
        *lock(&self.last_activity)
    }

    pub fn idle(&self) -> Duration {
        self.last_activity().elapsed()
    }

    pub fn acknowledge(&self, category: WarningCategory) {
        lock(&self.acknowledged).insert(category);
    }

    pub fn is_acknowledged(&self, category: WarningCategory) -> bool {
        lock(&self.acknowledged).contains(&category)
    }

    pub fn acknowledged(&self) -> HashSet<WarningCategory> {
        lock(&self.acknowledged).clone()
    }

    pub fn record_owned_breakpoint(&self, spec: impl Into<String>) {
        lock(&self.owned_breakpoints).insert(spec.into());
    }

    pub fn remove_owned_breakpoints_matching(&self, pattern: &str) {
        lock(&self.owned_breakpoints).retain(|s| !s.contains(pattern));
    }

    pub fn owned_breakpoints(&self) -> HashSet<String> {
        lock(&self.owned_breakpoints).clone()
    }
}

/// Diagnostic memory of a destroyed session.
#[derive(Debug, Clone)]
pub struct ReapedEntry {
    pub reason: String,
    pub pid: Option<i32>,
    pub reaped_at: Instant,
}

/// Connection request handed to [`SessionRegistry::connect`].
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub session_id: Option<String>,
    pub pre_cleanup_pid: Option<i32>,
    pub pre_cleanup_port: Option<u16>,
    pub clear_breakpoints: bool,
    pub restore_breakpoints: bool,
    pub timeout_secs: Option<u64>,
    pub wake_port: Option<u16>,
    pub auto_trap_escape: bool,
}

/// Listing row for `list_debug_sessions`.
#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub id: String,
    pub status: SessionStatus,
    pub idle: Duration,
    pub connected_for: Duration,
    pub timeout: Duration,
}

pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<SessionInfo>>>,
    recently_reaped: Mutex<HashMap<String, ReapedEntry>>,
    ledger: Mutex<BreakpointLedger>,
    default_timeout: Duration,
    reaped_ttl: Duration,
    settings: ChannelSettings,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(DEFAULT_SESSION_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            recently_reaped: Mutex::new(HashMap::new()),
            ledger: Mutex::new(BreakpointLedger::default()),
            default_timeout,
            reaped_ttl: RECENTLY_REAPED_TTL,
            settings: ChannelSettings::default(),
        }
    }

    pub fn with_reaped_ttl(mut self, ttl: Duration) -> Self {
        self.reaped_ttl = ttl;
        self
    }

    pub fn with_settings(mut self, settings: ChannelSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Connect a new session, applying pre-connect cleanup so at most one
    /// session exists per id, PID, and TCP port.
    pub async fn connect(&self, target: Target, params: ConnectParams) -> Result<(String, Arc<SessionInfo>)> {
        if let Some(pid) = params.pre_cleanup_pid {
            for id in self.ids_with_pid(pid).await {
                info!(id, pid, "pre-connect cleanup: replacing session with same PID");
                self.reap(&id, "replaced by a reconnect to the same PID").await;
            }
        }
        if let Some(port) = params.pre_cleanup_port {
            for id in self.ids_with_port(port).await {
                info!(id, port, "pre-connect cleanup: replacing session with same port");
                self.reap(&id, "replaced by a reconnect to the same port").await;
            }
        }
        if let Some(ref id) = params.session_id {
            if self.sessions.read().await.contains_key(id) {
                info!(id, "pre-connect cleanup: replacing session with same id");
                self.reap(id, "replaced by a reconnect with the same session id").await;
            }
        }

        let opts = ConnectOptions {
            clear_breakpoints: params.clear_breakpoints,
            wake_port: params.wake_port,
            auto_trap_escape: params.auto_trap_escape,
        };
        let session = DebugSession::connect(target.clone(), &opts, self.settings.clone()).await?;

        let id = match params.session_id {
            Some(id) => id,
            None => match session.pid() {
                Some(pid) => format!("rdbg-{pid}"),
                None => format!("session-{}", uuid::Uuid::new_v4()),
            },
        };

        // A reconnect that resolves to an existing PID/port/id replaces the
        // prior session even without explicit cleanup hints.
        if self.sessions.read().await.contains_key(&id) {
            self.reap(&id, "replaced by a reconnect with the same derived id").await;
        }
        if let Some(pid) = session.pid() {
            for other in self.ids_with_pid(pid).await {
                self.reap(&other, "replaced by a reconnect to the same PID").await;
            }
        }
        if let Some(port) = target.port() {
            for other in self.ids_with_port(port).await {
                self.reap(&other, "replaced by a reconnect to the same port").await;
            }
        }

        let timeout = params.timeout_secs.map(Duration::from_secs).unwrap_or(self.default_timeout);
        let info = Arc::new(SessionInfo::new(Arc::clone(&session), timeout));
        self.sessions.write().await.insert(id.clone(), Arc::clone(&info));
        info!(id, target = %target, pid = ?session.pid(), "session connected");

        if params.restore_breakpoints {
            let outcomes = self.restore_breakpoints(&info).await;
            for (spec, result) in &outcomes {
                match result {
                    Ok(_) => debug!(spec, "breakpoint restored"),
                    Err(e) => warn!(spec, err = %e, "breakpoint restore failed"),
                }
            }
        }

        Ok((id, info))
    }

    /// Resolve a session. With no id, exactly one live session must exist.
    /// A recently-reaped id fails with the reap diagnostic.
    pub async fn client(&self, id: Option<&str>) -> Result<(String, Arc<SessionInfo>)> {
        self.purge_expired_reaped();
        let sessions = self.sessions.read().await;
        let resolved = match id {
            Some(id) => match sessions.get(id) {
                Some(info) => (id.to_owned(), Arc::clone(info)),
                None => return Err(self.missing_session_error(id)),
            },
            None => match sessions.len() {
                0 => return Err(BridgeError::session("no debug sessions. Use connect first")),
                1 => {
                    #[allow(clippy::unwrap_used)] // len() == 1 checked above
                    let (id, info) = sessions.iter().next().unwrap();
                    (id.clone(), Arc::clone(info))
                }
                n => {
                    return Err(BridgeError::session(format!(
                        "{n} sessions are active; pass session_id to pick one"
                    )))
                }
            },
        };
        drop(sessions);
        resolved.1.touch();
        Ok(resolved)
    }

    fn missing_session_error(&self, id: &str) -> BridgeError {
        let reaped = lock(&self.recently_reaped);
        if let Some(entry) = reaped.get(id) {
            let ago = entry.reaped_at.elapsed().as_secs();
            return BridgeError::session(format!(
                "Session {id} was reaped {ago}s ago because {}",
                entry.reason
            ));
        }
        BridgeError::session(format!("Session '{id}' not found"))
    }

    /// Disconnect one session (or the only one). Never fails: if graceful
    /// cleanup breaks, the socket is dropped and the message carries a
    /// WARNING.
    pub async fn disconnect(&self, id: Option<&str>, force: bool) -> Result<String> {
        let (id, info) = self.client(id).await?;
        let message = match info.session.disconnect(force).await {
            Ok(message) => message,
            Err(e) => {
                warn!(id, err = %e, "graceful disconnect failed, forcing");
                let _ = info.session.disconnect(true).await;
                format!("Disconnected.\nWARNING: graceful cleanup failed ({e}); the socket was dropped")
            }
        };
        self.remove(&id, "disconnected by request").await;
        Ok(message)
    }

    pub async fn disconnect_all(&self) -> usize {
        let ids: Vec<String> = self.sessions.read().await.keys().cloned().collect();
        let mut count = 0;
        for id in ids {
            if self.disconnect(Some(&id), false).await.is_ok() {
                count += 1;
            }
        }
        count
    }

    /// Probe every session for a closed socket or a dead process and reap
    /// the casualties. Also expires old reap diagnostics.
    pub async fn cleanup_dead_sessions(&self) -> usize {
        self.purge_expired_reaped();
        let snapshot = self.snapshot_infos().await;
        let mut reaped = 0;
        for (id, info) in snapshot {
            let reason = probe_dead(&info);
            if let Some(reason) = reason {
                self.reap(&id, &reason).await;
                reaped += 1;
            }
        }
        reaped
    }

    /// One reaper pass: idle timeouts first, then dead-session probes. A
    /// session whose operation lock is held is skipped until the next pass.
    pub async fn reap_once(&self) -> usize {
        self.purge_expired_reaped();
        let snapshot = self.snapshot_infos().await;
        let mut count = 0;
        for (id, info) in snapshot {
            let reason = {
                let Some(_guard) = info.session.try_lock_op() else {
                    debug!(id, "reaper skipping session with operation in flight");
                    continue;
                };
                let idle = info.idle();
                if idle >= info.timeout {
                    Some(format!(
                        "idle for {}s (timeout {}s)",
                        idle.as_secs(),
                        info.timeout.as_secs()
                    ))
                } else {
                    probe_dead(&info)
                }
            };
            if let Some(reason) = reason {
                info!(id, reason, "reaping session");
                self.reap(&id, &reason).await;
                count += 1;
            }
        }
        count
    }

    /// Run the reaper loop until shutdown.
    pub fn spawn_reaper(self: &Arc<Self>, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            info!("session reaper started");
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(REAPER_INTERVAL) => {}
                    _ = shutdown.cancelled() => {
                        debug!("session reaper shutting down");
                        return;
                    }
                }
                let reaped = registry.reap_once().await;
                if reaped > 0 {
                    info!(reaped, "reaper pass complete");
                }
            }
        })
    }

    pub async fn active_sessions(&self) -> Vec<RegistrySnapshot> {
        let sessions = self.sessions.read().await;
        let mut rows: Vec<RegistrySnapshot> = sessions
            .iter()
            .map(|(id, info)| RegistrySnapshot {
                id: id.clone(),
                status: info.session.status(),
                idle: info.idle(),
                connected_for: info.connected_at.elapsed(),
                timeout: info.timeout,
            })
            .collect();
        rows.sort_by(|a, b| a.id.cmp(&b.id));
        rows
    }

    pub fn record_breakpoint(&self, spec: impl Into<String>) {
        lock(&self.ledger).record(spec);
    }

    pub fn clear_breakpoint_specs(&self) {
        lock(&self.ledger).clear();
    }

    pub fn remove_breakpoint_specs_matching(&self, pattern: &str) -> usize {
        lock(&self.ledger).remove_matching(pattern)
    }

    pub fn breakpoint_specs(&self) -> Vec<String> {
        lock(&self.ledger).specs()
    }

    /// Replay every recorded spec onto a session, collecting per-spec
    /// outcomes. One failed spec (a vanished file, say) never fails the
    /// whole restore.
    pub async fn restore_breakpoints(&self, info: &SessionInfo) -> Vec<(String, Result<Option<u32>>)> {
        let specs = self.breakpoint_specs();
        let mut outcomes = Vec::with_capacity(specs.len());
        for spec in specs {
            let result = match BreakpointSpec::parse_replay(&spec) {
                Ok(parsed) => info.session.set_breakpoint(&parsed, false).await.map(|set| {
                    info.record_owned_breakpoint(&spec);
                    set.number
                }),
                Err(e) => Err(e),
            };
            outcomes.push((spec, result));
        }
        outcomes
    }

    pub async fn acknowledge_warning(&self, id: Option<&str>, category: &str) -> Result<String> {
        let parsed = WarningCategory::parse(category).ok_or_else(|| {
            BridgeError::protocol(format!("unknown warning category '{category}'"))
        })?;
        let (id, info) = self.client(id).await?;
        info.acknowledge(parsed);
        Ok(id)
    }

    pub async fn acknowledged_warnings(&self, id: Option<&str>) -> Result<HashSet<WarningCategory>> {
        let (_, info) = self.client(id).await?;
        Ok(info.acknowledged())
    }

    pub fn recently_reaped(&self, id: &str) -> Option<ReapedEntry> {
        lock(&self.recently_reaped).get(id).cloned()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn snapshot_infos(&self) -> Vec<(String, Arc<SessionInfo>)> {
        let sessions = self.sessions.read().await;
        sessions.iter().map(|(id, info)| (id.clone(), Arc::clone(info))).collect()
    }

    async fn ids_with_pid(&self, pid: i32) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, info)| info.session.pid() == Some(pid))
            .map(|(id, _)| id.clone())
            .collect()
    }

    async fn ids_with_port(&self, port: u16) -> Vec<String> {
        let sessions = self.sessions.read().await;
        sessions
            .iter()
            .filter(|(_, info)| info.session.target().port() == Some(port))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove and force-disconnect a session, recording the diagnostic.
    async fn reap(&self, id: &str, reason: &str) {
        if let Some(info) = self.remove(id, reason).await {
            // A dead session is dead regardless of how cleanup goes.
            if let Err(e) = info.session.disconnect(true).await {
                debug!(id, err = %e, "force disconnect during reap failed");
            }
        }
    }

    async fn remove(&self, id: &str, reason: &str) -> Option<Arc<SessionInfo>> {
        let removed = self.sessions.write().await.remove(id);
        if let Some(ref info) = removed {
            lock(&self.recently_reaped).insert(
                id.to_owned(),
                ReapedEntry { reason: reason.to_owned(), pid: info.session.pid(), reaped_at: Instant::now() },
            );
        }
        removed
    }

    fn purge_expired_reaped(&self) {
        let ttl = self.reaped_ttl;
        lock(&self.recently_reaped).retain(|_, entry| entry.reaped_at.elapsed() < ttl);
    }
}

fn probe_dead(info: &SessionInfo) -> Option<String> {
    if info.session.is_closed() {
        return Some("its socket closed".to_owned());
    }
    if let Some(pid) = info.session.pid() {
        if !info.session.target().is_remote() && !pid_alive(pid) {
            return Some(format!("process {pid} died"));
        }
    }
    None
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
