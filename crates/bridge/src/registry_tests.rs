// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;
use std::time::Duration;

use crate::test_support::{
    default_greeting, registry_with_mock, scripted_handler, wait_until, MockDebugger, MockReply,
    MockScript, MOCK_PID,
};
use crate::wire::Target;

use super::{ConnectParams, SessionRegistry, DEFAULT_SESSION_TIMEOUT};

async fn mock() -> MockDebugger {
    MockDebugger::start(MockScript::default()).await.expect("mock starts")
}

async fn mock_with_pid(pid: i32) -> MockDebugger {
    let script = MockScript {
        pid,
        greeting: default_greeting(pid),
        handler: crate::test_support::echo_handler(),
    };
    MockDebugger::start(script).await.expect("mock starts")
}

#[tokio::test]
async fn connect_derives_id_from_pid() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");
    assert_eq!(id, format!("rdbg-{MOCK_PID}"));
    assert_eq!(registry.session_count().await, 1);
}

#[tokio::test]
async fn client_resolves_single_session_without_id() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");

    let (resolved, _) = registry.client(None).await.expect("resolves");
    assert_eq!(resolved, id);
    let (resolved, _) = registry.client(Some(&id)).await.expect("resolves");
    assert_eq!(resolved, id);
}

#[tokio::test]
async fn client_with_no_sessions_explains() {
    let registry = SessionRegistry::default();
    let err = registry.client(None).await.expect_err("no sessions");
    assert!(err.to_string().contains("no debug sessions"), "unexpected: {err}");
}

#[tokio::test]
async fn client_with_many_sessions_requires_id() {
    let mock_a = mock_with_pid(100).await;
    let mock_b = mock_with_pid(200).await;
    let registry = Arc::new(SessionRegistry::default());
    registry.connect(mock_a.target(), ConnectParams::default()).await.expect("a");
    registry.connect(mock_b.target(), ConnectParams::default()).await.expect("b");

    let err = registry.client(None).await.expect_err("ambiguous");
    assert!(err.to_string().contains("session_id"), "unexpected: {err}");
    registry.client(Some("rdbg-100")).await.expect("explicit id works");
}

#[tokio::test]
async fn unknown_id_is_a_plain_not_found() {
    let registry = SessionRegistry::default();
    let err = registry.client(Some("rdbg-404")).await.expect_err("not found");
    assert!(err.to_string().contains("not found"), "unexpected: {err}");
}

#[tokio::test]
async fn activity_stamp_is_monotonic() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");
    let (_, info) = registry.client(Some(&id)).await.expect("resolve");

    let before = info.last_activity();
    tokio::time::sleep(Duration::from_millis(20)).await;
    info.touch();
    let after = info.last_activity();
    assert!(after >= before);
}

#[tokio::test]
async fn pre_cleanup_pid_replaces_existing_session() {
    // Connect PID 100, then a second connect arrives with
    // pre_cleanup_pid=100. Exactly one session remains and the old
    // transport is closed.
    let mock_old = mock_with_pid(100).await;
    let registry = Arc::new(SessionRegistry::default());
    let (old_id, old_info) =
        registry.connect(mock_old.target(), ConnectParams::default()).await.expect("old");

    let mock_new = mock_with_pid(100).await;
    let params = ConnectParams { pre_cleanup_pid: Some(100), ..ConnectParams::default() };
    let (new_id, _) = registry.connect(mock_new.target(), params).await.expect("new");

    assert_eq!(registry.session_count().await, 1);
    assert_eq!(new_id, old_id, "canonical per-PID id should collide");
    assert!(
        wait_until(Duration::from_secs(1), || old_info.session.is_closed()).await,
        "old session's transport must be closed"
    );
}

#[tokio::test]
async fn reconnect_to_same_port_replaces_without_hints() {
    let mock_a = mock_with_pid(300).await;
    let registry = Arc::new(SessionRegistry::default());
    registry.connect(mock_a.target(), ConnectParams::default()).await.expect("a");

    // Different PID, same id requested explicitly: rule 3 applies.
    let mock_b = mock_with_pid(301).await;
    let params = ConnectParams { session_id: Some("rdbg-300".to_owned()), ..ConnectParams::default() };
    registry.connect(mock_b.target(), params).await.expect("b");

    assert_eq!(registry.session_count().await, 1);
}

#[tokio::test]
async fn idle_reap_leaves_specific_diagnostic_then_expires() {
    // An idle reap produces "reaped N ago because idle…", and
    // after the TTL the id degrades to a generic not-found.
    let mock = mock().await;
    let registry = Arc::new(
        SessionRegistry::new(Duration::from_millis(80)).with_reaped_ttl(Duration::from_millis(300)),
    );
    let (id, _) = registry.connect(mock.target(), ConnectParams::default()).await.expect("connect");

    tokio::time::sleep(Duration::from_millis(120)).await;
    assert_eq!(registry.reap_once().await, 1);
    assert_eq!(registry.session_count().await, 0);

    let err = registry.client(Some(&id)).await.expect_err("reaped");
    let msg = err.to_string();
    assert!(msg.contains("was reaped"), "unexpected: {msg}");
    assert!(msg.contains("because idle"), "unexpected: {msg}");

    tokio::time::sleep(Duration::from_millis(350)).await;
    registry.cleanup_dead_sessions().await;
    let err = registry.client(Some(&id)).await.expect_err("expired");
    assert!(err.to_string().contains("not found"), "unexpected: {err}");
}

#[tokio::test]
async fn reaper_skips_sessions_with_operations_in_flight() {
    let mock = mock().await;
    let registry = Arc::new(SessionRegistry::new(Duration::from_millis(50)));
    let (id, info) = registry.connect(mock.target(), ConnectParams::default()).await.expect("connect");

    tokio::time::sleep(Duration::from_millis(80)).await;
    {
        let _op = info.session.try_lock_op().expect("lock available");
        assert_eq!(registry.reap_once().await, 0, "must not reap under an active operation");
        assert_eq!(registry.session_count().await, 1);
    }

    assert_eq!(registry.reap_once().await, 1);
    let err = registry.client(Some(&id)).await.expect_err("now reaped");
    assert!(err.to_string().contains("because idle"));
}

#[tokio::test]
async fn dead_socket_is_reaped_with_reason() {
    let mock = mock().await;
    let registry = Arc::new(SessionRegistry::default());
    let (id, info) = registry.connect(mock.target(), ConnectParams::default()).await.expect("connect");

    mock.close();
    assert!(wait_until(Duration::from_secs(1), || info.session.is_closed()).await);

    assert_eq!(registry.cleanup_dead_sessions().await, 1);
    let err = registry.client(Some(&id)).await.expect_err("reaped");
    assert!(err.to_string().contains("socket closed"), "unexpected: {err}");
}

#[tokio::test]
async fn disconnect_removes_and_remembers() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");

    let message = registry.disconnect(Some(&id), true).await.expect("disconnect");
    assert!(message.contains("Disconnected"));
    assert_eq!(registry.session_count().await, 0);

    let err = registry.client(Some(&id)).await.expect_err("gone");
    assert!(err.to_string().contains("disconnected by request"), "unexpected: {err}");
}

#[tokio::test]
async fn ledger_round_trip_and_restore() {
    let registry = Arc::new(SessionRegistry::default());
    registry.record_breakpoint("break app.rb:15");
    registry.record_breakpoint("break app.rb:15"); // dedup
    registry.record_breakpoint("catch RuntimeError");
    assert_eq!(registry.breakpoint_specs().len(), 2);

    assert_eq!(registry.remove_breakpoint_specs_matching("app.rb:15"), 1);
    registry.clear_breakpoint_specs();
    assert!(registry.breakpoint_specs().is_empty());
}

#[tokio::test]
async fn restore_replays_ledger_on_connect() {
    // Breakpoint replay after the target restarts.
    let registry = Arc::new(SessionRegistry::default());
    registry.record_breakpoint("break app/users_controller.rb:15");

    let script = MockScript::with_handler(scripted_handler(vec![(
        "break ",
        MockReply::with_prompt(&["#0  BP - Line  app/users_controller.rb:15 (line)"]),
    )]));
    let mock = MockDebugger::start(script).await.expect("mock starts");
    let params = ConnectParams { restore_breakpoints: true, ..ConnectParams::default() };
    let (_, info) = registry.connect(mock.target(), params).await.expect("connect");

    assert_eq!(mock.count_received("break app/users_controller.rb:15"), 1);
    assert!(info.owned_breakpoints().contains("break app/users_controller.rb:15"));
}

#[tokio::test]
async fn restore_after_clear_is_a_no_op() {
    let registry = Arc::new(SessionRegistry::default());
    registry.record_breakpoint("break app.rb:1");
    registry.clear_breakpoint_specs();

    let mock = mock().await;
    let params = ConnectParams { restore_breakpoints: true, ..ConnectParams::default() };
    let (_, _) = registry.connect(mock.target(), params).await.expect("connect");

    assert_eq!(mock.count_received("break "), 0);
}

#[tokio::test]
async fn restore_collects_failures_without_aborting() {
    let registry = Arc::new(SessionRegistry::default());
    registry.record_breakpoint("break vanished.rb:1");
    registry.record_breakpoint("break still_here.rb:2");

    let script = MockScript::with_handler(scripted_handler(vec![
        ("break vanished.rb", MockReply::with_prompt(&["file not found"])),
        ("break still_here.rb", MockReply::with_prompt(&["#1  BP - Line  still_here.rb:2 (line)"])),
    ]));
    let mock = MockDebugger::start(script).await.expect("mock starts");
    let (_, info) = registry.connect(mock.target(), ConnectParams::default()).await.expect("connect");

    let outcomes = registry.restore_breakpoints(&info).await;
    assert_eq!(outcomes.len(), 2);
    // Both replays were attempted even though the first got no number.
    assert_eq!(mock.count_received("break vanished.rb:1"), 1);
    assert_eq!(mock.count_received("break still_here.rb:2"), 1);
}

#[tokio::test]
async fn warning_acknowledgement_is_per_session() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");

    assert!(registry.acknowledged_warnings(Some(&id)).await.expect("set").is_empty());
    registry.acknowledge_warning(Some(&id), "destructive_db").await.expect("ack");
    let acks = registry.acknowledged_warnings(Some(&id)).await.expect("set");
    assert_eq!(acks.len(), 1);

    let err = registry.acknowledge_warning(Some(&id), "bogus").await.expect_err("unknown");
    assert!(err.to_string().contains("unknown warning category"));
}

#[tokio::test]
async fn active_sessions_snapshot_includes_state() {
    let mock = mock().await;
    let (registry, id) =
        registry_with_mock(&mock, DEFAULT_SESSION_TIMEOUT).await.expect("connect");

    let rows = registry.active_sessions().await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].id, id);
    assert!(rows[0].status.paused);
    assert_eq!(rows[0].status.pid, Some(MOCK_PID));
}

#[tokio::test]
async fn connect_to_unreachable_target_fails_cleanly() {
    let registry = SessionRegistry::default();
    let target = Target::Tcp { host: "127.0.0.1".to_owned(), port: 1 };
    let err = registry.connect(target, ConnectParams::default()).await.expect_err("refused");
    assert!(err.is_connection() || err.is_timeout(), "unexpected: {err:?}");
    assert_eq!(registry.session_count().await, 0);
}
