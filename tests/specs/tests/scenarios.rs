// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios for the session-coordination layer, driven
//! through the public tool surface against a scripted debugger endpoint.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use rdbg_bridge::channel::ChannelSettings;
use rdbg_bridge::registry::SessionRegistry;
use rdbg_bridge::test_support::{
    scripted_handler, stop_lines, wait_until, MockDebugger, MockHandler, MockReply, MockScript,
    MOCK_PID,
};
use rdbg_bridge::tools::dispatch;

fn fast_settings() -> ChannelSettings {
    ChannelSettings {
        default_timeout: Duration::from_secs(2),
        continue_timeout: Duration::from_millis(500),
        ..ChannelSettings::default()
    }
}

fn fast_registry() -> Arc<SessionRegistry> {
    Arc::new(SessionRegistry::default().with_settings(fast_settings()))
}

async fn connect(registry: &Arc<SessionRegistry>, mock: &MockDebugger) -> String {
    let out = dispatch(registry, "connect", &json!({ "port": mock.target().port() })).await;
    assert!(out.contains("Connected"), "connect failed: {out}");
    format!("rdbg-{MOCK_PID}")
}

/// An HTTP listener that accepts connections and never answers; the stream
/// is parked so the request stays in flight.
async fn hanging_http_server() -> anyhow::Result<u16> {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        let mut parked = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            parked.push(stream);
        }
    });
    Ok(port)
}

async fn responding_http_server(body: &'static str) -> anyhow::Result<u16> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let mut buf = vec![0u8; 1024];
            let _ = stream.read(&mut buf).await;
            let response = format!(
                "HTTP/1.1 200 OK\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = stream.write_all(response.as_bytes()).await;
        }
    });
    Ok(port)
}

// -- Scenario: stale-pause regression ----------------------------------------

#[tokio::test]
async fn disconnect_of_a_running_target_emits_exactly_one_pause() -> anyhow::Result<()> {
    let registry = fast_registry();
    let mock = Arc::new(
        MockDebugger::start(MockScript::with_handler(scripted_handler(vec![
            ("config set width", MockReply::with_prompt(&["nil"])),
            ("pause", MockReply::silent()),
            ("c", MockReply::running(&[])),
        ])))
        .await?,
    );
    connect(&registry, &mock).await;

    // Resume; no stop lands, so the target is now running free.
    let out = dispatch(&registry, "continue_execution", &json!({})).await;
    assert!(out.contains("still running"), "unexpected: {out}");

    // Land the stop once the disconnect path has sent its single pause.
    let observer = Arc::clone(&mock);
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || {
            observer.count_received(&format!("pause {MOCK_PID}")) == 1
        })
        .await;
        observer.inject(stop_lines(0, "app.rb", 1));
    });

    let out = dispatch(&registry, "disconnect", &json!({})).await;
    assert!(out.contains("Disconnected"), "unexpected: {out}");
    assert!(!out.contains("WARNING"), "cleanup should have succeeded: {out}");

    // The stale-pause invariant: one repause cycle, one pause message.
    assert_eq!(
        mock.count_received(&format!("pause {MOCK_PID}")),
        1,
        "pause messages leaked: {:?}",
        mock.received()
    );
    Ok(())
}

#[tokio::test]
async fn continue_after_pause_hits_a_real_breakpoint() -> anyhow::Result<()> {
    let registry = fast_registry();
    let mock = Arc::new(
        MockDebugger::start(MockScript::with_handler(scripted_handler(vec![
            ("config set width", MockReply::with_prompt(&["nil"])),
            ("break ", MockReply::with_prompt(&["#5  BP - Line  app.rb:9 (line)"])),
            ("c", MockReply::running(&[])),
        ])))
        .await?,
    );
    connect(&registry, &mock).await;

    let out = dispatch(&registry, "set_breakpoint", &json!({ "location": "app.rb:9" })).await;
    assert!(out.contains("Breakpoint #5"), "unexpected: {out}");

    let observer = Arc::clone(&mock);
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || observer.received().iter().any(|l| l == "c")).await;
        observer.inject(stop_lines(5, "app.rb", 9));
    });

    let out = dispatch(&registry, "continue_execution", &json!({})).await;
    assert!(out.contains("Stopped"), "unexpected: {out}");
    assert!(out.contains("Stop by #5"), "not a real breakpoint hit: {out}");
    Ok(())
}

// -- Scenario: evaluate semantics --------------------------------------------

#[tokio::test]
async fn evaluate_reports_value_and_captured_stdout() -> anyhow::Result<()> {
    let registry = fast_registry();
    let mock = MockDebugger::start(MockScript::with_handler(scripted_handler(vec![
        ("begin; $__bridge_prev_out", MockReply::with_prompt(&["42"])),
        ("pp $__bridge_captured", MockReply::with_prompt(&["\"debug info\\n\""])),
        ("pp($__bridge_error", MockReply::with_prompt(&["nil"])),
    ])))
    .await?;
    connect(&registry, &mock).await;

    let out =
        dispatch(&registry, "evaluate_code", &json!({ "code": "puts 'debug info'; 42" })).await;
    assert!(out.contains("42"), "missing value: {out}");
    assert!(out.contains("debug info"), "missing stdout: {out}");
    Ok(())
}

#[tokio::test]
async fn evaluate_pp_output_is_deduplicated() -> anyhow::Result<()> {
    let registry = fast_registry();
    let mock = MockDebugger::start(MockScript::with_handler(scripted_handler(vec![
        ("begin; $__bridge_prev_out", MockReply::with_prompt(&["5"])),
        ("pp $__bridge_captured", MockReply::with_prompt(&["\"5\\n\""])),
        ("pp($__bridge_error", MockReply::with_prompt(&["nil"])),
    ])))
    .await?;
    connect(&registry, &mock).await;

    let out = dispatch(&registry, "evaluate_code", &json!({ "code": "pp(5)" })).await;
    assert_eq!(out.matches('5').count(), 1, "pp value duplicated: {out}");
    Ok(())
}

// -- Scenario: breakpoint replay after the target dies -----------------------

#[tokio::test]
async fn breakpoints_replay_across_a_target_restart() -> anyhow::Result<()> {
    let rules = || {
        scripted_handler(vec![
            ("break ", MockReply::with_prompt(&["#0  BP - Line  app/users_controller.rb:15 (line)"])),
            (
                "info breakpoints",
                MockReply::with_prompt(&["#0  BP - Line  app/users_controller.rb:15 (line)"]),
            ),
        ])
    };
    let registry = fast_registry();

    let first = MockDebugger::start(MockScript::with_handler(rules())).await?;
    connect(&registry, &first).await;
    dispatch(&registry, "set_breakpoint", &json!({ "location": "app/users_controller.rb:15" }))
        .await;

    // The target exits; the dead session is reaped.
    first.close();
    let (_, info) = registry.client(None).await?;
    assert!(wait_until(Duration::from_secs(2), || info.session.is_closed()).await);
    drop(info);
    registry.cleanup_dead_sessions().await;

    // Reconnect with replay: exactly one breakpoint comes back.
    let second = MockDebugger::start(MockScript::with_handler(rules())).await?;
    let out = dispatch(
        &registry,
        "connect",
        &json!({ "port": second.target().port(), "restore_breakpoints": true }),
    )
    .await;
    assert!(out.contains("Connected"), "unexpected: {out}");
    assert_eq!(second.count_received("break app/users_controller.rb:15"), 1);

    let listing =
        dispatch(&registry, "run_debug_command", &json!({ "command": "info breakpoints" })).await;
    assert_eq!(listing.matches("users_controller.rb:15").count(), 1, "unexpected: {listing}");
    Ok(())
}

// -- Scenario: idle reap diagnostics -----------------------------------------

#[tokio::test]
async fn reaped_session_ids_explain_themselves_at_the_tool_boundary() -> anyhow::Result<()> {
    let registry = Arc::new(
        SessionRegistry::new(Duration::from_millis(60))
            .with_reaped_ttl(Duration::from_millis(250))
            .with_settings(fast_settings()),
    );
    let mock = MockDebugger::start(MockScript::default()).await?;
    let id = connect(&registry, &mock).await;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(registry.reap_once().await, 1);

    let out = dispatch(&registry, "get_context", &json!({ "session_id": id })).await;
    assert!(out.starts_with("Error:"), "unexpected: {out}");
    assert!(out.contains("was reaped"), "unexpected: {out}");
    assert!(out.contains("because idle"), "unexpected: {out}");

    tokio::time::sleep(Duration::from_millis(300)).await;
    registry.cleanup_dead_sessions().await;
    let out = dispatch(&registry, "get_context", &json!({ "session_id": "rdbg-12345" })).await;
    assert!(out.contains("not found"), "unexpected: {out}");
    Ok(())
}

// -- Scenario: pre-connect PID collision -------------------------------------

#[tokio::test]
async fn second_connect_with_pre_cleanup_pid_replaces_the_first() -> anyhow::Result<()> {
    let registry = fast_registry();
    let first = MockDebugger::start(MockScript::default()).await?;
    connect(&registry, &first).await;
    let (_, old_info) = registry.client(None).await?;
    let old_session = Arc::clone(&old_info.session);
    drop(old_info);

    let second = MockDebugger::start(MockScript::default()).await?;
    let out = dispatch(
        &registry,
        "connect",
        &json!({ "port": second.target().port(), "pre_cleanup_pid": MOCK_PID }),
    )
    .await;
    assert!(out.contains("Connected"), "unexpected: {out}");

    assert_eq!(registry.session_count().await, 1);
    assert!(
        wait_until(Duration::from_secs(2), || old_session.is_closed()).await,
        "old transport must be closed"
    );
    Ok(())
}

// -- Scenario: trap-context escape -------------------------------------------

#[tokio::test]
async fn connect_escapes_a_trap_context_via_the_dispatch_path() -> anyhow::Result<()> {
    let app_port = hanging_http_server().await?;
    let handler: MockHandler = Arc::new(move |cmd: &str| {
        if cmd.starts_with("pp ObjectSpace") {
            return MockReply { lines: vec![cmd.to_owned(), format!("[{app_port}]")], prompt: true };
        }
        if cmd.starts_with("pp(defined?(ActionController") {
            return MockReply {
                lines: vec![cmd.to_owned(), "\"ActionController::Metal#dispatch\"".to_owned()],
                prompt: true,
            };
        }
        if cmd.starts_with("break ") {
            return MockReply {
                lines: vec![cmd.to_owned(), "#9  BP - Method  ActionController::Metal#dispatch".to_owned()],
                prompt: true,
            };
        }
        if cmd == "c" {
            return MockReply::running(&[]);
        }
        MockReply { lines: vec![cmd.to_owned(), "nil".to_owned()], prompt: true }
    });

    let mut script = MockScript::with_handler(handler);
    // Stop inside a signal handler: the frame summary marks the trap.
    script.greeting = vec![
        "DEBUGGER: wait for client connection at /tmp/rdbg-mock".to_owned(),
        format!("DEBUGGER: Connected. (ruby:{MOCK_PID})"),
        "=>#0  block in trap_handler at config/boot.rb:10".to_owned(),
        "(rdbg)".to_owned(),
    ];
    let mock = Arc::new(MockDebugger::start(script).await?);

    // The dispatch breakpoint "fires" once the bridge resumes the target.
    let observer = Arc::clone(&mock);
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || observer.received().iter().any(|l| l == "c")).await;
        observer.inject(stop_lines(9, "action_controller.rb", 120));
    });

    let registry = fast_registry();
    let out = dispatch(
        &registry,
        "connect",
        &json!({ "port": mock.target().port(), "auto_trap_escape": true }),
    )
    .await;
    assert!(out.contains("Connected"), "unexpected: {out}");
    assert!(
        !out.contains("signal trap handler"),
        "trap warning should be gone after a successful escape: {out}"
    );

    let (_, info) = registry.client(None).await?;
    assert!(!info.session.status().trap_context, "trap context must be cleared");
    assert!(mock.received().iter().any(|l| l.starts_with("break ActionController")), "no dispatch breakpoint set");
    Ok(())
}

// -- Scenario: HTTP trigger --------------------------------------------------

#[tokio::test]
async fn trigger_request_reports_a_breakpoint_hit() -> anyhow::Result<()> {
    let app_port = hanging_http_server().await?;
    let handler: MockHandler = Arc::new(move |cmd: &str| {
        if cmd.starts_with("pp ObjectSpace") {
            return MockReply { lines: vec![cmd.to_owned(), format!("[{app_port}]")], prompt: true };
        }
        if cmd == "c" {
            return MockReply::running(&[]);
        }
        MockReply { lines: vec![cmd.to_owned(), "nil".to_owned()], prompt: true }
    });
    let mock = Arc::new(MockDebugger::start(MockScript::with_handler(handler)).await?);

    let observer = Arc::clone(&mock);
    tokio::spawn(async move {
        wait_until(Duration::from_secs(5), || observer.received().iter().any(|l| l == "c")).await;
        observer.inject(stop_lines(3, "app/users_controller.rb", 15));
    });

    let registry = fast_registry();
    connect(&registry, &mock).await;
    let out = dispatch(&registry, "trigger_request", &json!({ "path": "/users" })).await;
    assert!(out.contains("hit a stop"), "unexpected: {out}");
    assert!(out.contains("Stop by #3"), "unexpected: {out}");
    Ok(())
}

#[tokio::test]
async fn trigger_request_reports_a_completed_response() -> anyhow::Result<()> {
    let app_port = responding_http_server("{\"users\":[]}").await?;
    let handler: MockHandler = Arc::new(move |cmd: &str| {
        if cmd.starts_with("pp ObjectSpace") {
            return MockReply { lines: vec![cmd.to_owned(), format!("[{app_port}]")], prompt: true };
        }
        if cmd == "c" {
            return MockReply::running(&[]);
        }
        MockReply { lines: vec![cmd.to_owned(), "nil".to_owned()], prompt: true }
    });
    let mock = MockDebugger::start(MockScript::with_handler(handler)).await?;

    let registry = fast_registry();
    connect(&registry, &mock).await;
    let out = dispatch(&registry, "trigger_request", &json!({ "path": "/users" })).await;
    assert!(out.contains("completed without hitting a breakpoint"), "unexpected: {out}");
    assert!(out.contains("200"), "unexpected: {out}");
    Ok(())
}
