// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use axum_test::TestServer;
use serde_json::Value;

use crate::registry::SessionRegistry;

use super::build_router;

fn server() -> TestServer {
    let registry = Arc::new(SessionRegistry::default());
    TestServer::new(build_router(registry)).expect("router builds")
}

#[tokio::test]
async fn health_endpoint_reports_session_count() {
    let server = server();
    let response = server.get("/healthz").await;
    response.assert_status_ok();

    let body: Value = serde_json::from_str(&response.text()).expect("json");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["server"], "rdbg-bridge");
    assert_eq!(body["sessions"], 0);
}

#[tokio::test]
async fn mcp_endpoint_answers_initialize() {
    let server = server();
    let response = server
        .post("/mcp")
        .text(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
        .await;
    response.assert_status_ok();

    let body: Value = serde_json::from_str(&response.text()).expect("json");
    assert_eq!(body["result"]["serverInfo"]["name"], "rdbg-bridge");
}

#[tokio::test]
async fn mcp_notifications_return_accepted() {
    let server = server();
    let response = server
        .post("/mcp")
        .text(r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#)
        .await;
    assert_eq!(response.status_code(), 202);
}

#[tokio::test]
async fn mcp_tools_flow_over_http() {
    let server = server();
    let response = server
        .post("/mcp")
        .text(r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"list_debug_sessions","arguments":{}}}"#)
        .await;
    response.assert_status_ok();

    let body: Value = serde_json::from_str(&response.text()).expect("json");
    let text = body["result"]["content"][0]["text"].as_str().expect("text");
    assert!(text.contains("No active sessions"), "unexpected: {text}");
}
