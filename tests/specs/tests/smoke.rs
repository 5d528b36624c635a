// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `rdbg-bridge` binary and
//! exercise both RPC transports.

use std::time::Duration;

use rdbg_bridge_specs::{free_port, start_http, wait_healthy, BridgeProcess};

#[tokio::test]
async fn stdio_initialize_and_tool_listing() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start_stdio()?;

    let init = bridge.request("initialize", serde_json::json!({})).await?;
    assert_eq!(init["result"]["serverInfo"]["name"], "rdbg-bridge");
    assert!(init["result"]["capabilities"]["tools"].is_object());

    let tools = bridge.request("tools/list", serde_json::json!({})).await?;
    let names: Vec<&str> = tools["result"]["tools"]
        .as_array()
        .map(|a| a.iter().filter_map(|t| t["name"].as_str()).collect())
        .unwrap_or_default();
    assert!(names.contains(&"connect"), "missing connect in {names:?}");
    assert!(names.contains(&"evaluate_code"), "missing evaluate_code in {names:?}");

    bridge.shutdown().await
}

#[tokio::test]
async fn stdio_tool_errors_stay_in_band() -> anyhow::Result<()> {
    let mut bridge = BridgeProcess::start_stdio()?;

    let text = bridge.call_tool("get_context", serde_json::json!({})).await?;
    assert!(text.starts_with("Error:"), "unexpected: {text}");

    bridge.shutdown().await
}

#[tokio::test]
async fn http_health_and_initialize() -> anyhow::Result<()> {
    let port = free_port()?;
    let _child = start_http(port)?;
    wait_healthy(port, Duration::from_secs(10)).await?;

    let client = reqwest::Client::new();
    let response: serde_json::Value = client
        .post(format!("http://127.0.0.1:{port}/mcp"))
        .body(r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#)
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(response["result"]["serverInfo"]["name"], "rdbg-bridge");

    let health: serde_json::Value =
        reqwest::get(format!("http://127.0.0.1:{port}/healthz")).await?.json().await?;
    assert_eq!(health["sessions"], 0);
    Ok(())
}
