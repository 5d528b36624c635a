// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! MCP message handling: JSON-RPC 2.0 framing over whichever transport the
//! server module provides. One request in, at most one response out;
//! notifications produce nothing.

use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::registry::SessionRegistry;
use crate::tools;

/// MCP protocol revision this bridge speaks.
pub const PROTOCOL_VERSION: &str = "2025-06-18";

pub const SERVER_NAME: &str = "rdbg-bridge";

const PARSE_ERROR: i64 = -32700;
const INVALID_REQUEST: i64 = -32600;
const METHOD_NOT_FOUND: i64 = -32601;
const INVALID_PARAMS: i64 = -32602;

#[derive(Debug, Serialize)]
struct RpcError {
    code: i64,
    message: String,
}

#[derive(Debug, Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
}

impl RpcResponse {
    fn result(id: Value, result: Value) -> Self {
        Self { jsonrpc: "2.0", id, result: Some(result), error: None }
    }

    fn error(id: Value, code: i64, message: impl Into<String>) -> Self {
        Self { jsonrpc: "2.0", id, result: None, error: Some(RpcError { code, message: message.into() }) }
    }

    fn render(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"serialization failed"}}"#.to_owned()
        })
    }
}

/// Handle one raw inbound message. Returns the response to send, or `None`
/// for notifications and ignorable traffic.
pub async fn handle_message(registry: &Arc<SessionRegistry>, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let message: Value = match serde_json::from_str(raw) {
        Ok(v) => v,
        Err(e) => {
            warn!(err = %e, "unparseable message");
            return Some(RpcResponse::error(Value::Null, PARSE_ERROR, "parse error").render());
        }
    };

    let id = message.get("id").cloned();
    let Some(method) = message.get("method").and_then(Value::as_str) else {
        // A response from the peer or garbage; either way, nothing to do.
        return id.map(|id| RpcResponse::error(id, INVALID_REQUEST, "missing method").render());
    };
    let params = message.get("params").cloned().unwrap_or(Value::Null);

    // Notifications get no response.
    let Some(id) = id else {
        debug!(method, "notification received");
        return None;
    };

    debug!(method, "request received");
    let response = match method {
        "initialize" => RpcResponse::result(
            id,
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION"),
                },
            }),
        ),
        "ping" => RpcResponse::result(id, json!({})),
        "tools/list" => {
            let tools: Vec<Value> = tools::definitions()
                .iter()
                .map(|def| {
                    json!({
                        "name": def.name,
                        "description": def.description,
                        "inputSchema": def.input_schema,
                    })
                })
                .collect();
            RpcResponse::result(id, json!({ "tools": tools }))
        }
        "tools/call" => {
            let Some(name) = params.get("name").and_then(Value::as_str) else {
                return Some(RpcResponse::error(id, INVALID_PARAMS, "tools/call needs a name").render());
            };
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));
            let text = tools::dispatch(registry, name, &arguments).await;
            let is_error = text.starts_with("Error:");
            RpcResponse::result(
                id,
                json!({
                    "content": [{ "type": "text", "text": text }],
                    "isError": is_error,
                }),
            )
        }
        other => RpcResponse::error(id, METHOD_NOT_FOUND, format!("method '{other}' not supported")),
    };
    Some(response.render())
}

#[cfg(test)]
#[path = "rpc_tests.rs"]
mod tests;
