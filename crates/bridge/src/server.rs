// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Transport serving: newline-delimited JSON-RPC on stdio, or a streamable
//! HTTP endpoint. Shared by `main` and the end-to-end tests.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::{Config, Transport};
use crate::registry::SessionRegistry;
use crate::rpc;

/// Run the bridge until shutdown. Returns once the transport loop ends and
/// every session has been disconnected.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let registry = Arc::new(
        SessionRegistry::new(config.session_timeout()).with_settings(config.channel_settings()?),
    );
    let shutdown = CancellationToken::new();
    let reaper = registry.spawn_reaper(shutdown.clone());

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_shutdown.cancel();
        }
    });

    let result = match config.transport_kind()? {
        Transport::Stdio => serve_stdio(&registry, shutdown.clone()).await,
        Transport::Http => {
            let listener =
                tokio::net::TcpListener::bind((config.host.as_str(), config.port)).await?;
            info!(addr = %listener.local_addr()?, "http transport listening");
            serve_http(listener, Arc::clone(&registry), shutdown.clone()).await
        }
    };

    shutdown.cancel();
    let disconnected = registry.disconnect_all().await;
    if disconnected > 0 {
        info!(disconnected, "sessions closed at shutdown");
    }
    reaper.abort();
    result
}

/// Newline-delimited JSON-RPC on stdin/stdout. Logs must go to stderr in
/// this mode; `main` wires that up.
pub async fn serve_stdio(registry: &Arc<SessionRegistry>, shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    info!("stdio transport ready");
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.cancelled() => return Ok(()),
        };
        let Some(line) = line else {
            info!("stdin closed, exiting");
            return Ok(());
        };
        if let Some(response) = rpc::handle_message(registry, &line).await {
            stdout.write_all(response.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }
}

/// Serve the HTTP transport until shutdown.
pub async fn serve_http(
    listener: tokio::net::TcpListener,
    registry: Arc<SessionRegistry>,
    shutdown: CancellationToken,
) -> anyhow::Result<()> {
    let router = build_router(registry);
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

/// The HTTP surface: `POST /mcp` carries JSON-RPC, `GET /healthz` answers
/// liveness probes.
pub fn build_router(registry: Arc<SessionRegistry>) -> Router {
    Router::new()
        .route("/mcp", post(handle_mcp))
        .route("/healthz", get(handle_health))
        .layer(TraceLayer::new_for_http())
        .with_state(registry)
}

async fn handle_mcp(
    State(registry): State<Arc<SessionRegistry>>,
    body: String,
) -> impl IntoResponse {
    match rpc::handle_message(&registry, &body).await {
        Some(response) => (
            StatusCode::OK,
            [("content-type", "application/json")],
            response,
        )
            .into_response(),
        // Notifications are acknowledged with an empty 202.
        None => StatusCode::ACCEPTED.into_response(),
    }
}

async fn handle_health(State(registry): State<Arc<SessionRegistry>>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ok",
        "server": rpc::SERVER_NAME,
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": registry.session_count().await,
    });
    (StatusCode::OK, [("content-type", "application/json")], body.to_string())
}

/// Fatal-error helper used by `main` so exit paths stay in one place.
pub fn exit_with(e: anyhow::Error) -> ! {
    error!("fatal: {e:#}");
    std::process::exit(1);
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
