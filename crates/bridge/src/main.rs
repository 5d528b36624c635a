// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rdbg_bridge::config::{Config, Transport};

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match rdbg_bridge::server::run(config).await {
        Ok(()) => std::process::exit(0),
        Err(e) => rdbg_bridge::server::exit_with(e),
    }
}

/// Initialize the subscriber. Under the stdio transport the protocol owns
/// stdout, so logs always go to stderr.
fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let stdio = matches!(config.transport_kind(), Ok(Transport::Stdio));

    let result = match (config.log_format.as_str(), stdio) {
        ("json", _) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .try_init(),
        (_, true) => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init(),
        _ => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };
    if let Err(e) = result {
        eprintln!("warning: tracing init failed: {e}");
    }
}
