// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::Parser;

use crate::channel::ChannelSettings;

/// MCP bridge for the Ruby rdbg debugger.
#[derive(Debug, Parser)]
#[command(name = "rdbg-bridge", version, about)]
pub struct Config {
    /// RPC transport to serve (stdio or http).
    #[arg(long, env = "RDBG_BRIDGE_TRANSPORT", default_value = "stdio")]
    pub transport: String,

    /// Port for the http transport.
    #[arg(long, env = "RDBG_BRIDGE_PORT", default_value = "3773")]
    pub port: u16,

    /// Host address for the http transport.
    #[arg(long, env = "RDBG_BRIDGE_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Idle session timeout in seconds.
    #[arg(long, env = "RDBG_BRIDGE_SESSION_TIMEOUT", default_value = "1800")]
    pub session_timeout: u64,

    /// Prompt sentinel override (regex); the default accepts `(rdbg)` and
    /// its versioned variants.
    #[arg(long, env = "RDBG_BRIDGE_PROMPT_PATTERN")]
    pub prompt_pattern: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "RDBG_BRIDGE_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "RDBG_BRIDGE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

/// Supported RPC transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Stdio,
    Http,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.transport_kind()?;
        if self.session_timeout == 0 {
            anyhow::bail!("--session-timeout must be positive");
        }
        if let Some(ref pattern) = self.prompt_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("invalid --prompt-pattern: {e}"))?;
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other} (expected json or text)"),
        }
        Ok(())
    }

    pub fn transport_kind(&self) -> anyhow::Result<Transport> {
        match self.transport.to_lowercase().as_str() {
            "stdio" => Ok(Transport::Stdio),
            "http" => Ok(Transport::Http),
            other => anyhow::bail!("invalid transport: {other} (expected stdio or http)"),
        }
    }

    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout)
    }

    pub fn channel_settings(&self) -> anyhow::Result<ChannelSettings> {
        let mut settings = ChannelSettings::default();
        if let Some(ref pattern) = self.prompt_pattern {
            regex::Regex::new(pattern)
                .map_err(|e| anyhow::anyhow!("invalid --prompt-pattern: {e}"))?;
            settings.prompt_pattern = pattern.clone();
        }
        Ok(settings)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
