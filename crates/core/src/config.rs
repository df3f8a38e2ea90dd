// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Session-runtime configuration for the `mitto` binary.
///
/// Fields mirror the ambient concerns named in the spec's External
/// Interfaces section (session directory root, queue defaults, advanced
/// settings) plus the transport/host settings needed to stand up the
/// minimal WebSocket surface. The HTTP router, auth, and TLS this config
/// would otherwise feed are external collaborators and out of scope here.
#[derive(Debug, Parser)]
#[command(name = "mitto", version, about)]
pub struct Config {
    /// HTTP/WebSocket port to listen on.
    #[arg(long, env = "MITTO_PORT", default_value = "8787")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "MITTO_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Root directory under which per-session directories are created.
    #[arg(long, env = "MITTO_DATA_DIR")]
    pub data_dir: PathBuf,

    /// Bearer token for WebSocket authentication. Unset disables auth
    /// (development only).
    #[arg(long, env = "MITTO_AUTH_TOKEN")]
    pub auth_token: Option<String>,

    /// Default agent command to spawn for new sessions, e.g. `claude-code
    /// --acp`. Individual sessions may override this binding.
    #[arg(long, env = "MITTO_AGENT_COMMAND")]
    pub agent_command: Option<String>,

    /// Seconds the archive path waits for an in-flight prompt to complete
    /// before force-closing (§4.5 `CloseSessionGracefully`, §4.4 archive).
    #[arg(long, env = "MITTO_ARCHIVE_TIMEOUT_SECS", default_value = "30")]
    pub archive_timeout_secs: u64,

    /// ACP handshake timeout in seconds.
    #[arg(long, env = "MITTO_HANDSHAKE_TIMEOUT_SECS", default_value = "10")]
    pub handshake_timeout_secs: u64,

    /// Lock heartbeat interval in seconds.
    #[arg(long, env = "MITTO_LOCK_HEARTBEAT_SECS", default_value = "10")]
    pub lock_heartbeat_secs: u64,

    /// Lock staleness threshold in seconds (heartbeat older than this AND
    /// owning pid dead ⇒ stealable).
    #[arg(long, env = "MITTO_LOCK_STALE_SECS", default_value = "30")]
    pub lock_stale_secs: u64,

    /// MarkdownBuffer inactivity flush timeout in milliseconds.
    #[arg(long, env = "MITTO_MARKDOWN_FLUSH_MS", default_value = "200")]
    pub markdown_flush_ms: u64,

    /// Per-observer outbound send queue capacity before the link is dropped.
    #[arg(long, env = "MITTO_OBSERVER_QUEUE_SIZE", default_value = "256")]
    pub observer_queue_size: usize,

    /// Whether the workspace message queue is enabled by default.
    #[arg(long, env = "MITTO_QUEUE_ENABLED", default_value = "true")]
    pub queue_enabled: bool,

    /// Seconds after a session goes idle before the queue worker drains
    /// the next entry.
    #[arg(long, env = "MITTO_QUEUE_DELAY_SECS", default_value = "5")]
    pub queue_delay_secs: u64,

    /// Maximum entries retained per workspace queue.
    #[arg(long, env = "MITTO_QUEUE_MAX_SIZE", default_value = "50")]
    pub queue_max_size: usize,

    /// Log format (json or text).
    #[arg(long, env = "MITTO_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "MITTO_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.archive_timeout_secs == 0 {
            anyhow::bail!("--archive-timeout-secs must be greater than zero");
        }
        if self.handshake_timeout_secs == 0 {
            anyhow::bail!("--handshake-timeout-secs must be greater than zero");
        }
        if self.lock_stale_secs <= self.lock_heartbeat_secs {
            anyhow::bail!(
                "--lock-stale-secs ({}) must exceed --lock-heartbeat-secs ({})",
                self.lock_stale_secs,
                self.lock_heartbeat_secs
            );
        }
        if !matches!(self.log_format.as_str(), "json" | "text") {
            anyhow::bail!("--log-format must be 'json' or 'text'");
        }
        Ok(())
    }

    pub fn archive_timeout(&self) -> Duration {
        Duration::from_secs(self.archive_timeout_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn lock_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.lock_heartbeat_secs)
    }

    pub fn lock_stale_threshold(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }

    pub fn markdown_flush_timeout(&self) -> Duration {
        Duration::from_millis(self.markdown_flush_ms)
    }
}

/// Workspace-global queue configuration (§6 "Queue configuration").
///
/// Distinct from [`Config`]: this is per-workspace mutable state a caller
/// can update at runtime, whereas `Config` is the process-wide startup
/// configuration. Seeded from `Config`'s queue defaults.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    pub enabled: bool,
    pub delay_seconds: u64,
    pub max_size: usize,
    pub auto_generate_titles: bool,
}

impl QueueConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            enabled: config.queue_enabled,
            delay_seconds: config.queue_delay_secs,
            max_size: config.queue_max_size,
            auto_generate_titles: false,
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
