//! CLI surface and runtime configuration (§6 "Configuration implementation").
//!
//! `AppConfig` mirrors the donor's clap derive+env usage: every tunable is
//! a `#[arg(long, env = "...")]` field with a typed default matching the
//! design's concrete defaults. `secretKey` is deliberately absent from this
//! struct — it is read straight from the environment in [`AppConfig::secret_key`]
//! so it can never show up in `--help` output, shell history, or `ps`.

use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use pipeweave_core::config::{DispatchMode, LogLevel, OrchestratorConfig};

#[derive(Debug, Parser)]
#[command(name = "pipeweave-server", author, version, about = "HTTP API and dispatcher for Pipeweave pipelines")]
pub struct Cli {
    #[command(flatten)]
    pub config: AppConfig,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Runs the HTTP API and (in continuous mode) the dispatcher loop. Default if omitted.
    Serve,
    /// Database maintenance commands, run out-of-band from the serving process.
    Db {
        #[command(subcommand)]
        action: DbAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum DbAction {
    /// Applies every pending migration for the configured backend.
    Migrate,
    /// Deletes expired idempotency cache rows.
    Cleanup,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum ModeArg {
    Continuous,
    TickDriven,
}

impl From<ModeArg> for DispatchMode {
    fn from(m: ModeArg) -> Self {
        match m {
            ModeArg::Continuous => DispatchMode::Continuous,
            ModeArg::TickDriven => DispatchMode::TickDriven,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum LogLevelArg {
    Minimal,
    Normal,
    Detailed,
}

impl From<LogLevelArg> for LogLevel {
    fn from(l: LogLevelArg) -> Self {
        match l {
            LogLevelArg::Minimal => LogLevel::Minimal,
            LogLevelArg::Normal => LogLevel::Normal,
            LogLevelArg::Detailed => LogLevel::Detailed,
        }
    }
}

#[derive(Debug, Clone, Parser)]
pub struct AppConfig {
    #[arg(long, env = "PIPEWEAVE_DATABASE_URL", default_value = "sqlite://pipeweave.db")]
    pub database_url: String,

    #[arg(long, env = "PIPEWEAVE_MODE", value_enum, default_value_t = ModeArg::Continuous)]
    pub mode: ModeArg,

    #[arg(long, env = "PIPEWEAVE_PORT", default_value_t = 8080)]
    pub port: u16,

    #[arg(long, env = "PIPEWEAVE_MAX_CONCURRENCY", default_value_t = 10)]
    pub max_concurrency: usize,

    #[arg(long, env = "PIPEWEAVE_POLL_INTERVAL_MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[arg(long, env = "PIPEWEAVE_LOG_LEVEL", value_enum, default_value_t = LogLevelArg::Normal)]
    pub log_level: LogLevelArg,

    #[arg(long, env = "PIPEWEAVE_DLQ_RETENTION_DAYS", default_value_t = 30)]
    pub dlq_retention_days: i64,

    #[arg(long, env = "PIPEWEAVE_IDEMPOTENCY_TTL_SEC", default_value_t = 3600)]
    pub default_idempotency_ttl_sec: i64,

    #[arg(long, env = "PIPEWEAVE_MAX_RETRY_DELAY_MS", default_value_t = 60_000)]
    pub default_max_retry_delay_ms: i64,

    /// Request body size limit, bytes, applied by `tower_http::limit::RequestBodyLimitLayer`.
    #[arg(long, env = "PIPEWEAVE_MAX_BODY_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub max_body_bytes: usize,
}

impl AppConfig {
    /// Read only from the environment, never from a CLI flag (§6).
    pub fn secret_key() -> Option<String> {
        std::env::var("PIPEWEAVE_SECRET_KEY").ok()
    }

    pub fn to_orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            database_url: self.database_url.clone(),
            mode: self.mode.into(),
            max_concurrency: self.max_concurrency,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            log_level: self.log_level.into(),
            dlq_retention_days: self.dlq_retention_days,
            default_idempotency_ttl_sec: self.default_idempotency_ttl_sec,
            default_max_retry_delay_ms: self.default_max_retry_delay_ms,
        }
    }
}
