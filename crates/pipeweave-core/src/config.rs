//! Orchestrator configuration (§6 "Environment / configuration").
//!
//! Follows the donor's `DefaultRunnerConfig`/builder split: a plain data
//! struct holding every tunable, a fluent builder for overriding only what
//! the caller cares about, and a `Default` impl carrying the spec's
//! concrete defaults.

use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchMode {
    /// Background loop ticks on its own timer.
    Continuous,
    /// Loop body only runs when `POST /api/tick` is called.
    TickDriven,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Minimal,
    Normal,
    Detailed,
}

impl LogLevel {
    /// The `tracing_subscriber::EnvFilter` directive this level maps to.
    pub fn as_filter_directive(&self) -> &'static str {
        match self {
            LogLevel::Minimal => "warn",
            LogLevel::Normal => "info",
            LogLevel::Detailed => "debug",
        }
    }
}

/// Tunables for a running orchestrator instance.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub database_url: String,
    pub mode: DispatchMode,
    pub max_concurrency: usize,
    pub poll_interval: Duration,
    pub log_level: LogLevel,
    pub dlq_retention_days: i64,
    pub default_idempotency_ttl_sec: i64,
    pub default_max_retry_delay_ms: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        OrchestratorConfig {
            database_url: "sqlite://pipeweave.db".to_string(),
            mode: DispatchMode::Continuous,
            max_concurrency: 10,
            poll_interval: Duration::from_secs(1),
            log_level: LogLevel::Normal,
            dlq_retention_days: 30,
            default_idempotency_ttl_sec: 3600,
            default_max_retry_delay_ms: 60_000,
        }
    }
}

/// Fluent builder for [`OrchestratorConfig`]; every setter takes/returns
/// `self` by value so calls chain without an intermediate binding.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfigBuilder {
    config: OrchestratorConfig,
}

impl OrchestratorConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database_url(mut self, url: impl Into<String>) -> Self {
        self.config.database_url = url.into();
        self
    }

    pub fn mode(mut self, mode: DispatchMode) -> Self {
        self.config.mode = mode;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    pub fn poll_interval(mut self, d: Duration) -> Self {
        self.config.poll_interval = d;
        self
    }

    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.config.log_level = level;
        self
    }

    pub fn dlq_retention_days(mut self, days: i64) -> Self {
        self.config.dlq_retention_days = days;
        self
    }

    pub fn default_idempotency_ttl_sec(mut self, ttl: i64) -> Self {
        self.config.default_idempotency_ttl_sec = ttl;
        self
    }

    pub fn default_max_retry_delay_ms(mut self, ms: i64) -> Self {
        self.config.default_max_retry_delay_ms = ms;
        self
    }

    pub fn build(self) -> OrchestratorConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = OrchestratorConfig::default();
        assert_eq!(cfg.mode, DispatchMode::Continuous);
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.dlq_retention_days, 30);
    }

    #[test]
    fn builder_overrides_only_what_is_set() {
        let cfg = OrchestratorConfigBuilder::new()
            .max_concurrency(50)
            .build();
        assert_eq!(cfg.max_concurrency, 50);
        assert_eq!(cfg.dlq_retention_days, 30); // untouched default
    }
}
