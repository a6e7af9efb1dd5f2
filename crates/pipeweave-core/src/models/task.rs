use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::{task_code_history, tasks};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryBackoff {
    Fixed,
    Exponential,
}

impl RetryBackoff {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetryBackoff::Fixed => "fixed",
            RetryBackoff::Exponential => "exponential",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "exponential" => RetryBackoff::Exponential,
            _ => RetryBackoff::Fixed,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct TaskRow {
    pub id: String,
    pub service_id: String,
    pub code_hash: String,
    pub code_version: i32,
    pub allowed_next: String,
    pub timeout_sec: i32,
    pub max_retries: i32,
    pub retry_backoff: String,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub heartbeat_interval_ms: i64,
    pub concurrency: i32,
    pub priority: i32,
    pub idempotency_ttl_sec: Option<i32>,
    pub description: Option<String>,
}

/// A task definition, as registered by a worker service.
///
/// `codeHash`/`codeVersion` are derived by [`crate::registry::ServiceRegistry`];
/// callers registering a task supply every other field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub service_id: String,
    pub code_hash: String,
    pub code_version: i32,
    pub allowed_next: Vec<String>,
    pub timeout_sec: i32,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub heartbeat_interval_ms: i64,
    pub concurrency: i32,
    pub priority: i32,
    pub idempotency_ttl_sec: Option<i32>,
    pub description: Option<String>,
}

/// The subset of [`Task`] fields that are content-hashed to derive
/// `codeHash` — excludes `id`/`service_id`/`code_hash`/`code_version`,
/// which are either identity or derived, not declared configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TaskConfigFingerprint<'a> {
    pub allowed_next: &'a [String],
    pub timeout_sec: i32,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub heartbeat_interval_ms: i64,
    pub concurrency: i32,
    pub priority: i32,
    pub idempotency_ttl_sec: Option<i32>,
    pub description: &'a Option<String>,
}

impl Task {
    pub fn fingerprint(&self) -> TaskConfigFingerprint<'_> {
        TaskConfigFingerprint {
            allowed_next: &self.allowed_next,
            timeout_sec: self.timeout_sec,
            max_retries: self.max_retries,
            retry_backoff: self.retry_backoff,
            retry_delay_ms: self.retry_delay_ms,
            max_retry_delay_ms: self.max_retry_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            concurrency: self.concurrency,
            priority: self.priority,
            idempotency_ttl_sec: self.idempotency_ttl_sec,
            description: &self.description,
        }
    }
}

impl From<TaskRow> for Task {
    fn from(row: TaskRow) -> Self {
        Task {
            id: row.id,
            service_id: row.service_id,
            code_hash: row.code_hash,
            code_version: row.code_version,
            allowed_next: super::json_or_default(&row.allowed_next),
            timeout_sec: row.timeout_sec,
            max_retries: row.max_retries,
            retry_backoff: RetryBackoff::parse(&row.retry_backoff),
            retry_delay_ms: row.retry_delay_ms,
            max_retry_delay_ms: row.max_retry_delay_ms,
            heartbeat_interval_ms: row.heartbeat_interval_ms,
            concurrency: row.concurrency,
            priority: row.priority,
            idempotency_ttl_sec: row.idempotency_ttl_sec,
            description: row.description,
        }
    }
}

impl From<Task> for TaskRow {
    fn from(t: Task) -> Self {
        TaskRow {
            id: t.id,
            service_id: t.service_id,
            code_hash: t.code_hash,
            code_version: t.code_version,
            allowed_next: serde_json::to_string(&t.allowed_next).unwrap_or_default(),
            timeout_sec: t.timeout_sec,
            max_retries: t.max_retries,
            retry_backoff: t.retry_backoff.as_str().to_string(),
            retry_delay_ms: t.retry_delay_ms,
            max_retry_delay_ms: t.max_retry_delay_ms,
            heartbeat_interval_ms: t.heartbeat_interval_ms,
            concurrency: t.concurrency,
            priority: t.priority,
            idempotency_ttl_sec: t.idempotency_ttl_sec,
            description: t.description,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable)]
#[diesel(table_name = task_code_history)]
pub struct TaskCodeHistoryRow {
    pub id: String,
    pub task_id: String,
    pub code_version: i32,
    pub code_hash: String,
    pub service_version: String,
    pub recorded_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskCodeHistory {
    pub task_id: String,
    pub code_version: i32,
    pub code_hash: String,
    pub service_version: String,
    pub recorded_at: NaiveDateTime,
}

impl From<TaskCodeHistoryRow> for TaskCodeHistory {
    fn from(row: TaskCodeHistoryRow) -> Self {
        TaskCodeHistory {
            task_id: row.task_id,
            code_version: row.code_version,
            code_hash: row.code_hash,
            service_version: row.service_version,
            recorded_at: row.recorded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_backoff_round_trips() {
        assert_eq!(RetryBackoff::parse("fixed").as_str(), "fixed");
        assert_eq!(RetryBackoff::parse("exponential").as_str(), "exponential");
        // unknown values default to fixed rather than panicking.
        assert_eq!(RetryBackoff::parse("bogus").as_str(), "fixed");
    }
}
