use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::task_runs;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskRunStatus {
    Pending,
    Running,
    Waiting,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskRunStatus::Pending => "pending",
            TaskRunStatus::Running => "running",
            TaskRunStatus::Waiting => "waiting",
            TaskRunStatus::Completed => "completed",
            TaskRunStatus::Failed => "failed",
            TaskRunStatus::Timeout => "timeout",
            TaskRunStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "running" => TaskRunStatus::Running,
            "waiting" => TaskRunStatus::Waiting,
            "completed" => TaskRunStatus::Completed,
            "failed" => TaskRunStatus::Failed,
            "timeout" => TaskRunStatus::Timeout,
            "cancelled" => TaskRunStatus::Cancelled,
            _ => TaskRunStatus::Pending,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Completed
                | TaskRunStatus::Failed
                | TaskRunStatus::Timeout
                | TaskRunStatus::Cancelled
        )
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskRunStatus::Pending | TaskRunStatus::Running | TaskRunStatus::Waiting
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRef {
    pub output_path: String,
    #[serde(default)]
    pub assets: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt: i32,
    pub error: String,
    #[serde(default)]
    pub error_code: Option<String>,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = task_runs)]
pub struct TaskRunRow {
    pub id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub status: String,
    pub code_version: i32,
    pub code_hash: String,
    pub attempt: i32,
    pub max_retries: i32,
    pub priority: i32,
    pub input_path: String,
    pub output_path: Option<String>,
    pub output_size: Option<i64>,
    pub assets: Option<String>,
    pub logs_path: Option<String>,
    pub upstream_refs: String,
    pub previous_attempts: String,
    pub idempotency_key: Option<String>,
    pub scheduled_for: Option<NaiveDateTime>,
    pub heartbeat_at: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub metadata: String,
    pub created_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub status: TaskRunStatus,
    pub code_version: i32,
    pub code_hash: String,
    pub attempt: i32,
    pub max_retries: i32,
    pub priority: i32,
    pub input_path: String,
    pub output_path: Option<String>,
    pub output_size: Option<i64>,
    pub assets: Option<Value>,
    pub logs_path: Option<String>,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub previous_attempts: Vec<AttemptRecord>,
    pub idempotency_key: Option<String>,
    pub scheduled_for: Option<NaiveDateTime>,
    pub heartbeat_at: Option<NaiveDateTime>,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub error: Option<String>,
    pub error_code: Option<String>,
    pub metadata: Value,
    pub created_at: NaiveDateTime,
}

impl From<TaskRunRow> for TaskRun {
    fn from(row: TaskRunRow) -> Self {
        TaskRun {
            id: row.id,
            task_id: row.task_id,
            pipeline_run_id: row.pipeline_run_id,
            status: TaskRunStatus::parse(&row.status),
            code_version: row.code_version,
            code_hash: row.code_hash,
            attempt: row.attempt,
            max_retries: row.max_retries,
            priority: row.priority,
            input_path: row.input_path,
            output_path: row.output_path,
            output_size: row.output_size,
            assets: row.assets.and_then(|s| serde_json::from_str(&s).ok()),
            logs_path: row.logs_path,
            upstream_refs: super::json_or_default(&row.upstream_refs),
            previous_attempts: super::json_or_default(&row.previous_attempts),
            idempotency_key: row.idempotency_key,
            scheduled_for: row.scheduled_for,
            heartbeat_at: row.heartbeat_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
            error: row.error,
            error_code: row.error_code,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(Value::Null),
            created_at: row.created_at,
        }
    }
}

impl From<TaskRun> for TaskRunRow {
    fn from(r: TaskRun) -> Self {
        TaskRunRow {
            id: r.id,
            task_id: r.task_id,
            pipeline_run_id: r.pipeline_run_id,
            status: r.status.as_str().to_string(),
            code_version: r.code_version,
            code_hash: r.code_hash,
            attempt: r.attempt,
            max_retries: r.max_retries,
            priority: r.priority,
            input_path: r.input_path,
            output_path: r.output_path,
            output_size: r.output_size,
            assets: r.assets.map(|v| v.to_string()),
            logs_path: r.logs_path,
            upstream_refs: serde_json::to_string(&r.upstream_refs).unwrap_or_default(),
            previous_attempts: serde_json::to_string(&r.previous_attempts).unwrap_or_default(),
            idempotency_key: r.idempotency_key,
            scheduled_for: r.scheduled_for,
            heartbeat_at: r.heartbeat_at,
            started_at: r.started_at,
            completed_at: r.completed_at,
            error: r.error,
            error_code: r.error_code,
            metadata: r.metadata.to_string(),
            created_at: r.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_are_exactly_the_documented_set() {
        for s in [
            TaskRunStatus::Completed,
            TaskRunStatus::Failed,
            TaskRunStatus::Timeout,
            TaskRunStatus::Cancelled,
        ] {
            assert!(s.is_terminal());
            assert!(!s.is_active());
        }
        for s in [
            TaskRunStatus::Pending,
            TaskRunStatus::Running,
            TaskRunStatus::Waiting,
        ] {
            assert!(!s.is_terminal());
            assert!(s.is_active());
        }
    }
}
