use axum::extract::State;
use axum::Json;
use pipeweave_core::models::RetryBackoff;
use pipeweave_core::registry::TaskRegistration;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/register", axum::routing::post(register))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterTaskBody {
    id: String,
    #[serde(default)]
    allowed_next: Vec<String>,
    timeout_sec: i32,
    #[serde(default)]
    max_retries: i32,
    #[serde(default)]
    retry_backoff: RetryBackoffBody,
    #[serde(default)]
    retry_delay_ms: i64,
    #[serde(default)]
    max_retry_delay_ms: i64,
    #[serde(default)]
    heartbeat_interval_ms: i64,
    #[serde(default)]
    concurrency: i32,
    #[serde(default)]
    priority: i32,
    idempotency_ttl_sec: Option<i32>,
    description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum RetryBackoffBody {
    #[default]
    Fixed,
    Exponential,
}

impl From<RetryBackoffBody> for RetryBackoff {
    fn from(b: RetryBackoffBody) -> Self {
        match b {
            RetryBackoffBody::Fixed => RetryBackoff::Fixed,
            RetryBackoffBody::Exponential => RetryBackoff::Exponential,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterBody {
    service_id: String,
    version: String,
    base_url: String,
    #[serde(default)]
    tasks: Vec<RegisterTaskBody>,
}

async fn register(
    State(state): State<AppState>,
    Json(body): Json<RegisterBody>,
) -> Result<Json<Value>, ApiError> {
    let tasks = body
        .tasks
        .into_iter()
        .map(|t| TaskRegistration {
            id: t.id,
            allowed_next: t.allowed_next,
            timeout_sec: t.timeout_sec,
            max_retries: t.max_retries,
            retry_backoff: t.retry_backoff.into(),
            retry_delay_ms: t.retry_delay_ms,
            max_retry_delay_ms: t.max_retry_delay_ms,
            heartbeat_interval_ms: t.heartbeat_interval_ms,
            concurrency: t.concurrency,
            priority: t.priority,
            idempotency_ttl_sec: t.idempotency_ttl_sec,
            description: t.description,
        })
        .collect();

    let result = state
        .runner
        .registry
        .register(&body.service_id, &body.version, &body.base_url, tasks)
        .await?;

    let code_changes: Vec<Value> = result
        .code_changes
        .into_iter()
        .map(|c| json!({ "taskId": c.task_id, "oldVersion": c.old_version, "newVersion": c.new_version }))
        .collect();

    Ok(Json(json!({
        "success": true,
        "codeChanges": code_changes,
        "orphanedTasks": result.orphaned_tasks,
    })))
}
