use axum::extract::{Path, Query, State};
use axum::Json;
use pipeweave_core::queue::EnqueueRequest;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/api/dlq", axum::routing::get(list))
        .route("/api/dlq/:id/retry", axum::routing::post(retry))
        .route("/api/dlq/:id/purge", axum::routing::post(purge))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list(State(state): State<AppState>, Query(query): Query<ListQuery>) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let entries = state.runner.dlq.list(limit, offset).await?;
    Ok(Json(json!(entries)))
}

/// Re-enqueues the DLQ entry's original task as a fresh standalone run and
/// records the replay. There is no pipeline context to rejoin here — a DLQ
/// retry starts a new run, it does not resume the old pipeline run.
async fn retry(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let entry = state.runner.dlq.get(&id).await?;

    let enqueued = state
        .runner
        .queue
        .enqueue(
            &entry.task_id,
            EnqueueRequest {
                priority: None,
                pipeline_run_id: None,
                upstream_refs: entry.upstream_refs,
                metadata: Value::Object(Default::default()),
                idempotency_key: None,
                scheduled_for: None,
            },
        )
        .await?;

    state.runner.dlq.mark_retried(&id, &enqueued.run_id).await?;
    Ok(Json(json!({ "newRunId": enqueued.run_id })))
}

/// Permanently deletes a single DLQ entry. The retention-based bulk sweep
/// lives on `db cleanup` instead — this endpoint is for discarding one
/// entry an operator has decided not to replay.
async fn purge(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    state.runner.dlq.purge_one(&id).await?;
    Ok(Json(json!({ "purged": true })))
}
