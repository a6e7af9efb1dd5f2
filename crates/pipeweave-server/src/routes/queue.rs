use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/queue/status", axum::routing::get(status))
}

async fn status(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let status = state.runner.queue.get_status().await?;
    Ok(Json(json!({
        "byStatus": status.by_status,
        "dlqPending": status.dlq_pending,
        "oldestPendingCreatedAt": status.oldest_pending_created_at,
    })))
}
