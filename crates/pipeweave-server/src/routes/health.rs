use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/health", axum::routing::get(health))
}

async fn health(State(state): State<AppState>) -> Result<Json<Value>, crate::error::ApiError> {
    let maintenance = state.runner.maintenance.state().await?;
    let status = state.runner.queue.get_status().await?;
    let running = status.by_status.get("running").copied().unwrap_or(0);

    Ok(Json(json!({
        "status": "ok",
        "canAcceptTasks": maintenance.mode == pipeweave_core::models::MaintenanceMode::Running,
        "maintenanceMode": maintenance.mode,
        "runningTasks": running,
    })))
}
