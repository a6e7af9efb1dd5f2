//! Maintenance drain control (§4.11): admission-control singleton exposed
//! read/write over HTTP.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/api/maintenance", axum::routing::get(state))
        .route("/api/maintenance/request", axum::routing::post(request))
        .route("/api/maintenance/enter", axum::routing::post(enter))
        .route("/api/maintenance/exit", axum::routing::post(exit))
}

async fn state(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let current = state.runner.maintenance.state().await?;
    Ok(Json(json!(current)))
}

/// Starts the drain. Returns immediately with whichever mode resulted —
/// `maintenance` if nothing was in flight, `waiting_for_maintenance`
/// otherwise, to be polled via `GET /api/maintenance`.
async fn request(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let mode = state.runner.maintenance.request_maintenance().await?;
    Ok(Json(json!({ "mode": mode })))
}

/// Forces `maintenance` immediately; 409s via `ActiveRunsRemain` if work
/// is still pending or running.
async fn enter(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.runner.maintenance.enter_maintenance().await?;
    Ok(Json(json!({ "mode": "maintenance" })))
}

async fn exit(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    state.runner.maintenance.exit_maintenance().await?;
    Ok(Json(json!({ "mode": "running" })))
}
