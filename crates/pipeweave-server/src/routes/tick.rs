use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/tick", axum::routing::post(tick))
}

/// Runs one dispatcher tick body on demand — the tick-driven deployment
/// mode's hook for an external scheduler. Harmless to call in continuous
/// mode too; the dispatcher's own loop and this handler both just invoke
/// `Dispatcher::tick`.
async fn tick(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let claimed = state.runner.dispatcher.tick().await?;
    metrics::counter!("pipeweave_tasks_claimed_total").increment(claimed as u64);
    Ok(Json(json!({ "claimed": claimed })))
}
