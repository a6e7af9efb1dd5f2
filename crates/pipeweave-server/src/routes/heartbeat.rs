use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/heartbeat", axum::routing::post(heartbeat))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HeartbeatBody {
    run_id: String,
    progress: Option<Value>,
    message: Option<String>,
}

/// `HeartbeatMonitor::record_heartbeat` only carries `progress`; `message`
/// (§6 wire shape) is folded into it under a `message` key rather than
/// widening the core's signature for one extra string.
async fn heartbeat(State(state): State<AppState>, Json(body): Json<HeartbeatBody>) -> Result<Json<Value>, ApiError> {
    let progress = match (body.progress, body.message) {
        (Some(Value::Object(mut map)), Some(message)) => {
            map.insert("message".to_string(), Value::String(message));
            Some(Value::Object(map))
        }
        (Some(other), Some(message)) => Some(json!({ "value": other, "message": message })),
        (Some(progress), None) => Some(progress),
        (None, Some(message)) => Some(json!({ "message": message })),
        (None, None) => None,
    };

    state.runner.heartbeat.record_heartbeat(&body.run_id, progress).await?;
    Ok(Json(json!({ "ok": true })))
}
