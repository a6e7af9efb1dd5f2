use axum::extract::{Path, State};
use axum::Json;
use pipeweave_core::error::ValidationError;
use pipeweave_core::models::{FailureMode, Structure};
use pipeweave_core::pipeline::PipelineDraft;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new()
        .route("/api/pipelines", axum::routing::get(list).post(upsert))
        .route("/api/pipelines/:id", axum::routing::get(get))
        .route("/api/pipelines/:id/trigger", axum::routing::post(trigger))
        .route("/api/pipelines/:id/dry-run", axum::routing::post(dry_run))
}

async fn list(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let pipelines = state.runner.validator.list().await?;
    Ok(Json(json!(pipelines)))
}

async fn get(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let pipeline = state
        .runner
        .validator
        .get(&id)
        .await?
        .ok_or_else(|| ValidationError::PipelineNotFound(id.clone()))?;
    Ok(Json(json!(pipeline)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertBody {
    id: String,
    name: String,
    description: Option<String>,
    #[serde(default)]
    entry_tasks: Vec<String>,
    #[serde(default)]
    structure: Structure,
    #[serde(default = "default_failure_mode")]
    failure_mode: FailureMode,
}

fn default_failure_mode() -> FailureMode {
    FailureMode::FailFast
}

async fn upsert(State(state): State<AppState>, Json(body): Json<UpsertBody>) -> Result<Json<Value>, ApiError> {
    let draft = PipelineDraft {
        id: body.id,
        name: body.name,
        description: body.description,
        entry_tasks: body.entry_tasks,
        structure: body.structure,
        failure_mode: body.failure_mode,
    };
    let pipeline = state.runner.validator.upsert(draft).await?;
    Ok(Json(json!(pipeline)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TriggerBody {
    failure_mode: Option<FailureMode>,
    priority: Option<i32>,
    #[serde(default)]
    metadata: Value,
}

async fn trigger(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<TriggerBody>>,
) -> Result<Json<Value>, ApiError> {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let result = state
        .runner
        .executor
        .trigger_pipeline(pipeweave_core::executor::TriggerRequest {
            pipeline_id: id,
            failure_mode: body.failure_mode,
            priority: body.priority,
            metadata: body.metadata,
        })
        .await?;

    Ok(Json(json!({
        "pipelineRunId": result.pipeline_run_id,
        "status": result.status,
        "inputPath": result.input_path,
        "entryTaskIds": result.entry_task_ids,
        "queuedTaskRunIds": result.queued_task_run_ids,
    })))
}

async fn dry_run(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let levels = state.runner.executor.dry_run(&id).await?;
    Ok(Json(json!({ "pipelineId": id, "plan": levels })))
}
