use axum::extract::{Query, State};
use axum::Json;
use diesel::prelude::*;
use pipeweave_core::models::{PipelineRun, PipelineRunRow};
use pipeweave_core::schema::pipeline_runs;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/pipeline-runs", axum::routing::get(list))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    #[serde(rename = "pipelineId")]
    pipeline_id: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);
    let pipeline_id = query.pipeline_id;

    let rows: Vec<PipelineRunRow> = state
        .runner
        .store
        .interact(move |conn| {
            let mut q = pipeline_runs::table.order(pipeline_runs::created_at.desc()).into_boxed();
            if let Some(pid) = &pipeline_id {
                q = q.filter(pipeline_runs::pipeline_id.eq(pid));
            }
            q.limit(limit).offset(offset).load(conn)
        })
        .await
        .map_err(pipeweave_core::error::ValidationError::from)?;

    let runs: Vec<PipelineRun> = rows.into_iter().map(PipelineRun::from).collect();
    Ok(Json(json!(runs)))
}
