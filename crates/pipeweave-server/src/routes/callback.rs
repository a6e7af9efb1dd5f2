//! Worker → core success/failure report (§6 wire shapes, §4.10
//! `queueDownstreamTasks`/`handleTaskFailure`).

use axum::extract::{Path, State};
use axum::Json;
use diesel::prelude::*;
use pipeweave_core::error::QueueError;
use pipeweave_core::models::{TaskRun, TaskRunRow};
use pipeweave_core::retry::RetryRequest;
use pipeweave_core::schema::task_runs;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) fn routes() -> axum::Router<AppState> {
    axum::Router::new().route("/api/callback/:run_id", axum::routing::post(callback))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CallbackBody {
    status: CallbackStatus,
    output_path: Option<String>,
    output_size: Option<i64>,
    assets: Option<Value>,
    logs_path: Option<String>,
    error: Option<String>,
    error_code: Option<String>,
    selected_next: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
enum CallbackStatus {
    Success,
    Failure,
}

async fn callback(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
    Json(body): Json<CallbackBody>,
) -> Result<Json<Value>, ApiError> {
    match body.status {
        CallbackStatus::Success => {
            let output_path = body.output_path.unwrap_or_default();
            state
                .runner
                .queue
                .mark_completed(&run_id, &output_path, body.output_size, body.assets, body.logs_path.as_deref())
                .await?;
            let queued = state.runner.executor.queue_downstream_tasks(&run_id, body.selected_next).await?;
            metrics::counter!("pipeweave_task_runs_completed_total").increment(1);
            Ok(Json(json!({ "ok": true, "queuedTaskRunIds": queued })))
        }
        CallbackStatus::Failure => {
            let error = body.error.unwrap_or_else(|| "task reported failure".to_string());

            let run_id_lookup = run_id.clone();
            let row: Option<TaskRunRow> = state
                .runner
                .store
                .interact(move |conn| task_runs::table.find(run_id_lookup).first(conn).optional())
                .await?;
            let task_run: TaskRun = row.ok_or_else(|| QueueError::RunNotFound(run_id.clone()))?.into();

            let task = state.runner.registry.get_task(&task_run.task_id).await?;
            let scheduled = match task {
                Some(task) => {
                    state
                        .runner
                        .retry
                        .schedule_retry(RetryRequest {
                            run_id: run_id.clone(),
                            attempt: task_run.attempt,
                            max_retries: task.max_retries,
                            retry_backoff: task.retry_backoff,
                            retry_delay_ms: task.retry_delay_ms,
                            max_retry_delay_ms: task.max_retry_delay_ms,
                            error: error.clone(),
                            error_code: body.error_code.clone(),
                        })
                        .await?
                }
                None => false,
            };

            if !scheduled {
                state.runner.dlq.add(&task_run, &error).await?;
                state.runner.queue.mark_failed(&run_id, &error, body.error_code.as_deref()).await?;
                state.runner.executor.handle_task_failure(&run_id).await?;
            }

            metrics::counter!("pipeweave_task_runs_failed_total").increment(1);
            Ok(Json(json!({ "ok": true, "retried": scheduled })))
        }
    }
}
