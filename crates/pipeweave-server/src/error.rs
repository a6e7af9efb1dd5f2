//! Maps the crate-wide [`PipeweaveError`] taxonomy onto HTTP responses
//! (§7 "`pipeweave_server` wraps `PipeweaveError` in `ApiError`").

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pipeweave_core::error::{
    DlqError, ExecutorError, HeartbeatError, MaintenanceError, PipeweaveError, QueueError, RegistryError,
    RetryError, ValidationError,
};
use serde_json::json;

pub struct ApiError(pub PipeweaveError);

impl<E: Into<PipeweaveError>> From<E> for ApiError {
    fn from(e: E) -> Self {
        ApiError(e.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = status_for(&self.0);
        (status, Json(json!({ "error": message }))).into_response()
    }
}

fn status_for(err: &PipeweaveError) -> (StatusCode, String) {
    match err {
        PipeweaveError::Validation(e) => (validation_status(e), e.to_string()),
        PipeweaveError::Registry(RegistryError::Serialize(_, _)) => (StatusCode::BAD_REQUEST, err.to_string()),
        PipeweaveError::Registry(RegistryError::Store(_)) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        PipeweaveError::Queue(e) => (queue_status(e), e.to_string()),
        PipeweaveError::Retry(RetryError::RunNotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
        PipeweaveError::Retry(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        PipeweaveError::Dlq(DlqError::NotFound(_)) => (StatusCode::NOT_FOUND, err.to_string()),
        PipeweaveError::Dlq(DlqError::AlreadyRetried(_)) => (StatusCode::CONFLICT, err.to_string()),
        PipeweaveError::Dlq(DlqError::Store(_)) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        PipeweaveError::Heartbeat(HeartbeatError::NotTracked(_)) => (StatusCode::NOT_FOUND, err.to_string()),
        PipeweaveError::Heartbeat(HeartbeatError::Store(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        PipeweaveError::Dispatch(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
        PipeweaveError::Executor(e) => (executor_status(e), e.to_string()),
        PipeweaveError::Maintenance(MaintenanceError::ActiveRunsRemain(_, _)) => {
            (StatusCode::CONFLICT, err.to_string())
        }
        PipeweaveError::Maintenance(MaintenanceError::Store(_)) => {
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
        PipeweaveError::Store(_) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

fn validation_status(e: &ValidationError) -> StatusCode {
    match e {
        ValidationError::PipelineNotFound(_) | ValidationError::TaskNotFound(_) => StatusCode::NOT_FOUND,
        ValidationError::NoEntryTasks | ValidationError::CyclesDetected(_) | ValidationError::UnknownReferences(_) => {
            StatusCode::BAD_REQUEST
        }
        ValidationError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn queue_status(e: &QueueError) -> StatusCode {
    match e {
        QueueError::TaskNotFound(_) | QueueError::RunNotFound(_) => StatusCode::NOT_FOUND,
        QueueError::InvalidTransition(_, _, _) => StatusCode::CONFLICT,
        QueueError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn executor_status(e: &ExecutorError) -> StatusCode {
    match e {
        ExecutorError::RunNotFound(_) => StatusCode::NOT_FOUND,
        ExecutorError::MaintenanceDenied => StatusCode::SERVICE_UNAVAILABLE,
        ExecutorError::Validation(ve) => validation_status(ve),
        ExecutorError::Maintenance(MaintenanceError::ActiveRunsRemain(_, _)) => StatusCode::CONFLICT,
        ExecutorError::Maintenance(MaintenanceError::Store(_))
        | ExecutorError::Queue(_)
        | ExecutorError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
