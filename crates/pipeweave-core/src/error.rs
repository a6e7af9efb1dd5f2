//! Crate-wide error taxonomy.
//!
//! Each component owns a narrow `thiserror` enum; [`PipeweaveError`]
//! composes them so callers that don't care which component failed can
//! match on a single type. The server crate maps `PipeweaveError` onto
//! HTTP status codes per the error-handling design.

use thiserror::Error;

/// Errors raised by the storage layer (pool acquisition, SQL execution).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database query failed: {0}")]
    Query(#[from] diesel::result::Error),

    #[error("failed to acquire a pooled connection: {0}")]
    Pool(#[from] deadpool_diesel::PoolError),

    #[error("failed to run interact closure: {0}")]
    Interact(String),

    #[error("unsupported database url '{0}': expected postgres://, sqlite://, or a file path")]
    UnsupportedUrl(String),

    #[error("migration failed: {0}")]
    Migration(String),
}

impl From<deadpool_diesel::InteractError> for StoreError {
    fn from(e: deadpool_diesel::InteractError) -> Self {
        StoreError::Interact(e.to_string())
    }
}

/// Errors raised while registering services/tasks.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("failed to canonically serialize task '{0}': {1}")]
    Serialize(String, serde_json::Error),
}

/// Errors raised while validating or planning a pipeline.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("pipeline '{0}' not found")]
    PipelineNotFound(String),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("pipeline has no entry tasks")]
    NoEntryTasks,

    #[error("cycle(s) detected: {0:?}")]
    CyclesDetected(Vec<Vec<String>>),

    #[error("unknown task(s) referenced in allowedNext: {0:?}")]
    UnknownReferences(Vec<String>),
}

/// Errors raised by the task queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task '{0}' not found")]
    TaskNotFound(String),

    #[error("task run '{0}' not found")]
    RunNotFound(String),

    #[error("task run '{0}' is in state '{1}', expected '{2}'")]
    InvalidTransition(String, String, String),
}

/// Errors raised by the retry scheduler.
#[derive(Debug, Error)]
pub enum RetryError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task run '{0}' not found")]
    RunNotFound(String),

    #[error("no retry attempts remain for run '{0}'")]
    Exhausted(String),
}

/// Errors raised by the dead-letter queue.
#[derive(Debug, Error)]
pub enum DlqError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("dlq entry '{0}' not found")]
    NotFound(String),

    #[error("dlq entry '{0}' was already retried")]
    AlreadyRetried(String),
}

/// Errors raised by the heartbeat monitor.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("task run '{0}' is not being tracked")]
    NotTracked(String),
}

/// Errors raised while dispatching a claimed run to a worker.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("worker transport failed: {0}")]
    Transport(String),
}

/// Errors raised by the pipeline executor.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),

    #[error("pipeline run '{0}' not found")]
    RunNotFound(String),

    #[error("maintenance mode denies new task admission")]
    MaintenanceDenied,
}

/// Errors raised by the maintenance state machine.
#[derive(Debug, Error)]
pub enum MaintenanceError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot enter maintenance: {0} pending and {1} running task run(s) remain")]
    ActiveRunsRemain(i64, i64),
}

/// Crate-wide error, composed from every component's error type.
#[derive(Debug, Error)]
pub enum PipeweaveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Retry(#[from] RetryError),

    #[error(transparent)]
    Dlq(#[from] DlqError),

    #[error(transparent)]
    Heartbeat(#[from] HeartbeatError),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Maintenance(#[from] MaintenanceError),
}

pub type Result<T, E = PipeweaveError> = std::result::Result<T, E>;
