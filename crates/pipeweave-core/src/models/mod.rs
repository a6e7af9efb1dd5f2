//! Domain entities, §3 of the design document.
//!
//! Every entity has a `*Row` type (the `Queryable`/`Insertable` shape
//! Diesel talks to) and a plain domain type with typed JSON fields used
//! everywhere else in the crate. Conversions live next to each pair.

mod dlq;
mod idempotency;
mod maintenance;
mod pipeline;
mod pipeline_run;
mod service;
mod task;
mod task_run;

pub use dlq::{DlqEntry, DlqEntryRow};
pub use idempotency::{IdempotencyCacheEntry, IdempotencyCacheRow};
pub use maintenance::{MaintenanceMode, MaintenanceRow, MaintenanceState, MAINTENANCE_SINGLETON_ID};
pub use pipeline::{FailureMode, Pipeline, PipelineRow, Structure, StructureNode};
pub use pipeline_run::{PipelineRun, PipelineRunRow, PipelineRunStatus};
pub use service::{Service, ServiceRow, ServiceStatus};
pub use task::{RetryBackoff, Task, TaskCodeHistory, TaskCodeHistoryRow, TaskConfigFingerprint, TaskRow};
pub use task_run::{AttemptRecord, TaskRun, TaskRunRow, TaskRunStatus, UpstreamRef};

/// Helper used by every `*Row -> *` conversion to decode a JSON column,
/// defaulting to an empty collection if the column is unexpectedly
/// missing rather than panicking — the orchestrator should degrade, not
/// crash, on a corrupted metadata blob.
pub(crate) fn json_or_default<T: Default + serde::de::DeserializeOwned>(raw: &str) -> T {
    serde_json::from_str(raw).unwrap_or_default()
}
