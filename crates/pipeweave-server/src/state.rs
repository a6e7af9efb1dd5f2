use std::sync::Arc;

use pipeweave_core::config::DispatchMode;
use pipeweave_core::PipeweaveRunner;

/// Shared application state handed to every axum handler via `State`.
/// Cheap to clone — `PipeweaveRunner` itself is a bundle of thin,
/// independently-cloneable handles over one `Store`.
#[derive(Clone)]
pub struct AppState {
    pub runner: Arc<PipeweaveRunner>,
    pub mode: DispatchMode,
    pub dlq_retention_days: i64,
}
