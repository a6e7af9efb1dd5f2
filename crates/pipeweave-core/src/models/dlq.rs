use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::models::task_run::{AttemptRecord, UpstreamRef};
use crate::schema::dlq;

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = dlq)]
pub struct DlqEntryRow {
    pub id: String,
    pub task_run_id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub code_version: i32,
    pub code_hash: String,
    pub error: String,
    pub attempts: i32,
    pub input_path: String,
    pub upstream_refs: String,
    pub previous_attempts: String,
    pub failed_at: NaiveDateTime,
    pub retried_at: Option<NaiveDateTime>,
    pub retry_run_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqEntry {
    pub id: String,
    pub task_run_id: String,
    pub task_id: String,
    pub pipeline_run_id: Option<String>,
    pub code_version: i32,
    pub code_hash: String,
    pub error: String,
    pub attempts: i32,
    pub input_path: String,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub previous_attempts: Vec<AttemptRecord>,
    pub failed_at: NaiveDateTime,
    pub retried_at: Option<NaiveDateTime>,
    pub retry_run_id: Option<String>,
}

impl From<DlqEntryRow> for DlqEntry {
    fn from(row: DlqEntryRow) -> Self {
        DlqEntry {
            id: row.id,
            task_run_id: row.task_run_id,
            task_id: row.task_id,
            pipeline_run_id: row.pipeline_run_id,
            code_version: row.code_version,
            code_hash: row.code_hash,
            error: row.error,
            attempts: row.attempts,
            input_path: row.input_path,
            upstream_refs: super::json_or_default(&row.upstream_refs),
            previous_attempts: super::json_or_default(&row.previous_attempts),
            failed_at: row.failed_at,
            retried_at: row.retried_at,
            retry_run_id: row.retry_run_id,
        }
    }
}

impl From<DlqEntry> for DlqEntryRow {
    fn from(e: DlqEntry) -> Self {
        DlqEntryRow {
            id: e.id,
            task_run_id: e.task_run_id,
            task_id: e.task_id,
            pipeline_run_id: e.pipeline_run_id,
            code_version: e.code_version,
            code_hash: e.code_hash,
            error: e.error,
            attempts: e.attempts,
            input_path: e.input_path,
            upstream_refs: serde_json::to_string(&e.upstream_refs).unwrap_or_default(),
            previous_attempts: serde_json::to_string(&e.previous_attempts).unwrap_or_default(),
            failed_at: e.failed_at,
            retried_at: e.retried_at,
            retry_run_id: e.retry_run_id,
        }
    }
}
