use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::pipeline_runs;
use crate::models::pipeline::{FailureMode, Structure};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineRunStatus {
    Running,
    Completed,
    Failed,
}

impl PipelineRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineRunStatus::Running => "running",
            PipelineRunStatus::Completed => "completed",
            PipelineRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "completed" => PipelineRunStatus::Completed,
            "failed" => PipelineRunStatus::Failed,
            _ => PipelineRunStatus::Running,
        }
    }
}

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = pipeline_runs)]
pub struct PipelineRunRow {
    pub id: String,
    pub pipeline_id: String,
    pub pipeline_version: i32,
    pub structure_snapshot: String,
    pub status: String,
    pub input_path: String,
    pub failure_mode: String,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub metadata: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRun {
    pub id: String,
    pub pipeline_id: String,
    pub pipeline_version: i32,
    pub structure_snapshot: Structure,
    pub status: PipelineRunStatus,
    pub input_path: String,
    pub failure_mode: FailureMode,
    pub created_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub metadata: Value,
}

impl From<PipelineRunRow> for PipelineRun {
    fn from(row: PipelineRunRow) -> Self {
        PipelineRun {
            id: row.id,
            pipeline_id: row.pipeline_id,
            pipeline_version: row.pipeline_version,
            structure_snapshot: super::json_or_default(&row.structure_snapshot),
            status: PipelineRunStatus::parse(&row.status),
            input_path: row.input_path,
            failure_mode: FailureMode::parse(&row.failure_mode),
            created_at: row.created_at,
            completed_at: row.completed_at,
            metadata: serde_json::from_str(&row.metadata).unwrap_or(Value::Null),
        }
    }
}

impl From<PipelineRun> for PipelineRunRow {
    fn from(r: PipelineRun) -> Self {
        PipelineRunRow {
            id: r.id,
            pipeline_id: r.pipeline_id,
            pipeline_version: r.pipeline_version,
            structure_snapshot: serde_json::to_string(&r.structure_snapshot).unwrap_or_default(),
            status: r.status.as_str().to_string(),
            input_path: r.input_path,
            failure_mode: r.failure_mode.as_str().to_string(),
            created_at: r.created_at,
            completed_at: r.completed_at,
            metadata: r.metadata.to_string(),
        }
    }
}
