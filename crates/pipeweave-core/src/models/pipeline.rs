use std::collections::HashMap;

use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::pipelines;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureMode {
    FailFast,
    Continue,
}

impl FailureMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureMode::FailFast => "fail-fast",
            FailureMode::Continue => "continue",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "continue" => FailureMode::Continue,
            _ => FailureMode::FailFast,
        }
    }
}

/// One node's declared successors within a pipeline's structure map.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureNode {
    pub allowed_next: Vec<String>,
}

pub type Structure = HashMap<String, StructureNode>;

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = pipelines)]
pub struct PipelineRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entry_tasks: String,
    pub structure: String,
    pub version: i32,
    pub failure_mode: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entry_tasks: Vec<String>,
    pub structure: Structure,
    pub version: i32,
    pub failure_mode: FailureMode,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<PipelineRow> for Pipeline {
    fn from(row: PipelineRow) -> Self {
        Pipeline {
            id: row.id,
            name: row.name,
            description: row.description,
            entry_tasks: super::json_or_default(&row.entry_tasks),
            structure: super::json_or_default(&row.structure),
            version: row.version,
            failure_mode: FailureMode::parse(&row.failure_mode),
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<Pipeline> for PipelineRow {
    fn from(p: Pipeline) -> Self {
        PipelineRow {
            id: p.id,
            name: p.name,
            description: p.description,
            entry_tasks: serde_json::to_string(&p.entry_tasks).unwrap_or_default(),
            structure: serde_json::to_string(&p.structure).unwrap_or_default(),
            version: p.version,
            failure_mode: p.failure_mode.as_str().to_string(),
            created_at: p.created_at,
            updated_at: p.updated_at,
        }
    }
}
