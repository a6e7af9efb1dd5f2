use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::schema::idempotency_cache;

#[derive(Debug, Clone, Queryable, Insertable, AsChangeset)]
#[diesel(table_name = idempotency_cache)]
pub struct IdempotencyCacheRow {
    pub cache_key: String,
    pub task_id: String,
    pub task_run_id: String,
    pub code_version: i32,
    pub output_path: String,
    pub output_size: Option<i64>,
    pub assets: Option<String>,
    pub cached_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyCacheEntry {
    pub key: String,
    pub task_id: String,
    pub task_run_id: String,
    pub code_version: i32,
    pub output_path: String,
    pub output_size: Option<i64>,
    pub assets: Option<Value>,
    pub cached_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}

impl From<IdempotencyCacheRow> for IdempotencyCacheEntry {
    fn from(row: IdempotencyCacheRow) -> Self {
        IdempotencyCacheEntry {
            key: row.cache_key,
            task_id: row.task_id,
            task_run_id: row.task_run_id,
            code_version: row.code_version,
            output_path: row.output_path,
            output_size: row.output_size,
            assets: row.assets.and_then(|s| serde_json::from_str(&s).ok()),
            cached_at: row.cached_at,
            expires_at: row.expires_at,
        }
    }
}

impl From<IdempotencyCacheEntry> for IdempotencyCacheRow {
    fn from(e: IdempotencyCacheEntry) -> Self {
        IdempotencyCacheRow {
            cache_key: e.key,
            task_id: e.task_id,
            task_run_id: e.task_run_id,
            code_version: e.code_version,
            output_path: e.output_path,
            output_size: e.output_size,
            assets: e.assets.map(|v| v.to_string()),
            cached_at: e.cached_at,
            expires_at: e.expires_at,
        }
    }
}
