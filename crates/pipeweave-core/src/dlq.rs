//! Dead-letter queue component (§4.7): terminal-failure archive plus
//! manual-replay bookkeeping.

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;

use crate::database::Store;
use crate::error::DlqError;
use crate::ids;
use crate::models::{DlqEntry, DlqEntryRow, TaskRun};
use crate::schema::dlq;

#[derive(Clone)]
pub struct Dlq {
    store: Store,
}

impl Dlq {
    pub fn new(store: Store) -> Self {
        Dlq { store }
    }

    /// Archives a terminally-failed run's full history; returns the new
    /// DLQ entry id.
    pub async fn add(&self, task_run: &TaskRun, error: &str) -> Result<String, DlqError> {
        let id = ids::mint(ids::DLQ_PREFIX);
        let row = DlqEntryRow {
            id: id.clone(),
            task_run_id: task_run.id.clone(),
            task_id: task_run.task_id.clone(),
            pipeline_run_id: task_run.pipeline_run_id.clone(),
            code_version: task_run.code_version,
            code_hash: task_run.code_hash.clone(),
            error: error.to_string(),
            attempts: task_run.attempt,
            input_path: task_run.input_path.clone(),
            upstream_refs: serde_json::to_string(&task_run.upstream_refs).unwrap_or_default(),
            previous_attempts: serde_json::to_string(&task_run.previous_attempts).unwrap_or_default(),
            failed_at: Utc::now().naive_utc(),
            retried_at: None,
            retry_run_id: None,
        };

        self.store
            .interact(move |conn| diesel::insert_into(dlq::table).values(&row).execute(conn))
            .await?;
        Ok(id)
    }

    pub async fn list(&self, limit: i64, offset: i64) -> Result<Vec<DlqEntry>, DlqError> {
        let rows: Vec<DlqEntryRow> = self
            .store
            .interact(move |conn| {
                dlq::table
                    .filter(dlq::retried_at.is_null())
                    .order(dlq::failed_at.desc())
                    .limit(limit)
                    .offset(offset)
                    .load(conn)
            })
            .await?;
        Ok(rows.into_iter().map(DlqEntry::from).collect())
    }

    pub async fn get(&self, dlq_id: &str) -> Result<DlqEntry, DlqError> {
        let dlq_id = dlq_id.to_string();
        let row: Option<DlqEntryRow> = self
            .store
            .interact({
                let dlq_id = dlq_id.clone();
                move |conn| dlq::table.find(dlq_id).first(conn).optional()
            })
            .await?;
        row.map(DlqEntry::from).ok_or(DlqError::NotFound(dlq_id))
    }

    /// Permanently deletes a single entry, regardless of retention or retried status.
    pub async fn purge_one(&self, dlq_id: &str) -> Result<(), DlqError> {
        let dlq_id = dlq_id.to_string();
        let deleted = self
            .store
            .interact({
                let dlq_id = dlq_id.clone();
                move |conn| diesel::delete(dlq::table.find(dlq_id)).execute(conn)
            })
            .await?;
        if deleted == 0 {
            return Err(DlqError::NotFound(dlq_id));
        }
        Ok(())
    }

    pub async fn mark_retried(&self, dlq_id: &str, new_run_id: &str) -> Result<(), DlqError> {
        let dlq_id = dlq_id.to_string();
        let new_run_id = new_run_id.to_string();
        let now = Utc::now().naive_utc();

        let existing: Option<DlqEntryRow> = self
            .store
            .interact({
                let dlq_id = dlq_id.clone();
                move |conn| dlq::table.find(dlq_id).first(conn).optional()
            })
            .await?;
        let existing = existing.ok_or_else(|| DlqError::NotFound(dlq_id.clone()))?;
        if existing.retried_at.is_some() {
            return Err(DlqError::AlreadyRetried(dlq_id));
        }

        self.store
            .interact(move |conn| {
                diesel::update(dlq::table.find(&dlq_id))
                    .set((dlq::retried_at.eq(now), dlq::retry_run_id.eq(&new_run_id)))
                    .execute(conn)
            })
            .await?;
        Ok(())
    }

    /// Permanently deletes entries older than `retention_days`, regardless
    /// of retried status.
    pub async fn purge(&self, retention_days: i64) -> Result<usize, DlqError> {
        let cutoff = Utc::now().naive_utc() - ChronoDuration::days(retention_days);
        let deleted = self
            .store
            .interact(move |conn| diesel::delete(dlq::table.filter(dlq::failed_at.lt(cutoff))).execute(conn))
            .await?;
        Ok(deleted)
    }
}
