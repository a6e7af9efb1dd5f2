//! IdempotencyCache (§4.5): maps a caller-chosen fingerprint to the
//! task run that produced it, so a retried enqueue with the same key
//! returns the original artifact instead of recomputing it.

use chrono::{Duration as ChronoDuration, NaiveDateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

use crate::database::Store;
use crate::error::StoreError;
use crate::models::{IdempotencyCacheEntry, IdempotencyCacheRow};
use crate::schema::idempotency_cache;

#[derive(Clone)]
pub struct IdempotencyCache {
    store: Store,
}

impl IdempotencyCache {
    pub fn new(store: Store) -> Self {
        IdempotencyCache { store }
    }

    /// Returns the cached entry iff it has not yet expired. An expired
    /// row is left in place for `cleanup_expired` rather than deleted
    /// here — lookup is read-only by design.
    pub async fn lookup(&self, key: &str) -> Result<Option<IdempotencyCacheEntry>, StoreError> {
        let key = key.to_string();
        let now = Utc::now().naive_utc();
        let row: Option<IdempotencyCacheRow> = self
            .store
            .interact(move |conn| {
                idempotency_cache::table
                    .find(key)
                    .filter(idempotency_cache::expires_at.gt(now))
                    .first(conn)
                    .optional()
            })
            .await?;
        Ok(row.map(IdempotencyCacheEntry::from))
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn store(
        &self,
        key: &str,
        task_id: &str,
        task_run_id: &str,
        code_version: i32,
        output_path: &str,
        ttl_sec: i64,
        output_size: Option<i64>,
        assets: Option<Value>,
    ) -> Result<(), StoreError> {
        let now: NaiveDateTime = Utc::now().naive_utc();
        let expires_at = now + ChronoDuration::seconds(ttl_sec);
        let row = IdempotencyCacheRow {
            cache_key: key.to_string(),
            task_id: task_id.to_string(),
            task_run_id: task_run_id.to_string(),
            code_version,
            output_path: output_path.to_string(),
            output_size,
            assets: assets.map(|v| v.to_string()),
            cached_at: now,
            expires_at,
        };

        self.store
            .interact(move |conn| {
                diesel::insert_into(idempotency_cache::table)
                    .values(&row)
                    .on_conflict(idempotency_cache::cache_key)
                    .do_update()
                    .set(&row)
                    .execute(conn)
            })
            .await?;
        Ok(())
    }

    /// Bulk-deletes every expired row; driven by the periodic `db cleanup`
    /// CLI invocation, never by a background timer inside the library.
    pub async fn cleanup_expired(&self) -> Result<usize, StoreError> {
        let now = Utc::now().naive_utc();
        let deleted = self
            .store
            .interact(move |conn| {
                diesel::delete(idempotency_cache::table.filter(idempotency_cache::expires_at.le(now)))
                    .execute(conn)
            })
            .await?;
        Ok(deleted)
    }
}
