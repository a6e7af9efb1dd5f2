//! ServiceRegistry (§4.2): upserts services and tasks, hashes task config,
//! versions it on change, orphans tasks dropped from a re-registration.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::database::Store;
use crate::error::RegistryError;
use crate::ids;
use crate::models::{
    RetryBackoff, Service, ServiceRow, ServiceStatus, Task, TaskCodeHistory, TaskCodeHistoryRow,
    TaskConfigFingerprint, TaskRow,
};
use crate::schema::{services, task_code_history, task_runs, tasks};

/// A task definition as submitted by a worker's `/api/register` call —
/// everything in [`Task`] except the derived `code_hash`/`code_version`.
#[derive(Debug, Clone)]
pub struct TaskRegistration {
    pub id: String,
    pub allowed_next: Vec<String>,
    pub timeout_sec: i32,
    pub max_retries: i32,
    pub retry_backoff: RetryBackoff,
    pub retry_delay_ms: i64,
    pub max_retry_delay_ms: i64,
    pub heartbeat_interval_ms: i64,
    pub concurrency: i32,
    pub priority: i32,
    pub idempotency_ttl_sec: Option<i32>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct RegisterResult {
    pub code_changes: Vec<CodeChange>,
    pub orphaned_tasks: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct CodeChange {
    pub task_id: String,
    pub old_version: Option<i32>,
    pub new_version: i32,
}

#[derive(Clone)]
pub struct ServiceRegistry {
    store: Store,
}

impl ServiceRegistry {
    pub fn new(store: Store) -> Self {
        ServiceRegistry { store }
    }

    /// Computes `codeHash` as the first 16 hex characters of
    /// SHA-256(canonical JSON of the task's declared config). Field order
    /// in [`Task::fingerprint`] is fixed by struct declaration, which is
    /// what makes `serde_json::to_string` order-stable here — this
    /// choice is load-bearing: changing it invalidates every existing
    /// hash.
    pub fn code_hash(task: &TaskRegistration) -> Result<String, RegistryError> {
        let fingerprint = TaskConfigFingerprint {
            allowed_next: &task.allowed_next,
            timeout_sec: task.timeout_sec,
            max_retries: task.max_retries,
            retry_backoff: task.retry_backoff,
            retry_delay_ms: task.retry_delay_ms,
            max_retry_delay_ms: task.max_retry_delay_ms,
            heartbeat_interval_ms: task.heartbeat_interval_ms,
            concurrency: task.concurrency,
            priority: task.priority,
            idempotency_ttl_sec: task.idempotency_ttl_sec,
            description: &task.description,
        };
        let canonical = serde_json::to_string(&fingerprint)
            .map_err(|e| RegistryError::Serialize(task.id.clone(), e))?;
        let digest = Sha256::digest(canonical.as_bytes());
        Ok(hex::encode(digest)[..16].to_string())
    }

    pub async fn register(
        &self,
        service_id: &str,
        version: &str,
        base_url: &str,
        incoming_tasks: Vec<TaskRegistration>,
    ) -> Result<RegisterResult, RegistryError> {
        let service_id = service_id.to_string();
        let version = version.to_string();
        let base_url = base_url.to_string();

        let result = self
            .store
            .transaction(move |conn| -> diesel::QueryResult<RegisterResult> {
                let now: NaiveDateTime = Utc::now().naive_utc();

                let previous: Option<ServiceRow> = services::table
                    .find(&service_id)
                    .first(conn)
                    .optional()?;
                let previous_version = previous.as_ref().map(|s| s.version.clone());

                diesel::insert_into(services::table)
                    .values(ServiceRow {
                        id: service_id.clone(),
                        version: version.clone(),
                        base_url: base_url.clone(),
                        registered_at: previous.as_ref().map(|s| s.registered_at).unwrap_or(now),
                        last_heartbeat: now,
                        status: ServiceStatus::Active.as_str().to_string(),
                    })
                    .on_conflict(services::id)
                    .do_update()
                    .set((
                        services::version.eq(&version),
                        services::base_url.eq(&base_url),
                        services::last_heartbeat.eq(now),
                        services::status.eq(ServiceStatus::Active.as_str()),
                    ))
                    .execute(conn)?;

                let mut result = RegisterResult::default();

                let version_changed = previous_version.as_deref() != Some(version.as_str());
                if version_changed && previous_version.is_some() {
                    let existing_ids: Vec<String> = tasks::table
                        .filter(tasks::service_id.eq(&service_id))
                        .select(tasks::id)
                        .load(conn)?;
                    let incoming_ids: std::collections::HashSet<&str> =
                        incoming_tasks.iter().map(|t| t.id.as_str()).collect();
                    for existing_id in existing_ids {
                        if !incoming_ids.contains(existing_id.as_str()) {
                            let reason = format!("Task type removed in version {version}");
                            diesel::update(
                                task_runs::table
                                    .filter(task_runs::task_id.eq(&existing_id))
                                    .filter(task_runs::status.eq("pending")),
                            )
                            .set((
                                task_runs::status.eq("cancelled"),
                                task_runs::error.eq(&reason),
                                task_runs::completed_at.eq(now),
                            ))
                            .execute(conn)?;
                            result.orphaned_tasks.push(existing_id);
                        }
                    }
                }

                for incoming in incoming_tasks {
                    let existing: Option<TaskRow> = tasks::table.find(&incoming.id).first(conn).optional()?;
                    let new_hash = Self::code_hash(&incoming)
                        .map_err(|_| diesel::result::Error::RollbackTransaction)?;

                    let (new_version, hash_changed) = match &existing {
                        Some(row) if row.code_hash == new_hash => (row.code_version, false),
                        Some(row) => (row.code_version + 1, true),
                        None => (1, true),
                    };

                    if hash_changed {
                        result.code_changes.push(CodeChange {
                            task_id: incoming.id.clone(),
                            old_version: existing.as_ref().map(|r| r.code_version),
                            new_version,
                        });
                    }

                    let row: TaskRow = Task {
                        id: incoming.id.clone(),
                        service_id: service_id.clone(),
                        code_hash: new_hash.clone(),
                        code_version: new_version,
                        allowed_next: incoming.allowed_next,
                        timeout_sec: incoming.timeout_sec,
                        max_retries: incoming.max_retries,
                        retry_backoff: incoming.retry_backoff,
                        retry_delay_ms: incoming.retry_delay_ms,
                        max_retry_delay_ms: incoming.max_retry_delay_ms,
                        heartbeat_interval_ms: incoming.heartbeat_interval_ms,
                        concurrency: incoming.concurrency,
                        priority: incoming.priority,
                        idempotency_ttl_sec: incoming.idempotency_ttl_sec,
                        description: incoming.description,
                    }
                    .into();

                    diesel::insert_into(tasks::table)
                        .values(&row)
                        .on_conflict(tasks::id)
                        .do_update()
                        .set(&row)
                        .execute(conn)?;

                    if hash_changed {
                        let already_recorded: i64 = task_code_history::table
                            .filter(task_code_history::task_id.eq(&incoming.id))
                            .filter(task_code_history::code_hash.eq(&new_hash))
                            .count()
                            .get_result(conn)?;
                        if already_recorded == 0 {
                            diesel::insert_into(task_code_history::table)
                                .values(TaskCodeHistoryRow {
                                    id: ids::mint(ids::TASK_CODE_HISTORY_PREFIX),
                                    task_id: incoming.id,
                                    code_version: new_version,
                                    code_hash: new_hash,
                                    service_version: version.clone(),
                                    recorded_at: now,
                                })
                                .execute(conn)?;
                        }
                    }
                }

                Ok(result)
            })
            .await?;

        if !result.orphaned_tasks.is_empty() {
            warn!(count = result.orphaned_tasks.len(), "orphaned tasks on re-registration");
        }
        info!(code_changes = result.code_changes.len(), "service registered");
        Ok(result)
    }

    pub async fn get_service(&self, id: &str) -> Result<Option<Service>, RegistryError> {
        let id = id.to_string();
        let row: Option<ServiceRow> = self
            .store
            .interact(move |conn| services::table.find(id).first(conn).optional())
            .await?;
        Ok(row.map(Service::from))
    }

    pub async fn list_services(&self) -> Result<Vec<Service>, RegistryError> {
        let rows: Vec<ServiceRow> = self.store.interact(move |conn| services::table.load(conn)).await?;
        Ok(rows.into_iter().map(Service::from).collect())
    }

    pub async fn get_task(&self, id: &str) -> Result<Option<Task>, RegistryError> {
        let id = id.to_string();
        let row: Option<TaskRow> = self
            .store
            .interact(move |conn| tasks::table.find(id).first(conn).optional())
            .await?;
        Ok(row.map(Task::from))
    }

    pub async fn list_tasks_for_service(&self, service_id: &str) -> Result<Vec<Task>, RegistryError> {
        let service_id = service_id.to_string();
        let rows: Vec<TaskRow> = self
            .store
            .interact(move |conn| tasks::table.filter(tasks::service_id.eq(service_id)).load(conn))
            .await?;
        Ok(rows.into_iter().map(Task::from).collect())
    }

    pub async fn get_task_code_history(&self, task_id: &str) -> Result<Vec<TaskCodeHistory>, RegistryError> {
        let task_id = task_id.to_string();
        let rows: Vec<TaskCodeHistoryRow> = self
            .store
            .interact(move |conn| {
                task_code_history::table
                    .filter(task_code_history::task_id.eq(task_id))
                    .order(task_code_history::recorded_at.asc())
                    .load(conn)
            })
            .await?;
        Ok(rows.into_iter().map(TaskCodeHistory::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TaskRegistration {
        TaskRegistration {
            id: "resize".to_string(),
            allowed_next: vec!["thumbnail".to_string()],
            timeout_sec: 60,
            max_retries: 3,
            retry_backoff: RetryBackoff::Fixed,
            retry_delay_ms: 1000,
            max_retry_delay_ms: 10_000,
            heartbeat_interval_ms: 5000,
            concurrency: 0,
            priority: 10,
            idempotency_ttl_sec: None,
            description: None,
        }
    }

    #[test]
    fn identical_config_hashes_identically() {
        let h1 = ServiceRegistry::code_hash(&sample()).unwrap();
        let h2 = ServiceRegistry::code_hash(&sample()).unwrap();
        assert_eq!(h1, h2);
        assert_eq!(h1.len(), 16);
    }

    #[test]
    fn changing_config_changes_hash() {
        let h1 = ServiceRegistry::code_hash(&sample()).unwrap();
        let mut changed = sample();
        changed.timeout_sec = 120;
        let h2 = ServiceRegistry::code_hash(&changed).unwrap();
        assert_ne!(h1, h2);
    }

    #[test]
    fn identity_fields_do_not_affect_hash() {
        let h1 = ServiceRegistry::code_hash(&sample()).unwrap();
        let mut same_config_different_id = sample();
        same_config_different_id.id = "a-totally-different-id".to_string();
        let h2 = ServiceRegistry::code_hash(&same_config_different_id).unwrap();
        assert_eq!(h1, h2, "id is not part of the config fingerprint");
    }
}
