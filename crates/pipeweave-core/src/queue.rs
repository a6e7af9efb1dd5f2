//! QueueManager (§4.4): enqueue/claim/complete lifecycle for task runs.
//!
//! `getNext` uses the default, non-serializable selection the design
//! calls out as tolerable for a single orchestrator: running counts are
//! read separately from the candidate list and filtered in application
//! code, rather than locked with `FOR UPDATE SKIP LOCKED`. Heartbeat
//! timeout and retry absorb the resulting race window.

use std::collections::{HashMap, HashSet};

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::database::{AnyConnection, Store};
use crate::error::QueueError;
use crate::ids;
use crate::maintenance::Maintenance;
use crate::models::{IdempotencyCacheRow, TaskRow, TaskRun, TaskRunRow, TaskRunStatus, UpstreamRef};
use crate::schema::{dlq, idempotency_cache, task_runs, tasks};

#[derive(Debug, Clone, Default)]
pub struct EnqueueRequest {
    pub priority: Option<i32>,
    pub pipeline_run_id: Option<String>,
    pub upstream_refs: HashMap<String, UpstreamRef>,
    pub metadata: Value,
    pub idempotency_key: Option<String>,
    pub scheduled_for: Option<NaiveDateTime>,
}

#[derive(Debug, Clone)]
pub struct EnqueueResult {
    pub run_id: String,
    pub task_id: String,
    pub status: TaskRunStatus,
    pub input_path: String,
}

#[derive(Debug, Clone, Default)]
pub struct QueueStatus {
    pub by_status: HashMap<String, i64>,
    pub dlq_pending: i64,
    pub oldest_pending_created_at: Option<NaiveDateTime>,
}

#[derive(Clone)]
pub struct QueueManager {
    store: Store,
    maintenance: Option<Maintenance>,
}

impl QueueManager {
    pub fn new(store: Store) -> Self {
        QueueManager { store, maintenance: None }
    }

    /// Wires the maintenance-mode promotion hook: `mark_completed` and
    /// `mark_failed` call it after a successful transition so
    /// `waiting_for_maintenance` can auto-promote once the queue drains.
    pub fn with_maintenance(mut self, maintenance: Maintenance) -> Self {
        self.maintenance = Some(maintenance);
        self
    }

    fn input_path(pipeline_run_id: &Option<String>, run_id: &str) -> String {
        match pipeline_run_id {
            Some(prid) => format!("runs/{prid}/tasks/{run_id}/input.json"),
            None => format!("standalone/{run_id}/input.json"),
        }
    }

    /// Connection-level enqueue body, shared by [`QueueManager::enqueue`]
    /// and [`crate::executor::PipelineExecutor::trigger_pipeline`], which
    /// needs every entry task's enqueue to share the single transaction
    /// that inserts the `PipelineRun` row (Open Question 6).
    pub(crate) fn enqueue_in_conn(
        conn: &mut AnyConnection,
        task_id: &str,
        req: EnqueueRequest,
    ) -> Result<EnqueueResult, diesel::result::Error> {
        if let Some(key) = &req.idempotency_key {
            let now = Utc::now().naive_utc();
            if let Some(hit) = idempotency_cache::table
                .find(key)
                .filter(idempotency_cache::expires_at.gt(now))
                .first::<IdempotencyCacheRow>(conn)
                .optional()?
            {
                return Ok(EnqueueResult {
                    run_id: hit.task_run_id,
                    task_id: task_id.to_string(),
                    status: TaskRunStatus::Completed,
                    input_path: hit.output_path,
                });
            }
        }

        let task: TaskRow = tasks::table
            .find(task_id)
            .first(conn)
            .optional()?
            .ok_or(diesel::result::Error::NotFound)?;

        // Open Question 4: a join task can be proposed for enqueue once
        // per completing predecessor. The partial unique index on
        // (pipeline_run_id, task_id) turns a second concurrent attempt
        // into a unique violation, which is not an error here — it means
        // another caller already won the race, so return its row instead
        // of erroring.
        if let Some(prid) = &req.pipeline_run_id {
            if let Some(existing) = task_runs::table
                .filter(task_runs::pipeline_run_id.eq(prid))
                .filter(task_runs::task_id.eq(task_id))
                .filter(task_runs::status.ne(TaskRunStatus::Cancelled.as_str()))
                .first::<TaskRunRow>(conn)
                .optional()?
            {
                return Ok(EnqueueResult {
                    run_id: existing.id,
                    task_id: task_id.to_string(),
                    status: TaskRunStatus::parse(&existing.status),
                    input_path: existing.input_path,
                });
            }
        }

        let run_id = ids::mint(ids::TASK_RUN_PREFIX);
        let input_path = Self::input_path(&req.pipeline_run_id, &run_id);
        let now = Utc::now().naive_utc();
        let row = TaskRunRow {
            id: run_id.clone(),
            task_id: task_id.to_string(),
            pipeline_run_id: req.pipeline_run_id,
            status: TaskRunStatus::Pending.as_str().to_string(),
            code_version: task.code_version,
            code_hash: task.code_hash,
            attempt: 1,
            max_retries: task.max_retries,
            priority: req.priority.unwrap_or(task.priority),
            input_path: input_path.clone(),
            output_path: None,
            output_size: None,
            assets: None,
            logs_path: None,
            upstream_refs: serde_json::to_string(&req.upstream_refs).unwrap_or_default(),
            previous_attempts: "[]".to_string(),
            idempotency_key: req.idempotency_key,
            scheduled_for: req.scheduled_for,
            heartbeat_at: None,
            started_at: None,
            completed_at: None,
            error: None,
            error_code: None,
            metadata: req.metadata.to_string(),
            created_at: now,
        };

        diesel::insert_into(task_runs::table).values(&row).execute(conn)?;

        Ok(EnqueueResult { run_id, task_id: task_id.to_string(), status: TaskRunStatus::Pending, input_path })
    }

    pub async fn enqueue(&self, task_id: &str, req: EnqueueRequest) -> Result<EnqueueResult, QueueError> {
        let task_id = task_id.to_string();
        let task_id_for_error = task_id.clone();
        let pipeline_run_id_for_conflict = req.pipeline_run_id.clone();
        let task_id_for_conflict = task_id.clone();

        let result = self
            .store
            .transaction({
                let task_id = task_id.clone();
                move |conn| Self::enqueue_in_conn(conn, &task_id, req)
            })
            .await;

        let result = match result {
            Ok(result) => result,
            Err(crate::error::StoreError::Query(diesel::result::Error::NotFound)) => {
                return Err(QueueError::TaskNotFound(task_id_for_error));
            }
            Err(crate::error::StoreError::Query(diesel::result::Error::DatabaseError(
                diesel::result::DatabaseErrorKind::UniqueViolation,
                _,
            ))) => {
                // Lost the race described above after the in-transaction
                // pre-check passed; the winner's row is now visible.
                let existing: Option<TaskRunRow> = self
                    .store
                    .interact(move |conn| {
                        let mut query = task_runs::table
                            .filter(task_runs::task_id.eq(&task_id_for_conflict))
                            .filter(task_runs::status.ne(TaskRunStatus::Cancelled.as_str()))
                            .into_boxed();
                        if let Some(prid) = &pipeline_run_id_for_conflict {
                            query = query.filter(task_runs::pipeline_run_id.eq(prid));
                        }
                        query.first(conn).optional()
                    })
                    .await?;
                let existing = existing.ok_or_else(|| QueueError::RunNotFound(task_id_for_error.clone()))?;
                EnqueueResult {
                    run_id: existing.id,
                    task_id: existing.task_id,
                    status: TaskRunStatus::parse(&existing.status),
                    input_path: existing.input_path,
                }
            }
            Err(other) => return Err(QueueError::Store(other)),
        };

        Ok(result)
    }

    /// Enqueues every item in order; a single item's failure does not
    /// roll back items already committed (§4.4: best-effort, not
    /// all-or-nothing).
    pub async fn enqueue_batch(
        &self,
        items: Vec<(String, EnqueueRequest)>,
    ) -> Vec<Result<EnqueueResult, QueueError>> {
        let mut results = Vec::with_capacity(items.len());
        for (task_id, req) in items {
            results.push(self.enqueue(&task_id, req).await);
        }
        results
    }

    pub async fn get_next(&self, limit: i64) -> Result<Vec<TaskRun>, QueueError> {
        let now = Utc::now().naive_utc();

        let candidates: Vec<TaskRunRow> = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::status.eq(TaskRunStatus::Pending.as_str()))
                    .filter(
                        task_runs::scheduled_for
                            .is_null()
                            .or(task_runs::scheduled_for.le(now)),
                    )
                    .order((task_runs::priority.asc(), task_runs::created_at.asc()))
                    .load(conn)
            })
            .await?;

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let task_ids: HashSet<String> = candidates.iter().map(|c| c.task_id.clone()).collect();
        let task_ids: Vec<String> = task_ids.into_iter().collect();
        let concurrency_limits: HashMap<String, i32> = {
            let task_ids = task_ids.clone();
            self.store
                .interact(move |conn| {
                    tasks::table
                        .filter(tasks::id.eq_any(&task_ids))
                        .select((tasks::id, tasks::concurrency))
                        .load::<(String, i32)>(conn)
                })
                .await?
        }
        .into_iter()
        .collect();

        let running_counts: HashMap<String, i64> = {
            let task_ids = task_ids.clone();
            self.store
                .interact(move |conn| {
                    task_runs::table
                        .filter(task_runs::task_id.eq_any(&task_ids))
                        .filter(task_runs::status.eq(TaskRunStatus::Running.as_str()))
                        .select(task_runs::task_id)
                        .load::<String>(conn)
                })
                .await?
                .into_iter()
                .fold(HashMap::new(), |mut acc, id| {
                    *acc.entry(id).or_insert(0) += 1;
                    acc
                })
        };

        let mut selected = Vec::new();
        let mut projected_running = running_counts;
        for candidate in candidates {
            if selected.len() as i64 >= limit {
                break;
            }
            let limit_for_task = concurrency_limits.get(&candidate.task_id).copied().unwrap_or(0);
            let running = projected_running.get(&candidate.task_id).copied().unwrap_or(0);
            if limit_for_task == 0 || running < limit_for_task as i64 {
                *projected_running.entry(candidate.task_id.clone()).or_insert(0) += 1;
                selected.push(TaskRun::from(candidate));
            }
        }

        Ok(selected)
    }

    pub async fn mark_running(&self, run_id: &str) -> Result<(), QueueError> {
        let run_id = run_id.to_string();
        let now = Utc::now().naive_utc();
        let affected = self
            .store
            .interact({
                let run_id = run_id.clone();
                move |conn| {
                    diesel::update(
                        task_runs::table
                            .filter(task_runs::id.eq(&run_id))
                            .filter(task_runs::status.eq(TaskRunStatus::Pending.as_str())),
                    )
                    .set((task_runs::status.eq(TaskRunStatus::Running.as_str()), task_runs::started_at.eq(now)))
                    .execute(conn)
                }
            })
            .await?;

        if affected == 0 {
            return Err(QueueError::RunNotFound(run_id));
        }
        Ok(())
    }

    pub async fn mark_completed(
        &self,
        run_id: &str,
        output_path: &str,
        output_size: Option<i64>,
        assets: Option<Value>,
        logs_path: Option<&str>,
    ) -> Result<(), QueueError> {
        let run_id = run_id.to_string();
        let output_path = output_path.to_string();
        let logs_path = logs_path.map(|s| s.to_string());
        let now = Utc::now().naive_utc();
        let affected = self
            .store
            .interact({
                let run_id = run_id.clone();
                move |conn| {
                    diesel::update(
                        task_runs::table
                            .filter(task_runs::id.eq(&run_id))
                            .filter(task_runs::status.eq(TaskRunStatus::Running.as_str())),
                    )
                    .set((
                        task_runs::status.eq(TaskRunStatus::Completed.as_str()),
                        task_runs::output_path.eq(&output_path),
                        task_runs::output_size.eq(output_size),
                        task_runs::assets.eq(assets.map(|v| v.to_string())),
                        task_runs::logs_path.eq(&logs_path),
                        task_runs::completed_at.eq(now),
                    ))
                    .execute(conn)
                }
            })
            .await?;

        if affected == 0 {
            return Err(QueueError::RunNotFound(run_id));
        }
        info!(run_id, "task run completed");
        self.notify_maintenance().await;
        Ok(())
    }

    pub async fn mark_failed(&self, run_id: &str, error: &str, error_code: Option<&str>) -> Result<(), QueueError> {
        let run_id = run_id.to_string();
        let error = error.to_string();
        let error_code = error_code.map(|s| s.to_string());
        let now = Utc::now().naive_utc();
        let affected = self
            .store
            .interact({
                let run_id = run_id.clone();
                move |conn| {
                    diesel::update(
                        task_runs::table
                            .filter(task_runs::id.eq(&run_id))
                            .filter(task_runs::status.eq_any([
                                TaskRunStatus::Running.as_str(),
                                TaskRunStatus::Timeout.as_str(),
                            ])),
                    )
                    .set((
                        task_runs::status.eq(TaskRunStatus::Failed.as_str()),
                        task_runs::error.eq(&error),
                        task_runs::error_code.eq(&error_code),
                        task_runs::completed_at.eq(now),
                    ))
                    .execute(conn)
                }
            })
            .await?;

        if affected == 0 {
            warn!(run_id, "mark_failed found no running/timeout run to transition");
            return Err(QueueError::RunNotFound(run_id));
        }
        self.notify_maintenance().await;
        Ok(())
    }

    async fn notify_maintenance(&self) {
        if let Some(maintenance) = &self.maintenance {
            if let Err(e) = maintenance.on_task_status_change().await {
                warn!(error = %e, "maintenance promotion check failed");
            }
        }
    }

    pub async fn get_status(&self) -> Result<QueueStatus, QueueError> {
        let counts: Vec<(String, i64)> = self
            .store
            .interact(|conn| {
                task_runs::table
                    .group_by(task_runs::status)
                    .select((task_runs::status, diesel::dsl::count_star()))
                    .load(conn)
            })
            .await?;

        let dlq_pending: i64 = self
            .store
            .interact(|conn| {
                dlq::table
                    .filter(dlq::retried_at.is_null())
                    .count()
                    .get_result(conn)
            })
            .await?;

        let oldest_pending_created_at: Option<NaiveDateTime> = self
            .store
            .interact(|conn| {
                task_runs::table
                    .filter(task_runs::status.eq(TaskRunStatus::Pending.as_str()))
                    .order(task_runs::created_at.asc())
                    .select(task_runs::created_at)
                    .first(conn)
                    .optional()
            })
            .await?;

        Ok(QueueStatus {
            by_status: counts.into_iter().collect(),
            dlq_pending,
            oldest_pending_created_at,
        })
    }

    pub async fn can_run_task(&self, task_id: &str) -> Result<bool, QueueError> {
        let task_id = task_id.to_string();
        let task: TaskRow = self
            .store
            .interact({
                let task_id = task_id.clone();
                move |conn| tasks::table.find(task_id).first(conn)
            })
            .await
            .map_err(|e| match e {
                crate::error::StoreError::Query(diesel::result::Error::NotFound) => {
                    QueueError::TaskNotFound(task_id.clone())
                }
                other => QueueError::Store(other),
            })?;

        if task.concurrency == 0 {
            return Ok(true);
        }

        let running: i64 = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::task_id.eq(&task_id))
                    .filter(task_runs::status.eq(TaskRunStatus::Running.as_str()))
                    .count()
                    .get_result(conn)
            })
            .await?;

        Ok(running < task.concurrency as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_path_differs_for_pipeline_vs_standalone_runs() {
        let pipeline = QueueManager::input_path(&Some("prun_1".to_string()), "trun_1");
        assert_eq!(pipeline, "runs/prun_1/tasks/trun_1/input.json");
        let standalone = QueueManager::input_path(&None, "trun_1");
        assert_eq!(standalone, "standalone/trun_1/input.json");
    }
}
