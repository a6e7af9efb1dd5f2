//! HeartbeatMonitor (§4.8): in-process cooperative timers keyed by run id,
//! plus the retry-or-DLQ hand-off on timeout that the design calls out as
//! required but left unwired, and the startup recovery sweep for timers
//! lost across a process restart (Open Question 3).

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{info, warn};

use crate::dlq::Dlq;
use crate::error::HeartbeatError;
use crate::models::{TaskRun, TaskRunRow, TaskRunStatus};
use crate::queue::QueueManager;
use crate::registry::ServiceRegistry;
use crate::retry::{RetryManager, RetryRequest};
use crate::schema::{task_runs, tasks};
use crate::database::Store;

struct Timer {
    handle: JoinHandle<()>,
    task_id: String,
    heartbeat_interval_ms: i64,
}

struct Inner {
    store: Store,
    registry: ServiceRegistry,
    queue: QueueManager,
    retry: RetryManager,
    dlq: Dlq,
    timers: Mutex<HashMap<String, Timer>>,
}

/// Cloning a `HeartbeatMonitor` shares the same timer table — every clone
/// is a handle onto one monitor, matching how `runner.rs` hands it to both
/// the dispatcher and the HTTP heartbeat route.
#[derive(Clone)]
pub struct HeartbeatMonitor {
    inner: Arc<Inner>,
}

impl HeartbeatMonitor {
    pub fn new(store: Store, registry: ServiceRegistry, queue: QueueManager, retry: RetryManager, dlq: Dlq) -> Self {
        HeartbeatMonitor {
            inner: Arc::new(Inner { store, registry, queue, retry, dlq, timers: Mutex::new(HashMap::new()) }),
        }
    }

    /// Arms a timer for `2 * heartbeat_interval_ms`; any existing timer
    /// for `run_id` is cancelled first.
    pub async fn start_tracking(&self, run_id: &str, task_id: &str, heartbeat_interval_ms: i64) {
        self.cancel_tracking(run_id).await;

        let deadline = Duration::from_millis((heartbeat_interval_ms.max(0) as u64).saturating_mul(2));
        let monitor = self.clone();
        let run_id_owned = run_id.to_string();
        let handle = tokio::spawn(async move {
            sleep(deadline).await;
            monitor.fire_timeout(&run_id_owned).await;
        });

        self.inner.timers.lock().await.insert(
            run_id.to_string(),
            Timer { handle, task_id: task_id.to_string(), heartbeat_interval_ms },
        );
    }

    /// Writes `heartbeat_at=now` and a `metadata.progress` patch, then
    /// resets the timer using the interval it was originally armed with.
    pub async fn record_heartbeat(
        &self,
        run_id: &str,
        progress: Option<Value>,
    ) -> Result<(), HeartbeatError> {
        let (task_id, interval_ms) = {
            let timers = self.inner.timers.lock().await;
            let timer = timers.get(run_id).ok_or_else(|| HeartbeatError::NotTracked(run_id.to_string()))?;
            (timer.task_id.clone(), timer.heartbeat_interval_ms)
        };

        let run_id_s = run_id.to_string();
        let now = Utc::now().naive_utc();
        let affected = self
            .inner
            .store
            .interact(move |conn| -> diesel::QueryResult<usize> {
                let row: TaskRunRow = task_runs::table.find(&run_id_s).first(conn)?;
                let mut metadata: Value =
                    serde_json::from_str(&row.metadata).unwrap_or(Value::Object(Default::default()));
                if let Some(p) = progress {
                    if let Value::Object(ref mut map) = metadata {
                        map.insert("progress".to_string(), p);
                    }
                }
                diesel::update(task_runs::table.find(&run_id_s))
                    .set((task_runs::heartbeat_at.eq(now), task_runs::metadata.eq(metadata.to_string())))
                    .execute(conn)
            })
            .await?;

        if affected == 0 {
            return Err(HeartbeatError::NotTracked(run_id.to_string()));
        }

        self.start_tracking(run_id, &task_id, interval_ms).await;
        Ok(())
    }

    pub async fn cancel_tracking(&self, run_id: &str) {
        if let Some(timer) = self.inner.timers.lock().await.remove(run_id) {
            timer.handle.abort();
        }
    }

    async fn fire_timeout(&self, run_id: &str) {
        self.inner.timers.lock().await.remove(run_id);
        if let Err(e) = self.finalize_timeout(run_id).await {
            warn!(run_id, error = %e, "heartbeat timeout handling failed");
        }
    }

    /// Transitions a `running` row to `timeout`, then routes it through
    /// retry-or-DLQ exactly like a worker-reported failure would. A no-op
    /// if the row is no longer `running` (already completed/failed/etc by
    /// the time the timer fired).
    async fn finalize_timeout(&self, run_id: &str) -> Result<(), HeartbeatError> {
        let run_id_s = run_id.to_string();
        let now = Utc::now().naive_utc();
        let affected = self
            .inner
            .store
            .interact(move |conn| {
                diesel::update(
                    task_runs::table
                        .filter(task_runs::id.eq(&run_id_s))
                        .filter(task_runs::status.eq(TaskRunStatus::Running.as_str())),
                )
                .set((
                    task_runs::status.eq(TaskRunStatus::Timeout.as_str()),
                    task_runs::error.eq("Task heartbeat timeout"),
                    task_runs::error_code.eq("TIMEOUT"),
                    task_runs::completed_at.eq(now),
                ))
                .execute(conn)
            })
            .await?;

        if affected == 0 {
            return Ok(());
        }

        info!(run_id, "task run timed out waiting for a heartbeat");

        let run_id_owned = run_id.to_string();
        let row: TaskRunRow = self
            .inner
            .store
            .interact(move |conn| task_runs::table.find(run_id_owned).first(conn))
            .await?;
        let task_run: TaskRun = row.into();

        let task = self.inner.registry.get_task(&task_run.task_id).await.ok().flatten();
        let Some(task) = task else {
            warn!(run_id, "timed-out run's task definition is gone; leaving as timeout");
            return Ok(());
        };

        let scheduled = match self
            .inner
            .retry
            .schedule_retry(RetryRequest {
                run_id: task_run.id.clone(),
                attempt: task_run.attempt,
                max_retries: task.max_retries,
                retry_backoff: task.retry_backoff,
                retry_delay_ms: task.retry_delay_ms,
                max_retry_delay_ms: task.max_retry_delay_ms,
                error: "Task heartbeat timeout".to_string(),
                error_code: Some("TIMEOUT".to_string()),
            })
            .await
        {
            Ok(scheduled) => scheduled,
            Err(e) => {
                warn!(run_id, error = %e, "failed to schedule retry after heartbeat timeout");
                false
            }
        };

        if !scheduled {
            self.inner.dlq.add(&task_run, "Task heartbeat timeout").await.ok();
            self.inner
                .queue
                .mark_failed(&task_run.id, "Task heartbeat timeout", Some("TIMEOUT"))
                .await
                .ok();
        }

        Ok(())
    }

    /// Startup sweep (Open Question 3): in-memory timers do not survive a
    /// restart, so any `running` row whose heartbeat is already overdue by
    /// the time the process comes back up needs to be timed out explicitly
    /// instead of waiting on a timer that will never fire.
    pub async fn recover_stale(&self) -> Result<usize, HeartbeatError> {
        let candidates: Vec<(String, Option<chrono::NaiveDateTime>, Option<chrono::NaiveDateTime>, i64)> = self
            .inner
            .store
            .interact(|conn| {
                task_runs::table
                    .inner_join(tasks::table.on(tasks::id.eq(task_runs::task_id)))
                    .filter(task_runs::status.eq(TaskRunStatus::Running.as_str()))
                    .select((
                        task_runs::id,
                        task_runs::heartbeat_at,
                        task_runs::started_at,
                        tasks::heartbeat_interval_ms,
                    ))
                    .load(conn)
            })
            .await
            .unwrap_or_default();

        let now = Utc::now().naive_utc();
        let mut recovered = 0;
        for (run_id, heartbeat_at, started_at, interval_ms) in candidates {
            let last_signal = heartbeat_at.or(started_at).unwrap_or(now);
            let deadline = last_signal + ChronoDuration::milliseconds(interval_ms * 2);
            if deadline < now {
                self.finalize_timeout(&run_id).await?;
                recovered += 1;
            }
        }
        Ok(recovered)
    }
}
