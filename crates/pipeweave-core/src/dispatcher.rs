//! Dispatcher (§4.9): the scheduler loop that claims pending runs and hands
//! them to a worker transport, in continuous or tick-driven mode.
//!
//! Grounded on the donor's `dispatcher/work_distributor.rs`: a periodic
//! driver with a cancellation flag plus `Notify` for prompt shutdown, one
//! `tokio::spawn` per claimed run so a single dispatch failure never blocks
//! its siblings in the same tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;
use tracing::{error, info, warn};

use crate::dlq::Dlq;
use crate::heartbeat::HeartbeatMonitor;
use crate::maintenance::Maintenance;
use crate::models::{AttemptRecord, RetryBackoff, TaskRun};
use crate::queue::QueueManager;
use crate::registry::ServiceRegistry;
use crate::retry::{RetryManager, RetryRequest};

/// What a dispatched task run is handed to the worker transport — the
/// full wire shape a worker needs to execute and report back on a run,
/// not just its identity.
#[derive(Debug, Clone)]
pub struct DispatchPayload {
    pub task_run_id: String,
    pub task_id: String,
    pub code_version: i32,
    pub code_hash: String,
    pub input_path: String,
    pub upstream_refs: Value,
    pub credential: String,
    pub attempt: i32,
    pub previous_attempts: Vec<AttemptRecord>,
    pub metadata: Value,
}

/// The "transport to workers" collaborator the design calls out of scope:
/// abstracted behind a trait so `pipeweave_server` can supply a
/// `reqwest`-based implementation and tests a fake, without the dispatcher
/// loop knowing which.
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// Delivers `payload` to the worker owning its task. Returning `Err`
    /// is a synchronous dispatch failure (unreachable, rejected, timed
    /// out) — the dispatcher routes it through retry-or-DLQ exactly like
    /// any other task failure, tagged `DISPATCH_FAILED`.
    async fn dispatch(&self, base_url: &str, payload: DispatchPayload) -> Result<(), String>;

    /// Mints the short-lived credential token the transport attaches to
    /// `payload.credential`; delegated to the transport because signing
    /// is an external collaborator's concern, not the dispatcher's.
    async fn mint_credential(&self, task_run_id: &str) -> String {
        let _ = task_run_id;
        String::new()
    }
}

/// Default transport wired when a runner is built without an explicit
/// one (tests, `dryRun`-only embeddings): every dispatch fails
/// immediately, which routes straight into the retry-or-DLQ path rather
/// than hanging.
pub struct NullTransport;

#[async_trait]
impl WorkerTransport for NullTransport {
    async fn dispatch(&self, _base_url: &str, _payload: DispatchPayload) -> Result<(), String> {
        Err("no worker transport configured".to_string())
    }
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    pub tick_interval: Duration,
    pub max_concurrency: i64,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig { tick_interval: Duration::from_secs(1), max_concurrency: 10 }
    }
}

struct Inner {
    queue: QueueManager,
    registry: ServiceRegistry,
    retry: RetryManager,
    dlq: Dlq,
    heartbeat: HeartbeatMonitor,
    maintenance: Maintenance,
    transport: Arc<dyn WorkerTransport>,
    config: DispatcherConfig,
    shutdown: AtomicBool,
    notify: Notify,
}

/// Drives the claim-dispatch loop. `run_continuous` owns the loop;
/// `tick` is the unit the tick-driven deployment mode (an external
/// scheduler hitting an API endpoint) calls directly.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    pub fn new(
        queue: QueueManager,
        registry: ServiceRegistry,
        retry: RetryManager,
        dlq: Dlq,
        heartbeat: HeartbeatMonitor,
        maintenance: Maintenance,
        transport: Arc<dyn WorkerTransport>,
        config: DispatcherConfig,
    ) -> Self {
        Dispatcher {
            inner: Arc::new(Inner {
                queue,
                registry,
                retry,
                dlq,
                heartbeat,
                maintenance,
                transport,
                config,
                shutdown: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Runs the continuous-mode loop until `shutdown` is called. Intended
    /// to be spawned as its own task by `runner.rs`.
    pub async fn run_continuous(&self) {
        let mut interval = tokio::time::interval(self.inner.config.tick_interval);
        loop {
            if self.inner.shutdown.load(Ordering::SeqCst) {
                info!("dispatcher shutting down");
                return;
            }
            tokio::select! {
                _ = interval.tick() => {}
                _ = self.inner.notify.notified() => {
                    if self.inner.shutdown.load(Ordering::SeqCst) {
                        return;
                    }
                }
            }
            if let Err(e) = self.tick().await {
                error!(error = %e, "dispatcher tick failed; continuing");
            }
        }
    }

    pub fn shutdown(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Runs exactly one tick: claims up to `maxConcurrency` runs and
    /// dispatches each in its own task. Returns the number of runs
    /// claimed this tick.
    pub async fn tick(&self) -> Result<usize, crate::error::QueueError> {
        if !self.inner.maintenance.is_running().await.unwrap_or(false) {
            return Ok(0);
        }

        let claimed = self.inner.queue.get_next(self.inner.config.max_concurrency).await?;
        let count = claimed.len();
        for run in claimed {
            let dispatcher = self.clone();
            tokio::spawn(async move { dispatcher.dispatch_one(run).await });
        }
        Ok(count)
    }

    async fn dispatch_one(&self, run: TaskRun) {
        if let Err(e) = self.inner.queue.mark_running(&run.id).await {
            warn!(run_id = %run.id, error = %e, "failed to mark run running; skipping dispatch");
            return;
        }

        let task = match self.inner.registry.get_task(&run.task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                warn!(run_id = %run.id, task_id = %run.task_id, "task definition missing at dispatch time");
                self.fail_dispatch(&run, RetryBackoff::Fixed, 0, 0, 0, "task definition missing").await;
                return;
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "failed to load task definition");
                return;
            }
        };

        let credential = self.inner.transport.mint_credential(&run.id).await;
        let payload = DispatchPayload {
            task_run_id: run.id.clone(),
            task_id: run.task_id.clone(),
            code_version: run.code_version,
            code_hash: run.code_hash.clone(),
            input_path: run.input_path.clone(),
            upstream_refs: serde_json::to_value(&run.upstream_refs).unwrap_or(Value::Null),
            credential,
            attempt: run.attempt,
            previous_attempts: run.previous_attempts.clone(),
            metadata: run.metadata.clone(),
        };

        let base_url = match self.inner.registry.get_service(&task.service_id).await {
            Ok(Some(service)) => service.base_url,
            _ => {
                warn!(run_id = %run.id, service_id = %task.service_id, "owning service missing at dispatch time");
                self.fail_dispatch(
                    &run,
                    task.retry_backoff,
                    task.max_retries,
                    task.retry_delay_ms,
                    task.max_retry_delay_ms,
                    "owning service missing",
                )
                .await;
                return;
            }
        };

        match self.inner.transport.dispatch(&base_url, payload).await {
            Ok(()) => {
                self.inner.heartbeat.start_tracking(&run.id, &run.task_id, task.heartbeat_interval_ms).await;
            }
            Err(e) => {
                warn!(run_id = %run.id, error = %e, "dispatch failed");
                self.fail_dispatch(
                    &run,
                    task.retry_backoff,
                    task.max_retries,
                    task.retry_delay_ms,
                    task.max_retry_delay_ms,
                    &e,
                )
                .await;
            }
        }
    }

    /// On synchronous dispatch error: retry if attempts remain, else DLQ
    /// then mark the run failed, tagged `DISPATCH_FAILED` throughout.
    async fn fail_dispatch(
        &self,
        run: &TaskRun,
        retry_backoff: RetryBackoff,
        max_retries: i32,
        retry_delay_ms: i64,
        max_retry_delay_ms: i64,
        error: &str,
    ) {
        let scheduled = self
            .inner
            .retry
            .schedule_retry(RetryRequest {
                run_id: run.id.clone(),
                attempt: run.attempt,
                max_retries,
                retry_backoff,
                retry_delay_ms,
                max_retry_delay_ms,
                error: error.to_string(),
                error_code: Some("DISPATCH_FAILED".to_string()),
            })
            .await
            .unwrap_or(false);

        if !scheduled {
            self.inner.dlq.add(run, error).await.ok();
            self.inner.queue.mark_failed(&run.id, error, Some("DISPATCH_FAILED")).await.ok();
        }
    }
}
