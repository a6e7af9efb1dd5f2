//! PipeweaveRunner (§6): wires every component onto one `Store` and owns
//! the dispatcher's lifecycle, mirroring the donor's `DefaultRunner`/
//! `DefaultRunnerConfig` builder split.

use std::sync::Arc;

use crate::config::OrchestratorConfig;
use crate::database::Store;
use crate::dispatcher::{Dispatcher, DispatcherConfig, WorkerTransport};
use crate::dlq::Dlq;
use crate::error::StoreError;
use crate::executor::PipelineExecutor;
use crate::heartbeat::HeartbeatMonitor;
use crate::idempotency::IdempotencyCache;
use crate::maintenance::Maintenance;
use crate::pipeline::PipelineValidator;
use crate::queue::QueueManager;
use crate::registry::ServiceRegistry;
use crate::retry::RetryManager;

/// Every component, already wired to a single `Store`. Cloning is cheap —
/// each field is itself a thin handle over a shared connection pool (or,
/// for `heartbeat`, a shared timer table) — so a `PipeweaveRunner` can be
/// handed to the HTTP layer and the dispatcher loop alike.
#[derive(Clone)]
pub struct PipeweaveRunner {
    pub store: Store,
    pub registry: ServiceRegistry,
    pub validator: PipelineValidator,
    pub queue: QueueManager,
    pub idempotency: IdempotencyCache,
    pub retry: RetryManager,
    pub dlq: Dlq,
    pub heartbeat: HeartbeatMonitor,
    pub maintenance: Maintenance,
    pub executor: Arc<PipelineExecutor>,
    pub dispatcher: Dispatcher,
}

pub struct PipeweaveRunnerBuilder {
    config: OrchestratorConfig,
    transport: Option<Arc<dyn WorkerTransport>>,
}

impl PipeweaveRunnerBuilder {
    pub fn new(config: OrchestratorConfig) -> Self {
        PipeweaveRunnerBuilder { config, transport: None }
    }

    pub fn transport(mut self, transport: Arc<dyn WorkerTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Connects the store, wires every component, sweeps stale heartbeats
    /// left over from a prior process (Open Question 3), and returns a
    /// runner ready to have its dispatcher started.
    pub async fn build(self) -> Result<PipeweaveRunner, StoreError> {
        let store = Store::connect(&self.config.database_url).await?;

        let registry = ServiceRegistry::new(store.clone());
        let validator = PipelineValidator::new(store.clone());
        let idempotency = IdempotencyCache::new(store.clone());
        let retry = RetryManager::new(store.clone());
        let dlq = Dlq::new(store.clone());
        let maintenance = Maintenance::new(store.clone());
        let queue = QueueManager::new(store.clone()).with_maintenance(maintenance.clone());
        let heartbeat = HeartbeatMonitor::new(store.clone(), registry.clone(), queue.clone(), retry.clone(), dlq.clone());
        let executor = Arc::new(PipelineExecutor::new(store.clone(), validator.clone(), queue.clone(), maintenance.clone()));

        let transport = self.transport.unwrap_or_else(|| Arc::new(crate::dispatcher::NullTransport));
        let dispatcher_config = DispatcherConfig {
            tick_interval: self.config.poll_interval,
            max_concurrency: self.config.max_concurrency as i64,
        };
        let dispatcher = Dispatcher::new(
            queue.clone(),
            registry.clone(),
            retry.clone(),
            dlq.clone(),
            heartbeat.clone(),
            maintenance.clone(),
            transport,
            dispatcher_config,
        );

        match heartbeat.recover_stale().await {
            Ok(0) => {}
            Ok(n) => tracing::info!(recovered = n, "recovered stale heartbeats from a prior process"),
            Err(e) => tracing::warn!(error = %e, "heartbeat recovery sweep failed"),
        }

        Ok(PipeweaveRunner { store, registry, validator, queue, idempotency, retry, dlq, heartbeat, maintenance, executor, dispatcher })
    }
}

impl PipeweaveRunner {
    /// Runs pending migrations then starts the dispatcher's continuous
    /// loop as a background task. No-op in tick-driven mode, where the
    /// caller invokes `dispatcher.tick()` from an API handler instead.
    pub async fn start(&self, mode: crate::config::DispatchMode) -> Result<Option<tokio::task::JoinHandle<()>>, StoreError> {
        self.store.run_migrations().await?;
        match mode {
            crate::config::DispatchMode::Continuous => {
                let dispatcher = self.dispatcher.clone();
                Ok(Some(tokio::spawn(async move { dispatcher.run_continuous().await })))
            }
            crate::config::DispatchMode::TickDriven => Ok(None),
        }
    }

    pub fn shutdown(&self) {
        self.dispatcher.shutdown();
    }
}
