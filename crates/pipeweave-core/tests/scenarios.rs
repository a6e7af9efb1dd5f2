//! End-to-end scenarios against an in-memory SQLite backend, one test per
//! acceptance scenario.

use std::collections::HashMap;

use diesel::prelude::*;
use pipeweave_core::database::Store;
use pipeweave_core::dlq::Dlq;
use pipeweave_core::executor::{PipelineExecutor, TriggerRequest};
use pipeweave_core::idempotency::IdempotencyCache;
use pipeweave_core::maintenance::Maintenance;
use pipeweave_core::models::{FailureMode, RetryBackoff, StructureNode, TaskRun, TaskRunRow, TaskRunStatus};
use pipeweave_core::pipeline::{PipelineDraft, PipelineValidator};
use pipeweave_core::queue::{EnqueueRequest, QueueManager};
use pipeweave_core::registry::{ServiceRegistry, TaskRegistration};
use pipeweave_core::retry::{RetryManager, RetryRequest};
use pipeweave_core::schema::{pipeline_runs, task_runs};

async fn fresh_store() -> Store {
    let store = Store::connect(":memory:").await.expect("in-memory sqlite should connect");
    store.run_migrations().await.expect("migrations should apply cleanly");
    store
}

fn task(id: &str, allowed_next: Vec<&str>) -> TaskRegistration {
    TaskRegistration {
        id: id.to_string(),
        allowed_next: allowed_next.into_iter().map(String::from).collect(),
        timeout_sec: 60,
        max_retries: 0,
        retry_backoff: RetryBackoff::Fixed,
        retry_delay_ms: 0,
        max_retry_delay_ms: 0,
        heartbeat_interval_ms: 5000,
        concurrency: 0,
        priority: 0,
        idempotency_ttl_sec: None,
        description: None,
    }
}

async fn fetch_run(store: &Store, run_id: &str) -> TaskRun {
    let run_id = run_id.to_string();
    let row: TaskRunRow = store.interact(move |conn| task_runs::table.find(run_id).first(conn)).await.unwrap();
    row.into()
}

async fn run_status(store: &Store, run_id: &str) -> TaskRunStatus {
    fetch_run(store, run_id).await.status
}

async fn pipeline_run_status(store: &Store, pipeline_run_id: &str) -> String {
    let id = pipeline_run_id.to_string();
    store.interact(move |conn| pipeline_runs::table.find(id).select(pipeline_runs::status).first(conn)).await.unwrap()
}

/// S1. Linear pipeline happy path: A -> B -> C, fail-fast. Each completion
/// enqueues the next task carrying the prior task's output in `upstreamRefs`.
#[tokio::test]
async fn linear_pipeline_runs_to_completion() {
    let store = fresh_store().await;
    let registry = ServiceRegistry::new(store.clone());
    let validator = PipelineValidator::new(store.clone());
    let maintenance = Maintenance::new(store.clone());
    let queue = QueueManager::new(store.clone()).with_maintenance(maintenance.clone());
    let executor = PipelineExecutor::new(store.clone(), validator.clone(), queue.clone(), maintenance.clone());

    registry
        .register("svc-1", "1.0.0", "http://worker.local", vec![task("A", vec!["B"]), task("B", vec!["C"]), task("C", vec![])])
        .await
        .expect("register should succeed");

    let mut structure = HashMap::new();
    structure.insert("A".to_string(), StructureNode { allowed_next: vec!["B".to_string()] });
    structure.insert("B".to_string(), StructureNode { allowed_next: vec!["C".to_string()] });
    structure.insert("C".to_string(), StructureNode { allowed_next: vec![] });
    validator
        .upsert(PipelineDraft {
            id: "p-linear".to_string(),
            name: "linear".to_string(),
            description: None,
            entry_tasks: vec!["A".to_string()],
            structure,
            failure_mode: FailureMode::FailFast,
        })
        .await
        .expect("upsert should validate");

    let trigger = executor
        .trigger_pipeline(TriggerRequest {
            pipeline_id: "p-linear".to_string(),
            failure_mode: None,
            priority: None,
            metadata: serde_json::json!({"x": 1}),
        })
        .await
        .expect("trigger should succeed");

    assert_eq!(trigger.entry_task_ids, vec!["A".to_string()]);
    let run_a = trigger.queued_task_run_ids[0].clone();
    assert_eq!(run_status(&store, &run_a).await, TaskRunStatus::Pending);

    queue.mark_running(&run_a).await.expect("A should claim");
    queue.mark_completed(&run_a, "o_A", None, None, None).await.expect("A should complete");
    let queued_b = executor.queue_downstream_tasks(&run_a, None).await.expect("B should be enqueued");
    assert_eq!(queued_b.len(), 1);
    let run_b = queued_b[0].clone();

    let b_run = fetch_run(&store, &run_b).await;
    assert_eq!(b_run.upstream_refs.get("A").map(|r| r.output_path.as_str()), Some("o_A"), "B's upstreamRefs should reference A's output path");

    queue.mark_running(&run_b).await.unwrap();
    queue.mark_completed(&run_b, "o_B", None, None, None).await.expect("B should complete");
    let queued_c = executor.queue_downstream_tasks(&run_b, None).await.expect("C should be enqueued");
    let run_c = queued_c[0].clone();

    queue.mark_running(&run_c).await.unwrap();
    queue.mark_completed(&run_c, "o_C", None, None, None).await.expect("C should complete");
    let queued_after_c = executor.queue_downstream_tasks(&run_c, None).await.expect("terminal completion resolves the run");
    assert!(queued_after_c.is_empty());

    assert_eq!(pipeline_run_status(&store, &trigger.pipeline_run_id).await, "completed");
}

/// S2 / S6. Diamond with join: A -> {B, C} -> D. D is enqueued exactly once,
/// when the second of {B, C} completes; failing B instead cancels C and
/// fails the run without D ever being enqueued.
fn diamond_structure() -> HashMap<String, StructureNode> {
    let mut structure = HashMap::new();
    structure.insert("A".to_string(), StructureNode { allowed_next: vec!["B".to_string(), "C".to_string()] });
    structure.insert("B".to_string(), StructureNode { allowed_next: vec!["D".to_string()] });
    structure.insert("C".to_string(), StructureNode { allowed_next: vec!["D".to_string()] });
    structure.insert("D".to_string(), StructureNode { allowed_next: vec![] });
    structure
}

async fn setup_diamond(store: &Store) -> (QueueManager, PipelineExecutor) {
    let registry = ServiceRegistry::new(store.clone());
    let validator = PipelineValidator::new(store.clone());
    let maintenance = Maintenance::new(store.clone());
    let queue = QueueManager::new(store.clone()).with_maintenance(maintenance.clone());
    let executor = PipelineExecutor::new(store.clone(), validator.clone(), queue.clone(), maintenance.clone());

    registry
        .register(
            "svc-1",
            "1.0.0",
            "http://worker.local",
            vec![task("A", vec!["B", "C"]), task("B", vec!["D"]), task("C", vec!["D"]), task("D", vec![])],
        )
        .await
        .expect("register should succeed");

    validator
        .upsert(PipelineDraft {
            id: "p-diamond".to_string(),
            name: "diamond".to_string(),
            description: None,
            entry_tasks: vec!["A".to_string()],
            structure: diamond_structure(),
            failure_mode: FailureMode::FailFast,
        })
        .await
        .expect("upsert should validate");

    (queue, executor)
}

#[tokio::test]
async fn diamond_join_enqueues_downstream_exactly_once() {
    let store = fresh_store().await;
    let (queue, executor) = setup_diamond(&store).await;

    let trigger = executor
        .trigger_pipeline(TriggerRequest {
            pipeline_id: "p-diamond".to_string(),
            failure_mode: None,
            priority: None,
            metadata: serde_json::Value::Null,
        })
        .await
        .expect("trigger should succeed");
    let run_a = trigger.queued_task_run_ids[0].clone();

    queue.mark_running(&run_a).await.unwrap();
    queue.mark_completed(&run_a, "o_A", None, None, None).await.unwrap();
    let queued_bc = executor.queue_downstream_tasks(&run_a, None).await.unwrap();
    assert_eq!(queued_bc.len(), 2, "both B and C should be enqueued once A completes");
    let run_b = queued_bc[0].clone();
    let run_c = queued_bc[1].clone();

    queue.mark_running(&run_b).await.unwrap();
    queue.mark_completed(&run_b, "o_B", None, None, None).await.unwrap();
    let after_b = executor.queue_downstream_tasks(&run_b, None).await.unwrap();
    assert!(after_b.is_empty(), "D must not be enqueued until both predecessors complete");

    queue.mark_running(&run_c).await.unwrap();
    queue.mark_completed(&run_c, "o_C", None, None, None).await.unwrap();
    let after_c = executor.queue_downstream_tasks(&run_c, None).await.unwrap();
    assert_eq!(after_c.len(), 1, "D should be enqueued exactly once, on the second predecessor's completion");

    let run_d = fetch_run(&store, &after_c[0]).await;
    assert!(
        run_d.upstream_refs.contains_key("B") && run_d.upstream_refs.contains_key("C"),
        "D's upstreamRefs should carry both predecessors' outputs"
    );
}

#[tokio::test]
async fn fail_fast_cancels_siblings_and_skips_join() {
    let store = fresh_store().await;
    let (queue, executor) = setup_diamond(&store).await;

    let trigger = executor
        .trigger_pipeline(TriggerRequest {
            pipeline_id: "p-diamond".to_string(),
            failure_mode: None,
            priority: None,
            metadata: serde_json::Value::Null,
        })
        .await
        .unwrap();
    let run_a = trigger.queued_task_run_ids[0].clone();

    queue.mark_running(&run_a).await.unwrap();
    queue.mark_completed(&run_a, "o_A", None, None, None).await.unwrap();
    let queued_bc = executor.queue_downstream_tasks(&run_a, None).await.unwrap();
    let run_b = queued_bc[0].clone();
    let run_c = queued_bc[1].clone();

    queue.mark_running(&run_b).await.unwrap();
    queue.mark_failed(&run_b, "boom", Some("WORKER_ERROR")).await.unwrap();
    executor.handle_task_failure(&run_b).await.unwrap();

    assert_eq!(run_status(&store, &run_c).await, TaskRunStatus::Cancelled);
    assert_eq!(pipeline_run_status(&store, &trigger.pipeline_run_id).await, "failed");
}

/// S3. Retry then DLQ: each failed attempt is scheduled for retry until
/// `maxRetries` is exhausted, at which point the run lands in the DLQ with
/// its full attempt history intact.
#[tokio::test]
async fn retry_exhaustion_lands_in_dlq() {
    let store = fresh_store().await;
    let registry = ServiceRegistry::new(store.clone());
    let queue = QueueManager::new(store.clone());
    let retry = RetryManager::new(store.clone());
    let dlq = Dlq::new(store.clone());

    registry.register("svc-1", "1.0.0", "http://worker.local", vec![task("X", vec![])]).await.unwrap();

    let enqueued = queue.enqueue("X", EnqueueRequest::default()).await.unwrap();
    let run_id = enqueued.run_id;
    // maxRetries=2: attempt 1 retries to attempt 2, attempt 2 retries to
    // attempt 3, attempt 3 exhausts — attempt reaches maxRetries+1.
    let max_retries = 2;
    let mut retried_count = 0;

    loop {
        queue.mark_running(&run_id).await.unwrap();
        let run = fetch_run(&store, &run_id).await;
        let scheduled = retry
            .schedule_retry(RetryRequest {
                run_id: run_id.clone(),
                attempt: run.attempt,
                max_retries,
                retry_backoff: RetryBackoff::Exponential,
                retry_delay_ms: 100,
                max_retry_delay_ms: 10_000,
                error: format!("boom (attempt {})", run.attempt),
                error_code: Some("E1".to_string()),
            })
            .await
            .unwrap();
        if !scheduled {
            break;
        }
        retried_count += 1;
        assert!(retried_count <= max_retries + 1, "retry loop should terminate once attempts are exhausted");
    }
    assert_eq!(retried_count, max_retries, "exactly maxRetries retries should be scheduled before exhaustion");

    let exhausted = fetch_run(&store, &run_id).await;
    assert_eq!(exhausted.attempt, max_retries + 1, "attempt should reach maxRetries + 1 before exhausting");
    dlq.add(&exhausted, "boom again").await.unwrap();
    queue.mark_failed(&run_id, "boom again", Some("E1")).await.unwrap();

    assert_eq!(run_status(&store, &run_id).await, TaskRunStatus::Failed);
    let pending = dlq.list(10, 0).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(
        pending[0].previous_attempts.len(),
        max_retries as usize,
        "previousAttempts should hold the retried attempts, not the final failure"
    );
}

/// S4. Idempotent payment: a second enqueue with the same key returns the
/// cached run instead of inserting a new row.
#[tokio::test]
async fn idempotent_enqueue_returns_cached_run() {
    let store = fresh_store().await;
    let registry = ServiceRegistry::new(store.clone());
    let queue = QueueManager::new(store.clone());
    let idempotency = IdempotencyCache::new(store.clone());

    registry.register("svc-1", "1.0.0", "http://worker.local", vec![task("pay", vec![])]).await.unwrap();

    let first = queue
        .enqueue("pay", EnqueueRequest { idempotency_key: Some("v1-o1".to_string()), ..Default::default() })
        .await
        .unwrap();
    queue.mark_running(&first.run_id).await.unwrap();
    queue.mark_completed(&first.run_id, "o_pay", None, None, None).await.unwrap();
    idempotency.store("v1-o1", "pay", &first.run_id, 1, "o_pay", 3600, None, None).await.unwrap();

    let second = queue
        .enqueue("pay", EnqueueRequest { idempotency_key: Some("v1-o1".to_string()), ..Default::default() })
        .await
        .unwrap();

    assert_eq!(second.run_id, first.run_id);
    assert_eq!(second.input_path, "o_pay");
    assert_eq!(second.status, TaskRunStatus::Completed);

    let total: i64 =
        store.interact(|conn| task_runs::table.filter(task_runs::task_id.eq("pay")).count().get_result(conn)).await.unwrap();
    assert_eq!(total, 1, "the second enqueue must not insert a new TaskRun");
}

/// S5. Maintenance drain: requesting maintenance with active work waits,
/// then auto-promotes once the queue empties; registration stays admitted
/// throughout; exiting resumes normal dispatch.
#[tokio::test]
async fn maintenance_drains_then_resumes() {
    let store = fresh_store().await;
    let registry = ServiceRegistry::new(store.clone());
    let maintenance = Maintenance::new(store.clone());
    let queue = QueueManager::new(store.clone()).with_maintenance(maintenance.clone());

    registry.register("svc-1", "1.0.0", "http://worker.local", vec![task("T", vec![])]).await.unwrap();

    let pending = queue.enqueue("T", EnqueueRequest::default()).await.unwrap();
    let running = queue.enqueue("T", EnqueueRequest::default()).await.unwrap();
    queue.mark_running(&running.run_id).await.unwrap();

    let mode = maintenance.request_maintenance().await.unwrap();
    assert_eq!(mode, pipeweave_core::models::MaintenanceMode::WaitingForMaintenance);

    // registration stays admitted regardless of maintenance mode
    registry.register("svc-1", "1.0.1", "http://worker.local", vec![task("T", vec![])]).await.unwrap();

    queue.mark_completed(&running.run_id, "o_T", None, None, None).await.unwrap();
    assert_eq!(maintenance.state().await.unwrap().mode, pipeweave_core::models::MaintenanceMode::Maintenance);

    assert_eq!(run_status(&store, &pending.run_id).await, TaskRunStatus::Pending);

    maintenance.exit_maintenance().await.unwrap();
    assert!(maintenance.is_running().await.unwrap());
}
