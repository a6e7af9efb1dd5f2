//! End-to-end HTTP tests against the merged router, one `#[tokio::test]`
//! per request flow, each against its own `":memory:"` SQLite runner.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusHandle;
use pipeweave_core::config::{DispatchMode, OrchestratorConfigBuilder};
use pipeweave_core::runner::PipeweaveRunnerBuilder;
use pipeweave_core::PipeweaveRunner;
use pipeweave_server::state::AppState;
use serde_json::{json, Value};
use tower::ServiceExt;

/// `PrometheusBuilder::install_recorder` sets the process-wide global
/// recorder; installing it more than once errors, so every test in this
/// binary shares a single handle instead of each installing its own.
fn metrics_handle() -> PrometheusHandle {
    static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
    HANDLE.get_or_init(|| pipeweave_server::metrics::install().expect("metrics recorder installs exactly once")).clone()
}

async fn test_app() -> (axum::Router, Arc<PipeweaveRunner>) {
    let config = OrchestratorConfigBuilder::new().database_url(":memory:").mode(DispatchMode::TickDriven).build();
    let runner = PipeweaveRunnerBuilder::new(config).build().await.expect("runner should build against in-memory sqlite");
    runner.start(DispatchMode::TickDriven).await.expect("migrations should apply and tick-driven start should no-op");

    let runner = Arc::new(runner);
    let state = AppState { runner: runner.clone(), mode: DispatchMode::TickDriven, dlq_retention_days: 30 };
    (pipeweave_server::routes::build(state, 1024 * 1024, metrics_handle()), runner)
}

async fn send(app: &axum::Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let body = match body {
        Some(v) => Body::from(v.to_string()),
        None => Body::empty(),
    };
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(body)
        .expect("request should build");
    let response = app.clone().oneshot(request).await.expect("router should never fail to produce a response");
    let status = response.status();
    let bytes = to_bytes(response.into_body(), 1024 * 1024).await.expect("body should read");
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).expect("body should be json") };
    (status, json)
}

async fn register_linear_pipeline(app: &axum::Router) {
    let (status, _) = send(
        app,
        "POST",
        "/api/register",
        Some(json!({
            "serviceId": "svc-1",
            "version": "1.0.0",
            "baseUrl": "http://worker.local",
            "tasks": [
                {"id": "A", "allowedNext": ["B"], "timeoutSec": 30, "maxRetries": 1},
                {"id": "B", "allowedNext": [], "timeoutSec": 30, "maxRetries": 1}
            ]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        app,
        "POST",
        "/api/pipelines",
        Some(json!({
            "id": "p-linear",
            "name": "linear",
            "entryTasks": ["A"],
            "structure": {
                "A": {"allowed_next": ["B"]},
                "B": {"allowed_next": []}
            }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn health_reports_running_and_accepting() {
    let (app, _runner) = test_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["canAcceptTasks"], true);
    assert_eq!(body["runningTasks"], 0);
}

#[tokio::test]
async fn register_upsert_trigger_and_callback_drive_pipeline_to_completion() {
    let (app, _runner) = test_app().await;
    register_linear_pipeline(&app).await;

    let (status, trigger_body) = send(&app, "POST", "/api/pipelines/p-linear/trigger", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let pipeline_run_id = trigger_body["pipelineRunId"].as_str().unwrap().to_string();
    let queued_run_ids = trigger_body["queuedTaskRunIds"].as_array().unwrap();
    assert_eq!(queued_run_ids.len(), 1);
    let run_a = queued_run_ids[0].as_str().unwrap().to_string();

    let (status, callback_body) = send(
        &app,
        "POST",
        &format!("/api/callback/{run_a}"),
        Some(json!({"status": "success", "outputPath": "out/a.json"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(callback_body["ok"], true);
    let queued_downstream = callback_body["queuedTaskRunIds"].as_array().unwrap();
    assert_eq!(queued_downstream.len(), 1, "B has a single predecessor and should enqueue as soon as A completes");
    let run_b = queued_downstream[0].as_str().unwrap().to_string();

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/callback/{run_b}"),
        Some(json!({"status": "success", "outputPath": "out/b.json"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, runs) = send(&app, "GET", "/api/pipeline-runs?pipelineId=p-linear", None).await;
    assert_eq!(status, StatusCode::OK);
    let runs = runs.as_array().unwrap();
    let this_run = runs.iter().find(|r| r["id"] == pipeline_run_id).expect("triggered run should be listed");
    assert_eq!(this_run["status"], "completed");
}

#[tokio::test]
async fn trigger_on_unknown_pipeline_returns_not_found() {
    let (app, _runner) = test_app().await;
    let (status, body) = send(&app, "POST", "/api/pipelines/does-not-exist/trigger", Some(json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].as_str().unwrap().contains("does-not-exist"));
}

#[tokio::test]
async fn dry_run_reports_entry_then_join_levels() {
    let (app, _runner) = test_app().await;
    register_linear_pipeline(&app).await;
    let (status, body) = send(&app, "POST", "/api/pipelines/p-linear/dry-run", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["pipelineId"], "p-linear");
    let plan = body["plan"].as_array().unwrap();
    assert_eq!(plan.len(), 2, "A then B should land in two separate dispatch levels");
}

/// Drives a task through the tick-driven dispatcher with the default
/// `NullTransport`, whose dispatch attempts always fail — with
/// `maxRetries: 0` the very first attempt exhausts, landing the run in
/// the DLQ without ever reaching a worker.
#[tokio::test]
async fn tick_dispatch_failure_lands_in_dlq_and_supports_retry_and_purge() {
    let (app, _runner) = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/register",
        Some(json!({
            "serviceId": "svc-1",
            "version": "1.0.0",
            "baseUrl": "http://worker.local",
            "tasks": [{"id": "X", "allowedNext": [], "timeoutSec": 30, "maxRetries": 0}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/pipelines",
        Some(json!({"id": "p-x", "name": "x", "entryTasks": ["X"], "structure": {"X": {"allowed_next": []}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(&app, "POST", "/api/pipelines/p-x/trigger", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, tick_body) = send(&app, "POST", "/api/tick", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(tick_body["claimed"], 1);

    // dispatch_one runs in a spawned task; give it a moment to land in the DLQ.
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (status, dlq_entries) = send(&app, "GET", "/api/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = dlq_entries.as_array().unwrap();
    assert_eq!(entries.len(), 1, "exhausted dispatch should have produced exactly one DLQ entry");
    let entry_id = entries[0]["id"].as_str().unwrap().to_string();

    let (status, retry_body) = send(&app, "POST", &format!("/api/dlq/{entry_id}/retry"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(retry_body["newRunId"].as_str().is_some());

    let (status, purge_body) = send(&app, "POST", &format!("/api/dlq/{entry_id}/purge"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(purge_body["purged"], true);

    let (status, dlq_entries) = send(&app, "GET", "/api/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dlq_entries.as_array().unwrap().len(), 0, "purged entry should no longer be listed");
}

#[tokio::test]
async fn maintenance_request_then_exit_round_trips_through_http() {
    let (app, _runner) = test_app().await;

    let (status, body) = send(&app, "GET", "/api/maintenance", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "running");

    let (status, body) = send(&app, "POST", "/api/maintenance/request", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "maintenance", "no active runs means the drain completes immediately");

    let (status, body) = send(&app, "POST", "/api/maintenance/exit", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "running");
}

#[tokio::test]
async fn queue_status_reflects_a_pending_run() {
    let (app, _runner) = test_app().await;
    register_linear_pipeline(&app).await;
    send(&app, "POST", "/api/pipelines/p-linear/trigger", Some(json!({}))).await;

    let (status, body) = send(&app, "GET", "/api/queue/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["byStatus"]["pending"], 1);
}

/// A worker-reported failure is routed through the same retry-or-DLQ
/// policy as a dispatch failure or heartbeat timeout: with `maxRetries: 1`
/// the first failure is retried, the second exhausts and lands in the DLQ.
/// `mark_running` between the two calls stands in for the dispatcher
/// re-claiming the row after `scheduleRetry` reset it to `pending`.
#[tokio::test]
async fn callback_failure_retries_then_lands_in_dlq() {
    let (app, runner) = test_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/register",
        Some(json!({
            "serviceId": "svc-1",
            "version": "1.0.0",
            "baseUrl": "http://worker.local",
            "tasks": [{"id": "X", "allowedNext": [], "timeoutSec": 30, "maxRetries": 1}]
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        "POST",
        "/api/pipelines",
        Some(json!({"id": "p-x", "name": "x", "entryTasks": ["X"], "structure": {"X": {"allowed_next": []}}})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, trigger_body) = send(&app, "POST", "/api/pipelines/p-x/trigger", Some(json!({}))).await;
    assert_eq!(status, StatusCode::OK);
    let run_id = trigger_body["queuedTaskRunIds"][0].as_str().unwrap().to_string();

    runner.queue.mark_running(&run_id).await.expect("simulated dispatch should mark the run running");
    let (status, body) =
        send(&app, "POST", &format!("/api/callback/{run_id}"), Some(json!({"status": "failure", "error": "boom"}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retried"], true, "attempt 1 is within maxRetries=1 and should be retried, not exhausted");

    let (status, dlq_entries) = send(&app, "GET", "/api/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(dlq_entries.as_array().unwrap().len(), 0, "a retried failure should not land in the DLQ yet");

    runner.queue.mark_running(&run_id).await.expect("second simulated dispatch should mark the run running");
    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/callback/{run_id}"),
        Some(json!({"status": "failure", "error": "boom again"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retried"], false, "attempt 2 exceeds maxRetries=1 and should exhaust");

    let (status, dlq_entries) = send(&app, "GET", "/api/dlq", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries = dlq_entries.as_array().unwrap();
    assert_eq!(entries.len(), 1, "the exhausted attempt should have produced exactly one DLQ entry");
    assert_eq!(entries[0]["task_id"], "X");
}
