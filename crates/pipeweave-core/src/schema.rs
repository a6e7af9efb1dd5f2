//! Diesel table definitions shared by the Postgres and SQLite backends.
//!
//! Column types are picked so the same declarations are valid under both
//! dialects, which is what lets `database::AnyConnection`'s
//! `#[derive(diesel::MultiConnection)]` generate one DSL usable against
//! either backend. JSON-shaped columns are stored as `Text` and
//! (de)serialized by the model layer.

diesel::table! {
    services (id) {
        id -> Text,
        version -> Text,
        base_url -> Text,
        registered_at -> Timestamp,
        last_heartbeat -> Timestamp,
        status -> Text,
    }
}

diesel::table! {
    tasks (id) {
        id -> Text,
        service_id -> Text,
        code_hash -> Text,
        code_version -> Integer,
        allowed_next -> Text,
        timeout_sec -> Integer,
        max_retries -> Integer,
        retry_backoff -> Text,
        retry_delay_ms -> BigInt,
        max_retry_delay_ms -> BigInt,
        heartbeat_interval_ms -> BigInt,
        concurrency -> Integer,
        priority -> Integer,
        idempotency_ttl_sec -> Nullable<Integer>,
        description -> Nullable<Text>,
    }
}

diesel::table! {
    task_code_history (id) {
        id -> Text,
        task_id -> Text,
        code_version -> Integer,
        code_hash -> Text,
        service_version -> Text,
        recorded_at -> Timestamp,
    }
}

diesel::table! {
    pipelines (id) {
        id -> Text,
        name -> Text,
        description -> Nullable<Text>,
        entry_tasks -> Text,
        structure -> Text,
        version -> Integer,
        failure_mode -> Text,
        created_at -> Timestamp,
        updated_at -> Timestamp,
    }
}

diesel::table! {
    pipeline_runs (id) {
        id -> Text,
        pipeline_id -> Text,
        pipeline_version -> Integer,
        structure_snapshot -> Text,
        status -> Text,
        input_path -> Text,
        failure_mode -> Text,
        created_at -> Timestamp,
        completed_at -> Nullable<Timestamp>,
        metadata -> Text,
    }
}

diesel::table! {
    task_runs (id) {
        id -> Text,
        task_id -> Text,
        pipeline_run_id -> Nullable<Text>,
        status -> Text,
        code_version -> Integer,
        code_hash -> Text,
        attempt -> Integer,
        max_retries -> Integer,
        priority -> Integer,
        input_path -> Text,
        output_path -> Nullable<Text>,
        output_size -> Nullable<BigInt>,
        assets -> Nullable<Text>,
        logs_path -> Nullable<Text>,
        upstream_refs -> Text,
        previous_attempts -> Text,
        idempotency_key -> Nullable<Text>,
        scheduled_for -> Nullable<Timestamp>,
        heartbeat_at -> Nullable<Timestamp>,
        started_at -> Nullable<Timestamp>,
        completed_at -> Nullable<Timestamp>,
        error -> Nullable<Text>,
        error_code -> Nullable<Text>,
        metadata -> Text,
        created_at -> Timestamp,
    }
}

diesel::table! {
    dlq (id) {
        id -> Text,
        task_run_id -> Text,
        task_id -> Text,
        pipeline_run_id -> Nullable<Text>,
        code_version -> Integer,
        code_hash -> Text,
        error -> Text,
        attempts -> Integer,
        input_path -> Text,
        upstream_refs -> Text,
        previous_attempts -> Text,
        failed_at -> Timestamp,
        retried_at -> Nullable<Timestamp>,
        retry_run_id -> Nullable<Text>,
    }
}

diesel::table! {
    idempotency_cache (cache_key) {
        cache_key -> Text,
        task_id -> Text,
        task_run_id -> Text,
        code_version -> Integer,
        output_path -> Text,
        output_size -> Nullable<BigInt>,
        assets -> Nullable<Text>,
        cached_at -> Timestamp,
        expires_at -> Timestamp,
    }
}

diesel::table! {
    maintenance_state (id) {
        id -> Integer,
        mode -> Text,
        mode_changed_at -> Timestamp,
    }
}

diesel::allow_tables_to_appear_in_same_query!(
    services,
    tasks,
    task_code_history,
    pipelines,
    pipeline_runs,
    task_runs,
    dlq,
    idempotency_cache,
    maintenance_state,
);
