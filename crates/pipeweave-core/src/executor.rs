//! PipelineExecutor (§4.10): triggers pipeline runs, routes completions to
//! downstream tasks, and resolves pipeline-level success/failure.

use std::collections::HashMap;

use chrono::Utc;
use diesel::prelude::*;
use serde_json::Value;
use tracing::{info, warn};

use crate::database::Store;
use crate::error::ExecutorError;
use crate::graph::Level;
use crate::ids;
use crate::maintenance::Maintenance;
use crate::models::{
    FailureMode, PipelineRun, PipelineRunRow, PipelineRunStatus, TaskRun, TaskRunRow, TaskRunStatus, UpstreamRef,
};
use crate::pipeline::PipelineValidator;
use crate::queue::{EnqueueRequest, QueueManager};
use crate::schema::{pipeline_runs, task_runs};

#[derive(Debug, Clone)]
pub struct TriggerRequest {
    pub pipeline_id: String,
    pub failure_mode: Option<FailureMode>,
    pub priority: Option<i32>,
    pub metadata: Value,
}

#[derive(Debug, Clone)]
pub struct TriggerResult {
    pub pipeline_run_id: String,
    pub status: PipelineRunStatus,
    pub input_path: String,
    pub entry_task_ids: Vec<String>,
    pub queued_task_run_ids: Vec<String>,
}

pub struct PipelineExecutor {
    store: Store,
    validator: PipelineValidator,
    queue: QueueManager,
    maintenance: Maintenance,
}

impl PipelineExecutor {
    pub fn new(store: Store, validator: PipelineValidator, queue: QueueManager, maintenance: Maintenance) -> Self {
        PipelineExecutor { store, validator, queue, maintenance }
    }

    pub async fn trigger_pipeline(&self, req: TriggerRequest) -> Result<TriggerResult, ExecutorError> {
        if !self.maintenance.is_running().await? {
            return Err(ExecutorError::MaintenanceDenied);
        }

        let pipeline = self
            .validator
            .get(&req.pipeline_id)
            .await?
            .ok_or_else(|| crate::error::ValidationError::PipelineNotFound(req.pipeline_id.clone()))?;

        let draft = crate::pipeline::PipelineDraft {
            id: pipeline.id.clone(),
            name: pipeline.name.clone(),
            description: pipeline.description.clone(),
            entry_tasks: pipeline.entry_tasks.clone(),
            structure: pipeline.structure.clone(),
            failure_mode: pipeline.failure_mode,
        };
        self.validator.validate(&draft).await?;

        let run_id = ids::mint(ids::PIPELINE_RUN_PREFIX);
        let input_path = format!("runs/{run_id}/input.json");
        let failure_mode = req.failure_mode.unwrap_or(pipeline.failure_mode);
        let now = Utc::now().naive_utc();

        let pipeline_run = PipelineRun {
            id: run_id.clone(),
            pipeline_id: pipeline.id.clone(),
            pipeline_version: pipeline.version,
            structure_snapshot: pipeline.structure.clone(),
            status: PipelineRunStatus::Running,
            input_path: input_path.clone(),
            failure_mode,
            created_at: now,
            completed_at: None,
            metadata: req.metadata.clone(),
        };
        let row: PipelineRunRow = pipeline_run.into();

        // Open Question 6: the `PipelineRun` insert and every entry
        // task's enqueue share one transaction, so a mid-loop failure
        // leaves no pipeline run with zero queued entry tasks.
        let entry_tasks = pipeline.entry_tasks.clone();
        let run_id_for_txn = run_id.clone();
        let queued: Vec<String> = self
            .store
            .transaction(move |conn| -> Result<Vec<String>, diesel::result::Error> {
                diesel::insert_into(pipeline_runs::table).values(&row).execute(conn)?;

                let mut queued = Vec::new();
                for entry_task in &entry_tasks {
                    let enqueued = QueueManager::enqueue_in_conn(
                        conn,
                        entry_task,
                        EnqueueRequest {
                            priority: req.priority,
                            pipeline_run_id: Some(run_id_for_txn.clone()),
                            upstream_refs: HashMap::new(),
                            metadata: req.metadata.clone(),
                            idempotency_key: None,
                            scheduled_for: None,
                        },
                    )?;
                    queued.push(enqueued.run_id);
                }
                Ok(queued)
            })
            .await?;

        info!(pipeline_run_id = %run_id, entry_tasks = pipeline.entry_tasks.len(), "pipeline triggered");

        Ok(TriggerResult {
            pipeline_run_id: run_id,
            status: PipelineRunStatus::Running,
            input_path,
            entry_task_ids: pipeline.entry_tasks,
            queued_task_run_ids: queued,
        })
    }

    /// Resolves predecessors of `task_id` from a frozen structure
    /// snapshot: any node whose `allowed_next` contains it.
    fn predecessors_in_snapshot(structure_snapshot: &crate::models::Structure, task_id: &str) -> Vec<String> {
        structure_snapshot
            .iter()
            .filter(|(_, node)| node.allowed_next.iter().any(|n| n == task_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn queue_downstream_tasks(
        &self,
        completed_task_run_id: &str,
        selected_next: Option<Vec<String>>,
    ) -> Result<Vec<String>, ExecutorError> {
        let run_id = completed_task_run_id.to_string();
        let row: TaskRunRow = self
            .store
            .interact(move |conn| task_runs::table.find(run_id).first(conn))
            .await
            .map_err(|_| ExecutorError::RunNotFound(completed_task_run_id.to_string()))?;
        let completed: TaskRun = row.into();

        let Some(pipeline_run_id) = completed.pipeline_run_id.clone() else {
            return Ok(Vec::new());
        };

        let pr_id = pipeline_run_id.clone();
        let pr_row: PipelineRunRow = self
            .store
            .interact(move |conn| pipeline_runs::table.find(pr_id).first(conn))
            .await
            .map_err(|_| ExecutorError::RunNotFound(pipeline_run_id.clone()))?;
        let pipeline_run: PipelineRun = pr_row.into();

        let task_id = completed.task_id.clone();
        let task_node = pipeline_run.structure_snapshot.get(&task_id).cloned().unwrap_or_default();
        let allowed: std::collections::HashSet<&String> = task_node.allowed_next.iter().collect();

        let next_ids: Vec<String> = match selected_next {
            Some(selection) => {
                let mut valid = Vec::new();
                for s in selection {
                    if allowed.contains(&s) {
                        valid.push(s);
                    } else {
                        warn!(task_run_id = %completed.id, next = %s, "dropping selectedNext not in allowedNext");
                    }
                }
                valid
            }
            None => task_node.allowed_next.clone(),
        };

        if next_ids.is_empty() {
            self.check_pipeline_completion(&pipeline_run.id).await?;
            return Ok(Vec::new());
        }

        let mut queued = Vec::new();
        for next_id in next_ids {
            let preds = Self::predecessors_in_snapshot(&pipeline_run.structure_snapshot, &next_id);

            if preds.len() > 1 {
                let mut ready = true;
                for pred in &preds {
                    let has_completed = self.has_completed_run(&pipeline_run.id, pred).await?;
                    if !has_completed {
                        ready = false;
                        break;
                    }
                }
                if !ready {
                    continue;
                }
            }

            let mut upstream_refs = HashMap::new();
            for pred in &preds {
                if let Some(latest) = self.latest_completed_run(&pipeline_run.id, pred).await? {
                    upstream_refs.insert(
                        pred.clone(),
                        UpstreamRef { output_path: latest.output_path.unwrap_or_default(), assets: latest.assets.unwrap_or(Value::Null) },
                    );
                }
            }

            let enqueued = self
                .queue
                .enqueue(
                    &next_id,
                    EnqueueRequest {
                        priority: Some(completed.priority),
                        pipeline_run_id: Some(pipeline_run.id.clone()),
                        upstream_refs,
                        metadata: Value::Object(Default::default()),
                        idempotency_key: None,
                        scheduled_for: None,
                    },
                )
                .await?;
            queued.push(enqueued.run_id);
        }

        Ok(queued)
    }

    async fn has_completed_run(&self, pipeline_run_id: &str, task_id: &str) -> Result<bool, ExecutorError> {
        let pipeline_run_id = pipeline_run_id.to_string();
        let task_id = task_id.to_string();
        let count: i64 = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::pipeline_run_id.eq(&pipeline_run_id))
                    .filter(task_runs::task_id.eq(&task_id))
                    .filter(task_runs::status.eq(TaskRunStatus::Completed.as_str()))
                    .count()
                    .get_result(conn)
            })
            .await?;
        Ok(count > 0)
    }

    async fn latest_completed_run(&self, pipeline_run_id: &str, task_id: &str) -> Result<Option<TaskRun>, ExecutorError> {
        let pipeline_run_id = pipeline_run_id.to_string();
        let task_id = task_id.to_string();
        let row: Option<TaskRunRow> = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::pipeline_run_id.eq(&pipeline_run_id))
                    .filter(task_runs::task_id.eq(&task_id))
                    .filter(task_runs::status.eq(TaskRunStatus::Completed.as_str()))
                    .order(task_runs::completed_at.desc())
                    .first(conn)
                    .optional()
            })
            .await?;
        Ok(row.map(TaskRun::from))
    }

    pub async fn handle_task_failure(&self, task_run_id: &str) -> Result<(), ExecutorError> {
        let run_id = task_run_id.to_string();
        let row: TaskRunRow = self
            .store
            .interact(move |conn| task_runs::table.find(run_id).first(conn))
            .await
            .map_err(|_| ExecutorError::RunNotFound(task_run_id.to_string()))?;
        let failed: TaskRun = row.into();

        let Some(pipeline_run_id) = failed.pipeline_run_id.clone() else {
            return Ok(());
        };

        let pr_id = pipeline_run_id.clone();
        let pr_row: PipelineRunRow = self
            .store
            .interact(move |conn| pipeline_runs::table.find(pr_id).first(conn))
            .await
            .map_err(|_| ExecutorError::RunNotFound(pipeline_run_id.clone()))?;
        let pipeline_run: PipelineRun = pr_row.into();

        if pipeline_run.failure_mode == FailureMode::FailFast {
            let pr_id2 = pipeline_run.id.clone();
            self.store
                .interact(move |conn| {
                    diesel::update(
                        task_runs::table
                            .filter(task_runs::pipeline_run_id.eq(&pr_id2))
                            .filter(task_runs::status.eq(TaskRunStatus::Pending.as_str())),
                    )
                    .set((
                        task_runs::status.eq(TaskRunStatus::Cancelled.as_str()),
                        task_runs::error.eq("Pipeline failed in fail-fast mode"),
                    ))
                    .execute(conn)
                })
                .await?;
            self.mark_pipeline_run(&pipeline_run.id, PipelineRunStatus::Failed).await?;
        } else {
            self.check_pipeline_completion(&pipeline_run.id).await?;
        }

        Ok(())
    }

    async fn check_pipeline_completion(&self, pipeline_run_id: &str) -> Result<(), ExecutorError> {
        let pr_id = pipeline_run_id.to_string();
        let active: i64 = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::pipeline_run_id.eq(&pr_id))
                    .filter(task_runs::status.eq_any([
                        TaskRunStatus::Pending.as_str(),
                        TaskRunStatus::Running.as_str(),
                        TaskRunStatus::Waiting.as_str(),
                    ]))
                    .count()
                    .get_result(conn)
            })
            .await?;

        if active > 0 {
            return Ok(());
        }

        let pr_id = pipeline_run_id.to_string();
        let failed_count: i64 = self
            .store
            .interact(move |conn| {
                task_runs::table
                    .filter(task_runs::pipeline_run_id.eq(&pr_id))
                    .filter(task_runs::status.eq_any([
                        TaskRunStatus::Failed.as_str(),
                        TaskRunStatus::Timeout.as_str(),
                        TaskRunStatus::Cancelled.as_str(),
                    ]))
                    .count()
                    .get_result(conn)
            })
            .await?;

        let final_status = if failed_count > 0 { PipelineRunStatus::Failed } else { PipelineRunStatus::Completed };
        self.mark_pipeline_run(pipeline_run_id, final_status).await
    }

    async fn mark_pipeline_run(&self, pipeline_run_id: &str, status: PipelineRunStatus) -> Result<(), ExecutorError> {
        let pipeline_run_id = pipeline_run_id.to_string();
        let now = Utc::now().naive_utc();
        self.store
            .interact(move |conn| {
                diesel::update(pipeline_runs::table.find(&pipeline_run_id))
                    .set((pipeline_runs::status.eq(status.as_str()), pipeline_runs::completed_at.eq(now)))
                    .execute(conn)
            })
            .await?;
        Ok(())
    }

    /// Validates and returns the topological execution plan without
    /// running anything.
    pub async fn dry_run(&self, pipeline_id: &str) -> Result<Vec<Level>, ExecutorError> {
        let pipeline = self
            .validator
            .get(pipeline_id)
            .await?
            .ok_or_else(|| crate::error::ValidationError::PipelineNotFound(pipeline_id.to_string()))?;
        Ok(PipelineValidator::plan(&pipeline))
    }
}
