//! PipelineValidator and pipeline CRUD (§4.3): loads task nodes for a
//! proposed pipeline, runs them through [`crate::graph::Graph`], and
//! persists the validated structure as a frozen snapshot.

use chrono::{NaiveDateTime, Utc};
use diesel::prelude::*;

use crate::database::Store;
use crate::error::ValidationError;
use crate::graph::{Graph, Level, ValidationReport};
use crate::ids;
use crate::models::{FailureMode, Pipeline, PipelineRow, StructureNode, Structure};
use crate::schema::{pipelines, tasks};

/// A pipeline definition as submitted for validation/upsert, prior to
/// being assigned a version and timestamps.
#[derive(Debug, Clone)]
pub struct PipelineDraft {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub entry_tasks: Vec<String>,
    pub structure: Structure,
    pub failure_mode: FailureMode,
}

#[derive(Clone)]
pub struct PipelineValidator {
    store: Store,
}

impl PipelineValidator {
    pub fn new(store: Store) -> Self {
        PipelineValidator { store }
    }

    /// Builds a [`Graph`] from `structure` and runs [`Graph::validate`]
    /// against the set of task ids actually registered in the database.
    pub async fn validate(&self, draft: &PipelineDraft) -> Result<ValidationReport, ValidationError> {
        let forward = Self::forward_adjacency(&draft.structure);
        let mut requested: Vec<String> = draft.structure.keys().cloned().collect();
        requested.extend(draft.entry_tasks.iter().cloned());
        requested.sort();
        requested.dedup();

        let known: std::collections::HashSet<String> = {
            let requested = requested.clone();
            self.store
                .interact(move |conn| {
                    tasks::table
                        .filter(tasks::id.eq_any(&requested))
                        .select(tasks::id)
                        .load(conn)
                })
                .await?
                .into_iter()
                .collect()
        };

        let graph = Graph::new(forward);
        let report = graph.validate(&requested, &known);

        if !report.unknown_task_ids.is_empty() {
            return Err(ValidationError::TaskNotFound(report.unknown_task_ids.join(", ")));
        }
        if !report.cycles.is_empty() {
            return Err(ValidationError::CyclesDetected(report.cycles));
        }
        if !report.unknown_references.is_empty() {
            return Err(ValidationError::UnknownReferences(report.unknown_references));
        }
        if draft.entry_tasks.is_empty() {
            return Err(ValidationError::NoEntryTasks);
        }

        Ok(report)
    }

    fn forward_adjacency(structure: &Structure) -> std::collections::HashMap<String, Vec<String>> {
        structure
            .iter()
            .map(|(id, node)| (id.clone(), node.allowed_next.clone()))
            .collect()
    }

    /// Validates then upserts `draft` as a new version, returning the
    /// persisted pipeline. The pipeline `id` is caller-chosen and stable
    /// across versions; `structure` is re-snapshotted on every upsert
    /// (§3 "Structure is a snapshot captured at upsert").
    pub async fn upsert(&self, draft: PipelineDraft) -> Result<Pipeline, ValidationError> {
        self.validate(&draft).await?;

        let pipeline = self
            .store
            .transaction(move |conn| -> diesel::QueryResult<Pipeline> {
                let now: NaiveDateTime = Utc::now().naive_utc();
                let previous: Option<PipelineRow> = pipelines::table.find(&draft.id).first(conn).optional()?;
                let version = previous.map(|p| p.version + 1).unwrap_or(1);

                let pipeline = Pipeline {
                    id: draft.id,
                    name: draft.name,
                    description: draft.description,
                    entry_tasks: draft.entry_tasks,
                    structure: draft.structure,
                    version,
                    failure_mode: draft.failure_mode,
                    created_at: now,
                    updated_at: now,
                };
                let row: PipelineRow = pipeline.clone().into();

                diesel::insert_into(pipelines::table)
                    .values(&row)
                    .on_conflict(pipelines::id)
                    .do_update()
                    .set(&row)
                    .execute(conn)?;

                Ok(pipeline)
            })
            .await?;

        Ok(pipeline)
    }

    pub async fn get(&self, id: &str) -> Result<Option<Pipeline>, ValidationError> {
        let id = id.to_string();
        let row: Option<PipelineRow> = self
            .store
            .interact(move |conn| pipelines::table.find(id).first(conn).optional())
            .await?;
        Ok(row.map(Pipeline::from))
    }

    pub async fn list(&self) -> Result<Vec<Pipeline>, ValidationError> {
        let rows: Vec<PipelineRow> = self.store.interact(move |conn| pipelines::table.load(conn)).await?;
        Ok(rows.into_iter().map(Pipeline::from).collect())
    }

    /// Produces the topological execution plan for `pipeline` without
    /// running anything — the core of `dryRun` (§4.10).
    pub fn plan(pipeline: &Pipeline) -> Vec<Level> {
        let forward = Self::forward_adjacency(&pipeline.structure);
        let graph = Graph::new(forward);
        let component = graph.component_containing(&pipeline.entry_tasks);
        let entry: Vec<String> = pipeline
            .entry_tasks
            .iter()
            .filter(|t| component.contains(*t))
            .cloned()
            .collect();
        graph.topological_sort(&entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn structure(edges: &[(&str, &[&str])]) -> Structure {
        edges
            .iter()
            .map(|(id, next)| {
                (
                    id.to_string(),
                    StructureNode { allowed_next: next.iter().map(|s| s.to_string()).collect() },
                )
            })
            .collect()
    }

    #[test]
    fn plan_restricts_to_the_entry_component() {
        let pipeline = Pipeline {
            id: "p1".to_string(),
            name: "test".to_string(),
            description: None,
            entry_tasks: vec!["a".to_string()],
            structure: structure(&[("a", &["b"]), ("b", &[]), ("x", &["y"]), ("y", &[])]),
            version: 1,
            failure_mode: FailureMode::FailFast,
            created_at: chrono::Utc::now().naive_utc(),
            updated_at: chrono::Utc::now().naive_utc(),
        };
        let levels = PipelineValidator::plan(&pipeline);
        let all_tasks: Vec<String> = levels.into_iter().flat_map(|l| l.tasks).collect();
        assert!(all_tasks.contains(&"a".to_string()));
        assert!(all_tasks.contains(&"b".to_string()));
        assert!(!all_tasks.contains(&"x".to_string()));
    }

    #[test]
    fn forward_adjacency_mirrors_structure() {
        let s = structure(&[("a", &["b", "c"]), ("b", &[]), ("c", &[])]);
        let fwd = PipelineValidator::forward_adjacency(&s);
        let mut succ = fwd.get("a").unwrap().clone();
        succ.sort();
        assert_eq!(succ, vec!["b".to_string(), "c".to_string()]);
    }
}
