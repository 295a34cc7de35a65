// src/engine/pipeline.rs

//! Caller-facing operations over one catalog and one store.
//!
//! Every operation that touches a subject's task runs holds that subject's
//! lock from [`SubjectLocks`] for its whole duration.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::info;

use crate::config::model::CatalogFile;
use crate::dag::{TaskCatalog, TaskDef};
use crate::errors::{Result, SectionDagError};
use crate::exec::ExecutionRegistry;
use crate::reference::ReferenceLoader;
use crate::store::{RunFilter, StateStore, Subject, TaskRun, TaskRunPatch};

use super::locks::SubjectLocks;
use super::projection::ProjectionTable;
use super::runtime::{Runtime, RuntimeSettings};
use super::{PipelineEvent, RunSummary, TaskEvent};

#[derive(Debug, Clone)]
pub struct Pipeline {
    runtime: Arc<Runtime>,
    locks: SubjectLocks,
}

impl Pipeline {
    pub fn new(runtime: Runtime) -> Self {
        Self {
            runtime: Arc::new(runtime),
            locks: SubjectLocks::new(),
        }
    }

    /// Wire everything declared in a validated catalog file.
    ///
    /// `root` is the directory the catalog file lives in; `reference_dir`
    /// is resolved against it. Tasks without a `cmd` need a unit added to
    /// `registry` by the caller, which is why it is passed in rather than
    /// built here.
    pub fn from_catalog_file(
        cfg: &CatalogFile,
        root: &Path,
        registry: ExecutionRegistry,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let catalog = TaskCatalog::from_catalog_file(cfg);
        let references = ReferenceLoader::from_catalog_file(cfg, root);
        let projections = ProjectionTable::from_catalog_file(cfg)?;

        let runtime = Runtime::new(
            Arc::new(catalog),
            Arc::new(registry),
            store,
            Arc::new(references),
        )
        .with_projections(projections)
        .with_settings(RuntimeSettings::from_config(&cfg.config));

        Ok(Self::new(runtime))
    }

    /// Share locks with other pipelines over the same store.
    pub fn with_locks(mut self, locks: SubjectLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn locks(&self) -> &SubjectLocks {
        &self.locks
    }

    fn store(&self) -> &Arc<dyn StateStore> {
        self.runtime.store()
    }

    /// Run every task of `phase` for the subject.
    pub async fn run_phase(
        &self,
        subject_id: &str,
        phase: &str,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Result<RunSummary> {
        let _guard = self.locks.acquire(subject_id).await;
        let subject = self.load_subject(subject_id).await?;
        self.runtime
            .run_phase(Arc::new(subject), phase, events)
            .await
    }

    /// Unlock the task and run it once on its own.
    pub async fn regenerate(&self, subject_id: &str, key: &str) -> Result<TaskEvent> {
        let _guard = self.locks.acquire(subject_id).await;
        self.task_def(key)?;
        let subject = self.load_subject(subject_id).await?;

        let existing = self.load_run(subject_id, key).await?;
        if existing.is_some_and(|run| run.locked) {
            info!(subject = %subject_id, task = %key, "unlocking task before regeneration");
            self.upsert(subject_id, key, TaskRunPatch::locked(false)).await?;
        }

        self.runtime.rerun_task(Arc::new(subject), key).await
    }

    /// Replace the task's content by hand. Edited content is marked
    /// complete and locked.
    pub async fn edit_content(&self, subject_id: &str, key: &str, content: String) -> Result<TaskRun> {
        let _guard = self.locks.acquire(subject_id).await;
        let task = self.task_def(key)?;
        self.load_subject(subject_id).await?;

        let patch = TaskRunPatch {
            phase: Some(task.phase.clone()),
            ..TaskRunPatch::edited(content)
        };
        let run = self.upsert(subject_id, key, patch).await?;
        info!(subject = %subject_id, task = %key, "task content edited and locked");
        Ok(run)
    }

    /// Toggle the lock on an existing task run.
    pub async fn set_locked(&self, subject_id: &str, key: &str, locked: bool) -> Result<TaskRun> {
        let _guard = self.locks.acquire(subject_id).await;
        self.task_def(key)?;

        if self.load_run(subject_id, key).await?.is_none() {
            return Err(SectionDagError::TaskNotFound(format!(
                "no run of '{key}' stored for subject '{subject_id}'"
            )));
        }

        let run = self
            .upsert(subject_id, key, TaskRunPatch::locked(locked))
            .await?;
        info!(subject = %subject_id, task = %key, locked, "task lock changed");
        Ok(run)
    }

    /// All persisted runs of the subject, ordered by key.
    pub fn task_runs(&self, subject_id: &str) -> Result<Vec<TaskRun>> {
        self.store()
            .list_task_runs(subject_id, &RunFilter::all())
            .map_err(SectionDagError::Store)
    }

    /// Catalog tasks ordered by `(phase, order, key)`.
    pub fn definitions(&self) -> Vec<TaskDef> {
        self.runtime
            .catalog()
            .all_tasks()
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn subject(&self, subject_id: &str) -> Result<Subject> {
        self.store()
            .get_subject(subject_id)
            .map_err(SectionDagError::Store)?
            .ok_or_else(|| SectionDagError::SubjectNotFound(subject_id.to_string()))
    }

    async fn load_subject(&self, subject_id: &str) -> Result<Subject> {
        let id = subject_id.to_string();
        self.runtime
            .store_call(move |store| store.get_subject(&id))
            .await?
            .ok_or_else(|| SectionDagError::SubjectNotFound(subject_id.to_string()))
    }

    async fn load_run(&self, subject_id: &str, key: &str) -> Result<Option<TaskRun>> {
        let (id, key) = (subject_id.to_string(), key.to_string());
        self.runtime
            .store_call(move |store| store.get_task_run(&id, &key))
            .await
    }

    async fn upsert(&self, subject_id: &str, key: &str, patch: TaskRunPatch) -> Result<TaskRun> {
        let (id, key) = (subject_id.to_string(), key.to_string());
        self.runtime
            .store_call(move |store| store.upsert_task_run(&id, &key, patch))
            .await
    }

    fn task_def(&self, key: &str) -> Result<TaskDef> {
        self.runtime
            .catalog()
            .task(key)
            .cloned()
            .ok_or_else(|| SectionDagError::TaskNotFound(key.to_string()))
    }
}
