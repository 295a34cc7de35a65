// src/engine/runtime.rs

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::anyhow;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{Id, JoinSet};
use tracing::{debug, info, warn};

use crate::config::model::ConfigSection;
use crate::dag::task_info::TaskRunState;
use crate::dag::{CompletedOutputs, ScheduledTask, Scheduler, SchedulerOptions, TaskCatalog};
use crate::errors::{Result, SectionDagError};
use crate::exec::{ExecutionRegistry, GenerationError, GenerationOutput, GenerationRequest};
use crate::reference::{ReferenceBag, ReferenceLoader};
use crate::store::{RunFilter, StateStore, Subject, TaskRunPatch};
use crate::types::{ContextScope, TaskStatus};

use super::projection::ProjectionTable;
use super::{PipelineEvent, RunSummary, TaskEvent};

/// Run-wide settings taken from `[config]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub scheduler: SchedulerOptions,
    /// Subject field receiving `start_stage` / `terminal_stage`.
    pub stage_field: String,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self::from_config(&ConfigSection::default())
    }
}

impl RuntimeSettings {
    pub fn from_config(cfg: &ConfigSection) -> Self {
        Self {
            scheduler: SchedulerOptions {
                on_dependency_failure: cfg.on_dependency_failure,
                max_concurrency: cfg.effective_max_concurrency(),
            },
            stage_field: cfg.stage_field.clone(),
        }
    }
}

type UnitResult = (std::result::Result<GenerationOutput, GenerationError>, Duration);

/// Drives one phase of the catalog for one subject.
///
/// This is the async IO shell around [`Scheduler`], which holds all the
/// readiness and failure-policy semantics. The shell:
/// - seeds the scheduler from the store (locked tasks, earlier phases)
/// - launches ready tasks on a `JoinSet` and waits for any to finish
/// - persists every transition and pushes progress events
/// - applies projections and the terminal stage once the phase drains
///
/// Store calls run on Tokio's blocking pool, so a store may do synchronous
/// IO. The runtime takes no locks itself; callers serialize per subject
/// (see [`super::Pipeline`]).
pub struct Runtime {
    catalog: Arc<TaskCatalog>,
    registry: Arc<ExecutionRegistry>,
    store: Arc<dyn StateStore>,
    references: Arc<ReferenceLoader>,
    projections: Arc<ProjectionTable>,
    settings: RuntimeSettings,
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("tasks", &self.catalog.len())
            .field("registry", &self.registry)
            .field("projections", &self.projections)
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

/// Push side of the event stream. A dropped receiver only stops delivery;
/// the run itself carries on.
struct EventSink {
    tx: mpsc::Sender<PipelineEvent>,
    closed: bool,
}

impl EventSink {
    fn new(tx: mpsc::Sender<PipelineEvent>) -> Self {
        Self { tx, closed: false }
    }

    async fn emit(&mut self, event: PipelineEvent) {
        if self.closed {
            return;
        }
        if self.tx.send(event).await.is_err() {
            debug!("event receiver dropped; continuing without progress events");
            self.closed = true;
        }
    }

    async fn task(&mut self, event: TaskEvent) {
        self.emit(PipelineEvent::Task(event)).await;
    }
}

impl Runtime {
    pub fn new(
        catalog: Arc<TaskCatalog>,
        registry: Arc<ExecutionRegistry>,
        store: Arc<dyn StateStore>,
        references: Arc<ReferenceLoader>,
    ) -> Self {
        Self {
            catalog,
            registry,
            store,
            references,
            projections: Arc::new(ProjectionTable::new()),
            settings: RuntimeSettings::default(),
        }
    }

    pub fn with_projections(mut self, projections: ProjectionTable) -> Self {
        self.projections = Arc::new(projections);
        self
    }

    pub fn with_settings(mut self, settings: RuntimeSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn catalog(&self) -> &TaskCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &Arc<dyn StateStore> {
        &self.store
    }

    /// Run every task of `phase` for `subject`, streaming progress into
    /// `events`.
    ///
    /// Configuration problems fail before anything is launched. A store
    /// failure mid-run is fatal: the error is returned, no end-of-stream
    /// marker is sent, and already launched units are left to finish in the
    /// background.
    pub async fn run_phase(
        &self,
        subject: Arc<Subject>,
        phase: &str,
        events: mpsc::Sender<PipelineEvent>,
    ) -> Result<RunSummary> {
        let tasks = self.catalog.list_tasks(phase)?;
        self.registry.ensure_covers(tasks.iter().copied())?;
        let reference = self.references.load_all()?;
        let mut scheduler = Scheduler::new(&self.catalog, phase, self.settings.scheduler)?;

        info!(
            subject = %subject.id,
            phase = %phase,
            tasks = scheduler.tasks().len(),
            policy = ?self.settings.scheduler.on_dependency_failure,
            "phase run started"
        );

        let mut sink = EventSink::new(events);

        if let Some(stage) = scheduler.phase().start_stage.clone() {
            self.set_stage(&subject.id, &stage).await?;
        }

        self.seed(&subject.id, &mut scheduler, &mut sink).await?;

        let mut join_set: JoinSet<UnitResult> = JoinSet::new();
        if let Err(err) = self
            .drive(&subject, &reference, &mut scheduler, &mut join_set, &mut sink)
            .await
        {
            warn!(
                subject = %subject.id,
                phase = %phase,
                in_flight = join_set.len(),
                error = %err,
                "phase run aborted; in-flight units continue detached"
            );
            join_set.detach_all();
            return Err(err);
        }

        if scheduler.has_pending() {
            warn!(
                subject = %subject.id,
                phase = %phase,
                pending = ?scheduler.keys_in_state(TaskRunState::Pending),
                "phase ended with tasks that could not be launched"
            );
        }

        self.project(&subject.id, &scheduler).await?;

        if let Some(stage) = scheduler.phase().terminal_stage.clone() {
            self.set_stage(&subject.id, &stage).await?;
        }

        sink.emit(PipelineEvent::EndOfStream).await;

        let summary = summarize(&subject.id, &scheduler);
        info!(
            subject = %subject.id,
            phase = %phase,
            succeeded = summary.succeeded.len(),
            failed = summary.failed.len(),
            settled = summary.settled.len(),
            not_launched = summary.not_launched.len(),
            "phase run finished"
        );
        Ok(summary)
    }

    /// Regenerate a single task outside a phase run.
    ///
    /// Context is assembled from every complete run of the subject, using
    /// the task's phase scope. The lock flag is not consulted here; callers
    /// decide whether a locked task may be rerun.
    pub async fn rerun_task(&self, subject: Arc<Subject>, key: &str) -> Result<TaskEvent> {
        let task = self
            .catalog
            .task(key)
            .cloned()
            .ok_or_else(|| SectionDagError::TaskNotFound(key.to_string()))?;
        let scope = self
            .catalog
            .phase(&task.phase)
            .map(|p| p.context)
            .unwrap_or(ContextScope::Dependencies);
        let unit = self.registry.resolve(key)?;
        let reference = self.references.load_all()?;

        let mut completed = CompletedOutputs::new();
        let id = subject.id.clone();
        let runs = self
            .store_call(move |store| {
                store.list_task_runs(&id, &RunFilter::all().with_status(TaskStatus::Complete))
            })
            .await?;
        for run in runs {
            if run.key == task.key {
                continue;
            }
            if let Some(content) = run.content {
                completed.insert_success(&run.key, content);
            }
        }
        let context = completed.context_for(&task, scope);

        info!(subject = %subject.id, task = %key, phase = %task.phase, "single task rerun");

        self.mark_running(&subject.id, &task.phase, key).await?;

        let request = GenerationRequest {
            task_key: task.key.clone(),
            phase: task.phase.clone(),
            subject: Arc::clone(&subject),
            reference,
            context,
        };
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let result = unit.execute(request).await;
            (result, started.elapsed())
        });
        let (result, elapsed) = match handle.await {
            Ok(out) => out,
            Err(join_err) => (Err(panic_error(&join_err)), Duration::ZERO),
        };

        match result {
            Ok(output) => {
                let content = output.content.clone();
                self.persist_success(&subject.id, &task.phase, key, output, elapsed)
                    .await?;
                for update in self.projections.apply(key, &content) {
                    self.set_field(&subject.id, update.field, update.value).await?;
                }
                Ok(TaskEvent::complete(key, content))
            }
            Err(err) => {
                self.persist_failure(&subject.id, &task.phase, key, &err, elapsed)
                    .await?;
                Ok(TaskEvent::failed(key, err.message))
            }
        }
    }

    /// Settle locked tasks and, for `all_completed` phases, seed the
    /// completed map with other phases' results.
    async fn seed(
        &self,
        subject: &str,
        scheduler: &mut Scheduler,
        sink: &mut EventSink,
    ) -> Result<()> {
        let id = subject.to_string();
        let runs = self
            .store_call(move |store| store.list_task_runs(&id, &RunFilter::all()))
            .await?;
        let by_key: HashMap<&str, _> = runs.iter().map(|r| (r.key.as_str(), r)).collect();

        let phase_keys: Vec<String> = scheduler.tasks().iter().map(|t| t.key.clone()).collect();
        for key in phase_keys.iter() {
            let Some(run) = by_key.get(key.as_str()) else {
                continue;
            };
            if !run.is_settled_locked() {
                continue;
            }
            let content = run.content.clone().unwrap_or_default();
            if scheduler.settle_locked(key, content.clone()) {
                sink.task(TaskEvent::complete(key.clone(), content)).await;
            }
        }

        if scheduler.phase().context == ContextScope::AllCompleted {
            for run in runs.iter() {
                if phase_keys.contains(&run.key) || run.status != TaskStatus::Complete {
                    continue;
                }
                if let Some(content) = run.content.clone() {
                    debug!(subject = %subject, task = %run.key, phase = %run.phase, "seeding output from earlier phase");
                    scheduler.seed_output(&run.key, content);
                }
            }
        }

        Ok(())
    }

    /// Launch / wait / record until nothing is in flight and nothing more
    /// can be launched.
    async fn drive(
        &self,
        subject: &Arc<Subject>,
        reference: &ReferenceBag,
        scheduler: &mut Scheduler,
        join_set: &mut JoinSet<UnitResult>,
        sink: &mut EventSink,
    ) -> Result<()> {
        let phase = scheduler.phase().name.clone();
        let mut running: HashMap<Id, String> = HashMap::new();

        loop {
            for task in scheduler.take_ready() {
                let (id, key) = self.launch(subject, reference, task, join_set, sink).await?;
                running.insert(id, key);
            }

            if scheduler.in_flight() == 0 {
                if scheduler.is_stalled() {
                    debug!(subject = %subject.id, phase = %phase, "nothing ready and nothing in flight");
                }
                break;
            }

            let Some(joined) = join_set.join_next_with_id().await else {
                break;
            };

            let (key, (result, elapsed)) = match joined {
                Ok((id, out)) => (running.remove(&id), out),
                Err(join_err) => (
                    running.remove(&join_err.id()),
                    (Err(panic_error(&join_err)), Duration::ZERO),
                ),
            };
            let Some(key) = key else {
                warn!(subject = %subject.id, "finished unit with unknown task id; ignoring");
                continue;
            };

            match result {
                Ok(output) => {
                    let content = output.content.clone();
                    self.persist_success(&subject.id, &phase, &key, output, elapsed)
                        .await?;
                    scheduler.record_success(&key, content.clone());
                    sink.task(TaskEvent::complete(key, content)).await;
                }
                Err(err) => {
                    warn!(
                        subject = %subject.id,
                        task = %key,
                        error = %err,
                        "task failed"
                    );
                    self.persist_failure(&subject.id, &phase, &key, &err, elapsed)
                        .await?;
                    let step = scheduler.record_failure(&key);
                    if !step.newly_skipped.is_empty() {
                        info!(task = %key, skipped = ?step.newly_skipped, "dependents skipped");
                    }
                    sink.task(TaskEvent::failed(key, err.message)).await;
                }
            }
        }

        Ok(())
    }

    async fn launch(
        &self,
        subject: &Arc<Subject>,
        reference: &ReferenceBag,
        task: ScheduledTask,
        join_set: &mut JoinSet<UnitResult>,
        sink: &mut EventSink,
    ) -> Result<(Id, String)> {
        let unit = self.registry.resolve(&task.key)?;

        self.mark_running(&subject.id, &task.phase, &task.key).await?;
        sink.task(TaskEvent::running(task.key.clone())).await;

        debug!(
            subject = %subject.id,
            task = %task.key,
            context = ?task.context.keys().collect::<Vec<_>>(),
            "launching execution unit"
        );

        let request = GenerationRequest {
            task_key: task.key.clone(),
            phase: task.phase,
            subject: Arc::clone(subject),
            reference: Arc::clone(reference),
            context: task.context,
        };

        let handle = join_set.spawn(async move {
            let started = Instant::now();
            let result = unit.execute(request).await;
            (result, started.elapsed())
        });

        Ok((handle.id(), task.key))
    }

    /// Run a store call on the blocking pool.
    pub(crate) async fn store_call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn StateStore) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| SectionDagError::Store(anyhow!("store call did not complete: {e}")))?
            .map_err(SectionDagError::Store)
    }

    async fn mark_running(&self, subject: &str, phase: &str, key: &str) -> Result<()> {
        let (subject, key) = (subject.to_string(), key.to_string());
        let patch = TaskRunPatch::running(phase);
        self.store_call(move |store| store.upsert_task_run(&subject, &key, patch))
            .await?;
        Ok(())
    }

    async fn persist_success(
        &self,
        subject: &str,
        phase: &str,
        key: &str,
        output: GenerationOutput,
        elapsed: Duration,
    ) -> Result<()> {
        let duration_ms = if output.duration_ms > 0 {
            output.duration_ms
        } else {
            elapsed.as_millis() as u64
        };
        info!(
            subject = %subject,
            task = %key,
            duration_ms,
            tokens = output.tokens_used,
            "task completed"
        );
        let patch = TaskRunPatch::completed(
            phase,
            output.content,
            output.generator_id,
            output.tokens_used,
            duration_ms,
        );
        let (subject, key) = (subject.to_string(), key.to_string());
        self.store_call(move |store| store.upsert_task_run(&subject, &key, patch))
            .await?;
        Ok(())
    }

    async fn persist_failure(
        &self,
        subject: &str,
        phase: &str,
        key: &str,
        err: &GenerationError,
        elapsed: Duration,
    ) -> Result<()> {
        let patch = TaskRunPatch::failed(phase, err.message.clone(), elapsed.as_millis() as u64);
        let (subject, key) = (subject.to_string(), key.to_string());
        self.store_call(move |store| store.upsert_task_run(&subject, &key, patch))
            .await?;
        Ok(())
    }

    /// Apply projections for tasks that succeeded in this run, in catalog
    /// order.
    async fn project(&self, subject: &str, scheduler: &Scheduler) -> Result<()> {
        if self.projections.is_empty() {
            return Ok(());
        }
        for key in scheduler.keys_in_state(TaskRunState::Succeeded) {
            let Some(content) = scheduler.completed().content(&key) else {
                continue;
            };
            for update in self.projections.apply(&key, content) {
                debug!(subject = %subject, task = %key, field = %update.field, "projection update");
                self.set_field(subject, update.field, update.value).await?;
            }
        }
        Ok(())
    }

    async fn set_stage(&self, subject: &str, stage: &str) -> Result<()> {
        info!(subject = %subject, stage = %stage, "subject stage updated");
        self.set_field(subject, self.settings.stage_field.clone(), Value::from(stage))
            .await
    }

    async fn set_field(&self, subject: &str, field: String, value: Value) -> Result<()> {
        let subject = subject.to_string();
        self.store_call(move |store| store.set_subject_field(&subject, &field, value))
            .await
    }
}

fn panic_error(join_err: &tokio::task::JoinError) -> GenerationError {
    if join_err.is_panic() {
        GenerationError::new("execution unit panicked")
    } else {
        GenerationError::new(format!("execution unit was cancelled: {join_err}"))
    }
}

fn summarize(subject: &str, scheduler: &Scheduler) -> RunSummary {
    let mut not_launched = scheduler.keys_in_state(TaskRunState::Pending);
    not_launched.extend(scheduler.keys_in_state(TaskRunState::Skipped));

    RunSummary {
        subject: subject.to_string(),
        phase: scheduler.phase().name.clone(),
        succeeded: scheduler.keys_in_state(TaskRunState::Succeeded),
        failed: scheduler.keys_in_state(TaskRunState::Failed),
        settled: scheduler.keys_in_state(TaskRunState::Settled),
        not_launched,
        halted_by: scheduler.halted_by().map(str::to_string),
    }
}
