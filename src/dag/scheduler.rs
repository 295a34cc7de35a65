use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::dag::catalog::TaskCatalog;
use crate::dag::graph::DagGraph;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::CompletedOutputs;
use crate::dag::task_info::{PhaseDef, RunState, ScheduledTask, TaskDef, TaskKey, TaskRunState};
use crate::errors::Result;
use crate::types::DependencyFailurePolicy;

/// Knobs for one phase run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SchedulerOptions {
    pub on_dependency_failure: DependencyFailurePolicy,
    /// At most this many tasks in flight; `None` means the ready set is the
    /// only limit.
    pub max_concurrency: Option<usize>,
}

/// Pure, synchronous scheduler for one phase invocation.
///
/// It owns the per-run task states and the completed-output map, and is
/// responsible for:
/// - settling locked tasks without running them
/// - deciding which pending tasks are ready (every dependency settled)
/// - marking tasks running / succeeded / failed
/// - applying the dependency failure policy
///
/// There is no IO and no Tokio in here; the async shell in
/// [`crate::engine::Runtime`] launches tasks and feeds outcomes back.
#[derive(Debug)]
pub struct Scheduler {
    phase: PhaseDef,
    graph: DagGraph,
    /// Phase tasks in catalog order; also the launch order within a ready set.
    order: Vec<TaskDef>,
    states: HashMap<TaskKey, RunState>,
    completed: CompletedOutputs,
    options: SchedulerOptions,
    in_flight: usize,
    halted_by: Option<TaskKey>,
}

impl Scheduler {
    /// Build a scheduler for `phase`; every task of the phase starts pending.
    pub fn new(catalog: &TaskCatalog, phase: &str, options: SchedulerOptions) -> Result<Self> {
        let tasks = catalog.list_tasks(phase)?;
        let phase_def = catalog
            .phase(phase)
            .cloned()
            .unwrap_or_else(|| PhaseDef::new(phase));

        let graph = DagGraph::from_tasks(tasks.iter().copied());
        let order: Vec<TaskDef> = tasks.into_iter().cloned().collect();
        let states = order
            .iter()
            .map(|t| (t.key.clone(), RunState::Pending))
            .collect();

        debug!(phase = %phase, tasks = order.len(), ?options, "scheduler: new phase run");

        Ok(Self {
            phase: phase_def,
            graph,
            order,
            states,
            completed: CompletedOutputs::new(),
            options,
            in_flight: 0,
            halted_by: None,
        })
    }

    pub fn phase(&self) -> &PhaseDef {
        &self.phase
    }

    pub fn tasks(&self) -> &[TaskDef] {
        &self.order
    }

    pub fn completed(&self) -> &CompletedOutputs {
        &self.completed
    }

    /// Seed `completed` with an output produced outside this run (a locked
    /// task, or another phase's result). Does not change any task state.
    pub fn seed_output(&mut self, key: &str, content: String) {
        self.completed.insert_success(key, content);
    }

    /// Treat a pending task as already done: its stored content is final.
    ///
    /// Returns `false` if the task is not a pending task of this phase.
    pub fn settle_locked(&mut self, key: &str, content: String) -> bool {
        match self.states.get_mut(key) {
            Some(state @ RunState::Pending) => {
                *state = RunState::Settled;
                self.completed.insert_success(key, content);
                info!(task = %key, phase = %self.phase.name, "locked task settled from stored content");
                true
            }
            Some(other) => {
                warn!(task = %key, state = ?other, "settle_locked on non-pending task; ignoring");
                false
            }
            None => false,
        }
    }

    /// Collect pending tasks whose dependencies are all settled, mark them
    /// `Running` and return them with their assembled context.
    ///
    /// Honours `max_concurrency` and returns nothing once the run has been
    /// halted by `FailRun`.
    pub fn take_ready(&mut self) -> Vec<ScheduledTask> {
        if self.halted_by.is_some() {
            return Vec::new();
        }

        let mut budget = match self.options.max_concurrency {
            Some(max) => max.saturating_sub(self.in_flight),
            None => usize::MAX,
        };

        let mut ready = Vec::new();
        for task in self.order.iter() {
            if budget == 0 {
                break;
            }
            if self.states.get(&task.key) != Some(&RunState::Pending) {
                continue;
            }
            if !self.deps_settled(task) {
                continue;
            }

            self.states.insert(task.key.clone(), RunState::Running);
            self.in_flight += 1;
            budget -= 1;

            debug!(
                task = %task.key,
                phase = %self.phase.name,
                "dependencies settled; marking Running"
            );

            ready.push(ScheduledTask {
                key: task.key.clone(),
                label: task.label.clone(),
                phase: task.phase.clone(),
                context: self.completed.context_for(task, self.phase.context),
            });
        }

        ready
    }

    /// Record a successful run of an in-flight task.
    pub fn record_success(&mut self, key: &str, content: String) -> SchedulerStep {
        if !self.finish_running(key, RunState::Succeeded) {
            return SchedulerStep::ignored();
        }
        self.completed.insert_success(key, content);
        debug!(task = %key, "task completed successfully");

        SchedulerStep {
            accepted: true,
            ..SchedulerStep::default()
        }
    }

    /// Record a failed run of an in-flight task and apply the dependency
    /// failure policy.
    pub fn record_failure(&mut self, key: &str) -> SchedulerStep {
        if !self.finish_running(key, RunState::Failed) {
            return SchedulerStep::ignored();
        }
        self.completed.insert_failure(key);

        let mut step = SchedulerStep {
            accepted: true,
            ..SchedulerStep::default()
        };

        match self.options.on_dependency_failure {
            DependencyFailurePolicy::PropagateEmpty => {
                debug!(task = %key, "task failed; dependents will see an empty entry");
            }
            DependencyFailurePolicy::SkipDependents => {
                step.newly_skipped = self.skip_dependents_of(key);
                warn!(
                    task = %key,
                    skipped = ?step.newly_skipped,
                    "task failed; skipping dependents in this run"
                );
            }
            DependencyFailurePolicy::FailRun => {
                if self.halted_by.is_none() {
                    warn!(task = %key, "task failed; no further tasks will be launched");
                    self.halted_by = Some(key.to_string());
                    step.halted = true;
                }
            }
        }

        step
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    pub fn has_pending(&self) -> bool {
        self.states.values().any(|s| *s == RunState::Pending)
    }

    /// No pending tasks and nothing in flight.
    pub fn is_drained(&self) -> bool {
        !self.has_pending() && self.in_flight == 0
    }

    /// Pending tasks remain, nothing is in flight, and nothing can become
    /// ready. The run must end instead of waiting.
    pub fn is_stalled(&self) -> bool {
        if self.in_flight > 0 || !self.has_pending() {
            return false;
        }
        if self.halted_by.is_some() {
            return true;
        }
        !self
            .order
            .iter()
            .any(|t| self.states.get(&t.key) == Some(&RunState::Pending) && self.deps_settled(t))
    }

    pub fn halted_by(&self) -> Option<&str> {
        self.halted_by.as_deref()
    }

    pub fn run_state_of(&self, key: &str) -> Option<TaskRunState> {
        self.states.get(key).map(|s| (*s).into())
    }

    /// Keys in a given state, in catalog order.
    pub fn keys_in_state(&self, state: TaskRunState) -> Vec<TaskKey> {
        self.order
            .iter()
            .filter(|t| self.run_state_of(&t.key) == Some(state))
            .map(|t| t.key.clone())
            .collect()
    }

    fn deps_settled(&self, task: &TaskDef) -> bool {
        task.depends_on
            .iter()
            .all(|dep| self.completed.is_settled(dep))
    }

    fn finish_running(&mut self, key: &str, terminal: RunState) -> bool {
        match self.states.get_mut(key) {
            Some(state @ RunState::Running) => {
                *state = terminal;
                self.in_flight = self.in_flight.saturating_sub(1);
                true
            }
            Some(other) => {
                warn!(task = %key, state = ?other, "outcome for task that is not running; ignoring");
                false
            }
            None => {
                warn!(task = %key, "outcome for unknown task; ignoring");
                false
            }
        }
    }

    fn skip_dependents_of(&mut self, failed: &str) -> Vec<TaskKey> {
        let downstream = self.graph.transitive_dependents_of(failed);
        let mut skipped = Vec::new();

        for task in self.order.iter() {
            if !downstream.contains(&task.key) {
                continue;
            }
            if let Some(state @ RunState::Pending) = self.states.get_mut(&task.key) {
                *state = RunState::Skipped;
                skipped.push(task.key.clone());
            }
        }

        skipped
    }
}
