// src/dag/task_info.rs

//! Task and phase definitions plus per-run task state.

use serde::Serialize;

use crate::config::model::{PhaseConfig, TaskConfig};
use crate::dag::state_manager::DependencyContext;
use crate::types::ContextScope;

/// Canonical task key type used throughout the crate.
pub type TaskKey = String;

/// Immutable, catalog-defined description of one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDef {
    /// Stable identifier used for persistence and `depends_on` references.
    pub key: TaskKey,
    pub label: String,
    /// Presentation order; has no effect on execution order.
    pub order: i32,
    pub depends_on: Vec<TaskKey>,
    pub phase: String,
}

impl TaskDef {
    pub fn new(key: impl Into<String>, phase: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            label: key.clone(),
            key,
            order: 0,
            depends_on: Vec::new(),
            phase: phase.into(),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn after(mut self, dep: impl Into<String>) -> Self {
        self.depends_on.push(dep.into());
        self
    }

    pub fn from_config(key: &str, cfg: &TaskConfig) -> Self {
        Self {
            key: key.to_string(),
            label: cfg.effective_label(key),
            order: cfg.order,
            depends_on: cfg.after.clone(),
            phase: cfg.phase.clone(),
        }
    }
}

/// A named, independently-triggerable sub-graph of the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhaseDef {
    pub name: String,
    pub context: ContextScope,
    pub start_stage: Option<String>,
    pub terminal_stage: Option<String>,
}

impl PhaseDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            context: ContextScope::Dependencies,
            start_stage: None,
            terminal_stage: None,
        }
    }

    pub fn with_context(mut self, context: ContextScope) -> Self {
        self.context = context;
        self
    }

    pub fn with_stages(mut self, start: Option<&str>, terminal: Option<&str>) -> Self {
        self.start_stage = start.map(str::to_string);
        self.terminal_stage = terminal.map(str::to_string);
        self
    }

    pub fn from_config(name: &str, cfg: &PhaseConfig) -> Self {
        Self {
            name: name.to_string(),
            context: cfg.context,
            start_stage: cfg.start_stage.clone(),
            terminal_stage: cfg.terminal_stage.clone(),
        }
    }
}

/// Per-run state of a task (internal).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunState {
    /// Waiting on dependencies (or on a free concurrency slot).
    Pending,
    /// Launched; the execution unit has not reported back yet.
    Running,
    Succeeded,
    Failed,
    /// Never launched because an upstream task failed under
    /// `SkipDependents`.
    Skipped,
    /// Already complete and locked; emitted from stored content.
    Settled,
}

/// Public, read-only view of a task's per-run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskRunState {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    Settled,
}

impl From<RunState> for TaskRunState {
    fn from(state: RunState) -> Self {
        match state {
            RunState::Pending => TaskRunState::Pending,
            RunState::Running => TaskRunState::Running,
            RunState::Succeeded => TaskRunState::Succeeded,
            RunState::Failed => TaskRunState::Failed,
            RunState::Skipped => TaskRunState::Skipped,
            RunState::Settled => TaskRunState::Settled,
        }
    }
}

/// A task the scheduler wants launched now, with its context already
/// assembled from the completed outputs.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub key: TaskKey,
    pub label: String,
    pub phase: String,
    pub context: DependencyContext,
}
