// src/dag/scheduler_step.rs

//! Result type for recording a task outcome in the scheduler.

use crate::dag::task_info::TaskKey;

/// Structured result of a single scheduler "step".
///
/// Useful for tests that drive the core by hand and want to assert on what
/// changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Whether the outcome was accepted (the task was in flight).
    pub accepted: bool,
    /// Tasks newly marked as skipped because of this outcome
    /// (`SkipDependents` only).
    pub newly_skipped: Vec<TaskKey>,
    /// Whether this outcome stopped further launches (`FailRun` only).
    pub halted: bool,
}

impl SchedulerStep {
    pub(crate) fn ignored() -> Self {
        Self::default()
    }
}
