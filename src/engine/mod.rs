// src/engine/mod.rs

//! Orchestration engine.
//!
//! This module ties together:
//! - the pure per-phase [`crate::dag::Scheduler`]
//! - the execution units that produce task content
//! - the state store that persists every transition
//! - the progress event stream handed to the caller
//!
//! The async shell that drives a phase run lives in [`runtime`]; the
//! caller-facing operations (run, rerun, edit, lock) are wrapped by
//! [`pipeline::Pipeline`].

use serde::Serialize;
use serde_json::json;

use crate::types::TaskStatus;

pub mod locks;
pub mod pipeline;
pub mod projection;
pub mod runtime;

pub use locks::SubjectLocks;
pub use pipeline::Pipeline;
pub use projection::{
    FnProjection, HoursProjection, Projection, ProjectionTable, PromoteContent, SubjectUpdate,
    VerdictProjection,
};
pub use runtime::{Runtime, RuntimeSettings};

/// Progress record for one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskEvent {
    pub task_key: String,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskEvent {
    pub fn running(key: impl Into<String>) -> Self {
        Self {
            task_key: key.into(),
            status: TaskStatus::Running,
            content: None,
            error: None,
        }
    }

    pub fn complete(key: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            task_key: key.into(),
            status: TaskStatus::Complete,
            content: Some(content.into()),
            error: None,
        }
    }

    pub fn failed(key: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            task_key: key.into(),
            status: TaskStatus::Failed,
            content: None,
            error: Some(error.into()),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// Item of the ordered event stream produced by one phase run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    Task(TaskEvent),
    /// Always the last item of a run that finished without a fatal error.
    EndOfStream,
}

impl PipelineEvent {
    /// JSON form: the task event itself, or `{"done": true}`.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            PipelineEvent::Task(ev) => json!(ev),
            PipelineEvent::EndOfStream => json!({ "done": true }),
        }
    }

    pub fn as_task(&self) -> Option<&TaskEvent> {
        match self {
            PipelineEvent::Task(ev) => Some(ev),
            PipelineEvent::EndOfStream => None,
        }
    }
}

/// What happened during one phase run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub subject: String,
    pub phase: String,
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
    /// Complete and locked; emitted from stored content.
    pub settled: Vec<String>,
    /// Never launched: skipped by policy, halted, or stalled.
    pub not_launched: Vec<String>,
    /// First failed task when the run was halted by `fail_run`.
    pub halted_by: Option<String>,
}

impl RunSummary {
    /// Every task ended complete (run or settled).
    pub fn all_complete(&self) -> bool {
        self.failed.is_empty() && self.not_launched.is_empty()
    }
}
