use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Persisted status of a task run.
///
/// A task with no stored run is implicitly `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl TaskStatus {
    /// `Complete` and `Failed` are terminal ("settled").
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Complete | TaskStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Complete => "complete",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!(
                "invalid task status: {other} (expected pending, running, complete or failed)"
            )),
        }
    }
}

/// What happens to the dependents of a task that failed.
///
/// - `PropagateEmpty`: the failed key still counts as settled; dependents
///   launch and see an empty context entry for it (default).
/// - `SkipDependents`: transitive dependents of the failed task are never
///   launched in this run.
/// - `FailRun`: no new task is launched after the first failure. Tasks that
///   are already in flight still finish and are recorded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DependencyFailurePolicy {
    #[default]
    PropagateEmpty,
    SkipDependents,
    FailRun,
}

impl FromStr for DependencyFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "propagate_empty" => Ok(DependencyFailurePolicy::PropagateEmpty),
            "skip_dependents" => Ok(DependencyFailurePolicy::SkipDependents),
            "fail_run" | "fail" => Ok(DependencyFailurePolicy::FailRun),
            other => Err(format!(
                "invalid on_dependency_failure: {other} (expected \"propagate_empty\", \"skip_dependents\" or \"fail_run\")"
            )),
        }
    }
}

/// Which completed outputs a task of a given phase gets to see.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextScope {
    /// Only the task's declared `after` keys.
    #[default]
    Dependencies,
    /// Declared keys plus every completed output, including the complete
    /// runs of other phases.
    AllCompleted,
}

/// How a [`crate::exec::CommandUnit`] interprets its stdout.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// The whole of stdout is the content.
    #[default]
    Text,
    /// stdout is a JSON object `{ "content": ..., "generator": ..., "tokens_used": ... }`.
    Json,
}
