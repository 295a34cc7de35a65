// src/store/mod.rs

//! State store adapter: persisted task runs and subjects.
//!
//! The scheduler only talks to [`StateStore`]. Two implementations ship with
//! the crate:
//! - [`MemoryStateStore`] for tests and embedding
//! - [`JsonFileStore`] for the CLI (one JSON document on disk)
//!
//! Both share [`StoreDocument`], which holds the upsert / filter logic.
//! Writes are last-write-wins per `(subject, key)`.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::TaskStatus;

pub mod file;
pub mod memory;

pub use file::JsonFileStore;
pub use memory::MemoryStateStore;

/// One persisted run of a task for a subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRun {
    pub key: String,
    pub phase: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub generator_id: Option<String>,
    #[serde(default)]
    pub tokens_used: u64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default)]
    pub error_message: Option<String>,
    /// Set by an external actor only; the scheduler never writes it.
    #[serde(default)]
    pub locked: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRun {
    /// Complete and locked: the stored content is final for phase runs.
    pub fn is_settled_locked(&self) -> bool {
        self.status == TaskStatus::Complete && self.locked
    }
}

/// Partial update applied by [`StateStore::upsert_task_run`].
///
/// `None` leaves a field untouched. For optional fields `Some(None)` clears
/// the stored value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskRunPatch {
    pub phase: Option<String>,
    pub status: Option<TaskStatus>,
    pub content: Option<Option<String>>,
    pub generator_id: Option<Option<String>>,
    pub tokens_used: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error_message: Option<Option<String>>,
    pub locked: Option<bool>,
}

impl TaskRunPatch {
    /// Marks the run `running` and clears any previous error.
    pub fn running(phase: &str) -> Self {
        Self {
            phase: Some(phase.to_string()),
            status: Some(TaskStatus::Running),
            error_message: Some(None),
            ..Self::default()
        }
    }

    pub fn completed(
        phase: &str,
        content: String,
        generator_id: Option<String>,
        tokens_used: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            phase: Some(phase.to_string()),
            status: Some(TaskStatus::Complete),
            content: Some(Some(content)),
            generator_id: Some(generator_id),
            tokens_used: Some(tokens_used),
            duration_ms: Some(duration_ms),
            error_message: Some(None),
            ..Self::default()
        }
    }

    /// Marks the run `failed`. Previously stored content is kept.
    pub fn failed(phase: &str, message: String, duration_ms: u64) -> Self {
        Self {
            phase: Some(phase.to_string()),
            status: Some(TaskStatus::Failed),
            duration_ms: Some(duration_ms),
            error_message: Some(Some(message)),
            ..Self::default()
        }
    }

    pub fn locked(locked: bool) -> Self {
        Self {
            locked: Some(locked),
            ..Self::default()
        }
    }

    /// Manual content edit: overwrites content, marks it complete and locks it.
    pub fn edited(content: String) -> Self {
        Self {
            status: Some(TaskStatus::Complete),
            content: Some(Some(content)),
            error_message: Some(None),
            locked: Some(true),
            ..Self::default()
        }
    }
}

/// Filter for [`StateStore::list_task_runs`]. Empty filter matches all.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunFilter {
    pub phase: Option<String>,
    pub status: Option<TaskStatus>,
    pub locked: Option<bool>,
}

impl RunFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = Some(phase.into());
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_locked(mut self, locked: bool) -> Self {
        self.locked = Some(locked);
        self
    }

    pub fn matches(&self, run: &TaskRun) -> bool {
        self.phase.as_deref().is_none_or(|p| run.phase == p)
            && self.status.is_none_or(|s| run.status == s)
            && self.locked.is_none_or(|l| run.locked == l)
    }
}

/// The entity every task of an invocation operates on.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subject {
    pub id: String,
    #[serde(default)]
    pub fields: BTreeMap<String, Value>,
}

impl Subject {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn field(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// String value of `field`, if it is a JSON string.
    pub fn field_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(Value::as_str)
    }
}

/// Interface the scheduler uses to read and write per-task state.
///
/// Implementations must be safe to share across tasks; all methods take
/// `&self`. Methods are synchronous and may block on IO: the engine calls
/// them from Tokio's blocking pool, never from an async worker.
pub trait StateStore: Send + Sync {
    fn get_task_run(&self, subject: &str, key: &str) -> Result<Option<TaskRun>>;

    /// Runs for `subject` that match `filter`, ordered by key.
    fn list_task_runs(&self, subject: &str, filter: &RunFilter) -> Result<Vec<TaskRun>>;

    /// Create or update the run for `(subject, key)` and return the stored
    /// record. A new run needs a phase.
    fn upsert_task_run(&self, subject: &str, key: &str, patch: TaskRunPatch) -> Result<TaskRun>;

    /// Fails if the subject does not exist.
    fn set_subject_field(&self, subject: &str, field: &str, value: Value) -> Result<()>;

    fn get_subject(&self, subject: &str) -> Result<Option<Subject>>;

    fn put_subject(&self, subject: Subject) -> Result<()>;
}

/// Serialisable contents of a store: subjects and their task runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreDocument {
    #[serde(default)]
    pub subjects: BTreeMap<String, Subject>,
    /// `subject id -> task key -> run`
    #[serde(default)]
    pub runs: BTreeMap<String, BTreeMap<String, TaskRun>>,
}

impl StoreDocument {
    pub fn get_task_run(&self, subject: &str, key: &str) -> Option<TaskRun> {
        self.runs.get(subject).and_then(|m| m.get(key)).cloned()
    }

    pub fn list_task_runs(&self, subject: &str, filter: &RunFilter) -> Vec<TaskRun> {
        self.runs
            .get(subject)
            .map(|m| m.values().filter(|r| filter.matches(r)).cloned().collect())
            .unwrap_or_default()
    }

    pub fn upsert_task_run(
        &mut self,
        subject: &str,
        key: &str,
        patch: TaskRunPatch,
        now: DateTime<Utc>,
    ) -> Result<TaskRun> {
        let runs = self.runs.entry(subject.to_string()).or_default();

        let run = match runs.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let Some(phase) = patch.phase.clone() else {
                    bail!("creating task run '{key}' for subject '{subject}' requires a phase");
                };
                entry.insert(TaskRun {
                    key: key.to_string(),
                    phase,
                    status: TaskStatus::Pending,
                    content: None,
                    generator_id: None,
                    tokens_used: 0,
                    duration_ms: 0,
                    error_message: None,
                    locked: false,
                    created_at: now,
                    updated_at: now,
                })
            }
        };

        apply_patch(run, patch);
        run.updated_at = now;
        Ok(run.clone())
    }

    pub fn set_subject_field(&mut self, subject: &str, field: &str, value: Value) -> Result<()> {
        let Some(s) = self.subjects.get_mut(subject) else {
            bail!("subject '{subject}' does not exist");
        };
        s.fields.insert(field.to_string(), value);
        Ok(())
    }
}

fn apply_patch(run: &mut TaskRun, patch: TaskRunPatch) {
    if let Some(phase) = patch.phase {
        run.phase = phase;
    }
    if let Some(status) = patch.status {
        run.status = status;
    }
    if let Some(content) = patch.content {
        run.content = content;
    }
    if let Some(generator_id) = patch.generator_id {
        run.generator_id = generator_id;
    }
    if let Some(tokens) = patch.tokens_used {
        run.tokens_used = tokens;
    }
    if let Some(duration) = patch.duration_ms {
        run.duration_ms = duration;
    }
    if let Some(error) = patch.error_message {
        run.error_message = error;
    }
    if let Some(locked) = patch.locked {
        run.locked = locked;
    }
}
