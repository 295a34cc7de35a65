// src/store/memory.rs

use std::sync::{Mutex, MutexGuard};

use anyhow::{anyhow, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::debug;

use super::{RunFilter, StateStore, StoreDocument, Subject, TaskRun, TaskRunPatch};

/// Keeps subjects and task runs in memory only.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    doc: Mutex<StoreDocument>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing document (fixtures).
    pub fn from_document(doc: StoreDocument) -> Self {
        Self {
            doc: Mutex::new(doc),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Result<StoreDocument> {
        Ok(self.lock()?.clone())
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreDocument>> {
        self.doc
            .lock()
            .map_err(|_| anyhow!("memory state store mutex poisoned"))
    }
}

impl StateStore for MemoryStateStore {
    fn get_task_run(&self, subject: &str, key: &str) -> Result<Option<TaskRun>> {
        Ok(self.lock()?.get_task_run(subject, key))
    }

    fn list_task_runs(&self, subject: &str, filter: &RunFilter) -> Result<Vec<TaskRun>> {
        Ok(self.lock()?.list_task_runs(subject, filter))
    }

    fn upsert_task_run(&self, subject: &str, key: &str, patch: TaskRunPatch) -> Result<TaskRun> {
        let run = self.lock()?.upsert_task_run(subject, key, patch, Utc::now())?;
        debug!(subject = %subject, task = %key, status = %run.status, "upserted task run (memory)");
        Ok(run)
    }

    fn set_subject_field(&self, subject: &str, field: &str, value: Value) -> Result<()> {
        self.lock()?.set_subject_field(subject, field, value)?;
        debug!(subject = %subject, field = %field, "updated subject field (memory)");
        Ok(())
    }

    fn get_subject(&self, subject: &str) -> Result<Option<Subject>> {
        Ok(self.lock()?.subjects.get(subject).cloned())
    }

    fn put_subject(&self, subject: Subject) -> Result<()> {
        self.lock()?.subjects.insert(subject.id.clone(), subject);
        Ok(())
    }
}
