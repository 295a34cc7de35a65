// src/store/file.rs

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info};

use crate::fs::{FileSystem, RealFileSystem};

use super::{RunFilter, StateStore, StoreDocument, Subject, TaskRun, TaskRunPatch};

/// Stores everything in one JSON document on disk.
///
/// Every operation reads the document, applies the change and writes it
/// back, all under one mutex, so concurrent writers in this process never
/// lose each other's updates.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    fs: Arc<dyn FileSystem>,
    io: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_fs(path, Arc::new(RealFileSystem))
    }

    pub fn with_fs(path: impl Into<PathBuf>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            path: path.into(),
            fs,
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<StoreDocument> {
        if !self.fs.exists(&self.path) {
            return Ok(StoreDocument::default());
        }
        let raw = self.fs.read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(StoreDocument::default());
        }
        serde_json::from_str(&raw)
            .with_context(|| format!("parsing state store document {:?}", self.path))
    }

    fn save(&self, doc: &StoreDocument) -> Result<()> {
        let json = serde_json::to_vec_pretty(doc).context("serialising state store document")?;
        self.fs
            .write(&self.path, &json)
            .with_context(|| format!("writing state store document {:?}", self.path))
    }

    fn read<T>(&self, f: impl FnOnce(&StoreDocument) -> T) -> Result<T> {
        let _guard = self
            .io
            .lock()
            .map_err(|_| anyhow!("json file store mutex poisoned"))?;
        let doc = self.load()?;
        Ok(f(&doc))
    }

    fn modify<T>(&self, f: impl FnOnce(&mut StoreDocument) -> Result<T>) -> Result<T> {
        let _guard = self
            .io
            .lock()
            .map_err(|_| anyhow!("json file store mutex poisoned"))?;
        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.save(&doc)?;
        Ok(out)
    }
}

impl StateStore for JsonFileStore {
    fn get_task_run(&self, subject: &str, key: &str) -> Result<Option<TaskRun>> {
        self.read(|doc| doc.get_task_run(subject, key))
    }

    fn list_task_runs(&self, subject: &str, filter: &RunFilter) -> Result<Vec<TaskRun>> {
        self.read(|doc| doc.list_task_runs(subject, filter))
    }

    fn upsert_task_run(&self, subject: &str, key: &str, patch: TaskRunPatch) -> Result<TaskRun> {
        let run = self.modify(|doc| doc.upsert_task_run(subject, key, patch, Utc::now()))?;
        debug!(
            subject = %subject,
            task = %key,
            status = %run.status,
            path = ?self.path,
            "upserted task run (file)"
        );
        Ok(run)
    }

    fn set_subject_field(&self, subject: &str, field: &str, value: Value) -> Result<()> {
        self.modify(|doc| doc.set_subject_field(subject, field, value))?;
        debug!(subject = %subject, field = %field, "updated subject field (file)");
        Ok(())
    }

    fn get_subject(&self, subject: &str) -> Result<Option<Subject>> {
        self.read(|doc| doc.subjects.get(subject).cloned())
    }

    fn put_subject(&self, subject: Subject) -> Result<()> {
        let id = subject.id.clone();
        self.modify(|doc| {
            doc.subjects.insert(subject.id.clone(), subject);
            Ok(())
        })?;
        info!(subject = %id, path = ?self.path, "stored subject (file)");
        Ok(())
    }
}
