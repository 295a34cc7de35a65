// src/dag/state_manager.rs

//! Completed outputs for one invocation and the per-task context assembled
//! from them.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tracing::debug;

use crate::dag::task_info::{TaskDef, TaskKey};
use crate::types::ContextScope;

/// The growing `key -> content` map of one invocation.
///
/// A key maps to `Some(content)` when the task succeeded (or was seeded from
/// the store) and to `None` when it failed. Both count as settled for
/// readiness. Entries are never removed.
#[derive(Debug, Clone, Default)]
pub struct CompletedOutputs {
    entries: HashMap<TaskKey, Option<String>>,
}

impl CompletedOutputs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_success(&mut self, key: &str, content: String) {
        debug!(task = %key, bytes = content.len(), "recording completed output");
        self.entries.insert(key.to_string(), Some(content));
    }

    /// Record a failure. An existing successful entry for the same key is
    /// kept; a failure never erases content.
    pub fn insert_failure(&mut self, key: &str) {
        debug!(task = %key, "recording failed output (no content)");
        self.entries.entry(key.to_string()).or_insert(None);
    }

    pub fn is_settled(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn content(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|c| c.as_deref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    /// Assemble the context handed to `task`'s execution unit.
    ///
    /// Declared dependencies are always present (with `None` for a failed
    /// one). Under [`ContextScope::AllCompleted`] every other settled entry
    /// is added as well.
    pub fn context_for(&self, task: &TaskDef, scope: ContextScope) -> DependencyContext {
        let mut entries = BTreeMap::new();

        for dep in task.depends_on.iter() {
            let value = self.entries.get(dep).cloned().flatten();
            entries.insert(dep.clone(), value);
        }

        if scope == ContextScope::AllCompleted {
            for (key, value) in self.entries.iter() {
                if key != &task.key && !entries.contains_key(key) {
                    entries.insert(key.clone(), value.clone());
                }
            }
        }

        DependencyContext { entries }
    }
}

/// Outputs of settled tasks as seen by one execution unit.
///
/// Serialises as a JSON object mapping keys to content or `null`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct DependencyContext {
    entries: BTreeMap<TaskKey, Option<String>>,
}

impl DependencyContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: impl Into<String>, content: Option<&str>) -> Self {
        self.entries.insert(key.into(), content.map(str::to_string));
        self
    }

    /// Content for `key`, if it is present and its task succeeded.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|c| c.as_deref())
    }

    /// Content for `key`, or `placeholder` when the entry is absent or empty.
    pub fn get_or<'a>(&'a self, key: &str, placeholder: &'a str) -> &'a str {
        self.get(key).unwrap_or(placeholder)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Keys that are present but carry no content (their task failed).
    pub fn missing(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|(_, v)| v.is_none())
            .map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_deref()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
