// src/dag/catalog.rs

//! The immutable task catalog.
//!
//! A [`TaskCatalog`] is built once (from a validated [`CatalogFile`] or via
//! [`TaskCatalog::builder`]) and then shared read-only, usually behind an
//! `Arc`. Several catalogs can coexist, which is what test fixtures rely on.

use std::collections::{BTreeMap, HashSet};

use crate::config::model::CatalogFile;
use crate::config::validate::validate_task_graph;
use crate::dag::task_info::{PhaseDef, TaskDef};
use crate::errors::{Result, SectionDagError};

#[derive(Debug, Clone)]
pub struct TaskCatalog {
    phases: BTreeMap<String, PhaseDef>,
    tasks: BTreeMap<String, TaskDef>,
}

impl TaskCatalog {
    pub fn builder() -> TaskCatalogBuilder {
        TaskCatalogBuilder::default()
    }

    /// Build the catalog from an already validated catalog file.
    pub fn from_catalog_file(cfg: &CatalogFile) -> Self {
        let phases = cfg
            .phase
            .iter()
            .map(|(name, pc)| (name.clone(), PhaseDef::from_config(name, pc)))
            .collect();
        let tasks = cfg
            .task
            .iter()
            .map(|(key, tc)| (key.clone(), TaskDef::from_config(key, tc)))
            .collect();

        Self { phases, tasks }
    }

    /// Tasks of `phase`, ordered by `(order, key)`.
    pub fn list_tasks(&self, phase: &str) -> Result<Vec<&TaskDef>> {
        if !self.phases.contains_key(phase) {
            return Err(SectionDagError::UnknownPhase(phase.to_string()));
        }

        let mut tasks: Vec<&TaskDef> = self.tasks.values().filter(|t| t.phase == phase).collect();
        tasks.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.key.cmp(&b.key)));
        Ok(tasks)
    }

    /// Every task across all phases, ordered by `(phase, order, key)`.
    pub fn all_tasks(&self) -> Vec<&TaskDef> {
        let mut tasks: Vec<&TaskDef> = self.tasks.values().collect();
        tasks.sort_by(|a, b| {
            a.phase
                .cmp(&b.phase)
                .then_with(|| a.order.cmp(&b.order))
                .then_with(|| a.key.cmp(&b.key))
        });
        tasks
    }

    pub fn task(&self, key: &str) -> Option<&TaskDef> {
        self.tasks.get(key)
    }

    pub fn phase(&self, name: &str) -> Option<&PhaseDef> {
        self.phases.get(name)
    }

    pub fn phases(&self) -> impl Iterator<Item = &PhaseDef> {
        self.phases.values()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(|k| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct TaskCatalogBuilder {
    phases: Vec<PhaseDef>,
    tasks: Vec<TaskDef>,
}

impl TaskCatalogBuilder {
    pub fn phase(mut self, phase: PhaseDef) -> Self {
        self.phases.push(phase);
        self
    }

    pub fn task(mut self, task: TaskDef) -> Self {
        self.tasks.push(task);
        self
    }

    /// Validate and freeze the catalog.
    pub fn build(self) -> Result<TaskCatalog> {
        let mut phases = BTreeMap::new();
        for phase in self.phases {
            if phases.contains_key(&phase.name) {
                return Err(SectionDagError::ConfigError(format!(
                    "phase '{}' is declared more than once",
                    phase.name
                )));
            }
            phases.insert(phase.name.clone(), phase);
        }

        let names: HashSet<&str> = phases.keys().map(|s| s.as_str()).collect();
        validate_task_graph(&names, &self.tasks)?;

        let tasks = self
            .tasks
            .into_iter()
            .map(|t| (t.key.clone(), t))
            .collect();

        Ok(TaskCatalog { phases, tasks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_tasks_is_ordered_and_phase_scoped() {
        let catalog = TaskCatalog::builder()
            .phase(PhaseDef::new("analysis"))
            .phase(PhaseDef::new("letter"))
            .task(TaskDef::new("verdict", "analysis").with_order(1))
            .task(TaskDef::new("cleanup", "analysis").with_order(20))
            .task(TaskDef::new("gate", "analysis").with_order(7).after("cleanup"))
            .task(TaskDef::new("intro", "letter"))
            .build()
            .unwrap();

        let keys: Vec<&str> = catalog
            .list_tasks("analysis")
            .unwrap()
            .iter()
            .map(|t| t.key.as_str())
            .collect();
        assert_eq!(keys, vec!["verdict", "gate", "cleanup"]);

        assert!(matches!(
            catalog.list_tasks("nope"),
            Err(SectionDagError::UnknownPhase(_))
        ));
    }

    #[test]
    fn builder_rejects_cycles() {
        let result = TaskCatalog::builder()
            .phase(PhaseDef::new("p"))
            .task(TaskDef::new("A", "p").after("B"))
            .task(TaskDef::new("B", "p").after("A"))
            .build();
        assert!(matches!(result, Err(SectionDagError::DagCycle(_))));
    }
}
