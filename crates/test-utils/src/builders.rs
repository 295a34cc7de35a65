#![allow(dead_code)]

use std::collections::BTreeSet;

use sectiondag::dag::{PhaseDef, TaskCatalog, TaskDef};
use sectiondag::errors::Result;
use sectiondag::types::ContextScope;

/// Builder for `TaskCatalog` to simplify test setup.
///
/// Phases referenced by a task are declared automatically with default
/// settings unless declared explicitly.
pub struct CatalogBuilder {
    phases: Vec<PhaseDef>,
    tasks: Vec<TaskDef>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self {
            phases: Vec::new(),
            tasks: Vec::new(),
        }
    }

    pub fn with_phase(mut self, phase: PhaseDef) -> Self {
        self.phases.push(phase);
        self
    }

    /// Phase whose tasks see every completed output.
    pub fn with_wide_phase(self, name: &str) -> Self {
        self.with_phase(PhaseDef::new(name).with_context(ContextScope::AllCompleted))
    }

    pub fn with_stages(mut self, phase: &str, start: &str, terminal: &str) -> Self {
        let def = PhaseDef::new(phase).with_stages(Some(start), Some(terminal));
        self.phases.retain(|p| p.name != phase);
        self.phases.push(def);
        self
    }

    pub fn with_task(mut self, task: impl Into<TaskDef>) -> Self {
        self.tasks.push(task.into());
        self
    }

    pub fn try_build(self) -> Result<TaskCatalog> {
        let declared: BTreeSet<String> = self.phases.iter().map(|p| p.name.clone()).collect();
        let implied: BTreeSet<String> = self
            .tasks
            .iter()
            .map(|t| t.phase.clone())
            .filter(|p| !declared.contains(p))
            .collect();

        let mut builder = TaskCatalog::builder();
        for phase in self.phases {
            builder = builder.phase(phase);
        }
        for phase in implied {
            builder = builder.phase(PhaseDef::new(phase));
        }
        for task in self.tasks {
            builder = builder.task(task);
        }
        builder.build()
    }

    pub fn build(self) -> TaskCatalog {
        self.try_build()
            .expect("Failed to build valid catalog from builder")
    }
}

impl Default for CatalogBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskDef`.
pub struct TaskDefBuilder {
    task: TaskDef,
}

impl TaskDefBuilder {
    pub fn new(key: &str, phase: &str) -> Self {
        Self {
            task: TaskDef::new(key, phase),
        }
    }

    pub fn after(mut self, dep: &str) -> Self {
        self.task.depends_on.push(dep.to_string());
        self
    }

    pub fn label(mut self, label: &str) -> Self {
        self.task.label = label.to_string();
        self
    }

    pub fn order(mut self, order: i32) -> Self {
        self.task.order = order;
        self
    }

    pub fn build(self) -> TaskDef {
        self.task
    }
}

impl From<TaskDefBuilder> for TaskDef {
    fn from(b: TaskDefBuilder) -> Self {
        b.build()
    }
}

/// `A -> B -> C` in phase `p`.
pub fn linear_chain() -> TaskCatalog {
    CatalogBuilder::new()
        .with_task(TaskDefBuilder::new("A", "p").order(1))
        .with_task(TaskDefBuilder::new("B", "p").order(2).after("A"))
        .with_task(TaskDefBuilder::new("C", "p").order(3).after("B"))
        .build()
}

/// `A -> {B, C} -> D` in phase `p`.
pub fn diamond() -> TaskCatalog {
    CatalogBuilder::new()
        .with_task(TaskDefBuilder::new("A", "p").order(1))
        .with_task(TaskDefBuilder::new("B", "p").order(2).after("A"))
        .with_task(TaskDefBuilder::new("C", "p").order(3).after("A"))
        .with_task(TaskDefBuilder::new("D", "p").order(4).after("B").after("C"))
        .build()
}
