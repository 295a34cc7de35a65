// src/exec/registry.rs

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::config::model::CatalogFile;
use crate::dag::TaskDef;
use crate::errors::{Result, SectionDagError};
use crate::exec::command::CommandUnit;
use crate::exec::unit::ExecutionUnit;

/// Task key -> execution unit.
#[derive(Clone, Default)]
pub struct ExecutionRegistry {
    units: HashMap<String, Arc<dyn ExecutionUnit>>,
}

impl std::fmt::Debug for ExecutionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<&String> = self.units.keys().collect();
        keys.sort();
        f.debug_struct("ExecutionRegistry")
            .field("units", &keys)
            .finish()
    }
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// One [`CommandUnit`] per task that declares a `cmd`.
    pub fn from_catalog_file(cfg: &CatalogFile) -> Self {
        let mut registry = Self::new();
        for (key, task) in cfg.task.iter() {
            let Some(cmd) = task.cmd.as_deref() else {
                continue;
            };
            let mut unit = CommandUnit::new(cmd).with_output(task.output);
            if let Some(secs) = task.timeout_secs {
                unit = unit.with_timeout(Duration::from_secs(secs));
            }
            if let Some(generator) = task.generator.as_deref() {
                unit = unit.with_generator(generator);
            }
            registry.register(key.clone(), unit);
        }
        registry
    }

    /// Bind `key` to `unit`, replacing any previous binding.
    pub fn register(&mut self, key: impl Into<String>, unit: impl ExecutionUnit + 'static) {
        self.register_arc(key, Arc::new(unit));
    }

    pub fn register_arc(&mut self, key: impl Into<String>, unit: Arc<dyn ExecutionUnit>) {
        let key = key.into();
        debug!(task = %key, "execution unit registered");
        self.units.insert(key, unit);
    }

    pub fn resolve(&self, key: &str) -> Result<Arc<dyn ExecutionUnit>> {
        self.units
            .get(key)
            .cloned()
            .ok_or_else(|| SectionDagError::MissingExecutionUnit(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.units.contains_key(key)
    }

    /// Fail with the first task that has no unit.
    pub fn ensure_covers<'a>(&self, tasks: impl IntoIterator<Item = &'a TaskDef>) -> Result<()> {
        for task in tasks {
            if !self.contains(&task.key) {
                return Err(SectionDagError::MissingExecutionUnit(task.key.clone()));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::parse_and_validate;
    use crate::exec::unit::{BlockingUnit, GenerationOutput, GenerationRequest};

    #[test]
    fn commands_from_catalog_and_manual_units() {
        let cfg = parse_and_validate(
            r#"
            [phase.p]

            [task.A]
            phase = "p"
            cmd = "echo a"

            [task.B]
            phase = "p"
            after = ["A"]
            "#,
        )
        .unwrap();

        let mut registry = ExecutionRegistry::from_catalog_file(&cfg);
        assert!(registry.contains("A"));

        let a = TaskDef::new("A", "p");
        let b = TaskDef::new("B", "p");
        assert!(matches!(
            registry.ensure_covers([&a, &b]),
            Err(SectionDagError::MissingExecutionUnit(k)) if k == "B"
        ));

        registry.register(
            "B",
            BlockingUnit::new(|_: &GenerationRequest| Ok(GenerationOutput::new("b"))),
        );
        registry.ensure_covers([&a, &b]).unwrap();
        assert!(registry.resolve("C").is_err());
    }
}
