// src/config/validate.rs

use std::collections::{BTreeMap, HashSet};

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{CatalogFile, ProjectionKind, RawCatalogFile};
use crate::dag::task_info::TaskDef;
use crate::errors::{Result, SectionDagError};

impl TryFrom<RawCatalogFile> for CatalogFile {
    type Error = SectionDagError;

    fn try_from(raw: RawCatalogFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_catalog(&raw)?;
        Ok(CatalogFile::new_unchecked(raw))
    }
}

fn validate_raw_catalog(cfg: &RawCatalogFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_references(cfg)?;

    let phases: HashSet<&str> = cfg.phase.keys().map(|s| s.as_str()).collect();
    let tasks: Vec<TaskDef> = cfg
        .task
        .iter()
        .map(|(key, tc)| TaskDef::from_config(key, tc))
        .collect();
    validate_task_graph(&phases, &tasks)?;

    validate_projections(cfg)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawCatalogFile) -> Result<()> {
    if cfg.task.is_empty() {
        return Err(SectionDagError::ConfigError(
            "catalog must contain at least one [task.<key>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_global_config(cfg: &RawCatalogFile) -> Result<()> {
    if cfg.config.stage_field.trim().is_empty() {
        return Err(SectionDagError::ConfigError(
            "[config].stage_field must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn validate_references(cfg: &RawCatalogFile) -> Result<()> {
    for (key, file) in cfg.reference.iter() {
        if file.trim().is_empty() {
            return Err(SectionDagError::ConfigError(format!(
                "reference '{}' has an empty file name",
                key
            )));
        }
    }
    Ok(())
}

fn validate_projections(cfg: &RawCatalogFile) -> Result<()> {
    for projection in cfg.projection.iter() {
        if !cfg.task.contains_key(&projection.task) {
            return Err(SectionDagError::ConfigError(format!(
                "projection refers to unknown task '{}'",
                projection.task
            )));
        }
        match &projection.kind {
            ProjectionKind::Promote { field } | ProjectionKind::Hours { field }
                if field.trim().is_empty() =>
            {
                return Err(SectionDagError::ConfigError(format!(
                    "projection for task '{}' has an empty field name",
                    projection.task
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Structural checks shared by the catalog file and
/// [`crate::dag::TaskCatalog::builder`]:
///
/// - keys are unique and every task belongs to a declared phase,
/// - every `depends_on` key exists, is not the task itself, and lives in
///   the same phase,
/// - the graph restricted to each phase is acyclic.
pub(crate) fn validate_task_graph(phases: &HashSet<&str>, tasks: &[TaskDef]) -> Result<()> {
    let mut by_key: BTreeMap<&str, &TaskDef> = BTreeMap::new();
    for task in tasks {
        if task.key.trim().is_empty() {
            return Err(SectionDagError::ConfigError(
                "task keys must not be empty".to_string(),
            ));
        }
        if by_key.insert(task.key.as_str(), task).is_some() {
            return Err(SectionDagError::ConfigError(format!(
                "task '{}' is defined more than once",
                task.key
            )));
        }
        if !phases.contains(task.phase.as_str()) {
            return Err(SectionDagError::ConfigError(format!(
                "task '{}' belongs to undeclared phase '{}'",
                task.key, task.phase
            )));
        }
    }

    for task in tasks {
        for dep in task.depends_on.iter() {
            if dep == &task.key {
                return Err(SectionDagError::ConfigError(format!(
                    "task '{}' cannot depend on itself in `after`",
                    task.key
                )));
            }
            let Some(dep_def) = by_key.get(dep.as_str()) else {
                return Err(SectionDagError::ConfigError(format!(
                    "task '{}' has unknown dependency '{}' in `after`",
                    task.key, dep
                )));
            };
            if dep_def.phase != task.phase {
                return Err(SectionDagError::ConfigError(format!(
                    "task '{}' (phase '{}') depends on '{}' from another phase '{}'",
                    task.key, task.phase, dep, dep_def.phase
                )));
            }
        }
    }

    for phase in phases.iter() {
        validate_phase_dag(phase, tasks)?;
    }

    Ok(())
}

fn validate_phase_dag(phase: &str, tasks: &[TaskDef]) -> Result<()> {
    // Edge direction: dep -> task, so `B after A` is the edge A -> B.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for task in tasks.iter().filter(|t| t.phase == phase) {
        graph.add_node(task.key.as_str());
        for dep in task.depends_on.iter() {
            graph.add_edge(dep.as_str(), task.key.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SectionDagError::DagCycle(format!(
            "cycle detected in phase '{}' involving task '{}'",
            phase,
            cycle.node_id()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn phases<'a>(names: &[&'a str]) -> HashSet<&'a str> {
        names.iter().copied().collect()
    }

    #[test]
    fn two_task_cycle_is_rejected() {
        let tasks = vec![
            TaskDef::new("A", "p").after("B"),
            TaskDef::new("B", "p").after("A"),
        ];
        match validate_task_graph(&phases(&["p"]), &tasks) {
            Err(SectionDagError::DagCycle(msg)) => {
                assert!(msg.contains("cycle detected"));
                assert!(msg.contains("'p'"));
            }
            other => panic!("expected DagCycle, got {:?}", other),
        }
    }

    #[test]
    fn cross_phase_dependency_is_rejected() {
        let tasks = vec![
            TaskDef::new("A", "first"),
            TaskDef::new("B", "second").after("A"),
        ];
        let err = validate_task_graph(&phases(&["first", "second"]), &tasks).unwrap_err();
        assert!(err.to_string().contains("another phase"), "{err}");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let tasks = vec![TaskDef::new("A", "p"), TaskDef::new("A", "p")];
        let err = validate_task_graph(&phases(&["p"]), &tasks).unwrap_err();
        assert!(err.to_string().contains("more than once"));
    }

    #[test]
    fn undeclared_phase_is_rejected() {
        let tasks = vec![TaskDef::new("A", "ghost")];
        let err = validate_task_graph(&phases(&["p"]), &tasks).unwrap_err();
        assert!(err.to_string().contains("undeclared phase"));
    }
}
