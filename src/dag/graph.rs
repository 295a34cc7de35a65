// src/dag/graph.rs

use std::collections::{HashMap, HashSet};

use crate::dag::task_info::TaskDef;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: tasks whose output this one waits for.
    deps: Vec<String>,
    /// Direct dependents: tasks that list this one in `depends_on`.
    dependents: Vec<String>,
}

/// Simple in-memory DAG keyed by task key.
///
/// Acyclicity is checked when the catalog is built; this only keeps
/// adjacency information for scheduling and diagnostics.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: HashMap<String, DagNode>,
}

impl DagGraph {
    /// Build a DAG from task definitions.
    ///
    /// Dependencies on keys outside `tasks` are kept in the dependency list
    /// but get no node of their own.
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a TaskDef>) -> Self {
        let mut nodes: HashMap<String, DagNode> = HashMap::new();

        for task in tasks {
            nodes.insert(
                task.key.clone(),
                DagNode {
                    deps: task.depends_on.clone(),
                    dependents: Vec::new(),
                },
            );
        }

        let keys: Vec<String> = nodes.keys().cloned().collect();
        for key in keys {
            let deps = nodes.get(&key).map(|n| n.deps.clone()).unwrap_or_default();
            for dep in deps {
                if let Some(dep_node) = nodes.get_mut(&dep) {
                    dep_node.dependents.push(key.clone());
                }
            }
        }

        Self { nodes }
    }

    pub fn dependents_of(&self, key: &str) -> &[String] {
        self.nodes
            .get(key)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }

    /// All tasks reachable downstream of `key`, excluding `key` itself.
    pub fn transitive_dependents_of(&self, key: &str) -> HashSet<String> {
        let mut seen = HashSet::new();
        let mut stack: Vec<&str> = self.dependents_of(key).iter().map(|s| s.as_str()).collect();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.to_string()) {
                continue;
            }
            stack.extend(self.dependents_of(name).iter().map(|s| s.as_str()));
        }

        seen
    }
}
