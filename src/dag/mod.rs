// src/dag/mod.rs

//! Task catalog and DAG scheduling.
//!
//! - [`catalog`] holds the immutable [`TaskCatalog`].
//! - [`graph`] is a lightweight adjacency view of a phase.
//! - [`scheduler`] contains the per-invocation state machine that decides
//!   which tasks are ready and applies the failure policy.
//! - [`state_manager`] owns the completed-output map and context assembly.
//! - [`task_info`] provides task / phase definitions and run states.
//! - [`scheduler_step`] defines the result type for scheduler steps.

pub mod catalog;
pub mod graph;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;
pub mod task_info;

pub use catalog::{TaskCatalog, TaskCatalogBuilder};
pub use graph::DagGraph;
pub use scheduler::{Scheduler, SchedulerOptions};
pub use scheduler_step::SchedulerStep;
pub use state_manager::{CompletedOutputs, DependencyContext};
pub use task_info::{PhaseDef, ScheduledTask, TaskDef, TaskKey, TaskRunState};
