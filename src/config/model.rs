// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::types::{ContextScope, DependencyFailurePolicy, OutputFormat};

/// Catalog file as read from TOML, before validation.
///
/// ```toml
/// [config]
/// on_dependency_failure = "propagate_empty"
/// stage_field = "pipeline_stage"
///
/// [reference]
/// resume = "resume.md"
///
/// [phase.analysis]
/// start_stage = "analyzing"
/// terminal_stage = "analyzed"
///
/// [task.gate_check]
/// label = "Gate Check"
/// order = 7
/// phase = "analysis"
/// after = ["evidence_cleanup"]
/// cmd = "./gen gate_check"
///
/// [[projection]]
/// task = "final_verdict"
/// kind = "verdict"
/// ```
///
/// All sections except `[task.*]` are optional.
#[derive(Debug, Clone, Deserialize)]
pub struct RawCatalogFile {
    #[serde(default)]
    pub config: ConfigSection,

    /// Reference material: short key -> file name under `reference_dir`.
    #[serde(default)]
    pub reference: BTreeMap<String, String>,

    #[serde(default)]
    pub phase: BTreeMap<String, PhaseConfig>,

    /// Keys are the task keys used for persistence and `after` references.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,

    #[serde(default)]
    pub projection: Vec<ProjectionConfig>,
}

/// Validated catalog file.
///
/// Only obtainable via `TryFrom<RawCatalogFile>`, which runs the checks in
/// [`crate::config::validate`].
#[derive(Debug, Clone)]
pub struct CatalogFile {
    pub config: ConfigSection,
    pub reference: BTreeMap<String, String>,
    pub phase: BTreeMap<String, PhaseConfig>,
    pub task: BTreeMap<String, TaskConfig>,
    pub projection: Vec<ProjectionConfig>,
}

impl CatalogFile {
    pub(crate) fn new_unchecked(raw: RawCatalogFile) -> Self {
        Self {
            config: raw.config,
            reference: raw.reference,
            phase: raw.phase,
            task: raw.task,
            projection: raw.projection,
        }
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigSection {
    #[serde(default)]
    pub on_dependency_failure: DependencyFailurePolicy,

    /// Upper bound on tasks in flight per run; `0` means unbounded.
    #[serde(default)]
    pub max_concurrency: usize,

    /// Subject field that receives `start_stage` / `terminal_stage`.
    #[serde(default = "default_stage_field")]
    pub stage_field: String,

    /// Directory holding reference files, relative to the catalog file.
    #[serde(default = "default_reference_dir")]
    pub reference_dir: String,
}

fn default_stage_field() -> String {
    "pipeline_stage".to_string()
}

fn default_reference_dir() -> String {
    "references".to_string()
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            on_dependency_failure: DependencyFailurePolicy::default(),
            max_concurrency: 0,
            stage_field: default_stage_field(),
            reference_dir: default_reference_dir(),
        }
    }
}

impl ConfigSection {
    pub fn effective_max_concurrency(&self) -> Option<usize> {
        if self.max_concurrency == 0 {
            None
        } else {
            Some(self.max_concurrency)
        }
    }
}

/// `[phase.<name>]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseConfig {
    #[serde(default)]
    pub context: ContextScope,

    /// Written to the stage field before the phase starts running.
    #[serde(default)]
    pub start_stage: Option<String>,

    /// Written to the stage field once the phase has drained.
    #[serde(default)]
    pub terminal_stage: Option<String>,
}

/// `[task.<key>]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct TaskConfig {
    /// Human label; defaults to the key.
    #[serde(default)]
    pub label: Option<String>,

    /// Presentation order only.
    #[serde(default)]
    pub order: i32,

    pub phase: String,

    /// Keys of tasks in the same phase whose output this task needs.
    #[serde(default)]
    pub after: Vec<String>,

    /// Command producing the task's content. Tasks without a command need an
    /// execution unit registered programmatically.
    #[serde(default)]
    pub cmd: Option<String>,

    #[serde(default)]
    pub output: OutputFormat,

    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// Generator identifier recorded in task metadata.
    #[serde(default)]
    pub generator: Option<String>,
}

impl TaskConfig {
    pub fn effective_label(&self, key: &str) -> String {
        self.label.clone().unwrap_or_else(|| key.to_string())
    }
}

/// `[[projection]]` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectionConfig {
    pub task: String,

    #[serde(flatten)]
    pub kind: ProjectionKind,
}

/// Built-in projections that can be declared in the catalog file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ProjectionKind {
    /// Copy the task content verbatim into `field`.
    Promote { field: String },
    /// Parse score / verdict / hours from a verdict write-up.
    Verdict,
    /// Parse an integer weekly-hours value into `field`.
    Hours {
        #[serde(default = "default_hours_field")]
        field: String,
    },
}

fn default_hours_field() -> String {
    "hours".to_string()
}
