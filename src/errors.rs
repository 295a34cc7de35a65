// src/errors.rs

//! Crate-wide error type and aliases.
//!
//! Configuration problems (bad catalog, missing execution unit, missing
//! reference material) and state store failures are fatal to an
//! invocation. Task execution errors never show up here; they are
//! recorded per task as [`crate::exec::GenerationError`].

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SectionDagError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in DAG: {0}")]
    DagCycle(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("No execution unit registered for task: {0}")]
    MissingExecutionUnit(String),

    #[error("Reference '{key}' could not be loaded: {reason}")]
    MissingReference { key: String, reason: String },

    #[error("Subject not found: {0}")]
    SubjectNotFound(String),

    #[error("State store error: {0:#}")]
    Store(anyhow::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SectionDagError {
    /// Whether this error stems from the catalog / wiring rather than from
    /// the run itself.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            SectionDagError::ConfigError(_)
                | SectionDagError::DagCycle(_)
                | SectionDagError::UnknownPhase(_)
                | SectionDagError::MissingExecutionUnit(_)
                | SectionDagError::MissingReference { .. }
        )
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, SectionDagError>;
