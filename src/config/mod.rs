// src/config/mod.rs

//! Catalog file loading and validation.
//!
//! - [`model`] is the TOML-backed data model.
//! - [`loader`] reads a catalog file from disk.
//! - [`validate`] checks phase membership, dependency references and
//!   per-phase acyclicity.

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{
    default_catalog_path, load_and_validate, load_from_path, parse_and_validate, parse_str,
};
pub use model::{
    CatalogFile, ConfigSection, PhaseConfig, ProjectionConfig, ProjectionKind, RawCatalogFile,
    TaskConfig,
};
