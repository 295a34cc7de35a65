// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{CatalogFile, RawCatalogFile};
use crate::errors::Result;

/// Load a catalog file from a given path and return the raw `RawCatalogFile`.
///
/// This only performs TOML deserialization; it does **not** check the
/// dependency graph. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawCatalogFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Parse catalog TOML from a string.
pub fn parse_str(contents: &str) -> Result<RawCatalogFile> {
    let config: RawCatalogFile = toml::from_str(contents)?;
    Ok(config)
}

/// Load a catalog file from path and validate it.
///
/// This is the entry point the rest of the application uses:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks for:
///   - unknown phases and unknown / cross-phase `after` references,
///   - per-phase cycles,
///   - projections pointing at unknown tasks.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<CatalogFile> {
    let raw = load_from_path(&path)?;
    let catalog = CatalogFile::try_from(raw)?;
    Ok(catalog)
}

/// Parse and validate catalog TOML held in memory.
pub fn parse_and_validate(contents: &str) -> Result<CatalogFile> {
    let raw = parse_str(contents)?;
    CatalogFile::try_from(raw)
}

/// Default catalog path: `Sectiondag.toml` in the current working directory.
pub fn default_catalog_path() -> PathBuf {
    PathBuf::from("Sectiondag.toml")
}
