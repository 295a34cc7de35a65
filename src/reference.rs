// src/reference.rs

//! Shared reference material, loaded once per invocation and cached for the
//! life of the loader.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::config::model::CatalogFile;
use crate::errors::{Result, SectionDagError};
use crate::fs::{FileSystem, RealFileSystem};

/// Read-only `key -> text` bag handed to every execution unit of a run.
pub type ReferenceBag = Arc<BTreeMap<String, String>>;

#[derive(Debug)]
pub struct ReferenceLoader {
    fs: Arc<dyn FileSystem>,
    base_dir: PathBuf,
    /// Short key -> file name relative to `base_dir`.
    files: BTreeMap<String, String>,
    cache: Mutex<HashMap<String, String>>,
}

impl ReferenceLoader {
    pub fn new(base_dir: impl Into<PathBuf>, files: BTreeMap<String, String>) -> Self {
        Self::with_fs(Arc::new(RealFileSystem), base_dir, files)
    }

    pub fn with_fs(
        fs: Arc<dyn FileSystem>,
        base_dir: impl Into<PathBuf>,
        files: BTreeMap<String, String>,
    ) -> Self {
        Self {
            fs,
            base_dir: base_dir.into(),
            files,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Loader for the `[reference]` table, with `reference_dir` resolved
    /// against `root` (the catalog file's directory).
    pub fn from_catalog_file(cfg: &CatalogFile, root: &Path) -> Self {
        Self::new(root.join(&cfg.config.reference_dir), cfg.reference.clone())
    }

    /// A loader with no reference material at all.
    pub fn empty() -> Self {
        Self::new(".", BTreeMap::new())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|k| k.as_str())
    }

    /// Load the given keys. Any unknown key or unreadable file fails the
    /// whole call.
    pub fn load<I, S>(&self, keys: I) -> Result<ReferenceBag>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut bag = BTreeMap::new();
        for key in keys {
            let key = key.as_ref();
            let text = self.load_one(key)?;
            bag.insert(key.to_string(), text);
        }
        Ok(Arc::new(bag))
    }

    /// Load every configured reference.
    pub fn load_all(&self) -> Result<ReferenceBag> {
        let bag = self.load(self.files.keys())?;
        info!(count = bag.len(), dir = ?self.base_dir, "reference material loaded");
        Ok(bag)
    }

    fn load_one(&self, key: &str) -> Result<String> {
        if let Some(text) = self.cache_get(key)? {
            return Ok(text);
        }

        let Some(file) = self.files.get(key) else {
            let known: Vec<&str> = self.keys().collect();
            return Err(SectionDagError::MissingReference {
                key: key.to_string(),
                reason: format!("unknown reference key (known: {known:?})"),
            });
        };

        let path = self.base_dir.join(file);
        let text = self
            .fs
            .read_to_string(&path)
            .map_err(|e| SectionDagError::MissingReference {
                key: key.to_string(),
                reason: format!("{e:#}"),
            })?;

        debug!(key = %key, path = ?path, bytes = text.len(), "reference loaded from disk");

        let mut cache = self
            .cache
            .lock()
            .map_err(|_| SectionDagError::Other(anyhow::anyhow!("reference cache poisoned")))?;
        cache.insert(key.to_string(), text.clone());
        Ok(text)
    }

    fn cache_get(&self, key: &str) -> Result<Option<String>> {
        let cache = self
            .cache
            .lock()
            .map_err(|_| SectionDagError::Other(anyhow::anyhow!("reference cache poisoned")))?;
        Ok(cache.get(key).cloned())
    }
}
