use crate::error::Result;
use crate::utils::constants::{
    DATABASE_FILE, EXTRACT_DIR, LOADED_DIR, LOAD_DIR, QUARANTINE_DIR, STAGE_DIR, TRANSFORM_DIR,
};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Sibling directories shared between the pipeline stages.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn extract_dir(&self) -> PathBuf {
        self.root.join(EXTRACT_DIR)
    }

    pub fn transform_dir(&self) -> PathBuf {
        self.root.join(TRANSFORM_DIR)
    }

    pub fn load_dir(&self) -> PathBuf {
        self.root.join(LOAD_DIR)
    }

    /// Transient; its existence doubles as the loader lock, so `ensure` never creates it.
    pub fn stage_dir(&self) -> PathBuf {
        self.load_dir().join(STAGE_DIR)
    }

    pub fn loaded_dir(&self) -> PathBuf {
        self.load_dir().join(LOADED_DIR)
    }

    pub fn quarantine_dir(&self) -> PathBuf {
        self.root.join(QUARANTINE_DIR)
    }

    pub fn default_database(&self) -> PathBuf {
        self.load_dir().join(DATABASE_FILE)
    }

    /// Create every persistent directory that is missing.
    pub fn ensure(&self) -> Result<()> {
        for dir in [
            self.extract_dir(),
            self.transform_dir(),
            self.load_dir(),
            self.loaded_dir(),
            self.quarantine_dir(),
        ] {
            std::fs::create_dir_all(&dir)?;
        }
        debug!(root = %self.root.display(), "Data layout ready");
        Ok(())
    }
}
