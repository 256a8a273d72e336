use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// One object in the remote store, as returned by a listing call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteObjectRef {
    pub bucket: String,
    pub key: String,
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl RemoteObjectRef {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>, size: u64) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            size,
            last_modified: None,
        }
    }

    pub fn with_last_modified(mut self, last_modified: DateTime<Utc>) -> Self {
        self.last_modified = Some(last_modified);
        self
    }

    /// Last key segment, used as the local file name.
    pub fn file_name(&self) -> &str {
        self.key.rsplit('/').next().unwrap_or(&self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactStage {
    Extracted,
    Transformed,
    Archived,
}

impl std::fmt::Display for ArtifactStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ArtifactStage::Extracted => "extracted",
            ArtifactStage::Transformed => "transformed",
            ArtifactStage::Archived => "archived",
        };
        write!(f, "{}", name)
    }
}

/// A file on local storage tagged with the stage that currently owns it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalArtifact {
    pub path: PathBuf,
    pub stage: ArtifactStage,
    pub size: u64,
}

impl LocalArtifact {
    pub fn new(path: impl Into<PathBuf>, stage: ArtifactStage, size: u64) -> Self {
        Self {
            path: path.into(),
            stage,
            size,
        }
    }

    /// Build from an existing file, reading its size from disk.
    pub fn from_path(path: impl Into<PathBuf>, stage: ArtifactStage) -> std::io::Result<Self> {
        let path = path.into();
        let size = std::fs::metadata(&path)?.len();
        Ok(Self { path, stage, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Stage that sent a file to quarantine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuarantineOrigin {
    Transform,
    Load,
}

/// A file set aside after failing validation. Never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub path: PathBuf,
    pub original_name: String,
    pub reason: String,
    pub origin: QuarantineOrigin,
    pub quarantined_at: DateTime<Utc>,
}
