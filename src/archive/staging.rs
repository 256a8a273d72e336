use crate::error::{PipelineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Holder record written inside the staging directory.
pub const OWNER_FILE: &str = ".owner.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagingOwner {
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl StagingOwner {
    fn current() -> Self {
        Self {
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }

    fn read(dir: &Path) -> Option<Self> {
        let bytes = std::fs::read(dir.join(OWNER_FILE)).ok()?;
        serde_json::from_slice(&bytes).ok()
    }

    /// Whether the holding process still runs. Without `/proc` the holder is
    /// assumed alive.
    fn is_alive(&self) -> bool {
        if self.pid == std::process::id() {
            return true;
        }
        let proc_root = Path::new("/proc");
        if !proc_root.is_dir() {
            return true;
        }
        proc_root.join(self.pid.to_string()).exists()
    }
}

/// Exclusive hold on the loader's staging directory.
///
/// The directory is created atomically with `create_dir` and the holder's
/// pid is recorded in it. If it already exists and its holder is still
/// running, acquisition fails fast. A directory left by a holder that died
/// without dropping the lock is reclaimed. Dropping the lock removes the
/// directory and its contents.
#[derive(Debug)]
pub struct StagingLock {
    dir: PathBuf,
}

impl StagingLock {
    pub fn acquire(dir: &Path) -> Result<Self> {
        if let Some(parent) = dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match Self::create(dir) {
            Err(PipelineError::StagingBusy(_)) => match StagingOwner::read(dir) {
                Some(owner) if !owner.is_alive() => {
                    info!(
                        dir = %dir.display(),
                        pid = owner.pid,
                        acquired_at = %owner.acquired_at,
                        "Reclaiming staging directory from dead holder"
                    );
                    std::fs::remove_dir_all(dir)?;
                    Self::create(dir)
                }
                _ => Err(PipelineError::StagingBusy(dir.to_path_buf())),
            },
            other => other,
        }
    }

    fn create(dir: &Path) -> Result<Self> {
        match std::fs::create_dir(dir) {
            Ok(()) => {
                // owned from here on, so a failed write still cleans up
                let lock = Self {
                    dir: dir.to_path_buf(),
                };
                let owner = serde_json::to_vec(&StagingOwner::current())?;
                std::fs::write(dir.join(OWNER_FILE), owner)?;
                debug!(dir = %dir.display(), "Acquired staging directory");
                Ok(lock)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(PipelineError::StagingBusy(dir.to_path_buf()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Remove a staging directory regardless of its holder. Returns the
    /// recorded holder, if there was one.
    pub fn force_release(dir: &Path) -> Result<Option<StagingOwner>> {
        let owner = StagingOwner::read(dir);
        match std::fs::remove_dir_all(dir) {
            Ok(()) => {
                warn!(dir = %dir.display(), pid = ?owner.as_ref().map(|o| o.pid), "Staging directory force-released");
                Ok(owner)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Drop for StagingLock {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_dir_all(&self.dir) {
            if e.kind() != ErrorKind::NotFound {
                warn!(dir = %self.dir.display(), error = %e, "Failed to remove staging directory");
            }
        }
    }
}
