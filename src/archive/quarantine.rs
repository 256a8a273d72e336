use crate::archive::mover::move_versioned;
use crate::error::Result;
use crate::models::{QuarantineEntry, QuarantineOrigin};
use crate::utils::constants::REASON_SIDECAR_SUFFIX;
use chrono::Utc;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Holding area for inputs that failed validation.
///
/// Each quarantined file gets a `<name>.reason.json` sidecar carrying its
/// [`QuarantineEntry`], so reasons survive the run that produced them.
#[derive(Debug, Clone)]
pub struct Quarantine {
    dir: PathBuf,
}

impl Quarantine {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn quarantine(
        &self,
        src: &Path,
        reason: &str,
        origin: QuarantineOrigin,
    ) -> Result<QuarantineEntry> {
        let original_name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = move_versioned(src, &self.dir)?;

        let entry = QuarantineEntry {
            path: dest.clone(),
            original_name,
            reason: reason.to_string(),
            origin,
            quarantined_at: Utc::now(),
        };
        std::fs::write(sidecar_path(&dest), serde_json::to_vec_pretty(&entry)?)?;

        warn!(
            file = %entry.original_name,
            reason,
            origin = ?origin,
            "Quarantined file"
        );
        Ok(entry)
    }

    /// Entries recorded by sidecars, oldest first. Unreadable sidecars are skipped.
    pub fn list_entries(&self) -> Result<Vec<QuarantineEntry>> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }

        let mut entries = Vec::new();
        for item in std::fs::read_dir(&self.dir)? {
            let path = item?.path();
            let is_sidecar = path
                .file_name()
                .map(|n| n.to_string_lossy().ends_with(REASON_SIDECAR_SUFFIX))
                .unwrap_or(false);
            if !is_sidecar {
                continue;
            }

            match std::fs::read(&path)
                .map_err(crate::error::PipelineError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<QuarantineEntry>(&bytes)?))
            {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!(sidecar = %path.display(), error = %e, "Skipping sidecar"),
            }
        }

        entries.sort_by(|a, b| {
            a.quarantined_at
                .cmp(&b.quarantined_at)
                .then_with(|| a.path.cmp(&b.path))
        });
        Ok(entries)
    }
}

fn sidecar_path(quarantined: &Path) -> PathBuf {
    let mut name = quarantined.as_os_str().to_os_string();
    name.push(REASON_SIDECAR_SUFFIX);
    PathBuf::from(name)
}
