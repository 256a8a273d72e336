use crate::archive::{move_versioned, Quarantine, StagingLock};
use crate::error::{ErrorKind, PipelineError, Result};
use crate::models::{ArtifactStage, LocalArtifact, QuarantineEntry, QuarantineOrigin};
use crate::readers::event_csv_reader::{CleanedEvents, EventCsvReader};
use crate::store::FlashStore;
use crate::utils::checksum::file_sha256;
use crate::utils::constants::DEFAULT_LOAD_BATCH_SIZE;
use crate::utils::filename::versioned_destination;
use crate::utils::layout::DataLayout;
use crate::utils::progress::ProgressReporter;
use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub attempted: usize,
    /// Committed files, as archived under `load/loaded`.
    pub committed: Vec<LocalArtifact>,
    pub quarantined: Vec<QuarantineEntry>,
    /// Inputs whose content was committed by an earlier run; archived without inserting.
    pub already_loaded: Vec<PathBuf>,
    /// Inputs already gone when the call started.
    pub vanished: Vec<PathBuf>,
    pub rows_inserted: usize,
    pub rows_dropped: usize,
}

impl LoadReport {
    pub fn summary(&self) -> String {
        format!(
            "{} of {} files committed ({} rows); {} quarantined, {} already loaded, {} vanished, {} rows dropped",
            self.committed.len(),
            self.attempted,
            self.rows_inserted,
            self.quarantined.len(),
            self.already_loaded.len(),
            self.vanished.len(),
            self.rows_dropped
        )
    }
}

/// A file that passed validation, with its cleaned rows.
struct ValidatedFile {
    source: PathBuf,
    file_name: String,
    content_sha256: String,
    events: CleanedEvents,
}

/// Commits transformed files into the flash store.
///
/// Only one loader may run per data directory: the staging directory is the
/// lock. Staging or commit failures roll back every file of the call.
pub struct Loader {
    layout: DataLayout,
    database: PathBuf,
    batch_size: usize,
    max_workers: usize,
}

impl Loader {
    pub fn new(layout: DataLayout, database: impl Into<PathBuf>) -> Self {
        Self {
            layout,
            database: database.into(),
            batch_size: DEFAULT_LOAD_BATCH_SIZE,
            max_workers: num_cpus::get(),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn load(&self, inputs: &[PathBuf], progress: Option<&ProgressReporter>) -> Result<LoadReport> {
        self.layout.ensure()?;
        let lock = StagingLock::acquire(&self.layout.stage_dir())?;
        let mut store = FlashStore::open(&self.database)?;
        let quarantine = Quarantine::new(self.layout.quarantine_dir());

        let mut report = LoadReport {
            attempted: inputs.len(),
            ..Default::default()
        };

        // an earlier attempt that got past its commit has already moved these
        let (present, vanished): (Vec<PathBuf>, Vec<PathBuf>) =
            inputs.iter().cloned().partition(|p| p.exists());
        for path in &vanished {
            warn!(file = %path.display(), "Input no longer present, treating as handled");
        }
        report.vanished = vanished;

        if present.is_empty() {
            store.create_view()?;
            return Ok(report);
        }

        if let Some(p) = progress {
            p.set_message(&format!("Validating {} files", present.len()));
        }
        let mut validated = self.validate_all(&present)?;

        // resource problems abort before any file moves
        if let Some(index) = validated.iter().position(|(_, r)| {
            r.as_ref()
                .is_err_and(|e| e.kind() != ErrorKind::MalformedInput)
        }) {
            let (path, result) = validated.swap_remove(index);
            if let Err(err) = result {
                warn!(file = %path.display(), error = %err, "Cannot validate input");
                return Err(err);
            }
        }

        // Nothing is moved until the store has the new rows, so a failed
        // attempt leaves every input where the retry will look for it.
        let mut seen = HashSet::new();
        let mut to_commit = Vec::new();
        let mut to_archive = Vec::new();
        let mut to_quarantine = Vec::new();
        for (path, result) in validated {
            match result {
                Ok(file) => {
                    if store.is_loaded(&file.content_sha256)? || !seen.insert(file.content_sha256.clone()) {
                        info!(file = %file.file_name, "Already loaded, archiving");
                        to_archive.push(file.source);
                    } else {
                        report.rows_dropped += file.events.dropped;
                        to_commit.push(file);
                    }
                }
                Err(err) => {
                    let reason = match &err {
                        PipelineError::MalformedInput { reason, .. } => reason.clone(),
                        other => other.to_string(),
                    };
                    to_quarantine.push((path, reason));
                }
            }
        }

        let mut maintenance = Ok(());
        if !to_commit.is_empty() {
            if let Some(p) = progress {
                p.set_message(&format!("Committing {} files", to_commit.len()));
            }
            let staged = stage_files(&lock, &to_commit)?;
            let committed = commit_staged(&staged, &self.layout.load_dir())?;

            for (file, committed_path) in to_commit.iter().zip(&committed) {
                if let Err(e) = store.append_file(
                    &file.file_name,
                    &file.content_sha256,
                    &file.events.records,
                    self.batch_size,
                ) {
                    remove_files(&committed);
                    return Err(e);
                }
                report.rows_inserted += file.events.records.len();
                debug!(file = %committed_path.display(), rows = file.events.records.len(), "Committed file");
            }
            maintenance = store.maintain();

            let loaded_dir = self.layout.loaded_dir();
            for (file, committed_path) in to_commit.iter().zip(&committed) {
                let archived = move_versioned(committed_path, &loaded_dir)?;
                report
                    .committed
                    .push(LocalArtifact::from_path(archived, ArtifactStage::Archived)?);
                if let Err(e) = std::fs::remove_file(&file.source) {
                    warn!(source = %file.source.display(), error = %e, "Could not remove loaded source");
                }
            }
        } else {
            store.create_view()?;
        }

        let loaded_dir = self.layout.loaded_dir();
        for source in to_archive {
            if source.parent() != Some(loaded_dir.as_path()) {
                move_versioned(&source, &loaded_dir)?;
            }
            report.already_loaded.push(source);
        }
        for (path, reason) in to_quarantine {
            report
                .quarantined
                .push(quarantine.quarantine(&path, &reason, QuarantineOrigin::Load)?);
        }

        drop(lock);
        maintenance?;
        if let Some(p) = progress {
            p.finish_with_message(&report.summary());
        }
        info!("{}", report.summary());
        Ok(report)
    }

    fn validate_all(&self, inputs: &[PathBuf]) -> Result<Vec<(PathBuf, Result<ValidatedFile>)>> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let reader = EventCsvReader::new();
        Ok(pool.install(|| {
            inputs
                .par_iter()
                .map(|path| (path.clone(), validate_file(&reader, path)))
                .collect()
        }))
    }
}

fn validate_file(reader: &EventCsvReader, path: &Path) -> Result<ValidatedFile> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| PipelineError::malformed(path, "not a file"))?;
    let events = reader.read(path)?;
    if events.records.is_empty() {
        return Err(PipelineError::malformed(
            path,
            format!("no valid rows after cleaning ({} dropped)", events.dropped),
        ));
    }

    Ok(ValidatedFile {
        source: path.to_path_buf(),
        file_name,
        content_sha256: file_sha256(path)?,
        events,
    })
}

/// Copy every validated file into the staging directory.
fn stage_files(lock: &StagingLock, files: &[ValidatedFile]) -> Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(files.len());
    for file in files {
        let dest = versioned_destination(lock.dir(), &file.file_name);
        std::fs::copy(&file.source, &dest).map_err(|e| {
            PipelineError::CommitAborted(format!("staging {} failed: {}", file.file_name, e))
        })?;
        staged.push(dest);
    }
    Ok(staged)
}

/// Rename staged files into `load_dir`. Any failure removes the files
/// already renamed; the staging directory goes with the lock.
fn commit_staged(staged: &[PathBuf], load_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut committed = Vec::with_capacity(staged.len());
    for path in staged {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let dest = versioned_destination(load_dir, &file_name);
        if let Err(e) = std::fs::rename(path, &dest) {
            remove_files(&committed);
            return Err(PipelineError::CommitAborted(format!(
                "commit of {} failed: {}",
                file_name, e
            )));
        }
        committed.push(dest);
    }
    Ok(committed)
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = std::fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "Rollback could not remove file");
        }
    }
}
