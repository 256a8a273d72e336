use crate::archive::Quarantine;
use crate::config::{PipelineConfig, TimeWindow};
use crate::error::{PipelineError, Result};
use crate::pipeline::retry::run_blocking;
use crate::processors::{ExtractOutcome, Extractor, LoadReport, Loader, TransformReport, Transformer};
use crate::store::{ObjectStore, S3ObjectStore};
use crate::utils::constants::SOURCE_EXTENSION;
use crate::utils::filename::{event_file_name, is_event_file};
use crate::utils::progress::ProgressReporter;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// What one hour window produced.
#[derive(Debug, Clone)]
pub struct WindowReport {
    pub window: TimeWindow,
    pub extract: ExtractOutcome,
    pub transform: Option<TransformReport>,
    pub load: Option<LoadReport>,
}

impl WindowReport {
    pub fn rows_inserted(&self) -> usize {
        self.load.as_ref().map(|l| l.rows_inserted).unwrap_or(0)
    }

    pub fn summary(&self) -> String {
        let mut lines = vec![format!("Window {}", self.window)];
        match &self.extract {
            ExtractOutcome::NothingNew { prefix } => {
                lines.push(format!("  extract:   nothing new under {}", prefix))
            }
            ExtractOutcome::Downloaded(report) => {
                lines.push(format!("  extract:   {}", report.summary()))
            }
        }
        if let Some(t) = &self.transform {
            lines.push(format!("  transform: {}", t.summary()));
        }
        if let Some(l) = &self.load {
            lines.push(format!("  load:      {}", l.summary()));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillSummary {
    pub windows: usize,
    pub loaded: usize,
    pub empty: usize,
    pub failed: Vec<(TimeWindow, String)>,
    pub rows_inserted: usize,
}

impl BackfillSummary {
    pub fn summary(&self) -> String {
        format!(
            "Backfill: {} windows, {} loaded, {} empty, {} failed, {} rows inserted",
            self.windows,
            self.loaded,
            self.empty,
            self.failed.len(),
            self.rows_inserted
        )
    }
}

/// Runs the three stages against one configuration.
pub struct Pipeline {
    config: PipelineConfig,
    store: Arc<dyn ObjectStore>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self { config, store }
    }

    /// Pipeline reading the configured bucket anonymously.
    pub async fn connect(config: PipelineConfig) -> Self {
        let store = S3ObjectStore::anonymous(&config.region, config.endpoint.as_deref()).await;
        Self::new(config, Arc::new(store))
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    fn progress(&self, message: &str) -> ProgressReporter {
        ProgressReporter::new(0, message, !self.config.show_progress)
    }

    /// One extract attempt for `window`.
    pub async fn extract(&self, window: &TimeWindow) -> Result<ExtractOutcome> {
        self.config.layout.ensure()?;
        let extractor = Extractor::new(
            self.store.clone(),
            self.config.catalog.clone(),
            self.config.layout.extract_dir(),
        )
        .with_max_workers(self.config.max_workers);

        let progress = self.progress("Downloading");
        extractor.extract(window, Some(&progress)).await
    }

    /// One transform attempt over `inputs`, run on the blocking pool.
    pub async fn transform(&self, inputs: Vec<PathBuf>) -> Result<TransformReport> {
        self.config.layout.ensure()?;
        let transformer = Transformer::new(
            self.config.layout.transform_dir(),
            Quarantine::new(self.config.layout.quarantine_dir()),
        )
        .with_chunk_size(self.config.chunk_size)
        .with_max_workers(self.config.max_workers);
        let silent = !self.config.show_progress;

        run_blocking(move || {
            let progress = ProgressReporter::new(inputs.len() as u64, "Converting", silent);
            transformer.transform(&inputs, Some(&progress))
        })
        .await
    }

    /// One load attempt over `inputs`, run on the blocking pool.
    pub async fn load(&self, inputs: Vec<PathBuf>) -> Result<LoadReport> {
        let loader = Loader::new(self.config.layout.clone(), self.config.database.clone())
            .with_batch_size(self.config.load_batch_size)
            .with_max_workers(self.config.max_workers);
        let silent = !self.config.show_progress;

        run_blocking(move || {
            let progress = ProgressReporter::new_spinner("Loading", silent);
            loader.load(&inputs, Some(&progress))
        })
        .await
    }

    /// Extract, transform and load one hour, each stage under its retry policy.
    #[instrument(skip(self, window), fields(window = %window))]
    pub async fn run_window(&self, window: &TimeWindow) -> Result<WindowReport> {
        let extract = self
            .config
            .extract_retry
            .run_until_complete("extract", |_| self.extract(window), ExtractOutcome::is_complete)
            .await?;

        if let ExtractOutcome::Downloaded(extracted) = &extract {
            if extracted.all_failed() {
                let first = &extracted.failures[0];
                return Err(PipelineError::Remote(format!(
                    "all {} downloads under {} failed (first: {}: {})",
                    extracted.failures.len(),
                    extracted.prefix,
                    first.key,
                    first.reason
                )));
            }
        }

        let mut report = WindowReport {
            window: *window,
            extract,
            transform: None,
            load: None,
        };
        let extracted = report.extract.paths();
        if extracted.is_empty() {
            info!("No granules for this window");
            return Ok(report);
        }

        let transform_dir = self.config.layout.transform_dir();
        let transform = self
            .config
            .transform_retry
            .run_until_complete(
                "transform",
                |_| self.transform(untransformed(&extracted, &transform_dir)),
                TransformReport::is_complete,
            )
            .await?;
        report.transform = Some(transform);

        let load_inputs = produced_outputs(&extracted, &transform_dir);
        if load_inputs.is_empty() {
            warn!("Nothing converted for this window");
            return Ok(report);
        }

        let load = self
            .config
            .load_retry
            .run("load", |_| self.load(load_inputs.clone()))
            .await?;
        report.load = Some(load);

        self.prune_extracted(&extracted, &load_inputs, &transform_dir);
        info!("{}", report.summary());
        Ok(report)
    }

    /// Run windows one after another; a failed window does not stop the rest.
    pub async fn backfill(&self, windows: &[TimeWindow]) -> BackfillSummary {
        let mut summary = BackfillSummary {
            windows: windows.len(),
            ..Default::default()
        };

        for (index, window) in windows.iter().enumerate() {
            info!(window = %window, index = index + 1, total = windows.len(), "Backfilling");
            match self.run_window(window).await {
                Ok(report) if report.load.is_some() => {
                    summary.loaded += 1;
                    summary.rows_inserted += report.rows_inserted();
                }
                Ok(_) => summary.empty += 1,
                Err(e) => {
                    error!(window = %window, error = %e, "Window failed");
                    summary.failed.push((*window, e.to_string()));
                }
            }
        }

        info!("{}", summary.summary());
        summary
    }

    /// `.nc` files waiting in the extract directory.
    pub fn pending_extracted(&self) -> Result<Vec<PathBuf>> {
        list_files(&self.config.layout.extract_dir(), |p| {
            p.extension().map(|e| e == SOURCE_EXTENSION).unwrap_or(false)
        })
    }

    /// `.event.csv` files waiting in the transform directory.
    pub fn pending_transformed(&self) -> Result<Vec<PathBuf>> {
        list_files(&self.config.layout.transform_dir(), is_event_file)
    }

    /// Remove granules whose tabular output was consumed by a successful load.
    fn prune_extracted(&self, extracted: &[PathBuf], loaded: &[PathBuf], transform_dir: &Path) {
        for source in extracted {
            let output = transform_dir.join(event_file_name(source));
            if loaded.contains(&output) && source.exists() {
                if let Err(e) = std::fs::remove_file(source) {
                    warn!(source = %source.display(), error = %e, "Could not prune extracted granule");
                }
            }
        }
    }
}

/// Extracted granules still on disk that have no published output yet.
fn untransformed(extracted: &[PathBuf], transform_dir: &Path) -> Vec<PathBuf> {
    extracted
        .iter()
        .filter(|p| p.exists() && !transform_dir.join(event_file_name(p)).exists())
        .cloned()
        .collect()
}

fn produced_outputs(extracted: &[PathBuf], transform_dir: &Path) -> Vec<PathBuf> {
    extracted
        .iter()
        .map(|p| transform_dir.join(event_file_name(p)))
        .filter(|p| p.exists())
        .collect()
}

fn list_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() && keep(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
