use crate::config::{SourceCatalog, TimeWindow};
use crate::error::Result;
use crate::models::{ArtifactStage, LocalArtifact, RemoteObjectRef};
use crate::store::object_store::{list_all, ObjectStore};
use crate::utils::constants::PARTIAL_DOWNLOAD_SUFFIX;
use crate::utils::progress::ProgressReporter;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An object that could not be fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtractFailure {
    pub key: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    pub prefix: String,
    pub listed: usize,
    /// Successful downloads, sorted by file name.
    pub artifacts: Vec<LocalArtifact>,
    pub failures: Vec<ExtractFailure>,
    /// Keys of zero-byte objects. Downloading them again cannot help.
    pub skipped: Vec<String>,
}

impl ExtractReport {
    /// True when no object failed transiently; skipped objects do not count.
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// Listing worked but not a single object could be fetched.
    pub fn all_failed(&self) -> bool {
        self.artifacts.is_empty() && !self.failures.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Downloaded {} of {} objects under {}",
            self.artifacts.len(),
            self.listed,
            self.prefix
        );
        if !self.skipped.is_empty() {
            summary.push_str(&format!(" ({} empty skipped)", self.skipped.len()));
        }
        summary
    }
}

/// What fetching one listed object produced.
enum Fetched {
    Saved(LocalArtifact),
    Empty,
}

/// Result of one extract call. An empty prefix is not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractOutcome {
    NothingNew { prefix: String },
    Downloaded(ExtractReport),
}

impl ExtractOutcome {
    pub fn artifacts(&self) -> &[LocalArtifact] {
        match self {
            ExtractOutcome::NothingNew { .. } => &[],
            ExtractOutcome::Downloaded(report) => &report.artifacts,
        }
    }

    pub fn paths(&self) -> Vec<PathBuf> {
        self.artifacts().iter().map(|a| a.path.clone()).collect()
    }

    pub fn is_complete(&self) -> bool {
        match self {
            ExtractOutcome::NothingNew { .. } => true,
            ExtractOutcome::Downloaded(report) => report.is_complete(),
        }
    }
}

/// Lists one hour of the bucket and downloads every object in it.
pub struct Extractor {
    store: Arc<dyn ObjectStore>,
    catalog: SourceCatalog,
    dest_dir: PathBuf,
    max_workers: usize,
}

impl Extractor {
    pub fn new(store: Arc<dyn ObjectStore>, catalog: SourceCatalog, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            catalog,
            dest_dir: dest_dir.into(),
            max_workers: num_cpus::get(),
        }
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub async fn extract(
        &self,
        window: &TimeWindow,
        progress: Option<&ProgressReporter>,
    ) -> Result<ExtractOutcome> {
        // identifiers are checked before any I/O
        let catalog = SourceCatalog::new(self.catalog.bucket.as_str(), self.catalog.product.as_str())?;
        let prefix = catalog.prefix(window);

        let objects: Vec<RemoteObjectRef> = list_all(self.store.as_ref(), &catalog.bucket, &prefix)
            .await?
            .into_iter()
            .filter(|o| !o.key.ends_with('/'))
            .collect();

        if objects.is_empty() {
            info!(prefix = %prefix, "Nothing new under prefix");
            return Ok(ExtractOutcome::NothingNew { prefix });
        }

        tokio::fs::create_dir_all(&self.dest_dir).await?;
        if let Some(p) = progress {
            p.set_length(objects.len() as u64);
            p.set_message(&format!("Downloading {} objects", objects.len()));
        }

        let listed = objects.len();
        let results: Vec<(RemoteObjectRef, Result<Fetched>)> = stream::iter(objects)
            .map(|object| async move {
                let result = self.fetch_one(&object).await;
                if let Some(p) = progress {
                    p.increment(1);
                }
                (object, result)
            })
            .buffer_unordered(self.max_workers)
            .collect()
            .await;

        let mut report = ExtractReport {
            prefix,
            listed,
            ..Default::default()
        };
        for (object, result) in results {
            match result {
                Ok(Fetched::Saved(artifact)) => report.artifacts.push(artifact),
                Ok(Fetched::Empty) => {
                    warn!(key = %object.key, "Skipping zero-byte object");
                    report.skipped.push(object.key);
                }
                Err(e) => {
                    warn!(key = %object.key, error = %e, "Download failed");
                    report.failures.push(ExtractFailure {
                        key: object.key,
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        report.failures.sort_by(|a, b| a.key.cmp(&b.key));
        report.skipped.sort();

        info!("{}", report.summary());
        Ok(ExtractOutcome::Downloaded(report))
    }

    /// Download one object via a `.part` file renamed on success.
    async fn fetch_one(&self, object: &RemoteObjectRef) -> Result<Fetched> {
        let dest = self.dest_dir.join(object.file_name());

        if object.size > 0 {
            if let Ok(meta) = tokio::fs::metadata(&dest).await {
                if meta.is_file() && meta.len() == object.size {
                    debug!(path = %dest.display(), "Reusing existing download");
                    return Ok(Fetched::Saved(LocalArtifact::new(
                        dest,
                        ArtifactStage::Extracted,
                        meta.len(),
                    )));
                }
            }
        }

        let partial = partial_path(&dest);
        let written = match self.store.download(object, &partial).await {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        if written == 0 {
            let _ = tokio::fs::remove_file(&partial).await;
            return Ok(Fetched::Empty);
        }

        tokio::fs::rename(&partial, &dest).await?;
        debug!(key = %object.key, bytes = written, "Downloaded object");
        Ok(Fetched::Saved(LocalArtifact::new(
            dest,
            ArtifactStage::Extracted,
            written,
        )))
    }
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_os_string();
    name.push(PARTIAL_DOWNLOAD_SUFFIX);
    PathBuf::from(name)
}
