pub mod window;

pub use window::{hourly_windows, SourceCatalog, TimeWindow};

use crate::error::{PipelineError, Result};
use crate::pipeline::retry::RetryPolicy;
use crate::utils::constants::{
    DEFAULT_BUCKET, DEFAULT_CHUNK_SIZE, DEFAULT_LAG_HOURS, DEFAULT_LOAD_BATCH_SIZE,
    DEFAULT_PRODUCT, DEFAULT_REGION,
};
use crate::utils::layout::DataLayout;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use validator::Validate;

const ENV_PREFIX: &str = "GLM_ETL";
const LEGACY_BUCKET_VAR: &str = "S3_BUCKET";
const LEGACY_PRODUCT_VAR: &str = "PRODUCT";

/// Attempt budget and fixed delay for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct StageRetry {
    #[validate(range(min = 1, max = 100))]
    pub max_attempts: usize,
    pub delay_secs: u64,
}

impl StageRetry {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.max_attempts, self.delay_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct RetrySettings {
    #[validate(nested)]
    pub extract: StageRetry,
    #[validate(nested)]
    pub transform: StageRetry,
    #[validate(nested)]
    pub load: StageRetry,
}

/// Raw settings as read from defaults, an optional TOML file and the environment.
///
/// Environment keys use the `GLM_ETL_` prefix with `__` between nested keys,
/// e.g. `GLM_ETL_RETRY__LOAD__MAX_ATTEMPTS=5`. The legacy `S3_BUCKET` and
/// `PRODUCT` variables seed the bucket and product defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Settings {
    #[validate(length(min = 1, message = "bucket name is required"))]
    pub bucket: String,
    #[validate(length(min = 1, message = "product identifier is required"))]
    pub product: String,
    #[validate(length(min = 1))]
    pub region: String,
    pub endpoint: Option<String>,
    pub data_dir: PathBuf,
    pub database: Option<PathBuf>,
    /// Rows per transform chunk; 0 writes each file in one group.
    pub chunk_size: usize,
    #[validate(range(min = 1))]
    pub load_batch_size: usize,
    #[validate(range(min = 1, max = 512))]
    pub max_workers: usize,
    #[validate(range(min = 0, max = 720))]
    pub lag_hours: i64,
    #[validate(nested)]
    pub retry: RetrySettings,
}

impl Settings {
    pub fn load(config_file: Option<&Path>) -> Result<Self> {
        let bucket = std::env::var(LEGACY_BUCKET_VAR).unwrap_or_else(|_| DEFAULT_BUCKET.to_string());
        let product =
            std::env::var(LEGACY_PRODUCT_VAR).unwrap_or_else(|_| DEFAULT_PRODUCT.to_string());

        let mut builder = config::Config::builder()
            .set_default("bucket", bucket)
            .and_then(|b| b.set_default("product", product))
            .and_then(|b| b.set_default("region", DEFAULT_REGION))
            .and_then(|b| b.set_default("data_dir", "data"))
            .and_then(|b| b.set_default("chunk_size", DEFAULT_CHUNK_SIZE as i64))
            .and_then(|b| b.set_default("load_batch_size", DEFAULT_LOAD_BATCH_SIZE as i64))
            .and_then(|b| b.set_default("max_workers", num_cpus::get() as i64))
            .and_then(|b| b.set_default("lag_hours", DEFAULT_LAG_HOURS))
            .and_then(|b| b.set_default("retry.extract.max_attempts", 3i64))
            .and_then(|b| b.set_default("retry.extract.delay_secs", 3i64))
            .and_then(|b| b.set_default("retry.transform.max_attempts", 3i64))
            .and_then(|b| b.set_default("retry.transform.delay_secs", 30i64))
            .and_then(|b| b.set_default("retry.load.max_attempts", 3i64))
            .and_then(|b| b.set_default("retry.load.delay_secs", 3i64))
            .map_err(config_error)?;

        if let Some(path) = config_file {
            if !path.exists() {
                return Err(PipelineError::Config(format!(
                    "Config file not found: {}",
                    path.display()
                )));
            }
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let settings: Settings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(config_error)?;

        settings.validate()?;
        debug!(bucket = %settings.bucket, product = %settings.product, "Settings loaded");
        Ok(settings)
    }

    pub fn chunk_size(&self) -> Option<usize> {
        (self.chunk_size > 0).then_some(self.chunk_size)
    }
}

fn config_error(err: config::ConfigError) -> PipelineError {
    PipelineError::Config(err.to_string())
}

/// Everything one pipeline run needs, resolved once and passed to each stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub catalog: SourceCatalog,
    pub layout: DataLayout,
    pub database: PathBuf,
    pub region: String,
    pub endpoint: Option<String>,
    pub chunk_size: Option<usize>,
    pub load_batch_size: usize,
    pub max_workers: usize,
    pub lag_hours: i64,
    pub extract_retry: RetryPolicy,
    pub transform_retry: RetryPolicy,
    pub load_retry: RetryPolicy,
    pub show_progress: bool,
}

impl PipelineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        let layout = DataLayout::new(data_dir);
        Self {
            catalog: SourceCatalog {
                bucket: DEFAULT_BUCKET.to_string(),
                product: DEFAULT_PRODUCT.to_string(),
            },
            database: layout.default_database(),
            layout,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            chunk_size: Some(DEFAULT_CHUNK_SIZE),
            load_batch_size: DEFAULT_LOAD_BATCH_SIZE,
            max_workers: num_cpus::get(),
            lag_hours: DEFAULT_LAG_HOURS,
            extract_retry: RetryPolicy::from_secs(3, 3),
            transform_retry: RetryPolicy::from_secs(3, 30),
            load_retry: RetryPolicy::from_secs(3, 3),
            show_progress: false,
        }
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let layout = DataLayout::new(&settings.data_dir);
        Ok(Self {
            catalog: SourceCatalog::new(&settings.bucket, &settings.product)?,
            database: settings
                .database
                .clone()
                .unwrap_or_else(|| layout.default_database()),
            layout,
            region: settings.region.clone(),
            endpoint: settings.endpoint.clone(),
            chunk_size: settings.chunk_size(),
            load_batch_size: settings.load_batch_size,
            max_workers: settings.max_workers,
            lag_hours: settings.lag_hours,
            extract_retry: settings.retry.extract.policy(),
            transform_retry: settings.retry.transform.policy(),
            load_retry: settings.retry.load.policy(),
            show_progress: false,
        })
    }

    pub fn with_catalog(mut self, catalog: SourceCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size.filter(|&n| n > 0);
        self
    }

    pub fn with_load_batch_size(mut self, load_batch_size: usize) -> Self {
        self.load_batch_size = load_batch_size.max(1);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    pub fn with_retries(mut self, policy: RetryPolicy) -> Self {
        self.extract_retry = policy;
        self.transform_retry = policy;
        self.load_retry = policy;
        self
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }
}
