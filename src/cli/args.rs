use crate::utils::constants::COMPRESSION_SNAPPY;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "glm-etl")]
#[command(about = "Extract, transform and load GOES GLM lightning events into SQLite")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,

    #[arg(short, long, global = true, help = "TOML settings file")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: Overrides,
}

/// Flags that win over file and environment settings.
#[derive(Args, Debug, Default, Clone)]
pub struct Overrides {
    #[arg(long, global = true, help = "Root of the extract/transform/load directories")]
    pub data_dir: Option<PathBuf>,

    #[arg(long, global = true, help = "SQLite database path [default: <data-dir>/load/glmFlash.db]")]
    pub database: Option<PathBuf>,

    #[arg(long, global = true)]
    pub bucket: Option<String>,

    #[arg(long, global = true)]
    pub product: Option<String>,

    #[arg(long, global = true)]
    pub max_workers: Option<usize>,

    #[arg(long, global = true, help = "Rows per transform chunk (0 = whole file)")]
    pub chunk_size: Option<usize>,

    #[arg(long, global = true, help = "Hide progress bars")]
    pub quiet: bool,
}

/// Hour to process; any part left out comes from `now - lag`.
#[derive(Args, Debug, Default, Clone, Copy)]
pub struct WindowArgs {
    #[arg(long, env = "GOES_YEAR")]
    pub year: Option<i32>,

    #[arg(long, env = "GOES_DOY", help = "Day of year (1-366)")]
    pub doy: Option<u32>,

    #[arg(long, env = "GOES_HOUR", help = "Hour of day (0-23)")]
    pub hour: Option<u32>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Extract, transform and load one hour
    Run {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Run every hour of a date range, one after another
    Backfill {
        #[arg(long, help = "First day (YYYY-MM-DD)")]
        start: String,

        #[arg(long, help = "Last day, inclusive (YYYY-MM-DD)")]
        end: String,

        #[arg(long, value_delimiter = ',', help = "Hours of day to include, e.g. 0,6,12,18")]
        hours: Option<Vec<u32>>,
    },

    /// Download one hour of granules into the extract directory
    Extract {
        #[command(flatten)]
        window: WindowArgs,
    },

    /// Convert granules to event CSV [default: everything in the extract directory]
    Transform {
        files: Vec<PathBuf>,
    },

    /// Commit event CSV files into the database [default: everything in the transform directory]
    Load {
        files: Vec<PathBuf>,
    },

    /// List quarantined files and why they were set aside
    Quarantine,

    /// Remove a staging directory left behind by a load that was killed
    Unlock,

    /// Write the flash view to a Parquet file
    Export {
        #[arg(short, long, help = "Output Parquet file path")]
        output: PathBuf,

        #[arg(long, default_value = COMPRESSION_SNAPPY)]
        compression: String,
    },

    /// Show database row counts and time range
    Info,
}
