use crate::archive::{Quarantine, StagingLock};
use crate::cli::args::{Cli, Commands, Overrides, WindowArgs};
use crate::config::{hourly_windows, PipelineConfig, Settings, TimeWindow};
use crate::error::{PipelineError, Result};
use crate::models::QuarantineOrigin;
use crate::pipeline::Pipeline;
use crate::processors::ExtractOutcome;
use crate::store::FlashStore;
use crate::utils::logging::init_logging;
use crate::writers::ParquetWriter;
use chrono::{NaiveDate, Utc};
use tracing::{debug, warn};

pub async fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    let settings = Settings::load(cli.config.as_deref())?;
    let config = build_config(settings, &cli.overrides)?;
    debug!(data_dir = %config.layout.root().display(), database = %config.database.display(), "Resolved configuration");

    match cli.command {
        Commands::Run { window } => {
            let window = resolve_window(&window, config.lag_hours)?;
            println!("Processing window {} from s3://{}", window, config.catalog.bucket);

            let pipeline = Pipeline::connect(config).await;
            let report = pipeline.run_window(&window).await?;
            println!("\n{}", report.summary());
        }

        Commands::Backfill { start, end, hours } => {
            let start = parse_date(&start)?;
            let end = parse_date(&end)?;
            let windows = hourly_windows(start, end, hours.as_deref(), Utc::now())?;
            println!(
                "Backfilling {} hour windows from {} to {}",
                windows.len(),
                start,
                end
            );

            let pipeline = Pipeline::connect(config).await;
            let summary = pipeline.backfill(&windows).await;

            println!("\n{}", summary.summary());
            for (window, reason) in &summary.failed {
                println!("  {} failed: {}", window, reason);
            }
        }

        Commands::Extract { window } => {
            let window = resolve_window(&window, config.lag_hours)?;
            let retry = config.extract_retry;
            let pipeline = Pipeline::connect(config).await;

            let outcome = retry
                .run_until_complete("extract", |_| pipeline.extract(&window), ExtractOutcome::is_complete)
                .await?;
            match outcome {
                ExtractOutcome::NothingNew { prefix } => println!("Nothing new under {}", prefix),
                ExtractOutcome::Downloaded(report) => {
                    println!("{}", report.summary());
                    for failure in &report.failures {
                        println!("  {}: {}", failure.key, failure.reason);
                    }
                    for key in &report.skipped {
                        println!("  {}: empty, skipped", key);
                    }
                }
            }
        }

        Commands::Transform { files } => {
            let pipeline = Pipeline::connect(config).await;
            let files = if files.is_empty() {
                pipeline.pending_extracted()?
            } else {
                files
            };
            if files.is_empty() {
                println!("No granules waiting in {}", pipeline.config().layout.extract_dir().display());
                return Ok(());
            }

            let report = pipeline.transform(files).await?;
            println!("{}", report.summary());
            for failure in &report.failures {
                println!("  {}: {}", failure.path.display(), failure.reason);
            }
            for entry in &report.quarantined {
                println!("  quarantined {}: {}", entry.original_name, entry.reason);
            }
        }

        Commands::Load { files } => {
            let retry = config.load_retry;
            let pipeline = Pipeline::connect(config).await;
            let files = if files.is_empty() {
                pipeline.pending_transformed()?
            } else {
                files
            };
            if files.is_empty() {
                println!("No event files waiting in {}", pipeline.config().layout.transform_dir().display());
                return Ok(());
            }

            let report = retry.run("load", |_| pipeline.load(files.clone())).await?;
            println!("{}", report.summary());
            for entry in &report.quarantined {
                println!("  quarantined {}: {}", entry.original_name, entry.reason);
            }
        }

        Commands::Quarantine => {
            let quarantine = Quarantine::new(config.layout.quarantine_dir());
            let entries = quarantine.list_entries()?;
            if entries.is_empty() {
                println!("Quarantine is empty");
                return Ok(());
            }

            println!("{} quarantined files in {}", entries.len(), quarantine.dir().display());
            for entry in entries {
                let origin = match entry.origin {
                    QuarantineOrigin::Transform => "transform",
                    QuarantineOrigin::Load => "load",
                };
                println!(
                    "  {} [{}] {}: {}",
                    entry.quarantined_at.format("%Y-%m-%d %H:%M:%S"),
                    origin,
                    entry.original_name,
                    entry.reason
                );
            }
        }

        Commands::Unlock => {
            let stage = config.layout.stage_dir();
            if !stage.exists() {
                println!("{} is not locked", stage.display());
                return Ok(());
            }
            match StagingLock::force_release(&stage)? {
                Some(owner) => println!(
                    "Removed {} (held by pid {} since {})",
                    stage.display(),
                    owner.pid,
                    owner.acquired_at.format("%Y-%m-%d %H:%M:%S")
                ),
                None => println!("Removed {} (no holder recorded)", stage.display()),
            }
        }

        Commands::Export {
            output,
            compression,
        } => {
            if !config.database.exists() {
                return Err(PipelineError::Config(format!(
                    "No database at {}",
                    config.database.display()
                )));
            }
            let writer = ParquetWriter::new().with_compression(&compression)?;
            let store = FlashStore::open(&config.database)?;
            store.create_view()?;

            if let Some(parent) = output.parent() {
                std::fs::create_dir_all(parent)?;
            }
            println!("Exporting flash view to {}", output.display());
            let info = writer.export_view(&store, &output)?;
            println!("\n{}", info.summary());
        }

        Commands::Info => {
            if !config.database.exists() {
                println!("No database at {}", config.database.display());
                return Ok(());
            }
            let store = FlashStore::open(&config.database)?;
            println!("Database: {}", config.database.display());
            println!("{}", store.stats()?.summary());
        }
    }

    Ok(())
}

/// Apply command-line overrides on top of file and environment settings.
fn build_config(mut settings: Settings, overrides: &Overrides) -> Result<PipelineConfig> {
    if let Some(data_dir) = &overrides.data_dir {
        settings.data_dir = data_dir.clone();
    }
    if let Some(database) = &overrides.database {
        settings.database = Some(database.clone());
    }
    if let Some(bucket) = &overrides.bucket {
        settings.bucket = bucket.clone();
    }
    if let Some(product) = &overrides.product {
        settings.product = product.clone();
    }
    if let Some(max_workers) = overrides.max_workers {
        settings.max_workers = max_workers;
    }
    if let Some(chunk_size) = overrides.chunk_size {
        settings.chunk_size = chunk_size;
    }

    Ok(PipelineConfig::from_settings(&settings)?.with_progress(!overrides.quiet))
}

/// Fill any unspecified part of the window from the lagged current hour.
fn resolve_window(args: &WindowArgs, lag_hours: i64) -> Result<TimeWindow> {
    let fallback = TimeWindow::lagged(Utc::now(), lag_hours);
    if args.year.is_some() != args.doy.is_some() {
        warn!("Year and day of year should be given together; filling the other from the current window");
    }
    TimeWindow::new(
        args.year.unwrap_or(fallback.year),
        args.doy.unwrap_or(fallback.day_of_year),
        args.hour.unwrap_or(fallback.hour),
    )
}

fn parse_date(raw: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| PipelineError::Config(format!("Invalid date '{}' (expected YYYY-MM-DD): {}", raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date() {
        assert_eq!(
            parse_date("2023-02-17").unwrap(),
            NaiveDate::from_ymd_opt(2023, 2, 17).unwrap()
        );
        assert!(matches!(parse_date("17/02/2023"), Err(PipelineError::Config(_))));
    }

    #[test]
    fn test_resolve_explicit_window() {
        let args = WindowArgs {
            year: Some(2023),
            doy: Some(48),
            hour: Some(21),
        };
        assert_eq!(resolve_window(&args, 3).unwrap(), TimeWindow::new(2023, 48, 21).unwrap());

        let bad = WindowArgs {
            hour: Some(24),
            ..args
        };
        assert!(resolve_window(&bad, 3).is_err());
    }
}
