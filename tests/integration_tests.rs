mod common;

use common::*;
use glm_etl::archive::{Quarantine, StagingLock};
use glm_etl::config::{PipelineConfig, SourceCatalog, TimeWindow};
use glm_etl::models::QuarantineOrigin;
use glm_etl::pipeline::{Pipeline, RetryPolicy};
use glm_etl::processors::{ExtractOutcome, Extractor, Loader, Transformer};
use glm_etl::store::{FlashStore, InMemoryObjectStore};
use glm_etl::utils::DataLayout;
use glm_etl::PipelineError;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn window() -> TimeWindow {
    TimeWindow::new(2023, 48, 21).unwrap()
}

fn catalog() -> SourceCatalog {
    SourceCatalog::new(BUCKET, PRODUCT).unwrap()
}

fn transformer(layout: &DataLayout, chunk_size: Option<usize>) -> Transformer {
    Transformer::new(layout.transform_dir(), Quarantine::new(layout.quarantine_dir()))
        .with_chunk_size(chunk_size)
        .with_max_workers(2)
}

fn view_rows(layout: &DataLayout) -> Vec<glm_etl::store::FlashViewRow> {
    let store = FlashStore::open(&layout.default_database()).unwrap();
    let mut rows = Vec::new();
    store
        .scan_view(|row| {
            rows.push(row);
            Ok(())
        })
        .unwrap();
    rows
}

#[tokio::test]
async fn test_extract_skips_empty_objects() {
    let temp = TempDir::new().unwrap();
    let body = granule_bytes(&sample_events(3), &[]);
    let store = InMemoryObjectStore::new()
        .with_object(BUCKET, granule_key("a.nc"), body.clone())
        .with_object(BUCKET, granule_key("b.nc"), body)
        .with_object(BUCKET, granule_key("c.nc"), Vec::new());

    let extractor = Extractor::new(Arc::new(store), catalog(), temp.path().join("extract"));
    let outcome = extractor.extract(&window(), None).await.unwrap();

    let ExtractOutcome::Downloaded(report) = outcome else {
        panic!("expected downloads");
    };
    assert_eq!(report.listed, 3);
    assert_eq!(report.artifacts.len(), 2);
    assert!(report.failures.is_empty());
    assert_eq!(report.skipped, vec![granule_key("c.nc")]);
    assert!(report.is_complete());
    assert!(!temp.path().join("extract/c.nc").exists());
    assert!(!temp.path().join("extract/c.nc.part").exists());
}

#[tokio::test]
async fn test_extract_follows_every_listing_page() {
    let temp = TempDir::new().unwrap();
    let mut store = InMemoryObjectStore::new().with_page_size(2);
    for i in 0..5 {
        store = store.with_object(BUCKET, granule_key(&format!("g{}.nc", i)), vec![7u8; 16]);
    }

    let extractor = Extractor::new(Arc::new(store), catalog(), temp.path().join("extract"));
    let outcome = extractor.extract(&window(), None).await.unwrap();

    assert!(outcome.is_complete());
    let names: Vec<String> = outcome.artifacts().iter().map(|a| a.file_name()).collect();
    assert_eq!(names, vec!["g0.nc", "g1.nc", "g2.nc", "g3.nc", "g4.nc"]);
}

#[tokio::test]
async fn test_extract_listing_failure_is_remote() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new().with_listing_error("SlowDown");
    let extractor = Extractor::new(Arc::new(store), catalog(), temp.path().join("extract"));

    let err = extractor.extract(&window(), None).await.unwrap_err();
    assert!(matches!(err, PipelineError::Remote(_)));
    assert!(err.is_retryable());
}

#[test]
fn test_missing_energy_goes_to_quarantine() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    layout.ensure().unwrap();
    let input = layout.extract_dir().join("no_energy.nc");
    write_granule(&input, &sample_events(4), &["event_energy"]);

    let report = transformer(&layout, None).transform(&[input.clone()], None).unwrap();

    assert!(report.outputs.is_empty());
    assert!(!layout.transform_dir().join("no_energy.event.csv").exists());
    assert!(!input.exists());

    let entries = Quarantine::new(layout.quarantine_dir()).list_entries().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].original_name, "no_energy.nc");
    assert_eq!(entries[0].origin, QuarantineOrigin::Transform);
    assert!(entries[0].reason.contains("event_energy"));
}

#[test]
fn test_chunked_output_matches_single_write() {
    let temp = TempDir::new().unwrap();
    let whole = DataLayout::new(temp.path().join("whole"));
    let chunked = DataLayout::new(temp.path().join("chunked"));
    for layout in [&whole, &chunked] {
        layout.ensure().unwrap();
        write_granule(&layout.extract_dir().join("g.nc"), &sample_events(11), &[]);
    }

    let a = transformer(&whole, None)
        .transform(&[whole.extract_dir().join("g.nc")], None)
        .unwrap();
    let b = transformer(&chunked, Some(3))
        .transform(&[chunked.extract_dir().join("g.nc")], None)
        .unwrap();
    assert!(a.is_complete() && b.is_complete());

    let whole_bytes = std::fs::read(whole.transform_dir().join("g.event.csv")).unwrap();
    let chunked_bytes = std::fs::read(chunked.transform_dir().join("g.event.csv")).unwrap();
    assert_eq!(whole_bytes, chunked_bytes);
    assert_eq!(String::from_utf8(whole_bytes).unwrap().lines().count(), 12);
}

#[test]
fn test_loader_keeps_only_valid_rows() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let dir = layout.transform_dir();
    let a = write_event_csv(
        &dir,
        "a.event.csv",
        "2023-02-17 21:00:00.000000,29.5,-95.25,1e-15\n2023-02-17 21:00:01.000000,29.75,-95.5,2e-15\n",
    );
    let b = write_event_csv(&dir, "b.event.csv", "2023-02-17 21:10:00.000000,30,-96,3e-15\n");
    let c = write_event_csv(
        &dir,
        "c.event.csv",
        "not-a-time,31,-97,4e-15\n2023-02-17 21:20:00.000000,31.5,-97.5,5e-15\n",
    );

    let loader = Loader::new(layout.clone(), layout.default_database()).with_max_workers(2);
    let report = loader.load(&[a, b, c], None).unwrap();

    assert_eq!(report.committed.len(), 3);
    assert_eq!(report.rows_inserted, 4);
    assert_eq!(report.rows_dropped, 1);
    assert!(report.quarantined.is_empty());

    let rows = view_rows(&layout);
    assert_eq!(rows.len(), 4);
    assert!(rows.iter().all(|r| r.year == Some(2023) && r.month == Some(2) && r.day == Some(17)));
    assert!(rows.iter().all(|r| r.timestamp != "not-a-time"));
    for name in ["a.event.csv", "b.event.csv", "c.event.csv"] {
        assert!(layout.loaded_dir().join(name).exists());
        assert!(!dir.join(name).exists());
    }
}

#[test]
fn test_reloading_archived_file_inserts_nothing() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let body = "2023-02-17 21:00:00.000000,29.5,-95.25,1e-15\n";
    let input = write_event_csv(&layout.transform_dir(), "a.event.csv", body);

    let loader = Loader::new(layout.clone(), layout.default_database());
    let first = loader.load(&[input], None).unwrap();
    assert_eq!(first.rows_inserted, 1);

    // the same bytes come back under a new name
    let again = write_event_csv(&layout.transform_dir(), "a_copy.event.csv", body);
    let second = loader.load(&[again.clone()], None).unwrap();
    assert_eq!(second.rows_inserted, 0);
    assert_eq!(second.already_loaded, vec![again.clone()]);
    assert!(!again.exists());
    assert!(layout.loaded_dir().join("a_copy.event.csv").exists());

    let stats = FlashStore::open(&layout.default_database()).unwrap().stats().unwrap();
    assert_eq!(stats.flash_rows, 1);
    assert_eq!(stats.loaded_files, 1);
}

#[test]
fn test_missing_column_contributes_no_rows() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let dir = layout.transform_dir();
    std::fs::create_dir_all(&dir).unwrap();
    let broken = dir.join("broken.event.csv");
    std::fs::write(&broken, "timestamp,latitude,longitude\n2023-02-17 21:00:00,1,2\n").unwrap();
    let good = write_event_csv(&dir, "good.event.csv", "2023-02-17 21:00:00,1,2,3\n");

    let loader = Loader::new(layout.clone(), layout.default_database());
    let report = loader.load(&[broken.clone(), good], None).unwrap();

    assert_eq!(report.rows_inserted, 1);
    assert_eq!(report.quarantined.len(), 1);
    assert_eq!(report.quarantined[0].origin, QuarantineOrigin::Load);
    assert!(report.quarantined[0].reason.contains("energy"));
    assert!(!broken.exists());
    assert_eq!(view_rows(&layout).len(), 1);
}

#[test]
fn test_unparseable_timestamp_file_is_quarantined_alone() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let dir = layout.transform_dir();
    let a = write_event_csv(
        &dir,
        "a.event.csv",
        "2023-02-17 21:00:00.000000,29.5,-95.25,1e-15\n2023-02-17 21:00:01.000000,29.75,-95.5,2e-15\n",
    );
    let b = write_event_csv(&dir, "b.event.csv", "2023-02-17 21:10:00.000000,30,-96,3e-15\n");
    let c = write_event_csv(
        &dir,
        "c.event.csv",
        "yesterday,31,-97,4e-15\n17/02/2023 21:20,31.5,-97.5,5e-15\n",
    );

    let loader = Loader::new(layout.clone(), layout.default_database()).with_max_workers(2);
    let report = loader.load(&[a, b, c.clone()], None).unwrap();

    assert_eq!(report.committed.len(), 2);
    assert_eq!(report.rows_inserted, 3);
    assert_eq!(report.quarantined.len(), 1);
    assert_eq!(report.quarantined[0].original_name, "c.event.csv");
    assert_eq!(report.quarantined[0].origin, QuarantineOrigin::Load);
    assert!(!c.exists());
    assert!(layout.quarantine_dir().join("c.event.csv").exists());

    let rows = view_rows(&layout);
    assert_eq!(rows.len(), 3);
    assert!(rows.iter().all(|r| r.latitude != Some(31.0) && r.latitude != Some(31.5)));
}

#[test]
fn test_second_loader_is_turned_away() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    let input = write_event_csv(&layout.transform_dir(), "a.event.csv", "2023-02-17 21:00:00,1,2,3\n");
    layout.ensure().unwrap();

    let held = StagingLock::acquire(&layout.stage_dir()).unwrap();
    let loader = Loader::new(layout.clone(), layout.default_database());
    let err = loader.load(&[input.clone()], None).unwrap_err();
    assert!(matches!(err, PipelineError::StagingBusy(_)));
    assert!(input.exists());

    drop(held);
    let report = loader.load(&[input], None).unwrap();
    assert_eq!(report.rows_inserted, 1);
}

#[test]
fn test_transformed_granule_loads_into_view() {
    let temp = TempDir::new().unwrap();
    let layout = DataLayout::new(temp.path());
    layout.ensure().unwrap();
    let events = sample_events(5);
    let input = layout.extract_dir().join("granule.nc");
    write_granule(&input, &events, &[]);

    let transformed = transformer(&layout, Some(2)).transform(&[input], None).unwrap();
    let loader = Loader::new(layout.clone(), layout.default_database());
    let report = loader.load(&transformed.output_paths(), None).unwrap();
    assert_eq!(report.rows_inserted, events.len());

    let rows = view_rows(&layout);
    let coords: Vec<(f64, f64)> = rows
        .iter()
        .map(|r| (r.latitude.unwrap(), r.longitude.unwrap()))
        .collect();
    let expected: Vec<(f64, f64)> = events.iter().map(|e| (e.0 as f64, e.1 as f64)).collect();
    assert_eq!(coords, expected);
    assert_eq!(rows[1].timestamp, "2023-02-17 21:00:00.500000");
}

fn pipeline(temp: &TempDir, store: InMemoryObjectStore) -> Pipeline {
    let config = PipelineConfig::new(temp.path())
        .with_max_workers(2)
        .with_chunk_size(Some(2))
        .with_retries(RetryPolicy::new(2, Duration::ZERO));
    Pipeline::new(config, Arc::new(store))
}

#[tokio::test]
async fn test_run_window_end_to_end() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new()
        .with_object(BUCKET, granule_key("a.nc"), granule_bytes(&sample_events(3), &[]))
        .with_object(BUCKET, granule_key("b.nc"), granule_bytes(&sample_events(2), &[]))
        .with_object(BUCKET, granule_key("broken.nc"), b"not a granule".to_vec());
    let pipeline = pipeline(&temp, store);

    let report = pipeline.run_window(&window()).await.unwrap();

    let transform = report.transform.as_ref().unwrap();
    assert_eq!(transform.quarantined.len(), 1);
    let load = report.load.as_ref().unwrap();
    assert_eq!(load.committed.len(), 2);
    assert_eq!(report.rows_inserted(), 5);

    let layout = &pipeline.config().layout;
    assert!(pipeline.pending_extracted().unwrap().is_empty());
    assert!(pipeline.pending_transformed().unwrap().is_empty());
    assert!(layout.loaded_dir().join("a.event.csv").exists());
    assert!(layout.quarantine_dir().join("broken.nc").exists());
}

#[tokio::test]
async fn test_run_window_keeps_partial_extract() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new()
        .with_object(BUCKET, granule_key("a.nc"), granule_bytes(&sample_events(3), &[]))
        .with_object(BUCKET, granule_key("b.nc"), granule_bytes(&sample_events(2), &[]))
        .with_failing_key(granule_key("b.nc"));
    let pipeline = pipeline(&temp, store);

    let report = pipeline.run_window(&window()).await.unwrap();

    assert!(!report.extract.is_complete());
    assert_eq!(report.rows_inserted(), 3);
}

#[tokio::test]
async fn test_backfill_counts_empty_windows() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new()
        .with_object(BUCKET, granule_key("a.nc"), granule_bytes(&sample_events(4), &[]));
    let pipeline = pipeline(&temp, store);

    let windows = vec![window(), TimeWindow::new(2023, 48, 22).unwrap()];
    let summary = pipeline.backfill(&windows).await;

    assert_eq!(summary.windows, 2);
    assert_eq!(summary.loaded, 1);
    assert_eq!(summary.empty, 1);
    assert!(summary.failed.is_empty());
    assert_eq!(summary.rows_inserted, 4);
}

#[tokio::test]
async fn test_backfill_fails_window_when_every_download_fails() {
    let temp = TempDir::new().unwrap();
    let store = InMemoryObjectStore::new()
        .with_object(BUCKET, granule_key("a.nc"), granule_bytes(&sample_events(4), &[]))
        .with_failing_key(granule_key("a.nc"));
    let pipeline = pipeline(&temp, store);

    let err = pipeline.run_window(&window()).await.unwrap_err();
    assert!(matches!(err, PipelineError::Remote(_)));

    let summary = pipeline.backfill(&[window()]).await;
    assert_eq!(summary.loaded, 0);
    assert_eq!(summary.empty, 0);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, window());
}
