use crate::archive::Quarantine;
use crate::error::{ErrorKind, PipelineError, Result};
use crate::models::{ArtifactStage, LocalArtifact, QuarantineEntry, QuarantineOrigin};
use crate::readers::glm_reader::open_granule;
use crate::utils::filename::event_file_name;
use crate::utils::progress::ProgressReporter;
use crate::writers::event_csv_writer::{EventCsvWriter, WrittenFile};
use rayon::prelude::*;
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// An input that produced no output and was left in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransformReport {
    pub attempted: usize,
    pub outputs: Vec<LocalArtifact>,
    pub failures: Vec<TransformFailure>,
    pub quarantined: Vec<QuarantineEntry>,
    /// Events dropped across all files for undecodable times.
    pub dropped_events: usize,
}

impl TransformReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn output_paths(&self) -> Vec<PathBuf> {
        self.outputs.iter().map(|a| a.path.clone()).collect()
    }

    pub fn summary(&self) -> String {
        format!("{} of {} files converted", self.outputs.len(), self.attempted)
    }
}

/// Converts granules into `.event.csv` files.
pub struct Transformer {
    output_dir: PathBuf,
    quarantine: Quarantine,
    chunk_size: Option<usize>,
    max_workers: usize,
}

impl Transformer {
    pub fn new(output_dir: impl Into<PathBuf>, quarantine: Quarantine) -> Self {
        Self {
            output_dir: output_dir.into(),
            quarantine,
            chunk_size: None,
            max_workers: num_cpus::get(),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: Option<usize>) -> Self {
        self.chunk_size = chunk_size.filter(|&n| n > 0);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers.max(1);
        self
    }

    /// Convert every input. Malformed inputs go to quarantine, other
    /// per-file failures leave the input where it is; neither stops the batch.
    pub fn transform(
        &self,
        inputs: &[PathBuf],
        progress: Option<&ProgressReporter>,
    ) -> Result<TransformReport> {
        std::fs::create_dir_all(&self.output_dir)?;
        if let Some(p) = progress {
            p.set_length(inputs.len() as u64);
            p.set_message(&format!("Converting {} files", inputs.len()));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        let results: Vec<(PathBuf, Result<(WrittenFile, usize)>)> = pool.install(|| {
            inputs
                .par_iter()
                .map(|input| {
                    let result = self.transform_file(input);
                    if let Some(p) = progress {
                        p.increment(1);
                    }
                    (input.clone(), result)
                })
                .collect()
        });

        let mut report = TransformReport {
            attempted: inputs.len(),
            ..Default::default()
        };
        for (input, result) in results {
            match result {
                Ok((written, dropped)) => {
                    report.dropped_events += dropped;
                    report.outputs.push(LocalArtifact::from_path(
                        written.path,
                        ArtifactStage::Transformed,
                    )?);
                }
                Err(err) if err.kind() == ErrorKind::MalformedInput => {
                    let reason = malformed_reason(&err);
                    match self
                        .quarantine
                        .quarantine(&input, &reason, QuarantineOrigin::Transform)
                    {
                        Ok(entry) => report.quarantined.push(entry),
                        Err(move_err) => report.failures.push(TransformFailure {
                            path: input,
                            reason: format!("{}; quarantine failed: {}", reason, move_err),
                        }),
                    }
                }
                Err(err) => {
                    warn!(input = %input.display(), error = %err, "No output produced");
                    report.failures.push(TransformFailure {
                        path: input,
                        reason: err.to_string(),
                    });
                }
            }
        }

        if let Some(p) = progress {
            p.finish_with_message(&report.summary());
        }
        info!(
            quarantined = report.quarantined.len(),
            failed = report.failures.len(),
            dropped_events = report.dropped_events,
            "{}",
            report.summary()
        );
        Ok(report)
    }

    /// Decode one granule and publish its tabular form. Records are decoded
    /// and written one chunk at a time. Returns the written file and the
    /// number of events dropped for bad times.
    pub fn transform_file(&self, input: &Path) -> Result<(WrittenFile, usize)> {
        let columns = open_granule(input)?;
        if columns.is_empty() {
            debug!(input = %input.display(), "Granule holds no events");
        }
        let output = self.output_dir.join(event_file_name(input));

        let mut writer = EventCsvWriter::create(&output)?;
        let dropped = columns.decode_chunks(self.chunk_size, |chunk| writer.write_chunk(chunk))?;
        drop(columns);
        let written = writer.finish()?;

        if dropped > 0 {
            warn!(
                input = %input.display(),
                dropped,
                "Dropped events with undecodable times"
            );
        }
        debug!(input = %input.display(), rows = written.rows, chunks = written.chunks, "Converted granule");
        Ok((written, dropped))
    }
}

fn malformed_reason(err: &PipelineError) -> String {
    match err {
        PipelineError::MalformedInput { reason, .. } => reason.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::constants::{
        ATTR_UNITS, VAR_EVENT_ENERGY, VAR_EVENT_LAT, VAR_EVENT_LON, VAR_EVENT_TIME_OFFSET,
    };
    use netcdf3::{DataSet, FileWriter, Version};
    use tempfile::TempDir;

    fn write_granule(path: &Path, offsets: &[f32]) {
        let dim = "number_of_events";
        let mut data_set = DataSet::new();
        data_set.add_fixed_dim(dim, offsets.len()).unwrap();
        for name in [VAR_EVENT_LAT, VAR_EVENT_LON, VAR_EVENT_ENERGY, VAR_EVENT_TIME_OFFSET] {
            data_set.add_var_f32(name, &[dim]).unwrap();
        }
        data_set
            .add_var_attr_string(VAR_EVENT_TIME_OFFSET, ATTR_UNITS, "seconds since 2023-02-17 21:00:00")
            .unwrap();

        let ones = vec![1.0f32; offsets.len()];
        let mut writer = FileWriter::open(path).unwrap();
        writer.set_def(&data_set, Version::Classic, 0).unwrap();
        writer.write_var_f32(VAR_EVENT_LAT, &ones).unwrap();
        writer.write_var_f32(VAR_EVENT_LON, &ones).unwrap();
        writer.write_var_f32(VAR_EVENT_ENERGY, &ones).unwrap();
        writer.write_var_f32(VAR_EVENT_TIME_OFFSET, offsets).unwrap();
        writer.close().unwrap();
    }

    #[test]
    fn test_granule_is_written_chunk_by_chunk() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("g.nc");
        write_granule(&input, &[0.0, 0.5, 1.0, 1.5, 2.0]);

        let transformer = Transformer::new(
            temp.path().join("transform"),
            Quarantine::new(temp.path().join("quarantine")),
        )
        .with_chunk_size(Some(2));

        let (written, dropped) = transformer.transform_file(&input).unwrap();
        assert_eq!(written.rows, 5);
        assert_eq!(written.chunks, 3);
        assert_eq!(dropped, 0);
        assert_eq!(written.path, temp.path().join("transform/g.event.csv"));
        let text = std::fs::read_to_string(&written.path).unwrap();
        assert_eq!(text.lines().count(), 6);
    }

    #[test]
    fn test_garbage_input_is_quarantined() {
        let temp = TempDir::new().unwrap();
        let input = temp.path().join("extract/broken.nc");
        std::fs::create_dir_all(input.parent().unwrap()).unwrap();
        std::fs::write(&input, b"definitely not netcdf").unwrap();

        let transformer = Transformer::new(
            temp.path().join("transform"),
            Quarantine::new(temp.path().join("quarantine")),
        )
        .with_max_workers(1);

        let report = transformer.transform(&[input.clone()], None).unwrap();
        assert!(report.outputs.is_empty());
        assert_eq!(report.quarantined.len(), 1);
        assert_eq!(report.quarantined[0].origin, QuarantineOrigin::Transform);
        assert!(!input.exists());
        assert_eq!(report.summary(), "0 of 1 files converted");
    }

    #[test]
    fn test_missing_input_is_a_failure_not_quarantine() {
        let temp = TempDir::new().unwrap();
        let transformer = Transformer::new(
            temp.path().join("transform"),
            Quarantine::new(temp.path().join("quarantine")),
        );

        let report = transformer
            .transform(&[temp.path().join("gone.nc")], None)
            .unwrap();
        assert!(report.quarantined.is_empty());
        assert_eq!(report.failures.len(), 1);
        assert!(!report.is_complete());
    }
}
