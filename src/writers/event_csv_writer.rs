use crate::error::{PipelineError, Result};
use crate::models::EventRecord;
use crate::utils::constants::{
    COL_ENERGY, COL_LATITUDE, COL_LONGITUDE, COL_TIMESTAMP, DEFAULT_BUFFER_SIZE,
};
use csv::WriterBuilder;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

/// A finalized output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrittenFile {
    pub path: PathBuf,
    pub rows: usize,
    pub chunks: usize,
}

/// Writes event records to a hidden temp file beside the destination and
/// renames it into place on `finish`. Dropping the writer unfinished removes
/// the temp file, so a partial output is never visible.
pub struct EventCsvWriter {
    writer: csv::Writer<NamedTempFile>,
    final_path: PathBuf,
    rows: usize,
    chunks: usize,
}

impl EventCsvWriter {
    pub fn create(final_path: &Path) -> Result<Self> {
        let dir = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;

        let temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let mut writer = WriterBuilder::new()
            .has_headers(false)
            .buffer_capacity(DEFAULT_BUFFER_SIZE)
            .from_writer(temp);
        writer.write_record([COL_TIMESTAMP, COL_LATITUDE, COL_LONGITUDE, COL_ENERGY])?;

        Ok(Self {
            writer,
            final_path: final_path.to_path_buf(),
            rows: 0,
            chunks: 0,
        })
    }

    /// Append one chunk of rows and flush it to the temp file.
    pub fn write_chunk(&mut self, records: &[EventRecord]) -> Result<()> {
        for record in records {
            self.writer.serialize(record)?;
        }
        self.writer.flush()?;
        self.rows += records.len();
        self.chunks += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    /// Sync and atomically rename the temp file to the destination.
    pub fn finish(self) -> Result<WrittenFile> {
        let mut temp = self
            .writer
            .into_inner()
            .map_err(|e| {
                PipelineError::Io(std::io::Error::new(e.error().kind(), e.error().to_string()))
            })?;
        temp.flush()?;
        temp.as_file().sync_all()?;
        temp.persist(&self.final_path)
            .map_err(|e| PipelineError::Io(e.error))?;

        debug!(
            path = %self.final_path.display(),
            rows = self.rows,
            chunks = self.chunks,
            "Published event file"
        );
        Ok(WrittenFile {
            path: self.final_path,
            rows: self.rows,
            chunks: self.chunks,
        })
    }
}

/// Write `records` to `final_path` in groups of `chunk_size` rows
/// (`None` = one group). The bytes written do not depend on the chunk size.
pub fn write_events(
    records: &[EventRecord],
    final_path: &Path,
    chunk_size: Option<usize>,
) -> Result<WrittenFile> {
    let mut writer = EventCsvWriter::create(final_path)?;
    match chunk_size.filter(|&n| n > 0) {
        Some(size) => {
            for chunk in records.chunks(size) {
                writer.write_chunk(chunk)?;
            }
        }
        None => writer.write_chunk(records)?,
    }
    writer.finish()
}
