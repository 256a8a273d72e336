use crate::error::{PipelineError, Result};
use crate::models::{parse_timestamp, EventRecord};
use crate::utils::constants::{
    COL_ENERGY, COL_LATITUDE, COL_LONGITUDE, COL_TIMESTAMP, DEFAULT_BUFFER_SIZE,
};
use csv::{ReaderBuilder, StringRecord, Trim};
use std::fs::File;
use std::path::Path;
use tracing::{debug, warn};

/// Cleaned contents of one transformed file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CleanedEvents {
    pub records: Vec<EventRecord>,
    /// Rows dropped because their timestamp did not parse.
    pub dropped: usize,
}

#[derive(Debug, Clone, Copy)]
struct ColumnMap {
    timestamp: usize,
    latitude: usize,
    longitude: usize,
    energy: usize,
}

/// Reads `.event.csv` files back for loading.
///
/// Structural problems (missing columns, non-numeric coordinates, ragged
/// rows) reject the whole file as malformed. Bad timestamps only drop rows.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventCsvReader;

impl EventCsvReader {
    pub fn new() -> Self {
        Self
    }

    pub fn read(&self, path: &Path) -> Result<CleanedEvents> {
        let file = File::open(path)?;
        let mut reader = ReaderBuilder::new()
            .buffer_capacity(DEFAULT_BUFFER_SIZE)
            .trim(Trim::All)
            .from_reader(file);

        let headers = reader
            .headers()
            .map_err(|e| PipelineError::malformed(path, format!("unreadable header: {}", e)))?
            .clone();
        let columns = resolve_columns(&headers).map_err(|reason| PipelineError::malformed(path, reason))?;

        let mut cleaned = CleanedEvents::default();
        for (index, row) in reader.records().enumerate() {
            // header is line 1
            let line = index + 2;
            let row = row.map_err(|e| PipelineError::malformed(path, format!("line {}: {}", line, e)))?;

            let Some(timestamp) = row.get(columns.timestamp).and_then(parse_timestamp) else {
                cleaned.dropped += 1;
                continue;
            };

            let record = EventRecord::new(
                timestamp,
                numeric(&row, columns.latitude, COL_LATITUDE, line, path)?,
                numeric(&row, columns.longitude, COL_LONGITUDE, line, path)?,
                numeric(&row, columns.energy, COL_ENERGY, line, path)?,
            );
            cleaned.records.push(record);
        }

        if cleaned.dropped > 0 {
            warn!(
                file = %path.display(),
                dropped = cleaned.dropped,
                "Dropped rows with unparseable timestamps"
            );
        }
        debug!(file = %path.display(), rows = cleaned.records.len(), "Read event file");
        Ok(cleaned)
    }
}

fn resolve_columns(headers: &StringRecord) -> std::result::Result<ColumnMap, String> {
    let find = |name: &str| headers.iter().position(|h| h.eq_ignore_ascii_case(name));

    let timestamp = find(COL_TIMESTAMP).ok_or_else(|| "no timestamp column".to_string())?;

    let mut missing = Vec::new();
    let mut lookup = |name: &'static str| {
        let found = find(name);
        if found.is_none() {
            missing.push(name);
        }
        found.unwrap_or(0)
    };
    let latitude = lookup(COL_LATITUDE);
    let longitude = lookup(COL_LONGITUDE);
    let energy = lookup(COL_ENERGY);

    if !missing.is_empty() {
        return Err(format!("missing columns: [{}]", missing.join(", ")));
    }
    Ok(ColumnMap {
        timestamp,
        latitude,
        longitude,
        energy,
    })
}

/// Empty cells are missing values and read as NaN.
fn numeric(row: &StringRecord, index: usize, column: &str, line: usize, path: &Path) -> Result<f32> {
    let raw = row.get(index).unwrap_or("");
    if raw.is_empty() {
        return Ok(f32::NAN);
    }
    raw.parse::<f32>().map_err(|_| {
        PipelineError::malformed(
            path,
            format!("line {}: non-numeric {} value '{}'", line, column, raw),
        )
    })
}
