use crate::error::{PipelineError, Result};
use crate::store::{FlashStore, FlashViewRow};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE,
};
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel, ZstdLevel};
use parquet::file::properties::WriterProperties;
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Exports the derived flash view to a Parquet file.
pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(PipelineError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    pub fn with_row_group_size(mut self, size: usize) -> Self {
        self.row_group_size = size.max(1);
        self
    }

    /// Stream every view row into `path`, one record batch per row group.
    /// The file appears only once complete.
    pub fn export_view(&self, store: &FlashStore, path: &Path) -> Result<ParquetFileInfo> {
        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let temp = tempfile::Builder::new()
            .prefix(".")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let schema = self.create_schema();
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();
        let mut writer = ArrowWriter::try_new(temp.reopen()?, schema.clone(), Some(props))?;

        let mut pending: Vec<FlashViewRow> = Vec::with_capacity(self.row_group_size);
        let total = store.scan_view(|row| {
            pending.push(row);
            if pending.len() >= self.row_group_size {
                let batch = self.rows_to_batch(&pending, schema.clone())?;
                writer.write(&batch)?;
                pending.clear();
            }
            Ok(())
        })?;
        if !pending.is_empty() {
            let batch = self.rows_to_batch(&pending, schema.clone())?;
            writer.write(&batch)?;
        }
        writer.close()?;

        temp.persist(path).map_err(|e| PipelineError::Io(e.error))?;
        info!(rows = total, path = %path.display(), "Exported flash view");
        self.get_file_info(path)
    }

    fn create_schema(&self) -> Arc<Schema> {
        let fields = vec![
            Field::new("timestamp", DataType::Utf8, false),
            Field::new("latitude", DataType::Float64, true),
            Field::new("longitude", DataType::Float64, true),
            Field::new("energy", DataType::Float64, true),
            Field::new("year", DataType::Int32, true),
            Field::new("month", DataType::Int32, true),
            Field::new("day", DataType::Int32, true),
            Field::new("time_period", DataType::Utf8, true),
            Field::new("cluster", DataType::Int32, true),
            Field::new("state", DataType::Utf8, true),
        ];

        Arc::new(Schema::new(fields))
    }

    fn rows_to_batch(&self, rows: &[FlashViewRow], schema: Arc<Schema>) -> Result<RecordBatch> {
        let as_i32 = |v: Option<i64>| v.and_then(|n| i32::try_from(n).ok());

        let timestamps = StringArray::from_iter_values(rows.iter().map(|r| r.timestamp.as_str()));
        let latitudes: Float64Array = rows.iter().map(|r| r.latitude).collect();
        let longitudes: Float64Array = rows.iter().map(|r| r.longitude).collect();
        let energies: Float64Array = rows.iter().map(|r| r.energy).collect();
        let years: Int32Array = rows.iter().map(|r| as_i32(r.year)).collect();
        let months: Int32Array = rows.iter().map(|r| as_i32(r.month)).collect();
        let days: Int32Array = rows.iter().map(|r| as_i32(r.day)).collect();

        // enrichment placeholders
        let time_periods = StringArray::new_null(rows.len());
        let clusters = Int32Array::new_null(rows.len());
        let states = StringArray::new_null(rows.len());

        let batch = RecordBatch::try_new(
            schema,
            vec![
                Arc::new(timestamps),
                Arc::new(latitudes),
                Arc::new(longitudes),
                Arc::new(energies),
                Arc::new(years),
                Arc::new(months),
                Arc::new(days),
                Arc::new(time_periods),
                Arc::new(clusters),
                Arc::new(states),
            ],
        )?;

        Ok(batch)
    }

    pub fn get_file_info(&self, path: &Path) -> Result<ParquetFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};
        use std::fs::File;

        let file = File::open(path)?;
        let reader = SerializedFileReader::new(file)?;
        let metadata = reader.metadata();

        let row_groups = metadata.num_row_groups();
        let row_group_sizes = (0..row_groups)
            .map(|i| metadata.row_group(i).num_rows())
            .collect();

        Ok(ParquetFileInfo {
            total_rows: metadata.file_metadata().num_rows(),
            row_groups: row_groups as i32,
            row_group_sizes,
            file_size: std::fs::metadata(path)?.len(),
            compression: self.compression,
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ParquetFileInfo {
    pub total_rows: i64,
    pub row_groups: i32,
    pub row_group_sizes: Vec<i64>,
    pub file_size: u64,
    pub compression: Compression,
}

impl ParquetFileInfo {
    pub fn summary(&self) -> String {
        let avg = if self.row_groups > 0 {
            self.total_rows as f64 / self.row_groups as f64
        } else {
            0.0
        };
        format!(
            "Parquet File Summary:\n\
            - Total rows: {}\n\
            - Row groups: {}\n\
            - File size: {:.2} MB\n\
            - Compression: {:?}\n\
            - Avg rows per group: {:.0}",
            self.total_rows,
            self.row_groups,
            self.file_size as f64 / 1_048_576.0,
            self.compression,
            avg
        )
    }
}
