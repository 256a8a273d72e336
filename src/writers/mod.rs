pub mod event_csv_writer;
pub mod parquet_writer;

pub use event_csv_writer::{write_events, EventCsvWriter, WrittenFile};
pub use parquet_writer::{ParquetFileInfo, ParquetWriter};
