/// Object store defaults
pub const DEFAULT_BUCKET: &str = "noaa-goes18";
pub const DEFAULT_PRODUCT: &str = "GLM-L2-LCFA";
pub const DEFAULT_REGION: &str = "us-east-1";

/// Directory names under the data root
pub const EXTRACT_DIR: &str = "extract";
pub const TRANSFORM_DIR: &str = "transform";
pub const LOAD_DIR: &str = "load";
pub const STAGE_DIR: &str = "stage";
pub const LOADED_DIR: &str = "loaded";
pub const QUARANTINE_DIR: &str = "quarantine";

/// File names and suffixes
pub const DATABASE_FILE: &str = "glmFlash.db";
pub const SOURCE_EXTENSION: &str = "nc";
pub const EVENT_FILE_SUFFIX: &str = ".event.csv";
pub const PARTIAL_DOWNLOAD_SUFFIX: &str = ".part";
pub const REASON_SIDECAR_SUFFIX: &str = ".reason.json";

/// Required netCDF variables
pub const VAR_EVENT_LAT: &str = "event_lat";
pub const VAR_EVENT_LON: &str = "event_lon";
pub const VAR_EVENT_ENERGY: &str = "event_energy";
pub const VAR_EVENT_TIME_OFFSET: &str = "event_time_offset";
pub const REQUIRED_VARIABLES: [&str; 4] = [
    VAR_EVENT_LAT,
    VAR_EVENT_LON,
    VAR_EVENT_TIME_OFFSET,
    VAR_EVENT_ENERGY,
];

/// CF attribute names
pub const ATTR_UNITS: &str = "units";
pub const ATTR_SCALE_FACTOR: &str = "scale_factor";
pub const ATTR_ADD_OFFSET: &str = "add_offset";
pub const ATTR_FILL_VALUE: &str = "_FillValue";
pub const ATTR_UNSIGNED: &str = "_Unsigned";

/// Tabular columns
pub const COL_TIMESTAMP: &str = "timestamp";
pub const COL_LATITUDE: &str = "latitude";
pub const COL_LONGITUDE: &str = "longitude";
pub const COL_ENERGY: &str = "energy";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

/// Database objects
pub const FLASH_TABLE: &str = "tbl_flash";
pub const LEDGER_TABLE: &str = "tbl_loaded_files";
pub const FLASH_VIEW: &str = "vw_flash";

/// Processing defaults
pub const DEFAULT_CHUNK_SIZE: usize = 10_000;
pub const DEFAULT_LOAD_BATCH_SIZE: usize = 10_000;
pub const DEFAULT_LAG_HOURS: i64 = 3;
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB
pub const DEFAULT_ROW_GROUP_SIZE: usize = 10000;

/// SQLite caps bound parameters per statement at 32766; four per row.
pub const MAX_ROWS_PER_INSERT: usize = 8_000;

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
