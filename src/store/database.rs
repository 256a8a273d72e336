use crate::error::Result;
use crate::models::EventRecord;
use crate::utils::constants::{FLASH_TABLE, FLASH_VIEW, LEDGER_TABLE, MAX_ROWS_PER_INSERT};
use chrono::Utc;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One row of the derived view.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashViewRow {
    pub timestamp: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub energy: Option<f64>,
    pub year: Option<i64>,
    pub month: Option<i64>,
    pub day: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub flash_rows: u64,
    pub loaded_files: u64,
    pub first_timestamp: Option<String>,
    pub last_timestamp: Option<String>,
}

impl StoreStats {
    pub fn summary(&self) -> String {
        let range = match (&self.first_timestamp, &self.last_timestamp) {
            (Some(first), Some(last)) => format!("{} .. {}", first, last),
            _ => "empty".to_string(),
        };
        format!(
            "Flash events: {}\nLoaded files: {}\nTime range:   {}",
            self.flash_rows, self.loaded_files, range
        )
    }
}

/// SQLite store of committed lightning events plus the load ledger.
pub struct FlashStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl FlashStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self {
            conn,
            path: Some(path.to_path_buf()),
        };
        store.init_schema()?;
        debug!(path = %path.display(), "Opened flash store");
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
            path: None,
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    timestamp TEXT,
                    latitude REAL,
                    longitude REAL,
                    energy REAL
                )",
                FLASH_TABLE
            ),
            [],
        )?;

        self.conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    content_sha256 TEXT PRIMARY KEY,
                    file_name TEXT NOT NULL,
                    row_count INTEGER NOT NULL,
                    loaded_at TEXT NOT NULL
                )",
                LEDGER_TABLE
            ),
            [],
        )?;

        Ok(())
    }

    /// Whether a file with this content hash has already been committed.
    pub fn is_loaded(&self, content_sha256: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT 1 FROM {} WHERE content_sha256 = ?1", LEDGER_TABLE),
                params![content_sha256],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Append one file's records and its ledger entry in a single transaction.
    ///
    /// Rows go in as multi-row INSERTs of at most `batch_size` rows, further
    /// capped by SQLite's bound-parameter limit.
    pub fn append_file(
        &mut self,
        file_name: &str,
        content_sha256: &str,
        records: &[EventRecord],
        batch_size: usize,
    ) -> Result<usize> {
        let rows_per_insert = batch_size.clamp(1, MAX_ROWS_PER_INSERT);
        let tx = self.conn.transaction()?;

        for chunk in records.chunks(rows_per_insert) {
            let sql = insert_sql(chunk.len());
            let mut stmt = tx.prepare_cached(&sql)?;
            let values = chunk.iter().flat_map(|r| {
                [
                    Value::Text(r.timestamp_text()),
                    Value::Real(widen(r.latitude)),
                    Value::Real(widen(r.longitude)),
                    Value::Real(widen(r.energy)),
                ]
            });
            stmt.execute(params_from_iter(values))?;
        }

        tx.execute(
            &format!(
                "INSERT INTO {} (content_sha256, file_name, row_count, loaded_at) VALUES (?1, ?2, ?3, ?4)",
                LEDGER_TABLE
            ),
            params![
                content_sha256,
                file_name,
                records.len() as i64,
                Utc::now().to_rfc3339()
            ],
        )?;
        tx.commit()?;

        debug!(file = file_name, rows = records.len(), "Appended file to store");
        Ok(records.len())
    }

    /// Compact the database and make sure the derived view exists.
    pub fn maintain(&self) -> Result<()> {
        self.conn.execute_batch("VACUUM")?;
        self.create_view()?;
        info!("Store maintenance complete");
        Ok(())
    }

    pub fn create_view(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "CREATE VIEW IF NOT EXISTS {} AS
             SELECT *,
                 CAST(strftime('%Y', timestamp) AS INTEGER) AS year,
                 CAST(strftime('%m', timestamp) AS INTEGER) AS month,
                 CAST(strftime('%d', timestamp) AS INTEGER) AS day,
                 NULL AS time_period,
                 NULL AS cluster,
                 NULL AS state
             FROM {};",
            FLASH_VIEW, FLASH_TABLE
        ))?;
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let (flash_rows, first_timestamp, last_timestamp) = self.conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(timestamp), MAX(timestamp) FROM {}",
                FLASH_TABLE
            ),
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )?;
        let loaded_files: i64 = self.conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", LEDGER_TABLE),
            [],
            |row| row.get(0),
        )?;

        Ok(StoreStats {
            flash_rows: flash_rows.max(0) as u64,
            loaded_files: loaded_files.max(0) as u64,
            first_timestamp,
            last_timestamp,
        })
    }

    /// Visit every view row in insertion order. Creates the view if needed.
    pub fn scan_view<F>(&self, mut visit: F) -> Result<usize>
    where
        F: FnMut(FlashViewRow) -> Result<()>,
    {
        self.create_view()?;
        let mut stmt = self.conn.prepare(&format!(
            "SELECT timestamp, latitude, longitude, energy, year, month, day FROM {}",
            FLASH_VIEW
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(FlashViewRow {
                timestamp: row.get::<_, Option<String>>(0)?.unwrap_or_default(),
                latitude: row.get(1)?,
                longitude: row.get(2)?,
                energy: row.get(3)?,
                year: row.get(4)?,
                month: row.get(5)?,
                day: row.get(6)?,
            })
        })?;

        let mut count = 0;
        for row in rows {
            visit(row?)?;
            count += 1;
        }
        Ok(count)
    }
}

fn insert_sql(rows: usize) -> String {
    let mut sql = format!(
        "INSERT INTO {} (timestamp, latitude, longitude, energy) VALUES ",
        FLASH_TABLE
    );
    for i in 0..rows {
        if i > 0 {
            sql.push(',');
        }
        sql.push_str("(?,?,?,?)");
    }
    sql
}

/// Widen through the shortest decimal form so 29.1f32 is stored as 29.1.
fn widen(value: f32) -> f64 {
    value.to_string().parse().unwrap_or(value as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn records(n: usize) -> Vec<EventRecord> {
        let base = Utc.with_ymd_and_hms(2023, 2, 17, 21, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                EventRecord::new(
                    base + chrono::Duration::milliseconds(i as i64 * 20),
                    29.1,
                    -95.25,
                    1.5e-15,
                )
            })
            .collect()
    }

    #[test]
    fn test_append_in_small_batches() {
        let mut store = FlashStore::open_in_memory().unwrap();
        let inserted = store.append_file("a.event.csv", "abc", &records(7), 3).unwrap();
        assert_eq!(inserted, 7);

        let stats = store.stats().unwrap();
        assert_eq!(stats.flash_rows, 7);
        assert_eq!(stats.loaded_files, 1);
        assert_eq!(
            stats.first_timestamp.as_deref(),
            Some("2023-02-17 21:00:00.000000")
        );
        assert!(store.is_loaded("abc").unwrap());
        assert!(!store.is_loaded("def").unwrap());
    }

    #[test]
    fn test_duplicate_hash_rolls_back_rows() {
        let mut store = FlashStore::open_in_memory().unwrap();
        store.append_file("a.event.csv", "abc", &records(2), 10).unwrap();
        assert!(store.append_file("b.event.csv", "abc", &records(5), 10).is_err());
        assert_eq!(store.stats().unwrap().flash_rows, 2);
    }

    #[test]
    fn test_view_is_idempotent_and_derives_dates() {
        let mut store = FlashStore::open_in_memory().unwrap();
        store.append_file("a.event.csv", "abc", &records(3), 10).unwrap();
        store.maintain().unwrap();
        store.maintain().unwrap();

        let mut rows = Vec::new();
        let count = store
            .scan_view(|row| {
                rows.push(row);
                Ok(())
            })
            .unwrap();
        assert_eq!(count, 3);
        assert_eq!(rows[0].year, Some(2023));
        assert_eq!(rows[0].month, Some(2));
        assert_eq!(rows[0].day, Some(17));
        assert_eq!(rows[0].latitude, Some(29.1));
    }

    #[test]
    fn test_insert_sql_placeholders() {
        assert_eq!(
            insert_sql(2),
            "INSERT INTO tbl_flash (timestamp, latitude, longitude, energy) VALUES (?,?,?,?),(?,?,?,?)"
        );
    }

    #[test]
    fn test_stats_on_empty_store() {
        let store = FlashStore::open_in_memory().unwrap();
        let stats = store.stats().unwrap();
        assert_eq!(stats, StoreStats::default());
        assert!(stats.summary().contains("empty"));
    }
}
