//! Scan Store.
//!
//! Durable SQLite persistence for received scans, their per-angle readings
//! and periodic performance snapshots.
//!
//! # Storage layout
//!
//! | table               | columns                                                                  |
//! |---------------------|--------------------------------------------------------------------------|
//! | `sensor_data`       | id PK, timestamp, receive_time, message_id, device_id, latency_ms (NULL) |
//! | `sensor_readings`   | data_id → sensor_data.id, angle, value                                   |
//! | `performance_stats` | id PK, timestamp, message_count, avg/min/max/p95_latency, throughput     |
//!
//! `sensor_data` is indexed on `timestamp` and `device_id`; `sensor_readings`
//! on `data_id`.
//!
//! # Batched writes
//!
//! [`ScanStore::insert_scan`] opens a transaction on first use and leaves it
//! open; the caller decides when to [`commit`][ScanStore::commit]. Each scan
//! is written under its own savepoint, so a failing scan never leaves half of
//! its rows behind in the batch.
//!
//! # Example
//!
//! ```rust
//! use scanvault_store::ScanStore;
//! use scanvault_types::SensorMessage;
//!
//! let mut store = ScanStore::open_in_memory().unwrap();
//! let msg = SensorMessage::decode(
//!     br#"{"timestamp": 5.0, "device_id": "lidar", "readings": {"angle_0": 100.0}}"#,
//! ).unwrap();
//! store.insert_scan(&msg.into_scan(5.1)).unwrap();
//! store.commit().unwrap();
//!
//! let scan = store.latest_scan().unwrap().unwrap();
//! assert_eq!(scan.readings.len(), 1);
//! ```

use std::path::Path;

use rusqlite::{Connection, OptionalExtension, params};
use scanvault_types::{PerformanceSnapshot, Reading, RetryPolicy, Scan, ScanError};
use thiserror::Error;
use tracing::{debug, info, warn};

// ─────────────────────────────────────────────────────────────────────────────
// Error type
// ─────────────────────────────────────────────────────────────────────────────

/// Errors that can arise from scan store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Store at {path} unreachable after {attempts} attempt(s): {reason}")]
    Unreachable {
        path: String,
        attempts: u32,
        reason: String,
    },
}

impl From<StoreError> for ScanError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unreachable {
                path,
                attempts,
                reason,
            } => ScanError::Connection {
                target: path,
                attempts,
                reason,
            },
            other => ScanError::Persistence(other.to_string()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ScanStore
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite-backed scan store.
///
/// Owns exactly one [`Connection`]. The type is `Send` but deliberately not
/// shared: every worker or concurrent caller opens its own store.
#[derive(Debug)]
pub struct ScanStore {
    conn: Connection,
}

impl ScanStore {
    /// Open (or create) a persistent database at `path`, creating the parent
    /// directory when needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.configure()?;
        store.init_schema()?;
        info!(path = %path.display(), "scan store ready");
        Ok(store)
    }

    /// Open a temporary in-memory database (useful for testing).
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.configure()?;
        store.init_schema()?;
        Ok(store)
    }

    /// Open `path`, retrying with backoff according to `policy`.
    ///
    /// Returns [`StoreError::Unreachable`] once the attempt budget is spent.
    pub fn open_with_retry(path: impl AsRef<Path>, policy: &RetryPolicy) -> Result<Self, StoreError> {
        let path = path.as_ref();
        let mut attempt = 0;
        loop {
            attempt += 1;
            match Self::open(path) {
                Ok(store) => return Ok(store),
                Err(e) if attempt < policy.max_attempts => {
                    let delay = policy.delay_after(attempt);
                    warn!(
                        path = %path.display(),
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "scan store open failed; retrying"
                    );
                    std::thread::sleep(delay);
                }
                Err(e) => {
                    return Err(StoreError::Unreachable {
                        path: path.display().to_string(),
                        attempts: attempt,
                        reason: e.to_string(),
                    });
                }
            }
        }
    }

    fn configure(&self) -> Result<(), StoreError> {
        let mode: String = self
            .conn
            .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        debug!(journal_mode = %mode, "journal mode set");
        self.conn
            .execute_batch("PRAGMA synchronous = NORMAL; PRAGMA foreign_keys = ON;")?;
        Ok(())
    }

    fn init_schema(&self) -> Result<(), StoreError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sensor_data (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp    REAL NOT NULL,
                receive_time REAL NOT NULL,
                message_id   INTEGER,
                device_id    TEXT NOT NULL,
                latency_ms   REAL
            );
            CREATE TABLE IF NOT EXISTS sensor_readings (
                data_id INTEGER NOT NULL,
                angle   TEXT NOT NULL,
                value   REAL NOT NULL,
                FOREIGN KEY (data_id) REFERENCES sensor_data(id)
            );
            CREATE TABLE IF NOT EXISTS performance_stats (
                id            INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp     REAL NOT NULL,
                message_count INTEGER NOT NULL,
                avg_latency   REAL,
                min_latency   REAL,
                max_latency   REAL,
                p95_latency   REAL,
                throughput    REAL
            );
            CREATE INDEX IF NOT EXISTS idx_timestamp ON sensor_data(timestamp);
            CREATE INDEX IF NOT EXISTS idx_device ON sensor_data(device_id);
            CREATE INDEX IF NOT EXISTS idx_readings_data_id ON sensor_readings(data_id);",
        )?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    // -------------------------------------------------------------------------
    // Batched write API
    // -------------------------------------------------------------------------

    /// `true` while a batch transaction is open and not yet committed.
    pub fn in_batch(&self) -> bool {
        !self.conn.is_autocommit()
    }

    fn begin_batch(&self) -> Result<(), StoreError> {
        if self.conn.is_autocommit() {
            self.conn.execute_batch("BEGIN")?;
        }
        Ok(())
    }

    /// Write one scan row and its readings inside the current batch and
    /// return the new `sensor_data.id`.
    ///
    /// Nothing is durable until [`commit`][Self::commit]. On error the scan's
    /// own rows are rolled back; earlier scans of the batch are kept.
    pub fn insert_scan(&mut self, scan: &Scan) -> Result<i64, StoreError> {
        self.begin_batch()?;
        let sp = self.conn.savepoint()?;
        let data_id = {
            sp.execute(
                "INSERT INTO sensor_data
                     (timestamp, receive_time, message_id, device_id, latency_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    scan.timestamp,
                    scan.receive_time,
                    scan.message_id,
                    scan.device_id,
                    scan.latency_ms,
                ],
            )?;
            let data_id = sp.last_insert_rowid();
            let mut stmt = sp.prepare_cached(
                "INSERT INTO sensor_readings (data_id, angle, value) VALUES (?1, ?2, ?3)",
            )?;
            for reading in &scan.readings {
                stmt.execute(params![data_id, reading.angle_label, reading.distance])?;
            }
            data_id
        };
        sp.commit()?;
        Ok(data_id)
    }

    /// Append a performance snapshot inside the current batch.
    pub fn insert_snapshot(&mut self, snapshot: &PerformanceSnapshot) -> Result<i64, StoreError> {
        self.begin_batch()?;
        self.conn.execute(
            "INSERT INTO performance_stats
                 (timestamp, message_count, avg_latency, min_latency, max_latency, p95_latency, throughput)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                snapshot.timestamp,
                snapshot.message_count as i64,
                snapshot.avg_latency,
                snapshot.min_latency,
                snapshot.max_latency,
                snapshot.p95_latency,
                snapshot.throughput,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Commit the open batch. Returns `false` when there was nothing to commit.
    pub fn commit(&mut self) -> Result<bool, StoreError> {
        if self.conn.is_autocommit() {
            return Ok(false);
        }
        self.conn.execute_batch("COMMIT")?;
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Scan queries
    // -------------------------------------------------------------------------

    /// Most recent sender timestamp, or `None` for an empty store.
    pub fn latest_timestamp(&self) -> Result<Option<f64>, StoreError> {
        let ts: Option<f64> = self
            .conn
            .query_row("SELECT MAX(timestamp) FROM sensor_data", [], |row| row.get(0))?;
        Ok(ts)
    }

    /// The scan with the most recent timestamp.
    pub fn latest_scan(&self) -> Result<Option<Scan>, StoreError> {
        match self.latest_timestamp()? {
            Some(ts) => self.scan_at(ts),
            None => {
                warn!("no data found in scan store");
                Ok(None)
            }
        }
    }

    /// The scan recorded at exactly `timestamp`.
    ///
    /// When several messages share a timestamp the last stored one wins.
    pub fn scan_at(&self, timestamp: f64) -> Result<Option<Scan>, StoreError> {
        let id: Option<i64> = self
            .conn
            .query_row(
                "SELECT id FROM sensor_data WHERE timestamp = ?1 ORDER BY id DESC LIMIT 1",
                params![timestamp],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => self.scan_by_id(id),
            None => Ok(None),
        }
    }

    /// Load a scan by its `sensor_data.id`.
    ///
    /// Readings come back ordered by angle label. Should legacy rows hold the
    /// same label twice, the later row wins.
    pub fn scan_by_id(&self, id: i64) -> Result<Option<Scan>, StoreError> {
        let header = self
            .conn
            .query_row(
                "SELECT id, timestamp, receive_time, message_id, device_id, latency_ms
                 FROM sensor_data WHERE id = ?1",
                params![id],
                |row| {
                    Ok(Scan {
                        id: Some(row.get(0)?),
                        timestamp: row.get(1)?,
                        receive_time: row.get(2)?,
                        message_id: row.get::<_, Option<i64>>(3)?.unwrap_or(-1),
                        device_id: row.get(4)?,
                        latency_ms: row.get(5)?,
                        readings: Vec::new(),
                    })
                },
            )
            .optional()?;
        let Some(mut scan) = header else {
            return Ok(None);
        };

        let mut stmt = self.conn.prepare_cached(
            "SELECT angle, value FROM sensor_readings
             WHERE data_id = ?1
             ORDER BY angle ASC, rowid ASC",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok(Reading {
                angle_label: row.get(0)?,
                distance: row.get(1)?,
            })
        })?;
        for row in rows {
            let reading = row?;
            match scan.readings.last_mut() {
                Some(prev) if prev.angle_label == reading.angle_label => *prev = reading,
                _ => scan.readings.push(reading),
            }
        }
        Ok(Some(scan))
    }

    /// Distinct scan timestamps, newest first.
    pub fn recent_timestamps(&self, limit: usize) -> Result<Vec<f64>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT timestamp FROM sensor_data ORDER BY timestamp DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit as i64], |row| row.get(0))?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -------------------------------------------------------------------------
    // Snapshot queries
    // -------------------------------------------------------------------------

    /// All stored snapshots, oldest first.
    pub fn snapshots(&self) -> Result<Vec<PerformanceSnapshot>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT timestamp, message_count, avg_latency, min_latency, max_latency, p95_latency, throughput
             FROM performance_stats ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], snapshot_from_row)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// The most recently stored snapshot.
    pub fn latest_snapshot(&self) -> Result<Option<PerformanceSnapshot>, StoreError> {
        let snap = self
            .conn
            .query_row(
                "SELECT timestamp, message_count, avg_latency, min_latency, max_latency, p95_latency, throughput
                 FROM performance_stats ORDER BY id DESC LIMIT 1",
                [],
                snapshot_from_row,
            )
            .optional()?;
        Ok(snap)
    }
}

fn snapshot_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<PerformanceSnapshot> {
    Ok(PerformanceSnapshot {
        timestamp: row.get(0)?,
        message_count: row.get::<_, i64>(1)? as u64,
        avg_latency: row.get::<_, Option<f64>>(2)?.unwrap_or_default(),
        min_latency: row.get::<_, Option<f64>>(3)?.unwrap_or_default(),
        max_latency: row.get::<_, Option<f64>>(4)?.unwrap_or_default(),
        p95_latency: row.get::<_, Option<f64>>(5)?.unwrap_or_default(),
        throughput: row.get::<_, Option<f64>>(6)?.unwrap_or_default(),
    })
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn make_scan(timestamp: f64, readings: &[(&str, f64)]) -> Scan {
        Scan {
            id: None,
            timestamp,
            receive_time: timestamp + 0.01,
            message_id: 1,
            device_id: "raspi_test".to_string(),
            latency_ms: Some(10.0),
            readings: readings.iter().map(|(a, d)| Reading::new(*a, *d)).collect(),
        }
    }

    fn count(store: &ScanStore, table: &str) -> i64 {
        store
            .conn()
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn empty_store_has_no_latest_scan() {
        let store = ScanStore::open_in_memory().unwrap();
        assert!(store.latest_timestamp().unwrap().is_none());
        assert!(store.latest_scan().unwrap().is_none());
        assert!(store.recent_timestamps(10).unwrap().is_empty());
    }

    #[test]
    fn insert_and_read_back_round_trip() {
        let mut store = ScanStore::open_in_memory().unwrap();
        let scan = make_scan(1.0, &[("angle_0", 100.0), ("angle_90", 50.0)]);
        let id = store.insert_scan(&scan).unwrap();
        store.commit().unwrap();

        let back = store.scan_by_id(id).unwrap().unwrap();
        assert_eq!(back.id, Some(id));
        assert_eq!(back.device_id, "raspi_test");
        assert_eq!(back.latency_ms, Some(10.0));
        assert_eq!(back.readings, scan.readings);
    }

    #[test]
    fn null_latency_is_preserved() {
        let mut store = ScanStore::open_in_memory().unwrap();
        let mut scan = make_scan(1.0, &[("angle_0", 1.0)]);
        scan.latency_ms = None;
        store.insert_scan(&scan).unwrap();
        let back = store.latest_scan().unwrap().unwrap();
        assert!(back.latency_ms.is_none());
    }

    #[test]
    fn insert_opens_batch_and_commit_closes_it() {
        let mut store = ScanStore::open_in_memory().unwrap();
        assert!(!store.in_batch());
        store.insert_scan(&make_scan(1.0, &[])).unwrap();
        assert!(store.in_batch());
        assert!(store.commit().unwrap());
        assert!(!store.in_batch());
        assert!(!store.commit().unwrap(), "nothing left to commit");
    }

    #[test]
    fn latest_scan_picks_max_timestamp() {
        let mut store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&make_scan(2.0, &[("angle_0", 2.0)])).unwrap();
        store.insert_scan(&make_scan(5.0, &[("angle_0", 5.0)])).unwrap();
        store.insert_scan(&make_scan(3.0, &[("angle_0", 3.0)])).unwrap();
        store.commit().unwrap();

        let latest = store.latest_scan().unwrap().unwrap();
        assert_eq!(latest.timestamp, 5.0);
        assert_eq!(latest.readings[0].distance, 5.0);
    }

    #[test]
    fn scan_at_unknown_timestamp_is_none() {
        let store = ScanStore::open_in_memory().unwrap();
        assert!(store.scan_at(99.0).unwrap().is_none());
    }

    #[test]
    fn recent_timestamps_are_distinct_and_descending() {
        let mut store = ScanStore::open_in_memory().unwrap();
        for ts in [1.0, 2.0, 2.0, 3.0] {
            store.insert_scan(&make_scan(ts, &[])).unwrap();
        }
        store.commit().unwrap();
        assert_eq!(store.recent_timestamps(10).unwrap(), vec![3.0, 2.0, 1.0]);
        assert_eq!(store.recent_timestamps(2).unwrap(), vec![3.0, 2.0]);
    }

    #[test]
    fn readings_come_back_ordered_by_label() {
        let mut store = ScanStore::open_in_memory().unwrap();
        store
            .insert_scan(&make_scan(1.0, &[("angle_20", 2.0), ("angle_10", 1.0)]))
            .unwrap();
        let scan = store.latest_scan().unwrap().unwrap();
        let labels: Vec<_> = scan.readings.iter().map(|r| r.angle_label.as_str()).collect();
        assert_eq!(labels, vec!["angle_10", "angle_20"]);
    }

    #[test]
    fn duplicate_labels_in_stored_rows_keep_last() {
        let mut store = ScanStore::open_in_memory().unwrap();
        store
            .insert_scan(&make_scan(1.0, &[("angle_5", 1.0), ("angle_5", 7.0)]))
            .unwrap();
        let scan = store.latest_scan().unwrap().unwrap();
        assert_eq!(scan.readings.len(), 1);
        assert_eq!(scan.readings[0].distance, 7.0);
    }

    #[test]
    fn failed_scan_rolls_back_only_its_own_rows() {
        let mut store = ScanStore::open_in_memory().unwrap();
        store.insert_scan(&make_scan(1.0, &[("angle_0", 1.0)])).unwrap();

        // NaN binds as NULL and violates `value NOT NULL`.
        let bad = make_scan(2.0, &[("angle_0", 1.0), ("angle_10", f64::NAN)]);
        assert!(store.insert_scan(&bad).is_err());
        store.commit().unwrap();

        assert_eq!(count(&store, "sensor_data"), 1);
        assert_eq!(count(&store, "sensor_readings"), 1);
    }

    #[test]
    fn snapshots_append_in_order() {
        let mut store = ScanStore::open_in_memory().unwrap();
        for n in [500u64, 1000] {
            store
                .insert_snapshot(&PerformanceSnapshot {
                    timestamp: n as f64,
                    message_count: n,
                    avg_latency: 1.0,
                    min_latency: 0.5,
                    max_latency: 2.0,
                    p95_latency: 1.9,
                    throughput: 10.0,
                })
                .unwrap();
        }
        store.commit().unwrap();
        let all = store.snapshots().unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].message_count, 500);
        assert_eq!(store.latest_snapshot().unwrap().unwrap().message_count, 1000);
    }

    #[test]
    fn open_on_disk_creates_parent_directory() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("nested").join("sensor_data.db");
        let mut store = ScanStore::open(&path).unwrap();
        store.insert_scan(&make_scan(1.0, &[])).unwrap();
        store.commit().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn open_with_retry_gives_up_with_unreachable() {
        let dir = tempfile::tempdir().expect("tmp dir");
        // A directory cannot be opened as a database file.
        let policy = RetryPolicy {
            max_attempts: 2,
            initial_delay: std::time::Duration::from_millis(1),
            max_delay: std::time::Duration::from_millis(1),
            multiplier: 1.0,
        };
        let err = ScanStore::open_with_retry(dir.path(), &policy)
            .err()
            .expect("opening a directory must fail");
        match err {
            StoreError::Unreachable { attempts, .. } => assert_eq!(attempts, 2),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unreachable_maps_to_connection_error() {
        let err: ScanError = StoreError::Unreachable {
            path: "/data/x.db".to_string(),
            attempts: 3,
            reason: "nope".to_string(),
        }
        .into();
        assert!(matches!(err, ScanError::Connection { attempts: 3, .. }));
    }
}
