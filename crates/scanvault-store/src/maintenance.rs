//! Store inspection and housekeeping.
//!
//! Read-only summaries plus the maintenance operations exposed by
//! `scanvault db`: integrity check, `VACUUM`, `ANALYZE` and age-based pruning.

use rusqlite::params;
use serde::Serialize;
use tracing::info;

use crate::scan_store::{ScanStore, StoreError};

/// Aggregate view of what the store holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSummary {
    pub message_count: u64,
    /// Number of distinct scan timestamps.
    pub scan_count: u64,
    pub device_count: u64,
    pub reading_count: u64,
    pub first_timestamp: Option<f64>,
    pub last_timestamp: Option<f64>,
    pub avg_latency_ms: Option<f64>,
    pub min_latency_ms: Option<f64>,
    pub max_latency_ms: Option<f64>,
}

impl StoreSummary {
    /// Seconds between the first and last scan, when both exist.
    pub fn duration_secs(&self) -> Option<f64> {
        match (self.first_timestamp, self.last_timestamp) {
            (Some(first), Some(last)) => Some(last - first),
            _ => None,
        }
    }
}

/// Median and tail of the stored per-message latencies.
///
/// Percentiles interpolate linearly between the two nearest ranks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyPercentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyPercentiles {
    /// `None` for an empty slice; `sorted` must be ascending.
    fn from_sorted(sorted: &[f64]) -> Option<Self> {
        if sorted.is_empty() {
            return None;
        }
        let at = |q: f64| {
            let pos = q * (sorted.len() - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        };
        Some(Self {
            p50: at(0.50),
            p95: at(0.95),
            p99: at(0.99),
        })
    }
}

/// Result of [`ScanStore::health`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// Output of `PRAGMA integrity_check` (`"ok"` when healthy).
    pub integrity: String,
    pub size_bytes: u64,
    pub sensor_data_rows: u64,
    pub sensor_readings_rows: u64,
    pub performance_stats_rows: u64,
}

impl HealthReport {
    pub fn is_ok(&self) -> bool {
        self.integrity == "ok"
    }
}

/// Rows removed by [`ScanStore::prune_older_than`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PruneReport {
    pub scans_removed: u64,
    pub readings_removed: u64,
}

impl ScanStore {
    /// Counts, time range and latency aggregates over every stored scan.
    pub fn summary(&self) -> Result<StoreSummary, StoreError> {
        let conn = self.conn();
        let summary = conn.query_row(
            "SELECT COUNT(*), COUNT(DISTINCT timestamp), COUNT(DISTINCT device_id),
                    MIN(timestamp), MAX(timestamp),
                    AVG(latency_ms), MIN(latency_ms), MAX(latency_ms)
             FROM sensor_data",
            [],
            |row| {
                Ok(StoreSummary {
                    message_count: row.get::<_, i64>(0)? as u64,
                    scan_count: row.get::<_, i64>(1)? as u64,
                    device_count: row.get::<_, i64>(2)? as u64,
                    reading_count: 0,
                    first_timestamp: row.get(3)?,
                    last_timestamp: row.get(4)?,
                    avg_latency_ms: row.get(5)?,
                    min_latency_ms: row.get(6)?,
                    max_latency_ms: row.get(7)?,
                })
            },
        )?;
        let readings: i64 =
            conn.query_row("SELECT COUNT(*) FROM sensor_readings", [], |row| row.get(0))?;
        Ok(StoreSummary {
            reading_count: readings as u64,
            ..summary
        })
    }

    /// p50/p95/p99 over every non-null `latency_ms`, or `None` when no scan
    /// carries a latency.
    pub fn latency_percentiles(&self) -> Result<Option<LatencyPercentiles>, StoreError> {
        let mut stmt = self.conn().prepare(
            "SELECT latency_ms FROM sensor_data WHERE latency_ms IS NOT NULL ORDER BY latency_ms",
        )?;
        let latencies = stmt
            .query_map([], |row| row.get::<_, f64>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LatencyPercentiles::from_sorted(&latencies))
    }

    /// Integrity check, on-disk size and per-table row counts.
    pub fn health(&self) -> Result<HealthReport, StoreError> {
        let conn = self.conn();
        let integrity: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;
        let count = |table: &str| -> Result<u64, StoreError> {
            let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })?;
            Ok(n as u64)
        };
        Ok(HealthReport {
            integrity,
            size_bytes: (page_count * page_size) as u64,
            sensor_data_rows: count("sensor_data")?,
            sensor_readings_rows: count("sensor_readings")?,
            performance_stats_rows: count("performance_stats")?,
        })
    }

    /// Rebuild the database file to reclaim free pages.
    ///
    /// Commits any open batch first, since `VACUUM` cannot run inside a
    /// transaction.
    pub fn vacuum(&mut self) -> Result<(), StoreError> {
        self.commit()?;
        self.conn().execute_batch("VACUUM")?;
        info!("vacuum complete");
        Ok(())
    }

    /// Refresh query-planner statistics (`ANALYZE`).
    pub fn optimize(&mut self) -> Result<(), StoreError> {
        self.commit()?;
        self.conn().execute_batch("ANALYZE")?;
        info!("analyze complete");
        Ok(())
    }

    /// Delete every scan (and its readings) whose timestamp is before `cutoff`.
    ///
    /// Runs in a single transaction of its own.
    pub fn prune_older_than(&mut self, cutoff: f64) -> Result<PruneReport, StoreError> {
        self.commit()?;
        let conn = self.conn();
        conn.execute_batch("BEGIN")?;
        let outcome = (|| -> Result<PruneReport, StoreError> {
            let readings_removed = conn.execute(
                "DELETE FROM sensor_readings
                 WHERE data_id IN (SELECT id FROM sensor_data WHERE timestamp < ?1)",
                params![cutoff],
            )?;
            let scans_removed =
                conn.execute("DELETE FROM sensor_data WHERE timestamp < ?1", params![cutoff])?;
            Ok(PruneReport {
                scans_removed: scans_removed as u64,
                readings_removed: readings_removed as u64,
            })
        })();
        match outcome {
            Ok(report) => {
                conn.execute_batch("COMMIT")?;
                info!(
                    cutoff,
                    scans_removed = report.scans_removed,
                    readings_removed = report.readings_removed,
                    "pruned old scans"
                );
                Ok(report)
            }
            Err(e) => {
                conn.execute_batch("ROLLBACK")?;
                Err(e)
            }
        }
    }
}
