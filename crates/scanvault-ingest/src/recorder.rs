//! Ingestion Recorder.
//!
//! Consumes raw sensor payloads one at a time and
//!
//! - decodes them into scans and computes the sender→receiver latency,
//! - writes them to the [`ScanStore`] in batches of `batch_size` messages,
//! - logs latency/throughput statistics every `report_interval`,
//! - appends a [`PerformanceSnapshot`] every `snapshot_every` messages.
//!
//! A crash between two commits loses at most `batch_size - 1` acknowledged
//! messages; [`Recorder::finish`] flushes the remainder on a clean shutdown.
//!
//! The recorder is synchronous (rusqlite is). Async transports hand it
//! messages through [`IngestWorker`][crate::worker::IngestWorker].

use std::time::Duration;

use scanvault_store::ScanStore;
use scanvault_types::{PerformanceSnapshot, ScanError, SensorMessage};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, instrument, warn};

use crate::latency::{DEFAULT_CAPACITY, LatencyStats, LatencyWindow};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Batching, reporting and snapshot cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecorderConfig {
    /// Successfully stored messages per commit.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Wall-clock seconds between statistics reports.
    #[serde(default = "default_report_interval_secs")]
    pub report_interval_secs: u64,
    /// Handled messages between performance snapshots.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Latency samples retained for the p95.
    #[serde(default = "default_latency_window")]
    pub latency_window: usize,
}

fn default_batch_size() -> usize {
    100
}

fn default_report_interval_secs() -> u64 {
    5
}

fn default_snapshot_every() -> u64 {
    default_batch_size() as u64 * default_report_interval_secs()
}

fn default_latency_window() -> usize {
    DEFAULT_CAPACITY
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            report_interval_secs: default_report_interval_secs(),
            snapshot_every: default_snapshot_every(),
            latency_window: default_latency_window(),
        }
    }
}

impl RecorderConfig {
    pub fn report_interval(&self) -> Duration {
        Duration::from_secs(self.report_interval_secs)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Outcomes
// ─────────────────────────────────────────────────────────────────────────────

/// Periodic statistics, logged and optionally persisted as a snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatsReport {
    pub timestamp: f64,
    pub message_count: u64,
    pub latency: LatencyStats,
    /// Messages per second since the stream started.
    pub throughput: f64,
}

impl StatsReport {
    pub fn to_snapshot(&self) -> PerformanceSnapshot {
        PerformanceSnapshot {
            timestamp: self.timestamp,
            message_count: self.message_count,
            avg_latency: self.latency.avg,
            min_latency: self.latency.min,
            max_latency: self.latency.max,
            p95_latency: self.latency.p95,
            throughput: self.throughput,
        }
    }
}

/// What happened to one successfully stored message.
#[derive(Debug, Clone, PartialEq)]
pub struct Handled {
    pub data_id: i64,
    pub latency_ms: Option<f64>,
    /// The batch was committed after this message.
    pub committed: bool,
    pub snapshot_written: bool,
    /// Present when this message triggered a statistics report.
    pub report: Option<StatsReport>,
}

/// Counters returned by [`Recorder::finish`].
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecorderSummary {
    pub messages: u64,
    pub decode_failures: u64,
    pub persistence_failures: u64,
    pub commits: u64,
    pub snapshots: u64,
    pub final_report: Option<StatsReport>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Recorder
// ─────────────────────────────────────────────────────────────────────────────

pub struct Recorder {
    store: ScanStore,
    config: RecorderConfig,
    latency: LatencyWindow,
    stream_start: Option<f64>,
    last_report: Option<f64>,
    pending: usize,
    since_snapshot: u64,
    summary: RecorderSummary,
}

impl Recorder {
    pub fn new(store: ScanStore, config: RecorderConfig) -> Self {
        let latency = LatencyWindow::new(config.latency_window);
        Self {
            store,
            config,
            latency,
            stream_start: None,
            last_report: None,
            pending: 0,
            since_snapshot: 0,
            summary: RecorderSummary::default(),
        }
    }

    pub fn config(&self) -> &RecorderConfig {
        &self.config
    }

    pub fn store(&self) -> &ScanStore {
        &self.store
    }

    /// Messages stored so far.
    pub fn message_count(&self) -> u64 {
        self.summary.messages
    }

    /// Fix the throughput origin; defaults to the first message's arrival.
    pub fn mark_stream_start(&mut self, at: f64) {
        self.stream_start = Some(at);
        self.last_report.get_or_insert(at);
    }

    /// Decode, store and account for one payload received at `receive_time`.
    ///
    /// A [`ScanError::Decode`] or [`ScanError::Persistence`] is logged and
    /// returned; the recorder stays usable either way.
    #[instrument(level = "debug", skip_all, fields(bytes = payload.len()))]
    pub fn handle(&mut self, payload: &[u8], receive_time: f64) -> Result<Handled, ScanError> {
        let message = match SensorMessage::decode(payload) {
            Ok(m) => m,
            Err(e) => {
                warn!(error = %e, "dropping undecodable message");
                self.summary.decode_failures += 1;
                return Err(e);
            }
        };
        self.stream_start.get_or_insert(receive_time);
        self.last_report.get_or_insert(receive_time);

        let scan = message.into_scan(receive_time);
        let data_id = match self.store.insert_scan(&scan) {
            Ok(id) => id,
            Err(e) => {
                let err: ScanError = e.into();
                error!(
                    message_id = scan.message_id,
                    device_id = %scan.device_id,
                    error = %err,
                    "failed to store scan"
                );
                self.summary.persistence_failures += 1;
                // The failed scan's rows are already rolled back; keep the rest.
                if let Err(commit_err) = self.flush() {
                    error!(error = %commit_err, "could not commit batch after persistence failure");
                }
                return Err(err);
            }
        };

        self.summary.messages += 1;
        self.pending += 1;
        self.since_snapshot += 1;
        if let Some(latency) = scan.latency_ms {
            self.latency.push(latency);
        }
        debug!(
            data_id,
            message_id = scan.message_id,
            readings = scan.readings.len(),
            latency_ms = ?scan.latency_ms,
            "scan stored"
        );

        let snapshot_written = self.maybe_snapshot(receive_time);
        let committed = if self.pending >= self.config.batch_size {
            self.flush()?
        } else {
            false
        };
        let report = self.maybe_report(receive_time);

        Ok(Handled {
            data_id,
            latency_ms: scan.latency_ms,
            committed,
            snapshot_written,
            report,
        })
    }

    /// Statistics as of `now`, or `None` before the first latency sample.
    pub fn stats(&self, now: f64) -> Option<StatsReport> {
        let latency = self.latency.stats()?;
        let elapsed = now - self.stream_start.unwrap_or(now);
        let throughput = if elapsed > 0.0 {
            self.summary.messages as f64 / elapsed
        } else {
            0.0
        };
        Some(StatsReport {
            timestamp: now,
            message_count: self.summary.messages,
            latency,
            throughput,
        })
    }

    /// Final statistics report and flush of the open batch.
    pub fn finish(&mut self, now: f64) -> Result<RecorderSummary, ScanError> {
        self.summary.final_report = self.stats(now);
        if let Some(report) = &self.summary.final_report {
            log_report("final statistics", report);
        }
        self.flush()?;
        info!(
            messages = self.summary.messages,
            decode_failures = self.summary.decode_failures,
            persistence_failures = self.summary.persistence_failures,
            commits = self.summary.commits,
            snapshots = self.summary.snapshots,
            "recorder finished"
        );
        Ok(self.summary.clone())
    }

    fn flush(&mut self) -> Result<bool, ScanError> {
        let committed = self.store.commit().map_err(|e| {
            error!(error = %e, "batch commit failed");
            ScanError::from(e)
        })?;
        if committed {
            self.summary.commits += 1;
            debug!(messages = self.pending, "batch committed");
        }
        self.pending = 0;
        Ok(committed)
    }

    fn maybe_snapshot(&mut self, now: f64) -> bool {
        if self.since_snapshot < self.config.snapshot_every.max(1) {
            return false;
        }
        self.since_snapshot = 0;
        let Some(report) = self.stats(now) else {
            debug!("no latency samples yet; snapshot skipped");
            return false;
        };
        match self.store.insert_snapshot(&report.to_snapshot()) {
            Ok(_) => {
                self.summary.snapshots += 1;
                info!(message_count = report.message_count, "performance snapshot stored");
                true
            }
            Err(e) => {
                error!(error = %e, "failed to store performance snapshot");
                false
            }
        }
    }

    fn maybe_report(&mut self, now: f64) -> Option<StatsReport> {
        let last = self.last_report.unwrap_or(now);
        if now - last < self.config.report_interval().as_secs_f64() {
            return None;
        }
        let report = self.stats(now)?;
        self.last_report = Some(now);
        log_report("performance statistics", &report);
        Some(report)
    }
}

fn log_report(what: &str, report: &StatsReport) {
    info!(
        messages = report.message_count,
        avg_latency_ms = format_args!("{:.2}", report.latency.avg),
        min_latency_ms = format_args!("{:.2}", report.latency.min),
        max_latency_ms = format_args!("{:.2}", report.latency.max),
        p95_latency_ms = format_args!("{:.2}", report.latency.p95),
        throughput = format_args!("{:.2}", report.throughput),
        "{what}"
    );
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    fn payload(message_id: u64, send_time: f64) -> Vec<u8> {
        format!(
            r#"{{"timestamp": {send_time}, "device_id": "raspi", "message_id": {message_id},
                "send_time": {send_time}, "readings": {{"angle_0": 100.0, "angle_90": 50.0}}}}"#
        )
        .into_bytes()
    }

    fn committed_rows(path: &std::path::Path) -> i64 {
        let conn = Connection::open(path).unwrap();
        conn.query_row("SELECT COUNT(*) FROM sensor_data", [], |r| r.get(0))
            .unwrap()
    }

    fn in_memory(config: RecorderConfig) -> Recorder {
        Recorder::new(ScanStore::open_in_memory().unwrap(), config)
    }

    #[test]
    fn latency_is_receive_minus_send() {
        let mut rec = in_memory(RecorderConfig::default());
        let handled = rec.handle(&payload(1, 100.0), 100.25).unwrap();
        assert!((handled.latency_ms.unwrap() - 250.0).abs() < 1e-6);
    }

    #[test]
    fn decode_failure_leaves_counters_untouched() {
        let mut rec = in_memory(RecorderConfig::default());
        let err = rec.handle(b"{not json", 1.0).unwrap_err();
        assert!(matches!(err, ScanError::Decode(_)));
        assert_eq!(rec.message_count(), 0);
        let summary = rec.finish(2.0).unwrap();
        assert_eq!(summary.decode_failures, 1);
        assert_eq!(summary.messages, 0);
        assert!(summary.final_report.is_none());
    }

    #[test]
    fn commits_every_batch_and_flushes_remainder() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("sensor_data.db");
        let mut rec = Recorder::new(ScanStore::open(&path).unwrap(), RecorderConfig::default());

        let mut commit_points = Vec::new();
        for i in 1..=250u64 {
            let handled = rec.handle(&payload(i, i as f64), i as f64 + 0.01).unwrap();
            if handled.committed {
                commit_points.push(i);
            }
            if i == 150 {
                assert_eq!(committed_rows(&path), 100);
            }
        }
        assert_eq!(commit_points, vec![100, 200]);
        assert_eq!(committed_rows(&path), 200);

        let summary = rec.finish(251.0).unwrap();
        assert_eq!(summary.commits, 3);
        assert_eq!(summary.messages, 250);
        assert_eq!(committed_rows(&path), 250);
    }

    #[test]
    fn snapshot_every_n_messages() {
        let mut rec = in_memory(RecorderConfig {
            snapshot_every: 10,
            ..RecorderConfig::default()
        });
        let mut written = 0;
        for i in 1..=25u64 {
            if rec.handle(&payload(i, i as f64), i as f64).unwrap().snapshot_written {
                written += 1;
            }
        }
        assert_eq!(written, 2);
        rec.finish(26.0).unwrap();
        let snaps = rec.store().snapshots().unwrap();
        assert_eq!(snaps.len(), 2);
        assert_eq!(snaps[0].message_count, 10);
        assert_eq!(snaps[1].message_count, 20);
    }

    #[test]
    fn reports_follow_wall_clock_interval() {
        let mut rec = in_memory(RecorderConfig::default());
        rec.mark_stream_start(0.0);
        assert!(rec.handle(&payload(1, 1.0), 1.0).unwrap().report.is_none());
        assert!(rec.handle(&payload(2, 4.0), 4.0).unwrap().report.is_none());
        let report = rec.handle(&payload(3, 5.0), 5.0).unwrap().report.unwrap();
        assert_eq!(report.message_count, 3);
        assert!((report.throughput - 0.6).abs() < 1e-9);
        // Next report needs another full interval.
        assert!(rec.handle(&payload(4, 9.0), 9.0).unwrap().report.is_none());
        assert!(rec.handle(&payload(5, 10.0), 10.0).unwrap().report.is_some());
    }

    #[test]
    fn no_report_without_latency_samples() {
        let mut rec = in_memory(RecorderConfig::default());
        rec.mark_stream_start(0.0);
        let no_send_time = br#"{"timestamp": 1.0, "readings": {"angle_0": 1.0}}"#;
        let handled = rec.handle(no_send_time, 60.0).unwrap();
        assert!(handled.latency_ms.is_none());
        assert!(handled.report.is_none());
    }

    #[test]
    fn persistence_failure_commits_rest_of_batch() {
        let dir = tempfile::tempdir().expect("tmp dir");
        let path = dir.path().join("sensor_data.db");
        let store = ScanStore::open(&path).unwrap();
        Connection::open(&path)
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER reject_six BEFORE INSERT ON sensor_data
                 WHEN NEW.message_id = 6
                 BEGIN SELECT RAISE(ABORT, 'disk says no'); END;",
            )
            .unwrap();
        let mut rec = Recorder::new(store, RecorderConfig::default());

        for i in 1..=5u64 {
            let handled = rec.handle(&payload(i, i as f64), i as f64).unwrap();
            assert!(!handled.committed);
        }
        assert_eq!(committed_rows(&path), 0);

        let err = rec.handle(&payload(6, 6.0), 6.0).unwrap_err();
        assert!(matches!(err, ScanError::Persistence(_)));
        assert_eq!(committed_rows(&path), 5);

        // Ingestion carries on after the failure.
        rec.handle(&payload(7, 7.0), 7.0).unwrap();
        let summary = rec.finish(8.0).unwrap();
        assert_eq!(summary.persistence_failures, 1);
        assert_eq!(summary.messages, 6);
        assert_eq!(summary.commits, 2);
        assert_eq!(committed_rows(&path), 6);
    }
}
