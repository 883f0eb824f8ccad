//! `scanvault-types` – shared vocabulary of the ScanVault workspace.
//!
//! Holds the inbound message contract, the persisted scan model, the
//! performance snapshot record, the startup [`RetryPolicy`] and the error
//! taxonomy every other crate converts into.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;

// ─────────────────────────────────────────────────────────────────────────────
// Message contract
// ─────────────────────────────────────────────────────────────────────────────

/// A decoded sensor message as delivered by the transport collaborator.
///
/// ```json
/// {"timestamp": 1700000000.1, "device_id": "raspi_lidar", "message_id": 7,
///  "send_time": 1700000000.12, "readings": {"angle_0": 100.0, "angle_90": 50.0}}
/// ```
///
/// Every field except `readings` values is optional on the wire; see
/// [`SensorMessage::into_scan`] for the defaults applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorMessage {
    #[serde(default)]
    pub timestamp: Option<f64>,
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<i64>,
    /// Sender wall-clock time just before publishing (seconds since epoch).
    #[serde(default)]
    pub send_time: Option<f64>,
    /// `angle_<deg>` → distance. An ordered map: a duplicate key later in the
    /// same payload overwrites the earlier one (keep-last).
    #[serde(default)]
    pub readings: BTreeMap<String, f64>,
}

impl SensorMessage {
    /// Decode a raw payload.
    ///
    /// Returns [`ScanError::Decode`] for anything that is not a JSON object
    /// matching the contract.
    pub fn decode(payload: &[u8]) -> Result<Self, ScanError> {
        serde_json::from_slice(payload).map_err(|e| ScanError::Decode(e.to_string()))
    }

    /// Latency in milliseconds, present only when the sender stamped `send_time`.
    pub fn latency_ms(&self, receive_time: f64) -> Option<f64> {
        self.send_time.map(|sent| (receive_time - sent) * 1000.0)
    }

    /// Convert into the persisted [`Scan`] model.
    ///
    /// Defaults: missing `timestamp` → `receive_time`, missing `message_id`
    /// → `-1`, missing `device_id` → `"unknown"`.
    pub fn into_scan(self, receive_time: f64) -> Scan {
        let latency_ms = self.latency_ms(receive_time);
        Scan {
            id: None,
            timestamp: self.timestamp.unwrap_or(receive_time),
            receive_time,
            message_id: self.message_id.unwrap_or(-1),
            device_id: self.device_id.unwrap_or_else(|| "unknown".to_string()),
            latency_ms,
            readings: self
                .readings
                .into_iter()
                .map(|(angle_label, distance)| Reading { angle_label, distance })
                .collect(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Persisted model
// ─────────────────────────────────────────────────────────────────────────────

/// One complete set of angle/distance readings captured at one sensor time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scan {
    /// Row id in `sensor_data`; `None` until persisted.
    pub id: Option<i64>,
    /// Sender-assigned scan time (seconds since epoch).
    pub timestamp: f64,
    /// Receiver wall-clock time the message arrived.
    pub receive_time: f64,
    pub message_id: i64,
    pub device_id: String,
    /// `None` when the sender did not supply a `send_time`.
    pub latency_ms: Option<f64>,
    pub readings: Vec<Reading>,
}

/// A single (angle, distance) pair within a scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Label of the form `angle_<integer-degrees>`.
    pub angle_label: String,
    /// Non-negative distance in sensor units.
    pub distance: f64,
}

impl Reading {
    pub fn new(angle_label: impl Into<String>, distance: f64) -> Self {
        Self {
            angle_label: angle_label.into(),
            distance,
        }
    }
}

/// Periodic throughput/latency snapshot, appended to `performance_stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSnapshot {
    pub timestamp: f64,
    /// Cumulative number of handled messages at snapshot time.
    pub message_count: u64,
    pub avg_latency: f64,
    pub min_latency: f64,
    pub max_latency: f64,
    pub p95_latency: f64,
    /// Messages per second since the stream started.
    pub throughput: f64,
}

/// Current wall-clock time as fractional seconds since the Unix epoch.
pub fn now_epoch_secs() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

// ─────────────────────────────────────────────────────────────────────────────
// RetryPolicy
// ─────────────────────────────────────────────────────────────────────────────

/// Bounded exponential backoff used for startup connections (store and
/// transport). After `max_attempts` failures the caller gives up with
/// [`ScanError::Connection`].
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that tries exactly once.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1) as i32;
        let factor = self.multiplier.max(1.0).powi(exp);
        if factor * self.initial_delay.as_secs_f64() >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        self.initial_delay.mul_f64(factor)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Error taxonomy
// ─────────────────────────────────────────────────────────────────────────────

/// Errors shared across ingestion, storage and reconstruction.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ScanError {
    /// Inbound payload could not be decoded; the message is dropped.
    #[error("Decode Error: {0}")]
    Decode(String),

    /// A store write failed; ingestion continues.
    #[error("Persistence Error: {0}")]
    Persistence(String),

    /// A stage precondition was not met.
    #[error("Insufficient data for {stage}: need at least {needed}, have {got}")]
    InsufficientData {
        stage: &'static str,
        needed: usize,
        got: usize,
    },

    /// A startup connection could not be established within the retry budget.
    #[error("Connection to {target} failed after {attempts} attempt(s): {reason}")]
    Connection {
        target: String,
        attempts: u32,
        reason: String,
    },
}
