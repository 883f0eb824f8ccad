//! Bounded latency history.
//!
//! Count, sum, min and max are tracked exactly over the whole stream. The
//! 95th percentile is computed over the most recent `capacity` samples only,
//! which keeps memory constant on long-running receivers.

use std::collections::VecDeque;

/// Default number of samples kept for the percentile.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Aggregates over the latency samples seen so far.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    /// Nearest-rank p95 over the retained window.
    pub p95: f64,
}

#[derive(Debug, Clone)]
pub struct LatencyWindow {
    capacity: usize,
    recent: VecDeque<f64>,
    count: u64,
    sum: f64,
    min: f64,
    max: f64,
}

impl Default for LatencyWindow {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl LatencyWindow {
    /// A window keeping at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            recent: VecDeque::with_capacity(capacity.min(DEFAULT_CAPACITY)),
            count: 0,
            sum: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }

    pub fn push(&mut self, latency_ms: f64) {
        self.count += 1;
        self.sum += latency_ms;
        self.min = self.min.min(latency_ms);
        self.max = self.max.max(latency_ms);
        if self.recent.len() == self.capacity {
            self.recent.pop_front();
        }
        self.recent.push_back(latency_ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Samples currently retained for the percentile.
    pub fn retained(&self) -> usize {
        self.recent.len()
    }

    /// `sorted[floor(0.95 · n)]` over the retained samples.
    pub fn p95(&self) -> Option<f64> {
        if self.recent.is_empty() {
            return None;
        }
        let mut sorted: Vec<f64> = self.recent.iter().copied().collect();
        sorted.sort_by(f64::total_cmp);
        let rank = ((sorted.len() as f64) * 0.95).floor() as usize;
        Some(sorted[rank.min(sorted.len() - 1)])
    }

    /// Stream-wide aggregates, or `None` before the first sample.
    pub fn stats(&self) -> Option<LatencyStats> {
        let p95 = self.p95()?;
        Some(LatencyStats {
            count: self.count,
            avg: self.sum / self.count as f64,
            min: self.min,
            max: self.max,
            p95,
        })
    }
}
