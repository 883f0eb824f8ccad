//! `scanvault-store` – The Scan Store.
//!
//! Durable persistence for ingested scans on a local SQLite substrate.
//!
//! # Modules
//!
//! - [`scan_store`] – [`ScanStore`]: schema, the batched scan/snapshot
//!   writer and the scan queries used by reconstruction.
//! - [`maintenance`] – summaries, integrity check, `VACUUM`, `ANALYZE` and
//!   age-based pruning.

pub mod maintenance;
pub mod scan_store;

pub use maintenance::{HealthReport, LatencyPercentiles, PruneReport, StoreSummary};
pub use scan_store::{ScanStore, StoreError};
