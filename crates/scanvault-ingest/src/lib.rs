//! `scanvault-ingest` – the ingestion side of ScanVault.
//!
//! Moves sensor payloads from a transport into the Scan Store without caring
//! what the readings mean.
//!
//! # Modules
//!
//! - [`source`] – the [`ScanSource`] adapter trait with WebSocket and
//!   line-delimited implementations.
//! - [`worker`] – [`IngestWorker`]: bounded channel plus a blocking consumer
//!   thread; [`pump`][worker::pump] forwards a source stream into it.
//! - [`recorder`] – [`Recorder`]: latency, batched writes, statistics and
//!   snapshots.
//! - [`latency`] – [`LatencyWindow`][latency::LatencyWindow].

use scanvault_store::StoreError;
use scanvault_types::ScanError;
use thiserror::Error;

pub mod latency;
pub mod recorder;
pub mod source;
pub mod worker;

pub use recorder::{Recorder, RecorderConfig, RecorderSummary};
pub use source::{InboundMessage, LineSource, ScanSource, WebSocketSource};
pub use worker::IngestWorker;

/// Errors that can arise while wiring up or running ingestion.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error(transparent)]
    Scan(#[from] ScanError),
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
    #[error("Source {0} has already been consumed")]
    SourceConsumed(String),
    #[error("Ingest worker failed: {0}")]
    Worker(String),
}
