//! Single-consumer ingestion worker.
//!
//! Transports forward [`InboundMessage`] values into a bounded channel; the
//! [`IngestWorker`] drains it on a blocking thread and feeds the
//! [`Recorder`] strictly in arrival order. When writes fall behind the
//! channel fills up and [`pump`] awaits on `send`, pushing back on the
//! transport instead of buffering without bound.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use scanvault_types::now_epoch_secs;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::IngestError;
use crate::recorder::{Recorder, RecorderSummary};
use crate::source::InboundMessage;

/// Default channel capacity between transport and recorder.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

const SHUTDOWN_POLL: Duration = Duration::from_millis(250);

/// Owns the recorder thread and the sending half of its channel.
pub struct IngestWorker {
    tx: mpsc::Sender<InboundMessage>,
    handle: JoinHandle<Result<RecorderSummary, IngestError>>,
}

impl IngestWorker {
    /// Move `recorder` onto a blocking thread fed by a channel of
    /// `capacity` messages.
    pub fn spawn(mut recorder: Recorder, capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<InboundMessage>(capacity.max(1));
        let handle = tokio::task::spawn_blocking(move || {
            while let Some(msg) = rx.blocking_recv() {
                // Failures are logged and counted by the recorder.
                let _ = recorder.handle(&msg.payload, msg.receive_time);
            }
            debug!("ingest channel closed; finishing recorder");
            Ok(recorder.finish(now_epoch_secs())?)
        });
        Self { tx, handle }
    }

    /// A handle transports use to submit messages.
    pub fn sender(&self) -> mpsc::Sender<InboundMessage> {
        self.tx.clone()
    }

    /// Close the channel, let the recorder drain it, and return its summary.
    ///
    /// Every other sender obtained from [`sender`][Self::sender] must have
    /// been dropped for this to complete.
    pub async fn finish(self) -> Result<RecorderSummary, IngestError> {
        drop(self.tx);
        self.handle
            .await
            .map_err(|e| IngestError::Worker(e.to_string()))?
    }
}

/// Forward `stream` into `tx` until the stream ends, the receiver goes away,
/// or `shutdown` is raised. Returns the number of messages forwarded.
pub async fn pump(
    mut stream: BoxStream<'static, InboundMessage>,
    tx: &mpsc::Sender<InboundMessage>,
    shutdown: Arc<AtomicBool>,
) -> u64 {
    let mut forwarded = 0u64;
    loop {
        if shutdown.load(Ordering::SeqCst) {
            info!(forwarded, "shutdown requested; stopping intake");
            break;
        }
        let next = match tokio::time::timeout(SHUTDOWN_POLL, stream.next()).await {
            Ok(next) => next,
            Err(_) => continue,
        };
        let Some(msg) = next else {
            info!(forwarded, "source stream ended");
            break;
        };
        if tx.send(msg).await.is_err() {
            warn!("ingest worker stopped; dropping remaining input");
            break;
        }
        forwarded += 1;
    }
    forwarded
}
