//! Transport adapters.
//!
//! The recorder never speaks to a broker or socket directly. A
//! [`ScanSource`] connects to the outside world and yields a stream of
//! [`InboundMessage`] values, each carrying one raw payload and the moment
//! it arrived.
//!
//! - [`WebSocketSource`] – one payload per text or binary frame, with a
//!   bounded connect retry.
//! - [`LineSource`] – newline-delimited payloads from any `AsyncRead`
//!   (stdin, a file, a pipe).

use std::sync::Mutex;

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream};
use futures_util::{StreamExt, future};
use scanvault_types::{RetryPolicy, ScanError, now_epoch_secs};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{info, warn};

use crate::IngestError;

/// One raw payload as delivered by a transport.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    /// Receiver wall-clock time (seconds since epoch).
    pub receive_time: f64,
}

impl InboundMessage {
    pub fn now(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            receive_time: now_epoch_secs(),
        }
    }
}

/// Every transport adapter must implement this trait.
#[async_trait]
pub trait ScanSource: Send + Sync {
    /// Human-readable endpoint description for logs.
    fn describe(&self) -> String;

    /// Connect and return the live message stream. The stream ends when the
    /// remote side closes.
    async fn messages(&self) -> Result<BoxStream<'static, InboundMessage>, IngestError>;
}

// ─────────────────────────────────────────────────────────────────────────────
// WebSocketSource
// ─────────────────────────────────────────────────────────────────────────────

/// Client connection to a WebSocket endpoint publishing sensor messages.
#[derive(Debug, Clone)]
pub struct WebSocketSource {
    url: String,
    topic: String,
    retry: RetryPolicy,
}

impl WebSocketSource {
    /// `url` is a `ws://` or `wss://` endpoint; `topic` labels the messages.
    pub fn new(url: impl Into<String>, topic: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            url: url.into(),
            topic: topic.into(),
            retry,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ScanSource for WebSocketSource {
    fn describe(&self) -> String {
        format!("{} ({})", self.url, self.topic)
    }

    async fn messages(&self) -> Result<BoxStream<'static, InboundMessage>, IngestError> {
        let mut attempt = 0;
        let ws = loop {
            attempt += 1;
            match connect_async(self.url.as_str()).await {
                Ok((ws, _response)) => break ws,
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    warn!(
                        url = %self.url,
                        attempt,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "websocket connect failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    return Err(ScanError::Connection {
                        target: self.url.clone(),
                        attempts: attempt,
                        reason: e.to_string(),
                    }
                    .into());
                }
            }
        };
        info!(url = %self.url, topic = %self.topic, "connected to websocket source");

        let topic = self.topic.clone();
        let stream = ws
            .inspect(|frame| {
                if let Err(e) = frame {
                    warn!(error = %e, "websocket stream error; closing");
                }
            })
            .take_while(|frame| future::ready(matches!(frame, Ok(m) if !m.is_close())))
            .filter_map(move |frame| {
                let topic = topic.clone();
                future::ready(match frame {
                    Ok(Message::Text(text)) => {
                        Some(InboundMessage::now(topic, text.as_str().as_bytes().to_vec()))
                    }
                    Ok(Message::Binary(bytes)) => Some(InboundMessage::now(topic, bytes.to_vec())),
                    _ => None,
                })
            });
        Ok(Box::pin(stream))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// LineSource
// ─────────────────────────────────────────────────────────────────────────────

/// Newline-delimited payloads read from an async reader. Blank lines are
/// skipped. The reader is consumed by the first call to
/// [`messages`][ScanSource::messages].
pub struct LineSource<R> {
    name: String,
    topic: String,
    reader: Mutex<Option<R>>,
}

impl<R> LineSource<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    pub fn new(name: impl Into<String>, topic: impl Into<String>, reader: R) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            reader: Mutex::new(Some(reader)),
        }
    }
}

impl LineSource<tokio::io::Stdin> {
    /// Read payloads from standard input.
    pub fn stdin(topic: impl Into<String>) -> Self {
        Self::new("stdin", topic, tokio::io::stdin())
    }
}

#[async_trait]
impl<R> ScanSource for LineSource<R>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.topic)
    }

    async fn messages(&self) -> Result<BoxStream<'static, InboundMessage>, IngestError> {
        let reader = self
            .reader
            .lock()
            .map_err(|_| IngestError::SourceConsumed(self.name.clone()))?
            .take()
            .ok_or_else(|| IngestError::SourceConsumed(self.name.clone()))?;
        let topic = self.topic.clone();
        let lines = BufReader::new(reader).lines();

        let stream = stream::unfold(lines, |mut lines| async move {
            match lines.next_line().await {
                Ok(Some(line)) => Some((line, lines)),
                Ok(None) => None,
                Err(e) => {
                    warn!(error = %e, "line source read error; closing");
                    None
                }
            }
        })
        .filter(|line| future::ready(!line.trim().is_empty()))
        .map(move |line| InboundMessage::now(topic.clone(), line.into_bytes()));
        Ok(Box::pin(stream))
    }
}
