//! Progress reporting.
//!
//! The sidecar emits a structured update at three points per hop (received,
//! processing, finished); the gateway ingests them into its registry and fans
//! them out to status reads and SSE subscribers. Reporting is best-effort by
//! design: a lost update degrades observability, never delivery.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Envelope status as observed from progress updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Unknown,
}

impl EnvelopeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// One progress event for one envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressUpdate {
    pub envelope_id: String,

    /// Actor currently holding the envelope.
    pub current_actor_name: String,

    /// Position of that actor in the route.
    pub index: usize,

    /// Total route length.
    pub route_len: usize,

    /// Derived `index / route_len` percentage, clamped to 100.
    pub progress_percent: u8,

    pub status: EnvelopeStatus,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl ProgressUpdate {
    pub fn new(
        envelope_id: impl Into<String>,
        actor: impl Into<String>,
        index: usize,
        route_len: usize,
        status: EnvelopeStatus,
    ) -> Self {
        Self {
            envelope_id: envelope_id.into(),
            current_actor_name: actor.into(),
            index,
            route_len,
            progress_percent: percent(index, route_len),
            status,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

fn percent(index: usize, route_len: usize) -> u8 {
    if route_len == 0 {
        return 100;
    }
    ((index.min(route_len) * 100) / route_len) as u8
}

/// Destination for progress updates.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    async fn emit(&self, update: ProgressUpdate);
}

/// Discards updates; used when no gateway is configured.
#[derive(Debug, Default)]
pub struct NullProgressSink;

#[async_trait]
impl ProgressSink for NullProgressSink {
    async fn emit(&self, _update: ProgressUpdate) {}
}

/// POSTs updates to the gateway ingest endpoint.
#[derive(Debug, Clone)]
pub struct HttpProgressSink {
    client: reqwest::Client,
    url: String,
}

impl HttpProgressSink {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }
}

#[async_trait]
impl ProgressSink for HttpProgressSink {
    async fn emit(&self, update: ProgressUpdate) {
        let result = self.client.post(&self.url).json(&update).send().await;
        match result {
            Ok(response) if !response.status().is_success() => {
                tracing::warn!(
                    "Progress ingest rejected update for {}: {}",
                    update.envelope_id,
                    response.status()
                );
            }
            Err(e) => {
                tracing::warn!("Progress ingest unreachable: {}", e);
            }
            _ => {}
        }
    }
}

/// Forwards updates to an in-process channel; test seam.
#[derive(Debug)]
pub struct ChannelProgressSink {
    tx: mpsc::UnboundedSender<ProgressUpdate>,
}

impl ChannelProgressSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ProgressUpdate>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ProgressSink for ChannelProgressSink {
    async fn emit(&self, update: ProgressUpdate) {
        let _ = self.tx.send(update);
    }
}

/// Decouples hop processing from sink latency: updates are queued onto a
/// bounded channel and drained by a dedicated emission task. A full queue
/// drops the update with a warning rather than stalling the hop.
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    tx: mpsc::Sender<ProgressUpdate>,
}

impl ProgressReporter {
    const QUEUE_CAPACITY: usize = 256;

    pub fn spawn(sink: std::sync::Arc<dyn ProgressSink>) -> Self {
        let (tx, mut rx) = mpsc::channel::<ProgressUpdate>(Self::QUEUE_CAPACITY);
        tokio::spawn(async move {
            while let Some(update) = rx.recv().await {
                sink.emit(update).await;
            }
        });
        Self { tx }
    }

    pub fn emit(&self, update: ProgressUpdate) {
        if let Err(e) = self.tx.try_send(update) {
            tracing::warn!("Progress queue full, dropping update: {}", e);
        }
    }
}
