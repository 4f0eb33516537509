//! Resilient consumer of a provider search stream.
//!
//! One consumer session per criteria moves through
//! `Connecting -> Streaming -> Backoff -> Connecting -> ...` until it runs
//! out of reconnection attempts (`Terminated`) or is stopped (`Cancelled`).
//! Received chunks are cut into JSON-array frames, adapted into items and
//! written through the [`BatchWriter`] once a full batch has accumulated.

use crate::adapter::ProviderAdapter;
use crate::config::UpstreamConfig;
use crate::frame_extractor::FrameBuffer;
use crate::telemetry::MetricsSink;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use futures::{StreamExt, TryStreamExt};
use parking_lot::RwLock;
use rand::Rng;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use tweet_storage::{BatchWriter, PartitionKey, SocialMediaItem};

/// Failures of the upstream connection. Always recovered by reconnecting.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),

    #[error("Failed to connect to stream: {0}")]
    Connect(String),

    #[error("Stream returned HTTP {0}")]
    Status(u16),

    #[error("Stream read failed: {0}")]
    Read(String),

    #[error("No data received for {0:?}")]
    Idle(Duration),

    #[error("{0} items pending after failed flushes")]
    Backlog(usize),

    #[error("{0} bytes buffered without a decodable frame")]
    Framing(usize),
}

/// Optional rate and volume parameters forwarded to the upstream
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tweets: Option<u32>,
}

/// Byte chunks of one open stream
pub type ChunkStream = BoxStream<'static, Result<Bytes, ConnectionError>>;

/// Opens streaming connections for a criteria
#[async_trait]
pub trait StreamSource: Send + Sync {
    async fn open(&self, criteria: &str, request: &StreamRequest) -> Result<ChunkStream, ConnectionError>;
}

/// Streaming HTTP GET against `<base>/tweets/search/stream/{criteria}`
pub struct HttpStreamSource {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpStreamSource {
    pub fn new(config: &UpstreamConfig) -> Result<Self, ConnectionError> {
        let base_url =
            Url::parse(&config.base_url).map_err(|e| ConnectionError::InvalidUrl(e.to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        Ok(Self { client, base_url })
    }

    /// Stream URL for a criteria, with the criteria as one encoded path segment
    pub fn stream_url(&self, criteria: &str) -> Result<Url, ConnectionError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ConnectionError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["tweets", "search", "stream", criteria]);
        Ok(url)
    }
}

#[async_trait]
impl StreamSource for HttpStreamSource {
    async fn open(&self, criteria: &str, request: &StreamRequest) -> Result<ChunkStream, ConnectionError> {
        let url = self.stream_url(criteria)?;
        debug!(url = %url, "Opening stream");

        let response = self
            .client
            .get(url)
            .query(request)
            .send()
            .await
            .map_err(|e| ConnectionError::Connect(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConnectionError::Status(status.as_u16()));
        }

        Ok(response
            .bytes_stream()
            .map_err(|e| ConnectionError::Read(e.to_string()))
            .boxed())
    }
}

/// Exponential reconnection delay with additive jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_jitter: Duration,
    pub max_attempts: u32,
}

impl BackoffPolicy {
    /// `base_delay * 2^attempt`, without jitter
    pub fn exponential(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Delay before reconnection `attempt`: exponential part plus `[0, max_jitter)`
    pub fn delay(&self, attempt: u32) -> Duration {
        self.exponential(attempt).saturating_add(self.jitter())
    }

    fn jitter(&self) -> Duration {
        let max_ms = self.max_jitter.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Tuning of a consumer, derived from [`UpstreamConfig`]
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    pub batch_size: usize,
    pub max_pending_items: usize,
    pub max_buffer_bytes: usize,
    pub idle_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl From<&UpstreamConfig> for ConsumerSettings {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            max_pending_items: config.max_pending_items,
            max_buffer_bytes: config.max_buffer_bytes,
            idle_timeout: config.idle_timeout(),
            backoff: BackoffPolicy {
                base_delay: config.reconnect_base_delay(),
                max_jitter: config.reconnect_max_jitter(),
                max_attempts: config.max_reconnect_attempts,
            },
        }
    }
}

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Connecting,
    Streaming,
    Backoff,
    Terminated,
    Cancelled,
}

/// Counters accumulated over the life of a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub chunks_received: u64,
    pub bytes_received: u64,
    pub items_received: u64,
    pub items_stored: u64,
    pub duplicates: u64,
    pub rejected: u64,
    pub reconnects: u64,
    pub flush_failures: u64,
}

/// Externally visible session status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub attempts: u32,
    pub stats: SessionStats,
}

/// State of one consumption request: buffer, pending batch and counters.
///
/// The frame buffer is replaced on every reconnect; pending items survive
/// until drained.
pub struct StreamSession {
    criteria: String,
    partition: PartitionKey,
    request: StreamRequest,
    buffer: FrameBuffer,
    pending: Vec<SocialMediaItem>,
    attempts: u32,
    status: Arc<RwLock<SessionStatus>>,
}

impl StreamSession {
    pub fn new(criteria: impl Into<String>, provider: &str, request: StreamRequest) -> Self {
        let criteria = criteria.into();
        Self {
            partition: PartitionKey::new(provider, &criteria),
            criteria,
            request,
            buffer: FrameBuffer::new(),
            pending: Vec::new(),
            attempts: 0,
            status: Arc::new(RwLock::new(SessionStatus {
                state: SessionState::Connecting,
                attempts: 0,
                stats: SessionStats::default(),
            })),
        }
    }

    pub fn criteria(&self) -> &str {
        &self.criteria
    }

    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Shared handle to the live status, readable while the session runs
    pub fn status_handle(&self) -> Arc<RwLock<SessionStatus>> {
        self.status.clone()
    }

    fn set_state(&self, state: SessionState) {
        self.status.write().state = state;
    }

    fn set_attempts(&mut self, attempts: u32) {
        self.attempts = attempts;
        self.status.write().attempts = attempts;
    }

    fn record(&self, update: impl FnOnce(&mut SessionStats)) {
        update(&mut self.status.write().stats);
    }
}

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Reconnection attempts exhausted
    Terminated,
    /// Stopped on request
    Cancelled,
}

enum StreamEnd {
    Ended,
    Failed(ConnectionError),
    Cancelled,
}

/// Drives sessions against a stream source
pub struct StreamConsumer {
    source: Arc<dyn StreamSource>,
    adapter: Arc<dyn ProviderAdapter>,
    writer: Arc<BatchWriter>,
    metrics: Arc<dyn MetricsSink>,
    settings: ConsumerSettings,
}

impl StreamConsumer {
    pub fn new(
        source: Arc<dyn StreamSource>,
        adapter: Arc<dyn ProviderAdapter>,
        writer: Arc<BatchWriter>,
        metrics: Arc<dyn MetricsSink>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            source,
            adapter,
            writer,
            metrics,
            settings,
        }
    }

    /// Provider name used for session partitions
    pub fn provider(&self) -> &'static str {
        self.adapter.provider()
    }

    /// Run a session until it terminates or `cancel` fires.
    ///
    /// Failures are logged and recovered through reconnection; nothing is
    /// returned to the caller beyond the final outcome.
    #[instrument(skip_all, fields(criteria = %session.criteria))]
    pub async fn run(&self, mut session: StreamSession, cancel: CancellationToken) -> SessionOutcome {
        info!(partition = %session.partition, "Starting stream session");

        loop {
            session.set_state(SessionState::Connecting);

            let opened = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&mut session).await,
                opened = self.source.open(&session.criteria, &session.request) => opened,
            };

            match opened {
                Ok(chunks) => {
                    session.set_state(SessionState::Streaming);
                    info!(attempts = session.attempts, "Connected to stream");
                    session.set_attempts(0);

                    let end = self.consume(&mut session, chunks, &cancel).await;
                    self.drain(&mut session).await;

                    match end {
                        StreamEnd::Cancelled => return self.cancelled(&mut session).await,
                        StreamEnd::Ended => info!("Stream ended"),
                        StreamEnd::Failed(e) => warn!(error = %e, "Stream failed"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, attempts = session.attempts, "Failed to connect to stream");
                }
            }

            if session.attempts >= self.settings.backoff.max_attempts {
                session.set_state(SessionState::Terminated);
                self.metrics.session_terminated(&session.criteria);
                error!(
                    attempts = session.attempts,
                    "Maximum reconnection attempts exceeded, session terminated"
                );
                return SessionOutcome::Terminated;
            }

            let delay = self.settings.backoff.delay(session.attempts);
            session.set_state(SessionState::Backoff);
            info!(
                attempt = session.attempts + 1,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting after delay"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.cancelled(&mut session).await,
                _ = tokio::time::sleep(delay) => {}
            }

            session.set_attempts(session.attempts + 1);
            session.buffer = FrameBuffer::new();
            session.record(|s| s.reconnects += 1);
            self.metrics.reconnect(&session.criteria, session.attempts);
        }
    }

    async fn consume(
        &self,
        session: &mut StreamSession,
        mut chunks: ChunkStream,
        cancel: &CancellationToken,
    ) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return StreamEnd::Cancelled,
                next = tokio::time::timeout(self.settings.idle_timeout, chunks.next()) => next,
            };

            let chunk = match next {
                Err(_) => return StreamEnd::Failed(ConnectionError::Idle(self.settings.idle_timeout)),
                Ok(None) => return StreamEnd::Ended,
                Ok(Some(Err(e))) => return StreamEnd::Failed(e),
                Ok(Some(Ok(chunk))) => chunk,
            };

            if let Err(e) = self.accept_chunk(session, &chunk) {
                return StreamEnd::Failed(e);
            }

            if session.pending.len() >= self.settings.batch_size && !self.flush(session).await {
                let pending = session.pending.len();
                if pending > self.settings.max_pending_items {
                    return StreamEnd::Failed(ConnectionError::Backlog(pending));
                }
            }
        }
    }

    /// Extract and adapt the records completed by `chunk`. Fails once the
    /// undecoded remainder outgrows `max_buffer_bytes`.
    fn accept_chunk(&self, session: &mut StreamSession, chunk: &Bytes) -> Result<(), ConnectionError> {
        let raw = session.buffer.push(chunk);

        let mut rejected = 0u64;
        let received = raw.len() as u64;
        for record in raw {
            match self.adapter.adapt(record) {
                Ok(item) => session.pending.push(item),
                Err(e) => {
                    rejected += 1;
                    warn!(error = %e, "Skipping malformed record");
                }
            }
        }

        session.record(|s| {
            s.chunks_received += 1;
            s.bytes_received += chunk.len() as u64;
            s.items_received += received;
            s.rejected += rejected;
        });
        if received > 0 {
            self.metrics.items_received(&session.criteria, received);
        }

        let buffered = session.buffer.len();
        if buffered > self.settings.max_buffer_bytes {
            return Err(ConnectionError::Framing(buffered));
        }
        Ok(())
    }

    /// Write all pending items. On failure they stay pending for the next flush.
    async fn flush(&self, session: &mut StreamSession) -> bool {
        match self
            .writer
            .insert(&session.partition, session.pending.clone())
            .await
        {
            Ok(summary) => {
                session.pending.clear();
                session.record(|s| {
                    s.items_stored += summary.inserted as u64;
                    s.duplicates += summary.duplicates as u64;
                    s.rejected += summary.rejected as u64;
                });
                self.metrics.batch_flushed(
                    &session.criteria,
                    summary.inserted as u64,
                    summary.duplicates as u64,
                );
                true
            }
            Err(e) => {
                session.record(|s| s.flush_failures += 1);
                self.metrics.flush_failed(&session.criteria);
                warn!(error = %e, pending = session.pending.len(), "Flush failed, keeping items");
                false
            }
        }
    }

    async fn drain(&self, session: &mut StreamSession) {
        if session.pending.is_empty() {
            return;
        }
        if !self.flush(session).await {
            error!(
                discarded = session.pending.len(),
                "Failed to drain pending items, discarding"
            );
            session.pending.clear();
        }
    }

    async fn cancelled(&self, session: &mut StreamSession) -> SessionOutcome {
        self.drain(session).await;
        session.set_state(SessionState::Cancelled);
        info!("Stream session cancelled");
        SessionOutcome::Cancelled
    }
}
