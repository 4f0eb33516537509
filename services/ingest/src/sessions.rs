//! Registry of running stream sessions, one per criteria.

use crate::stream_consumer::{SessionStatus, StreamConsumer, StreamRequest, StreamSession};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Result of a start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Summary of one session for the API
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub criteria: String,
    pub partition: String,
    pub started_at: DateTime<Utc>,
    pub request: StreamRequest,
    #[serde(flatten)]
    pub status: SessionStatus,
}

struct SessionEntry {
    id: u64,
    partition: String,
    started_at: DateTime<Utc>,
    request: StreamRequest,
    status: Arc<RwLock<SessionStatus>>,
    cancel: CancellationToken,
}

/// Spawns sessions and keeps them addressable by criteria
pub struct SessionRegistry {
    consumer: Arc<StreamConsumer>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    shutdown: CancellationToken,
    next_id: AtomicU64,
}

impl SessionRegistry {
    pub fn new(consumer: Arc<StreamConsumer>) -> Self {
        Self {
            consumer,
            sessions: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Start consuming `criteria` in the background unless already running
    pub fn start(self: &Arc<Self>, criteria: &str, request: StreamRequest) -> StartOutcome {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(criteria) {
            return StartOutcome::AlreadyRunning;
        }

        let session = StreamSession::new(criteria, self.consumer.provider(), request.clone());
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let cancel = self.shutdown.child_token();

        sessions.insert(
            criteria.to_string(),
            SessionEntry {
                id,
                partition: session.partition().to_string(),
                started_at: Utc::now(),
                request,
                status: session.status_handle(),
                cancel: cancel.clone(),
            },
        );
        drop(sessions);

        let registry = Arc::clone(self);
        let criteria = criteria.to_string();
        let handle = tokio::spawn(async move {
            let outcome = registry.consumer.run(session, cancel).await;
            info!(criteria = %criteria, outcome = ?outcome, "Stream session finished");
            registry.remove_if_current(&criteria, id);
        });

        let mut tasks = self.tasks.lock();
        tasks.retain(|task| !task.is_finished());
        tasks.push(handle);

        StartOutcome::Started
    }

    /// Cancel the session for `criteria`. Returns `false` if none was running.
    pub fn stop(&self, criteria: &str) -> bool {
        match self.sessions.write().remove(criteria) {
            Some(entry) => {
                entry.cancel.cancel();
                info!(criteria = %criteria, "Stream session stop requested");
                true
            }
            None => false,
        }
    }

    /// Snapshot of every running session, ordered by criteria
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> = self
            .sessions
            .read()
            .iter()
            .map(|(criteria, entry)| SessionInfo {
                criteria: criteria.clone(),
                partition: entry.partition.clone(),
                started_at: entry.started_at,
                request: entry.request.clone(),
                status: entry.status.read().clone(),
            })
            .collect();
        sessions.sort_by(|a, b| a.criteria.cmp(&b.criteria));
        sessions
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// Cancel all sessions and wait for them to drain
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let tasks: Vec<JoinHandle<()>> = std::mem::take(&mut *self.tasks.lock());
        info!(sessions = tasks.len(), "Waiting for stream sessions to stop");

        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                warn!(error = %e, "Stream session task failed");
            }
        }
        self.sessions.write().clear();
    }

    fn remove_if_current(&self, criteria: &str, id: u64) {
        let mut sessions = self.sessions.write();
        if sessions.get(criteria).is_some_and(|entry| entry.id == id) {
            sessions.remove(criteria);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::TwitterAdapter;
    use crate::stream_consumer::{
        BackoffPolicy, ChunkStream, ConnectionError, ConsumerSettings, SessionState, StreamSource,
    };
    use crate::telemetry::NoopMetricsSink;
    use async_trait::async_trait;
    use futures::StreamExt;
    use std::time::Duration;
    use tweet_storage::{BatchWriter, MemoryKeyValueStore, MonotonicIdGenerator, WriterConfig};

    /// Connects and then never sends anything
    struct SilentSource;

    #[async_trait]
    impl StreamSource for SilentSource {
        async fn open(&self, _criteria: &str, _request: &StreamRequest) -> Result<ChunkStream, ConnectionError> {
            Ok(futures::stream::pending().boxed())
        }
    }

    /// Refuses every connection
    struct RefusingSource;

    #[async_trait]
    impl StreamSource for RefusingSource {
        async fn open(&self, _criteria: &str, _request: &StreamRequest) -> Result<ChunkStream, ConnectionError> {
            Err(ConnectionError::Connect("refused".to_string()))
        }
    }

    fn registry(source: Arc<dyn StreamSource>) -> Arc<SessionRegistry> {
        let writer = BatchWriter::new(
            Arc::new(MemoryKeyValueStore::new()),
            Arc::new(MonotonicIdGenerator::new()),
            &WriterConfig::default(),
        );
        let settings = ConsumerSettings {
            batch_size: 25,
            max_pending_items: 100,
            max_buffer_bytes: 1024,
            idle_timeout: Duration::from_secs(60),
            backoff: BackoffPolicy {
                base_delay: Duration::ZERO,
                max_jitter: Duration::ZERO,
                max_attempts: 0,
            },
        };
        let consumer = StreamConsumer::new(
            source,
            Arc::new(TwitterAdapter),
            Arc::new(writer),
            Arc::new(NoopMetricsSink),
            settings,
        );
        Arc::new(SessionRegistry::new(Arc::new(consumer)))
    }

    #[tokio::test]
    async fn test_one_session_per_criteria() {
        let registry = registry(Arc::new(SilentSource));

        assert_eq!(registry.start("rust", StreamRequest::default()), StartOutcome::Started);
        assert_eq!(registry.start("rust", StreamRequest::default()), StartOutcome::AlreadyRunning);
        assert_eq!(registry.start("go", StreamRequest::default()), StartOutcome::Started);

        let criteria: Vec<_> = registry.list().into_iter().map(|s| s.criteria).collect();
        assert_eq!(criteria, vec!["go", "rust"]);

        registry.shutdown().await;
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_stop_session() {
        let registry = registry(Arc::new(SilentSource));
        registry.start("rust", StreamRequest::default());

        assert!(registry.stop("rust"));
        assert!(!registry.stop("rust"));
        assert!(registry.is_empty());

        // A stopped criteria can be started again
        assert_eq!(registry.start("rust", StreamRequest::default()), StartOutcome::Started);
        registry.shutdown().await;
    }

    #[tokio::test]
    async fn test_terminated_session_is_removed() {
        let registry = registry(Arc::new(RefusingSource));
        registry.start("rust", StreamRequest::default());

        for _ in 0..100 {
            if registry.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_list_reports_live_state() {
        let registry = registry(Arc::new(SilentSource));
        registry.start(
            "rust",
            StreamRequest {
                limit: Some(5),
                ..StreamRequest::default()
            },
        );

        let mut state = SessionState::Connecting;
        for _ in 0..100 {
            state = registry.list()[0].status.state;
            if state == SessionState::Streaming {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let info = &registry.list()[0];
        assert_eq!(state, SessionState::Streaming);
        assert_eq!(info.partition, "twitter#rust");
        assert_eq!(info.request.limit, Some(5));

        registry.shutdown().await;
    }
}
