//! Tweet Ingest Service
//!
//! Consumes provider search streams and stores every received item into its
//! criteria partition. Each `GET /tweets/consume/{criteria}` starts an
//! independent background session that survives upstream failures through
//! bounded exponential backoff.
//!
//! # Architecture
//!
//! ```text
//! Upstream stream -> FrameBuffer -> ProviderAdapter -> BatchWriter -> KeyValueStore
//!                         ^
//!                  StreamConsumer (one session per criteria, SessionRegistry)
//! ```

pub mod adapter;
pub mod api;
pub mod config;
pub mod frame_extractor;
pub mod sessions;
pub mod stream_consumer;
pub mod telemetry;

pub use adapter::{AdapterError, ProviderAdapter, ProviderKind, TwitterAdapter};
pub use config::{ConfigValidationError, IngestConfig};
pub use frame_extractor::{extract, FrameBuffer};
pub use sessions::{SessionInfo, SessionRegistry, StartOutcome};
pub use stream_consumer::{
    BackoffPolicy, ConnectionError, ConsumerSettings, HttpStreamSource, SessionOutcome,
    SessionState, SessionStats, StreamConsumer, StreamRequest, StreamSession, StreamSource,
};
pub use telemetry::{MetricsSink, NoopMetricsSink, PrometheusMetricsSink};

use std::sync::Arc;
use tweet_storage::{BatchWriter, MonotonicIdGenerator};

/// Wire store, writer, source and consumer into a session registry
pub async fn build_registry(
    config: &IngestConfig,
    metrics: Arc<dyn MetricsSink>,
) -> Result<Arc<SessionRegistry>, ConnectionError> {
    let store = tweet_storage::connect_store(&config.storage).await;
    let writer = BatchWriter::new(store, Arc::new(MonotonicIdGenerator::new()), &config.writer);
    let source = HttpStreamSource::new(&config.upstream)?;

    let consumer = StreamConsumer::new(
        Arc::new(source),
        config.upstream.provider.adapter(),
        Arc::new(writer),
        metrics,
        ConsumerSettings::from(&config.upstream),
    );

    Ok(Arc::new(SessionRegistry::new(Arc::new(consumer))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweet_storage::StorageBackend;

    #[tokio::test]
    async fn test_build_registry_with_memory_store() {
        let mut config: IngestConfig = serde_json::from_value(serde_json::json!({
            "upstream": { "base_url": "http://127.0.0.1:9" }
        }))
        .unwrap();
        config.storage.backend = StorageBackend::Memory;

        let registry = build_registry(&config, Arc::new(NoopMetricsSink)).await.unwrap();
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_build_registry_rejects_bad_url() {
        let mut config: IngestConfig = serde_json::from_value(serde_json::json!({
            "upstream": { "base_url": "not a url" }
        }))
        .unwrap();
        config.storage.backend = StorageBackend::Memory;

        assert!(matches!(
            build_registry(&config, Arc::new(NoopMetricsSink)).await,
            Err(ConnectionError::InvalidUrl(_))
        ));
    }
}
