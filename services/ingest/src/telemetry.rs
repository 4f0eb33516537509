//! Stream consumption metrics sinks.

use std::sync::atomic::{AtomicU64, Ordering};

/// Destination for per-session consumption metrics
pub trait MetricsSink: Send + Sync {
    /// Items extracted from one received chunk
    fn items_received(&self, criteria: &str, count: u64);

    /// Outcome of one flush to storage
    fn batch_flushed(&self, criteria: &str, inserted: u64, duplicates: u64);

    fn flush_failed(&self, criteria: &str);

    fn reconnect(&self, criteria: &str, attempt: u32);

    fn session_terminated(&self, criteria: &str);
}

/// Sink publishing through the `metrics` facade to the Prometheus exporter
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusMetricsSink;

impl MetricsSink for PrometheusMetricsSink {
    fn items_received(&self, criteria: &str, count: u64) {
        metrics::counter!("ingest.tweets.received", "criteria" => criteria.to_string())
            .increment(count);
    }

    fn batch_flushed(&self, criteria: &str, inserted: u64, duplicates: u64) {
        metrics::counter!("ingest.batches.flushed", "criteria" => criteria.to_string())
            .increment(1);
        metrics::counter!("ingest.tweets.stored", "criteria" => criteria.to_string())
            .increment(inserted);
        metrics::counter!("ingest.tweets.duplicate", "criteria" => criteria.to_string())
            .increment(duplicates);
    }

    fn flush_failed(&self, criteria: &str) {
        metrics::counter!("ingest.batches.failed", "criteria" => criteria.to_string())
            .increment(1);
    }

    fn reconnect(&self, criteria: &str, attempt: u32) {
        metrics::counter!("ingest.stream.reconnects", "criteria" => criteria.to_string())
            .increment(1);
        metrics::gauge!("ingest.stream.reconnect_attempt", "criteria" => criteria.to_string())
            .set(attempt as f64);
    }

    fn session_terminated(&self, criteria: &str) {
        metrics::counter!("ingest.sessions.terminated", "criteria" => criteria.to_string())
            .increment(1);
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetricsSink;

impl MetricsSink for NoopMetricsSink {
    fn items_received(&self, _criteria: &str, _count: u64) {}
    fn batch_flushed(&self, _criteria: &str, _inserted: u64, _duplicates: u64) {}
    fn flush_failed(&self, _criteria: &str) {}
    fn reconnect(&self, _criteria: &str, _attempt: u32) {}
    fn session_terminated(&self, _criteria: &str) {}
}

/// Sink counting calls in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct CountingMetricsSink {
    pub received: AtomicU64,
    pub stored: AtomicU64,
    pub flush_failures: AtomicU64,
    pub reconnects: AtomicU64,
    pub terminations: AtomicU64,
}

impl MetricsSink for CountingMetricsSink {
    fn items_received(&self, _criteria: &str, count: u64) {
        self.received.fetch_add(count, Ordering::Relaxed);
    }

    fn batch_flushed(&self, _criteria: &str, inserted: u64, _duplicates: u64) {
        self.stored.fetch_add(inserted, Ordering::Relaxed);
    }

    fn flush_failed(&self, _criteria: &str) {
        self.flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    fn reconnect(&self, _criteria: &str, _attempt: u32) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    fn session_terminated(&self, _criteria: &str) {
        self.terminations.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counting_sink() {
        let sink = CountingMetricsSink::default();
        sink.items_received("rust", 25);
        sink.items_received("rust", 5);
        sink.batch_flushed("rust", 20, 10);
        sink.reconnect("rust", 1);

        assert_eq!(sink.received.load(Ordering::Relaxed), 30);
        assert_eq!(sink.stored.load(Ordering::Relaxed), 20);
        assert_eq!(sink.reconnects.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn test_prometheus_sink_without_recorder() {
        // No recorder installed: calls must be harmless
        let sink = PrometheusMetricsSink;
        sink.items_received("rust", 3);
        sink.session_terminated("rust");
    }
}
