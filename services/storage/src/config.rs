use aws_config::{BehaviorVersion, SdkConfig};
use serde::Deserialize;
use std::time::Duration;

/// Which key-value store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Dynamodb,
    Memory,
}

/// Key-value store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StorageBackend,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for DynamoDB Local, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Table holding item rows
    #[serde(default = "default_items_table")]
    pub items_table: String,
    /// Table holding per-partition counters
    #[serde(default = "default_counts_table")]
    pub counts_table: String,
    /// Table holding dedup guards for insert-if-absent
    #[serde(default = "default_dedup_table")]
    pub dedup_table: String,
    /// Lifetime of dedup guards in seconds (applied through the table TTL)
    #[serde(default = "default_dedup_ttl_secs")]
    pub dedup_ttl_secs: u64,
    /// Conditional puts in flight per batch call. Peak store requests are
    /// `WriterConfig::max_in_flight * put_concurrency`.
    #[serde(default = "default_put_concurrency")]
    pub put_concurrency: usize,
}

/// Object store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectStoreConfig {
    /// S3 bucket name for archives
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
}

/// Batch writer tuning
#[derive(Debug, Clone, Deserialize)]
pub struct WriterConfig {
    /// Items per store write, capped at the store batch limit
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Chunk writes in flight per insert call
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,
}

// Default value functions
fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_items_table() -> String {
    "SocialMediaTable".to_string()
}

fn default_counts_table() -> String {
    "ItemCountTable".to_string()
}

fn default_dedup_table() -> String {
    "SocialMediaDedupTable".to_string()
}

fn default_dedup_ttl_secs() -> u64 {
    7 * 24 * 3600
}

fn default_put_concurrency() -> usize {
    1
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_chunk_size() -> usize {
    crate::kv_store::MAX_BATCH_ITEMS
}

fn default_max_in_flight() -> usize {
    10
}

impl StorageConfig {
    /// Get dedup guard lifetime as Duration
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            region: default_region(),
            endpoint_url: None,
            items_table: default_items_table(),
            counts_table: default_counts_table(),
            dedup_table: default_dedup_table(),
            dedup_ttl_secs: default_dedup_ttl_secs(),
            put_concurrency: default_put_concurrency(),
        }
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_in_flight: default_max_in_flight(),
        }
    }
}

/// Load shared AWS SDK configuration for a region
pub async fn load_sdk_config(region: &str) -> SdkConfig {
    aws_config::defaults(BehaviorVersion::latest())
        .region(aws_config::Region::new(region.to_string()))
        .load()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let storage = StorageConfig::default();
        assert_eq!(storage.backend, StorageBackend::Dynamodb);
        assert_eq!(storage.counts_table, "ItemCountTable");
        assert_eq!(storage.dedup_ttl(), Duration::from_secs(604_800));
        assert_eq!(storage.put_concurrency, 1);

        let writer = WriterConfig::default();
        assert_eq!(writer.chunk_size, 25);
        assert_eq!(writer.max_in_flight, 10);
    }

    #[test]
    fn test_backend_deserialize() {
        let backend: StorageBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StorageBackend::Memory);
    }
}
