//! Tweet Archiver
//!
//! One-shot job, invoked periodically by an external scheduler, that keeps
//! every criteria partition at or below a configured item count. The oldest
//! overflow rows are exported as one JSON object per partition, deleted from
//! the table, and the partition counter is lowered by the same amount.
//!
//! Re-running the job after a crash is safe: the scan is repeated and only
//! partitions still over the threshold are touched.

pub mod config;
pub mod error;
pub mod executor;
pub mod job;
pub mod scanner;

pub use config::{ArchiveConfig, ArchiverConfig, ConfigValidationError};
pub use error::ArchiveError;
pub use executor::{ArchivalExecutor, ReconcileReport};
pub use job::{ArchivalJob, JobResponse};
pub use scanner::ArchivalScanner;

use std::sync::Arc;
use tracing::warn;
use tweet_storage::{MemoryObjectStore, ObjectStore, S3ObjectStore, StorageBackend};

/// Build the job from configuration
pub async fn build_job(config: &ArchiverConfig) -> ArchivalJob {
    let store = tweet_storage::connect_store(&config.storage).await;

    let objects: Arc<dyn ObjectStore> = match config.storage.backend {
        StorageBackend::Dynamodb => Arc::new(S3ObjectStore::new(&config.object_store).await),
        StorageBackend::Memory => {
            warn!("In-memory storage selected, archives are not persisted");
            Arc::new(MemoryObjectStore::new())
        }
    };

    ArchivalJob::new(
        ArchivalScanner::new(store.clone()),
        ArchivalExecutor::new(
            store,
            objects,
            config.archive.page_size,
            config.archive.key_prefix.clone(),
        ),
        config.archive.threshold,
        config.archive.partition_concurrency,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_job_against_empty_memory_store() {
        let config: ArchiverConfig = serde_json::from_value(serde_json::json!({
            "storage": { "backend": "memory" },
            "object_store": { "bucket": "archives" }
        }))
        .unwrap();

        let response = build_job(&config).await.run().await;

        assert!(response.is_success());
        let body: serde_json::Value = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body["rowsArchived"], 0);
    }
}
