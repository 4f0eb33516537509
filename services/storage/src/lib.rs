//! Tweet Storage
//!
//! Persistence layer shared by the ingestion service and the archival job.
//! Items collected from social media providers are written into per-search
//! partitions, each with a running item counter; partitions that grow past a
//! threshold are trimmed into an object store.
//!
//! ## Features
//!
//! - **Counted partitions**: every newly inserted row bumps its partition
//!   counter, duplicates never do
//! - **Insert-if-absent**: a provider item is stored at most once per
//!   partition, however often the stream repeats it
//! - **Sortable ids**: ULID sort keys keep rows in ingestion order
//! - **Archive objects**: immutable JSON exports to S3 with sortable keys
//!
//! ## Architecture
//!
//! ```text
//!  Stream consumer            Archival job
//!        │                         │
//!        ▼                         ▼
//! ┌──────────────┐          ┌──────────────┐
//! │ Batch        │          │ Object       │──────▶ S3 archive/
//! │ Writer       │          │ Store        │
//! └──────────────┘          └──────────────┘
//!        │                         ▲
//!        ▼                         │
//! ┌──────────────────────────────────────────┐
//! │ Key-value store (DynamoDB or in-memory)  │
//! │   item rows  ·  partition counters       │
//! └──────────────────────────────────────────┘
//! ```

pub mod batch_writer;
pub mod config;
pub mod dynamo;
pub mod error;
pub mod id_gen;
pub mod kv_store;
pub mod memory;
pub mod model;
pub mod object_store;

pub use batch_writer::{BatchWriter, InsertSummary};
pub use config::{ObjectStoreConfig, StorageBackend, StorageConfig, WriterConfig};
pub use dynamo::DynamoKeyValueStore;
pub use error::{ExportError, StoreError};
pub use id_gen::MonotonicIdGenerator;
pub use kv_store::{KeyValueStore, Page, PageToken, MAX_BATCH_ITEMS};
pub use memory::{MemoryKeyValueStore, MemoryObjectStore};
pub use model::{ItemKey, PartitionCount, PartitionKey, PutOutcome, SocialMediaItem, StoredItem};
pub use object_store::{archive_key, ObjectStore, S3ObjectStore, JSON_CONTENT_TYPE};

#[cfg(any(test, feature = "mocks"))]
pub use kv_store::MockKeyValueStore;
#[cfg(any(test, feature = "mocks"))]
pub use object_store::MockObjectStore;

use std::sync::Arc;
use tracing::warn;

/// Build the configured key-value store
pub async fn connect_store(config: &StorageConfig) -> Arc<dyn KeyValueStore> {
    match config.backend {
        StorageBackend::Dynamodb => Arc::new(DynamoKeyValueStore::new(config).await),
        StorageBackend::Memory => {
            warn!("Using in-memory store, data is lost on exit");
            Arc::new(MemoryKeyValueStore::new().with_dedup_ttl(config.dedup_ttl()))
        }
    }
}
