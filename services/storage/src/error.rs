//! Storage error types.
//!
//! - `StoreError`: any key-value store failure other than a duplicate-key
//!   rejection, which is reported as `PutOutcome::Duplicate` instead
//! - `ExportError`: object store failure while writing an archive

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store request failed: {0}")]
    Request(String),

    #[error("Batch of {size} exceeds the store limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    #[error("Invalid record in {table}: {message}")]
    InvalidRecord { table: String, message: String },

    #[error("Unprocessed writes remained after {attempts} attempts")]
    Unprocessed { attempts: u32 },

    #[error("Item serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Failed to put object {key}: {message}")]
    Put { key: String, message: String },

    #[error("Multipart upload for {key} returned no upload id")]
    MissingUploadId { key: String },
}
