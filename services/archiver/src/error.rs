use thiserror::Error;
use tweet_storage::{ExportError, StoreError};

/// Failure while reconciling one partition
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Failed to serialize archive: {0}")]
    Serialization(#[from] serde_json::Error),
}
