//! Key-value store seam shared by the ingestion and archival pipelines.
//!
//! Two tables are modeled:
//!
//! - item rows, keyed by `(partition, sort_id)` and ordered by `sort_id`
//! - partition counters, keyed by `partition`, mutated only by atomic adds
//!
//! Implementations: [`crate::dynamo::DynamoKeyValueStore`] and
//! [`crate::memory::MemoryKeyValueStore`].

use crate::error::StoreError;
use crate::model::{ItemKey, PartitionCount, PartitionKey, PutOutcome, StoredItem};
use async_trait::async_trait;
use std::collections::BTreeMap;

/// Maximum number of items accepted by a single put or delete call
pub const MAX_BATCH_ITEMS: usize = 25;

/// Opaque continuation token returned by paginated reads
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PageToken(BTreeMap<String, String>);

impl PageToken {
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, attribute: &str) -> Option<&str> {
        self.0.get(attribute).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.0.iter()
    }
}

/// One page of a paginated read
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Present when more results may follow
    pub next: Option<PageToken>,
}

impl<T> Page<T> {
    pub fn last(items: Vec<T>) -> Self {
        Self { items, next: None }
    }
}

#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Insert each item unless its dedup key already exists.
    ///
    /// At most [`MAX_BATCH_ITEMS`] items. Returns one outcome per input item,
    /// in input order.
    async fn put_items_if_absent(
        &self,
        items: &[StoredItem],
    ) -> Result<Vec<PutOutcome>, StoreError>;

    /// Rows of a partition in ascending sort key order
    async fn query_partition(
        &self,
        partition: &PartitionKey,
        limit: usize,
        start: Option<PageToken>,
    ) -> Result<Page<StoredItem>, StoreError>;

    /// Atomically add `delta` (may be negative) to the partition counter,
    /// creating it at `delta` if absent
    async fn add_to_count(&self, partition: &PartitionKey, delta: i64) -> Result<(), StoreError>;

    /// Delete rows by primary key, at most [`MAX_BATCH_ITEMS`] keys
    async fn delete_items(&self, keys: &[ItemKey]) -> Result<(), StoreError>;

    /// Counters with `item_count > threshold`. Pages may be empty while a
    /// token is still returned.
    async fn scan_counts_above(
        &self,
        threshold: i64,
        start: Option<PageToken>,
    ) -> Result<Page<PartitionCount>, StoreError>;
}

pub(crate) fn check_batch_size(size: usize) -> Result<(), StoreError> {
    if size > MAX_BATCH_ITEMS {
        return Err(StoreError::BatchTooLarge {
            size,
            limit: MAX_BATCH_ITEMS,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_token_lookup() {
        let token = PageToken::from_pairs([("ID", "01HQ"), ("PROVIDER#CRITERIA", "twitter#a")]);
        assert_eq!(token.get("ID"), Some("01HQ"));
        assert_eq!(token.get("missing"), None);
        assert_eq!(token.iter().count(), 2);
    }

    #[test]
    fn test_batch_limit() {
        assert!(check_batch_size(MAX_BATCH_ITEMS).is_ok());
        assert!(matches!(
            check_batch_size(MAX_BATCH_ITEMS + 1),
            Err(StoreError::BatchTooLarge { size: 26, limit: 25 })
        ));
    }
}
