//! In-process store implementations used for local runs and test suites.

use crate::error::{ExportError, StoreError};
use crate::kv_store::{check_batch_size, KeyValueStore, Page, PageToken};
use crate::model::{ItemKey, PartitionCount, PartitionKey, PutOutcome, StoredItem};
use crate::object_store::ObjectStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::time::{Duration, Instant};

const SORT_TOKEN: &str = "ID";
const PARTITION_TOKEN: &str = "PROVIDER#CRITERIA";

#[derive(Debug, Default)]
struct Tables {
    items: BTreeMap<PartitionKey, BTreeMap<String, StoredItem>>,
    /// Dedup key -> guard expiry
    dedup_keys: HashMap<String, Instant>,
    counts: BTreeMap<PartitionKey, i64>,
}

/// Key-value store backed by ordered maps behind a lock.
///
/// Dedup guards expire after the configured TTL like the DynamoDB guard
/// rows. Expired guards are dropped on the next delete call.
#[derive(Debug)]
pub struct MemoryKeyValueStore {
    tables: RwLock<Tables>,
    scan_page_size: usize,
    dedup_ttl: Duration,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::with_scan_page_size(100)
    }

    /// Small scan pages exercise continuation handling in callers
    pub fn with_scan_page_size(scan_page_size: usize) -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            scan_page_size: scan_page_size.max(1),
            dedup_ttl: Duration::from_secs(crate::config::StorageConfig::default().dedup_ttl_secs),
        }
    }

    /// Set the lifetime of dedup guards
    pub fn with_dedup_ttl(mut self, dedup_ttl: Duration) -> Self {
        self.dedup_ttl = dedup_ttl;
        self
    }

    /// Number of dedup guards held, expired ones included until pruned
    pub fn dedup_guard_count(&self) -> usize {
        self.tables.read().dedup_keys.len()
    }

    /// Live row count of a partition
    pub fn row_count(&self, partition: &PartitionKey) -> usize {
        self.tables
            .read()
            .items
            .get(partition)
            .map_or(0, BTreeMap::len)
    }

    /// Current counter value, `None` if never written
    pub fn count(&self, partition: &PartitionKey) -> Option<i64> {
        self.tables.read().counts.get(partition).copied()
    }

    /// All rows of a partition in sort order
    pub fn rows(&self, partition: &PartitionKey) -> Vec<StoredItem> {
        self.tables
            .read()
            .items
            .get(partition)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for MemoryKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn put_items_if_absent(
        &self,
        items: &[StoredItem],
    ) -> Result<Vec<PutOutcome>, StoreError> {
        check_batch_size(items.len())?;

        let now = Instant::now();
        let expires_at = now + self.dedup_ttl;
        let mut tables = self.tables.write();
        let outcomes = items
            .iter()
            .map(|item| {
                let guard = tables.dedup_keys.entry(item.dedup_key()).or_insert(now);
                if *guard > now {
                    return PutOutcome::Duplicate;
                }
                *guard = expires_at;
                tables
                    .items
                    .entry(item.partition.clone())
                    .or_default()
                    .insert(item.sort_id.clone(), item.clone());
                PutOutcome::Inserted
            })
            .collect();

        Ok(outcomes)
    }

    async fn query_partition(
        &self,
        partition: &PartitionKey,
        limit: usize,
        start: Option<PageToken>,
    ) -> Result<Page<StoredItem>, StoreError> {
        let tables = self.tables.read();
        let Some(rows) = tables.items.get(partition) else {
            return Ok(Page::last(Vec::new()));
        };

        let lower = match start.as_ref().and_then(|t| t.get(SORT_TOKEN)) {
            Some(after) => Bound::Excluded(after.to_string()),
            None => Bound::Unbounded,
        };

        let mut range = rows.range((lower, Bound::Unbounded));
        let items: Vec<StoredItem> = range.by_ref().take(limit).map(|(_, v)| v.clone()).collect();

        let next = match (items.last(), range.next()) {
            (Some(last), Some(_)) => Some(PageToken::from_pairs([
                (PARTITION_TOKEN, partition.as_str()),
                (SORT_TOKEN, last.sort_id.as_str()),
            ])),
            _ => None,
        };

        Ok(Page { items, next })
    }

    async fn add_to_count(&self, partition: &PartitionKey, delta: i64) -> Result<(), StoreError> {
        *self
            .tables
            .write()
            .counts
            .entry(partition.clone())
            .or_insert(0) += delta;
        Ok(())
    }

    async fn delete_items(&self, keys: &[ItemKey]) -> Result<(), StoreError> {
        check_batch_size(keys.len())?;

        let now = Instant::now();
        let mut tables = self.tables.write();
        tables.dedup_keys.retain(|_, expires_at| *expires_at > now);
        for key in keys {
            if let Some(rows) = tables.items.get_mut(&key.partition) {
                rows.remove(&key.sort_id);
            }
        }
        Ok(())
    }

    async fn scan_counts_above(
        &self,
        threshold: i64,
        start: Option<PageToken>,
    ) -> Result<Page<PartitionCount>, StoreError> {
        let tables = self.tables.read();

        let lower = match start.as_ref().and_then(|t| t.get(PARTITION_TOKEN)) {
            Some(after) => Bound::Excluded(PartitionKey::from_raw(after)),
            None => Bound::Unbounded,
        };

        // Like a table scan, the page limit applies before the filter
        let mut range = tables.counts.range((lower, Bound::Unbounded));
        let examined: Vec<(&PartitionKey, &i64)> = range.by_ref().take(self.scan_page_size).collect();

        let next = match (examined.last(), range.next()) {
            (Some((last, _)), Some(_)) => {
                Some(PageToken::from_pairs([(PARTITION_TOKEN, last.as_str())]))
            }
            _ => None,
        };

        let items = examined
            .into_iter()
            .filter(|(_, count)| **count > threshold)
            .map(|(partition, count)| PartitionCount {
                partition: partition.clone(),
                item_count: *count,
            })
            .collect();

        Ok(Page { items, next })
    }
}

/// Object written to [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    pub body: Vec<u8>,
    pub content_type: String,
}

/// Object store keeping every written object in memory
#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, StoredObject>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.read().keys().cloned().collect()
    }

    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.read().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), ExportError> {
        self.objects.write().insert(
            key.to_string(),
            StoredObject {
                body,
                content_type: content_type.to_string(),
            },
        );
        Ok(())
    }
}
