use crate::error::ArchiveError;
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use tweet_storage::{
    archive_key, ItemKey, KeyValueStore, ObjectStore, PartitionKey, StoredItem, JSON_CONTENT_TYPE,
    MAX_BATCH_ITEMS,
};
use uuid::Uuid;

/// What one reconciliation did
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub partition: String,
    pub excess: i64,
    pub rows_archived: usize,
    pub archive_key: Option<String>,
}

/// Moves the oldest rows of a partition into one archive object
pub struct ArchivalExecutor {
    store: Arc<dyn KeyValueStore>,
    objects: Arc<dyn ObjectStore>,
    page_size: usize,
    key_prefix: String,
}

impl ArchivalExecutor {
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        objects: Arc<dyn ObjectStore>,
        page_size: usize,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            store,
            objects,
            page_size: page_size.max(1),
            key_prefix: key_prefix.into(),
        }
    }

    /// Archive the `excess` oldest rows of `partition` and lower its count.
    ///
    /// Rows are deleted only after the archive object is acknowledged. The
    /// count drops by `excess` even if fewer rows were found, which settles a
    /// counter that drifted above the live row count.
    #[instrument(skip(self), fields(partition = %partition))]
    pub async fn reconcile(&self, partition: &PartitionKey, excess: i64) -> Result<ReconcileReport, ArchiveError> {
        let mut report = ReconcileReport {
            partition: partition.to_string(),
            excess,
            rows_archived: 0,
            archive_key: None,
        };
        if excess <= 0 {
            return Ok(report);
        }

        let rows = self.oldest_rows(partition, excess as usize).await?;
        if rows.len() < excess as usize {
            warn!(
                excess = excess,
                found = rows.len(),
                "Partition holds fewer rows than its count implies"
            );
        }

        if !rows.is_empty() {
            let key = archive_key(
                &self.key_prefix,
                partition.as_str(),
                Utc::now(),
                &Uuid::new_v4().to_string(),
            );
            let body = serde_json::to_vec(&rows)?;
            self.objects.put_object(&key, body, JSON_CONTENT_TYPE).await?;
            info!(key = %key, rows = rows.len(), "Archived rows");

            let keys: Vec<ItemKey> = rows.iter().map(StoredItem::key).collect();
            for chunk in keys.chunks(MAX_BATCH_ITEMS) {
                self.store.delete_items(chunk).await?;
            }

            report.rows_archived = rows.len();
            report.archive_key = Some(key);
        }

        self.store.add_to_count(partition, -excess).await?;

        metrics::counter!("archiver.rows.archived").increment(report.rows_archived as u64);
        metrics::counter!("archiver.partitions.reconciled").increment(1);
        info!(
            excess = excess,
            rows_archived = report.rows_archived,
            "Partition reconciled"
        );

        Ok(report)
    }

    /// Up to `limit` rows in ascending sort order
    async fn oldest_rows(&self, partition: &PartitionKey, limit: usize) -> Result<Vec<StoredItem>, ArchiveError> {
        let mut rows = Vec::with_capacity(self.page_size.min(limit));
        let mut token = None;

        loop {
            let page_limit = self.page_size.min(limit - rows.len());
            let page = self.store.query_partition(partition, page_limit, token).await?;
            rows.extend(page.items);
            rows.truncate(limit);

            match page.next {
                Some(next) if rows.len() < limit => token = Some(next),
                _ => return Ok(rows),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tweet_storage::{
        ExportError, MemoryKeyValueStore, MemoryObjectStore, MockKeyValueStore, MockObjectStore,
        MonotonicIdGenerator, Page, SocialMediaItem, StoreError,
    };

    fn rows(partition: &PartitionKey, count: usize) -> Vec<StoredItem> {
        let ids = MonotonicIdGenerator::new();
        (0..count)
            .map(|i| StoredItem {
                partition: partition.clone(),
                sort_id: ids.next_string(),
                inserted_at: Utc::now(),
                data: SocialMediaItem {
                    provider: "twitter".to_string(),
                    id: format!("tweet-{i}"),
                    text: format!("text {i}"),
                    author_id: "author".to_string(),
                    created_at: "2024-01-01T00:00:00Z".to_string(),
                    extra_data: Default::default(),
                },
            })
            .collect()
    }

    async fn seeded_store(partition: &PartitionKey, count: usize) -> (Arc<MemoryKeyValueStore>, Vec<StoredItem>) {
        let store = Arc::new(MemoryKeyValueStore::new());
        let rows = rows(partition, count);
        for chunk in rows.chunks(MAX_BATCH_ITEMS) {
            store.put_items_if_absent(chunk).await.unwrap();
        }
        store.add_to_count(partition, count as i64).await.unwrap();
        (store, rows)
    }

    #[tokio::test]
    async fn test_oldest_rows_are_archived_then_deleted() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let (store, all_rows) = seeded_store(&partition, 137).await;
        let objects = Arc::new(MemoryObjectStore::new());

        let executor = ArchivalExecutor::new(store.clone(), objects.clone(), 10, "archive");
        let report = executor.reconcile(&partition, 37).await.unwrap();

        assert_eq!(report.rows_archived, 37);
        assert_eq!(store.count(&partition), Some(100));
        assert_eq!(store.row_count(&partition), 100);

        assert_eq!(objects.len(), 1);
        let key = report.archive_key.unwrap();
        assert!(key.starts_with("archive/twitter_rustlang/"));
        let object = objects.get(&key).unwrap();
        assert_eq!(object.content_type, "application/json");

        let archived: Vec<StoredItem> = serde_json::from_slice(&object.body).unwrap();
        assert_eq!(archived, all_rows[..37].to_vec());

        let remaining_first = &store.rows(&partition)[0];
        assert_eq!(remaining_first.sort_id, all_rows[37].sort_id);
    }

    #[tokio::test]
    async fn test_export_failure_deletes_nothing() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let (store, _) = seeded_store(&partition, 30).await;

        let mut objects = MockObjectStore::new();
        objects.expect_put_object().times(1).returning(|key, _, _| {
            Err(ExportError::Put {
                key: key.to_string(),
                message: "access denied".to_string(),
            })
        });

        let executor = ArchivalExecutor::new(store.clone(), Arc::new(objects), 1000, "archive");
        let result = executor.reconcile(&partition, 5).await;

        assert!(matches!(result, Err(ArchiveError::Export(_))));
        assert_eq!(store.row_count(&partition), 30);
        assert_eq!(store.count(&partition), Some(30));
    }

    #[tokio::test]
    async fn test_delete_failure_keeps_count() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let page = rows(&partition, 3);

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_partition()
            .times(1)
            .returning(move |_, _, _| Ok(Page::last(page.clone())));
        store
            .expect_delete_items()
            .returning(|_| Err(StoreError::Request("throttled".to_string())));
        store.expect_add_to_count().never();

        let objects = Arc::new(MemoryObjectStore::new());
        let executor = ArchivalExecutor::new(Arc::new(store), objects.clone(), 1000, "archive");
        let result = executor.reconcile(&partition, 3).await;

        assert!(matches!(result, Err(ArchiveError::Store(_))));
        assert_eq!(objects.len(), 1);
    }

    #[tokio::test]
    async fn test_deletes_are_chunked() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let page = rows(&partition, 60);

        let mut store = MockKeyValueStore::new();
        store
            .expect_query_partition()
            .withf(|_, limit, _| *limit == 60)
            .returning(move |_, _, _| Ok(Page::last(page.clone())));
        store
            .expect_delete_items()
            .times(3)
            .withf(|keys| keys.len() <= MAX_BATCH_ITEMS)
            .returning(|_| Ok(()));
        store
            .expect_add_to_count()
            .times(1)
            .withf(|_, delta| *delta == -60)
            .returning(|_, _| Ok(()));

        let executor = ArchivalExecutor::new(Arc::new(store), Arc::new(MemoryObjectStore::new()), 1000, "archive");
        let report = executor.reconcile(&partition, 60).await.unwrap();
        assert_eq!(report.rows_archived, 60);
    }

    #[tokio::test]
    async fn test_non_positive_excess_is_a_no_op() {
        let executor = ArchivalExecutor::new(
            Arc::new(MockKeyValueStore::new()),
            Arc::new(MockObjectStore::new()),
            1000,
            "archive",
        );
        let partition = PartitionKey::new("twitter", "rustlang");

        assert_eq!(executor.reconcile(&partition, 0).await.unwrap().rows_archived, 0);
        assert_eq!(executor.reconcile(&partition, -4).await.unwrap().archive_key, None);
    }

    #[tokio::test]
    async fn test_missing_rows_still_settle_count() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let (store, _) = seeded_store(&partition, 4).await;
        store.add_to_count(&partition, 6).await.unwrap();

        let objects = Arc::new(MemoryObjectStore::new());
        let executor = ArchivalExecutor::new(store.clone(), objects.clone(), 1000, "archive");
        let report = executor.reconcile(&partition, 8).await.unwrap();

        assert_eq!(report.rows_archived, 4);
        assert_eq!(store.row_count(&partition), 0);
        assert_eq!(store.count(&partition), Some(2));
    }

    #[tokio::test]
    async fn test_huge_drift_archives_what_exists() {
        let partition = PartitionKey::new("twitter", "rustlang");
        let (store, _) = seeded_store(&partition, 3).await;
        let excess = i64::MAX - 200_000;

        let objects = Arc::new(MemoryObjectStore::new());
        let executor = ArchivalExecutor::new(store.clone(), objects.clone(), 1000, "archive");
        let report = executor.reconcile(&partition, excess).await.unwrap();

        assert_eq!(report.rows_archived, 3);
        assert_eq!(objects.len(), 1);
        assert_eq!(store.row_count(&partition), 0);
        assert_eq!(store.count(&partition), Some(3 - excess));
    }
}
