use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument};
use tweet_storage::{KeyValueStore, PartitionCount, StoreError};

/// Lists partitions whose counter exceeds a threshold
pub struct ArchivalScanner {
    store: Arc<dyn KeyValueStore>,
}

impl ArchivalScanner {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Every partition with `item_count > threshold`, each exactly once.
    ///
    /// Follows continuation tokens until the scan is exhausted; pages may
    /// come back empty while more remain.
    #[instrument(skip(self))]
    pub async fn find_over_threshold(&self, threshold: i64) -> Result<Vec<PartitionCount>, StoreError> {
        let mut seen = HashSet::new();
        let mut found = Vec::new();
        let mut token = None;
        let mut pages = 0u32;

        loop {
            let page = self.store.scan_counts_above(threshold, token).await?;
            pages += 1;

            for count in page.items {
                if seen.insert(count.partition.clone()) {
                    found.push(count);
                }
            }

            match page.next {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        debug!(pages = pages, "Count scan finished");
        info!(threshold = threshold, partitions = found.len(), "Found partitions over threshold");
        Ok(found)
    }
}
