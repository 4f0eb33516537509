use crate::config::WriterConfig;
use crate::error::StoreError;
use crate::id_gen::MonotonicIdGenerator;
use crate::kv_store::{KeyValueStore, MAX_BATCH_ITEMS};
use crate::model::{PartitionKey, PutOutcome, SocialMediaItem, StoredItem};
use chrono::Utc;
use futures::future::try_join_all;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Outcome of one insert call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertSummary {
    /// Rows newly written (and added to the partition count)
    pub inserted: usize,
    /// Items that already existed
    pub duplicates: usize,
    /// Items dropped by validation
    pub rejected: usize,
}

/// Persists item batches with bounded write concurrency and keeps the
/// partition counter in step with newly inserted rows
pub struct BatchWriter {
    store: Arc<dyn KeyValueStore>,
    ids: Arc<MonotonicIdGenerator>,
    chunk_size: usize,
    max_in_flight: usize,
}

impl BatchWriter {
    pub fn new(store: Arc<dyn KeyValueStore>, ids: Arc<MonotonicIdGenerator>, config: &WriterConfig) -> Self {
        Self {
            store,
            ids,
            chunk_size: config.chunk_size.clamp(1, MAX_BATCH_ITEMS),
            max_in_flight: config.max_in_flight.max(1),
        }
    }

    /// Insert items into a partition.
    ///
    /// Chunks are written in waves of at most `max_in_flight` concurrent
    /// requests. Any store error aborts the call before the count is touched;
    /// rows already written by then are picked up as duplicates on retry.
    #[instrument(skip(self, items), fields(partition = %partition, count = items.len()))]
    pub async fn insert(
        &self,
        partition: &PartitionKey,
        items: Vec<SocialMediaItem>,
    ) -> Result<InsertSummary, StoreError> {
        let mut summary = InsertSummary::default();
        let inserted_at = Utc::now();

        let rows: Vec<StoredItem> = items
            .into_iter()
            .filter(|item| {
                let valid = !item.id.trim().is_empty();
                if !valid {
                    warn!(partition = %partition, "Rejecting item without provider id");
                    summary.rejected += 1;
                }
                valid
            })
            .map(|data| StoredItem {
                partition: partition.clone(),
                sort_id: self.ids.next_string(),
                inserted_at,
                data,
            })
            .collect();

        if rows.is_empty() {
            return Ok(summary);
        }

        let started = Instant::now();
        let chunks: Vec<&[StoredItem]> = rows.chunks(self.chunk_size).collect();

        for wave in chunks.chunks(self.max_in_flight) {
            let results = try_join_all(wave.iter().map(|chunk| self.store.put_items_if_absent(chunk)))
                .await
                .inspect_err(|_| {
                    metrics::counter!("storage.batches.failed").increment(1);
                })?;

            for outcome in results.into_iter().flatten() {
                match outcome {
                    PutOutcome::Inserted => summary.inserted += 1,
                    PutOutcome::Duplicate => summary.duplicates += 1,
                }
            }
        }

        if summary.inserted > 0 {
            self.store
                .add_to_count(partition, summary.inserted as i64)
                .await?;
        }

        metrics::counter!("storage.items.inserted").increment(summary.inserted as u64);
        metrics::counter!("storage.items.duplicate").increment(summary.duplicates as u64);
        metrics::histogram!("storage.insert.duration_seconds").record(started.elapsed().as_secs_f64());

        if summary.duplicates > 0 {
            debug!(duplicates = summary.duplicates, "Skipped already stored items");
        }
        info!(
            partition = %partition,
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            "Batch stored"
        );

        Ok(summary)
    }
}
