//! DynamoDB implementation of [`KeyValueStore`].
//!
//! Table layout (attribute names match the existing tables):
//!
//! ```text
//! SocialMediaTable       PK "PROVIDER#CRITERIA" (S)   SK "ID" (S, ULID)
//! ItemCountTable         PK "PROVIDER#CRITERIA" (S)   "ItemCount" (N)
//! SocialMediaDedupTable  PK "DedupKey" (S)            "ExpiresAt" (N, TTL)
//! ```
//!
//! Insert-if-absent writes the dedup guard and the row in one transaction;
//! a failed guard condition means the logical item already exists.

use crate::config::StorageConfig;
use crate::error::StoreError;
use crate::kv_store::{check_batch_size, KeyValueStore, Page, PageToken};
use crate::model::{ItemKey, PartitionCount, PartitionKey, PutOutcome, SocialMediaItem, StoredItem};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::{DisplayErrorContext, SdkError};
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{AttributeValue, DeleteRequest, Put, TransactWriteItem, WriteRequest};
use aws_sdk_dynamodb::Client as DynamoClient;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

const PARTITION_ATTR: &str = "PROVIDER#CRITERIA";
const SORT_ATTR: &str = "ID";
const COUNT_ATTR: &str = "ItemCount";
const DEDUP_ATTR: &str = "DedupKey";
const EXPIRES_ATTR: &str = "ExpiresAt";

const PROVIDER_ID_ATTR: &str = "tweetId";
const PROVIDER_ATTR: &str = "provider";
const TEXT_ATTR: &str = "text";
const AUTHOR_ATTR: &str = "authorId";
const CREATED_AT_ATTR: &str = "createdAt";
const EXTRA_DATA_ATTR: &str = "extraData";
const INSERTED_AT_ATTR: &str = "timestamp";

const MAX_UNPROCESSED_ATTEMPTS: u32 = 5;

type AttributeMap = HashMap<String, AttributeValue>;

/// Key-value store backed by DynamoDB tables
pub struct DynamoKeyValueStore {
    client: DynamoClient,
    items_table: String,
    counts_table: String,
    dedup_table: String,
    dedup_ttl: Duration,
    put_concurrency: usize,
}

impl DynamoKeyValueStore {
    /// Create a new store client
    pub async fn new(config: &StorageConfig) -> Self {
        let sdk_config = crate::config::load_sdk_config(&config.region).await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
        if let Some(ref endpoint_url) = config.endpoint_url {
            builder = builder.endpoint_url(endpoint_url);
        }

        info!(
            items_table = %config.items_table,
            counts_table = %config.counts_table,
            region = %config.region,
            "DynamoDB store initialized"
        );

        Self {
            client: DynamoClient::from_conf(builder.build()),
            items_table: config.items_table.clone(),
            counts_table: config.counts_table.clone(),
            dedup_table: config.dedup_table.clone(),
            dedup_ttl: config.dedup_ttl(),
            put_concurrency: config.put_concurrency.max(1),
        }
    }

    async fn put_one(&self, item: &StoredItem, expires_at: i64) -> Result<PutOutcome, StoreError> {
        let guard = Put::builder()
            .table_name(&self.dedup_table)
            .item(DEDUP_ATTR, AttributeValue::S(item.dedup_key()))
            .item(EXPIRES_ATTR, AttributeValue::N(expires_at.to_string()))
            .condition_expression("attribute_not_exists(#dedup)")
            .expression_attribute_names("#dedup", DEDUP_ATTR)
            .build()
            .map_err(request_error)?;

        let row = Put::builder()
            .table_name(&self.items_table)
            .set_item(Some(item_to_attributes(item)?))
            .build()
            .map_err(request_error)?;

        let result = self
            .client
            .transact_write_items()
            .transact_items(TransactWriteItem::builder().put(guard).build())
            .transact_items(TransactWriteItem::builder().put(row).build())
            .send()
            .await;

        match result {
            Ok(_) => Ok(PutOutcome::Inserted),
            Err(err) if is_guard_conflict(&err) => {
                debug!(dedup_key = %item.dedup_key(), "Item already stored");
                Ok(PutOutcome::Duplicate)
            }
            Err(err) => Err(request_error(err)),
        }
    }
}

#[async_trait]
impl KeyValueStore for DynamoKeyValueStore {
    #[instrument(skip(self, items), fields(table = %self.items_table, count = items.len()))]
    async fn put_items_if_absent(
        &self,
        items: &[StoredItem],
    ) -> Result<Vec<PutOutcome>, StoreError> {
        check_batch_size(items.len())?;

        let ttl = chrono::Duration::from_std(self.dedup_ttl).unwrap_or_else(|_| chrono::Duration::zero());
        let expires_at = (Utc::now() + ttl).timestamp();

        put_bounded(items, self.put_concurrency, |item| self.put_one(item, expires_at)).await
    }

    #[instrument(skip(self, start), fields(table = %self.items_table))]
    async fn query_partition(
        &self,
        partition: &PartitionKey,
        limit: usize,
        start: Option<PageToken>,
    ) -> Result<Page<StoredItem>, StoreError> {
        let output = self
            .client
            .query()
            .table_name(&self.items_table)
            .key_condition_expression("#pk = :pk")
            .expression_attribute_names("#pk", PARTITION_ATTR)
            .expression_attribute_values(":pk", AttributeValue::S(partition.to_string()))
            .scan_index_forward(true)
            .limit(i32::try_from(limit).unwrap_or(i32::MAX))
            .set_exclusive_start_key(start.map(token_to_key))
            .send()
            .await
            .map_err(request_error)?;

        let items = output
            .items()
            .iter()
            .map(|attributes| item_from_attributes(attributes, &self.items_table))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Page {
            items,
            next: output.last_evaluated_key().map(key_to_token),
        })
    }

    #[instrument(skip(self), fields(table = %self.counts_table))]
    async fn add_to_count(&self, partition: &PartitionKey, delta: i64) -> Result<(), StoreError> {
        // ADD creates the attribute (and the item) when absent
        self.client
            .update_item()
            .table_name(&self.counts_table)
            .key(PARTITION_ATTR, AttributeValue::S(partition.to_string()))
            .update_expression("ADD #count :delta")
            .expression_attribute_names("#count", COUNT_ATTR)
            .expression_attribute_values(":delta", AttributeValue::N(delta.to_string()))
            .send()
            .await
            .map_err(request_error)?;

        Ok(())
    }

    #[instrument(skip(self, keys), fields(table = %self.items_table, count = keys.len()))]
    async fn delete_items(&self, keys: &[ItemKey]) -> Result<(), StoreError> {
        check_batch_size(keys.len())?;
        if keys.is_empty() {
            return Ok(());
        }

        let mut requests = keys
            .iter()
            .map(|key| {
                let delete = DeleteRequest::builder()
                    .key(PARTITION_ATTR, AttributeValue::S(key.partition.to_string()))
                    .key(SORT_ATTR, AttributeValue::S(key.sort_id.clone()))
                    .build()
                    .map_err(request_error)?;
                Ok(WriteRequest::builder().delete_request(delete).build())
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        for attempt in 1..=MAX_UNPROCESSED_ATTEMPTS {
            let output = self
                .client
                .batch_write_item()
                .request_items(&self.items_table, requests)
                .send()
                .await
                .map_err(request_error)?;

            requests = output
                .unprocessed_items()
                .and_then(|unprocessed| unprocessed.get(&self.items_table))
                .cloned()
                .unwrap_or_default();

            if requests.is_empty() {
                return Ok(());
            }

            warn!(
                attempt = attempt,
                unprocessed = requests.len(),
                "Resubmitting unprocessed deletes"
            );
            tokio::time::sleep(Duration::from_millis(50 * u64::from(attempt))).await;
        }

        Err(StoreError::Unprocessed {
            attempts: MAX_UNPROCESSED_ATTEMPTS,
        })
    }

    #[instrument(skip(self, start), fields(table = %self.counts_table))]
    async fn scan_counts_above(
        &self,
        threshold: i64,
        start: Option<PageToken>,
    ) -> Result<Page<PartitionCount>, StoreError> {
        let output = self
            .client
            .scan()
            .table_name(&self.counts_table)
            .filter_expression("#count > :threshold")
            .expression_attribute_names("#count", COUNT_ATTR)
            .expression_attribute_values(":threshold", AttributeValue::N(threshold.to_string()))
            .set_exclusive_start_key(start.map(token_to_key))
            .send()
            .await
            .map_err(request_error)?;

        let items = output
            .items()
            .iter()
            .map(|attributes| {
                Ok(PartitionCount {
                    partition: PartitionKey::from_raw(string_attr(
                        attributes,
                        PARTITION_ATTR,
                        &self.counts_table,
                    )?),
                    item_count: number_attr(attributes, COUNT_ATTR, &self.counts_table)?,
                })
            })
            .collect::<Result<Vec<_>, StoreError>>()?;

        Ok(Page {
            items,
            next: output.last_evaluated_key().map(key_to_token),
        })
    }
}

fn is_guard_conflict<R>(err: &SdkError<TransactWriteItemsError, R>) -> bool {
    match err.as_service_error() {
        // Reasons are positional: index 0 is the dedup guard
        Some(TransactWriteItemsError::TransactionCanceledException(cancelled)) => cancelled
            .cancellation_reasons()
            .first()
            .and_then(|reason| reason.code())
            == Some("ConditionalCheckFailed"),
        _ => false,
    }
}

fn request_error<E: std::error::Error>(error: E) -> StoreError {
    StoreError::Request(DisplayErrorContext(&error).to_string())
}

fn token_to_key(token: PageToken) -> AttributeMap {
    token
        .iter()
        .map(|(k, v)| (k.clone(), AttributeValue::S(v.clone())))
        .collect()
}

fn key_to_token(key: &AttributeMap) -> PageToken {
    PageToken::from_pairs(key.iter().filter_map(|(k, v)| match v {
        AttributeValue::S(s) => Some((k.clone(), s.clone())),
        _ => None,
    }))
}

fn item_to_attributes(item: &StoredItem) -> Result<AttributeMap, StoreError> {
    let data = &item.data;
    let extra_data = serde_json::to_string(&data.extra_data)?;

    Ok(HashMap::from([
        (PARTITION_ATTR.to_string(), AttributeValue::S(item.partition.to_string())),
        (SORT_ATTR.to_string(), AttributeValue::S(item.sort_id.clone())),
        (PROVIDER_ID_ATTR.to_string(), AttributeValue::S(data.id.clone())),
        (PROVIDER_ATTR.to_string(), AttributeValue::S(data.provider.clone())),
        (TEXT_ATTR.to_string(), AttributeValue::S(data.text.clone())),
        (AUTHOR_ATTR.to_string(), AttributeValue::S(data.author_id.clone())),
        (CREATED_AT_ATTR.to_string(), AttributeValue::S(data.created_at.clone())),
        (EXTRA_DATA_ATTR.to_string(), AttributeValue::S(extra_data)),
        (
            INSERTED_AT_ATTR.to_string(),
            AttributeValue::N(item.inserted_at.timestamp_millis().to_string()),
        ),
    ]))
}

fn item_from_attributes(attributes: &AttributeMap, table: &str) -> Result<StoredItem, StoreError> {
    let inserted_ms = number_attr(attributes, INSERTED_AT_ATTR, table)?;
    let inserted_at = DateTime::<Utc>::from_timestamp_millis(inserted_ms)
        .ok_or_else(|| invalid(table, format!("timestamp out of range: {inserted_ms}")))?;

    let extra_data = match attributes.get(EXTRA_DATA_ATTR) {
        Some(AttributeValue::S(raw)) => serde_json::from_str(raw)?,
        _ => Default::default(),
    };

    Ok(StoredItem {
        partition: PartitionKey::from_raw(string_attr(attributes, PARTITION_ATTR, table)?),
        sort_id: string_attr(attributes, SORT_ATTR, table)?,
        inserted_at,
        data: SocialMediaItem {
            provider: string_attr(attributes, PROVIDER_ATTR, table)?,
            id: string_attr(attributes, PROVIDER_ID_ATTR, table)?,
            text: string_attr(attributes, TEXT_ATTR, table)?,
            author_id: string_attr(attributes, AUTHOR_ATTR, table)?,
            created_at: string_attr(attributes, CREATED_AT_ATTR, table)?,
            extra_data,
        },
    })
}

fn string_attr(attributes: &AttributeMap, name: &str, table: &str) -> Result<String, StoreError> {
    match attributes.get(name) {
        Some(AttributeValue::S(value)) => Ok(value.clone()),
        _ => Err(invalid(table, format!("missing string attribute {name}"))),
    }
}

fn number_attr(attributes: &AttributeMap, name: &str, table: &str) -> Result<i64, StoreError> {
    match attributes.get(name) {
        Some(AttributeValue::N(value)) => value
            .parse()
            .map_err(|_| invalid(table, format!("attribute {name} is not an integer: {value}"))),
        _ => Err(invalid(table, format!("missing number attribute {name}"))),
    }
}

fn invalid(table: &str, message: String) -> StoreError {
    StoreError::InvalidRecord {
        table: table.to_string(),
        message,
    }
}

/// Run `put` over `items` with at most `concurrency` calls in flight.
/// Outcomes keep the input order.
fn put_bounded<'a, F, Fut>(
    items: &'a [StoredItem],
    concurrency: usize,
    put: F,
) -> BoxFuture<'a, Result<Vec<PutOutcome>, StoreError>>
where
    F: FnMut(&'a StoredItem) -> Fut + Send + 'a,
    Fut: Future<Output = Result<PutOutcome, StoreError>> + Send + 'a,
{
    stream::iter(items)
        .map(put)
        .buffered(concurrency.max(1))
        .try_collect()
        .boxed()
}
