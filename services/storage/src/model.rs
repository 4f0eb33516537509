use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Logical bucket key for items and counts: `<provider>#<criteria>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// Build the key for a provider and a search criteria (hashtag, term, ...)
    pub fn new(provider: &str, criteria: &str) -> Self {
        Self(format!("{}#{}", provider.to_lowercase(), criteria))
    }

    /// Wrap an already formatted key read back from storage
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Provider-neutral social media record produced by a provider adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SocialMediaItem {
    /// Provider name (twitter, ...)
    pub provider: String,
    /// ID assigned by the provider
    pub id: String,
    /// Post text
    pub text: String,
    /// Provider author ID
    pub author_id: String,
    /// Creation time as reported by the provider
    pub created_at: String,
    /// Provider-specific fields with no dedicated column
    #[serde(default)]
    pub extra_data: serde_json::Map<String, serde_json::Value>,
}

/// An item row as persisted in the primary table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredItem {
    /// Criteria partition the row belongs to
    pub partition: PartitionKey,
    /// Monotonic sort key (ULID) ordering rows inside the partition
    pub sort_id: String,
    /// When the batch writer accepted the row
    pub inserted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub data: SocialMediaItem,
}

impl StoredItem {
    /// Canonical uniqueness key used for insert-if-absent.
    ///
    /// Sort ids are minted per write, so only the provider id identifies the
    /// same logical item across reconnects and replays.
    pub fn dedup_key(&self) -> String {
        format!("{}#{}", self.partition, self.data.id)
    }

    /// Primary key of the row
    pub fn key(&self) -> ItemKey {
        ItemKey {
            partition: self.partition.clone(),
            sort_id: self.sort_id.clone(),
        }
    }
}

/// Primary key of an item row
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub partition: PartitionKey,
    pub sort_id: String,
}

/// Derived per-partition row counter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionCount {
    pub partition: PartitionKey,
    pub item_count: i64,
}

/// Result of a single conditional put
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Row did not exist and was written
    Inserted,
    /// Logical item already present; nothing written
    Duplicate,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_item() -> StoredItem {
        StoredItem {
            partition: PartitionKey::new("Twitter", "rustlang"),
            sort_id: "01HQ3Z6X5N0000000000000000".to_string(),
            inserted_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
            data: SocialMediaItem {
                provider: "twitter".to_string(),
                id: "1759000000000000000".to_string(),
                text: "hello".to_string(),
                author_id: "42".to_string(),
                created_at: "2024-03-01T11:59:00.000Z".to_string(),
                extra_data: Default::default(),
            },
        }
    }

    #[test]
    fn test_partition_key_format() {
        let key = PartitionKey::new("Twitter", "RustLang");
        assert_eq!(key.as_str(), "twitter#RustLang");
        assert_eq!(key.to_string(), "twitter#RustLang");
    }

    #[test]
    fn test_dedup_key_ignores_sort_id() {
        let a = sample_item();
        let mut b = sample_item();
        b.sort_id = "01HQ3Z6X5N0000000000000001".to_string();
        assert_eq!(a.dedup_key(), b.dedup_key());
        assert_ne!(a.key(), b.key());
    }

    #[test]
    fn test_stored_item_serializes_flat() {
        let json = serde_json::to_value(sample_item()).unwrap();
        assert_eq!(json["partition"], "twitter#rustlang");
        assert_eq!(json["id"], "1759000000000000000");
        assert_eq!(json["author_id"], "42");
    }
}
