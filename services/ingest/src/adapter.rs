//! Provider payload adapters.
//!
//! Each upstream provider emits its own record shape; an adapter maps one raw
//! record onto the provider-neutral [`SocialMediaItem`].

use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;
use tweet_storage::SocialMediaItem;

/// Errors raised while adapting a raw record.
#[derive(Debug, Error, PartialEq)]
pub enum AdapterError {
    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Record is missing field: {0}")]
    MissingField(&'static str),

    #[error("Field {field} has unexpected type, expected {expected}")]
    InvalidField {
        field: &'static str,
        expected: &'static str,
    },
}

/// Maps raw upstream records to storage items.
pub trait ProviderAdapter: Send + Sync {
    /// Provider name stored with every item and used in partition keys
    fn provider(&self) -> &'static str;

    /// Convert one raw record
    fn adapt(&self, raw: Value) -> Result<SocialMediaItem, AdapterError>;
}

/// Supported upstream providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Twitter,
}

impl ProviderKind {
    /// Build the adapter for this provider
    pub fn adapter(self) -> Arc<dyn ProviderAdapter> {
        match self {
            ProviderKind::Twitter => Arc::new(TwitterAdapter),
        }
    }
}

/// Adapter for tweet records `{id, author_id, text, created_at, ...}`.
///
/// Fields without a dedicated column are kept in `extra_data`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TwitterAdapter;

impl ProviderAdapter for TwitterAdapter {
    fn provider(&self) -> &'static str {
        "twitter"
    }

    fn adapt(&self, raw: Value) -> Result<SocialMediaItem, AdapterError> {
        let Value::Object(mut fields) = raw else {
            return Err(AdapterError::NotAnObject);
        };

        let id = take_id(&mut fields)?;
        let text = take_string(&mut fields, "text")?.unwrap_or_default();
        let author_id = take_string(&mut fields, "author_id")?.unwrap_or_default();
        let created_at = take_string(&mut fields, "created_at")?.unwrap_or_default();

        Ok(SocialMediaItem {
            provider: self.provider().to_string(),
            id,
            text,
            author_id,
            created_at,
            extra_data: fields,
        })
    }
}

/// Tweet ids arrive as strings, older payloads may carry them as numbers
fn take_id(fields: &mut Map<String, Value>) -> Result<String, AdapterError> {
    match fields.remove("id") {
        Some(Value::String(id)) => Ok(id),
        Some(Value::Number(id)) => Ok(id.to_string()),
        Some(Value::Null) | None => Err(AdapterError::MissingField("id")),
        Some(_) => Err(AdapterError::InvalidField {
            field: "id",
            expected: "string",
        }),
    }
}

fn take_string(
    fields: &mut Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, AdapterError> {
    match fields.remove(field) {
        Some(Value::String(value)) => Ok(Some(value)),
        Some(Value::Null) | None => Ok(None),
        Some(_) => Err(AdapterError::InvalidField {
            field,
            expected: "string",
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_adapt_tweet() {
        let item = TwitterAdapter
            .adapt(json!({
                "id": "1759000000000000000",
                "author_id": "42",
                "text": "hello #rustlang",
                "created_at": "2024-03-01T11:59:00.000Z",
                "retweet_count": 3
            }))
            .unwrap();

        assert_eq!(item.provider, "twitter");
        assert_eq!(item.id, "1759000000000000000");
        assert_eq!(item.author_id, "42");
        assert_eq!(item.text, "hello #rustlang");
        assert_eq!(item.extra_data.get("retweet_count"), Some(&json!(3)));
        assert!(!item.extra_data.contains_key("id"));
    }

    #[test]
    fn test_numeric_id() {
        let item = TwitterAdapter.adapt(json!({"id": 17, "text": "t"})).unwrap();
        assert_eq!(item.id, "17");
        assert_eq!(item.author_id, "");
    }

    #[test]
    fn test_missing_id() {
        assert_eq!(
            TwitterAdapter.adapt(json!({"text": "no id"})),
            Err(AdapterError::MissingField("id"))
        );
    }

    #[test]
    fn test_non_object_record() {
        assert_eq!(
            TwitterAdapter.adapt(json!(["nested"])),
            Err(AdapterError::NotAnObject)
        );
    }

    #[test]
    fn test_invalid_text_type() {
        assert!(matches!(
            TwitterAdapter.adapt(json!({"id": "1", "text": 5})),
            Err(AdapterError::InvalidField { field: "text", .. })
        ));
    }

    #[test]
    fn test_provider_kind_deserialize() {
        let kind: ProviderKind = serde_json::from_str("\"twitter\"").unwrap();
        assert_eq!(kind.adapter().provider(), "twitter");
    }
}
