use serde::Deserialize;
use tweet_storage::{ObjectStoreConfig, StorageConfig};

/// Main configuration for the archival job
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiverConfig {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Archival policy
    #[serde(default)]
    pub archive: ArchiveConfig,
    /// Item store configuration
    #[serde(default)]
    pub storage: StorageConfig,
    /// Archive object store configuration
    pub object_store: ObjectStoreConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

/// Archival policy
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveConfig {
    /// Item count a partition may hold before its oldest rows are archived
    #[serde(default = "default_threshold")]
    pub threshold: i64,
    /// Rows fetched per partition query
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Object key prefix for archives
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Partitions reconciled concurrently
    #[serde(default = "default_partition_concurrency")]
    pub partition_concurrency: usize,
}

// Default value functions
fn default_service_name() -> String {
    "tweet-archiver".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_threshold() -> i64 {
    100_000
}

fn default_page_size() -> usize {
    1000
}

fn default_key_prefix() -> String {
    "archive".to_string()
}

fn default_partition_concurrency() -> usize {
    1
}

impl ArchiverConfig {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name("config/archiver").required(false))
            .add_source(config::File::with_name("/etc/social-monitor/archiver").required(false))
            // Override with environment variables
            // ARCHIVER__OBJECT_STORE__BUCKET -> object_store.bucket
            .add_source(
                config::Environment::with_prefix("ARCHIVER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.object_store.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "object_store.bucket".to_string(),
            ));
        }
        if self.archive.threshold < 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "archive.threshold".to_string(),
                message: "Threshold must not be negative".to_string(),
            });
        }
        if self.archive.page_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "archive.page_size".to_string(),
                message: "Page size must be greater than 0".to_string(),
            });
        }
        if self.archive.partition_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "archive.partition_concurrency".to_string(),
                message: "Concurrency must be greater than 0".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            threshold: default_threshold(),
            page_size: default_page_size(),
            key_prefix: default_key_prefix(),
            partition_concurrency: default_partition_concurrency(),
        }
    }
}

/// Configuration validation errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(value: serde_json::Value) -> ArchiverConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_values() {
        let config = parse(serde_json::json!({ "object_store": { "bucket": "archives" } }));

        assert_eq!(config.archive.threshold, 100_000);
        assert_eq!(config.archive.page_size, 1000);
        assert_eq!(config.archive.key_prefix, "archive");
        assert_eq!(config.archive.partition_concurrency, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_missing_bucket() {
        let config = parse(serde_json::json!({ "object_store": { "bucket": "" } }));
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_zero_page_size() {
        let config = parse(serde_json::json!({
            "object_store": { "bucket": "archives" },
            "archive": { "page_size": 0 }
        }));
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }
}
