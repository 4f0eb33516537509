//! Configuration management for the ingestion service.
//!
//! This module handles loading and validating configuration from environment
//! variables and configuration files.

use crate::adapter::ProviderKind;
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;
use tweet_storage::{StorageConfig, WriterConfig};

/// Main configuration for the ingestion service.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConfig {
    /// Service identity and metrics
    #[serde(default)]
    pub service: ServiceConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// HTTP API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Upstream stream configuration
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Item store configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Batch writer tuning
    #[serde(default)]
    pub writer: WriterConfig,
}

/// Service-level configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Prometheus exporter port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Enable Prometheus metrics export
    #[serde(default = "default_true")]
    pub enable_metrics: bool,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty)
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,

    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

/// Upstream streaming endpoint configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamConfig {
    /// Base URL of the streaming service (e.g., "http://stream:3000")
    #[serde(default)]
    pub base_url: String,

    /// Payload format of the upstream records
    #[serde(default)]
    pub provider: ProviderKind,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Seconds without a chunk before the stream is considered dead
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Reconnection attempts before a session terminates
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,

    /// Base delay between reconnection attempts in milliseconds
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,

    /// Upper bound of the random delay added to each backoff in milliseconds
    #[serde(default = "default_reconnect_max_jitter_ms")]
    pub reconnect_max_jitter_ms: u64,

    /// Items accumulated before a flush to storage
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Pending items retained across failed flushes before the stream is dropped
    #[serde(default = "default_max_pending_items")]
    pub max_pending_items: usize,

    /// Undecoded bytes above which the streaming period fails and reconnects
    #[serde(default = "default_max_buffer_bytes")]
    pub max_buffer_bytes: usize,
}

// Default value functions
fn default_service_name() -> String {
    "tweet-ingest".to_string()
}
fn default_metrics_port() -> u16 {
    9090
}
fn default_true() -> bool {
    true
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "json".to_string()
}
fn default_api_host() -> String {
    "0.0.0.0".to_string()
}
fn default_api_port() -> u16 {
    8080
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_idle_timeout() -> u64 {
    90
}
fn default_max_reconnect_attempts() -> u32 {
    5
}
fn default_reconnect_base_delay_ms() -> u64 {
    1000
}
fn default_reconnect_max_jitter_ms() -> u64 {
    1000
}
fn default_batch_size() -> usize {
    25
}
fn default_max_pending_items() -> usize {
    1000
}
fn default_max_buffer_bytes() -> usize {
    1024 * 1024 // 1MB
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            metrics_port: default_metrics_port(),
            enable_metrics: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            provider: ProviderKind::default(),
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_jitter_ms: default_reconnect_max_jitter_ms(),
            batch_size: default_batch_size(),
            max_pending_items: default_max_pending_items(),
            max_buffer_bytes: default_max_buffer_bytes(),
        }
    }
}

impl IngestConfig {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration is loaded in the following order (later sources override earlier):
    /// 1. Service config file (config/ingest.toml)
    /// 2. System config file (/etc/social-monitor/ingest.toml)
    /// 3. Environment variables (prefixed with INGEST__)
    pub fn load() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name("config/ingest").required(false))
            .add_source(File::with_name("/etc/social-monitor/ingest").required(false))
            // Override with environment variables (e.g., INGEST__UPSTREAM__BASE_URL)
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Create configuration from environment variables only.
    pub fn from_env() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix("INGEST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.upstream.base_url.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "upstream.base_url".to_string(),
            ));
        }
        if !self.upstream.base_url.starts_with("http://")
            && !self.upstream.base_url.starts_with("https://")
        {
            return Err(ConfigValidationError::InvalidValue {
                field: "upstream.base_url".to_string(),
                message: "URL must start with http:// or https://".to_string(),
            });
        }

        if self.upstream.batch_size == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upstream.batch_size".to_string(),
                message: "Batch size must be greater than 0".to_string(),
            });
        }

        if self.upstream.max_pending_items < self.upstream.batch_size {
            return Err(ConfigValidationError::InvalidValue {
                field: "upstream.max_pending_items".to_string(),
                message: "Must be at least upstream.batch_size".to_string(),
            });
        }

        if self.upstream.idle_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "upstream.idle_timeout_secs".to_string(),
                message: "Idle timeout must be greater than 0".to_string(),
            });
        }

        if self.writer.max_in_flight == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "writer.max_in_flight".to_string(),
                message: "Concurrency must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl UpstreamConfig {
    /// Get connection timeout as Duration.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle timeout as Duration.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Get base reconnection delay as Duration.
    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    /// Get maximum reconnection jitter as Duration.
    pub fn reconnect_max_jitter(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_jitter_ms)
    }
}

/// Configuration validation errors.
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

    fn create_test_config() -> IngestConfig {
        IngestConfig {
            service: ServiceConfig::default(),
            logging: LoggingConfig::default(),
            api: ApiConfig::default(),
            upstream: UpstreamConfig {
                base_url: "http://stream:3000".to_string(),
                ..UpstreamConfig::default()
            },
            storage: StorageConfig::default(),
            writer: WriterConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = create_test_config();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_values() {
        let upstream = UpstreamConfig::default();
        assert_eq!(upstream.max_reconnect_attempts, 5);
        assert_eq!(upstream.reconnect_base_delay(), Duration::from_secs(1));
        assert_eq!(upstream.reconnect_max_jitter(), Duration::from_secs(1));
        assert_eq!(upstream.idle_timeout(), Duration::from_secs(90));
        assert_eq!(upstream.batch_size, 25);
        assert_eq!(upstream.provider, ProviderKind::Twitter);
    }

    #[test]
    fn test_missing_base_url() {
        let mut config = create_test_config();
        config.upstream.base_url = String::new();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::MissingField(_))
        ));
    }

    #[test]
    fn test_invalid_base_url() {
        let mut config = create_test_config();
        config.upstream.base_url = "ftp://stream:3000".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_pending_limit_below_batch_size() {
        let mut config = create_test_config();
        config.upstream.max_pending_items = 10;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { .. })
        ));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: IngestConfig = serde_json::from_value(serde_json::json!({
            "upstream": { "base_url": "http://stream:3000", "batch_size": 50 },
            "storage": { "backend": "memory" }
        }))
        .unwrap();

        assert_eq!(config.upstream.batch_size, 50);
        assert_eq!(config.upstream.max_pending_items, 1000);
        assert_eq!(config.api.port, 8080);
        assert!(config.validate().is_ok());
    }
}
