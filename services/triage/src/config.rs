use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Smallest part S3 accepts for any multipart part but the last
pub const MIN_PART_SIZE_BYTES: usize = 5 * 1024 * 1024;

/// Main configuration for the triage service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// Catalog database; the in-memory catalog is used when absent
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    /// Blob store configuration
    #[serde(default)]
    pub blob_store: BlobStoreConfig,
    /// Enhancement provider configuration
    #[serde(default)]
    pub enhancement: EnhancementConfig,
    /// Batch operation configuration
    #[serde(default)]
    pub batch: BatchConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// Which blob store implementation to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlobBackend {
    S3,
    #[default]
    Memory,
}

/// Blob store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BlobStoreConfig {
    #[serde(default)]
    pub backend: BlobBackend,
    /// S3 bucket name for photo storage
    #[serde(default)]
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
    /// Key prefix for every object written by this service
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Presigned URL expiration in seconds
    #[serde(default = "default_presigned_url_expiry_secs")]
    pub presigned_url_expiry_secs: u64,
    /// Multipart upload threshold in bytes (5MB default)
    #[serde(default = "default_multipart_threshold")]
    pub multipart_threshold_bytes: usize,
    /// Part size for multipart uploads in bytes (5MB default)
    #[serde(default = "default_part_size")]
    pub part_size_bytes: usize,
    /// Base URL for blob links handed out by the memory backend
    #[serde(default = "default_memory_base_url")]
    pub memory_base_url: String,
}

/// Response shape of the enhancement provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderShape {
    /// Enhanced image bytes are the response body
    #[default]
    InlineBytes,
    /// Response is a JSON descriptor with an output URL to download
    Descriptor,
}

/// Enhancement provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EnhancementConfig {
    #[serde(default)]
    pub provider: ProviderShape,
    /// Provider endpoint receiving enhancement requests
    #[serde(default = "default_enhancement_endpoint")]
    pub endpoint: String,
    /// API credential; enhancement is refused without it
    pub api_key: Option<String>,
    /// Directive sent along with every request
    #[serde(default = "default_enhancement_level")]
    pub enhancement_level: String,
    /// Per-call deadline in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    /// Lower bound of recorded quality scores
    #[serde(default = "default_score_min")]
    pub score_min: f64,
    /// Upper bound of recorded quality scores
    #[serde(default = "default_score_max")]
    pub score_max: f64,
}

/// Batch operation configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Share of the catalog rejected by one cull
    #[serde(default = "default_cull_ratio")]
    pub cull_ratio: f64,
    /// Photos enhanced at the same time; 1 processes candidates one by one
    #[serde(default = "default_enhance_concurrency")]
    pub enhance_concurrency: usize,
    /// Enhance photos again even when they already carry a result
    #[serde(default)]
    pub reenhance: bool,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

/// Rejected configuration values
#[derive(Debug, Error, PartialEq)]
pub enum ConfigValidationError {
    #[error("Missing required configuration: {0}")]
    MissingField(String),

    #[error("Invalid configuration value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

// Default value functions
fn default_service_name() -> String {
    "triage-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_key_prefix() -> String {
    "photos".to_string()
}

fn default_presigned_url_expiry_secs() -> u64 {
    3600
}

fn default_multipart_threshold() -> usize {
    5 * 1024 * 1024 // 5MB
}

fn default_part_size() -> usize {
    MIN_PART_SIZE_BYTES
}

fn default_memory_base_url() -> String {
    "memory://blobs".to_string()
}

fn default_enhancement_endpoint() -> String {
    "https://api.example.com/enhance".to_string()
}

fn default_enhancement_level() -> String {
    "high".to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

fn default_score_min() -> f64 {
    7.5
}

fn default_score_max() -> f64 {
    9.5
}

fn default_cull_ratio() -> f64 {
    crate::sampler::DEFAULT_CULL_RATIO
}

fn default_enhance_concurrency() -> usize {
    1
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Add config file if present
            .add_source(config::File::with_name("config/triage").required(false))
            .add_source(config::File::with_name("/etc/triage/triage").required(false))
            // Override with environment variables
            // TRIAGE__ENHANCEMENT__API_KEY -> enhancement.api_key
            .add_source(
                config::Environment::with_prefix("TRIAGE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = config.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let batch = &self.batch;
        if !(0.0..=1.0).contains(&batch.cull_ratio) {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.cull_ratio".to_string(),
                message: "must lie in [0, 1]".to_string(),
            });
        }
        if batch.enhance_concurrency == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "batch.enhance_concurrency".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        let enhancement = &self.enhancement;
        for (field, value) in [
            ("enhancement.score_min", enhancement.score_min),
            ("enhancement.score_max", enhancement.score_max),
        ] {
            if !(0.0..=10.0).contains(&value) {
                return Err(ConfigValidationError::InvalidValue {
                    field: field.to_string(),
                    message: "must lie in [0, 10]".to_string(),
                });
            }
        }
        if enhancement.score_min > enhancement.score_max {
            return Err(ConfigValidationError::InvalidValue {
                field: "enhancement.score_min".to_string(),
                message: "must not exceed enhancement.score_max".to_string(),
            });
        }
        if enhancement.request_timeout_secs == 0 {
            return Err(ConfigValidationError::InvalidValue {
                field: "enhancement.request_timeout_secs".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }
        if enhancement.endpoint.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "enhancement.endpoint".to_string(),
            ));
        }

        if self.blob_store.part_size_bytes < MIN_PART_SIZE_BYTES {
            return Err(ConfigValidationError::InvalidValue {
                field: "blob_store.part_size_bytes".to_string(),
                message: format!("must be at least {MIN_PART_SIZE_BYTES} bytes"),
            });
        }

        if self.blob_store.backend == BlobBackend::S3 && self.blob_store.bucket.is_empty() {
            return Err(ConfigValidationError::MissingField(
                "blob_store.bucket".to_string(),
            ));
        }

        Ok(())
    }

    /// Get presigned URL expiry as Duration
    pub fn presigned_url_expiry(&self) -> Duration {
        Duration::from_secs(self.blob_store.presigned_url_expiry_secs)
    }
}

impl EnhancementConfig {
    /// Get the per-call deadline as Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl DatabaseConfig {
    /// Get database connection timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get database idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            backend: BlobBackend::default(),
            bucket: String::new(),
            region: default_region(),
            endpoint_url: None,
            force_path_style: false,
            key_prefix: default_key_prefix(),
            presigned_url_expiry_secs: default_presigned_url_expiry_secs(),
            multipart_threshold_bytes: default_multipart_threshold(),
            part_size_bytes: default_part_size(),
            memory_base_url: default_memory_base_url(),
        }
    }
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            provider: ProviderShape::default(),
            endpoint: default_enhancement_endpoint(),
            api_key: None,
            enhancement_level: default_enhancement_level(),
            request_timeout_secs: default_request_timeout_secs(),
            score_min: default_score_min(),
            score_max: default_score_max(),
        }
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            cull_ratio: default_cull_ratio(),
            enhance_concurrency: default_enhance_concurrency(),
            reenhance: false,
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            database: None,
            blob_store: BlobStoreConfig::default(),
            enhancement: EnhancementConfig::default(),
            batch: BatchConfig::default(),
            api: ApiConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = Config::default();
        assert_eq!(config.batch.cull_ratio, 0.3);
        assert_eq!(config.batch.enhance_concurrency, 1);
        assert_eq!(config.enhancement.score_min, 7.5);
        assert_eq!(config.enhancement.score_max, 9.5);
        assert_eq!(config.enhancement.enhancement_level, "high");
        assert!(config.enhancement.api_key.is_none());
        assert_eq!(config.blob_store.backend, BlobBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_deserialize_partial_sections() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "enhancement": { "provider": "descriptor", "api_key": "secret" },
            "batch": { "enhance_concurrency": 4 }
        }))
        .unwrap();

        assert_eq!(config.enhancement.provider, ProviderShape::Descriptor);
        assert_eq!(config.enhancement.api_key.as_deref(), Some("secret"));
        assert_eq!(config.enhancement.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.batch.enhance_concurrency, 4);
        assert_eq!(config.batch.cull_ratio, 0.3);
    }

    #[test]
    fn test_validate_rejects_bad_ratio() {
        let mut config = Config::default();
        config.batch.cull_ratio = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::InvalidValue { field, .. }) if field == "batch.cull_ratio"
        ));
    }

    #[test]
    fn test_validate_rejects_inverted_score_band() {
        let mut config = Config::default();
        config.enhancement.score_min = 9.0;
        config.enhancement.score_max = 8.0;
        assert!(config.validate().is_err());

        config.enhancement.score_min = 7.0;
        config.enhancement.score_max = 11.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_bucket_for_s3() {
        let mut config = Config::default();
        config.blob_store.backend = BlobBackend::S3;
        assert_eq!(
            config.validate(),
            Err(ConfigValidationError::MissingField(
                "blob_store.bucket".to_string()
            ))
        );
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = Config::default();
        config.batch.enhance_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_small_part_size() {
        let mut config = Config::default();
        for size in [0, 1024, MIN_PART_SIZE_BYTES - 1] {
            config.blob_store.part_size_bytes = size;
            assert!(matches!(
                config.validate(),
                Err(ConfigValidationError::InvalidValue { field, .. })
                    if field == "blob_store.part_size_bytes"
            ));
        }

        config.blob_store.part_size_bytes = MIN_PART_SIZE_BYTES;
        assert!(config.validate().is_ok());
    }
}
