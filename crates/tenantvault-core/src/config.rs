//! Configuration module for TenantVault.
//!
//! Provides typed configuration structs that map to the YAML configuration file,
//! with loading, validation, defaults, and a builder pattern for programmatic use.
//!
//! All values are read once at startup. Limiters built from this configuration
//! keep their capacity for the whole session; there is no reload.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::domain::TrafficClass;
use crate::resolver::DEFAULT_MAX_DEPTH;

/// Hard upper bound on concurrent in-flight calls per traffic class.
pub const MAX_CONCURRENCY: usize = 16;

/// Concurrency used when the configured value is out of range.
pub const DEFAULT_CONCURRENCY: usize = 4;

// ---------------------------------------------------------------------------
// Config struct with sub-sections
// ---------------------------------------------------------------------------

/// Top-level configuration for TenantVault.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub rate_limiting: RateLimitingConfig,
    pub concurrency: ConcurrencyConfig,
    pub retry: RetryConfig,
    pub http: HttpConfig,
    pub resolver: ResolverConfig,
    pub logging: LoggingConfig,
}

/// Token-bucket settings for one traffic class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BucketConfig {
    /// Sustained refill rate.
    pub tokens_per_second: f64,
    /// Bucket capacity; roughly one second's worth of tokens.
    pub burst: u32,
}

/// Rate-limiting settings per traffic class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    pub standard: BucketConfig,
    pub bulk: BucketConfig,
}

/// Concurrency ceilings per traffic class.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub standard: usize,
    pub bulk: usize,
}

/// Retry and backoff settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Replays allowed after the first attempt.
    pub max_retries: u32,
    /// First backoff interval in milliseconds.
    pub initial_backoff_ms: u64,
    /// Optional cap on a single backoff interval in milliseconds.
    pub max_backoff_ms: Option<u64>,
    /// Retries stop once the summed delays reach this many seconds.
    pub absolute_delay_ceiling_secs: u64,
}

/// HTTP transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Base URL prepended to relative request paths.
    pub base_url: String,
    /// Deadline for a single transport attempt, in seconds.
    pub request_timeout_secs: u64,
}

/// Container resolver settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Longest parent chain that resolves.
    pub max_depth: usize,
}

/// Logging / tracing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: `trace`, `debug`, `info`, `warn`, or `error`.
    pub level: String,
    /// Output format: `text` or `json`.
    pub format: String,
}

// ---------------------------------------------------------------------------
// Config::load()
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a YAML file at `path`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        Ok(config)
    }

    /// Try to load from `path`; fall back to [`Config::default`] on any error.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "Using default configuration");
                Self::default()
            }
        }
    }

    /// Platform-appropriate default path for the configuration file.
    ///
    /// Typically `$XDG_CONFIG_HOME/tenantvault/config.yaml` on Linux.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("tenantvault")
            .join("config.yaml")
    }
}

// ---------------------------------------------------------------------------
// Defaults
// ---------------------------------------------------------------------------

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            standard: BucketConfig {
                tokens_per_second: 16.0,
                burst: 16,
            },
            bulk: BucketConfig {
                tokens_per_second: 32.0,
                burst: 32,
            },
        }
    }
}

impl RateLimitingConfig {
    /// Bucket settings for `class`.
    pub fn for_class(&self, class: TrafficClass) -> BucketConfig {
        match class {
            TrafficClass::Standard => self.standard,
            TrafficClass::Bulk => self.bulk,
        }
    }
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            standard: DEFAULT_CONCURRENCY,
            bulk: DEFAULT_CONCURRENCY,
        }
    }
}

impl ConcurrencyConfig {
    /// Capacity configured for `class`, before range checks.
    pub fn for_class(&self, class: TrafficClass) -> usize {
        match class {
            TrafficClass::Standard => self.standard,
            TrafficClass::Bulk => self.bulk,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 3_000,
            max_backoff_ms: None,
            absolute_delay_ceiling_secs: 180,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Option<Duration> {
        self.max_backoff_ms.map(Duration::from_millis)
    }

    pub fn absolute_delay_ceiling(&self) -> Duration {
        Duration::from_secs(self.absolute_delay_ceiling_secs)
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: "https://graph.microsoft.com/v1.0".to_string(),
            request_timeout_secs: 3_600,
        }
    }
}

impl HttpConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Config::validate()
// ---------------------------------------------------------------------------

/// A single validation error found in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dotted path to the offending field, e.g. `"retry.max_retries"`.
    pub field: String,
    /// Human-readable explanation.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Valid values for `logging.level`.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Valid values for `logging.format`.
const VALID_LOG_FORMATS: &[&str] = &["text", "json"];

impl Config {
    /// Validate the configuration and return all errors found.
    ///
    /// An empty vector means the configuration is valid.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        // --- rate_limiting ---
        for class in TrafficClass::ALL {
            let bucket = self.rate_limiting.for_class(class);
            if !(bucket.tokens_per_second.is_finite() && bucket.tokens_per_second > 0.0) {
                errors.push(ValidationError {
                    field: format!("rate_limiting.{class}.tokens_per_second"),
                    message: "must be a positive number".into(),
                });
            }
            if bucket.burst == 0 {
                errors.push(ValidationError {
                    field: format!("rate_limiting.{class}.burst"),
                    message: "must be greater than 0".into(),
                });
            }
        }

        // --- concurrency ---
        for class in TrafficClass::ALL {
            let capacity = self.concurrency.for_class(class);
            if capacity == 0 || capacity > MAX_CONCURRENCY {
                errors.push(ValidationError {
                    field: format!("concurrency.{class}"),
                    message: format!("must be in range 1..={MAX_CONCURRENCY}"),
                });
            }
        }

        // --- retry ---
        if self.retry.initial_backoff_ms == 0 {
            errors.push(ValidationError {
                field: "retry.initial_backoff_ms".into(),
                message: "must be greater than 0".into(),
            });
        }
        if let Some(max) = self.retry.max_backoff_ms {
            if max < self.retry.initial_backoff_ms {
                errors.push(ValidationError {
                    field: "retry.max_backoff_ms".into(),
                    message: format!(
                        "max_backoff_ms ({max}) must not be below initial_backoff_ms ({})",
                        self.retry.initial_backoff_ms
                    ),
                });
            }
        }
        if self.retry.absolute_delay_ceiling_secs == 0 {
            errors.push(ValidationError {
                field: "retry.absolute_delay_ceiling_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- http ---
        if !(self.http.base_url.starts_with("https://") || self.http.base_url.starts_with("http://"))
        {
            errors.push(ValidationError {
                field: "http.base_url".into(),
                message: format!("not an http(s) URL: {}", self.http.base_url),
            });
        }
        if self.http.request_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "http.request_timeout_secs".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- resolver ---
        if self.resolver.max_depth == 0 {
            errors.push(ValidationError {
                field: "resolver.max_depth".into(),
                message: "must be greater than 0".into(),
            });
        }

        // --- logging ---
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            errors.push(ValidationError {
                field: "logging.level".into(),
                message: format!(
                    "invalid level '{}'; valid options: {}",
                    self.logging.level,
                    VALID_LOG_LEVELS.join(", ")
                ),
            });
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            errors.push(ValidationError {
                field: "logging.format".into(),
                message: format!(
                    "invalid format '{}'; valid options: {}",
                    self.logging.format,
                    VALID_LOG_FORMATS.join(", ")
                ),
            });
        }

        errors
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Builder for constructing a [`Config`] programmatically.
///
/// Starts from [`Config::default`] and allows selective overrides.
///
/// # Example
///
/// ```rust,no_run
/// use tenantvault_core::config::ConfigBuilder;
///
/// let config = ConfigBuilder::new()
///     .standard_rate(8.0, 8)
///     .max_retries(5)
///     .logging_level("debug")
///     .build();
/// ```
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Create a new builder initialised with [`Config::default`] values.
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    // --- rate_limiting ---

    pub fn standard_rate(mut self, tokens_per_second: f64, burst: u32) -> Self {
        self.config.rate_limiting.standard = BucketConfig {
            tokens_per_second,
            burst,
        };
        self
    }

    pub fn bulk_rate(mut self, tokens_per_second: f64, burst: u32) -> Self {
        self.config.rate_limiting.bulk = BucketConfig {
            tokens_per_second,
            burst,
        };
        self
    }

    // --- concurrency ---

    pub fn standard_concurrency(mut self, n: usize) -> Self {
        self.config.concurrency.standard = n;
        self
    }

    pub fn bulk_concurrency(mut self, n: usize) -> Self {
        self.config.concurrency.bulk = n;
        self
    }

    // --- retry ---

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.retry.max_retries = n;
        self
    }

    pub fn initial_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry.initial_backoff_ms = ms;
        self
    }

    pub fn max_backoff_ms(mut self, ms: Option<u64>) -> Self {
        self.config.retry.max_backoff_ms = ms;
        self
    }

    pub fn absolute_delay_ceiling_secs(mut self, secs: u64) -> Self {
        self.config.retry.absolute_delay_ceiling_secs = secs;
        self
    }

    // --- http ---

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.http.base_url = url.into();
        self
    }

    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http.request_timeout_secs = secs;
        self
    }

    // --- resolver ---

    pub fn resolver_max_depth(mut self, depth: usize) -> Self {
        self.config.resolver.max_depth = depth;
        self
    }

    // --- logging ---

    pub fn logging_level(mut self, level: impl Into<String>) -> Self {
        self.config.logging.level = level.into();
        self
    }

    pub fn logging_format(mut self, format: impl Into<String>) -> Self {
        self.config.logging.format = format.into();
        self
    }

    // --- build ---

    /// Consume the builder and return the finished [`Config`].
    pub fn build(self) -> Config {
        self.config
    }

    /// Build and validate in one step. Returns `Err` with the list of
    /// validation errors if the configuration is invalid.
    pub fn build_validated(self) -> Result<Config, Vec<ValidationError>> {
        let config = self.build();
        let errors = config.validate();
        if errors.is_empty() {
            Ok(config)
        } else {
            Err(errors)
        }
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
