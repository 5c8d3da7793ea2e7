//! Tracing subscriber setup
//!
//! `RUST_LOG` takes precedence over the configured level.

use tenantvault_core::config::LoggingConfig;
use tracing_subscriber::EnvFilter;

/// Output format for log lines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable single-line output
    Text,
    /// One JSON object per line
    Json,
}

impl LogFormat {
    /// Parses a configured format name; unknown names fall back to text.
    pub fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

/// Builds the filter from `RUST_LOG`, or from the configured level.
pub fn env_filter(config: &LoggingConfig) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level))
}

/// Installs the global tracing subscriber.
///
/// Fails if a global subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(config);
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    match LogFormat::from_config(&config.format) {
        LogFormat::Json => builder
            .json()
            .try_init()
            .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}")),
        LogFormat::Text => builder
            .try_init()
            .map_err(|e| anyhow::anyhow!("installing tracing subscriber: {e}")),
    }
}
