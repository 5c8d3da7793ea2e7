//! TenantVault Telemetry - Observability for the Graph access layer
//!
//! Provides:
//! - `MetricsRegistry`: Prometheus metrics for outbound Graph API calls
//! - `init_logging`: tracing subscriber setup from configuration

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
pub use metrics::MetricsRegistry;
