//! Call metrics port
//!
//! The request pipeline emits one [`CallRecord`] per outbound call, whatever
//! its outcome. The telemetry crate provides the prometheus-backed sink.

use std::time::Duration;

use crate::domain::TrafficClass;

/// Final outcome of an outbound call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// 2xx or non-retryable 3xx response
    Success,
    /// Terminal non-success HTTP status
    HttpError,
    /// No response was received
    TransportError,
    /// The caller cancelled the call
    Cancelled,
}

impl CallOutcome {
    /// Label used in metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallOutcome::Success => "success",
            CallOutcome::HttpError => "http_error",
            CallOutcome::TransportError => "transport_error",
            CallOutcome::Cancelled => "cancelled",
        }
    }
}

/// Observations about one outbound call, recorded after it completes
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    /// Traffic class the call was charged to
    pub traffic_class: TrafficClass,
    /// HTTP method
    pub method: String,
    /// Final HTTP status, if a response was received
    pub status: Option<u16>,
    /// Number of transport attempts made (0 if cancelled before sending)
    pub attempts: u32,
    /// Wall-clock time from pipeline entry to completion
    pub latency: Duration,
    /// Service-reported cost (`x-ms-resource-unit`), 1 when absent
    pub resource_units: u32,
    /// Attempts answered with 429, the final one included
    pub throttled: u32,
    /// Final outcome
    pub outcome: CallOutcome,
}

impl CallRecord {
    /// Number of replays after the first attempt.
    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }
}

/// Port trait for recording per-call metrics
///
/// Implementations must be cheap and non-blocking; the pipeline calls this on
/// every request. Errors are logged by the caller and otherwise ignored.
pub trait ICallMetricsSink: Send + Sync {
    /// Records one completed call
    fn record_call(&self, record: &CallRecord) -> anyhow::Result<()>;
}

/// Sink that discards every record
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetricsSink;

impl ICallMetricsSink for NoopMetricsSink {
    fn record_call(&self, _record: &CallRecord) -> anyhow::Result<()> {
        Ok(())
    }
}
