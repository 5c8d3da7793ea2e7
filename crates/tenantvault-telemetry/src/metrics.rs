//! Prometheus metrics registry for TenantVault
//!
//! Provides typed, labeled counters and histograms for every outbound Graph
//! API call. The registry implements [`ICallMetricsSink`] so the request
//! pipeline can feed it directly.

use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use tenantvault_core::ports::{CallRecord, ICallMetricsSink};

/// Central metrics registry holding all Prometheus metrics.
pub struct MetricsRegistry {
    registry: Registry,
    /// Counter: Graph API calls by (class, status)
    pub api_requests_total: IntCounterVec,
    /// Histogram: end-to-end call latency in seconds, retries included
    pub api_request_duration_seconds: HistogramVec,
    /// Counter: replays after the first attempt
    pub api_retries_total: IntCounterVec,
    /// Counter: service-reported resource units consumed
    pub api_resource_units_total: IntCounterVec,
    /// Counter: attempts answered with a 429, retried or not
    pub api_throttled_total: IntCounterVec,
}

impl MetricsRegistry {
    /// Creates a new `MetricsRegistry` with all metrics registered.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new_custom(Some("tenantvault".to_string()), None)?;

        let api_requests_total = IntCounterVec::new(
            Opts::new("api_requests_total", "Total Graph API calls"),
            &["class", "status"],
        )?;
        registry.register(Box::new(api_requests_total.clone()))?;

        let api_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "api_request_duration_seconds",
                "Graph API call duration in seconds, retries included",
            )
            .buckets(vec![0.05, 0.25, 1.0, 5.0, 30.0, 180.0, f64::INFINITY]),
            &["class"],
        )?;
        registry.register(Box::new(api_request_duration_seconds.clone()))?;

        let api_retries_total = IntCounterVec::new(
            Opts::new("api_retries_total", "Total Graph API call replays"),
            &["class"],
        )?;
        registry.register(Box::new(api_retries_total.clone()))?;

        let api_resource_units_total = IntCounterVec::new(
            Opts::new(
                "api_resource_units_total",
                "Total resource units reported by the service",
            ),
            &["class"],
        )?;
        registry.register(Box::new(api_resource_units_total.clone()))?;

        let api_throttled_total = IntCounterVec::new(
            Opts::new("api_throttled_total", "Total attempts answered with 429"),
            &["class"],
        )?;
        registry.register(Box::new(api_throttled_total.clone()))?;

        Ok(Self {
            registry,
            api_requests_total,
            api_request_duration_seconds,
            api_retries_total,
            api_resource_units_total,
            api_throttled_total,
        })
    }

    // ========================================================================
    // Recording helpers
    // ========================================================================

    /// Record one completed call.
    pub fn record_api_call(&self, record: &CallRecord) {
        let class = record.traffic_class.as_str();
        let status = match record.status {
            Some(code) => code.to_string(),
            None => record.outcome.as_str().to_string(),
        };

        self.api_requests_total
            .with_label_values(&[class, status.as_str()])
            .inc();
        self.api_request_duration_seconds
            .with_label_values(&[class])
            .observe(record.latency.as_secs_f64());

        let retries = record.retries();
        if retries > 0 {
            self.api_retries_total
                .with_label_values(&[class])
                .inc_by(u64::from(retries));
        }
        if record.attempts > 0 {
            self.api_resource_units_total
                .with_label_values(&[class])
                .inc_by(u64::from(record.resource_units));
        }
        if record.throttled > 0 {
            self.api_throttled_total
                .with_label_values(&[class])
                .inc_by(u64::from(record.throttled));
        }
    }

    // ========================================================================
    // Encoding
    // ========================================================================

    /// Encode all metrics in Prometheus text exposition format.
    pub fn encode(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl ICallMetricsSink for MetricsRegistry {
    fn record_call(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.record_api_call(record);
        Ok(())
    }
}
