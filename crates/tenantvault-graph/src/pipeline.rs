//! Request pipeline
//!
//! Every outbound Graph call goes through [`RequestPipeline::execute`]:
//!
//! 1. a concurrency slot for the request's traffic class is taken and held
//!    until the call returns;
//! 2. rate-limit tokens for the class and cost are acquired;
//! 3. the retry middleware drives the transport;
//! 4. a [`CallRecord`] is handed to the metrics sink, whatever the outcome.
//!
//! The limiters are built once per session and shared; there is no global
//! state.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderValue;
use tenantvault_core::config::Config;
use tenantvault_core::ports::{CallOutcome, CallRecord, ICallMetricsSink, NoopMetricsSink};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::concurrency::ConcurrencyLimiters;
use crate::rate_limit::RateLimiter;
use crate::request::{GraphRequest, GraphResponse, CLIENT_REQUEST_ID_HEADER};
use crate::retry::{RetryMiddleware, RetryPolicy};
use crate::transport::{ReqwestTransport, Transport};
use crate::GraphError;

/// Rate-limited, concurrency-capped, retrying executor of Graph requests.
#[derive(Clone)]
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    rate_limiter: Arc<RateLimiter>,
    concurrency: ConcurrencyLimiters,
    retry: RetryMiddleware,
    metrics: Arc<dyn ICallMetricsSink>,
    default_timeout: Option<Duration>,
}

impl std::fmt::Debug for RequestPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestPipeline")
            .field("rate_limiter", &self.rate_limiter)
            .field("concurrency", &self.concurrency)
            .field("retry", &self.retry)
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl RequestPipeline {
    /// Assembles a pipeline from its parts.
    ///
    /// The retry middleware is wired to `rate_limiter` so 429 responses
    /// raise the throttle fence of their class.
    pub fn new(
        transport: Arc<dyn Transport>,
        rate_limiter: Arc<RateLimiter>,
        concurrency: ConcurrencyLimiters,
        retry_policy: RetryPolicy,
    ) -> Self {
        let retry = RetryMiddleware::new(retry_policy).with_rate_limiter(Arc::clone(&rate_limiter));
        Self {
            transport,
            rate_limiter,
            concurrency,
            retry,
            metrics: Arc::new(NoopMetricsSink),
            default_timeout: None,
        }
    }

    /// Validates `config` and builds a pipeline over a reqwest transport.
    pub fn from_config(config: &Config) -> Result<Self, GraphError> {
        let errors = config.validate();
        if !errors.is_empty() {
            return Err(GraphError::InvalidConfig(errors));
        }
        Ok(Self::with_transport(config, Arc::new(ReqwestTransport::new())))
    }

    /// Builds a pipeline over `transport` from configuration.
    pub fn with_transport(config: &Config, transport: Arc<dyn Transport>) -> Self {
        Self::new(
            transport,
            Arc::new(RateLimiter::new(&config.rate_limiting)),
            ConcurrencyLimiters::new(&config.concurrency),
            RetryPolicy::from_config(&config.retry),
        )
        .with_default_timeout(config.http.request_timeout())
    }

    /// Sets the sink that receives one record per call.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<dyn ICallMetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Deadline applied to each attempt of requests that set none.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = Some(timeout);
        self
    }

    pub fn rate_limiter(&self) -> &Arc<RateLimiter> {
        &self.rate_limiter
    }

    pub fn concurrency(&self) -> &ConcurrencyLimiters {
        &self.concurrency
    }

    /// Executes `request`, returning the final successful response.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        mut request: GraphRequest,
    ) -> Result<GraphResponse, GraphError> {
        let started = Instant::now();
        self.prepare(&mut request);

        let result = self.run(cancel, &mut request).await;
        self.record(&request, &result, started.elapsed());

        result.map(|attempted| attempted.response)
    }

    fn prepare(&self, request: &mut GraphRequest) {
        if !request.headers.contains_key(CLIENT_REQUEST_ID_HEADER) {
            let id = uuid::Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&id) {
                request.headers.insert(CLIENT_REQUEST_ID_HEADER, value);
            }
        }
        if request.timeout.is_none() {
            request.timeout = self.default_timeout;
        }
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        request: &mut GraphRequest,
    ) -> Result<crate::retry::Attempted, GraphError> {
        let class = request.traffic_class;
        let _permit = self.concurrency.for_class(class).acquire(cancel).await?;
        self.rate_limiter.acquire(cancel, class, request.cost).await?;

        debug!(
            method = %request.method,
            class = %class,
            cost = request.cost,
            "Dispatching request"
        );
        self.retry
            .execute(cancel, self.transport.as_ref(), request)
            .await
    }

    fn record(
        &self,
        request: &GraphRequest,
        result: &Result<crate::retry::Attempted, GraphError>,
        latency: Duration,
    ) {
        let (status, attempts, resource_units, outcome) = match result {
            Ok(attempted) => (
                Some(attempted.response.status),
                attempted.attempts,
                attempted.response.resource_units(),
                CallOutcome::Success,
            ),
            Err(GraphError::Cancelled) => (None, 0, 1, CallOutcome::Cancelled),
            Err(err @ GraphError::Status { .. }) => (
                err.status(),
                err.context().map_or(1, |c| c.attempts),
                1,
                CallOutcome::HttpError,
            ),
            Err(err) => (
                None,
                err.context().map_or(0, |c| c.attempts),
                1,
                CallOutcome::TransportError,
            ),
        };
        let throttled = match result {
            Ok(attempted) => attempted.throttled,
            Err(err) => err.context().map_or(0, |c| c.throttled),
        };

        let record = CallRecord {
            traffic_class: request.traffic_class,
            method: request.method.to_string(),
            status,
            attempts,
            latency,
            resource_units,
            throttled,
            outcome,
        };

        if let Err(e) = self.metrics.record_call(&record) {
            warn!(error = %e, "Failed to record call metrics");
        }
    }
}
