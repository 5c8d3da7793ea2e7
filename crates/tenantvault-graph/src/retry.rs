//! Retry middleware
//!
//! Wraps one [`Transport`] call with automatic replays of transient
//! failures. Each outbound call runs a small state machine:
//!
//! - **Attempting**: the request is sent, bounded by its per-attempt timeout.
//! - **Success**: any status below 400 that is not retryable.
//! - **Fatal**: non-retryable 4xx/5xx, non-transient transport errors,
//!   cancellation, or a body that cannot be rewound.
//! - **Retrying**: a retryable status or a timeout/reset, while retries,
//!   replayability and the cumulative delay ceiling all allow it.
//! - **Exhausted**: the last failure is surfaced with its request context.
//!
//! The delay before a replay is the server's `Retry-After` when present,
//! otherwise the next interval of an [`ExponentialBackoff`].

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderValue;
use tenantvault_core::config::RetryConfig;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::classify::{classify, ErrorClass, TOO_MANY_REQUESTS};
use crate::error::{RequestContext, TransportError};
use crate::rate_limit::RateLimiter;
use crate::request::{GraphRequest, GraphResponse, RETRY_ATTEMPT_HEADER};
use crate::transport::Transport;
use crate::{sleep_or_cancel, GraphError};

/// Statuses replayed by the middleware
pub const RETRYABLE_STATUSES: [u16; 5] = [TOO_MANY_REQUESTS, 500, 502, 503, 504];

/// Multiplier applied to the backoff interval after each replay
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Returns `true` for statuses the middleware replays.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUSES.contains(&status)
}

// ============================================================================
// Backoff
// ============================================================================

/// Source of delays between attempts when the server gives none.
pub trait Backoff: Send {
    /// Returns the next delay and advances the schedule.
    fn next_interval(&mut self) -> Duration;
}

/// Exponential backoff with an optional per-interval cap.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    current: Duration,
    multiplier: f64,
    max_interval: Option<Duration>,
}

impl ExponentialBackoff {
    pub fn new(initial: Duration, multiplier: f64, max_interval: Option<Duration>) -> Self {
        Self {
            current: initial,
            multiplier,
            max_interval,
        }
    }
}

impl Backoff for ExponentialBackoff {
    fn next_interval(&mut self) -> Duration {
        let interval = match self.max_interval {
            Some(max) => self.current.min(max),
            None => self.current,
        };
        self.current = self.current.mul_f64(self.multiplier);
        interval
    }
}

/// Builds a fresh backoff schedule for each outbound call.
pub type BackoffFactory = Arc<dyn Fn() -> Box<dyn Backoff> + Send + Sync>;

// ============================================================================
// RetryPolicy
// ============================================================================

/// Limits applied to a single outbound call.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Replays allowed after the first attempt
    pub max_retries: u32,
    /// No replay starts once the summed delays reach this value
    pub absolute_delay_ceiling: Duration,
    backoff: BackoffFactory,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_retries", &self.max_retries)
            .field("absolute_delay_ceiling", &self.absolute_delay_ceiling)
            .finish_non_exhaustive()
    }
}

impl RetryPolicy {
    /// Creates a policy with exponential backoff (multiplier 2).
    pub fn new(
        max_retries: u32,
        initial_backoff: Duration,
        max_backoff: Option<Duration>,
        absolute_delay_ceiling: Duration,
    ) -> Self {
        Self {
            max_retries,
            absolute_delay_ceiling,
            backoff: Arc::new(move || {
                Box::new(ExponentialBackoff::new(
                    initial_backoff,
                    BACKOFF_MULTIPLIER,
                    max_backoff,
                ))
            }),
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.max_retries,
            config.initial_backoff(),
            config.max_backoff(),
            config.absolute_delay_ceiling(),
        )
    }

    /// Replaces the backoff schedule.
    #[must_use]
    pub fn with_backoff(mut self, factory: BackoffFactory) -> Self {
        self.backoff = factory;
        self
    }

    fn new_backoff(&self) -> Box<dyn Backoff> {
        (self.backoff)()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

// ============================================================================
// RetryMiddleware
// ============================================================================

/// Successful result of a call, with the number of attempts it took.
#[derive(Debug, Clone)]
pub struct Attempted {
    pub response: GraphResponse,
    pub attempts: u32,
    /// Attempts answered with 429 before the final one
    pub throttled: u32,
}

/// Failure of a single attempt that may be replayed
enum Transient {
    Response(GraphResponse),
    Transport(TransportError),
}

/// Replays transient failures of a transport call.
#[derive(Debug, Clone, Default)]
pub struct RetryMiddleware {
    policy: RetryPolicy,
    rate_limiter: Option<Arc<RateLimiter>>,
}

impl RetryMiddleware {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            rate_limiter: None,
        }
    }

    /// Raises the throttle fence of `limiter` on every 429 carrying `Retry-After`.
    #[must_use]
    pub fn with_rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Executes `request` through `transport`, replaying transient failures.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        transport: &dyn Transport,
        request: &mut GraphRequest,
    ) -> Result<Attempted, GraphError> {
        let mut backoff = self.policy.new_backoff();
        let mut attempts: u32 = 0;
        let mut throttled: u32 = 0;
        let mut cumulative_delay = Duration::ZERO;

        loop {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            if attempts > 0 {
                request
                    .headers
                    .insert(RETRY_ATTEMPT_HEADER, HeaderValue::from(attempts));
                if let Err(source) = request.body.rewind() {
                    return Err(GraphError::BodyRewind {
                        context: context(request, None, attempts, throttled),
                        source,
                    });
                }
            }

            attempts += 1;
            let failure = match self.attempt(cancel, transport, request).await? {
                Ok(response) if !is_retryable_status(response.status) => {
                    if response.status < 400 {
                        if attempts > 1 {
                            info!(
                                url = %context(request, None, attempts, throttled).url,
                                attempts,
                                throttled,
                                "Request succeeded after retry"
                            );
                        }
                        let mut response = response;
                        response.attempts = attempts;
                        return Ok(Attempted {
                            response,
                            attempts,
                            throttled,
                        });
                    }
                    let ctx = context(request, Some(response.status), attempts, throttled);
                    return Err(GraphError::from_response(ctx, &response));
                }
                Ok(response) => {
                    if response.status == TOO_MANY_REQUESTS {
                        throttled += 1;
                        self.on_throttled(request, &response, attempts);
                    }
                    Transient::Response(response)
                }
                Err(err) => match classify(Some(&err)) {
                    ErrorClass::Timeout | ErrorClass::ConnectionReset => Transient::Transport(err),
                    _ => {
                        return Err(GraphError::Transport {
                            context: context(request, None, attempts, throttled),
                            source: err,
                        })
                    }
                },
            };

            let retried = attempts - 1;
            let exhausted = retried >= self.policy.max_retries
                || !request.body.is_replayable()
                || cumulative_delay >= self.policy.absolute_delay_ceiling;
            if exhausted {
                warn!(
                    method = %request.method,
                    url = %context(request, None, attempts, throttled).url,
                    attempts,
                    throttled,
                    cumulative_delay_ms = cumulative_delay.as_millis() as u64,
                    replayable = request.body.is_replayable(),
                    "Retries exhausted"
                );
                return Err(exhausted_error(request, failure, attempts, throttled));
            }

            let retry_after = match &failure {
                Transient::Response(response) => response.retry_after(),
                Transient::Transport(_) => None,
            };
            let delay = retry_after.unwrap_or_else(|| backoff.next_interval());
            cumulative_delay += delay;

            debug!(
                method = %request.method,
                attempt = attempts,
                delay_ms = delay.as_millis() as u64,
                server_delay = retry_after.is_some(),
                reason = %failure_reason(&failure),
                "Retrying request"
            );

            sleep_or_cancel(cancel, delay).await?;
        }
    }

    /// Sends one attempt, bounded by the request timeout and `cancel`.
    ///
    /// The outer `Err` is cancellation; the inner result is the attempt's.
    async fn attempt(
        &self,
        cancel: &CancellationToken,
        transport: &dyn Transport,
        request: &mut GraphRequest,
    ) -> Result<Result<GraphResponse, TransportError>, GraphError> {
        let timeout = request.timeout;
        let send = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, transport.send(request))
                    .await
                    .unwrap_or_else(|elapsed| Err(elapsed.into())),
                None => transport.send(request).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GraphError::Cancelled),
            result = send => Ok(result),
        }
    }

    fn on_throttled(&self, request: &GraphRequest, response: &GraphResponse, attempts: u32) {
        let retry_after = response.retry_after();
        info!(
            method = %request.method,
            url = %context(request, Some(response.status), attempts, 0).url,
            class = %request.traffic_class,
            attempts,
            retry_after_ms = retry_after.map(|d| d.as_millis() as u64),
            "Received 429, backing off"
        );

        if let (Some(limiter), Some(delay)) = (&self.rate_limiter, retry_after) {
            limiter.on_throttle(request.traffic_class, delay);
        }
    }
}

fn context(
    request: &GraphRequest,
    status: Option<u16>,
    attempts: u32,
    throttled: u32,
) -> RequestContext {
    RequestContext::new(request.method.as_str(), &request.url, status, attempts)
        .with_throttled(throttled)
}

fn exhausted_error(
    request: &GraphRequest,
    failure: Transient,
    attempts: u32,
    throttled: u32,
) -> GraphError {
    match failure {
        Transient::Response(response) => GraphError::from_response(
            context(request, Some(response.status), attempts, throttled),
            &response,
        ),
        Transient::Transport(source) => GraphError::Transport {
            context: context(request, None, attempts, throttled),
            source,
        },
    }
}

fn failure_reason(failure: &Transient) -> String {
    match failure {
        Transient::Response(response) => format!("HTTP {}", response.status),
        Transient::Transport(err) => err.to_string(),
    }
}
