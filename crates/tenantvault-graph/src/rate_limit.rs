//! Rate limiting for Microsoft Graph API calls
//!
//! Provides proactive rate limiting so sustained throughput stays under the
//! service's rolling-window limits.
//!
//! ## Architecture
//!
//! - [`TokenBucket`]: Token bucket with continuous refill and multi-token costs
//! - [`ThrottleFence`]: Pause raised by a 429 `Retry-After`, shared by a traffic class
//! - [`RateLimiter`]: One bucket and one fence per [`TrafficClass`]
//!
//! Service limits are measured over minutes, but the buckets only track a
//! per-second rate. Burst is kept at about one second's worth of tokens so a
//! quiet period cannot later turn into a burst the service would reject.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenantvault_core::domain::TrafficClass;
//! use tenantvault_graph::rate_limit::{RateLimiter, DEFAULT_COST};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), tenantvault_graph::GraphError> {
//! let limiter = RateLimiter::with_defaults();
//! let cancel = CancellationToken::new();
//! limiter.acquire(&cancel, TrafficClass::Standard, DEFAULT_COST).await?;
//! // ... make API call ...
//! # Ok(())
//! # }
//! ```

use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use tenantvault_core::config::{BucketConfig, RateLimitingConfig};
use tenantvault_core::domain::TrafficClass;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{sleep_or_cancel, GraphError};

/// Tokens consumed by an ordinary call
pub const DEFAULT_COST: u32 = 1;

/// Tokens consumed by a permissions lookup
pub const PERMISSIONS_COST: u32 = 5;

/// Upper bound on any server-requested delay
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(3600);

/// Longest single wait while polling an empty bucket
const MAX_POLL_WAIT_SECS: f64 = 60.0;

// ============================================================================
// TokenBucket
// ============================================================================

/// Internal mutable state for the token bucket, protected by a Mutex.
#[derive(Debug)]
struct TokenBucketInner {
    /// Current number of available tokens (fractional for smooth refill)
    tokens: f64,
    /// Timestamp of the last refill calculation
    last_refill: Instant,
}

/// Token bucket rate limiter for a single traffic class.
///
/// Tokens are consumed on each request and refilled at a constant rate, up
/// to `capacity`. The bucket starts full. Time is read from the tokio clock,
/// so tests can drive it with a paused runtime.
#[derive(Debug)]
pub struct TokenBucket {
    /// Maximum number of tokens in the bucket
    capacity: u32,
    /// Rate at which tokens are added (tokens per second)
    refill_rate: f64,
    inner: Mutex<TokenBucketInner>,
}

impl TokenBucket {
    /// Creates a new full `TokenBucket`.
    ///
    /// # Arguments
    /// * `capacity` - Maximum number of tokens (burst)
    /// * `refill_rate` - Tokens added per second
    pub fn new(capacity: u32, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(TokenBucketInner {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Creates a bucket from configuration.
    pub fn from_config(config: BucketConfig) -> Self {
        Self::new(config.burst, config.tokens_per_second)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TokenBucketInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds the tokens accrued since the last refill, capped at capacity.
    fn refill(inner: &mut TokenBucketInner, refill_rate: f64, capacity: u32) {
        let now = Instant::now();
        let elapsed_secs = now.duration_since(inner.last_refill).as_secs_f64();

        if elapsed_secs > 0.0 {
            inner.tokens = (inner.tokens + elapsed_secs * refill_rate).min(capacity as f64);
            inner.last_refill = now;
        }
    }

    /// Attempts to take `n` tokens without waiting.
    ///
    /// Either all `n` tokens are taken or none are.
    pub fn try_acquire(&self, n: u32) -> bool {
        let mut inner = self.lock();
        Self::refill(&mut inner, self.refill_rate, self.capacity);

        let needed = n as f64;
        if inner.tokens >= needed {
            inner.tokens -= needed;
            true
        } else {
            false
        }
    }

    /// Estimated seconds until `n` tokens are available; 0.0 if they already are.
    pub fn time_until_available(&self, n: u32) -> f64 {
        let mut inner = self.lock();
        Self::refill(&mut inner, self.refill_rate, self.capacity);

        let deficit = n as f64 - inner.tokens;
        if deficit <= 0.0 {
            0.0
        } else if self.refill_rate > 0.0 {
            deficit / self.refill_rate
        } else {
            f64::MAX
        }
    }

    /// Returns `false` when spent tokens never come back.
    pub fn refills(&self) -> bool {
        self.refill_rate > 0.0
    }

    /// Returns the current number of available tokens (after refill).
    pub fn available_tokens(&self) -> f64 {
        let mut inner = self.lock();
        Self::refill(&mut inner, self.refill_rate, self.capacity);
        inner.tokens
    }

    /// Returns the burst capacity.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Returns the refill rate in tokens per second.
    pub fn refill_rate(&self) -> f64 {
        self.refill_rate
    }
}

// ============================================================================
// ThrottleFence
// ============================================================================

/// Pause shared by every caller of one traffic class.
///
/// Raised when the service answers 429 with a `Retry-After` delay. Raising
/// never shortens a fence that is already further in the future.
#[derive(Debug, Default)]
pub struct ThrottleFence {
    until: Mutex<Option<Instant>>,
}

impl ThrottleFence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks new acquisitions for `delay` from now.
    pub fn raise(&self, delay: Duration) {
        let candidate = Instant::now() + delay.min(MAX_RETRY_AFTER);
        let mut until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        match *until {
            Some(current) if current >= candidate => {}
            _ => *until = Some(candidate),
        }
    }

    /// Time left before the fence drops, `None` if it is down.
    pub fn remaining(&self) -> Option<Duration> {
        let until = self.until.lock().unwrap_or_else(PoisonError::into_inner);
        until.and_then(|t| {
            let now = Instant::now();
            (t > now).then(|| t - now)
        })
    }
}

// ============================================================================
// RateLimiter
// ============================================================================

/// Bucket and fence for one traffic class.
#[derive(Debug)]
struct ClassLimiter {
    bucket: TokenBucket,
    fence: ThrottleFence,
}

impl ClassLimiter {
    fn new(config: BucketConfig) -> Self {
        Self {
            bucket: TokenBucket::from_config(config),
            fence: ThrottleFence::new(),
        }
    }
}

/// Rate limiter holding one token bucket per traffic class.
///
/// Created once per session and shared via `Arc<RateLimiter>`.
#[derive(Debug)]
pub struct RateLimiter {
    standard: ClassLimiter,
    bulk: ClassLimiter,
}

impl RateLimiter {
    /// Creates a limiter from configuration.
    pub fn new(config: &RateLimitingConfig) -> Self {
        debug!(
            standard_rate = config.standard.tokens_per_second,
            standard_burst = config.standard.burst,
            bulk_rate = config.bulk.tokens_per_second,
            bulk_burst = config.bulk.burst,
            "Creating rate limiter"
        );
        Self {
            standard: ClassLimiter::new(config.standard),
            bulk: ClassLimiter::new(config.bulk),
        }
    }

    /// Creates a limiter with the default Graph API budgets.
    pub fn with_defaults() -> Self {
        Self::new(&RateLimitingConfig::default())
    }

    fn class(&self, class: TrafficClass) -> &ClassLimiter {
        match class {
            TrafficClass::Standard => &self.standard,
            TrafficClass::Bulk => &self.bulk,
        }
    }

    /// Waits until `cost` tokens are available for `class` and takes them.
    ///
    /// Waits for a raised throttle fence first. Returns
    /// [`GraphError::Cancelled`] as soon as `cancel` fires, and
    /// [`GraphError::CostExceedsBurst`] for a cost the bucket can never hold.
    /// A bucket without refill fails with [`GraphError::RateExhausted`] once
    /// it runs dry instead of waiting forever.
    pub async fn acquire(
        &self,
        cancel: &CancellationToken,
        class: TrafficClass,
        cost: u32,
    ) -> Result<(), GraphError> {
        let limiter = self.class(class);
        let burst = limiter.bucket.capacity();
        if cost > burst {
            return Err(GraphError::CostExceedsBurst { class, cost, burst });
        }

        loop {
            if cancel.is_cancelled() {
                return Err(GraphError::Cancelled);
            }

            if let Some(wait) = limiter.fence.remaining() {
                debug!(
                    class = %class,
                    wait_ms = wait.as_millis() as u64,
                    "Throttle fence raised, waiting"
                );
                sleep_or_cancel(cancel, wait).await?;
                continue;
            }

            if limiter.bucket.try_acquire(cost) {
                debug!(class = %class, cost, "Rate limit tokens acquired");
                return Ok(());
            }

            if !limiter.bucket.refills() {
                warn!(class = %class, cost, "Rate limit exhausted with no refill");
                return Err(GraphError::RateExhausted { class });
            }

            let wait_secs = limiter
                .bucket
                .time_until_available(cost)
                .clamp(0.01, MAX_POLL_WAIT_SECS);
            let wait = Duration::from_secs_f64(wait_secs);
            debug!(
                class = %class,
                cost,
                wait_ms = wait.as_millis() as u64,
                "No tokens available, waiting for refill"
            );
            sleep_or_cancel(cancel, wait).await?;
        }
    }

    /// Pauses `class` for `delay` after a 429 response.
    pub fn on_throttle(&self, class: TrafficClass, delay: Duration) {
        info!(
            class = %class,
            delay_ms = delay.as_millis() as u64,
            "Recording throttle event"
        );
        self.class(class).fence.raise(delay);
    }

    /// Current available tokens for `class`.
    pub fn available_tokens(&self, class: TrafficClass) -> f64 {
        self.class(class).bucket.available_tokens()
    }

    /// Burst capacity for `class`.
    pub fn burst(&self, class: TrafficClass) -> u32 {
        self.class(class).bucket.capacity()
    }

    /// Time left on the throttle fence of `class`.
    pub fn fence_remaining(&self, class: TrafficClass) -> Option<Duration> {
        self.class(class).fence.remaining()
    }
}

// ============================================================================
// Retry-After header parsing
// ============================================================================

/// Parses a Retry-After header value into a Duration.
///
/// The header can be either:
/// - A number of seconds, integer or fractional (e.g., "30", "1.5")
/// - An HTTP-date (e.g., "Fri, 31 Dec 2025 23:59:59 GMT"), as time from now
///
/// Values are capped at one hour. Dates in the past and unparseable values
/// yield `None`.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let value = value.trim();

    // Integer seconds first (most common for Graph API)
    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds).min(MAX_RETRY_AFTER));
    }

    if let Ok(seconds) = value.parse::<f64>() {
        if seconds.is_finite() && seconds >= 0.0 {
            return Some(Duration::from_secs_f64(seconds.min(MAX_RETRY_AFTER.as_secs_f64())));
        }
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value) {
        let diff = date.with_timezone(&chrono::Utc) - chrono::Utc::now();
        if let Ok(delay) = diff.to_std() {
            if !delay.is_zero() {
                return Some(delay.min(MAX_RETRY_AFTER));
            }
        }
    }

    warn!(value, "Could not parse Retry-After header");
    None
}
