//! Concurrency limiting
//!
//! Caps the number of requests of one traffic class that are in flight at
//! the same time. A [`ConcurrencyPermit`] is held for the whole duration of
//! a call, retries included, and frees its slot when dropped.

use std::sync::Arc;

use tenantvault_core::config::{ConcurrencyConfig, DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use tenantvault_core::domain::TrafficClass;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::GraphError;

/// Slot held by an in-flight request
#[derive(Debug)]
pub struct ConcurrencyPermit {
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencyPermit {
    /// Releases the slot. Equivalent to dropping the permit.
    pub fn release(self) {}
}

/// Counting gate over in-flight requests.
///
/// Capacity is fixed at construction; out-of-range values fall back to
/// [`DEFAULT_CONCURRENCY`].
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: usize) -> Self {
        let capacity = if (1..=MAX_CONCURRENCY).contains(&capacity) {
            capacity
        } else {
            warn!(
                requested = capacity,
                max = MAX_CONCURRENCY,
                fallback = DEFAULT_CONCURRENCY,
                "Invalid concurrency capacity, using default"
            );
            DEFAULT_CONCURRENCY
        };

        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Waits for a free slot.
    ///
    /// Returns [`GraphError::Cancelled`] if `cancel` fires first; no slot is
    /// taken in that case.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<ConcurrencyPermit, GraphError> {
        let semaphore = Arc::clone(&self.semaphore);
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GraphError::Cancelled),
            permit = semaphore.acquire_owned() => {
                // The semaphore is never closed
                let permit = permit.map_err(|_| GraphError::Cancelled)?;
                Ok(ConcurrencyPermit { _permit: permit })
            }
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of slots currently held.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.semaphore.available_permits()
    }
}

/// One limiter per traffic class
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiters {
    standard: ConcurrencyLimiter,
    bulk: ConcurrencyLimiter,
}

impl ConcurrencyLimiters {
    pub fn new(config: &ConcurrencyConfig) -> Self {
        debug!(
            standard = config.standard,
            bulk = config.bulk,
            "Creating concurrency limiters"
        );
        Self {
            standard: ConcurrencyLimiter::new(config.standard),
            bulk: ConcurrencyLimiter::new(config.bulk),
        }
    }

    pub fn for_class(&self, class: TrafficClass) -> &ConcurrencyLimiter {
        match class {
            TrafficClass::Standard => &self.standard,
            TrafficClass::Bulk => &self.bulk,
        }
    }
}

impl Default for ConcurrencyLimiters {
    fn default() -> Self {
        Self::new(&ConcurrencyConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[test]
    fn test_capacity_validation() {
        assert_eq!(ConcurrencyLimiter::new(1).capacity(), 1);
        assert_eq!(ConcurrencyLimiter::new(MAX_CONCURRENCY).capacity(), MAX_CONCURRENCY);
        assert_eq!(ConcurrencyLimiter::new(0).capacity(), DEFAULT_CONCURRENCY);
        assert_eq!(
            ConcurrencyLimiter::new(MAX_CONCURRENCY + 1).capacity(),
            DEFAULT_CONCURRENCY
        );
    }

    #[tokio::test]
    async fn test_permit_release_on_drop() {
        let limiter = ConcurrencyLimiter::new(2);
        let cancel = CancellationToken::new();

        let a = limiter.acquire(&cancel).await.unwrap();
        let b = limiter.acquire(&cancel).await.unwrap();
        assert_eq!(limiter.in_flight(), 2);

        drop(a);
        assert_eq!(limiter.in_flight(), 1);
        b.release();
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_takes_no_slot() {
        let limiter = ConcurrencyLimiter::new(1);
        let cancel = CancellationToken::new();
        let held = limiter.acquire(&cancel).await.unwrap();

        let waiter = {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { limiter.acquire(&cancel).await })
        };
        tokio::task::yield_now().await;
        cancel.cancel();

        assert!(matches!(waiter.await.unwrap(), Err(GraphError::Cancelled)));
        drop(held);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_in_flight_never_exceeds_capacity() {
        let limiter = ConcurrencyLimiter::new(3);
        let cancel = CancellationToken::new();
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..20 {
            let limiter = limiter.clone();
            let cancel = cancel.clone();
            let current = Arc::clone(&current);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                let _permit = limiter.acquire(&cancel).await.unwrap();
                let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                current.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.in_flight(), 0);
    }

    #[test]
    fn test_limiters_per_class() {
        let limiters = ConcurrencyLimiters::new(&ConcurrencyConfig {
            standard: 2,
            bulk: 8,
        });
        assert_eq!(limiters.for_class(TrafficClass::Standard).capacity(), 2);
        assert_eq!(limiters.for_class(TrafficClass::Bulk).capacity(), 8);
    }
}
