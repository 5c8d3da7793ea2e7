//! TenantVault Graph - resilient access layer for the Microsoft Graph API
//!
//! Every outbound call is admitted by a per-class concurrency limiter and
//! token bucket, then driven by a retry middleware that replays transient
//! failures with provider-aware backoff. Failures are classified from
//! structured error chains.
//!
//! ## Modules
//!
//! - [`request`] - Transport-agnostic request and response model
//! - [`transport`] - Transport port and the reqwest implementation
//! - [`error`] - Error types with request context
//! - [`classify`] - Error classification taxonomy
//! - [`rate_limit`] - Token buckets and throttle fences per traffic class
//! - [`concurrency`] - In-flight request caps per traffic class
//! - [`retry`] - Retry state machine and backoff
//! - [`pipeline`] - Composition of the above around a transport
//! - [`client`] - Authenticated convenience client

pub mod classify;
pub mod client;
pub mod concurrency;
pub mod error;
pub mod pipeline;
pub mod rate_limit;
pub mod request;
pub mod retry;
pub mod transport;

use std::time::Duration;

use tokio_util::sync::CancellationToken;

pub use classify::ErrorClass;
pub use error::{GraphError, ODataError, RequestContext, TransportError};
pub use pipeline::RequestPipeline;
pub use request::{GraphRequest, GraphResponse, RequestBody};

/// Sleeps for `duration`, or returns [`GraphError::Cancelled`] as soon as
/// `cancel` fires.
pub(crate) async fn sleep_or_cancel(
    cancel: &CancellationToken,
    duration: Duration,
) -> Result<(), GraphError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GraphError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}
