//! Error classification
//!
//! Maps raw failures onto the small taxonomy callers branch on. Each
//! classifier walks the `source()` chain and inspects structured error
//! values: transport variants, timer expiry, I/O error kinds, HTTP status
//! and provider error codes. Message text is never matched.
//!
//! All classifiers return `None` for `None` input and for unrelated errors,
//! so they can be chained.

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::io;

use crate::error::{GraphError, ODataError, TransportError};

/// Provider codes meaning the object was deleted between listing and fetch
pub const DELETED_IN_FLIGHT_CODES: &[&str] = &[
    "ErrorItemNotFound",
    "itemNotFound",
    "ErrorSyncFolderNotFound",
    "NotFound",
];

/// Provider codes meaning a stored delta token can no longer be used
pub const INVALID_DELTA_CODES: &[&str] = &["ResyncRequired", "SyncStateNotFound", "SyncStateInvalid"];

/// Provider codes reporting throttling
pub const THROTTLED_CODES: &[&str] = &["ApplicationThrottled", "TooManyRequests"];

/// HTTP status for throttled calls
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Failure taxonomy exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// An attempt exceeded its deadline
    Timeout,
    /// The connection was reset by the peer
    ConnectionReset,
    /// The service throttled the caller
    Throttled,
    /// The object was deleted while being processed; skip it
    DeletedInFlight,
    /// The stored delta token must be discarded
    InvalidDeltaToken,
    /// None of the above
    Unclassified,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Timeout => "timeout",
            ErrorClass::ConnectionReset => "connection_reset",
            ErrorClass::Throttled => "throttled",
            ErrorClass::DeletedInFlight => "deleted_in_flight",
            ErrorClass::InvalidDeltaToken => "invalid_delta_token",
            ErrorClass::Unclassified => "unclassified",
        }
    }

    /// Returns `true` for classes the retry middleware replays.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ErrorClass::Timeout | ErrorClass::ConnectionReset | ErrorClass::Throttled
        )
    }
}

impl Display for ErrorClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type ErrRef<'a> = Option<&'a (dyn StdError + 'static)>;

fn chain(err: ErrRef<'_>) -> impl Iterator<Item = &(dyn StdError + 'static)> {
    std::iter::successors(err, |&e| e.source())
}

/// Finds a provider error anywhere in the chain.
fn odata_in_chain(err: ErrRef<'_>) -> Option<&ODataError> {
    chain(err).find_map(|e| e.downcast_ref::<ODataError>())
}

// ============================================================================
// Classifiers
// ============================================================================

/// Deadline exceeded at the transport or timer level.
pub fn classify_timeout(err: ErrRef<'_>) -> Option<ErrorClass> {
    chain(err)
        .any(|e| {
            matches!(e.downcast_ref::<TransportError>(), Some(TransportError::Timeout))
                || e.is::<tokio::time::error::Elapsed>()
                || e.downcast_ref::<io::Error>()
                    .is_some_and(|ioe| ioe.kind() == io::ErrorKind::TimedOut)
                || e.downcast_ref::<reqwest::Error>()
                    .is_some_and(reqwest::Error::is_timeout)
        })
        .then_some(ErrorClass::Timeout)
}

/// Low-level connection reset.
pub fn classify_connection_reset(err: ErrRef<'_>) -> Option<ErrorClass> {
    chain(err)
        .any(|e| {
            matches!(
                e.downcast_ref::<TransportError>(),
                Some(TransportError::ConnectionReset(_))
            ) || e
                .downcast_ref::<io::Error>()
                .is_some_and(|ioe| ioe.kind() == io::ErrorKind::ConnectionReset)
        })
        .then_some(ErrorClass::ConnectionReset)
}

/// HTTP 429 or a provider throttling code.
pub fn classify_throttled(err: ErrRef<'_>) -> Option<ErrorClass> {
    let status_429 = chain(err).any(|e| {
        matches!(
            e.downcast_ref::<GraphError>(),
            Some(GraphError::Status { status: TOO_MANY_REQUESTS, .. })
        )
    });
    let throttled_code = odata_in_chain(err).is_some_and(|o| o.has_any_code(THROTTLED_CODES));

    (status_429 || throttled_code).then_some(ErrorClass::Throttled)
}

/// Provider "not found" codes for objects deleted mid-run.
pub fn classify_deleted_in_flight(err: ErrRef<'_>) -> Option<ErrorClass> {
    odata_in_chain(err)
        .is_some_and(|o| o.has_any_code(DELETED_IN_FLIGHT_CODES))
        .then_some(ErrorClass::DeletedInFlight)
}

/// Provider "resync required" codes.
pub fn classify_invalid_delta(err: ErrRef<'_>) -> Option<ErrorClass> {
    odata_in_chain(err)
        .is_some_and(|o| o.has_any_code(INVALID_DELTA_CODES))
        .then_some(ErrorClass::InvalidDeltaToken)
}

/// Runs every classifier in turn; `Unclassified` when none matched.
pub fn classify(err: ErrRef<'_>) -> ErrorClass {
    classify_timeout(err)
        .or_else(|| classify_connection_reset(err))
        .or_else(|| classify_throttled(err))
        .or_else(|| classify_deleted_in_flight(err))
        .or_else(|| classify_invalid_delta(err))
        .unwrap_or(ErrorClass::Unclassified)
}
