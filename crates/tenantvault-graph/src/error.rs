//! Error types for the request pipeline
//!
//! [`GraphError`] is what callers of the pipeline see. Every variant that
//! relates to an outbound request carries a [`RequestContext`] naming the
//! method, target URL, final status and number of attempts, so a failure
//! can be attributed without a stack trace.
//!
//! Provider error codes are parsed into [`ODataError`] and attached as the
//! error source; classification inspects that structure, never the message.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use serde::Deserialize;
use tenantvault_core::config::ValidationError;
use tenantvault_core::domain::TrafficClass;
use thiserror::Error;

use crate::classify::{classify, ErrorClass};
use crate::request::GraphResponse;

// ============================================================================
// RequestContext
// ============================================================================

/// Diagnostic context attached to request failures
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// HTTP method
    pub method: String,
    /// Target URL without query string
    pub url: String,
    /// Final HTTP status, if a response was received
    pub status: Option<u16>,
    /// Number of transport attempts made
    pub attempts: u32,
    /// Attempts answered with 429
    pub throttled: u32,
}

impl RequestContext {
    /// Builds a context, stripping the query string and fragment from `url`.
    ///
    /// Query strings may carry delta tokens or skip tokens that are both
    /// noisy and sensitive.
    pub fn new(method: impl Into<String>, url: &str, status: Option<u16>, attempts: u32) -> Self {
        let url = match url::Url::parse(url) {
            Ok(mut parsed) => {
                parsed.set_query(None);
                parsed.set_fragment(None);
                parsed.to_string()
            }
            Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
        };

        Self {
            method: method.into(),
            url,
            status,
            attempts,
            throttled: 0,
        }
    }

    /// Sets the number of throttled attempts.
    #[must_use]
    pub fn with_throttled(mut self, throttled: u32) -> Self {
        self.throttled = throttled;
        self
    }
}

impl Display for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let plural = if self.attempts == 1 { "" } else { "s" };
        write!(
            f,
            "{} {} after {} attempt{plural}",
            self.method, self.url, self.attempts
        )
    }
}

// ============================================================================
// ODataError
// ============================================================================

/// Service error payload (`{"error": {"code": ..., "message": ...}}`)
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Error)]
#[error("{code}: {message}")]
pub struct ODataError {
    /// Provider error code, e.g. `ErrorItemNotFound`
    #[serde(default)]
    pub code: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Nested details
    #[serde(default, rename = "innerError", alias = "innererror")]
    pub inner_error: Option<InnerError>,
}

/// Nested error details
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InnerError {
    /// More specific provider code
    #[serde(default)]
    pub code: Option<String>,
    /// Service-side request ID
    #[serde(default, rename = "request-id")]
    pub request_id: Option<String>,
    /// Request ID sent by this client
    #[serde(default, rename = "client-request-id")]
    pub client_request_id: Option<String>,
}

#[derive(Deserialize)]
struct ODataEnvelope {
    error: ODataError,
}

impl ODataError {
    /// Parses the error envelope from a response body.
    pub fn from_body(body: &[u8]) -> Option<Self> {
        if body.is_empty() {
            return None;
        }
        serde_json::from_slice::<ODataEnvelope>(body)
            .ok()
            .map(|envelope| envelope.error)
    }

    /// Returns `true` if the top-level or inner code equals `code`.
    pub fn has_code(&self, code: &str) -> bool {
        self.code == code
            || self
                .inner_error
                .as_ref()
                .and_then(|inner| inner.code.as_deref())
                == Some(code)
    }

    /// Returns `true` if any of `codes` matches.
    pub fn has_any_code(&self, codes: &[&str]) -> bool {
        codes.iter().any(|c| self.has_code(c))
    }
}

// ============================================================================
// TransportError
// ============================================================================

/// Failures that happen before a response is received
#[derive(Debug, Error)]
pub enum TransportError {
    /// The attempt exceeded its deadline
    #[error("request timed out")]
    Timeout,

    /// The peer reset the connection
    #[error("connection reset: {0}")]
    ConnectionReset(String),

    /// The connection could not be established
    #[error("connection failed: {0}")]
    Connect(String),

    /// The request body could not be read
    #[error("reading request body failed: {0}")]
    Body(#[source] std::io::Error),

    /// Any other transport failure
    #[error("transport failure: {0}")]
    Other(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl TransportError {
    /// Maps a reqwest error onto the transport taxonomy.
    pub fn from_reqwest(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return TransportError::Timeout;
        }

        let mut source: Option<&(dyn std::error::Error + 'static)> = Some(&err);
        while let Some(e) = source {
            if let Some(io) = e.downcast_ref::<std::io::Error>() {
                match io.kind() {
                    std::io::ErrorKind::TimedOut => return TransportError::Timeout,
                    std::io::ErrorKind::ConnectionReset
                    | std::io::ErrorKind::ConnectionAborted
                    | std::io::ErrorKind::BrokenPipe => {
                        return TransportError::ConnectionReset(err.to_string())
                    }
                    _ => {}
                }
            }
            source = e.source();
        }

        if err.is_connect() {
            return TransportError::Connect(err.to_string());
        }

        TransportError::Other(Box::new(err))
    }
}

impl From<tokio::time::error::Elapsed> for TransportError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        TransportError::Timeout
    }
}

// ============================================================================
// GraphError
// ============================================================================

/// Errors surfaced by the request pipeline
#[derive(Debug, Error)]
pub enum GraphError {
    /// The service answered with a terminal non-success status
    #[error("{context} returned HTTP {status}{}", odata_suffix(.odata))]
    Status {
        /// Request context
        context: RequestContext,
        /// HTTP status code
        status: u16,
        /// Parsed provider error, if the body carried one
        #[source]
        odata: Option<ODataError>,
        /// Server-requested delay from the last response
        retry_after: Option<Duration>,
    },

    /// No response was received
    #[error("{context} failed: {source}")]
    Transport {
        /// Request context
        context: RequestContext,
        /// Underlying transport failure
        #[source]
        source: TransportError,
    },

    /// The caller cancelled the operation
    #[error("operation cancelled")]
    Cancelled,

    /// A bodied request could not be rewound for a replay
    #[error("{context}: rewinding request body failed: {source}")]
    BodyRewind {
        /// Request context
        context: RequestContext,
        /// Seek failure
        #[source]
        source: std::io::Error,
    },

    /// A single call asked for more tokens than the bucket can ever hold
    #[error("cost {cost} exceeds burst {burst} of traffic class {class}")]
    CostExceedsBurst {
        /// Traffic class charged
        class: TrafficClass,
        /// Requested cost
        cost: u32,
        /// Bucket capacity
        burst: u32,
    },

    /// A traffic class has no tokens left and never refills
    #[error("rate limit of traffic class {class} is exhausted and does not refill")]
    RateExhausted {
        /// Traffic class charged
        class: TrafficClass,
    },

    /// The request could not be built
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The pipeline configuration was rejected
    #[error("invalid configuration: {}", join_errors(.0))]
    InvalidConfig(Vec<ValidationError>),

    /// The response could not be decoded
    #[error("{context}: invalid response: {message}")]
    InvalidResponse {
        /// Request context
        context: RequestContext,
        /// Decoder failure
        message: String,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn odata_suffix(odata: &Option<ODataError>) -> String {
    match odata {
        Some(e) if !e.code.is_empty() => format!(" ({})", e.code),
        _ => String::new(),
    }
}

impl GraphError {
    /// Builds a `Status` error from a terminal response.
    pub fn from_response(context: RequestContext, response: &GraphResponse) -> Self {
        GraphError::Status {
            context,
            status: response.status,
            odata: response.odata_error(),
            retry_after: response.retry_after(),
        }
    }

    /// Final HTTP status, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GraphError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Request context, if the failure relates to a request.
    pub fn context(&self) -> Option<&RequestContext> {
        match self {
            GraphError::Status { context, .. }
            | GraphError::Transport { context, .. }
            | GraphError::BodyRewind { context, .. }
            | GraphError::InvalidResponse { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Provider error, if the service returned one.
    pub fn odata(&self) -> Option<&ODataError> {
        match self {
            GraphError::Status { odata, .. } => odata.as_ref(),
            _ => None,
        }
    }

    /// Classifies this error.
    pub fn class(&self) -> ErrorClass {
        classify(Some(self))
    }
}
