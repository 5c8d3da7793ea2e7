//! Request and response model
//!
//! [`GraphRequest`] is transport-agnostic: the pipeline decides admission
//! from its traffic class and cost, the retry middleware decides whether it
//! can be replayed from its [`RequestBody`].

use std::io::{Read, Seek, SeekFrom};
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tenantvault_core::domain::TrafficClass;

use crate::error::{GraphError, ODataError};
use crate::rate_limit::{parse_retry_after, DEFAULT_COST};

/// Header carrying the service-reported cost of a call
pub const RESOURCE_UNIT_HEADER: &str = "x-ms-resource-unit";

/// Header carrying the server-requested delay
pub const RETRY_AFTER_HEADER: &str = "retry-after";

/// Header set on every replay with the replay number
pub const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";

/// Header correlating a call with service-side logs
pub const CLIENT_REQUEST_ID_HEADER: &str = "client-request-id";

/// Upper bound on the buffer reserved up front for a seekable body
const MAX_BODY_PREALLOC: usize = 1 << 20;

// ============================================================================
// RequestBody
// ============================================================================

/// Readers that can be rewound for a replay.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// Body of an outbound request
#[derive(Default)]
pub enum RequestBody {
    /// No body
    #[default]
    Empty,
    /// Fully buffered bytes
    Buffered(Vec<u8>),
    /// Streamed from a seekable reader
    Seekable {
        /// Source of the body bytes
        reader: Box<dyn ReadSeek>,
        /// Declared length; `None` means unknown
        len: Option<u64>,
    },
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestBody::Empty => f.write_str("Empty"),
            RequestBody::Buffered(bytes) => write!(f, "Buffered({} bytes)", bytes.len()),
            RequestBody::Seekable { len, .. } => write!(f, "Seekable(len: {len:?})"),
        }
    }
}

impl RequestBody {
    /// Returns `true` when the body can safely be sent again.
    ///
    /// Seekable bodies qualify only with a declared length, so a partially
    /// consumed stream of unknown size is never resent.
    pub fn is_replayable(&self) -> bool {
        match self {
            RequestBody::Empty | RequestBody::Buffered(_) => true,
            RequestBody::Seekable { len, .. } => len.is_some(),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, RequestBody::Empty)
    }

    /// Seeks the body back to offset 0.
    pub fn rewind(&mut self) -> std::io::Result<()> {
        match self {
            RequestBody::Empty | RequestBody::Buffered(_) => Ok(()),
            RequestBody::Seekable { reader, .. } => reader.seek(SeekFrom::Start(0)).map(|_| ()),
        }
    }

    /// Reads the body from its current position into memory.
    pub fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        match self {
            RequestBody::Empty => Ok(Vec::new()),
            RequestBody::Buffered(bytes) => Ok(bytes.clone()),
            RequestBody::Seekable { reader, len } => {
                let hint = len.unwrap_or(0).min(MAX_BODY_PREALLOC as u64) as usize;
                let mut buf = Vec::with_capacity(hint);
                reader.read_to_end(&mut buf)?;
                Ok(buf)
            }
        }
    }
}

// ============================================================================
// GraphRequest
// ============================================================================

/// One logical outbound call.
#[derive(Debug)]
pub struct GraphRequest {
    pub method: Method,
    /// Absolute URL
    pub url: String,
    pub headers: HeaderMap,
    pub body: RequestBody,
    /// Class whose rate and concurrency budgets the call is charged to
    pub traffic_class: TrafficClass,
    /// Rate-limit tokens consumed by the call
    pub cost: u32,
    /// Deadline for each transport attempt; the pipeline default applies when `None`
    pub timeout: Option<Duration>,
}

impl GraphRequest {
    /// Creates a standard-class request with default cost and no body.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: RequestBody::Empty,
            traffic_class: TrafficClass::Standard,
            cost: DEFAULT_COST,
            timeout: None,
        }
    }

    pub fn get(url: impl Into<String>) -> Self {
        Self::new(Method::GET, url)
    }

    #[must_use]
    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Sets the `Authorization: Bearer` header.
    pub fn bearer_auth(self, token: &str) -> Result<Self, GraphError> {
        let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| GraphError::InvalidRequest(format!("invalid access token: {e}")))?;
        value.set_sensitive(true);
        Ok(self.header(reqwest::header::AUTHORIZATION, value))
    }

    /// Sets a buffered body.
    #[must_use]
    pub fn body(mut self, bytes: impl Into<Vec<u8>>) -> Self {
        self.body = RequestBody::Buffered(bytes.into());
        self
    }

    /// Sets a seekable body with an optional declared length.
    #[must_use]
    pub fn seekable_body(mut self, reader: impl ReadSeek + 'static, len: Option<u64>) -> Self {
        self.body = RequestBody::Seekable {
            reader: Box::new(reader),
            len,
        };
        self
    }

    /// Serializes `value` as the JSON body.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self, GraphError> {
        let bytes = serde_json::to_vec(value)
            .map_err(|e| GraphError::InvalidRequest(format!("serializing body: {e}")))?;
        self.headers
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        self.body = RequestBody::Buffered(bytes);
        Ok(self)
    }

    #[must_use]
    pub fn traffic_class(mut self, class: TrafficClass) -> Self {
        self.traffic_class = class;
        self
    }

    #[must_use]
    pub fn cost(mut self, cost: u32) -> Self {
        self.cost = cost;
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

// ============================================================================
// GraphResponse
// ============================================================================

/// A fully read response.
#[derive(Debug, Clone)]
pub struct GraphResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
    /// Transport attempts it took to get this response
    pub attempts: u32,
}

impl GraphResponse {
    pub fn new(status: u16, headers: HeaderMap, body: Vec<u8>) -> Self {
        Self {
            status,
            headers,
            body,
            attempts: 1,
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Returns a header value as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Parsed `Retry-After` delay.
    pub fn retry_after(&self) -> Option<Duration> {
        self.header(RETRY_AFTER_HEADER).and_then(parse_retry_after)
    }

    /// Service-reported cost; 1 when the header is missing or garbled.
    pub fn resource_units(&self) -> u32 {
        self.header(RESOURCE_UNIT_HEADER)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(1)
    }

    /// Parsed provider error from the body.
    pub fn odata_error(&self) -> Option<ODataError> {
        ODataError::from_body(&self.body)
    }

    /// Decodes the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}
