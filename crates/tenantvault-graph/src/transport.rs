//! Transport port
//!
//! The pipeline wraps a single `send` primitive and never replaces it.
//! [`ReqwestTransport`] is the production implementation; tests plug in
//! in-memory transports to observe concurrency and replays.

use reqwest::Client;
use tracing::trace;

use crate::error::TransportError;
use crate::request::{GraphRequest, GraphResponse};

/// Sends one attempt of a request.
///
/// Takes the request mutably so streamed bodies can be read; the retry
/// middleware rewinds them between attempts.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &mut GraphRequest) -> Result<GraphResponse, TransportError>;
}

/// HTTP transport backed by `reqwest`.
///
/// Deadlines are applied by the retry middleware per attempt, so the client
/// itself is built without a timeout.
#[derive(Debug, Clone, Default)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps an existing client (custom TLS, proxies, ...).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &mut GraphRequest) -> Result<GraphResponse, TransportError> {
        let mut builder = self
            .client
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());

        if !request.body.is_empty() {
            let bytes = request.body.read_all().map_err(TransportError::Body)?;
            builder = builder.body(bytes);
        }

        let response = builder.send().await.map_err(TransportError::from_reqwest)?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(TransportError::from_reqwest)?
            .to_vec();

        trace!(
            method = %request.method,
            status,
            body_len = body.len(),
            "Transport attempt completed"
        );

        Ok(GraphResponse::new(status, headers, body))
    }
}
