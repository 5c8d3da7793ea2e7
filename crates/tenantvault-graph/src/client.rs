//! Microsoft Graph API client
//!
//! Thin convenience layer over [`RequestPipeline`]: builds authenticated
//! requests against a base URL, decodes JSON bodies, and follows
//! `@odata.nextLink` pages.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use tenantvault_core::config::Config;
//! use tenantvault_graph::client::GraphClient;
//! use tenantvault_graph::pipeline::RequestPipeline;
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), tenantvault_graph::GraphError> {
//! let config = Config::default();
//! let pipeline = RequestPipeline::from_config(&config)?;
//! let client = GraphClient::from_config(&config, pipeline, "access-token-here");
//! let cancel = CancellationToken::new();
//! let me: serde_json::Value = client.get_json(&cancel, "/me").await?;
//! println!("Hello, {}", me["displayName"]);
//! # Ok(())
//! # }
//! ```

use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tenantvault_core::config::Config;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::RequestContext;
use crate::pipeline::RequestPipeline;
use crate::request::{GraphRequest, GraphResponse};
use crate::GraphError;

/// Base URL for Microsoft Graph API v1.0
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

// ============================================================================
// Collection responses
// ============================================================================

/// One page of a Graph collection
#[derive(Debug, Clone, Deserialize)]
#[serde(bound(deserialize = "T: DeserializeOwned"))]
pub struct Page<T> {
    /// Items on this page
    #[serde(default = "Vec::new")]
    pub value: Vec<T>,
    /// Absolute URL of the next page
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
    /// Absolute URL to resume an incremental query from
    #[serde(rename = "@odata.deltaLink")]
    pub delta_link: Option<String>,
}

/// Every item of a delta query, with the link to resume it
#[derive(Debug, Clone)]
pub struct DeltaResult<T> {
    pub items: Vec<T>,
    /// `None` when the service ended the query without one
    pub delta_link: Option<String>,
}

// ============================================================================
// GraphClient
// ============================================================================

/// HTTP client for Microsoft Graph API calls
///
/// Every call goes through the shared [`RequestPipeline`], so rate limits,
/// concurrency caps and retries apply uniformly.
#[derive(Debug, Clone)]
pub struct GraphClient {
    pipeline: RequestPipeline,
    /// Base URL for API requests
    base_url: String,
    /// Current OAuth2 access token
    access_token: String,
}

impl GraphClient {
    /// Creates a client against the public Graph endpoint.
    pub fn new(pipeline: RequestPipeline, access_token: impl Into<String>) -> Self {
        Self {
            pipeline,
            base_url: GRAPH_BASE_URL.to_string(),
            access_token: access_token.into(),
        }
    }

    /// Creates a client against the configured base URL.
    pub fn from_config(
        config: &Config,
        pipeline: RequestPipeline,
        access_token: impl Into<String>,
    ) -> Self {
        Self::new(pipeline, access_token).with_base_url(config.http.base_url.clone())
    }

    /// Replaces the base URL (useful for testing).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Updates the access token (e.g., after a token refresh)
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        self.access_token = token.into();
        debug!("Updated GraphClient access token");
    }

    /// Returns a reference to the current access token
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn pipeline(&self) -> &RequestPipeline {
        &self.pipeline
    }

    /// Resolves `path` against the base URL. Absolute URLs are kept as-is.
    pub fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            path.to_string()
        } else if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    /// Creates an authenticated request for the given method and path.
    pub fn request(&self, method: Method, path: &str) -> Result<GraphRequest, GraphError> {
        GraphRequest::new(method, self.url_for(path)).bearer_auth(&self.access_token)
    }

    /// Sends a request through the pipeline.
    pub async fn send(
        &self,
        cancel: &CancellationToken,
        request: GraphRequest,
    ) -> Result<GraphResponse, GraphError> {
        self.pipeline.execute(cancel, request).await
    }

    /// GETs `path` and decodes the JSON body.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<T, GraphError> {
        let request = self.request(Method::GET, path)?;
        let method = request.method.clone();
        let url = request.url.clone();
        let response = self.send(cancel, request).await?;
        decode(&method, &url, &response)
    }

    /// GETs one page of a collection.
    pub async fn get_page<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path_or_link: &str,
    ) -> Result<Page<T>, GraphError> {
        self.get_json(cancel, path_or_link).await
    }

    /// Collects every page of a collection by following `@odata.nextLink`.
    pub async fn get_all<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
    ) -> Result<Vec<T>, GraphError> {
        Ok(self.follow_pages(cancel, path).await?.items)
    }

    /// Runs an incremental query.
    ///
    /// Starts from `delta_link` when one was saved by a previous run,
    /// otherwise from `path`. A token the service rejects surfaces as an
    /// error classified [`ErrorClass::InvalidDeltaToken`](crate::classify::ErrorClass).
    pub async fn get_delta<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        path: &str,
        delta_link: Option<&str>,
    ) -> Result<DeltaResult<T>, GraphError> {
        let start = delta_link.filter(|link| !link.is_empty()).unwrap_or(path);
        debug!(has_token = delta_link.is_some(), "Starting delta query");

        let result = self.follow_pages(cancel, start).await?;
        if result.delta_link.is_none() {
            warn!("Delta query completed without a deltaLink; next run will enumerate fully");
        }
        Ok(result)
    }

    async fn follow_pages<T: DeserializeOwned>(
        &self,
        cancel: &CancellationToken,
        start: &str,
    ) -> Result<DeltaResult<T>, GraphError> {
        let mut page: Page<T> = self.get_page(cancel, start).await?;
        let mut items = std::mem::take(&mut page.value);
        let mut page_count: u32 = 1;

        while let Some(next_link) = page.next_link.take() {
            page_count += 1;
            debug!(page = page_count, "Following nextLink");
            page = self.get_page(cancel, &next_link).await?;
            items.append(&mut page.value);
        }

        debug!(
            total_items = items.len(),
            total_pages = page_count,
            has_delta_link = page.delta_link.is_some(),
            "Collection query complete"
        );

        Ok(DeltaResult {
            items,
            delta_link: page.delta_link,
        })
    }
}

fn decode<T: DeserializeOwned>(
    method: &Method,
    url: &str,
    response: &GraphResponse,
) -> Result<T, GraphError> {
    response.json().map_err(|e| GraphError::InvalidResponse {
        context: RequestContext::new(
            method.as_str(),
            url,
            Some(response.status),
            response.attempts,
        ),
        message: e.to_string(),
    })
}
