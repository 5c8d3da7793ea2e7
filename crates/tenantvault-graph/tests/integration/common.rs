//! Shared test helpers for Graph pipeline integration tests
//!
//! Provides wiremock-based mock server setup and pipelines tuned for fast
//! retries, plus a sink that captures call records.

use std::sync::{Arc, Mutex};

use tenantvault_core::config::{Config, ConfigBuilder};
use tenantvault_core::ports::{CallRecord, ICallMetricsSink};
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenantvault_graph::client::GraphClient;
use tenantvault_graph::RequestPipeline;

/// Config with millisecond backoff so retry tests stay fast.
pub fn fast_retry_config() -> Config {
    ConfigBuilder::new()
        .max_retries(3)
        .initial_backoff_ms(5)
        .request_timeout_secs(10)
        .build()
}

/// Captures every record handed to it.
#[derive(Default)]
pub struct CapturingSink {
    pub records: Mutex<Vec<CallRecord>>,
}

impl CapturingSink {
    pub fn records(&self) -> Vec<CallRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl ICallMetricsSink for CapturingSink {
    fn record_call(&self, record: &CallRecord) -> anyhow::Result<()> {
        self.records.lock().unwrap().push(record.clone());
        Ok(())
    }
}

/// Starts a mock server and returns a pipeline plus the capturing sink.
pub async fn setup_pipeline(config: &Config) -> (MockServer, RequestPipeline, Arc<CapturingSink>) {
    let server = MockServer::start().await;
    let sink = Arc::new(CapturingSink::default());
    let pipeline = RequestPipeline::from_config(config)
        .expect("valid config")
        .with_metrics(sink.clone());
    (server, pipeline, sink)
}

/// Config with fast retries whose base URL points at `server`.
pub fn server_config(server: &MockServer) -> Config {
    let mut config = fast_retry_config();
    config.http.base_url = server.uri();
    config
}

/// Starts a mock server and returns a client configured against it.
pub async fn setup_client() -> (MockServer, GraphClient) {
    let server = MockServer::start().await;
    let config = server_config(&server);
    let pipeline = RequestPipeline::from_config(&config).expect("valid config");
    let client = GraphClient::from_config(&config, pipeline, "test-access-token");
    (server, client)
}

/// Mounts a two-page mail folder delta query.
///
/// The first page links to the second through `$skiptoken=page2`; the
/// second page ends with a deltaLink carrying `delta_token`.
pub async fn mount_delta_paginated(
    server: &MockServer,
    page1_items: serde_json::Value,
    page2_items: serde_json::Value,
    delta_token: &str,
) {
    Mock::given(method("GET"))
        .and(path("/users/u1/mailFolders/delta"))
        .and(query_param("$skiptoken", "page2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": page2_items,
            "@odata.deltaLink": format!(
                "{}/users/u1/mailFolders/delta?$deltatoken={}",
                server.uri(),
                delta_token
            )
        })))
        .with_priority(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u1/mailFolders/delta"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": page1_items,
            "@odata.nextLink": format!(
                "{}/users/u1/mailFolders/delta?$skiptoken=page2",
                server.uri()
            )
        })))
        .with_priority(5)
        .mount(server)
        .await;
}
