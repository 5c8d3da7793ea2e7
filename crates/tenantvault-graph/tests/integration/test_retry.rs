//! Retry behavior against a mock Graph endpoint

use std::io::Cursor;
use std::time::Duration;

use reqwest::Method;
use tenantvault_core::ports::CallOutcome;
use tenantvault_graph::{ErrorClass, GraphError, GraphRequest};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, header_exists, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{fast_retry_config, setup_pipeline};

#[tokio::test]
async fn test_persistent_502_exhausts_after_max_retries_plus_one() {
    let (server, pipeline, sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/messages"))
        .respond_with(ResponseTemplate::new(502))
        .expect(4)
        .mount(&server)
        .await;

    let err = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1/messages?$top=50", server.uri())),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(502));
    let ctx = err.context().unwrap();
    assert_eq!(ctx.attempts, 4);
    assert_eq!(ctx.url, format!("{}/users/u1/messages", server.uri()));
    assert!(err.to_string().contains("after 4 attempts"));

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].attempts, 4);
    assert_eq!(records[0].outcome, CallOutcome::HttpError);
}

#[tokio::test]
async fn test_bad_request_is_not_retried() {
    let (server, pipeline, _sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/messages"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": {"code": "BadRequest", "message": "Invalid filter clause"}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1/messages", server.uri())),
        )
        .await
        .unwrap_err();

    assert_eq!(err.status(), Some(400));
    assert_eq!(err.odata().unwrap().code, "BadRequest");
    assert_eq!(err.class(), ErrorClass::Unclassified);
}

#[tokio::test]
async fn test_success_is_sent_once() {
    let (server, pipeline, sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .and(header_exists("client-request-id"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"id": "u1"}))
                .append_header("x-ms-resource-unit", "2"),
        )
        .expect(1)
        .mount(&server)
        .await;

    let response = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1", server.uri())),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(sink.records()[0].resource_units, 2);
}

#[tokio::test]
async fn test_throttled_then_success_sends_retry_attempt_header() {
    let (server, pipeline, sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/events"))
        .and(header("retry-attempt", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": []})))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u1/events"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .expect(1)
        .mount(&server)
        .await;

    let response = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1/events", server.uri())),
        )
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    let records = sink.records();
    assert_eq!(records[0].attempts, 2);
    assert_eq!(records[0].throttled, 1);
}

#[tokio::test]
async fn test_body_without_known_length_is_not_retried() {
    let (server, pipeline, _sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("POST"))
        .and(path("/users/u1/messages"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let request = GraphRequest::new(Method::POST, format!("{}/users/u1/messages", server.uri()))
        .seekable_body(Cursor::new(b"{\"subject\":\"hi\"}".to_vec()), None);

    let err = pipeline
        .execute(&CancellationToken::new(), request)
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.context().unwrap().attempts, 1);
}

#[tokio::test]
async fn test_seekable_body_is_replayed_in_full() {
    let (server, pipeline, _sink) = setup_pipeline(&fast_retry_config()).await;
    let payload = b"attachment-bytes".to_vec();

    Mock::given(method("PUT"))
        .and(path("/drives/d1/items/i1/content"))
        .and(header("retry-attempt", "1"))
        .and(wiremock::matchers::body_bytes(payload.clone()))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("PUT"))
        .and(path("/drives/d1/items/i1/content"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let len = payload.len() as u64;
    let request = GraphRequest::new(
        Method::PUT,
        format!("{}/drives/d1/items/i1/content", server.uri()),
    )
    .seekable_body(Cursor::new(payload), Some(len));

    let response = pipeline
        .execute(&CancellationToken::new(), request)
        .await
        .unwrap();
    assert_eq!(response.status, 201);
}

#[tokio::test]
async fn test_slow_attempt_times_out_and_is_retried() {
    let (server, pipeline, _sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/contacts"))
        .and(header("retry-attempt", "1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u1/contacts"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .expect(1)
        .mount(&server)
        .await;

    let response = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1/contacts", server.uri()))
                .timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap();
    assert_eq!(response.status, 200);
}

#[tokio::test]
async fn test_deleted_item_is_classified_and_not_retried() {
    let (server, pipeline, _sink) = setup_pipeline(&fast_retry_config()).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/messages/m1"))
        .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
            "error": {
                "code": "ErrorItemNotFound",
                "message": "The specified object was not found in the store."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = pipeline
        .execute(
            &CancellationToken::new(),
            GraphRequest::get(format!("{}/users/u1/messages/m1", server.uri())),
        )
        .await
        .unwrap_err();
    assert_eq!(err.class(), ErrorClass::DeletedInFlight);
}

#[tokio::test]
async fn test_cancellation_during_backoff() {
    let config = tenantvault_core::config::ConfigBuilder::new()
        .max_retries(3)
        .initial_backoff_ms(60_000)
        .build();
    let (server, pipeline, sink) = setup_pipeline(&config).await;

    Mock::given(method("GET"))
        .and(path("/users/u1/messages"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let cancel = CancellationToken::new();
    let canceller = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        })
    };

    let err = pipeline
        .execute(
            &cancel,
            GraphRequest::get(format!("{}/users/u1/messages", server.uri())),
        )
        .await
        .unwrap_err();
    canceller.await.unwrap();

    assert!(matches!(err, GraphError::Cancelled));
    assert_eq!(sink.records()[0].outcome, CallOutcome::Cancelled);
}
