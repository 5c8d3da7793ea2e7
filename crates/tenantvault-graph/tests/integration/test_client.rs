//! GraphClient paging and delta queries

use serde::Deserialize;
use tenantvault_core::config::ConfigBuilder;
use tenantvault_graph::client::GraphClient;
use tenantvault_graph::{ErrorClass, RequestPipeline};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::common::{mount_delta_paginated, setup_client};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MailFolder {
    id: String,
    display_name: String,
    parent_folder_id: Option<String>,
}

#[tokio::test]
async fn test_get_json_sends_bearer_token() {
    let (server, client) = setup_client().await;

    Mock::given(method("GET"))
        .and(path("/users/u1/mailFolders/inbox"))
        .and(header("authorization", "Bearer test-access-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "inbox",
            "displayName": "Inbox",
            "parentFolderId": "root"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let folder: MailFolder = client
        .get_json(&CancellationToken::new(), "/users/u1/mailFolders/inbox")
        .await
        .unwrap();
    assert_eq!(folder.id, "inbox");
    assert_eq!(folder.display_name, "Inbox");
    assert_eq!(folder.parent_folder_id.as_deref(), Some("root"));
}

#[tokio::test]
async fn test_delta_follows_next_link() {
    let (server, client) = setup_client().await;
    mount_delta_paginated(
        &server,
        serde_json::json!([
            {"id": "f1", "displayName": "Inbox", "parentFolderId": "root"},
            {"id": "f2", "displayName": "Archive", "parentFolderId": "root"}
        ]),
        serde_json::json!([
            {"id": "f3", "displayName": "2024", "parentFolderId": "f2"}
        ]),
        "token-abc",
    )
    .await;

    let result = client
        .get_delta::<MailFolder>(&CancellationToken::new(), "/users/u1/mailFolders/delta", None)
        .await
        .unwrap();

    let ids: Vec<_> = result.items.iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["f1", "f2", "f3"]);
    assert!(result
        .delta_link
        .unwrap()
        .ends_with("mailFolders/delta?$deltatoken=token-abc"));
}

#[tokio::test]
async fn test_delta_resumes_from_saved_link() {
    let (server, client) = setup_client().await;

    Mock::given(method("GET"))
        .and(path("/users/u1/mailFolders/delta"))
        .and(query_param("$deltatoken", "saved"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "value": [],
            "@odata.deltaLink": format!("{}/users/u1/mailFolders/delta?$deltatoken=next", server.uri())
        })))
        .expect(1)
        .mount(&server)
        .await;

    let saved = format!("{}/users/u1/mailFolders/delta?$deltatoken=saved", server.uri());
    let result = client
        .get_delta::<MailFolder>(
            &CancellationToken::new(),
            "/users/u1/mailFolders/delta",
            Some(&saved),
        )
        .await
        .unwrap();

    assert!(result.items.is_empty());
    assert!(result.delta_link.unwrap().ends_with("$deltatoken=next"));
}

#[tokio::test]
async fn test_expired_delta_token_is_classified() {
    let (server, client) = setup_client().await;

    Mock::given(method("GET"))
        .and(path("/users/u1/mailFolders/delta"))
        .respond_with(ResponseTemplate::new(410).set_body_json(serde_json::json!({
            "error": {
                "code": "SyncStateNotFound",
                "message": "The sync state generation is not found."
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let saved = format!("{}/users/u1/mailFolders/delta?$deltatoken=stale", server.uri());
    let err = client
        .get_delta::<MailFolder>(
            &CancellationToken::new(),
            "/users/u1/mailFolders/delta",
            Some(&saved),
        )
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::InvalidDeltaToken);
    assert_eq!(err.status(), Some(410));
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let (server, client) = setup_client().await;

    Mock::given(method("GET"))
        .and(path("/users/u1"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client
        .get_json::<serde_json::Value>(&CancellationToken::new(), "/users/u1")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        tenantvault_graph::GraphError::InvalidResponse { .. }
    ));
}

#[tokio::test]
async fn test_malformed_body_after_retry_reports_attempts() {
    let (server, client) = setup_client().await;

    Mock::given(method("GET"))
        .and(path("/users/u2"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .with_priority(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/users/u2"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .with_priority(5)
        .mount(&server)
        .await;

    let err = client
        .get_json::<serde_json::Value>(&CancellationToken::new(), "/users/u2")
        .await
        .unwrap_err();

    let ctx = err.context().unwrap();
    assert_eq!(ctx.method, "GET");
    assert_eq!(ctx.status, Some(200));
    assert_eq!(ctx.attempts, 2);
}

#[tokio::test]
async fn test_base_url_comes_from_config() {
    let server = MockServer::start().await;
    let config = ConfigBuilder::new()
        .base_url(format!("{}/v1.0/", server.uri()))
        .build();
    let pipeline = RequestPipeline::from_config(&config).unwrap();
    let client = GraphClient::from_config(&config, pipeline, "configured-token");

    Mock::given(method("GET"))
        .and(path("/v1.0/me"))
        .and(header("authorization", "Bearer configured-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "displayName": "Adele Vance"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let me: serde_json::Value = client
        .get_json(&CancellationToken::new(), "/me")
        .await
        .unwrap();
    assert_eq!(me["displayName"], "Adele Vance");
}
