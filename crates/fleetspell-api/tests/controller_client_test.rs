#![allow(clippy::unwrap_used)]
// Integration tests for `ControllerClient` using wiremock.

use std::time::Duration;

use secrecy::SecretString;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetspell_api::{ControllerClient, Error};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, ControllerClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let client = ControllerClient::with_client(reqwest::Client::new(), base_url);
    (server, client)
}

/// Mount a login mock and log in, so the client holds token `tok-1`.
async fn logged_in() -> (MockServer, ControllerClient) {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "token": "tok-1",
            "controller_uuid": "4b0b2a4c-4a60-4c4a-9d6c-0f3c3f8b6c11",
            "controller_name": "prod-east"
        })))
        .mount(&server)
        .await;

    let secret = SecretString::from("hunter2");
    client.login("admin", &secret).await.unwrap();
    (server, client)
}

// ── Session tests ───────────────────────────────────────────────────

#[tokio::test]
async fn test_login_success() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_json(json!({ "username": "admin", "password": "hunter2" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "token": "abc" })))
        .expect(1)
        .mount(&server)
        .await;

    assert!(!client.is_connected());
    let login = client
        .login("admin", &SecretString::from("hunter2"))
        .await
        .unwrap();

    assert_eq!(login.token, "abc");
    assert_eq!(login.controller_uuid, None);
    assert!(client.is_connected());
}

#[tokio::test]
async fn test_login_failure() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .mount(&server)
        .await;

    let result = client.login("admin", &SecretString::from("wrong")).await;

    assert!(
        matches!(result, Err(Error::Authentication { .. })),
        "expected Authentication error, got: {result:?}"
    );
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_logout_clears_session() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/api/logout"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    client.logout().await.unwrap();
    assert!(!client.is_connected());

    // A second logout is a no-op and makes no request.
    client.logout().await.unwrap();
}

#[tokio::test]
async fn test_calls_before_login_fail_without_request() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/controller"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let result = client.info().await;
    assert!(matches!(result, Err(Error::NotConnected)), "got: {result:?}");
}

#[tokio::test]
async fn test_connection_refused_is_unreachable() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let base_url = Url::parse(&format!("http://127.0.0.1:{port}/")).unwrap();
    let client = ControllerClient::with_client(reqwest::Client::new(), base_url);

    let err = client
        .login("admin", &SecretString::from("pw"))
        .await
        .unwrap_err();
    assert!(err.is_unreachable(), "expected Unreachable, got: {err:?}");
}

#[tokio::test]
async fn test_failed_tls_handshake_is_not_retryable() {
    use std::io::{Read, Write};

    // Reachable endpoint that answers in plain HTTP.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = [0_u8; 1024];
        let _ = stream.read(&mut buf);
        let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\ncontent-length: 0\r\n\r\n");
    });

    let base_url = Url::parse(&format!("https://127.0.0.1:{port}/")).unwrap();
    let client = ControllerClient::with_client(reqwest::Client::new(), base_url);

    let err = client
        .login("admin", &SecretString::from("pw"))
        .await
        .unwrap_err();
    assert!(!err.is_unreachable(), "TLS failure must not be retried: {err:?}");
    assert!(matches!(err, Error::Tls(_)), "expected Tls, got: {err:?}");
    server.join().unwrap();
}

// ── Controller tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_info_sends_bearer_token() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/api/controller"))
        .and(header("authorization", "Bearer tok-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "uuid": "4b0b2a4c-4a60-4c4a-9d6c-0f3c3f8b6c11",
            "name": "prod-east",
            "version": "3.4.1",
            "ha": true
        })))
        .mount(&server)
        .await;

    let info = client.info().await.unwrap();
    assert_eq!(info.name, "prod-east");
    assert_eq!(info.version.as_deref(), Some("3.4.1"));
    assert_eq!(info.extra.get("ha"), Some(&json!(true)));
}

#[tokio::test]
async fn test_list_models_and_status() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/api/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["controller", "openstack"])))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/models/openstack/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "name": "openstack",
            "applications": {
                "keystone": { "charm": "keystone", "units": { "keystone/0": { "machine": "1" } } }
            }
        })))
        .mount(&server)
        .await;

    assert_eq!(
        client.list_models().await.unwrap(),
        vec!["controller".to_owned(), "openstack".to_owned()]
    );
    let status = client.model_status("openstack").await.unwrap();
    assert_eq!(
        status.applications["keystone"].units["keystone/0"]
            .machine
            .as_deref(),
        Some("1")
    );
}

#[tokio::test]
async fn test_run_on_unit() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/api/models/openstack/units/keystone%2F0/run"))
        .and(body_json(json!({ "command": "uptime", "timeout": 300 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "stdout": " 10:00:00 up 3 days",
            "code": 0
        })))
        .mount(&server)
        .await;

    let out = client
        .run_on_unit("openstack", "keystone/0", "uptime", Duration::from_secs(300))
        .await
        .unwrap();
    assert!(out.succeeded());
    assert_eq!(out.stderr, "");
}

// ── User tests ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_add_user_defaults_display_name() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/api/users"))
        .and(body_json(json!({
            "username": "alice",
            "display_name": "alice",
            "password": "s3cret"
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({ "username": "alice" })))
        .mount(&server)
        .await;

    let user = client
        .add_user("alice", None, &SecretString::from("s3cret"))
        .await
        .unwrap();
    assert_eq!(user.username, "alice");
    assert!(!user.disabled);
}

#[tokio::test]
async fn test_user_state_changes() {
    let (server, client) = logged_in().await;

    for (verb, suffix) in [("POST", "/enable"), ("POST", "/disable"), ("DELETE", "")] {
        Mock::given(method(verb))
            .and(path(format!("/api/users/alice{suffix}")))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
    }

    client.enable_user("alice").await.unwrap();
    client.disable_user("alice").await.unwrap();
    client.remove_user("alice").await.unwrap();
}

#[tokio::test]
async fn test_grant_reports_change() {
    let (server, client) = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/api/users/alice/grant"))
        .and(body_json(json!({ "acl": "superuser" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "changed": false })))
        .mount(&server)
        .await;

    assert!(!client.grant("alice", "superuser").await.unwrap());
}

// ── Error tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_error_envelope_maps_to_api_error() {
    let (server, client) = logged_in().await;

    Mock::given(method("DELETE"))
        .and(path("/api/users/bob"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "error": { "code": "not-found", "message": "user \"bob\" not found" }
        })))
        .mount(&server)
        .await;

    let err = client.remove_user("bob").await.unwrap_err();
    match err {
        Error::Api {
            status,
            code,
            message,
        } => {
            assert_eq!(status, 404);
            assert_eq!(code.as_deref(), Some("not-found"));
            assert!(message.contains("bob"));
        }
        other => panic!("expected Api error, got: {other:?}"),
    }
}

#[tokio::test]
async fn test_expired_token_is_authentication_error() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/api/models"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.list_models().await.unwrap_err();
    assert!(err.is_auth_error(), "got: {err:?}");
    assert!(!err.is_unreachable());
}

#[tokio::test]
async fn test_garbage_body_is_deserialization_error() {
    let (server, client) = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/api/controller"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>"))
        .mount(&server)
        .await;

    let err = client.info().await.unwrap_err();
    assert!(
        matches!(err, Error::Deserialization { ref body, .. } if body == "<html>"),
        "got: {err:?}"
    );
}
