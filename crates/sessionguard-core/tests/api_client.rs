//! HTTP behaviour of `ApiClient` against a mock server.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use sessionguard_core::{
    ApiClient, ApiError, AuthApi, Credentials, ErrorKind, ManualClock, MemoryStore,
    SessionConfig, SessionManager, SessionStatus,
};

use common::jwt_expiring_at;

fn client_for(server: &MockServer) -> ApiClient {
    let config = SessionConfig {
        api_base_url: format!("{}/api/", server.uri()),
        request_timeout_secs: 5,
        ..Default::default()
    };
    ApiClient::new(&config).expect("client")
}

fn login_body(access: &str, refresh: &str) -> serde_json::Value {
    json!({
        "access": access,
        "refresh": refresh,
        "user": {
            "id": 3,
            "username": "editor",
            "email": "editor@example.com",
            "is_staff": true,
            "permissions": ["blog.add_post"],
            "avatar": "https://cdn.example.com/a.png"
        }
    })
}

#[tokio::test]
async fn test_login_posts_credentials() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .and(body_json(json!({"username": "editor", "password": "hunter2"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body("a.b.c", "d.e.f")))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .login(&Credentials::new("editor", "hunter2"))
        .await
        .expect("login");

    assert_eq!(response.access, "a.b.c");
    assert_eq!(response.refresh, "d.e.f");
    assert_eq!(response.user.username, "editor");
    assert!(response.user.has_permission("blog.add_post"));
    assert_eq!(response.user.extra.get("avatar"), Some(&json!("https://cdn.example.com/a.png")));
}

#[tokio::test]
async fn test_login_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(401)
                .set_body_json(json!({"detail": "No active account found with the given credentials"})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .login(&Credentials::new("editor", "nope"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Auth);
    assert!(!err.is_retryable());
    assert!(err.user_message().contains("No active account"));
}

#[tokio::test]
async fn test_field_errors_are_validation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(json!({"password": ["This field is required."]})),
        )
        .mount(&server)
        .await;

    let err = client_for(&server)
        .login(&Credentials::new("editor", "x"))
        .await
        .unwrap_err();

    match &err {
        ApiError::Validation { status, fields, .. } => {
            assert_eq!(*status, 400);
            assert_eq!(
                fields.get("password"),
                Some(&vec!["This field is required.".to_string()])
            );
        }
        other => panic!("expected validation error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_server_error_is_retryable() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/refresh"))
        .respond_with(ResponseTemplate::new(503).set_body_string("upstream unavailable"))
        .mount(&server)
        .await;

    let err = client_for(&server).refresh("r.r.r").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Server);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_malformed_body_is_invalid_response() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = client_for(&server).refresh("r.r.r").await.unwrap_err();
    assert!(matches!(err, ApiError::InvalidResponse(_)));
}

#[tokio::test]
async fn test_refresh_sends_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/refresh"))
        .and(body_json(json!({"refresh": "r.r.r"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"access": "n.n.n"})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server).refresh("r.r.r").await.expect("refresh");
    assert_eq!(response.access, "n.n.n");
    assert!(response.refresh.is_none());
}

#[tokio::test]
async fn test_logout_sends_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/logout"))
        .and(header("authorization", "Bearer a.a.a"))
        .respond_with(ResponseTemplate::new(205))
        .expect(1)
        .mount(&server)
        .await;

    client_for(&server)
        .logout("a.a.a", "r.r.r")
        .await
        .expect("logout");
}

#[tokio::test]
async fn test_unreachable_server_is_network_error() {
    // Grab a free port and close it again so nothing is listening.
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let config = SessionConfig {
        api_base_url: format!("http://127.0.0.1:{}", port),
        request_timeout_secs: 2,
        ..Default::default()
    };

    let err = ApiClient::new(&config)
        .expect("client")
        .login(&Credentials::new("u", "p"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Network);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_manager_over_http() {
    let server = MockServer::start().await;
    let now = Utc::now();
    let access = jwt_expiring_at(now + Duration::hours(1));
    let refresh = jwt_expiring_at(now + Duration::days(1));

    Mock::given(method("POST"))
        .and(path("/api/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(login_body(&access, &refresh)))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let manager = SessionManager::builder(SessionConfig::default())
        .api(Arc::new(client_for(&server)))
        .store(Arc::new(MemoryStore::new()))
        .clock(Arc::new(ManualClock::new(now)))
        .build()
        .expect("manager");

    let user = manager
        .login(&Credentials::new("editor", "hunter2"))
        .await
        .expect("login");
    assert_eq!(user.id, 3);
    assert!(manager.require_admin().is_ok());
    assert_eq!(manager.access_token().await.as_deref(), Ok(access.as_str()));

    manager.logout(true).await;
    assert_eq!(manager.status(), SessionStatus::Inactive);
}
