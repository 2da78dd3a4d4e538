mod common;

use agenthub_auth::{ApiRequest, AuthError, AuthOptions, SessionManager};
use common::*;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn jwt(exp: i64) -> String {
    encode(
        &Header::default(),
        &json!({ "sub": "u1", "token_type": "access", "exp": exp }),
        &EncodingKey::from_secret(b"test-secret"),
    )
    .unwrap()
}

async fn mount_refresh(server: &MockServer, response: ResponseTemplate, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .and(body_json(json!({ "refresh_token": "R1" })))
        .respond_with(response)
        .expect(calls)
        .mount(server)
        .await;
}

async fn mount_agents(server: &MockServer, token: &str, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path("/agents"))
        .and(header("Authorization", format!("Bearer {}", token).as_str()))
        .respond_with(response)
        .mount(server)
        .await;
}

async fn restored(server: &MockServer, store: Arc<CountingStore>) -> SessionManager {
    mount_user(server, "T1", user_body("u1")).await;
    let manager = manager(server, store);
    manager.restore().await;
    assert!(manager.is_authenticated());
    manager
}

#[tokio::test]
async fn test_refresh_without_refresh_token() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/auth/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = stored("T1", None);
    let manager = restored(&mock_server, store.clone()).await;

    let err = manager.refresh().await.unwrap_err();

    assert!(matches!(err, AuthError::NoRefreshToken));
    assert!(!manager.is_authenticated());
    assert!(store.tokens().await.is_none());
}

#[tokio::test]
async fn test_refresh_reuses_refresh_token() {
    let mock_server = MockServer::start().await;

    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "T2",
            "message": "Token refreshed successfully"
        })),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    manager.refresh().await.unwrap();

    let tokens = store.tokens().await.unwrap();
    assert_eq!(tokens.access_token, "T2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("R1"));
    assert_eq!(manager.state().access_token(), Some("T2"));
    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_refresh_accepts_rotated_refresh_token() {
    let mock_server = MockServer::start().await;

    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access_token": "T2", "refresh_token": "R2" })),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    manager.refresh().await.unwrap();

    let tokens = store.tokens().await.unwrap();
    assert_eq!(tokens.access_token, "T2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("R2"));
}

#[tokio::test]
async fn test_refresh_failure_ends_session() {
    let mock_server = MockServer::start().await;

    mount_refresh(&mock_server, unauthorized("Invalid refresh token"), 1).await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let err = manager.refresh().await.unwrap_err();

    assert!(matches!(err, AuthError::SessionExpired(ref m) if m == "Invalid refresh token"));
    assert!(!manager.is_authenticated());
    assert!(manager.state().access_token().is_none());
    assert!(store.tokens().await.is_none());
}

#[tokio::test]
async fn test_unauthorized_call_is_retried_after_refresh() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_agents(
        &mock_server,
        "T2",
        ResponseTemplate::new(200).set_body_json(json!([{ "id": "a1", "name": "scout" }])),
    )
    .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({ "access_token": "T2" })),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let agents: Value = manager.execute(ApiRequest::get("/agents")).await.unwrap();

    assert_eq!(agents[0]["name"], "scout");
    assert_eq!(store.tokens().await.unwrap().access_token, "T2");
    assert!(manager.is_authenticated());
    assert_eq!(store.clears(), 0);
}

#[tokio::test]
async fn test_unauthorized_call_with_failed_refresh_expires_session() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_refresh(&mock_server, unauthorized("Refresh token expired"), 1).await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let err = manager
        .execute::<Value>(ApiRequest::get("/agents"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::SessionExpired(ref m) if m == "Token has expired"));
    assert!(!manager.is_authenticated());
    assert!(store.tokens().await.is_none());
}

#[tokio::test]
async fn test_retry_rejected_again_expires_session() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_agents(&mock_server, "T2", unauthorized("Invalid token")).await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({ "access_token": "T2" })),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let err = manager
        .execute::<Value>(ApiRequest::get("/agents"))
        .await
        .unwrap_err();

    assert!(err.is_session_expired());
    assert!(!manager.is_authenticated());
    assert!(store.tokens().await.is_none());
}

#[tokio::test]
async fn test_other_errors_are_returned_unchanged() {
    let mock_server = MockServer::start().await;

    mount_agents(
        &mock_server,
        "T1",
        ResponseTemplate::new(404).set_body_json(json!({ "error": "Agent not found" })),
    )
    .await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let err = manager
        .execute::<Value>(ApiRequest::get("/agents"))
        .await
        .unwrap_err();

    match err {
        AuthError::Api { status, message } => {
            assert_eq!(status, 404);
            assert_eq!(message, "Agent not found");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(manager.is_authenticated());
    assert_eq!(store.tokens().await.unwrap().access_token, "T1");
}

#[tokio::test]
async fn test_execute_requires_session() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&mock_server)
        .await;

    let manager = manager(&mock_server, Arc::new(CountingStore::new()));

    let err = manager
        .execute_raw(ApiRequest::get("/agents"))
        .await
        .unwrap_err();

    assert!(matches!(err, AuthError::NotAuthenticated));
}

#[tokio::test]
async fn test_concurrent_unauthorized_calls_share_one_refresh() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_agents(
        &mock_server,
        "T2",
        ResponseTemplate::new(200).set_body_json(json!([])),
    )
    .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access_token": "T2" }))
            .set_delay(Duration::from_millis(100)),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let (first, second, third) = tokio::join!(
        manager.execute::<Value>(ApiRequest::get("/agents")),
        manager.execute::<Value>(ApiRequest::get("/agents")),
        manager.execute::<Value>(ApiRequest::get("/agents")),
    );

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(third.is_ok());
    assert_eq!(store.tokens().await.unwrap().access_token, "T2");
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn test_concurrent_refresh_calls_share_one_exchange() {
    let mock_server = MockServer::start().await;

    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access_token": "T2" }))
            .set_delay(Duration::from_millis(100)),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = restored(&mock_server, store.clone()).await;

    let (first, second) = tokio::join!(manager.refresh(), manager.refresh());

    assert!(first.is_ok());
    assert!(second.is_ok());
    assert_eq!(manager.state().access_token(), Some("T2"));
    assert_eq!(store.saves(), 1);
}

#[tokio::test]
async fn test_logout_during_refresh_is_not_undone() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_agents(
        &mock_server,
        "T2",
        ResponseTemplate::new(200).set_body_json(json!([])),
    )
    .await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access_token": "T2" }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;

    let store = stored("T1", Some("R1"));
    let manager = Arc::new(restored(&mock_server, store.clone()).await);

    let call = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.execute::<Value>(ApiRequest::get("/agents")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.logout().await;

    let err = call.await.unwrap().unwrap_err();

    assert!(err.is_session_expired());
    assert!(store.tokens().await.is_none());
    assert_eq!(store.saves(), 0);
    assert_eq!(manager.state().access_token(), None);
    assert!(!manager.is_authenticated());
}

#[tokio::test]
async fn test_login_during_refresh_keeps_new_session() {
    let mock_server = MockServer::start().await;

    mount_agents(&mock_server, "T1", unauthorized("Token has expired")).await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200)
            .set_body_json(json!({ "access_token": "T2", "refresh_token": "R2" }))
            .set_delay(Duration::from_millis(300)),
        1,
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/auth/login"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "u2",
            "access_token": "T9",
            "refresh_token": "R9"
        })))
        .mount(&mock_server)
        .await;
    mount_user(&mock_server, "T9", user_body("u2")).await;

    let store = stored("T1", Some("R1"));
    let manager = Arc::new(restored(&mock_server, store.clone()).await);

    let call = tokio::spawn({
        let manager = Arc::clone(&manager);
        async move { manager.execute::<Value>(ApiRequest::get("/agents")).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.login("b@c.com", "pw").await.unwrap();

    let err = call.await.unwrap().unwrap_err();

    assert!(err.is_session_expired());
    let tokens = store.tokens().await.unwrap();
    assert_eq!(tokens.access_token, "T9");
    assert_eq!(tokens.refresh_token.as_deref(), Some("R9"));
    assert_eq!(manager.current_user().unwrap().id, "u2");
}

#[tokio::test]
async fn test_expiring_jwt_is_refreshed_before_use() {
    let mock_server = MockServer::start().await;

    let expired = jwt(chrono::Utc::now().timestamp() - 60);
    let fresh = jwt(chrono::Utc::now().timestamp() + 3600);

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .and(header("Authorization", format!("Bearer {}", expired).as_str()))
        .respond_with(unauthorized("Token has expired"))
        .expect(0)
        .mount(&mock_server)
        .await;
    mount_user(&mock_server, &fresh, user_body("u1")).await;
    mount_refresh(
        &mock_server,
        ResponseTemplate::new(200).set_body_json(json!({ "access_token": fresh })),
        1,
    )
    .await;

    let store = stored(&expired, Some("R1"));
    let manager = manager(&mock_server, store.clone());
    manager.restore().await;

    assert!(manager.is_authenticated());
    assert_eq!(store.tokens().await.unwrap().access_token, fresh);
    assert!(manager.state().access_token_expires_at().unwrap() > chrono::Utc::now());
}

#[tokio::test]
async fn test_proactive_refresh_can_be_disabled() {
    let mock_server = MockServer::start().await;

    let expiring = jwt(chrono::Utc::now().timestamp() + 5);
    mount_user(&mock_server, &expiring, user_body("u1")).await;
    mount_refresh(&mock_server, ResponseTemplate::new(200), 0).await;

    let manager = manager_with(
        &mock_server,
        stored(&expiring, Some("R1")),
        AuthOptions::default().with_auto_refresh_token(false),
    );
    manager.restore().await;

    assert!(manager.is_authenticated());
}

#[tokio::test]
async fn test_restore_is_bounded_by_timeout() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(user_body("u1"))
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&mock_server)
        .await;

    let store = stored("T1", Some("R1"));
    let manager = manager_with(
        &mock_server,
        store.clone(),
        AuthOptions::default().with_restore_timeout(Duration::from_millis(200)),
    );

    manager.restore().await;

    let state = manager.state();
    assert!(!state.is_loading());
    assert!(!state.is_authenticated());
    assert!(store.tokens().await.is_none());
}
