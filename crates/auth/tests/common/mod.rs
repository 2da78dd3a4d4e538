#![allow(dead_code)]

use agenthub_auth::{
    AuthError, AuthOptions, MemoryTokenStore, SessionManager, StoredTokens, TokenStore,
};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub fn manager(server: &MockServer, store: Arc<dyn TokenStore>) -> SessionManager {
    manager_with(server, store, AuthOptions::default())
}

pub fn manager_with(
    server: &MockServer,
    store: Arc<dyn TokenStore>,
    options: AuthOptions,
) -> SessionManager {
    SessionManager::new(&server.uri(), reqwest::Client::new(), store, options).unwrap()
}

pub fn stored(access: &str, refresh: Option<&str>) -> Arc<CountingStore> {
    Arc::new(CountingStore::with_tokens(StoredTokens::new(
        access,
        refresh.map(str::to_string),
    )))
}

pub fn user_body(id: &str) -> Value {
    json!({
        "id": id,
        "email": "a@b.com",
        "username": "alice",
        "roles": ["user"],
        "mfa_enabled": false,
        "subscription_tier": "free",
        "subscription_status": "active"
    })
}

pub async fn mount_user(server: &MockServer, token: &str, body: Value) {
    Mock::given(method("GET"))
        .and(path("/auth/user"))
        .and(header("Authorization", format!("Bearer {}", token).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

pub fn unauthorized(message: &str) -> ResponseTemplate {
    ResponseTemplate::new(401).set_body_json(json!({ "error": message }))
}

/// Memory store that counts writes, to check when the manager touches it
#[derive(Default)]
pub struct CountingStore {
    inner: MemoryTokenStore,
    saves: AtomicUsize,
    clears: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            inner: MemoryTokenStore::with_tokens(tokens),
            ..Default::default()
        }
    }

    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn clears(&self) -> usize {
        self.clears.load(Ordering::SeqCst)
    }

    pub async fn tokens(&self) -> Option<StoredTokens> {
        self.inner.load().await.unwrap()
    }
}

#[async_trait]
impl TokenStore for CountingStore {
    async fn load(&self) -> Result<Option<StoredTokens>, AuthError> {
        self.inner.load().await
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError> {
        self.saves.fetch_add(1, Ordering::SeqCst);
        self.inner.save(tokens).await
    }

    async fn clear(&self) -> Result<(), AuthError> {
        self.clears.fetch_add(1, Ordering::SeqCst);
        self.inner.clear().await
    }
}
