//! AgentHub Rust Client Library
//!
//! A Rust client for the AgentHub API. The client owns one authentication
//! session: it restores persisted tokens at startup, keeps the access token
//! fresh and retries calls rejected with 401 once after a refresh.

pub mod config;
pub mod error;

use std::sync::Arc;

use log::info;
use reqwest::Client;
use serde::{de::DeserializeOwned, Serialize};

use agenthub_auth::{ApiRequest, FileTokenStore, MemoryTokenStore, SessionManager, TokenStore};

use crate::config::{ClientConfig, ClientOptions};
use crate::error::Result;

pub use agenthub_auth as auth;

/// The main entry point for the AgentHub Rust client
pub struct AgentHub {
    /// Where the API lives and how to reach it
    pub config: ClientConfig,
    /// HTTP client used for requests
    pub http_client: Client,
    session: Arc<SessionManager>,
}

impl AgentHub {
    /// Create a new client with default options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use agenthub_rust::AgentHub;
    ///
    /// let hub = AgentHub::new("http://localhost:5000/api").unwrap();
    /// ```
    pub fn new(api_url: &str) -> Result<Self> {
        Self::new_with_options(api_url, ClientOptions::default())
    }

    /// Create a new client with custom options
    ///
    /// # Example
    ///
    /// ```no_run
    /// use agenthub_rust::{AgentHub, config::ClientOptions};
    ///
    /// let options = ClientOptions::default().with_persist_session(false);
    /// let hub = AgentHub::new_with_options("http://localhost:5000/api", options).unwrap();
    /// ```
    pub fn new_with_options(api_url: &str, options: ClientOptions) -> Result<Self> {
        Self::from_config(ClientConfig::new(api_url, options)?)
    }

    /// Convenience function to create a client directly from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_config(ClientConfig::from_env()?)
    }

    /// Create a client, choosing the token store from the options
    pub fn from_config(config: ClientConfig) -> Result<Self> {
        let store: Arc<dyn TokenStore> = if config.options.persist_session {
            Arc::new(FileTokenStore::new(config.options.resolved_token_path()))
        } else {
            Arc::new(MemoryTokenStore::new())
        };
        Self::with_store(config, store)
    }

    /// Create a client over a caller-provided token store
    pub fn with_store(config: ClientConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = config.options.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http_client = builder.build()?;

        let session = SessionManager::new(
            config.base_url(),
            http_client.clone(),
            store,
            config.options.auth.clone(),
        )?;

        Ok(Self {
            config,
            http_client,
            session: Arc::new(session),
        })
    }

    /// Restore the persisted session. Call once at startup.
    pub async fn init(&self) {
        info!("Initializing AgentHub client for {}", self.config.base_url());
        self.session.restore().await;
    }

    /// Get a reference to the session manager
    pub fn auth(&self) -> &SessionManager {
        &self.session
    }

    /// Shared handle to the session manager, for handing to other tasks
    pub fn session(&self) -> Arc<SessionManager> {
        Arc::clone(&self.session)
    }

    /// Send an authenticated request through the session's retry policy
    pub async fn request<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T> {
        Ok(self.session.execute(request).await?)
    }

    /// Authenticated GET
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::get(path)).await
    }

    /// Authenticated POST with a JSON body
    pub async fn post<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = ApiRequest::post(path).json(body)?;
        self.request(request).await
    }

    /// Authenticated PUT with a JSON body
    pub async fn put<B: Serialize, T: DeserializeOwned>(&self, path: &str, body: &B) -> Result<T> {
        let request = ApiRequest::put(path).json(body)?;
        self.request(request).await
    }

    /// Authenticated PATCH with a JSON body
    pub async fn patch<B: Serialize, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        let request = ApiRequest::patch(path).json(body)?;
        self.request(request).await
    }

    /// Authenticated DELETE
    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(ApiRequest::delete(path)).await
    }
}

/// A convenience module for common imports
pub mod prelude {
    pub use crate::config::{ClientConfig, ClientOptions};
    pub use crate::error::Error;
    pub use crate::AgentHub;
    pub use agenthub_auth::{
        Access, ApiRequest, AuthError, AuthOptions, LoginOutcome, MfaMethod, SessionManager,
        SessionPhase, User,
    };
}
