//! AgentHub auth client for Rust
//!
//! This crate keeps the client side of an AgentHub session: it stores the
//! access and refresh tokens, restores them at startup, refreshes expired
//! access tokens and retries rejected calls once, and drives the MFA flows.
//!
//! ```no_run
//! use std::sync::Arc;
//! use agenthub_auth::{AuthOptions, LoginOutcome, MemoryTokenStore, SessionManager};
//!
//! # async fn run() -> Result<(), agenthub_auth::AuthError> {
//! let manager = SessionManager::new(
//!     "http://localhost:5000/api",
//!     reqwest::Client::new(),
//!     Arc::new(MemoryTokenStore::new()),
//!     AuthOptions::default(),
//! )?;
//! manager.restore().await;
//!
//! if let LoginOutcome::MfaRequired(challenge) = manager.login("a@b.com", "pw").await? {
//!     manager.verify_mfa(&challenge.id, "123456").await?;
//! }
//! # Ok(())
//! # }
//! ```

mod error;
mod fetch;
mod guard;
mod manager;
mod session;
mod store;
mod types;

use std::time::Duration;

pub use error::AuthError;
pub use fetch::{remote_message, ApiRequest};
pub use guard::Access;
pub use manager::SessionManager;
pub use session::{token_expires_at, SessionPhase, SessionState, StoredTokens};
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore};
pub use types::{LoginOutcome, LoginResponse, MfaChallenge, MfaMethod, MfaSetupResponse, User};

/// クライアントオプション
#[derive(Debug, Clone)]
pub struct AuthOptions {
    /// Refresh before authenticated calls when the access token is about to expire
    pub auto_refresh_token: bool,
    /// How close to expiry a token counts as expiring
    pub refresh_leeway: Duration,
    /// Upper bound for the startup restore
    pub restore_timeout: Duration,
    /// Call the service's logout endpoint on sign-out
    pub revoke_on_sign_out: bool,
}

impl Default for AuthOptions {
    fn default() -> Self {
        Self {
            auto_refresh_token: true,
            refresh_leeway: Duration::from_secs(30),
            restore_timeout: Duration::from_secs(10),
            revoke_on_sign_out: true,
        }
    }
}

impl AuthOptions {
    pub fn with_auto_refresh_token(mut self, value: bool) -> Self {
        self.auto_refresh_token = value;
        self
    }

    pub fn with_refresh_leeway(mut self, value: Duration) -> Self {
        self.refresh_leeway = value;
        self
    }

    pub fn with_restore_timeout(mut self, value: Duration) -> Self {
        self.restore_timeout = value;
        self
    }

    pub fn with_revoke_on_sign_out(mut self, value: bool) -> Self {
        self.revoke_on_sign_out = value;
        self
    }
}
