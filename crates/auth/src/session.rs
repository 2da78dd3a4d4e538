//! Session state held by the session manager

use chrono::{DateTime, TimeZone, Utc};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::User;

/// The two persisted credentials.
///
/// Serialized with the keys `access_token` and `refresh_token`, the layout
/// every [`crate::TokenStore`] keeps.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl StoredTokens {
    pub fn new(access_token: impl Into<String>, refresh_token: Option<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
        }
    }
}

impl fmt::Debug for StoredTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoredTokens")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Where the session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Startup restore has not finished yet
    Uninitialized,
    Anonymous,
    Authenticated,
}

/// セッション情報
///
/// Snapshot of the manager's state. Subscribers receive a fresh copy on
/// every transition.
#[derive(Clone, Default, PartialEq)]
pub struct SessionState {
    pub(crate) tokens: Option<StoredTokens>,
    pub(crate) user: Option<User>,
    pub(crate) loading: bool,
    pub(crate) last_error: Option<String>,
}

impl SessionState {
    pub(crate) fn initial() -> Self {
        Self {
            loading: true,
            ..Default::default()
        }
    }

    pub fn access_token(&self) -> Option<&str> {
        self.tokens.as_ref().map(|t| t.access_token.as_str())
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.tokens.as_ref().and_then(|t| t.refresh_token.as_deref())
    }

    pub fn current_user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.is_some()
    }

    /// True only while the startup restore is running
    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn phase(&self) -> SessionPhase {
        if self.is_authenticated() {
            SessionPhase::Authenticated
        } else if self.loading {
            SessionPhase::Uninitialized
        } else {
            SessionPhase::Anonymous
        }
    }

    /// Expiry of the access token, when it is a JWT carrying `exp`
    pub fn access_token_expires_at(&self) -> Option<DateTime<Utc>> {
        self.access_token().and_then(token_expires_at)
    }

    pub(crate) fn clear(&mut self) {
        self.tokens = None;
        self.user = None;
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionState")
            .field("tokens", &self.tokens)
            .field("user", &self.user)
            .field("loading", &self.loading)
            .field("last_error", &self.last_error)
            .finish()
    }
}

#[derive(Deserialize)]
struct ExpiryClaims {
    exp: Option<i64>,
}

/// Read the `exp` claim of a JWT without checking its signature.
///
/// The client only uses this to schedule refreshes; the server remains the
/// authority on whether a token is valid. Opaque tokens yield `None`.
pub fn token_expires_at(token: &str) -> Option<DateTime<Utc>> {
    let mut validation = Validation::default();
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation.required_spec_claims.clear();

    let data = decode::<ExpiryClaims>(token, &DecodingKey::from_secret(&[]), &validation).ok()?;
    Utc.timestamp_opt(data.claims.exp?, 0).single()
}
