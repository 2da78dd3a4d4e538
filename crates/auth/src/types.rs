//! Types exchanged with the remote auth service

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// ユーザー情報
///
/// Replaced wholesale on every profile fetch, never patched in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,

    #[serde(default)]
    pub email: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub roles: BTreeSet<String>,

    #[serde(default)]
    pub mfa_enabled: bool,

    #[serde(default)]
    pub subscription_tier: String,

    #[serde(default)]
    pub subscription_status: String,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }
}

/// Second factor kinds understood by the service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MfaMethod {
    Totp,
    /// Any method this client does not know about
    #[serde(other)]
    Unsupported,
}

impl MfaMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Totp => "totp",
            Self::Unsupported => "unsupported",
        }
    }
}

/// Body of a successful login or MFA verification
#[derive(Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    /// Fields the client does not interpret, kept so callers see the full body
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl fmt::Debug for LoginResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginResponse")
            .field("id", &self.id)
            .field("email", &self.email)
            .field("username", &self.username)
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("message", &self.message)
            .finish()
    }
}

/// MFAチャレンジ
///
/// Returned by login when the account has a second factor; no tokens are
/// issued until [`crate::SessionManager::verify_mfa`] succeeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaChallenge {
    pub id: String,
    pub mfa_required: bool,
    pub mfa_method: Option<MfaMethod>,
}

/// Result of a password login
#[derive(Debug, Clone)]
pub enum LoginOutcome {
    /// Tokens were issued and the session is authenticated
    Authenticated(LoginResponse),
    /// A second factor is required before tokens are issued
    MfaRequired(MfaChallenge),
}

impl LoginOutcome {
    pub fn is_mfa_required(&self) -> bool {
        matches!(self, LoginOutcome::MfaRequired(_))
    }
}

/// TOTP設定情報
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MfaSetupResponse {
    pub provisioning_uri: String,
    pub secret: String,
}

impl fmt::Debug for MfaSetupResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MfaSetupResponse")
            .field("provisioning_uri", &self.provisioning_uri)
            .field("secret", &"<redacted>")
            .finish()
    }
}

#[derive(Serialize)]
pub(crate) struct RegisterRequest<'a> {
    pub email: &'a str,
    pub username: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub email: &'a str,
    pub password: &'a str,
}

#[derive(Serialize)]
pub(crate) struct MfaVerifyRequest<'a> {
    pub user_id: &'a str,
    pub code: &'a str,
}

#[derive(Serialize)]
pub(crate) struct MfaSetupRequest {
    pub method: MfaMethod,
}

#[derive(Serialize)]
pub(crate) struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

#[derive(Deserialize)]
pub(crate) struct RefreshResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}
