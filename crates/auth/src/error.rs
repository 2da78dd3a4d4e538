//! Error handling for the session manager

use thiserror::Error;

pub(crate) const REGISTRATION_FAILED: &str = "Registration failed";
pub(crate) const LOGIN_FAILED: &str = "Login failed";
pub(crate) const MFA_VERIFICATION_FAILED: &str = "MFA verification failed";
pub(crate) const MFA_SETUP_FAILED: &str = "MFA setup failed";
pub(crate) const MFA_DISABLE_FAILED: &str = "Failed to disable MFA";
pub(crate) const SESSION_EXPIRED: &str = "Session expired";

/// エラー型
#[derive(Error, Debug)]
pub enum AuthError {
    /// The remote service rejected a registration request
    #[error("Registration error: {0}")]
    Registration(String),

    /// Bad credentials or any other failed sign-in
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// MFA verification, setup or removal failed
    #[error("MFA error: {0}")]
    Mfa(String),

    /// The operation needs a session and none exists
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("No refresh token available")]
    NoRefreshToken,

    /// A request was rejected with 401 and the session could not be renewed
    #[error("Session expired: {0}")]
    SessionExpired(String),

    /// Any other HTTP failure of an authenticated call
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// The token store could not be read or written
    #[error("Token store error: {0}")]
    Store(String),

    #[error("Operation timed out")]
    Timeout,
}

impl AuthError {
    /// True when the error ended the session
    pub fn is_session_expired(&self) -> bool {
        matches!(self, AuthError::SessionExpired(_))
    }

    /// Human-readable message, without the kind prefix
    pub fn message(&self) -> String {
        match self {
            AuthError::Registration(msg)
            | AuthError::Authentication(msg)
            | AuthError::Mfa(msg)
            | AuthError::SessionExpired(msg) => msg.clone(),
            AuthError::Api { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// The HTTP status behind this error, if the remote service answered
    pub fn status(&self) -> Option<u16> {
        match self {
            AuthError::Api { status, .. } => Some(*status),
            AuthError::SessionExpired(_) => Some(401),
            AuthError::Network(err) => err.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    /// Turn a rejected call into the error kind of the operation that made it.
    ///
    /// Only `Api` failures are rewritten: session expiry, transport and
    /// store errors keep their own kind.
    pub(crate) fn into_operation_error(self, kind: fn(String) -> AuthError) -> AuthError {
        match self {
            AuthError::Api { message, .. } => kind(message),
            other => other,
        }
    }

    pub(crate) fn store<T: std::fmt::Display>(msg: T) -> Self {
        AuthError::Store(msg.to_string())
    }
}
