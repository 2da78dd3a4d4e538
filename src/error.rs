//! Error handling for the AgentHub Rust client

use std::fmt;
use thiserror::Error;

/// Unified error type for the AgentHub Rust client
#[derive(Error, Debug)]
pub enum Error {
    /// Session and authentication errors
    #[error(transparent)]
    Auth(#[from] agenthub_auth::AuthError),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing errors
    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    /// Network or HTTP related errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Create a new configuration error
    pub fn config<T: fmt::Display>(msg: T) -> Self {
        Error::Config(msg.to_string())
    }

    /// True when the session ended and the user must sign in again
    pub fn is_session_expired(&self) -> bool {
        matches!(self, Error::Auth(err) if err.is_session_expired())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
