//! Configuration options for the AgentHub client

use std::path::PathBuf;
use std::time::Duration;

use agenthub_auth::AuthOptions;
use url::Url;

use crate::error::{Error, Result};

/// API base used when nothing else is configured
pub const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Configuration options for the AgentHub client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The request timeout
    pub request_timeout: Option<Duration>,

    /// Keep tokens on disk between runs
    pub persist_session: bool,

    /// Where the token file lives when `persist_session` is set
    pub token_path: Option<PathBuf>,

    /// Session manager behaviour
    pub auth: AuthOptions,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            request_timeout: Some(Duration::from_secs(30)),
            persist_session: true,
            token_path: None,
            auth: AuthOptions::default(),
        }
    }
}

impl ClientOptions {
    /// Set the request timeout
    pub fn with_request_timeout(mut self, value: Option<Duration>) -> Self {
        self.request_timeout = value;
        self
    }

    /// Set whether to persist the session
    pub fn with_persist_session(mut self, value: bool) -> Self {
        self.persist_session = value;
        self
    }

    /// Set the token file location
    pub fn with_token_path(mut self, value: impl Into<PathBuf>) -> Self {
        self.token_path = Some(value.into());
        self
    }

    /// Set the session manager options
    pub fn with_auth(mut self, value: AuthOptions) -> Self {
        self.auth = value;
        self
    }

    /// Token file to use: the configured path, or `agenthub/tokens.json`
    /// under the platform's config directory
    pub fn resolved_token_path(&self) -> PathBuf {
        if let Some(path) = &self.token_path {
            return path.clone();
        }
        default_config_dir().join("agenthub").join("tokens.json")
    }
}

fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    if let Some(dir) = std::env::var_os("APPDATA").filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    match std::env::var_os("HOME").filter(|d| !d.is_empty()) {
        Some(home) => PathBuf::from(home).join(".config"),
        None => PathBuf::from("."),
    }
}

/// Where the API lives and how to talk to it
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_url: Url,
    pub options: ClientOptions,
}

impl ClientConfig {
    /// Creates a new configuration, validating the URL.
    pub fn new(api_url: &str, options: ClientOptions) -> Result<Self> {
        let api_url = Url::parse(api_url)?;
        if !matches!(api_url.scheme(), "http" | "https") {
            return Err(Error::config(format!(
                "api_url must be http or https, got {}",
                api_url.scheme()
            )));
        }
        Ok(Self { api_url, options })
    }

    /// Build the configuration from the environment.
    ///
    /// `AGENTHUB_API_URL` (default [`DEFAULT_API_URL`]),
    /// `AGENTHUB_TOKEN_PATH` and `AGENTHUB_REQUEST_TIMEOUT_SECS` are read;
    /// anything unset keeps its default.
    pub fn from_env() -> Result<Self> {
        let api_url =
            std::env::var("AGENTHUB_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string());

        let mut options = ClientOptions::default();
        if let Ok(path) = std::env::var("AGENTHUB_TOKEN_PATH") {
            options = options.with_token_path(path);
        }
        if let Ok(secs) = std::env::var("AGENTHUB_REQUEST_TIMEOUT_SECS") {
            let secs: u64 = secs.parse().map_err(|_| {
                Error::config(format!("AGENTHUB_REQUEST_TIMEOUT_SECS is not a number: {}", secs))
            })?;
            options = options.with_request_timeout(Some(Duration::from_secs(secs)));
        }

        Self::new(&api_url, options)
    }

    /// The API base without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_url.as_str().trim_end_matches('/')
    }
}
