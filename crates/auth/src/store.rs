//! Persistent token storage

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::session::StoredTokens;

/// Durable home of the session credentials.
///
/// Only the session manager writes to a store. Both credentials are written
/// and removed together; implementations must never leave one entry updated
/// without the other.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Persisted tokens, or `None` when no access token is stored
    async fn load(&self) -> Result<Option<StoredTokens>, AuthError>;

    async fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError>;

    /// Remove both entries. Clearing an empty store is not an error.
    async fn clear(&self) -> Result<(), AuthError>;
}

/// Process-local store, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    tokens: Mutex<Option<StoredTokens>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with tokens already persisted, as after a previous run
    pub fn with_tokens(tokens: StoredTokens) -> Self {
        Self {
            tokens: Mutex::new(Some(tokens)),
        }
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, AuthError> {
        Ok(self.tokens.lock().await.clone())
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError> {
        *self.tokens.lock().await = Some(tokens.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<(), AuthError> {
        *self.tokens.lock().await = None;
        Ok(())
    }
}

/// JSON file store for desktop and CLI consumers.
///
/// Writes go to a sibling temp file which is then renamed over the target,
/// so a crash never leaves a half-written pair. On unix the file is created
/// readable by its owner only.
#[derive(Debug, Clone)]
pub struct FileTokenStore {
    path: PathBuf,
}

impl FileTokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "tokens".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn load(&self) -> Result<Option<StoredTokens>, AuthError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(AuthError::store(err)),
        };

        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(None);
        }

        let tokens: StoredTokens = serde_json::from_slice(&bytes)?;
        if tokens.access_token.is_empty() {
            return Ok(None);
        }
        Ok(Some(tokens))
    }

    async fn save(&self, tokens: &StoredTokens) -> Result<(), AuthError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(AuthError::store)?;
            }
        }

        let body = serde_json::to_vec_pretty(tokens)?;
        let temp = self.temp_path();

        // a leftover temp file would keep its old permissions
        match tokio::fs::remove_file(&temp).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(AuthError::store(err)),
        }

        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        options.mode(0o600);

        let mut file = options.open(&temp).await.map_err(AuthError::store)?;
        file.write_all(&body).await.map_err(AuthError::store)?;
        file.sync_all().await.map_err(AuthError::store)?;
        drop(file);

        tokio::fs::rename(&temp, &self.path)
            .await
            .map_err(AuthError::store)
    }

    async fn clear(&self) -> Result<(), AuthError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(AuthError::store(err)),
        }
    }
}
