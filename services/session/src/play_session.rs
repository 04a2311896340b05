//! Play session cache
//!
//! A client-local pointer to the most recent allowance, so the common path
//! ("is my session active?") costs one account read instead of a nonce scan.
//! The entry is a hint: absence, corruption and expiry all read as a miss.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use shared::constants::PLAY_SESSION_KEY_PREFIX;
use shared::errors::SessionError;
use shared::types::PlaySessionEntry;
use solana_sdk::pubkey::Pubkey;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("play session store I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("play session store is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),
}

impl From<StoreError> for SessionError {
    fn from(error: StoreError) -> Self {
        SessionError::internal("Play session store failed").with_context(error.to_string())
    }
}

/// Key → string persistence
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn set(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn remove(&self, key: &str) -> Result<(), StoreError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// A JSON object on disk holding every key
///
/// Writes go to a sibling temp file and are renamed into place.
pub struct FileStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_map(&self) -> Result<HashMap<String, String>, StoreError> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) if bytes.is_empty() => Ok(HashMap::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }

    /// Like `read_map`, but a corrupt file is replaced rather than fatal
    async fn read_map_for_write(&self) -> Result<HashMap<String, String>, StoreError> {
        match self.read_map().await {
            Err(StoreError::Corrupt(e)) => {
                warn!(path = %self.path.display(), error = %e, "Discarding corrupt play session file");
                Ok(HashMap::new())
            }
            other => other,
        }
    }

    async fn write_map(&self, map: &HashMap<String, String>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(map)?;
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl SessionStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let _guard = self.lock.lock().await;
        Ok(self.read_map().await?.remove(key))
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map_for_write().await?;
        map.insert(key.to_string(), value);
        self.write_map(&map).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let _guard = self.lock.lock().await;
        let mut map = self.read_map_for_write().await?;
        if map.remove(key).is_some() {
            self.write_map(&map).await?;
        }
        Ok(())
    }
}

pub struct PlaySessionCache {
    store: Arc<dyn SessionStore>,
}

impl PlaySessionCache {
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    pub fn key(user: &Pubkey) -> String {
        format!("{}{}", PLAY_SESSION_KEY_PREFIX, user)
    }

    /// The cached entry for `user`, if present, parseable and unexpired at `now`
    ///
    /// Store failures are logged and read as a miss.
    pub async fn load(&self, user: &Pubkey, now: i64) -> Option<PlaySessionEntry> {
        let key = Self::key(user);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                metrics::counter!("play_session_cache_misses_total").increment(1);
                return None;
            }
            Err(error) => {
                warn!(user = %user, error = %error, "Play session store unreadable");
                metrics::counter!("play_session_cache_misses_total").increment(1);
                return None;
            }
        };

        let entry = match serde_json::from_str::<PlaySessionEntry>(&raw) {
            Ok(entry) if !entry.is_expired(now) => entry,
            Ok(entry) => {
                debug!(user = %user, expires_at = entry.expires_at, "Play session expired");
                self.discard(&key).await;
                metrics::counter!("play_session_cache_misses_total").increment(1);
                return None;
            }
            Err(error) => {
                warn!(user = %user, error = %error, "Discarding unparseable play session");
                self.discard(&key).await;
                metrics::counter!("play_session_cache_misses_total").increment(1);
                return None;
            }
        };

        metrics::counter!("play_session_cache_hits_total").increment(1);
        Some(entry)
    }

    /// Last writer wins
    pub async fn store(&self, user: &Pubkey, entry: &PlaySessionEntry) -> Result<(), SessionError> {
        let raw = serde_json::to_string(entry).map_err(StoreError::from)?;
        self.store.set(&Self::key(user), raw).await?;
        Ok(())
    }

    pub async fn remove(&self, user: &Pubkey) -> Result<(), SessionError> {
        self.store.remove(&Self::key(user)).await?;
        Ok(())
    }

    /// Remove only when the cached entry points at `allowance`
    pub async fn remove_if_points_to(
        &self,
        user: &Pubkey,
        allowance: &Pubkey,
    ) -> Result<bool, SessionError> {
        let key = Self::key(user);
        let raw = match self.store.get(&key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Ok(false),
            Err(error) => {
                warn!(user = %user, error = %error, "Play session store unreadable");
                return Ok(false);
            }
        };

        match serde_json::from_str::<PlaySessionEntry>(&raw) {
            Ok(entry) if entry.allowance != *allowance => Ok(false),
            // Matching or unparseable: either way it must go
            _ => {
                self.store.remove(&key).await?;
                Ok(true)
            }
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(error) = self.store.remove(key).await {
            warn!(key, error = %error, "Failed to discard play session");
        }
    }
}
