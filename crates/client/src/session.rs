//! Durable session state
//!
//! The [`SessionStore`] is the single source of truth for whether this client
//! is authenticated. It is backed by a [`Storage`] medium that survives
//! restarts; when the medium fails, the store keeps working from memory for
//! the lifetime of the process and the failure is only logged.

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, warn};

/// Storage keys used by the session store
pub struct SessionKeys;

impl SessionKeys {
    /// Bearer token issued by the API
    pub const TOKEN: &'static str = "token";

    /// "Remember me" flag chosen at login
    pub const REMEMBER_ME: &'static str = "rememberMe";
}

/// Storage medium errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage contents are corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Durable key-value medium
#[cfg_attr(test, mockall::automock)]
pub trait Storage: Send + Sync {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-process storage, lost when the process exits
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: RwLock<HashMap<String, String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.read().unwrap_or_else(PoisonError::into_inner);
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.write().unwrap_or_else(PoisonError::into_inner);
        items.remove(key);
        Ok(())
    }
}

/// JSON object persisted in a single file
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        match std::fs::read(&self.path) {
            Ok(bytes) if bytes.is_empty() => Ok(Map::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Map::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_all(&self, items: &Map<String, Value>) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(items)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl Storage for FileStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let _guard = self.lock.read().unwrap_or_else(PoisonError::into_inner);
        let items = self.read_all()?;
        Ok(items.get(key).and_then(Value::as_str).map(str::to_string))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        items.insert(key.to_string(), Value::String(value.to_string()));
        self.write_all(&items)
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let _guard = self.lock.write().unwrap_or_else(PoisonError::into_inner);
        let mut items = self.read_all()?;
        if items.remove(key).is_some() {
            self.write_all(&items)?;
        }
        Ok(())
    }
}

/// Process-wide authentication state
pub struct SessionStore {
    storage: Arc<dyn Storage>,
    token: RwLock<Option<String>>,
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("authenticated", &self.is_authenticated())
            .finish_non_exhaustive()
    }
}

impl SessionStore {
    /// Create a store and load any token persisted by a previous run
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        let token = match storage.get_item(SessionKeys::TOKEN) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!("Failed to load persisted session: {e}");
                None
            }
        };
        debug!(authenticated = token.is_some(), "Session store initialized");

        Self {
            storage,
            token: RwLock::new(token),
        }
    }

    /// Session that only lives in memory
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStorage::new()))
    }

    /// Store a token; an empty token clears the session
    pub fn set_token(&self, token: &str) {
        if token.is_empty() {
            self.clear_token();
            return;
        }

        *self.token.write().unwrap_or_else(PoisonError::into_inner) = Some(token.to_string());
        if let Err(e) = self.storage.set_item(SessionKeys::TOKEN, token) {
            warn!("Session token not persisted, it will be lost on restart: {e}");
        }
    }

    /// Current token, if any
    pub fn token(&self) -> Option<String> {
        self.token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Remove the token; clearing an empty session is a no-op.
    /// Returns whether a token was actually removed.
    pub fn clear_token(&self) -> bool {
        let previous = self
            .token
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.forget(previous.is_some())
    }

    /// Clear the session only if `token` is still the current one.
    ///
    /// Several requests carrying the same token may be rejected together;
    /// only the first rejection ends the session, and a token set by a
    /// newer login is left alone.
    pub fn revoke(&self, token: &str) -> bool {
        let mut current = self.token.write().unwrap_or_else(PoisonError::into_inner);
        if current.as_deref() != Some(token) {
            return false;
        }
        current.take();
        self.forget(true)
    }

    fn forget(&self, removed: bool) -> bool {
        if removed {
            debug!("Session cleared");
        }
        if let Err(e) = self.storage.remove_item(SessionKeys::TOKEN) {
            warn!("Failed to remove persisted session token: {e}");
        }
        removed
    }

    pub fn is_authenticated(&self) -> bool {
        self.token().is_some_and(|t| !t.is_empty())
    }

    /// Persist the "remember me" choice. It does not change how the token is stored.
    pub fn set_remember_me(&self, remember: bool) {
        let result = if remember {
            self.storage.set_item(SessionKeys::REMEMBER_ME, "true")
        } else {
            self.storage.remove_item(SessionKeys::REMEMBER_ME)
        };
        if let Err(e) = result {
            warn!("Failed to persist remember-me flag: {e}");
        }
    }

    pub fn remember_me(&self) -> bool {
        matches!(
            self.storage.get_item(SessionKeys::REMEMBER_ME),
            Ok(Some(ref v)) if v == "true"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_and_get_token() {
        let store = SessionStore::in_memory();
        assert!(!store.is_authenticated());

        store.set_token("abc123");
        assert_eq!(store.token().as_deref(), Some("abc123"));
        assert!(store.is_authenticated());
    }

    #[test]
    fn test_clear_token_is_idempotent() {
        let store = SessionStore::in_memory();
        store.set_token("abc123");

        assert!(store.clear_token());
        assert!(!store.is_authenticated());
        assert!(!store.clear_token());
        assert!(!store.is_authenticated());
        assert!(store.token().is_none());
    }

    #[test]
    fn test_revoke_only_clears_matching_token() {
        let store = SessionStore::in_memory();
        store.set_token("old");

        assert!(store.revoke("old"));
        assert!(!store.revoke("old"));
        assert!(!store.is_authenticated());

        store.set_token("new");
        assert!(!store.revoke("old"));
        assert_eq!(store.token().as_deref(), Some("new"));
    }

    #[test]
    fn test_empty_token_is_not_authenticated() {
        let store = SessionStore::in_memory();
        store.set_token("abc123");
        store.set_token("");
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_token_survives_reload() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        SessionStore::new(storage.clone()).set_token("persisted");

        let reloaded = SessionStore::new(storage);
        assert_eq!(reloaded.token().as_deref(), Some("persisted"));
    }

    #[test]
    fn test_write_failure_keeps_session_in_memory() {
        let mut storage = MockStorage::new();
        storage.expect_get_item().returning(|_| Ok(None));
        storage
            .expect_set_item()
            .returning(|_, _| Err(StorageError::Unavailable("quota exceeded".into())));

        let store = SessionStore::new(Arc::new(storage));
        store.set_token("abc123");

        assert!(store.is_authenticated());
        assert_eq!(store.token().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_load_failure_starts_unauthenticated() {
        let mut storage = MockStorage::new();
        storage
            .expect_get_item()
            .returning(|_| Err(StorageError::Unavailable("private mode".into())));

        let store = SessionStore::new(Arc::new(storage));
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_clear_ignores_storage_failure() {
        let mut storage = MockStorage::new();
        storage.expect_get_item().returning(|_| Ok(Some("abc".into())));
        storage
            .expect_remove_item()
            .times(2)
            .returning(|_| Err(StorageError::Unavailable("locked".into())));

        let store = SessionStore::new(Arc::new(storage));
        store.clear_token();
        store.clear_token();
        assert!(!store.is_authenticated());
    }

    #[test]
    fn test_remember_me_flag() {
        let store = SessionStore::in_memory();
        assert!(!store.remember_me());
        store.set_remember_me(true);
        assert!(store.remember_me());
        store.set_remember_me(false);
        assert!(!store.remember_me());
    }

    #[test]
    fn test_file_storage_persists_between_instances() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");

        let storage = FileStorage::new(&path);
        storage.set_item(SessionKeys::TOKEN, "abc").unwrap();
        storage.set_item(SessionKeys::REMEMBER_ME, "true").unwrap();
        storage.remove_item(SessionKeys::REMEMBER_ME).unwrap();

        let reopened = FileStorage::new(&path);
        assert_eq!(
            reopened.get_item(SessionKeys::TOKEN).unwrap().as_deref(),
            Some("abc")
        );
        assert!(reopened.get_item(SessionKeys::REMEMBER_ME).unwrap().is_none());
    }

    #[test]
    fn test_file_storage_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileStorage::new(dir.path().join("absent.json"));
        assert!(storage.get_item(SessionKeys::TOKEN).unwrap().is_none());
        storage.remove_item(SessionKeys::TOKEN).unwrap();
    }

    #[test]
    fn test_file_storage_corrupt_contents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = FileStorage::new(&path);
        assert!(matches!(
            storage.get_item(SessionKeys::TOKEN),
            Err(StorageError::Corrupt(_))
        ));
        assert!(!SessionStore::new(Arc::new(storage)).is_authenticated());
    }
}
