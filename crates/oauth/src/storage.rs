//! Durable storage for the serialized token record.
//!
//! The secret store itself is an opaque key/value collaborator; [`TokenStore`]
//! layers the token record's (de)serialization and the "absent on failure"
//! policy on top of it.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    tokio::sync::Mutex,
    tracing::{debug, warn},
};

use crate::{Error, Result, types::TokenRecord};

/// Opaque key/value storage for secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    async fn store(&self, key: &str, value: &str) -> Result<()>;
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// One file per key, readable only by the owner.
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `<data dir>/skylark/tokens` for the current platform.
    pub fn default_dir() -> Result<PathBuf> {
        directories::ProjectDirs::from("org", "skylark", "skylark")
            .map(|dirs| dirs.data_dir().join("tokens"))
            .ok_or_else(|| Error::Storage("could not determine the data directory".into()))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{name}.json"))
    }
}

#[async_trait]
impl SecretStore for FileSecretStore {
    async fn store(&self, key: &str, value: &str) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        let path = self.path_for(key);

        // Write to a temp file first, then rename over the old value.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, value).await?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o600)).await?;
        }

        tokio::fs::rename(&tmp, &path).await?;
        debug!(path = %path.display(), "stored secret");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        match tokio::fs::read_to_string(self.path_for(key)).await {
            Ok(value) => Ok(Some(value)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "deleted secret");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// In-process secret store.
#[derive(Default)]
pub struct MemorySecretStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySecretStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.entries.lock().await.contains_key(key)
    }
}

#[async_trait]
impl SecretStore for MemorySecretStore {
    async fn store(&self, key: &str, value: &str) -> Result<()> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.lock().await.remove(key);
        Ok(())
    }
}

/// Typed access to the persisted [`TokenRecord`].
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<dyn SecretStore>,
    key: String,
}

impl TokenStore {
    pub fn new(backend: Arc<dyn SecretStore>, key: impl Into<String>) -> Self {
        Self {
            backend,
            key: key.into(),
        }
    }

    pub async fn save(&self, record: &TokenRecord) -> Result<()> {
        let json = serde_json::to_string(record)?;
        self.backend.store(&self.key, &json).await
    }

    /// Read and failures are reported as absent.
    pub async fn load(&self) -> Option<TokenRecord> {
        let raw = match self.backend.get(&self.key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to read stored token");
                return None;
            },
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(key = %self.key, error = %e, "stored token is unreadable, ignoring it");
                None
            },
        }
    }

    /// Best effort: failures are logged, never returned.
    pub async fn delete(&self) {
        if let Err(e) = self.backend.delete(&self.key).await {
            warn!(key = %self.key, error = %e, "failed to delete stored token");
        }
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn record() -> TokenRecord {
        TokenRecord {
            access_token: Some(SecretString::new("access".into())),
            refresh_token: Some(SecretString::new("refresh".into())),
            id_token: Some(SecretString::new("id".into())),
            token_type: Some("Bearer".into()),
            scope: Some("openid offline_access".into()),
            expires_in: 3600,
            expires_at: 1_700_003_600,
        }
    }

    #[tokio::test]
    async fn file_store_round_trips_record() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = Arc::new(FileSecretStore::new(tmp.path().join("tokens")));
        let store = TokenStore::new(backend, "skylark.oauth.token");

        store.save(&record()).await.unwrap();
        assert_eq!(store.load().await, Some(record()));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_store_restricts_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempfile::tempdir().unwrap();
        let backend = FileSecretStore::new(tmp.path());
        backend.store("k", "v").await.unwrap();

        let mode = std::fs::metadata(tmp.path().join("k.json"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn file_store_sanitizes_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileSecretStore::new(tmp.path());
        backend.store("../escape/key", "v").await.unwrap();
        assert!(tmp.path().join(".._escape_key.json").is_file());
        assert_eq!(backend.get("../escape/key").await.unwrap().as_deref(), Some("v"));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let backend = FileSecretStore::new(tmp.path());
        backend.store("k", "v").await.unwrap();

        backend.delete("k").await.unwrap();
        backend.delete("k").await.unwrap();
        assert_eq!(backend.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn corrupt_record_loads_as_absent() {
        let backend = Arc::new(MemorySecretStore::new());
        backend.store("key", "{not json").await.unwrap();
        let store = TokenStore::new(backend, "key");
        assert_eq!(store.load().await, None);
    }

    #[tokio::test]
    async fn memory_store_round_trips_record() {
        let backend = Arc::new(MemorySecretStore::new());
        let store = TokenStore::new(backend.clone(), "key");
        store.save(&record()).await.unwrap();
        assert!(backend.contains("key").await);
        assert_eq!(store.load().await, Some(record()));

        store.delete().await;
        assert!(!backend.contains("key").await);
        assert_eq!(store.load().await, None);
    }
}
