//! File-backed token storage.
//!
//! Persists the whole auth document as one JSON file. Writes go to a
//! temporary file in the same directory followed by a rename, so a reader
//! never observes a partially written credential set, even across a crash
//! mid-write.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::instrument;

use super::{StoredAuth, TokenStorage};
use crate::error::{Error, Result};
use crate::token::CredentialSet;

/// File-backed token storage.
///
/// # Example
///
/// ```rust,ignore
/// use fhirsearch_auth::storage::FileTokenStorage;
///
/// // ~/.local/share/fhirsearch/auth.json
/// let storage = FileTokenStorage::app_data_path()?;
/// ```
#[derive(Debug)]
pub struct FileTokenStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileTokenStorage {
    /// Create a storage backed by the given file path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Create a storage under the platform data directory
    /// (`~/.local/share/fhirsearch/auth.json` on Linux).
    pub fn app_data_path() -> Result<Self> {
        let dir = dirs::data_dir()
            .ok_or_else(|| Error::storage("no platform data directory available"))?
            .join("fhirsearch");
        Ok(Self::new(dir.join("auth.json")))
    }

    /// The path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<StoredAuth> {
        match std::fs::read_to_string(&self.path) {
            Ok(contents) => serde_json::from_str(&contents)
                .map_err(|e| Error::storage(format!("corrupt auth file: {e}"))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StoredAuth::default()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_document(&self, document: &StoredAuth) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(document)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn update<F>(&self, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut StoredAuth),
    {
        let _guard = self.write_lock.lock().unwrap();
        let mut document = self.read_document()?;
        mutate(&mut document);
        self.write_document(&document)
    }
}

#[async_trait]
impl TokenStorage for FileTokenStorage {
    #[instrument(skip(self))]
    async fn load(&self) -> Result<Option<CredentialSet>> {
        Ok(self.read_document()?.credentials)
    }

    #[instrument(skip(self, credentials))]
    async fn save(&self, credentials: &CredentialSet) -> Result<()> {
        let credentials = credentials.clone();
        self.update(|doc| doc.credentials = Some(credentials))
    }

    #[instrument(skip(self))]
    async fn clear(&self) -> Result<()> {
        self.update(|doc| doc.credentials = None)
    }

    async fn load_login_state(&self) -> Result<Option<String>> {
        Ok(self.read_document()?.login_state)
    }

    async fn save_login_state(&self, state: &str) -> Result<()> {
        let state = state.to_string();
        self.update(|doc| doc.login_state = Some(state))
    }

    async fn take_login_state(&self) -> Result<Option<String>> {
        let _guard = self.write_lock.lock().unwrap();
        let mut document = self.read_document()?;
        let state = document.login_state.take();
        if state.is_some() {
            self.write_document(&document)?;
        }
        Ok(state)
    }

    fn name(&self) -> &str {
        "file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials(tag: &str) -> CredentialSet {
        CredentialSet {
            access_token: format!("access-{tag}"),
            id_token: format!("id-{tag}"),
            refresh_token: format!("refresh-{tag}"),
        }
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("auth.json"));

        assert!(storage.load().await.unwrap().is_none());

        storage.save(&credentials("1")).await.unwrap();
        let loaded = storage.load().await.unwrap().unwrap();
        assert_eq!(loaded, credentials("1"));

        // A second storage over the same file sees the write.
        let other = FileTokenStorage::new(dir.path().join("auth.json"));
        assert_eq!(other.load().await.unwrap().unwrap(), credentials("1"));
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("auth.json"));

        storage.clear().await.unwrap();
        storage.save(&credentials("1")).await.unwrap();
        storage.clear().await.unwrap();
        storage.clear().await.unwrap();
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_no_partial_write_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        let storage = FileTokenStorage::new(&path);

        storage.save(&credentials("1")).await.unwrap();
        storage.save(&credentials("2")).await.unwrap();

        // Only the final document exists; the temp file was renamed away.
        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(storage.load().await.unwrap().unwrap(), credentials("2"));
    }

    #[tokio::test]
    async fn test_login_state_survives_credential_clear() {
        let dir = tempfile::tempdir().unwrap();
        let storage = FileTokenStorage::new(dir.path().join("auth.json"));

        storage.save_login_state("nonce-1").await.unwrap();
        storage.save(&credentials("1")).await.unwrap();
        storage.clear().await.unwrap();

        assert_eq!(
            storage.take_login_state().await.unwrap().as_deref(),
            Some("nonce-1")
        );
        assert!(storage.load_login_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.json");
        std::fs::write(&path, "not json").unwrap();

        let storage = FileTokenStorage::new(&path);
        assert!(storage.load().await.is_err());
    }
}
