//! Credential storage backends.
//!
//! The [`TokenStorage`] trait is the persistence seam for the credential
//! lifecycle: the stored [`CredentialSet`] plus the pending login state (the
//! CSRF nonce minted when a login starts). Two backends are provided:
//!
//! - [`MemoryTokenStorage`] - in-process, for tests and embedding
//! - [`FileTokenStorage`] - a single JSON document on disk, written atomically
//!
//! All writes are immediately visible to subsequent reads, and the three token
//! fields are persisted as one atomic unit: no backend ever exposes a partial
//! credential set.

pub mod file;

use std::sync::RwLock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::token::CredentialSet;

pub use file::FileTokenStorage;

/// Persistence seam for credentials and the pending login state.
#[async_trait]
pub trait TokenStorage: Send + Sync {
    /// Load the stored credential set, if any.
    async fn load(&self) -> Result<Option<CredentialSet>>;

    /// Save a credential set, replacing any previous one as a whole.
    async fn save(&self, credentials: &CredentialSet) -> Result<()>;

    /// Remove the stored credential set. Idempotent.
    async fn clear(&self) -> Result<()>;

    /// Load the pending login state without consuming it.
    async fn load_login_state(&self) -> Result<Option<String>>;

    /// Save the pending login state, replacing any previous one.
    ///
    /// At most one login attempt is pending at a time.
    async fn save_login_state(&self, state: &str) -> Result<()>;

    /// Remove and return the pending login state.
    ///
    /// Callback handling compares then deletes in one step so a nonce can
    /// never be replayed.
    async fn take_login_state(&self) -> Result<Option<String>>;

    /// Get the backend name for logging.
    fn name(&self) -> &str;
}

/// The single persisted document: credentials and pending login state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct StoredAuth {
    #[serde(default)]
    pub credentials: Option<CredentialSet>,
    #[serde(default)]
    pub login_state: Option<String>,
}

/// In-memory token storage.
///
/// Useful for tests and for hosts that manage persistence themselves.
#[derive(Debug, Default)]
pub struct MemoryTokenStorage {
    inner: RwLock<StoredAuth>,
}

impl MemoryTokenStorage {
    /// Create an empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an in-memory storage seeded with a credential set.
    pub fn with_credentials(credentials: CredentialSet) -> Self {
        Self {
            inner: RwLock::new(StoredAuth {
                credentials: Some(credentials),
                login_state: None,
            }),
        }
    }
}

#[async_trait]
impl TokenStorage for MemoryTokenStorage {
    async fn load(&self) -> Result<Option<CredentialSet>> {
        Ok(self.inner.read().unwrap().credentials.clone())
    }

    async fn save(&self, credentials: &CredentialSet) -> Result<()> {
        self.inner.write().unwrap().credentials = Some(credentials.clone());
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.inner.write().unwrap().credentials = None;
        Ok(())
    }

    async fn load_login_state(&self) -> Result<Option<String>> {
        Ok(self.inner.read().unwrap().login_state.clone())
    }

    async fn save_login_state(&self, state: &str) -> Result<()> {
        self.inner.write().unwrap().login_state = Some(state.to_string());
        Ok(())
    }

    async fn take_login_state(&self) -> Result<Option<String>> {
        Ok(self.inner.write().unwrap().login_state.take())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
