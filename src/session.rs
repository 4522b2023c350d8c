//! Session guard: the state machine gating protected views.
//!
//! The guard owns the only writer of the session signal. View layers subscribe
//! to a [`watch`] channel and react to [`SessionState`] transitions; the guard
//! itself never navigates - it reports state and lets the caller decide how to
//! redirect.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::error::{AuthError, Result};
use crate::flow::AuthFlow;
use crate::storage::TokenStorage;
use crate::token::{parse_id_token, UserProfile};

/// Authentication state of the session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    /// Startup state, before [`SessionGuard::initialize`] has resolved.
    #[default]
    Unknown,
    /// A callback code exchange is in flight. Views must show a neutral
    /// waiting indicator here rather than redirecting, or the redirect races
    /// the exchange.
    Authenticating,
    /// A credential set is stored; the user identity comes from the ID token.
    Authenticated(UserProfile),
    /// No session. Protected views redirect to login.
    Unauthenticated,
}

impl SessionState {
    /// The authenticated user, if any.
    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionState::Authenticated(user) => Some(user),
            _ => None,
        }
    }

    /// Whether a session exists.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, SessionState::Authenticated(_))
    }

    /// Whether the view layer should redirect to the login view.
    ///
    /// False while `Unknown` or `Authenticating` - only a resolved
    /// unauthenticated state triggers a redirect.
    pub fn should_redirect_to_login(&self) -> bool {
        matches!(self, SessionState::Unauthenticated)
    }
}

/// Query parameters carried by the provider's callback redirect.
#[derive(Debug, Clone)]
pub struct CallbackParams {
    /// Authorization code to exchange.
    pub code: String,
    /// State parameter, compared against the pending login state.
    pub state: String,
}

/// State machine gating protected views.
///
/// Single writer of the session signal; the interceptor pipeline reports
/// terminal failures through [`SessionGuard::invalidate`], and the facade
/// drives login completion through [`SessionGuard::initialize`].
pub struct SessionGuard {
    storage: Arc<dyn TokenStorage>,
    flow: Arc<AuthFlow>,
    state_tx: watch::Sender<SessionState>,
}

impl SessionGuard {
    /// Create a guard in the `Unknown` state.
    pub fn new(storage: Arc<dyn TokenStorage>, flow: Arc<AuthFlow>) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unknown);
        Self {
            storage,
            flow,
            state_tx,
        }
    }

    /// Subscribe to session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// The current session state.
    pub fn current(&self) -> SessionState {
        self.state_tx.borrow().clone()
    }

    /// Resolve the initial session state.
    ///
    /// - stored credentials present: `Authenticated`
    /// - incoming callback with `code` and `state`: `Authenticating`, then the
    ///   outcome of the code exchange
    /// - otherwise: `Unauthenticated`
    ///
    /// A callback whose `state` does not match the pending login state is
    /// rejected with [`AuthError::StateMismatch`] and never produces a
    /// session. The pending state is consumed on any callback, success or
    /// failure, so a nonce cannot be replayed.
    #[instrument(skip(self, callback))]
    pub async fn initialize(&self, callback: Option<CallbackParams>) -> Result<SessionState> {
        if let Some(credentials) = self.storage.load().await? {
            match parse_id_token(&credentials.id_token) {
                Ok(claims) => {
                    // A callback that arrives while a session already exists is
                    // ignored, but its nonce is still spent: a pending login
                    // state must never outlive the callback that carried it.
                    if callback.is_some() {
                        self.storage.take_login_state().await?;
                    }
                    let user = UserProfile::from(&claims);
                    info!(email = %user.email, "session restored from stored credentials");
                    self.set(SessionState::Authenticated(user));
                    return Ok(self.current());
                }
                Err(e) => {
                    // Corrupt identity: never show a ghost session.
                    warn!("stored ID token unreadable ({e}), discarding credentials");
                    self.storage.clear().await?;
                }
            }
        }

        if let Some(params) = callback {
            self.set(SessionState::Authenticating);
            return match self.complete_login(params).await {
                Ok(user) => {
                    self.set(SessionState::Authenticated(user));
                    Ok(self.current())
                }
                Err(e) => {
                    self.set(SessionState::Unauthenticated);
                    Err(e)
                }
            };
        }

        debug!("no credentials and no callback - unauthenticated");
        self.set(SessionState::Unauthenticated);
        Ok(self.current())
    }

    /// Validate the callback state and exchange the code.
    async fn complete_login(&self, params: CallbackParams) -> Result<UserProfile> {
        // Compare-then-delete: the nonce is spent whatever happens next.
        let pending = self.storage.take_login_state().await?;

        match pending {
            Some(expected) if expected == params.state => {}
            _ => {
                warn!("callback state does not match pending login state");
                return Err(AuthError::StateMismatch.into());
            }
        }

        let (_credentials, user) = self.flow.exchange_code(&params.code).await?;
        Ok(user)
    }

    /// Drop to `Unauthenticated`.
    ///
    /// Called on logout and by the interceptor pipeline when a refresh fails
    /// terminally.
    pub(crate) fn invalidate(&self) {
        if self.state_tx.borrow().is_authenticated() {
            info!("session invalidated");
        }
        self.set(SessionState::Unauthenticated);
    }

    fn set(&self, state: SessionState) {
        // send only fails with no receivers; the guard keeps state regardless.
        self.state_tx.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AuthConfig;
    use crate::error::Error;
    use crate::storage::{MemoryTokenStorage, TokenStorage};
    use crate::token::{make_test_jwt, CredentialSet};

    fn guard_with_storage(storage: Arc<MemoryTokenStorage>) -> SessionGuard {
        let config = Arc::new(AuthConfig::default());
        let flow = Arc::new(AuthFlow::new(config, storage.clone()));
        SessionGuard::new(storage, flow)
    }

    fn stored_credentials() -> CredentialSet {
        CredentialSet {
            access_token: "access-1".into(),
            id_token: make_test_jwt(serde_json::json!({
                "email": "a@b.com",
                "name": "Ada"
            })),
            refresh_token: "refresh-1".into(),
        }
    }

    #[tokio::test]
    async fn test_initialize_without_tokens_is_unauthenticated() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let guard = guard_with_storage(storage);

        assert_eq!(guard.current(), SessionState::Unknown);
        let state = guard.initialize(None).await.unwrap();
        assert_eq!(state, SessionState::Unauthenticated);
        assert!(state.should_redirect_to_login());
    }

    #[tokio::test]
    async fn test_initialize_with_stored_credentials() {
        let storage = Arc::new(MemoryTokenStorage::with_credentials(stored_credentials()));
        let guard = guard_with_storage(storage);

        let state = guard.initialize(None).await.unwrap();
        let user = state.user().unwrap();
        assert_eq!(user.email, "a@b.com");
        assert!(!state.should_redirect_to_login());
    }

    #[tokio::test]
    async fn test_corrupt_id_token_discards_credentials() {
        let mut credentials = stored_credentials();
        credentials.id_token = "garbage".into();
        let storage = Arc::new(MemoryTokenStorage::with_credentials(credentials));
        let guard = guard_with_storage(storage.clone());

        let state = guard.initialize(None).await.unwrap();
        assert_eq!(state, SessionState::Unauthenticated);
        assert!(storage.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_state_mismatch_never_authenticates() {
        let storage = Arc::new(MemoryTokenStorage::new());
        storage.save_login_state("expected-nonce").await.unwrap();
        let guard = guard_with_storage(storage.clone());

        let err = guard
            .initialize(Some(CallbackParams {
                code: "syntactically-valid-code".into(),
                state: "attacker-nonce".into(),
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::StateMismatch)));
        assert_eq!(guard.current(), SessionState::Unauthenticated);
        // The nonce was consumed even though the callback was rejected.
        assert!(storage.load_login_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_during_existing_session_spends_nonce() {
        let storage = Arc::new(MemoryTokenStorage::with_credentials(stored_credentials()));
        storage.save_login_state("leftover-nonce").await.unwrap();
        let guard = guard_with_storage(storage.clone());

        let state = guard
            .initialize(Some(CallbackParams {
                code: "c1".into(),
                state: "leftover-nonce".into(),
            }))
            .await
            .unwrap();

        // The existing session wins, and the nonce is gone either way.
        assert!(state.is_authenticated());
        assert!(storage.load_login_state().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callback_without_pending_state_is_rejected() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let guard = guard_with_storage(storage);

        let err = guard
            .initialize(Some(CallbackParams {
                code: "c1".into(),
                state: "s1".into(),
            }))
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::StateMismatch)));
    }

    #[tokio::test]
    async fn test_invalidate_drops_to_unauthenticated() {
        let storage = Arc::new(MemoryTokenStorage::with_credentials(stored_credentials()));
        let guard = guard_with_storage(storage);
        guard.initialize(None).await.unwrap();

        let mut rx = guard.subscribe();
        guard.invalidate();

        assert_eq!(guard.current(), SessionState::Unauthenticated);
        assert!(rx.has_changed().unwrap());
    }
}
