//! Client facade wiring the credential lifecycle together.
//!
//! [`AuthClient`] is the single entry point for the view layer: a session
//! signal to read, `start_login` / `logout` to act, and `request` / `send` /
//! `get` for protected API calls with transparent refresh-and-retry.
//!
//! # Example
//!
//! ```rust,ignore
//! use fhirsearch_auth::{AuthClient, AuthConfig, FileTokenStorage};
//!
//! let storage = FileTokenStorage::app_data_path()?;
//! let client = AuthClient::new(AuthConfig::load(), storage);
//!
//! // On startup, resolve the session (passing callback params if present).
//! let state = client.initialize(None).await?;
//! if state.should_redirect_to_login() {
//!     client.start_login().await?;
//! }
//!
//! // Later: protected calls carry credentials and survive token expiry.
//! let bundle = client.get(&format!("{}/Patient?name=doe", client.config().api_base_url)).await?;
//! ```

use std::sync::Arc;

use reqwest::{Method, RequestBuilder, Response};
use tokio::sync::watch;
use tracing::{info, instrument};

use crate::agent::{SystemBrowser, UserAgent};
use crate::config::AuthConfig;
use crate::error::{AuthError, Result};
use crate::flow::AuthFlow;
use crate::http::ApiClient;
use crate::session::{CallbackParams, SessionGuard, SessionState};
use crate::storage::TokenStorage;

/// OAuth2 credential lifecycle manager for the protected FHIR search API.
#[derive(Clone)]
pub struct AuthClient {
    config: Arc<AuthConfig>,
    storage: Arc<dyn TokenStorage>,
    flow: Arc<AuthFlow>,
    guard: Arc<SessionGuard>,
    api: ApiClient,
    agent: Arc<dyn UserAgent>,
}

impl AuthClient {
    /// Create a client that navigates via the system browser.
    pub fn new(config: AuthConfig, storage: impl TokenStorage + 'static) -> Self {
        Self::with_user_agent(config, Arc::new(storage), Arc::new(SystemBrowser))
    }

    /// Create a client with an explicit navigation seam.
    pub fn with_user_agent(
        config: AuthConfig,
        storage: Arc<dyn TokenStorage>,
        agent: Arc<dyn UserAgent>,
    ) -> Self {
        let config = Arc::new(config);
        let flow = Arc::new(AuthFlow::new(config.clone(), storage.clone()));
        let guard = Arc::new(SessionGuard::new(storage.clone(), flow.clone()));
        let api = ApiClient::new(config.clone(), storage.clone(), flow.clone(), guard.clone());
        Self {
            config,
            storage,
            flow,
            guard,
            api,
            agent,
        }
    }

    /// The active configuration.
    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Resolve the initial session state, handling an authorization callback
    /// if one is present. See [`SessionGuard::initialize`].
    pub async fn initialize(&self, callback: Option<CallbackParams>) -> Result<SessionState> {
        self.guard.initialize(callback).await
    }

    /// Start a login attempt: mint and persist the CSRF state, then send the
    /// user agent to the provider's authorization endpoint.
    ///
    /// Control leaves the application here; the provider redirects back to
    /// the callback URL with `code` and `state`.
    #[instrument(skip(self))]
    pub async fn start_login(&self) -> Result<()> {
        let url = self.flow.begin_login().await?;
        self.agent.navigate(&url)
    }

    /// Log out: clear stored credentials, drop the session, and send the user
    /// agent to the provider's end-session endpoint.
    ///
    /// Requires the stored ID token as `id_token_hint`; without one this
    /// fails with [`AuthError::MissingIdentity`] and performs no side effects
    /// (indistinguishable from "already logged out").
    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<()> {
        let id_token = match self.storage.load().await? {
            Some(credentials) if !credentials.id_token.is_empty() => credentials.id_token,
            _ => return Err(AuthError::MissingIdentity.into()),
        };

        let url = self.flow.end_session_url(&id_token);
        self.storage.clear().await?;
        self.guard.invalidate();
        info!("logged out, ending provider session");
        self.agent.navigate(&url)
    }

    /// The current session state.
    pub fn session(&self) -> SessionState {
        self.guard.current()
    }

    /// Subscribe to session state changes.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.guard.subscribe()
    }

    /// Start building a protected API request.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.api.request(method, url)
    }

    /// Send a request through the interceptor pipeline.
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        self.api.send(builder).await
    }

    /// GET a URL through the interceptor pipeline.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.api.get(url).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::RecordingUserAgent;
    use crate::error::Error;
    use crate::storage::MemoryTokenStorage;
    use crate::token::{make_test_jwt, CredentialSet};

    fn client_with(
        storage: Arc<MemoryTokenStorage>,
    ) -> (AuthClient, Arc<RecordingUserAgent>) {
        let agent = Arc::new(RecordingUserAgent::new());
        let client =
            AuthClient::with_user_agent(AuthConfig::default(), storage, agent.clone());
        (client, agent)
    }

    fn stored_credentials() -> CredentialSet {
        CredentialSet {
            access_token: "access-1".into(),
            id_token: make_test_jwt(serde_json::json!({ "email": "a@b.com", "name": "Ada" })),
            refresh_token: "refresh-1".into(),
        }
    }

    #[tokio::test]
    async fn test_start_login_navigates_to_authorize_url() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let (client, agent) = client_with(storage.clone());

        client.start_login().await.unwrap();

        let visited = agent.visited();
        assert_eq!(visited.len(), 1);
        assert!(visited[0].starts_with(&client.config().authorize_url));

        let pending = storage.load_login_state().await.unwrap().unwrap();
        assert!(visited[0].contains(&format!("state={pending}")));
    }

    #[tokio::test]
    async fn test_logout_clears_and_navigates() {
        let storage = Arc::new(MemoryTokenStorage::with_credentials(stored_credentials()));
        let (client, agent) = client_with(storage.clone());
        client.initialize(None).await.unwrap();

        client.logout().await.unwrap();

        assert!(storage.load().await.unwrap().is_none());
        assert_eq!(client.session(), SessionState::Unauthenticated);

        let visited = agent.visited();
        assert_eq!(visited.len(), 1);
        assert!(visited[0].starts_with(&client.config().end_session_url));
        assert!(visited[0].contains("id_token_hint="));
    }

    #[tokio::test]
    async fn test_second_logout_fails_without_navigation() {
        let storage = Arc::new(MemoryTokenStorage::with_credentials(stored_credentials()));
        let (client, agent) = client_with(storage);

        client.logout().await.unwrap();
        let err = client.logout().await.unwrap_err();

        assert!(matches!(err, Error::Auth(AuthError::MissingIdentity)));
        // Only the first logout navigated.
        assert_eq!(agent.visited().len(), 1);
    }

    #[tokio::test]
    async fn test_logout_without_credentials() {
        let storage = Arc::new(MemoryTokenStorage::new());
        let (client, agent) = client_with(storage);

        let err = client.logout().await.unwrap_err();
        assert!(matches!(err, Error::Auth(AuthError::MissingIdentity)));
        assert!(agent.visited().is_empty());
    }
}
