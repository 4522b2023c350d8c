//! Authorization flow: login initiation, code exchange, and token refresh.
//!
//! [`AuthFlow`] owns every conversation with the identity provider's endpoints.
//! It never navigates the user agent and never decides what happens after a
//! failure - it reports outcomes and leaves the response to the session guard
//! and the client facade.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, Error, Result};
use crate::storage::TokenStorage;
use crate::token::{mask_token, parse_id_token, CredentialSet, UserProfile};

/// Generate a random state parameter for CSRF protection.
///
/// 16 random bytes, base64url-encoded (22 characters). Stored as the pending
/// login state and compared against the `state` query parameter when the
/// provider redirects back.
#[must_use]
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Token response from the provider's token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    id_token: Option<String>,
    refresh_token: Option<String>,
}

/// Error response from the token endpoint (standard OAuth format).
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// Conversations with the identity provider: authorization URL construction,
/// authorization-code exchange, and refresh-token exchange.
pub struct AuthFlow {
    config: Arc<AuthConfig>,
    storage: Arc<dyn TokenStorage>,
    http: reqwest::Client,
}

impl AuthFlow {
    /// Create a flow over the given configuration and storage.
    pub fn new(config: Arc<AuthConfig>, storage: Arc<dyn TokenStorage>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            config,
            storage,
            http,
        }
    }

    /// Build the provider's authorization URL for the given state parameter.
    pub fn authorize_url(&self, state: &str) -> String {
        let scopes = self.config.scopes.join(" ");
        format!(
            "{}?client_id={}&redirect_uri={}&response_type=code&scope={}&state={}",
            self.config.authorize_url,
            urlencoding::encode(&self.config.client_id),
            urlencoding::encode(&self.config.redirect_uri),
            urlencoding::encode(&scopes),
            urlencoding::encode(state),
        )
    }

    /// Begin a login attempt: mint a state nonce, persist it as the pending
    /// login state, and return the authorization URL to navigate to.
    ///
    /// Any previous pending state is replaced - at most one login attempt is
    /// pending at a time.
    #[instrument(skip(self))]
    pub async fn begin_login(&self) -> Result<String> {
        let state = generate_state();
        self.storage.save_login_state(&state).await?;
        info!(storage = self.storage.name(), "login started");
        Ok(self.authorize_url(&state))
    }

    /// Exchange an authorization code for a credential set.
    ///
    /// On success the new set is stored atomically and the user identity is
    /// parsed from the ID token. On any failure nothing is stored.
    #[instrument(skip(self, code))]
    pub async fn exchange_code(&self, code: &str) -> Result<(CredentialSet, UserProfile)> {
        debug!("exchanging authorization code");

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await?;

        let tokens = Self::parse_token_response(response).await?;
        let id_token = tokens
            .id_token
            .ok_or_else(|| AuthError::TokenExchange("missing id_token".into()))?;
        let refresh_token = tokens
            .refresh_token
            .ok_or_else(|| AuthError::TokenExchange("missing refresh_token".into()))?;

        let claims = parse_id_token(&id_token)?;
        let user = UserProfile::from(&claims);

        let credentials = CredentialSet {
            access_token: tokens.access_token,
            id_token,
            refresh_token,
        };
        self.storage.save(&credentials).await?;

        info!(
            email = %user.email,
            access_token = %mask_token(&credentials.access_token),
            "authorization code exchanged"
        );
        Ok((credentials, user))
    }

    /// Exchange the stored refresh token for a fresh credential set.
    ///
    /// On success the stored set is replaced atomically; the provider may
    /// rotate the refresh token, and the old one must be considered spent the
    /// moment this returns. On failure nothing is stored and the decision to
    /// clear credentials stays with the caller.
    #[instrument(skip(self))]
    pub async fn refresh(&self) -> Result<CredentialSet> {
        let current = self
            .storage
            .load()
            .await?
            .ok_or(AuthError::NotAuthenticated)?;

        debug!(
            refresh_token = %mask_token(&current.refresh_token),
            "refreshing access token"
        );

        let response = self
            .http
            .post(&self.config.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", current.refresh_token.as_str()),
                ("client_id", self.config.client_id.as_str()),
            ])
            .send()
            .await?;

        let tokens = Self::parse_token_response(response).await?;

        let credentials = CredentialSet {
            access_token: tokens.access_token,
            // The provider may omit these on refresh; the previous values stay valid.
            id_token: tokens.id_token.unwrap_or(current.id_token),
            refresh_token: tokens.refresh_token.unwrap_or(current.refresh_token),
        };
        self.storage.save(&credentials).await?;

        info!(
            access_token = %mask_token(&credentials.access_token),
            "access token refreshed"
        );
        Ok(credentials)
    }

    /// Build the provider's end-session URL for the given ID token hint.
    pub fn end_session_url(&self, id_token: &str) -> String {
        format!(
            "{}?id_token_hint={}&post_logout_redirect_uri={}",
            self.config.end_session_url,
            urlencoding::encode(id_token),
            urlencoding::encode(&self.config.post_logout_redirect_uri),
        )
    }

    /// Parse a token-endpoint response, classifying OAuth error bodies.
    async fn parse_token_response(response: reqwest::Response) -> Result<TokenResponse> {
        let status = response.status();

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED {
            let body = response.text().await.unwrap_or_default();
            warn!(%status, "token endpoint rejected the grant");
            return Err(Self::classify_grant_error(&body).into());
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AuthError::TokenExchange(format!("status {status}: {body}")).into());
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::from(AuthError::TokenExchange(format!("invalid response: {e}"))))
    }

    /// Classify a 400/401 token-endpoint error body.
    ///
    /// A rejected code or refresh token is terminal for the stored grant; only
    /// a well-formed non-grant error stays a plain exchange failure.
    fn classify_grant_error(body: &str) -> AuthError {
        match serde_json::from_str::<TokenErrorResponse>(body) {
            Ok(err) if err.error == "invalid_grant" || err.error == "invalid_token" => {
                AuthError::InvalidGrant
            }
            Ok(err) => AuthError::TokenExchange(
                err.error_description.unwrap_or(err.error),
            ),
            // No parseable body: the endpoint refused the credentials outright.
            Err(_) => AuthError::InvalidGrant,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryTokenStorage;

    fn flow_with(config: AuthConfig) -> (AuthFlow, Arc<MemoryTokenStorage>) {
        let storage = Arc::new(MemoryTokenStorage::new());
        let flow = AuthFlow::new(Arc::new(config), storage.clone());
        (flow, storage)
    }

    #[test]
    fn test_generate_state_shape() {
        let state = generate_state();
        assert_eq!(state.len(), 22);
        assert!(state
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }

    #[test]
    fn test_generate_state_unique() {
        assert_ne!(generate_state(), generate_state());
    }

    #[test]
    fn test_authorize_url_parameters() {
        let (flow, _) = flow_with(AuthConfig::default());
        let url = flow.authorize_url("my-state");

        assert!(url.starts_with(&AuthConfig::default().authorize_url));
        assert!(url.contains("response_type=code"));
        assert!(url.contains("client_id=fhirsearch-front"));
        assert!(url.contains("state=my-state"));
        assert!(url.contains("scope=openid%20profile%20email"));
    }

    #[tokio::test]
    async fn test_begin_login_persists_state() {
        let (flow, storage) = flow_with(AuthConfig::default());
        let url = flow.begin_login().await.unwrap();

        let pending = storage.load_login_state().await.unwrap().unwrap();
        assert!(url.contains(&format!("state={pending}")));
    }

    #[tokio::test]
    async fn test_begin_login_replaces_previous_state() {
        let (flow, storage) = flow_with(AuthConfig::default());
        flow.begin_login().await.unwrap();
        let first = storage.load_login_state().await.unwrap().unwrap();

        flow.begin_login().await.unwrap();
        let second = storage.load_login_state().await.unwrap().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_end_session_url() {
        let (flow, _) = flow_with(AuthConfig::default());
        let url = flow.end_session_url("some.id.token");

        assert!(url.contains("id_token_hint=some.id.token"));
        assert!(url.contains("post_logout_redirect_uri="));
    }

    #[test]
    fn test_classify_grant_error() {
        let err = AuthFlow::classify_grant_error(r#"{"error":"invalid_grant"}"#);
        assert!(matches!(err, AuthError::InvalidGrant));

        let err = AuthFlow::classify_grant_error("no json here");
        assert!(matches!(err, AuthError::InvalidGrant));

        let err = AuthFlow::classify_grant_error(
            r#"{"error":"temporarily_unavailable","error_description":"try later"}"#,
        );
        assert!(matches!(err, AuthError::TokenExchange(msg) if msg == "try later"));
    }

    #[tokio::test]
    async fn test_refresh_without_credentials() {
        let (flow, _) = flow_with(AuthConfig::default());
        let err = flow.refresh().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Auth(AuthError::NotAuthenticated)
        ));
    }
}
