use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// OAuth2 and protected-API configuration.
///
/// Endpoints default to the staging identity provider; deployments override
/// them via `~/.config/fhirsearch/auth.toml` or the `with_*` setters (tests
/// point the token endpoint at a mock server this way).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Authorization endpoint (browser redirect target for login).
    pub authorize_url: String,
    /// Token endpoint (code exchange and refresh).
    pub token_url: String,
    /// End-session endpoint (provider-side logout).
    pub end_session_url: String,
    /// OAuth2 client identifier.
    pub client_id: String,
    /// Callback URL the provider redirects back to with `code` and `state`.
    pub redirect_uri: String,
    /// Where the provider sends the user agent after ending the session.
    pub post_logout_redirect_uri: String,
    /// Base URL of the protected API. Only requests under this prefix get a
    /// bearer header.
    pub api_base_url: String,
    /// Scopes requested during authorization.
    pub scopes: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            authorize_url: "https://auth.fhirsearch.dev/oauth2/authorize".to_string(),
            token_url: "https://auth.fhirsearch.dev/oauth2/token".to_string(),
            end_session_url: "https://auth.fhirsearch.dev/oauth2/logout".to_string(),
            client_id: "fhirsearch-front".to_string(),
            redirect_uri: "https://app.fhirsearch.dev/callback".to_string(),
            post_logout_redirect_uri: "https://app.fhirsearch.dev/login".to_string(),
            api_base_url: "https://api.fhirsearch.dev".to_string(),
            scopes: vec!["openid".to_string(), "profile".to_string(), "email".to_string()],
        }
    }
}

impl AuthConfig {
    /// Load configuration from `~/.config/fhirsearch/auth.toml`.
    /// Returns `Default` if the file is missing or unparseable.
    pub fn load() -> Self {
        let config_path = Self::config_path();
        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!("Loaded auth config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!(
                        "Failed to parse auth config at {}: {e} — using defaults",
                        config_path.display()
                    );
                    Self::default()
                }
            },
            Err(_) => {
                tracing::debug!(
                    "No auth config at {} — using defaults",
                    config_path.display()
                );
                Self::default()
            }
        }
    }

    /// Sets a custom token endpoint.
    #[must_use]
    pub fn with_token_url(mut self, url: impl Into<String>) -> Self {
        self.token_url = url.into();
        self
    }

    /// Sets a custom authorization endpoint.
    #[must_use]
    pub fn with_authorize_url(mut self, url: impl Into<String>) -> Self {
        self.authorize_url = url.into();
        self
    }

    /// Sets a custom end-session endpoint.
    #[must_use]
    pub fn with_end_session_url(mut self, url: impl Into<String>) -> Self {
        self.end_session_url = url.into();
        self
    }

    /// Sets the protected API base URL.
    #[must_use]
    pub fn with_api_base_url(mut self, url: impl Into<String>) -> Self {
        self.api_base_url = url.into();
        self
    }

    /// Sets the OAuth2 client identifier.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("fhirsearch").join("auth.toml"))
            .unwrap_or_else(|| PathBuf::from("auth.toml"))
    }
}
