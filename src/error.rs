//! Error types for fhirsearch-auth.

/// Result type alias using [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing credentials or calling the protected API.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Authentication-related errors.
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    /// Errors returned by the protected API (including 401 Unauthorized).
    #[error("API error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message from the API.
        message: String,
    },

    /// Network/HTTP errors.
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential storage errors.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a storage error.
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create an API error.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Error::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if this is an authentication error (including a 401 from the API).
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Auth(_) | Error::Api { status: 401, .. })
    }

    /// Get the HTTP status code if this is an API error.
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Api { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Authentication-specific errors.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// No valid credentials are stored.
    #[error("Not authenticated - please log in")]
    NotAuthenticated,

    /// The token endpoint rejected the authorization code or refresh token.
    #[error("Invalid grant - code or refresh token rejected")]
    InvalidGrant,

    /// Callback state does not match the stored login state (potential CSRF).
    #[error("Login state mismatch - possible CSRF attack")]
    StateMismatch,

    /// Logout requires a stored ID token for the end-session hint.
    #[error("No ID token available - cannot end the provider session")]
    MissingIdentity,

    /// The ID token could not be parsed.
    #[error("Invalid ID token: {0}")]
    InvalidToken(String),

    /// Token exchange failed for a reason other than an invalid grant.
    #[error("Token exchange failed: {0}")]
    TokenExchange(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing token endpoint");
        assert_eq!(err.to_string(), "Configuration error: missing token endpoint");

        let err = Error::api(401, "expired token");
        assert!(err.to_string().contains("401"));
        assert!(err.is_auth_error());
        assert_eq!(err.status(), Some(401));
    }

    #[test]
    fn test_auth_error() {
        let err = Error::Auth(AuthError::NotAuthenticated);
        assert!(err.is_auth_error());
        assert_eq!(err.status(), None);

        let err = Error::api(500, "server error");
        assert!(!err.is_auth_error());
    }
}
