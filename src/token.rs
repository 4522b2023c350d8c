//! Credential types and ID-token parsing.
//!
//! The ID token is decoded locally (base64url payload + JSON); its signature is
//! not verified. The token arrives over TLS directly from the identity provider,
//! which is the trust boundary this client relies on.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AuthError, Result};

/// Complete token set returned by the identity provider.
///
/// Stored and replaced as one atomic unit: a reader never observes a mix of
/// old and new fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Access token presented to the protected API.
    pub access_token: String,

    /// ID token carrying the authenticated user's identity claims.
    pub id_token: String,

    /// Refresh token for minting a new token set. Single-use: the provider
    /// rotates it on every refresh.
    pub refresh_token: String,
}

/// Identity claims parsed from the ID token payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdTokenClaims {
    /// User's email address.
    #[serde(default)]
    pub email: Option<String>,

    /// User's display name.
    #[serde(default)]
    pub name: Option<String>,

    /// Expiry as a unix timestamp (seconds).
    #[serde(default)]
    pub exp: Option<i64>,
}

impl IdTokenClaims {
    /// Expiry as a UTC timestamp, if the claim is present.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.exp.and_then(|ts| Utc.timestamp_opt(ts, 0).single())
    }

    /// Whether the token's expiry claim is in the past.
    pub fn is_expired(&self) -> bool {
        self.expires_at().is_some_and(|at| at <= Utc::now())
    }
}

/// Authenticated user identity, as exposed to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// User's display name.
    pub name: String,

    /// User's email address.
    pub email: String,
}

impl From<&IdTokenClaims> for UserProfile {
    fn from(claims: &IdTokenClaims) -> Self {
        Self {
            name: claims.name.clone().unwrap_or_default(),
            email: claims.email.clone().unwrap_or_default(),
        }
    }
}

/// Parse an ID token JWT and extract its claims.
///
/// This is a local signature-format parse only; the signature itself is not
/// cryptographically verified.
///
/// # Errors
///
/// Returns [`AuthError::InvalidToken`] if the token is not a three-part JWT or
/// its payload is not valid base64url-encoded JSON.
pub fn parse_id_token(jwt: &str) -> Result<IdTokenClaims> {
    let parts: Vec<&str> = jwt.split('.').collect();
    if parts.len() != 3 {
        return Err(AuthError::InvalidToken("JWT must have 3 parts".into()).into());
    }

    let payload_bytes = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| AuthError::InvalidToken(format!("base64 decode failed: {e}")))?;

    let claims: IdTokenClaims = serde_json::from_slice(&payload_bytes)
        .map_err(|e| AuthError::InvalidToken(format!("JSON parse failed: {e}")))?;

    Ok(claims)
}

/// Mask a token for logging, keeping only a short prefix.
///
/// Tokens are opaque provider strings, so truncation counts characters, not
/// bytes: slicing at a fixed byte offset would panic mid-codepoint.
pub(crate) fn mask_token(token: &str) -> String {
    let mut chars = token.char_indices();
    match chars.nth(8) {
        Some((boundary, _)) => format!("{}***", &token[..boundary]),
        None => "***".to_string(),
    }
}

/// Build an unsigned JWT from a claims object, for tests.
#[cfg(test)]
pub(crate) fn make_test_jwt(claims: serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(b"{\"alg\":\"RS256\",\"typ\":\"JWT\"}");
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap());
    let signature = URL_SAFE_NO_PAD.encode(b"sig");
    format!("{header}.{payload}.{signature}")
}
