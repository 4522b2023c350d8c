//! OAuth2 credential lifecycle manager for the FHIR search client.
//!
//! This crate acquires, stores, refreshes, and revokes tokens issued by the
//! identity provider, and transparently attaches valid credentials to calls
//! against the protected API. The view layer stays out of it: it reads the
//! session signal, calls [`AuthClient::start_login`] / [`AuthClient::logout`],
//! and sends protected requests through [`AuthClient::send`], unaware of the
//! refresh-and-retry machinery underneath.
//!
//! # Components
//!
//! - [`storage`] - durable credential persistence (atomic, reload-safe)
//! - [`flow`] - authorization URL construction, code exchange, token refresh
//! - [`http`] - the request interceptor pipeline with single-flight refresh
//! - [`session`] - the state machine gating protected views
//! - [`client`] - the facade tying it together, including logout

pub mod agent;
pub mod client;
pub mod config;
pub mod error;
pub mod flow;
pub mod http;
pub mod session;
pub mod storage;
pub mod token;

pub use agent::{SystemBrowser, UserAgent};
pub use client::AuthClient;
pub use config::AuthConfig;
pub use error::{AuthError, Error, Result};
pub use http::ApiClient;
pub use session::{CallbackParams, SessionState};
pub use storage::{FileTokenStorage, MemoryTokenStorage, TokenStorage};
pub use token::{CredentialSet, IdTokenClaims, UserProfile};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
