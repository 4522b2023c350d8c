//! Request interceptor pipeline for the protected API.
//!
//! Every outbound call under the protected API's base URL gets a bearer
//! header from the stored credentials. A 401 triggers one refresh-and-retry
//! per logical request; concurrent 401s funnel through a single in-flight
//! refresh so a rotating refresh token is never spent twice.
//!
//! Per-request state machine:
//!
//! ```text
//! BUILD -> SEND -> (non-401: DONE)
//!               -> (401, not yet retried, target != token endpoint):
//!                      REFRESH -> (ok: SEND once more, retried)
//!                              -> (invalid grant: logout, propagate 401)
//!               -> (401, already retried): propagate 401
//!               -> (401 from the token endpoint itself): logout, propagate 401
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use reqwest::header::{HeaderValue, AUTHORIZATION};
use reqwest::{Method, Request, RequestBuilder, Response};
use tokio::sync::Mutex;
use tracing::{debug, instrument, warn};

use crate::config::AuthConfig;
use crate::error::{AuthError, Error, Result};
use crate::flow::AuthFlow;
use crate::session::SessionGuard;
use crate::storage::TokenStorage;
use crate::token::mask_token;

/// Per-logical-request retry state, passed by value through the retry path.
#[derive(Debug, Clone, Copy, Default)]
struct RequestContext {
    /// A logical request is refreshed-and-retried at most once.
    already_retried: bool,
}

/// HTTP client for the protected API with credential interception.
#[derive(Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    config: Arc<AuthConfig>,
    storage: Arc<dyn TokenStorage>,
    flow: Arc<AuthFlow>,
    guard: Arc<SessionGuard>,
    /// Count of completed refreshes. A request records the generation its
    /// bearer token came from; only the first 401 still on that generation
    /// performs the network refresh.
    refresh_generation: Arc<AtomicU64>,
    /// Serializes refresh exchanges. Concurrent 401s block here and re-read
    /// the rotated credentials instead of refreshing again.
    refresh_lock: Arc<Mutex<()>>,
}

impl ApiClient {
    /// Create a client over the shared auth components.
    pub fn new(
        config: Arc<AuthConfig>,
        storage: Arc<dyn TokenStorage>,
        flow: Arc<AuthFlow>,
        guard: Arc<SessionGuard>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            config,
            storage,
            flow,
            guard,
            refresh_generation: Arc::new(AtomicU64::new(0)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Start building a request on the underlying HTTP client.
    ///
    /// Pass the builder to [`ApiClient::send`] to run it through the
    /// interceptor pipeline.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http.request(method, url)
    }

    /// GET a URL through the pipeline.
    pub async fn get(&self, url: &str) -> Result<Response> {
        self.send(self.request(Method::GET, url)).await
    }

    /// Send a request through the interceptor pipeline.
    #[instrument(skip(self, builder))]
    pub async fn send(&self, builder: RequestBuilder) -> Result<Response> {
        let request = builder.build().map_err(Error::Network)?;
        self.dispatch(request, RequestContext::default()).await
    }

    async fn dispatch(&self, request: Request, ctx: RequestContext) -> Result<Response> {
        let mut request = request;
        let mut ctx = ctx;

        loop {
            // Kept for the one retry; a non-cloneable (streaming) body simply
            // cannot be retried and propagates its 401.
            let retry_clone = request.try_clone();
            let url = request.url().to_string();
            let observed = self.refresh_generation.load(Ordering::Acquire);

            let request_to_send = self.authorize(request).await?;
            let response = self.http.execute(request_to_send).await?;

            if response.status() != reqwest::StatusCode::UNAUTHORIZED {
                return Ok(response);
            }

            // A 401 from the token endpoint means the refresh token itself is
            // dead. Refreshing in response would loop.
            if self.is_token_endpoint(&url) {
                warn!(%url, "token endpoint returned 401 - ending session");
                self.terminal_logout().await;
                return Err(Error::api(401, "refresh token rejected by token endpoint"));
            }

            // 401 from somewhere we never attached credentials to is not ours
            // to recover.
            if !self.is_protected(&url) {
                return Ok(response);
            }

            if ctx.already_retried {
                debug!(%url, "second 401 after refresh - giving up");
                return Err(Error::api(401, "unauthorized after token refresh"));
            }

            let Some(retry_request) = retry_clone else {
                return Err(Error::api(401, "unauthorized (request body not retryable)"));
            };

            match self.refresh_once(observed).await {
                Ok(()) => {
                    ctx.already_retried = true;
                    request = retry_request;
                }
                Err(e @ Error::Auth(AuthError::InvalidGrant | AuthError::NotAuthenticated)) => {
                    warn!(%url, "token refresh failed terminally: {e}");
                    self.terminal_logout().await;
                    return Err(Error::api(401, "unauthorized and token refresh failed"));
                }
                // Transport or transient endpoint failure: surface it and keep
                // the stored credentials - they may still be good.
                Err(e) => return Err(e),
            }
        }
    }

    /// Attach the bearer header when the target is the protected API.
    ///
    /// Identity-provider endpoints are exempt: they carry credentials as form
    /// parameters instead.
    async fn authorize(&self, mut request: Request) -> Result<Request> {
        let url = request.url().as_str().to_string();
        if !self.is_protected(&url) {
            return Ok(request);
        }

        if let Some(credentials) = self.storage.load().await? {
            let value = HeaderValue::from_str(&format!("Bearer {}", credentials.access_token))
                .map_err(|e| Error::config(format!("invalid bearer header: {e}")))?;
            request.headers_mut().insert(AUTHORIZATION, value);
            debug!(
                %url,
                access_token = %mask_token(&credentials.access_token),
                "bearer header attached"
            );
        }
        Ok(request)
    }

    /// Refresh at most once per credential generation.
    ///
    /// Callers pass the generation their failed token came from. The lock
    /// serializes refreshes; whoever acquires it first on a stale generation
    /// does the exchange, and everyone queued behind it finds the generation
    /// already advanced and just re-reads storage.
    async fn refresh_once(&self, observed_generation: u64) -> Result<()> {
        let _guard = self.refresh_lock.lock().await;
        if self.refresh_generation.load(Ordering::Acquire) != observed_generation {
            debug!("credentials already refreshed by a concurrent request");
            return Ok(());
        }
        self.flow.refresh().await?;
        self.refresh_generation.fetch_add(1, Ordering::Release);
        Ok(())
    }

    /// Clear credentials and drop the session. Navigation stays with the view
    /// layer; this only signals.
    async fn terminal_logout(&self) {
        if let Err(e) = self.storage.clear().await {
            warn!("failed to clear credentials after terminal failure: {e}");
        }
        self.guard.invalidate();
    }

    fn is_protected(&self, url: &str) -> bool {
        url.starts_with(&self.config.api_base_url) && !self.is_token_endpoint(url)
    }

    fn is_token_endpoint(&self, url: &str) -> bool {
        url.starts_with(&self.config.token_url)
    }
}
