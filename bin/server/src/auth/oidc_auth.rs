//! The `oidc` driver: delegated login through an OpenID Connect provider.
//!
//! Unauthenticated requests are redirected to the provider. The CSRF state,
//! PKCE verifier, nonce and return target ride along in the encrypted
//! `imagik_auth_state` cookie until the provider sends the browser back to the
//! callback route.

use axum::extract::{Query, Request, State};
use axum::http::uri::PathAndQuery;
use axum::http::{HeaderMap, Method};
use axum::response::{IntoResponse, Redirect, Response};
use axum::middleware::Next;
use imagik_access::{AuthMethod, AuthenticationError, OidcConfig};
use rootcause::Report;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use std::time::Duration;
use time::Duration as TimeDuration;

use super::oidc::{AuthState, IdentityProvider, OidcClient, OidcError};
use super::{AuthDriver, AuthDriverKind, AuthRejection, LOGOUT_PATH, logout};
use crate::error::ServerError;
use crate::router::{Binding, RouteError, RouteTree, TrustZone};
use crate::session::SessionStore;

/// Starts a login explicitly.
pub const LOGIN_PATH: &str = "/api/pub/auth/oidc/login";

/// Where the provider sends the browser back to.
pub const CALLBACK_PATH: &str = "/api/pub/auth/oidc/callback";

/// Auth state cookie name (for CSRF protection during OIDC flow).
pub const AUTH_STATE_COOKIE: &str = "imagik_auth_state";

/// Where a login lands when no usable return target was given.
pub const DEFAULT_RETURN_TARGET: &str = "/ui/";

/// Everything the callback needs, stored in the auth state cookie.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginState {
    pub csrf_token: String,
    pub pkce_verifier: String,
    pub nonce: String,
    pub return_to: String,
}

impl LoginState {
    fn new(state: AuthState, return_to: String) -> Self {
        Self {
            csrf_token: state.csrf_token,
            pkce_verifier: state.pkce_verifier,
            nonce: state.nonce,
            return_to,
        }
    }

    fn auth_state(&self) -> AuthState {
        AuthState {
            csrf_token: self.csrf_token.clone(),
            pkce_verifier: self.pkce_verifier.clone(),
            nonce: self.nonce.clone(),
        }
    }
}

/// Keeps only same-origin absolute paths; anything else becomes `/ui/`.
///
/// Browsers drop tabs and newlines from URLs, so `/\t/host` would turn into
/// `//host`. Targets with control characters or whitespace are refused.
#[must_use]
pub fn sanitize_return_target(target: &str) -> String {
    let safe = target.starts_with('/')
        && !target.starts_with("//")
        && !target.contains('\\')
        && !target.chars().any(|c| c.is_control() || c.is_whitespace())
        && target.parse::<PathAndQuery>().is_ok();
    if safe {
        target.to_string()
    } else {
        DEFAULT_RETURN_TARGET.to_string()
    }
}

/// Delegates authentication to an OIDC provider.
#[derive(Clone)]
pub struct OidcAuth {
    config: OidcConfig,
    sessions: SessionStore,
    provider: Option<Arc<dyn IdentityProvider>>,
}

impl OidcAuth {
    /// Creates a driver that discovers its provider during `init`.
    #[must_use]
    pub fn new(config: OidcConfig, sessions: SessionStore) -> Self {
        Self {
            config,
            sessions,
            provider: None,
        }
    }

    /// Uses `provider` instead of running discovery.
    #[must_use]
    pub fn with_provider(mut self, provider: Arc<dyn IdentityProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_seconds())
    }

    /// Redirects to the provider, remembering where to come back to.
    pub fn begin_login(&self, return_to: &str) -> Response {
        let Some(provider) = &self.provider else {
            tracing::error!("OIDC login attempted before the provider was initialized");
            return AuthRejection::InternalError.into_response();
        };
        let (url, state) = provider.authorization_url();
        let state = LoginState::new(state, sanitize_return_target(return_to));
        let value = match serde_json::to_string(&state) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize login state");
                return AuthRejection::InternalError.into_response();
            }
        };
        tracing::debug!(return_to = %state.return_to, "redirecting to identity provider");
        let cookie = self
            .sessions
            .cookie(AUTH_STATE_COOKIE, value, TimeDuration::minutes(10));
        self.sessions
            .write(Redirect::to(&url).into_response(), cookie)
    }

    /// Validates the callback and establishes a session.
    ///
    /// # Errors
    ///
    /// Returns the reason the login was refused. No session is issued.
    pub async fn complete_login(
        &self,
        headers: &HeaderMap,
        query: CallbackQuery,
    ) -> Result<Response, AuthenticationError> {
        let provider = self
            .provider
            .as_ref()
            .ok_or_else(|| AuthenticationError::ProviderError {
                provider: self.config.issuer_url().to_string(),
                reason: "provider not initialized".to_string(),
            })?;

        let state: LoginState = self
            .sessions
            .read(headers, AUTH_STATE_COOKIE)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .ok_or(AuthenticationError::MissingLoginState)?;

        let returned = query.state.unwrap_or_default();
        if !bool::from(returned.as_bytes().ct_eq(state.csrf_token.as_bytes())) {
            return Err(AuthenticationError::StateMismatch);
        }

        if let Some(error) = query.error {
            return Err(AuthenticationError::ProviderError {
                provider: provider.issuer().to_string(),
                reason: error,
            });
        }
        let code = query
            .code
            .ok_or_else(|| AuthenticationError::ProviderError {
                provider: provider.issuer().to_string(),
                reason: "callback carried no code".to_string(),
            })?;

        let auth_state = state.auth_state();
        let exchange = provider.exchange_code(&code, &auth_state);
        let claims = match tokio::time::timeout(self.timeout(), exchange).await {
            Ok(Ok(claims)) => claims,
            Ok(Err(e)) => {
                return Err(AuthenticationError::ProviderError {
                    provider: provider.issuer().to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                return Err(AuthenticationError::ProviderTimeout {
                    provider: provider.issuer().to_string(),
                    after_secs: self.config.timeout_seconds(),
                });
            }
        };

        tracing::info!(
            subject = %claims.subject,
            email = ?claims.email,
            "OIDC login succeeded"
        );
        let session = self.sessions.establish(claims.subject, AuthMethod::Oidc);
        let response = Redirect::to(&sanitize_return_target(&state.return_to)).into_response();
        let response = self.sessions.save(response, &session);
        Ok(self
            .sessions
            .write(response, self.sessions.removal(AUTH_STATE_COOKIE)))
    }
}

#[async_trait::async_trait]
impl AuthDriver for OidcAuth {
    fn kind(&self) -> AuthDriverKind {
        AuthDriverKind::Oidc
    }

    async fn init(&mut self) -> Result<(), Report<ServerError>> {
        let init_error = |details: String| ServerError::AuthInit {
            driver: AuthDriverKind::Oidc.to_string(),
            details,
        };
        self.config.validate().map_err(init_error)?;

        if self.provider.is_none() {
            tracing::info!(issuer = %self.config.issuer_url(), "discovering OIDC provider");
            let timed_out = OidcError::Timeout(self.config.timeout_seconds()).to_string();
            let discovery = OidcClient::discover(self.config.clone());
            let client = tokio::time::timeout(self.timeout(), discovery)
                .await
                .map_err(|_| init_error(timed_out))?
                .map_err(|e| init_error(e.to_string()))?;
            self.provider = Some(Arc::new(client));
        }
        tracing::info!(issuer = %self.config.issuer_url(), "OIDC auth initialized");
        Ok(())
    }

    fn init_routes(&self, routes: &mut RouteTree) -> Result<(), Report<RouteError>> {
        routes.register([
            Binding::with_state(TrustZone::Public, Method::GET, LOGIN_PATH, login, self.clone()),
            Binding::with_state(
                TrustZone::Public,
                Method::GET,
                CALLBACK_PATH,
                callback,
                self.clone(),
            ),
            Binding::with_state(
                TrustZone::Public,
                Method::GET,
                LOGOUT_PATH,
                logout,
                self.sessions.clone(),
            ),
        ])
    }

    async fn authenticate_request(&self, mut request: Request, next: Next) -> Response {
        if let Some(session) = self.sessions.get(request.headers()) {
            request.extensions_mut().insert(session);
            return next.run(request).await;
        }
        let target = request
            .uri()
            .path_and_query()
            .map_or_else(|| request.uri().path().to_string(), ToString::to_string);
        self.begin_login(&target)
    }
}

/// Query parameters for the login route.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    next: Option<String>,
}

/// Query parameters for the OIDC callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackQuery {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Initiates the OIDC login flow by redirecting to the identity provider.
pub async fn login(State(auth): State<OidcAuth>, Query(query): Query<LoginQuery>) -> Response {
    auth.begin_login(query.next.as_deref().unwrap_or(DEFAULT_RETURN_TARGET))
}

/// Handles the OIDC callback after the user authenticates with the identity provider.
pub async fn callback(
    State(auth): State<OidcAuth>,
    headers: HeaderMap,
    Query(query): Query<CallbackQuery>,
) -> Response {
    match auth.complete_login(&headers, query).await {
        Ok(response) => response,
        Err(e) => {
            tracing::warn!(error = %e, "OIDC callback rejected");
            AuthRejection::from(&e).into_response()
        }
    }
}
