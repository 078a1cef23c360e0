//! Pluggable authentication for the imagik server.
//!
//! This module provides:
//! - The `AuthDriver` contract every strategy implements
//! - Three drivers: `null` (no protection), `static` (pre-shared credentials)
//!   and `oidc` (delegated login)
//! - The middleware that wires the selected driver in front of the
//!   authenticated and privileged trust zones
//!
//! # Driver lifecycle
//!
//! The driver is chosen once from `auth_driver`. It is initialized, asked to
//! register its auxiliary routes in the public zone, and then shared behind an
//! `Arc` for the life of the process. Unknown driver names are fatal; there is
//! no fallback to a weaker driver.

pub mod middleware;
pub mod null;
pub mod oidc;
pub mod oidc_auth;
pub mod static_auth;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use rootcause::Report;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::router::{RouteError, RouteTree};
use crate::session::SessionStore;

pub use middleware::AuthRejection;
pub use null::NullAuth;
pub use oidc::{IdentityProvider, OidcClient, OidcError};
pub use oidc_auth::OidcAuth;
pub use static_auth::StaticAuth;

/// Logout route shared by every driver that issues sessions.
pub const LOGOUT_PATH: &str = "/api/pub/auth/logout";

/// The closed set of drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDriverKind {
    Null,
    Static,
    Oidc,
}

impl fmt::Display for AuthDriverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Static => write!(f, "static"),
            Self::Oidc => write!(f, "oidc"),
        }
    }
}

impl FromStr for AuthDriverKind {
    type Err = ServerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "null" => Ok(Self::Null),
            "static" => Ok(Self::Static),
            "oidc" => Ok(Self::Oidc),
            _ => Err(ServerError::UnknownAuthDriver {
                name: s.to_string(),
            }),
        }
    }
}

/// An authentication strategy.
#[async_trait::async_trait]
pub trait AuthDriver: Send + Sync {
    fn kind(&self) -> AuthDriverKind;

    /// One-time setup. Failure is fatal.
    async fn init(&mut self) -> Result<(), Report<ServerError>>;

    /// Registers auxiliary public routes, all or nothing. Calling it twice
    /// fails with `RouteError::Duplicate` and leaves `routes` unchanged.
    fn init_routes(&self, routes: &mut RouteTree) -> Result<(), Report<RouteError>>;

    /// Lets the request through with `next.run(request)` or answers it
    /// without calling `next`.
    async fn authenticate_request(&self, request: Request, next: Next) -> Response;
}

/// Builds the configured driver. The caller still has to run `init`.
///
/// `provider` replaces OIDC discovery when set.
///
/// # Errors
///
/// Returns `ServerError::Config` if the selected driver's section is missing.
pub fn from_config(
    kind: AuthDriverKind,
    config: &ServerConfig,
    sessions: SessionStore,
    provider: Option<Arc<dyn IdentityProvider>>,
) -> Result<Box<dyn AuthDriver>, Report<ServerError>> {
    let driver: Box<dyn AuthDriver> = match kind {
        AuthDriverKind::Null => Box::new(NullAuth::new()),
        AuthDriverKind::Static => Box::new(StaticAuth::new(
            config.static_auth.users.clone(),
            sessions,
        )),
        AuthDriverKind::Oidc => {
            let oidc = config.oidc.clone().ok_or_else(|| ServerError::Config {
                details: "auth_driver is 'oidc' but the oidc section is missing".to_string(),
            })?;
            let driver = OidcAuth::new(oidc, sessions);
            match provider {
                Some(provider) => Box::new(driver.with_provider(provider)),
                None => Box::new(driver),
            }
        }
    };
    Ok(driver)
}

/// Clears the session cookie and sends the browser home.
pub async fn logout(State(sessions): State<SessionStore>) -> Response {
    tracing::debug!("logging out");
    sessions.clear(Redirect::to("/").into_response())
}
