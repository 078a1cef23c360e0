//! The `null` driver: every request is let through.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;
use rootcause::Report;

use super::{AuthDriver, AuthDriverKind};
use crate::error::ServerError;
use crate::router::{RouteError, RouteTree};

/// Disables authentication entirely.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullAuth;

impl NullAuth {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl AuthDriver for NullAuth {
    fn kind(&self) -> AuthDriverKind {
        AuthDriverKind::Null
    }

    async fn init(&mut self) -> Result<(), Report<ServerError>> {
        tracing::warn!("auth driver 'null' selected: uploads and the private API are unprotected");
        Ok(())
    }

    fn init_routes(&self, _routes: &mut RouteTree) -> Result<(), Report<RouteError>> {
        Ok(())
    }

    async fn authenticate_request(&self, request: Request, next: Next) -> Response {
        next.run(request).await
    }
}
