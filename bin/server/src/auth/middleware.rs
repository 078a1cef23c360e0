//! Authentication middleware and rejections for Axum.

use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use imagik_access::AuthenticationError;
use std::sync::Arc;

use super::AuthDriver;

/// Challenge sent with Basic-auth 401s.
pub const BASIC_CHALLENGE: &str = "Basic realm=\"imagik\"";

/// Middleware for `from_fn_with_state`: hands the request to the driver.
pub async fn enforce(
    State(driver): State<Arc<dyn AuthDriver>>,
    request: Request,
    next: Next,
) -> Response {
    driver.authenticate_request(request, next).await
}

/// Rejection responses produced by the drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthRejection {
    /// 401 asking the client for Basic credentials.
    BasicChallenge,
    /// 401 without a challenge (form login, failed OIDC exchange).
    Unauthorized,
    /// 400 for a missing or mismatched login state.
    BadLoginState,
    InternalError,
}

impl From<&AuthenticationError> for AuthRejection {
    fn from(err: &AuthenticationError) -> Self {
        match err {
            AuthenticationError::MissingCredentials
            | AuthenticationError::InvalidCredentials { .. }
            | AuthenticationError::MalformedCredentials { .. } => Self::BasicChallenge,
            AuthenticationError::MissingLoginState | AuthenticationError::StateMismatch => {
                Self::BadLoginState
            }
            AuthenticationError::ProviderError { .. }
            | AuthenticationError::ProviderTimeout { .. } => Self::Unauthorized,
        }
    }
}

impl IntoResponse for AuthRejection {
    fn into_response(self) -> Response {
        match self {
            Self::BasicChallenge => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, BASIC_CHALLENGE)],
                "Unauthorized",
            )
                .into_response(),
            Self::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "Authentication failed").into_response()
            }
            Self::BadLoginState => (StatusCode::BAD_REQUEST, "Invalid login state").into_response(),
            Self::InternalError => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_challenge_sets_header() {
        let response = AuthRejection::BasicChallenge.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            BASIC_CHALLENGE
        );
    }

    #[test]
    fn errors_map_to_rejections() {
        assert_eq!(
            AuthRejection::from(&AuthenticationError::StateMismatch),
            AuthRejection::BadLoginState
        );
        assert_eq!(
            AuthRejection::from(&AuthenticationError::ProviderTimeout {
                provider: "https://auth.example.com".to_string(),
                after_secs: 10,
            }),
            AuthRejection::Unauthorized
        );
        assert_eq!(
            AuthRejection::from(&AuthenticationError::MissingCredentials),
            AuthRejection::BasicChallenge
        );
    }
}
