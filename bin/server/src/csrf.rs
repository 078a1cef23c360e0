//! Double-submit CSRF protection for the privileged API.
//!
//! The per-client secret lives in the signed `imagik_csrf` cookie. Unsafe
//! requests must echo it in `X-CSRF-Token`. Every response from a protected
//! route carries the current token so the UI can pick it up.

use axum::extract::{Request, State};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::SignedCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use rootcause::Report;
use subtle::ConstantTimeEq;

use crate::error::ServerError;
use crate::session::derive_key;

/// Cookie holding the CSRF secret.
pub const CSRF_COOKIE: &str = "imagik_csrf";

/// Header the token is read from and written to.
pub const CSRF_HEADER: &str = "x-csrf-token";

const TOKEN_BYTES: usize = 32;

/// Signs CSRF cookies and checks submitted tokens.
#[derive(Clone)]
pub struct CsrfGuard {
    key: Key,
    secure: bool,
}

impl CsrfGuard {
    #[must_use]
    pub fn new(key: Key, secure: bool) -> Self {
        Self { key, secure }
    }

    /// Builds a guard from the base64 `csrf_key` setting.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::InvalidKey` if the value is not standard base64
    /// or decodes to fewer than 32 bytes.
    pub fn from_base64(encoded: &str, secure: bool) -> Result<Self, Report<ServerError>> {
        let material =
            STANDARD
                .decode(encoded.trim())
                .map_err(|e| ServerError::InvalidKey {
                    name: "csrf_key".to_string(),
                    reason: format!("not valid base64: {e}"),
                })?;
        let key = derive_key("csrf_key", &material)?;
        Ok(Self::new(key, secure))
    }

    fn current(&self, request: &Request) -> Option<String> {
        SignedCookieJar::from_headers(request.headers(), self.key.clone())
            .get(CSRF_COOKIE)
            .map(|cookie| cookie.value().to_string())
            .filter(|token| !token.is_empty())
    }

    fn cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((CSRF_COOKIE, token))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Strict)
            .max_age(time::Duration::hours(12))
            .build()
    }
}

/// Generates a fresh token: 32 random bytes, base64url without padding.
///
/// # Errors
///
/// Fails only if the OS random source is unavailable.
pub fn mint_token() -> Result<String, getrandom::Error> {
    let mut bytes = [0u8; TOKEN_BYTES];
    getrandom::fill(&mut bytes)?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

fn with_token(mut response: Response, token: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(token) {
        response.headers_mut().insert(CSRF_HEADER, value);
    }
    response
}

/// Middleware for `from_fn_with_state`.
pub async fn protect(State(guard): State<CsrfGuard>, request: Request, next: Next) -> Response {
    let existing = guard.current(&request);
    let (token, fresh) = match existing {
        Some(token) => (token, false),
        None => match mint_token() {
            Ok(token) => (token, true),
            Err(e) => {
                tracing::error!(error = %e, "failed to generate CSRF token");
                return (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
                    .into_response();
            }
        },
    };

    let response = if is_safe(request.method()) || (!fresh && submitted_matches(&request, &token))
    {
        next.run(request).await
    } else {
        tracing::warn!(
            method = %request.method(),
            path = %request.uri().path(),
            "CSRF token missing or invalid"
        );
        (StatusCode::FORBIDDEN, "CSRF token missing or invalid").into_response()
    };

    let response = with_token(response, &token);
    if fresh {
        let jar = SignedCookieJar::new(guard.key.clone()).add(guard.cookie(token));
        (jar, response).into_response()
    } else {
        response
    }
}

fn submitted_matches(request: &Request, token: &str) -> bool {
    request
        .headers()
        .get(CSRF_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|submitted| bool::from(submitted.as_bytes().ct_eq(token.as_bytes())))
}
