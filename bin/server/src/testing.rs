//! Shared test fixtures.

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use imagik_access::OidcClaims;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::auth::oidc::{AuthState, IdentityProvider, OidcError};
use crate::config::{ServerConfig, SessionConfig};
use crate::content::Content;
use crate::csrf::mint_token;
use crate::session::{SessionStore, derive_key};

pub const SECRET_KEY: &str = "an-imagik-test-secret-of-at-least-32-bytes";

/// A config for `driver` that needs nothing from the environment.
pub fn test_config(driver: &str) -> ServerConfig {
    let mut config = ServerConfig::new(driver, SECRET_KEY);
    config.listen = "127.0.0.1:0".to_string();
    config.session.secure_cookies = false;
    config
}

pub fn session_store() -> SessionStore {
    let key = derive_key("secret_key", SECRET_KEY.as_bytes()).expect("key");
    SessionStore::new(
        key,
        &SessionConfig {
            duration_minutes: 60,
            secure_cookies: false,
        },
    )
}

/// `Authorization` header value for HTTP Basic.
pub fn basic(username: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{username}:{password}")))
}

/// Every `Set-Cookie` header on the response.
pub fn set_cookies(response: &Response) -> Vec<String> {
    response
        .headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .map(ToString::to_string)
        .collect()
}

/// A `Cookie` request header replaying the cookies a response set.
///
/// Cookies being deleted (`Max-Age=0`) are left out, as a browser would.
pub fn cookie_header(response: &Response) -> HeaderMap {
    let pairs: Vec<String> = set_cookies(response)
        .iter()
        .filter(|c| !c.contains("Max-Age=0"))
        .filter_map(|c| c.split(';').next().map(str::to_string))
        .collect();
    let mut headers = HeaderMap::new();
    if !pairs.is_empty() {
        headers.insert(
            header::COOKIE,
            HeaderValue::from_str(&pairs.join("; ")).expect("cookie header"),
        );
    }
    headers
}

pub async fn body_string(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
        .await
        .expect("body");
    String::from_utf8_lossy(&bytes).into_owned()
}

pub fn request(method: &str, uri: &str) -> Request {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

/// Content collaborator that counts calls instead of touching disk.
#[derive(Default)]
pub struct CountingContent {
    pub gets: AtomicUsize,
    pub puts: AtomicUsize,
    pub lists: AtomicUsize,
    pub renames: AtomicUsize,
    pub uploads: AtomicUsize,
    pub uis: AtomicUsize,
    pub panic_on_ready: bool,
}

impl CountingContent {
    pub fn handled(&self) -> usize {
        [
            &self.gets,
            &self.puts,
            &self.lists,
            &self.renames,
            &self.uploads,
            &self.uis,
        ]
        .iter()
        .map(|c| c.load(Ordering::SeqCst))
        .sum()
    }
}

#[async_trait::async_trait]
impl Content for CountingContent {
    async fn get(&self, _request: Request) -> Response {
        self.gets.fetch_add(1, Ordering::SeqCst);
        "content".into_response()
    }

    async fn put(&self, _request: Request) -> Response {
        self.puts.fetch_add(1, Ordering::SeqCst);
        StatusCode::CREATED.into_response()
    }

    async fn list(&self, _request: Request) -> Response {
        self.lists.fetch_add(1, Ordering::SeqCst);
        "[]".into_response()
    }

    async fn rename(&self, _request: Request) -> Response {
        self.renames.fetch_add(1, Ordering::SeqCst);
        StatusCode::NO_CONTENT.into_response()
    }

    async fn upload(&self, _request: Request) -> Response {
        self.uploads.fetch_add(1, Ordering::SeqCst);
        StatusCode::CREATED.into_response()
    }

    async fn ui(&self, _request: Request) -> Response {
        self.uis.fetch_add(1, Ordering::SeqCst);
        "ui".into_response()
    }

    async fn ready(&self) -> bool {
        if self.panic_on_ready {
            panic!("storage check exploded");
        }
        true
    }
}

/// Identity provider that accepts the code `good` and nothing else.
#[derive(Clone, Default)]
pub struct FakeIdentityProvider {
    issued: Arc<Mutex<Option<AuthState>>>,
    delay: Option<Duration>,
    exchanges: Arc<AtomicUsize>,
}

impl FakeIdentityProvider {
    pub const AUTHORIZE_URL: &'static str = "https://auth.example.com/authorize";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// State handed out by the most recent `authorization_url` call.
    pub fn last_state(&self) -> Option<AuthState> {
        self.issued.lock().expect("lock").clone()
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IdentityProvider for FakeIdentityProvider {
    fn issuer(&self) -> &str {
        "https://auth.example.com"
    }

    fn authorization_url(&self) -> (String, AuthState) {
        let state = AuthState {
            csrf_token: mint_token().expect("token"),
            pkce_verifier: mint_token().expect("token"),
            nonce: mint_token().expect("token"),
        };
        *self.issued.lock().expect("lock") = Some(state.clone());
        (
            format!("{}?state={}", Self::AUTHORIZE_URL, state.csrf_token),
            state,
        )
    }

    async fn exchange_code(&self, code: &str, state: &AuthState) -> Result<OidcClaims, OidcError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let expected = self.last_state();
        if code != "good" || expected.as_ref() != Some(state) {
            return Err(OidcError::TokenExchange("invalid_grant".to_string()));
        }
        Ok(
            OidcClaims::new("user-1".to_string(), self.issuer().to_string())
                .with_email(Some("user@example.com".to_string())),
        )
    }
}
