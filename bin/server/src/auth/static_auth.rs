//! The `static` driver: pre-shared usernames and passwords.
//!
//! Browsers and scripts authenticate with HTTP Basic on any protected route;
//! the UI can also post a login form. Either way a session cookie is issued so
//! later requests skip the credential check.

use axum::extract::{Form, Request, State};
use axum::http::{HeaderMap, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use imagik_access::{AuthMethod, AuthenticationError, StaticCredentials};
use rootcause::Report;
use serde::Deserialize;
use std::sync::Arc;

use super::{AuthDriver, AuthDriverKind, AuthRejection, LOGOUT_PATH, logout};
use crate::error::ServerError;
use crate::router::{Binding, RouteError, RouteTree, TrustZone};
use crate::session::SessionStore;

/// Form login route.
pub const LOGIN_PATH: &str = "/api/pub/auth/static/login";

/// Checks requests against configured credentials.
#[derive(Clone)]
pub struct StaticAuth {
    credentials: Arc<StaticCredentials>,
    sessions: SessionStore,
}

/// Extracts the username and password from an `Authorization: Basic` header.
///
/// # Errors
///
/// `MissingCredentials` without a Basic header, `MalformedCredentials` if it
/// does not decode to `user:password`.
pub fn basic_credentials(headers: &HeaderMap) -> Result<(String, String), AuthenticationError> {
    let value = headers
        .get(header::AUTHORIZATION)
        .ok_or(AuthenticationError::MissingCredentials)?
        .to_str()
        .map_err(|_| AuthenticationError::MalformedCredentials {
            reason: "header is not ASCII".to_string(),
        })?;
    let (scheme, encoded) = value
        .split_once(' ')
        .ok_or(AuthenticationError::MissingCredentials)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthenticationError::MissingCredentials);
    }
    let decoded = STANDARD.decode(encoded.trim()).map_err(|e| {
        AuthenticationError::MalformedCredentials {
            reason: e.to_string(),
        }
    })?;
    let decoded =
        String::from_utf8(decoded).map_err(|_| AuthenticationError::MalformedCredentials {
            reason: "credentials are not UTF-8".to_string(),
        })?;
    let (username, password) =
        decoded
            .split_once(':')
            .ok_or_else(|| AuthenticationError::MalformedCredentials {
                reason: "missing ':' separator".to_string(),
            })?;
    Ok((username.to_string(), password.to_string()))
}

impl StaticAuth {
    #[must_use]
    pub fn new(credentials: StaticCredentials, sessions: SessionStore) -> Self {
        Self {
            credentials: Arc::new(credentials),
            sessions,
        }
    }

    fn verify(&self, username: &str, password: &str) -> Result<(), AuthenticationError> {
        if self.credentials.verify(username, password) {
            Ok(())
        } else {
            Err(AuthenticationError::InvalidCredentials {
                username: username.to_string(),
            })
        }
    }

    fn check(&self, headers: &HeaderMap) -> Result<String, AuthenticationError> {
        let (username, password) = basic_credentials(headers)?;
        self.verify(&username, &password)?;
        Ok(username)
    }
}

#[async_trait::async_trait]
impl AuthDriver for StaticAuth {
    fn kind(&self) -> AuthDriverKind {
        AuthDriverKind::Static
    }

    async fn init(&mut self) -> Result<(), Report<ServerError>> {
        if self.credentials.is_empty() {
            return Err(ServerError::AuthInit {
                driver: AuthDriverKind::Static.to_string(),
                details: "no credentials configured (set IMAGIK_STATIC_AUTH__USERS__<NAME>)"
                    .to_string(),
            }
            .into());
        }
        tracing::info!(users = self.credentials.len(), "static auth initialized");
        Ok(())
    }

    fn init_routes(&self, routes: &mut RouteTree) -> Result<(), Report<RouteError>> {
        routes.register([
            Binding::with_state(
                TrustZone::Public,
                Method::POST,
                LOGIN_PATH,
                login,
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

        match self.check(request.headers()) {
            Ok(username) => {
                let session = self.sessions.establish(username, AuthMethod::Static);
                request.extensions_mut().insert(session.clone());
                let response = next.run(request).await;
                self.sessions.save(response, &session)
            }
            Err(e) => {
                match &e {
                    AuthenticationError::MissingCredentials => {
                        tracing::debug!(path = %request.uri().path(), "no credentials presented");
                    }
                    _ => tracing::warn!(error = %e, "static authentication failed"),
                }
                AuthRejection::from(&e).into_response()
            }
        }
    }
}

/// Form fields for the login route.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    username: String,
    password: String,
}

/// Handles the UI login form.
pub async fn login(State(auth): State<StaticAuth>, Form(form): Form<LoginForm>) -> Response {
    match auth.verify(&form.username, &form.password) {
        Ok(()) => {
            let session = auth.sessions.establish(form.username, AuthMethod::Static);
            auth.sessions
                .save(StatusCode::NO_CONTENT.into_response(), &session)
        }
        Err(e) => {
            tracing::warn!(error = %e, "form login failed");
            AuthRejection::Unauthorized.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{basic, cookie_header, session_store, set_cookies};
    use axum::Router;
    use axum::body::Body;
    use axum::http::HeaderValue;
    use axum::routing::get;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn driver() -> StaticAuth {
        StaticAuth::new(
            StaticCredentials::new([("admin".to_string(), "hunter2".to_string())]),
            session_store(),
        )
    }

    fn protected(driver: StaticAuth, hits: Arc<AtomicUsize>) -> Router {
        let driver: Arc<dyn AuthDriver> = Arc::new(driver);
        Router::new()
            .route(
                "/secret",
                get(move || {
                    let hits = Arc::clone(&hits);
                    async move {
                        hits.fetch_add(1, Ordering::SeqCst);
                        "secret"
                    }
                }),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                driver,
                crate::auth::middleware::enforce,
            ))
    }

    fn get_secret(authorization: Option<&str>) -> Request {
        let mut builder = Request::builder().uri("/secret");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn parses_basic_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_str(&basic("admin", "pa:ss")).unwrap(),
        );
        assert_eq!(
            basic_credentials(&headers).unwrap(),
            ("admin".to_string(), "pa:ss".to_string())
        );
    }

    #[test]
    fn rejects_other_schemes_and_garbage() {
        let mut headers = HeaderMap::new();
        assert_eq!(
            basic_credentials(&headers).unwrap_err(),
            AuthenticationError::MissingCredentials
        );

        headers.insert(header::AUTHORIZATION, "Bearer abc".parse().unwrap());
        assert_eq!(
            basic_credentials(&headers).unwrap_err(),
            AuthenticationError::MissingCredentials
        );

        headers.insert(header::AUTHORIZATION, "Basic !!!".parse().unwrap());
        assert!(matches!(
            basic_credentials(&headers).unwrap_err(),
            AuthenticationError::MalformedCredentials { .. }
        ));

        headers.insert(
            header::AUTHORIZATION,
            format!("Basic {}", STANDARD.encode("nocolon")).parse().unwrap(),
        );
        assert!(matches!(
            basic_credentials(&headers).unwrap_err(),
            AuthenticationError::MalformedCredentials { .. }
        ));
    }

    #[tokio::test]
    async fn init_requires_credentials() {
        let mut empty = StaticAuth::new(StaticCredentials::default(), session_store());
        assert!(empty.init().await.is_err());

        let mut configured = driver();
        assert!(configured.init().await.is_ok());
    }

    #[tokio::test]
    async fn valid_basic_reaches_handler_and_sets_session() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = protected(driver(), Arc::clone(&hits));

        let response = app
            .oneshot(get_secret(Some(&basic("admin", "hunter2"))))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(
            set_cookies(&response)
                .iter()
                .any(|c| c.starts_with("imagik_session="))
        );
    }

    #[tokio::test]
    async fn invalid_or_missing_credentials_are_challenged() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = protected(driver(), Arc::clone(&hits));

        for authorization in [None, Some(basic("admin", "wrong")), Some(basic("eve", ""))] {
            let response = app
                .clone()
                .oneshot(get_secret(authorization.as_deref()))
                .await
                .unwrap();

            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            assert_eq!(
                response.headers().get(header::WWW_AUTHENTICATE).unwrap(),
                "Basic realm=\"imagik\""
            );
            assert!(set_cookies(&response).is_empty());
        }
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn session_cookie_authenticates_later_requests() {
        let hits = Arc::new(AtomicUsize::new(0));
        let app = protected(driver(), Arc::clone(&hits));

        let first = app
            .clone()
            .oneshot(get_secret(Some(&basic("admin", "hunter2"))))
            .await
            .unwrap();

        let mut request = get_secret(None);
        request.headers_mut().extend(cookie_header(&first));
        let second = app.oneshot(request).await.unwrap();

        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert!(set_cookies(&second).is_empty());
    }

    #[tokio::test]
    async fn form_login_issues_session() {
        let mut routes = RouteTree::new();
        driver().init_routes(&mut routes).unwrap();
        let app = routes.into_router(&crate::middleware::ZoneLayers::new(
            Arc::new(crate::auth::NullAuth::new()),
            None,
        ));

        let ok = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(LOGIN_PATH)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("username=admin&password=hunter2"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(ok.status(), StatusCode::NO_CONTENT);
        assert_eq!(set_cookies(&ok).len(), 1);

        let denied = app
            .oneshot(
                Request::builder()
                    .method(Method::POST)
                    .uri(LOGIN_PATH)
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("username=admin&password=nope"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookies(&denied).is_empty());
    }

    #[test]
    fn registering_routes_twice_is_rejected() {
        let driver = driver();
        let mut routes = RouteTree::new();
        driver.init_routes(&mut routes).expect("first");
        let count = routes.len();

        let err = driver.init_routes(&mut routes).unwrap_err();

        assert!(matches!(
            err.current_context(),
            RouteError::Duplicate { .. }
        ));
        assert_eq!(routes.len(), count);
    }
}
