//! Cookie-backed session store.
//!
//! Sessions are never stored server-side. The serialized `Session` travels in
//! the `imagik_session` cookie, encrypted and authenticated with a key
//! derived from `secret_key`. A cookie that fails to decrypt, fails to parse
//! or carries an expired session reads as no session at all.

use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::PrivateCookieJar;
use axum_extra::extract::cookie::{Cookie, Key, SameSite};
use chrono::Duration as ChronoDuration;
use imagik_access::{AuthMethod, Session};
use rootcause::Report;
use time::Duration as TimeDuration;

use crate::config::SessionConfig;
use crate::error::ServerError;

/// Session cookie name.
pub const SESSION_COOKIE: &str = "imagik_session";

/// Smallest amount of key material accepted for cookie keys.
pub const MIN_KEY_BYTES: usize = 32;

/// Derives a cookie key from configured key material.
///
/// # Errors
///
/// Returns `ServerError::InvalidKey` when fewer than 32 bytes are supplied.
pub fn derive_key(name: &str, material: &[u8]) -> Result<Key, Report<ServerError>> {
    if material.len() < MIN_KEY_BYTES {
        return Err(ServerError::InvalidKey {
            name: name.to_string(),
            reason: format!(
                "need at least {MIN_KEY_BYTES} bytes, got {}",
                material.len()
            ),
        }
        .into());
    }
    Ok(Key::derive_from(material))
}

/// Reads and writes sessions in encrypted cookies.
#[derive(Clone)]
pub struct SessionStore {
    key: Key,
    duration: ChronoDuration,
    secure: bool,
}

impl SessionStore {
    /// Creates a store that issues sessions for `config.duration_minutes`.
    #[must_use]
    pub fn new(key: Key, config: &SessionConfig) -> Self {
        Self {
            key,
            duration: ChronoDuration::minutes(config.duration_minutes),
            secure: config.secure_cookies,
        }
    }

    /// The key cookies are encrypted with.
    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    #[must_use]
    pub fn secure_cookies(&self) -> bool {
        self.secure
    }

    /// Returns the caller's session if the cookie authenticates and the
    /// session is still valid.
    #[must_use]
    pub fn get(&self, headers: &HeaderMap) -> Option<Session> {
        let raw = self.read(headers, SESSION_COOKIE)?;
        let session: Session = match serde_json::from_str(&raw) {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!(error = %e, "discarding unparsable session cookie");
                return None;
            }
        };
        if !session.is_valid() {
            tracing::debug!(session_id = %session.id(), "discarding expired session");
            return None;
        }
        Some(session)
    }

    /// Creates a new session for `subject`, valid for the configured duration.
    #[must_use]
    pub fn establish(&self, subject: impl Into<String>, method: AuthMethod) -> Session {
        let session = Session::new(subject.into(), method, self.duration);
        tracing::info!(
            session_id = %session.id(),
            subject = %session.subject(),
            method = %method,
            "session established"
        );
        session
    }

    /// Attaches the session cookie to `response`.
    #[must_use]
    pub fn save(&self, response: Response, session: &Session) -> Response {
        let value = match serde_json::to_string(session) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize session");
                return response;
            }
        };
        let remaining = (session.expires_at() - chrono::Utc::now()).num_seconds().max(0);
        let cookie = self.cookie(SESSION_COOKIE, value, TimeDuration::seconds(remaining));
        self.write(response, cookie)
    }

    /// Attaches a cookie to `response` that deletes the session.
    #[must_use]
    pub fn clear(&self, response: Response) -> Response {
        self.write(response, self.removal(SESSION_COOKIE))
    }

    /// Builds a cookie with the attributes every imagik cookie shares.
    pub(crate) fn cookie(
        &self,
        name: &'static str,
        value: String,
        max_age: TimeDuration,
    ) -> Cookie<'static> {
        Cookie::build((name, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .max_age(max_age)
            .build()
    }

    /// Builds a cookie that makes the browser drop `name`.
    pub(crate) fn removal(&self, name: &'static str) -> Cookie<'static> {
        self.cookie(name, String::new(), TimeDuration::ZERO)
    }

    /// Decrypts cookie `name` from the request headers.
    pub(crate) fn read(&self, headers: &HeaderMap, name: &str) -> Option<String> {
        PrivateCookieJar::from_headers(headers, self.key.clone())
            .get(name)
            .map(|cookie| cookie.value().to_string())
    }

    /// Encrypts `cookie` and appends it to `response`.
    pub(crate) fn write(&self, response: Response, cookie: Cookie<'static>) -> Response {
        let jar = PrivateCookieJar::new(self.key.clone()).add(cookie);
        (jar, response).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{cookie_header, set_cookies};
    use axum::http::header;

    fn store() -> SessionStore {
        let key = derive_key("secret_key", &[7u8; 32]).expect("key");
        SessionStore::new(key, &SessionConfig::default())
    }

    #[test]
    fn derive_key_rejects_short_material() {
        let err = derive_key("secret_key", b"too short").unwrap_err();
        assert!(err.to_string().contains("at least 32 bytes"));
    }

    #[test]
    fn saved_session_reads_back() {
        let store = store();
        let session = store.establish("alice", AuthMethod::Static);

        let response = store.save(Response::default(), &session);
        let headers = cookie_header(&response);

        assert_eq!(store.get(&headers), Some(session));
    }

    #[test]
    fn cookie_is_not_plaintext() {
        let store = store();
        let session = store.establish("alice", AuthMethod::Static);
        let response = store.save(Response::default(), &session);

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("imagik_session="));
        assert!(!cookies[0].contains("alice"));
        assert!(cookies[0].contains("HttpOnly"));
    }

    #[test]
    fn tampered_cookie_is_ignored() {
        let store = store();
        let session = store.establish("alice", AuthMethod::Static);
        let response = store.save(Response::default(), &session);

        let mut headers = cookie_header(&response);
        let original = headers
            .get(header::COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let (name, value) = original.split_once('=').expect("pair");
        let mut bytes = value.as_bytes().to_vec();
        let last = bytes.len() - 2;
        bytes[last] = if bytes[last] == b'A' { b'B' } else { b'A' };
        let tampered = format!("{name}={}", String::from_utf8(bytes).expect("utf8"));
        headers.insert(header::COOKIE, tampered.parse().expect("header"));

        assert!(store.get(&headers).is_none());
    }

    #[test]
    fn cookie_from_other_key_is_ignored() {
        let store = store();
        let other = SessionStore::new(
            derive_key("secret_key", &[9u8; 32]).expect("key"),
            &SessionConfig::default(),
        );
        let session = other.establish("mallory", AuthMethod::Static);
        let response = other.save(Response::default(), &session);

        assert!(store.get(&cookie_header(&response)).is_none());
    }

    #[test]
    fn expired_session_is_ignored() {
        let key = derive_key("secret_key", &[7u8; 32]).expect("key");
        let store = SessionStore::new(
            key,
            &SessionConfig {
                duration_minutes: -5,
                secure_cookies: false,
            },
        );
        let session = store.establish("alice", AuthMethod::Static);
        let response = store.save(Response::default(), &session);

        assert!(store.get(&cookie_header(&response)).is_none());
    }

    #[test]
    fn clear_expires_cookie() {
        let store = store();
        let response = store.clear(Response::default());

        let cookies = set_cookies(&response);
        assert_eq!(cookies.len(), 1);
        assert!(cookies[0].starts_with("imagik_session="));
        assert!(cookies[0].contains("Max-Age=0"));
    }
}
