//! Login sessions.
//!
//! A session is created after a driver accepts a caller's proof of identity.
//! It travels inside an encrypted cookie; the server keeps no session table.
//! The server crate only hands a `Session` to callers after the cookie has
//! been authenticated and decrypted, and after `is_valid` holds.

use chrono::{DateTime, Duration, Utc};
use imagik_core::SessionId;
use serde::{Deserialize, Serialize};

use crate::auth::AuthMethod;

/// Represents an established login session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    /// Unique identifier for this session.
    id: SessionId,
    /// Who authenticated (static username or OIDC subject).
    subject: String,
    /// Which driver established the session.
    method: AuthMethod,
    /// When the session was issued.
    issued_at: DateTime<Utc>,
    /// When the session stops being accepted.
    expires_at: DateTime<Utc>,
}

impl Session {
    /// Creates a new session valid for `duration` from now.
    #[must_use]
    pub fn new(subject: String, method: AuthMethod, duration: Duration) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            subject,
            method,
            issued_at: now,
            expires_at: now + duration,
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    #[must_use]
    pub fn subject(&self) -> &str {
        &self.subject
    }

    #[must_use]
    pub fn method(&self) -> AuthMethod {
        self.method
    }

    #[must_use]
    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the session has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    /// Returns true if the session may still be trusted.
    ///
    /// A session issued in the future is rejected as well; that only happens
    /// with a forged or clock-skewed cookie.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.is_expired() && self.issued_at <= Utc::now() + Duration::minutes(1)
    }
}
