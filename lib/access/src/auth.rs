//! Identity facts produced by a successful authentication.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How a session was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Pre-shared username/password checked against configuration.
    Static,
    /// Delegated login through an OpenID Connect provider.
    Oidc,
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static => write!(f, "static"),
            Self::Oidc => write!(f, "oidc"),
        }
    }
}

/// Claims extracted from a verified OIDC ID token.
///
/// Only the subject is needed to establish a session; the rest is kept for
/// logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OidcClaims {
    /// The subject claim (unique user identifier at the provider).
    pub subject: String,
    /// The issuer URL.
    pub issuer: String,
    /// Email address (optional).
    pub email: Option<String>,
    /// Display name (from `name`, falling back to `preferred_username`).
    pub display_name: Option<String>,
}

impl OidcClaims {
    /// Creates a new set of OIDC claims.
    #[must_use]
    pub fn new(subject: String, issuer: String) -> Self {
        Self {
            subject,
            issuer,
            email: None,
            display_name: None,
        }
    }

    /// Sets the email claim.
    #[must_use]
    pub fn with_email(mut self, email: Option<String>) -> Self {
        self.email = email;
        self
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: Option<String>) -> Self {
        self.display_name = name;
        self
    }
}
