//! Error types for the access crate.
//!
//! `AuthenticationError` describes why a caller was not let in. Drivers log
//! it and translate it into a 401, 400 or redirect; it never escapes as a
//! panic or a 500.

use std::fmt;

/// Errors from authentication attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationError {
    /// The request carried no credential at all.
    MissingCredentials,
    /// A credential was presented but did not match.
    InvalidCredentials { username: String },
    /// The credential header could not be decoded.
    MalformedCredentials { reason: String },
    /// The login state cookie was missing or unreadable.
    MissingLoginState,
    /// The `state` parameter returned by the provider does not match ours.
    StateMismatch,
    /// The identity provider rejected the exchange or returned bad tokens.
    ProviderError { provider: String, reason: String },
    /// The identity provider did not answer in time.
    ProviderTimeout { provider: String, after_secs: u64 },
}

impl fmt::Display for AuthenticationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingCredentials => write!(f, "no credentials presented"),
            Self::InvalidCredentials { username } => {
                write!(f, "invalid credentials for user '{username}'")
            }
            Self::MalformedCredentials { reason } => {
                write!(f, "malformed credentials: {reason}")
            }
            Self::MissingLoginState => write!(f, "login state missing or unreadable"),
            Self::StateMismatch => write!(f, "login state does not match callback"),
            Self::ProviderError { provider, reason } => {
                write!(f, "OIDC provider '{provider}' error: {reason}")
            }
            Self::ProviderTimeout {
                provider,
                after_secs,
            } => {
                write!(f, "OIDC provider '{provider}' timed out after {after_secs}s")
            }
        }
    }
}

impl std::error::Error for AuthenticationError {}
