//! Fatal server errors.
//!
//! Everything here stops the process: `main` logs the report and exits
//! non-zero. Request-time failures never surface as a `ServerError`; they
//! become responses in the handler or middleware that hit them.

use std::fmt;

/// Startup and lifecycle errors.
#[derive(Debug)]
pub enum ServerError {
    /// Configuration could not be loaded or is inconsistent.
    Config { details: String },
    /// `auth_driver` names no known driver.
    UnknownAuthDriver { name: String },
    /// `metrics_driver` names no known driver.
    UnknownMetricsDriver { name: String },
    /// A key setting is too short or not decodable.
    InvalidKey { name: String, reason: String },
    /// The auth driver failed its one-time setup.
    AuthInit { driver: String, details: String },
    /// Route registration violated a route tree invariant.
    Routes { details: String },
    /// The listener could not be bound.
    Bind { address: String, details: String },
    /// The server loop ended with an I/O error.
    Serve { details: String },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config { details } => write!(f, "configuration error: {details}"),
            Self::UnknownAuthDriver { name } => {
                write!(
                    f,
                    "unknown auth driver '{name}' (expected null, static or oidc)"
                )
            }
            Self::UnknownMetricsDriver { name } => {
                write!(
                    f,
                    "unknown metrics driver '{name}' (expected null or prometheus)"
                )
            }
            Self::InvalidKey { name, reason } => write!(f, "invalid {name}: {reason}"),
            Self::AuthInit { driver, details } => {
                write!(f, "auth driver '{driver}' failed to initialize: {details}")
            }
            Self::Routes { details } => write!(f, "route registration failed: {details}"),
            Self::Bind { address, details } => {
                write!(f, "failed to bind {address}: {details}")
            }
            Self::Serve { details } => write!(f, "server error: {details}"),
        }
    }
}

impl std::error::Error for ServerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_driver_lists_choices() {
        let err = ServerError::UnknownAuthDriver {
            name: "ldap".to_string(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("ldap"));
        assert!(rendered.contains("static"));
    }

    #[test]
    fn bind_error_names_address() {
        let err = ServerError::Bind {
            address: "127.0.0.1:80".to_string(),
            details: "permission denied".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "failed to bind 127.0.0.1:80: permission denied"
        );
    }
}
