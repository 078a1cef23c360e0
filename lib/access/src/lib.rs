//! Access-control domain types for imagik.
//!
//! This crate provides:
//! - Sessions (`Session`, `AuthMethod`) carried in the encrypted session cookie
//! - Static credentials (`StaticCredentials`) for the shared-secret driver
//! - OIDC provider settings (`OidcConfig`) and the claims we keep (`OidcClaims`)
//! - Authentication error types
//!
//! Nothing here knows about HTTP. The server crate turns these types into
//! cookies, redirects and status codes.
//!
//! # Example
//!
//! ```
//! use imagik_access::{AuthMethod, Session, StaticCredentials};
//! use chrono::Duration;
//!
//! let credentials = StaticCredentials::new([("admin".to_string(), "hunter2".to_string())]);
//! assert!(credentials.verify("admin", "hunter2"));
//!
//! let session = Session::new("admin".to_string(), AuthMethod::Static, Duration::hours(8));
//! assert!(session.is_valid());
//! ```

pub mod auth;
pub mod credential;
pub mod error;
pub mod oidc;
pub mod session;

pub use auth::{AuthMethod, OidcClaims};
pub use credential::StaticCredentials;
pub use error::AuthenticationError;
pub use oidc::{OidcConfig, OidcConfigBuilder};
pub use session::Session;
