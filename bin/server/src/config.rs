//! Centralized server configuration.
//!
//! Strongly-typed configuration loaded via the `config` crate from
//! `IMAGIK_`-prefixed environment variables. Nested keys use `__`, so
//! `IMAGIK_SESSION__DURATION_MINUTES=60` sets `session.duration_minutes` and
//! `IMAGIK_STATIC_AUTH__USERS__ADMIN=secret` adds the static user `admin`.
//! Keys are lowercased by the loader, which includes static usernames.
//!
//! `auth_driver` and `secret_key` have no defaults: an instance never starts
//! unprotected by accident.

use imagik_access::{OidcConfig, StaticCredentials};
use serde::Deserialize;
use std::path::PathBuf;

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address the listener binds to.
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Directory that stored content is served from and written to.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    /// Directory holding the built web UI.
    #[serde(default = "default_ui_dir")]
    pub ui_dir: PathBuf,

    /// Debug mode: verbose logging, and `/` serves content instead of
    /// redirecting to the UI.
    #[serde(default)]
    pub debug: bool,

    /// Authentication driver: `null`, `static` or `oidc`.
    pub auth_driver: String,

    /// Metrics driver: `null` or `prometheus`.
    #[serde(default = "default_metrics_driver")]
    pub metrics_driver: String,

    /// Key material for session cookies. At least 32 bytes.
    pub secret_key: String,

    /// Base64-encoded CSRF key. CSRF protection of the privileged API is
    /// enabled only when this is set.
    #[serde(default)]
    pub csrf_key: Option<String>,

    /// Session configuration.
    #[serde(default)]
    pub session: SessionConfig,

    /// Credentials for the `static` driver.
    #[serde(default)]
    pub static_auth: StaticAuthConfig,

    /// Identity provider for the `oidc` driver.
    #[serde(default)]
    pub oidc: Option<OidcConfig>,
}

/// Session-related configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in minutes.
    #[serde(default = "default_session_duration_minutes")]
    pub duration_minutes: i64,

    /// Whether to set the Secure flag on cookies (requires HTTPS).
    /// Defaults to true; set to false for local HTTP development.
    #[serde(default = "default_secure_cookies")]
    pub secure_cookies: bool,
}

/// Longest accepted session lifetime: one year.
pub const MAX_SESSION_MINUTES: i64 = 365 * 24 * 60;

impl SessionConfig {
    /// Checks that the lifetime is positive and at most a year.
    ///
    /// # Errors
    ///
    /// Returns a description of the bad value.
    pub fn validate(&self) -> Result<(), String> {
        if (1..=MAX_SESSION_MINUTES).contains(&self.duration_minutes) {
            Ok(())
        } else {
            Err(format!(
                "session.duration_minutes must be between 1 and {MAX_SESSION_MINUTES}, got {}",
                self.duration_minutes
            ))
        }
    }
}

/// Credentials accepted by the `static` driver.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StaticAuthConfig {
    /// Username to password map.
    #[serde(default)]
    pub users: StaticCredentials,
}

fn default_listen() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_root_dir() -> PathBuf {
    PathBuf::from("root")
}

fn default_ui_dir() -> PathBuf {
    PathBuf::from("web/dist")
}

fn default_metrics_driver() -> String {
    "null".to_string()
}

fn default_session_duration_minutes() -> i64 {
    24 * 60
}

fn default_secure_cookies() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            duration_minutes: default_session_duration_minutes(),
            secure_cookies: default_secure_cookies(),
        }
    }
}

impl ServerConfig {
    /// Builds a configuration with every optional field at its default.
    #[must_use]
    pub fn new(auth_driver: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            listen: default_listen(),
            root_dir: default_root_dir(),
            ui_dir: default_ui_dir(),
            debug: false,
            auth_driver: auth_driver.into(),
            metrics_driver: default_metrics_driver(),
            secret_key: secret_key.into(),
            csrf_key: None,
            session: SessionConfig::default(),
            static_auth: StaticAuthConfig::default(),
            oidc: None,
        }
    }

    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required configuration is missing or invalid.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        Self::from_environment(environment())
    }

    fn from_environment(source: config::Environment) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(source)
            .build()?
            .try_deserialize()
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("IMAGIK")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
