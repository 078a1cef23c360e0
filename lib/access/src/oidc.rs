//! OIDC (OpenID Connect) provider settings.
//!
//! Fields with defaults can be omitted when loading from environment
//! variables.

use serde::{Deserialize, Serialize};

/// Configuration for the OIDC identity provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcConfig {
    /// The OIDC issuer URL, used for discovery.
    issuer_url: String,
    /// The OAuth2 client ID registered with the provider.
    client_id: String,
    /// The OAuth2 client secret.
    client_secret: String,
    /// Absolute URL of our callback route
    /// (e.g. "https://img.example.com/api/pub/auth/oidc/callback").
    redirect_uri: String,
    /// OAuth2 scopes to request as a comma-separated string.
    #[serde(default = "default_scopes")]
    scopes: String,
    /// Upper bound for any single call to the provider, in seconds.
    #[serde(default = "default_timeout_seconds")]
    timeout_seconds: u64,
}

fn default_scopes() -> String {
    "openid,email,profile".to_string()
}

fn default_timeout_seconds() -> u64 {
    10
}

impl OidcConfig {
    /// Creates a new OIDC configuration with defaults for optional fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        OidcConfigBuilder::new(issuer_url, client_id, client_secret, redirect_uri).build()
    }

    /// Creates a configuration builder for more customization.
    #[must_use]
    pub fn builder(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> OidcConfigBuilder {
        OidcConfigBuilder::new(issuer_url, client_id, client_secret, redirect_uri)
    }

    #[must_use]
    pub fn issuer_url(&self) -> &str {
        &self.issuer_url
    }

    #[must_use]
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    #[must_use]
    pub fn client_secret(&self) -> &str {
        &self.client_secret
    }

    #[must_use]
    pub fn redirect_uri(&self) -> &str {
        &self.redirect_uri
    }

    /// Returns the OAuth2 scopes to request, parsed from the comma-separated
    /// string. Blank entries are dropped.
    #[must_use]
    pub fn scopes(&self) -> Vec<&str> {
        self.scopes
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }

    #[must_use]
    pub fn timeout_seconds(&self) -> u64 {
        self.timeout_seconds
    }

    /// Checks the fields that discovery cannot catch on its own.
    ///
    /// # Errors
    ///
    /// Returns a description of the first problem found.
    pub fn validate(&self) -> Result<(), String> {
        if self.issuer_url.trim().is_empty() {
            return Err("issuer_url is empty".to_string());
        }
        if self.client_id.trim().is_empty() {
            return Err("client_id is empty".to_string());
        }
        if self.redirect_uri.trim().is_empty() {
            return Err("redirect_uri is empty".to_string());
        }
        if !self.scopes().contains(&"openid") {
            return Err("scopes must include 'openid'".to_string());
        }
        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be positive".to_string());
        }
        Ok(())
    }
}

/// Builder for `OidcConfig`.
#[derive(Debug)]
pub struct OidcConfigBuilder {
    issuer_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    scopes: Vec<String>,
    timeout_seconds: u64,
}

impl OidcConfigBuilder {
    /// Creates a new builder with required fields.
    #[must_use]
    pub fn new(
        issuer_url: String,
        client_id: String,
        client_secret: String,
        redirect_uri: String,
    ) -> Self {
        Self {
            issuer_url,
            client_id,
            client_secret,
            redirect_uri,
            scopes: default_scopes().split(',').map(str::to_string).collect(),
            timeout_seconds: default_timeout_seconds(),
        }
    }

    /// Adds a scope to the list of scopes to request.
    #[must_use]
    pub fn add_scope(mut self, scope: String) -> Self {
        if !self.scopes.contains(&scope) {
            self.scopes.push(scope);
        }
        self
    }

    /// Sets the per-call provider timeout.
    #[must_use]
    pub fn timeout_seconds(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    /// Builds the `OidcConfig`.
    #[must_use]
    pub fn build(self) -> OidcConfig {
        OidcConfig {
            issuer_url: self.issuer_url,
            client_id: self.client_id,
            client_secret: self.client_secret,
            redirect_uri: self.redirect_uri,
            scopes: self.scopes.join(","),
            timeout_seconds: self.timeout_seconds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> OidcConfig {
        OidcConfig::new(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://img.example.com/api/pub/auth/oidc/callback".to_string(),
        )
    }

    #[test]
    fn new_config_has_defaults() {
        let config = config();

        assert_eq!(config.issuer_url(), "https://auth.example.com");
        assert_eq!(config.client_id(), "client-id");
        assert_eq!(config.client_secret(), "client-secret");
        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert_eq!(config.timeout_seconds(), 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_add_scope_does_not_duplicate() {
        let config = OidcConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            "client-secret".to_string(),
            "https://img.example.com/cb".to_string(),
        )
        .add_scope("openid".to_string())
        .add_scope("groups".to_string())
        .timeout_seconds(3)
        .build();

        let openid_count = config.scopes().iter().filter(|s| **s == "openid").count();
        assert_eq!(openid_count, 1);
        assert!(config.scopes().contains(&"groups"));
        assert_eq!(config.timeout_seconds(), 3);
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let json = r#"{
            "issuer_url": "https://auth.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://img.example.com/callback"
        }"#;

        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
        assert_eq!(config.timeout_seconds(), 10);
    }

    #[test]
    fn scopes_parse_comma_separated_and_skip_blanks() {
        let json = r#"{
            "issuer_url": "https://auth.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://img.example.com/callback",
            "scopes": "openid, email,, profile "
        }"#;

        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");

        assert_eq!(config.scopes(), vec!["openid", "email", "profile"]);
    }

    #[test]
    fn validate_rejects_missing_openid_scope_and_zero_timeout() {
        let json = r#"{
            "issuer_url": "https://auth.example.com",
            "client_id": "my-client",
            "client_secret": "secret",
            "redirect_uri": "https://img.example.com/callback",
            "scopes": "email"
        }"#;
        let config: OidcConfig = serde_json::from_str(json).expect("deserialize");
        assert!(config.validate().unwrap_err().contains("openid"));

        let zero = OidcConfig::builder(
            "https://auth.example.com".to_string(),
            "client-id".to_string(),
            String::new(),
            "https://img.example.com/cb".to_string(),
        )
        .timeout_seconds(0)
        .build();
        assert!(zero.validate().unwrap_err().contains("timeout"));
    }

    #[test]
    fn validate_rejects_blank_issuer() {
        let config = OidcConfig::new(
            " ".to_string(),
            "client-id".to_string(),
            "secret".to_string(),
            "https://img.example.com/cb".to_string(),
        );
        assert!(config.validate().unwrap_err().contains("issuer_url"));
    }
}
