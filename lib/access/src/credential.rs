//! Pre-shared credentials for the static auth driver.

use serde::Deserialize;
use std::collections::HashMap;
use subtle::ConstantTimeEq;

/// Username to password map loaded from configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct StaticCredentials {
    users: HashMap<String, String>,
}

impl StaticCredentials {
    /// Creates a credential set from `(username, password)` pairs.
    #[must_use]
    pub fn new(users: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            users: users.into_iter().collect(),
        }
    }

    /// Returns true if no usable credential is configured.
    ///
    /// Entries with an empty password never verify and do not count.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.values().all(String::is_empty)
    }

    /// Number of configured users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Checks a username/password pair.
    #[must_use]
    pub fn verify(&self, username: &str, password: &str) -> bool {
        match self.users.get(username) {
            Some(expected) if !expected.is_empty() => {
                expected.as_bytes().ct_eq(password.as_bytes()).into()
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credentials() -> StaticCredentials {
        StaticCredentials::new([
            ("admin".to_string(), "hunter2".to_string()),
            ("disabled".to_string(), String::new()),
        ])
    }

    #[test]
    fn verify_accepts_matching_pair() {
        assert!(credentials().verify("admin", "hunter2"));
    }

    #[test]
    fn verify_rejects_wrong_password_and_unknown_user() {
        let creds = credentials();
        assert!(!creds.verify("admin", "hunter3"));
        assert!(!creds.verify("admin", "hunter"));
        assert!(!creds.verify("nobody", "hunter2"));
    }

    #[test]
    fn empty_password_never_verifies() {
        assert!(!credentials().verify("disabled", ""));
    }

    #[test]
    fn is_empty_ignores_blank_passwords() {
        let only_blank = StaticCredentials::new([("x".to_string(), String::new())]);
        assert!(only_blank.is_empty());
        assert!(!credentials().is_empty());
        assert!(StaticCredentials::default().is_empty());
    }

    #[test]
    fn deserializes_from_plain_map() {
        let creds: StaticCredentials =
            serde_json::from_str(r#"{"alice": "s3cret"}"#).expect("deserialize");
        assert_eq!(creds.len(), 1);
        assert!(creds.verify("alice", "s3cret"));
    }

    #[test]
    fn verify_rejects_prefixes_and_near_misses() {
        let creds = StaticCredentials::new([("alice".to_string(), "s3cret".to_string())]);
        assert!(!creds.verify("alice", "s3cre"));
        assert!(!creds.verify("alice", "s3cret!"));
        assert!(!creds.verify("alice", "s3creT"));
        assert!(!creds.verify("alice", ""));
    }
}
