//! Credential value types.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BankDataError;

/// A secret as written in a config file: inline, or the name of an
/// environment variable to read at load time.
///
/// ```toml
/// secret_id = "d3b0…"
/// secret_key = { env = "GOCARDLESS_SECRET_KEY" }
/// ```
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SecretValue {
    Plain(String),
    Env { env: String },
}

impl SecretValue {
    /// Resolve to the actual secret string.
    pub fn resolve(&self) -> Result<String, BankDataError> {
        match self {
            Self::Plain(value) => Ok(value.clone()),
            Self::Env { env } => std::env::var(env).map_err(|_| {
                BankDataError::Configuration(format!("Environment variable {env} not set"))
            }),
        }
    }
}

impl fmt::Debug for SecretValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain(_) => f.write_str("Plain(<redacted>)"),
            Self::Env { env } => f.debug_struct("Env").field("env", env).finish(),
        }
    }
}

/// Secret id / secret key pair issued by the provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub secret_id: String,
    pub secret_key: String,
}

impl Credentials {
    pub fn new(secret_id: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            secret_id: secret_id.into(),
            secret_key: secret_key.into(),
        }
    }

    /// Stable, non-reversible label for this credential set, used to name
    /// its persisted state.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.secret_id.as_bytes());
        let hex = format!("{digest:x}");
        hex[..16].to_string()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("secret_id", &self.secret_id)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secret_key() {
        let creds = Credentials::new("id-123", "super-secret");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("id-123"));
        assert!(!rendered.contains("super-secret"));
    }

    #[test]
    fn fingerprint_is_stable_and_hides_the_id() {
        let a = Credentials::new("8c3b1c2e-secret-id", "k1");
        let b = Credentials::new("8c3b1c2e-secret-id", "k2");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(a.fingerprint().len(), 16);
        assert!(!a.fingerprint().contains("8c3b1c2e"));
    }

    #[test]
    fn plain_secret_resolves_to_itself() {
        let value: SecretValue = serde_json::from_str(r#""inline""#).unwrap();
        assert_eq!(value.resolve().unwrap(), "inline");
    }

    #[test]
    fn env_secret_reports_missing_variable() {
        let value: SecretValue =
            serde_json::from_str(r#"{"env": "BANKDATA_TEST_DEFINITELY_UNSET_VAR"}"#).unwrap();
        match value.resolve() {
            Err(BankDataError::Configuration(msg)) => {
                assert!(msg.contains("BANKDATA_TEST_DEFINITELY_UNSET_VAR"))
            }
            other => panic!("expected Configuration error, got {other:?}"),
        }
    }
}
