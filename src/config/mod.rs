//! Configuration system (layered: code > env > config file).

pub mod credentials;
pub mod limits;

pub use credentials::{Credentials, SecretValue};
pub use limits::{RateLimits, RefreshIntervals};

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::error::{BankDataError, Result};

/// Production API host.
pub const DEFAULT_BASE_URL: &str = "https://bankaccountdata.gocardless.com";

const DEFAULT_PROFILE: &str = "default";
const DEFAULT_REFERENCE_PREFIX: &str = "bankdata_";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_ABSENT_CYCLE_LIMIT: u32 = 3;

/// Runtime configuration for one credential set.
///
/// # Example
/// ```
/// use bankdata::config::{BankDataConfig, Credentials, RateLimits};
///
/// let config = BankDataConfig::builder()
///     .credentials(Credentials::new("secret-id", "secret-key"))
///     .rate_limits(RateLimits { details: 2, balances: 2, transactions: 4 })
///     .build();
/// assert_eq!(config.profile, "default");
/// ```
#[derive(Debug, Clone, Builder)]
pub struct BankDataConfig {
    #[builder(into, default = DEFAULT_BASE_URL.to_string())]
    pub base_url: String,
    pub credentials: Credentials,
    /// Names the account cache, so several refresh scopes can share one
    /// credential set.
    #[builder(into, default = DEFAULT_PROFILE.to_string())]
    pub profile: String,
    #[builder(default)]
    pub rate_limits: RateLimits,
    #[builder(default)]
    pub intervals: RefreshIntervals,
    #[builder(default = Duration::from_secs(DEFAULT_TIMEOUT_SECS))]
    pub request_timeout: Duration,
    /// Consecutive refresh cycles an account may be missing from every
    /// linked requisition before its cached record is purged.
    #[builder(default = DEFAULT_ABSENT_CYCLE_LIMIT)]
    pub absent_cycle_limit: u32,
    #[builder(default)]
    pub fetch_transactions: bool,
    #[builder(into)]
    pub data_dir: Option<PathBuf>,
    /// Externally reachable base URL of the callback endpoint.
    #[builder(into)]
    pub callback_base_url: Option<String>,
    #[builder(into, default = DEFAULT_REFERENCE_PREFIX.to_string())]
    pub reference_prefix: String,
}

impl BankDataConfig {
    /// Load configuration: config file first, then `BANKDATA_*` environment
    /// variables (a `.env` file is honoured) on top.
    ///
    /// Without an explicit `path`, `BANKDATA_CONFIG` or
    /// `~/.bankdata/config.toml` is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let _ = dotenvy::dotenv();
        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os("BANKDATA_CONFIG").map(PathBuf::from));
        let file = match explicit {
            Some(path) => ConfigFile::read(&path)?,
            None => {
                let default_path = default_data_dir().join("config.toml");
                if default_path.exists() {
                    ConfigFile::read(&default_path)?
                } else {
                    ConfigFile::default()
                }
            }
        };
        file.overlay(|name| std::env::var(name).ok()).into_config()
    }

    /// Directory holding persisted state.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir.clone().unwrap_or_else(default_data_dir)
    }

    /// Store key of the token/quota blob for this credential set.
    pub fn client_state_key(&self) -> String {
        format!("bankdata_{}", self.credentials.fingerprint())
    }

    /// Store key of the account cache for this profile.
    pub fn account_cache_key(&self) -> String {
        format!("bankdata_accounts_{}", self.profile)
    }
}

/// On-disk configuration; every field optional so layers can be merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub base_url: Option<String>,
    pub secret_id: Option<SecretValue>,
    pub secret_key: Option<SecretValue>,
    pub profile: Option<String>,
    pub rate_limits: Option<RateLimits>,
    pub intervals: Option<RefreshIntervals>,
    pub request_timeout_secs: Option<u64>,
    pub absent_cycle_limit: Option<u32>,
    pub fetch_transactions: Option<bool>,
    pub data_dir: Option<PathBuf>,
    pub callback_base_url: Option<String>,
    pub reference_prefix: Option<String>,
}

impl ConfigFile {
    pub fn read(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|err| {
            BankDataError::Configuration(format!("cannot read {}: {err}", path.display()))
        })?;
        Self::parse(&raw).map_err(|err| match err {
            BankDataError::Configuration(msg) => {
                BankDataError::Configuration(format!("{}: {msg}", path.display()))
            }
            other => other,
        })
    }

    pub fn parse(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|err| BankDataError::Configuration(err.to_string()))
    }

    /// Apply environment overrides read through `lookup`.
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("BANKDATA_SECRET_ID") {
            self.secret_id = Some(SecretValue::Plain(value));
        }
        if let Some(value) = lookup("BANKDATA_SECRET_KEY") {
            self.secret_key = Some(SecretValue::Plain(value));
        }
        if let Some(value) = lookup("BANKDATA_BASE_URL") {
            self.base_url = Some(value);
        }
        if let Some(value) = lookup("BANKDATA_PROFILE") {
            self.profile = Some(value);
        }
        if let Some(value) = lookup("BANKDATA_DATA_DIR") {
            self.data_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = lookup("BANKDATA_CALLBACK_URL") {
            self.callback_base_url = Some(value);
        }
        self
    }

    pub fn into_config(self) -> Result<BankDataConfig> {
        let secret_id = self
            .secret_id
            .ok_or_else(|| missing("secret_id", "BANKDATA_SECRET_ID"))?
            .resolve()?;
        let secret_key = self
            .secret_key
            .ok_or_else(|| missing("secret_key", "BANKDATA_SECRET_KEY"))?
            .resolve()?;
        if secret_id.trim().is_empty() || secret_key.trim().is_empty() {
            return Err(BankDataError::Configuration(
                "secret_id and secret_key must not be empty".to_string(),
            ));
        }

        Ok(BankDataConfig {
            base_url: self
                .base_url
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            credentials: Credentials::new(secret_id, secret_key),
            profile: self.profile.unwrap_or_else(|| DEFAULT_PROFILE.to_string()),
            rate_limits: self.rate_limits.unwrap_or_default(),
            intervals: self.intervals.unwrap_or_default(),
            request_timeout: Duration::from_secs(
                self.request_timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS).max(1),
            ),
            absent_cycle_limit: self.absent_cycle_limit.unwrap_or(DEFAULT_ABSENT_CYCLE_LIMIT),
            fetch_transactions: self.fetch_transactions.unwrap_or(false),
            data_dir: self.data_dir,
            callback_base_url: self.callback_base_url,
            reference_prefix: self
                .reference_prefix
                .unwrap_or_else(|| DEFAULT_REFERENCE_PREFIX.to_string()),
        })
    }
}

fn missing(field: &str, env_var: &str) -> BankDataError {
    BankDataError::Configuration(format!(
        "missing {field} (set {env_var} or `{field}` in the config file)"
    ))
}

fn default_data_dir() -> PathBuf {
    directories::UserDirs::new()
        .map(|dirs| dirs.home_dir().join(".bankdata"))
        .unwrap_or_else(|| PathBuf::from(".bankdata"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn file_values_are_used() {
        let file = ConfigFile::parse(
            r#"
            secret_id = "id"
            secret_key = "key"
            base_url = "https://sandbox.example/"
            fetch_transactions = true
            absent_cycle_limit = 5

            [rate_limits]
            balances = 2
            "#,
        )
        .unwrap();
        let config = file.into_config().unwrap();
        assert_eq!(config.base_url, "https://sandbox.example");
        assert_eq!(config.rate_limits.balances, 2);
        assert_eq!(config.rate_limits.details, 1);
        assert!(config.fetch_transactions);
        assert_eq!(config.absent_cycle_limit, 5);
    }

    #[test]
    fn environment_overrides_file() {
        let file = ConfigFile::parse("secret_id = \"file-id\"\nsecret_key = \"file-key\"").unwrap();
        let config = file
            .overlay(env(&[("BANKDATA_SECRET_ID", "env-id"), ("BANKDATA_PROFILE", "home")]))
            .into_config()
            .unwrap();
        assert_eq!(config.credentials.secret_id, "env-id");
        assert_eq!(config.credentials.secret_key, "file-key");
        assert_eq!(config.account_cache_key(), "bankdata_accounts_home");
    }

    #[test]
    fn missing_credentials_name_the_variable() {
        let err = ConfigFile::default()
            .overlay(env(&[("BANKDATA_SECRET_ID", "id")]))
            .into_config()
            .unwrap_err();
        assert!(err.to_string().contains("BANKDATA_SECRET_KEY"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(ConfigFile::parse("secret = \"typo\"").is_err());
    }

    #[test]
    fn client_state_key_is_derived_from_secret_id() {
        let a = BankDataConfig::builder()
            .credentials(Credentials::new("same-id", "k1"))
            .build();
        let b = BankDataConfig::builder()
            .credentials(Credentials::new("same-id", "k2"))
            .profile("other")
            .build();
        assert_eq!(a.client_state_key(), b.client_state_key());
        assert_ne!(a.account_cache_key(), b.account_cache_key());
    }
}
