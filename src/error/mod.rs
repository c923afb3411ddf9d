//! Error types for bankdata.

pub mod unified;

pub use unified::{ErrorCategory, RecoverySuggestion};

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Primary error type for all bankdata operations.
#[derive(Error, Debug)]
pub enum BankDataError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Local daily quota refusal. No request was sent.
    #[error("Rate limit exceeded for {key} (resets at {reset_at})")]
    RateLimitExceeded { key: String, reset_at: DateTime<Utc> },

    #[error("HTTP error (status {status}): {message}")]
    Http { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0}ms")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Refresh failed: {source}")]
    RefreshFailed {
        #[source]
        source: Box<BankDataError>,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),
}

impl BankDataError {
    /// Create an HTTP status error.
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        Self::Http {
            status,
            message: message.into(),
        }
    }

    /// Wrap an error as the abort reason of a refresh cycle.
    ///
    /// Already-wrapped errors are passed through unchanged.
    pub fn refresh_failed(source: BankDataError) -> Self {
        match source {
            wrapped @ Self::RefreshFailed { .. } => wrapped,
            other => Self::RefreshFailed {
                source: Box::new(other),
            },
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(*status),
            Self::RefreshFailed { source } => source.status(),
            _ => None,
        }
    }

    /// Whether this is a local quota refusal that should simply be deferred
    /// to the next cycle.
    pub fn is_deferral(&self) -> bool {
        matches!(self, Self::RateLimitExceeded { .. })
    }

    /// Classify this error into a category.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Authentication(_) => ErrorCategory::Authentication,
            Self::RateLimitExceeded { .. } => ErrorCategory::RateLimit,
            Self::Network(_) => ErrorCategory::Network,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::Configuration(_) => ErrorCategory::Configuration,
            Self::Storage(_) | Self::Serialization(_) => ErrorCategory::Storage,
            Self::Http { status, .. } => match status {
                401 | 403 => ErrorCategory::Authentication,
                429 => ErrorCategory::RateLimit,
                500..=599 => ErrorCategory::Server,
                _ => ErrorCategory::Api,
            },
            Self::InvalidResponse(_) => ErrorCategory::Api,
            Self::RefreshFailed { source } => source.category(),
            Self::InvalidState(_) => ErrorCategory::Unknown,
        }
    }

    /// Suggest recovery actions.
    pub fn recovery_suggestion(&self) -> RecoverySuggestion {
        match self.category() {
            ErrorCategory::Authentication => RecoverySuggestion::CheckCredentials,
            ErrorCategory::RateLimit => RecoverySuggestion::WaitForQuotaReset,
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Server => {
                RecoverySuggestion::RetryLater
            }
            ErrorCategory::Configuration => RecoverySuggestion::CheckConfiguration,
            ErrorCategory::Storage => RecoverySuggestion::CheckStorage,
            _ => RecoverySuggestion::ContactSupport,
        }
    }
}

impl From<reqwest::Error> for BankDataError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return Self::http(status.as_u16(), error.to_string());
        }
        Self::Network(error.to_string())
    }
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, BankDataError>;
