use thiserror::Error;

use crate::error::BankDataError;
use crate::store::StoreError;

/// Failures while obtaining a usable access token.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid credentials (status {status})")]
    InvalidCredentials { status: u16 },
    #[error("Expired or invalid grant")]
    ExpiredOrInvalidGrant,
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("Token request timed out")]
    Timeout,
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl From<reqwest::Error> for AuthError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            return Self::Timeout;
        }
        if error.is_decode() {
            return Self::InvalidResponse(error.to_string());
        }
        Self::Network(error.to_string())
    }
}

impl From<AuthError> for BankDataError {
    fn from(error: AuthError) -> Self {
        match error {
            AuthError::Storage(inner) => inner.into(),
            other => BankDataError::Authentication(other.to_string()),
        }
    }
}
