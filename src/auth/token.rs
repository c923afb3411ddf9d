use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Access tokens are stored as expiring this long before the provider says,
/// and are renewed once they come within this window of expiry.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

pub(crate) const DEFAULT_ACCESS_EXPIRES_SECS: i64 = 86_400;
pub(crate) const DEFAULT_REFRESH_EXPIRES_SECS: i64 = 2_592_000;

/// Persisted token pair.
///
/// The access half is cleared when the provider rejects it, so each field
/// is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenState {
    pub access_token: Option<String>,
    pub access_expiry: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub refresh_expiry: Option<DateTime<Utc>>,
}

impl TokenState {
    /// Access token that will still be valid after the renew-ahead window.
    pub fn usable_access(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.access_token, self.access_expiry) {
            (Some(token), Some(expiry)) if now + Duration::seconds(EXPIRY_MARGIN_SECS) < expiry => {
                Some(token)
            }
            _ => None,
        }
    }

    /// Refresh token that has not expired yet.
    pub fn usable_refresh(&self, now: DateTime<Utc>) -> Option<&str> {
        match (&self.refresh_token, self.refresh_expiry) {
            (Some(token), Some(expiry)) if now < expiry => Some(token),
            _ => None,
        }
    }

    pub(crate) fn from_new(now: DateTime<Utc>, response: NewTokenResponse) -> Self {
        Self {
            access_token: Some(response.access),
            access_expiry: Some(access_expiry(now, response.access_expires)),
            refresh_token: Some(response.refresh),
            refresh_expiry: Some(
                now + Duration::seconds(
                    response
                        .refresh_expires
                        .unwrap_or(DEFAULT_REFRESH_EXPIRES_SECS),
                ),
            ),
        }
    }

    pub(crate) fn apply_refresh(&mut self, now: DateTime<Utc>, response: RefreshTokenResponse) {
        self.access_token = Some(response.access);
        self.access_expiry = Some(access_expiry(now, response.access_expires));
    }

    pub(crate) fn invalidate_access(&mut self) {
        self.access_token = None;
        self.access_expiry = None;
    }
}

fn access_expiry(now: DateTime<Utc>, expires_in: Option<i64>) -> DateTime<Utc> {
    let secs = expires_in.unwrap_or(DEFAULT_ACCESS_EXPIRES_SECS);
    now + Duration::seconds(secs - EXPIRY_MARGIN_SECS)
}

#[derive(Debug, Serialize)]
pub(crate) struct NewTokenRequest<'a> {
    pub secret_id: &'a str,
    pub secret_key: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct RefreshTokenRequest<'a> {
    pub refresh: &'a str,
}

#[derive(Debug, Deserialize)]
pub(crate) struct NewTokenResponse {
    pub access: String,
    pub access_expires: Option<i64>,
    pub refresh: String,
    pub refresh_expires: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RefreshTokenResponse {
    pub access: String,
    pub access_expires: Option<i64>,
}
