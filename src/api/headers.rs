//! Provider-reported rate-limit headers.
//!
//! The provider reports its own counters on every response. They are
//! informational: local quota decisions never read them.

use reqwest::header::HeaderMap;

/// Below this limit the account-success counters describe a real bank
/// account rather than a sandbox one.
const REAL_ACCOUNT_LIMIT_THRESHOLD: u64 = 50;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderRateLimits {
    pub limit: Option<u64>,
    pub remaining: Option<u64>,
    pub reset_secs: Option<u64>,
    pub account_success_limit: Option<u64>,
    pub account_success_remaining: Option<u64>,
    pub account_success_reset_secs: Option<u64>,
}

impl ProviderRateLimits {
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            limit: read(headers, "X_RATELIMIT_LIMIT"),
            remaining: read(headers, "X_RATELIMIT_REMAINING"),
            reset_secs: read(headers, "X_RATELIMIT_RESET"),
            account_success_limit: read(headers, "X_RATELIMIT_ACCOUNT_SUCCESS_LIMIT"),
            account_success_remaining: read(headers, "X_RATELIMIT_ACCOUNT_SUCCESS_REMAINING"),
            account_success_reset_secs: read(headers, "X_RATELIMIT_ACCOUNT_SUCCESS_RESET"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// True when a real account has at most one successful call left.
    pub fn account_nearly_exhausted(&self) -> bool {
        matches!(
            (self.account_success_limit, self.account_success_remaining),
            (Some(limit), Some(remaining)) if limit < REAL_ACCOUNT_LIMIT_THRESHOLD && remaining <= 1
        )
    }

    pub fn log(&self, path: &str) {
        if self.is_empty() {
            return;
        }
        if self.account_nearly_exhausted() {
            tracing::warn!(
                path,
                remaining = ?self.account_success_remaining,
                limit = ?self.account_success_limit,
                reset_secs = ?self.account_success_reset_secs,
                "Provider account quota nearly exhausted"
            );
        } else {
            tracing::debug!(
                path,
                limit = ?self.limit,
                remaining = ?self.remaining,
                reset_secs = ?self.reset_secs,
                account_limit = ?self.account_success_limit,
                account_remaining = ?self.account_success_remaining,
                "Provider rate limits"
            );
        }
    }
}

fn read(headers: &HeaderMap, name: &str) -> Option<u64> {
    let prefixed = format!("HTTP_{name}");
    let value = headers.get(prefixed.as_str()).or_else(|| headers.get(name))?;
    value.to_str().ok()?.trim().parse().ok()
}
