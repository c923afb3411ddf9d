//! Quota caps and refresh cadence.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::ratelimit::Scope;

/// Client-side daily caps per account and scope.
///
/// The provider allows a handful of successful calls per account, per scope
/// and per day, and its counters may be shared with other clients of the same
/// credentials. These defaults stay below the published limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimits {
    pub details: u32,
    pub balances: u32,
    pub transactions: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            details: 1,
            balances: 1,
            transactions: 3,
        }
    }
}

impl RateLimits {
    pub fn for_scope(&self, scope: Scope) -> u32 {
        match scope {
            Scope::Details => self.details,
            Scope::Balances => self.balances,
            Scope::Transactions => self.transactions,
        }
    }
}

/// How often each kind of data is refreshed, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefreshIntervals {
    pub requisitions_secs: u64,
    pub details_secs: u64,
    pub balances_secs: u64,
    pub transactions_secs: u64,
}

impl Default for RefreshIntervals {
    fn default() -> Self {
        Self {
            requisitions_secs: 30 * 60,
            details_secs: 24 * 60 * 60,
            balances_secs: 24 * 60 * 60,
            transactions_secs: 8 * 60 * 60,
        }
    }
}

impl RefreshIntervals {
    /// Cadence of full refresh cycles.
    pub fn requisitions(&self) -> Duration {
        Duration::from_secs(self.requisitions_secs.max(1))
    }

    /// Minimum age of a scope's data before it is re-fetched.
    pub fn for_scope(&self, scope: Scope) -> chrono::Duration {
        let secs = match scope {
            Scope::Details => self.details_secs,
            Scope::Balances => self.balances_secs,
            Scope::Transactions => self.transactions_secs,
        };
        let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1_000);
        chrono::Duration::seconds(secs)
    }
}
