//! Client-side daily quota governor.
//!
//! Counters live in the shared [`ClientContext`] blob, keyed
//! `"{scope}_{account_id}"`, each with a rolling 24h window that starts at
//! the first consumption.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::config::RateLimits;
use crate::context::ClientContext;
use crate::error::Result;

/// Length of one quota window.
pub const WINDOW_HOURS: i64 = 24;

/// Account data category with its own daily quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    Details,
    Balances,
    Transactions,
}

impl Scope {
    pub const ALL: [Scope; 3] = [Scope::Details, Scope::Balances, Scope::Transactions];

    /// Quota key for this scope on `account_id`.
    pub fn key(self, account_id: &str) -> String {
        format!("{self}_{account_id}")
    }
}

/// Quota to charge for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quota {
    pub key: String,
    pub max_per_day: u32,
}

impl Quota {
    pub fn new(key: impl Into<String>, max_per_day: u32) -> Self {
        Self {
            key: key.into(),
            max_per_day,
        }
    }

    /// Quota for `scope` on `account_id` under the configured caps.
    pub fn for_account(scope: Scope, account_id: &str, limits: &RateLimits) -> Self {
        Self::new(scope.key(account_id), limits.for_scope(scope))
    }
}

/// Usage within the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub reset_time: DateTime<Utc>,
}

impl RateLimitEntry {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            reset_time: now + Duration::hours(WINDOW_HOURS),
        }
    }

    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_time
    }
}

/// Decides whether a quota-bearing call may proceed.
#[derive(Debug, Clone)]
pub struct RateLimitGovernor {
    context: Arc<ClientContext>,
}

impl RateLimitGovernor {
    pub fn new(context: Arc<ClientContext>) -> Self {
        Self { context }
    }

    /// Consume one unit of `key` if fewer than `max_per_day` were used in the
    /// current window.
    ///
    /// A refusal leaves the table untouched and is not persisted.
    pub async fn try_consume(&self, key: &str, max_per_day: u32) -> Result<bool> {
        let now = self.context.now();
        let mut state = self.context.lock().await?;

        let current = state.rate_limits.get(key).copied();
        let mut entry = match current {
            Some(entry) if !entry.is_expired(now) => entry,
            Some(_) => {
                tracing::debug!(key, "Rate limit window expired, resetting");
                RateLimitEntry::fresh(now)
            }
            None => RateLimitEntry::fresh(now),
        };

        if entry.count >= max_per_day {
            tracing::debug!(
                key,
                count = entry.count,
                max_per_day,
                reset_time = %entry.reset_time,
                "Rate limit reached"
            );
            return Ok(false);
        }

        entry.count += 1;
        state.rate_limits.insert(key.to_string(), entry);
        tracing::debug!(key, count = entry.count, max_per_day, "Consumed rate limit");
        state.persist()?;
        Ok(true)
    }

    /// Mark `key` as used up for the rest of its window.
    ///
    /// Applied when the provider itself refuses a call, so the key is not
    /// tried again until the local window resets.
    pub async fn exhaust(&self, key: &str, max_per_day: u32) -> Result<()> {
        let now = self.context.now();
        let mut state = self.context.lock().await?;
        let entry = state
            .rate_limits
            .entry(key.to_string())
            .or_insert_with(|| RateLimitEntry::fresh(now));
        if entry.is_expired(now) {
            *entry = RateLimitEntry::fresh(now);
        }
        entry.count = entry.count.max(max_per_day);
        tracing::debug!(key, reset_time = %entry.reset_time, "Rate limit exhausted by provider");
        state.persist()?;
        Ok(())
    }

    /// Current entry for `key`, if one was ever created.
    pub async fn entry(&self, key: &str) -> Result<Option<RateLimitEntry>> {
        Ok(self.context.lock().await?.rate_limits.get(key).copied())
    }

    /// Calls still allowed for `key` in the current window.
    pub async fn remaining(&self, key: &str, max_per_day: u32) -> Result<u32> {
        let now = self.context.now();
        let state = self.context.lock().await?;
        let used = match state.rate_limits.get(key) {
            Some(entry) if !entry.is_expired(now) => entry.count,
            _ => 0,
        };
        Ok(max_per_day.saturating_sub(used))
    }

    /// Every tracked entry.
    pub async fn entries(&self) -> Result<BTreeMap<String, RateLimitEntry>> {
        Ok(self.context.lock().await?.rate_limits.clone())
    }

    /// Drop every counter and persist.
    pub async fn reset_all(&self) -> Result<()> {
        let mut state = self.context.lock().await?;
        state.rate_limits.clear();
        state.persist()?;
        Ok(())
    }
}
