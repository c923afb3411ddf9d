use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::Requisition;
use crate::ratelimit::Scope;

/// Cached data for one bank account.
///
/// Scope payloads are the provider's raw JSON. A populated payload is only
/// ever replaced by a newer populated one.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    pub id: String,
    #[serde(default)]
    pub requisition_id: String,
    #[serde(default)]
    pub institution_id: String,
    #[serde(default)]
    pub details: Option<Value>,
    #[serde(default)]
    pub balances: Option<Value>,
    #[serde(default)]
    pub transactions: Option<Value>,
    #[serde(default)]
    pub details_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub balances_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub transactions_updated: Option<DateTime<Utc>>,
    /// Consecutive cycles in which no linked requisition listed this account.
    #[serde(default)]
    pub missed_cycles: u32,
}

impl AccountRecord {
    pub fn new(
        id: impl Into<String>,
        requisition_id: impl Into<String>,
        institution_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            requisition_id: requisition_id.into(),
            institution_id: institution_id.into(),
            ..Self::default()
        }
    }

    /// Listed under a linked requisition in the latest cycle.
    pub fn is_active(&self) -> bool {
        self.missed_cycles == 0
    }

    pub fn scope(&self, scope: Scope) -> Option<&Value> {
        match scope {
            Scope::Details => self.details.as_ref(),
            Scope::Balances => self.balances.as_ref(),
            Scope::Transactions => self.transactions.as_ref(),
        }
    }

    pub fn updated_at(&self, scope: Scope) -> Option<DateTime<Utc>> {
        match scope {
            Scope::Details => self.details_updated,
            Scope::Balances => self.balances_updated,
            Scope::Transactions => self.transactions_updated,
        }
    }

    /// Store a freshly fetched payload. Returns false, leaving the record
    /// untouched, when the payload is empty.
    pub fn set_scope(&mut self, scope: Scope, value: Value, now: DateTime<Utc>) -> bool {
        if is_empty_payload(&value) {
            return false;
        }
        let (slot, updated) = match scope {
            Scope::Details => (&mut self.details, &mut self.details_updated),
            Scope::Balances => (&mut self.balances, &mut self.balances_updated),
            Scope::Transactions => (&mut self.transactions, &mut self.transactions_updated),
        };
        *slot = Some(value);
        *updated = Some(now);
        true
    }

    /// Scopes the initial backfill should still fetch.
    pub fn missing_initial_scopes(&self) -> Vec<Scope> {
        [Scope::Details, Scope::Balances]
            .into_iter()
            .filter(|scope| self.scope(*scope).is_none())
            .collect()
    }

    /// Take over requisition metadata from the current cycle.
    pub(crate) fn relink(&mut self, requisition: &Requisition) {
        self.requisition_id = requisition.id.clone();
        self.institution_id = requisition.institution_id.clone();
        self.missed_cycles = 0;
    }
}

fn is_empty_payload(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

/// Persisted account cache for one profile.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AccountCache {
    #[serde(default)]
    pub accounts: BTreeMap<String, AccountRecord>,
    #[serde(default)]
    pub institution_names: BTreeMap<String, String>,
    #[serde(default)]
    pub saved_at: Option<DateTime<Utc>>,
}

/// Result of one refresh cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshSnapshot {
    pub requisitions: Vec<Requisition>,
    pub accounts: BTreeMap<String, AccountRecord>,
    pub institution_names: BTreeMap<String, String>,
    pub refreshed_at: DateTime<Utc>,
}

impl RefreshSnapshot {
    pub fn institution_name(&self, institution_id: &str) -> Option<&str> {
        self.institution_names.get(institution_id).map(String::as_str)
    }

    pub fn active_accounts(&self) -> impl Iterator<Item = &AccountRecord> {
        self.accounts.values().filter(|record| record.is_active())
    }
}
