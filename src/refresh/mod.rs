//! Incremental account refresh.
//!
//! A cycle reconciles the cached account records with the currently linked
//! requisitions and backfills data that was never fetched. Data already held
//! is never thrown away: a cycle that cannot fetch something (quota, upstream
//! failure) keeps the previous value.

mod record;

pub use record::{AccountCache, AccountRecord, RefreshSnapshot};

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::join_all;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::api::{BankDataClient, Requisition};
use crate::config::BankDataConfig;
use crate::error::{BankDataError, Result};
use crate::ratelimit::Scope;
use crate::store::StateStore;

/// Runs refresh cycles for one profile.
pub struct RefreshOrchestrator {
    client: BankDataClient,
    store: Arc<dyn StateStore>,
    cache_key: String,
    absent_cycle_limit: u32,
    last: Mutex<Option<RefreshSnapshot>>,
}

impl std::fmt::Debug for RefreshOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshOrchestrator")
            .field("cache_key", &self.cache_key)
            .field("absent_cycle_limit", &self.absent_cycle_limit)
            .finish()
    }
}

impl RefreshOrchestrator {
    pub fn new(client: BankDataClient, store: Arc<dyn StateStore>, config: &BankDataConfig) -> Self {
        Self {
            client,
            store,
            cache_key: config.account_cache_key(),
            absent_cycle_limit: config.absent_cycle_limit,
            last: Mutex::new(None),
        }
    }

    pub fn client(&self) -> &BankDataClient {
        &self.client
    }

    /// Snapshot of the last successful cycle.
    pub async fn last_snapshot(&self) -> Option<RefreshSnapshot> {
        self.last.lock().await.clone()
    }

    /// View of the persisted cache, without contacting the provider.
    /// Requisitions are not cached, so the list is empty.
    pub fn cached_snapshot(&self) -> Result<RefreshSnapshot> {
        let cache = self.load_cache()?;
        Ok(RefreshSnapshot {
            requisitions: Vec::new(),
            accounts: cache.accounts,
            institution_names: cache.institution_names,
            refreshed_at: cache.saved_at.unwrap_or_else(|| self.client.context().now()),
        })
    }

    /// Run one refresh cycle.
    ///
    /// Fails with [`BankDataError::RefreshFailed`] when the cache or the
    /// requisition list cannot be read, or when authentication breaks down
    /// mid-cycle (after saving what was fetched so far). Per-account fetch
    /// failures are logged and do not fail the cycle.
    pub async fn refresh(&self) -> Result<RefreshSnapshot> {
        // Holding the lock for the whole cycle keeps cycles and single-scope
        // updates from interleaving their cache writes.
        let mut last = self.last.lock().await;

        let mut cache = self.load_cache().map_err(BankDataError::refresh_failed)?;
        let requisitions = self
            .client
            .list_requisitions()
            .await
            .map_err(BankDataError::refresh_failed)?;

        let linked: Vec<&Requisition> = requisitions
            .iter()
            .filter(|req| req.status.is_linked())
            .collect();
        tracing::debug!(
            total = requisitions.len(),
            linked = linked.len(),
            "Reconciling accounts"
        );

        cache.accounts = self.merge_accounts(&linked, std::mem::take(&mut cache.accounts));
        self.resolve_institution_names(&mut cache).await;
        let aborted = self.backfill(&mut cache).await;

        let now = self.client.context().now();
        cache.saved_at = Some(now);
        self.save_cache(&cache).map_err(BankDataError::refresh_failed)?;
        if let Some(err) = aborted {
            return Err(BankDataError::refresh_failed(err));
        }

        let snapshot = RefreshSnapshot {
            requisitions,
            accounts: cache.accounts,
            institution_names: cache.institution_names,
            refreshed_at: now,
        };
        tracing::info!(
            accounts = snapshot.accounts.len(),
            active = snapshot.active_accounts().count(),
            "Refresh cycle complete"
        );
        *last = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Re-fetch one scope of one cached account.
    ///
    /// Returns the stored payload, or `None` when the provider returned
    /// nothing (the cached value is then kept).
    pub async fn update_account_scope(&self, account_id: &str, scope: Scope) -> Result<Option<Value>> {
        let mut last = self.last.lock().await;
        let mut cache = self.load_cache()?;
        if !cache.accounts.contains_key(account_id) {
            return Err(BankDataError::InvalidState(format!(
                "unknown account {account_id}"
            )));
        }

        let value = self.client.account_scope(account_id, scope).await?;
        let now = self.client.context().now();
        let Some(record) = cache.accounts.get_mut(account_id) else {
            return Ok(None);
        };
        if !record.set_scope(scope, value.clone(), now) {
            tracing::debug!(account_id, %scope, "Provider returned no data, keeping cached value");
            return Ok(None);
        }
        let updated = record.clone();
        cache.saved_at = Some(now);
        self.save_cache(&cache)?;

        if let Some(snapshot) = last.as_mut() {
            snapshot.accounts.insert(account_id.to_string(), updated);
        }
        tracing::info!(account_id, %scope, "Updated account data");
        Ok(Some(value))
    }

    fn merge_accounts(
        &self,
        linked: &[&Requisition],
        mut cached: BTreeMap<String, AccountRecord>,
    ) -> BTreeMap<String, AccountRecord> {
        let mut merged = BTreeMap::new();
        for requisition in linked {
            for account_id in &requisition.accounts {
                if merged.contains_key(account_id) {
                    continue;
                }
                let record = match cached.remove(account_id) {
                    Some(mut record) => {
                        record.relink(requisition);
                        record
                    }
                    None => {
                        tracing::info!(
                            account_id = %account_id,
                            requisition_id = %requisition.id,
                            "Discovered new account"
                        );
                        AccountRecord::new(
                            account_id.clone(),
                            requisition.id.clone(),
                            requisition.institution_id.clone(),
                        )
                    }
                };
                merged.insert(account_id.clone(), record);
            }
        }

        for (account_id, mut record) in cached {
            record.missed_cycles = record.missed_cycles.saturating_add(1);
            if record.missed_cycles >= self.absent_cycle_limit {
                tracing::info!(
                    account_id = %account_id,
                    missed_cycles = record.missed_cycles,
                    "Purging account no longer linked"
                );
            } else {
                tracing::debug!(
                    account_id = %account_id,
                    missed_cycles = record.missed_cycles,
                    "Account missing from linked requisitions, retaining"
                );
                merged.insert(account_id, record);
            }
        }
        merged
    }

    async fn resolve_institution_names(&self, cache: &mut AccountCache) {
        let unresolved: BTreeSet<String> = cache
            .accounts
            .values()
            .filter(|record| record.is_active() && !record.institution_id.is_empty())
            .map(|record| record.institution_id.clone())
            .filter(|id| !cache.institution_names.contains_key(id))
            .collect();

        for institution_id in unresolved {
            match self.client.get_institution(&institution_id).await {
                Ok(institution) => {
                    tracing::debug!(
                        institution_id = %institution_id,
                        name = %institution.name,
                        "Resolved institution name"
                    );
                    cache.institution_names.insert(institution_id, institution.name);
                }
                Err(err) => {
                    tracing::warn!(
                        institution_id = %institution_id,
                        error = %err,
                        "Could not resolve institution name"
                    );
                }
            }
        }
    }

    /// Fetch never-loaded details and balances for active accounts.
    ///
    /// Accounts are fetched concurrently. Each stored field is written to the
    /// store as soon as it arrives, since its quota is already spent.
    /// Returns the authentication error that should abort the cycle, if any.
    async fn backfill(&self, cache: &mut AccountCache) -> Option<BankDataError> {
        let pending: Vec<(String, Vec<Scope>)> = cache
            .accounts
            .values()
            .filter(|record| record.is_active())
            .map(|record| (record.id.clone(), record.missing_initial_scopes()))
            .filter(|(_, scopes)| !scopes.is_empty())
            .collect();
        if pending.is_empty() {
            return None;
        }
        tracing::debug!(accounts = pending.len(), "Backfilling account data");

        let shared = Mutex::new(std::mem::take(cache));
        let fetches = pending
            .into_iter()
            .map(|(account_id, scopes)| self.backfill_account(&shared, account_id, scopes));
        let aborted = join_all(fetches).await.into_iter().flatten().next();
        *cache = shared.into_inner();
        aborted
    }

    /// Fetch `scopes` for one account in order, stopping early if the
    /// credentials stop working.
    async fn backfill_account(
        &self,
        shared: &Mutex<AccountCache>,
        account_id: String,
        scopes: Vec<Scope>,
    ) -> Option<BankDataError> {
        for scope in scopes {
            match self.client.account_scope(&account_id, scope).await {
                Ok(value) => self.store_field(shared, &account_id, scope, value).await,
                Err(err) if err.is_deferral() => {}
                Err(err @ BankDataError::Authentication(_)) => return Some(err),
                Err(err) => {
                    tracing::warn!(
                        account_id = %account_id,
                        %scope,
                        error = %err,
                        "Account fetch failed, keeping cached data"
                    );
                }
            }
        }
        None
    }

    async fn store_field(
        &self,
        shared: &Mutex<AccountCache>,
        account_id: &str,
        scope: Scope,
        value: Value,
    ) {
        let now = self.client.context().now();
        let mut cache = shared.lock().await;
        let Some(record) = cache.accounts.get_mut(account_id) else {
            return;
        };
        if !record.set_scope(scope, value, now) {
            return;
        }
        cache.saved_at = Some(now);
        if let Err(err) = self.save_cache(&cache) {
            tracing::warn!(account_id, %scope, error = %err, "Could not persist fetched account data");
        }
    }

    fn load_cache(&self) -> Result<AccountCache> {
        let Some(raw) = self.store.load(&self.cache_key)? else {
            return Ok(AccountCache::default());
        };
        match serde_json::from_value(raw) {
            Ok(cache) => Ok(cache),
            Err(err) => {
                tracing::warn!(key = %self.cache_key, error = %err, "Discarding unreadable account cache");
                Ok(AccountCache::default())
            }
        }
    }

    fn save_cache(&self, cache: &AccountCache) -> Result<()> {
        let value = serde_json::to_value(cache)?;
        self.store.save(&self.cache_key, &value)?;
        Ok(())
    }
}
