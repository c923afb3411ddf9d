//! Per-credential-set shared state.
//!
//! The token manager and the rate-limit governor both mutate one persisted
//! blob, `{tokens, rate_limits}`. [`ClientContext`] owns that blob: it is
//! loaded lazily on first use, guarded by a single async mutex, and written
//! back through the [`StateStore`] after every mutation.

use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};

use crate::auth::TokenState;
use crate::ratelimit::RateLimitEntry;
use crate::store::{StateStore, StoreError};
use crate::util::Clock;

/// Persisted token and quota state for one credential set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClientState {
    #[serde(default)]
    pub tokens: Option<TokenState>,
    #[serde(default)]
    pub rate_limits: BTreeMap<String, RateLimitEntry>,
}

#[derive(Debug, Default)]
struct LoadedState {
    loaded: bool,
    data: ClientState,
}

/// Shared handle passed (via `Arc`) to every component acting for the same
/// credentials.
pub struct ClientContext {
    store: Arc<dyn StateStore>,
    key: String,
    clock: Arc<dyn Clock>,
    state: Mutex<LoadedState>,
}

impl std::fmt::Debug for ClientContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientContext")
            .field("key", &self.key)
            .field("store", &"..")
            .finish()
    }
}

impl ClientContext {
    pub fn new(store: Arc<dyn StateStore>, key: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            key: key.into(),
            clock,
            state: Mutex::new(LoadedState::default()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Lock the state, loading it from the store on first access.
    pub(crate) async fn lock(&self) -> Result<ContextGuard<'_>, StoreError> {
        let mut guard = self.state.lock().await;
        if !guard.loaded {
            guard.data = self.load_persisted()?;
            guard.loaded = true;
        }
        Ok(ContextGuard {
            guard,
            store: self.store.as_ref(),
            key: &self.key,
        })
    }

    /// Copy of the current state.
    pub async fn snapshot(&self) -> Result<ClientState, StoreError> {
        Ok(self.lock().await?.clone())
    }

    /// Drop all tokens and quota counters, in memory and in the store.
    pub async fn reset(&self) -> Result<(), StoreError> {
        let mut guard = self.state.lock().await;
        self.store.clear(&self.key)?;
        guard.data = ClientState::default();
        guard.loaded = false;
        tracing::info!(key = %self.key, "Cleared stored tokens and rate limits");
        Ok(())
    }

    fn load_persisted(&self) -> Result<ClientState, StoreError> {
        let Some(raw) = self.store.load(&self.key)? else {
            return Ok(ClientState::default());
        };
        match serde_json::from_value::<ClientState>(raw) {
            Ok(state) => {
                tracing::debug!(
                    key = %self.key,
                    has_tokens = state.tokens.is_some(),
                    rate_limit_entries = state.rate_limits.len(),
                    "Loaded client state"
                );
                Ok(state)
            }
            Err(err) => {
                tracing::warn!(key = %self.key, error = %err, "Discarding unreadable client state");
                Ok(ClientState::default())
            }
        }
    }
}

/// Exclusive access to the loaded [`ClientState`].
pub(crate) struct ContextGuard<'a> {
    guard: MutexGuard<'a, LoadedState>,
    store: &'a dyn StateStore,
    key: &'a str,
}

impl ContextGuard<'_> {
    /// Write the current state back to the store.
    pub(crate) fn persist(&self) -> Result<(), StoreError> {
        let value = serde_json::to_value(&self.guard.data)?;
        self.store.save(self.key, &value)
    }
}

impl Deref for ContextGuard<'_> {
    type Target = ClientState;

    fn deref(&self) -> &ClientState {
        &self.guard.data
    }
}

impl DerefMut for ContextGuard<'_> {
    fn deref_mut(&mut self) -> &mut ClientState {
        &mut self.guard.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStateStore;
    use crate::util::SystemClock;
    use serde_json::json;

    fn context(store: Arc<MemoryStateStore>) -> ClientContext {
        ClientContext::new(store, "bankdata_test", Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn state_is_loaded_once_and_persisted_on_demand() {
        let store = Arc::new(MemoryStateStore::new());
        store
            .save(
                "bankdata_test",
                &json!({"tokens": null, "rate_limits": {
                    "details_A1": {"count": 1, "reset_time": "2030-01-01T00:00:00Z"}
                }}),
            )
            .unwrap();
        let ctx = context(store.clone());

        {
            let mut guard = ctx.lock().await.unwrap();
            assert_eq!(guard.rate_limits["details_A1"].count, 1);
            guard.rate_limits.clear();
        }
        // In-memory mutation survives without a reload from the store.
        assert!(ctx.snapshot().await.unwrap().rate_limits.is_empty());

        ctx.lock().await.unwrap().persist().unwrap();
        let saved = store.load("bankdata_test").unwrap().unwrap();
        assert_eq!(saved["rate_limits"], json!({}));
    }

    #[tokio::test]
    async fn unreadable_state_starts_fresh() {
        let store = Arc::new(MemoryStateStore::new());
        store.save("bankdata_test", &json!({"tokens": 42})).unwrap();
        let ctx = context(store);
        assert_eq!(ctx.snapshot().await.unwrap(), ClientState::default());
    }

    #[tokio::test]
    async fn reset_clears_store_and_memory() {
        let store = Arc::new(MemoryStateStore::new());
        let ctx = context(store.clone());
        ctx.lock().await.unwrap().persist().unwrap();
        assert!(!store.is_empty());

        ctx.reset().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(ctx.snapshot().await.unwrap(), ClientState::default());
    }
}
