//! bankdata: GoCardless Bank Account Data client core.
//!
//! Exposes bank-account balances and details behind a rate-limited API
//! access layer. Token state and per-account daily quotas are persisted
//! through a pluggable [`store::StateStore`], and the
//! [`refresh::RefreshOrchestrator`] merges fresh provider data into a cached
//! account view without ever discarding data it already holds.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use bankdata::prelude::*;
//!
//! # async fn example() -> bankdata::error::Result<()> {
//! let config = BankDataConfig::load(None)?;
//! let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(config.data_dir()));
//! let client = BankDataClient::new(&config, store.clone())?;
//! let orchestrator = RefreshOrchestrator::new(client, store, &config);
//! let snapshot = orchestrator.refresh().await?;
//! println!("{} linked accounts", snapshot.accounts.len());
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod callback;
pub mod config;
pub mod context;
pub mod error;
pub mod link;
pub mod prelude;
pub mod ratelimit;
pub mod refresh;
pub mod scheduler;
pub mod sensors;
pub mod store;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
