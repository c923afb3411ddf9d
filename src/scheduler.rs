//! Periodic refresh loop.

use std::future::Future;
use std::sync::Arc;

use tokio::time::MissedTickBehavior;

use crate::config::{BankDataConfig, RefreshIntervals};
use crate::error::Result;
use crate::ratelimit::Scope;
use crate::refresh::{RefreshOrchestrator, RefreshSnapshot};

/// What one scheduler tick did.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub snapshot: RefreshSnapshot,
    /// Scopes re-fetched because their data had gone stale.
    pub updated: Vec<(String, Scope)>,
    /// Stale scopes left for later because the local quota was used up.
    pub deferred: usize,
    pub failed: usize,
}

/// Drives an orchestrator on the configured cadences.
///
/// Ticks run one after another; a slow tick delays the next one rather than
/// overlapping it.
#[derive(Debug, Clone)]
pub struct RefreshScheduler {
    orchestrator: Arc<RefreshOrchestrator>,
    intervals: RefreshIntervals,
    fetch_transactions: bool,
}

impl RefreshScheduler {
    pub fn new(orchestrator: Arc<RefreshOrchestrator>, config: &BankDataConfig) -> Self {
        Self {
            orchestrator,
            intervals: config.intervals,
            fetch_transactions: config.fetch_transactions,
        }
    }

    fn scopes(&self) -> Vec<Scope> {
        Scope::ALL
            .into_iter()
            .filter(|scope| *scope != Scope::Transactions || self.fetch_transactions)
            .collect()
    }

    /// One refresh cycle followed by updates of every stale scope.
    pub async fn tick(&self) -> Result<TickReport> {
        let snapshot = self.orchestrator.refresh().await?;
        let now = self.orchestrator.client().context().now();

        let mut stale = Vec::new();
        for record in snapshot.active_accounts() {
            for scope in self.scopes() {
                let due = match record.updated_at(scope) {
                    Some(updated) => now - updated >= self.intervals.for_scope(scope),
                    None => true,
                };
                if due {
                    stale.push((record.id.clone(), scope));
                }
            }
        }

        let mut report = TickReport {
            snapshot,
            updated: Vec::new(),
            deferred: 0,
            failed: 0,
        };
        for (account_id, scope) in stale {
            match self.orchestrator.update_account_scope(&account_id, scope).await {
                Ok(Some(_)) => report.updated.push((account_id, scope)),
                Ok(None) => {}
                Err(err) if err.is_deferral() => report.deferred += 1,
                Err(err) => {
                    tracing::warn!(account_id = %account_id, %scope, error = %err, "Scheduled update failed");
                    report.failed += 1;
                }
            }
        }
        if !report.updated.is_empty() {
            if let Some(latest) = self.orchestrator.last_snapshot().await {
                report.snapshot = latest;
            }
        }
        Ok(report)
    }

    /// Tick until `shutdown` resolves, handing each report to `sink`.
    ///
    /// The first tick runs immediately. Failed ticks are logged and the loop
    /// carries on with the next interval.
    pub async fn run<F, S>(&self, shutdown: F, mut sink: S)
    where
        F: Future<Output = ()>,
        S: FnMut(&TickReport),
    {
        let mut interval = tokio::time::interval(self.intervals.requisitions());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("Refresh scheduler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.tick().await {
                        Ok(report) => sink(&report),
                        Err(err) => tracing::error!(
                            error = %err,
                            category = ?err.category(),
                            "Refresh cycle failed, keeping last known data"
                        ),
                    }
                }
            }
        }
    }
}
