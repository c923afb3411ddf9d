//! CLI command handlers.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::BankDataClient;
use crate::callback::{CallbackServer, FlowResumer, PendingFlows};
use crate::config::BankDataConfig;
use crate::error::{BankDataError, Result};
use crate::link::{LinkState, LinkWizard};
use crate::ratelimit::Scope;
use crate::refresh::{RefreshOrchestrator, RefreshSnapshot};
use crate::scheduler::{RefreshScheduler, TickReport};
use crate::sensors;
use crate::store::{FileStateStore, StateStore};

use super::{AuthCommands, InstitutionsArgs, LinkArgs, RequisitionsArgs, SensorsArgs};

/// Configuration plus the client and store built from it.
pub struct App {
    pub config: BankDataConfig,
    pub store: Arc<dyn StateStore>,
    pub client: BankDataClient,
}

impl App {
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        let config = BankDataConfig::load(config_path)?;
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(config.data_dir()));
        let client = BankDataClient::new(&config, store.clone())?;
        Ok(Self {
            config,
            store,
            client,
        })
    }

    fn orchestrator(&self) -> RefreshOrchestrator {
        RefreshOrchestrator::new(self.client.clone(), self.store.clone(), &self.config)
    }
}

/// Handle `bankdata auth status|reset`.
pub async fn handle_auth(app: &App, command: &AuthCommands) -> Result<()> {
    match command {
        AuthCommands::Status => auth_status(app).await,
        AuthCommands::Reset => {
            app.client.context().reset().await?;
            println!("Cleared stored tokens and rate limits");
            Ok(())
        }
    }
}

async fn auth_status(app: &App) -> Result<()> {
    let now = app.client.context().now();
    match app.client.tokens().tokens().await? {
        Some(tokens) => {
            let access = match tokens.usable_access(now) {
                Some(_) => format!("valid until {}", fmt_time(tokens.access_expiry)),
                None => "expired".to_string(),
            };
            let refresh = match tokens.usable_refresh(now) {
                Some(_) => format!("valid until {}", fmt_time(tokens.refresh_expiry)),
                None => "expired".to_string(),
            };
            println!("Access token:  {access}");
            println!("Refresh token: {refresh}");
        }
        None => println!("No stored tokens"),
    }

    let entries = app.client.governor().entries().await?;
    if entries.is_empty() {
        println!("No rate limit usage recorded");
        return Ok(());
    }
    println!("Rate limits:");
    for (key, entry) in entries {
        let max = key
            .split_once('_')
            .and_then(|(scope, _)| scope.parse::<Scope>().ok())
            .map(|scope| app.config.rate_limits.for_scope(scope));
        let cap = max.map(|m| m.to_string()).unwrap_or_else(|| "?".to_string());
        let state = if entry.reset_time <= now {
            "window expired".to_string()
        } else {
            format!("resets {}", entry.reset_time.format("%Y-%m-%d %H:%M UTC"))
        };
        println!("  {key}: {}/{cap} ({state})", entry.count);
    }
    Ok(())
}

/// Handle `bankdata institutions --country CC`.
pub async fn handle_institutions(app: &App, args: &InstitutionsArgs) -> Result<()> {
    let institutions = app.client.list_institutions(&args.country).await?;
    if institutions.is_empty() {
        println!("No institutions found for {}", args.country);
    }
    for institution in institutions {
        let days = institution
            .transaction_total_days
            .map(|d| format!(" ({d} days history)"))
            .unwrap_or_default();
        println!("{}  {}{days}", institution.id, institution.name);
    }
    Ok(())
}

/// Handle `bankdata link`.
pub async fn handle_link(app: &App, args: &LinkArgs) -> Result<()> {
    let flows = Arc::new(PendingFlows::new());
    let server = match args.listen {
        Some(addr) => {
            let resumer: Arc<dyn FlowResumer> = flows.clone();
            Some(CallbackServer::start(addr, resumer).await?)
        }
        None => None,
    };

    let mut wizard = LinkWizard::new(app.client.clone(), &app.config);
    if app.config.callback_base_url.is_none() {
        if let Some(server) = &server {
            wizard = wizard.with_callback_base_url(server.base_url());
        }
    }
    let redirect = flows.register(wizard.flow_id());

    wizard.select_country(&args.country).await.map_err(step_error)?;
    let state = wizard
        .select_institution(&args.institution)
        .await
        .map_err(step_error)?;
    if let LinkState::Aborted(reason) = state {
        return Err(BankDataError::Configuration(format!(
            "link aborted: {reason} (set callback_base_url or pass --listen)"
        )));
    }

    let link = wizard.authorization_link().unwrap_or_default().to_string();
    println!("Open this link to authorize access at your bank:");
    println!("  {link}");

    if server.is_some() {
        println!("Waiting for the bank to redirect back...");
        match tokio::time::timeout(Duration::from_secs(args.timeout), redirect).await {
            Ok(Ok(query)) => {
                if let Some(error) = query.error {
                    tracing::warn!(%error, details = ?query.details, "Provider reported an error");
                }
            }
            Ok(Err(_)) => {
                return Err(BankDataError::InvalidState("callback flow was cancelled".into()));
            }
            Err(_) => {
                flows.cancel(wizard.flow_id());
                return Err(BankDataError::Timeout(args.timeout.saturating_mul(1000)));
            }
        }
    } else {
        println!("Press Enter once you have finished at the bank.");
        let mut line = String::new();
        BufReader::new(tokio::io::stdin())
            .read_line(&mut line)
            .await
            .map_err(|err| BankDataError::InvalidState(format!("cannot read stdin: {err}")))?;
    }

    let outcome = wizard.complete().await.map_err(step_error)?;
    let result = match outcome {
        LinkState::Done {
            requisition_id,
            accounts,
        } => {
            println!(
                "Linked requisition {requisition_id} with {} account(s)",
                accounts.len()
            );
            Ok(())
        }
        LinkState::Aborted(reason) => Err(BankDataError::InvalidState(format!(
            "link aborted: {reason}"
        ))),
        other => Err(BankDataError::InvalidState(format!(
            "link ended in state {}",
            other.name()
        ))),
    };

    if let Some(server) = server {
        server.shutdown().await?;
    }
    result
}

/// Handle `bankdata refresh`.
pub async fn handle_refresh(app: &App) -> Result<()> {
    let snapshot = app.orchestrator().refresh().await?;
    print_summary(&snapshot);
    Ok(())
}

/// Handle `bankdata watch`.
pub async fn handle_watch(app: &App) -> Result<()> {
    let scheduler = RefreshScheduler::new(Arc::new(app.orchestrator()), &app.config);
    println!(
        "Refreshing every {}s, Ctrl-C to stop",
        app.config.intervals.requisitions().as_secs()
    );
    scheduler
        .run(
            async {
                let _ = tokio::signal::ctrl_c().await;
            },
            |report: &TickReport| {
                print_summary(&report.snapshot);
                if !report.updated.is_empty() || report.deferred > 0 || report.failed > 0 {
                    println!(
                        "  updated {} scope(s), deferred {}, failed {}",
                        report.updated.len(),
                        report.deferred,
                        report.failed
                    );
                }
            },
        )
        .await;
    Ok(())
}

/// Handle `bankdata sensors`.
pub async fn handle_sensors(app: &App, args: &SensorsArgs) -> Result<()> {
    let orchestrator = app.orchestrator();
    let snapshot = if args.refresh {
        orchestrator.refresh().await?
    } else {
        orchestrator.cached_snapshot()?
    };
    let readings = sensors::readings(&snapshot);
    println!("{}", serde_json::to_string_pretty(&readings)?);
    Ok(())
}

/// Handle `bankdata requisitions [--delete ID]`.
pub async fn handle_requisitions(app: &App, args: &RequisitionsArgs) -> Result<()> {
    if let Some(id) = &args.delete {
        app.client.delete_requisition(id).await?;
        println!("Deleted requisition {id}");
        return Ok(());
    }
    let requisitions = app.client.list_requisitions().await?;
    if requisitions.is_empty() {
        println!("No requisitions");
    }
    for req in requisitions {
        println!(
            "{}  {}  {}  {} account(s)",
            req.id,
            req.status,
            req.institution_id,
            req.accounts.len()
        );
    }
    Ok(())
}

fn print_summary(snapshot: &RefreshSnapshot) {
    println!(
        "Refreshed at {}: {} account(s)",
        snapshot.refreshed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        snapshot.accounts.len()
    );
    for record in snapshot.accounts.values() {
        let balance = sensors::balance_reading(snapshot, record);
        let amount = match (balance.amount, balance.currency.as_deref()) {
            (Some(amount), Some(currency)) => format!("{amount:.2} {currency}"),
            (Some(amount), None) => format!("{amount:.2}"),
            _ => sensors::NOT_LOADED.to_string(),
        };
        let marker = if record.is_active() { "" } else { " (not linked)" };
        println!("  {}: {amount}{marker}", balance.name.trim_end_matches(" Balance"));
    }
}

fn fmt_time(at: Option<chrono::DateTime<chrono::Utc>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M UTC").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn step_error(err: crate::link::StepError) -> BankDataError {
    BankDataError::InvalidState(err.to_string())
}
