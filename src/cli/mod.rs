//! Command-line interface for bankdata.

pub mod commands;
pub mod errors;

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// GoCardless Bank Account Data client
#[derive(Parser, Debug)]
#[command(name = "bankdata", version, about = "Rate-limited bank account data client")]
pub struct Cli {
    /// Config file (defaults to $BANKDATA_CONFIG or ~/.bankdata/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Token management
    Auth(AuthArgs),
    /// List institutions in a country
    Institutions(InstitutionsArgs),
    /// Link a bank account
    Link(LinkArgs),
    /// Run one refresh cycle
    Refresh,
    /// Refresh on a schedule until interrupted
    Watch,
    /// Print balance and details readings
    Sensors(SensorsArgs),
    /// List or delete requisitions
    Requisitions(RequisitionsArgs),
}

/// Arguments for the `auth` subcommand group.
#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Show token validity and quota usage
    Status,
    /// Forget stored tokens and quota counters
    Reset,
}

#[derive(Parser, Debug)]
pub struct InstitutionsArgs {
    /// ISO 3166 alpha-2 country code
    #[arg(long)]
    pub country: String,
}

#[derive(Parser, Debug)]
pub struct LinkArgs {
    /// ISO 3166 alpha-2 country code
    #[arg(long)]
    pub country: String,

    /// Institution id, as listed by `bankdata institutions`
    #[arg(long)]
    pub institution: String,

    /// Serve the callback endpoint on this address and wait for the redirect
    #[arg(long)]
    pub listen: Option<SocketAddr>,

    /// Seconds to wait for the bank redirect
    #[arg(long, default_value_t = 600)]
    pub timeout: u64,
}

#[derive(Parser, Debug)]
pub struct SensorsArgs {
    /// Run a refresh cycle first instead of reading the cache
    #[arg(long)]
    pub refresh: bool,
}

#[derive(Parser, Debug)]
pub struct RequisitionsArgs {
    /// Delete the requisition with this id
    #[arg(long)]
    pub delete: Option<String>,
}
