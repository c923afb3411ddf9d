//! bankdata CLI binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use bankdata::cli::commands::{self, App};
use bankdata::cli::errors::format_error_help;
use bankdata::cli::{Cli, Commands};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // --verbose forces debug for this crate, otherwise RUST_LOG or info.
    let filter = if cli.verbose {
        EnvFilter::new("bankdata=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("bankdata=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match App::load(cli.config.as_deref()) {
        Ok(app) => match &cli.command {
            Commands::Auth(args) => commands::handle_auth(&app, &args.command).await,
            Commands::Institutions(args) => commands::handle_institutions(&app, args).await,
            Commands::Link(args) => commands::handle_link(&app, args).await,
            Commands::Refresh => commands::handle_refresh(&app).await,
            Commands::Watch => commands::handle_watch(&app).await,
            Commands::Sensors(args) => commands::handle_sensors(&app, args).await,
            Commands::Requisitions(args) => commands::handle_requisitions(&app, args).await,
        },
        Err(err) => Err(err),
    };

    if let Err(err) = result {
        eprintln!("Error: {}", format_error_help(&err));
        std::process::exit(1);
    }
}
