//! dockfix - Main entry point.

mod cli;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, resolve_settings, run_check_command, run_fixture_command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let settings = resolve_settings(&cli)?;
    tracing::debug!("Using engine endpoint {}", settings.endpoint);

    match cli.command {
        Command::Run(args) => run_fixture_command(args, &settings).await,
        Command::Check => run_check_command(&settings).await,
    }
}
