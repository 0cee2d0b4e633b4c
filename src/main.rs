//! Cadence - Unified Task Scheduler
//!
//! CLI entry point for the Cadence daemon.

#![forbid(unsafe_code)]

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;
mod daemon;

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cadence=info,cadence_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = cli::Cli::parse();

    if matches!(cli.command, Some(cli::Commands::Run { .. })) {
        info!("Starting Cadence scheduler v{}", env!("CARGO_PKG_VERSION"));
    }

    cli::run(cli).await
}
