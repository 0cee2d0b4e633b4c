//! CLI module for Cadence
//!
//! Provides commands:
//! - `run`: Start the scheduler daemon
//! - `validate`: Check the configuration and print the job table

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Cadence task scheduler CLI
#[derive(Parser, Debug)]
#[command(name = "cadence")]
#[command(about = "Unified task scheduler: time, event and predicate triggered jobs")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the scheduler daemon
    Run {
        /// Extra configuration file, applied over the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Do not read event notifications from stdin
        #[arg(long)]
        no_stdin: bool,
    },
    /// Parse the configuration and print the configured jobs
    Validate {
        /// Extra configuration file, applied over the defaults
        #[arg(short, long)]
        config: Option<PathBuf>,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Run { config, no_stdin }) => {
            crate::daemon::run(config.as_deref(), !no_stdin).await
        }
        Some(Commands::Validate { config }) => crate::daemon::validate(config.as_deref()),
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
