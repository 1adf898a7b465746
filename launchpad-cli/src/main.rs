//! Launchpad CLI
//!
//! Command-line interface for triggering and following deployments on the
//! Launchpad orchestrator.

mod commands;
mod config;
mod display;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::Config;

#[derive(Parser)]
#[command(name = "launchpad")]
#[command(about = "Launchpad deployment pipeline CLI", long_about = None)]
struct Cli {
    /// Orchestrator URL
    #[arg(
        long,
        env = "LAUNCHPAD_ORCHESTRATOR_URL",
        default_value = "http://localhost:8000"
    )]
    orchestrator_url: String,

    /// Bearer token for deploy and cancel requests
    #[arg(long, env = "LAUNCHPAD_TOKEN", hide_env_values = true)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config {
        orchestrator_url: cli.orchestrator_url,
        token: cli.token,
    };

    handle_command(cli.command, &config).await
}
