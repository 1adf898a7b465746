//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod deploy;
mod run;

use anyhow::Result;
use clap::Subcommand;
use uuid::Uuid;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List deployable targets
    Targets,
    /// Start a deployment
    Deploy {
        /// Target name (e.g. backend, frontend)
        target: String,
        /// Stream the run's logs until it finishes
        #[arg(short, long)]
        follow: bool,
    },
    /// Show the current or last run of a target
    Status {
        /// Target name
        target: String,
    },
    /// Show a run by its ID
    Run {
        /// Run ID
        id: Uuid,
    },
    /// Stream a run's logs until it finishes
    Watch {
        /// Run ID
        id: Uuid,
    },
    /// Cancel the in-flight deployment of a target
    Cancel {
        /// Target name
        target: String,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    let client = config.client();

    match command {
        Commands::Targets => deploy::list_targets(&client).await,
        Commands::Deploy { target, follow } => deploy::deploy(&client, &target, follow).await,
        Commands::Cancel { target } => deploy::cancel(&client, &target).await,
        Commands::Status { target } => run::status(&client, &target).await,
        Commands::Run { id } => run::show(&client, id).await,
        Commands::Watch { id } => run::watch(&client, id).await,
    }
}
