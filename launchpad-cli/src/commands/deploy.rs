//! Deployment command handlers
//!
//! Lists targets, starts deployments and cancels them.

use anyhow::{Result, bail};
use colored::*;
use launchpad_client::LaunchpadClient;
use launchpad_core::domain::run::RunStatus;

use super::run::follow;
use crate::display::{colorize_run_status, print_run_details};

/// List the targets the orchestrator can deploy
pub async fn list_targets(client: &LaunchpadClient) -> Result<()> {
    let targets = client.list_targets().await?;

    if targets.is_empty() {
        println!("{}", "No targets configured.".yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Found {} target(s):", targets.len()).bold()
    );
    println!();
    for target in targets {
        println!("  {} {}", "▸".cyan(), target.name.bold());
        println!("    Repository: {}", target.repository_url.dimmed());
        println!("    Container:  {}", target.container_name);
        println!("    Ports:      {}", target.port_mapping);
        println!(
            "    Analysis:   {}",
            if target.analysis_enabled {
                "enabled".green()
            } else {
                "disabled".dimmed()
            }
        );
        println!();
    }

    Ok(())
}

/// Start a deployment, optionally following it to completion
///
/// When following, a run that does not succeed is reported as an error so
/// the process exits non-zero.
pub async fn deploy(client: &LaunchpadClient, target: &str, follow_run: bool) -> Result<()> {
    let accepted = match client.trigger(target).await {
        Ok(accepted) => accepted,
        Err(e) if e.is_already_running() => {
            bail!(
                "A deployment of '{}' is already running; use `launchpad status {}` to inspect it",
                target,
                target
            )
        }
        Err(e) => return Err(e.into()),
    };

    println!(
        "{} Deployment of {} accepted",
        "✓".green(),
        accepted.target.bold()
    );
    println!("  Run ID: {}", accepted.run_id.to_string().cyan());
    println!("  Status: {}", colorize_run_status(&accepted.status));

    if !follow_run {
        println!();
        println!(
            "{}",
            format!("Follow it with `launchpad watch {}`", accepted.run_id).dimmed()
        );
        return Ok(());
    }

    println!();
    let status = follow(client, accepted.run_id).await?;
    if status != RunStatus::Succeeded {
        bail!("Deployment of '{}' {}", target, status);
    }

    Ok(())
}

/// Request cancellation of a target's in-flight deployment
pub async fn cancel(client: &LaunchpadClient, target: &str) -> Result<()> {
    let run = client.cancel(target).await?;

    println!(
        "{} Cancellation requested for {}",
        "✓".green(),
        target.bold()
    );
    println!();
    print_run_details(&run);

    Ok(())
}
