//! Run inspection command handlers
//!
//! Shows run snapshots and follows live run events.

use anyhow::{Result, bail};
use colored::*;
use futures::StreamExt;
use launchpad_client::{ClientError, LaunchpadClient, StreamFrame};
use launchpad_core::domain::log::LogEventKind;
use launchpad_core::domain::run::RunStatus;
use uuid::Uuid;

use crate::display::{colorize_run_status, print_log_event, print_run_details};

/// Show the current or last run of a target
pub async fn status(client: &LaunchpadClient, target: &str) -> Result<()> {
    match client.status(target).await {
        Ok(run) => {
            print_run_details(&run);
            Ok(())
        }
        Err(e) if e.is_not_found() => {
            println!("{}", format!("No runs found for target '{}'.", target).yellow());
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Show a run by ID
pub async fn show(client: &LaunchpadClient, run_id: Uuid) -> Result<()> {
    let run = client.get_run(run_id).await?;
    print_run_details(&run);
    Ok(())
}

/// Follow a run until it finishes
///
/// Exits non-zero when the run does not succeed, like `deploy --follow`.
pub async fn watch(client: &LaunchpadClient, run_id: Uuid) -> Result<()> {
    let status = follow(client, run_id).await?;
    if status != RunStatus::Succeeded {
        bail!("Run {} {}", run_id, status);
    }
    Ok(())
}

/// Print a run's live events and return its final status
pub(crate) async fn follow(client: &LaunchpadClient, run_id: Uuid) -> Result<RunStatus> {
    let mut frames = client.stream_events(run_id).await?;
    let mut final_status = None;

    while let Some(frame) = frames.next().await {
        match frame? {
            StreamFrame::Snapshot(run) => {
                println!(
                    "{} Run {} of {} ({})",
                    "▸".cyan(),
                    run.id.to_string().dimmed(),
                    run.target().bold(),
                    colorize_run_status(&run.status)
                );
                if run.is_terminal() {
                    print_run_details(&run);
                    final_status = Some(run.status);
                }
            }
            StreamFrame::Log(event) => {
                print_log_event(&event);
                if let LogEventKind::RunTransition { status } = &event.kind {
                    if status.is_terminal() {
                        final_status = Some(*status);
                    }
                }
            }
            StreamFrame::Lagged(notice) => {
                println!(
                    "{}",
                    format!("... {} event(s) dropped, output is incomplete", notice.skipped)
                        .yellow()
                );
            }
        }
    }

    if let Some(status) = final_status {
        println!();
        println!("Run finished: {}", colorize_run_status(&status));
        return Ok(status);
    }

    // The stream closed without a terminal event; ask for the final state.
    let run = client.get_run(run_id).await?;
    if run.is_terminal() {
        println!();
        println!("Run finished: {}", colorize_run_status(&run.status));
        return Ok(run.status);
    }

    Err(ClientError::StreamInterrupted(format!("run {} is still {}", run_id, run.status)).into())
}
