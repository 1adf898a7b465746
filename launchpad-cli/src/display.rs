//! Terminal rendering of runs and log events

use colored::*;
use launchpad_core::domain::log::{LogEvent, LogEventKind, LogLevel, OutputStream};
use launchpad_core::domain::run::{PipelineRun, RunStatus};
use launchpad_core::domain::stage::{StageName, StageResult, StageStatus};

/// Lines of a failed stage's output shown in run details
const FAILED_OUTPUT_LINES: usize = 20;

/// Colorize run status for display
pub fn colorize_run_status(status: &RunStatus) -> ColoredString {
    let status_str = status.to_string();
    match status {
        RunStatus::Pending => status_str.yellow(),
        RunStatus::Running => status_str.cyan(),
        RunStatus::Succeeded => status_str.green(),
        RunStatus::Failed => status_str.red(),
        RunStatus::Aborted => status_str.dimmed(),
    }
}

/// Colorize stage status, padded to `width` before coloring
fn colorize_stage_status(status: &StageStatus, width: usize) -> ColoredString {
    let status_str = format!("{:<width$}", status.to_string(), width = width);
    match status {
        StageStatus::Running => status_str.cyan(),
        StageStatus::Succeeded => status_str.green(),
        StageStatus::Failed => status_str.red(),
        StageStatus::Skipped => status_str.dimmed(),
    }
}

/// Print detailed run information with its stage table
pub fn print_run_details(run: &PipelineRun) {
    let ctx = &run.context;

    println!("{}", "Run Details:".bold());
    println!("  ID:           {}", run.id.to_string().cyan());
    println!("  Target:       {}", ctx.target.bold());
    println!("  Status:       {}", colorize_run_status(&run.status));
    println!("  Host:         {}", ctx.connection.destination());
    println!("  Architecture: {}", ctx.architecture);
    println!("  Image:        {}", ctx.image_ref());
    println!(
        "  Requested:    {}",
        run.requested_at.format("%Y-%m-%d %H:%M:%S")
    );
    if let Some(started) = run.started_at {
        println!("  Started:      {}", started.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(completed) = run.completed_at {
        println!("  Completed:    {}", completed.format("%Y-%m-%d %H:%M:%S"));
        if let Some(started) = run.started_at {
            let seconds = completed.signed_duration_since(started).num_seconds();
            println!("  Duration:     {}", format_duration(seconds));
        }
    }

    println!("\n{}", "Stages:".bold());
    println!(
        "  {:<9} {:<10} {:<5} {}",
        "STAGE".dimmed(),
        "STATUS".dimmed(),
        "EXIT".dimmed(),
        "DURATION".dimmed()
    );
    println!("  {}", "─".repeat(40).dimmed());
    for stage in StageName::ALL {
        match run.stages.iter().find(|s| s.stage == stage) {
            Some(result) => print_stage_row(result),
            None => println!("  {:<9} {}", stage.as_str(), "pending".dimmed()),
        }
    }

    if let Some(failed) = run.failed_stage() {
        println!("\n{}", format!("{} failed:", failed.stage).bold());
        if let Some(error) = &failed.error {
            println!("  {}", error.message.red());
        }
        let tail = tail_lines(&failed.output, FAILED_OUTPUT_LINES);
        if !tail.is_empty() {
            println!();
            for line in tail {
                println!("  {}", line.dimmed());
            }
        }
    }
}

fn print_stage_row(result: &StageResult) {
    let duration = match (result.started_at, result.completed_at) {
        (Some(started), Some(completed)) => {
            format_duration(completed.signed_duration_since(started).num_seconds())
        }
        _ => "-".to_string(),
    };

    print!(
        "  {:<9} {} {:<5} {}",
        result.stage.as_str(),
        colorize_stage_status(&result.status, 10),
        format_exit_code(result.exit_code),
        duration
    );
    match &result.skip_reason {
        Some(reason) => println!("  {}", format!("({})", reason).dimmed()),
        None => println!(),
    }
}

/// Print a single live log event
pub fn print_log_event(event: &LogEvent) {
    let time = event.timestamp.format("%H:%M:%S").to_string().dimmed();

    match &event.kind {
        LogEventKind::Output {
            stage,
            stream,
            text,
        } => {
            for line in prefixed_lines(*stage, text) {
                match stream {
                    OutputStream::Stdout => println!("{} {}", time, line),
                    OutputStream::Stderr => println!("{} {}", time, line.yellow()),
                }
            }
        }
        LogEventKind::StageTransition {
            stage,
            status,
            exit_code,
        } => {
            let marker = match status {
                StageStatus::Running => "▸".cyan(),
                StageStatus::Succeeded => "✓".green(),
                StageStatus::Failed => "✗".red(),
                StageStatus::Skipped => "-".dimmed(),
            };
            let exit = match exit_code {
                Some(code) => format!(" (exit {})", code),
                None => String::new(),
            };
            println!(
                "{} {} {} {}{}",
                time,
                marker,
                stage.as_str().bold(),
                colorize_stage_status(status, 0),
                exit
            );
        }
        LogEventKind::RunTransition { status } => {
            println!("{} {} Run {}", time, "─".repeat(3).dimmed(), colorize_run_status(status));
        }
        LogEventKind::Message { level, stage, text } => {
            let level_str = format!("{:?}", level).to_uppercase();
            let level_colored = match level {
                LogLevel::Debug => level_str.dimmed(),
                LogLevel::Info => level_str.cyan(),
                LogLevel::Warning => level_str.yellow(),
                LogLevel::Error => level_str.red(),
            };
            match stage {
                Some(stage) => println!("{} [{}] [{}] {}", time, level_colored, stage, text),
                None => println!("{} [{}] {}", time, level_colored, text),
            }
        }
    }
}

/// Splits an output chunk into lines tagged with their stage
fn prefixed_lines(stage: StageName, text: &str) -> Vec<String> {
    text.lines()
        .map(|line| format!("[{}] {}", stage, line))
        .collect()
}

/// Last `count` lines of captured output
fn tail_lines(output: &str, count: usize) -> Vec<&str> {
    let lines: Vec<&str> = output.lines().collect();
    let start = lines.len().saturating_sub(count);
    lines[start..].to_vec()
}

fn format_exit_code(code: Option<i32>) -> String {
    code.map(|c| c.to_string()).unwrap_or_else(|| "-".to_string())
}

fn format_duration(seconds: i64) -> String {
    if seconds >= 60 {
        format!("{}m {:02}s", seconds / 60, seconds % 60)
    } else {
        format!("{}s", seconds.max(0))
    }
}
