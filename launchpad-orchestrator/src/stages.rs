//! Stage definitions
//!
//! Renders the five canonical stages from a `PipelineContext` into concrete
//! shell commands. Rendering is pure: the same context always yields the same
//! plan, and nothing here touches the remote host.

use launchpad_core::domain::context::PipelineContext;
use launchpad_core::domain::stage::StageName;
use std::time::Duration;

use crate::config::StageTimeouts;
use crate::shell::{quote_arg, quote_path};

/// Image used to run the Maven-based analysis scanner
const SCANNER_IMAGE: &str = "maven:3.9-eclipse-temurin-17";

/// One rendered remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCommand {
    /// What is sent to the host
    pub command: String,
    /// Same command with secrets masked, safe to show operators
    pub display: String,
}

impl StageCommand {
    fn plain(command: String) -> Self {
        Self {
            display: command.clone(),
            command,
        }
    }

    fn with_secret(command: String, secret: &str) -> Self {
        let display = if secret.is_empty() {
            command.clone()
        } else {
            command.replace(secret, "***")
        };
        Self { command, display }
    }
}

/// A declarative pipeline stage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageDefinition {
    pub name: StageName,
    pub commands: Vec<StageCommand>,
    /// A failure here aborts the remaining stages
    pub fatal: bool,
    /// Run every command even after one fails
    pub keep_going: bool,
    pub timeout: Duration,
    /// Set when the stage is recorded as skipped instead of run
    pub skip_reason: Option<String>,
}

/// Fatal/non-fatal classification of each stage
pub fn is_fatal(stage: StageName) -> bool {
    match stage {
        StageName::Git | StageName::Docker | StageName::Deploy => true,
        StageName::Sonar | StageName::Pentest => false,
    }
}

/// Renders the ordered stage list for a run
pub fn plan(ctx: &PipelineContext, timeouts: &StageTimeouts) -> Vec<StageDefinition> {
    StageName::ALL
        .iter()
        .map(|&name| {
            let (commands, skip_reason) = match name {
                StageName::Git => (git_commands(ctx), None),
                StageName::Sonar => match sonar_commands(ctx) {
                    Some(commands) => (commands, None),
                    None => (
                        Vec::new(),
                        Some(format!("static analysis disabled for {}", ctx.target)),
                    ),
                },
                StageName::Docker => (docker_commands(ctx), None),
                StageName::Deploy => (deploy_commands(ctx), None),
                StageName::Pentest => (pentest_commands(ctx), None),
            };

            StageDefinition {
                name,
                commands,
                fatal: is_fatal(name),
                keep_going: name == StageName::Pentest,
                timeout: timeouts.for_stage(name),
                skip_reason,
            }
        })
        .collect()
}

/// Clone on first run, fast-forward afterwards
fn git_commands(ctx: &PipelineContext) -> Vec<StageCommand> {
    let root = quote_path(&ctx.workspace_root);
    let workspace = quote_path(&ctx.workspace_path());
    let url = quote_arg(&ctx.repository_url);

    vec![
        StageCommand::plain(format!("mkdir -p {}", root)),
        StageCommand::plain(format!(
            "if [ -d {ws}/.git ]; then git -C {ws} remote set-url origin {url} && git -C {ws} pull --ff-only; else rm -rf {ws} && git clone {url} {ws}; fi",
            ws = workspace,
            url = url
        )),
        StageCommand::plain(format!("git -C {} log -1 --oneline", workspace)),
    ]
}

fn sonar_commands(ctx: &PipelineContext) -> Option<Vec<StageCommand>> {
    let analysis = ctx.analysis.as_ref()?;
    let workspace = quote_path(&ctx.workspace_path());

    let mut command = format!(
        "docker run --rm --network host -v {ws}:/usr/src/app -w /usr/src/app {image} mvn clean verify sonar:sonar -Dsonar.projectKey={key} -Dsonar.host.url={url}",
        ws = workspace,
        image = SCANNER_IMAGE,
        key = quote_arg(&analysis.project_key),
        url = quote_arg(&analysis.server_url),
    );

    let secret = match &analysis.token {
        Some(token) => {
            command.push_str(&format!(" -Dsonar.login={}", quote_arg(token.expose())));
            token.expose().to_string()
        }
        None => String::new(),
    };

    Some(vec![StageCommand::with_secret(command, &secret)])
}

fn docker_commands(ctx: &PipelineContext) -> Vec<StageCommand> {
    vec![StageCommand::plain(format!(
        "cd {ws} && docker build --platform {platform} -t {image} -t {latest} .",
        ws = quote_path(&ctx.workspace_path()),
        platform = ctx.architecture.platform(),
        image = quote_arg(&ctx.image_ref()),
        latest = quote_arg(&format!("{}:latest", ctx.container_name)),
    ))]
}

/// Converges to exactly one container for the target on its reserved port
///
/// Removes the target's container by name, then anything else still
/// publishing the host port, then starts the new image.
fn deploy_commands(ctx: &PipelineContext) -> Vec<StageCommand> {
    let name = quote_arg(&ctx.container_name);
    let host_port = ctx.port_mapping.host;

    vec![
        StageCommand::plain(format!("docker rm -f {} 2>/dev/null || true", name)),
        StageCommand::plain(format!(
            "docker ps -aq --filter publish={} | xargs -r docker rm -f",
            host_port
        )),
        StageCommand::plain(format!(
            "docker run -d --restart unless-stopped --name {} -p {} {}",
            name,
            ctx.port_mapping.docker_arg(),
            quote_arg(&ctx.image_ref())
        )),
    ]
}

fn pentest_commands(ctx: &PipelineContext) -> Vec<StageCommand> {
    let port = ctx.port_mapping.host;
    vec![
        StageCommand::plain(format!("nmap -p {} -sV localhost", port)),
        StageCommand::plain(format!(
            "nikto -h http://localhost:{} -Tuning b -maxtime 60s",
            port
        )),
    ]
}
