//! Orchestrator configuration
//!
//! Loaded once at process start from environment variables (optionally seeded
//! from a `.env` file) and passed into pipeline context construction.

use launchpad_core::domain::context::{ConnectionParams, Credential, Secret};
use launchpad_core::domain::stage::StageName;
use launchpad_core::domain::target::{PortMapping, TargetSpec, is_valid_target_name};
use std::time::Duration;

/// Per-stage timeouts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageTimeouts {
    pub git: Duration,
    pub sonar: Duration,
    pub docker: Duration,
    pub deploy: Duration,
    pub pentest: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: StageName) -> Duration {
        match stage {
            StageName::Git => self.git,
            StageName::Sonar => self.sonar,
            StageName::Docker => self.docker,
            StageName::Deploy => self.deploy,
            StageName::Pentest => self.pentest,
        }
    }

    /// Same timeout for every stage
    pub fn uniform(timeout: Duration) -> Self {
        Self {
            git: timeout,
            sonar: timeout,
            docker: timeout,
            deploy: timeout,
            pentest: timeout,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            git: Duration::from_secs(300),
            sonar: Duration::from_secs(900),
            docker: Duration::from_secs(1200),
            deploy: Duration::from_secs(120),
            pentest: Duration::from_secs(300),
        }
    }
}

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address
    pub bind_addr: String,

    /// Remote host every pipeline deploys to
    pub connection: ConnectionParams,

    /// Deployable targets, keyed by `TargetSpec::name`
    pub targets: Vec<TargetSpec>,

    /// Analysis server used by the SONAR stage
    pub analysis_server_url: String,
    pub analysis_project_key: String,
    pub analysis_token: Option<Secret>,

    /// Raw architecture override; probed from the host when unset
    pub architecture_override: Option<String>,

    /// How long the architecture probe may take at trigger time
    pub architecture_probe_timeout: Duration,

    /// Remote directory holding target workspaces
    pub workspace_root: String,

    pub stage_timeouts: StageTimeouts,

    /// Events buffered per observer before it is considered lagging
    pub event_buffer_size: usize,

    /// Output bytes retained per stage result
    pub output_tail_bytes: usize,

    /// Accepted caller credentials
    pub api_tokens: Vec<String>,

    /// Accept triggers without a credential (local development only)
    pub auth_disabled: bool,
}

impl Config {
    /// Creates a configuration with defaults for everything but the host
    pub fn new(connection: ConnectionParams) -> Self {
        let analysis_server_url = format!("http://{}:9000", connection.host);
        Self {
            bind_addr: "0.0.0.0:8000".to_string(),
            connection,
            targets: Vec::new(),
            analysis_server_url,
            analysis_project_key: "backend-key".to_string(),
            analysis_token: None,
            architecture_override: None,
            architecture_probe_timeout: Duration::from_secs(15),
            workspace_root: "~/cicd_workspace".to_string(),
            stage_timeouts: StageTimeouts::default(),
            event_buffer_size: 1024,
            output_tail_bytes: 64 * 1024,
            api_tokens: Vec::new(),
            auth_disabled: false,
        }
    }

    /// Creates configuration from environment variables
    ///
    /// Expected environment variables:
    /// - VM_HOST, VM_USER (required)
    /// - VM_PORT (optional, default: 22)
    /// - VM_PASSWORD or VM_IDENTITY_FILE (optional, ssh agent otherwise)
    /// - REPO_URL_BACKEND, REPO_URL_FRONTEND (each enables its target)
    /// - SONAR_HOST_URL (optional, default: http://{VM_HOST}:9000)
    /// - SONAR_TOKEN, SONAR_PROJECT_KEY (optional)
    /// - HOST_ARCH (optional override, probed otherwise)
    /// - WORKSPACE_ROOT (optional, default: ~/cicd_workspace)
    /// - GIT_TIMEOUT, SONAR_TIMEOUT, DOCKER_TIMEOUT, DEPLOY_TIMEOUT, PENTEST_TIMEOUT (seconds)
    /// - EVENT_BUFFER_SIZE, OUTPUT_TAIL_BYTES (optional)
    /// - LAUNCHPAD_BIND_ADDR (optional, default: 0.0.0.0:8000)
    /// - LAUNCHPAD_API_TOKENS (comma separated), LAUNCHPAD_AUTH_DISABLED
    pub fn from_env() -> anyhow::Result<Self> {
        let host = std::env::var("VM_HOST")
            .map_err(|_| anyhow::anyhow!("VM_HOST environment variable not set"))?;

        let user = std::env::var("VM_USER")
            .map_err(|_| anyhow::anyhow!("VM_USER environment variable not set"))?;

        let port = std::env::var("VM_PORT")
            .ok()
            .map(|s| s.parse::<u16>())
            .transpose()
            .map_err(|_| anyhow::anyhow!("VM_PORT must be a port number"))?
            .unwrap_or(22);

        let credential = match (non_empty_var("VM_PASSWORD"), non_empty_var("VM_IDENTITY_FILE")) {
            (_, Some(path)) => Credential::IdentityFile(path),
            (Some(password), None) => Credential::Password(Secret::new(password)),
            (None, None) => Credential::Agent,
        };

        let mut config = Self::new(ConnectionParams {
            host,
            port,
            user,
            credential,
        });

        config.targets = builtin_targets(
            non_empty_var("REPO_URL_BACKEND"),
            non_empty_var("REPO_URL_FRONTEND"),
        );

        if let Some(url) = non_empty_var("SONAR_HOST_URL") {
            config.analysis_server_url = url;
        }
        if let Some(key) = non_empty_var("SONAR_PROJECT_KEY") {
            config.analysis_project_key = key;
        }
        config.analysis_token = non_empty_var("SONAR_TOKEN").map(Secret::new);
        config.architecture_override = non_empty_var("HOST_ARCH");

        if let Some(root) = non_empty_var("WORKSPACE_ROOT") {
            config.workspace_root = root;
        }
        if let Some(addr) = non_empty_var("LAUNCHPAD_BIND_ADDR") {
            config.bind_addr = addr;
        }

        let defaults = StageTimeouts::default();
        config.stage_timeouts = StageTimeouts {
            git: env_secs("GIT_TIMEOUT").unwrap_or(defaults.git),
            sonar: env_secs("SONAR_TIMEOUT").unwrap_or(defaults.sonar),
            docker: env_secs("DOCKER_TIMEOUT").unwrap_or(defaults.docker),
            deploy: env_secs("DEPLOY_TIMEOUT").unwrap_or(defaults.deploy),
            pentest: env_secs("PENTEST_TIMEOUT").unwrap_or(defaults.pentest),
        };

        config.event_buffer_size = std::env::var("EVENT_BUFFER_SIZE")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.event_buffer_size);

        config.output_tail_bytes = std::env::var("OUTPUT_TAIL_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(config.output_tail_bytes);

        config.api_tokens = non_empty_var("LAUNCHPAD_API_TOKENS")
            .map(|raw| parse_token_list(&raw))
            .unwrap_or_default();

        config.auth_disabled = std::env::var("LAUNCHPAD_AUTH_DISABLED")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(config)
    }

    /// Looks up a configured target
    pub fn target(&self, name: &str) -> Option<&TargetSpec> {
        self.targets.iter().find(|t| t.name == name)
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.connection.host.trim().is_empty() {
            anyhow::bail!("remote host cannot be empty");
        }

        if self.connection.user.trim().is_empty() {
            anyhow::bail!("remote user cannot be empty");
        }

        if self.targets.is_empty() {
            anyhow::bail!("no deployment targets configured (set REPO_URL_BACKEND and/or REPO_URL_FRONTEND)");
        }

        let mut seen_ports = Vec::new();
        for target in &self.targets {
            if !is_valid_target_name(&target.name) {
                anyhow::bail!("invalid target name '{}'", target.name);
            }
            if target.repository_url.trim().is_empty() {
                anyhow::bail!("target '{}' has no repository URL", target.name);
            }
            if seen_ports.contains(&target.port_mapping.host) {
                anyhow::bail!(
                    "target '{}' reuses host port {}",
                    target.name,
                    target.port_mapping.host
                );
            }
            seen_ports.push(target.port_mapping.host);
        }

        if self.workspace_root.trim().is_empty() {
            anyhow::bail!("workspace_root cannot be empty");
        }

        if self.event_buffer_size == 0 {
            anyhow::bail!("event_buffer_size must be greater than 0");
        }

        if self.output_tail_bytes == 0 {
            anyhow::bail!("output_tail_bytes must be greater than 0");
        }

        if self.api_tokens.is_empty() && !self.auth_disabled {
            anyhow::bail!("LAUNCHPAD_API_TOKENS must be set unless LAUNCHPAD_AUTH_DISABLED=true");
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(ConnectionParams {
            host: "localhost".to_string(),
            port: 22,
            user: "deploy".to_string(),
            credential: Credential::Agent,
        })
    }
}

/// The two services the deployment dashboard knows about
///
/// A target only exists when its repository URL is configured.
pub fn builtin_targets(backend_repo: Option<String>, frontend_repo: Option<String>) -> Vec<TargetSpec> {
    let mut targets = Vec::new();

    if let Some(repository_url) = backend_repo {
        targets.push(TargetSpec {
            name: "backend".to_string(),
            repository_url,
            container_name: "backend-app".to_string(),
            port_mapping: PortMapping::new(8080, 8080),
            analysis_enabled: true,
        });
    }

    if let Some(repository_url) = frontend_repo {
        // The frontend image serves on 80 inside the container
        targets.push(TargetSpec {
            name: "frontend".to_string(),
            repository_url,
            container_name: "frontend-app".to_string(),
            port_mapping: PortMapping::new(3000, 80),
            analysis_enabled: false,
        });
    }

    targets
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_secs(name: &str) -> Option<Duration> {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs)
}

fn parse_token_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
