//! Pipeline context domain types
//!
//! The immutable input bundle of one pipeline run: which target, which
//! repository, which host and how to reach it, and the analysis settings.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::target::PortMapping;

/// CPU architecture of the remote host, used to pick the image platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Architecture {
    Arm64,
    Amd64,
}

impl Architecture {
    /// Parses the architecture names reported by `uname -m`, `dpkg` and
    /// Docker (`aarch64`, `arm64`, `x86_64`, `amd64`)
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "arm64" | "aarch64" | "armv8" | "armv8l" => Some(Architecture::Arm64),
            "amd64" | "x86_64" | "x64" => Some(Architecture::Amd64),
            _ => None,
        }
    }

    /// Docker `--platform` value
    pub fn platform(&self) -> &'static str {
        match self {
            Architecture::Arm64 => "linux/arm64",
            Architecture::Amd64 => "linux/amd64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Architecture::Arm64 => write!(f, "arm64"),
            Architecture::Amd64 => write!(f, "amd64"),
        }
    }
}

/// A secret value that never appears in logs or serialized snapshots
#[derive(Clone, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret(***)")
    }
}

impl Serialize for Secret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str("***")
    }
}

/// How the orchestrator authenticates to the remote host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Credential {
    /// Whatever the local ssh agent / default keys provide
    Agent,
    /// Private key file path
    IdentityFile(String),
    /// Password, handed to `sshpass` through the environment
    Password(Secret),
}

/// Remote connection parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub credential: Credential,
}

impl ConnectionParams {
    /// `user@host` destination for ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    /// True when commands should run on this machine instead of over ssh
    pub fn is_local(&self) -> bool {
        matches!(
            self.host.as_str(),
            "localhost" | "127.0.0.1" | "::1" | "[::1]"
        )
    }
}

/// Static-analysis server settings for the SONAR stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSettings {
    pub server_url: String,
    pub project_key: String,
    pub token: Option<Secret>,
}

/// Immutable input bundle for one pipeline run
///
/// Built once at trigger time and never mutated during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineContext {
    /// Target identity
    pub target: String,
    pub repository_url: String,
    pub architecture: Architecture,
    pub connection: ConnectionParams,
    /// `None` when analysis is disabled for the target
    pub analysis: Option<AnalysisSettings>,
    /// Remote directory holding all target workspaces
    pub workspace_root: String,
    pub container_name: String,
    pub port_mapping: PortMapping,
    /// Image tag produced by DOCKER and started by DEPLOY
    pub image_tag: String,
}

impl PipelineContext {
    /// Deterministic remote workspace path for this target
    pub fn workspace_path(&self) -> String {
        format!(
            "{}/{}",
            self.workspace_root.trim_end_matches('/'),
            self.target
        )
    }

    /// Fully qualified image reference (`name:tag`)
    pub fn image_ref(&self) -> String {
        format!("{}:{}", self.container_name, self.image_tag)
    }
}
