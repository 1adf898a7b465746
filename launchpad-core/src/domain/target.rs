//! Deployment target domain types
//!
//! A target is a logical deployable unit (e.g. `backend`, `frontend`) with its
//! own repository, container name and reserved port.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Host/container port mapping for a target's container
///
/// Parsed from `"8080"` (same port on both sides) or `"3000:80"` (host:container).
/// Serialized back to the same textual form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PortMapping {
    pub host: u16,
    pub container: u16,
}

impl PortMapping {
    pub fn new(host: u16, container: u16) -> Self {
        Self { host, container }
    }

    /// The `-p` argument for `docker run`
    pub fn docker_arg(&self) -> String {
        format!("{}:{}", self.host, self.container)
    }
}

impl FromStr for PortMapping {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| -> Result<u16, String> {
            let port = part
                .trim()
                .parse::<u16>()
                .map_err(|_| format!("Invalid port '{}' in mapping '{}'", part, s))?;
            if port == 0 {
                return Err(format!("Port 0 is not allowed in mapping '{}'", s));
            }
            Ok(port)
        };

        match s.split_once(':') {
            Some((host, container)) => Ok(Self::new(parse(host)?, parse(container)?)),
            None => {
                let port = parse(s)?;
                Ok(Self::new(port, port))
            }
        }
    }
}

impl TryFrom<String> for PortMapping {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PortMapping> for String {
    fn from(mapping: PortMapping) -> Self {
        mapping.to_string()
    }
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host == self.container {
            write!(f, "{}", self.host)
        } else {
            write!(f, "{}:{}", self.host, self.container)
        }
    }
}

/// Static description of a configured deployment target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSpec {
    /// Target identity (`backend`, `frontend`, ...)
    pub name: String,
    pub repository_url: String,
    /// Container name; also used as the image repository name
    pub container_name: String,
    pub port_mapping: PortMapping,
    /// Whether the SONAR stage analyses this target or is recorded as skipped
    pub analysis_enabled: bool,
}

/// Checks that a target identity is usable as a path segment and container label
pub fn is_valid_target_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_')
}
