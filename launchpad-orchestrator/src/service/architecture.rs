//! Host architecture resolution
//!
//! Decides which image platform DOCKER builds for: the configured override
//! when there is one, otherwise whatever `uname -m` reports on the host.

use launchpad_core::domain::context::{Architecture, ConnectionParams};
use launchpad_core::domain::log::OutputStream;
use std::sync::Mutex;
use std::time::Duration;

use crate::executor::{CancelSignal, OutputSink, RemoteExecutor};

const PROBE_COMMAND: &str = "uname -m";

/// Collects stdout of the probe
#[derive(Default)]
struct CaptureSink {
    stdout: Mutex<String>,
}

impl OutputSink for CaptureSink {
    fn emit(&self, stream: OutputStream, text: &str) {
        if stream == OutputStream::Stdout {
            let mut stdout = self.stdout.lock().unwrap_or_else(|e| e.into_inner());
            stdout.push_str(text);
        }
    }
}

/// Resolves the architecture for a new run
///
/// Any failure is returned as a message suitable for a configuration error.
pub async fn resolve(
    override_value: Option<&str>,
    connection: &ConnectionParams,
    executor: &dyn RemoteExecutor,
    probe_timeout: Duration,
) -> Result<Architecture, String> {
    if let Some(raw) = override_value {
        return Architecture::parse(raw)
            .ok_or_else(|| format!("unsupported architecture override '{}'", raw));
    }

    let sink = CaptureSink::default();
    let code = executor
        .execute(
            connection,
            PROBE_COMMAND,
            probe_timeout,
            &sink,
            CancelSignal::never(),
        )
        .await
        .map_err(|e| format!("could not detect host architecture: {}", e))?;

    if code != 0 {
        return Err(format!(
            "could not detect host architecture: `{}` exited with {}",
            PROBE_COMMAND, code
        ));
    }

    let reported = sink
        .stdout
        .into_inner()
        .unwrap_or_else(|e| e.into_inner());
    let reported = reported.trim();

    match Architecture::parse(reported) {
        Some(architecture) => {
            tracing::debug!("Host {} reports {} ({})", connection.host, reported, architecture);
            Ok(architecture)
        }
        None => Err(format!("unsupported host architecture '{}'", reported)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::ExecError;
    use crate::executor::scripted::ScriptedExecutor;
    use launchpad_core::domain::context::Credential;

    fn connection() -> ConnectionParams {
        ConnectionParams {
            host: "10.0.0.5".to_string(),
            port: 22,
            user: "deploy".to_string(),
            credential: Credential::Agent,
        }
    }

    const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_override_wins_without_probing() {
        let executor = ScriptedExecutor::new();
        let arch = resolve(Some("x86_64"), &connection(), &executor, PROBE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(arch, Architecture::Amd64);
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_bad_override_is_rejected_without_probing() {
        let executor = ScriptedExecutor::new();
        let err = resolve(Some("sparc"), &connection(), &executor, PROBE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.contains("sparc"));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_probe_parses_uname() {
        let executor = ScriptedExecutor::new().output("uname -m", 0, "aarch64\n");
        let arch = resolve(None, &connection(), &executor, PROBE_TIMEOUT)
            .await
            .unwrap();
        assert_eq!(arch, Architecture::Arm64);
        assert_eq!(executor.calls(), vec!["uname -m".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_rejects_unknown_architecture() {
        let executor = ScriptedExecutor::new().output("uname -m", 0, "mips\n");
        let err = resolve(None, &connection(), &executor, PROBE_TIMEOUT)
            .await
            .unwrap_err();
        assert_eq!(err, "unsupported host architecture 'mips'");
    }

    #[tokio::test]
    async fn test_probe_connection_failure() {
        let executor = ScriptedExecutor::new()
            .error("uname", ExecError::Connection("Connection refused".into()));
        let err = resolve(None, &connection(), &executor, PROBE_TIMEOUT)
            .await
            .unwrap_err();
        assert!(err.contains("Connection refused"));
    }
}
