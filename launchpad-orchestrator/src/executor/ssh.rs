//! SSH command execution
//!
//! Shells out to the system `ssh` client (through `sshpass` when the host is
//! configured with a password). Commands aimed at the local machine run
//! through `sh -c` directly.

use async_trait::async_trait;
use launchpad_core::domain::context::{ConnectionParams, Credential};
use launchpad_core::domain::log::OutputStream;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::{CancelSignal, ExecError, OutputSink, RemoteExecutor};

/// Bytes of stderr kept to explain connection failures
const STDERR_TAIL_BYTES: usize = 2048;

/// ssh exits with 255 when the session itself failed
const SSH_CONNECTION_FAILURE: i32 = 255;

/// Executor backed by the system ssh client
#[derive(Debug, Clone)]
pub struct SshExecutor {
    connect_timeout: Duration,
}

impl SshExecutor {
    pub fn new() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }

    /// Program, arguments and extra environment for running `command`
    fn build_invocation(
        &self,
        connection: &ConnectionParams,
        command: &str,
    ) -> (String, Vec<String>, Vec<(String, String)>) {
        if connection.is_local() {
            return (
                "sh".to_string(),
                vec!["-c".to_string(), command.to_string()],
                Vec::new(),
            );
        }

        let mut program = "ssh".to_string();
        let mut args = Vec::new();
        let mut envs = Vec::new();

        match &connection.credential {
            Credential::Password(secret) => {
                program = "sshpass".to_string();
                args.push("-e".to_string());
                args.push("ssh".to_string());
                envs.push(("SSHPASS".to_string(), secret.expose().to_string()));
                args.extend([
                    "-o".to_string(),
                    "PubkeyAuthentication=no".to_string(),
                    "-o".to_string(),
                    "PreferredAuthentications=password,keyboard-interactive".to_string(),
                ]);
            }
            Credential::IdentityFile(path) => {
                args.push("-i".to_string());
                args.push(path.clone());
                args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
            Credential::Agent => {
                args.extend(["-o".to_string(), "BatchMode=yes".to_string()]);
            }
        }

        if connection.port != 22 {
            args.push("-p".to_string());
            args.push(connection.port.to_string());
        }

        // Keepalives turn a silently dropped session into an ssh failure
        // instead of a hang.
        args.extend([
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(connection.destination());
        args.push(command.to_string());

        (program, args, envs)
    }
}

impl Default for SshExecutor {
    fn default() -> Self {
        Self::new()
    }
}

enum Outcome {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut,
    Cancelled,
}

#[async_trait]
impl RemoteExecutor for SshExecutor {
    async fn execute(
        &self,
        connection: &ConnectionParams,
        command: &str,
        timeout: Duration,
        sink: &dyn OutputSink,
        mut cancel: CancelSignal,
    ) -> Result<i32, ExecError> {
        if command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        if cancel.is_cancelled() {
            return Err(ExecError::Cancelled);
        }

        let (program, args, envs) = self.build_invocation(connection, command);
        debug!("Executing {} byte command on {}", command.len(), connection.host);

        let mut child = Command::new(&program)
            .args(&args)
            .envs(envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecError::Spawn(format!("{}: {}", program, e)))?;

        let mut stderr_tail = String::new();

        let outcome = {
            let pump = pump_output(&mut child, sink, &mut stderr_tail);
            tokio::pin!(pump);

            tokio::select! {
                status = &mut pump => Outcome::Exited(status),
                _ = tokio::time::sleep(timeout) => Outcome::TimedOut,
                _ = cancel.cancelled() => Outcome::Cancelled,
            }
        };

        match outcome {
            Outcome::Exited(Ok(status)) => {
                let code = status.code().unwrap_or(-1);
                if code == SSH_CONNECTION_FAILURE && !connection.is_local() {
                    warn!(
                        "ssh session to {} failed: {}",
                        connection.host,
                        stderr_tail.trim()
                    );
                    return Err(ExecError::Connection(
                        if stderr_tail.trim().is_empty() {
                            format!("ssh to {} failed", connection.destination())
                        } else {
                            stderr_tail.trim().to_string()
                        },
                    ));
                }
                debug!("Command exited with {} on {}", code, connection.host);
                Ok(code)
            }
            Outcome::Exited(Err(e)) => Err(ExecError::Connection(format!(
                "lost contact with {}: {}",
                program, e
            ))),
            Outcome::TimedOut => {
                warn!(
                    "Command timed out after {:?} on {}, killing it",
                    timeout, connection.host
                );
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill timed out command: {}", e);
                }
                Err(ExecError::Timeout(timeout))
            }
            Outcome::Cancelled => {
                debug!("Command cancelled on {}", connection.host);
                if let Err(e) = child.kill().await {
                    warn!("Failed to kill cancelled command: {}", e);
                }
                Err(ExecError::Cancelled)
            }
        }
    }
}

/// Forwards stdout/stderr lines to the sink until both close, then reaps the child
async fn pump_output(
    child: &mut Child,
    sink: &dyn OutputSink,
    stderr_tail: &mut String,
) -> std::io::Result<std::process::ExitStatus> {
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();

    let forward_stdout = async {
        if let Some(stdout) = stdout {
            forward_lines(stdout, |line| {
                sink.emit(OutputStream::Stdout, &format!("{}\n", line));
            })
            .await;
        }
    };

    let forward_stderr = async {
        if let Some(stderr) = stderr {
            forward_lines(stderr, |line| {
                push_tail(stderr_tail, line);
                sink.emit(OutputStream::Stderr, &format!("{}\n", line));
            })
            .await;
        }
    };

    tokio::join!(forward_stdout, forward_stderr);

    child.wait().await
}

/// Calls `on_line` for every line until EOF
///
/// Bytes that are not UTF-8 are replaced rather than ending the stream. The
/// pipe is drained to EOF even after a read error so the command never dies
/// on a closed pipe.
async fn forward_lines<R>(reader: R, mut on_line: impl FnMut(&str))
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                if buf.last() == Some(&b'\n') {
                    buf.pop();
                    if buf.last() == Some(&b'\r') {
                        buf.pop();
                    }
                }
                on_line(&*String::from_utf8_lossy(&buf));
            }
            Err(e) => {
                warn!("Failed to read command output, discarding the rest: {}", e);
                if let Err(e) = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await {
                    warn!("Failed to drain command output: {}", e);
                }
                break;
            }
        }
    }
}

fn push_tail(tail: &mut String, line: &str) {
    tail.push_str(line);
    tail.push('\n');
    if tail.len() > STDERR_TAIL_BYTES {
        let mut cut = tail.len() - STDERR_TAIL_BYTES;
        while !tail.is_char_boundary(cut) {
            cut += 1;
        }
        tail.drain(..cut);
    }
}
