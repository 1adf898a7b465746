//! Scripted executor for tests
//!
//! Matches each command against substring rules and replays the scripted
//! response. Unmatched commands succeed silently. Every call is recorded.

use async_trait::async_trait;
use launchpad_core::domain::context::ConnectionParams;
use launchpad_core::domain::log::OutputStream;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

use super::{CancelSignal, ExecError, OutputSink, RemoteExecutor};

pub type Handler = Arc<dyn Fn(&str) -> (i32, String) + Send + Sync>;

#[derive(Clone)]
pub enum Response {
    Exit {
        code: i32,
        stdout: String,
        stderr: String,
        delay: Duration,
    },
    Error(ExecError),
    /// Waits for the notify before exiting 0
    Blocked(Arc<Notify>),
    /// Computes exit code and stdout from the command
    Handler(Handler),
}

struct Rule {
    pattern: String,
    response: Response,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(self, pattern: &str, response: Response) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            response,
        });
        self
    }

    pub fn exit(self, pattern: &str, code: i32) -> Self {
        self.output(pattern, code, "")
    }

    pub fn output(self, pattern: &str, code: i32, stdout: &str) -> Self {
        self.respond(
            pattern,
            Response::Exit {
                code,
                stdout: stdout.to_string(),
                stderr: String::new(),
                delay: Duration::ZERO,
            },
        )
    }

    pub fn stderr(self, pattern: &str, code: i32, stderr: &str) -> Self {
        self.respond(
            pattern,
            Response::Exit {
                code,
                stdout: String::new(),
                stderr: stderr.to_string(),
                delay: Duration::ZERO,
            },
        )
    }

    pub fn delay(self, pattern: &str, delay: Duration) -> Self {
        self.respond(
            pattern,
            Response::Exit {
                code: 0,
                stdout: String::new(),
                stderr: String::new(),
                delay,
            },
        )
    }

    pub fn error(self, pattern: &str, error: ExecError) -> Self {
        self.respond(pattern, Response::Error(error))
    }

    pub fn blocked(self, pattern: &str, gate: Arc<Notify>) -> Self {
        self.respond(pattern, Response::Blocked(gate))
    }

    pub fn handler(self, pattern: &str, handler: Handler) -> Self {
        self.respond(pattern, Response::Handler(handler))
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.contains(pattern))
            .count()
    }

    fn response_for(&self, command: &str) -> Option<Response> {
        self.rules
            .lock()
            .unwrap()
            .iter()
            .find(|r| command.contains(&r.pattern))
            .map(|r| r.response.clone())
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _connection: &ConnectionParams,
        command: &str,
        timeout: Duration,
        sink: &dyn OutputSink,
        mut cancel: CancelSignal,
    ) -> Result<i32, ExecError> {
        if command.trim().is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        self.calls.lock().unwrap().push(command.to_string());

        let Some(response) = self.response_for(command) else {
            return Ok(0);
        };

        match response {
            Response::Exit {
                code,
                stdout,
                stderr,
                delay,
            } => {
                if !stdout.is_empty() {
                    sink.emit(OutputStream::Stdout, &stdout);
                }
                if !stderr.is_empty() {
                    sink.emit(OutputStream::Stderr, &stderr);
                }
                tokio::select! {
                    biased;
                    _ = tokio::time::sleep(delay) => Ok(code),
                    _ = tokio::time::sleep(timeout) => Err(ExecError::Timeout(timeout)),
                    _ = cancel.cancelled() => Err(ExecError::Cancelled),
                }
            }
            Response::Error(error) => Err(error),
            Response::Blocked(gate) => {
                tokio::select! {
                    _ = gate.notified() => Ok(0),
                    _ = tokio::time::sleep(timeout) => Err(ExecError::Timeout(timeout)),
                    _ = cancel.cancelled() => Err(ExecError::Cancelled),
                }
            }
            Response::Handler(handler) => {
                let (code, stdout) = handler(command);
                if !stdout.is_empty() {
                    sink.emit(OutputStream::Stdout, &stdout);
                }
                Ok(code)
            }
        }
    }
}
