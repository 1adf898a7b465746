//! Remote Executor
//!
//! Runs one rendered command on the remote host, streaming its output to an
//! `OutputSink` as it arrives and resolving with the command's exit code.
//!
//! All executors share the same contract:
//! - an empty command is rejected before anything is spawned
//! - the call never outlives its timeout
//! - a cancel request aborts the call promptly (best effort on the remote side)

mod ssh;

#[cfg(test)]
pub mod scripted;

pub use ssh::SshExecutor;

use async_trait::async_trait;
use launchpad_core::domain::context::ConnectionParams;
use launchpad_core::domain::log::OutputStream;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Exit code reported for a stage that timed out
pub const TIMEOUT_EXIT_CODE: i32 = 124;
/// Exit code reported when the command could not be started
pub const SPAWN_EXIT_CODE: i32 = 127;
/// Exit code reported for a cancelled command
pub const CANCELLED_EXIT_CODE: i32 = 130;
/// Exit code reported when the remote session could not be used
pub const CONNECTION_EXIT_CODE: i32 = 255;

/// Errors that stop a command before it produced an exit code
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecError {
    #[error("command is empty")]
    EmptyCommand,

    #[error("failed to start command: {0}")]
    Spawn(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("command timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("command cancelled")]
    Cancelled,
}

impl ExecError {
    /// Synthetic non-zero exit code recorded in the stage result
    pub fn exit_code(&self) -> i32 {
        match self {
            ExecError::EmptyCommand | ExecError::Spawn(_) => SPAWN_EXIT_CODE,
            ExecError::Connection(_) => CONNECTION_EXIT_CODE,
            ExecError::Timeout(_) => TIMEOUT_EXIT_CODE,
            ExecError::Cancelled => CANCELLED_EXIT_CODE,
        }
    }
}

/// Receives output chunks while a command runs
///
/// Chunk boundaries are not meaningful; executors emit line-buffered text.
pub trait OutputSink: Send + Sync {
    fn emit(&self, stream: OutputStream, text: &str);
}

/// Sink that discards everything
pub struct NullSink;

impl OutputSink for NullSink {
    fn emit(&self, _stream: OutputStream, _text: &str) {}
}

/// Receiving half of a run's cancellation flag
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested
    ///
    /// Never resolves if the sending half is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Sending half of a run's cancellation flag
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelSignal { rx })
    }

    /// Requests cancellation; returns false if it was already requested
    pub fn cancel(&self) -> bool {
        self.tx.send_if_modified(|cancelled| {
            if *cancelled {
                false
            } else {
                *cancelled = true;
                true
            }
        })
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

/// Executes commands on a remote host
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
    /// Runs `command` to completion, returning its exit code
    ///
    /// # Arguments
    /// * `connection` - Host, user and credential to use
    /// * `command` - Fully rendered shell command
    /// * `timeout` - Upper bound for the whole call
    /// * `sink` - Receives output as it arrives
    /// * `cancel` - Aborts the call when fired
    async fn execute(
        &self,
        connection: &ConnectionParams,
        command: &str,
        timeout: Duration,
        sink: &dyn OutputSink,
        cancel: CancelSignal,
    ) -> Result<i32, ExecError>;
}
