//! Deployment Session Registry
//!
//! Keeps the current (or last) run per target and enforces that a target
//! never has two in-flight runs. A trigger reserves the target's slot under
//! the sessions lock before it touches the host; the run itself executes on
//! its own task.

use chrono::Utc;
use launchpad_core::domain::context::{AnalysisSettings, Architecture, PipelineContext};
use launchpad_core::domain::log::{LogEvent, LogLevel};
use launchpad_core::domain::run::PipelineRun;
use launchpad_core::domain::target::TargetSpec;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::executor::RemoteExecutor;
use crate::service::architecture;
use crate::service::log::{LogBroadcaster, LogSubscription};
use crate::service::pipeline::{PipelineRunner, RunHandle};

/// Why a trigger was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TriggerError {
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("a deployment of '{target}' is already running (run {run_id})")]
    AlreadyRunning { target: String, run_id: Uuid },
}

/// Why a cancel request was rejected
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CancelError {
    #[error("unknown target '{0}'")]
    UnknownTarget(String),

    #[error("no deployment of '{0}' is running")]
    NotRunning(String),
}

pub type Result<T> = std::result::Result<T, TriggerError>;

/// Runs and in-progress triggers, guarded together
#[derive(Default)]
struct Sessions {
    runs: HashMap<String, Arc<RunHandle>>,
    /// Targets whose trigger is still resolving its context, with the id
    /// the run will get
    reserved: HashMap<String, Uuid>,
}

/// Holds a target's slot while its trigger resolves the context
///
/// Dropping it without `commit` frees the slot again.
struct Reservation<'a> {
    sessions: &'a Mutex<Sessions>,
    target: String,
    run_id: Uuid,
    committed: bool,
}

impl Reservation<'_> {
    /// Replaces the reservation with the run, returning the superseded one
    fn commit(mut self, handle: Arc<RunHandle>) -> Option<Arc<RunHandle>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.reserved.remove(&self.target);
        self.committed = true;
        sessions.runs.insert(self.target.clone(), handle)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.reserved.remove(&self.target);
        }
    }
}

/// One in-flight or last-completed run per target
pub struct SessionRegistry {
    config: Arc<Config>,
    executor: Arc<dyn RemoteExecutor>,
    broadcaster: Arc<LogBroadcaster>,
    runner: Arc<PipelineRunner>,
    sessions: Mutex<Sessions>,
}

impl SessionRegistry {
    pub fn new(config: Arc<Config>, executor: Arc<dyn RemoteExecutor>) -> Self {
        let broadcaster = Arc::new(LogBroadcaster::new(config.event_buffer_size));
        let runner = Arc::new(PipelineRunner::new(
            executor.clone(),
            broadcaster.clone(),
            config.stage_timeouts.clone(),
            config.output_tail_bytes,
        ));

        Self {
            config,
            executor,
            broadcaster,
            runner,
            sessions: Mutex::new(Sessions::default()),
        }
    }

    /// Configured deployment targets
    pub fn targets(&self) -> &[TargetSpec] {
        &self.config.targets
    }

    /// Starts a run for `target`, returning its initial snapshot
    ///
    /// Rejected synchronously for unknown targets, unresolvable configuration
    /// and targets that already have a run in flight. No run is created when
    /// the trigger is rejected, and a rejected concurrent trigger never
    /// reaches the host.
    pub async fn trigger(&self, target: &str) -> Result<PipelineRun> {
        let spec = self
            .config
            .target(target)
            .cloned()
            .ok_or_else(|| TriggerError::UnknownTarget(target.to_string()))?;

        let reservation = self.reserve(target)?;

        let architecture = architecture::resolve(
            self.config.architecture_override.as_deref(),
            &self.config.connection,
            self.executor.as_ref(),
            self.config.architecture_probe_timeout,
        )
        .await
        .map_err(TriggerError::Configuration)?;

        let mut run = PipelineRun::new(self.build_context(&spec, architecture));
        run.id = reservation.run_id;

        let handle = RunHandle::new(run);
        self.broadcaster.open(handle.id());
        if let Some(previous) = reservation.commit(handle.clone()) {
            tracing::debug!("Run {} for {} superseded", previous.id(), target);
        }

        let snapshot = handle.snapshot();
        tracing::info!(
            "Deployment of {} accepted as run {} ({})",
            target,
            snapshot.id,
            architecture
        );

        let runner = self.runner.clone();
        tokio::spawn(async move {
            runner.run(handle).await;
        });

        Ok(snapshot)
    }

    /// Builds the immutable context for a new run of `spec`
    pub fn build_context(&self, spec: &TargetSpec, architecture: Architecture) -> PipelineContext {
        let analysis = spec.analysis_enabled.then(|| AnalysisSettings {
            server_url: self.config.analysis_server_url.clone(),
            project_key: self.config.analysis_project_key.clone(),
            token: self.config.analysis_token.clone(),
        });

        PipelineContext {
            target: spec.name.clone(),
            repository_url: spec.repository_url.clone(),
            architecture,
            connection: self.config.connection.clone(),
            analysis,
            workspace_root: self.config.workspace_root.clone(),
            container_name: spec.container_name.clone(),
            port_mapping: spec.port_mapping,
            image_tag: Utc::now().format("%Y%m%d%H%M%S").to_string(),
        }
    }

    /// Current or last run for a target
    pub fn status(&self, target: &str) -> Option<PipelineRun> {
        self.handle_for(target).map(|h| h.snapshot())
    }

    /// Run by id, while it is still the target's current or last run
    pub fn get_run(&self, run_id: Uuid) -> Option<PipelineRun> {
        self.handle_by_id(run_id).map(|h| h.snapshot())
    }

    /// Snapshot plus live events published after it
    ///
    /// The subscription is `None` once the run has finished.
    pub fn subscribe(&self, run_id: Uuid) -> Option<(PipelineRun, Option<LogSubscription>)> {
        self.handle_by_id(run_id)
            .map(|h| h.observe(&self.broadcaster))
    }

    /// Requests cancellation of the target's in-flight run
    ///
    /// Takes effect at the next stage boundary at the latest; the in-flight
    /// command is asked to stop immediately.
    pub fn cancel(&self, target: &str) -> std::result::Result<PipelineRun, CancelError> {
        if self.config.target(target).is_none() {
            return Err(CancelError::UnknownTarget(target.to_string()));
        }

        let handle = self
            .handle_for(target)
            .filter(|h| !h.is_terminal())
            .ok_or_else(|| CancelError::NotRunning(target.to_string()))?;

        if handle.cancel() {
            tracing::info!("Cancellation requested for run {} ({})", handle.id(), target);
            handle.update(|run| {
                self.broadcaster.publish(LogEvent::message(
                    run.id,
                    LogLevel::Warning,
                    None,
                    "cancellation requested",
                ));
            });
        }

        Ok(handle.snapshot())
    }

    /// Claims the target's slot, or names the run already holding it
    fn reserve(&self, target: &str) -> Result<Reservation<'_>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        let holder = sessions
            .runs
            .get(target)
            .filter(|h| !h.is_terminal())
            .map(|h| h.id())
            .or_else(|| sessions.reserved.get(target).copied());
        if let Some(run_id) = holder {
            return Err(TriggerError::AlreadyRunning {
                target: target.to_string(),
                run_id,
            });
        }

        let run_id = Uuid::new_v4();
        sessions.reserved.insert(target.to_string(), run_id);
        Ok(Reservation {
            sessions: &self.sessions,
            target: target.to_string(),
            run_id,
            committed: false,
        })
    }

    fn handle_for(&self, target: &str) -> Option<Arc<RunHandle>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.runs.get(target).cloned()
    }

    fn handle_by_id(&self, run_id: Uuid) -> Option<Arc<RunHandle>> {
        let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.runs.values().find(|h| h.id() == run_id).cloned()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::builtin_targets;
    use crate::executor::scripted::{Response, ScriptedExecutor};
    use launchpad_core::domain::context::{ConnectionParams, Credential};
    use launchpad_core::domain::run::RunStatus;
    use launchpad_core::domain::stage::StageStatus;
    use std::time::Duration;
    use tokio::sync::Notify;

    pub(crate) fn test_config() -> Config {
        let mut config = Config::new(ConnectionParams {
            host: "10.0.0.5".to_string(),
            port: 22,
            user: "deploy".to_string(),
            credential: Credential::Agent,
        });
        config.targets = builtin_targets(
            Some("https://example.com/org/backend.git".to_string()),
            Some("https://example.com/org/frontend.git".to_string()),
        );
        config.architecture_override = Some("arm64".to_string());
        config.api_tokens = vec!["secret-token".to_string()];
        config
    }

    pub(crate) async fn wait_for_terminal(registry: &SessionRegistry, target: &str) -> PipelineRun {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Some(run) = registry.status(target).filter(|r| r.is_terminal()) {
                    return run;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("run did not finish")
    }

    pub(crate) async fn wait_for_calls(executor: &ScriptedExecutor, pattern: &str, count: usize) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while executor.count_matching(pattern) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("command was not issued")
    }

    #[tokio::test]
    async fn test_trigger_runs_to_success_and_allows_retrigger() {
        let executor = Arc::new(ScriptedExecutor::new());
        let registry = SessionRegistry::new(Arc::new(test_config()), executor.clone());

        let first = registry.trigger("backend").await.unwrap();
        assert_eq!(first.status, RunStatus::Pending);
        assert_eq!(first.context.target, "backend");
        assert_eq!(first.context.architecture, Architecture::Arm64);

        let finished = wait_for_terminal(&registry, "backend").await;
        assert_eq!(finished.id, first.id);
        assert_eq!(finished.status, RunStatus::Succeeded);
        assert_eq!(finished.stages.len(), 5);
        assert!(finished.stages.iter().all(|s| s.status == StageStatus::Succeeded));

        let second = registry.trigger("backend").await.unwrap();
        assert_ne!(second.id, first.id);
        // The superseded run is no longer addressable
        wait_for_terminal(&registry, "backend").await;
        assert!(registry.get_run(first.id).is_none());
        assert!(registry.get_run(second.id).is_some());
    }

    #[tokio::test]
    async fn test_second_trigger_is_rejected_while_running() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(ScriptedExecutor::new().blocked("git clone", gate.clone()));
        let registry = SessionRegistry::new(Arc::new(test_config()), executor.clone());

        let first = registry.trigger("frontend").await.unwrap();
        let err = registry.trigger("frontend").await.unwrap_err();
        assert_eq!(
            err,
            TriggerError::AlreadyRunning {
                target: "frontend".to_string(),
                run_id: first.id,
            }
        );

        // Another target is independent
        let other = registry.trigger("backend").await.unwrap();
        assert_ne!(other.id, first.id);

        assert_eq!(registry.status("frontend").unwrap().id, first.id);
        assert!(!registry.status("frontend").unwrap().is_terminal());

        wait_for_calls(&executor, "git clone", 2).await;
        gate.notify_waiters();
        let frontend = wait_for_terminal(&registry, "frontend").await;
        assert_eq!(frontend.id, first.id);
        assert_eq!(frontend.status, RunStatus::Succeeded);
        wait_for_terminal(&registry, "backend").await;
    }

    #[tokio::test]
    async fn test_concurrent_triggers_create_one_run() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(ScriptedExecutor::new().blocked("git clone", gate.clone()));
        let registry = Arc::new(SessionRegistry::new(Arc::new(test_config()), executor.clone()));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.trigger("backend").await })
            })
            .collect();

        let mut accepted = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(run) => accepted.push(run.id),
                Err(TriggerError::AlreadyRunning { .. }) => {}
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(accepted.len(), 1);

        wait_for_calls(&executor, "git clone", 1).await;
        gate.notify_waiters();
        wait_for_terminal(&registry, "backend").await;
    }

    #[tokio::test]
    async fn test_concurrent_triggers_ask_the_host_once() {
        let mut config = test_config();
        config.architecture_override = None;
        let executor = Arc::new(ScriptedExecutor::new().respond(
            "uname -m",
            Response::Exit {
                code: 0,
                stdout: "aarch64\n".to_string(),
                stderr: String::new(),
                delay: Duration::from_millis(50),
            },
        ));
        let registry = Arc::new(SessionRegistry::new(Arc::new(config), executor.clone()));

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.trigger("backend").await })
            })
            .collect();

        let mut accepted = Vec::new();
        let mut rejected_for = Vec::new();
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(run) => accepted.push(run.id),
                Err(TriggerError::AlreadyRunning { run_id, .. }) => rejected_for.push(run_id),
                Err(other) => panic!("unexpected error: {}", other),
            }
        }

        assert_eq!(accepted.len(), 1);
        assert_eq!(rejected_for.len(), 7);
        assert!(rejected_for.iter().all(|id| *id == accepted[0]));
        assert_eq!(executor.count_matching("uname -m"), 1);

        let finished = wait_for_terminal(&registry, "backend").await;
        assert_eq!(finished.id, accepted[0]);
        assert_eq!(finished.context.architecture, Architecture::Arm64);
    }

    #[tokio::test]
    async fn test_unresolved_architecture_frees_the_target() {
        let mut config = test_config();
        config.architecture_override = None;
        let executor = Arc::new(ScriptedExecutor::new().output("uname -m", 0, "mips\n"));
        let registry = SessionRegistry::new(Arc::new(config), executor.clone());

        for _ in 0..2 {
            let err = registry.trigger("backend").await.unwrap_err();
            assert!(matches!(err, TriggerError::Configuration(_)));
        }
        assert_eq!(executor.count_matching("uname -m"), 2);
        assert!(registry.status("backend").is_none());
    }

    #[tokio::test]
    async fn test_unknown_target_is_rejected() {
        let executor = Arc::new(ScriptedExecutor::new());
        let registry = SessionRegistry::new(Arc::new(test_config()), executor.clone());

        let err = registry.trigger("database").await.unwrap_err();
        assert_eq!(err, TriggerError::UnknownTarget("database".to_string()));
        assert!(executor.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_architecture_creates_no_run() {
        let mut config = test_config();
        config.architecture_override = None;
        let executor = Arc::new(ScriptedExecutor::new().output("uname -m", 0, "sparc64\n"));
        let registry = SessionRegistry::new(Arc::new(config), executor.clone());

        let err = registry.trigger("backend").await.unwrap_err();
        assert!(matches!(err, TriggerError::Configuration(_)));
        assert!(registry.status("backend").is_none());
        // Only the probe reached the host
        assert_eq!(executor.calls(), vec!["uname -m".to_string()]);
    }

    #[tokio::test]
    async fn test_context_follows_target() {
        let registry = SessionRegistry::new(Arc::new(test_config()), Arc::new(ScriptedExecutor::new()));

        let backend = registry.build_context(&registry.targets()[0], Architecture::Amd64);
        assert_eq!(backend.container_name, "backend-app");
        assert_eq!(backend.analysis.as_ref().unwrap().server_url, "http://10.0.0.5:9000");
        assert_eq!(backend.image_tag.len(), 14);

        let frontend = registry.build_context(&registry.targets()[1], Architecture::Amd64);
        assert!(frontend.analysis.is_none());
        assert_eq!(frontend.port_mapping.docker_arg(), "3000:80");
    }

    #[tokio::test]
    async fn test_cancel_aborts_in_flight_run() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(ScriptedExecutor::new().blocked("git clone", gate));
        let registry = SessionRegistry::new(Arc::new(test_config()), executor.clone());

        assert_eq!(
            registry.cancel("backend").unwrap_err(),
            CancelError::NotRunning("backend".to_string())
        );

        let run = registry.trigger("backend").await.unwrap();
        wait_for_calls(&executor, "git clone", 1).await;

        registry.cancel("backend").unwrap();
        let finished = wait_for_terminal(&registry, "backend").await;
        assert_eq!(finished.id, run.id);
        assert_eq!(finished.status, RunStatus::Aborted);
        assert_eq!(executor.count_matching("docker build"), 0);

        assert_eq!(
            registry.cancel("backend").unwrap_err(),
            CancelError::NotRunning("backend".to_string())
        );
        assert_eq!(
            registry.cancel("nope").unwrap_err(),
            CancelError::UnknownTarget("nope".to_string())
        );
    }

    #[tokio::test]
    async fn test_subscribe_after_finish_gets_snapshot_only() {
        let registry = SessionRegistry::new(Arc::new(test_config()), Arc::new(ScriptedExecutor::new()));
        let run = registry.trigger("frontend").await.unwrap();
        wait_for_terminal(&registry, "frontend").await;

        let (snapshot, subscription) = registry.subscribe(run.id).unwrap();
        assert_eq!(snapshot.status, RunStatus::Succeeded);
        assert!(subscription.is_none());
        assert!(registry.subscribe(Uuid::new_v4()).is_none());
    }
}
