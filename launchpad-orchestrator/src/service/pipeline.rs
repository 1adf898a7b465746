//! Pipeline Service
//!
//! The pipeline state machine: drives one `PipelineRun` through the ordered
//! stage list, one stage at a time, and decides after each stage whether to
//! continue, fail the run or abort it.
//!
//! Every change to the run record is made under the run's lock together with
//! the matching `LogEvent` publication, so an observer that takes a snapshot
//! and subscribes under the same lock never misses or double-counts a change.

use launchpad_core::domain::context::PipelineContext;
use launchpad_core::domain::log::{LogEvent, LogLevel, OutputStream};
use launchpad_core::domain::run::{PipelineRun, RunStatus};
use launchpad_core::domain::stage::{StageError, StageErrorKind, StageName, StageStatus};
use std::sync::{Arc, Mutex};
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::StageTimeouts;
use crate::executor::{CancelHandle, CancelSignal, ExecError, OutputSink, RemoteExecutor};
use crate::service::log::{LogBroadcaster, LogSubscription};
use crate::stages::{self, StageDefinition};

/// Shared record of one run: its state, and the switch that cancels it
pub struct RunHandle {
    id: Uuid,
    target: String,
    run: Mutex<PipelineRun>,
    cancel: CancelHandle,
}

impl RunHandle {
    pub fn new(run: PipelineRun) -> Arc<Self> {
        let (cancel, _signal) = CancelHandle::new();
        Arc::new(Self {
            id: run.id,
            target: run.target().to_string(),
            run: Mutex::new(run),
            cancel,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Point-in-time copy of the run
    pub fn snapshot(&self) -> PipelineRun {
        self.update(|run| run.clone())
    }

    pub fn is_terminal(&self) -> bool {
        self.update(|run| run.is_terminal())
    }

    /// Runs `f` with the run locked
    pub fn update<R>(&self, f: impl FnOnce(&mut PipelineRun) -> R) -> R {
        let mut run = self.run.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut run)
    }

    /// Snapshot plus a subscription to everything published after it
    pub fn observe(&self, broadcaster: &LogBroadcaster) -> (PipelineRun, Option<LogSubscription>) {
        self.update(|run| (run.clone(), broadcaster.subscribe(self.id)))
    }

    /// Requests cancellation; returns false if it was already requested
    pub fn cancel(&self) -> bool {
        self.cancel.cancel()
    }

    pub fn cancel_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.signal()
    }
}

/// How a stage ended
#[derive(Debug, Clone, PartialEq, Eq)]
struct StageOutcome {
    status: StageStatus,
    exit_code: Option<i32>,
    error: Option<StageError>,
}

impl StageOutcome {
    fn succeeded() -> Self {
        Self {
            status: StageStatus::Succeeded,
            exit_code: Some(0),
            error: None,
        }
    }

    fn failed(exit_code: i32, error: StageError) -> Self {
        Self {
            status: StageStatus::Failed,
            exit_code: Some(exit_code),
            error: Some(error),
        }
    }

    fn error_kind(&self) -> Option<StageErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

/// Appends executor output to the running stage and relays it live
struct StageOutputSink<'a> {
    handle: &'a RunHandle,
    broadcaster: &'a LogBroadcaster,
    stage: StageName,
    limit: usize,
}

impl OutputSink for StageOutputSink<'_> {
    fn emit(&self, stream: OutputStream, text: &str) {
        self.handle.update(|run| {
            if run.append_output(self.stage, text, self.limit) {
                self.broadcaster
                    .publish(LogEvent::output(run.id, self.stage, stream, text));
            }
        });
    }
}

/// Executes runs against a remote host
pub struct PipelineRunner {
    executor: Arc<dyn RemoteExecutor>,
    broadcaster: Arc<LogBroadcaster>,
    timeouts: StageTimeouts,
    output_tail_bytes: usize,
}

impl PipelineRunner {
    pub fn new(
        executor: Arc<dyn RemoteExecutor>,
        broadcaster: Arc<LogBroadcaster>,
        timeouts: StageTimeouts,
        output_tail_bytes: usize,
    ) -> Self {
        Self {
            executor,
            broadcaster,
            timeouts,
            output_tail_bytes,
        }
    }

    /// Drives the run to a terminal status and returns it
    ///
    /// The run's event channel must already be open; it is closed on return.
    pub async fn run(&self, handle: Arc<RunHandle>) -> RunStatus {
        let run_id = handle.id();
        let context = handle.update(|run| run.context.clone());
        let plan = stages::plan(&context, &self.timeouts);

        let started = handle.update(|run| {
            let started = run.start();
            if started {
                self.broadcaster
                    .publish(LogEvent::run_transition(run_id, RunStatus::Running));
            }
            started
        });
        if !started {
            tracing::warn!("Run {} was not pending, not starting it", run_id);
            self.broadcaster.close(run_id);
            return handle.update(|run| run.status);
        }

        tracing::info!("Pipeline {} started for {}", run_id, handle.target());

        let mut status = RunStatus::Succeeded;
        let mut skip_reason = String::new();

        for definition in &plan {
            if handle.cancel_requested() {
                status = RunStatus::Aborted;
                skip_reason = "run cancelled".to_string();
                break;
            }

            if let Some(reason) = &definition.skip_reason {
                self.skip_stage(&handle, definition.name, reason);
                continue;
            }

            let began = handle.update(|run| {
                let began = run.begin_stage(definition.name);
                if began {
                    self.broadcaster.publish(LogEvent::stage_transition(
                        run_id,
                        definition.name,
                        StageStatus::Running,
                        None,
                    ));
                }
                began
            });
            if !began {
                tracing::error!("Run {} refused to begin {}", run_id, definition.name);
                status = RunStatus::Failed;
                skip_reason = format!("{} could not start", definition.name);
                break;
            }

            let outcome = self.run_stage(&handle, &context, definition).await;
            self.finish_stage(&handle, definition.name, &outcome);

            if outcome.status != StageStatus::Failed {
                continue;
            }

            if outcome.error_kind() == Some(StageErrorKind::Cancelled) {
                status = RunStatus::Aborted;
                skip_reason = "run cancelled".to_string();
                break;
            }

            if definition.fatal {
                status = RunStatus::Failed;
                skip_reason = format!("skipped after {} failed", definition.name);
                break;
            }

            self.note(
                &handle,
                LogLevel::Warning,
                Some(definition.name),
                format!("{} failed; continuing, stage is non-fatal", definition.name),
            );
        }

        if status == RunStatus::Succeeded {
            self.note(
                &handle,
                LogLevel::Info,
                None,
                format!(
                    "Please visit: http://{}:{}",
                    context.connection.host, context.port_mapping.host
                ),
            );
        }

        self.finish_run(&handle, status, &skip_reason);
        self.broadcaster.close(run_id);

        tracing::info!("Pipeline {} for {} finished: {}", run_id, handle.target(), status);
        status
    }

    /// Runs a stage's commands in order against one deadline
    async fn run_stage(
        &self,
        handle: &RunHandle,
        context: &PipelineContext,
        definition: &StageDefinition,
    ) -> StageOutcome {
        let stage = definition.name;
        let deadline = Instant::now() + definition.timeout;
        let sink = StageOutputSink {
            handle,
            broadcaster: &self.broadcaster,
            stage,
            limit: self.output_tail_bytes,
        };

        let mut first_failure: Option<StageOutcome> = None;

        for command in &definition.commands {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                first_failure.get_or_insert(timed_out(definition));
                break;
            }

            self.note(
                handle,
                LogLevel::Debug,
                Some(stage),
                format!("$ {}", command.display),
            );

            let result = self
                .executor
                .execute(
                    &context.connection,
                    &command.command,
                    remaining,
                    &sink,
                    handle.cancel_signal(),
                )
                .await;

            let failure = match result {
                Ok(0) => continue,
                Ok(code) => StageOutcome::failed(
                    code,
                    StageError::new(
                        StageErrorKind::CommandFailure,
                        format!("{} command exited with status {}", stage, code),
                    ),
                ),
                Err(ExecError::Timeout(_)) => timed_out(definition),
                Err(e) => StageOutcome::failed(e.exit_code(), StageError::new(error_kind(&e), e.to_string())),
            };

            tracing::debug!("{} command failed for run {}: {:?}", stage, handle.id(), failure.error);

            let recoverable = failure.error_kind() == Some(StageErrorKind::CommandFailure);
            first_failure.get_or_insert(failure);
            if !(definition.keep_going && recoverable) {
                break;
            }
        }

        first_failure.unwrap_or_else(StageOutcome::succeeded)
    }

    fn finish_stage(&self, handle: &RunHandle, stage: StageName, outcome: &StageOutcome) {
        handle.update(|run| {
            let finished =
                run.finish_stage(stage, outcome.status, outcome.exit_code, outcome.error.clone());
            if finished {
                self.broadcaster.publish(LogEvent::stage_transition(
                    run.id,
                    stage,
                    outcome.status,
                    outcome.exit_code,
                ));
                if let Some(error) = &outcome.error {
                    self.broadcaster.publish(LogEvent::message(
                        run.id,
                        LogLevel::Error,
                        Some(stage),
                        error.message.clone(),
                    ));
                }
            }
        });
    }

    fn skip_stage(&self, handle: &RunHandle, stage: StageName, reason: &str) {
        handle.update(|run| {
            if run.skip_stage(stage, reason) {
                self.broadcaster.publish(LogEvent::stage_transition(
                    run.id,
                    stage,
                    StageStatus::Skipped,
                    None,
                ));
                self.broadcaster.publish(LogEvent::message(
                    run.id,
                    LogLevel::Info,
                    Some(stage),
                    reason,
                ));
            }
        });
    }

    /// Skips what is left, then moves the run to its terminal status
    fn finish_run(&self, handle: &RunHandle, status: RunStatus, skip_reason: &str) {
        handle.update(|run| {
            for stage in run.skip_remaining(skip_reason) {
                self.broadcaster.publish(LogEvent::stage_transition(
                    run.id,
                    stage,
                    StageStatus::Skipped,
                    None,
                ));
            }
            if run.finish(status) {
                self.broadcaster
                    .publish(LogEvent::run_transition(run.id, status));
            }
        });
    }

    fn note(&self, handle: &RunHandle, level: LogLevel, stage: Option<StageName>, text: String) {
        handle.update(|run| {
            self.broadcaster
                .publish(LogEvent::message(run.id, level, stage, text));
        });
    }
}

fn timed_out(definition: &StageDefinition) -> StageOutcome {
    let error = ExecError::Timeout(definition.timeout);
    StageOutcome::failed(
        error.exit_code(),
        StageError::new(
            StageErrorKind::Timeout,
            format!(
                "{} exceeded its {}s timeout",
                definition.name,
                definition.timeout.as_secs()
            ),
        ),
    )
}

fn error_kind(error: &ExecError) -> StageErrorKind {
    match error {
        ExecError::Timeout(_) => StageErrorKind::Timeout,
        ExecError::Cancelled => StageErrorKind::Cancelled,
        ExecError::Connection(_) => StageErrorKind::Connection,
        ExecError::EmptyCommand | ExecError::Spawn(_) => StageErrorKind::CommandFailure,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::scripted::ScriptedExecutor;
    use crate::service::log::Delivery;
    use crate::stages::tests::{backend_context, frontend_context};
    use launchpad_core::domain::log::LogEventKind;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn build_runner(executor: Arc<ScriptedExecutor>, timeouts: StageTimeouts) -> (PipelineRunner, Arc<LogBroadcaster>) {
        let broadcaster = Arc::new(LogBroadcaster::new(1024));
        let runner = PipelineRunner::new(executor, broadcaster.clone(), timeouts, 1024);
        (runner, broadcaster)
    }

    fn open_run(broadcaster: &LogBroadcaster, context: PipelineContext) -> Arc<RunHandle> {
        let handle = RunHandle::new(PipelineRun::new(context));
        broadcaster.open(handle.id());
        handle
    }

    fn statuses(run: &PipelineRun) -> Vec<(StageName, StageStatus)> {
        run.stages.iter().map(|s| (s.stage, s.status)).collect()
    }

    #[tokio::test]
    async fn test_all_stages_succeed() {
        let executor = Arc::new(ScriptedExecutor::new().output("git clone", 0, "Cloning\n"));
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        let status = runner.run(handle.clone()).await;

        assert_eq!(status, RunStatus::Succeeded);
        let run = handle.snapshot();
        assert_eq!(run.status, RunStatus::Succeeded);
        assert_eq!(
            statuses(&run),
            StageName::ALL
                .iter()
                .map(|s| (*s, StageStatus::Succeeded))
                .collect::<Vec<_>>()
        );
        assert!(run.stages.iter().all(|s| s.exit_code == Some(0)));
        assert!(run.stages[0].output.contains("Cloning"));
        assert!(run.completed_at.is_some());
        assert!(!broadcaster.is_open(run.id));
    }

    #[tokio::test]
    async fn test_fatal_docker_failure_skips_rest() {
        let executor = Arc::new(
            ScriptedExecutor::new().stderr("docker build", 1, "no Dockerfile\n"),
        );
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Failed);

        let run = handle.snapshot();
        assert_eq!(
            statuses(&run),
            vec![
                (StageName::Git, StageStatus::Succeeded),
                (StageName::Sonar, StageStatus::Succeeded),
                (StageName::Docker, StageStatus::Failed),
                (StageName::Deploy, StageStatus::Skipped),
                (StageName::Pentest, StageStatus::Skipped),
            ]
        );

        let docker = &run.stages[2];
        assert_eq!(docker.exit_code, Some(1));
        assert_eq!(docker.error.as_ref().unwrap().kind, StageErrorKind::CommandFailure);
        assert!(docker.output.contains("no Dockerfile"));
        assert_eq!(run.failed_stage().unwrap().stage, StageName::Docker);

        assert_eq!(executor.count_matching("docker run -d"), 0);
        assert_eq!(executor.count_matching("nmap"), 0);
    }

    #[tokio::test]
    async fn test_non_fatal_failures_do_not_fail_run() {
        let executor = Arc::new(
            ScriptedExecutor::new()
                .exit("sonar:sonar", 1)
                .exit("nmap", 2),
        );
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Succeeded);

        let run = handle.snapshot();
        assert_eq!(run.stages[1].status, StageStatus::Failed);
        assert_eq!(run.stages[3].status, StageStatus::Succeeded);
        assert_eq!(run.stages[4].status, StageStatus::Failed);
        assert_eq!(run.stages[4].exit_code, Some(2));
        // The web scan still runs after the port scan fails
        assert_eq!(executor.count_matching("nikto"), 1);
    }

    #[tokio::test]
    async fn test_fatal_failure_stops_within_stage() {
        let executor = Arc::new(ScriptedExecutor::new().exit("mkdir -p", 1));
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Failed);
        assert_eq!(executor.calls().len(), 1);

        let run = handle.snapshot();
        assert_eq!(run.stages.len(), 5);
        assert!(run.stages[1..].iter().all(|s| s.status == StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_stage_timeout_is_recorded() {
        let executor = Arc::new(ScriptedExecutor::new().delay("git clone", Duration::from_secs(30)));
        let (runner, broadcaster) = build_runner(executor, StageTimeouts::uniform(Duration::from_millis(100)));
        let handle = open_run(&broadcaster, backend_context());

        let status = tokio::time::timeout(Duration::from_secs(5), runner.run(handle.clone()))
            .await
            .unwrap();

        assert_eq!(status, RunStatus::Failed);
        let git = &handle.snapshot().stages[0];
        assert_eq!(git.status, StageStatus::Failed);
        assert_eq!(git.exit_code, Some(124));
        assert_eq!(git.error.as_ref().unwrap().kind, StageErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_connection_error_fails_stage() {
        let executor = Arc::new(
            ScriptedExecutor::new().error("mkdir", ExecError::Connection("No route to host".into())),
        );
        let (runner, broadcaster) = build_runner(executor, StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Failed);
        let git = &handle.snapshot().stages[0];
        assert_eq!(git.exit_code, Some(255));
        assert_eq!(git.error.as_ref().unwrap().kind, StageErrorKind::Connection);
    }

    #[tokio::test]
    async fn test_analysis_disabled_records_sonar_skipped() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, frontend_context());

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Succeeded);

        let run = handle.snapshot();
        let names: Vec<StageName> = run.stages.iter().map(|s| s.stage).collect();
        assert_eq!(names, StageName::ALL.to_vec());
        assert_eq!(run.stages[1].status, StageStatus::Skipped);
        assert!(run.stages[1].skip_reason.is_some());
        assert_eq!(executor.count_matching("sonar"), 0);
    }

    #[tokio::test]
    async fn test_cancel_during_stage_aborts_run() {
        let gate = Arc::new(Notify::new());
        let executor = Arc::new(ScriptedExecutor::new().blocked("docker build", gate));
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        let task = {
            let handle = handle.clone();
            tokio::spawn(async move { runner.run(handle).await })
        };

        while executor.count_matching("docker build") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(handle.cancel());

        assert_eq!(task.await.unwrap(), RunStatus::Aborted);
        let run = handle.snapshot();
        assert_eq!(run.stages[2].status, StageStatus::Failed);
        assert_eq!(run.stages[2].exit_code, Some(130));
        assert_eq!(run.stages[2].error.as_ref().unwrap().kind, StageErrorKind::Cancelled);
        assert_eq!(run.stages[3].status, StageStatus::Skipped);
        assert_eq!(run.stages[4].status, StageStatus::Skipped);
        assert_eq!(executor.count_matching("docker run -d"), 0);
    }

    #[tokio::test]
    async fn test_cancel_before_start_aborts_at_first_boundary() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (runner, broadcaster) = build_runner(executor.clone(), StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());
        handle.cancel();

        assert_eq!(runner.run(handle.clone()).await, RunStatus::Aborted);
        assert!(executor.calls().is_empty());
        let run = handle.snapshot();
        assert_eq!(run.stages.len(), 5);
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Skipped));
    }

    #[tokio::test]
    async fn test_observer_sees_transitions_in_order() {
        let executor = Arc::new(ScriptedExecutor::new().exit("docker build", 1));
        let (runner, broadcaster) = build_runner(executor, StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());

        let (snapshot, subscription) = handle.observe(&broadcaster);
        assert_eq!(snapshot.status, RunStatus::Pending);
        let mut subscription = subscription.unwrap();

        runner.run(handle.clone()).await;

        let mut transitions = Vec::new();
        let mut last = None;
        while let Some(delivery) = subscription.next().await {
            let Delivery::Event(event) = delivery else {
                panic!("unexpected lag");
            };
            match &event.kind {
                LogEventKind::StageTransition { stage, status, .. } => {
                    transitions.push((*stage, *status))
                }
                LogEventKind::RunTransition { status } => last = Some(*status),
                _ => {}
            }
        }

        assert_eq!(
            transitions,
            vec![
                (StageName::Git, StageStatus::Running),
                (StageName::Git, StageStatus::Succeeded),
                (StageName::Sonar, StageStatus::Running),
                (StageName::Sonar, StageStatus::Succeeded),
                (StageName::Docker, StageStatus::Running),
                (StageName::Docker, StageStatus::Failed),
                (StageName::Deploy, StageStatus::Skipped),
                (StageName::Pentest, StageStatus::Skipped),
            ]
        );
        assert_eq!(last, Some(RunStatus::Failed));
    }

    #[tokio::test]
    async fn test_success_message_points_at_service() {
        let executor = Arc::new(ScriptedExecutor::new());
        let (runner, broadcaster) = build_runner(executor, StageTimeouts::default());
        let handle = open_run(&broadcaster, backend_context());
        let mut subscription = handle.observe(&broadcaster).1.unwrap();

        runner.run(handle).await;

        let mut notes = Vec::new();
        while let Some(Delivery::Event(event)) = subscription.next().await {
            if let LogEventKind::Message { text, .. } = event.kind {
                notes.push(text);
            }
        }
        assert!(notes.contains(&"Please visit: http://10.0.0.5:8080".to_string()));
        // Secrets are masked in command announcements
        assert!(notes.iter().any(|n| n.contains("-Dsonar.login=***")));
        assert!(notes.iter().all(|n| !n.contains("sqp_secret")));
    }
}
