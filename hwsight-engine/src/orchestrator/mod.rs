//! The job orchestrator: runs one phase of one monitor against one host.
//!
//! The pre phase's waves run first, then the requested phase's. Waves run
//! strictly one after the other; within a wave, sources go through the
//! two-lane scheduler. A strategy timeout bounds the whole run and an
//! external interrupt may end it early; in both cases in-flight sources
//! are cancelled and the tables of completed sources are kept.

mod lanes;
mod result;
mod status;

pub use lanes::{LaneGuard, Lanes};
pub use result::{JobResultSet, WaveView};
pub use status::{FailureReason, JobStatus, StatusTracker};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::{Id, JoinSet};
use tokio::time::Instant;

use crate::collaborator::{CancelHandle, CancelSignal, HostContext, cancellation};
use crate::error::{EngineError, Result, SourceError};
use crate::executor::{ExecutionScope, SourceExecutor, SourceOutcome};
use crate::model::{Connector, PhaseKind};
use crate::resolver::ExecutionPlan;

/// Tuning for job runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorSettings {
    /// Concurrent sources per job run.
    pub max_workers: usize,
    /// Bound on a whole job run.
    pub strategy_timeout: Duration,
    /// Pause before retrying a source that unexpectedly returned nothing.
    pub retry_delay: Duration,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self {
            max_workers: 20,
            strategy_timeout: Duration::from_secs(120),
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// One job run to perform.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub connector: Arc<Connector>,
    pub monitor: String,
    pub phase: PhaseKind,
    pub host: Arc<HostContext>,
    /// Tables from earlier runs on the same host, for references the
    /// current run does not satisfy and for the empty-result retry.
    pub previous: Option<Arc<JobResultSet>>,
}

impl JobRequest {
    pub fn new(
        connector: Arc<Connector>,
        monitor: impl Into<String>,
        phase: PhaseKind,
        host: Arc<HostContext>,
    ) -> Self {
        Self {
            connector,
            monitor: monitor.into(),
            phase,
            host,
            previous: None,
        }
    }

    pub fn with_previous(mut self, previous: Arc<JobResultSet>) -> Self {
        self.previous = Some(previous);
        self
    }
}

/// How a job run ended.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub status: JobStatus,
    pub results: JobResultSet,
    pub waves_total: usize,
    pub waves_completed: usize,
    pub elapsed: Duration,
}

impl JobReport {
    pub fn is_completed(&self) -> bool {
        self.status == JobStatus::Completed
    }
}

/// How a wave ended.
enum WaveEnd {
    Drained,
    Failed(FailureReason),
}

/// Runs job requests. Cheap to clone and share between hosts.
#[derive(Clone)]
pub struct JobOrchestrator {
    executor: Arc<SourceExecutor>,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    pub fn new(executor: SourceExecutor, settings: OrchestratorSettings) -> Self {
        let executor = executor.with_retry_delay(settings.retry_delay);
        Self {
            executor: Arc::new(executor),
            settings,
        }
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    /// Run `request` to completion, timeout or interruption.
    ///
    /// Fails only when the request names a phase the connector does not
    /// define. Setting `interrupt` to `true` ends the run.
    pub async fn run(
        &self,
        request: JobRequest,
        interrupt: watch::Receiver<bool>,
    ) -> Result<JobReport> {
        self.run_observed(request, interrupt, &StatusTracker::new())
            .await
    }

    /// Like [`JobOrchestrator::run`], publishing status changes to `tracker`.
    pub async fn run_observed(
        &self,
        request: JobRequest,
        mut interrupt: watch::Receiver<bool>,
        tracker: &StatusTracker,
    ) -> Result<JobReport> {
        let started = Instant::now();
        let plan = self.plan(&request)?;
        let connector = &request.connector;

        tracing::info!(
            host = %request.host.hostname,
            connector = %connector.id(),
            monitor = %request.monitor,
            phase = %request.phase,
            waves = plan.len(),
            sources = plan.source_count(),
            "Starting job"
        );

        let deadline = started + self.settings.strategy_timeout;
        let lanes = Lanes::new(self.settings.max_workers);
        let (cancel_handle, cancel_signal) = cancellation();
        let mut results = JobResultSet::new();
        let mut waves_completed = 0;
        let mut failure = None;

        for (index, wave) in plan.waves().iter().enumerate() {
            if *interrupt.borrow() {
                failure = Some(FailureReason::Interrupted);
                break;
            }
            if Instant::now() >= deadline {
                failure = Some(FailureReason::Timeout);
                break;
            }

            tracker.transition(JobStatus::Running { wave: index })?;
            tracing::debug!(
                host = %request.host.hostname,
                wave = index,
                sources = wave.len(),
                "Running wave"
            );

            let view = Arc::new(WaveView::new(results.clone(), request.previous.clone()));
            let mut tasks = JoinSet::new();
            let mut keys: HashMap<Id, String> = HashMap::new();

            for key in wave {
                let task = SourceTask {
                    key: key.clone(),
                    connector: Arc::clone(connector),
                    host: Arc::clone(&request.host),
                    view: Arc::clone(&view),
                    executor: Arc::clone(&self.executor),
                    lanes: lanes.clone(),
                    cancel: cancel_signal.clone(),
                };
                let handle = tasks.spawn(task.run());
                keys.insert(handle.id(), key.clone());
            }

            let end = {
                let drain = drain(&mut tasks, &keys, &mut results);
                tokio::pin!(drain);
                tokio::select! {
                    biased;
                    _ = &mut drain => WaveEnd::Drained,
                    _ = tokio::time::sleep_until(deadline) => WaveEnd::Failed(FailureReason::Timeout),
                    _ = interrupted(&mut interrupt) => WaveEnd::Failed(FailureReason::Interrupted),
                }
            };

            match end {
                WaveEnd::Drained => waves_completed += 1,
                WaveEnd::Failed(reason) => {
                    abandon(&cancel_handle, &mut tasks, &keys, &mut results, reason).await;
                    failure = Some(reason);
                    break;
                }
            }
        }

        let status = match failure {
            None => JobStatus::Completed,
            Some(reason) => JobStatus::Failed(reason),
        };
        tracker.transition(status)?;

        let elapsed = started.elapsed();
        match status {
            JobStatus::Completed => tracing::info!(
                host = %request.host.hostname,
                connector = %connector.id(),
                monitor = %request.monitor,
                phase = %request.phase,
                tables = results.len(),
                errors = results.error_count(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Job completed"
            ),
            _ => tracing::warn!(
                host = %request.host.hostname,
                connector = %connector.id(),
                monitor = %request.monitor,
                phase = %request.phase,
                status = %status,
                waves_completed,
                waves_total = plan.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Job ended early"
            ),
        }

        Ok(JobReport {
            status,
            results,
            waves_total: plan.len(),
            waves_completed,
            elapsed,
        })
    }

    /// The pre phase's waves followed by the requested phase's.
    fn plan(&self, request: &JobRequest) -> Result<ExecutionPlan> {
        let connector = &request.connector;
        let phase = connector
            .phase(&request.monitor, request.phase)
            .ok_or_else(|| {
                EngineError::invalid_request(format!(
                    "connector '{}' has no {} phase for monitor '{}'",
                    connector.id(),
                    request.phase,
                    request.monitor
                ))
            })?;

        match (request.phase, connector.pre()) {
            (PhaseKind::Pre, _) | (_, None) => Ok(phase.plan().clone()),
            (_, Some(pre)) => Ok(pre.plan().chain(phase.plan())),
        }
    }
}

/// Everything one spawned source execution owns.
struct SourceTask {
    key: String,
    connector: Arc<Connector>,
    host: Arc<HostContext>,
    view: Arc<WaveView>,
    executor: Arc<SourceExecutor>,
    lanes: Lanes,
    cancel: CancelSignal,
}

impl SourceTask {
    async fn run(self) -> SourceOutcome {
        let Some(source) = self.connector.source(&self.key) else {
            return SourceOutcome {
                errors: vec![SourceError::MissingReference(self.key.clone())],
                ..SourceOutcome::default()
            };
        };

        let _guard = self.lanes.enter(source.force_serialization).await;
        let scope = ExecutionScope {
            connector: &self.connector,
            host: &self.host,
            tables: self.view.as_ref(),
            previous: self.view.previous(&self.key),
            cancel: &self.cancel,
        };
        self.executor.resolve(source, &scope).await
    }
}

/// Collect every task of the wave into `results`.
async fn drain(
    tasks: &mut JoinSet<SourceOutcome>,
    keys: &HashMap<Id, String>,
    results: &mut JobResultSet,
) {
    while let Some(joined) = tasks.join_next_with_id().await {
        collect(joined, keys, results, None);
    }
}

/// Cancel the rest of the wave, keeping whatever already finished.
async fn abandon(
    cancel: &CancelHandle,
    tasks: &mut JoinSet<SourceOutcome>,
    keys: &HashMap<Id, String>,
    results: &mut JobResultSet,
    reason: FailureReason,
) {
    cancel.cancel();
    tasks.abort_all();
    while let Some(joined) = tasks.join_next_with_id().await {
        collect(joined, keys, results, Some(reason));
    }
}

fn collect(
    joined: std::result::Result<(Id, SourceOutcome), tokio::task::JoinError>,
    keys: &HashMap<Id, String>,
    results: &mut JobResultSet,
    reason: Option<FailureReason>,
) {
    match joined {
        Ok((id, outcome)) => {
            if let Some(key) = keys.get(&id) {
                results.record(key.clone(), outcome);
            }
        }
        Err(error) => {
            let Some(key) = keys.get(&error.id()) else {
                return;
            };
            let message = match reason {
                Some(reason) if error.is_cancelled() => format!("cancelled on {reason}"),
                _ => error.to_string(),
            };
            if error.is_panic() {
                tracing::error!(source = %key, error = %error, "Source task panicked");
            }
            results.record_error(key.clone(), SourceError::Aborted(message));
        }
    }
}

/// Resolve once `interrupt` is set. Pends forever if the sender is gone.
async fn interrupted(interrupt: &mut watch::Receiver<bool>) {
    loop {
        if *interrupt.borrow_and_update() {
            return;
        }
        if interrupt.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
