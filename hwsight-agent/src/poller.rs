use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};

use hwsight_engine::model::MonitorJob;
use hwsight_engine::{
    ConnectorRegistry, HostContext, JobOrchestrator, JobReport, JobRequest, JobResultSet,
    PhaseKind,
};

use crate::config::HostConfig;
use crate::health::AgentHealth;

/// Which schedule fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    Discovery,
    Collect,
}

/// One job run of a poll cycle.
#[derive(Debug, Clone)]
pub struct HostJob {
    pub connector: String,
    pub monitor: String,
    pub phase: PhaseKind,
    pub report: JobReport,
}

/// Printable form of a poll cycle's jobs.
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub host: String,
    pub connector: String,
    pub monitor: String,
    pub phase: String,
    pub status: String,
    pub elapsed_ms: u64,
    pub results: serde_json::Value,
}

impl HostJob {
    pub fn summary(&self, host: &str) -> JobSummary {
        JobSummary {
            host: host.to_string(),
            connector: self.connector.clone(),
            monitor: self.monitor.clone(),
            phase: self.phase.to_string(),
            status: self.report.status.to_string(),
            elapsed_ms: self.report.elapsed.as_millis() as u64,
            results: self.report.results.to_json(),
        }
    }
}

/// Drives the jobs of one host on its discovery and collect schedules.
pub struct HostPoller {
    host: HostConfig,
    context: Arc<HostContext>,
    /// Replaced wholesale when connectors are reloaded.
    registry: watch::Receiver<Arc<ConnectorRegistry>>,
    orchestrator: JobOrchestrator,
    health: Arc<AgentHealth>,
    interrupt: watch::Receiver<bool>,
    /// Latest tables per (connector, monitor), fed back into later runs.
    previous: HashMap<(String, String), Arc<JobResultSet>>,
}

impl HostPoller {
    pub fn new(
        host: HostConfig,
        registry: watch::Receiver<Arc<ConnectorRegistry>>,
        health: Arc<AgentHealth>,
        interrupt: watch::Receiver<bool>,
    ) -> Self {
        let context = Arc::new(host.context());
        let orchestrator = crate::orchestrator(&host);
        Self {
            host,
            context,
            registry,
            orchestrator,
            health,
            interrupt,
            previous: HashMap::new(),
        }
    }

    /// Run the polling loop until interrupted.
    pub async fn run(mut self) {
        let mut discovery = interval(Duration::from_secs(self.host.discovery_interval_secs));
        let mut collect = interval(Duration::from_secs(self.host.collect_interval_secs));
        discovery.set_missed_tick_behavior(MissedTickBehavior::Skip);
        collect.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut interrupt = self.interrupt.clone();

        tracing::info!(
            host = %self.host.hostname,
            connectors = ?self.host.connectors,
            discovery_interval_secs = self.host.discovery_interval_secs,
            collect_interval_secs = self.host.collect_interval_secs,
            "Starting host poller"
        );

        loop {
            // Discovery first: collect jobs read what it found.
            let cycle = tokio::select! {
                biased;
                _ = interrupted(&mut interrupt) => break,
                _ = discovery.tick() => Cycle::Discovery,
                _ = collect.tick() => Cycle::Collect,
            };
            self.poll(cycle).await;
        }

        tracing::info!(host = %self.host.hostname, "Host poller stopped");
    }

    /// One discovery pass followed by one collect pass.
    pub async fn poll_once(&mut self) -> Vec<HostJob> {
        let mut jobs = self.poll(Cycle::Discovery).await;
        jobs.extend(self.poll(Cycle::Collect).await);
        jobs
    }

    /// The registry in effect for the next cycle. A running cycle keeps the
    /// registry it started with.
    fn current_registry(&mut self) -> Arc<ConnectorRegistry> {
        if self.registry.has_changed().unwrap_or(false) {
            tracing::info!(host = %self.host.hostname, "Using reloaded connectors");
        }
        Arc::clone(&self.registry.borrow_and_update())
    }

    /// Run every job `cycle` calls for, connector by connector.
    pub async fn poll(&mut self, cycle: Cycle) -> Vec<HostJob> {
        let registry = self.current_registry();
        let mut jobs = Vec::new();

        for connector_id in &self.host.connectors {
            let Some(connector) = registry.get(connector_id) else {
                tracing::warn!(
                    host = %self.host.hostname,
                    connector = %connector_id,
                    "Connector not loaded, skipping"
                );
                continue;
            };

            for (monitor, job) in connector.monitors() {
                let phase = match (cycle, job) {
                    (Cycle::Discovery, MonitorJob::Standard { discovery: Some(_), .. }) => {
                        PhaseKind::Discovery
                    }
                    (Cycle::Collect, MonitorJob::Standard { collect: Some(_), .. }) => {
                        PhaseKind::Collect
                    }
                    (Cycle::Collect, MonitorJob::Simple { .. }) => PhaseKind::Simple,
                    _ => continue,
                };

                let slot = (connector_id.clone(), monitor.clone());
                let mut request =
                    JobRequest::new(Arc::clone(&connector), monitor, phase, Arc::clone(&self.context));
                if let Some(previous) = self.previous.get(&slot) {
                    request = request.with_previous(Arc::clone(previous));
                }

                let report = match self.orchestrator.run(request, self.interrupt.clone()).await {
                    Ok(report) => report,
                    Err(e) => {
                        tracing::warn!(
                            host = %self.host.hostname,
                            connector = %connector_id,
                            monitor = %monitor,
                            phase = %phase,
                            error = %e,
                            "Job rejected"
                        );
                        continue;
                    }
                };

                self.health.record_job(&self.host.hostname, &report);
                log_failures(&self.host.hostname, &report);

                let merged = match self.previous.get(&slot) {
                    Some(previous) => previous.merged(&report.results),
                    None => report.results.clone(),
                };
                self.previous.insert(slot, Arc::new(merged));

                jobs.push(HostJob {
                    connector: connector_id.clone(),
                    monitor: monitor.clone(),
                    phase,
                    report,
                });

                if *self.interrupt.borrow() {
                    return jobs;
                }
            }
        }
        jobs
    }
}

fn log_failures(host: &str, report: &JobReport) {
    for key in report.results.failed_keys() {
        for error in report.results.errors(key) {
            tracing::warn!(host = %host, source = %key, error = %error, "Source failed");
        }
    }
}

async fn interrupted(interrupt: &mut watch::Receiver<bool>) {
    // A dropped sender means nobody can interrupt any more.
    if interrupt.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}
