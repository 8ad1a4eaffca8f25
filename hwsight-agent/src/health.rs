//! Agent health counters and per-host liveness.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::RwLock;

use hwsight_common::{HealthSnapshot, HostLiveness, HostStatus, current_timestamp_millis};
use hwsight_engine::{FailureReason, JobReport, JobStatus};

/// Agent health metrics, shared by every poller.
#[derive(Debug)]
pub struct AgentHealth {
    agent_name: String,
    start_time: Instant,
    hosts_total: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_timed_out: AtomicU64,
    jobs_interrupted: AtomicU64,
    sources_failed: AtomicU64,
    last_job_duration_ms: AtomicU64,
    hosts: RwLock<HashMap<String, HostLiveness>>,
}

impl AgentHealth {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            start_time: Instant::now(),
            hosts_total: AtomicU64::new(0),
            jobs_completed: AtomicU64::new(0),
            jobs_timed_out: AtomicU64::new(0),
            jobs_interrupted: AtomicU64::new(0),
            sources_failed: AtomicU64::new(0),
            last_job_duration_ms: AtomicU64::new(0),
            hosts: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_hosts_total(&self, count: u64) {
        self.hosts_total.store(count, Ordering::SeqCst);
    }

    /// Account for one finished job run against `host`.
    ///
    /// A timeout, or a completed run where every source failed, counts as
    /// a failed contact. Interrupted runs leave the host's status as is.
    pub fn record_job(&self, host: &str, report: &JobReport) {
        self.last_job_duration_ms
            .store(report.elapsed.as_millis() as u64, Ordering::SeqCst);
        let failed_sources = report.results.failed_keys();
        self.sources_failed
            .fetch_add(failed_sources.len() as u64, Ordering::SeqCst);

        let first_error = failed_sources
            .first()
            .and_then(|key| report.results.errors(key).first().map(|e| format!("{key}: {e}")));

        match report.status {
            JobStatus::Failed(FailureReason::Interrupted) => {
                self.jobs_interrupted.fetch_add(1, Ordering::SeqCst);
            }
            JobStatus::Failed(FailureReason::Timeout) => {
                self.jobs_timed_out.fetch_add(1, Ordering::SeqCst);
                self.record_failure(host, "job timed out");
            }
            _ => {
                self.jobs_completed.fetch_add(1, Ordering::SeqCst);
                let all_failed =
                    !report.results.is_empty() && failed_sources.len() >= report.results.len();
                match first_error {
                    Some(error) if all_failed => self.record_failure(host, &error),
                    Some(error) => self.record_contact(host, HostStatus::Degraded, Some(error)),
                    None => self.record_contact(host, HostStatus::Online, None),
                }
            }
        }
    }

    fn record_contact(&self, host: &str, status: HostStatus, error: Option<String>) {
        let mut hosts = self.hosts.write();
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| unknown(host));
        state.status = status;
        state.last_seen = current_timestamp_millis();
        state.consecutive_failures = 0;
        state.last_error = error;
    }

    fn record_failure(&self, host: &str, error: &str) {
        let mut hosts = self.hosts.write();
        let state = hosts
            .entry(host.to_string())
            .or_insert_with(|| unknown(host));
        state.status = HostStatus::Offline;
        state.consecutive_failures += 1;
        state.last_error = Some(error.to_string());
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let hosts_total = self.hosts_total.load(Ordering::SeqCst);
        let (hosts_online, hosts_offline) =
            self.hosts
                .read()
                .values()
                .fold((0u64, 0u64), |(online, offline), state| match state.status {
                    HostStatus::Online | HostStatus::Degraded => (online + 1, offline),
                    HostStatus::Offline => (online, offline + 1),
                    HostStatus::Unknown => (online, offline),
                });

        let status = if hosts_offline == 0 && hosts_online == hosts_total {
            "healthy"
        } else if hosts_offline > 0 && hosts_online > 0 {
            "degraded"
        } else if hosts_online == 0 && hosts_offline > 0 {
            "error"
        } else {
            "healthy"
        };

        HealthSnapshot {
            agent: self.agent_name.clone(),
            status: status.to_string(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            hosts_total,
            hosts_online,
            hosts_offline,
            jobs_completed: self.jobs_completed.load(Ordering::SeqCst),
            jobs_timed_out: self.jobs_timed_out.load(Ordering::SeqCst),
            jobs_interrupted: self.jobs_interrupted.load(Ordering::SeqCst),
            sources_failed: self.sources_failed.load(Ordering::SeqCst),
            last_job_duration_ms: self.last_job_duration_ms.load(Ordering::SeqCst),
        }
    }

    pub fn host_liveness(&self, host: &str) -> Option<HostLiveness> {
        self.hosts.read().get(host).cloned()
    }

    /// Liveness of every host polled so far, sorted by hostname.
    pub fn all_host_liveness(&self) -> Vec<HostLiveness> {
        let mut all: Vec<HostLiveness> = self.hosts.read().values().cloned().collect();
        all.sort_by(|a, b| a.host.cmp(&b.host));
        all
    }
}

fn unknown(host: &str) -> HostLiveness {
    HostLiveness {
        host: host.to_string(),
        status: HostStatus::Unknown,
        last_seen: 0,
        consecutive_failures: 0,
        last_error: None,
    }
}
