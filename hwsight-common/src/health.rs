//! Health and liveness types shared by the agent and its consumers.

use serde::{Deserialize, Serialize};

/// Host availability status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HostStatus {
    /// Last job completed and every source produced a table.
    Online,
    /// Last job timed out or every source failed.
    Offline,
    /// Last job completed but some sources failed.
    Degraded,
    /// Host has not been polled yet.
    #[default]
    Unknown,
}

impl std::fmt::Display for HostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HostStatus::Online => write!(f, "online"),
            HostStatus::Offline => write!(f, "offline"),
            HostStatus::Degraded => write!(f, "degraded"),
            HostStatus::Unknown => write!(f, "unknown"),
        }
    }
}

/// Agent-wide health snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSnapshot {
    /// Agent name.
    pub agent: String,
    /// Overall health status.
    pub status: String,
    /// Uptime in seconds.
    pub uptime_secs: u64,
    /// Hosts configured.
    pub hosts_total: u64,
    /// Hosts whose last job completed cleanly.
    pub hosts_online: u64,
    /// Hosts whose last job failed.
    pub hosts_offline: u64,
    /// Jobs completed.
    pub jobs_completed: u64,
    /// Jobs that ended in a timeout.
    pub jobs_timed_out: u64,
    /// Jobs that were interrupted.
    pub jobs_interrupted: u64,
    /// Sources that recorded an error.
    pub sources_failed: u64,
    /// Duration of the last job in milliseconds.
    pub last_job_duration_ms: u64,
}

/// Per-host liveness information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostLiveness {
    /// Hostname.
    pub host: String,
    /// Current status.
    pub status: HostStatus,
    /// Last successful job (millis since epoch).
    pub last_seen: i64,
    /// Consecutive failed jobs.
    pub consecutive_failures: u32,
    /// Last error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

/// Current time in milliseconds since the Unix epoch.
pub fn current_timestamp_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
