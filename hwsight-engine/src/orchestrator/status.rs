//! Job run state machine.

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;

use crate::error::{EngineError, Result};

/// Why a job run ended early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// The strategy timeout expired.
    Timeout,
    /// The caller interrupted the run.
    Interrupted,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Timeout => write!(f, "timeout"),
            FailureReason::Interrupted => write!(f, "interrupted"),
        }
    }
}

/// Status of one job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "camelCase")]
pub enum JobStatus {
    Pending,
    /// Executing the wave with this 0-based index.
    Running { wave: usize },
    Completed,
    Failed(FailureReason),
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed(_))
    }

    /// Whether the state machine allows moving from `self` to `next`.
    ///
    /// Waves only move forward; terminal states are final.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        match (self, next) {
            (JobStatus::Pending, JobStatus::Running { .. }) => true,
            (JobStatus::Running { wave }, JobStatus::Running { wave: next }) => next > *wave,
            (JobStatus::Pending | JobStatus::Running { .. }, JobStatus::Completed) => true,
            (JobStatus::Pending | JobStatus::Running { .. }, JobStatus::Failed(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Running { wave } => write!(f, "running(wave {wave})"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Failed(reason) => write!(f, "failed({reason})"),
        }
    }
}

/// Publishes a run's status to any number of observers.
#[derive(Debug)]
pub struct StatusTracker {
    tx: watch::Sender<JobStatus>,
}

impl StatusTracker {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(JobStatus::Pending);
        Self { tx }
    }

    pub fn current(&self) -> JobStatus {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<JobStatus> {
        self.tx.subscribe()
    }

    /// Move to `next`, rejecting transitions the state machine forbids.
    pub fn transition(&self, next: JobStatus) -> Result<()> {
        let current = self.current();
        if !current.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: current.to_string(),
                to: next.to_string(),
            });
        }
        self.tx.send_replace(next);
        Ok(())
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
