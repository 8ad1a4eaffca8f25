//! hwsight agent
//!
//! Loads connectors, then polls every configured host on its discovery and
//! collect schedules:
//!
//! - [`args`] - Command line arguments
//! - [`config`] - Agent and host configuration
//! - [`poller`] - Per-host job scheduling
//! - [`protocol`] - OS command client and AWK runner
//! - [`health`] - Job counters and host liveness
//!
//! Connectors can be reloaded while running with [`reload_connectors`];
//! pollers pick up the new set on their next cycle.

pub mod args;
pub mod config;
pub mod health;
pub mod poller;
pub mod protocol;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::watch;

use hwsight_engine::{ConnectorRegistry, JobOrchestrator, SourceExecutor, StandardDocuments};

pub use args::AgentArgs;
pub use config::{AgentConfig, HostConfig};
pub use health::AgentHealth;
pub use poller::{Cycle, HostJob, HostPoller, JobSummary};
pub use protocol::{OsCommandClient, ProcessAwkRunner};

/// The orchestrator running one host's jobs, backed by the OS command
/// client, the system `awk` and the built-in JSON and XML flatteners.
pub fn orchestrator(host: &HostConfig) -> JobOrchestrator {
    let timeout = host.command_timeout();
    let executor = SourceExecutor::new(Arc::new(OsCommandClient::new(timeout)))
        .with_scripts(Arc::new(ProcessAwkRunner::new(timeout)))
        .with_documents(Arc::new(StandardDocuments));
    JobOrchestrator::new(executor, host.settings())
}

/// Rebuild the registry from the configured connector paths and publish it
/// to every poller. The published registry is left in place when loading
/// fails or a host names a connector that is no longer there.
pub fn reload_connectors(
    config: &AgentConfig,
    registry: &watch::Sender<Arc<ConnectorRegistry>>,
) -> anyhow::Result<Arc<ConnectorRegistry>> {
    let next = ConnectorRegistry::load(&config.agent.connectors)
        .context("Failed to load connectors")?;
    config
        .check_connectors(&next)
        .context("Invalid host configuration")?;
    let next = Arc::new(next);
    registry.send_replace(Arc::clone(&next));
    tracing::info!(connectors = ?next.ids(), "Connectors reloaded");
    Ok(next)
}
