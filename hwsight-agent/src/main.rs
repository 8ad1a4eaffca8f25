use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tokio::sync::watch;

use hwsight_agent::{AgentArgs, AgentConfig, AgentHealth, HostPoller, reload_connectors};
use hwsight_common::init_tracing;
use hwsight_engine::ConnectorRegistry;

/// How long pollers get to wind down after an interrupt.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let args = AgentArgs::parse();

    let config = AgentConfig::load(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    let logging = config.logging.with_level_override(args.log_level.as_deref());
    init_tracing(&logging).context("Failed to initialize tracing")?;

    tracing::info!(
        config = ?args.config,
        hosts = config.agent.hosts.len(),
        "Starting hwsight-agent"
    );

    let registry = Arc::new(
        ConnectorRegistry::load(&config.agent.connectors).context("Failed to load connectors")?,
    );
    config
        .check_connectors(&registry)
        .context("Invalid host configuration")?;
    tracing::info!(connectors = ?registry.ids(), "Connectors loaded");

    let health = Arc::new(AgentHealth::new("hwsight-agent"));
    health.set_hosts_total(config.agent.hosts.len() as u64);
    let (interrupt_tx, interrupt_rx) = watch::channel(false);

    let (registry_tx, registry_rx) = watch::channel(registry);

    if args.once {
        return run_once(&config, registry_rx, health, interrupt_rx).await;
    }

    // Spawn host pollers
    let mut tasks = Vec::new();
    for host in config.agent.hosts.clone() {
        let poller = HostPoller::new(
            host,
            registry_rx.clone(),
            health.clone(),
            interrupt_rx.clone(),
        );
        tasks.push(tokio::spawn(poller.run()));
    }

    #[cfg(unix)]
    let reloader = tokio::spawn(reload_on_hangup(config.clone(), registry_tx));
    #[cfg(not(unix))]
    drop(registry_tx);

    // Periodic health report
    let health_interval = Duration::from_secs(config.agent.health_interval_secs);
    let reporter = {
        let health = health.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let snapshot = health.snapshot();
                tracing::info!(
                    status = %snapshot.status,
                    uptime_secs = snapshot.uptime_secs,
                    hosts_online = snapshot.hosts_online,
                    hosts_offline = snapshot.hosts_offline,
                    jobs_completed = snapshot.jobs_completed,
                    jobs_timed_out = snapshot.jobs_timed_out,
                    sources_failed = snapshot.sources_failed,
                    "Agent health"
                );
                for host in health.all_host_liveness() {
                    tracing::debug!(
                        host = %host.host,
                        status = %host.status,
                        consecutive_failures = host.consecutive_failures,
                        last_error = ?host.last_error,
                        "Host liveness"
                    );
                }
            }
        })
    };

    tracing::info!("Agent running. Press Ctrl+C to stop.");

    // Wait for shutdown signal
    signal::ctrl_c().await?;

    tracing::info!("Shutting down...");
    interrupt_tx.send_replace(true);
    reporter.abort();
    #[cfg(unix)]
    reloader.abort();

    for task in tasks {
        let abort = task.abort_handle();
        if tokio::time::timeout(SHUTDOWN_GRACE, task).await.is_err() {
            tracing::warn!("Poller did not stop in time, aborting");
            abort.abort();
        }
    }

    tracing::info!("Goodbye!");

    Ok(())
}

/// Reload connectors on every SIGHUP until the task is aborted.
#[cfg(unix)]
async fn reload_on_hangup(config: AgentConfig, registry: watch::Sender<Arc<ConnectorRegistry>>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(hangup) => hangup,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGHUP, connector reload disabled");
            return;
        }
    };
    while hangup.recv().await.is_some() {
        tracing::info!("SIGHUP received, reloading connectors");
        if let Err(e) = reload_connectors(&config, &registry) {
            tracing::warn!(error = %format!("{e:#}"), "Reload failed, keeping current connectors");
        }
    }
}

/// One discovery and collect pass per host, printed as JSON.
async fn run_once(
    config: &AgentConfig,
    registry: watch::Receiver<Arc<ConnectorRegistry>>,
    health: Arc<AgentHealth>,
    interrupt: watch::Receiver<bool>,
) -> Result<()> {
    let mut tasks = Vec::new();
    for host in config.agent.hosts.clone() {
        let hostname = host.hostname.clone();
        let mut poller =
            HostPoller::new(host, registry.clone(), health.clone(), interrupt.clone());
        tasks.push(tokio::spawn(async move {
            let jobs = poller.poll_once().await;
            jobs.iter()
                .map(|job| job.summary(&hostname))
                .collect::<Vec<_>>()
        }));
    }

    let mut summaries = Vec::new();
    for task in tasks {
        summaries.extend(task.await.context("Host poll task failed")?);
    }

    let output = serde_json::json!({
        "jobs": summaries,
        "health": health.snapshot(),
        "hosts": health.all_host_liveness(),
    });
    println!(
        "{}",
        serde_json::to_string_pretty(&output).context("Failed to serialize results")?
    );
    Ok(())
}
