//! CLI argument parsing for the agent.

use std::path::PathBuf;

use clap::Parser;

/// Hardware telemetry agent.
#[derive(Parser, Debug, Clone)]
#[command(name = "hwsight-agent")]
#[command(about = "Run hwsight connectors against the configured hosts", long_about = None)]
pub struct AgentArgs {
    /// Path to the configuration file (JSON5 format).
    #[arg(short, long, default_value = "hwsight.json5")]
    pub config: PathBuf,

    /// Override log level (trace, debug, info, warn, error).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Run one discovery and collect pass per host, print the results as
    /// JSON and exit.
    #[arg(long)]
    pub once: bool,
}
