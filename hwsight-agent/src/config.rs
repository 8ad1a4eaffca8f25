use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use hwsight_common::{Error, LoggingConfig, Result};
use hwsight_engine::{ConnectorRegistry, HostContext, OrchestratorSettings};

/// Root configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Agent settings.
    pub agent: AgentSettings,
}

/// What the agent loads and which hosts it polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Connector files, or directories of `.json5` connector files.
    #[serde(default)]
    pub connectors: Vec<PathBuf>,

    /// Hosts to poll.
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    /// How often the health snapshot is logged.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

/// Configuration for a single monitored host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Hostname, also exposed as the `hostname` attribute.
    pub hostname: String,

    /// Ids of the connectors to run against this host.
    #[serde(default)]
    pub connectors: Vec<String>,

    /// Values for `${attribute::name}` references.
    #[serde(default)]
    pub attributes: HashMap<String, String>,

    /// Collect and simple job interval in seconds.
    #[serde(default = "default_collect_interval")]
    pub collect_interval_secs: u64,

    /// Discovery job interval in seconds.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval_secs: u64,

    /// Bound on one job run in seconds.
    #[serde(default = "default_strategy_timeout")]
    pub strategy_timeout_secs: u64,

    /// Concurrent sources per job run.
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Pause before retrying a source that unexpectedly returned nothing.
    #[serde(default)]
    pub retry_delay_ms: u64,

    /// Default timeout of one OS command in seconds.
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

fn default_health_interval() -> u64 {
    60
}

fn default_collect_interval() -> u64 {
    120
}

fn default_discovery_interval() -> u64 {
    3600
}

fn default_strategy_timeout() -> u64 {
    900
}

fn default_max_workers() -> usize {
    20
}

fn default_command_timeout() -> u64 {
    30
}

impl AgentConfig {
    /// Load and validate configuration from a JSON5 file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let config: Self = hwsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = hwsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the agent cannot run.
    pub fn validate(&self) -> Result<()> {
        if self.agent.hosts.is_empty() {
            return Err(Error::config("No hosts configured"));
        }
        if self.agent.health_interval_secs == 0 {
            return Err(Error::config("health_interval_secs must be positive"));
        }

        let mut seen = HashSet::new();
        for host in &self.agent.hosts {
            host.validate()?;
            if !seen.insert(host.hostname.as_str()) {
                return Err(Error::invalid_host(&host.hostname, "configured twice"));
            }
        }
        Ok(())
    }

    /// Check that every connector a host names is in `registry`.
    pub fn check_connectors(&self, registry: &ConnectorRegistry) -> Result<()> {
        for host in &self.agent.hosts {
            if let Some(missing) = host.connectors.iter().find(|id| !registry.contains(id)) {
                return Err(Error::UnknownConnector {
                    host: host.hostname.clone(),
                    connector: missing.clone(),
                });
            }
        }
        Ok(())
    }
}

impl HostConfig {
    fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(Error::config("Host name cannot be empty"));
        }
        if self.connectors.is_empty() {
            return Err(Error::invalid_host(&self.hostname, "no connectors"));
        }
        if self.max_workers == 0 {
            return Err(Error::invalid_host(
                &self.hostname,
                "max_workers must be at least 1",
            ));
        }
        for (name, value) in [
            ("collect_interval_secs", self.collect_interval_secs),
            ("discovery_interval_secs", self.discovery_interval_secs),
            ("strategy_timeout_secs", self.strategy_timeout_secs),
            ("command_timeout_secs", self.command_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::invalid_host(
                    &self.hostname,
                    format!("{} must be positive", name),
                ));
            }
        }
        Ok(())
    }

    /// Orchestrator tuning for this host's jobs.
    pub fn settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            max_workers: self.max_workers,
            strategy_timeout: Duration::from_secs(self.strategy_timeout_secs),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    /// The host context handed to sources.
    pub fn context(&self) -> HostContext {
        self.attributes
            .iter()
            .fold(HostContext::new(&self.hostname), |host, (name, value)| {
                host.with_attribute(name, value)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hwsight_common::LogFormat;
    use hwsight_engine::Connector;

    const CONFIG: &str = r#"
    {
        logging: { level: "debug", format: "json" },
        agent: {
            connectors: ["connectors"],
            hosts: [
                {
                    hostname: "srv01",
                    connectors: ["LinuxDisk"],
                    attributes: { username: "monitor" },
                    collect_interval_secs: 60,
                    max_workers: 4,
                },
                { hostname: "srv02", connectors: ["LinuxDisk"] },
            ],
        },
    }
    "#;

    #[test]
    fn test_parse_config() {
        let config = AgentConfig::parse(CONFIG).unwrap();
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.agent.connectors, vec![PathBuf::from("connectors")]);
        assert_eq!(config.agent.health_interval_secs, 60);

        let first = &config.agent.hosts[0];
        assert_eq!(first.collect_interval_secs, 60);
        assert_eq!(first.settings().max_workers, 4);

        let second = &config.agent.hosts[1];
        assert_eq!(second.collect_interval_secs, 120);
        assert_eq!(second.discovery_interval_secs, 3600);
        assert_eq!(second.settings().strategy_timeout, Duration::from_secs(900));
        assert_eq!(second.settings().retry_delay, Duration::ZERO);
        assert_eq!(second.command_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_host_context_carries_attributes() {
        let config = AgentConfig::parse(CONFIG).unwrap();
        let host = config.agent.hosts[0].context();
        assert_eq!(host.hostname, "srv01");
        assert_eq!(host.attributes.get("hostname").map(String::as_str), Some("srv01"));
        assert_eq!(host.attributes.get("username").map(String::as_str), Some("monitor"));
    }

    #[test]
    fn test_rejects_invalid_hosts() {
        let cases = [
            r#"{ agent: { hosts: [] } }"#,
            r#"{ agent: { hosts: [{ hostname: "", connectors: ["A"] }] } }"#,
            r#"{ agent: { hosts: [{ hostname: "a", connectors: [] }] } }"#,
            r#"{ agent: { hosts: [{ hostname: "a", connectors: ["A"], max_workers: 0 }] } }"#,
            r#"{ agent: { hosts: [{ hostname: "a", connectors: ["A"], strategy_timeout_secs: 0 }] } }"#,
            r#"{ agent: { hosts: [{ hostname: "a", connectors: ["A"] }, { hostname: "a", connectors: ["A"] }] } }"#,
        ];
        for case in cases {
            assert!(AgentConfig::parse(case).is_err(), "accepted: {case}");
        }
    }

    #[test]
    fn test_check_connectors() {
        let config = AgentConfig::parse(CONFIG).unwrap();
        let connector = Connector::from_json5(
            r#"{ id: "LinuxDisk", monitors: { disk: { collect: { sources: {
                s: { type: "static", value: "a;" },
            } } } } }"#,
        )
        .unwrap();

        let registry = ConnectorRegistry::from_connectors([connector]).unwrap();
        assert!(config.check_connectors(&registry).is_ok());

        let empty = ConnectorRegistry::from_connectors(Vec::new()).unwrap();
        let err = config.check_connectors(&empty).unwrap_err();
        assert!(matches!(
            &err,
            Error::UnknownConnector { connector, .. } if connector == "LinuxDisk"
        ));
    }
}
