//! hwsight Common Library
//!
//! Pieces shared by the engine and the agent: JSON5 configuration loading,
//! logging setup, host liveness types and the common error type.

pub mod config;
pub mod error;
pub mod health;

pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use health::{HealthSnapshot, HostLiveness, HostStatus, current_timestamp_millis};

use tracing_subscriber::EnvFilter;

/// Build the event filter for `config`.
///
/// `RUST_LOG` replaces the configured level when set. The configured
/// directives are added on top in both cases, so a connector author can
/// keep `hwsight_engine::compute=trace` while the rest stays at `info`.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    for directive in &config.directives {
        let parsed = directive
            .parse()
            .map_err(|e| Error::config(format!("Invalid log directive '{}': {}", directive, e)))?;
        filter = filter.add_directive(parsed);
    }
    Ok(filter)
}

/// Install the global subscriber, as text or JSON lines.
///
/// ```ignore
/// let logging = config.logging.with_level_override(args.log_level.as_deref());
/// hwsight_common::init_tracing(&logging)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*};

    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).try_init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init(),
    };
    installed.map_err(|e| Error::config(format!("Failed to initialize tracing: {}", e)))
}
