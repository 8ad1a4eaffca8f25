use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Error, Result};

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable text format (default).
    #[default]
    Text,
    /// Structured JSON format.
    Json,
}

/// `logging` section shared by every hwsight configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default level: "trace", "debug", "info", "warn" or "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormat,

    /// Extra filter directives such as `hwsight_engine::executor=debug`.
    #[serde(default)]
    pub directives: Vec<String>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
            directives: Vec::new(),
        }
    }
}

impl LoggingConfig {
    /// Copy with the level replaced by the command line value, if any.
    pub fn with_level_override(&self, level: Option<&str>) -> Self {
        let mut config = self.clone();
        if let Some(level) = level {
            config.level = level.to_string();
        }
        config
    }
}

/// Read and parse a JSON5 file. Errors name the file.
pub fn load_config<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::config(format!("Failed to read config file '{}': {}", path.display(), e))
    })?;
    parse_named(&content, &path.display().to_string())
}

/// Parse a JSON5 document held in memory.
pub fn parse_config<T: DeserializeOwned>(content: &str) -> Result<T> {
    parse_named(content, "<inline>")
}

fn parse_named<T: DeserializeOwned>(content: &str, origin: &str) -> Result<T> {
    json5::from_str(content)
        .map_err(|e| Error::config(format!("Failed to parse config '{}': {}", origin, e)))
}
