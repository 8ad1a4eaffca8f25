use thiserror::Error;

/// Configuration and startup errors shared by hwsight components.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host '{host}': {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("Host '{host}' uses unknown connector '{connector}'")]
    UnknownConnector { host: String, connector: String },
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn invalid_host(host: &str, reason: impl Into<String>) -> Self {
        Self::InvalidHost {
            host: host.to_string(),
            reason: reason.into(),
        }
    }
}
