//! Error types for the engine.

use std::time::Duration;

use thiserror::Error;

/// Result type alias using [`EngineError`].
pub type Result<T> = std::result::Result<T, EngineError>;

/// Load-time and request errors.
///
/// These fail fast, before any host job runs. Errors that happen while a
/// job is running are recorded per source as [`SourceError`] instead.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Connector validation error.
    #[error("Connector validation failed: {0}")]
    Validation(String),

    /// Connector parse error.
    #[error("Failed to parse connector: {0}")]
    Parse(String),

    /// Sources that depend on each other in a loop.
    #[error("Dependency cycle between sources: {}", .keys.join(" -> "))]
    DependencyCycle { keys: Vec<String> },

    /// A `${source::...}` reference that matches no source.
    #[error("Source {source_key} references unknown source '{reference}'")]
    UnknownReference {
        source_key: String,
        reference: String,
    },

    /// Two connectors with the same id in one registry.
    #[error("Duplicate connector id: {0}")]
    DuplicateConnector(String),

    /// A job request naming a monitor or phase the connector does not define.
    #[error("Invalid job request: {0}")]
    InvalidRequest(String),

    /// A job status change the state machine does not allow.
    #[error("Invalid job status transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connector validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid request error.
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }
}

impl From<json5::Error> for EngineError {
    fn from(err: json5::Error) -> Self {
        Self::Parse(err.to_string())
    }
}

/// A compute step that cannot be evaluated deterministically.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ComputeError {
    /// A parameter the step cannot interpret.
    #[error("invalid {name} parameter: {value}")]
    InvalidParameter { name: &'static str, value: String },

    /// A column reference beyond the end of a row.
    #[error("column {column} is out of range for a {row_len}-column row")]
    ColumnOutOfRange { column: usize, row_len: usize },

    /// A cell that must be numeric is not.
    #[error("value '{0}' is not a number")]
    NotANumber(String),

    /// A named translation table that the connector does not define.
    #[error("unknown translation table '{0}'")]
    UnknownTranslationTable(String),

    /// The script or document collaborator failed.
    #[error("{kind} failed: {message}")]
    Collaborator { kind: &'static str, message: String },
}

impl ComputeError {
    pub(crate) fn invalid(name: &'static str, value: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            value: value.into(),
        }
    }
}

/// Error returned by protocol, script and document collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// No client handles this source type.
    #[error("unsupported protocol: {0}")]
    Unsupported(String),

    /// The request ran but failed.
    #[error("{0}")]
    Failed(String),

    /// The request exceeded its own timeout.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// The job was cancelled while the request was in flight.
    #[error("cancelled")]
    Cancelled,
}

impl ProtocolError {
    /// Create a failure error.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }
}

/// A non-fatal error recorded against one source key in a job result set.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SourceError {
    /// The protocol collaborator failed.
    #[error("execution failed: {0}")]
    Execution(#[from] ProtocolError),

    /// One iteration of an execute-for-each-entry-of loop failed.
    #[error("entry {row} failed: {message}")]
    Entry { row: usize, message: String },

    /// A compute step failed; the table was emptied.
    #[error("compute #{index} ({kind}) failed: {error}")]
    Compute {
        index: usize,
        kind: &'static str,
        error: ComputeError,
    },

    /// A referenced table is not available in this run.
    #[error("referenced source table '{0}' is not available")]
    MissingReference(String),

    /// The task resolving the source panicked.
    #[error("source task aborted: {0}")]
    Aborted(String),
}
