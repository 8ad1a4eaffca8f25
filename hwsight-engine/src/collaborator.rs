//! Interfaces to the outside world: protocol clients, script runners and
//! document flatteners, plus the host context and cancellation signal
//! they receive.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::ProtocolError;
use crate::model::Source;
use crate::table::SourceTable;

/// The host a job runs against.
#[derive(Debug, Clone, Default)]
pub struct HostContext {
    pub hostname: String,
    /// Values for `${attribute::name}` references.
    pub attributes: HashMap<String, String>,
}

impl HostContext {
    pub fn new(hostname: impl Into<String>) -> Self {
        let hostname = hostname.into();
        let mut attributes = HashMap::new();
        attributes.insert("hostname".to_string(), hostname.clone());
        Self {
            hostname,
            attributes,
        }
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }
}

/// Sending half of a job's cancellation signal.
#[derive(Debug)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }
}

/// Receiving half of a job's cancellation signal, handed to collaborators.
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        // Dropping the sender leaves the value at `false` forever.
        drop(tx);
        Self(rx)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolve once the job is cancelled. Pends forever if it never is.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow_and_update() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Create a linked cancellation handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Executes protocol sources (SNMP, WBEM, HTTP, commands...).
///
/// Parameters arrive with attribute and source references already
/// substituted. Implementations should return promptly once `cancel`
/// fires.
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    async fn execute(
        &self,
        source: &Source,
        host: &HostContext,
        cancel: &CancelSignal,
    ) -> Result<SourceTable, ProtocolError>;
}

/// Runs AWK scripts for the `awk` compute.
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Run `script` over `input` and return its standard output.
    async fn run_awk(&self, script: &str, input: &str) -> Result<String, ProtocolError>;
}

/// Flattens JSON and XML documents into rows.
#[async_trait]
pub trait DocumentFlattener: Send + Sync {
    /// One line per entry under `entry_key`: the entry path followed by
    /// each property, every value terminated by `separator`.
    async fn json_to_csv(
        &self,
        json: &str,
        entry_key: &str,
        properties: &[String],
        separator: &str,
    ) -> Result<String, ProtocolError>;

    /// One row per `record_tag` element, one cell per `/`-path in
    /// `properties` (`>`-separated). See [`crate::documents::XmlFlattener`]
    /// for the path rules.
    async fn xml_to_rows(
        &self,
        xml: &str,
        record_tag: &str,
        properties: &str,
    ) -> Result<Vec<Vec<String>>, ProtocolError>;
}

/// Read access to the tables of the current run.
pub trait TableLookup: Send + Sync {
    fn table(&self, key: &str) -> Option<&SourceTable>;
}

impl TableLookup for HashMap<String, SourceTable> {
    fn table(&self, key: &str) -> Option<&SourceTable> {
        self.get(key)
    }
}

/// A protocol client that supports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProtocol;

#[async_trait]
impl ProtocolClient for NoProtocol {
    async fn execute(
        &self,
        source: &Source,
        _host: &HostContext,
        _cancel: &CancelSignal,
    ) -> Result<SourceTable, ProtocolError> {
        Err(ProtocolError::Unsupported(source.kind.type_name().to_string()))
    }
}

/// A script runner that supports nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoScripts;

#[async_trait]
impl ScriptRunner for NoScripts {
    async fn run_awk(&self, _script: &str, _input: &str) -> Result<String, ProtocolError> {
        Err(ProtocolError::Unsupported("awk".to_string()))
    }
}
