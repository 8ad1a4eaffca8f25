//! The source executor: turns one source definition into a table.
//!
//! Parameters are rewritten (attributes, source references, `$$`), the
//! source is executed (internally or through the protocol client, once or
//! per row of another table), retried once when it unexpectedly comes back
//! empty, and finally run through its compute chain.

mod foreach;
mod internal;

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::collaborator::{
    CancelSignal, DocumentFlattener, HostContext, NoScripts, ProtocolClient, ScriptRunner,
    TableLookup,
};
use crate::documents::StandardDocuments;
use crate::compute::{self, ComputeContext};
use crate::error::SourceError;
use crate::model::{Connector, Source};
use crate::psl;
use crate::table::SourceTable;

/// What one source execution produced.
#[derive(Debug, Clone, Default)]
pub struct SourceOutcome {
    pub table: SourceTable,
    /// Non-fatal errors, in the order they happened.
    pub errors: Vec<SourceError>,
    /// True when the empty-result retry kicked in.
    pub retried: bool,
}

/// The environment of one source execution.
pub struct ExecutionScope<'a> {
    pub connector: &'a Connector,
    pub host: &'a HostContext,
    /// Tables already produced in this run, with fallback to earlier runs.
    pub tables: &'a dyn TableLookup,
    /// This source's table from the previous run, if any.
    pub previous: Option<&'a SourceTable>,
    pub cancel: &'a CancelSignal,
}

/// Executes sources against their collaborators.
#[derive(Clone)]
pub struct SourceExecutor {
    protocol: Arc<dyn ProtocolClient>,
    scripts: Arc<dyn ScriptRunner>,
    documents: Arc<dyn DocumentFlattener>,
    retry_delay: Duration,
}

impl SourceExecutor {
    /// An executor with no AWK support, the built-in document flatteners and
    /// no delay before retries.
    pub fn new(protocol: Arc<dyn ProtocolClient>) -> Self {
        Self {
            protocol,
            scripts: Arc::new(NoScripts),
            documents: Arc::new(StandardDocuments),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_scripts(mut self, scripts: Arc<dyn ScriptRunner>) -> Self {
        self.scripts = scripts;
        self
    }

    pub fn with_documents(mut self, documents: Arc<dyn DocumentFlattener>) -> Self {
        self.documents = documents;
        self
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Execute `source` and apply its compute chain.
    ///
    /// Never fails: errors are collected in the outcome and the table is
    /// whatever could be produced (possibly empty).
    pub async fn resolve(&self, source: &Source, scope: &ExecutionScope<'_>) -> SourceOutcome {
        let started = Instant::now();
        tracing::debug!(
            host = %scope.host.hostname,
            connector = %scope.connector.id(),
            source = %source.key(),
            kind = source.kind.type_name(),
            "Executing source"
        );

        let (mut table, mut errors) = self.execute(source, scope).await;

        let mut retried = false;
        if table.is_empty() && scope.previous.is_some_and(|previous| !previous.is_empty()) {
            tracing::info!(
                host = %scope.host.hostname,
                source = %source.key(),
                delay_ms = self.retry_delay.as_millis() as u64,
                "Source returned no data but did in the previous run, retrying"
            );
            if !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
            (table, errors) = self.execute(source, scope).await;
            retried = true;
        }

        let ctx = ComputeContext {
            connector: scope.connector,
            source_key: source.key(),
            host: scope.host,
            tables: scope.tables,
            scripts: self.scripts.as_ref(),
            documents: self.documents.as_ref(),
        };
        let chain = compute::run_chain(&source.computes, table, &ctx).await;
        errors.extend(chain.failure);

        tracing::debug!(
            host = %scope.host.hostname,
            source = %source.key(),
            rows = chain.table.row_count(),
            errors = errors.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Source resolved"
        );

        SourceOutcome {
            table: chain.table,
            errors,
            retried,
        }
    }

    async fn execute(
        &self,
        source: &Source,
        scope: &ExecutionScope<'_>,
    ) -> (SourceTable, Vec<SourceError>) {
        if let Some(directive) = &source.execute_for_each_entry_of {
            return foreach::execute(self, source, directive, scope).await;
        }

        let prepared = prepare(source, scope);
        match self.execute_prepared(&prepared, scope).await {
            Ok(table) => (table, Vec::new()),
            Err(error) => {
                tracing::warn!(
                    host = %scope.host.hostname,
                    connector = %scope.connector.id(),
                    source = %source.key(),
                    error = %error,
                    "Source execution failed"
                );
                (SourceTable::empty(), vec![error])
            }
        }
    }

    /// Execute a source whose parameters are already substituted.
    async fn execute_prepared(
        &self,
        source: &Source,
        scope: &ExecutionScope<'_>,
    ) -> Result<SourceTable, SourceError> {
        if source.kind.is_internal() {
            return internal::resolve(&source.kind, scope.tables);
        }
        self.protocol
            .execute(source, scope.host, scope.cancel)
            .await
            .map_err(SourceError::from)
    }
}

/// Rewrite the source's own parameters: attributes, then source
/// references (except where they name operand tables), then `$$`.
fn prepare(source: &Source, scope: &ExecutionScope<'_>) -> Source {
    let keep_references = source.kind.keeps_source_references();
    let mut prepared = source.clone();
    prepared.map_params(|text| {
        let text = psl::substitute_attributes(text, &scope.host.attributes);
        let text = if keep_references {
            text
        } else {
            psl::substitute_sources(&text, |key| {
                scope.tables.table(key).map(SourceTable::reference_content)
            })
        };
        psl::unescape_dollars(&text)
    });
    prepared
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::collaborator::{CancelSignal, HostContext, ProtocolClient};
    use crate::error::ProtocolError;
    use crate::model::Source;
    use crate::table::SourceTable;

    /// Records the command line of every call and answers from a script.
    pub struct ScriptedClient {
        pub calls: Mutex<Vec<String>>,
        pub respond: fn(&str, usize) -> Result<SourceTable, ProtocolError>,
    }

    impl ScriptedClient {
        pub fn new(respond: fn(&str, usize) -> Result<SourceTable, ProtocolError>) -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                respond,
            }
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ProtocolClient for ScriptedClient {
        async fn execute(
            &self,
            source: &Source,
            _host: &HostContext,
            _cancel: &CancelSignal,
        ) -> Result<SourceTable, ProtocolError> {
            let command = source
                .kind
                .query()
                .and_then(|q| q.get_str("commandLine"))
                .unwrap_or_default()
                .to_string();
            let attempt = {
                let mut calls = self.calls.lock().unwrap();
                calls.push(command.clone());
                calls.len()
            };
            (self.respond)(&command, attempt)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::test_support::ScriptedClient;
    use super::*;
    use crate::collaborator::HostContext;
    use crate::error::ProtocolError;
    use crate::table::rows;

    fn connector() -> Connector {
        Connector::from_json5(
            r#"{
                id: "Exec",
                monitors: { m: { simple: { sources: {
                    inventory: { type: "static", value: "sda;\nsdb;" },
                    command: {
                        type: "osCommand",
                        commandLine: "smartctl -d ${attribute::driver} ${source::inventory} $$HOME",
                        computes: [{ type: "duplicateColumn", column: 1 }],
                    },
                    failing: {
                        type: "osCommand",
                        commandLine: "fail",
                        computes: [{ type: "add", column: 1, value: 1 }],
                    },
                } } } },
            }"#,
        )
        .unwrap()
    }

    fn tables() -> HashMap<String, SourceTable> {
        let mut tables = HashMap::new();
        tables.insert(
            "monitors.m.simple.sources.inventory".to_string(),
            SourceTable::from_rows(rows([&["sda"], &["sdb"]])),
        );
        tables
    }

    #[tokio::test]
    async fn test_parameters_are_substituted_before_execution() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Ok(SourceTable::from_csv("ok;\n"))
        }));
        let executor = SourceExecutor::new(client.clone());
        let connector = connector();
        let host = HostContext::new("srv").with_attribute("driver", "sat");
        let tables = tables();
        let cancel = CancelSignal::never();
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: None,
            cancel: &cancel,
        };

        let source = connector.source("monitors.m.simple.sources.command").unwrap();
        let outcome = executor.resolve(source, &scope).await;

        assert_eq!(client.calls(), vec!["smartctl -d sat sda\nsdb $HOME"]);
        assert!(outcome.errors.is_empty());
        assert_eq!(outcome.table.rows(), rows([&["ok", "ok"]]).as_slice());
    }

    #[tokio::test]
    async fn test_protocol_failure_is_recorded() {
        let client = Arc::new(ScriptedClient::new(|_, _| {
            Err(ProtocolError::failed("connection refused"))
        }));
        let executor = SourceExecutor::new(client);
        let connector = connector();
        let host = HostContext::new("srv");
        let tables = tables();
        let cancel = CancelSignal::never();
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: None,
            cancel: &cancel,
        };

        let source = connector.source("monitors.m.simple.sources.failing").unwrap();
        let outcome = executor.resolve(source, &scope).await;
        assert!(outcome.table.is_empty());
        assert_eq!(
            outcome.errors,
            vec![SourceError::Execution(ProtocolError::failed("connection refused"))]
        );
        assert!(!outcome.retried);
    }

    #[tokio::test]
    async fn test_empty_result_is_retried_once_when_previous_had_data() {
        let client = Arc::new(ScriptedClient::new(|_, attempt| {
            if attempt == 1 {
                Ok(SourceTable::empty())
            } else {
                Ok(SourceTable::from_csv("1;"))
            }
        }));
        let executor = SourceExecutor::new(client.clone()).with_retry_delay(Duration::from_millis(1));
        let connector = connector();
        let host = HostContext::new("srv");
        let tables = tables();
        let cancel = CancelSignal::never();
        let previous = SourceTable::from_csv("0;");
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: Some(&previous),
            cancel: &cancel,
        };

        let source = connector.source("monitors.m.simple.sources.failing").unwrap();
        let outcome = executor.resolve(source, &scope).await;
        assert!(outcome.retried);
        assert_eq!(client.calls().len(), 2);
        assert_eq!(outcome.table.rows(), rows([&["2.0"]]).as_slice());
    }

    #[tokio::test]
    async fn test_no_retry_without_previous_data() {
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(SourceTable::empty())));
        let executor = SourceExecutor::new(client.clone());
        let connector = connector();
        let host = HostContext::new("srv");
        let tables = tables();
        let cancel = CancelSignal::never();
        let previous = SourceTable::empty();
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: Some(&previous),
            cancel: &cancel,
        };

        let source = connector.source("monitors.m.simple.sources.failing").unwrap();
        let outcome = executor.resolve(source, &scope).await;
        assert!(!outcome.retried);
        assert_eq!(client.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_internal_sources_never_reach_the_protocol_client() {
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(SourceTable::empty())));
        let executor = SourceExecutor::new(client.clone());
        let connector = connector();
        let host = HostContext::new("srv");
        let tables = HashMap::new();
        let cancel = CancelSignal::never();
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: None,
            cancel: &cancel,
        };

        let source = connector.source("monitors.m.simple.sources.inventory").unwrap();
        let outcome = executor.resolve(source, &scope).await;
        assert!(client.calls().is_empty());
        assert_eq!(outcome.table.rows(), rows([&["sda"], &["sdb"]]).as_slice());
    }
}
