//! `executeForEachEntryOf`: run a source once per row of another table and
//! combine the results.

use std::time::Duration;

use crate::error::SourceError;
use crate::model::{EntryConcatMethod, ExecuteForEachEntryOf, Source};
use crate::psl;
use crate::table::{NEW_LINE, SourceTable};

use super::{ExecutionScope, SourceExecutor, prepare};

pub(super) async fn execute(
    executor: &SourceExecutor,
    source: &Source,
    directive: &ExecuteForEachEntryOf,
    scope: &ExecutionScope<'_>,
) -> (SourceTable, Vec<SourceError>) {
    let Some(entries) = scope.tables.table(&directive.source) else {
        return (
            SourceTable::empty(),
            vec![SourceError::MissingReference(directive.source.clone())],
        );
    };

    let pause = source
        .sleep_execute_for_each_entry_of
        .filter(|&ms| ms > 0)
        .map(Duration::from_millis);

    let mut combined = Combined::new(directive);
    let mut errors = Vec::new();

    for (index, row) in entries.rows().iter().enumerate() {
        if scope.cancel.is_cancelled() {
            break;
        }
        if index > 0 {
            if let Some(pause) = pause {
                tokio::time::sleep(pause).await;
            }
        }

        let mut iteration = source.clone();
        if let Err(column) = iteration.try_map_params(|text| psl::substitute_columns(text, row)) {
            errors.push(SourceError::Entry {
                row: index,
                message: format!("column ${column} is out of range for a {}-column row", row.len()),
            });
            continue;
        }

        let prepared = prepare(&iteration, scope);
        match executor.execute_prepared(&prepared, scope).await {
            Ok(table) => combined.push(row, &table),
            Err(error) => {
                tracing::warn!(
                    host = %scope.host.hostname,
                    source = %source.key(),
                    row = index,
                    error = %error,
                    "Source iteration failed"
                );
                errors.push(SourceError::Entry {
                    row: index,
                    message: error.to_string(),
                });
            }
        }
    }

    (combined.finish(), errors)
}

/// Accumulates per-row results according to the concat method.
struct Combined<'d> {
    directive: &'d ExecuteForEachEntryOf,
    parts: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl<'d> Combined<'d> {
    fn new(directive: &'d ExecuteForEachEntryOf) -> Self {
        Self {
            directive,
            parts: Vec::new(),
            rows: Vec::new(),
        }
    }

    fn push(&mut self, entry: &[String], result: &SourceTable) {
        let raw = result.raw_data().unwrap_or_default();

        match self.directive.concat_method {
            EntryConcatMethod::List => {
                if !raw.trim().is_empty() {
                    self.parts.push(raw.to_string());
                }
                self.rows
                    .extend(result.rows().iter().filter(|row| !row.is_empty()).cloned());
            }
            EntryConcatMethod::JsonArray => {
                if !raw.trim().is_empty() {
                    self.parts.push(raw.to_string());
                }
            }
            EntryConcatMethod::JsonArrayExtended => {
                if !raw.trim().is_empty() {
                    self.parts.push(extended_entry(entry, raw));
                }
            }
            EntryConcatMethod::Custom => {
                let start = self.literal(self.directive.concat_start.as_deref(), entry);
                let end = self.literal(self.directive.concat_end.as_deref(), entry);
                self.parts.push(format!("{start}{raw}{end}"));
            }
        }
    }

    /// Custom delimiters may reference the entry's cells.
    fn literal(&self, text: Option<&str>, entry: &[String]) -> String {
        let text = text.unwrap_or_default();
        psl::substitute_columns(text, entry).unwrap_or_else(|_| text.to_string())
    }

    fn finish(self) -> SourceTable {
        match self.directive.concat_method {
            EntryConcatMethod::List => {
                SourceTable::from_rows(self.rows).with_raw_data(self.parts.join(NEW_LINE))
            }
            EntryConcatMethod::JsonArray | EntryConcatMethod::JsonArrayExtended => {
                let start = self.directive.concat_start.as_deref().unwrap_or_default();
                let end = self.directive.concat_end.as_deref().unwrap_or_default();
                SourceTable::from_raw(format!("{start}[{}]{end}", self.parts.join(",\n")))
            }
            EntryConcatMethod::Custom => SourceTable::from_raw(self.parts.concat()),
        }
    }
}

/// Wrap one result with the entry it was produced for.
fn extended_entry(entry: &[String], raw: &str) -> String {
    let mut out = String::from("{\n\"Entry\":{\n");
    out.push_str(&format!(
        "\"Full\":{},\n",
        serde_json::Value::String(entry.join(","))
    ));
    for (i, cell) in entry.iter().enumerate() {
        out.push_str(&format!(
            "\"Column({})\":{},\n",
            i + 1,
            serde_json::Value::String(cell.clone())
        ));
    }
    out.push_str(&format!("\"Value\":{raw}\n}}\n}}"));
    out
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use super::super::test_support::ScriptedClient;
    use super::*;
    use crate::collaborator::{CancelSignal, HostContext};
    use crate::error::ProtocolError;
    use crate::model::Connector;
    use crate::table::rows;

    fn connector(concat: &str, sleep: u64) -> Connector {
        Connector::from_json5(&format!(
            r#"{{
                id: "Loop",
                monitors: {{ m: {{ simple: {{ sources: {{
                    ids: {{ type: "static", value: "1;sda;\n2;sdb;\n3;" }},
                    details: {{
                        type: "osCommand",
                        commandLine: "show $1 $2",
                        sleepExecuteForEachEntryOf: {sleep},
                        executeForEachEntryOf: {{
                            source: "ids",
                            {concat}
                        }},
                    }},
                }} }} }} }},
            }}"#
        ))
        .unwrap()
    }

    fn entries() -> HashMap<String, SourceTable> {
        let mut tables = HashMap::new();
        tables.insert(
            "monitors.m.simple.sources.ids".to_string(),
            SourceTable::from_rows(rows([&["1", "sda"], &["2", "sdb"], &["3"]])),
        );
        tables
    }

    fn echo(command: &str, _attempt: usize) -> Result<SourceTable, ProtocolError> {
        if command.contains("sdb") {
            return Err(ProtocolError::failed("device busy"));
        }
        let cells: Vec<&str> = command.split(' ').skip(1).collect();
        Ok(SourceTable::from_csv(format!("{};", cells.join(";"))))
    }

    async fn run(connector: &Connector, client: Arc<ScriptedClient>) -> (SourceTable, Vec<SourceError>) {
        let executor = SourceExecutor::new(client);
        let host = HostContext::new("srv");
        let tables = entries();
        let cancel = CancelSignal::never();
        let scope = ExecutionScope {
            connector,
            host: &host,
            tables: &tables,
            previous: None,
            cancel: &cancel,
        };
        let source = connector.source("monitors.m.simple.sources.details").unwrap();
        let directive = source.execute_for_each_entry_of.as_ref().unwrap();
        execute(&executor, source, directive, &scope).await
    }

    #[tokio::test]
    async fn test_list_concatenation_continues_past_failures() {
        let connector = connector("", 0);
        let client = Arc::new(ScriptedClient::new(echo));
        let (table, errors) = run(&connector, client.clone()).await;

        // The third row has no second column, so it never reaches the client.
        assert_eq!(client.calls(), vec!["show 1 sda", "show 2 sdb"]);
        assert_eq!(table.rows(), rows([&["1", "sda"]]).as_slice());
        assert_eq!(table.raw_data(), Some("1;sda;"));
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], SourceError::Entry { row: 1, .. }));
        assert!(matches!(errors[1], SourceError::Entry { row: 2, .. }));
    }

    #[tokio::test]
    async fn test_json_array_wraps_results() {
        let connector = connector(r#"concatMethod: "jsonArray", concatStart: "{\"disks\":", concatEnd: "}""#, 0);
        let client = Arc::new(ScriptedClient::new(|_, attempt| {
            Ok(SourceTable::from_raw(format!("{{\"n\":{attempt}}}")))
        }));
        let (table, errors) = run(&connector, client).await;

        assert_eq!(errors.len(), 1);
        assert_eq!(table.raw_data(), Some("{\"disks\":[{\"n\":1},\n{\"n\":2}]}"));
        let parsed: serde_json::Value = serde_json::from_str(table.raw_data().unwrap()).unwrap();
        assert_eq!(parsed["disks"][1]["n"], 2);
    }

    #[tokio::test]
    async fn test_json_array_extended_carries_the_entry() {
        let connector = connector(r#"concatMethod: "jsonArrayExtended""#, 0);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(SourceTable::from_raw("{\"ok\":true}"))));
        let (table, _) = run(&connector, client).await;

        let parsed: serde_json::Value = serde_json::from_str(table.raw_data().unwrap()).unwrap();
        let first = &parsed[0]["Entry"];
        assert_eq!(first["Full"], "1,sda");
        assert_eq!(first["Column(2)"], "sda");
        assert_eq!(first["Value"]["ok"], true);
        assert_eq!(parsed.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_custom_delimiters_use_entry_cells() {
        let connector = connector(r#"concatMethod: "custom", concatStart: "<$1>", concatEnd: "</$1>""#, 0);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(SourceTable::from_raw("x"))));
        let (table, _) = run(&connector, client).await;
        assert_eq!(table.raw_data(), Some("<1>x</1><2>x</2>"));
    }

    #[tokio::test]
    async fn test_sleep_between_iterations() {
        let connector = connector("", 30);
        let client = Arc::new(ScriptedClient::new(|_, _| Ok(SourceTable::from_csv("v;"))));
        let started = std::time::Instant::now();
        let _ = run(&connector, client).await;
        // Two pauses for three rows.
        assert!(started.elapsed() >= Duration::from_millis(60));
    }

    #[tokio::test]
    async fn test_missing_loop_table() {
        let connector = connector("", 0);
        let executor = SourceExecutor::new(Arc::new(ScriptedClient::new(echo)));
        let host = HostContext::new("srv");
        let tables: HashMap<String, SourceTable> = HashMap::new();
        let cancel = CancelSignal::never();
        let scope = ExecutionScope {
            connector: &connector,
            host: &host,
            tables: &tables,
            previous: None,
            cancel: &cancel,
        };
        let source = connector.source("monitors.m.simple.sources.details").unwrap();
        let directive = source.execute_for_each_entry_of.as_ref().unwrap();
        let (table, errors) = execute(&executor, source, directive, &scope).await;
        assert!(table.is_empty());
        assert_eq!(
            errors,
            vec![SourceError::MissingReference("monitors.m.simple.sources.ids".to_string())]
        );
    }
}
