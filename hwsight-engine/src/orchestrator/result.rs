//! Job result sets and the read-only view sources see while a wave runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::collaborator::TableLookup;
use crate::error::SourceError;
use crate::executor::SourceOutcome;
use crate::table::SourceTable;

/// Tables and errors of one job run, keyed by canonical source key.
///
/// Tables are shared behind `Arc` so a wave can snapshot the set cheaply.
#[derive(Debug, Clone, Default)]
pub struct JobResultSet {
    tables: HashMap<String, Arc<SourceTable>>,
    errors: HashMap<String, Vec<SourceError>>,
}

impl JobResultSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a source's outcome. Errors accumulate per key.
    pub fn record(&mut self, key: impl Into<String>, outcome: SourceOutcome) {
        let key = key.into();
        if !outcome.errors.is_empty() {
            self.errors
                .entry(key.clone())
                .or_default()
                .extend(outcome.errors);
        }
        self.tables.insert(key, Arc::new(outcome.table));
    }

    /// Record an error for a source that produced no table.
    pub fn record_error(&mut self, key: impl Into<String>, error: SourceError) {
        self.errors.entry(key.into()).or_default().push(error);
    }

    pub fn table(&self, key: &str) -> Option<&SourceTable> {
        self.tables.get(key).map(Arc::as_ref)
    }

    pub fn errors(&self, key: &str) -> &[SourceError] {
        self.errors.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.tables.contains_key(key)
    }

    /// Keys with a table, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.tables.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Total number of recorded errors.
    pub fn error_count(&self) -> usize {
        self.errors.values().map(Vec::len).sum()
    }

    /// Keys that have at least one recorded error.
    pub fn failed_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.errors.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    /// This set overlaid with `newer`: tables and errors of `newer` win
    /// for the keys it holds.
    pub fn merged(&self, newer: &JobResultSet) -> JobResultSet {
        let mut merged = self.clone();
        for (key, table) in &newer.tables {
            merged.tables.insert(key.clone(), Arc::clone(table));
            merged.errors.remove(key);
        }
        for (key, errors) in &newer.errors {
            merged.errors.insert(key.clone(), errors.clone());
        }
        merged
    }

    /// JSON document of every table and error, with sorted keys.
    pub fn to_json(&self) -> serde_json::Value {
        let tables: BTreeMap<&str, &SourceTable> = self
            .tables
            .iter()
            .map(|(key, table)| (key.as_str(), table.as_ref()))
            .collect();
        let errors: BTreeMap<&str, Vec<String>> = self
            .errors
            .iter()
            .map(|(key, errors)| (key.as_str(), errors.iter().map(ToString::to_string).collect()))
            .collect();
        serde_json::json!({ "tables": tables, "errors": errors })
    }
}

impl TableLookup for JobResultSet {
    fn table(&self, key: &str) -> Option<&SourceTable> {
        JobResultSet::table(self, key)
    }
}

/// What the sources of one wave read: the tables completed so far in this
/// run, falling back to the previous run's.
#[derive(Debug, Clone, Default)]
pub struct WaveView {
    current: JobResultSet,
    previous: Option<Arc<JobResultSet>>,
}

impl WaveView {
    pub fn new(current: JobResultSet, previous: Option<Arc<JobResultSet>>) -> Self {
        Self { current, previous }
    }

    /// The table a source produced in the previous run.
    pub fn previous(&self, key: &str) -> Option<&SourceTable> {
        self.previous.as_deref().and_then(|previous| previous.table(key))
    }
}

impl TableLookup for WaveView {
    fn table(&self, key: &str) -> Option<&SourceTable> {
        self.current.table(key).or_else(|| self.previous(key))
    }
}
