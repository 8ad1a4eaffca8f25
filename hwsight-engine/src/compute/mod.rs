//! The compute engine: applies a source's compute chain to its table.
//!
//! Steps run strictly in declaration order. The first step that cannot be
//! evaluated empties the table and ends the chain; the failure is reported
//! to the caller, which records it against the source.

mod arithmetic;
mod convert;
mod external;
mod lines;
mod text;
mod translate;

use std::borrow::Cow;

use crate::collaborator::{DocumentFlattener, HostContext, ScriptRunner, TableLookup};
use crate::error::{ComputeError, SourceError};
use crate::model::{Compute, Connector};
use crate::psl;
use crate::table::SourceTable;

use arithmetic::MathOp;

/// Everything a compute step may consult besides its table.
pub struct ComputeContext<'a> {
    pub connector: &'a Connector,
    pub source_key: &'a str,
    pub host: &'a HostContext,
    pub tables: &'a dyn TableLookup,
    pub scripts: &'a dyn ScriptRunner,
    pub documents: &'a dyn DocumentFlattener,
}

impl ComputeContext<'_> {
    /// Substitute `${attribute::..}` and `${source::..}` references in the
    /// step's parameters, cloning only when there is something to replace.
    fn resolve_references<'c>(&self, compute: &'c Compute) -> Cow<'c, Compute> {
        let needs_resolution = compute
            .text_params()
            .iter()
            .any(|p| p.contains("${attribute::") || p.contains("${source::"));
        if !needs_resolution {
            return Cow::Borrowed(compute);
        }

        let mut resolved = compute.clone();
        for param in resolved.text_params_mut() {
            let with_attributes = psl::substitute_attributes(param, &self.host.attributes);
            *param = psl::substitute_sources(&with_attributes, |key| {
                self.tables.table(key).map(SourceTable::reference_content)
            });
        }
        Cow::Owned(resolved)
    }
}

/// Result of running a compute chain.
#[derive(Debug)]
pub struct ChainOutcome {
    pub table: SourceTable,
    pub failure: Option<SourceError>,
}

/// Apply `computes` in order.
pub async fn run_chain(
    computes: &[Compute],
    table: SourceTable,
    ctx: &ComputeContext<'_>,
) -> ChainOutcome {
    let mut table = table;
    for (index, compute) in computes.iter().enumerate() {
        tracing::debug!(
            host = %ctx.host.hostname,
            source = %ctx.source_key,
            index,
            compute = compute.kind(),
            rows = table.row_count(),
            "Applying compute"
        );

        match apply(compute, table, ctx).await {
            Ok(next) => table = next,
            Err(error) => {
                tracing::warn!(
                    host = %ctx.host.hostname,
                    connector = %ctx.connector.id(),
                    source = %ctx.source_key,
                    index,
                    compute = compute.kind(),
                    error = %error,
                    "Compute failed, the table is emptied"
                );
                return ChainOutcome {
                    table: SourceTable::empty(),
                    failure: Some(SourceError::Compute {
                        index,
                        kind: compute.kind(),
                        error,
                    }),
                };
            }
        }
    }
    ChainOutcome {
        table,
        failure: None,
    }
}

/// Apply one compute step. An empty table is returned unchanged.
pub async fn apply(
    compute: &Compute,
    table: SourceTable,
    ctx: &ComputeContext<'_>,
) -> Result<SourceTable, ComputeError> {
    if table.is_empty() {
        return Ok(table);
    }

    let compute = ctx.resolve_references(compute);
    let mut table = table;

    match compute.as_ref() {
        Compute::Add(op) => arithmetic::math(&mut table, op, MathOp::Add)?,
        Compute::Subtract(op) => arithmetic::math(&mut table, op, MathOp::Subtract)?,
        Compute::Multiply(op) => arithmetic::math(&mut table, op, MathOp::Multiply)?,
        Compute::Divide(op) => arithmetic::math(&mut table, op, MathOp::Divide)?,
        Compute::And(op) => arithmetic::math(&mut table, op, MathOp::And)?,
        Compute::DuplicateColumn(p) => arithmetic::duplicate_column(&mut table, p)?,
        Compute::Translate(p) => translate::translate(&mut table, p, ctx.connector)?,
        Compute::ArrayTranslate(p) => translate::array_translate(&mut table, p, ctx.connector)?,
        Compute::PerBitTranslation(p) => {
            translate::per_bit_translation(&mut table, p, ctx.connector)?
        }
        Compute::Substring(p) => text::substring(&mut table, p)?,
        Compute::Extract(p) => text::extract(&mut table, p)?,
        Compute::ExtractPropertyFromWbemPath(p) => text::extract_wbem_property(&mut table, p)?,
        Compute::LeftConcat(p) => text::concat(&mut table, p, text::Side::Left)?,
        Compute::RightConcat(p) => text::concat(&mut table, p, text::Side::Right)?,
        Compute::Replace(p) => text::replace(&mut table, p)?,
        Compute::Convert(p) => convert::convert(&mut table, p)?,
        Compute::KeepColumns(p) => lines::keep_columns(&mut table, p)?,
        Compute::KeepOnlyMatchingLines(p) => lines::matching_lines(&mut table, p, true)?,
        Compute::ExcludeMatchingLines(p) => lines::matching_lines(&mut table, p, false)?,
        // These set their own raw data.
        Compute::Json2Csv(p) => return external::json_to_csv(table, p, ctx).await,
        Compute::Xml2Csv(p) => return external::xml_to_csv(table, p, ctx).await,
        Compute::Awk(p) => return external::awk(table, p, ctx).await,
    }

    table.refresh_raw_data();
    Ok(table)
}

/// Convert a 1-based column parameter to an index.
fn column_index(column: usize) -> Result<usize, ComputeError> {
    column
        .checked_sub(1)
        .ok_or_else(|| ComputeError::invalid("column", column.to_string()))
}

/// A parameter that is either a literal or a `$N` reference to a cell of
/// the row being processed.
#[derive(Debug, Clone, PartialEq)]
enum Operand<'a> {
    Literal(&'a str),
    Column(usize),
}

impl<'a> Operand<'a> {
    fn parse(name: &'static str, value: &'a str) -> Result<Self, ComputeError> {
        match psl::column_ref(value) {
            psl::ColumnRef::Index(i) => Ok(Operand::Column(i)),
            psl::ColumnRef::Invalid => Err(ComputeError::invalid(name, value)),
            psl::ColumnRef::None => Ok(Operand::Literal(value)),
        }
    }

    /// The operand's value for `row`; `None` when the column is missing.
    fn value<'r>(&self, row: &'r [String]) -> Option<Cow<'r, str>>
    where
        'a: 'r,
    {
        match self {
            Operand::Literal(v) => Some(Cow::Borrowed(*v)),
            Operand::Column(i) => row.get(*i).map(|cell| Cow::Borrowed(cell.as_str())),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::collections::HashMap;

    use crate::collaborator::{HostContext, NoScripts};
    use crate::documents::StandardDocuments;
    use crate::model::Connector;
    use crate::table::SourceTable;

    use super::ComputeContext;

    pub fn connector() -> Connector {
        Connector::from_json5(
            r#"{
                id: "Test",
                translations: {
                    Status: { "0": "ok", "1": "degraded", "2": "failed", default: "unknown" },
                    Split: { "a": "x;y" },
                    Bits: { "0,1": "Fan failure", "0,0": "", "1,1": "PSU failure", "1,0": "PSU ok" },
                },
                monitors: { m: { simple: { sources: { s: { type: "static", value: "1;" } } } } },
            }"#,
        )
        .expect("test connector")
    }

    pub struct Fixture {
        pub connector: Connector,
        pub host: HostContext,
        pub tables: HashMap<String, SourceTable>,
    }

    impl Fixture {
        pub fn new() -> Self {
            Self {
                connector: connector(),
                host: HostContext::new("host1"),
                tables: HashMap::new(),
            }
        }

        pub fn ctx(&self) -> ComputeContext<'_> {
            ComputeContext {
                connector: &self.connector,
                source_key: "monitors.m.simple.sources.s",
                host: &self.host,
                tables: &self.tables,
                scripts: &NoScripts,
                documents: &StandardDocuments,
            }
        }
    }
}
