//! Source definitions.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::compute::Compute;
use crate::psl;

/// A named unit of data acquisition: a protocol query or an internal
/// table operation, followed by a compute chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    /// Canonical key, assigned when the connector is prepared.
    #[serde(skip)]
    pub(crate) key: String,

    #[serde(flatten)]
    pub kind: SourceKind,

    /// Run alone, never alongside another serialized source.
    #[serde(default)]
    pub force_serialization: bool,

    #[serde(default)]
    pub computes: Vec<Compute>,

    /// Run once per row of another source's table.
    #[serde(default)]
    pub execute_for_each_entry_of: Option<ExecuteForEachEntryOf>,

    /// Pause between iterations, in milliseconds.
    #[serde(default)]
    pub sleep_execute_for_each_entry_of: Option<u64>,
}

impl Source {
    pub fn new(kind: SourceKind) -> Self {
        Self {
            key: String::new(),
            kind,
            force_serialization: false,
            computes: Vec::new(),
            execute_for_each_entry_of: None,
            sleep_execute_for_each_entry_of: None,
        }
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn with_computes(mut self, computes: Vec<Compute>) -> Self {
        self.computes = computes;
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Apply `f` to every free-text parameter of the source itself.
    ///
    /// The compute chain and the for-each directive are not visited.
    pub fn try_map_params<E>(
        &mut self,
        mut f: impl FnMut(&str) -> Result<String, E>,
    ) -> Result<(), E> {
        match &mut self.kind {
            SourceKind::TableJoin(join) => {
                join.left_table = f(&join.left_table)?;
                join.right_table = f(&join.right_table)?;
                if let Some(line) = join.default_right_line.as_mut() {
                    *line = f(line)?;
                }
                if let Some(key_type) = join.key_type.as_mut() {
                    *key_type = f(key_type)?;
                }
            }
            SourceKind::TableUnion(union) => {
                for table in union.tables.iter_mut() {
                    *table = f(table)?;
                }
            }
            SourceKind::Copy(copy) => copy.from = f(&copy.from)?,
            SourceKind::Static(stat) => stat.value = f(&stat.value)?,
            SourceKind::Reference(reference) => reference.reference = f(&reference.reference)?,
            protocol => {
                if let Some(query) = protocol.query_mut() {
                    for value in query.parameters.values_mut() {
                        map_json_strings(value, &mut f)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Infallible variant of [`Source::try_map_params`].
    pub fn map_params(&mut self, mut f: impl FnMut(&str) -> String) {
        let _ = self.try_map_params::<std::convert::Infallible>(|s| Ok(f(s)));
    }

    /// Keys of every table this source reads: table operands, the loop
    /// source and `${source::key}` references anywhere in its parameters,
    /// computes and loop literals.
    pub fn references(&self) -> BTreeSet<String> {
        let mut refs: BTreeSet<String> = self
            .kind
            .table_operands()
            .into_iter()
            .map(str::to_string)
            .collect();

        let mut texts = self.params();
        if let Some(directive) = &self.execute_for_each_entry_of {
            refs.insert(directive.source.clone());
            texts.extend(directive.concat_start.clone());
            texts.extend(directive.concat_end.clone());
        }
        for compute in &self.computes {
            texts.extend(compute.text_params());
        }
        for text in &texts {
            refs.extend(psl::source_references(text).map(str::to_string));
        }
        refs
    }

    /// Every free-text parameter of the source itself.
    pub fn params(&self) -> Vec<String> {
        let mut out = Vec::new();
        let mut copy = self.clone();
        copy.map_params(|s| {
            out.push(s.to_string());
            s.to_string()
        });
        out
    }
}

fn map_json_strings<E>(
    value: &mut serde_json::Value,
    f: &mut impl FnMut(&str) -> Result<String, E>,
) -> Result<(), E> {
    match value {
        serde_json::Value::String(s) => *s = f(s)?,
        serde_json::Value::Array(items) => {
            for item in items {
                map_json_strings(item, f)?;
            }
        }
        serde_json::Value::Object(map) => {
            for item in map.values_mut() {
                map_json_strings(item, f)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// What a source does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SourceKind {
    SnmpGet(ProtocolQuery),
    SnmpTable(ProtocolQuery),
    Wbem(ProtocolQuery),
    Wmi(ProtocolQuery),
    Http(ProtocolQuery),
    SshInteractive(ProtocolQuery),
    OsCommand(ProtocolQuery),
    Ipmi(ProtocolQuery),
    Sql(ProtocolQuery),
    TableJoin(TableJoin),
    TableUnion(TableUnion),
    Copy(CopySource),
    Static(StaticSource),
    Reference(ReferenceSource),
}

impl SourceKind {
    /// Type name as written in connector files.
    pub fn type_name(&self) -> &'static str {
        match self {
            SourceKind::SnmpGet(_) => "snmpGet",
            SourceKind::SnmpTable(_) => "snmpTable",
            SourceKind::Wbem(_) => "wbem",
            SourceKind::Wmi(_) => "wmi",
            SourceKind::Http(_) => "http",
            SourceKind::SshInteractive(_) => "sshInteractive",
            SourceKind::OsCommand(_) => "osCommand",
            SourceKind::Ipmi(_) => "ipmi",
            SourceKind::Sql(_) => "sql",
            SourceKind::TableJoin(_) => "tableJoin",
            SourceKind::TableUnion(_) => "tableUnion",
            SourceKind::Copy(_) => "copy",
            SourceKind::Static(_) => "static",
            SourceKind::Reference(_) => "reference",
        }
    }

    /// True for table operations resolved without a protocol client.
    pub fn is_internal(&self) -> bool {
        self.query().is_none()
    }

    /// Protocol parameters, for protocol sources.
    pub fn query(&self) -> Option<&ProtocolQuery> {
        match self {
            SourceKind::SnmpGet(q)
            | SourceKind::SnmpTable(q)
            | SourceKind::Wbem(q)
            | SourceKind::Wmi(q)
            | SourceKind::Http(q)
            | SourceKind::SshInteractive(q)
            | SourceKind::OsCommand(q)
            | SourceKind::Ipmi(q)
            | SourceKind::Sql(q) => Some(q),
            _ => None,
        }
    }

    fn query_mut(&mut self) -> Option<&mut ProtocolQuery> {
        match self {
            SourceKind::SnmpGet(q)
            | SourceKind::SnmpTable(q)
            | SourceKind::Wbem(q)
            | SourceKind::Wmi(q)
            | SourceKind::Http(q)
            | SourceKind::SshInteractive(q)
            | SourceKind::OsCommand(q)
            | SourceKind::Ipmi(q)
            | SourceKind::Sql(q) => Some(q),
            _ => None,
        }
    }

    /// Keys of the tables this source reads directly, as written in its
    /// reference-valued fields.
    pub fn table_operands(&self) -> Vec<&str> {
        match self {
            SourceKind::TableJoin(join) => vec![join.left_table.as_str(), join.right_table.as_str()],
            SourceKind::TableUnion(union) => union.tables.iter().map(String::as_str).collect(),
            SourceKind::Copy(copy) => vec![copy.from.as_str()],
            SourceKind::Reference(reference) => vec![reference.reference.as_str()],
            _ => Vec::new(),
        }
    }

    /// Sources whose parameters hold table keys that must not be replaced
    /// by table content before execution.
    pub fn keeps_source_references(&self) -> bool {
        self.is_internal()
    }
}

/// Protocol-specific parameters, passed through to the protocol client.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProtocolQuery {
    #[serde(flatten)]
    pub parameters: BTreeMap<String, serde_json::Value>,
}

impl ProtocolQuery {
    /// A string parameter.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.parameters.get(name).and_then(serde_json::Value::as_str)
    }

    /// An unsigned integer parameter, given as a number or a numeric string.
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.parameters.get(name)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

/// Join two tables on a key column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableJoin {
    pub left_table: String,
    pub right_table: String,
    /// 1-based.
    pub left_key_column: usize,
    /// 1-based.
    pub right_key_column: usize,
    /// `;`-separated cells appended to left rows without a match.
    #[serde(default)]
    pub default_right_line: Option<String>,
    /// `"wbem"` compares object paths without their namespace.
    #[serde(default)]
    pub key_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableUnion {
    pub tables: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySource {
    pub from: String,
}

/// A literal table, or a reference whose table is taken as is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticSource {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceSource {
    pub reference: String,
}

/// Loop directive: execute the source once per row of `source`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteForEachEntryOf {
    pub source: String,
    #[serde(default)]
    pub concat_method: EntryConcatMethod,
    #[serde(default)]
    pub concat_start: Option<String>,
    #[serde(default)]
    pub concat_end: Option<String>,
}

/// How per-row results of a for-each loop are combined.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryConcatMethod {
    #[default]
    List,
    JsonArray,
    JsonArrayExtended,
    Custom,
}
