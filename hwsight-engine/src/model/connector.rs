//! Connectors: the prepared, immutable in-memory form of a connector file.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;

use super::compute::Compute;
use super::de::ordered_map;
use super::source::{Source, SourceKind};
use super::translation::{TranslationRef, TranslationTable};
use crate::error::{ComputeError, EngineError, Result};
use crate::psl;
use crate::resolver::{self, ExecutionPlan};

/// Prefix of pre-source keys.
pub const PRE_PREFIX: &str = "pre.";

/// A job phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PhaseKind {
    Pre,
    Discovery,
    Collect,
    Simple,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Pre => "pre",
            PhaseKind::Discovery => "discovery",
            PhaseKind::Collect => "collect",
            PhaseKind::Simple => "simple",
        }
    }
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PhaseKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pre" => Ok(PhaseKind::Pre),
            "discovery" => Ok(PhaseKind::Discovery),
            "collect" => Ok(PhaseKind::Collect),
            "simple" => Ok(PhaseKind::Simple),
            other => Err(EngineError::invalid_request(format!("unknown phase '{other}'"))),
        }
    }
}

/// The ordered sources of one phase and their execution plan.
#[derive(Debug, Clone)]
pub struct JobPhase {
    kind: PhaseKind,
    prefix: String,
    sources: Vec<Source>,
    plan: ExecutionPlan,
}

impl JobPhase {
    fn new(kind: PhaseKind, prefix: String, entries: Vec<(String, Source)>) -> Self {
        let sources = entries
            .into_iter()
            .map(|(name, source)| source.with_key(format!("{prefix}{name}")))
            .collect();
        Self {
            kind,
            prefix,
            sources,
            plan: ExecutionPlan::default(),
        }
    }

    pub fn kind(&self) -> PhaseKind {
        self.kind
    }

    /// Sources in declaration order.
    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn source(&self, key: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.key() == key)
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.plan
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// The phases of one monitor.
#[derive(Debug, Clone)]
pub enum MonitorJob {
    Standard {
        discovery: Option<JobPhase>,
        collect: Option<JobPhase>,
    },
    Simple {
        simple: JobPhase,
    },
}

impl MonitorJob {
    pub fn phase(&self, kind: PhaseKind) -> Option<&JobPhase> {
        match (self, kind) {
            (MonitorJob::Standard { discovery, .. }, PhaseKind::Discovery) => discovery.as_ref(),
            (MonitorJob::Standard { collect, .. }, PhaseKind::Collect) => collect.as_ref(),
            (MonitorJob::Simple { simple }, PhaseKind::Simple) => Some(simple),
            _ => None,
        }
    }

    fn phases_mut(&mut self) -> Vec<&mut JobPhase> {
        match self {
            MonitorJob::Standard { discovery, collect } => {
                discovery.iter_mut().chain(collect.iter_mut()).collect()
            }
            MonitorJob::Simple { simple } => vec![simple],
        }
    }

    fn phases(&self) -> Vec<&JobPhase> {
        match self {
            MonitorJob::Standard { discovery, collect } => {
                discovery.iter().chain(collect.iter()).collect()
            }
            MonitorJob::Simple { simple } => vec![simple],
        }
    }
}

/// Connector file layout.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectorDocument {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub pre: Vec<(String, Source)>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub monitors: Vec<(String, MonitorDocument)>,
    #[serde(default)]
    pub translations: HashMap<String, TranslationTable>,
    #[serde(default)]
    pub constants: HashMap<String, String>,
}

/// Monitor layout: either `discovery`/`collect` or `simple`.
#[derive(Debug, Deserialize)]
pub struct MonitorDocument {
    #[serde(default)]
    pub discovery: Option<PhaseDocument>,
    #[serde(default)]
    pub collect: Option<PhaseDocument>,
    #[serde(default)]
    pub simple: Option<PhaseDocument>,
}

/// Phase layout. Keys other than `sources` (such as mappings) are ignored.
#[derive(Debug, Deserialize)]
pub struct PhaseDocument {
    #[serde(default, deserialize_with = "ordered_map")]
    pub sources: Vec<(String, Source)>,
}

/// A validated connector with canonical source keys and planned phases.
#[derive(Debug, Clone)]
pub struct Connector {
    id: String,
    display_name: Option<String>,
    pre: Option<JobPhase>,
    monitors: Vec<(String, MonitorJob)>,
    translations: HashMap<String, TranslationTable>,
}

impl Connector {
    /// Parse and prepare a connector from JSON5 text.
    pub fn from_json5(text: &str) -> Result<Self> {
        let document: ConnectorDocument = json5::from_str(text)?;
        Self::from_document(document)
    }

    /// Read, parse and prepare a connector file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!(
                "Failed to read connector file '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_json5(&text).map_err(|e| match e {
            EngineError::Parse(msg) => {
                EngineError::Parse(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Assign canonical keys, substitute constants, canonicalize references,
    /// validate computes and plan every phase.
    pub fn from_document(document: ConnectorDocument) -> Result<Self> {
        if document.id.trim().is_empty() {
            return Err(EngineError::validation("connector id cannot be empty"));
        }

        let pre = (!document.pre.is_empty())
            .then(|| JobPhase::new(PhaseKind::Pre, PRE_PREFIX.to_string(), document.pre));

        let mut monitors = Vec::with_capacity(document.monitors.len());
        for (name, monitor) in document.monitors {
            monitors.push((name.clone(), build_monitor(&name, monitor)?));
        }

        let mut connector = Connector {
            id: document.id,
            display_name: document.display_name,
            pre,
            monitors,
            translations: document.translations,
        };

        let keys: HashSet<String> = connector
            .all_phases()
            .iter()
            .flat_map(|phase| phase.sources.iter().map(|s| s.key.clone()))
            .collect();

        let constants = document.constants;
        let translations = connector.translations.clone();
        for phase in connector.all_phases_mut() {
            for source in phase.sources.iter_mut() {
                substitute_constants(source, &constants);
                canonicalize_references(source, &phase.prefix, &keys)?;
                validate_source(source, &translations)?;
            }
            phase.plan = resolver::plan(&phase.sources)?;
        }

        tracing::debug!(
            connector = %connector.id,
            sources = keys.len(),
            monitors = connector.monitors.len(),
            "Connector prepared"
        );
        Ok(connector)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.id)
    }

    pub fn pre(&self) -> Option<&JobPhase> {
        self.pre.as_ref()
    }

    pub fn monitors(&self) -> &[(String, MonitorJob)] {
        &self.monitors
    }

    pub fn monitor(&self, name: &str) -> Option<&MonitorJob> {
        self.monitors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, job)| job)
    }

    /// A phase, `pre` included (the monitor name is ignored for `pre`).
    pub fn phase(&self, monitor: &str, kind: PhaseKind) -> Option<&JobPhase> {
        match kind {
            PhaseKind::Pre => self.pre.as_ref(),
            _ => self.monitor(monitor)?.phase(kind),
        }
    }

    /// Look up a source by canonical key in any phase.
    pub fn source(&self, key: &str) -> Option<&Source> {
        self.all_phases()
            .into_iter()
            .find_map(|phase| phase.source(key))
    }

    /// The table a translate-family compute uses.
    pub fn translation<'a>(
        &'a self,
        reference: &'a TranslationRef,
    ) -> std::result::Result<&'a TranslationTable, ComputeError> {
        match reference {
            TranslationRef::Inline(table) => Ok(table),
            TranslationRef::Named(name) => self
                .translations
                .get(name)
                .ok_or_else(|| ComputeError::UnknownTranslationTable(name.clone())),
        }
    }

    fn all_phases(&self) -> Vec<&JobPhase> {
        self.pre
            .iter()
            .chain(self.monitors.iter().flat_map(|(_, job)| job.phases()))
            .collect()
    }

    fn all_phases_mut(&mut self) -> Vec<&mut JobPhase> {
        self.pre
            .iter_mut()
            .chain(
                self.monitors
                    .iter_mut()
                    .flat_map(|(_, job)| job.phases_mut()),
            )
            .collect()
    }
}

fn build_monitor(name: &str, monitor: MonitorDocument) -> Result<MonitorJob> {
    let prefix = |kind: PhaseKind| format!("monitors.{name}.{kind}.sources.");
    let phase = |kind: PhaseKind, doc: PhaseDocument| JobPhase::new(kind, prefix(kind), doc.sources);

    match (monitor.discovery, monitor.collect, monitor.simple) {
        (None, None, Some(simple)) => Ok(MonitorJob::Simple {
            simple: phase(PhaseKind::Simple, simple),
        }),
        (discovery, collect, None) if discovery.is_some() || collect.is_some() => {
            Ok(MonitorJob::Standard {
                discovery: discovery.map(|d| phase(PhaseKind::Discovery, d)),
                collect: collect.map(|c| phase(PhaseKind::Collect, c)),
            })
        }
        (_, _, Some(_)) => Err(EngineError::validation(format!(
            "monitor '{name}' mixes a simple job with discovery/collect"
        ))),
        _ => Err(EngineError::validation(format!(
            "monitor '{name}' defines no job"
        ))),
    }
}

fn substitute_constants(source: &mut Source, constants: &HashMap<String, String>) {
    if constants.is_empty() {
        return;
    }
    let replace = |text: &str| {
        if !text.contains("${constant::") {
            return text.to_string();
        }
        psl::CONSTANT_REF_PATTERN
            .replace_all(text, |caps: &regex::Captures| match constants.get(&caps[1]) {
                Some(value) => value.clone(),
                None => caps[0].to_string(),
            })
            .into_owned()
    };

    source.map_params(replace);
    for compute in source.computes.iter_mut() {
        for param in compute.text_params_mut() {
            *param = replace(param);
        }
    }
    if let Some(directive) = source.execute_for_each_entry_of.as_mut() {
        for literal in directive.concat_start.iter_mut().chain(directive.concat_end.iter_mut()) {
            *literal = replace(literal);
        }
    }
}

/// Resolve a written reference to a canonical key: an exact key first,
/// then a sibling in the same phase, then a pre source.
fn canonical_key(reference: &str, prefix: &str, keys: &HashSet<String>) -> Option<String> {
    [
        reference.to_string(),
        format!("{prefix}{reference}"),
        format!("{PRE_PREFIX}{reference}"),
    ]
    .into_iter()
    .find(|candidate| keys.contains(candidate))
}

fn canonicalize_references(
    source: &mut Source,
    prefix: &str,
    keys: &HashSet<String>,
) -> Result<()> {
    let source_key = source.key.clone();
    let unknown = |reference: &str| EngineError::UnknownReference {
        source_key: source_key.clone(),
        reference: reference.to_string(),
    };

    let rewrite_embedded = |text: &str| -> Result<String> {
        if !text.contains("${source::") {
            return Ok(text.to_string());
        }
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in psl::SOURCE_REF_PATTERN.captures_iter(text) {
            let (Some(whole), Some(reference)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let key = canonical_key(reference.as_str(), prefix, keys)
                .ok_or_else(|| unknown(reference.as_str()))?;
            out.push_str(&text[last..whole.start()]);
            out.push_str(&format!("${{source::{key}}}"));
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    };

    // Operand fields hold bare keys once prepared.
    let rewrite_operand = |text: &str| -> Result<String> {
        let reference = psl::whole_source_reference(text).unwrap_or(text.trim());
        canonical_key(reference, prefix, keys).ok_or_else(|| unknown(reference))
    };

    match &mut source.kind {
        SourceKind::TableJoin(join) => {
            join.left_table = rewrite_operand(&join.left_table)?;
            join.right_table = rewrite_operand(&join.right_table)?;
        }
        SourceKind::TableUnion(union) => {
            for table in union.tables.iter_mut() {
                *table = rewrite_operand(table)?;
            }
        }
        SourceKind::Copy(copy) => copy.from = rewrite_operand(&copy.from)?,
        SourceKind::Reference(reference) => {
            reference.reference = rewrite_operand(&reference.reference)?
        }
        _ => {}
    }

    source.try_map_params(&rewrite_embedded)?;
    for compute in source.computes.iter_mut() {
        for param in compute.text_params_mut() {
            let percent = psl::percent_source_reference(param)
                .and_then(|reference| canonical_key(reference, prefix, keys));
            *param = match percent {
                Some(key) => format!("${{source::{key}}}"),
                None => rewrite_embedded(param)?,
            };
        }
    }
    if let Some(directive) = source.execute_for_each_entry_of.as_mut() {
        directive.source = rewrite_operand(&directive.source)?;
        for literal in directive.concat_start.iter_mut().chain(directive.concat_end.iter_mut()) {
            *literal = rewrite_embedded(literal)?;
        }
    }
    Ok(())
}

fn validate_source(source: &Source, translations: &HashMap<String, TranslationTable>) -> Result<()> {
    let invalid = |detail: String| {
        EngineError::validation(format!("source {}: {}", source.key(), detail))
    };

    if let SourceKind::TableJoin(join) = &source.kind {
        if join.left_key_column == 0 || join.right_key_column == 0 {
            return Err(invalid("join key columns are 1-based".to_string()));
        }
    }

    for (index, compute) in source.computes.iter().enumerate() {
        if let Some(name) = compute.translation_name() {
            if !translations.contains_key(name) {
                return Err(invalid(format!(
                    "compute #{index} ({}) uses unknown translation table '{name}'",
                    compute.kind()
                )));
            }
        }
        check_compute(compute).map_err(|detail| {
            invalid(format!("compute #{index} ({}) {detail}", compute.kind()))
        })?;
    }
    Ok(())
}

/// Static checks of compute parameters. Values holding `${...}` references
/// are checked at run time instead.
fn check_compute(compute: &Compute) -> std::result::Result<(), String> {
    let dynamic = |value: &str| value.contains("${");
    let operand = |value: &str| {
        dynamic(value)
            || psl::is_decimal(value.trim())
            || matches!(psl::column_ref(value), psl::ColumnRef::Index(_))
    };
    let index = |value: &str| {
        psl::is_integer(value.trim()) || matches!(psl::column_ref(value), psl::ColumnRef::Index(_))
    };
    let positive = |column: usize| {
        if column == 0 {
            Err("column numbers start at 1".to_string())
        } else {
            Ok(())
        }
    };

    match compute {
        Compute::Add(op)
        | Compute::Subtract(op)
        | Compute::Multiply(op)
        | Compute::Divide(op)
        | Compute::And(op) => {
            positive(op.column)?;
            if !operand(&op.value) {
                return Err(format!("has an invalid operand '{}'", op.value));
            }
        }
        Compute::DuplicateColumn(p) => positive(p.column)?,
        Compute::Translate(p) => positive(p.column)?,
        Compute::ArrayTranslate(p) => positive(p.column)?,
        Compute::PerBitTranslation(p) => {
            positive(p.column)?;
            if !dynamic(&p.bit_list)
                && p.bit_list.split(',').any(|bit| bit.trim().parse::<u32>().is_err())
            {
                return Err(format!("has an invalid bit list '{}'", p.bit_list));
            }
        }
        Compute::Substring(p) => {
            positive(p.column)?;
            for value in [&p.start, &p.length] {
                if !dynamic(value) && !index(value) {
                    return Err(format!("has an invalid bound '{value}'"));
                }
            }
        }
        Compute::Extract(p) => {
            positive(p.column)?;
            if !dynamic(&p.sub_column) && !index(&p.sub_column) {
                return Err(format!("has an invalid sub-column '{}'", p.sub_column));
            }
            if p.sub_separators.is_empty() {
                return Err("needs sub-separators".to_string());
            }
        }
        Compute::ExtractPropertyFromWbemPath(p) => positive(p.column)?,
        Compute::LeftConcat(p) | Compute::RightConcat(p) => positive(p.column)?,
        Compute::Replace(p) => positive(p.column)?,
        Compute::Convert(p) => positive(p.column)?,
        Compute::KeepColumns(p) => {
            if !dynamic(&p.column_numbers)
                && p.column_numbers
                    .split(',')
                    .any(|n| !matches!(n.trim().parse::<usize>(), Ok(n) if n >= 1))
            {
                return Err(format!("has invalid column numbers '{}'", p.column_numbers));
            }
        }
        Compute::KeepOnlyMatchingLines(p) | Compute::ExcludeMatchingLines(p) => {
            positive(p.column)?;
            if let Some(pattern) = p.reg_exp.as_deref().filter(|r| !dynamic(r)) {
                regex::Regex::new(&psl::psl_to_regex(pattern))
                    .map_err(|e| format!("has an invalid regular expression: {e}"))?;
            }
        }
        Compute::Json2Csv(_) | Compute::Xml2Csv(_) | Compute::Awk(_) => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONNECTOR: &str = r#"{
        id: "LinuxDisks",
        constants: { LSBLK: "lsblk -rn" },
        translations: { StatusTable: { "0": "ok", "1": "failed", default: "degraded" } },
        pre: {
            controllers: { type: "static", value: "c0;\nc1;" },
        },
        monitors: {
            disk: {
                discovery: {
                    sources: {
                        list: { type: "osCommand", commandLine: "${constant::LSBLK} -o NAME" },
                        details: {
                            type: "tableJoin",
                            leftTable: "${source::list}",
                            rightTable: "controllers",
                            leftKeyColumn: 1,
                            rightKeyColumn: 1,
                        },
                    },
                    mapping: { source: "${source::details}" },
                },
                collect: {
                    sources: {
                        status: {
                            type: "copy",
                            from: "${source::monitors.disk.discovery.sources.list}",
                            computes: [{ type: "translate", column: 2, translationTable: "StatusTable" }],
                        },
                    },
                },
            },
            fan: { simple: { sources: { speed: { type: "ipmi", command: "sdr" } } } },
        },
    }"#;

    #[test]
    fn test_prepare_connector() {
        let connector = Connector::from_json5(CONNECTOR).unwrap();
        assert_eq!(connector.id(), "LinuxDisks");
        assert_eq!(connector.monitors().len(), 2);

        let discovery = connector.phase("disk", PhaseKind::Discovery).unwrap();
        let keys: Vec<&str> = discovery.sources().iter().map(Source::key).collect();
        assert_eq!(
            keys,
            vec![
                "monitors.disk.discovery.sources.list",
                "monitors.disk.discovery.sources.details"
            ]
        );
        assert_eq!(discovery.plan().len(), 2);

        let list = connector.source("monitors.disk.discovery.sources.list").unwrap();
        assert_eq!(
            list.kind.query().unwrap().get_str("commandLine"),
            Some("lsblk -rn -o NAME")
        );

        match &connector.source("monitors.disk.discovery.sources.details").unwrap().kind {
            SourceKind::TableJoin(join) => {
                assert_eq!(join.left_table, "monitors.disk.discovery.sources.list");
                assert_eq!(join.right_table, "pre.controllers");
            }
            other => panic!("unexpected {other:?}"),
        }

        assert!(connector.phase("fan", PhaseKind::Simple).is_some());
        assert!(connector.phase("fan", PhaseKind::Collect).is_none());
        assert!(connector.pre().is_some());
    }

    #[test]
    fn test_unknown_reference_is_rejected() {
        let text = CONNECTOR.replace("rightTable: \"controllers\"", "rightTable: \"nowhere\"");
        match Connector::from_json5(&text) {
            Err(EngineError::UnknownReference { reference, .. }) => assert_eq!(reference, "nowhere"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_unknown_translation_is_rejected() {
        let text = CONNECTOR.replace("translationTable: \"StatusTable\"", "translationTable: \"Missing\"");
        assert!(matches!(Connector::from_json5(&text), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_cycle_is_rejected_at_load() {
        let text = r#"{
            id: "Loop",
            monitors: { m: { simple: { sources: {
                a: { type: "copy", from: "b" },
                b: { type: "reference", reference: "${source::a}" },
            } } } },
        }"#;
        assert!(matches!(
            Connector::from_json5(text),
            Err(EngineError::DependencyCycle { .. })
        ));
    }

    #[test]
    fn test_percent_reference_in_compute_is_canonicalized() {
        let text = r#"{
            id: "Percent",
            monitors: { m: { simple: { sources: {
                offset: { type: "static", value: "10;" },
                values: { type: "static", value: "1;", computes: [
                    { type: "add", column: 1, value: "%offset%" },
                    { type: "replace", column: 1, existingValue: "100%", newValue: "full" },
                ] },
            } } } },
        }"#;
        let connector = Connector::from_json5(text).unwrap();
        let values = connector.source("monitors.m.simple.sources.values").unwrap();
        match &values.computes[..] {
            [Compute::Add(add), Compute::Replace(replace)] => {
                assert_eq!(add.value, "${source::monitors.m.simple.sources.offset}");
                assert_eq!(replace.existing_value, "100%");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(connector.phase("m", PhaseKind::Simple).unwrap().plan().len(), 2);
    }

    #[test]
    fn test_invalid_compute_is_rejected() {
        let text = r#"{
            id: "Bad",
            monitors: { m: { simple: { sources: {
                a: { type: "static", value: "1;", computes: [{ type: "add", column: 1, value: "abc" }] },
            } } } },
        }"#;
        assert!(matches!(Connector::from_json5(text), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_monitor_without_job_is_rejected() {
        let text = r#"{ id: "Empty", monitors: { m: {} } }"#;
        assert!(matches!(Connector::from_json5(text), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_phase_kind_from_str() {
        assert_eq!("collect".parse::<PhaseKind>().unwrap(), PhaseKind::Collect);
        assert!("mapping".parse::<PhaseKind>().is_err());
    }
}
