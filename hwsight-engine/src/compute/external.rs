//! Steps delegated to collaborators: document flattening and AWK.

use regex::Regex;

use super::ComputeContext;
use crate::error::ComputeError;
use crate::model::{Awk, Json2Csv, Xml2Csv};
use crate::psl;
use crate::table::{self, NEW_LINE, SourceTable, TABLE_SEP};

const DEFAULT_AWK_SEPARATORS: &str = " \t";

fn collaborator_error(kind: &'static str) -> impl Fn(crate::error::ProtocolError) -> ComputeError {
    move |e| ComputeError::Collaborator {
        kind,
        message: e.to_string(),
    }
}

/// Flatten the raw JSON payload. An empty result leaves the table as is.
pub(super) async fn json_to_csv(
    table: SourceTable,
    params: &Json2Csv,
    ctx: &ComputeContext<'_>,
) -> Result<SourceTable, ComputeError> {
    let Some(properties) = params.properties.as_deref() else {
        return Ok(table);
    };
    let separator = params
        .separator
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(TABLE_SEP);
    let properties = table::line_to_cells(properties, TABLE_SEP);

    let csv = ctx
        .documents
        .json_to_csv(
            table.raw_data().unwrap_or_default(),
            &params.entry_key,
            &properties,
            separator,
        )
        .await
        .map_err(collaborator_error("json2Csv"))?;

    if csv.is_empty() {
        return Ok(table);
    }
    Ok(SourceTable::from_rows(table::csv_to_rows(&csv, separator)).with_raw_data(csv))
}

/// Flatten the raw XML payload into one row per record.
pub(super) async fn xml_to_csv(
    table: SourceTable,
    params: &Xml2Csv,
    ctx: &ComputeContext<'_>,
) -> Result<SourceTable, ComputeError> {
    let rows = ctx
        .documents
        .xml_to_rows(
            table.raw_data().unwrap_or_default(),
            &params.record_tag,
            &params.properties,
        )
        .await
        .map_err(collaborator_error("xml2Csv"))?;

    let mut result = SourceTable::from_rows(rows);
    result.refresh_raw_data();
    Ok(result)
}

/// Run the script over the raw data (or the table text), then filter,
/// split and re-read its output as a table.
pub(super) async fn awk(
    table: SourceTable,
    params: &Awk,
    ctx: &ComputeContext<'_>,
) -> Result<SourceTable, ComputeError> {
    let input = match table.raw_data().filter(|raw| !raw.is_empty()) {
        Some(raw) => raw.to_string(),
        None => table.to_csv(),
    };

    let output = ctx
        .scripts
        .run_awk(&params.script, &input)
        .await
        .map_err(collaborator_error("awk"))?;
    if output.trim().is_empty() {
        return Ok(SourceTable::empty());
    }

    let text = post_process(&output, params)?;
    Ok(SourceTable::from_csv(text))
}

fn compile(name: &'static str, pattern: Option<&str>) -> Result<Option<Regex>, ComputeError> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(&psl::psl_to_regex(p)).map_err(|_| ComputeError::invalid(name, p)))
        .transpose()
}

fn post_process(output: &str, params: &Awk) -> Result<String, ComputeError> {
    let keep = compile("keep", params.keep.as_deref())?;
    let exclude = compile("exclude", params.exclude.as_deref())?;
    let split = params.separators.is_some() || params.select_columns.is_some();
    let separators = params
        .separators
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_AWK_SEPARATORS);
    let columns = params.select_columns.as_deref().unwrap_or("1-");

    let lines: Vec<String> = output
        .lines()
        .filter(|line| keep.as_ref().is_none_or(|r| r.is_match(line)))
        .filter(|line| !exclude.as_ref().is_some_and(|r| r.is_match(line)))
        .filter_map(|line| {
            if !split {
                return Some(line.to_string());
            }
            let selected = psl::select_fields(line, columns, separators, Some(TABLE_SEP));
            (!selected.is_empty()).then(|| format!("{selected}{TABLE_SEP}"))
        })
        .collect();
    Ok(lines.join(NEW_LINE))
}
