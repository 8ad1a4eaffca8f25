//! Cell text operations: substring, field extraction, concatenation and
//! replacement.

use super::{Operand, column_index};
use crate::error::ComputeError;
use crate::model::{Concat, Extract, ExtractPropertyFromWbemPath, Replace, Substring};
use crate::psl;
use crate::table::{SourceTable, TABLE_SEP};

/// Resolve an integral bound for `row`. Non-numeric values yield `None`.
fn bound(operand: &Operand<'_>, row: &[String]) -> Option<usize> {
    let value = operand.value(row)?;
    let value = value.trim();
    if !psl::is_decimal(value) {
        return None;
    }
    value.parse::<f64>().ok().map(|v| v as usize)
}

fn integral_operand<'a>(name: &'static str, value: &'a str) -> Result<Operand<'a>, ComputeError> {
    match Operand::parse(name, value)? {
        Operand::Literal(literal) if psl::is_integer(literal.trim()) => {
            Ok(Operand::Literal(literal.trim()))
        }
        Operand::Literal(literal) => Err(ComputeError::invalid(name, literal)),
        column => Ok(column),
    }
}

/// Keep `length` characters starting at the 1-based `start`, clamped to
/// the cell. Rows whose bounds are not numeric are left untouched.
pub(super) fn substring(table: &mut SourceTable, params: &Substring) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let start = integral_operand("start", &params.start)?;
    let length = integral_operand("length", &params.length)?;

    for row in table.rows_mut() {
        if column >= row.len() {
            continue;
        }
        let (Some(start), Some(length)) = (bound(&start, row), bound(&length, row)) else {
            continue;
        };

        let chars: Vec<char> = row[column].chars().collect();
        let begin = start.clamp(1, chars.len() + 1) - 1;
        let end = begin.saturating_add(length).min(chars.len());
        row[column] = chars[begin..end].iter().collect();
    }
    Ok(())
}

/// Replace the cell with field `subColumn` of its text split on any of
/// the `subSeparators` characters.
pub(super) fn extract(table: &mut SourceTable, params: &Extract) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    if params.sub_separators.is_empty() {
        return Err(ComputeError::invalid("subSeparators", ""));
    }
    let sub_column = integral_operand("subColumn", &params.sub_column)?;
    if sub_column == Operand::Literal("0") {
        return Err(ComputeError::invalid("subColumn", "0"));
    }

    for row in table.rows_mut() {
        let row_len = row.len();
        if column >= row_len {
            return Err(ComputeError::ColumnOutOfRange {
                column: params.column,
                row_len,
            });
        }
        let Some(field) = bound(&sub_column, row).filter(|&n| n >= 1) else {
            continue;
        };
        row[column] = psl::select_columns(
            &row[column],
            &field.to_string(),
            &params.sub_separators,
            Some(" "),
        );
    }
    Ok(())
}

/// Extract one property from a WBEM object path such as
/// `Linux_Disk.CreationClassName="Linux_Disk",DeviceID="sda"`.
///
/// The key matches when it is the property itself or ends with
/// `.<property>`, case-insensitively. Unmatched cells are left as is.
pub(super) fn extract_wbem_property(
    table: &mut SourceTable,
    params: &ExtractPropertyFromWbemPath,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let suffix = format!(".{}", params.property.to_lowercase());

    for row in table.rows_mut() {
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        let found = cell.split(',').find_map(|part| {
            let (key, value) = part.split_once('=')?;
            (key.len() >= params.property.len()
                && format!(".{}", key.to_lowercase()).ends_with(&suffix))
            .then(|| value.replace('"', "").trim().to_string())
        });
        if let Some(value) = found {
            *cell = value;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Side {
    Left,
    Right,
}

/// Concatenate a `$N` cell or a literal (which may embed `$N`) to
/// `column`. When `column` is one past the end of the first row, the
/// value becomes a new last column instead.
pub(super) fn concat(table: &mut SourceTable, params: &Concat, side: Side) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let Some(first_len) = table.rows().first().map(Vec::len) else {
        return Ok(());
    };
    let operand = Operand::parse("value", &params.value)?;

    let value_for = |row: &[String]| -> Result<String, ComputeError> {
        match &operand {
            Operand::Column(i) => row.get(*i).cloned().ok_or(ComputeError::ColumnOutOfRange {
                column: i + 1,
                row_len: row.len(),
            }),
            Operand::Literal(literal) => psl::substitute_columns(literal, row).map_err(|n| {
                ComputeError::ColumnOutOfRange {
                    column: n,
                    row_len: row.len(),
                }
            }),
        }
    };

    if column < first_len {
        let mut resplit = false;
        for row in table.rows_mut() {
            if column >= row.len() {
                continue;
            }
            let value = value_for(row.as_slice())?;
            resplit |= value.contains(TABLE_SEP);
            row[column] = match side {
                Side::Left => format!("{value}{}", row[column]),
                Side::Right => format!("{}{value}", row[column]),
            };
        }
        if resplit {
            table.resplit_rows();
        }
    } else if column == first_len {
        for row in table.rows_mut() {
            let value = value_for(row.as_slice())?;
            row.push(value);
        }
    }
    Ok(())
}

/// Replace occurrences of `existingValue` with `newValue` in `column`,
/// each a literal or `$N`, then re-split rows on `;`.
pub(super) fn replace(table: &mut SourceTable, params: &Replace) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let existing = Operand::parse("existingValue", &params.existing_value)?;
    let replacement = Operand::parse("newValue", &params.new_value)?;

    for row in table.rows_mut() {
        if column >= row.len() {
            continue;
        }
        let (Some(existing), Some(replacement)) = (
            existing.value(row).map(|v| v.into_owned()),
            replacement.value(row).map(|v| v.into_owned()),
        ) else {
            continue;
        };
        if existing.is_empty() {
            continue;
        }
        row[column] = row[column].replace(&existing, &replacement);
    }

    table.resplit_rows();
    Ok(())
}
