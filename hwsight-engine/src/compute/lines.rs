//! Row filters and column selection.

use std::collections::HashSet;

use regex::RegexBuilder;

use super::column_index;
use crate::error::ComputeError;
use crate::model::{KeepColumns, MatchingLines};
use crate::psl;
use crate::table::SourceTable;

/// Keep (or exclude) the rows whose `column` matches the regular
/// expression and/or the value list.
///
/// Keeping requires every given criterion to match; excluding drops a row
/// when any criterion matches. Rows too short for `column` are dropped
/// either way.
pub(super) fn matching_lines(
    table: &mut SourceTable,
    params: &MatchingLines,
    keep: bool,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;

    let regex = match params.reg_exp.as_deref().filter(|r| !r.is_empty()) {
        Some(pattern) => Some(
            RegexBuilder::new(&psl::psl_to_regex(pattern))
                .case_insensitive(true)
                .build()
                .map_err(|_| ComputeError::invalid("regExp", pattern))?,
        ),
        None => None,
    };
    let values: Option<HashSet<String>> = params
        .value_list
        .as_deref()
        .filter(|v| !v.is_empty())
        .map(|list| list.split(',').map(str::to_lowercase).collect());

    if regex.is_none() && values.is_none() {
        return Ok(());
    }

    table.rows_mut().retain(|row| {
        let Some(cell) = row.get(column) else {
            return false;
        };
        let regex_match = regex.as_ref().map(|r| r.is_match(cell));
        let value_match = values.as_ref().map(|v| v.contains(&cell.to_lowercase()));

        if keep {
            regex_match.unwrap_or(true) && value_match.unwrap_or(true)
        } else {
            !regex_match.unwrap_or(false) && !value_match.unwrap_or(false)
        }
    });
    Ok(())
}

/// Reduce every row to the listed columns, in ascending order.
pub(super) fn keep_columns(table: &mut SourceTable, params: &KeepColumns) -> Result<(), ComputeError> {
    let mut columns = params
        .column_numbers
        .split(',')
        .map(|n| n.trim().parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ComputeError::invalid("columnNumbers", params.column_numbers.clone()))?;
    columns.sort_unstable();

    if columns.first().is_none_or(|&first| first == 0) {
        return Err(ComputeError::invalid(
            "columnNumbers",
            params.column_numbers.clone(),
        ));
    }

    for row in table.rows_mut() {
        let mut kept = Vec::with_capacity(columns.len());
        for &column in &columns {
            let cell = row.get(column - 1).ok_or(ComputeError::ColumnOutOfRange {
                column,
                row_len: row.len(),
            })?;
            kept.push(cell.clone());
        }
        *row = kept;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::rows;

    fn filter(reg_exp: Option<&str>, value_list: Option<&str>) -> MatchingLines {
        MatchingLines {
            column: 2,
            reg_exp: reg_exp.map(str::to_string),
            value_list: value_list.map(str::to_string),
        }
    }

    fn table() -> SourceTable {
        SourceTable::from_rows(rows([
            &["1", "Disk OK"],
            &["2", "disk failed"],
            &["3", "Fan (2)"],
            &["4"],
        ]))
    }

    #[test]
    fn test_keep_by_regex_is_case_insensitive() {
        let mut t = table();
        matching_lines(&mut t, &filter(Some("^disk"), None), true).unwrap();
        assert_eq!(t.rows(), rows([&["1", "Disk OK"], &["2", "disk failed"]]).as_slice());
    }

    #[test]
    fn test_exclude_by_regex_drops_short_rows() {
        let mut t = table();
        matching_lines(&mut t, &filter(Some("^disk"), None), false).unwrap();
        assert_eq!(t.rows(), rows([&["3", "Fan (2)"]]).as_slice());
    }

    #[test]
    fn test_psl_parentheses_are_literal() {
        let mut t = table();
        matching_lines(&mut t, &filter(Some("(2)"), None), true).unwrap();
        assert_eq!(t.rows(), rows([&["3", "Fan (2)"]]).as_slice());
    }

    #[test]
    fn test_value_list() {
        let mut t = table();
        matching_lines(&mut t, &filter(None, Some("DISK OK,fan (2)")), true).unwrap();
        assert_eq!(t.rows().len(), 2);
    }

    #[test]
    fn test_both_criteria() {
        let mut t = table();
        matching_lines(&mut t, &filter(Some("disk"), Some("disk ok")), true).unwrap();
        assert_eq!(t.rows(), rows([&["1", "Disk OK"]]).as_slice());

        let mut t = table();
        matching_lines(&mut t, &filter(Some("disk"), Some("fan (2)")), false).unwrap();
        assert!(t.rows().is_empty());
    }

    #[test]
    fn test_no_criteria_is_noop() {
        let mut t = table();
        matching_lines(&mut t, &filter(None, Some("")), true).unwrap();
        assert_eq!(t.rows().len(), 4);
    }

    #[test]
    fn test_invalid_regex_is_error() {
        let mut t = table();
        assert!(matching_lines(&mut t, &filter(Some("[a-"), None), true).is_err());
    }

    #[test]
    fn test_keep_columns_sorted() {
        let mut t = SourceTable::from_rows(rows([&["a", "b", "c"], &["d", "e", "f"]]));
        let params = KeepColumns {
            column_numbers: "3, 1".to_string(),
        };
        keep_columns(&mut t, &params).unwrap();
        assert_eq!(t.rows(), rows([&["a", "c"], &["d", "f"]]).as_slice());
    }

    #[test]
    fn test_keep_columns_errors() {
        let mut t = SourceTable::from_rows(rows([&["a", "b"]]));
        let beyond = KeepColumns {
            column_numbers: "1,3".to_string(),
        };
        assert!(matches!(
            keep_columns(&mut t, &beyond),
            Err(ComputeError::ColumnOutOfRange { column: 3, row_len: 2 })
        ));

        let zero = KeepColumns {
            column_numbers: "0".to_string(),
        };
        assert!(keep_columns(&mut t, &zero).is_err());

        let garbage = KeepColumns {
            column_numbers: "one".to_string(),
        };
        assert!(keep_columns(&mut t, &garbage).is_err());
    }
}
