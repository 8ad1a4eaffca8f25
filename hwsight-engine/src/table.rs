//! The tabular value flowing through the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Cell separator used in the textual table representation.
pub const TABLE_SEP: &str = ";";

/// Line separator used in the textual table representation.
pub const NEW_LINE: &str = "\n";

/// Rows of string cells plus the optional unparsed payload they came from.
///
/// Rows may be ragged. A table is *empty* when it has no rows and no
/// non-empty raw data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceTable {
    rows: Vec<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    raw_data: Option<String>,
}

impl SourceTable {
    /// A table with no rows and no raw data.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A table from rows, without raw data.
    pub fn from_rows(rows: Vec<Vec<String>>) -> Self {
        Self {
            rows,
            raw_data: None,
        }
    }

    /// A table holding only an unparsed payload.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self {
            rows: Vec::new(),
            raw_data: Some(raw.into()),
        }
    }

    /// Parse the `;`-separated representation, keeping the text as raw data.
    pub fn from_csv(csv: impl Into<String>) -> Self {
        let csv = csv.into();
        Self {
            rows: csv_to_rows(&csv, TABLE_SEP),
            raw_data: Some(csv),
        }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn rows_mut(&mut self) -> &mut Vec<Vec<String>> {
        &mut self.rows
    }

    pub fn into_rows(self) -> Vec<Vec<String>> {
        self.rows
    }

    pub fn raw_data(&self) -> Option<&str> {
        self.raw_data.as_deref()
    }

    pub fn set_raw_data(&mut self, raw: Option<String>) {
        self.raw_data = raw;
    }

    /// Builder-style variant of [`SourceTable::set_raw_data`].
    pub fn with_raw_data(mut self, raw: impl Into<String>) -> Self {
        self.raw_data = Some(raw.into());
        self
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows and the raw data is absent or empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() && self.raw_data.as_deref().is_none_or(str::is_empty)
    }

    /// The `;`-separated representation of the rows.
    pub fn to_csv(&self) -> String {
        rows_to_csv(&self.rows, TABLE_SEP)
    }

    /// Re-derive the raw data from the current rows.
    pub fn refresh_raw_data(&mut self) {
        self.raw_data = Some(self.to_csv());
    }

    /// Serialize then re-parse the rows, so cells containing `;` become
    /// separate cells.
    pub fn resplit_rows(&mut self) {
        self.rows = csv_to_rows(&self.to_csv(), TABLE_SEP);
    }

    /// Drop rows that have no cells.
    pub fn drop_empty_rows(&mut self) {
        self.rows.retain(|row| !row.is_empty());
    }

    /// Content substituted for a `${source::key}` reference.
    ///
    /// The rows if there are any, the raw data otherwise. A trailing `;`
    /// is removed from lines that contain exactly one, so single-column
    /// tables read as plain values.
    pub fn reference_content(&self) -> String {
        let text = if self.rows.is_empty() {
            self.raw_data.clone().unwrap_or_default()
        } else {
            self.to_csv()
        };

        text.split(NEW_LINE)
            .map(|line| match line.find(TABLE_SEP) {
                Some(pos) if pos + TABLE_SEP.len() == line.len() => &line[..pos],
                _ => line,
            })
            .collect::<Vec<_>>()
            .join(NEW_LINE)
    }
}

impl fmt::Display for SourceTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rows.is_empty() {
            return write!(f, "{}", self.raw_data.as_deref().unwrap_or_default());
        }
        write!(f, "{}", self.to_csv())
    }
}

impl From<Vec<Vec<String>>> for SourceTable {
    fn from(rows: Vec<Vec<String>>) -> Self {
        Self::from_rows(rows)
    }
}

/// Join rows into lines of `cell;cell;` (note the trailing separator).
pub fn rows_to_csv(rows: &[Vec<String>], separator: &str) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|cell| format!("{cell}{separator}"))
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(NEW_LINE)
}

/// Split text into rows.
///
/// Empty lines are skipped. One trailing empty cell produced by a
/// terminating separator is dropped; other empty cells are kept.
pub fn csv_to_rows(csv: &str, separator: &str) -> Vec<Vec<String>> {
    csv.split(NEW_LINE)
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
        .filter(|line| !line.is_empty())
        .map(|line| line_to_cells(line, separator))
        .collect()
}

/// Split one line into cells, dropping one trailing empty cell.
pub fn line_to_cells(line: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return vec![line.to_string()];
    }
    let mut cells: Vec<String> = line.split(separator).map(str::to_string).collect();
    if cells.len() > 1 && cells.last().is_some_and(String::is_empty) {
        cells.pop();
    }
    cells
}

/// Shorthand for building rows in code and tests.
pub fn rows<const N: usize>(data: [&[&str]; N]) -> Vec<Vec<String>> {
    data.iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_csv_has_trailing_separator() {
        let table = SourceTable::from_rows(rows([&["a", "b"], &["c"]]));
        assert_eq!(table.to_csv(), "a;b;\nc;");
    }

    #[test]
    fn test_from_csv_drops_blank_lines_and_trailing_cell() {
        let table = SourceTable::from_csv("a;b;\n\nc;;d\r\n");
        assert_eq!(table.rows(), rows([&["a", "b"], &["c", "", "d"]]).as_slice());
        assert_eq!(table.raw_data(), Some("a;b;\n\nc;;d\r\n"));
    }

    #[test]
    fn test_from_csv_keeps_single_empty_cell_row() {
        assert_eq!(csv_to_rows(";", TABLE_SEP), vec![vec![String::new()]]);
    }

    #[test]
    fn test_is_empty() {
        assert!(SourceTable::empty().is_empty());
        assert!(SourceTable::from_raw("").is_empty());
        assert!(!SourceTable::from_raw("payload").is_empty());
        assert!(!SourceTable::from_rows(rows([&[]])).is_empty());
    }

    #[test]
    fn test_resplit_rows() {
        let mut table = SourceTable::from_rows(rows([&["a;b", "c"]]));
        table.resplit_rows();
        assert_eq!(table.rows(), rows([&["a", "b", "c"]]).as_slice());
    }

    #[test]
    fn test_reference_content_strips_single_trailing_separator() {
        let single = SourceTable::from_rows(rows([&["x"], &["y"]]));
        assert_eq!(single.reference_content(), "x\ny");

        let multi = SourceTable::from_rows(rows([&["x", "1"]]));
        assert_eq!(multi.reference_content(), "x;1;");

        let raw = SourceTable::from_raw("<xml/>");
        assert_eq!(raw.reference_content(), "<xml/>");
    }
}
