//! Text helpers shared by sources and computes: reference patterns, PSL
//! regular expressions, column selection and number formatting.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// `$N`, a whole-value column reference.
pub static COLUMN_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\$(\d+)\s*$").expect("valid column pattern"));

/// `$N` embedded in text. Occurrences preceded by another `$` are escapes
/// and are skipped by [`substitute_columns`].
static COLUMN_REFERENCE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([1-9]\d*)").expect("valid column reference pattern"));

/// `${source::key}`.
pub static SOURCE_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{source::([^\s}]+)\}").expect("valid source pattern"));

/// `%key%`, the older whole-table spelling of `${source::key}`.
static PERCENT_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*%([A-Za-z0-9_.\-]+)%\s*$").expect("valid percent pattern"));

/// `${attribute::name}`.
pub static ATTRIBUTE_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{attribute::([^\s}]+)\}").expect("valid attribute pattern"));

/// `${constant::NAME}`.
pub static CONSTANT_REF_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{constant::([^\s}]+)\}").expect("valid constant pattern"));

static DOUBLE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(\.\d+)?$").expect("valid number pattern"));

static NUMBER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+$").expect("valid integer pattern"));

static HEXA_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[0-9A-Fa-f]+$").expect("valid hexadecimal pattern"));

/// Classify a value as a `$N` column reference.
pub fn column_ref(value: &str) -> ColumnRef {
    match COLUMN_PATTERN.captures(value) {
        Some(caps) => match caps[1].parse::<usize>() {
            Ok(n) if n >= 1 => ColumnRef::Index(n - 1),
            _ => ColumnRef::Invalid,
        },
        None => ColumnRef::None,
    }
}

/// Outcome of [`column_ref`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRef {
    /// Not a column reference.
    None,
    /// A 0-based column index.
    Index(usize),
    /// `$0` or an unparsable index.
    Invalid,
}

/// True when `value` is an unsigned decimal such as `12` or `3.5`.
pub fn is_decimal(value: &str) -> bool {
    DOUBLE_PATTERN.is_match(value)
}

/// True when `value` is an unsigned integer.
pub fn is_integer(value: &str) -> bool {
    NUMBER_PATTERN.is_match(value)
}

pub fn is_hexadecimal(value: &str) -> bool {
    HEXA_PATTERN.is_match(value)
}

/// Replace every `$N` in `text` with cell N of `row`.
///
/// `$$N` is left as is. Returns the 1-based index of the first reference
/// past the end of the row as the error.
pub fn substitute_columns(text: &str, row: &[String]) -> Result<String, usize> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;

    for caps in COLUMN_REFERENCE_PATTERN.captures_iter(text) {
        let Some(whole) = caps.get(0) else { continue };
        if whole.start() > 0 && text.as_bytes()[whole.start() - 1] == b'$' {
            continue;
        }
        let index: usize = caps[1].parse().map_err(|_| usize::MAX)?;
        let cell = row.get(index - 1).ok_or(index)?;

        out.push_str(&text[last..whole.start()]);
        out.push_str(cell);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

/// Collapse the `$$` escape into a literal `$`.
pub fn unescape_dollars(text: &str) -> String {
    text.replace("$$", "$")
}

/// Replace `${attribute::name}` with host attributes. Unknown names stay.
pub fn substitute_attributes(text: &str, attributes: &HashMap<String, String>) -> String {
    if !text.contains("${attribute::") {
        return text.to_string();
    }
    ATTRIBUTE_REF_PATTERN
        .replace_all(text, |caps: &Captures| match attributes.get(&caps[1]) {
            Some(value) => value.clone(),
            None => caps[0].to_string(),
        })
        .into_owned()
}

/// Replace `${source::key}` using `lookup`. A missing table becomes `""`.
pub fn substitute_sources<F>(text: &str, mut lookup: F) -> String
where
    F: FnMut(&str) -> Option<String>,
{
    if !text.contains("${source::") {
        return text.to_string();
    }
    SOURCE_REF_PATTERN
        .replace_all(text, |caps: &Captures| lookup(&caps[1]).unwrap_or_default())
        .into_owned()
}

/// Keys named by `${source::key}` references in `text`.
pub fn source_references(text: &str) -> impl Iterator<Item = &str> {
    SOURCE_REF_PATTERN
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// If `text` is exactly one `${source::key}` reference, the key.
pub fn whole_source_reference(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let caps = SOURCE_REF_PATTERN.captures(trimmed)?;
    let whole = caps.get(0)?;
    if whole.start() == 0 && whole.end() == trimmed.len() {
        caps.get(1).map(|m| m.as_str())
    } else {
        None
    }
}

/// If `text` is exactly one `%key%` reference, the key.
pub fn percent_source_reference(text: &str) -> Option<&str> {
    PERCENT_REF_PATTERN
        .captures(text)
        .and_then(|caps| caps.get(1).map(|m| m.as_str()))
}

/// Convert a PSL regular expression into `regex` crate syntax.
///
/// PSL treats `(`, `)`, `|`, `{` and `}` as literals, spells word
/// boundaries `\<` and `\>`, and a lone `.` means "anything non-empty".
pub fn psl_to_regex(psl: &str) -> String {
    if psl.is_empty() {
        return String::new();
    }
    if psl == "." {
        return ".+".to_string();
    }

    let chars: Vec<char> = psl.chars().collect();
    let mut out = String::with_capacity(psl.len() * 2);
    let mut in_range = false;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '(' | ')' | '|' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '[' => {
                in_range = true;
                out.push(c);
            }
            ']' => {
                in_range = false;
                out.push(c);
            }
            '\\' if in_range => out.push_str("\\\\"),
            '\\' => {
                if let Some(&next) = chars.get(i + 1) {
                    i += 1;
                    match next {
                        '<' | '>' => out.push_str("\\b"),
                        '^' | '$' | '.' | '*' | '+' | '?' | '[' | ']' | '\\' => {
                            out.push('\\');
                            out.push(next);
                        }
                        _ => out.push(next),
                    }
                }
            }
            _ => out.push(c),
        }
        i += 1;
    }
    out
}

/// Select columns from every line of `text`.
///
/// Lines are split on `\n` and cells on any character of `separators`.
/// `columns` is one of `n`, `-n`, `n-` or `m-n` (1-based, inclusive).
/// Selected cells are joined with `result_separator` (default `" "`), as
/// are the per-line results. Empty cells are kept.
pub fn select_columns(
    text: &str,
    columns: &str,
    separators: &str,
    result_separator: Option<&str>,
) -> String {
    select_columns_with(text, columns, separators, result_separator, false)
}

/// Like [`select_columns`], but runs of separators count as one, leading
/// separators are ignored and blank cells are dropped.
pub fn select_fields(
    text: &str,
    columns: &str,
    separators: &str,
    result_separator: Option<&str>,
) -> String {
    select_columns_with(text, columns, separators, result_separator, true)
}

fn select_columns_with(
    text: &str,
    columns: &str,
    separators: &str,
    result_separator: Option<&str>,
    collapse: bool,
) -> String {
    if text.is_empty() {
        return String::new();
    }
    let result_separator = result_separator.unwrap_or(" ");
    let is_sep = |c: char| separators.contains(c);

    let mut lines: Vec<&str> = text.split('\n').collect();
    while lines.last().is_some_and(|line| line.is_empty()) {
        lines.pop();
    }

    let mut results = Vec::with_capacity(lines.len());
    for line in lines {
        let cells: Vec<&str> = if collapse {
            line.split(is_sep).filter(|cell| !cell.is_empty()).collect()
        } else {
            line.split(is_sep).collect()
        };

        let (from, to) = column_range(columns, cells.len());
        if from > 0 && from <= to {
            let selected: Vec<&str> = cells[from - 1..to]
                .iter()
                .copied()
                .filter(|cell| !collapse || !cell.trim().is_empty())
                .collect();
            results.push(selected.join(result_separator));
        }
    }
    results.join(result_separator)
}

/// Parse a column range against a row of `count` cells. Open and bounded
/// ranges are clamped to the row; `(0, 0)` when the range is invalid.
fn column_range(columns: &str, count: usize) -> (usize, usize) {
    let parse = |s: &str| s.parse::<usize>().ok();

    let range = if let Some(rest) = columns.strip_prefix('-') {
        parse(rest).map(|to| (1, to.min(count)))
    } else if let Some(rest) = columns.strip_suffix('-') {
        parse(rest).map(|from| (from, count))
    } else if let Some((from, to)) = columns.split_once('-') {
        parse(from)
            .zip(parse(to))
            .map(|(from, to)| (from, to.min(count)))
    } else {
        parse(columns).map(|n| (n, n)).filter(|&(_, to)| to <= count)
    };

    match range {
        Some((from, to)) if from <= count => (from, to),
        _ => (0, 0),
    }
}

/// Format a number the way connector authors expect: integral values keep
/// a `.0`, very large or small magnitudes use `E` notation.
pub fn format_double(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let magnitude = value.abs();
    if (1e-3..1e7).contains(&magnitude) {
        let text = value.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    } else {
        let text = format!("{value:e}");
        match text.split_once('e') {
            Some((mantissa, exponent)) if mantissa.contains('.') => {
                format!("{mantissa}E{exponent}")
            }
            Some((mantissa, exponent)) => format!("{mantissa}.0E{exponent}"),
            None => text,
        }
    }
}
