//! Translation table lookups.

use super::column_index;
use crate::error::ComputeError;
use crate::model::{ArrayTranslate, Connector, PerBitTranslation, Translate};
use crate::table::{SourceTable, TABLE_SEP};

const DEFAULT_ARRAY_SEPARATOR: &str = "|";
const BIT_SEPARATOR: &str = " - ";

/// Replace each cell of `column` with its translation. Untranslatable
/// values are kept. A translation containing `;` splits the row.
pub(super) fn translate(
    table: &mut SourceTable,
    params: &Translate,
    connector: &Connector,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let translations = connector.translation(&params.translation_table)?;

    let mut resplit = false;
    for row in table.rows_mut() {
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        if let Some(translated) = translations.translate(cell) {
            resplit |= translated.contains(TABLE_SEP);
            *cell = translated.to_string();
        }
    }

    if resplit {
        table.resplit_rows();
    }
    Ok(())
}

/// Translate every element of an array cell.
pub(super) fn array_translate(
    table: &mut SourceTable,
    params: &ArrayTranslate,
    connector: &Connector,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let translations = connector.translation(&params.translation_table)?;
    let array_separator = params
        .array_separator
        .as_deref()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_ARRAY_SEPARATOR);
    let result_separator = params
        .result_separator
        .as_deref()
        .unwrap_or(DEFAULT_ARRAY_SEPARATOR);

    for row in table.rows_mut() {
        let row_len = row.len();
        let cell = row.get_mut(column).ok_or(ComputeError::ColumnOutOfRange {
            column: params.column,
            row_len,
        })?;

        let mut elements: Vec<&str> = cell.split(array_separator).collect();
        while elements.last().is_some_and(|e| e.is_empty()) {
            elements.pop();
        }

        let translated: Vec<&str> = elements
            .into_iter()
            .filter_map(|element| translations.translate(element))
            .filter(|value| !value.trim().is_empty())
            .collect();
        *cell = translated.join(result_separator);
    }
    Ok(())
}

/// Describe the bits of an integer cell: for each listed bit, look up
/// `"<bit>,<0|1>"` and join the non-blank descriptions.
pub(super) fn per_bit_translation(
    table: &mut SourceTable,
    params: &PerBitTranslation,
    connector: &Connector,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let translations = connector.translation(&params.bit_translation_table)?;
    let bits = params
        .bit_list
        .split(',')
        .map(|bit| bit.trim().parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ComputeError::invalid("bitList", params.bit_list.clone()))?;

    for row in table.rows_mut() {
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        if cell.trim().is_empty() {
            continue;
        }
        let value = cell
            .trim()
            .parse::<f64>()
            .map_err(|_| ComputeError::NotANumber(cell.clone()))? as i64;

        let descriptions: Vec<&str> = bits
            .iter()
            .filter_map(|&bit| {
                let set = 1i64.checked_shl(bit).is_some_and(|mask| mask & value != 0);
                translations.get(&format!("{bit},{}", u8::from(set)))
            })
            .filter(|description| !description.trim().is_empty())
            .collect();
        *cell = descriptions.join(BIT_SEPARATOR);
    }
    Ok(())
}
