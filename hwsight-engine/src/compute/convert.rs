//! Value conversions.

use super::column_index;
use crate::error::ComputeError;
use crate::model::{ConversionType, Convert};
use crate::psl;
use crate::table::SourceTable;

const UNKNOWN_STATUS: &str = "UNKNOWN";

pub(super) fn convert(table: &mut SourceTable, params: &Convert) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    let conversion: fn(&str) -> Option<String> = match params.conversion {
        ConversionType::Hex2Dec => hex_to_decimal,
        ConversionType::Array2SimpleStatus => |value| Some(simple_status(value)),
    };

    for row in table.rows_mut() {
        if let Some(cell) = row.get_mut(column) {
            if let Some(converted) = conversion(cell) {
                *cell = converted;
            }
        }
    }
    Ok(())
}

/// `0x1F`, `00:1f` and `1f` all become `31`. Values that are not
/// hexadecimal yield `None`.
fn hex_to_decimal(value: &str) -> Option<String> {
    let digits: String = value
        .replace("0x", "")
        .replace("0X", "")
        .chars()
        .filter(|c| *c != ':' && !c.is_whitespace())
        .collect();
    if !psl::is_hexadecimal(&digits) {
        return None;
    }
    u64::from_str_radix(&digits, 16).ok().map(|n| n.to_string())
}

/// Reduce `|`-separated states to the worst one: `failed` over
/// `degraded` over `ok`; anything else is `UNKNOWN`.
fn simple_status(value: &str) -> String {
    let states = psl::select_fields(value, "1-", "|", Some("\n"));
    let mut status = UNKNOWN_STATUS;
    for state in states.split('\n') {
        match state.trim().to_lowercase().as_str() {
            "failed" => return "failed".to_string(),
            "degraded" => status = "degraded",
            "ok" if status == UNKNOWN_STATUS => status = "ok",
            _ => {}
        }
    }
    status.to_string()
}
