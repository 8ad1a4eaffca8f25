//! Arithmetic, bitwise and column duplication steps.

use super::{Operand, column_index};
use crate::error::ComputeError;
use crate::model::{DuplicateColumn, MathOperation};
use crate::psl;
use crate::table::SourceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum MathOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    And,
}

/// Combine `column` with the operand, row by row.
///
/// Blank or non-numeric cells, missing operand columns and division by
/// zero leave the cell untouched.
pub(super) fn math(
    table: &mut SourceTable,
    operation: &MathOperation,
    op: MathOp,
) -> Result<(), ComputeError> {
    let column = column_index(operation.column)?;
    let operand = match Operand::parse("value", &operation.value)? {
        Operand::Literal(value) if psl::is_decimal(value.trim()) => Operand::Literal(value.trim()),
        Operand::Literal(value) => return Err(ComputeError::invalid("value", value)),
        column_ref => column_ref,
    };

    for row in table.rows_mut() {
        let Some(operand_value) = operand.value(row).map(|v| v.trim().to_string()) else {
            continue;
        };
        let Some(cell) = row.get_mut(column) else {
            continue;
        };
        if cell.trim().is_empty() || operand_value.is_empty() {
            continue;
        }
        let (Ok(left), Ok(right)) = (cell.trim().parse::<f64>(), operand_value.parse::<f64>())
        else {
            continue;
        };

        *cell = match op {
            MathOp::Add => psl::format_double(left + right),
            MathOp::Subtract => psl::format_double(left - right),
            MathOp::Multiply => psl::format_double(left * right),
            MathOp::Divide if right == 0.0 => continue,
            MathOp::Divide => psl::format_double(left / right),
            MathOp::And => ((left as i64) & (right as i64)).to_string(),
        };
    }
    Ok(())
}

/// Insert a copy of `column` right after it.
pub(super) fn duplicate_column(
    table: &mut SourceTable,
    params: &DuplicateColumn,
) -> Result<(), ComputeError> {
    let column = column_index(params.column)?;
    for row in table.rows_mut() {
        if let Some(value) = row.get(column).cloned() {
            row.insert(column, value);
        }
    }
    Ok(())
}
