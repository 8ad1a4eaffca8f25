//! Table operations resolved in-process: copy, reference, static, join and
//! union.

use std::collections::HashMap;

use crate::collaborator::TableLookup;
use crate::error::{ProtocolError, SourceError};
use crate::model::{SourceKind, StaticSource, TableJoin, TableUnion};
use crate::psl;
use crate::table::{self, SourceTable, NEW_LINE, TABLE_SEP};

pub(super) fn resolve(kind: &SourceKind, tables: &dyn TableLookup) -> Result<SourceTable, SourceError> {
    match kind {
        SourceKind::Copy(copy) => {
            let mut table = lookup(tables, &copy.from)?.clone();
            table.drop_empty_rows();
            Ok(table)
        }
        SourceKind::Reference(reference) => Ok(lookup(tables, &reference.reference)?.clone()),
        SourceKind::Static(stat) => static_table(stat, tables),
        SourceKind::TableJoin(join) => table_join(join, tables),
        SourceKind::TableUnion(union) => Ok(table_union(union, tables)),
        protocol => Err(ProtocolError::Unsupported(protocol.type_name().to_string()).into()),
    }
}

fn lookup<'t>(tables: &'t dyn TableLookup, key: &str) -> Result<&'t SourceTable, SourceError> {
    tables
        .table(key)
        .ok_or_else(|| SourceError::MissingReference(key.to_string()))
}

/// A whole `${source::key}` value yields that table; anything else is
/// parsed as `;`-separated lines.
fn static_table(stat: &StaticSource, tables: &dyn TableLookup) -> Result<SourceTable, SourceError> {
    if let Some(key) = psl::whole_source_reference(&stat.value) {
        return Ok(lookup(tables, key)?.clone());
    }
    let mut table = SourceTable::from_csv(stat.value.as_str());
    table.drop_empty_rows();
    Ok(table)
}

fn table_join(join: &TableJoin, tables: &dyn TableLookup) -> Result<SourceTable, SourceError> {
    let left = lookup(tables, &join.left_table)?;
    let right = lookup(tables, &join.right_table)?;

    // Key columns are validated at load time.
    let (Some(left_key), Some(right_key)) = (
        join.left_key_column.checked_sub(1),
        join.right_key_column.checked_sub(1),
    ) else {
        return Ok(SourceTable::empty());
    };

    let wbem = join
        .key_type
        .as_deref()
        .is_some_and(|key_type| key_type.eq_ignore_ascii_case("wbem"));
    let normalize = |key: &str| {
        let key = if wbem { strip_wbem_namespace(key) } else { key };
        key.to_lowercase()
    };

    let default_line: Option<Vec<String>> = join
        .default_right_line
        .as_deref()
        .filter(|line| !line.is_empty())
        .map(|line| table::line_to_cells(line, TABLE_SEP));

    let mut right_index: HashMap<String, Vec<&Vec<String>>> = HashMap::new();
    for row in right.rows() {
        if let Some(key) = row.get(right_key) {
            right_index.entry(normalize(key)).or_default().push(row);
        }
    }

    let mut rows = Vec::new();
    for left_row in left.rows() {
        let Some(key) = left_row.get(left_key) else {
            continue;
        };
        match right_index.get(&normalize(key)) {
            Some(matches) => {
                for right_row in matches {
                    rows.push(left_row.iter().chain(right_row.iter()).cloned().collect());
                }
            }
            None => {
                if let Some(default) = &default_line {
                    rows.push(left_row.iter().chain(default.iter()).cloned().collect());
                }
            }
        }
    }

    let mut joined = SourceTable::from_rows(rows);
    joined.refresh_raw_data();
    Ok(joined)
}

/// `root/cimv2:CIM_Disk.DeviceID="sda"` becomes `CIM_Disk.DeviceID="sda"`.
fn strip_wbem_namespace(path: &str) -> &str {
    match path.find(':') {
        Some(pos) if !path[..pos].contains(['"', '=']) => &path[pos + 1..],
        _ => path,
    }
}

/// Rows of every available table, in order. Missing tables are skipped.
fn table_union(union: &TableUnion, tables: &dyn TableLookup) -> SourceTable {
    let mut rows = Vec::new();
    let mut raw_parts = Vec::new();

    for key in &union.tables {
        match tables.table(key) {
            Some(table) => {
                rows.extend(table.rows().iter().cloned());
                if let Some(raw) = table.raw_data().filter(|raw| !raw.is_empty()) {
                    raw_parts.push(raw);
                }
            }
            None => tracing::debug!(table = %key, "Union operand not available, skipped"),
        }
    }

    let raw = raw_parts.join(NEW_LINE).replace("\n\n", NEW_LINE);
    SourceTable::from_rows(rows).with_raw_data(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CopySource, ReferenceSource};
    use crate::table::rows;

    fn tables() -> HashMap<String, SourceTable> {
        let mut tables = HashMap::new();
        tables.insert(
            "disks".to_string(),
            SourceTable::from_csv("SDA;512;\nsdb;1024;\nsdc;2048;"),
        );
        tables.insert("health".to_string(), SourceTable::from_csv("sda;OK;\nsdb;FAILED;\n"));
        tables.insert(
            "paths".to_string(),
            SourceTable::from_rows(rows([
                &["root/cimv2:Disk.ID=\"1\"", "a"],
                &["root/cimv2:Disk.ID=\"2\"", "b"],
            ])),
        );
        tables.insert(
            "names".to_string(),
            SourceTable::from_rows(rows([&["Disk.ID=\"1\"", "first"]])),
        );
        tables
    }

    fn join(default_right_line: Option<&str>) -> SourceKind {
        SourceKind::TableJoin(TableJoin {
            left_table: "disks".to_string(),
            right_table: "health".to_string(),
            left_key_column: 1,
            right_key_column: 1,
            default_right_line: default_right_line.map(str::to_string),
            key_type: None,
        })
    }

    #[test]
    fn test_join_is_case_insensitive() {
        let table = resolve(&join(None), &tables()).unwrap();
        assert_eq!(
            table.rows(),
            rows([&["SDA", "512", "sda", "OK"], &["sdb", "1024", "sdb", "FAILED"]]).as_slice()
        );
        assert_eq!(table.raw_data(), Some("SDA;512;sda;OK;\nsdb;1024;sdb;FAILED;"));
    }

    #[test]
    fn test_join_default_right_line() {
        let table = resolve(&join(Some(";UNKNOWN;")), &tables()).unwrap();
        assert_eq!(table.row_count(), 3);
        assert_eq!(table.rows()[2], vec!["sdc", "2048", "", "UNKNOWN"]);
    }

    #[test]
    fn test_join_wbem_keys_ignore_namespace() {
        let kind = SourceKind::TableJoin(TableJoin {
            left_table: "paths".to_string(),
            right_table: "names".to_string(),
            left_key_column: 1,
            right_key_column: 1,
            default_right_line: None,
            key_type: Some("Wbem".to_string()),
        });
        let table = resolve(&kind, &tables()).unwrap();
        assert_eq!(table.row_count(), 1);
        assert_eq!(table.rows()[0][3], "first");
    }

    #[test]
    fn test_join_missing_operand() {
        let mut tables = tables();
        tables.remove("health");
        assert_eq!(
            resolve(&join(None), &tables).unwrap_err(),
            SourceError::MissingReference("health".to_string())
        );
    }

    #[test]
    fn test_union_concatenates_rows_and_raw_data() {
        let kind = SourceKind::TableUnion(TableUnion {
            tables: vec!["health".to_string(), "missing".to_string(), "disks".to_string()],
        });
        let table = resolve(&kind, &tables()).unwrap();
        assert_eq!(table.row_count(), 5);
        assert_eq!(
            table.raw_data(),
            Some("sda;OK;\nsdb;FAILED;\nSDA;512;\nsdb;1024;\nsdc;2048;")
        );
    }

    #[test]
    fn test_copy_and_reference() {
        let mut tables = tables();
        tables.insert(
            "sparse".to_string(),
            SourceTable::from_rows(vec![vec!["a".to_string()], vec![], vec!["b".to_string()]]),
        );

        let copy = SourceKind::Copy(CopySource {
            from: "sparse".to_string(),
        });
        assert_eq!(resolve(&copy, &tables).unwrap().row_count(), 2);

        let reference = SourceKind::Reference(ReferenceSource {
            reference: "sparse".to_string(),
        });
        assert_eq!(resolve(&reference, &tables).unwrap().row_count(), 3);
    }

    #[test]
    fn test_static_literal_and_reference() {
        let literal = SourceKind::Static(StaticSource {
            value: "a;1;\n\nb;2;".to_string(),
        });
        let table = resolve(&literal, &tables()).unwrap();
        assert_eq!(table.rows(), rows([&["a", "1"], &["b", "2"]]).as_slice());

        let whole = SourceKind::Static(StaticSource {
            value: "${source::health}".to_string(),
        });
        assert_eq!(resolve(&whole, &tables()).unwrap().row_count(), 2);
    }
}
