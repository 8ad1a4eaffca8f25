//! Compute step definitions.

use serde::{Deserialize, Serialize};

use super::de::string_or_number;
use super::translation::TranslationRef;

/// One table transformation in a source's compute chain.
///
/// Tagged by `type` in connector files, e.g. `{ type: "add", column: 2, value: "$3" }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Compute {
    Add(MathOperation),
    Subtract(MathOperation),
    Multiply(MathOperation),
    Divide(MathOperation),
    /// Bitwise AND on integral values.
    And(MathOperation),
    DuplicateColumn(DuplicateColumn),
    Translate(Translate),
    ArrayTranslate(ArrayTranslate),
    PerBitTranslation(PerBitTranslation),
    Substring(Substring),
    Extract(Extract),
    ExtractPropertyFromWbemPath(ExtractPropertyFromWbemPath),
    #[serde(alias = "prepend")]
    LeftConcat(Concat),
    #[serde(alias = "append")]
    RightConcat(Concat),
    Replace(Replace),
    Convert(Convert),
    KeepColumns(KeepColumns),
    KeepOnlyMatchingLines(MatchingLines),
    ExcludeMatchingLines(MatchingLines),
    Json2Csv(Json2Csv),
    Xml2Csv(Xml2Csv),
    Awk(Awk),
}

impl Compute {
    /// Short name used in logs and error reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Compute::Add(_) => "add",
            Compute::Subtract(_) => "subtract",
            Compute::Multiply(_) => "multiply",
            Compute::Divide(_) => "divide",
            Compute::And(_) => "and",
            Compute::DuplicateColumn(_) => "duplicateColumn",
            Compute::Translate(_) => "translate",
            Compute::ArrayTranslate(_) => "arrayTranslate",
            Compute::PerBitTranslation(_) => "perBitTranslation",
            Compute::Substring(_) => "substring",
            Compute::Extract(_) => "extract",
            Compute::ExtractPropertyFromWbemPath(_) => "extractPropertyFromWbemPath",
            Compute::LeftConcat(_) => "leftConcat",
            Compute::RightConcat(_) => "rightConcat",
            Compute::Replace(_) => "replace",
            Compute::Convert(_) => "convert",
            Compute::KeepColumns(_) => "keepColumns",
            Compute::KeepOnlyMatchingLines(_) => "keepOnlyMatchingLines",
            Compute::ExcludeMatchingLines(_) => "excludeMatchingLines",
            Compute::Json2Csv(_) => "json2Csv",
            Compute::Xml2Csv(_) => "xml2Csv",
            Compute::Awk(_) => "awk",
        }
    }

    /// Mutable access to every free-text parameter, for reference and
    /// constant substitution.
    pub fn text_params_mut(&mut self) -> Vec<&mut String> {
        let mut params: Vec<&mut String> = Vec::new();
        match self {
            Compute::Add(op)
            | Compute::Subtract(op)
            | Compute::Multiply(op)
            | Compute::Divide(op)
            | Compute::And(op) => params.push(&mut op.value),
            Compute::DuplicateColumn(_) | Compute::Translate(_) | Compute::Convert(_) => {}
            Compute::ArrayTranslate(p) => {
                params.extend(p.array_separator.as_mut());
                params.extend(p.result_separator.as_mut());
            }
            Compute::PerBitTranslation(p) => params.push(&mut p.bit_list),
            Compute::Substring(p) => {
                params.push(&mut p.start);
                params.push(&mut p.length);
            }
            Compute::Extract(p) => {
                params.push(&mut p.sub_column);
                params.push(&mut p.sub_separators);
            }
            Compute::ExtractPropertyFromWbemPath(p) => params.push(&mut p.property),
            Compute::LeftConcat(p) | Compute::RightConcat(p) => params.push(&mut p.value),
            Compute::Replace(p) => {
                params.push(&mut p.existing_value);
                params.push(&mut p.new_value);
            }
            Compute::KeepColumns(p) => params.push(&mut p.column_numbers),
            Compute::KeepOnlyMatchingLines(p) | Compute::ExcludeMatchingLines(p) => {
                params.extend(p.reg_exp.as_mut());
                params.extend(p.value_list.as_mut());
            }
            Compute::Json2Csv(p) => {
                params.push(&mut p.entry_key);
                params.extend(p.properties.as_mut());
                params.extend(p.separator.as_mut());
            }
            Compute::Xml2Csv(p) => {
                params.push(&mut p.record_tag);
                params.push(&mut p.properties);
            }
            Compute::Awk(p) => {
                params.push(&mut p.script);
                params.extend(p.exclude.as_mut());
                params.extend(p.keep.as_mut());
                params.extend(p.separators.as_mut());
                params.extend(p.select_columns.as_mut());
            }
        }
        params
    }

    /// Read-only view of the free-text parameters.
    pub fn text_params(&self) -> Vec<String> {
        let mut copy = self.clone();
        copy.text_params_mut().into_iter().map(|s| s.clone()).collect()
    }

    /// Named translation table used by this step, if any.
    pub fn translation_name(&self) -> Option<&str> {
        let reference = match self {
            Compute::Translate(p) => &p.translation_table,
            Compute::ArrayTranslate(p) => &p.translation_table,
            Compute::PerBitTranslation(p) => &p.bit_translation_table,
            _ => return None,
        };
        match reference {
            TranslationRef::Named(name) => Some(name),
            TranslationRef::Inline(_) => None,
        }
    }
}

/// Arithmetic on one column, the operand being `$N` or a number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MathOperation {
    pub column: usize,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateColumn {
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Translate {
    pub column: usize,
    pub translation_table: TranslationRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayTranslate {
    pub column: usize,
    pub translation_table: TranslationRef,
    #[serde(default)]
    pub array_separator: Option<String>,
    #[serde(default)]
    pub result_separator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerBitTranslation {
    pub column: usize,
    /// Comma-separated bit positions, e.g. `"0,1,3"`.
    #[serde(deserialize_with = "string_or_number")]
    pub bit_list: String,
    /// Keys are `"<bit>,<0|1>"`.
    pub bit_translation_table: TranslationRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Substring {
    pub column: usize,
    /// 1-based start, literal or `$N`.
    #[serde(deserialize_with = "string_or_number")]
    pub start: String,
    /// Length, literal or `$N`.
    #[serde(deserialize_with = "string_or_number")]
    pub length: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extract {
    pub column: usize,
    /// Field to keep, a number or `$N`.
    #[serde(deserialize_with = "string_or_number")]
    pub sub_column: String,
    pub sub_separators: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractPropertyFromWbemPath {
    pub column: usize,
    pub property: String,
}

/// Used by both left (prepend) and right (append) concatenation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Concat {
    pub column: usize,
    #[serde(deserialize_with = "string_or_number")]
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Replace {
    pub column: usize,
    #[serde(deserialize_with = "string_or_number")]
    pub existing_value: String,
    #[serde(deserialize_with = "string_or_number")]
    pub new_value: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConversionType {
    Hex2Dec,
    Array2SimpleStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Convert {
    pub column: usize,
    pub conversion: ConversionType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeepColumns {
    /// Comma-separated 1-based column numbers.
    #[serde(deserialize_with = "string_or_number")]
    pub column_numbers: String,
}

/// Row filter shared by the keep and exclude variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchingLines {
    pub column: usize,
    /// PSL regular expression.
    #[serde(default)]
    pub reg_exp: Option<String>,
    /// Comma-separated values, compared case-insensitively.
    #[serde(default)]
    pub value_list: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Json2Csv {
    pub entry_key: String,
    /// `;`-separated property paths.
    #[serde(default)]
    pub properties: Option<String>,
    #[serde(default)]
    pub separator: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Xml2Csv {
    pub record_tag: String,
    pub properties: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Awk {
    pub script: String,
    #[serde(default)]
    pub exclude: Option<String>,
    #[serde(default)]
    pub keep: Option<String>,
    #[serde(default)]
    pub separators: Option<String>,
    #[serde(default)]
    pub select_columns: Option<String>,
}
