//! MySQL dialect adapter (§4.3 "generic ANSI with MySQL/SQLite
//! adapters"). MySQL has no `ILIKE`; case-insensitivity is achieved by
//! lower-casing both sides, since the engine cannot rely on a
//! case-insensitive collation being configured on the target column.

use crate::cel::DataType;
use crate::sql::{RegexStyle, SqlDialect};

pub struct MySqlDialect;

impl SqlDialect for MySqlDialect {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn json_extract_text(&self, column: &str, path: &[String]) -> String {
        let json_path = path.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(".");
        format!("JSON_UNQUOTE(JSON_EXTRACT({column}, '$.{json_path}'))")
    }

    fn cast(&self, expr: &str, to: DataType) -> String {
        match to {
            DataType::String => expr.to_string(),
            DataType::Integer | DataType::Float => format!("CAST({expr} AS DECIMAL(38, 10))"),
            DataType::Null => expr.to_string(),
            DataType::DateTime => format!("CAST({expr} AS DATETIME)"),
            DataType::Boolean => format!(
                "CASE \
                 WHEN LOWER({expr}) = 'true' THEN TRUE \
                 WHEN LOWER({expr}) = 'false' THEN FALSE \
                 WHEN {expr} REGEXP '^[-+]?[0-9]*\\\\.?[0-9]+$' THEN CAST({expr} AS DECIMAL(38, 10)) >= 1 \
                 WHEN LOWER({expr}) <> '' THEN TRUE \
                 ELSE FALSE END"
            ),
            DataType::Uuid | DataType::Array | DataType::Object | DataType::Unknown => expr.to_string(),
        }
    }

    fn datetime_cast(&self, placeholder: &str) -> String {
        format!("CAST({placeholder} AS DATETIME)")
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Infix("REGEXP")
    }

    fn ilike(&self, column: &str, pattern_sql: &str) -> String {
        format!("LOWER({column}) LIKE LOWER({pattern_sql}) ESCAPE '\\\\'")
    }

    fn array_contains(&self, column: &str, placeholder: &str) -> String {
        format!("JSON_CONTAINS({column}, JSON_QUOTE({placeholder}))")
    }

    fn array_contains_null(&self, column: &str) -> String {
        format!(
            "(JSON_CONTAINS({column}, 'null') OR {column} IS NULL OR JSON_LENGTH({column}) = 0)"
        )
    }

    fn array_length(&self, column: &str) -> String {
        format!("JSON_LENGTH({column})")
    }
}
