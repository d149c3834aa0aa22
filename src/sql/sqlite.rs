//! SQLite dialect adapter (§4.3). SQLite has no native `ILIKE`/`~`;
//! `matches()` assumes the caller has registered a `REGEXP` user
//! function (SQLite has no built-in regex support), which is a known
//! deployment requirement rather than something this crate can supply.

use crate::cel::DataType;
use crate::sql::{RegexStyle, SqlDialect};

pub struct SqliteDialect;

impl SqlDialect for SqliteDialect {
    fn placeholder(&self, _index: usize) -> String {
        "?".to_string()
    }

    fn json_extract_text(&self, column: &str, path: &[String]) -> String {
        let json_path = path.iter().map(|p| format!("\"{p}\"")).collect::<Vec<_>>().join(".");
        format!("json_extract({column}, '$.{json_path}')")
    }

    fn cast(&self, expr: &str, to: DataType) -> String {
        match to {
            DataType::String => expr.to_string(),
            DataType::Integer | DataType::Float => format!("CAST({expr} AS REAL)"),
            DataType::Null => expr.to_string(),
            DataType::DateTime => format!("datetime({expr})"),
            DataType::Boolean => format!(
                "CASE \
                 WHEN LOWER({expr}) = 'true' THEN 1 \
                 WHEN LOWER({expr}) = 'false' THEN 0 \
                 WHEN {expr} REGEXP '^[-+]?[0-9]*\\.?[0-9]+$' THEN CAST({expr} AS REAL) >= 1 \
                 WHEN LOWER({expr}) <> '' THEN 1 \
                 ELSE 0 END"
            ),
            DataType::Uuid | DataType::Array | DataType::Object | DataType::Unknown => expr.to_string(),
        }
    }

    fn datetime_cast(&self, placeholder: &str) -> String {
        format!("datetime({placeholder})")
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Infix("REGEXP")
    }

    fn ilike(&self, column: &str, pattern_sql: &str) -> String {
        format!("LOWER({column}) LIKE LOWER({pattern_sql}) ESCAPE '\\'")
    }

    fn array_contains(&self, column: &str, placeholder: &str) -> String {
        format!(
            "EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value = {placeholder})"
        )
    }

    fn array_contains_null(&self, column: &str) -> String {
        format!(
            "(EXISTS (SELECT 1 FROM json_each({column}) WHERE json_each.value IS NULL) \
             OR {column} IS NULL OR json_array_length({column}) = 0)"
        )
    }

    fn array_length(&self, column: &str) -> String {
        format!("json_array_length({column})")
    }
}
