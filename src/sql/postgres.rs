//! PostgreSQL dialect adapter (§4.3), grounded directly on
//! `CelToPostgreSqlProvider` from the original implementation: `->>`
//! JSON text extraction, the boolean `CASE` ladder in the stated order,
//! `jsonb @>` array containment, `ILIKE`, and `~` regex.

use crate::cel::DataType;
use crate::sql::{RegexStyle, SqlDialect};

pub struct PostgresDialect;

impl SqlDialect for PostgresDialect {
    fn placeholder(&self, index: usize) -> String {
        format!("${index}")
    }

    fn json_extract_text(&self, column: &str, path: &[String]) -> String {
        let mut segments = vec![column.to_string()];
        segments.extend(path.iter().map(|p| format!("'{p}'")));
        let (last, init) = segments.split_last().expect("path is non-empty");
        format!("({}) ->> {}", init.join(" -> "), last)
    }

    fn cast(&self, expr: &str, to: DataType) -> String {
        match to {
            DataType::String => expr.to_string(),
            DataType::Integer | DataType::Float => format!("({expr})::FLOAT"),
            DataType::Null => expr.to_string(),
            DataType::DateTime => format!("({expr})::TIMESTAMP"),
            DataType::Boolean => format!(
                "CASE \
                 WHEN LOWER({expr}) = 'true' THEN true \
                 WHEN LOWER({expr}) = 'false' THEN false \
                 WHEN {expr} ~ '^[-+]?[0-9]*\\.?[0-9]+$' THEN CAST({expr} AS FLOAT) >= 1 \
                 WHEN LOWER({expr}) <> '' THEN true \
                 ELSE false END"
            ),
            // UUID normalization happens at bind time; ARRAY/OBJECT/UNKNOWN
            // never reach a scalar cast under the §4.3 cast rule.
            DataType::Uuid | DataType::Array | DataType::Object | DataType::Unknown => expr.to_string(),
        }
    }

    fn datetime_cast(&self, placeholder: &str) -> String {
        format!("CAST({placeholder} AS TIMESTAMP)")
    }

    fn regex_style(&self) -> RegexStyle {
        RegexStyle::Infix("~")
    }

    fn ilike(&self, column: &str, pattern_sql: &str) -> String {
        format!("{column} ILIKE {pattern_sql} ESCAPE '\\'")
    }

    fn array_contains(&self, column: &str, placeholder: &str) -> String {
        format!("{column}::jsonb @> jsonb_build_array({placeholder}::text)")
    }

    fn array_contains_null(&self, column: &str) -> String {
        format!("({column}::jsonb @> '[null]' OR {column} IS NULL OR jsonb_array_length({column}::jsonb) = 0)")
    }

    fn array_length(&self, column: &str) -> String {
        format!("jsonb_array_length({column}::jsonb)")
    }
}
