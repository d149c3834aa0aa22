//! CEL → SQL translation: base translator plus dialect adapters (§4.3).
//!
//! The translator never interpolates literal values into the emitted
//! SQL text; every literal is pushed onto a parameter vector and
//! referenced via a dialect-specific placeholder.

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;
pub use sqlite::SqliteDialect;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::cel::{ComparisonOp, DataType, LogicalOp, MethodName, Node, UnaryOp, Value};
use crate::error::{EngineError, Result};
use crate::properties::{FieldMapping, PropertiesMetadata, PropertyMetadata};

/// A single bound parameter. Mirrors sqlx's type set for the feature
/// set this crate binds (`chrono`, `uuid`, `json`).
#[derive(Debug, Clone, PartialEq)]
pub enum SqlParam {
    Text(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    DateTime(DateTime<Utc>),
}

/// The regex operator a dialect emits for `matches()`; some dialects
/// use an infix operator, others a function call.
pub enum RegexStyle {
    Infix(&'static str),
    Function(&'static str),
}

/// The operation set every dialect adapter must expose (§9 "dialect
/// adapters expose the same operation set"). A base translator (below)
/// composes these into full WHERE expressions without knowing which
/// concrete dialect it is talking to.
pub trait SqlDialect {
    /// Positional placeholder for the `index`-th bound parameter
    /// (1-based), e.g. `$1` for PostgreSQL, `?` for MySQL/SQLite.
    fn placeholder(&self, index: usize) -> String;

    /// Extracts a JSON path as text, e.g. `(col -> 'a') ->> 'b'` (PG).
    fn json_extract_text(&self, column: &str, path: &[String]) -> String;

    /// Casts a text SQL expression to a declared [`DataType`]. Boolean
    /// casts expand to a `CASE` ladder per dialect.
    fn cast(&self, expr: &str, to: DataType) -> String;

    /// Wraps a bound datetime placeholder in the dialect's literal cast.
    fn datetime_cast(&self, placeholder: &str) -> String;

    fn regex_style(&self) -> RegexStyle;

    /// `ILIKE`-equivalent comparison (case-insensitive pattern match),
    /// `pattern_sql` already includes the bound placeholder and any
    /// `||` concatenation needed for wildcards.
    fn ilike(&self, column: &str, pattern_sql: &str) -> String;

    /// JSON-array containment test: does the array column contain the
    /// element bound by `placeholder`?
    fn array_contains(&self, column: &str, placeholder: &str) -> String;

    /// "`== null` on an array column" special case (§4.3, §9 open
    /// question (a)): null OR empty OR contains-null.
    fn array_contains_null(&self, column: &str) -> String;

    fn array_length(&self, column: &str) -> String;

    fn coalesce(&self, exprs: &[String]) -> String {
        format!("COALESCE({})", exprs.join(", "))
    }
}

/// Translates a CEL [`Node`] into a parameterized SQL WHERE clause
/// against a [`PropertiesMetadata`] registry (§4.3).
pub struct Translator<'a> {
    dialect: &'a dyn SqlDialect,
    metadata: &'a PropertiesMetadata,
    lenient_unmapped: bool,
    params: Vec<SqlParam>,
}

impl<'a> Translator<'a> {
    pub fn new(dialect: &'a dyn SqlDialect, metadata: &'a PropertiesMetadata, lenient_unmapped: bool) -> Self {
        Translator { dialect, metadata, lenient_unmapped, params: Vec::new() }
    }

    pub fn translate(mut self, ast: &Node) -> Result<(String, Vec<SqlParam>)> {
        let sql = self.visit(ast)?;
        Ok((sql, self.params))
    }

    /// The `ORDER BY`-safe form of a property expression: JSON
    /// extractions are always cast to the declared type so ordering is
    /// not lexicographic (§4.3 "Ordering expressions").
    pub fn order_expression(&self, cel_path: &str) -> Result<String> {
        let metadata = self.resolve(cel_path)?;
        Ok(self.field_expression(&metadata, true))
    }

    fn resolve(&self, cel_path: &str) -> Result<PropertyMetadata> {
        self.metadata.get_property_metadata(cel_path)
    }

    fn bind(&mut self, param: SqlParam) -> String {
        self.params.push(param);
        self.dialect.placeholder(self.params.len())
    }

    fn field_expression(&self, metadata: &PropertyMetadata, force_cast: bool) -> String {
        let exprs: Vec<String> = metadata
            .field_mappings
            .iter()
            .map(|mapping| match mapping {
                FieldMapping::Simple { map_to } => map_to.clone(),
                FieldMapping::Json { json_prop, prop_in_json } => {
                    let extracted = self.dialect.json_extract_text(json_prop, prop_in_json);
                    match metadata.data_type {
                        Some(DataType::String) | Some(DataType::Null) | None if !force_cast => extracted,
                        Some(dt) if dt != DataType::String && dt != DataType::Null => self.dialect.cast(&extracted, dt),
                        _ if force_cast => extracted,
                        _ => extracted,
                    }
                }
            })
            .collect();

        if exprs.len() > 1 {
            self.dialect.coalesce(&exprs)
        } else {
            exprs.into_iter().next().unwrap_or_default()
        }
    }

    fn visit(&mut self, node: &Node) -> Result<String> {
        match node {
            Node::ParenGroup(inner) => Ok(format!("({})", self.visit(inner)?)),
            Node::Unary { op: UnaryOp::Not, operand } => Ok(format!("NOT ({})", self.visit(operand)?)),
            Node::Unary { op: UnaryOp::Neg, .. } => {
                Err(EngineError::unsupported("unary '-' is not a standalone predicate"))
            }
            Node::Logical { lhs, op, rhs } => {
                let op_sql = match op {
                    LogicalOp::And => "AND",
                    LogicalOp::Or => "OR",
                };
                Ok(format!("({} {} {})", self.visit(lhs)?, op_sql, self.visit(rhs)?))
            }
            Node::Comparison { lhs, op, rhs } => self.visit_comparison(lhs, *op, rhs),
            Node::MethodCall { receiver, name, args } => self.visit_method_call(receiver, *name, args),
            Node::Constant(_) | Node::PropertyAccess(_) => {
                Err(EngineError::unsupported("a bare value is not a boolean predicate"))
            }
        }
    }

    fn property_path_or_err(&self, node: &Node) -> Result<&crate::cel::PropertyPath> {
        match node {
            Node::PropertyAccess(path) => Ok(path),
            _ => Err(EngineError::unsupported("expected a property access")),
        }
    }

    fn metadata_for(&self, node: &Node) -> Result<Option<PropertyMetadata>> {
        match node {
            Node::PropertyAccess(path) => match self.resolve(&path.as_dotted()) {
                Ok(m) => Ok(Some(m)),
                Err(EngineError::UnmappedProperty(p)) => {
                    if self.lenient_unmapped {
                        Ok(None)
                    } else {
                        Err(EngineError::UnmappedProperty(p))
                    }
                }
                Err(e) => Err(e),
            },
            _ => Ok(None),
        }
    }

    fn visit_comparison(&mut self, lhs: &Node, op: ComparisonOp, rhs: &Node) -> Result<String> {
        let lhs_metadata = self.metadata_for(lhs)?;
        let lhs_metadata = match lhs_metadata {
            Some(m) => m,
            // Lenient unmapped property: predicate is always false (§7).
            None if matches!(lhs, Node::PropertyAccess(_)) => return Ok("FALSE".to_string()),
            None => PropertyMetadata::default(),
        };
        let lhs_sql = self.field_expression(&lhs_metadata, false);
        let declared = lhs_metadata.data_type;

        if op == ComparisonOp::In {
            return self.visit_in(&lhs_sql, declared, rhs);
        }

        if declared == Some(DataType::Array) {
            return self.visit_array_comparison(&lhs_sql, op, rhs);
        }

        match (op, rhs) {
            (ComparisonOp::Eq, Node::Constant(Value::Null)) => Ok(format!("{lhs_sql} IS NULL")),
            (ComparisonOp::Ne, Node::Constant(Value::Null)) => Ok(format!("{lhs_sql} IS NOT NULL")),
            (_, Node::Constant(value)) => {
                let rhs_sql = self.bind_literal(value, declared)?;
                Ok(format!("{lhs_sql} {} {rhs_sql}", comparison_operator(op)))
            }
            (_, Node::PropertyAccess(_)) => {
                let rhs_metadata = self.metadata_for(rhs)?.unwrap_or_default();
                let rhs_sql = self.field_expression(&rhs_metadata, false);
                Ok(format!("{lhs_sql} {} {rhs_sql}", comparison_operator(op)))
            }
            _ => Err(EngineError::unsupported("comparison right-hand side must be a constant or property")),
        }
    }

    fn bind_literal(&mut self, value: &Value, declared: Option<DataType>) -> Result<String> {
        match value {
            Value::String(s) if declared == Some(DataType::Uuid) => {
                let normalized = Uuid::parse_str(s).map(|u| u.to_string()).unwrap_or_else(|_| s.clone());
                Ok(self.bind(SqlParam::Text(normalized)))
            }
            Value::String(s) => Ok(self.bind(SqlParam::Text(s.clone()))),
            Value::Integer(i) => Ok(self.bind(SqlParam::Int(*i))),
            Value::Float(f) => Ok(self.bind(SqlParam::Float(*f))),
            Value::Boolean(b) => Ok(self.bind(SqlParam::Bool(*b))),
            Value::DateTime(dt) => {
                let placeholder = self.bind(SqlParam::DateTime(*dt));
                Ok(self.dialect.datetime_cast(&placeholder))
            }
            Value::Null => Ok("NULL".to_string()),
            Value::Array(_) => Err(EngineError::type_mismatch("a list literal cannot bind as a scalar")),
        }
    }

    fn visit_array_comparison(&mut self, lhs_sql: &str, op: ComparisonOp, rhs: &Node) -> Result<String> {
        if op != ComparisonOp::Eq && op != ComparisonOp::Ne {
            return Err(EngineError::unsupported("only == / != are supported against ARRAY-typed properties"));
        }
        let value = match rhs {
            Node::Constant(v) => v,
            _ => return Err(EngineError::unsupported("ARRAY comparison requires a constant right-hand side")),
        };
        let positive = if matches!(value, Value::Null) {
            self.dialect.array_contains_null(lhs_sql)
        } else {
            let text = array_element_text(value)?;
            let placeholder = self.bind(SqlParam::Text(text));
            self.dialect.array_contains(lhs_sql, &placeholder)
        };
        if op == ComparisonOp::Eq {
            Ok(positive)
        } else {
            Ok(format!("NOT ({positive})"))
        }
    }

    fn visit_in(&mut self, lhs_sql: &str, declared: Option<DataType>, rhs: &Node) -> Result<String> {
        let items = match rhs {
            Node::Constant(Value::Array(items)) => items,
            _ => return Err(EngineError::unsupported("'in' requires a list literal right-hand side")),
        };

        if declared == Some(DataType::Array) {
            // "rewrite as an OR chain of equality comparisons" (§4.3).
            let mut clauses = Vec::with_capacity(items.len());
            for item in items {
                let placeholder_clause = if matches!(item, Value::Null) {
                    self.dialect.array_contains_null(lhs_sql)
                } else {
                    let text = array_element_text(item)?;
                    let placeholder = self.bind(SqlParam::Text(text));
                    self.dialect.array_contains(lhs_sql, &placeholder)
                };
                clauses.push(placeholder_clause);
            }
            return Ok(format!("({})", clauses.join(" OR ")));
        }

        let mut placeholders = Vec::with_capacity(items.len());
        for item in items {
            placeholders.push(self.bind_literal(item, declared)?);
        }
        Ok(format!("{lhs_sql} IN ({})", placeholders.join(", ")))
    }

    fn visit_method_call(&mut self, receiver: &Node, name: MethodName, args: &[Value]) -> Result<String> {
        // On an ARRAY-typed property, `contains()` is JSON-array
        // containment; on everything else it is a string method.
        let receiver_metadata = self.metadata_for(receiver)?;
        let receiver_metadata = match receiver_metadata {
            Some(m) => m,
            None => return Ok("FALSE".to_string()),
        };
        let receiver_sql = self.field_expression(&receiver_metadata, false);
        let arg = args.first().ok_or_else(|| EngineError::unsupported("method call missing its argument"))?;

        if receiver_metadata.data_type == Some(DataType::Array) && name == MethodName::Contains {
            let text = array_element_text(arg)?;
            let placeholder = self.bind(SqlParam::Text(text));
            return Ok(self.dialect.array_contains(&receiver_sql, &placeholder));
        }

        let literal = match arg {
            Value::String(s) => s.clone(),
            _ => return Err(EngineError::type_mismatch(format!("{}() expects a string argument", name.as_str()))),
        };

        match name {
            MethodName::Contains => {
                let escaped = escape_like(&literal);
                let placeholder = self.bind(SqlParam::Text(format!("%{escaped}%")));
                Ok(format!("{receiver_sql} IS NOT NULL AND {}", self.dialect.ilike(&receiver_sql, &placeholder)))
            }
            MethodName::StartsWith => {
                let escaped = escape_like(&literal);
                let placeholder = self.bind(SqlParam::Text(format!("{escaped}%")));
                Ok(format!("{receiver_sql} IS NOT NULL AND {}", self.dialect.ilike(&receiver_sql, &placeholder)))
            }
            MethodName::EndsWith => {
                let escaped = escape_like(&literal);
                let placeholder = self.bind(SqlParam::Text(format!("%{escaped}")));
                Ok(format!("{receiver_sql} IS NOT NULL AND {}", self.dialect.ilike(&receiver_sql, &placeholder)))
            }
            MethodName::Matches => {
                let placeholder = self.bind(SqlParam::Text(literal));
                Ok(match self.dialect.regex_style() {
                    RegexStyle::Infix(op) => format!("{receiver_sql} {op} {placeholder}"),
                    RegexStyle::Function(func) => format!("{func}({receiver_sql}, {placeholder})"),
                })
            }
        }
    }
}

/// Renders a scalar [`Value`] as the text form bound for JSON-array
/// containment (`array_contains`/`contains()` on an ARRAY-typed
/// property). Must not fall back to `Debug` formatting: that would bind
/// a Rust-internal string like `Integer(5)` instead of `5` as the SQL
/// parameter.
fn array_element_text(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Integer(i) => Ok(i.to_string()),
        Value::Float(f) => Ok(f.to_string()),
        Value::Boolean(b) => Ok(b.to_string()),
        Value::DateTime(dt) => Ok(dt.to_rfc3339()),
        Value::Null => Ok("null".to_string()),
        Value::Array(_) => Err(EngineError::type_mismatch("nested list literals cannot bind as an array element")),
    }
}

fn comparison_operator(op: ComparisonOp) -> &'static str {
    match op {
        ComparisonOp::Eq => "=",
        ComparisonOp::Ne => "<>",
        ComparisonOp::Lt => "<",
        ComparisonOp::Le => "<=",
        ComparisonOp::Gt => ">",
        ComparisonOp::Ge => ">=",
        ComparisonOp::In => unreachable!("handled in visit_in"),
    }
}

/// Escapes LIKE/ILIKE wildcard characters in a user-supplied literal.
/// The emitted pattern always pairs with `ESCAPE '\'` via the dialect's
/// `ilike` implementation.
fn escape_like(s: &str) -> String {
    s.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::{FieldMapping, PropertiesMetadata};

    fn metadata() -> PropertiesMetadata {
        let mut m = PropertiesMetadata::new();
        m.register_exact("source", FieldMapping::simple("source_column"), Some(DataType::String));
        m.register_exact("severity", FieldMapping::simple("severity_column"), Some(DataType::String));
        m.register_wildcard("labels.*", "event", vec!["labels"], None);
        m.register_exact("tags", FieldMapping::simple("tags_column"), Some(DataType::Array));
        m
    }

    #[test]
    fn translates_simple_equality_with_bound_param() {
        let meta = metadata();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"source == "grafana""#).unwrap();
        let (sql, params) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert_eq!(sql, "source_column = $1");
        assert_eq!(params, vec![SqlParam::Text("grafana".to_string())]);
    }

    #[test]
    fn translates_and_with_two_params() {
        let meta = metadata();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"source == "grafana" && severity == "critical""#).unwrap();
        let (sql, params) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert_eq!(sql, "(source_column = $1 AND severity_column = $2)");
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn unmapped_property_degrades_to_false_when_lenient() {
        let meta = PropertiesMetadata::new();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"nope == "x""#).unwrap();
        let (sql, _) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert_eq!(sql, "FALSE");
    }

    #[test]
    fn unmapped_property_errors_when_strict() {
        let meta = PropertiesMetadata::new();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"nope == "x""#).unwrap();
        let err = Translator::new(&dialect, &meta, false).translate(&ast).unwrap_err();
        assert!(matches!(err, EngineError::UnmappedProperty(_)));
    }

    #[test]
    fn array_equality_emits_containment() {
        let meta = metadata();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"tags == "prod""#).unwrap();
        let (sql, params) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert!(sql.contains("@>"));
        assert_eq!(params, vec![SqlParam::Text("prod".to_string())]);
    }

    #[test]
    fn array_equal_null_preserves_open_question_a() {
        let meta = metadata();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"tags == null"#).unwrap();
        let (sql, _) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert!(sql.contains("IS NULL"));
        assert!(sql.contains("@>"));
        assert!(sql.contains("array_length") || sql.contains("ARRAY_LENGTH") || sql.contains("jsonb_array_length"));
    }

    #[test]
    fn in_on_array_property_rewrites_to_or_chain() {
        let meta = metadata();
        let dialect = PostgresDialect;
        let ast = crate::cel::parse(r#"tags in ["prod", "staging"]"#).unwrap();
        let (sql, params) = Translator::new(&dialect, &meta, true).translate(&ast).unwrap();
        assert!(sql.contains(" OR "));
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn contains_escapes_like_wildcards() {
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
    }
}
