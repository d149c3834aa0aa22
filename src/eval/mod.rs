//! In-memory evaluator: `eval(AST, alert) -> bool` (§4.2).

use std::sync::mpsc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value as Json;

use crate::alert::AlertDto;
use crate::cel::{ComparisonOp, LogicalOp, MethodName, Node, UnaryOp, Value};
use crate::error::{EngineError, Result};

/// A runtime value produced while walking the AST against a concrete
/// alert. Distinct from [`crate::cel::Value`] (an AST literal) because
/// evaluation can also produce JSON objects/arrays pulled straight out
/// of the alert payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EvalValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    DateTime(DateTime<Utc>),
    Array(Vec<EvalValue>),
}

impl EvalValue {
    pub fn is_null(&self) -> bool {
        matches!(self, EvalValue::Null)
    }

    /// NULL is falsy (§4.2 "Logical: ... NULL is falsy").
    pub fn is_truthy(&self) -> bool {
        match self {
            EvalValue::Null => false,
            EvalValue::Bool(b) => *b,
            EvalValue::Array(items) => !items.is_empty(),
            _ => true,
        }
    }

    fn from_json(json: &Json) -> EvalValue {
        match json {
            Json::Null => EvalValue::Null,
            Json::Bool(b) => EvalValue::Bool(*b),
            Json::Number(n) => {
                if let Some(i) = n.as_i64() {
                    EvalValue::Int(i)
                } else {
                    EvalValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Json::String(s) => EvalValue::Str(s.clone()),
            Json::Array(items) => EvalValue::Array(items.iter().map(EvalValue::from_json).collect()),
            Json::Object(_) => EvalValue::Null, // bare objects aren't addressable as scalars
        }
    }

    fn from_const(value: &Value) -> EvalValue {
        match value {
            Value::String(s) => EvalValue::Str(s.clone()),
            Value::Integer(i) => EvalValue::Int(*i),
            Value::Float(f) => EvalValue::Float(*f),
            Value::Boolean(b) => EvalValue::Bool(*b),
            Value::Null => EvalValue::Null,
            Value::DateTime(dt) => EvalValue::DateTime(*dt),
            Value::Array(items) => EvalValue::Array(items.iter().map(EvalValue::from_const).collect()),
        }
    }

    fn as_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            EvalValue::DateTime(dt) => Some(*dt),
            EvalValue::Str(s) => DateTime::parse_from_rfc3339(s).ok().map(|d| d.with_timezone(&Utc)),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            EvalValue::Int(i) => Some(*i as f64),
            EvalValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    fn as_str(&self) -> Option<&str> {
        match self {
            EvalValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Evaluates a parsed CEL predicate against a single alert.
pub fn eval(ast: &Node, alert: &AlertDto, regex_timeout: Duration) -> Result<bool> {
    let context = alert.eval_context();
    Ok(eval_node(ast, &context, regex_timeout)?.is_truthy())
}

/// Resolves a dotted path against an alert's evaluation context and
/// renders it to a stable string, used by the correlator to build
/// grouping-key fingerprints (§4.5 "Grouping").
pub fn resolve_property_as_string(alert: &AlertDto, dotted_path: &str) -> String {
    let context = alert.eval_context();
    let segments: Vec<String> = dotted_path.split('.').map(String::from).collect();
    fingerprint_repr(&resolve_path(&context, &segments))
}

fn fingerprint_repr(value: &EvalValue) -> String {
    match value {
        EvalValue::Null => "null".to_string(),
        EvalValue::Bool(b) => b.to_string(),
        EvalValue::Int(i) => i.to_string(),
        EvalValue::Float(f) => f.to_string(),
        EvalValue::Str(s) => s.clone(),
        EvalValue::DateTime(dt) => dt.to_rfc3339(),
        EvalValue::Array(items) => items.iter().map(fingerprint_repr).collect::<Vec<_>>().join("\u{1f}"),
    }
}

fn eval_node(node: &Node, context: &Json, regex_timeout: Duration) -> Result<EvalValue> {
    match node {
        Node::Constant(v) => Ok(EvalValue::from_const(v)),
        Node::PropertyAccess(path) => Ok(resolve_path(context, &path.0)),
        Node::ParenGroup(inner) => eval_node(inner, context, regex_timeout),
        Node::Unary { op, operand } => {
            let value = eval_node(operand, context, regex_timeout)?;
            match op {
                UnaryOp::Not => Ok(EvalValue::Bool(!value.is_truthy())),
                UnaryOp::Neg => match value {
                    EvalValue::Int(i) => Ok(EvalValue::Int(-i)),
                    EvalValue::Float(f) => Ok(EvalValue::Float(-f)),
                    _ => Err(EngineError::type_mismatch("unary '-' on a non-numeric value")),
                },
            }
        }
        Node::Logical { lhs, op, rhs } => {
            let left = eval_node(lhs, context, regex_timeout)?;
            match op {
                // Short-circuit left-to-right (§4.2).
                LogicalOp::And if !left.is_truthy() => Ok(EvalValue::Bool(false)),
                LogicalOp::Or if left.is_truthy() => Ok(EvalValue::Bool(true)),
                _ => {
                    let right = eval_node(rhs, context, regex_timeout)?;
                    Ok(EvalValue::Bool(right.is_truthy()))
                }
            }
        }
        Node::Comparison { lhs, op, rhs } => {
            let left = eval_node(lhs, context, regex_timeout)?;
            let right = eval_node(rhs, context, regex_timeout)?;
            Ok(EvalValue::Bool(eval_comparison(&left, *op, &right)?))
        }
        Node::MethodCall { receiver, name, args } => {
            let receiver_value = eval_node(receiver, context, regex_timeout)?;
            let arg = EvalValue::from_const(&args[0]);
            eval_method(&receiver_value, *name, &arg, regex_timeout)
        }
    }
}

/// Descends a dotted path through a JSON value. A missing intermediate
/// resolves to `Null` rather than failing (§4.2). When the path
/// traverses a JSON array before consuming all segments, the remaining
/// segments are evaluated against every element ("property on list",
/// §4.2), producing an `EvalValue::Array` whose elements the caller's
/// comparison then broadcasts over.
fn resolve_path(current: &Json, segments: &[String]) -> EvalValue {
    match current {
        Json::Array(items) => {
            EvalValue::Array(items.iter().map(|item| resolve_path(item, segments)).collect())
        }
        _ if segments.is_empty() => EvalValue::from_json(current),
        Json::Object(map) => match map.get(&segments[0]) {
            Some(next) => resolve_path(next, &segments[1..]),
            None => EvalValue::Null,
        },
        _ => EvalValue::Null,
    }
}

fn eval_comparison(lhs: &EvalValue, op: ComparisonOp, rhs: &EvalValue) -> Result<bool> {
    // "Property on list" broadcast (§4.2): if the LHS resolved to a
    // list because the path crossed an array, a non-`in` comparison is
    // true if *any* element satisfies it.
    if let (EvalValue::Array(items), false) = (lhs, op == ComparisonOp::In) {
        return Ok(items.iter().any(|item| scalar_comparison(item, op, rhs).unwrap_or(false)));
    }

    if op == ComparisonOp::In {
        let items = match rhs {
            EvalValue::Array(items) => items,
            _ => return Err(EngineError::type_mismatch("'in' requires a list right-hand side")),
        };
        return Ok(items.iter().any(|item| values_equal(lhs, item)));
    }

    scalar_comparison(lhs, op, rhs)
}

fn scalar_comparison(lhs: &EvalValue, op: ComparisonOp, rhs: &EvalValue) -> Result<bool> {
    match op {
        ComparisonOp::Eq | ComparisonOp::Ne => {
            // NULL is absorbing except in an explicit null test (§3, §4.2).
            if lhs.is_null() || rhs.is_null() {
                let both_null = lhs.is_null() && rhs.is_null();
                return Ok(if op == ComparisonOp::Eq { both_null } else { !both_null });
            }
            let eq = values_equal(lhs, rhs);
            Ok(if op == ComparisonOp::Eq { eq } else { !eq })
        }
        ComparisonOp::Lt | ComparisonOp::Le | ComparisonOp::Gt | ComparisonOp::Ge => {
            // "relational ops against NULL yield false" (§4.2).
            if lhs.is_null() || rhs.is_null() {
                return Ok(false);
            }
            let ordering = compare_ordered(lhs, rhs)?;
            Ok(match op {
                ComparisonOp::Lt => ordering.is_lt(),
                ComparisonOp::Le => ordering.is_le(),
                ComparisonOp::Gt => ordering.is_gt(),
                ComparisonOp::Ge => ordering.is_ge(),
                _ => unreachable!(),
            })
        }
        ComparisonOp::In => unreachable!("handled in eval_comparison"),
    }
}

fn values_equal(a: &EvalValue, b: &EvalValue) -> bool {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x == y;
    }
    // Datetime vs datetime-parseable string compares chronologically,
    // only when *both* sides parse as datetimes (§4.2).
    if let (Some(x), Some(y)) = (a.as_datetime(), b.as_datetime()) {
        if matches!(a, EvalValue::DateTime(_)) || matches!(b, EvalValue::DateTime(_)) {
            return x == y;
        }
    }
    match (a, b) {
        (EvalValue::Str(x), EvalValue::Str(y)) => x == y,
        (EvalValue::Bool(x), EvalValue::Bool(y)) => x == y,
        (EvalValue::Array(x), EvalValue::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        // Type mismatch: fall back to a deterministic textual compare
        // rather than raising (in-memory evaluator never aborts §4.2).
        _ => format!("{a:?}") == format!("{b:?}"),
    }
}

fn compare_ordered(a: &EvalValue, b: &EvalValue) -> Result<std::cmp::Ordering> {
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return Ok(x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal));
    }
    if let (Some(x), Some(y)) = (a.as_datetime(), b.as_datetime()) {
        if matches!(a, EvalValue::DateTime(_)) || matches!(b, EvalValue::DateTime(_)) {
            return Ok(x.cmp(&y));
        }
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return Ok(x.cmp(y));
    }
    Ok(std::cmp::Ordering::Equal)
}

fn eval_method(
    receiver: &EvalValue,
    name: MethodName,
    arg: &EvalValue,
    regex_timeout: Duration,
) -> Result<EvalValue> {
    match (receiver, name) {
        // "on lists: contains" (§4.1) — membership by equality.
        (EvalValue::Array(items), MethodName::Contains) => {
            Ok(EvalValue::Bool(items.iter().any(|item| values_equal(item, arg))))
        }
        (EvalValue::Str(s), MethodName::Contains) => {
            let needle = arg.as_str().ok_or_else(|| EngineError::type_mismatch("contains() expects a string"))?;
            Ok(EvalValue::Bool(s.to_lowercase().contains(&needle.to_lowercase())))
        }
        (EvalValue::Str(s), MethodName::StartsWith) => {
            let needle = arg.as_str().ok_or_else(|| EngineError::type_mismatch("startsWith() expects a string"))?;
            Ok(EvalValue::Bool(s.to_lowercase().starts_with(&needle.to_lowercase())))
        }
        (EvalValue::Str(s), MethodName::EndsWith) => {
            let needle = arg.as_str().ok_or_else(|| EngineError::type_mismatch("endsWith() expects a string"))?;
            Ok(EvalValue::Bool(s.to_lowercase().ends_with(&needle.to_lowercase())))
        }
        (EvalValue::Str(s), MethodName::Matches) => {
            let pattern = arg.as_str().ok_or_else(|| EngineError::type_mismatch("matches() expects a regex string"))?;
            let regex = Regex::new(pattern).map_err(|e| EngineError::unsupported(format!("invalid regex: {e}")))?;
            Ok(EvalValue::Bool(run_regex_with_timeout(regex, s.clone(), regex_timeout)?))
        }
        (EvalValue::Null, _) => Ok(EvalValue::Bool(false)),
        _ => Err(EngineError::type_mismatch(format!(
            "method '{}' is not supported on this receiver type",
            name.as_str()
        ))),
    }
}

/// Runs a regex match on a dedicated thread and rejects with
/// `RegexTimeout` if it does not finish within `timeout` (§5 "regex
/// `matches` must be executed with a wall-clock timeout (reject on
/// timeout)"). `matches` is case-sensitive unless the pattern itself
/// opts into case-insensitivity (e.g. `(?i)`), per §4.2.
fn run_regex_with_timeout(regex: Regex, haystack: String, timeout: Duration) -> Result<bool> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let _ = tx.send(regex.is_match(&haystack));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => Ok(result),
        Err(_) => Err(EngineError::RegexTimeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertStatus, Severity};
    use crate::cel::parse;
    use serde_json::json;

    fn alert(payload: Json) -> AlertDto {
        AlertDto {
            fingerprint: "fp1".to_string(),
            event_time: Utc::now(),
            severity: Severity::Critical,
            status: AlertStatus::Firing,
            payload,
        }
    }

    fn check(cel: &str, payload: Json) -> bool {
        let ast = parse(cel).unwrap();
        eval(&ast, &alert(payload), Duration::from_millis(250)).unwrap()
    }

    #[test]
    fn matches_seed_scenario_one() {
        assert!(check(
            r#"source == "grafana" && severity == "critical""#,
            json!({"source": "grafana"})
        ));
    }

    #[test]
    fn missing_intermediate_resolves_to_null_not_error() {
        assert!(!check(r#"labels.host == "x""#, json!({})));
    }

    #[test]
    fn null_equality_is_only_true_for_null_vs_null() {
        assert!(check(r#"missing == null"#, json!({})));
        assert!(!check(r#"missing != null"#, json!({})));
        assert!(!check(r#"missing == "x""#, json!({})));
        assert!(check(r#"missing != "x""#, json!({})));
    }

    #[test]
    fn case_insensitive_contains() {
        assert!(check(r#"labels.host.contains("WEB")"#, json!({"labels": {"host": "web-1"}})));
    }

    #[test]
    fn property_on_list_is_existential() {
        let payload = json!({"tags": [{"key": "env", "value": "prod"}, {"key": "env", "value": "dev"}]});
        assert!(check(r#"tags.value == "prod""#, payload));
    }

    #[test]
    fn in_operator_checks_membership() {
        assert!(check(r#"severity in ["critical", "high"]"#, json!({})));
    }

    #[test]
    fn list_contains_method() {
        let payload = json!({"source": ["grafana", "sentry"]});
        assert!(check(r#"source.contains("sentry")"#, payload));
    }

    #[test]
    fn relational_against_null_is_false() {
        assert!(!check(r#"missing > 1"#, json!({})));
    }
}
