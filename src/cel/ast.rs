//! AST node variants and the data-type lattice (§3, §9 "tagged sum
//! types with exhaustive dispatch rather than OO hierarchies").

use chrono::{DateTime, Utc};
use std::fmt;

/// Closed set of data types the CEL subset supports (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Null,
    DateTime,
    Uuid,
    Array,
    Object,
    Unknown,
}

impl DataType {
    /// `INTEGER ⊆ FLOAT` per the lattice; everything else coerces only
    /// to itself.
    pub fn numeric_join(a: DataType, b: DataType) -> Option<DataType> {
        use DataType::*;
        match (a, b) {
            (Integer, Integer) => Some(Integer),
            (Float, Float) | (Integer, Float) | (Float, Integer) => Some(Float),
            _ => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::String => "STRING",
            DataType::Integer => "INTEGER",
            DataType::Float => "FLOAT",
            DataType::Boolean => "BOOLEAN",
            DataType::Null => "NULL",
            DataType::DateTime => "DATETIME",
            DataType::Uuid => "UUID",
            DataType::Array => "ARRAY",
            DataType::Object => "OBJECT",
            DataType::Unknown => "UNKNOWN",
        };
        f.write_str(s)
    }
}

/// A literal value carried by a [`Node::Constant`], tagged with its
/// declared [`DataType`] (the AST invariant: "every `Constant` has a
/// declared type").
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Null,
    DateTime(DateTime<Utc>),
    /// List literal; only ever appears as the RHS of `in` or as method
    /// arguments are not lists (method args are restricted to scalar
    /// constants per the grammar), so this variant is used solely for
    /// `Comparison::In` right-hand sides and `list` primaries.
    Array(Vec<Value>),
}

impl Value {
    pub fn data_type(&self) -> DataType {
        match self {
            Value::String(_) => DataType::String,
            Value::Integer(_) => DataType::Integer,
            Value::Float(_) => DataType::Float,
            Value::Boolean(_) => DataType::Boolean,
            Value::Null => DataType::Null,
            Value::DateTime(_) => DataType::DateTime,
            Value::Array(_) => DataType::Array,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

/// A dotted property path, e.g. `labels.host` or `@timestamp`. Never
/// empty (AST invariant).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PropertyPath(pub Vec<String>);

impl PropertyPath {
    pub fn new(segments: Vec<String>) -> Self {
        debug_assert!(!segments.is_empty(), "PropertyPath must be non-empty");
        PropertyPath(segments)
    }

    pub fn as_dotted(&self) -> String {
        self.0.join(".")
    }
}

impl fmt::Display for PropertyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_dotted())
    }
}

/// Supported method names (§4.1). `in` is handled exclusively via
/// `ComparisonOp::In` per the grammar's `cmpExpr` production, not as a
/// method call, so it has no variant here. Unsupported names surface
/// as `UnsupportedOperator` at parse time rather than as an AST variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodName {
    Contains,
    StartsWith,
    EndsWith,
    Matches,
}

impl MethodName {
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "contains" => Some(MethodName::Contains),
            "startsWith" => Some(MethodName::StartsWith),
            "endsWith" => Some(MethodName::EndsWith),
            "matches" => Some(MethodName::Matches),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MethodName::Contains => "contains",
            MethodName::StartsWith => "startsWith",
            MethodName::EndsWith => "endsWith",
            MethodName::Matches => "matches",
        }
    }
}

/// The CEL AST (§3). A finite tree, no cycles.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Constant(Value),
    PropertyAccess(PropertyPath),
    /// `receiver` is restricted to `PropertyAccess` or another
    /// `MethodCall` (AST invariant); `args` contains only constants.
    MethodCall {
        receiver: Box<Node>,
        name: MethodName,
        args: Vec<Value>,
    },
    Comparison {
        lhs: Box<Node>,
        op: ComparisonOp,
        rhs: Box<Node>,
    },
    Logical {
        lhs: Box<Node>,
        op: LogicalOp,
        rhs: Box<Node>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Node>,
    },
    ParenGroup(Box<Node>),
}

impl Node {
    /// Pretty-prints the AST back into CEL-ish source, used by the
    /// parser round-trip test property (§8).
    pub fn pretty_print(&self) -> String {
        match self {
            Node::Constant(v) => pretty_value(v),
            Node::PropertyAccess(p) => p.as_dotted(),
            Node::MethodCall { receiver, name, args } => {
                let args_str = args.iter().map(pretty_value).collect::<Vec<_>>().join(", ");
                format!("{}.{}({})", receiver.pretty_print(), name.as_str(), args_str)
            }
            Node::Comparison { lhs, op, rhs } => {
                let op_str = match op {
                    ComparisonOp::Eq => "==",
                    ComparisonOp::Ne => "!=",
                    ComparisonOp::Lt => "<",
                    ComparisonOp::Le => "<=",
                    ComparisonOp::Gt => ">",
                    ComparisonOp::Ge => ">=",
                    ComparisonOp::In => "in",
                };
                format!("{} {} {}", lhs.pretty_print(), op_str, rhs.pretty_print())
            }
            Node::Logical { lhs, op, rhs } => {
                let op_str = match op {
                    LogicalOp::And => "&&",
                    LogicalOp::Or => "||",
                };
                format!("{} {} {}", lhs.pretty_print(), op_str, rhs.pretty_print())
            }
            Node::Unary { op, operand } => {
                let op_str = match op {
                    UnaryOp::Not => "!",
                    UnaryOp::Neg => "-",
                };
                format!("{}{}", op_str, operand.pretty_print())
            }
            Node::ParenGroup(inner) => format!("({})", inner.pretty_print()),
        }
    }

    /// Flattens a top-level `||`-chain into its disjuncts, used by the
    /// correlator's `CreateIncidentOn::All` bitmap tracking (§4.5).
    pub fn top_level_or_disjuncts(&self) -> Vec<&Node> {
        match self {
            Node::Logical { lhs, op: LogicalOp::Or, rhs } => {
                let mut left = lhs.top_level_or_disjuncts();
                left.extend(rhs.top_level_or_disjuncts());
                left
            }
            Node::ParenGroup(inner) => inner.top_level_or_disjuncts(),
            other => vec![other],
        }
    }
}

fn pretty_value(v: &Value) -> String {
    match v {
        Value::String(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        Value::Integer(i) => i.to_string(),
        Value::Float(fl) => fl.to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::DateTime(dt) => format!("\"{}\"", dt.to_rfc3339()),
        Value::Array(items) => {
            let inner = items.iter().map(pretty_value).collect::<Vec<_>>().join(", ");
            format!("[{inner}]")
        }
    }
}

/// A visitor contract expressed as a pre/post-walk pair over variants
/// (§9), rather than an OO double-dispatch hierarchy.
pub trait Visitor<T> {
    fn visit(&mut self, node: &Node) -> T;
}
