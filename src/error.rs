//! Error taxonomy for the rules engine.
//!
//! Rule-local errors ([`EngineError::Parse`], [`EngineError::Evaluation`],
//! [`EngineError::UnsupportedOperator`], [`EngineError::TypeMismatch`],
//! [`EngineError::UnmappedProperty`], [`EngineError::Template`],
//! [`EngineError::RegexTimeout`]) never halt the engine and never corrupt
//! incident state: callers in `correlator` catch them per-rule, log at
//! `warn!` with the rule id and alert fingerprint, and skip that rule for
//! that alert. [`EngineError::Storage`] is the one variant that bubbles
//! up to the caller, per spec.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("CEL parse error at offset {offset}: expected one of {expected:?}")]
    Parse { offset: usize, expected: Vec<String> },

    #[error("evaluation error: {0}")]
    Evaluation(String),

    #[error("unsupported operator or method: {0}")]
    UnsupportedOperator(String),

    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    #[error("property '{0}' is not mapped in properties metadata")]
    UnmappedProperty(String),

    #[error("database error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("template rendering error: {0}")]
    Template(String),

    #[error("regex evaluation timed out after {0:?}")]
    RegexTimeout(std::time::Duration),

    #[error("configuration error: {0}")]
    Config(String),
}

impl EngineError {
    pub fn parse(offset: usize, expected: impl IntoIterator<Item = impl Into<String>>) -> Self {
        EngineError::Parse {
            offset,
            expected: expected.into_iter().map(Into::into).collect(),
        }
    }

    pub fn evaluation<S: Into<String>>(msg: S) -> Self {
        EngineError::Evaluation(msg.into())
    }

    pub fn unsupported<S: Into<String>>(msg: S) -> Self {
        EngineError::UnsupportedOperator(msg.into())
    }

    pub fn type_mismatch<S: Into<String>>(msg: S) -> Self {
        EngineError::TypeMismatch(msg.into())
    }

    pub fn unmapped_property<S: Into<String>>(path: S) -> Self {
        EngineError::UnmappedProperty(path.into())
    }

    pub fn template<S: Into<String>>(msg: S) -> Self {
        EngineError::Template(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        EngineError::Config(msg.into())
    }

    /// Whether this error is rule-local (skip the rule, log, continue)
    /// as opposed to fatal to the whole engine (only `Storage` today).
    pub fn is_rule_local(&self) -> bool {
        !matches!(self, EngineError::Storage(_))
    }
}
