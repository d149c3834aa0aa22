//! Alert-correlation rules engine.
//!
//! A CEL (Common Expression Language) evaluator with two back-ends — an
//! in-memory evaluator ([`eval`]) that tests a single alert against a
//! parsed predicate, and a CEL-to-SQL translator ([`sql`]) that compiles
//! the same predicate against a database schema — plus a correlation
//! layer ([`correlator`]) that groups matching alerts into incidents
//! under per-rule thresholding, grouping, and resolution policies.
//!
//! # Architecture
//!
//! ```text
//! rule text ─▶ [cel::parse] ─▶ AST ─┬─▶ [eval::eval]        (single alert)
//!                                   └─▶ [sql::Translator]   (bulk query)
//!
//! matched alerts ─▶ [correlator::Correlator] ─▶ Incidents
//! ```
//!
//! | Module | Responsibility |
//! |---|---|
//! | [`cel`] | CEL source → token stream → AST |
//! | [`eval`] | Evaluates an AST against a single alert |
//! | [`sql`] | Translates an AST into dialect-specific SQL |
//! | [`properties`] | Maps CEL property paths to schema field mappings |
//! | [`correlator`] | Matches alerts against rules; maintains incidents |
//! | [`alert`] | The concrete alert shape evaluated against |
//! | [`config`] | Process configuration |
//! | [`error`] | Error taxonomy |
//!
//! # Quick start
//!
//! ```
//! use std::time::Duration;
//! use siem_rules_engine::alert::{AlertDto, AlertStatus, Severity};
//! use siem_rules_engine::cel;
//! use siem_rules_engine::eval;
//!
//! let ast = cel::parse(r#"source == "grafana" && severity == "critical""#).unwrap();
//! let alert = AlertDto {
//!     fingerprint: "fp-1".to_string(),
//!     event_time: chrono::Utc::now(),
//!     severity: Severity::Critical,
//!     status: AlertStatus::Firing,
//!     payload: serde_json::json!({"source": "grafana"}),
//! };
//! assert!(eval::eval(&ast, &alert, Duration::from_millis(250)).unwrap());
//! ```

pub mod alert;
pub mod cel;
pub mod config;
pub mod correlator;
pub mod error;
pub mod eval;
pub mod properties;
pub mod sql;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");

/// Convenient re-exports of the types most callers need, following the
/// module's own submodule layout rather than flattening everything.
pub mod prelude {
    pub use crate::alert::{AlertDto, AlertStatus, Severity};
    pub use crate::cel::{self, Node};
    pub use crate::config::Config;
    pub use crate::correlator::{Correlator, Incident, MatchOutcome, Rule};
    pub use crate::error::{EngineError, Result};
    pub use crate::eval::eval;
    pub use crate::properties::{PropertiesMetadata, SharedPropertiesMetadata};
    pub use crate::sql::{PostgresDialect, SqlDialect, SqlParam, Translator};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_and_name_are_populated() {
        assert!(!VERSION.is_empty());
        assert!(!NAME.is_empty());
    }
}
