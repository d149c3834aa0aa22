//! The opaque `Alert` shape (§3) made concrete enough to evaluate CEL
//! against and to bind as SQL parameters / template context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Firing,
    Resolved,
    Acknowledged,
    Suppressed,
}

impl AlertStatus {
    /// "Resolved alerts do NOT create new incidents" (§4.5) — this is
    /// the complement set used to gate candidate creation.
    pub fn is_firing_like(self) -> bool {
        matches!(self, AlertStatus::Firing | AlertStatus::Acknowledged)
    }

    pub fn is_resolved(self) -> bool {
        matches!(self, AlertStatus::Resolved)
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
            AlertStatus::Acknowledged => "acknowledged",
            AlertStatus::Suppressed => "suppressed",
        };
        f.write_str(s)
    }
}

/// Concrete alert shape: a fingerprint, event timestamp, severity,
/// status, and a nested JSON payload (labels, tags, source, ...), per
/// §3 "Alert (opaque to the core)".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDto {
    pub fingerprint: String,
    pub event_time: DateTime<Utc>,
    pub severity: Severity,
    pub status: AlertStatus,
    /// Free-form payload: `source`, `labels`, `tags`, `name`, and any
    /// provider-specific fields, addressed by CEL dotted path.
    pub payload: Json,
}

impl AlertDto {
    /// Builds the JSON evaluation context a CEL property path is
    /// resolved against: the payload object with the structured fields
    /// (`fingerprint`, `severity`, `status`, `timestamp`) overlaid at
    /// the top level, so `severity == "critical"` and
    /// `labels.host == "x"` both resolve against the same object.
    pub fn eval_context(&self) -> Json {
        let mut obj = match &self.payload {
            Json::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        obj.insert("fingerprint".to_string(), Json::String(self.fingerprint.clone()));
        obj.insert("severity".to_string(), Json::String(self.severity.to_string()));
        obj.insert("status".to_string(), Json::String(self.status.to_string()));
        obj.insert("timestamp".to_string(), Json::String(self.event_time.to_rfc3339()));
        Json::Object(obj)
    }
}
