//! Incident model and lifecycle state (§3 "Incident", §4.5).

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::alert::{AlertDto, Severity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Firing,
    Resolved,
    Acknowledged,
}

/// One alert's contribution to an incident: its join time (for
/// `resolve_on = FIRST/LAST` and name-rendering join order) and the
/// most recently received copy of the alert (for `resolve_on = ALL`'s
/// "most-recently-received status" rule and for template context).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct IncidentMember {
    pub fingerprint: String,
    pub joined_at: DateTime<Utc>,
    pub latest_alert: AlertDto,
}

/// A correlated group of alerts produced by a single rule against a
/// single grouping fingerprint (§3).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Incident {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub rule_fingerprint: String,
    pub is_candidate: bool,
    pub is_visible: bool,
    pub start_time: DateTime<Utc>,
    pub last_seen_time: DateTime<Utc>,
    pub status: IncidentStatus,
    pub severity: Severity,
    pub assignee: Option<String>,
    pub user_generated_name: Option<String>,
    pub same_incident_in_the_past_id: Option<Uuid>,
    pub creation_time: DateTime<Utc>,
    /// Per-prefix counter allocated once at creation when
    /// `incident_prefix` is set (§4.5 "Name rendering"); `None` when no
    /// prefix is configured for the rule.
    pub prefix_counter: Option<u64>,
    /// Member alerts in join order, deduplicated by fingerprint.
    pub members: Vec<IncidentMember>,
    /// Bitmap of which top-level `||` disjuncts of the rule's CEL
    /// expression have been satisfied by at least one member alert
    /// (§4.5 "Promotion to visible", `create_on = ALL`).
    pub satisfied_disjuncts: Vec<bool>,
}

impl Incident {
    pub fn alerts_count(&self) -> u32 {
        self.members.len() as u32
    }

    pub fn contains_fingerprint(&self, fingerprint: &str) -> bool {
        self.members.iter().any(|m| m.fingerprint == fingerprint)
    }

    /// Adds or updates a member and recomputes `severity`/`last_seen_time`.
    /// Idempotent on fingerprint: re-attaching an already-present
    /// fingerprint updates its `latest_alert` without growing
    /// `alerts_count` (§8 "Idempotence").
    pub fn record_alert(&mut self, alert: &AlertDto) {
        self.last_seen_time = self.last_seen_time.max(alert.event_time);
        match self.members.iter_mut().find(|m| m.fingerprint == alert.fingerprint) {
            Some(member) => member.latest_alert = alert.clone(),
            None => self.members.push(IncidentMember {
                fingerprint: alert.fingerprint.clone(),
                joined_at: alert.event_time,
                latest_alert: alert.clone(),
            }),
        }
        self.severity = self.members.iter().map(|m| m.latest_alert.severity).max().unwrap_or(self.severity);
    }

    /// `resolve_on = ALL`: every member's most-recently-received status
    /// is resolved.
    pub fn all_members_resolved(&self) -> bool {
        !self.members.is_empty() && self.members.iter().all(|m| m.latest_alert.status.is_resolved())
    }

    /// `resolve_on = FIRST`: the earliest-joined member is resolved.
    pub fn first_joined_resolved(&self) -> bool {
        self.members.iter().min_by_key(|m| m.joined_at).is_some_and(|m| m.latest_alert.status.is_resolved())
    }

    /// `resolve_on = LAST`: the latest-joined member is resolved.
    pub fn last_joined_resolved(&self) -> bool {
        self.members.iter().max_by_key(|m| m.joined_at).is_some_and(|m| m.latest_alert.status.is_resolved())
    }
}
