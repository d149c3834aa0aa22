//! Persistence interface (§6 "Persistence interface") plus two
//! implementations: a production `PostgresIncidentStore` backed by
//! `sqlx::PgPool` (grounded in the teacher's `DatabaseManager`, which
//! wraps a `Pool<Postgres>` behind a small set of typed async methods)
//! and an in-memory `MemoryIncidentStore` for tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::alert::{AlertDto, Severity};
use crate::correlator::incident::{Incident, IncidentMember, IncidentStatus};
use crate::correlator::rule::Rule;
use crate::error::Result;

#[async_trait]
pub trait IncidentStore: Send + Sync {
    /// Read-only counterpart of [`IncidentStore::get_or_create_candidate`]:
    /// finds the newest incident for `(rule_id, rule_fingerprint)` whose
    /// `last_seen_time` is within `rule.timeframe_secs` of
    /// `alert.event_time`, without creating one. Used for resolved
    /// alerts, which must never create a new incident (§4.5 "Match").
    async fn find_candidate(&self, rule: &Rule, rule_fingerprint: &str, alert: &AlertDto) -> Result<Option<Incident>>;

    /// Finds the newest incident for `(rule_id, rule_fingerprint)` whose
    /// `last_seen_time` is within `rule.timeframe_secs` of
    /// `alert.event_time`; creates a fresh candidate when none exists
    /// (§4.5 "Candidate selection"). `timeframe_secs == 0` means no
    /// window — always create (§8 "Boundaries").
    async fn get_or_create_candidate(
        &self,
        rule: &Rule,
        rule_fingerprint: &str,
        alert: &AlertDto,
    ) -> Result<Incident>;

    /// Persists the result of attaching `alert` to `incident_id`,
    /// returning the updated incident (§4.5 "Attach alert").
    async fn append_alert(&self, incident_id: Uuid, alert: &AlertDto) -> Result<Incident>;

    async fn promote(&self, incident_id: Uuid) -> Result<()>;

    async fn resolve(&self, incident_id: Uuid) -> Result<()>;

    async fn find_prior_resolved(&self, rule_id: Uuid, rule_fingerprint: &str) -> Result<Option<Uuid>>;

    async fn get(&self, incident_id: Uuid) -> Result<Option<Incident>>;

    async fn set_disjuncts(&self, incident_id: Uuid, disjuncts: Vec<bool>) -> Result<()>;

    async fn set_name(&self, incident_id: Uuid, name: String) -> Result<()>;

    /// Allocates the next monotonic prefix counter for `(rule_id,
    /// prefix)` (§4.5 "Name rendering"). Called exactly once, at
    /// incident creation, when the rule has `incident_prefix` set.
    async fn allocate_prefix_counter(&self, rule_id: Uuid, prefix: &str) -> Result<u64>;

    /// Persists the counter allocated by [`IncidentStore::allocate_prefix_counter`]
    /// onto the incident itself, so later reads of this incident (e.g.
    /// the `append_alert` that follows in the same `process_alert` call,
    /// and every subsequent alert matched to the same incident) see it
    /// rather than re-allocating (§4.5 "reusing the same `(rule_id,
    /// rule_fingerprint)` reuses the prior N").
    async fn set_prefix_counter(&self, incident_id: Uuid, counter: u64) -> Result<()>;
}

/// In-memory [`IncidentStore`], used by tests and as a reference
/// implementation of the persistence contract.
#[derive(Default)]
pub struct MemoryIncidentStore {
    incidents: RwLock<HashMap<Uuid, Incident>>,
    prefix_counters: RwLock<HashMap<(Uuid, String), u64>>,
}

impl MemoryIncidentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl IncidentStore for MemoryIncidentStore {
    async fn find_candidate(&self, rule: &Rule, rule_fingerprint: &str, alert: &AlertDto) -> Result<Option<Incident>> {
        let incidents = self.incidents.read().await;
        let within_window = |incident: &Incident| {
            if rule.timeframe_secs == 0 {
                return false;
            }
            let window = chrono::Duration::seconds(rule.timeframe_secs as i64);
            (alert.event_time - incident.last_seen_time).abs() <= window
        };
        Ok(incidents
            .values()
            .filter(|i| i.rule_id == rule.id && i.rule_fingerprint == rule_fingerprint)
            // A resolved incident is never reused as a candidate: a
            // later firing alert for the same fingerprint, even inside
            // the timeframe window, must start a new incident linked
            // via `same_incident_in_the_past_id` (original implementation's
            // `test_same_incident_in_the_past_id_set`).
            .filter(|i| i.status != IncidentStatus::Resolved)
            .filter(|i| within_window(i))
            .max_by_key(|i| i.last_seen_time)
            .cloned())
    }

    async fn get_or_create_candidate(
        &self,
        rule: &Rule,
        rule_fingerprint: &str,
        alert: &AlertDto,
    ) -> Result<Incident> {
        if let Some(incident) = self.find_candidate(rule, rule_fingerprint, alert).await? {
            return Ok(incident);
        }

        let mut incidents = self.incidents.write().await;
        let same_incident_in_the_past_id = incidents
            .values()
            .filter(|i| {
                i.rule_id == rule.id
                    && i.rule_fingerprint == rule_fingerprint
                    && i.status == IncidentStatus::Resolved
            })
            .max_by_key(|i| i.last_seen_time)
            .map(|i| i.id);

        let now = alert.event_time;
        let incident = Incident {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_fingerprint: rule_fingerprint.to_string(),
            is_candidate: rule.require_approve,
            is_visible: false,
            start_time: now,
            last_seen_time: now,
            status: IncidentStatus::Firing,
            severity: Severity::Low,
            assignee: rule.assignee.clone(),
            user_generated_name: None,
            same_incident_in_the_past_id,
            creation_time: now,
            prefix_counter: None,
            members: Vec::new(),
            satisfied_disjuncts: Vec::new(),
        };
        incidents.insert(incident.id, incident.clone());
        Ok(incident)
    }

    async fn append_alert(&self, incident_id: Uuid, alert: &AlertDto) -> Result<Incident> {
        let mut incidents = self.incidents.write().await;
        let incident = incidents
            .get_mut(&incident_id)
            .ok_or_else(|| crate::error::EngineError::evaluation(format!("unknown incident {incident_id}")))?;
        incident.record_alert(alert);
        Ok(incident.clone())
    }

    async fn promote(&self, incident_id: Uuid) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if let Some(incident) = incidents.get_mut(&incident_id) {
            incident.is_visible = true;
        }
        Ok(())
    }

    async fn resolve(&self, incident_id: Uuid) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if let Some(incident) = incidents.get_mut(&incident_id) {
            incident.status = IncidentStatus::Resolved;
        }
        Ok(())
    }

    async fn find_prior_resolved(&self, rule_id: Uuid, rule_fingerprint: &str) -> Result<Option<Uuid>> {
        let incidents = self.incidents.read().await;
        Ok(incidents
            .values()
            .filter(|i| i.rule_id == rule_id && i.rule_fingerprint == rule_fingerprint && i.status == IncidentStatus::Resolved)
            .max_by_key(|i| i.last_seen_time)
            .map(|i| i.id))
    }

    async fn get(&self, incident_id: Uuid) -> Result<Option<Incident>> {
        Ok(self.incidents.read().await.get(&incident_id).cloned())
    }

    async fn set_disjuncts(&self, incident_id: Uuid, disjuncts: Vec<bool>) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if let Some(incident) = incidents.get_mut(&incident_id) {
            incident.satisfied_disjuncts = disjuncts;
        }
        Ok(())
    }

    async fn set_name(&self, incident_id: Uuid, name: String) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if let Some(incident) = incidents.get_mut(&incident_id) {
            incident.user_generated_name = Some(name);
        }
        Ok(())
    }

    async fn allocate_prefix_counter(&self, rule_id: Uuid, prefix: &str) -> Result<u64> {
        let mut counters = self.prefix_counters.write().await;
        let counter = counters.entry((rule_id, prefix.to_string())).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn set_prefix_counter(&self, incident_id: Uuid, counter: u64) -> Result<()> {
        let mut incidents = self.incidents.write().await;
        if let Some(incident) = incidents.get_mut(&incident_id) {
            incident.prefix_counter = Some(counter);
        }
        Ok(())
    }
}

/// Production [`IncidentStore`] backed by PostgreSQL. Table layout
/// mirrors the teacher's `DatabaseManager::insert_event` style: a flat
/// `incidents` table plus an `incident_members` join table, positional
/// `$N` parameters throughout.
pub struct PostgresIncidentStore {
    pool: Arc<PgPool>,
}

impl PostgresIncidentStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        PostgresIncidentStore { pool }
    }

    async fn load_members(&self, incident_id: Uuid) -> Result<Vec<IncidentMember>> {
        let rows = sqlx::query_as::<_, (String, DateTime<Utc>, serde_json::Value)>(
            "SELECT fingerprint, joined_at, latest_alert FROM incident_members \
             WHERE incident_id = $1 ORDER BY joined_at ASC",
        )
        .bind(incident_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.into_iter()
            .map(|(fingerprint, joined_at, payload)| {
                let latest_alert: AlertDto = serde_json::from_value(payload)
                    .map_err(|e| crate::error::EngineError::evaluation(format!("corrupt incident_members row: {e}")))?;
                Ok(IncidentMember { fingerprint, joined_at, latest_alert })
            })
            .collect()
    }
}

#[async_trait]
impl IncidentStore for PostgresIncidentStore {
    async fn find_candidate(&self, rule: &Rule, rule_fingerprint: &str, alert: &AlertDto) -> Result<Option<Incident>> {
        if rule.timeframe_secs == 0 {
            return Ok(None);
        }
        let existing = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM incidents WHERE rule_id = $1 AND rule_fingerprint = $2 \
             AND status <> 'resolved' \
             AND last_seen_time >= $3 - make_interval(secs => $4) \
             ORDER BY last_seen_time DESC LIMIT 1",
        )
        .bind(rule.id)
        .bind(rule_fingerprint)
        .bind(alert.event_time)
        .bind(rule.timeframe_secs as f64)
        .fetch_optional(self.pool.as_ref())
        .await?;

        match existing {
            Some((id,)) => self.get(id).await,
            None => Ok(None),
        }
    }

    async fn get_or_create_candidate(
        &self,
        rule: &Rule,
        rule_fingerprint: &str,
        alert: &AlertDto,
    ) -> Result<Incident> {
        if let Some(incident) = self.find_candidate(rule, rule_fingerprint, alert).await? {
            return Ok(incident);
        }

        let same_incident_in_the_past_id: Option<Uuid> = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM incidents WHERE rule_id = $1 AND rule_fingerprint = $2 AND status = 'resolved' \
             ORDER BY last_seen_time DESC LIMIT 1",
        )
        .bind(rule.id)
        .bind(rule_fingerprint)
        .fetch_optional(self.pool.as_ref())
        .await?
        .map(|(id,)| id);

        let incident = Incident {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            rule_fingerprint: rule_fingerprint.to_string(),
            is_candidate: rule.require_approve,
            is_visible: false,
            start_time: alert.event_time,
            last_seen_time: alert.event_time,
            status: IncidentStatus::Firing,
            severity: Severity::Low,
            assignee: rule.assignee.clone(),
            user_generated_name: None,
            same_incident_in_the_past_id,
            creation_time: alert.event_time,
            prefix_counter: None,
            members: Vec::new(),
            satisfied_disjuncts: Vec::new(),
        };

        sqlx::query(
            "INSERT INTO incidents \
             (id, rule_id, rule_fingerprint, is_candidate, is_visible, start_time, last_seen_time, \
              status, severity, assignee, same_incident_in_the_past_id, creation_time) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
        )
        .bind(incident.id)
        .bind(incident.rule_id)
        .bind(&incident.rule_fingerprint)
        .bind(incident.is_candidate)
        .bind(incident.is_visible)
        .bind(incident.start_time)
        .bind(incident.last_seen_time)
        .bind("firing")
        .bind(incident.severity.to_string())
        .bind(&incident.assignee)
        .bind(incident.same_incident_in_the_past_id)
        .bind(incident.creation_time)
        .execute(self.pool.as_ref())
        .await?;

        Ok(incident)
    }

    async fn append_alert(&self, incident_id: Uuid, alert: &AlertDto) -> Result<Incident> {
        let mut incident = self
            .get(incident_id)
            .await?
            .ok_or_else(|| crate::error::EngineError::evaluation(format!("unknown incident {incident_id}")))?;
        incident.record_alert(alert);

        let payload = serde_json::to_value(alert)
            .map_err(|e| crate::error::EngineError::evaluation(format!("alert is not serializable: {e}")))?;

        sqlx::query(
            "INSERT INTO incident_members (incident_id, fingerprint, joined_at, latest_alert) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (incident_id, fingerprint) DO UPDATE SET latest_alert = EXCLUDED.latest_alert",
        )
        .bind(incident_id)
        .bind(&alert.fingerprint)
        .bind(alert.event_time)
        .bind(&payload)
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query("UPDATE incidents SET last_seen_time = $2, severity = $3 WHERE id = $1")
            .bind(incident_id)
            .bind(incident.last_seen_time)
            .bind(incident.severity.to_string())
            .execute(self.pool.as_ref())
            .await?;

        Ok(incident)
    }

    async fn promote(&self, incident_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE incidents SET is_visible = true WHERE id = $1")
            .bind(incident_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn resolve(&self, incident_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE incidents SET status = 'resolved' WHERE id = $1")
            .bind(incident_id)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn find_prior_resolved(&self, rule_id: Uuid, rule_fingerprint: &str) -> Result<Option<Uuid>> {
        let row = sqlx::query_as::<_, (Uuid,)>(
            "SELECT id FROM incidents WHERE rule_id = $1 AND rule_fingerprint = $2 AND status = 'resolved' \
             ORDER BY last_seen_time DESC LIMIT 1",
        )
        .bind(rule_id)
        .bind(rule_fingerprint)
        .fetch_optional(self.pool.as_ref())
        .await?;
        Ok(row.map(|(id,)| id))
    }

    async fn get(&self, incident_id: Uuid) -> Result<Option<Incident>> {
        let row = sqlx::query_as::<_, IncidentRow>(
            "SELECT id, rule_id, rule_fingerprint, is_candidate, is_visible, start_time, last_seen_time, \
                    status, severity, assignee, user_generated_name, same_incident_in_the_past_id, \
                    creation_time, prefix_counter, satisfied_disjuncts \
             FROM incidents WHERE id = $1",
        )
        .bind(incident_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        let Some(row) = row else { return Ok(None) };
        let members = self.load_members(incident_id).await?;
        Ok(Some(row.into_incident(members)))
    }

    async fn set_disjuncts(&self, incident_id: Uuid, disjuncts: Vec<bool>) -> Result<()> {
        let encoded = serde_json::to_value(&disjuncts)
            .map_err(|e| crate::error::EngineError::evaluation(format!("disjunct bitmap is not serializable: {e}")))?;
        sqlx::query("UPDATE incidents SET satisfied_disjuncts = $2 WHERE id = $1")
            .bind(incident_id)
            .bind(encoded)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn set_name(&self, incident_id: Uuid, name: String) -> Result<()> {
        sqlx::query("UPDATE incidents SET user_generated_name = $2 WHERE id = $1")
            .bind(incident_id)
            .bind(name)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }

    async fn allocate_prefix_counter(&self, rule_id: Uuid, prefix: &str) -> Result<u64> {
        let row: (i64,) = sqlx::query_as(
            "INSERT INTO incident_prefix_counters (rule_id, prefix, counter) VALUES ($1, $2, 1) \
             ON CONFLICT (rule_id, prefix) DO UPDATE SET counter = incident_prefix_counters.counter + 1 \
             RETURNING counter",
        )
        .bind(rule_id)
        .bind(prefix)
        .fetch_one(self.pool.as_ref())
        .await?;
        Ok(row.0 as u64)
    }

    async fn set_prefix_counter(&self, incident_id: Uuid, counter: u64) -> Result<()> {
        sqlx::query("UPDATE incidents SET prefix_counter = $2 WHERE id = $1")
            .bind(incident_id)
            .bind(counter as i64)
            .execute(self.pool.as_ref())
            .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct IncidentRow {
    id: Uuid,
    rule_id: Uuid,
    rule_fingerprint: String,
    is_candidate: bool,
    is_visible: bool,
    start_time: DateTime<Utc>,
    last_seen_time: DateTime<Utc>,
    status: String,
    severity: String,
    assignee: Option<String>,
    user_generated_name: Option<String>,
    same_incident_in_the_past_id: Option<Uuid>,
    creation_time: DateTime<Utc>,
    prefix_counter: Option<i64>,
    satisfied_disjuncts: Option<serde_json::Value>,
}

impl IncidentRow {
    fn into_incident(self, members: Vec<IncidentMember>) -> Incident {
        let satisfied_disjuncts = self
            .satisfied_disjuncts
            .and_then(|v| serde_json::from_value::<Vec<bool>>(v).ok())
            .unwrap_or_default();
        let status = match self.status.as_str() {
            "resolved" => IncidentStatus::Resolved,
            "acknowledged" => IncidentStatus::Acknowledged,
            _ => IncidentStatus::Firing,
        };
        let severity = match self.severity.as_str() {
            "critical" => Severity::Critical,
            "high" => Severity::High,
            "medium" => Severity::Medium,
            _ => Severity::Low,
        };
        Incident {
            id: self.id,
            rule_id: self.rule_id,
            rule_fingerprint: self.rule_fingerprint,
            is_candidate: self.is_candidate,
            is_visible: self.is_visible,
            start_time: self.start_time,
            last_seen_time: self.last_seen_time,
            status,
            severity,
            assignee: self.assignee,
            user_generated_name: self.user_generated_name,
            same_incident_in_the_past_id: self.same_incident_in_the_past_id,
            creation_time: self.creation_time,
            prefix_counter: self.prefix_counter.map(|c| c as u64),
            members,
            satisfied_disjuncts,
        }
    }
}
