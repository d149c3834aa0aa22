//! Rules Engine Correlator (§4.5): matches alerts against rules and
//! maintains incident candidates under threshold/timeframe/grouping/
//! resolution policies.

pub mod incident;
pub mod lock;
pub mod rule;
pub mod store;
pub mod templater;

pub use incident::{Incident, IncidentMember, IncidentStatus};
pub use lock::KeyedLock;
pub use rule::{CreateOn, ResolveOn, Rule, TimeUnit};
pub use store::{IncidentStore, MemoryIncidentStore, PostgresIncidentStore};
pub use templater::{SimpleTemplater, TemplateContext, Templater};

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

use crate::alert::AlertDto;
use crate::cel::Node;
use crate::error::Result;
use crate::eval::{self, resolve_property_as_string};

/// Outcome of processing one alert against one rule: whether it
/// matched at all, and if so, the incident it was attached to plus
/// whether that attach just promoted the incident to visible or
/// resolved it.
#[derive(Debug, Clone)]
pub struct MatchOutcome {
    pub incident: Incident,
    pub newly_visible: bool,
    pub newly_resolved: bool,
}

pub struct Correlator {
    store: Arc<dyn IncidentStore>,
    templater: Arc<dyn Templater>,
    locks: KeyedLock<(Uuid, String)>,
    regex_timeout: Duration,
}

impl Correlator {
    pub fn new(store: Arc<dyn IncidentStore>, templater: Arc<dyn Templater>, regex_timeout: Duration) -> Self {
        Correlator { store, templater, locks: KeyedLock::new(), regex_timeout }
    }

    /// `rule_fingerprint = hash(rule_id, [resolve(path, alert) for path
    /// in grouping_criteria])` (§4.5 "Grouping"). Empty criteria yields
    /// a fingerprint dependent only on `rule_id` (§8 "Boundaries").
    pub fn rule_fingerprint(rule: &Rule, alert: &AlertDto) -> String {
        let mut hasher = Sha256::new();
        hasher.update(rule.id.as_bytes());
        for path in &rule.grouping_criteria {
            hasher.update([0x1f]);
            hasher.update(resolve_property_as_string(alert, path).as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Runs the full match → group → attach → promote/resolve pipeline
    /// for one `(rule, alert)` pair. Returns `Ok(None)` when the
    /// predicate does not match or the alert is otherwise ignored (not
    /// an error — §4.6 "a failing rule is skipped").
    ///
    /// Rule-local failures (`EngineError::is_rule_local`) are logged at
    /// `warn!` and surfaced as `Ok(None)` rather than propagated, per
    /// §4.6/§7. Storage errors propagate to the caller.
    pub async fn process_alert(&self, rule: &Rule, alert: &AlertDto) -> Result<Option<MatchOutcome>> {
        match self.try_process_alert(rule, alert).await {
            Ok(outcome) => Ok(outcome),
            Err(err) if err.is_rule_local() => {
                warn!(rule_id = %rule.id, alert = %alert.fingerprint, error = %err, "rule skipped");
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    async fn try_process_alert(&self, rule: &Rule, alert: &AlertDto) -> Result<Option<MatchOutcome>> {
        let ast = rule.parsed()?;
        if !eval::eval(&ast, alert, self.regex_timeout)? {
            return Ok(None);
        }

        let is_resolved_alert = alert.status.is_resolved();
        let rule_fingerprint = Self::rule_fingerprint(rule, alert);
        let _guard = self.locks.lock((rule.id, rule_fingerprint.clone())).await;

        if is_resolved_alert {
            return self.handle_resolved_alert(rule, &rule_fingerprint, alert).await;
        }

        if !alert.status.is_firing_like() {
            // Neither firing-like nor resolved (e.g. suppressed):
            // doesn't create or resolve anything (§4.5 "Match").
            return Ok(None);
        }

        let mut incident = self.store.get_or_create_candidate(rule, &rule_fingerprint, alert).await?;
        if incident.prefix_counter.is_none() {
            if let Some(prefix) = &rule.incident_prefix {
                let counter = self.store.allocate_prefix_counter(rule.id, prefix).await?;
                self.store.set_prefix_counter(incident.id, counter).await?;
                incident.prefix_counter = Some(counter);
            }
        }

        incident = self.store.append_alert(incident.id, alert).await?;

        let disjuncts = self.update_disjuncts(&ast, &incident, alert)?;
        self.store.set_disjuncts(incident.id, disjuncts.clone()).await?;
        incident.satisfied_disjuncts = disjuncts;

        let newly_visible = !incident.is_visible && self.is_promotable(rule, &incident);
        if newly_visible {
            self.store.promote(incident.id).await?;
            incident.is_visible = true;
            self.render_name(rule, &incident).await;
        }

        Ok(Some(MatchOutcome { incident, newly_visible, newly_resolved: false }))
    }

    async fn handle_resolved_alert(
        &self,
        rule: &Rule,
        rule_fingerprint: &str,
        alert: &AlertDto,
    ) -> Result<Option<MatchOutcome>> {
        // Resolved alerts never create a new incident (§4.5 "Match");
        // a hit here still attaches even for a fingerprint not
        // previously seen by this incident (§9 open question (c)).
        let existing = self.store.find_candidate(rule, rule_fingerprint, alert).await?;
        let Some(incident) = existing else { return Ok(None) };
        // A resolved alert can still attach to a hidden candidate (§9
        // open question (c)); it just never promotes or resolves one.
        let was_visible = incident.is_visible;
        let mut incident = self.store.append_alert(incident.id, alert).await?;

        if !was_visible {
            return Ok(Some(MatchOutcome { incident, newly_visible: false, newly_resolved: false }));
        }

        let should_resolve = match rule.resolve_on {
            ResolveOn::Never => false,
            ResolveOn::All => incident.all_members_resolved(),
            ResolveOn::First => incident.first_joined_resolved(),
            ResolveOn::Last => incident.last_joined_resolved(),
        };

        if should_resolve && incident.status != IncidentStatus::Resolved {
            self.store.resolve(incident.id).await?;
            incident.status = IncidentStatus::Resolved;
            return Ok(Some(MatchOutcome { incident, newly_visible: false, newly_resolved: true }));
        }

        Ok(Some(MatchOutcome { incident, newly_visible: false, newly_resolved: false }))
    }

    fn is_promotable(&self, rule: &Rule, incident: &Incident) -> bool {
        if incident.alerts_count() < rule.threshold {
            return false;
        }
        match rule.create_on {
            CreateOn::Any => true,
            CreateOn::All => incident.satisfied_disjuncts.iter().all(|satisfied| *satisfied),
        }
    }

    /// Maintains the per-disjunct satisfaction bitmap for `create_on =
    /// ALL` (§4.5 "Promotion to visible"). A rule with no top-level
    /// `||` has exactly one disjunct: itself.
    fn update_disjuncts(&self, ast: &Node, incident: &Incident, alert: &AlertDto) -> Result<Vec<bool>> {
        let disjuncts = ast.top_level_or_disjuncts();
        let mut satisfied = if incident.satisfied_disjuncts.len() == disjuncts.len() {
            incident.satisfied_disjuncts.clone()
        } else {
            vec![false; disjuncts.len()]
        };
        for (idx, disjunct) in disjuncts.iter().enumerate() {
            if !satisfied[idx] && eval::eval(disjunct, alert, self.regex_timeout)? {
                satisfied[idx] = true;
            }
        }
        Ok(satisfied)
    }

    /// Renders and persists the incident's display name (§4.5 "Name
    /// rendering"). Never fails the attach: template errors fall back
    /// to the rule name (§4.6 "Template rendering errors are
    /// swallowed").
    async fn render_name(&self, rule: &Rule, incident: &Incident) {
        let name = self.compute_name(rule, incident).unwrap_or_else(|| rule.name.clone());
        let _ = self.store.set_name(incident.id, name).await;
    }

    /// The rendered body (from `incident_name_template`, or the rule
    /// name when no template is set or rendering fails, §4.6) with
    /// `incident_prefix` prepended when the rule has one — the prefix
    /// applies independently of whether a template is configured (§4.5
    /// "Name rendering").
    fn compute_name(&self, rule: &Rule, incident: &Incident) -> Option<String> {
        let body = match &rule.incident_name_template {
            Some(template) => self.render_aggregated(template, incident).unwrap_or_else(|| rule.name.clone()),
            None => rule.name.clone(),
        };

        Some(match &rule.incident_prefix {
            Some(prefix) => format!("{prefix}-{} - {body}", incident.prefix_counter.unwrap_or(1)),
            None => body,
        })
    }

    /// Re-renders `template` once per member alert and joins the
    /// distinct results with ',' in join order (§9 open question (b)).
    /// `None` when the incident has no members yet or rendering fails
    /// for any member.
    fn render_aggregated(&self, template: &str, incident: &Incident) -> Option<String> {
        if incident.members.is_empty() {
            return None;
        }
        let alerts: Vec<AlertDto> = incident.members.iter().map(|m| m.latest_alert.clone()).collect();
        let mut renderings = Vec::new();
        for member in &incident.members {
            let ctx = TemplateContext { alert: member.latest_alert.clone(), alerts: alerts.clone() };
            match self.templater.render(template, &ctx) {
                Ok(rendered) => {
                    if !renderings.contains(&rendered) {
                        renderings.push(rendered);
                    }
                }
                Err(_) => return None,
            }
        }
        Some(renderings.join(","))
    }
}
