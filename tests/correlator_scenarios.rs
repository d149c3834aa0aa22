//! Integration tests for the rules engine correlator, covering the
//! concrete seed scenarios and the invariants/boundaries they exercise.
//! Grounded in `tests/test_rules_engine.py` from the original
//! implementation for exact edge-case behavior where the CEL-distilled
//! spec is silent (e.g. what "still firing" means mid-resolution).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use siem_rules_engine::alert::{AlertDto, AlertStatus, Severity};
use siem_rules_engine::correlator::{
    CreateOn, IncidentStatus, IncidentStore, MemoryIncidentStore, ResolveOn, Rule, SimpleTemplater, TimeUnit,
};
use siem_rules_engine::correlator::Correlator;

fn rule(cel: &str) -> Rule {
    Rule::from_crud(
        Uuid::new_v4(),
        "test-rule".to_string(),
        cel.to_string(),
        600,
        TimeUnit::Seconds,
        CreateOn::Any,
        1,
        ResolveOn::Never,
        false,
        Vec::new(),
        None,
        None,
        None,
        Some("test@example.com".to_string()),
    )
}

fn alert(fingerprint: &str, severity: Severity, status: AlertStatus, payload: serde_json::Value) -> AlertDto {
    AlertDto {
        fingerprint: fingerprint.to_string(),
        event_time: Utc::now(),
        severity,
        status,
        payload,
    }
}

fn correlator() -> (Correlator, Arc<MemoryIncidentStore>) {
    let store = Arc::new(MemoryIncidentStore::new());
    let templater = Arc::new(SimpleTemplater);
    (Correlator::new(store.clone(), templater, Duration::from_millis(250)), store)
}

/// Seed scenario 1: a simple rule creates a visible incident on first
/// match, and re-delivering the same fingerprint does not grow
/// `alerts_count` (§8 "Idempotence").
#[tokio::test]
async fn seed_scenario_one_simple_match_and_idempotence() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"source == "grafana" && severity == "critical""#);
    r.threshold = 1;

    let a = alert("fp-1", Severity::Critical, AlertStatus::Firing, json!({"source": "grafana"}));
    let outcome = engine.process_alert(&r, &a).await.unwrap().expect("rule matches");
    assert!(outcome.newly_visible);
    assert_eq!(outcome.incident.alerts_count(), 1);

    // Re-deliver the same fingerprint: count must not grow.
    let outcome2 = engine.process_alert(&r, &a).await.unwrap().expect("still matches");
    assert_eq!(outcome2.incident.alerts_count(), 1);
    assert_eq!(outcome2.incident.id, outcome.incident.id);
}

/// Non-matching alerts are ignored entirely, not errors.
#[tokio::test]
async fn non_matching_alert_is_ignored() {
    let (engine, _store) = correlator();
    let r = rule(r#"source == "grafana" && severity == "critical""#);
    let a = alert("fp-1", Severity::Low, AlertStatus::Firing, json!({"source": "sentry"}));
    assert!(engine.process_alert(&r, &a).await.unwrap().is_none());
}

/// Seed scenario 2: `create_on = ALL` with a two-disjunct CEL
/// expression requires a distinct fingerprint to satisfy each disjunct
/// at least once, in addition to the numeric threshold.
#[tokio::test]
async fn seed_scenario_two_create_on_all_requires_every_disjunct() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"(severity == "critical") || (severity == "high")"#);
    r.create_on = CreateOn::All;
    r.threshold = 4;

    let criticals = [
        alert("fp-c1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"})),
        alert("fp-c2", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"})),
    ];
    let mut last = None;
    for a in &criticals {
        last = engine.process_alert(&r, a).await.unwrap();
    }
    // Only one disjunct satisfied and threshold unmet: still hidden.
    assert!(!last.unwrap().incident.is_visible);

    let highs = [
        alert("fp-h1", Severity::High, AlertStatus::Firing, json!({"severity": "high"})),
        alert("fp-h2", Severity::High, AlertStatus::Firing, json!({"severity": "high"})),
    ];
    let mut outcome = None;
    for a in &highs {
        outcome = engine.process_alert(&r, a).await.unwrap();
    }
    let outcome = outcome.unwrap();
    assert_eq!(outcome.incident.alerts_count(), 4);
    assert!(outcome.incident.is_visible);
}

/// Fewer than `threshold` distinct fingerprints keeps the incident
/// hidden even once every disjunct is satisfied.
#[tokio::test]
async fn create_on_all_stays_hidden_below_threshold() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"(severity == "critical") || (severity == "high")"#);
    r.create_on = CreateOn::All;
    r.threshold = 4;

    let a1 = alert("fp-c1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let a2 = alert("fp-h1", Severity::High, AlertStatus::Firing, json!({"severity": "high"}));
    engine.process_alert(&r, &a1).await.unwrap();
    let outcome = engine.process_alert(&r, &a2).await.unwrap().unwrap();
    assert!(!outcome.incident.is_visible);
    assert_eq!(outcome.incident.alerts_count(), 2);
}

async fn build_visible_two_member_incident(
    engine: &Correlator,
    r: &Rule,
) -> (AlertDto, AlertDto) {
    let fp1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let fp2 = alert("fp2", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    engine.process_alert(r, &fp1).await.unwrap();
    let outcome = engine.process_alert(r, &fp2).await.unwrap().unwrap();
    assert!(outcome.incident.is_visible);
    (fp1, fp2)
}

/// Seed scenario 3: `resolve_on = ALL` resolves only once every member
/// fingerprint's most-recently-received status is resolved.
#[tokio::test]
async fn seed_scenario_three_resolve_on_all() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.threshold = 2;
    r.resolve_on = ResolveOn::All;
    let (fp1, fp2) = build_visible_two_member_incident(&engine, &r).await;

    let fp1_resolved = alert(&fp1.fingerprint, fp1.severity, AlertStatus::Resolved, fp1.payload.clone());
    let outcome = engine.process_alert(&r, &fp1_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.status, IncidentStatus::Firing);
    assert!(!outcome.newly_resolved);

    let fp2_resolved = alert(&fp2.fingerprint, fp2.severity, AlertStatus::Resolved, fp2.payload.clone());
    let outcome = engine.process_alert(&r, &fp2_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.status, IncidentStatus::Resolved);
    assert!(outcome.newly_resolved);
}

/// Seed scenario 4: `resolve_on = FIRST` resolves as soon as the
/// earliest-joined fingerprint is resolved, regardless of the other
/// member's status.
#[tokio::test]
async fn seed_scenario_four_resolve_on_first() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.threshold = 2;
    r.resolve_on = ResolveOn::First;
    let (fp1, _fp2) = build_visible_two_member_incident(&engine, &r).await;

    let fp1_resolved = alert(&fp1.fingerprint, fp1.severity, AlertStatus::Resolved, fp1.payload.clone());
    let outcome = engine.process_alert(&r, &fp1_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.status, IncidentStatus::Resolved);
    assert!(outcome.newly_resolved);
}

/// `resolve_on = LAST` mirrors `FIRST` but keys off the most-recently
/// joined member.
#[tokio::test]
async fn resolve_on_last_keys_off_latest_joined_member() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.threshold = 2;
    r.resolve_on = ResolveOn::Last;
    let (fp1, fp2) = build_visible_two_member_incident(&engine, &r).await;

    let fp1_resolved = alert(&fp1.fingerprint, fp1.severity, AlertStatus::Resolved, fp1.payload.clone());
    let outcome = engine.process_alert(&r, &fp1_resolved).await.unwrap().unwrap();
    // fp1 joined first, not last: must not resolve yet.
    assert_eq!(outcome.incident.status, IncidentStatus::Firing);

    let fp2_resolved = alert(&fp2.fingerprint, fp2.severity, AlertStatus::Resolved, fp2.payload.clone());
    let outcome = engine.process_alert(&r, &fp2_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.status, IncidentStatus::Resolved);
}

/// §8 "Boundaries": with a single fingerprint, ALL/FIRST/LAST resolve
/// identically.
#[tokio::test]
async fn single_fingerprint_resolution_policies_are_equivalent() {
    for policy in [ResolveOn::All, ResolveOn::First, ResolveOn::Last] {
        let (engine, _store) = correlator();
        let mut r = rule(r#"severity == "critical""#);
        r.resolve_on = policy;
        let a = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
        engine.process_alert(&r, &a).await.unwrap();

        let resolved = alert("fp1", Severity::Critical, AlertStatus::Resolved, json!({"severity": "critical"}));
        let outcome = engine.process_alert(&r, &resolved).await.unwrap().unwrap();
        assert_eq!(outcome.incident.status, IncidentStatus::Resolved, "policy {policy:?} should resolve");
    }
}

/// Seed scenario 5 (name rendering/aggregation, §9 open question (b)):
/// re-rendering the template once per member and joining the distinct
/// results with ',' in join order.
#[tokio::test]
async fn template_aggregation_joins_distinct_renderings_in_order() {
    let (engine, store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.threshold = 2;
    r.incident_name_template = Some("{{alert.labels.host}}".to_string());

    let a1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical", "labels": {"host": "web-1"}}));
    let a2 = alert("fp2", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical", "labels": {"host": "web-2"}}));
    engine.process_alert(&r, &a1).await.unwrap();
    let outcome = engine.process_alert(&r, &a2).await.unwrap().unwrap();
    assert!(outcome.newly_visible);

    let incident = store.get(outcome.incident.id).await.unwrap().unwrap();
    assert_eq!(incident.user_generated_name.as_deref(), Some("web-1,web-2"));
}

/// Template rendering errors fall back to the rule name (§4.6) rather
/// than blocking the attach.
#[tokio::test]
async fn broken_template_falls_back_to_rule_name() {
    let (engine, store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.name = "fallback-rule-name".to_string();
    r.incident_name_template = Some("{{unterminated".to_string());

    let a = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let outcome = engine.process_alert(&r, &a).await.unwrap().unwrap();
    let incident = store.get(outcome.incident.id).await.unwrap().unwrap();
    assert_eq!(incident.user_generated_name.as_deref(), Some("fallback-rule-name"));
}

/// Seed scenario 6: prefix counters are scoped to `(rule_id,
/// rule_fingerprint)` — a new grouping key allocates the next number,
/// while re-matching the same key reuses its number.
#[tokio::test]
async fn seed_scenario_six_prefix_counter_scoped_to_grouping_key() {
    let (engine, store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.incident_prefix = Some("PROD".to_string());
    r.grouping_criteria = vec!["labels.host".to_string()];

    let web1 = alert("fp-web1-a", Severity::Critical, AlertStatus::Firing, json!({"labels": {"host": "web-1"}}));
    let outcome1 = engine.process_alert(&r, &web1).await.unwrap().unwrap();
    let incident1 = store.get(outcome1.incident.id).await.unwrap().unwrap();
    assert_eq!(incident1.user_generated_name.as_deref(), Some("PROD-1 - test-rule"));

    let web2 = alert("fp-web2-a", Severity::Critical, AlertStatus::Firing, json!({"labels": {"host": "web-2"}}));
    let outcome2 = engine.process_alert(&r, &web2).await.unwrap().unwrap();
    let incident2 = store.get(outcome2.incident.id).await.unwrap().unwrap();
    assert_eq!(incident2.user_generated_name.as_deref(), Some("PROD-2 - test-rule"));

    // Repeat host web-1 under a new fingerprint: same grouping key,
    // same incident, same prefix counter.
    let web1_again = alert("fp-web1-b", Severity::Critical, AlertStatus::Firing, json!({"labels": {"host": "web-1"}}));
    let outcome3 = engine.process_alert(&r, &web1_again).await.unwrap().unwrap();
    assert_eq!(outcome3.incident.id, outcome1.incident.id);
    let incident3 = store.get(outcome3.incident.id).await.unwrap().unwrap();
    assert_eq!(incident3.user_generated_name.as_deref(), Some("PROD-1 - test-rule"));
}

/// §8 Boundaries: `timeframe = 0` means no window — every matching
/// alert creates a brand-new incident rather than joining a prior one.
#[tokio::test]
async fn zero_timeframe_always_creates_a_new_incident() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.timeframe_secs = 0;

    let a1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let a2 = alert("fp2", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let outcome1 = engine.process_alert(&r, &a1).await.unwrap().unwrap();
    let outcome2 = engine.process_alert(&r, &a2).await.unwrap().unwrap();
    assert_ne!(outcome1.incident.id, outcome2.incident.id);
}

/// §8 Boundaries: empty grouping criteria yields a single fingerprint
/// per rule, so unrelated alerts all land in the same incident.
#[tokio::test]
async fn empty_grouping_criteria_yields_single_fingerprint_per_rule() {
    let r = rule(r#"severity == "critical""#);
    let a1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({}));
    let a2 = alert("fp2", Severity::Critical, AlertStatus::Firing, json!({"unrelated": "value"}));
    assert_eq!(Correlator::rule_fingerprint(&r, &a1), Correlator::rule_fingerprint(&r, &a2));
}

/// §4.5 "Match": a resolved alert never creates a new incident, only
/// affects an existing one.
#[tokio::test]
async fn resolved_alert_does_not_create_a_new_incident() {
    let (engine, _store) = correlator();
    let r = rule(r#"severity == "critical""#);
    let a = alert("fp1", Severity::Critical, AlertStatus::Resolved, json!({"severity": "critical"}));
    assert!(engine.process_alert(&r, &a).await.unwrap().is_none());
}

/// §9 open question (c): a resolved alert for a fingerprint not
/// previously attached to the candidate still attaches to it.
#[tokio::test]
async fn resolved_alert_for_unseen_fingerprint_still_attaches() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.require_approve = true; // keep it a hidden candidate
    r.threshold = 100;

    let a1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    engine.process_alert(&r, &a1).await.unwrap();

    let a2_resolved = alert("fp2", Severity::Critical, AlertStatus::Resolved, json!({"severity": "critical"}));
    let outcome = engine.process_alert(&r, &a2_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.alerts_count(), 2);
}

/// §3 "Ownership" / §8 invariant: every visible incident's
/// `alerts_count` equals the number of distinct attached fingerprints
/// and is at least the rule's threshold.
#[tokio::test]
async fn visible_incident_count_matches_threshold_invariant() {
    let (engine, _store) = correlator();
    let mut r = rule(r#"severity == "high""#);
    r.threshold = 3;

    for i in 0..3 {
        let a = alert(&format!("fp{i}"), Severity::High, AlertStatus::Firing, json!({"severity": "high"}));
        engine.process_alert(&r, &a).await.unwrap();
        // re-deliver one duplicate to confirm dedupe doesn't inflate the count.
        engine.process_alert(&r, &a).await.unwrap();
    }
    let a = alert("fp0", Severity::High, AlertStatus::Firing, json!({"severity": "high"}));
    let outcome = engine.process_alert(&r, &a).await.unwrap().unwrap();
    assert!(outcome.incident.is_visible);
    assert_eq!(outcome.incident.alerts_count(), 3);
    assert!(outcome.incident.alerts_count() >= r.threshold);
}

/// Grounded in `test_same_incident_in_the_past_id_set` from the original
/// implementation: once an incident is resolved, a new firing alert for
/// the same rule fingerprint (even inside the timeframe window) must
/// start a brand-new incident rather than reopen the resolved one, and
/// the new incident must link back via `same_incident_in_the_past_id`.
#[tokio::test]
async fn resolved_incident_is_not_reused_as_a_candidate() {
    let (engine, store) = correlator();
    let mut r = rule(r#"severity == "critical""#);
    r.threshold = 1;
    r.resolve_on = ResolveOn::All;

    let a1 = alert("fp1", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let outcome1 = engine.process_alert(&r, &a1).await.unwrap().unwrap();
    let incident1 = store.get(outcome1.incident.id).await.unwrap().unwrap();
    assert_eq!(incident1.same_incident_in_the_past_id, None);

    let a1_resolved = alert("fp1", Severity::Critical, AlertStatus::Resolved, json!({"severity": "critical"}));
    let outcome = engine.process_alert(&r, &a1_resolved).await.unwrap().unwrap();
    assert_eq!(outcome.incident.status, IncidentStatus::Resolved);

    // Same grouping fingerprint (empty grouping criteria -> identical
    // rule_fingerprint), new firing alert: must create a new incident.
    let a2 = alert("fp2", Severity::Critical, AlertStatus::Firing, json!({"severity": "critical"}));
    let outcome2 = engine.process_alert(&r, &a2).await.unwrap().unwrap();
    assert_ne!(outcome2.incident.id, incident1.id);
    assert_eq!(outcome2.incident.same_incident_in_the_past_id, Some(incident1.id));
    assert_eq!(outcome2.incident.status, IncidentStatus::Firing);
}
