//! Templating interface (§6 "Templating interface"): `render(template,
//! context) -> string | throws`, treated as an opaque external
//! collaborator. A minimal default implementation is provided so the
//! correlator is runnable and testable without wiring an external
//! engine.

use serde_json::Value as Json;

use crate::alert::AlertDto;
use crate::error::{EngineError, Result};

/// Context handed to the templater for incident-name rendering (§4.5
/// "Name rendering"): the first member alert plus the full member
/// list in join order.
#[derive(Debug, Clone)]
pub struct TemplateContext {
    pub alert: AlertDto,
    pub alerts: Vec<AlertDto>,
}

pub trait Templater: Send + Sync {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String>;
}

/// Minimal `{{alert.dotted.path}}` substitution templater: the
/// production templating engine is an external collaborator (§1 "Out
/// of scope"); this implementation exists to make the correlator
/// self-contained and testable.
pub struct SimpleTemplater;

impl Templater for SimpleTemplater {
    fn render(&self, template: &str, context: &TemplateContext) -> Result<String> {
        let alert_context = context.alert.eval_context();
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        loop {
            match rest.find("{{") {
                None => {
                    out.push_str(rest);
                    break;
                }
                Some(start) => {
                    out.push_str(&rest[..start]);
                    let after_open = &rest[start + 2..];
                    let end = after_open.find("}}").ok_or_else(|| {
                        EngineError::template(format!("unterminated '{{{{' in template: {template}"))
                    })?;
                    let expr = after_open[..end].trim();
                    out.push_str(&render_expr(expr, &alert_context));
                    rest = &after_open[end + 2..];
                }
            }
        }
        Ok(out)
    }
}

fn render_expr(expr: &str, alert_context: &Json) -> String {
    let path = expr.strip_prefix("alert.").unwrap_or(expr);
    let mut current = alert_context;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return "N/A".to_string(),
        }
    }
    match current {
        Json::String(s) => s.clone(),
        Json::Null => "N/A".to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert::{AlertStatus, Severity};
    use chrono::Utc;
    use serde_json::json;

    fn alert(host: &str) -> AlertDto {
        AlertDto {
            fingerprint: format!("fp-{host}"),
            event_time: Utc::now(),
            severity: Severity::High,
            status: AlertStatus::Firing,
            payload: json!({"labels": {"host": host}}),
        }
    }

    #[test]
    fn substitutes_known_field() {
        let templater = SimpleTemplater;
        let a = alert("web-1");
        let ctx = TemplateContext { alert: a.clone(), alerts: vec![a] };
        let rendered = templater.render("Issues on {{alert.labels.host}}", &ctx).unwrap();
        assert_eq!(rendered, "Issues on web-1");
    }

    #[test]
    fn missing_field_renders_as_na() {
        let templater = SimpleTemplater;
        let a = alert("web-1");
        let ctx = TemplateContext { alert: a.clone(), alerts: vec![a] };
        let rendered = templater.render("{{alert.labels.missing}}", &ctx).unwrap();
        assert_eq!(rendered, "N/A");
    }

    #[test]
    fn unterminated_template_errors() {
        let templater = SimpleTemplater;
        let a = alert("web-1");
        let ctx = TemplateContext { alert: a.clone(), alerts: vec![a] };
        assert!(templater.render("{{alert.labels.host", &ctx).is_err());
    }
}
