use handlebars::{handlebars_helper, Handlebars};
use herald_contracts::{Alert, AlertGroup, AlertStatus, KeyValue};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::links::{map_url, silence_url};
use crate::values::{resolve_values, ComputedValueRule};

const FIRING: &str = "firing";
const RESOLVED: &str = "resolved";

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("{name} template does not compile: {source}")]
    Compile {
        name: &'static str,
        #[source]
        source: Box<handlebars::TemplateError>,
    },
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template execution failed: {0}")]
    Execution(#[from] handlebars::RenderError),
}

/// Firing and resolved template bodies. A blank resolved body means
/// "reuse the firing body"; that substitution happens here, once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSpec {
    pub firing: String,
    pub resolved: String,
}

impl TemplateSpec {
    pub fn new(firing: impl Into<String>, resolved: impl Into<String>) -> Self {
        let firing = firing.into();
        let mut resolved = resolved.into();
        if resolved.trim().is_empty() {
            resolved = firing.clone();
        }
        Self { firing, resolved }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RenderSettings {
    pub external_url_mapping: KeyValue,
    pub generator_url_mapping: KeyValue,
    pub computed_values: Vec<ComputedValueRule>,
    /// Fail rendering when a template references a value the context lacks.
    pub strict: bool,
}

/// Turns one alert of a group into a message body.
pub trait Renderer: Send + Sync {
    fn render(&self, alert: &Alert, group: &AlertGroup) -> Result<String, RenderError>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct AlertView<'a> {
    status: &'static str,
    labels: &'a KeyValue,
    annotations: &'a KeyValue,
    starts_at: Option<String>,
    ends_at: Option<String>,
    #[serde(rename = "GeneratorURL")]
    generator_url: &'a str,
    fingerprint: &'a str,
}

impl<'a> AlertView<'a> {
    fn new(alert: &'a Alert) -> Self {
        Self {
            status: alert.status.as_str(),
            labels: &alert.labels,
            annotations: &alert.annotations,
            starts_at: alert.starts_at.map(|t| t.to_rfc3339()),
            ends_at: alert.ends_at.map(|t| t.to_rfc3339()),
            generator_url: &alert.generator_url,
            fingerprint: &alert.fingerprint,
        }
    }
}

/// Everything a template can reference for one alert.
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct RenderContext<'a> {
    alert: AlertView<'a>,
    group_labels: &'a KeyValue,
    common_labels: &'a KeyValue,
    common_annotations: &'a KeyValue,
    #[serde(rename = "SilenceURL")]
    silence_url: String,
    #[serde(rename = "ExternalURL")]
    external_url: String,
    #[serde(rename = "GeneratorURL")]
    generator_url: String,
    computed_values: KeyValue,
}

impl<'a> RenderContext<'a> {
    fn build(alert: &'a Alert, group: &'a AlertGroup, settings: &RenderSettings) -> Self {
        let external_url = map_url(&group.external_url, &settings.external_url_mapping);
        debug!(
            original_url = %group.external_url,
            mapped_url = %external_url,
            "external url mapped"
        );
        let generator_url = map_url(&alert.generator_url, &settings.generator_url_mapping);
        debug!(
            original_url = %alert.generator_url,
            mapped_url = %generator_url,
            "generator url mapped"
        );
        let silence_url = silence_url(alert, &external_url);
        let computed_values = resolve_values(alert, &settings.computed_values);
        debug!(silence_url = %silence_url, values = ?computed_values, "context computed");

        Self {
            alert: AlertView::new(alert),
            group_labels: &group.group_labels,
            common_labels: &group.common_labels,
            common_annotations: &group.common_annotations,
            silence_url,
            external_url,
            generator_url,
            computed_values,
        }
    }
}

handlebars_helper!(to_upper: |s: str| s.to_uppercase());
handlebars_helper!(to_lower: |s: str| s.to_lowercase());

/// Both templates compiled up front; a body that does not compile never
/// reaches request handling.
pub struct TemplateRenderer {
    registry: Handlebars<'static>,
    settings: RenderSettings,
}

impl TemplateRenderer {
    pub fn new(spec: &TemplateSpec, settings: RenderSettings) -> Result<Self, TemplateError> {
        let mut registry = Handlebars::new();
        registry.set_strict_mode(settings.strict);
        registry.register_helper("ToUpper", Box::new(to_upper));
        registry.register_helper("ToLower", Box::new(to_lower));
        for (name, body) in [(FIRING, &spec.firing), (RESOLVED, &spec.resolved)] {
            registry
                .register_template_string(name, body)
                .map_err(|source| TemplateError::Compile {
                    name,
                    source: Box::new(source),
                })?;
        }
        Ok(Self { registry, settings })
    }
}

impl Renderer for TemplateRenderer {
    fn render(&self, alert: &Alert, group: &AlertGroup) -> Result<String, RenderError> {
        let name = match alert.status {
            AlertStatus::Resolved => RESOLVED,
            AlertStatus::Firing => FIRING,
        };
        let context = RenderContext::build(alert, group, &self.settings);
        Ok(self.registry.render(name, &context)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn kv(pairs: &[(&str, &str)]) -> KeyValue {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn renderer(firing: &str, resolved: &str, settings: RenderSettings) -> TemplateRenderer {
        TemplateRenderer::new(&TemplateSpec::new(firing, resolved), settings).unwrap()
    }

    fn group(external_url: &str, alert: Alert) -> AlertGroup {
        AlertGroup {
            external_url: external_url.to_string(),
            group_labels: kv(&[("alertname", "disk")]),
            common_labels: kv(&[("team", "ops")]),
            common_annotations: kv(&[("runbook", "wiki/disk")]),
            alerts: vec![alert],
            ..AlertGroup::default()
        }
    }

    #[test]
    fn firing_alert_gets_silence_link_for_its_labels() {
        let alert = Alert {
            status: AlertStatus::Firing,
            labels: kv(&[("sev", "high")]),
            ..Alert::default()
        };
        let group = group("http://am:9093", alert.clone());
        let r = renderer("{{Alert.Status}} {{{SilenceURL}}}", "", RenderSettings::default());
        assert_eq!(
            r.render(&alert, &group).unwrap(),
            "firing http://am:9093/#/silences/new?filter=%7Bsev%3D%22high%22%7D"
        );
    }

    #[test]
    fn resolved_alert_selects_resolved_body() {
        let alert = Alert {
            status: AlertStatus::Resolved,
            ..Alert::default()
        };
        let group = group("", alert.clone());
        let r = renderer("FIRE", "OK", RenderSettings::default());
        assert_eq!(r.render(&alert, &group).unwrap(), "OK");
    }

    #[test]
    fn blank_resolved_body_reuses_firing() {
        let spec = TemplateSpec::new("{{Alert.Status}} body", "  ");
        assert_eq!(spec.resolved, spec.firing);
        let alert = Alert {
            status: AlertStatus::Resolved,
            ..Alert::default()
        };
        let r = TemplateRenderer::new(&spec, RenderSettings::default()).unwrap();
        assert_eq!(
            r.render(&alert, &group("", alert.clone())).unwrap(),
            "resolved body"
        );
    }

    #[test]
    fn context_exposes_group_and_common_data() {
        let alert = Alert {
            labels: kv(&[("instance", "db1")]),
            annotations: kv(&[("summary", "full")]),
            fingerprint: "f00".to_string(),
            starts_at: Some(Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap()),
            ..Alert::default()
        };
        let group = group("", alert.clone());
        let r = renderer(
            "{{GroupLabels.alertname}}|{{CommonLabels.team}}|{{CommonAnnotations.runbook}}|{{Alert.Labels.instance}}|{{Alert.Annotations.summary}}|{{Alert.Fingerprint}}|{{Alert.StartsAt}}",
            "",
            RenderSettings::default(),
        );
        assert_eq!(
            r.render(&alert, &group).unwrap(),
            "disk|ops|wiki/disk|db1|full|f00|2024-01-02T03:04:05+00:00"
        );
    }

    #[test]
    fn urls_are_mapped_before_rendering() {
        let alert = Alert {
            generator_url: "http://prometheus:9090/graph".to_string(),
            ..Alert::default()
        };
        let group = group("http://alertmanager:9093/", alert.clone());
        let settings = RenderSettings {
            external_url_mapping: kv(&[(
                "http://alertmanager:9093/",
                "https://am.example.com",
            )]),
            generator_url_mapping: kv(&[(
                "http://prometheus:9090/graph",
                "https://prom.example.com/graph",
            )]),
            ..RenderSettings::default()
        };
        let r = renderer(
            "{{{ExternalURL}}} {{{GeneratorURL}}} {{{Alert.GeneratorURL}}} {{{SilenceURL}}}",
            "",
            settings,
        );
        assert_eq!(
            r.render(&alert, &group).unwrap(),
            "https://am.example.com https://prom.example.com/graph http://prometheus:9090/graph https://am.example.com/#/silences/new"
        );
    }

    #[test]
    fn computed_values_and_case_helpers() {
        let alert = Alert {
            labels: kv(&[("sev", "High")]),
            ..Alert::default()
        };
        let settings = RenderSettings {
            computed_values: vec![ComputedValueRule {
                values: kv(&[("color", "red")]),
                status: Some("firing".to_string()),
                ..ComputedValueRule::default()
            }],
            ..RenderSettings::default()
        };
        let r = renderer(
            "{{ToUpper Alert.Status}} {{ToLower Alert.Labels.sev}} {{ComputedValues.color}}",
            "",
            settings,
        );
        assert_eq!(
            r.render(&alert, &group("", alert.clone())).unwrap(),
            "FIRING high red"
        );
    }

    #[test]
    fn rendered_text_is_html_escaped() {
        let alert = Alert {
            annotations: kv(&[("summary", "a < b")]),
            ..Alert::default()
        };
        let r = renderer("<b>{{Alert.Annotations.summary}}</b>", "", RenderSettings::default());
        assert_eq!(
            r.render(&alert, &group("", alert.clone())).unwrap(),
            "<b>a &lt; b</b>"
        );
    }

    #[test]
    fn strict_mode_rejects_unknown_fields() {
        let alert = Alert::default();
        let settings = RenderSettings {
            strict: true,
            ..RenderSettings::default()
        };
        let r = renderer("{{Alert.NoSuchField}}", "", settings);
        assert!(matches!(
            r.render(&alert, &group("", alert.clone())),
            Err(RenderError::Execution(_))
        ));
    }

    #[test]
    fn lenient_mode_renders_unknown_fields_empty() {
        let alert = Alert::default();
        let r = renderer("[{{Alert.NoSuchField}}]", "", RenderSettings::default());
        assert_eq!(r.render(&alert, &group("", alert.clone())).unwrap(), "[]");
    }

    #[test]
    fn unknown_helper_fails_at_execution() {
        let alert = Alert::default();
        let r = renderer("{{Shout Alert.Status}}", "", RenderSettings::default());
        assert!(r.render(&alert, &group("", alert.clone())).is_err());
    }

    #[test]
    fn empty_output_is_not_an_error() {
        let alert = Alert::default();
        let r = renderer("{{#if Alert.Labels.page}}page{{/if}}", "", RenderSettings::default());
        assert_eq!(r.render(&alert, &group("", alert.clone())).unwrap(), "");
    }

    #[test]
    fn malformed_template_is_rejected_at_construction() {
        let err = TemplateRenderer::new(
            &TemplateSpec::new("ok", "{{#if Alert.Status}}unclosed"),
            RenderSettings::default(),
        )
        .err()
        .expect("expected compile failure");
        assert!(matches!(err, TemplateError::Compile { name: "resolved", .. }));
    }

    #[test]
    fn rendering_leaves_inputs_untouched() {
        let alert = Alert {
            labels: kv(&[("sev", "high")]),
            ..Alert::default()
        };
        let group = group("http://am/", alert.clone());
        let before = (alert.clone(), group.clone());
        let r = renderer("{{{SilenceURL}}}", "", RenderSettings::default());
        r.render(&alert, &group).unwrap();
        assert_eq!((alert, group), before);
    }
}
