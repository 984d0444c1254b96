use herald_contracts::{Alert, KeyValue};

/// Values merged into the render context when every set matcher agrees
/// with the alert. An unset matcher (no status, empty map) always agrees.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComputedValueRule {
    pub values: KeyValue,
    pub status: Option<String>,
    pub labels: KeyValue,
    pub annotations: KeyValue,
}

impl ComputedValueRule {
    fn matches(&self, alert: &Alert) -> bool {
        let status_matches = self
            .status
            .as_deref()
            .map_or(true, |status| status == alert.status.as_str());
        status_matches
            && contains_all(&alert.labels, &self.labels)
            && contains_all(&alert.annotations, &self.annotations)
    }
}

fn contains_all(actual: &KeyValue, required: &KeyValue) -> bool {
    required
        .iter()
        .all(|(key, value)| actual.get(key) == Some(value))
}

/// Applies `rules` in order. Rules with no values are skipped outright;
/// when two matching rules set the same key, the later rule wins.
pub fn resolve_values(alert: &Alert, rules: &[ComputedValueRule]) -> KeyValue {
    let mut resolved = KeyValue::new();
    for rule in rules {
        if rule.values.is_empty() || !rule.matches(alert) {
            continue;
        }
        resolved.extend(rule.values.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    resolved
}
