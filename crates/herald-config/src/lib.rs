use std::collections::BTreeMap;
use std::sync::LazyLock;

use herald_contracts::KeyValue;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const SCHEMA: &str = include_str!("../../../config/config.schema.json");

pub const DEFAULT_ALERTS_PATH_PREFIX: &str = "/alerts/";
pub const DEFAULT_METRICS_PATH: &str = "/metrics";
pub const DEFAULT_BASIC_USERNAME: &str = "alertmanager";
pub const HEALTH_PATH: &str = "/healthz";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config failed: {0}")]
    Read(String),
    #[error("parse config failed: {0}")]
    Parse(String),
    #[error("schema load failed: {0}")]
    SchemaLoad(String),
    #[error("schema validation failed: {0}")]
    SchemaValidation(String),
    #[error("invalid config: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub http: Http,
    pub matrix: Matrix,
    pub templating: Templating,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Http {
    #[serde(default)]
    pub address: String,
    pub port: i64,
    #[serde(default)]
    pub alerts_path_prefix: String,
    #[serde(default)]
    pub metrics_path: String,
    #[serde(default)]
    pub metrics_enabled: bool,
    #[serde(default)]
    pub basic_username: String,
    #[serde(default)]
    pub basic_password: String,
}

impl Http {
    pub fn listen_addr(&self) -> String {
        let host = if self.address.is_empty() {
            "0.0.0.0"
        } else {
            self.address.as_str()
        };
        format!("{host}:{}", self.port)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Matrix {
    pub homeserver_url: String,
    pub user_id: String,
    pub access_token: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub room_mapping: KeyValue,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Templating {
    #[serde(default)]
    pub external_url_mapping: KeyValue,
    #[serde(default)]
    pub generator_url_mapping: KeyValue,
    #[serde(default)]
    pub computed_values: Vec<ComputedValue>,
    #[serde(rename = "firing-template")]
    pub firing: String,
    #[serde(default, rename = "resolved-template")]
    pub resolved: String,
    #[serde(default)]
    pub strict_mode: bool,
}

/// A conditional contribution to the template's `ComputedValues`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct ComputedValue {
    #[serde(default)]
    pub values: KeyValue,
    #[serde(default, rename = "when-matching-labels")]
    pub label_matcher: KeyValue,
    #[serde(default, rename = "when-matching-annotations")]
    pub annotation_matcher: KeyValue,
    #[serde(default, rename = "when-matching-status")]
    pub status_matcher: String,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Config {
    /// One-line description safe for logs; credentials are left out.
    pub fn summary(&self) -> String {
        format!(
            "listen={} alerts_path={} metrics_enabled={} metrics_path={} basic_auth={} homeserver={} user={} rooms_mapped={} computed_values={}",
            self.http.listen_addr(),
            self.http.alerts_path_prefix,
            self.http.metrics_enabled,
            self.http.metrics_path,
            !self.http.basic_password.is_empty(),
            self.matrix.homeserver_url,
            self.matrix.user_id,
            self.matrix.room_mapping.len(),
            self.templating.computed_values.len(),
        )
    }
}

pub fn load_and_validate(path: &str) -> Result<Config, ConfigError> {
    let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read(e.to_string()))?;
    parse_and_validate(&raw)
}

pub fn parse_and_validate(raw: &str) -> Result<Config, ConfigError> {
    let config_text = substitute_env(raw, |name| std::env::var(name).ok());
    let value: serde_yaml::Value =
        serde_yaml::from_str(&config_text).map_err(|e| ConfigError::Parse(e.to_string()))?;

    let instance = serde_json::to_value(value).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_against_schema(&instance)?;

    let mut cfg: Config =
        serde_json::from_value(instance).map_err(|e| ConfigError::Parse(e.to_string()))?;
    let problems = normalize(&mut cfg);
    if problems.is_empty() {
        Ok(cfg)
    } else {
        Err(ConfigError::Invalid(problems))
    }
}

static ENV_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{(\w+)\}").expect("valid placeholder regex"));

/// Replaces `${NAME}` with the looked-up value; unknown names stay verbatim.
pub fn substitute_env<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    ENV_PLACEHOLDER
        .replace_all(text, |caps: &Captures<'_>| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn validate_against_schema(instance: &serde_json::Value) -> Result<(), ConfigError> {
    let schema: serde_json::Value =
        serde_json::from_str(SCHEMA).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    let validator =
        jsonschema::validator_for(&schema).map_err(|e| ConfigError::SchemaLoad(e.to_string()))?;
    if let Err(first) = validator.validate(instance) {
        return Err(ConfigError::SchemaValidation(first.to_string()));
    }
    Ok(())
}

/// Fills defaults in place and returns every rule the config breaks.
pub fn normalize(cfg: &mut Config) -> Vec<String> {
    let mut problems = Vec::new();

    let http = &mut cfg.http;
    if !(1..=65535).contains(&http.port) {
        problems.push(format!("http.port={} is outside 1..=65535", http.port));
    }
    if http.alerts_path_prefix.trim().is_empty() {
        http.alerts_path_prefix = DEFAULT_ALERTS_PATH_PREFIX.to_string();
    }
    if !http.alerts_path_prefix.starts_with('/') {
        http.alerts_path_prefix.insert(0, '/');
    }
    if !http.alerts_path_prefix.ends_with('/') {
        http.alerts_path_prefix.push('/');
    }
    if http.metrics_path.trim().is_empty() {
        http.metrics_path = DEFAULT_METRICS_PATH.to_string();
    }
    if !http.metrics_path.starts_with('/') {
        http.metrics_path.insert(0, '/');
    }
    if http.basic_username.trim().is_empty() {
        http.basic_username = DEFAULT_BASIC_USERNAME.to_string();
    }
    if http.metrics_enabled {
        if http.metrics_path == HEALTH_PATH {
            problems.push(format!("http.metrics-path must not be {HEALTH_PATH}"));
        }
        if http.metrics_path.starts_with(&http.alerts_path_prefix) {
            problems.push(format!(
                "http.metrics-path={} overlaps http.alerts-path-prefix={}",
                http.metrics_path, http.alerts_path_prefix
            ));
        }
    }

    let matrix = &cfg.matrix;
    if matrix.homeserver_url.trim().is_empty() {
        problems.push("matrix.homeserver-url is required".to_string());
    }
    if matrix.user_id.trim().is_empty() {
        problems.push("matrix.user-id is required".to_string());
    }
    if matrix.access_token.trim().is_empty() {
        problems.push("matrix.access-token is required".to_string());
    }
    if matrix.timeout_ms == 0 {
        problems.push("matrix.timeout-ms must be >= 1".to_string());
    }
    for (room, target) in &matrix.room_mapping {
        if target.trim().is_empty() {
            problems.push(format!("matrix.room-mapping.{room} is empty"));
        }
    }

    let templating = &mut cfg.templating;
    if templating.firing.trim().is_empty() {
        problems.push("templating.firing-template is required".to_string());
    }
    if templating.resolved.trim().is_empty() {
        templating.resolved = templating.firing.clone();
    }

    problems
}

/// Rule count per matcher kind, logged at startup.
pub fn describe_rules(rules: &[ComputedValue]) -> BTreeMap<&'static str, usize> {
    let mut counts = BTreeMap::new();
    for rule in rules {
        let kind = if rule.values.is_empty() {
            "ignored"
        } else if rule.status_matcher.is_empty()
            && rule.label_matcher.is_empty()
            && rule.annotation_matcher.is_empty()
        {
            "unconditional"
        } else {
            "conditional"
        };
        *counts.entry(kind).or_insert(0) += 1;
    }
    counts
}
