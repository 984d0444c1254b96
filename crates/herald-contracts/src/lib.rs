use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const HTML_FORMAT: &str = "org.matrix.custom.html";
pub const TEXT_MSGTYPE: &str = "m.text";

pub type KeyValue = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    #[default]
    Firing,
    Resolved,
}

impl AlertStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertStatus::Firing => "firing",
            AlertStatus::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One alert as posted by the alert router's webhook notifier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub status: AlertStatus,
    #[serde(default)]
    pub labels: KeyValue,
    #[serde(default)]
    pub annotations: KeyValue,
    #[serde(default)]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ends_at: Option<DateTime<Utc>>,
    #[serde(default, rename = "generatorURL")]
    pub generator_url: String,
    #[serde(default)]
    pub fingerprint: String,
}

/// The batch envelope; every alert in it shares the external URL and
/// the group/common context.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct AlertGroup {
    #[serde(default)]
    pub receiver: String,
    #[serde(default)]
    pub status: AlertStatus,
    #[serde(default)]
    pub alerts: Vec<Alert>,
    #[serde(default)]
    pub group_labels: KeyValue,
    #[serde(default)]
    pub common_labels: KeyValue,
    #[serde(default)]
    pub common_annotations: KeyValue,
    #[serde(default, rename = "externalURL")]
    pub external_url: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub group_key: String,
    #[serde(default)]
    pub truncated_alerts: u64,
}

/// Content of an HTML `m.room.message` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HtmlMessage {
    pub msgtype: String,
    pub body: String,
    pub format: String,
    pub formatted_body: String,
}

static TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new("<[^<]+?>").expect("valid tag regex"));
static NUL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("&#(?:0+|[xX]0+);").expect("valid reference regex"));

impl HtmlMessage {
    /// Wraps rendered HTML, deriving the plain-text fallback by dropping
    /// tags and decoding entities.
    pub fn text(html: &str) -> Self {
        Self {
            msgtype: TEXT_MSGTYPE.to_string(),
            body: unescape_html(&TAG.replace_all(html, "")),
            format: HTML_FORMAT.to_string(),
            formatted_body: html.to_string(),
        }
    }
}

/// Decodes the full HTML5 entity set. A NUL, literal or from `&#0;`, is
/// not valid text and becomes U+FFFD.
fn unescape_html(input: &str) -> String {
    let input = NUL_REF.replace_all(input, "\u{fffd}");
    html_escape::decode_html_entities(&input).replace('\0', "\u{fffd}")
}
