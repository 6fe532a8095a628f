//! Display nodes and the synchronous formatter.

use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use procure_config::EngineConfig;
use procure_fields::path::{is_blank, text_of};
use procure_fields::{FieldKind, SelectOption};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a cell or read-only field renders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "node", rename_all = "kebab-case")]
pub enum DisplayNode {
    Text { text: String },
    Number { text: String },
    Date { text: String },
    Boolean { text: String },
    Lines { lines: Vec<String> },
    Thumbnail { src: String },
    Badge { label: String, color: Option<String> },
    Link { label: String, href: Option<String> },
    /// Number of elements in an ARRAY value
    Count { count: usize },
    Custom { component: String, value: Value },
    /// Neutral text for a missing value
    Placeholder { text: String },
    /// An async lookup has not resolved yet
    Loading { text: String },
    /// The resolver failed
    Unavailable { text: String },
}

impl DisplayNode {
    pub fn text(text: impl Into<String>) -> Self {
        DisplayNode::Text { text: text.into() }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, DisplayNode::Loading { .. })
    }

    /// Plain-text rendering, used in logs and tests
    pub fn label(&self) -> String {
        match self {
            DisplayNode::Text { text }
            | DisplayNode::Number { text }
            | DisplayNode::Date { text }
            | DisplayNode::Boolean { text }
            | DisplayNode::Placeholder { text }
            | DisplayNode::Loading { text }
            | DisplayNode::Unavailable { text } => text.clone(),
            DisplayNode::Lines { lines } => lines.join("\n"),
            DisplayNode::Thumbnail { src } => src.clone(),
            DisplayNode::Badge { label, .. } | DisplayNode::Link { label, .. } => label.clone(),
            DisplayNode::Count { count } => count.to_string(),
            DisplayNode::Custom { value, .. } => text_of(value),
        }
    }
}

/// Format a value for display. Total: never fails on missing or odd values.
///
/// Kinds that need a resolver (SELECT_API_OPTION, BADGE_API, LINK) come back
/// as `Loading` unless the value is blank; use [`crate::DisplayCell`] or
/// [`crate::render`] to resolve them.
pub fn format_value(value: Option<&Value>, kind: &FieldKind, config: &EngineConfig) -> DisplayNode {
    let placeholder = || DisplayNode::Placeholder {
        text: config.placeholder.clone(),
    };

    if let FieldKind::Array(_) = kind {
        let count = value.and_then(Value::as_array).map_or(0, Vec::len);
        return DisplayNode::Count { count };
    }
    if is_blank(value) {
        return placeholder();
    }
    let Some(value) = value else {
        return placeholder();
    };

    match kind {
        FieldKind::Text | FieldKind::Textarea => DisplayNode::text(text_of(value)),
        FieldKind::MultilineText => DisplayNode::Lines {
            lines: match value {
                Value::Array(items) => items.iter().map(text_of).collect(),
                other => text_of(other).lines().map(str::to_string).collect(),
            },
        },
        FieldKind::Number { precision } => match number(value) {
            Some(n) => DisplayNode::Number {
                text: match precision {
                    Some(p) => format!("{:.*}", *p as usize, n),
                    None => text_of(value),
                },
            },
            None => DisplayNode::text(text_of(value)),
        },
        FieldKind::Date => match format_date(value, &config.date_format) {
            Some(text) => DisplayNode::Date { text },
            None => DisplayNode::text(text_of(value)),
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => DisplayNode::Boolean {
                text: if *b {
                    config.true_label.clone()
                } else {
                    config.false_label.clone()
                },
            },
            other => DisplayNode::text(text_of(other)),
        },
        FieldKind::Thumbnail | FieldKind::UploadImage { .. } => DisplayNode::Thumbnail {
            src: text_of(value),
        },
        FieldKind::UploadFile { .. } => {
            let href = text_of(value);
            let label = href.rsplit('/').next().unwrap_or(&href).to_string();
            DisplayNode::Link {
                label,
                href: Some(href),
            }
        }
        FieldKind::Custom { component } => DisplayNode::Custom {
            component: component.clone(),
            value: value.clone(),
        },
        FieldKind::SelectApiOption { .. } | FieldKind::BadgeApi { .. } | FieldKind::Link { .. } => {
            DisplayNode::Loading {
                text: config.loading_text.clone(),
            }
        }
        FieldKind::Array(_) => placeholder(),
    }
}

/// Turn resolved options into the node for an async kind.
///
/// An empty result shows the raw value rather than nothing.
pub fn resolved_node(kind: &FieldKind, raw: &Value, options: &[SelectOption]) -> DisplayNode {
    let Some(first) = options.first() else {
        return DisplayNode::text(text_of(raw));
    };
    match kind {
        FieldKind::BadgeApi { .. } => DisplayNode::Badge {
            label: first.label.clone(),
            color: first.color.clone(),
        },
        FieldKind::Link { href, .. } => DisplayNode::Link {
            label: first.label.clone(),
            href: href
                .as_ref()
                .map(|template| template.replace("{value}", &text_of(raw))),
        },
        _ => DisplayNode::text(
            options
                .iter()
                .map(|o| o.label.as_str())
                .collect::<Vec<_>>()
                .join(", "),
        ),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn format_date(value: &Value, format: &str) -> Option<String> {
    let mut out = String::new();
    let written = match value {
        Value::String(s) => {
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                write!(out, "{}", dt.format(format))
            } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                write!(out, "{}", dt.format(format))
            } else {
                let date = NaiveDate::parse_from_str(s, "%Y-%m-%d").ok()?;
                write!(out, "{}", date.format(format))
            }
        }
        Value::Number(n) => {
            let dt = DateTime::from_timestamp_millis(n.as_i64()?)?;
            write!(out, "{}", dt.format(format))
        }
        _ => return None,
    };
    // chrono reports a bad format string as a fmt error
    written.ok().map(|_| out)
}
