//! Validation schema and the built-in rule evaluator.
//!
//! A [`ValidationSchema`] maps path patterns (`items.*.quantity`) to rule
//! lists. The form engine decides *when* to validate; *how* is behind the
//! [`Validator`] trait so hosts can plug in their own rule language.

use std::collections::{BTreeMap, HashMap};

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{FieldsError, Result};
use crate::path::{is_blank, FieldPath};
use crate::types::{expand_paths, FieldSpec};

/// Field path → first failing rule's message
pub type FieldErrors = BTreeMap<FieldPath, String>;

/// One validation rule. `message` overrides the default text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum Rule {
    Required {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MinLength {
        value: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    MaxLength {
        value: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Min {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Max {
        value: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Integer {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Pattern {
        regex: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
    Email {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },
}

impl Rule {
    pub fn required() -> Self {
        Rule::Required { message: None }
    }

    pub fn min_length(value: usize) -> Self {
        Rule::MinLength {
            value,
            message: None,
        }
    }

    pub fn max_length(value: usize) -> Self {
        Rule::MaxLength {
            value,
            message: None,
        }
    }

    pub fn min(value: f64) -> Self {
        Rule::Min {
            value,
            message: None,
        }
    }

    pub fn max(value: f64) -> Self {
        Rule::Max {
            value,
            message: None,
        }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        Rule::Pattern {
            regex: regex.into(),
            message: None,
        }
    }

    /// Replace the default message
    pub fn with_message(mut self, text: impl Into<String>) -> Self {
        let text = Some(text.into());
        match &mut self {
            Rule::Required { message }
            | Rule::MinLength { message, .. }
            | Rule::MaxLength { message, .. }
            | Rule::Min { message, .. }
            | Rule::Max { message, .. }
            | Rule::Integer { message }
            | Rule::Pattern { message, .. }
            | Rule::Email { message } => *message = text,
        }
        self
    }

    fn custom_message(&self) -> Option<&str> {
        match self {
            Rule::Required { message }
            | Rule::MinLength { message, .. }
            | Rule::MaxLength { message, .. }
            | Rule::Min { message, .. }
            | Rule::Max { message, .. }
            | Rule::Integer { message }
            | Rule::Pattern { message, .. }
            | Rule::Email { message } => message.as_deref(),
        }
    }
}

fn default_allow_unknown() -> bool {
    true
}

/// Path pattern → rules, plus the payload policy for undeclared keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationSchema {
    #[serde(default)]
    pub rules: IndexMap<String, Vec<Rule>>,
    /// When false, top-level keys not declared in the field tree are
    /// stripped from the submit payload
    #[serde(default = "default_allow_unknown")]
    pub allow_unknown: bool,
}

impl Default for ValidationSchema {
    fn default() -> Self {
        Self {
            rules: IndexMap::new(),
            allow_unknown: true,
        }
    }
}

impl ValidationSchema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a rule for `pattern`
    pub fn rule(mut self, pattern: impl Into<String>, rule: Rule) -> Self {
        self.rules.entry(pattern.into()).or_default().push(rule);
        self
    }

    pub fn deny_unknown(mut self) -> Self {
        self.allow_unknown = false;
        self
    }

    /// Rules whose pattern matches `path`, in declaration order
    pub fn rules_for<'a>(&'a self, path: &'a FieldPath) -> impl Iterator<Item = &'a Rule> + 'a {
        self.rules
            .iter()
            .filter(move |(pattern, _)| path.matches_pattern(pattern))
            .flat_map(|(_, rules)| rules.iter())
    }
}

/// Evaluates rules for one field.
pub trait Validator: Send + Sync {
    /// The first failing rule's message, or `None` when the value passes
    fn validate_field(&self, path: &FieldPath, label: &str, value: Option<&Value>)
        -> Option<String>;

    /// Whether undeclared top-level keys survive into the submit payload
    fn allow_unknown(&self) -> bool {
        true
    }
}

/// The built-in evaluator over a [`ValidationSchema`].
#[derive(Debug)]
pub struct RuleValidator {
    schema: ValidationSchema,
    patterns: HashMap<String, Regex>,
    email: Regex,
}

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

impl RuleValidator {
    /// Compile every pattern rule up front so a bad regex fails at construction.
    pub fn new(schema: ValidationSchema) -> Result<Self> {
        let mut patterns = HashMap::new();
        for (path, rules) in &schema.rules {
            for rule in rules {
                if let Rule::Pattern { regex, .. } = rule {
                    let compiled =
                        Regex::new(regex).map_err(|e| FieldsError::InvalidPattern {
                            path: path.clone(),
                            message: e.to_string(),
                        })?;
                    patterns.insert(regex.clone(), compiled);
                }
            }
        }
        let email = Regex::new(EMAIL_PATTERN).map_err(|e| FieldsError::InvalidPattern {
            path: "<email>".into(),
            message: e.to_string(),
        })?;
        Ok(Self {
            schema,
            patterns,
            email,
        })
    }

    pub fn schema(&self) -> &ValidationSchema {
        &self.schema
    }

    fn check(&self, rule: &Rule, label: &str, value: Option<&Value>) -> Option<String> {
        if let Rule::Required { .. } = rule {
            return is_blank(value).then(|| format!("{label} is required"));
        }
        // Optional values are only checked once something was entered
        let value = value.filter(|v| !is_blank(Some(*v)))?;

        match rule {
            Rule::Required { .. } => None,
            Rule::MinLength { value: min, .. } => (length(value) < *min)
                .then(|| format!("{label} must be at least {min} characters")),
            Rule::MaxLength { value: max, .. } => (length(value) > *max)
                .then(|| format!("{label} must be at most {max} characters")),
            Rule::Min { value: min, .. } => match number(value) {
                Some(n) if n < *min => Some(format!("{label} must be at least {min}")),
                Some(_) => None,
                None => Some(format!("{label} must be a number")),
            },
            Rule::Max { value: max, .. } => match number(value) {
                Some(n) if n > *max => Some(format!("{label} must be at most {max}")),
                Some(_) => None,
                None => Some(format!("{label} must be a number")),
            },
            Rule::Integer { .. } => match number(value) {
                Some(n) if n.fract() == 0.0 => None,
                _ => Some(format!("{label} must be a whole number")),
            },
            Rule::Pattern { regex, .. } => {
                let text = crate::path::text_of(value);
                match self.patterns.get(regex) {
                    Some(re) if re.is_match(&text) => None,
                    _ => Some(format!("{label} has an invalid format")),
                }
            }
            Rule::Email { .. } => {
                let text = crate::path::text_of(value);
                (!self.email.is_match(&text))
                    .then(|| format!("{label} must be a valid email address"))
            }
        }
    }
}

impl Validator for RuleValidator {
    fn validate_field(
        &self,
        path: &FieldPath,
        label: &str,
        value: Option<&Value>,
    ) -> Option<String> {
        self.schema.rules_for(path).find_map(|rule| {
            self.check(rule, label, value)
                .map(|default| rule.custom_message().map_or(default, str::to_string))
        })
    }

    fn allow_unknown(&self) -> bool {
        self.schema.allow_unknown
    }
}

fn length(value: &Value) -> usize {
    match value {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        other => crate::path::text_of(other).chars().count(),
    }
}

fn number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Validate every concrete path of the tree against `values`.
pub fn validate_all(
    validator: &dyn Validator,
    fields: &[FieldSpec],
    values: &Value,
) -> FieldErrors {
    expand_paths(fields, values, &FieldPath::root())
        .into_iter()
        .filter_map(|(path, spec)| {
            let value = crate::path::get(values, &path);
            validator
                .validate_field(&path, &spec.label, value)
                .map(|message| (path, message))
        })
        .collect()
}

/// Build the submit payload from the value tree.
///
/// With `allow_unknown` the tree is returned as is; otherwise top-level keys
/// that no field declares are dropped.
pub fn submit_payload(fields: &[FieldSpec], values: &Value, allow_unknown: bool) -> Value {
    if allow_unknown {
        return values.clone();
    }
    let Value::Object(map) = values else {
        return values.clone();
    };
    let declared: Vec<String> = fields
        .iter()
        .filter_map(|f| f.path().segments().first().map(ToString::to_string))
        .collect();
    let kept: Map<String, Value> = map
        .iter()
        .filter(|(key, _)| declared.iter().any(|d| d == *key))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Value::Object(kept)
}
