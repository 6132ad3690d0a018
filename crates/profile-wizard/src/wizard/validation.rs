use regex::Regex;

use super::domain::{format_number, FieldSpec, FieldValue, FormSnapshot};
use super::schema::EntitySchema;

/// Declarative validation rule. Range, pattern and length are the primitives; everything
/// else is composed from them.
#[derive(Debug, Clone)]
pub enum Rule {
    NumericRange {
        min: Option<f64>,
        max: Option<f64>,
    },
    Pattern {
        regex: Regex,
        message: String,
    },
    Length {
        min: Option<usize>,
        max: Option<usize>,
    },
    /// Every rule must pass; the first failure is reported.
    All(Vec<Rule>),
    /// Applies `rule` to a sibling value read from the snapshot.
    Sibling { field: String, rule: Box<Rule> },
}

impl Rule {
    pub fn range(min: f64, max: f64) -> Self {
        Rule::NumericRange {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn at_least(min: f64) -> Self {
        Rule::NumericRange {
            min: Some(min),
            max: None,
        }
    }

    pub fn pattern(pattern: &str, message: &str) -> Result<Self, regex::Error> {
        Ok(Rule::Pattern {
            regex: Regex::new(pattern)?,
            message: message.to_string(),
        })
    }

    pub fn length(min: usize, max: usize) -> Self {
        Rule::Length {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn sibling(field: &str, rule: Rule) -> Self {
        Rule::Sibling {
            field: field.to_string(),
            rule: Box::new(rule),
        }
    }

    /// Checks `value` (the field's own value) against the rule. `label` names the field in
    /// messages.
    pub fn check(&self, label: &str, value: &FieldValue, snapshot: &FormSnapshot) -> Option<String> {
        match self {
            Rule::NumericRange { min, max } => {
                let Some(number) = value.as_number() else {
                    return Some(format!("{label} must be a number"));
                };
                match (min, max) {
                    (Some(min), Some(max)) if number < *min || number > *max => Some(format!(
                        "{label} must be between {} and {}",
                        format_number(*min),
                        format_number(*max)
                    )),
                    (Some(min), None) if number < *min => {
                        Some(format!("{label} must be at least {}", format_number(*min)))
                    }
                    (None, Some(max)) if number > *max => {
                        Some(format!("{label} must be at most {}", format_number(*max)))
                    }
                    _ => None,
                }
            }
            Rule::Pattern { regex, message } => {
                let Some(text) = value.to_scalar_text() else {
                    return Some(message.clone());
                };
                if regex.is_match(&text) {
                    None
                } else {
                    Some(message.clone())
                }
            }
            Rule::Length { min, max } => {
                let length = match value {
                    FieldValue::Text(text) => text.trim().chars().count(),
                    FieldValue::List(items) => items.len(),
                    _ => return None,
                };
                let unit = if matches!(value, FieldValue::List(_)) {
                    "entries"
                } else {
                    "characters"
                };
                if let Some(min) = min {
                    if length < *min {
                        return Some(format!("{label} must have at least {min} {unit}"));
                    }
                }
                if let Some(max) = max {
                    if length > *max {
                        return Some(format!("{label} must have at most {max} {unit}"));
                    }
                }
                None
            }
            Rule::All(rules) => rules
                .iter()
                .find_map(|rule| rule.check(label, value, snapshot)),
            Rule::Sibling { field, rule } => match snapshot.get(field) {
                Some(sibling) if !sibling.is_blank() => rule.check(label, sibling, snapshot),
                _ => Some(format!("{label} is incomplete")),
            },
        }
    }
}

/// Validates one field of `schema`. Unknown field names never produce an error.
pub fn validate(
    schema: &EntitySchema,
    field: &str,
    value: Option<&FieldValue>,
    snapshot: &FormSnapshot,
) -> Option<String> {
    let spec = schema.field(field)?;
    validate_spec(spec, value, snapshot)
}

pub(crate) fn validate_spec(
    spec: &FieldSpec,
    value: Option<&FieldValue>,
    snapshot: &FormSnapshot,
) -> Option<String> {
    let value = match value {
        Some(value) if !value.is_blank() => value,
        _ => {
            return spec
                .required
                .then(|| format!("{} is required", spec.label));
        }
    };

    if spec.require_true && value.as_bool() != Some(true) {
        return if spec.required {
            Some(format!("{} must be accepted", spec.label))
        } else {
            None
        };
    }

    spec.rule
        .as_ref()
        .and_then(|rule| rule.check(&spec.label, value, snapshot))
}
