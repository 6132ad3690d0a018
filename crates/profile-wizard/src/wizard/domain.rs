use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::validation::Rule;

/// Suffix of the engine-owned boolean that records a successful contact verification.
pub const VERIFIED_SUFFIX: &str = "Verified";

/// Name of the flag that mirrors the verification state of `field`.
pub fn verified_flag_name(field: &str) -> String {
    format!("{field}{VERIFIED_SUFFIX}")
}

/// Identifier of the profile returned by the submit endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileId(pub String);

/// Durable-store key for one in-progress profile edit.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DraftKey(pub String);

impl DraftKey {
    pub fn for_profile(kind: EntityKind, owner: &str) -> Self {
        Self(format!("{}:{}", kind.label(), owner.trim()))
    }
}

/// The onboarding flows sharing this engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Agency,
    Maid,
    Sponsor,
}

impl EntityKind {
    pub const fn label(self) -> &'static str {
        match self {
            EntityKind::Agency => "agency",
            EntityKind::Maid => "maid",
            EntityKind::Sponsor => "sponsor",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "agency" => Some(Self::Agency),
            "maid" | "worker" => Some(Self::Maid),
            "sponsor" => Some(Self::Sponsor),
            _ => None,
        }
    }
}

/// Reference to an uploaded file; the engine never looks inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    pub blob: String,
}

/// A single form value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
    Blob(BlobRef),
}

impl FieldValue {
    pub fn text(value: impl Into<String>) -> Self {
        FieldValue::Text(value.into())
    }

    /// Blank text, empty lists and empty blob keys count as missing; numbers and booleans
    /// are present once supplied.
    pub fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.trim().is_empty(),
            FieldValue::List(items) => items.iter().all(|item| item.trim().is_empty()),
            FieldValue::Blob(blob) => blob.blob.trim().is_empty(),
            FieldValue::Number(number) => !number.is_finite(),
            FieldValue::Bool(_) => false,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Text form of a scalar value, trimmed. Whole numbers render without a fraction, so a
    /// phone number sent as a JSON number reads the same as its text form.
    pub fn to_scalar_text(&self) -> Option<String> {
        match self {
            FieldValue::Text(text) => Some(text.trim().to_string()),
            FieldValue::Number(number) if number.is_finite() => Some(format_number(*number)),
            _ => None,
        }
    }

    /// Numbers typed into text inputs arrive as strings.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(number) if number.is_finite() => Some(*number),
            FieldValue::Text(text) => text.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            FieldValue::Bool(flag) => Some(*flag),
            _ => None,
        }
    }
}

pub(crate) fn format_number(number: f64) -> String {
    if number.fract() == 0.0 && number.abs() < 1e15 {
        format!("{}", number as i64)
    } else {
        format!("{number}")
    }
}

/// Field name to value mapping for one edit session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FormSnapshot {
    values: BTreeMap<String, FieldValue>,
}

impl FormSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, field: &str) -> Option<&FieldValue> {
        self.values.get(field)
    }

    /// Returns the previous value, if any.
    pub fn set(&mut self, field: impl Into<String>, value: FieldValue) -> Option<FieldValue> {
        self.values.insert(field.into(), value)
    }

    pub fn remove(&mut self, field: &str) -> Option<FieldValue> {
        self.values.remove(field)
    }

    pub fn is_filled(&self, field: &str) -> bool {
        self.get(field).map(|value| !value.is_blank()).unwrap_or(false)
    }

    pub fn flag(&self, field: &str) -> bool {
        self.get(field)
            .and_then(FieldValue::as_bool)
            .unwrap_or(false)
    }

    pub fn is_verified(&self, field: &str) -> bool {
        self.flag(&verified_flag_name(field))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldValue)> {
        self.values.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, FieldValue)> for FormSnapshot {
    fn from_iter<I: IntoIterator<Item = (K, FieldValue)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(key, value)| (key.into(), value))
                .collect(),
        }
    }
}

/// Delivery channel for one-time codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationChannel {
    Phone,
    Email,
}

impl VerificationChannel {
    pub const fn label(self) -> &'static str {
        match self {
            VerificationChannel::Phone => "phone",
            VerificationChannel::Email => "email",
        }
    }
}

/// Static descriptor of one form field.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub label: String,
    pub required: bool,
    /// Only an explicit `true` counts as filled (terms acceptance and similar).
    pub require_true: bool,
    pub rule: Option<Rule>,
    pub group: String,
    pub weight: u32,
    pub verification: Option<VerificationChannel>,
}

impl FieldSpec {
    pub fn required(name: &str, group: &str, weight: u32) -> Self {
        Self {
            name: name.to_string(),
            label: humanize(name),
            required: true,
            require_true: false,
            rule: None,
            group: group.to_string(),
            weight,
            verification: None,
        }
    }

    pub fn optional(name: &str, group: &str, weight: u32) -> Self {
        Self {
            required: false,
            ..Self::required(name, group, weight)
        }
    }

    pub fn labelled(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rule = Some(rule);
        self
    }

    pub fn verified_by(mut self, channel: VerificationChannel) -> Self {
        self.verification = Some(channel);
        self
    }

    pub fn must_be_true(mut self) -> Self {
        self.require_true = true;
        self
    }

    /// Whether the value alone satisfies the field, ignoring verification.
    pub fn is_filled(&self, snapshot: &FormSnapshot) -> bool {
        match snapshot.get(&self.name) {
            None => false,
            Some(FieldValue::Bool(flag)) if self.require_true => *flag,
            Some(value) => !value.is_blank(),
        }
    }

    /// Filled and, for verifiable fields, verified against the current value.
    pub fn is_complete(&self, snapshot: &FormSnapshot) -> bool {
        self.is_filled(snapshot)
            && (self.verification.is_none() || snapshot.is_verified(&self.name))
    }
}

/// One wizard page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpec {
    pub id: String,
    pub title: String,
    pub field_names: BTreeSet<String>,
}

impl PageSpec {
    pub fn new(id: &str, title: &str, fields: &[&str]) -> Self {
        Self {
            id: id.to_string(),
            title: title.to_string(),
            field_names: fields.iter().map(|field| field.to_string()).collect(),
        }
    }

    pub fn contains(&self, field: &str) -> bool {
        self.field_names.contains(field)
    }
}

/// Persisted form of a draft. Always replaced wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DraftEnvelope {
    pub snapshot: FormSnapshot,
    pub saved_at: DateTime<Utc>,
    pub version: u64,
}

/// Inline error attached to a field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

fn humanize(name: &str) -> String {
    let mut label = String::with_capacity(name.len() + 4);
    for (index, ch) in name.chars().enumerate() {
        if index == 0 {
            label.extend(ch.to_uppercase());
        } else if ch.is_uppercase() {
            label.push(' ');
            label.extend(ch.to_lowercase());
        } else if ch == '_' {
            label.push(' ');
        } else {
            label.push(ch);
        }
    }
    label
}
