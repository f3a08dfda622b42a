//! Conditions and predictions that make up a rule.
//!
//! A rule reads "under these conditions, expect this outcome". Conditions are
//! a tagged union with one variant per observation dimension, so matching is
//! exhaustive and there are no stringly-typed keys to misspell. Each
//! condition and prediction also exposes a `(key, value)` view that is used
//! for fingerprinting and similarity scoring.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observation::{DistanceBucket, Observation, DISTANCE_ATTRIBUTE};
use crate::value::AttrValue;

/// Test applied to a single observation attribute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum AttributeTest {
    /// Attribute equals a value.
    Equals { value: AttrValue },

    /// Numeric attribute is at least the threshold.
    AtLeast { threshold: f64 },

    /// Numeric attribute is strictly below the threshold.
    Below { threshold: f64 },

    /// Numeric attribute falls in `[min, max)`; open-ended when `max` is `None`.
    Between { min: f64, max: Option<f64> },
}

impl AttributeTest {
    /// Range test covering a distance bucket.
    #[must_use]
    pub const fn bucket(bucket: DistanceBucket) -> Self {
        let (min, max) = bucket.bounds();
        Self::Between { min, max }
    }

    /// Returns true if the value passes this test.
    #[must_use]
    pub fn accepts(&self, value: &AttrValue) -> bool {
        match self {
            Self::Equals { value: expected } => expected.loosely_equals(value),
            Self::AtLeast { threshold } => value.as_number().is_some_and(|v| v >= *threshold),
            Self::Below { threshold } => value.as_number().is_some_and(|v| v < *threshold),
            Self::Between { min, max } => value
                .as_number()
                .is_some_and(|v| v >= *min && max.map_or(true, |m| v < m)),
        }
    }

    /// Returns true if every numeric bound is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        match self {
            Self::Equals { .. } => true,
            Self::AtLeast { threshold } | Self::Below { threshold } => threshold.is_finite(),
            Self::Between { min, max } => min.is_finite() && max.map_or(true, f64::is_finite),
        }
    }

    fn canonical(&self) -> String {
        match self {
            Self::Equals { value } => format!("=={}", value.canonical()),
            Self::AtLeast { threshold } => format!(">={threshold:.3}"),
            Self::Below { threshold } => format!("<{threshold:.3}"),
            Self::Between { min, max: Some(max) } => format!("[{min:.3},{max:.3})"),
            Self::Between { min, max: None } => format!("[{min:.3},inf)"),
        }
    }
}

/// Dimension tag for a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Context,
    Subject,
    Attribute,
    Action,
    Instrument,
}

/// One condition of a rule, tagged by the dimension it constrains.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "dimension", rename_all = "snake_case")]
pub enum Condition {
    Context { value: String },
    Subject { value: String },
    Attribute { key: String, test: AttributeTest },
    Action { value: String },
    Instrument { value: String },
}

impl Condition {
    #[must_use]
    pub fn context(value: impl Into<String>) -> Self {
        Self::Context { value: value.into() }
    }

    #[must_use]
    pub fn subject(value: impl Into<String>) -> Self {
        Self::Subject { value: value.into() }
    }

    #[must_use]
    pub fn action(value: impl Into<String>) -> Self {
        Self::Action { value: value.into() }
    }

    #[must_use]
    pub fn instrument(value: impl Into<String>) -> Self {
        Self::Instrument { value: value.into() }
    }

    #[must_use]
    pub fn attribute(key: impl Into<String>, test: AttributeTest) -> Self {
        Self::Attribute {
            key: key.into(),
            test,
        }
    }

    /// Distance-bucket condition on the `distance` attribute.
    #[must_use]
    pub fn distance(bucket: DistanceBucket) -> Self {
        Self::attribute(DISTANCE_ATTRIBUTE, AttributeTest::bucket(bucket))
    }

    pub const fn dimension(&self) -> Dimension {
        match self {
            Self::Context { .. } => Dimension::Context,
            Self::Subject { .. } => Dimension::Subject,
            Self::Attribute { .. } => Dimension::Attribute,
            Self::Action { .. } => Dimension::Action,
            Self::Instrument { .. } => Dimension::Instrument,
        }
    }

    /// Similarity/fingerprint key. Attributes are keyed per attribute name.
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Context { .. } => "context".to_string(),
            Self::Subject { .. } => "subject".to_string(),
            Self::Action { .. } => "action".to_string(),
            Self::Instrument { .. } => "instrument".to_string(),
            Self::Attribute { key, .. } => format!("attr:{}", key.trim().to_ascii_lowercase()),
        }
    }

    /// Canonical value text for fingerprints and similarity scoring.
    #[must_use]
    pub fn canonical_value(&self) -> String {
        match self {
            Self::Context { value }
            | Self::Subject { value }
            | Self::Action { value }
            | Self::Instrument { value } => value.trim().to_ascii_lowercase(),
            Self::Attribute { test, .. } => test.canonical(),
        }
    }

    /// Returns true if the observation satisfies this condition.
    #[must_use]
    pub fn matches(&self, obs: &Observation) -> bool {
        match self {
            Self::Context { value } => obs.context == *value,
            Self::Subject { value } => obs.subject == *value,
            Self::Action { value } => obs.action == *value,
            Self::Instrument { value } => obs.instrument.as_deref() == Some(value.as_str()),
            Self::Attribute { key, test } => obs.attributes.get(key).is_some_and(|v| test.accepts(v)),
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.canonical_value())
    }
}

/// Effectiveness band of an instrument against a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Effectiveness {
    High,
    Medium,
    Low,
    Ineffective,
}

impl Effectiveness {
    /// Maps an effectiveness score in `[0, 1]` onto its fixed band.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.75 {
            Self::High
        } else if score >= 0.5 {
            Self::Medium
        } else if score >= 0.25 {
            Self::Low
        } else {
            Self::Ineffective
        }
    }

    /// Whether using the instrument is expected to succeed.
    pub const fn expects_success(self) -> bool {
        matches!(self, Self::High | Self::Medium)
    }
}

impl fmt::Display for Effectiveness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::Ineffective => write!(f, "ineffective"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaDirection {
    Increase,
    Decrease,
}

impl DeltaDirection {
    #[must_use]
    pub fn of(delta: f64) -> Option<Self> {
        if delta > 0.0 {
            Some(Self::Increase)
        } else if delta < 0.0 {
            Some(Self::Decrease)
        } else {
            None
        }
    }
}

impl fmt::Display for DeltaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Increase => write!(f, "increase"),
            Self::Decrease => write!(f, "decrease"),
        }
    }
}

/// One predicted consequence of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prediction {
    /// The action succeeds (or fails).
    Outcome { success: bool },

    /// Taking this action is expected to succeed.
    RecommendedAction { action: String },

    /// `preferred` yields more reward than `over` in the same context.
    PreferredAction { preferred: String, over: String },

    /// After the conditioned action, this action follows successfully.
    NextAction { action: String },

    /// Instrument effectiveness band.
    Effectiveness { category: Effectiveness },

    /// A named state changes in the given direction.
    StateDelta { key: String, direction: DeltaDirection },
}

impl Prediction {
    #[must_use]
    pub fn key(&self) -> String {
        match self {
            Self::Outcome { .. } => "outcome".to_string(),
            Self::RecommendedAction { .. } => "recommended_action".to_string(),
            Self::PreferredAction { .. } => "preferred_action".to_string(),
            Self::NextAction { .. } => "next_action".to_string(),
            Self::Effectiveness { .. } => "effectiveness".to_string(),
            Self::StateDelta { key, .. } => format!("delta:{}", key.trim().to_ascii_lowercase()),
        }
    }

    #[must_use]
    pub fn canonical_value(&self) -> String {
        match self {
            Self::Outcome { success: true } => "success".to_string(),
            Self::Outcome { success: false } => "failure".to_string(),
            Self::RecommendedAction { action } | Self::NextAction { action } => {
                action.trim().to_ascii_lowercase()
            }
            Self::PreferredAction { preferred, over } => format!(
                "{}>{}",
                preferred.trim().to_ascii_lowercase(),
                over.trim().to_ascii_lowercase()
            ),
            Self::Effectiveness { category } => category.to_string(),
            Self::StateDelta { direction, .. } => direction.to_string(),
        }
    }

    /// Judges a single observation against this prediction.
    ///
    /// Returns `None` when the observation says nothing about the prediction
    /// (different action, missing state key), otherwise whether it held.
    /// `NextAction` needs a pair of observations and is judged by the validator.
    #[must_use]
    pub fn judge(&self, obs: &Observation) -> Option<bool> {
        match self {
            Self::Outcome { success } => Some(obs.outcome.success == *success),
            Self::RecommendedAction { action } => {
                (obs.action == *action).then_some(obs.outcome.success)
            }
            Self::PreferredAction { preferred, .. } => {
                (obs.action == *preferred).then_some(obs.outcome.success)
            }
            Self::NextAction { .. } => None,
            Self::Effectiveness { category } => {
                Some(obs.outcome.success == category.expects_success())
            }
            Self::StateDelta { key, direction } => obs
                .outcome
                .state_deltas
                .get(key)
                .map(|d| DeltaDirection::of(*d) == Some(*direction)),
        }
    }
}

impl fmt::Display for Prediction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key(), self.canonical_value())
    }
}

/// Partial situation used to look up applicable rules.
///
/// Dimensions left unset do not constrain the lookup: a rule conditioned on
/// an action still applies when the caller has not chosen an action yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryContext {
    pub context: Option<String>,
    pub subject: Option<String>,
    pub action: Option<String>,
    pub instrument: Option<String>,
    pub attributes: std::collections::BTreeMap<String, AttrValue>,
}

impl QueryContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn context(mut self, value: impl Into<String>) -> Self {
        self.context = Some(value.into());
        self
    }

    #[must_use]
    pub fn subject(mut self, value: impl Into<String>) -> Self {
        self.subject = Some(value.into());
        self
    }

    #[must_use]
    pub fn action(mut self, value: impl Into<String>) -> Self {
        self.action = Some(value.into());
        self
    }

    #[must_use]
    pub fn instrument(mut self, value: impl Into<String>) -> Self {
        self.instrument = Some(value.into());
        self
    }

    #[must_use]
    pub fn attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Returns true unless the query contradicts the condition.
    #[must_use]
    pub fn admits(&self, condition: &Condition) -> bool {
        fn open(slot: Option<&String>, value: &str) -> bool {
            slot.map_or(true, |s| s == value)
        }
        match condition {
            Condition::Context { value } => open(self.context.as_ref(), value),
            Condition::Subject { value } => open(self.subject.as_ref(), value),
            Condition::Action { value } => open(self.action.as_ref(), value),
            Condition::Instrument { value } => open(self.instrument.as_ref(), value),
            Condition::Attribute { key, test } => {
                self.attributes.get(key).map_or(true, |v| test.accepts(v))
            }
        }
    }
}
