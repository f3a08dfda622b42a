//! Observation records fed into the engine.
//!
//! An observation is one context + action + outcome record. Observations are
//! owned by the caller; the engine only reads them and keeps derived
//! statistics, never the records themselves.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::value::AttrValue;

/// Attribute key used by distance-aware templates.
pub const DISTANCE_ATTRIBUTE: &str = "distance";

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObservationId(uuid::Uuid);

impl ObservationId {
    /// Creates a new random observation ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ObservationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ObservationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What happened after the action was taken.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Outcome {
    pub success: bool,
    pub reward: f64,

    /// Named state changes caused by the action (e.g. `hp: -3.0`).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub state_deltas: BTreeMap<String, f64>,
}

impl Outcome {
    #[must_use]
    pub fn success(reward: f64) -> Self {
        Self {
            success: true,
            reward,
            state_deltas: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn failure(reward: f64) -> Self {
        Self {
            success: false,
            reward,
            state_deltas: BTreeMap::new(),
        }
    }

    /// Adds a state delta.
    #[must_use]
    pub fn with_delta(mut self, key: impl Into<String>, delta: f64) -> Self {
        self.state_deltas.insert(key.into(), delta);
        self
    }
}

/// One immutable observation record.
///
/// # Examples
///
/// ```
/// use rulebloom::{Observation, Outcome};
///
/// let obs = Observation::new("arena", "goblin", "strike", Outcome::success(1.0))
///     .with_instrument("sword")
///     .with_attribute("distance", 1.5);
///
/// assert_eq!(obs.instrument.as_deref(), Some("sword"));
/// assert_eq!(obs.distance(), Some(1.5));
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub id: ObservationId,

    /// Environment the observation happened in.
    pub context: String,

    /// The object acted upon.
    pub subject: String,

    #[serde(default)]
    pub attributes: BTreeMap<String, AttrValue>,

    pub action: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,

    pub outcome: Outcome,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    /// Creates an observation timestamped now.
    #[must_use]
    pub fn new(
        context: impl Into<String>,
        subject: impl Into<String>,
        action: impl Into<String>,
        outcome: Outcome,
    ) -> Self {
        Self {
            id: ObservationId::new(),
            context: context.into(),
            subject: subject.into(),
            attributes: BTreeMap::new(),
            action: action.into(),
            instrument: None,
            outcome,
            timestamp: Utc::now(),
        }
    }

    #[must_use]
    pub fn with_instrument(mut self, instrument: impl Into<String>) -> Self {
        self.instrument = Some(instrument.into());
        self
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn is_success(&self) -> bool {
        self.outcome.success
    }

    /// Returns the numeric `distance` attribute, if present.
    #[must_use]
    pub fn distance(&self) -> Option<f64> {
        self.attributes
            .get(DISTANCE_ATTRIBUTE)
            .and_then(AttrValue::as_number)
    }

    /// Returns the attribute value if it is numeric.
    #[must_use]
    pub fn numeric_attribute(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(AttrValue::as_number)
    }

    /// Behavioral signature used for homogeneity checks.
    #[must_use]
    pub fn signature(&self) -> (&str, &str, Option<&str>, bool) {
        (
            self.subject.as_str(),
            self.action.as_str(),
            self.instrument.as_deref(),
            self.outcome.success,
        )
    }
}

/// Coarse distance bands used by spatial templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DistanceBucket {
    Near,
    Medium,
    Far,
}

impl DistanceBucket {
    /// Lower bound of the near/medium boundary.
    pub const MEDIUM_FROM: f64 = 2.0;

    /// Lower bound of the medium/far boundary.
    pub const FAR_FROM: f64 = 5.0;

    /// Buckets a distance. Negative distances are treated as near.
    #[must_use]
    pub fn of(distance: f64) -> Self {
        if distance < Self::MEDIUM_FROM {
            Self::Near
        } else if distance < Self::FAR_FROM {
            Self::Medium
        } else {
            Self::Far
        }
    }

    /// Half-open `[min, max)` range covered by this bucket; `max` is `None` for far.
    #[must_use]
    pub const fn bounds(self) -> (f64, Option<f64>) {
        match self {
            Self::Near => (0.0, Some(Self::MEDIUM_FROM)),
            Self::Medium => (Self::MEDIUM_FROM, Some(Self::FAR_FROM)),
            Self::Far => (Self::FAR_FROM, None),
        }
    }
}

impl fmt::Display for DistanceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Near => write!(f, "near"),
            Self::Medium => write!(f, "medium"),
            Self::Far => write!(f, "far"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_observation_builder() {
        let obs = Observation::new("cave", "bat", "swat", Outcome::failure(-1.0))
            .with_instrument("club")
            .with_attribute("hp", 10i64);

        assert_eq!(obs.context, "cave");
        assert!(!obs.is_success());
        assert_eq!(obs.numeric_attribute("hp"), Some(10.0));
        assert_eq!(obs.distance(), None);
    }

    #[test]
    fn test_distance_bucket() {
        assert_eq!(DistanceBucket::of(0.5), DistanceBucket::Near);
        assert_eq!(DistanceBucket::of(2.0), DistanceBucket::Medium);
        assert_eq!(DistanceBucket::of(4.99), DistanceBucket::Medium);
        assert_eq!(DistanceBucket::of(12.0), DistanceBucket::Far);
        assert_eq!(DistanceBucket::Far.bounds(), (5.0, None));
    }

    #[test]
    fn test_signature() {
        let a = Observation::new("c", "s", "a", Outcome::success(1.0));
        let b = Observation::new("other", "s", "a", Outcome::success(0.0));
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn test_observation_ids_unique() {
        assert_ne!(ObservationId::new(), ObservationId::new());
    }
}
