//! Candidate rules, the unit of learned knowledge.
//!
//! A rule links a set of conditions to predicted consequences and carries a
//! confidence, auxiliary scores, an evidence block and lifecycle metadata.
//! Rules live in exactly one partition of the [`RuleStore`](crate::RuleStore)
//! at a time.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, Prediction};
use crate::confidence::{clamp_unit, ConfidenceTier};
use crate::error::ValidationError;
use crate::fingerprint::Fingerprint;
use crate::observation::ObservationId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(uuid::Uuid);

impl RuleId {
    /// Creates a new random rule ID.
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Template family a rule was drafted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    Causal,
    Conditional,
    Sequential,
    Spatial,
    Associative,
    Exclusion,
    Optimization,
    InstrumentEffectiveness,
}

impl RuleType {
    /// Stable tag used in fingerprints.
    #[must_use]
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Causal => "causal",
            Self::Conditional => "conditional",
            Self::Sequential => "sequential",
            Self::Spatial => "spatial",
            Self::Associative => "associative",
            Self::Exclusion => "exclusion",
            Self::Optimization => "optimization",
            Self::InstrumentEffectiveness => "instrument_effectiveness",
        }
    }
}

impl fmt::Display for RuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.tag())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleStatus {
    Pending,
    Provisional,
    Validated,
    Deprecated,
    Pruned,
}

impl Default for RuleStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Provisional => write!(f, "provisional"),
            Self::Validated => write!(f, "validated"),
            Self::Deprecated => write!(f, "deprecated"),
            Self::Pruned => write!(f, "pruned"),
        }
    }
}

/// Evidence gathered for and against a rule.
///
/// Id lists are bounded; the counters are exact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub support_ids: Vec<ObservationId>,
    pub contradiction_ids: Vec<ObservationId>,
    pub support_count: u64,
    pub contradiction_count: u64,

    /// Lenient matches (action/context agree, instrument differs).
    #[serde(default)]
    pub weak_support_count: u64,

    pub tests_run: u64,
    pub tests_passed: u64,
}

impl Evidence {
    fn push_bounded(ids: &mut Vec<ObservationId>, id: ObservationId, limit: usize) {
        if ids.contains(&id) {
            return;
        }
        if ids.len() >= limit {
            ids.remove(0);
        }
        if limit > 0 {
            ids.push(id);
        }
    }

    pub fn record_support(&mut self, id: ObservationId, limit: usize) {
        Self::push_bounded(&mut self.support_ids, id, limit);
        self.support_count = self.support_count.saturating_add(1);
    }

    pub fn record_contradiction(&mut self, id: ObservationId, limit: usize) {
        Self::push_bounded(&mut self.contradiction_ids, id, limit);
        self.contradiction_count = self.contradiction_count.saturating_add(1);
    }

    /// `contradictions / (supports + contradictions)`, 0 with no evidence.
    #[must_use]
    pub fn contradiction_ratio(&self) -> f32 {
        let total = self.support_count.saturating_add(self.contradiction_count);
        if total == 0 {
            return 0.0;
        }
        #[allow(clippy::cast_precision_loss)]
        let ratio = self.contradiction_count as f32 / total as f32;
        ratio
    }

    /// `supports / (supports + contradictions)`, 0.5 with no evidence.
    #[must_use]
    pub fn support_ratio(&self) -> f32 {
        if self.support_count.saturating_add(self.contradiction_count) == 0 {
            0.5
        } else {
            1.0 - self.contradiction_ratio()
        }
    }

    /// Unions another evidence block into this one.
    ///
    /// Counters add up for ids that are new to this block; shared ids are
    /// not double counted.
    pub fn absorb(&mut self, other: &Self, limit: usize) {
        let new_support = other
            .support_ids
            .iter()
            .filter(|id| !self.support_ids.contains(id))
            .count() as u64;
        let new_contra = other
            .contradiction_ids
            .iter()
            .filter(|id| !self.contradiction_ids.contains(id))
            .count() as u64;
        let untracked_support = other
            .support_count
            .saturating_sub(other.support_ids.len() as u64);
        let untracked_contra = other
            .contradiction_count
            .saturating_sub(other.contradiction_ids.len() as u64);

        for id in &other.support_ids {
            Self::push_bounded(&mut self.support_ids, *id, limit);
        }
        for id in &other.contradiction_ids {
            Self::push_bounded(&mut self.contradiction_ids, *id, limit);
        }
        self.support_count = self
            .support_count
            .saturating_add(new_support + untracked_support);
        self.contradiction_count = self
            .contradiction_count
            .saturating_add(new_contra + untracked_contra);
        self.weak_support_count = self.weak_support_count.saturating_add(other.weak_support_count);
        self.tests_run = self.tests_run.saturating_add(other.tests_run);
        self.tests_passed = self.tests_passed.saturating_add(other.tests_passed);
    }
}

/// Auxiliary scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RuleScores {
    pub strength: f32,
    pub generalization: f32,
    pub specificity: f32,
}

impl Default for RuleScores {
    fn default() -> Self {
        Self {
            strength: 0.5,
            generalization: 0.5,
            specificity: 0.5,
        }
    }
}

/// A learned hypothesis.
///
/// # Examples
///
/// ```
/// use rulebloom::{CandidateRule, Condition, ConfidenceTier, Prediction, RuleType};
///
/// let rule = CandidateRule::draft(
///     RuleType::Causal,
///     vec![Condition::subject("goblin"), Condition::action("strike")],
///     vec![Prediction::Outcome { success: true }],
///     ConfidenceTier::Grouped,
/// );
///
/// assert_eq!(rule.complexity, 3);
/// assert!((rule.confidence - 0.6).abs() < f32::EPSILON);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateRule {
    pub id: RuleId,
    pub rule_type: RuleType,
    pub conditions: Vec<Condition>,
    pub predictions: Vec<Prediction>,

    /// Human-readable rendering of the rule, kept for token-overlap scoring.
    pub pattern: String,

    pub confidence: f32,
    pub scores: RuleScores,
    pub evidence: Evidence,

    /// Number of condition and prediction terms.
    pub complexity: usize,

    pub birth_time: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activation: Option<DateTime<Utc>>,

    pub activation_count: u64,
    pub status: RuleStatus,
}

impl CandidateRule {
    /// Creates a pending draft with tier-derived confidence and scores.
    ///
    /// Conditions with the same key are collapsed (last one wins) so every
    /// key appears at most once.
    #[must_use]
    pub fn draft(
        rule_type: RuleType,
        conditions: Vec<Condition>,
        predictions: Vec<Prediction>,
        tier: ConfidenceTier,
    ) -> Self {
        let conditions = dedupe_conditions(conditions);
        let complexity = conditions.len() + predictions.len();
        #[allow(clippy::cast_precision_loss)]
        let specificity = clamp_unit(conditions.len() as f32 / 5.0);
        let pattern = render_pattern(&conditions, &predictions);
        Self {
            id: RuleId::new(),
            rule_type,
            conditions,
            predictions,
            pattern,
            confidence: tier.initial_confidence(),
            scores: RuleScores {
                strength: 0.5,
                generalization: tier.generalization(),
                specificity,
            },
            evidence: Evidence::default(),
            complexity,
            birth_time: Utc::now(),
            last_activation: None,
            activation_count: 0,
            status: RuleStatus::Pending,
        }
    }

    #[must_use]
    pub fn with_strength(mut self, strength: f32) -> Self {
        self.scores.strength = clamp_unit(strength);
        self
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = clamp_unit(confidence);
        self
    }

    #[must_use]
    pub fn born_at(mut self, at: DateTime<Utc>) -> Self {
        self.birth_time = at;
        self
    }

    /// Seeds evidence from the observations that produced the draft.
    #[must_use]
    pub fn with_evidence(
        mut self,
        supports: impl IntoIterator<Item = ObservationId>,
        contradictions: impl IntoIterator<Item = ObservationId>,
        limit: usize,
    ) -> Self {
        for id in supports {
            self.evidence.record_support(id, limit);
        }
        for id in contradictions {
            self.evidence.record_contradiction(id, limit);
        }
        self
    }

    /// Content fingerprint (excludes id, timestamps and statistics).
    #[must_use]
    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(self)
    }

    /// Replaces this rule's content with another rule's content.
    pub(crate) fn adopt_content(&mut self, other: &Self) {
        self.rule_type = other.rule_type;
        self.conditions = other.conditions.clone();
        self.predictions = other.predictions.clone();
        self.pattern = other.pattern.clone();
        self.complexity = other.complexity;
    }

    /// Re-renders `pattern` and `complexity` from the current content.
    pub fn refresh_derived(&mut self) {
        self.conditions = dedupe_conditions(std::mem::take(&mut self.conditions));
        self.complexity = self.conditions.len() + self.predictions.len();
        self.pattern = render_pattern(&self.conditions, &self.predictions);
    }

    /// Checks that the rule can be matched and judged at all.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] describing the first structural defect.
    pub fn check_well_formed(&self) -> Result<(), ValidationError> {
        if !self.confidence.is_finite() {
            return Err(ValidationError::NonFiniteConfidence { rule_id: self.id });
        }
        if self.conditions.is_empty() {
            return Err(ValidationError::EmptyConditions { rule_id: self.id });
        }
        if self.predictions.is_empty() {
            return Err(ValidationError::EmptyPredictions { rule_id: self.id });
        }
        for cond in &self.conditions {
            if let Condition::Attribute { key, test } = cond {
                if !test.is_finite() {
                    return Err(ValidationError::NonFiniteThreshold {
                        rule_id: self.id,
                        key: key.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Overall usefulness of the rule in `[0, 1]`.
    ///
    /// Weighted sum of confidence (0.35), strength (0.15), generalization
    /// (0.15), evidence support ratio (0.15), activation (0.10, saturating at
    /// ten activations) and simplicity (0.10).
    #[must_use]
    pub fn quality(&self) -> f32 {
        #[allow(clippy::cast_precision_loss)]
        let activation = (self.activation_count as f32 / 10.0).min(1.0);
        #[allow(clippy::cast_precision_loss)]
        let simplicity = 1.0 / (1.0 + self.complexity.saturating_sub(1) as f32 * 0.25);
        clamp_unit(
            0.35 * clamp_unit(self.confidence)
                + 0.15 * clamp_unit(self.scores.strength)
                + 0.15 * clamp_unit(self.scores.generalization)
                + 0.15 * self.evidence.support_ratio()
                + 0.10 * activation
                + 0.10 * simplicity,
        )
    }

    pub fn contradiction_ratio(&self) -> f32 {
        self.evidence.contradiction_ratio()
    }

    pub fn is_validated(&self) -> bool {
        self.status == RuleStatus::Validated
    }

    /// Age of the rule at `now`, in whole seconds (never negative).
    #[must_use]
    pub fn age_secs(&self, now: DateTime<Utc>) -> i64 {
        (now - self.birth_time).num_seconds().max(0)
    }

    /// Records `count` activations at `at`.
    pub fn activate(&mut self, count: u64, at: DateTime<Utc>) {
        if count == 0 {
            return;
        }
        self.activation_count = self.activation_count.saturating_add(count);
        self.last_activation = Some(at);
    }
}

impl fmt::Display for CandidateRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} (confidence {:.2}, {})",
            self.rule_type, self.pattern, self.confidence, self.status
        )
    }
}

fn dedupe_conditions(conditions: Vec<Condition>) -> Vec<Condition> {
    let mut out: Vec<Condition> = Vec::with_capacity(conditions.len());
    for cond in conditions {
        let key = cond.key();
        if let Some(slot) = out.iter_mut().find(|c| c.key() == key) {
            *slot = cond;
        } else {
            out.push(cond);
        }
    }
    out
}

fn render_pattern(conditions: &[Condition], predictions: &[Prediction]) -> String {
    let lhs: Vec<String> = conditions.iter().map(ToString::to_string).collect();
    let rhs: Vec<String> = predictions.iter().map(ToString::to_string).collect();
    format!("{} => {}", lhs.join(" "), rhs.join(" "))
}
