//! Evidence-driven validation.
//!
//! Each live rule is matched against a batch of observations. Observations
//! whose every condition holds are *full* matches and have the rule's
//! predictions judged against them; observations that satisfy every
//! condition except a differing instrument are *weak* matches and only count
//! as lenient support.
//!
//! Confidence then moves toward the pass's success rate with weight
//! `min(applicable / 10, 0.5)`, so a handful of observations nudges it and a
//! large batch can move it at most halfway.
//!
//! Rules are updated one at a time and all-or-nothing: a rule that fails a
//! structural check is reported and left exactly as it was.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::condition::{Condition, Prediction};
use crate::confidence::{blend, WEAK_MATCH_SUCCESS_RATE};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, ValidationError};
use crate::generation::windowed_pairs;
use crate::observation::{Observation, ObservationId};
use crate::rule::{CandidateRule, RuleId, RuleStatus};
use crate::storage::{Partition, RuleStore};

/// How an observation relates to a rule's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchKind {
    /// Every condition holds.
    Full,
    /// Every condition holds except the instrument, which differs.
    Weak,
}

/// Matches a rule's conditions against one observation.
#[must_use]
pub fn match_kind(rule: &CandidateRule, obs: &Observation) -> Option<MatchKind> {
    let mut instrument_mismatch = false;
    for condition in &rule.conditions {
        if condition.matches(obs) {
            continue;
        }
        match condition {
            Condition::Instrument { .. } if obs.instrument.is_some() => instrument_mismatch = true,
            _ => return None,
        }
    }
    if instrument_mismatch {
        Some(MatchKind::Weak)
    } else {
        Some(MatchKind::Full)
    }
}

/// A batch of observations prepared for validation.
///
/// Sequence predictions are judged against the observation that follows the
/// matched one within the sequence window.
#[derive(Debug)]
pub struct ObservationWindow<'a> {
    observations: Vec<&'a Observation>,
    successors: HashMap<ObservationId, &'a Observation>,
}

impl<'a> ObservationWindow<'a> {
    #[must_use]
    pub fn new(observations: &[&'a Observation], sequence_window: Duration) -> Self {
        let successors = windowed_pairs(observations, sequence_window)
            .into_iter()
            .map(|(a, b)| (a.id, b))
            .collect();
        Self {
            observations: observations.to_vec(),
            successors,
        }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    fn judge(&self, prediction: &Prediction, obs: &Observation) -> Option<bool> {
        match prediction {
            Prediction::NextAction { action } => self
                .successors
                .get(&obs.id)
                .filter(|next| next.action == *action)
                .map(|next| next.outcome.success),
            other => other.judge(obs),
        }
    }
}

/// Per-rule result of matching a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuleTally {
    pub full_matches: usize,
    pub weak_matches: usize,
    pub correct: usize,
    pub incorrect: usize,
    pub support: Vec<ObservationId>,
    pub contradictions: Vec<ObservationId>,
}

impl RuleTally {
    /// Observations that carried any evidence: judged plus weak matches.
    pub fn applicable(&self) -> usize {
        self.correct + self.incorrect + self.weak_matches
    }

    /// Success rate of the pass, `None` if nothing was applicable.
    #[must_use]
    pub fn success_rate(&self) -> Option<f32> {
        let judged = self.correct + self.incorrect;
        if judged > 0 {
            #[allow(clippy::cast_precision_loss)]
            let rate = self.correct as f32 / judged as f32;
            Some(rate)
        } else if self.weak_matches > 0 {
            Some(WEAK_MATCH_SUCCESS_RATE)
        } else {
            None
        }
    }

    pub fn matched(&self) -> usize {
        self.full_matches + self.weak_matches
    }
}

/// Matches a rule against a prepared batch.
///
/// An observation is *predicted* when at least one prediction applies to it;
/// it is correct only when every applicable prediction holds.
///
/// # Errors
///
/// Returns the rule's structural defect, if any.
pub fn tally(rule: &CandidateRule, window: &ObservationWindow<'_>) -> Result<RuleTally, ValidationError> {
    rule.check_well_formed()?;

    let mut t = RuleTally::default();
    for obs in &window.observations {
        match match_kind(rule, obs) {
            None => {}
            Some(MatchKind::Weak) => t.weak_matches += 1,
            Some(MatchKind::Full) => {
                t.full_matches += 1;
                let mut verdict: Option<bool> = None;
                for prediction in &rule.predictions {
                    if let Some(held) = window.judge(prediction, obs) {
                        verdict = Some(verdict.unwrap_or(true) && held);
                    }
                }
                match verdict {
                    Some(true) => {
                        t.correct += 1;
                        t.support.push(obs.id);
                    }
                    Some(false) => {
                        t.incorrect += 1;
                        t.contradictions.push(obs.id);
                    }
                    None => {}
                }
            }
        }
    }
    Ok(t)
}

/// Summary of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub rules_checked: usize,
    pub rules_updated: usize,
    pub failures: usize,
    pub observations: usize,
    pub provisional: Vec<RuleId>,
    pub deprecated: Vec<RuleId>,

    /// Candidates promoted by the gate run that follows the pass.
    pub promoted: Vec<RuleId>,
}

/// Applies evidence from observation batches to stored rules.
#[derive(Debug, Clone, Copy)]
pub struct Validator {
    confidence_threshold: f32,
    evidence_limit: usize,
    sequence_window: Duration,
}

impl Validator {
    #[must_use]
    pub fn new(confidence_threshold: f32, evidence_limit: usize, sequence_window_secs: i64) -> Self {
        Self {
            confidence_threshold,
            evidence_limit,
            sequence_window: Duration::seconds(sequence_window_secs.max(0)),
        }
    }

    #[must_use]
    pub fn from_config(cfg: &EngineConfig) -> Self {
        Self::new(
            cfg.validation_confidence_threshold,
            cfg.evidence_id_limit,
            cfg.sequence_window_secs,
        )
    }

    #[must_use]
    pub fn window<'a>(&self, observations: &[&'a Observation]) -> ObservationWindow<'a> {
        ObservationWindow::new(observations, self.sequence_window)
    }

    /// Validates every live rule against a batch.
    ///
    /// Per-rule failures are logged and counted; the pass always completes.
    pub fn validate(
        &self,
        store: &mut RuleStore,
        observations: &[&Observation],
        now: DateTime<Utc>,
    ) -> ValidationReport {
        let window = self.window(observations);
        let ids: Vec<RuleId> = store.live().map(|r| r.id).collect();

        let mut report = ValidationReport {
            observations: window.len(),
            ..ValidationReport::default()
        };
        for id in ids {
            report.rules_checked += 1;
            match self.validate_rule(store, id, &window, now) {
                Ok(Some(change)) => {
                    report.rules_updated += 1;
                    match change {
                        StatusChange::Provisional => report.provisional.push(id),
                        StatusChange::Deprecated => report.deprecated.push(id),
                        StatusChange::None => {}
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(rule_id = %id, error = %e, "rule validation failed, left unchanged");
                }
            }
        }
        debug!(
            checked = report.rules_checked,
            updated = report.rules_updated,
            failures = report.failures,
            "validation pass complete"
        );
        report
    }

    /// Validates one rule. Returns `Ok(None)` when no observation matched.
    ///
    /// # Errors
    ///
    /// `RuleNotFound` for an unknown id, `Validation` for a malformed rule.
    /// In both cases the store is not modified.
    pub fn validate_rule(
        &self,
        store: &mut RuleStore,
        id: RuleId,
        window: &ObservationWindow<'_>,
        now: DateTime<Utc>,
    ) -> EngineResult<Option<StatusChange>> {
        let rule = store.get(id).ok_or(EngineError::RuleNotFound { id })?;
        let t = tally(rule, window)?;
        if t.matched() == 0 {
            return Ok(None);
        }

        let mut updated = rule.clone();
        if let Some(rate) = t.success_rate() {
            updated.confidence = blend(updated.confidence, rate, t.applicable());
        }
        updated.activate(t.matched() as u64, now);
        for obs_id in &t.support {
            updated.evidence.record_support(*obs_id, self.evidence_limit);
        }
        for obs_id in &t.contradictions {
            updated.evidence.record_contradiction(*obs_id, self.evidence_limit);
        }
        updated.evidence.weak_support_count += t.weak_matches as u64;
        updated.evidence.tests_run += t.applicable() as u64;
        updated.evidence.tests_passed += t.correct as u64;

        let change = self.status_change(&updated, store.partition_of(id));
        if change == StatusChange::Provisional {
            updated.status = RuleStatus::Provisional;
        } else if updated.status == RuleStatus::Provisional && updated.confidence < self.confidence_threshold {
            updated.status = RuleStatus::Pending;
        }

        if let Some(slot) = store.get_mut(id) {
            *slot = updated;
        }
        store.touch(id, now);
        if change == StatusChange::Deprecated {
            store.deprecate(id);
        }
        Ok(Some(change))
    }

    fn status_change(&self, rule: &CandidateRule, partition: Option<Partition>) -> StatusChange {
        let confirmed = rule.confidence >= self.confidence_threshold;
        match (partition, rule.status) {
            (Some(Partition::Validated), _) if !confirmed => StatusChange::Deprecated,
            (Some(Partition::Candidate), RuleStatus::Pending | RuleStatus::Deprecated) if confirmed => {
                StatusChange::Provisional
            }
            _ => StatusChange::None,
        }
    }
}

/// Status transition caused by a validation update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    None,
    /// Candidate reached the validation threshold.
    Provisional,
    /// Validated rule fell below it and returned to the candidate partition.
    Deprecated,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::confidence::ConfidenceTier;
    use crate::observation::Outcome;
    use crate::rule::RuleType;
    use crate::storage::StoreLimits;

    fn validator() -> Validator {
        Validator::new(0.7, 64, 30)
    }

    fn causal(instrument: Option<&str>) -> CandidateRule {
        let mut conditions = vec![Condition::subject("A"), Condition::action("strike")];
        if let Some(i) = instrument {
            conditions.push(Condition::instrument(i));
        }
        CandidateRule::draft(
            RuleType::Causal,
            conditions,
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        )
    }

    fn batch(successes: usize, failures: usize) -> Vec<Observation> {
        let mut out: Vec<Observation> = (0..successes)
            .map(|_| Observation::new("arena", "A", "strike", Outcome::success(1.0)))
            .collect();
        out.extend((0..failures).map(|_| Observation::new("arena", "A", "strike", Outcome::failure(0.0))));
        out
    }

    #[test]
    fn test_blend_toward_success_rate() {
        let mut store = RuleStore::default();
        let id = store.insert(causal(None), Utc::now()).rule_id();
        let obs = batch(9, 1);
        let refs: Vec<&Observation> = obs.iter().collect();

        let report = validator().validate(&mut store, &refs, Utc::now());
        assert_eq!(report.rules_updated, 1);

        let rule = store.get(id).unwrap();
        assert!((rule.confidence - 0.75).abs() < 1e-6);
        assert_eq!(rule.activation_count, 10);
        assert_eq!(rule.evidence.support_count, 9);
        assert_eq!(rule.evidence.contradiction_count, 1);
        assert_eq!(rule.evidence.tests_run, 10);
        assert_eq!(rule.evidence.tests_passed, 9);
        assert_eq!(rule.status, RuleStatus::Provisional);
    }

    #[test]
    fn test_weak_matches_use_fallback_rate() {
        let mut store = RuleStore::default();
        let id = store.insert(causal(Some("sword")), Utc::now()).rule_id();
        let obs: Vec<Observation> = (0..2)
            .map(|_| Observation::new("arena", "A", "strike", Outcome::success(1.0)).with_instrument("axe"))
            .collect();
        let refs: Vec<&Observation> = obs.iter().collect();
        validator().validate(&mut store, &refs, Utc::now());

        let rule = store.get(id).unwrap();
        // w = 0.2, rate 0.4: 0.6 * 0.8 + 0.4 * 0.2
        assert!((rule.confidence - 0.56).abs() < 1e-6);
        assert_eq!(rule.evidence.weak_support_count, 2);
        assert_eq!(rule.evidence.support_count, 0);
        assert_eq!(rule.activation_count, 2);
    }

    #[test]
    fn test_missing_instrument_is_not_a_weak_match() {
        let rule = causal(Some("sword"));
        let bare = Observation::new("arena", "A", "strike", Outcome::success(1.0));
        assert_eq!(match_kind(&rule, &bare), None);
        let other = bare.clone().with_instrument("axe");
        assert_eq!(match_kind(&rule, &other), Some(MatchKind::Weak));
    }

    #[test]
    fn test_unmatched_rule_is_untouched() {
        let mut store = RuleStore::default();
        let id = store.insert(causal(None), Utc::now()).rule_id();
        let before = store.get(id).unwrap().clone();
        let other = Observation::new("arena", "B", "strike", Outcome::success(1.0));
        let report = validator().validate(&mut store, &[&other], Utc::now());
        assert_eq!(report.rules_updated, 0);
        assert_eq!(store.get(id).unwrap(), &before);
    }

    #[test]
    fn test_malformed_rule_is_isolated() {
        let mut store = RuleStore::default();
        let good = store.insert(causal(None), Utc::now()).rule_id();
        let mut bad = causal(None);
        bad.conditions.push(Condition::attribute(
            "hp",
            crate::condition::AttributeTest::Below { threshold: f64::INFINITY },
        ));
        bad.refresh_derived();
        let bad = store.insert(bad, Utc::now()).rule_id();
        let before = store.get(bad).unwrap().clone();

        let obs = batch(3, 0);
        let refs: Vec<&Observation> = obs.iter().collect();
        let report = validator().validate(&mut store, &refs, Utc::now());

        assert_eq!(report.failures, 1);
        assert_eq!(store.get(bad).unwrap(), &before);
        assert_eq!(store.get(good).unwrap().activation_count, 3);
    }

    #[test]
    fn test_validated_rule_below_threshold_is_deprecated() {
        let mut store = RuleStore::new(StoreLimits::default());
        let id = store.insert(causal(None).with_confidence(0.72), Utc::now()).rule_id();
        store.promote(id);

        let obs = batch(0, 10);
        let refs: Vec<&Observation> = obs.iter().collect();
        let report = validator().validate(&mut store, &refs, Utc::now());

        assert_eq!(report.deprecated, vec![id]);
        assert_eq!(store.partition_of(id), Some(Partition::Candidate));
        assert_eq!(store.get(id).unwrap().status, RuleStatus::Deprecated);
    }

    #[test]
    fn test_next_action_judged_on_successor() {
        let t0 = Utc::now();
        let rule = CandidateRule::draft(
            RuleType::Sequential,
            vec![Condition::action("feint")],
            vec![Prediction::NextAction { action: "strike".into() }],
            ConfidenceTier::Grouped,
        );
        let obs = [
            Observation::new("den", "bear", "feint", Outcome::success(0.0)).at(t0),
            Observation::new("den", "bear", "strike", Outcome::success(1.0)).at(t0 + Duration::seconds(2)),
            Observation::new("den", "bear", "feint", Outcome::success(0.0)).at(t0 + Duration::seconds(4)),
            Observation::new("den", "bear", "strike", Outcome::failure(0.0)).at(t0 + Duration::seconds(6)),
            Observation::new("den", "bear", "feint", Outcome::success(0.0)).at(t0 + Duration::seconds(8)),
        ];
        let refs: Vec<&Observation> = obs.iter().collect();
        let window = validator().window(&refs);
        let t = tally(&rule, &window).unwrap();

        assert_eq!(t.full_matches, 3);
        assert_eq!(t.correct, 1);
        assert_eq!(t.incorrect, 1);
        assert_eq!(t.support, vec![obs[0].id]);
    }
}
