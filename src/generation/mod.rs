//! Hypothesis generation ("blooming").
//!
//! Every pattern group, and independently every single observation, is
//! expanded into rule drafts across several template families:
//!
//! - causal: dimensions → outcome, one draft per outcome direction
//! - exclusion: subject+action pairs that always failed
//! - conditional: best numeric attribute split → recommended action
//! - optimization: mean-reward comparisons between actions in one context
//! - sequential: successful action pairs close in time
//! - spatial: distance-bucketed comparisons and outcomes
//! - instrument effectiveness: instrument × target banding
//! - associative: categorical attributes shared by a whole outcome class
//!
//! Drafts are deliberately not deduplicated here; the merge index collapses
//! them on insertion. Templates that need a dimension an observation lacks
//! skip that observation without error.

mod associative;
mod causal;
mod conditional;
mod instrument;
mod optimization;
mod sequential;
mod spatial;

use chrono::Duration;
use tracing::{debug, warn};

use crate::grouping::{GroupedBatch, PatternKind};
use crate::observation::{Observation, ObservationId};
use crate::rule::CandidateRule;

pub use conditional::{best_split, Split};
pub use instrument::effectiveness_score;
pub(crate) use sequential::windowed_pairs;

/// Drafts produced by one bloom, plus how many template applications were skipped.
#[derive(Debug, Default)]
pub struct GenerationOutput {
    pub drafts: Vec<CandidateRule>,
    pub template_skips: usize,
}

impl GenerationOutput {
    fn extend(&mut self, drafts: impl IntoIterator<Item = CandidateRule>) {
        self.drafts.extend(drafts);
    }

    fn skip(&mut self) {
        self.template_skips += 1;
    }
}

/// Settings shared by every template.
#[derive(Debug, Clone, Copy)]
pub struct TemplateSettings {
    pub min_group_size: usize,
    pub sequence_window: Duration,
    pub evidence_limit: usize,
}

/// Expands grouped observations into rule drafts.
#[derive(Debug, Clone, Copy)]
pub struct HypothesisGenerator {
    settings: TemplateSettings,
}

impl HypothesisGenerator {
    #[must_use]
    pub fn new(min_group_size: usize, sequence_window_secs: i64, evidence_limit: usize) -> Self {
        Self {
            settings: TemplateSettings {
                min_group_size: min_group_size.max(1),
                sequence_window: Duration::seconds(sequence_window_secs.max(0)),
                evidence_limit,
            },
        }
    }

    #[must_use]
    pub const fn settings(&self) -> TemplateSettings {
        self.settings
    }

    /// Runs every template over the grouped batch.
    #[must_use]
    pub fn generate(&self, batch: &GroupedBatch<'_>) -> GenerationOutput {
        let mut out = GenerationOutput::default();
        let s = &self.settings;

        for (key, group) in &batch.groups {
            match (key.kind, key.values.as_slice()) {
                (PatternKind::SubjectAction, [subject, action]) => {
                    out.extend(causal::subject_action(subject, action, group, s));
                    out.extend(causal::exclusion(subject, action, group, s));
                    conditional::generate(subject, action, group, s, &mut out);
                }
                (PatternKind::ActionInstrument, [action, instrument]) => {
                    out.extend(causal::action_instrument(action, instrument, group, s));
                }
                (PatternKind::InstrumentTarget, [instrument, subject]) => {
                    out.extend(instrument::generate(instrument, subject, group, s));
                }
                (PatternKind::OutcomeClass, [class]) => {
                    out.extend(associative::generate(class == "success", group, s));
                }
                (PatternKind::DistanceActionInstrument, values) => {
                    out.extend(spatial::bucket_outcomes(values, group, s));
                }
                (PatternKind::Context, [context]) => {
                    out.extend(optimization::generate(context, group, s));
                    spatial::compare_actions(context, group, s, &mut out);
                }
                _ => {
                    warn!(key = %key, "malformed pattern key, group skipped");
                    out.skip();
                }
            }
        }

        out.extend(sequential::generate(&batch.observations, s));

        for obs in &batch.observations {
            out.drafts.push(causal::single_observation(obs, s));
        }

        debug!(
            groups = batch.groups.len(),
            drafts = out.drafts.len(),
            skips = out.template_skips,
            "bloom generated drafts"
        );
        out
    }
}

/// Splits a group by outcome.
fn split_by_outcome<'a>(group: &[&'a Observation]) -> (Vec<&'a Observation>, Vec<&'a Observation>) {
    group.iter().copied().partition(|o| o.outcome.success)
}

fn ids(obs: &[&Observation]) -> Vec<ObservationId> {
    obs.iter().map(|o| o.id).collect()
}

#[allow(clippy::cast_precision_loss)]
fn share(part: usize, whole: usize) -> f32 {
    if whole == 0 {
        0.0
    } else {
        part as f32 / whole as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Prediction};
    use crate::grouping::{ObservationGrouper, PatternKey};
    use crate::observation::Outcome;
    use crate::rule::RuleType;

    fn scenario_batch() -> Vec<Observation> {
        let mut batch: Vec<Observation> = (0..4)
            .map(|_| Observation::new("arena", "A", "strike", Outcome::success(1.0)))
            .collect();
        batch.push(Observation::new("arena", "A", "strike", Outcome::failure(0.0)));
        batch
    }

    #[test]
    fn test_generate_yields_grouped_causal_rule() {
        let batch = scenario_batch();
        let refs: Vec<&Observation> = batch.iter().collect();
        let grouped = ObservationGrouper::new(200, 1, 1).group(&refs);
        let out = HypothesisGenerator::new(1, 30, 64).generate(&grouped);

        let rule = out
            .drafts
            .iter()
            .find(|r| {
                r.rule_type == RuleType::Causal
                    && r.conditions == vec![Condition::subject("A"), Condition::action("strike")]
                    && r.predictions == vec![Prediction::Outcome { success: true }]
            })
            .expect("grouped causal draft");
        assert!((rule.confidence - 0.6).abs() < f32::EPSILON);
        assert_eq!(rule.evidence.support_count, 4);
        assert_eq!(rule.evidence.contradiction_count, 1);

        let minority = out
            .drafts
            .iter()
            .find(|r| {
                r.rule_type == RuleType::Causal
                    && r.conditions.len() == 2
                    && r.predictions == vec![Prediction::Outcome { success: false }]
            })
            .expect("minority direction draft");
        assert!((minority.confidence - 0.4).abs() < f32::EPSILON);
    }

    #[test]
    fn test_drafts_are_not_deduplicated() {
        let batch = scenario_batch();
        let refs: Vec<&Observation> = batch.iter().collect();
        let grouped = ObservationGrouper::new(200, 1, 1).group(&refs);
        let out = HypothesisGenerator::new(1, 30, 64).generate(&grouped);

        let specific_success = out
            .drafts
            .iter()
            .filter(|r| {
                r.conditions.len() == 3 && r.predictions == vec![Prediction::Outcome { success: true }]
            })
            .count();
        assert_eq!(specific_success, 4);
    }

    #[test]
    fn test_min_group_size_trades_recall() {
        let batch = scenario_batch();
        let refs: Vec<&Observation> = batch.iter().collect();
        let grouped = ObservationGrouper::new(200, 1, 1).group(&refs);

        let permissive = HypothesisGenerator::new(1, 30, 64).generate(&grouped);
        let strict = HypothesisGenerator::new(3, 30, 64).generate(&grouped);
        assert!(strict.drafts.len() < permissive.drafts.len());
        assert!(!strict
            .drafts
            .iter()
            .any(|r| r.conditions.len() == 2 && r.predictions == vec![Prediction::Outcome { success: false }]));
    }

    #[test]
    fn test_malformed_key_is_skipped() {
        let batch = scenario_batch();
        let refs: Vec<&Observation> = batch.iter().collect();
        let mut grouped = ObservationGrouper::new(200, 1, 1).group(&refs);
        grouped.groups.insert(
            PatternKey {
                kind: PatternKind::SubjectAction,
                values: vec!["A".to_string()],
            },
            refs.clone(),
        );
        grouped.groups.insert(
            PatternKey {
                kind: PatternKind::OutcomeClass,
                values: Vec::new(),
            },
            refs.clone(),
        );

        let out = HypothesisGenerator::new(1, 30, 64).generate(&grouped);
        assert!(out.template_skips >= 2);
        assert!(!out.drafts.is_empty());
    }
}
