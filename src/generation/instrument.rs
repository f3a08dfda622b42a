//! Instrument effectiveness template.

use crate::condition::{Condition, Effectiveness, Prediction};
use crate::confidence::{clamp_unit_f64, ConfidenceTier};
use crate::observation::Observation;
use crate::rule::{CandidateRule, RuleType};

use super::{ids, split_by_outcome, TemplateSettings};

/// Effectiveness score in `[0, 1]` of an instrument against a target.
///
/// `0.7·success_rate + 0.3·squash(mean_reward)` where `squash` maps the real
/// line onto `[0, 1]` via `(r / (1 + |r|) + 1) / 2`.
#[must_use]
pub fn effectiveness_score(success_rate: f64, mean_reward: f64) -> f64 {
    let reward = if mean_reward.is_finite() { mean_reward } else { 0.0 };
    let squashed = (reward / (1.0 + reward.abs()) + 1.0) / 2.0;
    clamp_unit_f64(0.7 * clamp_unit_f64(success_rate) + 0.3 * squashed)
}

pub(super) fn generate(
    instrument: &str,
    subject: &str,
    group: &[&Observation],
    s: &TemplateSettings,
) -> Option<CandidateRule> {
    if group.is_empty() || group.len() < s.min_group_size {
        return None;
    }
    let (successes, failures) = split_by_outcome(group);

    #[allow(clippy::cast_precision_loss)]
    let n = group.len() as f64;
    #[allow(clippy::cast_precision_loss)]
    let rate = successes.len() as f64 / n;
    let mean_reward = group.iter().map(|o| o.outcome.reward).sum::<f64>() / n;
    let score = effectiveness_score(rate, mean_reward);
    let category = Effectiveness::from_score(score);

    let (agree, disagree) = if category.expects_success() {
        (&successes, &failures)
    } else {
        (&failures, &successes)
    };

    #[allow(clippy::cast_possible_truncation)]
    let strength = score as f32;
    Some(
        CandidateRule::draft(
            RuleType::InstrumentEffectiveness,
            vec![Condition::instrument(instrument), Condition::subject(subject)],
            vec![Prediction::Effectiveness { category }],
            ConfidenceTier::Grouped,
        )
        .with_strength(strength)
        .with_evidence(ids(agree), ids(disagree), s.evidence_limit),
    )
}
