//! Conditional template: numeric attribute thresholds.
//!
//! For every numeric attribute that takes values on both sides of a
//! subject+action group's outcomes, the best single threshold is searched
//! over the midpoints between adjacent distinct values. The winning split
//! becomes "when the attribute is at least / below t, this action works".

use std::collections::BTreeSet;

use crate::condition::{AttributeTest, Condition, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::Observation;
use crate::rule::{CandidateRule, RuleType};

use super::{split_by_outcome, GenerationOutput, TemplateSettings};

/// Best threshold found for one attribute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Split {
    pub threshold: f64,

    /// True when values at or above the threshold predict success.
    pub success_at_or_above: bool,

    /// Fraction of samples classified correctly by the split.
    pub accuracy: f64,
}

/// Finds the threshold that best separates successes from failures.
///
/// Candidate thresholds are midpoints between adjacent distinct values; both
/// directions are tried for each. Ties keep the lowest threshold, with the
/// "at or above" direction first. Returns `None` when fewer than two distinct
/// finite values exist.
///
/// # Examples
///
/// ```
/// use rulebloom::generation::best_split;
///
/// let split = best_split(&[(1.0, false), (2.0, false), (8.0, true), (9.0, true)]).unwrap();
/// assert!((split.threshold - 5.0).abs() < 1e-9);
/// assert!(split.success_at_or_above);
/// assert!((split.accuracy - 1.0).abs() < 1e-9);
/// ```
#[must_use]
pub fn best_split(samples: &[(f64, bool)]) -> Option<Split> {
    let samples: Vec<(f64, bool)> = samples.iter().copied().filter(|(v, _)| v.is_finite()).collect();
    let mut values: Vec<f64> = samples.iter().map(|(v, _)| *v).collect();
    values.sort_by(f64::total_cmp);
    values.dedup();
    if values.len() < 2 {
        return None;
    }

    #[allow(clippy::cast_precision_loss)]
    let n = samples.len() as f64;
    let mut best: Option<Split> = None;
    for pair in values.windows(2) {
        let threshold = (pair[0] + pair[1]) / 2.0;
        let above_correct = samples
            .iter()
            .filter(|(v, success)| (*v >= threshold) == *success)
            .count();
        #[allow(clippy::cast_precision_loss)]
        let above_accuracy = above_correct as f64 / n;
        for (success_at_or_above, accuracy) in [(true, above_accuracy), (false, 1.0 - above_accuracy)] {
            if best.map_or(true, |b| accuracy > b.accuracy) {
                best = Some(Split {
                    threshold,
                    success_at_or_above,
                    accuracy,
                });
            }
        }
    }
    best
}

pub(super) fn generate(
    subject: &str,
    action: &str,
    group: &[&Observation],
    s: &TemplateSettings,
    out: &mut GenerationOutput,
) {
    let (successes, failures) = split_by_outcome(group);
    if successes.is_empty() || failures.is_empty() || group.len() < s.min_group_size {
        return;
    }

    let keys: BTreeSet<&str> = group
        .iter()
        .flat_map(|o| o.attributes.iter())
        .filter(|(_, v)| v.is_numeric())
        .map(|(k, _)| k.as_str())
        .collect();
    if keys.is_empty() {
        out.skip();
        return;
    }

    for key in keys {
        let samples: Vec<(f64, bool)> = group
            .iter()
            .filter_map(|o| o.numeric_attribute(key).map(|v| (v, o.outcome.success)))
            .collect();
        if !samples.iter().any(|(_, ok)| *ok) || !samples.iter().any(|(_, ok)| !*ok) {
            continue;
        }
        let Some(split) = best_split(&samples) else {
            continue;
        };
        if split.accuracy <= 0.5 {
            continue;
        }

        let test = if split.success_at_or_above {
            AttributeTest::AtLeast {
                threshold: split.threshold,
            }
        } else {
            AttributeTest::Below {
                threshold: split.threshold,
            }
        };
        #[allow(clippy::cast_possible_truncation)]
        let strength = split.accuracy as f32;
        out.extend([CandidateRule::draft(
            RuleType::Conditional,
            vec![Condition::subject(subject), Condition::attribute(key, test)],
            vec![Prediction::RecommendedAction {
                action: action.to_string(),
            }],
            ConfidenceTier::Generalized,
        )
        .with_strength(strength)]);
    }
}
