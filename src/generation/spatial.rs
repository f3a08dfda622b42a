//! Spatial templates over distance buckets.

use std::collections::BTreeMap;

use crate::condition::{Condition, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::{DistanceBucket, Observation};
use crate::rule::{CandidateRule, RuleType};

use super::causal::split_drafts;
use super::{ids, share, split_by_outcome, GenerationOutput, TemplateSettings};

/// Outcome drafts for a (distance bucket, action, instrument) group.
pub(super) fn bucket_outcomes(
    values: &[String],
    group: &[&Observation],
    s: &TemplateSettings,
) -> Vec<CandidateRule> {
    let (Some(action), Some(instrument)) = (values.get(1), values.get(2)) else {
        return Vec::new();
    };
    let Some(bucket) = group.iter().find_map(|o| o.distance()).map(DistanceBucket::of) else {
        return Vec::new();
    };
    split_drafts(
        RuleType::Spatial,
        &[
            Condition::distance(bucket),
            Condition::action(action.as_str()),
            Condition::instrument(instrument.as_str()),
        ],
        group,
        ConfidenceTier::Grouped,
        s,
    )
}

/// Recommends the best action per distance bucket within a context.
///
/// A bucket yields a draft only when at least two actions were tried there
/// and one of them has a strictly higher success rate than every other.
pub(super) fn compare_actions(
    context: &str,
    group: &[&Observation],
    s: &TemplateSettings,
    out: &mut GenerationOutput,
) {
    let mut buckets: BTreeMap<DistanceBucket, BTreeMap<&str, Vec<&Observation>>> = BTreeMap::new();
    for obs in group {
        if let Some(distance) = obs.distance() {
            buckets
                .entry(DistanceBucket::of(distance))
                .or_default()
                .entry(obs.action.as_str())
                .or_default()
                .push(*obs);
        }
    }
    if buckets.is_empty() {
        out.skip();
        return;
    }

    for (bucket, actions) in buckets {
        let rates: Vec<(&str, f32, &Vec<&Observation>)> = actions
            .iter()
            .filter(|(_, members)| members.len() >= s.min_group_size)
            .map(|(action, members)| {
                let wins = members.iter().filter(|o| o.outcome.success).count();
                (*action, share(wins, members.len()), members)
            })
            .collect();
        if rates.len() < 2 {
            continue;
        }

        let best_rate = rates.iter().map(|(_, r, _)| *r).fold(f32::MIN, f32::max);
        let mut leaders = rates.iter().filter(|(_, r, _)| (*r - best_rate).abs() < f32::EPSILON);
        let (Some((best, rate, members)), None) = (leaders.next(), leaders.next()) else {
            continue;
        };

        let (wins, losses) = split_by_outcome(members);
        out.extend([CandidateRule::draft(
            RuleType::Spatial,
            vec![Condition::context(context), Condition::distance(bucket)],
            vec![Prediction::RecommendedAction {
                action: (*best).to_string(),
            }],
            ConfidenceTier::Grouped,
        )
        .with_strength(*rate)
        .with_evidence(ids(&wins), ids(&losses), s.evidence_limit)]);
    }
}
