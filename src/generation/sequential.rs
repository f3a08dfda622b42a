//! Sequential template: successful action pairs close in time.
//!
//! Pairs are formed from consecutive observations of the whole batch (in
//! timestamp order) whose gap is within the sequence window. When both ends
//! of a pair succeeded, "after A, B follows" is counted; the context
//! condition is only included when both ends share a context.

use std::collections::BTreeMap;

use crate::condition::{Condition, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::{Observation, ObservationId};
use crate::rule::{CandidateRule, RuleType};

use super::{share, TemplateSettings};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SequenceKey<'a> {
    context: Option<&'a str>,
    first: &'a str,
    then: &'a str,
}

/// Consecutive timestamp-ordered pairs whose gap fits the window.
pub(crate) fn windowed_pairs<'a>(
    observations: &[&'a Observation],
    window: chrono::Duration,
) -> Vec<(&'a Observation, &'a Observation)> {
    let mut sorted: Vec<&'a Observation> = observations.to_vec();
    sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
    sorted
        .windows(2)
        .filter(|w| w[1].timestamp - w[0].timestamp <= window)
        .map(|w| (w[0], w[1]))
        .collect()
}

pub(super) fn generate(observations: &[&Observation], s: &TemplateSettings) -> Vec<CandidateRule> {
    let pairs = windowed_pairs(observations, s.sequence_window);

    let mut starts: BTreeMap<(Option<&str>, &str), usize> = BTreeMap::new();
    let mut follows: BTreeMap<SequenceKey<'_>, Vec<ObservationId>> = BTreeMap::new();
    for (a, b) in &pairs {
        let context = (a.context == b.context).then_some(a.context.as_str());
        *starts.entry((context, a.action.as_str())).or_default() += 1;
        if a.outcome.success && b.outcome.success {
            follows
                .entry(SequenceKey {
                    context,
                    first: &a.action,
                    then: &b.action,
                })
                .or_default()
                .push(b.id);
        }
    }

    follows
        .into_iter()
        .filter(|(_, support)| support.len() >= s.min_group_size)
        .map(|(key, support)| {
            let total = starts.get(&(key.context, key.first)).copied().unwrap_or(support.len());
            let mut conditions = Vec::with_capacity(2);
            if let Some(context) = key.context {
                conditions.push(Condition::context(context));
            }
            conditions.push(Condition::action(key.first));
            CandidateRule::draft(
                RuleType::Sequential,
                conditions,
                vec![Prediction::NextAction {
                    action: key.then.to_string(),
                }],
                ConfidenceTier::Grouped,
            )
            .with_strength(share(support.len(), total))
            .with_evidence(support, std::iter::empty::<ObservationId>(), s.evidence_limit)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Outcome;
    use chrono::{Duration, Utc};

    fn settings(min_group_size: usize) -> TemplateSettings {
        TemplateSettings {
            min_group_size,
            sequence_window: Duration::seconds(30),
            evidence_limit: 64,
        }
    }

    #[test]
    fn test_successful_pairs_within_window() {
        let t0 = Utc::now();
        let obs = [
            Observation::new("den", "bear", "feint", Outcome::success(0.0)).at(t0),
            Observation::new("den", "bear", "strike", Outcome::success(1.0)).at(t0 + Duration::seconds(5)),
            // Too far after the previous one.
            Observation::new("den", "bear", "flee", Outcome::success(0.0)).at(t0 + Duration::seconds(120)),
        ];
        let refs: Vec<&Observation> = obs.iter().collect();
        let drafts = generate(&refs, &settings(1));

        assert_eq!(drafts.len(), 1);
        assert_eq!(
            drafts[0].conditions,
            vec![Condition::context("den"), Condition::action("feint")]
        );
        assert_eq!(
            drafts[0].predictions,
            vec![Prediction::NextAction { action: "strike".into() }]
        );
        assert_eq!(drafts[0].evidence.support_ids, vec![obs[1].id]);
    }

    #[test]
    fn test_failed_pairs_and_context_change() {
        let t0 = Utc::now();
        let obs = [
            Observation::new("den", "bear", "feint", Outcome::success(0.0)).at(t0),
            Observation::new("cave", "bear", "strike", Outcome::success(1.0)).at(t0 + Duration::seconds(1)),
            Observation::new("cave", "bear", "kick", Outcome::failure(0.0)).at(t0 + Duration::seconds(2)),
        ];
        let refs: Vec<&Observation> = obs.iter().collect();
        let drafts = generate(&refs, &settings(1));

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].conditions, vec![Condition::action("feint")]);
        assert!(generate(&refs, &settings(2)).is_empty());
    }
}
