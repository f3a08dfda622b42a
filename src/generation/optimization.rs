//! Optimization template: which action pays more in a context.

use std::collections::BTreeMap;

use crate::condition::{Condition, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::Observation;
use crate::rule::{CandidateRule, RuleType};

use super::{ids, split_by_outcome, TemplateSettings};

struct ActionStats<'a> {
    members: Vec<&'a Observation>,
    mean_reward: f64,
}

fn by_action<'a>(group: &[&'a Observation]) -> BTreeMap<&'a str, ActionStats<'a>> {
    let mut buckets: BTreeMap<&'a str, Vec<&'a Observation>> = BTreeMap::new();
    for obs in group {
        buckets.entry(obs.action.as_str()).or_default().push(*obs);
    }
    buckets
        .into_iter()
        .map(|(action, members)| {
            #[allow(clippy::cast_precision_loss)]
            let mean_reward = members.iter().map(|o| o.outcome.reward).sum::<f64>() / members.len() as f64;
            (action, ActionStats { members, mean_reward })
        })
        .collect()
}

/// Drafts "prefer A over B here" for every ordered pair with a positive
/// mean-reward gap where both actions were tried often enough.
pub(super) fn generate(context: &str, group: &[&Observation], s: &TemplateSettings) -> Vec<CandidateRule> {
    let stats = by_action(group);
    let mut drafts = Vec::new();
    for (preferred, a) in &stats {
        if a.members.len() < s.min_group_size {
            continue;
        }
        for (over, b) in &stats {
            if preferred == over || b.members.len() < s.min_group_size {
                continue;
            }
            let gap = a.mean_reward - b.mean_reward;
            if !gap.is_finite() || gap <= 0.0 {
                continue;
            }
            let (wins, losses) = split_by_outcome(&a.members);
            #[allow(clippy::cast_possible_truncation)]
            let strength = (gap / (1.0 + gap)) as f32;
            drafts.push(
                CandidateRule::draft(
                    RuleType::Optimization,
                    vec![Condition::context(context)],
                    vec![Prediction::PreferredAction {
                        preferred: (*preferred).to_string(),
                        over: (*over).to_string(),
                    }],
                    ConfidenceTier::Generalized,
                )
                .with_strength(strength)
                .with_evidence(ids(&wins), ids(&losses), s.evidence_limit),
            );
        }
    }
    drafts
}
