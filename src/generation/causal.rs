//! Causal and exclusion templates.
//!
//! A group is split into its successes and failures and each side drafts its
//! own rule: both directions are legitimate hypotheses. The majority side
//! starts at the group's tier, the minority side one tier lower.

use crate::condition::{Condition, DeltaDirection, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::{Observation, ObservationId};
use crate::rule::{CandidateRule, RuleType};

use super::{ids, share, split_by_outcome, TemplateSettings};

/// Drafts one rule per outcome direction that has enough members.
pub(super) fn split_drafts(
    rule_type: RuleType,
    conditions: &[Condition],
    group: &[&Observation],
    tier: ConfidenceTier,
    s: &TemplateSettings,
) -> Vec<CandidateRule> {
    let (successes, failures) = split_by_outcome(group);
    let success_is_majority = successes.len() >= failures.len();

    let mut drafts = Vec::with_capacity(2);
    for (success, members, others) in [(true, &successes, &failures), (false, &failures, &successes)] {
        if members.is_empty() || members.len() < s.min_group_size {
            continue;
        }
        let tier = if success == success_is_majority {
            tier
        } else {
            tier.lower()
        };
        drafts.push(
            CandidateRule::draft(
                rule_type,
                conditions.to_vec(),
                vec![Prediction::Outcome { success }],
                tier,
            )
            .with_strength(share(members.len(), group.len()))
            .with_evidence(ids(members), ids(others), s.evidence_limit),
        );
    }
    drafts
}

pub(super) fn subject_action(
    subject: &str,
    action: &str,
    group: &[&Observation],
    s: &TemplateSettings,
) -> Vec<CandidateRule> {
    split_drafts(
        RuleType::Causal,
        &[Condition::subject(subject), Condition::action(action)],
        group,
        ConfidenceTier::Grouped,
        s,
    )
}

pub(super) fn action_instrument(
    action: &str,
    instrument: &str,
    group: &[&Observation],
    s: &TemplateSettings,
) -> Vec<CandidateRule> {
    split_drafts(
        RuleType::Causal,
        &[Condition::action(action), Condition::instrument(instrument)],
        group,
        ConfidenceTier::Grouped,
        s,
    )
}

/// Subject+action pairs that never succeeded (at least two attempts).
pub(super) fn exclusion(
    subject: &str,
    action: &str,
    group: &[&Observation],
    s: &TemplateSettings,
) -> Option<CandidateRule> {
    if group.len() < s.min_group_size.max(2) || group.iter().any(|o| o.outcome.success) {
        return None;
    }
    Some(
        CandidateRule::draft(
            RuleType::Exclusion,
            vec![Condition::subject(subject), Condition::action(action)],
            vec![Prediction::Outcome { success: false }],
            ConfidenceTier::Grouped,
        )
        .with_strength(1.0)
        .with_evidence(ids(group), std::iter::empty::<ObservationId>(), s.evidence_limit),
    )
}

/// Concrete restatement of one observation, including its state deltas.
pub(super) fn single_observation(obs: &Observation, s: &TemplateSettings) -> CandidateRule {
    let mut conditions = vec![
        Condition::context(&obs.context),
        Condition::subject(&obs.subject),
        Condition::action(&obs.action),
    ];
    if let Some(instrument) = obs.instrument.as_deref() {
        conditions.push(Condition::instrument(instrument));
    }

    let mut predictions = vec![Prediction::Outcome {
        success: obs.outcome.success,
    }];
    for (key, delta) in &obs.outcome.state_deltas {
        if let Some(direction) = DeltaDirection::of(*delta) {
            predictions.push(Prediction::StateDelta {
                key: key.clone(),
                direction,
            });
        }
    }

    CandidateRule::draft(RuleType::Causal, conditions, predictions, ConfidenceTier::Specific)
        .with_evidence([obs.id], std::iter::empty::<ObservationId>(), s.evidence_limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observation::Outcome;
    use chrono::Duration;

    fn settings(min_group_size: usize) -> TemplateSettings {
        TemplateSettings {
            min_group_size,
            sequence_window: Duration::seconds(30),
            evidence_limit: 64,
        }
    }

    #[test]
    fn test_split_drafts_both_directions() {
        let obs = [
            Observation::new("c", "s", "a", Outcome::failure(0.0)),
            Observation::new("c", "s", "a", Outcome::failure(0.0)),
            Observation::new("c", "s", "a", Outcome::success(1.0)),
        ];
        let group: Vec<&Observation> = obs.iter().collect();
        let drafts = subject_action("s", "a", &group, &settings(1));
        assert_eq!(drafts.len(), 2);

        let success = drafts.iter().find(|d| d.predictions[0] == Prediction::Outcome { success: true }).unwrap();
        let failure = drafts.iter().find(|d| d.predictions[0] == Prediction::Outcome { success: false }).unwrap();
        // Failures are the majority here.
        assert!((failure.confidence - 0.6).abs() < f32::EPSILON);
        assert!((success.confidence - 0.4).abs() < f32::EPSILON);
        assert!((failure.scores.strength - 2.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_exclusion_requires_all_failures() {
        let fail = Observation::new("c", "s", "a", Outcome::failure(0.0));
        let fail2 = Observation::new("c", "s", "a", Outcome::failure(0.0));
        let win = Observation::new("c", "s", "a", Outcome::success(1.0));

        assert!(exclusion("s", "a", &[&fail], &settings(1)).is_none());
        assert!(exclusion("s", "a", &[&fail, &fail2], &settings(1)).is_some());
        assert!(exclusion("s", "a", &[&fail, &fail2, &win], &settings(1)).is_none());
    }

    #[test]
    fn test_single_observation_includes_instrument_and_deltas() {
        let obs = Observation::new("c", "s", "a", Outcome::success(1.0).with_delta("hp", -2.0).with_delta("xp", 0.0))
            .with_instrument("sword");
        let draft = single_observation(&obs, &settings(1));
        assert_eq!(draft.conditions.len(), 4);
        assert_eq!(draft.predictions.len(), 2);
        assert!((draft.confidence - 0.8).abs() < f32::EPSILON);
        assert_eq!(draft.evidence.support_ids, vec![obs.id]);
    }
}
