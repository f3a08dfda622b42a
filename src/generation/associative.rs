//! Associative template: categorical attributes common to an outcome class.

use std::collections::BTreeMap;

use crate::condition::{AttributeTest, Condition, Prediction};
use crate::confidence::ConfidenceTier;
use crate::observation::{Observation, ObservationId};
use crate::rule::{CandidateRule, RuleType};
use crate::value::AttrValue;

use super::{ids, TemplateSettings};

/// Drafts "attribute = value → outcome" for every categorical attribute that
/// every member of the outcome class shares.
pub(super) fn generate(success: bool, group: &[&Observation], s: &TemplateSettings) -> Vec<CandidateRule> {
    let Some((first, rest)) = group.split_first() else {
        return Vec::new();
    };
    if group.len() < s.min_group_size.max(2) {
        return Vec::new();
    }

    let shared: BTreeMap<&String, &AttrValue> = first
        .attributes
        .iter()
        .filter(|(_, v)| v.is_categorical())
        .filter(|(k, v)| {
            rest.iter()
                .all(|o| o.attributes.get(*k).is_some_and(|other| other.canonical() == v.canonical()))
        })
        .collect();

    shared
        .into_iter()
        .map(|(key, value)| {
            CandidateRule::draft(
                RuleType::Associative,
                vec![Condition::attribute(
                    key.clone(),
                    AttributeTest::Equals {
                        value: value.clone(),
                    },
                )],
                vec![Prediction::Outcome { success }],
                ConfidenceTier::Generalized,
            )
            .with_strength(1.0)
            .with_evidence(ids(group), std::iter::empty::<ObservationId>(), s.evidence_limit)
        })
        .collect()
}
