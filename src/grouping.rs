//! Observation grouping.
//!
//! Blooming does not enumerate templates over raw batches. Observations are
//! first bucketed under pattern keys built from a canonical subset of their
//! dimensions, so that every template works on a focused group and the
//! combinatorial cost stays bounded. An observation appears under every key
//! it can produce; keys that need a dimension the observation lacks are
//! simply not produced.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::observation::{DistanceBucket, Observation};

/// Which dimension subset a pattern key is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    SubjectAction,
    ActionInstrument,
    InstrumentTarget,
    OutcomeClass,
    DistanceActionInstrument,
    Context,
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SubjectAction => write!(f, "subject_action"),
            Self::ActionInstrument => write!(f, "action_instrument"),
            Self::InstrumentTarget => write!(f, "instrument_target"),
            Self::OutcomeClass => write!(f, "outcome_class"),
            Self::DistanceActionInstrument => write!(f, "distance_action_instrument"),
            Self::Context => write!(f, "context"),
        }
    }
}

/// Key shared by every observation in a pattern group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PatternKey {
    pub kind: PatternKind,
    pub values: Vec<String>,
}

impl PatternKey {
    fn new(kind: PatternKind, values: &[&str]) -> Self {
        Self {
            kind,
            values: values.iter().map(|v| (*v).to_string()).collect(),
        }
    }

    /// Every key the observation can be grouped under.
    #[must_use]
    pub fn all_for(obs: &Observation) -> Vec<Self> {
        let mut keys = vec![
            Self::new(PatternKind::SubjectAction, &[&obs.subject, &obs.action]),
            Self::new(
                PatternKind::OutcomeClass,
                &[if obs.outcome.success { "success" } else { "failure" }],
            ),
            Self::new(PatternKind::Context, &[&obs.context]),
        ];
        if let Some(instrument) = obs.instrument.as_deref() {
            keys.push(Self::new(PatternKind::ActionInstrument, &[&obs.action, instrument]));
            keys.push(Self::new(PatternKind::InstrumentTarget, &[instrument, &obs.subject]));
            if let Some(distance) = obs.distance() {
                let bucket = DistanceBucket::of(distance).to_string();
                keys.push(Self::new(
                    PatternKind::DistanceActionInstrument,
                    &[&bucket, &obs.action, instrument],
                ));
            }
        }
        keys
    }
}

impl fmt::Display for PatternKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.values.join("|"))
    }
}

/// A capped batch together with its pattern groups.
#[derive(Debug, Default)]
pub struct GroupedBatch<'a> {
    /// Observations kept after capping, in timestamp order.
    pub observations: Vec<&'a Observation>,
    pub groups: BTreeMap<PatternKey, Vec<&'a Observation>>,
}

impl GroupedBatch<'_> {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Buckets observation batches by pattern key.
#[derive(Debug, Clone, Copy)]
pub struct ObservationGrouper {
    max_observations: usize,
    min_new_experiences: usize,
    min_distinct_signatures: usize,
}

impl ObservationGrouper {
    #[must_use]
    pub fn new(
        max_observations: usize,
        min_new_experiences: usize,
        min_distinct_signatures: usize,
    ) -> Self {
        Self {
            max_observations: max_observations.max(2),
            min_new_experiences,
            min_distinct_signatures: min_distinct_signatures.max(1),
        }
    }

    /// Gate for the whole bloom phase.
    ///
    /// False when the batch has fewer than `min_new_experiences` observations
    /// or fewer than `min_distinct_signatures` distinct behavioral signatures.
    #[must_use]
    pub fn has_sufficient_new_experiences(&self, batch: &[&Observation]) -> bool {
        if batch.is_empty() || batch.len() < self.min_new_experiences {
            return false;
        }
        let distinct: HashSet<_> = batch.iter().map(|o| o.signature()).collect();
        distinct.len() >= self.min_distinct_signatures
    }

    /// Caps a batch at `max_observations`.
    ///
    /// Keeps the most recent half outright, then fills the remainder from the
    /// older half with one observation per subject+action group not yet
    /// represented, newest first. The result is in timestamp order.
    #[must_use]
    pub fn cap<'a>(&self, batch: &[&'a Observation]) -> Vec<&'a Observation> {
        let mut sorted: Vec<&'a Observation> = batch.to_vec();
        sorted.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        if sorted.len() <= self.max_observations {
            return sorted;
        }

        let recent_count = self.max_observations / 2;
        let split = sorted.len() - recent_count;
        let (older, recent) = sorted.split_at(split);

        let mut kept: Vec<&'a Observation> = recent.to_vec();
        let mut represented: BTreeSet<(&str, &str)> = BTreeSet::new();
        for obs in older.iter().rev() {
            if kept.len() >= self.max_observations {
                break;
            }
            if represented.insert((obs.subject.as_str(), obs.action.as_str())) {
                kept.push(*obs);
            }
        }
        kept.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        kept
    }

    /// Caps the batch and buckets it by pattern key.
    #[must_use]
    pub fn group<'a>(&self, batch: &[&'a Observation]) -> GroupedBatch<'a> {
        let observations = self.cap(batch);
        let mut groups: BTreeMap<PatternKey, Vec<&'a Observation>> = BTreeMap::new();
        for obs in &observations {
            for key in PatternKey::all_for(obs) {
                groups.entry(key).or_default().push(*obs);
            }
        }
        GroupedBatch {
            observations,
            groups,
        }
    }
}
