//! Deduplicating insertion.
//!
//! Inserting a draft goes through three checks, in order:
//!
//! 1. Exact duplicate: the draft's fingerprint is already indexed. Nothing
//!    changes and the existing id is returned.
//! 2. Near duplicate: some live rule of the same type scores above the merge
//!    threshold. The draft is folded into the best-scoring one, which keeps
//!    its id and partition.
//! 3. Otherwise the draft becomes a new pending candidate.
//!
//! A merged-in draft's fingerprint is indexed against the surviving rule, so
//! inserting the same draft again is an exact duplicate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::confidence::clamp_unit;
use crate::fingerprint::{similarity, Fingerprint};
use crate::rule::{CandidateRule, RuleId, RuleStatus};

use super::RuleStore;

/// Result of [`RuleStore::insert`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InsertOutcome {
    /// Stored as a new candidate.
    Inserted(RuleId),

    /// Identical content is already live under this id.
    Duplicate(RuleId),

    /// Folded into an existing rule.
    Merged { into: RuleId, score: f32 },
}

impl InsertOutcome {
    /// Id of the live rule that now carries the draft's content.
    #[must_use]
    pub const fn rule_id(&self) -> RuleId {
        match self {
            Self::Inserted(id) | Self::Duplicate(id) | Self::Merged { into: id, .. } => *id,
        }
    }

    pub const fn is_inserted(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }

    pub const fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    pub const fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// One similarity merge, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeRecord {
    /// Rule that survived the merge.
    pub kept: RuleId,

    /// Id of the draft folded into it.
    pub absorbed: RuleId,

    pub score: f32,
    pub at: DateTime<Utc>,
}

impl RuleStore {
    /// Inserts a draft with exact dedup and similarity merging.
    ///
    /// Inserted drafts always land in the candidate partition as `Pending`,
    /// whatever status they carried.
    pub fn insert(&mut self, mut draft: CandidateRule, now: DateTime<Utc>) -> InsertOutcome {
        draft.status = RuleStatus::Pending;
        draft.confidence = clamp_unit(draft.confidence);

        let fingerprint = draft.fingerprint();
        if let Some(existing) = self.id_for_fingerprint(&fingerprint) {
            trace!(rule_id = %existing, "duplicate draft rejected");
            return InsertOutcome::Duplicate(existing);
        }

        if let Some((target, score)) = self.most_similar(&draft) {
            self.merge_into(target, &draft, fingerprint, score, now);
            return InsertOutcome::Merged { into: target, score };
        }

        if self.partition_of(draft.id).is_some() {
            draft.id = RuleId::new();
        }
        let id = draft.id;
        self.fingerprints.insert(fingerprint, id);
        self.lru.insert(id, now);
        self.candidates.insert(id, draft);
        InsertOutcome::Inserted(id)
    }

    /// Best-scoring live rule of the same type above the merge threshold.
    ///
    /// At most `similarity_scan_limit` rules are compared (0 = all); ties
    /// keep the first rule in scan order.
    fn most_similar(&self, draft: &CandidateRule) -> Option<(RuleId, f32)> {
        let limit = match self.limits.similarity_scan_limit {
            0 => usize::MAX,
            n => n,
        };
        let threshold = self.limits.merge_similarity_threshold;

        let mut best: Option<(RuleId, f32)> = None;
        for rule in self
            .live()
            .filter(|r| r.rule_type == draft.rule_type)
            .take(limit)
        {
            let score = similarity(rule, draft);
            if score > threshold && best.map_or(true, |(_, s)| score > s) {
                best = Some((rule.id, score));
            }
        }
        best
    }

    fn merge_into(
        &mut self,
        target: RuleId,
        draft: &CandidateRule,
        draft_fingerprint: Fingerprint,
        score: f32,
        now: DateTime<Utc>,
    ) {
        let evidence_limit = self.limits.evidence_id_limit;
        let Some(existing) = self.get_mut(target) else {
            return;
        };

        let old_fingerprint = existing.fingerprint();
        if draft.quality() > existing.quality() {
            existing.adopt_content(draft);
        }
        existing.confidence = clamp_unit(existing.confidence.max(draft.confidence));
        existing.scores.strength = clamp_unit((existing.scores.strength + draft.scores.strength) / 2.0);
        existing.scores.generalization =
            clamp_unit((existing.scores.generalization + draft.scores.generalization) / 2.0);
        existing.scores.specificity =
            clamp_unit((existing.scores.specificity + draft.scores.specificity) / 2.0);
        existing.evidence.absorb(&draft.evidence, evidence_limit);
        let new_fingerprint = existing.fingerprint();

        self.fingerprints.insert(old_fingerprint, target);
        self.fingerprints.insert(new_fingerprint, target);
        self.fingerprints.insert(draft_fingerprint, target);
        self.touch(target, now);

        self.record_merge(MergeRecord {
            kept: target,
            absorbed: draft.id,
            score,
            at: now,
        });
        trace!(kept = %target, absorbed = %draft.id, score, "draft merged");
    }
}
