//! Partitioned rule storage.
//!
//! The store holds live rules in two partitions, candidate and validated,
//! plus a bounded archive of pruned rules. A fingerprint index maps content
//! hashes of live rules to their ids, and an LRU table records when each
//! live rule was last inserted, matched or served.
//!
//! Every mutating method leaves the store consistent: a rule is in exactly
//! one partition, and the fingerprint index and LRU table only reference
//! live rules.

mod merge;

use std::collections::{BTreeMap, HashMap, VecDeque};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::EngineConfig;
use crate::fingerprint::Fingerprint;
use crate::rule::{CandidateRule, RuleId, RuleStatus};

pub use merge::{InsertOutcome, MergeRecord};

/// Live partition a rule belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    Candidate,
    Validated,
}

/// Size and merge limits of a [`RuleStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreLimits {
    pub merge_similarity_threshold: f32,
    pub similarity_scan_limit: usize,
    pub pruned_archive_size: usize,
    pub merge_history_limit: usize,
    pub evidence_id_limit: usize,
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for StoreLimits {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            merge_similarity_threshold: cfg.merge_similarity_threshold,
            similarity_scan_limit: cfg.similarity_scan_limit,
            pruned_archive_size: cfg.pruned_archive_size,
            merge_history_limit: cfg.merge_history_limit,
            evidence_id_limit: cfg.evidence_id_limit,
        }
    }
}

/// Partitioned, fingerprint-indexed rule store.
#[derive(Debug, Clone, Default)]
pub struct RuleStore {
    candidates: BTreeMap<RuleId, CandidateRule>,
    validated: BTreeMap<RuleId, CandidateRule>,
    pruned: VecDeque<CandidateRule>,

    /// Content hash → live rule. A rule that absorbed drafts by merging is
    /// also reachable under the absorbed drafts' hashes.
    fingerprints: HashMap<Fingerprint, RuleId>,

    lru: BTreeMap<RuleId, DateTime<Utc>>,
    merge_history: VecDeque<MergeRecord>,
    limits: StoreLimits,
}

impl RuleStore {
    #[must_use]
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            limits,
            ..Self::default()
        }
    }

    #[must_use]
    pub const fn limits(&self) -> &StoreLimits {
        &self.limits
    }

    pub fn set_limits(&mut self, limits: StoreLimits) {
        self.limits = limits;
        self.trim_archive();
        self.trim_history();
    }

    pub fn get(&self, id: RuleId) -> Option<&CandidateRule> {
        self.candidates.get(&id).or_else(|| self.validated.get(&id))
    }

    pub(crate) fn get_mut(&mut self, id: RuleId) -> Option<&mut CandidateRule> {
        match self.candidates.get_mut(&id) {
            Some(rule) => Some(rule),
            None => self.validated.get_mut(&id),
        }
    }

    #[must_use]
    pub fn partition_of(&self, id: RuleId) -> Option<Partition> {
        if self.candidates.contains_key(&id) {
            Some(Partition::Candidate)
        } else if self.validated.contains_key(&id) {
            Some(Partition::Validated)
        } else {
            None
        }
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateRule> {
        self.candidates.values()
    }

    pub fn validated(&self) -> impl Iterator<Item = &CandidateRule> {
        self.validated.values()
    }

    /// Every live rule, candidates first, each partition in id order.
    pub fn live(&self) -> impl Iterator<Item = &CandidateRule> {
        self.candidates.values().chain(self.validated.values())
    }

    /// Archived pruned rules, oldest first.
    pub fn pruned(&self) -> impl Iterator<Item = &CandidateRule> {
        self.pruned.iter()
    }

    /// Merge history, oldest first.
    pub fn merge_history(&self) -> impl Iterator<Item = &MergeRecord> {
        self.merge_history.iter()
    }

    pub fn candidate_count(&self) -> usize {
        self.candidates.len()
    }

    pub fn validated_count(&self) -> usize {
        self.validated.len()
    }

    /// Number of live rules (candidate + validated).
    pub fn total_count(&self) -> usize {
        self.candidates.len() + self.validated.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_count() == 0
    }

    /// Live rule currently indexed under a fingerprint.
    #[must_use]
    pub fn id_for_fingerprint(&self, fingerprint: &Fingerprint) -> Option<RuleId> {
        self.fingerprints.get(fingerprint).copied()
    }

    pub fn contains_fingerprint(&self, fingerprint: &Fingerprint) -> bool {
        self.fingerprints.contains_key(fingerprint)
    }

    /// Every indexed fingerprint, sorted.
    #[must_use]
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        let mut out: Vec<Fingerprint> = self.fingerprints.keys().cloned().collect();
        out.sort();
        out
    }

    /// Last time a rule was inserted, matched or served.
    #[must_use]
    pub fn last_used(&self, id: RuleId) -> Option<DateTime<Utc>> {
        self.lru.get(&id).copied()
    }

    pub fn lru_table(&self) -> &BTreeMap<RuleId, DateTime<Utc>> {
        &self.lru
    }

    /// Refreshes a live rule's LRU entry. Unknown ids are ignored.
    pub fn touch(&mut self, id: RuleId, at: DateTime<Utc>) {
        if self.partition_of(id).is_some() {
            let entry = self.lru.entry(id).or_insert(at);
            if at > *entry {
                *entry = at;
            }
        }
    }

    /// Moves a candidate into the validated partition with status `Validated`.
    ///
    /// Returns false if the rule is not a candidate.
    pub fn promote(&mut self, id: RuleId) -> bool {
        let Some(mut rule) = self.candidates.remove(&id) else {
            return false;
        };
        rule.status = RuleStatus::Validated;
        self.validated.insert(id, rule);
        true
    }

    /// Moves a validated rule back to the candidate partition with status `Deprecated`.
    ///
    /// Returns false if the rule is not validated.
    pub fn deprecate(&mut self, id: RuleId) -> bool {
        let Some(mut rule) = self.validated.remove(&id) else {
            return false;
        };
        rule.status = RuleStatus::Deprecated;
        self.candidates.insert(id, rule);
        true
    }

    /// Removes a live rule, marks it pruned and archives it.
    ///
    /// The rule's fingerprint and LRU entries are dropped; the oldest archived
    /// rules are discarded beyond the archive size.
    pub fn evict(&mut self, id: RuleId) -> Option<Partition> {
        let partition = self.partition_of(id)?;
        let mut rule = match partition {
            Partition::Candidate => self.candidates.remove(&id),
            Partition::Validated => self.validated.remove(&id),
        }?;
        rule.status = RuleStatus::Pruned;
        self.fingerprints.retain(|_, owner| *owner != id);
        self.lru.remove(&id);
        self.pruned.push_back(rule);
        self.trim_archive();
        debug!(rule_id = %id, ?partition, "rule evicted");
        Some(partition)
    }

    /// Drops every rule, fingerprint, LRU entry and merge record.
    pub fn clear(&mut self) {
        self.candidates.clear();
        self.validated.clear();
        self.pruned.clear();
        self.fingerprints.clear();
        self.lru.clear();
        self.merge_history.clear();
    }

    /// Rebuilds the fingerprint index from live rule content.
    ///
    /// When several live rules share a fingerprint the lowest id wins the
    /// index entry; the others stay live but unindexed.
    pub fn rebuild_fingerprints(&mut self) {
        self.fingerprints.clear();
        for rule in self.candidates.values().chain(self.validated.values()) {
            self.fingerprints.entry(rule.fingerprint()).or_insert(rule.id);
        }
    }

    /// Places a rule into a partition as-is, replacing any rule with the same id.
    ///
    /// Used by snapshot loading; does not consult the fingerprint index.
    pub(crate) fn put(&mut self, partition: Partition, rule: CandidateRule) {
        let id = rule.id;
        self.candidates.remove(&id);
        self.validated.remove(&id);
        match partition {
            Partition::Candidate => self.candidates.insert(id, rule),
            Partition::Validated => self.validated.insert(id, rule),
        };
    }

    pub(crate) fn index_fingerprint(&mut self, fingerprint: Fingerprint, id: RuleId) {
        if self.partition_of(id).is_some() {
            self.fingerprints.insert(fingerprint, id);
        }
    }

    pub(crate) fn archive(&mut self, mut rule: CandidateRule) {
        rule.status = RuleStatus::Pruned;
        self.pruned.push_back(rule);
        self.trim_archive();
    }

    pub(crate) fn set_last_used(&mut self, id: RuleId, at: DateTime<Utc>) {
        if self.partition_of(id).is_some() {
            self.lru.insert(id, at);
        }
    }

    pub(crate) fn record_merge(&mut self, record: MergeRecord) {
        self.merge_history.push_back(record);
        self.trim_history();
    }

    fn trim_archive(&mut self) {
        while self.pruned.len() > self.limits.pruned_archive_size {
            self.pruned.pop_front();
        }
    }

    fn trim_history(&mut self) {
        while self.merge_history.len() > self.limits.merge_history_limit {
            self.merge_history.pop_front();
        }
    }
}
