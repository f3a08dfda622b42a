//! Snapshot export and import of engine state.
//!
//! A snapshot is a versioned JSON document holding both live partitions,
//! optionally the pruned archive, the fingerprint index, merge history, the
//! LRU table and aggregate counters. Loading never mutates in place: the new
//! state is built next to the current one and only swapped in on success.

pub mod codec;

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::EngineCounters;
use crate::error::SnapshotError;
use crate::fingerprint::Fingerprint;
use crate::rule::{CandidateRule, RuleId};
use crate::storage::{MergeRecord, Partition, RuleStore};

/// Snapshot format version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// How a loaded snapshot is combined with the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadMode {
    /// Discard current state and adopt the snapshot's.
    Replace,
    /// Add only rules whose fingerprint is not already indexed.
    Merge,
    /// Add every rule, then rebuild the fingerprint index. May reintroduce
    /// content duplicates that `Merge` would have filtered.
    Append,
}

impl fmt::Display for LoadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Replace => write!(f, "replace"),
            Self::Merge => write!(f, "merge"),
            Self::Append => write!(f, "append"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub counters: EngineCounters,
}

/// One fingerprint index entry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub fingerprint: Fingerprint,
    pub rule_id: RuleId,
}

/// Serializable engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,
    pub candidate_rules: BTreeMap<RuleId, CandidateRule>,
    pub validated_rules: BTreeMap<RuleId, CandidateRule>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pruned_rules: Vec<CandidateRule>,

    pub fingerprints: Vec<FingerprintEntry>,

    #[serde(default)]
    pub merge_history: Vec<MergeRecord>,

    #[serde(default)]
    pub lru_table: BTreeMap<RuleId, DateTime<Utc>>,
}

/// Only the version field, read before the full document.
#[derive(Deserialize)]
struct VersionProbe {
    metadata: ProbeMetadata,
}

#[derive(Deserialize)]
struct ProbeMetadata {
    version: u32,
}

/// What a load did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadReport {
    pub mode: LoadMode,
    pub loaded: usize,

    /// Rules skipped because their fingerprint was already indexed.
    pub skipped: usize,

    /// Rules given a fresh id because theirs was already live.
    pub reassigned: usize,
}

fn corrupt(message: impl Into<String>) -> SnapshotError {
    SnapshotError::Corrupt {
        message: message.into(),
    }
}

impl Snapshot {
    /// Captures the store's state.
    #[must_use]
    pub fn capture(
        store: &RuleStore,
        counters: &EngineCounters,
        include_pruned: bool,
        saved_at: DateTime<Utc>,
    ) -> Self {
        let mut fingerprints: Vec<FingerprintEntry> = store
            .fingerprints()
            .into_iter()
            .filter_map(|fingerprint| {
                store
                    .id_for_fingerprint(&fingerprint)
                    .map(|rule_id| FingerprintEntry { fingerprint, rule_id })
            })
            .collect();
        fingerprints.sort();

        Self {
            metadata: SnapshotMetadata {
                version: SNAPSHOT_VERSION,
                saved_at,
                counters: counters.clone(),
            },
            candidate_rules: store.candidates().map(|r| (r.id, r.clone())).collect(),
            validated_rules: store.validated().map(|r| (r.id, r.clone())).collect(),
            pruned_rules: if include_pruned {
                store.pruned().cloned().collect()
            } else {
                Vec::new()
            },
            fingerprints,
            merge_history: store.merge_history().cloned().collect(),
            lru_table: store.lru_table().clone(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.candidate_rules.len() + self.validated_rules.len()
    }

    /// # Errors
    ///
    /// `VersionMismatch` if the snapshot was written by another format version.
    pub fn check_version(&self) -> Result<(), SnapshotError> {
        check_version(self.metadata.version)
    }

    /// # Errors
    ///
    /// `Corrupt` if a rule cannot be serialized (e.g. a non-finite threshold).
    pub fn to_json(&self) -> Result<String, SnapshotError> {
        serde_json::to_string(self).map_err(|e| corrupt(format!("serialization failed: {e}")))
    }

    /// Parses a snapshot document, checking its version first.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` for another format version, `Corrupt` for anything
    /// that is not a well-formed snapshot.
    pub fn from_json(json: &str) -> Result<Self, SnapshotError> {
        Self::from_slice(json.as_bytes())
    }

    fn from_slice(bytes: &[u8]) -> Result<Self, SnapshotError> {
        let probe: VersionProbe =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("unreadable metadata: {e}")))?;
        check_version(probe.metadata.version)?;
        let snapshot: Self =
            serde_json::from_slice(bytes).map_err(|e| corrupt(format!("deserialization failed: {e}")))?;
        snapshot.check_consistency()?;
        Ok(snapshot)
    }

    /// Writes the snapshot to a framed, checksummed file.
    ///
    /// # Errors
    ///
    /// Serialization or I/O failures.
    pub fn write_to(&self, path: &Path) -> Result<(), SnapshotError> {
        let payload =
            serde_json::to_vec(self).map_err(|e| corrupt(format!("serialization failed: {e}")))?;
        codec::write_file(path, &payload)?;
        debug!(path = %path.display(), bytes = payload.len(), "snapshot written");
        Ok(())
    }

    /// Reads a snapshot file written by [`Snapshot::write_to`].
    ///
    /// # Errors
    ///
    /// I/O failures, checksum or framing errors, or a version mismatch.
    pub fn read_from(path: &Path) -> Result<Self, SnapshotError> {
        let payload = codec::read_file(path)?;
        Self::from_slice(&payload)
    }

    fn check_consistency(&self) -> Result<(), SnapshotError> {
        for (key, rule) in self.candidate_rules.iter().chain(self.validated_rules.iter()) {
            if *key != rule.id {
                return Err(corrupt(format!("rule keyed {key} carries id {}", rule.id)));
            }
        }
        if let Some(id) = self
            .candidate_rules
            .keys()
            .find(|id| self.validated_rules.contains_key(id))
        {
            return Err(corrupt(format!("rule {id} appears in both partitions")));
        }
        Ok(())
    }

    fn rules(&self) -> impl Iterator<Item = (Partition, &CandidateRule)> {
        self.candidate_rules
            .values()
            .map(|r| (Partition::Candidate, r))
            .chain(self.validated_rules.values().map(|r| (Partition::Validated, r)))
    }

    /// Builds the state that loading this snapshot into `current` would produce.
    ///
    /// `current` is not modified; the caller swaps the result in.
    ///
    /// # Errors
    ///
    /// `VersionMismatch` or `Corrupt`; no state is produced in that case.
    pub fn restore(
        &self,
        current: &RuleStore,
        mode: LoadMode,
        now: DateTime<Utc>,
    ) -> Result<(RuleStore, LoadReport), SnapshotError> {
        self.check_version()?;
        self.check_consistency()?;

        let mut report = LoadReport {
            mode,
            loaded: 0,
            skipped: 0,
            reassigned: 0,
        };

        let store = match mode {
            LoadMode::Replace => {
                let mut store = RuleStore::new(*current.limits());
                for (partition, rule) in self.rules() {
                    store.put(partition, rule.clone());
                    report.loaded += 1;
                }
                for entry in &self.fingerprints {
                    store.index_fingerprint(entry.fingerprint.clone(), entry.rule_id);
                }
                for (_, rule) in self.rules() {
                    let fingerprint = rule.fingerprint();
                    if !store.contains_fingerprint(&fingerprint) {
                        store.index_fingerprint(fingerprint, rule.id);
                    }
                }
                for (id, at) in &self.lru_table {
                    store.set_last_used(*id, *at);
                }
                fill_missing_lru(&mut store, now);
                for rule in &self.pruned_rules {
                    store.archive(rule.clone());
                }
                for record in &self.merge_history {
                    store.record_merge(record.clone());
                }
                store
            }
            LoadMode::Merge | LoadMode::Append => {
                let mut store = current.clone();
                for (partition, rule) in self.rules() {
                    let fingerprint = rule.fingerprint();
                    if mode == LoadMode::Merge && store.contains_fingerprint(&fingerprint) {
                        report.skipped += 1;
                        continue;
                    }
                    let mut rule = rule.clone();
                    let original = rule.id;
                    if store.partition_of(rule.id).is_some() {
                        rule.id = RuleId::new();
                        report.reassigned += 1;
                    }
                    let id = rule.id;
                    store.put(partition, rule);
                    if mode == LoadMode::Merge {
                        store.index_fingerprint(fingerprint, id);
                    }
                    store.set_last_used(id, self.lru_table.get(&original).copied().unwrap_or(now));
                    report.loaded += 1;
                }
                if mode == LoadMode::Append {
                    store.rebuild_fingerprints();
                }
                for rule in &self.pruned_rules {
                    store.archive(rule.clone());
                }
                for record in &self.merge_history {
                    store.record_merge(record.clone());
                }
                store
            }
        };

        info!(
            %mode,
            loaded = report.loaded,
            skipped = report.skipped,
            reassigned = report.reassigned,
            "snapshot restored"
        );
        Ok((store, report))
    }
}

fn fill_missing_lru(store: &mut RuleStore, now: DateTime<Utc>) {
    let missing: Vec<RuleId> = store
        .live()
        .map(|r| r.id)
        .filter(|id| store.last_used(*id).is_none())
        .collect();
    for id in missing {
        store.set_last_used(id, now);
    }
}

fn check_version(found: u32) -> Result<(), SnapshotError> {
    if found == SNAPSHOT_VERSION {
        Ok(())
    } else {
        Err(SnapshotError::VersionMismatch {
            expected: SNAPSHOT_VERSION,
            found,
        })
    }
}
