//! The rule lifecycle engine.
//!
//! [`RuleEngine`] owns every piece of state (the rule store, seen observation
//! ids, queued feedback and counters) and exposes the lifecycle phases as
//! discrete, synchronous operations. A driver invokes them in whatever order
//! it needs; [`RuleEngine::run_cycle`] runs one full validate, bloom, promote,
//! prune cycle.
//!
//! The engine performs no internal locking. Callers sharing one engine across
//! threads must wrap it in their own mutex.

use std::collections::{HashSet, VecDeque};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::condition::QueryContext;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::fingerprint::Fingerprint;
use crate::generation::HypothesisGenerator;
use crate::grouping::ObservationGrouper;
use crate::observation::{Observation, ObservationId};
use crate::promotion::PromotionGate;
use crate::pruning::{EvictionManager, PruneReport};
use crate::rule::{CandidateRule, RuleId};
use crate::snapshot::{LoadMode, LoadReport, Snapshot};
use crate::storage::{InsertOutcome, MergeRecord, RuleStore, StoreLimits};
use crate::validator::{StatusChange, ValidationReport, Validator};

/// Aggregate lifetime counters, persisted with snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCounters {
    pub observations_seen: u64,
    pub blooms: u64,

    /// Blooms skipped by the novelty gate.
    pub gated_blooms: u64,

    pub drafts_generated: u64,
    pub template_skips: u64,
    pub rules_inserted: u64,
    pub duplicates_rejected: u64,
    pub rules_merged: u64,
    pub validation_passes: u64,
    pub validation_failures: u64,
    pub rules_promoted: u64,
    pub rules_deprecated: u64,
    pub rules_pruned: u64,
}

impl EngineCounters {
    fn record_insert(&mut self, outcome: &InsertOutcome) {
        match outcome {
            InsertOutcome::Inserted(_) => self.rules_inserted += 1,
            InsertOutcome::Duplicate(_) => self.duplicates_rejected += 1,
            InsertOutcome::Merged { .. } => self.rules_merged += 1,
        }
    }
}

/// Outcome of one bloom.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BloomReport {
    /// Observations passed in.
    pub observations: usize,

    /// Observations not seen by an earlier bloom.
    pub new_observations: usize,

    /// True when the novelty gate skipped generation.
    pub gated: bool,

    pub drafts: usize,
    pub template_skips: usize,
    pub inserted: Vec<RuleId>,
    pub duplicates: usize,
    pub merged: usize,
}

/// Outcome of one [`RuleEngine::run_cycle`].
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
    pub validation: ValidationReport,
    pub bloom: BloomReport,
    pub promoted: Vec<RuleId>,
    pub prune: PruneReport,
}

/// Owns the rule store and runs the lifecycle phases against it.
#[derive(Debug, Clone)]
pub struct RuleEngine {
    config: EngineConfig,
    store: RuleStore,
    grouper: ObservationGrouper,
    generator: HypothesisGenerator,
    validator: Validator,
    gate: PromotionGate,
    eviction: EvictionManager,

    seen: HashSet<ObservationId>,
    seen_order: VecDeque<ObservationId>,

    /// Outcomes reported through [`RuleEngine::record_outcome`], consumed by
    /// the next validation pass.
    feedback: VecDeque<Observation>,

    counters: EngineCounters,
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl RuleEngine {
    /// Creates an engine with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    /// Creates an engine; out-of-range options are clamped.
    #[must_use]
    pub fn with_config(config: EngineConfig) -> Self {
        let config = config.sanitized();
        Self {
            store: RuleStore::new(StoreLimits::from(&config)),
            grouper: ObservationGrouper::new(
                config.max_observations_per_bloom,
                config.min_new_experiences,
                config.min_distinct_signatures,
            ),
            generator: HypothesisGenerator::new(
                config.generation_min_group_size,
                config.sequence_window_secs,
                config.evidence_id_limit,
            ),
            validator: Validator::from_config(&config),
            gate: PromotionGate::from(&config),
            eviction: EvictionManager::from(&config),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
            feedback: VecDeque::new(),
            counters: EngineCounters::default(),
            config,
        }
    }

    /// Creates an engine from a JSON configuration document.
    ///
    /// # Errors
    ///
    /// `Config` if the document cannot be parsed.
    pub fn from_config_json(json: &str) -> EngineResult<Self> {
        Ok(Self::with_config(EngineConfig::from_json_str(json)?))
    }

    // ------------------------------------------------------------------
    // Blooming
    // ------------------------------------------------------------------

    /// Generates drafts from a batch and inserts them with dedup and merging.
    ///
    /// Observations already processed by an earlier bloom are ignored. When
    /// the remaining batch fails the novelty gate nothing is generated and the
    /// observations are not marked seen. Only observations that survive the
    /// per-bloom cap are marked seen; the rest may be fed again later.
    pub fn bloom(&mut self, observations: &[Observation]) -> BloomReport {
        self.bloom_at(observations, Utc::now())
    }

    pub fn bloom_at(&mut self, observations: &[Observation], now: DateTime<Utc>) -> BloomReport {
        let mut batch_ids = HashSet::new();
        let fresh: Vec<&Observation> = observations
            .iter()
            .filter(|o| !self.seen.contains(&o.id) && batch_ids.insert(o.id))
            .collect();

        let mut report = BloomReport {
            observations: observations.len(),
            new_observations: fresh.len(),
            ..BloomReport::default()
        };

        if !self.grouper.has_sufficient_new_experiences(&fresh) {
            report.gated = true;
            self.counters.gated_blooms += 1;
            debug!(
                observations = report.observations,
                new = report.new_observations,
                "bloom gated: not enough new experience"
            );
            return report;
        }

        let grouped = self.grouper.group(&fresh);
        for obs in &grouped.observations {
            self.remember(obs.id);
        }
        self.counters.observations_seen += grouped.observations.len() as u64;
        if grouped.observations.len() < fresh.len() {
            debug!(
                kept = grouped.observations.len(),
                dropped = fresh.len() - grouped.observations.len(),
                "bloom batch capped"
            );
        }

        let output = self.generator.generate(&grouped);
        report.drafts = output.drafts.len();
        report.template_skips = output.template_skips;

        for draft in output.drafts {
            let outcome = self.store.insert(draft.born_at(now), now);
            self.counters.record_insert(&outcome);
            match outcome {
                InsertOutcome::Inserted(id) => report.inserted.push(id),
                InsertOutcome::Duplicate(_) => report.duplicates += 1,
                InsertOutcome::Merged { .. } => report.merged += 1,
            }
        }

        self.counters.blooms += 1;
        self.counters.drafts_generated += report.drafts as u64;
        self.counters.template_skips += report.template_skips as u64;
        info!(
            observations = report.new_observations,
            drafts = report.drafts,
            inserted = report.inserted.len(),
            duplicates = report.duplicates,
            merged = report.merged,
            "bloom complete"
        );
        report
    }

    fn remember(&mut self, id: ObservationId) {
        if self.seen.insert(id) {
            self.seen_order.push_back(id);
        }
        while self.seen_order.len() > self.config.seen_observation_limit {
            if let Some(old) = self.seen_order.pop_front() {
                self.seen.remove(&old);
            }
        }
    }

    /// Inserts an externally built rule through the dedup and merge path.
    pub fn insert_rule(&mut self, rule: CandidateRule) -> InsertOutcome {
        let outcome = self.store.insert(rule, Utc::now());
        self.counters.record_insert(&outcome);
        outcome
    }

    // ------------------------------------------------------------------
    // Validation and promotion
    // ------------------------------------------------------------------

    /// Validates every live rule against the batch plus any queued feedback,
    /// then runs the promotion gate.
    pub fn validate_batch(&mut self, observations: &[Observation]) -> ValidationReport {
        self.validate_batch_at(observations, Utc::now())
    }

    pub fn validate_batch_at(&mut self, observations: &[Observation], now: DateTime<Utc>) -> ValidationReport {
        let feedback = std::mem::take(&mut self.feedback);
        let batch: Vec<&Observation> = feedback.iter().chain(observations).collect();
        let mut report = self.validator.validate(&mut self.store, &batch, now);
        report.promoted = self.promote();

        self.counters.validation_passes += 1;
        self.counters.validation_failures += report.failures as u64;
        self.counters.rules_deprecated += report.deprecated.len() as u64;
        info!(
            observations = report.observations,
            checked = report.rules_checked,
            updated = report.rules_updated,
            failures = report.failures,
            promoted = report.promoted.len(),
            "validation complete"
        );
        report
    }

    /// Validates a single rule against a batch, then runs the promotion gate.
    ///
    /// Returns `None` when no observation in the batch matched the rule.
    ///
    /// # Errors
    ///
    /// `RuleNotFound` for an unknown id and `Validation` for a malformed rule;
    /// the rule is left unchanged in both cases.
    pub fn validate_rule(&mut self, id: RuleId, observations: &[Observation]) -> EngineResult<Option<StatusChange>> {
        let batch: Vec<&Observation> = observations.iter().collect();
        let window = self.validator.window(&batch);
        let change = self.validator.validate_rule(&mut self.store, id, &window, Utc::now())?;
        if change == Some(StatusChange::Deprecated) {
            self.counters.rules_deprecated += 1;
        }
        if change.is_some() {
            self.promote();
        }
        Ok(change)
    }

    /// Queues an observed outcome for the next validation pass.
    pub fn record_outcome(&mut self, observation: Observation) {
        if self.feedback.len() >= self.config.seen_observation_limit {
            warn!(
                limit = self.config.seen_observation_limit,
                "feedback queue full, dropping oldest outcome"
            );
            self.feedback.pop_front();
        }
        self.feedback.push_back(observation);
    }

    /// Promotes every candidate that passes the gate without new observations.
    /// Validation passes run the same gate on their own.
    pub fn promote(&mut self) -> Vec<RuleId> {
        let promoted = self.gate.run(&mut self.store);
        self.counters.rules_promoted += promoted.len() as u64;
        promoted
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    pub fn memory_pressure(&self) -> f64 {
        self.eviction.memory_pressure(&self.store)
    }

    pub fn prune(&mut self) -> PruneReport {
        self.prune_at(Utc::now())
    }

    /// Prunes with `now` as the reference time for ages and idle times.
    pub fn prune_at(&mut self, now: DateTime<Utc>) -> PruneReport {
        let report = self.eviction.prune(&mut self.store, now);
        self.counters.rules_pruned += report.evicted_count() as u64;
        report
    }

    /// Prunes as if memory pressure were `pressure`.
    pub fn prune_under_pressure(&mut self, pressure: f64) -> PruneReport {
        let report = self.eviction.prune_under_pressure(&mut self.store, pressure, Utc::now());
        self.counters.rules_pruned += report.evicted_count() as u64;
        report
    }

    /// Runs one full cycle: validate existing rules, bloom new drafts from the
    /// same batch, promote, then prune. `promoted` covers both gate runs.
    ///
    /// Validation runs first so rules drafted from a batch are not scored
    /// against the observations that produced them.
    pub fn run_cycle(&mut self, observations: &[Observation]) -> CycleReport {
        let now = Utc::now();
        let validation = self.validate_batch_at(observations, now);
        let bloom = self.bloom_at(observations, now);
        let mut promoted = validation.promoted.clone();
        promoted.extend(self.promote());
        let prune = self.prune_at(now);
        CycleReport {
            validation,
            bloom,
            promoted,
            prune,
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Live rules whose conditions the query does not contradict, ordered by
    /// descending quality. Served rules count as used for LRU purposes.
    pub fn get_applicable_rules(&mut self, query: &QueryContext) -> Vec<&CandidateRule> {
        let mut ranked: Vec<(f32, RuleId)> = self
            .store
            .live()
            .filter(|r| r.conditions.iter().all(|c| query.admits(c)))
            .map(|r| (r.quality(), r.id))
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));

        let now = Utc::now();
        for (_, id) in &ranked {
            self.store.touch(*id, now);
        }
        ranked.iter().filter_map(|(_, id)| self.store.get(*id)).collect()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Captures the current state.
    #[must_use]
    pub fn save(&self, include_pruned: bool) -> Snapshot {
        Snapshot::capture(&self.store, &self.counters, include_pruned, Utc::now())
    }

    /// Loads a snapshot. On any error the engine is left untouched.
    ///
    /// `Replace` also adopts the snapshot's counters.
    ///
    /// # Errors
    ///
    /// `Snapshot` for a version mismatch or an inconsistent document.
    pub fn load(&mut self, snapshot: &Snapshot, mode: LoadMode) -> EngineResult<LoadReport> {
        match snapshot.restore(&self.store, mode, Utc::now()) {
            Ok((store, report)) => {
                self.store = store;
                if mode == LoadMode::Replace {
                    self.counters = snapshot.metadata.counters.clone();
                }
                Ok(report)
            }
            Err(e) => {
                warn!(%mode, error = %e, "snapshot rejected, state unchanged");
                Err(EngineError::from(e))
            }
        }
    }

    /// # Errors
    ///
    /// `Snapshot` if a rule cannot be serialized.
    pub fn to_json(&self, include_pruned: bool) -> EngineResult<String> {
        Ok(self.save(include_pruned).to_json()?)
    }

    /// Parses a JSON snapshot and loads it.
    ///
    /// # Errors
    ///
    /// `Snapshot` for unreadable documents or a version mismatch.
    pub fn load_json(&mut self, json: &str, mode: LoadMode) -> EngineResult<LoadReport> {
        let snapshot = Snapshot::from_json(json).map_err(|e| {
            warn!(error = %e, "snapshot rejected, state unchanged");
            EngineError::from(e)
        })?;
        self.load(&snapshot, mode)
    }

    /// Builds a fresh engine from a JSON snapshot.
    ///
    /// # Errors
    ///
    /// `Snapshot` for unreadable documents or a version mismatch.
    pub fn from_json(config: EngineConfig, json: &str) -> EngineResult<Self> {
        let mut engine = Self::with_config(config);
        engine.load_json(json, LoadMode::Replace)?;
        Ok(engine)
    }

    /// Writes a checksummed snapshot file atomically.
    ///
    /// # Errors
    ///
    /// `Snapshot` for serialization or I/O failures.
    pub fn save_to_path(&self, path: impl AsRef<Path>, include_pruned: bool) -> EngineResult<()> {
        self.save(include_pruned).write_to(path.as_ref())?;
        Ok(())
    }

    /// Loads a snapshot file written by [`RuleEngine::save_to_path`].
    ///
    /// # Errors
    ///
    /// `Snapshot` for I/O failures, corrupt files or a version mismatch.
    pub fn load_from_path(&mut self, path: impl AsRef<Path>, mode: LoadMode) -> EngineResult<LoadReport> {
        let path = path.as_ref();
        let snapshot = Snapshot::read_from(path).map_err(|e| {
            warn!(path = %path.display(), error = %e, "snapshot rejected, state unchanged");
            EngineError::from(e)
        })?;
        self.load(&snapshot, mode)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub const fn store(&self) -> &RuleStore {
        &self.store
    }

    pub const fn counters(&self) -> &EngineCounters {
        &self.counters
    }

    pub fn rule(&self, id: RuleId) -> Option<&CandidateRule> {
        self.store.get(id)
    }

    pub fn candidates(&self) -> impl Iterator<Item = &CandidateRule> {
        self.store.candidates()
    }

    pub fn validated(&self) -> impl Iterator<Item = &CandidateRule> {
        self.store.validated()
    }

    pub fn pruned(&self) -> impl Iterator<Item = &CandidateRule> {
        self.store.pruned()
    }

    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.store.fingerprints()
    }

    pub fn merge_history(&self) -> impl Iterator<Item = &MergeRecord> {
        self.store.merge_history()
    }

    /// Outcomes waiting for the next validation pass.
    pub const fn pending_feedback(&self) -> &VecDeque<Observation> {
        &self.feedback
    }

    pub fn has_seen(&self, id: ObservationId) -> bool {
        self.seen.contains(&id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Prediction};
    use crate::confidence::ConfidenceTier;
    use crate::observation::Outcome;
    use crate::rule::RuleType;
    use crate::storage::Partition;

    fn strike(success: bool) -> Observation {
        let outcome = if success { Outcome::success(1.0) } else { Outcome::failure(-1.0) };
        Observation::new("arena", "goblin", "strike", outcome)
    }

    fn causal_rule(subject: &str, action: &str) -> CandidateRule {
        CandidateRule::draft(
            RuleType::Causal,
            vec![Condition::subject(subject), Condition::action(action)],
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        )
    }

    #[test]
    fn test_bloom_ignores_seen_observations() {
        let mut engine = RuleEngine::new();
        let batch = vec![strike(true), strike(true), strike(false)];

        let first = engine.bloom(&batch);
        assert!(!first.gated);
        assert!(first.drafts > 0);
        assert!(batch.iter().all(|o| engine.has_seen(o.id)));
        let count = engine.store().total_count();

        let second = engine.bloom(&batch);
        assert!(second.gated);
        assert_eq!(second.new_observations, 0);
        assert_eq!(engine.store().total_count(), count);
        assert_eq!(engine.counters().gated_blooms, 1);
    }

    #[test]
    fn test_novelty_gate_leaves_observations_unseen() {
        let mut engine = RuleEngine::with_config(EngineConfig {
            min_new_experiences: 3,
            ..EngineConfig::default()
        });
        let batch = vec![strike(true)];
        assert!(engine.bloom(&batch).gated);
        assert!(!engine.has_seen(batch[0].id));
        assert!(engine.store().is_empty());
    }

    #[test]
    fn test_seen_memory_is_bounded() {
        let mut engine = RuleEngine::with_config(EngineConfig {
            seen_observation_limit: 2,
            ..EngineConfig::default()
        });
        let batch = vec![strike(true), strike(true), strike(false)];
        engine.bloom(&batch);
        let remembered = batch.iter().filter(|o| engine.has_seen(o.id)).count();
        assert_eq!(remembered, 2);
    }

    #[test]
    fn test_capped_observations_stay_unseen() {
        let mut engine = RuleEngine::with_config(EngineConfig {
            max_observations_per_bloom: 4,
            ..EngineConfig::default()
        });
        let batch: Vec<Observation> = (0..8).map(|_| strike(true)).collect();

        engine.bloom(&batch);
        // Two most recent plus one representative of the older half.
        let remembered = batch.iter().filter(|o| engine.has_seen(o.id)).count();
        assert_eq!(remembered, 3);
        assert_eq!(engine.counters().observations_seen, 3);

        let again = engine.bloom(&batch);
        assert_eq!(again.new_observations, 5);
    }

    #[test]
    fn test_feedback_queue_drops_oldest() {
        let mut engine = RuleEngine::with_config(EngineConfig {
            seen_observation_limit: 2,
            ..EngineConfig::default()
        });
        let outcomes = vec![strike(true), strike(false), strike(true)];
        for obs in &outcomes {
            engine.record_outcome(obs.clone());
        }

        let pending: Vec<ObservationId> = engine.pending_feedback().iter().map(|o| o.id).collect();
        assert_eq!(pending, vec![outcomes[1].id, outcomes[2].id]);
    }

    #[test]
    fn test_validation_pass_promotes_eligible_candidates() {
        let mut engine = RuleEngine::new();
        engine.bloom(&(0..5).map(|_| strike(true)).collect::<Vec<_>>());

        let report = engine.validate_batch(&(0..10).map(|_| strike(true)).collect::<Vec<_>>());

        assert!(!report.promoted.is_empty());
        assert_eq!(engine.counters().rules_promoted, report.promoted.len() as u64);
        for id in &report.promoted {
            assert_eq!(engine.store().partition_of(*id), Some(Partition::Validated));
        }
        let gate = PromotionGate::from(engine.config());
        assert!(engine.candidates().all(|r| !gate.admits(r)));
    }

    #[test]
    fn test_single_rule_validation_runs_gate() {
        let mut engine = RuleEngine::new();
        let mut rule = causal_rule("goblin", "strike").with_confidence(0.9);
        rule.activation_count = 4;
        let id = engine.insert_rule(rule).rule_id();

        let change = engine.validate_rule(id, &[strike(true)]).unwrap();

        assert!(change.is_some());
        assert_eq!(engine.rule(id).map(|r| r.activation_count), Some(5));
        assert_eq!(engine.store().partition_of(id), Some(Partition::Validated));
        assert_eq!(engine.counters().rules_promoted, 1);
    }

    #[test]
    fn test_nan_merge_threshold_keeps_unrelated_rules_apart() {
        let mut engine = RuleEngine::with_config(EngineConfig {
            merge_similarity_threshold: f32::NAN,
            ..EngineConfig::default()
        });
        for i in 0..10 {
            let outcome = engine.insert_rule(causal_rule(&format!("subject-{i}"), &format!("action-{i}")));
            assert!(outcome.is_inserted());
        }
        assert_eq!(engine.store().total_count(), 10);
    }

    #[test]
    fn test_feedback_is_consumed_by_next_validation() {
        let mut engine = RuleEngine::new();
        engine.bloom(&[strike(true), strike(true)]);

        engine.record_outcome(strike(true));
        assert_eq!(engine.pending_feedback().len(), 1);

        let report = engine.validate_batch(&[]);
        assert_eq!(report.observations, 1);
        assert!(report.rules_updated > 0);
        assert!(engine.pending_feedback().is_empty());
    }

    #[test]
    fn test_applicable_rules_are_filtered_and_ranked() {
        let mut engine = RuleEngine::new();
        engine.bloom(&[strike(true), strike(true), strike(false)]);
        engine.bloom(&[Observation::new("arena", "troll", "flee", Outcome::success(0.5))]);

        let query = QueryContext::new().subject("goblin");
        let rules = engine.get_applicable_rules(&query);
        assert!(!rules.is_empty());
        assert!(rules
            .iter()
            .all(|r| r.conditions.iter().all(|c| query.admits(c))));
        assert!(rules.windows(2).all(|w| w[0].quality() >= w[1].quality()));
    }

    #[test]
    fn test_validate_unknown_rule_is_not_found() {
        let mut engine = RuleEngine::new();
        let err = engine.validate_rule(RuleId::new(), &[strike(true)]).unwrap_err();
        assert!(matches!(err, EngineError::RuleNotFound { .. }));
    }

    #[test]
    fn test_insert_rule_counts_outcomes() {
        let mut engine = RuleEngine::new();
        let rule = CandidateRule::draft(
            RuleType::Causal,
            vec![Condition::subject("goblin")],
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        );
        assert!(engine.insert_rule(rule.clone()).is_inserted());
        assert!(engine.insert_rule(rule).is_duplicate());
        assert_eq!(engine.counters().rules_inserted, 1);
        assert_eq!(engine.counters().duplicates_rejected, 1);
    }

    #[test]
    fn test_failed_load_leaves_state_unchanged() {
        let mut engine = RuleEngine::new();
        engine.bloom(&[strike(true), strike(true)]);
        let before = engine.fingerprints();

        let err = engine
            .load_json(r#"{"metadata":{"version":7,"saved_at":"2024-01-01T00:00:00Z"}}"#, LoadMode::Replace)
            .unwrap_err();
        assert!(err.is_version_mismatch());
        assert_eq!(engine.fingerprints(), before);
    }
}
