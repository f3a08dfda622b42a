//! Pressure-aware eviction ("pruning").
//!
//! Memory pressure is the fullest of the three capacity ratios (total,
//! candidate, validated). Pressure is banded into three regimes, and the
//! higher the regime the stricter the confidence floor and the shorter the
//! age limit applied to candidates.
//!
//! Validated rules are only touched under extreme pressure, and only when
//! their quality has fallen below a dedicated floor.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::rule::{CandidateRule, RuleId};
use crate::storage::RuleStore;

/// Pressure above which validated rules become evictable.
pub const EXTREME_PRESSURE: f64 = 0.9;

/// Pressure band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PressureRegime {
    Low,
    Medium,
    High,
}

impl PressureRegime {
    #[must_use]
    pub fn of(pressure: f64) -> Self {
        if pressure > 0.8 {
            Self::High
        } else if pressure > 0.6 {
            Self::Medium
        } else {
            Self::Low
        }
    }

    /// Multiplier applied to the confidence floor.
    #[must_use]
    pub const fn floor_scale(self) -> f32 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 1.2,
            Self::High => 1.5,
        }
    }

    /// Multiplier applied to the maximum age.
    #[must_use]
    pub const fn age_scale(self) -> f64 {
        match self {
            Self::Low => 1.0,
            Self::Medium => 0.75,
            Self::High => 0.5,
        }
    }
}

impl fmt::Display for PressureRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// Why a rule was evicted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionReason {
    LowConfidence,
    /// Older than the age limit and never activated.
    Stale,
    Contradicted,
    LowQuality,
    /// Not used for half the age limit while pressure is high.
    Idle,
    /// Trimmed to bring the candidate partition under its capacity.
    OverCapacity,
    /// Validated rule with low quality under extreme pressure.
    ValidatedLowQuality,
}

/// Outcome of one pruning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneReport {
    pub pressure: f64,
    pub regime: PressureRegime,
    pub evicted: Vec<(RuleId, EvictionReason)>,
}

impl PruneReport {
    pub fn evicted_count(&self) -> usize {
        self.evicted.len()
    }

    pub fn evicted_ids(&self) -> impl Iterator<Item = RuleId> + '_ {
        self.evicted.iter().map(|(id, _)| *id)
    }
}

/// Effective thresholds for one regime.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Effective {
    confidence_floor: f32,
    max_age_secs: f64,
}

/// Evicts low-value rules according to memory pressure.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EvictionManager {
    pub confidence_floor: f32,
    pub max_age_secs: i64,
    pub contradiction_ceiling: f32,
    pub min_quality_floor: f32,
    pub validated_quality_floor: f32,
    pub max_total_rules: usize,
    pub max_candidate_rules: usize,
    pub max_validated_rules: usize,
}

impl Default for EvictionManager {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for EvictionManager {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            confidence_floor: cfg.pruning_confidence_floor,
            max_age_secs: cfg.pruning_max_age_secs,
            contradiction_ceiling: cfg.contradiction_ceiling,
            min_quality_floor: cfg.min_quality_floor,
            validated_quality_floor: cfg.validated_quality_floor,
            max_total_rules: cfg.max_total_rules,
            max_candidate_rules: cfg.max_candidate_rules,
            max_validated_rules: cfg.max_validated_rules,
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn ratio(count: usize, cap: usize) -> f64 {
    count as f64 / cap.max(1) as f64
}

impl EvictionManager {
    /// `max(total/total_cap, candidate/candidate_cap, validated/validated_cap)`.
    #[must_use]
    pub fn memory_pressure(&self, store: &RuleStore) -> f64 {
        ratio(store.total_count(), self.max_total_rules)
            .max(ratio(store.candidate_count(), self.max_candidate_rules))
            .max(ratio(store.validated_count(), self.max_validated_rules))
    }

    fn effective(&self, regime: PressureRegime) -> Effective {
        #[allow(clippy::cast_precision_loss)]
        let max_age = self.max_age_secs as f64;
        Effective {
            confidence_floor: self.confidence_floor * regime.floor_scale(),
            max_age_secs: max_age * regime.age_scale(),
        }
    }

    /// Prunes using the store's current pressure.
    pub fn prune(&self, store: &mut RuleStore, now: DateTime<Utc>) -> PruneReport {
        let pressure = self.memory_pressure(store);
        self.prune_under_pressure(store, pressure, now)
    }

    /// Prunes as if memory pressure were `pressure`.
    ///
    /// Capacity trimming still uses the store's real counts.
    pub fn prune_under_pressure(&self, store: &mut RuleStore, pressure: f64, now: DateTime<Utc>) -> PruneReport {
        let pressure = if pressure.is_finite() { pressure.max(0.0) } else { 0.0 };
        let regime = PressureRegime::of(pressure);
        let eff = self.effective(regime);

        let mut evicted: Vec<(RuleId, EvictionReason)> = store
            .candidates()
            .filter_map(|rule| {
                self.candidate_reason(rule, store.last_used(rule.id), regime, eff, now)
                    .map(|reason| (rule.id, reason))
            })
            .collect();

        if pressure > EXTREME_PRESSURE {
            evicted.extend(
                store
                    .validated()
                    .filter(|r| r.quality() < self.validated_quality_floor)
                    .map(|r| (r.id, EvictionReason::ValidatedLowQuality)),
            );
        }

        for (id, reason) in &evicted {
            store.evict(*id);
            debug!(rule_id = %id, ?reason, "rule pruned");
        }

        for id in self.over_capacity(store, eff, now) {
            store.evict(id);
            debug!(rule_id = %id, reason = ?EvictionReason::OverCapacity, "rule pruned");
            evicted.push((id, EvictionReason::OverCapacity));
        }

        if !evicted.is_empty() {
            info!(
                pressure,
                %regime,
                evicted = evicted.len(),
                candidates = store.candidate_count(),
                validated = store.validated_count(),
                "pruning pass complete"
            );
        }
        PruneReport {
            pressure,
            regime,
            evicted,
        }
    }

    fn candidate_reason(
        &self,
        rule: &CandidateRule,
        last_used: Option<DateTime<Utc>>,
        regime: PressureRegime,
        eff: Effective,
        now: DateTime<Utc>,
    ) -> Option<EvictionReason> {
        #[allow(clippy::cast_precision_loss)]
        let age = rule.age_secs(now) as f64;
        if rule.confidence < eff.confidence_floor {
            Some(EvictionReason::LowConfidence)
        } else if age > eff.max_age_secs && rule.activation_count == 0 {
            Some(EvictionReason::Stale)
        } else if rule.contradiction_ratio() > self.contradiction_ceiling {
            Some(EvictionReason::Contradicted)
        } else if rule.quality() < self.min_quality_floor {
            Some(EvictionReason::LowQuality)
        } else if regime == PressureRegime::High && idle_secs(rule, last_used, now) > eff.max_age_secs / 2.0 {
            Some(EvictionReason::Idle)
        } else {
            None
        }
    }

    /// Candidates to trim, lowest `quality + recency` first.
    fn over_capacity(&self, store: &RuleStore, eff: Effective, now: DateTime<Utc>) -> Vec<RuleId> {
        let room = self
            .max_candidate_rules
            .min(self.max_total_rules.saturating_sub(store.validated_count()));
        let excess = store.candidate_count().saturating_sub(room);
        if excess == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, RuleId)> = store
            .candidates()
            .map(|r| (retention_score(r, store.last_used(r.id), eff.max_age_secs, now), r.id))
            .collect();
        scored.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal).then(a.1.cmp(&b.1)));
        scored.into_iter().take(excess).map(|(_, id)| id).collect()
    }
}

/// Seconds since the rule was last inserted, matched or served.
fn idle_secs(rule: &CandidateRule, last_used: Option<DateTime<Utc>>, now: DateTime<Utc>) -> f64 {
    let since = last_used
        .or(rule.last_activation)
        .unwrap_or(rule.birth_time);
    #[allow(clippy::cast_precision_loss)]
    let idle = (now - since).num_milliseconds().max(0) as f64 / 1000.0;
    idle
}

/// `quality + recency`, where recency falls linearly from 1 (just used) to 0
/// (idle for the whole effective age limit).
#[must_use]
pub fn retention_score(
    rule: &CandidateRule,
    last_used: Option<DateTime<Utc>>,
    max_age_secs: f64,
    now: DateTime<Utc>,
) -> f64 {
    let recency = if max_age_secs > 0.0 {
        1.0 - (idle_secs(rule, last_used, now) / max_age_secs).clamp(0.0, 1.0)
    } else {
        0.0
    };
    f64::from(rule.quality()) + recency
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Prediction};
    use crate::confidence::ConfidenceTier;
    use crate::observation::ObservationId;
    use crate::rule::{RuleStatus, RuleType};
    use chrono::Duration;

    fn rule(subject: &str, confidence: f32) -> CandidateRule {
        CandidateRule::draft(
            RuleType::Causal,
            vec![Condition::subject(subject), Condition::action(format!("act-{subject}"))],
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        )
        .with_confidence(confidence)
    }

    #[test]
    fn test_pressure_and_regimes() {
        let mgr = EvictionManager {
            max_candidate_rules: 10,
            ..EvictionManager::default()
        };
        let mut store = RuleStore::default();
        for i in 0..7 {
            store.insert(rule(&format!("s{i}"), 0.6), Utc::now());
        }
        assert!((mgr.memory_pressure(&store) - 0.7).abs() < 1e-9);
        assert_eq!(PressureRegime::of(0.7), PressureRegime::Medium);
        assert_eq!(PressureRegime::of(0.81), PressureRegime::High);
        assert_eq!(PressureRegime::of(0.6), PressureRegime::Low);
    }

    #[test]
    fn test_floor_scales_with_pressure() {
        let mgr = EvictionManager::default();
        let now = Utc::now();

        let mut store = RuleStore::default();
        let id = store.insert(rule("a", 0.13), now).rule_id();
        assert!(mgr.prune_under_pressure(&mut store, 0.1, now).evicted.is_empty());

        let report = mgr.prune_under_pressure(&mut store, 0.85, now);
        assert_eq!(report.evicted, vec![(id, EvictionReason::LowConfidence)]);
        assert_eq!(store.pruned().next().unwrap().status, RuleStatus::Pruned);
    }

    #[test]
    fn test_stale_and_contradicted_candidates() {
        let mgr = EvictionManager::default();
        let now = Utc::now();
        let mut store = RuleStore::default();

        let old = store
            .insert(rule("old", 0.6).born_at(now - Duration::hours(2)), now)
            .rule_id();
        let contradicted = store
            .insert(
                rule("noisy", 0.6).with_evidence(
                    [ObservationId::new()],
                    (0..3).map(|_| ObservationId::new()),
                    8,
                ),
                now,
            )
            .rule_id();
        let keep = store.insert(rule("fine", 0.6), now).rule_id();

        let report = mgr.prune_under_pressure(&mut store, 0.0, now);
        assert!(report.evicted.contains(&(old, EvictionReason::Stale)));
        assert!(report.evicted.contains(&(contradicted, EvictionReason::Contradicted)));
        assert!(store.get(keep).is_some());
    }

    #[test]
    fn test_idle_only_under_high_pressure() {
        let mgr = EvictionManager::default();
        let now = Utc::now();
        let mut store = RuleStore::default();
        let mut r = rule("idle", 0.6);
        r.activation_count = 3;
        let id = store.insert(r, now - Duration::minutes(20)).rule_id();

        assert!(mgr.prune_under_pressure(&mut store, 0.7, now).evicted.is_empty());
        let report = mgr.prune_under_pressure(&mut store, 0.85, now);
        assert_eq!(report.evicted, vec![(id, EvictionReason::Idle)]);
    }

    #[test]
    fn test_validated_rules_need_extreme_pressure() {
        let mgr = EvictionManager::default();
        let now = Utc::now();
        let mut store = RuleStore::default();
        let mut weak = rule("weak", 0.0).with_strength(0.0);
        weak.scores.generalization = 0.0;
        weak.evidence.record_contradiction(ObservationId::new(), 8);
        let id = store.insert(weak, now).rule_id();
        store.promote(id);

        assert!(mgr.prune_under_pressure(&mut store, 0.85, now).evicted.is_empty());
        let report = mgr.prune_under_pressure(&mut store, 0.95, now);
        assert_eq!(report.evicted, vec![(id, EvictionReason::ValidatedLowQuality)]);
        assert!(store.get(id).is_none());
    }

    #[test]
    fn test_capacity_trim_removes_lowest_retention() {
        let mgr = EvictionManager {
            max_candidate_rules: 3,
            ..EvictionManager::default()
        };
        let now = Utc::now();
        let mut store = RuleStore::default();
        let ids: Vec<RuleId> = [0.5, 0.3, 0.6, 0.35, 0.55]
            .iter()
            .enumerate()
            .map(|(i, c)| store.insert(rule(&format!("s{i}"), *c), now).rule_id())
            .collect();

        let report = mgr.prune(&mut store, now);
        assert_eq!(store.candidate_count(), 3);
        let mut trimmed: Vec<RuleId> = report.evicted_ids().collect();
        trimmed.sort();
        let mut expected = vec![ids[1], ids[3]];
        expected.sort();
        assert_eq!(trimmed, expected);
    }
}
