//! Auto-promotion gate.
//!
//! A candidate moves to the validated partition only when it has been
//! activated often enough, is confident enough, and is rarely contradicted.
//! Promotion is a partition move; the rule keeps its id and statistics.

use tracing::info;

use crate::config::EngineConfig;
use crate::rule::{CandidateRule, RuleId};
use crate::storage::RuleStore;

/// Thresholds a candidate must meet to be promoted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PromotionGate {
    pub repeat_threshold: u64,
    pub confidence_threshold: f32,
    pub max_contradiction_ratio: f32,
}

impl Default for PromotionGate {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for PromotionGate {
    fn from(cfg: &EngineConfig) -> Self {
        Self {
            repeat_threshold: cfg.auto_promote_repeat_threshold,
            confidence_threshold: cfg.auto_promote_confidence_threshold,
            max_contradiction_ratio: cfg.auto_promote_max_contradiction_ratio,
        }
    }
}

impl PromotionGate {
    /// Returns true if the rule passes every threshold.
    #[must_use]
    pub fn admits(&self, rule: &CandidateRule) -> bool {
        rule.activation_count >= self.repeat_threshold
            && rule.confidence >= self.confidence_threshold
            && rule.contradiction_ratio() <= self.max_contradiction_ratio
    }

    /// Promotes every admitted candidate. Returns the promoted ids in id order.
    pub fn run(&self, store: &mut RuleStore) -> Vec<RuleId> {
        let eligible: Vec<RuleId> = store
            .candidates()
            .filter(|r| self.admits(r))
            .map(|r| r.id)
            .collect();
        let mut promoted = Vec::with_capacity(eligible.len());
        for id in eligible {
            if store.promote(id) {
                info!(rule_id = %id, "rule promoted to validated");
                promoted.push(id);
            }
        }
        promoted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{Condition, Prediction};
    use crate::confidence::ConfidenceTier;
    use crate::observation::ObservationId;
    use crate::rule::{RuleStatus, RuleType};
    use crate::storage::Partition;
    use chrono::Utc;

    fn rule(confidence: f32, activations: u64, supports: usize, contradictions: usize) -> CandidateRule {
        let mut r = CandidateRule::draft(
            RuleType::Causal,
            vec![Condition::subject("A"), Condition::action("strike")],
            vec![Prediction::Outcome { success: true }],
            ConfidenceTier::Grouped,
        )
        .with_confidence(confidence)
        .with_evidence(
            (0..supports).map(|_| ObservationId::new()),
            (0..contradictions).map(|_| ObservationId::new()),
            64,
        );
        r.activation_count = activations;
        r
    }

    #[test]
    fn test_gate_thresholds() {
        let gate = PromotionGate::default();
        assert!(gate.admits(&rule(0.8, 5, 9, 1)));
        assert!(!gate.admits(&rule(0.8, 4, 9, 1)));
        assert!(!gate.admits(&rule(0.69, 5, 9, 1)));
        assert!(!gate.admits(&rule(0.8, 5, 3, 1)));
        // No evidence counts as no contradictions.
        assert!(gate.admits(&rule(0.8, 5, 0, 0)));
    }

    #[test]
    fn test_run_moves_partitions() {
        let mut store = RuleStore::default();
        let id = store.insert(rule(0.9, 6, 4, 0), Utc::now()).rule_id();
        // Insertion keeps the draft's statistics.
        let promoted = PromotionGate::default().run(&mut store);

        assert_eq!(promoted, vec![id]);
        assert_eq!(store.partition_of(id), Some(Partition::Validated));
        assert_eq!(store.get(id).unwrap().status, RuleStatus::Validated);
        assert_eq!(store.total_count(), 1);
        assert!(PromotionGate::default().run(&mut store).is_empty());
    }
}
