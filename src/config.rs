//! Engine configuration.
//!
//! Every option has a documented default, so partial JSON documents are
//! accepted. Out-of-range numeric values never fail: [`EngineConfig::sanitized`]
//! clamps each one to its nearest valid bound and logs a warning.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::ConfigError;

/// Tunable knobs of the rule lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Minimum observations in a sub-group before a template drafts from it.
    ///
    /// Low values maximize recall and push precision control onto dedup and
    /// pruning; raise it to trade recall for less churn.
    pub generation_min_group_size: usize,

    /// Base confidence below which candidates are evicted.
    pub pruning_confidence_floor: f32,

    /// Base age (seconds) after which never-activated candidates are evicted.
    pub pruning_max_age_secs: i64,

    /// Candidates whose contradiction ratio exceeds this are evicted.
    pub contradiction_ceiling: f32,

    /// Candidates validated at or above this become provisional; validated
    /// rules that fall below it are deprecated back to the candidate partition.
    pub validation_confidence_threshold: f32,

    pub auto_promote_repeat_threshold: u64,
    pub auto_promote_confidence_threshold: f32,
    pub auto_promote_max_contradiction_ratio: f32,

    pub max_total_rules: usize,
    pub max_candidate_rules: usize,
    pub max_validated_rules: usize,

    /// Similarity above which a new draft is merged into an existing rule.
    pub merge_similarity_threshold: f32,

    /// Candidates with quality below this are evicted.
    pub min_quality_floor: f32,

    /// Validated rules below this quality are evicted under extreme pressure.
    pub validated_quality_floor: f32,

    /// Observations considered per bloom; larger batches are down-sampled.
    pub max_observations_per_bloom: usize,

    /// Minimum unseen observations required to bloom at all.
    pub min_new_experiences: usize,

    /// Minimum distinct (subject, action, instrument, success) signatures required to bloom.
    pub min_distinct_signatures: usize,

    /// Maximum gap (seconds) between two observations forming a sequence.
    pub sequence_window_secs: i64,

    /// Existing rules compared per insertion; 0 means unlimited.
    pub similarity_scan_limit: usize,

    pub pruned_archive_size: usize,
    pub merge_history_limit: usize,

    /// Observation ids retained per evidence list; counters stay exact.
    pub evidence_id_limit: usize,

    /// Processed observation ids remembered for novelty gating.
    pub seen_observation_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            generation_min_group_size: 1,
            pruning_confidence_floor: 0.1,
            pruning_max_age_secs: 3600,
            contradiction_ceiling: 0.6,
            validation_confidence_threshold: 0.7,
            auto_promote_repeat_threshold: 5,
            auto_promote_confidence_threshold: 0.7,
            auto_promote_max_contradiction_ratio: 0.2,
            max_total_rules: 2000,
            max_candidate_rules: 1500,
            max_validated_rules: 500,
            merge_similarity_threshold: 0.9,
            min_quality_floor: 0.1,
            validated_quality_floor: 0.25,
            max_observations_per_bloom: 200,
            min_new_experiences: 1,
            min_distinct_signatures: 1,
            sequence_window_secs: 30,
            similarity_scan_limit: 4096,
            pruned_archive_size: 100,
            merge_history_limit: 500,
            evidence_id_limit: 64,
            seen_observation_limit: 10_000,
        }
    }
}

/// Clamps into `[0, 1]`. NaN has no nearest bound and falls back to `default`.
fn clamp_fraction(name: &str, value: &mut f32, default: f32) {
    let clamped = if value.is_nan() { default } else { value.clamp(0.0, 1.0) };
    if clamped.to_bits() != value.to_bits() {
        warn!(option = name, value = %value, clamped = %clamped, "config value out of range, clamped");
        *value = clamped;
    }
}

fn clamp_min_usize(name: &str, value: &mut usize, min: usize) {
    if *value < min {
        warn!(option = name, value = *value, clamped = min, "config value out of range, clamped");
        *value = min;
    }
}

fn clamp_min_i64(name: &str, value: &mut i64, min: i64) {
    if *value < min {
        warn!(option = name, value = *value, clamped = min, "config value out of range, clamped");
        *value = min;
    }
}

impl EngineConfig {
    /// Parses a (possibly partial) JSON document and sanitizes it.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Parse` if the document is not valid JSON or has
    /// fields of the wrong type. Out-of-range values are clamped, not rejected.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let cfg: Self = serde_json::from_str(s).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })?;
        Ok(cfg.sanitized())
    }

    /// Returns a copy with every option clamped into its valid range.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        let defaults = Self::default();
        clamp_min_usize("generation_min_group_size", &mut self.generation_min_group_size, 1);
        clamp_fraction(
            "pruning_confidence_floor",
            &mut self.pruning_confidence_floor,
            defaults.pruning_confidence_floor,
        );
        clamp_min_i64("pruning_max_age_secs", &mut self.pruning_max_age_secs, 1);
        clamp_fraction(
            "contradiction_ceiling",
            &mut self.contradiction_ceiling,
            defaults.contradiction_ceiling,
        );
        clamp_fraction(
            "validation_confidence_threshold",
            &mut self.validation_confidence_threshold,
            defaults.validation_confidence_threshold,
        );
        clamp_fraction(
            "auto_promote_confidence_threshold",
            &mut self.auto_promote_confidence_threshold,
            defaults.auto_promote_confidence_threshold,
        );
        clamp_fraction(
            "auto_promote_max_contradiction_ratio",
            &mut self.auto_promote_max_contradiction_ratio,
            defaults.auto_promote_max_contradiction_ratio,
        );
        clamp_min_usize("max_total_rules", &mut self.max_total_rules, 1);
        clamp_min_usize("max_candidate_rules", &mut self.max_candidate_rules, 1);
        clamp_min_usize("max_validated_rules", &mut self.max_validated_rules, 1);
        clamp_fraction(
            "merge_similarity_threshold",
            &mut self.merge_similarity_threshold,
            defaults.merge_similarity_threshold,
        );
        clamp_fraction(
            "min_quality_floor",
            &mut self.min_quality_floor,
            defaults.min_quality_floor,
        );
        clamp_fraction(
            "validated_quality_floor",
            &mut self.validated_quality_floor,
            defaults.validated_quality_floor,
        );
        clamp_min_usize(
            "max_observations_per_bloom",
            &mut self.max_observations_per_bloom,
            2,
        );
        clamp_min_usize("min_distinct_signatures", &mut self.min_distinct_signatures, 1);
        clamp_min_i64("sequence_window_secs", &mut self.sequence_window_secs, 0);
        clamp_min_usize("merge_history_limit", &mut self.merge_history_limit, 1);
        clamp_min_usize("evidence_id_limit", &mut self.evidence_id_limit, 1);
        clamp_min_usize("seen_observation_limit", &mut self.seen_observation_limit, 1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_sane() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.clone().sanitized(), cfg);
        assert_eq!(cfg.generation_min_group_size, 1);
        assert!((cfg.merge_similarity_threshold - 0.9).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg = EngineConfig::from_json_str(r#"{"max_candidate_rules": 10}"#).unwrap();
        assert_eq!(cfg.max_candidate_rules, 10);
        assert_eq!(cfg.max_validated_rules, 500);
    }

    #[test]
    fn test_out_of_range_values_are_clamped() {
        let cfg = EngineConfig::from_json_str(
            r#"{
                "pruning_confidence_floor": 1.7,
                "contradiction_ceiling": -0.5,
                "generation_min_group_size": 0,
                "pruning_max_age_secs": -10,
                "max_candidate_rules": 0
            }"#,
        )
        .unwrap();
        assert!((cfg.pruning_confidence_floor - 1.0).abs() < f32::EPSILON);
        assert!(cfg.contradiction_ceiling.abs() < f32::EPSILON);
        assert_eq!(cfg.generation_min_group_size, 1);
        assert_eq!(cfg.pruning_max_age_secs, 1);
        assert_eq!(cfg.max_candidate_rules, 1);
    }

    #[test]
    fn test_nan_falls_back_to_default() {
        let defaults = EngineConfig::default();
        let cfg = EngineConfig {
            merge_similarity_threshold: f32::NAN,
            pruning_confidence_floor: f32::NAN,
            ..EngineConfig::default()
        }
        .sanitized();
        assert_eq!(
            cfg.merge_similarity_threshold.to_bits(),
            defaults.merge_similarity_threshold.to_bits()
        );
        assert_eq!(
            cfg.pruning_confidence_floor.to_bits(),
            defaults.pruning_confidence_floor.to_bits()
        );
    }

    #[test]
    fn test_infinite_fraction_is_clamped_to_bound() {
        let cfg = EngineConfig {
            min_quality_floor: f32::INFINITY,
            contradiction_ceiling: f32::NEG_INFINITY,
            ..EngineConfig::default()
        }
        .sanitized();
        assert!((cfg.min_quality_floor - 1.0).abs() < f32::EPSILON);
        assert!(cfg.contradiction_ceiling.abs() < f32::EPSILON);
    }

    #[test]
    fn test_malformed_json_is_an_error() {
        assert!(EngineConfig::from_json_str("{not json").is_err());
        assert!(EngineConfig::from_json_str(r#"{"max_total_rules": "many"}"#).is_err());
    }
}
