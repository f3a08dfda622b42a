//! Confidence arithmetic for rules.
//!
//! Confidence is always a value in `[0, 1]`. Fresh drafts get a starting
//! value from their abstraction tier; validation then blends that value
//! toward the observed success rate, weighted by how much evidence the pass
//! produced.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Evidence count at which a single validation pass reaches its maximum weight.
pub const FULL_WEIGHT_EVIDENCE: f32 = 10.0;

/// Maximum weight a single validation pass may carry.
pub const MAX_BLEND_WEIGHT: f32 = 0.5;

/// Success rate assumed when a pass only produced weak (lenient) matches.
pub const WEAK_MATCH_SUCCESS_RATE: f32 = 0.4;

/// Clamps a value into `[0, 1]`. NaN maps to 0.
#[must_use]
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Same as [`clamp_unit`] for `f64` statistics.
#[must_use]
pub fn clamp_unit_f64(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weight of a validation pass that had `applicable` usable observations.
#[must_use]
pub fn evidence_weight(applicable: usize) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let n = applicable as f32;
    (n / FULL_WEIGHT_EVIDENCE).min(MAX_BLEND_WEIGHT)
}

/// Evidence-weighted blend: `old·(1−w) + rate·w`, clamped to `[0, 1]`.
#[must_use]
pub fn blend(old: f32, success_rate: f32, applicable: usize) -> f32 {
    let w = evidence_weight(applicable);
    clamp_unit(clamp_unit(old) * (1.0 - w) + clamp_unit(success_rate) * w)
}

/// Abstraction level of a draft, which fixes its starting confidence.
///
/// Concrete drafts restate something that was directly observed and start
/// high; drafts that generalize over attributes or compare across actions
/// start low and have to earn their confidence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTier {
    /// Every categorical dimension of one observation.
    Specific,
    /// A shared subset of dimensions across a pattern group.
    Grouped,
    /// Attribute thresholds, associations and cross-action comparisons.
    Generalized,
}

impl ConfidenceTier {
    /// Starting confidence for drafts at this tier.
    #[must_use]
    pub const fn initial_confidence(self) -> f32 {
        match self {
            Self::Specific => 0.8,
            Self::Grouped => 0.6,
            Self::Generalized => 0.4,
        }
    }

    /// Generalization score recorded on drafts at this tier.
    #[must_use]
    pub const fn generalization(self) -> f32 {
        match self {
            Self::Specific => 0.2,
            Self::Grouped => 0.5,
            Self::Generalized => 0.8,
        }
    }

    /// The next more abstract tier (saturates at `Generalized`).
    #[must_use]
    pub const fn lower(self) -> Self {
        match self {
            Self::Specific => Self::Grouped,
            Self::Grouped | Self::Generalized => Self::Generalized,
        }
    }
}

impl fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Specific => write!(f, "specific"),
            Self::Grouped => write!(f, "grouped"),
            Self::Generalized => write!(f, "generalized"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert!((clamp_unit(1.5) - 1.0).abs() < f32::EPSILON);
        assert!((clamp_unit(-0.2)).abs() < f32::EPSILON);
        assert!((clamp_unit(f32::NAN)).abs() < f32::EPSILON);
    }

    #[test]
    fn test_evidence_weight_caps_at_half() {
        assert!((evidence_weight(0)).abs() < f32::EPSILON);
        assert!((evidence_weight(3) - 0.3).abs() < 1e-6);
        assert!((evidence_weight(5) - 0.5).abs() < 1e-6);
        assert!((evidence_weight(100) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_blend_moves_toward_rate() {
        let blended = blend(0.6, 0.9, 10);
        assert!((blended - 0.75).abs() < 1e-6);

        let slow = blend(0.6, 0.9, 1);
        assert!(slow > 0.6 && slow < 0.75);

        assert!((blend(0.6, 0.0, 0) - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_tiers() {
        assert!((ConfidenceTier::Specific.initial_confidence() - 0.8).abs() < f32::EPSILON);
        assert!((ConfidenceTier::Grouped.initial_confidence() - 0.6).abs() < f32::EPSILON);
        assert!((ConfidenceTier::Generalized.initial_confidence() - 0.4).abs() < f32::EPSILON);
        assert_eq!(ConfidenceTier::Specific.lower(), ConfidenceTier::Grouped);
        assert_eq!(ConfidenceTier::Generalized.lower(), ConfidenceTier::Generalized);
    }
}
