//! Error types for rulebloom.
//!
//! All errors are strongly typed using thiserror so callers can match on
//! specific conditions. Per-item failures (a single rule that cannot be
//! validated, a single template that cannot be applied) are isolated by the
//! batch operations and reported as counts; only snapshot loading treats an
//! error as a hard stop, and even then engine state is left untouched.

use thiserror::Error;

use crate::rule::RuleId;

/// Per-rule failures raised while matching or predicting.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ValidationError {
    #[error("Rule {rule_id} has no conditions to match against")]
    EmptyConditions {
        rule_id: RuleId,
    },

    #[error("Rule {rule_id} has no predictions to test")]
    EmptyPredictions {
        rule_id: RuleId,
    },

    #[error("Rule {rule_id} has a non-finite threshold on attribute '{key}'")]
    NonFiniteThreshold {
        rule_id: RuleId,
        key: String,
    },

    #[error("Rule {rule_id} has a non-finite confidence")]
    NonFiniteConfidence {
        rule_id: RuleId,
    },
}

/// Snapshot save/load failures.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot version {found} is not supported (expected {expected})")]
    VersionMismatch {
        expected: u32,
        found: u32,
    },

    #[error("Snapshot is corrupt or unreadable: {message}")]
    Corrupt {
        message: String,
    },

    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration document failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {message}")]
    Parse {
        message: String,
    },
}

/// Top-level error type for rulebloom.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Snapshot error: {0}")]
    Snapshot(#[from] SnapshotError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Rule not found: {id}")]
    RuleNotFound {
        id: RuleId,
    },

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl EngineError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a per-rule validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a snapshot error.
    #[must_use]
    pub const fn is_snapshot(&self) -> bool {
        matches!(self, Self::Snapshot(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub const fn is_internal(&self) -> bool {
        matches!(self, Self::Internal { .. })
    }

    /// Returns true if this error came from a snapshot with the wrong format version.
    #[must_use]
    pub const fn is_version_mismatch(&self) -> bool {
        matches!(self, Self::Snapshot(SnapshotError::VersionMismatch { .. }))
    }
}

/// Result type alias for rulebloom operations.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let id = RuleId::new();
        let err = ValidationError::NonFiniteThreshold {
            rule_id: id,
            key: "hp".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("hp"));
        assert!(msg.contains(&id.to_string()));
    }

    #[test]
    fn test_snapshot_version_mismatch_display() {
        let err = SnapshotError::VersionMismatch {
            expected: 1,
            found: 7,
        };
        let msg = format!("{err}");
        assert!(msg.contains('7'));
        assert!(msg.contains("expected 1"));
    }

    #[test]
    fn test_engine_error_from_validation() {
        let err: EngineError = ValidationError::EmptyConditions {
            rule_id: RuleId::new(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_snapshot());
    }

    #[test]
    fn test_engine_error_from_snapshot() {
        let err: EngineError = SnapshotError::VersionMismatch {
            expected: 1,
            found: 2,
        }
        .into();
        assert!(err.is_snapshot());
        assert!(err.is_version_mismatch());
    }

    #[test]
    fn test_engine_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = SnapshotError::from(io).into();
        assert!(err.is_snapshot());
        assert!(!err.is_version_mismatch());
        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_engine_error_internal() {
        let err = EngineError::internal("unexpected state");
        assert!(err.is_internal());
        assert!(err.to_string().contains("unexpected state"));
    }

    #[test]
    fn test_config_error() {
        let err: EngineError = ConfigError::Parse {
            message: "expected value".to_string(),
        }
        .into();
        assert!(err.is_config());
    }
}
