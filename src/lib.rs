//! # rulebloom - a rule lifecycle engine
//!
//! rulebloom grows behavioral hypotheses ("rules") from streams of structured
//! observations, confirms or refutes them as more evidence arrives, and keeps
//! the rule population bounded under memory pressure.
//!
//! ## Lifecycle
//!
//! - **Blooming**: observation batches are grouped by pattern key and expanded
//!   by a set of templates into [`CandidateRule`] drafts.
//! - **Dedup and merge**: drafts are fingerprinted; exact duplicates are
//!   rejected and near-duplicates are folded into the existing rule.
//! - **Validation**: each batch blends observed success rates into rule
//!   confidence; rules that clear the gate are promoted to the validated
//!   partition.
//! - **Pruning**: low-value candidates are evicted, more aggressively as the
//!   store fills; validated rules are only touched under extreme pressure.
//! - **Snapshots**: the full state can be exported and reloaded.
//!
//! ## Usage
//!
//! ```rust
//! use rulebloom::{Observation, Outcome, QueryContext, RuleEngine};
//!
//! let mut engine = RuleEngine::new();
//!
//! let batch: Vec<Observation> = (0..5)
//!     .map(|i| {
//!         let outcome = if i < 4 { Outcome::success(1.0) } else { Outcome::failure(-1.0) };
//!         Observation::new("arena", "goblin", "strike", outcome).with_instrument("sword")
//!     })
//!     .collect();
//!
//! let report = engine.bloom(&batch);
//! assert!(!report.inserted.is_empty());
//!
//! let rules = engine.get_applicable_rules(&QueryContext::new().subject("goblin"));
//! assert!(!rules.is_empty());
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod condition;
pub mod confidence;
pub mod error;
pub mod fingerprint;
pub mod observation;
pub mod rule;
pub mod value;

// Lifecycle phases
pub mod config;
pub mod generation;
pub mod grouping;
pub mod promotion;
pub mod pruning;
pub mod storage;
pub mod validator;

// Engine, persistence and collaborators
pub mod driver;
pub mod engine;
pub mod snapshot;

pub use condition::{AttributeTest, Condition, DeltaDirection, Effectiveness, Prediction, QueryContext};
pub use confidence::ConfidenceTier;
pub use config::EngineConfig;
pub use driver::{LearningDriver, ObservationSource, PolicyConsumer, TickReport};
pub use engine::{BloomReport, CycleReport, EngineCounters, RuleEngine};
pub use error::{ConfigError, EngineError, EngineResult, SnapshotError, ValidationError};
pub use fingerprint::Fingerprint;
pub use observation::{DistanceBucket, Observation, ObservationId, Outcome};
pub use pruning::{EvictionReason, PressureRegime, PruneReport};
pub use rule::{CandidateRule, Evidence, RuleId, RuleScores, RuleStatus, RuleType};
pub use snapshot::{LoadMode, LoadReport, Snapshot};
pub use storage::{InsertOutcome, Partition, RuleStore};
pub use validator::{StatusChange, ValidationReport};
pub use value::AttrValue;
