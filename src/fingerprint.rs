//! Content fingerprints and rule similarity.
//!
//! A fingerprint is a BLAKE3 hash over a canonical encoding of a rule's
//! content: its type, its condition entries sorted by key, its prediction
//! entries sorted by key, and its whitespace-normalized pattern text. Ids,
//! timestamps and statistics are excluded so that a regenerated duplicate
//! hashes identically to the rule already stored.
//!
//! Canonical encoding (version 1), fields separated by `0x1f`, entries by `0x1e`:
//!
//! ```text
//! "rb1" US type_tag US key=value RS key=value ... US key=value RS ... US pattern
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::rule::CandidateRule;

const FIELD_SEP: u8 = 0x1f;
const ENTRY_SEP: u8 = 0x1e;
const ENCODING_TAG: &[u8] = b"rb1";

/// Weight of condition similarity in the combined score.
pub const CONDITION_WEIGHT: f32 = 0.4;
/// Weight of prediction similarity in the combined score.
pub const PREDICTION_WEIGHT: f32 = 0.4;
/// Weight of pattern token overlap in the combined score.
pub const PATTERN_WEIGHT: f32 = 0.2;

/// Hex-encoded BLAKE3 content hash of a rule.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Computes the fingerprint of a rule's content.
    #[must_use]
    pub fn of(rule: &CandidateRule) -> Self {
        let mut h = Hasher::new();
        h.update(ENCODING_TAG);
        h.update(&[FIELD_SEP]);
        h.update(rule.rule_type.tag().as_bytes());

        h.update(&[FIELD_SEP]);
        let conditions: BTreeMap<String, String> = rule
            .conditions
            .iter()
            .map(|c| (c.key(), c.canonical_value()))
            .collect();
        write_entries(&mut h, &conditions);

        h.update(&[FIELD_SEP]);
        let predictions: BTreeMap<String, String> = rule
            .predictions
            .iter()
            .map(|p| (p.key(), p.canonical_value()))
            .collect();
        write_entries(&mut h, &predictions);

        h.update(&[FIELD_SEP]);
        h.update(normalize_pattern(&rule.pattern).as_bytes());

        Self(h.finalize().to_hex().to_string())
    }

    /// Returns the hex digest.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn write_entries(h: &mut Hasher, entries: &BTreeMap<String, String>) {
    for (i, (k, v)) in entries.iter().enumerate() {
        if i > 0 {
            h.update(&[ENTRY_SEP]);
        }
        h.update(k.as_bytes());
        h.update(b"=");
        h.update(v.as_bytes());
    }
}

/// Lowercases and collapses whitespace runs to single spaces.
#[must_use]
pub fn normalize_pattern(pattern: &str) -> String {
    pattern
        .split_whitespace()
        .map(str::to_ascii_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn tokenize(s: &str) -> BTreeSet<String> {
    s.split_whitespace().map(str::to_ascii_lowercase).collect()
}

/// Key/value agreement of two entry maps.
///
/// `(matching-key ratio + matching-value ratio) / 2` over the union of keys.
/// Two empty maps are identical.
#[must_use]
pub fn entry_similarity(a: &BTreeMap<String, String>, b: &BTreeMap<String, String>) -> f32 {
    let union: BTreeSet<&String> = a.keys().chain(b.keys()).collect();
    if union.is_empty() {
        return 1.0;
    }
    let mut shared_keys = 0usize;
    let mut shared_values = 0usize;
    for key in &union {
        if let (Some(va), Some(vb)) = (a.get(*key), b.get(*key)) {
            shared_keys += 1;
            if va == vb {
                shared_values += 1;
            }
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let n = union.len() as f32;
    #[allow(clippy::cast_precision_loss)]
    let sim = (shared_keys as f32 / n + shared_values as f32 / n) / 2.0;
    sim
}

/// Jaccard similarity of whitespace-tokenized pattern text.
#[must_use]
pub fn token_overlap(a: &str, b: &str) -> f32 {
    let ta = tokenize(a);
    let tb = tokenize(b);
    if ta.is_empty() && tb.is_empty() {
        return 1.0;
    }
    let inter = ta.intersection(&tb).count();
    let union = ta.union(&tb).count();
    #[allow(clippy::cast_precision_loss)]
    let sim = inter as f32 / union as f32;
    sim
}

fn condition_entries(rule: &CandidateRule) -> BTreeMap<String, String> {
    rule.conditions
        .iter()
        .map(|c| (c.key(), c.canonical_value()))
        .collect()
}

fn prediction_entries(rule: &CandidateRule) -> BTreeMap<String, String> {
    rule.predictions
        .iter()
        .map(|p| (p.key(), p.canonical_value()))
        .collect()
}

/// Combined similarity of two rules in `[0, 1]`.
///
/// `0.4·condition + 0.4·prediction + 0.2·pattern-token overlap`. Rules of
/// different types are never similar.
#[must_use]
pub fn similarity(a: &CandidateRule, b: &CandidateRule) -> f32 {
    if a.rule_type != b.rule_type {
        return 0.0;
    }
    CONDITION_WEIGHT * entry_similarity(&condition_entries(a), &condition_entries(b))
        + PREDICTION_WEIGHT * entry_similarity(&prediction_entries(a), &prediction_entries(b))
        + PATTERN_WEIGHT * token_overlap(&a.pattern, &b.pattern)
}
