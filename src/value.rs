//! Attribute values carried by observations.
//!
//! Observations describe their situation with a free set of key-value
//! attributes. Values are either numeric (usable by threshold and distance
//! templates) or categorical (usable by equality and association templates).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Value of a single observation attribute.
///
/// # Examples
///
/// ```
/// use rulebloom::AttrValue;
///
/// let hp = AttrValue::Float(42.5);
/// let team = AttrValue::from("red");
///
/// assert_eq!(hp.as_number(), Some(42.5));
/// assert!(team.is_categorical());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttrValue {
    pub const fn is_numeric(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub const fn is_categorical(&self) -> bool {
        matches!(self, Self::Bool(_) | Self::String(_))
    }

    /// Returns the value as a finite number, if it is numeric.
    #[must_use]
    pub fn as_number(&self) -> Option<f64> {
        #[allow(clippy::cast_precision_loss)]
        let n = match self {
            Self::Int(v) => *v as f64,
            Self::Float(v) => *v,
            _ => return None,
        };
        n.is_finite().then_some(n)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(v) => Some(v),
            _ => None,
        }
    }

    /// Canonical text form used in fingerprints and similarity scoring.
    ///
    /// Floats are rendered with three decimals so that values recomputed from
    /// the same data hash identically.
    #[must_use]
    pub fn canonical(&self) -> String {
        match self {
            Self::Bool(v) => v.to_string(),
            Self::Int(v) => v.to_string(),
            Self::Float(v) => format!("{v:.3}"),
            Self::String(v) => v.trim().to_ascii_lowercase(),
        }
    }

    /// Returns a human-readable type name.
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }

    /// Loose equality: numbers compare by value across int/float, strings case-insensitively.
    #[must_use]
    pub fn loosely_equals(&self, other: &Self) -> bool {
        match (self.as_number(), other.as_number()) {
            (Some(a), Some(b)) => (a - b).abs() < 1e-9,
            _ => self.canonical() == other.canonical(),
        }
    }
}

impl fmt::Display for AttrValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.canonical())
    }
}

impl From<bool> for AttrValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for AttrValue {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<f64> for AttrValue {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for AttrValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for AttrValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}
