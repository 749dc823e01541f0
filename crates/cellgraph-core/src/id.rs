//! Canonical node keys and `@id` reference strings.
//!
//! Every node in a reference graph lives under a [`NodeKey`]: either an
//! explicit integer/string id supplied by the caller, or the key produced by
//! hashing a value (see [`crate::hash`]). Both kinds share one key space, so
//! `@a`, the string `"a"` and a cell whose node is `"a"` all address the same
//! node.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Prefix marking a string as a reference to another node.
pub const REFERENCE_PREFIX: char = '@';

/// Canonical key of a graph node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeKey {
    Int(i64),
    Str(String),
}

impl NodeKey {
    /// Parses a bare id (no `@`): decimal integers, optionally negative,
    /// become [`NodeKey::Int`]; everything else stays a string id.
    pub fn parse(id: &str) -> NodeKey {
        if is_int(id) {
            if let Ok(i) = id.parse::<i64>() {
                return NodeKey::Int(i);
            }
        }
        NodeKey::Str(id.to_string())
    }

    /// Renders this key as a reference string, e.g. `@a` or `@-12`.
    pub fn to_reference(&self) -> String {
        format!("{REFERENCE_PREFIX}{self}")
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Int(i) => write!(f, "{i}"),
            NodeKey::Str(s) => write!(f, "{s}"),
        }
    }
}

impl From<i64> for NodeKey {
    fn from(i: i64) -> Self {
        NodeKey::Int(i)
    }
}

impl From<i32> for NodeKey {
    fn from(i: i32) -> Self {
        NodeKey::Int(i as i64)
    }
}

/// Same normalization as a bare id in a graph: `"12"` becomes `Int(12)`.
impl From<&str> for NodeKey {
    fn from(s: &str) -> Self {
        crate::hash::str_key(s)
    }
}

impl From<String> for NodeKey {
    fn from(s: String) -> Self {
        crate::hash::str_key(&s)
    }
}

/// Checks if a string is either a positive or a negative decimal integer.
pub fn is_int(s: &str) -> bool {
    let digits = s.strip_prefix('-').unwrap_or(s);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

/// Checks if a string is a reference, which by convention is prefixed with `@`.
pub fn is_reference(s: &str) -> bool {
    s.starts_with(REFERENCE_PREFIX)
}

/// Parses a reference string into the key it points at.
///
/// Returns `Ok(None)` for strings that are not references at all and
/// [`CoreError::MalformedReference`] for a bare `@`.
pub fn parse_reference(s: &str) -> Result<Option<NodeKey>, CoreError> {
    match s.strip_prefix(REFERENCE_PREFIX) {
        None => Ok(None),
        Some("") => Err(CoreError::MalformedReference {
            reference: s.to_string(),
        }),
        Some(id) => Ok(Some(NodeKey::parse(id))),
    }
}
