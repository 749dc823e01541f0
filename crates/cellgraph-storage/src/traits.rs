//! The [`GraphStore`] trait defining the storage contract for reference
//! graphs.
//!
//! Graphs are persisted as whole JSON documents in the dereferenced form
//! produced by [`ReferenceGraph::to_json`]. Edges are not stored; loading
//! rebuilds them from the references in each cell.

use cellgraph_core::{FunctionRegistry, ReferenceGraph};

use crate::error::StorageError;

/// The storage contract for named reference graphs.
///
/// The trait is synchronous. Backends are swappable without changing the
/// graph layer.
pub trait GraphStore {
    /// Saves or overwrites the graph stored under `name`.
    fn save(&mut self, name: &str, graph: &ReferenceGraph) -> Result<(), StorageError>;

    /// Loads the graph stored under `name`, re-linking functions through
    /// `registry`.
    fn load(&self, name: &str, registry: &FunctionRegistry)
        -> Result<ReferenceGraph, StorageError>;

    /// Deletes the graph stored under `name`.
    fn delete(&mut self, name: &str) -> Result<(), StorageError>;

    /// Lists stored graph names in sorted order.
    fn list(&self) -> Result<Vec<String>, StorageError>;

    fn contains(&self, name: &str) -> Result<bool, StorageError> {
        Ok(self.list()?.iter().any(|n| n == name))
    }
}

/// Checks that `name` is usable as a graph name.
pub fn validate_name(name: &str) -> Result<(), StorageError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::InvalidName {
            name: name.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_names() {
        for name in ["prices", "eod-2024.06", "a_b"] {
            assert!(validate_name(name).is_ok(), "{name}");
        }
    }

    #[test]
    fn rejects_paths_and_empty_names() {
        for name in ["", "../x", "a/b", ".hidden", "sp ace"] {
            assert!(
                matches!(validate_name(name), Err(StorageError::InvalidName { .. })),
                "{name}"
            );
        }
    }
}
