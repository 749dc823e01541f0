//! Core error types for cellgraph-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering
//! every failure mode of the cell and graph layers.

use thiserror::Error;

use crate::function::FunctionError;
use crate::id::NodeKey;

/// Core errors produced by the cellgraph-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A reference, key or edge operation named a node absent from the graph.
    #[error("node not found: {key}")]
    MissingNode { key: NodeKey },

    /// A dependency cycle was found while ordering or evaluating nodes.
    #[error("dependency cycle through nodes: {}", format_keys(.keys))]
    Cycle { keys: Vec<NodeKey> },

    /// The function wrapped by a cell failed.
    #[error("evaluation of cell {id} failed: {source}")]
    Evaluation {
        id: NodeKey,
        #[source]
        source: FunctionError,
    },

    /// Nested evaluation went deeper than the configured limit.
    #[error("evaluation depth limit of {limit} exceeded")]
    DepthExceeded { limit: usize },

    /// An edge operation named an edge absent from the graph.
    #[error("edge not found: {from} -> {to}")]
    MissingEdge { from: NodeKey, to: NodeKey },

    /// A string starting with `@` whose suffix is not a usable id.
    #[error("malformed reference: '{reference}'")]
    MalformedReference { reference: String },

    /// A serialized function name is not present in the registry.
    #[error("unknown function: '{name}'")]
    UnknownFunction { name: String },

    /// A serialized cell carries a schema version this build cannot read.
    #[error("unsupported schema version: {version}")]
    UnsupportedSchema { version: u64 },

    /// A serialized document is structurally invalid.
    #[error("invalid document: {reason}")]
    InvalidDocument { reason: String },

    /// JSON parsing or encoding failed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_keys(keys: &[NodeKey]) -> String {
    keys.iter()
        .map(|k| k.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_message_lists_keys() {
        let err = CoreError::Cycle {
            keys: vec![NodeKey::from("x"), NodeKey::Int(3)],
        };
        assert_eq!(err.to_string(), "dependency cycle through nodes: x, 3");
    }

    #[test]
    fn evaluation_error_keeps_source() {
        use std::error::Error as _;

        let err = CoreError::Evaluation {
            id: NodeKey::from("c"),
            source: FunctionError::DivideByZero,
        };
        assert!(err.to_string().starts_with("evaluation of cell c failed"));
        assert!(err.source().is_some());
    }
}
