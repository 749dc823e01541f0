//! Deterministic content digests for stored graphs using blake3.
//!
//! Digests are derived state, never persisted. Each node is hashed from its
//! encoded dereferenced cell, so a node's digest changes when its function,
//! arguments, keyword arguments or cache strategy change, but not when a
//! dependency's content does.
//!
//! # Determinism
//!
//! Encoded cells are `serde_json::Value`s whose object keys are sorted, and
//! nodes are collected into a `BTreeMap`, so the same graph always produces
//! the same digests.

use std::collections::BTreeMap;

use serde_json::Value as Json;

use cellgraph_core::{NodeKey, ReferenceGraph};

/// Hashes one encoded cell.
pub fn hash_encoded(encoded: &Json) -> blake3::Hash {
    // `Display` on `serde_json::Value` is infallible, unlike `to_vec`.
    blake3::hash(encoded.to_string().as_bytes())
}

/// Per-node digests of the dereferenced graph.
pub fn node_digests(graph: &ReferenceGraph) -> BTreeMap<NodeKey, blake3::Hash> {
    graph
        .encoded_nodes()
        .iter()
        .map(|(key, encoded)| (key.clone(), hash_encoded(encoded)))
        .collect()
}

/// Root digest over all nodes in key order.
pub fn graph_digest(graph: &ReferenceGraph) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    for (key, digest) in node_digests(graph) {
        hasher.update(key.to_string().as_bytes());
        hasher.update(&[0]);
        hasher.update(digest.as_bytes());
    }
    hasher.finalize()
}
