//! Change detection between two versions of a graph.
//!
//! Compares previously recorded node digests with the current graph to
//! find which nodes were added, modified or removed since the last save.

use std::collections::{BTreeMap, BTreeSet};

use cellgraph_core::{NodeKey, ReferenceGraph};

use crate::hash::node_digests;

/// Nodes that differ from a previous snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtySet {
    /// Nodes absent from the previous snapshot.
    pub new: BTreeSet<NodeKey>,
    /// Nodes whose encoded cell changed.
    pub modified: BTreeSet<NodeKey>,
    /// Nodes present before but gone now.
    pub removed: BTreeSet<NodeKey>,
}

impl DirtySet {
    /// New and modified nodes.
    pub fn changed(&self) -> BTreeSet<NodeKey> {
        self.new.union(&self.modified).cloned().collect()
    }

    pub fn is_clean(&self) -> bool {
        self.new.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.new.len() + self.modified.len() + self.removed.len()
    }

    /// Changed nodes plus everything downstream of them in `graph`.
    ///
    /// These are the nodes whose computed values may differ. Requires the
    /// graph's edges to be present.
    pub fn affected(&self, graph: &ReferenceGraph) -> BTreeSet<NodeKey> {
        let mut affected = BTreeSet::new();
        let mut stack: Vec<NodeKey> = self.changed().into_iter().collect();
        while let Some(key) = stack.pop() {
            if !affected.insert(key.clone()) {
                continue;
            }
            stack.extend(graph.successors(&key).cloned());
        }
        affected
    }
}

/// Computes the dirty set of `graph` against `previous` digests.
pub fn compute_dirty_set(
    graph: &ReferenceGraph,
    previous: &BTreeMap<NodeKey, blake3::Hash>,
) -> DirtySet {
    let current = node_digests(graph);
    let mut dirty = DirtySet::default();

    for (key, digest) in &current {
        match previous.get(key) {
            Some(prev) if prev != digest => {
                dirty.modified.insert(key.clone());
            }
            Some(_) => {}
            None => {
                dirty.new.insert(key.clone());
            }
        }
    }
    dirty.removed = previous
        .keys()
        .filter(|k| !current.contains_key(*k))
        .cloned()
        .collect();

    if !dirty.is_clean() {
        tracing::debug!(
            new = dirty.new.len(),
            modified = dirty.modified.len(),
            removed = dirty.removed.len(),
            "graph changed"
        );
    }
    dirty
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellgraph_core::{BuiltinOp, Cell};

    fn key(s: &str) -> NodeKey {
        NodeKey::from(s)
    }

    fn chain() -> ReferenceGraph {
        let a = Cell::new("a", 1);
        let b = Cell::new("b", BuiltinOp::Neg.function()).arg(a);
        let c = Cell::new("c", BuiltinOp::Neg.function()).arg(b);
        ReferenceGraph::new().with(c).with_parents().unwrap()
    }

    #[test]
    fn clean_when_nothing_changed() {
        let graph = chain();
        let dirty = compute_dirty_set(&graph, &node_digests(&graph));
        assert!(dirty.is_clean());
        assert_eq!(dirty.total(), 0);
    }

    #[test]
    fn everything_is_new_against_empty_snapshot() {
        let dirty = compute_dirty_set(&chain(), &BTreeMap::new());
        assert_eq!(dirty.new.len(), 3);
        assert!(dirty.modified.is_empty());
    }

    #[test]
    fn modified_and_removed_are_detected() {
        let mut graph = chain();
        let previous = node_digests(&graph);

        graph.set("a", 5).unwrap();
        graph.set("extra", 0).unwrap();
        let dirty = compute_dirty_set(&graph, &previous);
        assert_eq!(dirty.modified, BTreeSet::from([key("a")]));
        assert_eq!(dirty.new, BTreeSet::from([key("extra")]));

        let mut smaller = chain();
        smaller.delete("c").unwrap();
        let dirty = compute_dirty_set(&smaller, &previous);
        assert_eq!(dirty.removed, BTreeSet::from([key("c")]));
    }

    #[test]
    fn affected_follows_successors() {
        let mut graph = chain();
        let previous = node_digests(&graph);
        graph.set("a", 5).unwrap();

        let dirty = compute_dirty_set(&graph, &previous);
        assert_eq!(
            dirty.affected(&graph),
            BTreeSet::from([key("a"), key("b"), key("c")])
        );
    }
}
