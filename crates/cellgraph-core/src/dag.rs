//! Dag: an owned, insertion-ordered directed graph.
//!
//! [`Dag`] stores node and edge payloads in [`IndexMap`]s keyed by the
//! caller's key type and keeps successor/predecessor sets per node. It is
//! the minimal graph the reference layer needs: keyed node storage,
//! adjacency, Kahn topological ordering and explicit cycle reporting.
//!
//! Edges run from dependency to dependent: `set_edge(a, c, ..)` means `c`
//! depends on `a`, so `a` comes first in [`Dag::topological_order`].
//!
//! Mutations that can fail validate before touching any state, so a failed
//! call leaves the graph unchanged.

use std::collections::BTreeSet;
use std::convert::Infallible;
use std::hash::Hash;

use indexmap::{IndexMap, IndexSet};

use crate::error::CoreError;
use crate::id::NodeKey;

/// Key under which a single-attribute payload stores its value.
pub const VALUE_ATTRIBUTE: &str = "value";

/// Payload of a node or edge.
#[derive(Debug, Clone, PartialEq)]
pub enum NodeValue<V> {
    /// A bare value.
    Plain(V),
    /// Named attributes.
    Attributes(IndexMap<String, V>),
}

impl<V> NodeValue<V> {
    pub fn wrap(value: V) -> Self {
        NodeValue::Plain(value)
    }

    /// An empty attribute map, used for edges that carry no data.
    pub fn empty() -> Self {
        NodeValue::Attributes(IndexMap::new())
    }

    /// The wrapped value: a `Plain` payload, or an attribute map holding
    /// nothing but a `value` entry.
    pub fn value(&self) -> Option<&V> {
        match self {
            NodeValue::Plain(v) => Some(v),
            NodeValue::Attributes(attrs) if attrs.len() == 1 => attrs.get(VALUE_ATTRIBUTE),
            NodeValue::Attributes(_) => None,
        }
    }

    /// Unwraps into the single value if there is one, otherwise hands the
    /// payload back unchanged.
    pub fn into_value(self) -> Result<V, Self> {
        match self {
            NodeValue::Plain(v) => Ok(v),
            NodeValue::Attributes(mut attrs)
                if attrs.len() == 1 && attrs.contains_key(VALUE_ATTRIBUTE) =>
            {
                match attrs.shift_remove(VALUE_ATTRIBUTE) {
                    Some(v) => Ok(v),
                    None => Err(NodeValue::Attributes(attrs)),
                }
            }
            other => Err(other),
        }
    }

    pub fn attributes(&self) -> Option<&IndexMap<String, V>> {
        match self {
            NodeValue::Attributes(attrs) => Some(attrs),
            NodeValue::Plain(_) => None,
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(V) -> U) -> NodeValue<U> {
        match self {
            NodeValue::Plain(v) => NodeValue::Plain(f(v)),
            NodeValue::Attributes(attrs) => {
                NodeValue::Attributes(attrs.into_iter().map(|(k, v)| (k, f(v))).collect())
            }
        }
    }
}

impl<V> From<V> for NodeValue<V> {
    fn from(value: V) -> Self {
        NodeValue::Plain(value)
    }
}

/// Directed graph with keyed, insertion-ordered nodes and edges.
#[derive(Debug, Clone)]
pub struct Dag<K, V> {
    nodes: IndexMap<K, NodeValue<V>>,
    edges: IndexMap<(K, K), NodeValue<V>>,
    successors: IndexMap<K, IndexSet<K>>,
    predecessors: IndexMap<K, IndexSet<K>>,
}

impl<K, V> Default for Dag<K, V> {
    fn default() -> Self {
        Dag {
            nodes: IndexMap::new(),
            edges: IndexMap::new(),
            successors: IndexMap::new(),
            predecessors: IndexMap::new(),
        }
    }
}

impl<K, V> Dag<K, V>
where
    K: Clone + Eq + Hash + Into<NodeKey>,
{
    pub fn new() -> Self {
        Self::default()
    }

    // -----------------------------------------------------------------------
    // Nodes
    // -----------------------------------------------------------------------

    /// Returns the unwrapped value stored at `key`.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.nodes.get(key).and_then(NodeValue::value)
    }

    pub fn payload(&self, key: &K) -> Option<&NodeValue<V>> {
        self.nodes.get(key)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Stores `value` at `key`, keeping the key's original position if it
    /// already exists. Returns the previous payload.
    pub fn set(&mut self, key: K, value: V) -> Option<NodeValue<V>> {
        self.set_payload(key, NodeValue::Plain(value))
    }

    pub fn set_attributes(
        &mut self,
        key: K,
        attributes: IndexMap<String, V>,
    ) -> Option<NodeValue<V>> {
        self.set_payload(key, NodeValue::Attributes(attributes))
    }

    pub fn set_payload(&mut self, key: K, payload: NodeValue<V>) -> Option<NodeValue<V>> {
        self.nodes.insert(key, payload)
    }

    /// Removes a node together with its incident edges.
    pub fn delete(&mut self, key: &K) -> Result<NodeValue<V>, CoreError> {
        let payload = self.nodes.shift_remove(key).ok_or_else(|| missing(key))?;
        self.detach(key);
        Ok(payload)
    }

    fn detach(&mut self, key: &K) {
        if let Some(children) = self.successors.shift_remove(key) {
            for child in children {
                self.edges.shift_remove(&(key.clone(), child.clone()));
                if let Some(parents) = self.predecessors.get_mut(&child) {
                    parents.shift_remove(key);
                }
            }
        }
        if let Some(parents) = self.predecessors.shift_remove(key) {
            for parent in parents {
                self.edges.shift_remove(&(parent.clone(), key.clone()));
                if let Some(children) = self.successors.get_mut(&parent) {
                    children.shift_remove(key);
                }
            }
        }
    }

    /// Deletes the given nodes, or every node when `keys` is `None`. Fails
    /// without deleting anything if any key is absent.
    pub fn delete_nodes(&mut self, keys: Option<&[K]>) -> Result<(), CoreError> {
        let Some(keys) = keys else {
            *self = Self::default();
            return Ok(());
        };
        if let Some(absent) = keys.iter().find(|k| !self.contains(k)) {
            return Err(missing(absent));
        }
        for key in keys {
            if self.nodes.shift_remove(key).is_some() {
                self.detach(key);
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    pub fn get_edge(&self, from: &K, to: &K) -> Option<&NodeValue<V>> {
        self.edges.get(&(from.clone(), to.clone()))
    }

    pub fn contains_edge(&self, from: &K, to: &K) -> bool {
        self.edges.contains_key(&(from.clone(), to.clone()))
    }

    /// Adds or replaces the edge `from -> to`. Both endpoints must exist.
    pub fn set_edge(&mut self, from: K, to: K, payload: NodeValue<V>) -> Result<(), CoreError> {
        for key in [&from, &to] {
            if !self.contains(key) {
                return Err(missing(key));
            }
        }
        self.successors
            .entry(from.clone())
            .or_default()
            .insert(to.clone());
        self.predecessors
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.edges.insert((from, to), payload);
        Ok(())
    }

    pub fn delete_edge(&mut self, from: &K, to: &K) -> Result<NodeValue<V>, CoreError> {
        let payload = self
            .edges
            .shift_remove(&(from.clone(), to.clone()))
            .ok_or_else(|| CoreError::MissingEdge {
                from: from.clone().into(),
                to: to.clone().into(),
            })?;
        if let Some(children) = self.successors.get_mut(from) {
            children.shift_remove(to);
        }
        if let Some(parents) = self.predecessors.get_mut(to) {
            parents.shift_remove(from);
        }
        Ok(payload)
    }

    /// Deletes the given edges, or every edge when `pairs` is `None`. Fails
    /// without deleting anything if any edge is absent.
    pub fn delete_edges(&mut self, pairs: Option<&[(K, K)]>) -> Result<(), CoreError> {
        let Some(pairs) = pairs else {
            self.edges.clear();
            self.successors.clear();
            self.predecessors.clear();
            return Ok(());
        };
        if let Some((from, to)) = pairs.iter().find(|p| !self.edges.contains_key(*p)) {
            return Err(CoreError::MissingEdge {
                from: from.clone().into(),
                to: to.clone().into(),
            });
        }
        for (from, to) in pairs {
            // Duplicate pairs in the input are already gone on the second pass.
            let _ = self.delete_edge(from, to);
        }
        Ok(())
    }

    /// Builds a copy with every node payload replaced by `f`'s output. Edges
    /// and node order carry over unchanged.
    pub fn try_map_nodes<E, F>(&self, mut f: F) -> Result<Self, E>
    where
        V: Clone,
        F: FnMut(&K, &NodeValue<V>) -> Result<NodeValue<V>, E>,
    {
        let mut nodes = IndexMap::with_capacity(self.nodes.len());
        for (key, payload) in &self.nodes {
            nodes.insert(key.clone(), f(key, payload)?);
        }
        Ok(Dag {
            nodes,
            edges: self.edges.clone(),
            successors: self.successors.clone(),
            predecessors: self.predecessors.clone(),
        })
    }

    pub fn map_nodes<F>(&self, mut f: F) -> Self
    where
        V: Clone,
        F: FnMut(&K, &NodeValue<V>) -> NodeValue<V>,
    {
        match self.try_map_nodes(|key, payload| Ok::<_, Infallible>(f(key, payload))) {
            Ok(dag) => dag,
            Err(never) => match never {},
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn successors(&self, key: &K) -> impl Iterator<Item = &K> {
        self.successors.get(key).into_iter().flatten()
    }

    pub fn predecessors(&self, key: &K) -> impl Iterator<Item = &K> {
        self.predecessors.get(key).into_iter().flatten()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Nodes and their payloads in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = (&K, &NodeValue<V>)> {
        self.nodes.iter()
    }

    /// Edge endpoints and payloads in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&K, &K, &NodeValue<V>)> {
        self.edges.iter().map(|((from, to), p)| (from, to, p))
    }

    /// Orders all nodes so that every edge points forward (Kahn's
    /// algorithm). Ties are broken by insertion order.
    ///
    /// On a cycle, fails with [`CoreError::Cycle`] naming the nodes of one
    /// cycle in dependency order.
    pub fn topological_order(&self) -> Result<Vec<K>, CoreError> {
        let mut indegree: Vec<usize> = self
            .nodes
            .keys()
            .map(|k| self.predecessors.get(k).map_or(0, IndexSet::len))
            .collect();
        let mut ready: BTreeSet<usize> = indegree
            .iter()
            .enumerate()
            .filter(|(_, d)| **d == 0)
            .map(|(i, _)| i)
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(index) = ready.pop_first() {
            let Some((key, _)) = self.nodes.get_index(index) else {
                continue;
            };
            for child in self.successors(key) {
                if let Some(c) = self.nodes.get_index_of(child) {
                    indegree[c] -= 1;
                    if indegree[c] == 0 {
                        ready.insert(c);
                    }
                }
            }
            order.push(key.clone());
        }

        if order.len() < self.nodes.len() {
            return Err(CoreError::Cycle {
                keys: self.find_cycle(&indegree),
            });
        }
        Ok(order)
    }

    /// Walks predecessors among the unvisited nodes until one repeats.
    /// Every unvisited node has an unvisited predecessor, so the walk
    /// always closes a loop.
    fn find_cycle(&self, indegree: &[usize]) -> Vec<NodeKey> {
        let unvisited = |k: &K| self.nodes.get_index_of(k).is_some_and(|i| indegree[i] > 0);

        let mut path: Vec<K> = Vec::new();
        let mut current = self.nodes.keys().find(|k| unvisited(*k)).cloned();
        while let Some(key) = current {
            if let Some(pos) = path.iter().position(|k| *k == key) {
                let mut cycle: Vec<NodeKey> = path[pos..].iter().cloned().map(Into::into).collect();
                cycle.reverse();
                return cycle;
            }
            current = self.predecessors(&key).find(|p| unvisited(*p)).cloned();
            path.push(key);
        }
        path.into_iter().map(Into::into).collect()
    }
}

fn missing<K: Clone + Into<NodeKey>>(key: &K) -> CoreError {
    CoreError::MissingNode {
        key: key.clone().into(),
    }
}
