//! ReferenceGraph: cells indexed by identity, with derived dependency edges.
//!
//! [`ReferenceGraph`] stores every cell at its identity key in a
//! [`Dag<NodeKey, Value>`]. A graph moves between two forms:
//!
//! - **embedded**: cells hold their dependencies directly as nested cells;
//! - **dereferenced**: cells refer to dependencies with `@id` strings
//!   ([`ReferenceGraph::to_id`]).
//!
//! Edges run from dependency to dependent and are pure derived data:
//! [`ReferenceGraph::add_parents`] rebuilds them from cell bodies, and the
//! JSON document never stores them.
//!
//! All fallible operations either work on a copy or plan their changes
//! before committing, so a failure leaves the graph as it was.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::ops::{Add, AddAssign};
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::{Map as JsonMap, Value as Json};

use crate::cache::CellCache;
use crate::cell::{Cell, CellMetadata, Dependency, EvalConfig, EvalContext, Resolver};
use crate::codec;
use crate::dag::{Dag, NodeValue};
use crate::error::CoreError;
use crate::function::FunctionRegistry;
use crate::hash::{hash, str_key};
use crate::id::{parse_reference, NodeKey};
use crate::table::{Table, TableRow};
use crate::value::Value;

/// Anything that normalizes to a node key.
///
/// Reference strings drop their `@`, cells give their identity and every
/// other value goes through [`hash`].
pub trait GraphKey {
    fn to_key(&self) -> Result<NodeKey, CoreError>;
}

impl<T: GraphKey + ?Sized> GraphKey for &T {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        (**self).to_key()
    }
}

impl GraphKey for NodeKey {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(self.clone())
    }
}

impl GraphKey for str {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(parse_reference(self)?.unwrap_or_else(|| str_key(self)))
    }
}

impl GraphKey for String {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        self.as_str().to_key()
    }
}

impl GraphKey for i64 {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(NodeKey::Int(*self))
    }
}

impl GraphKey for i32 {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(NodeKey::Int(*self as i64))
    }
}

impl GraphKey for Cell {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(self.key())
    }
}

impl GraphKey for Arc<Cell> {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        Ok(self.key())
    }
}

impl GraphKey for Value {
    fn to_key(&self) -> Result<NodeKey, CoreError> {
        match self {
            Value::Str(s) => s.as_str().to_key(),
            other => Ok(hash(other)),
        }
    }
}

/// A graph of cells keyed by identity.
#[derive(Debug, Clone, Default)]
pub struct ReferenceGraph {
    dag: Dag<NodeKey, Value>,
}

impl ReferenceGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Normalizes a value to the key it addresses.
    pub fn key(value: &Value) -> Result<NodeKey, CoreError> {
        value.to_key()
    }

    // -----------------------------------------------------------------------
    // Node access
    // -----------------------------------------------------------------------

    /// Stores `value` at `key`. Non-cell values become the constant cell
    /// `Cell::new(key, value)`. Returns the normalized key.
    pub fn set(&mut self, key: impl GraphKey, value: impl Into<Value>) -> Result<NodeKey, CoreError> {
        let key = key.to_key()?;
        let value = match value.into() {
            Value::Cell(cell) => Value::Cell(cell),
            other => Value::from(Cell::new(Value::from(key.clone()), other)),
        };
        self.dag.set(key.clone(), value);
        Ok(key)
    }

    pub fn get(&self, key: impl GraphKey) -> Result<Option<&Value>, CoreError> {
        Ok(self.dag.get(&key.to_key()?))
    }

    /// The cell stored at `key`, failing with [`CoreError::MissingNode`].
    pub fn cell(&self, key: impl GraphKey) -> Result<&Arc<Cell>, CoreError> {
        let key = key.to_key()?;
        match self.dag.get(&key) {
            Some(Value::Cell(cell)) => Ok(cell),
            _ => Err(CoreError::MissingNode { key }),
        }
    }

    pub fn contains(&self, key: impl GraphKey) -> Result<bool, CoreError> {
        Ok(self.dag.contains(&key.to_key()?))
    }

    /// Removes a node and its incident edges.
    pub fn delete(&mut self, key: impl GraphKey) -> Result<Value, CoreError> {
        let key = key.to_key()?;
        match self.dag.delete(&key)?.into_value() {
            Ok(value) => Ok(value),
            Err(_) => Err(CoreError::MissingNode { key }),
        }
    }

    /// Deletes the given nodes, or all of them.
    pub fn delete_nodes(&mut self, keys: Option<&[NodeKey]>) -> Result<(), CoreError> {
        self.dag.delete_nodes(keys)
    }

    // -----------------------------------------------------------------------
    // Edge access
    // -----------------------------------------------------------------------

    /// Adds the edge `from -> to` (`to` depends on `from`).
    pub fn set_edge(&mut self, from: impl GraphKey, to: impl GraphKey) -> Result<(), CoreError> {
        self.dag
            .set_edge(from.to_key()?, to.to_key()?, NodeValue::empty())
    }

    pub fn get_edge(
        &self,
        from: impl GraphKey,
        to: impl GraphKey,
    ) -> Result<Option<&NodeValue<Value>>, CoreError> {
        Ok(self.dag.get_edge(&from.to_key()?, &to.to_key()?))
    }

    pub fn contains_edge(&self, from: impl GraphKey, to: impl GraphKey) -> Result<bool, CoreError> {
        Ok(self.dag.contains_edge(&from.to_key()?, &to.to_key()?))
    }

    pub fn delete_edge(&mut self, from: impl GraphKey, to: impl GraphKey) -> Result<(), CoreError> {
        self.dag.delete_edge(&from.to_key()?, &to.to_key()?)?;
        Ok(())
    }

    /// Deletes the given edges, or all of them.
    pub fn delete_edges(&mut self, pairs: Option<&[(NodeKey, NodeKey)]>) -> Result<(), CoreError> {
        self.dag.delete_edges(pairs)
    }

    // -----------------------------------------------------------------------
    // Insertion
    // -----------------------------------------------------------------------

    /// Inserts a cell and, recursively, every cell embedded in its function,
    /// args and kwargs (lists element-wise). Nodes already present are left
    /// as they are. Non-cell values are ignored.
    ///
    /// Returns the key of the top-level cell, if `value` was one.
    pub fn insert(&mut self, value: impl Into<Value>) -> Option<NodeKey> {
        let value = value.into();
        let top = value.as_cell().map(|c| c.key());

        let mut visited = HashSet::new();
        let mut stack = vec![value];
        while let Some(value) = stack.pop() {
            match value {
                Value::Cell(cell) => {
                    let key = cell.key();
                    if !visited.insert(key.clone()) {
                        continue;
                    }
                    // Children pushed in reverse so they are stored in
                    // argument order.
                    let mut children: Vec<Value> = Vec::new();
                    children.push(cell.function().clone());
                    children.extend(cell.arguments().iter().cloned());
                    children.extend(cell.kwargs().values().cloned());
                    if !self.dag.contains(&key) {
                        self.dag.set(key, Value::Cell(cell));
                    }
                    stack.extend(children.into_iter().rev());
                }
                Value::List(items) => stack.extend(items.into_iter().rev()),
                _ => {}
            }
        }
        top
    }

    /// Consuming form of [`insert`](Self::insert).
    pub fn with(mut self, value: impl Into<Value>) -> Self {
        self.insert(value);
        self
    }

    // -----------------------------------------------------------------------
    // Form conversion
    // -----------------------------------------------------------------------

    /// A copy in dereferenced form: every embedded cell in a function, args
    /// or kwargs position is replaced by its `@id` reference. Edges carry
    /// over.
    pub fn to_id(&self) -> ReferenceGraph {
        let dag = self.dag.map_nodes(|_, payload| {
            payload.clone().map(|value| match value {
                Value::Cell(cell) => Value::from(cell.dereferenced()),
                other => other,
            })
        });
        tracing::debug!(nodes = dag.node_count(), "dereferenced graph");
        ReferenceGraph { dag }
    }

    /// A copy in embedded form: visiting nodes in topological order, every
    /// `@id` reference is replaced by the node already resolved for that id.
    ///
    /// Needs edges (see [`add_parents`](Self::add_parents)): a reference to a
    /// node that is present but not yet resolved fails with
    /// [`CoreError::MissingEdge`].
    pub fn from_id(&self) -> Result<ReferenceGraph, CoreError> {
        let order = self.dag.topological_order()?;
        let mut resolved: IndexMap<NodeKey, Value> = IndexMap::with_capacity(order.len());
        for key in order {
            let value = match self.dag.get(&key) {
                Some(Value::Cell(cell)) => {
                    Value::from(cell.rewrite(|v| self.embed(v, &key, &resolved))?)
                }
                Some(other) => other.clone(),
                None => continue,
            };
            resolved.insert(key, value);
        }

        let dag = self.dag.try_map_nodes(|key, payload| {
            Ok::<_, CoreError>(match resolved.get(key) {
                Some(value) => NodeValue::Plain(value.clone()),
                None => payload.clone(),
            })
        })?;
        tracing::debug!(nodes = dag.node_count(), "resolved references");
        Ok(ReferenceGraph { dag })
    }

    fn embed(
        &self,
        value: &Value,
        dependent: &NodeKey,
        resolved: &IndexMap<NodeKey, Value>,
    ) -> Result<Value, CoreError> {
        match value {
            Value::Str(s) => match parse_reference(s)? {
                None => Ok(value.clone()),
                Some(key) => match resolved.get(&key) {
                    Some(node) => Ok(node.clone()),
                    None if self.dag.contains(&key) => Err(CoreError::MissingEdge {
                        from: key,
                        to: dependent.clone(),
                    }),
                    None => Err(CoreError::MissingNode { key }),
                },
            },
            Value::List(items) => items
                .iter()
                .map(|item| self.embed(item, dependent, resolved))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Edges from cell bodies
    // -----------------------------------------------------------------------

    /// Adds a `dependency -> dependent` edge for every embedded cell and
    /// reference found in any node's body.
    pub fn add_parents(&mut self) -> Result<(), CoreError> {
        let targets: Vec<Arc<Cell>> = self.cells().map(|(_, c)| Arc::clone(c)).collect();
        self.link(targets)
    }

    /// Like [`add_parents`](Self::add_parents), limited to the given cell,
    /// `@id` reference, or list of those. A given cell that is not in the
    /// graph yet is inserted; other values are ignored.
    pub fn add_parents_of(&mut self, value: impl Into<Value>) -> Result<(), CoreError> {
        let mut targets = Vec::new();
        let mut pending = vec![value.into()];
        while let Some(value) = pending.pop() {
            match value {
                Value::Cell(cell) => targets.push(cell),
                Value::List(items) => pending.extend(items.into_iter().rev()),
                Value::Str(ref s) => {
                    let key = s.as_str().to_key()?;
                    targets.push(Arc::clone(self.cell(&key)?));
                }
                _ => {}
            }
        }
        self.link(targets)
    }

    /// Consuming form of [`add_parents`](Self::add_parents).
    pub fn with_parents(mut self) -> Result<Self, CoreError> {
        self.add_parents()?;
        Ok(self)
    }

    /// Plans node inserts and edges for `targets`, then commits them.
    fn link(&mut self, targets: Vec<Arc<Cell>>) -> Result<(), CoreError> {
        let mut inserts: IndexMap<NodeKey, Arc<Cell>> = IndexMap::new();
        let mut edges: Vec<(NodeKey, NodeKey)> = Vec::new();
        let mut visited = HashSet::new();

        for target in &targets {
            if !self.dag.contains(&target.key()) {
                inserts.entry(target.key()).or_insert_with(|| Arc::clone(target));
            }
        }

        let mut queue: VecDeque<Arc<Cell>> = targets.into();
        while let Some(cell) = queue.pop_front() {
            let key = cell.key();
            if !visited.insert(key.clone()) {
                continue;
            }
            for dependency in cell.dependencies()? {
                match dependency {
                    Dependency::Cell(dep) => {
                        let dep_key = dep.key();
                        if !self.dag.contains(&dep_key) {
                            inserts.entry(dep_key.clone()).or_insert_with(|| Arc::clone(&dep));
                        }
                        edges.push((dep_key, key.clone()));
                        queue.push_back(dep);
                    }
                    Dependency::Reference(dep_key) => {
                        if !self.dag.contains(&dep_key) && !inserts.contains_key(&dep_key) {
                            return Err(CoreError::MissingNode { key: dep_key });
                        }
                        edges.push((dep_key, key.clone()));
                    }
                }
            }
        }

        tracing::debug!(
            inserted = inserts.len(),
            edges = edges.len(),
            "linking dependencies"
        );
        for (key, cell) in inserts {
            self.dag.set(key, Value::Cell(cell));
        }
        for (from, to) in edges {
            self.dag.set_edge(from, to, NodeValue::empty())?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Views
    // -----------------------------------------------------------------------

    /// Metadata of every dereferenced cell, in topological order.
    pub fn metadata(&self) -> Result<IndexMap<NodeKey, CellMetadata>, CoreError> {
        let order = self.dag.topological_order()?;
        let flat = self.to_id();
        Ok(order
            .into_iter()
            .filter_map(|key| {
                let meta = flat.cell(&key).ok()?.metadata();
                Some((key, meta))
            })
            .collect())
    }

    /// One row per node in topological order.
    pub fn to_table(&self) -> Result<Table, CoreError> {
        let order = self.dag.topological_order()?;
        let rows = order
            .iter()
            .filter_map(|key| self.cell(key).ok())
            .map(|cell| TableRow::from_cell(cell))
            .collect();
        Ok(Table { rows })
    }

    // -----------------------------------------------------------------------
    // JSON
    // -----------------------------------------------------------------------

    /// Encoded dereferenced cells keyed by node id.
    pub fn encoded_nodes(&self) -> IndexMap<NodeKey, Json> {
        self.to_id()
            .cells()
            .map(|(key, cell)| (key.clone(), codec::encode_cell(cell)))
            .collect()
    }

    fn document(&self) -> Json {
        let object: JsonMap<String, Json> = self
            .encoded_nodes()
            .into_iter()
            .map(|(key, cell)| (key.to_string(), cell))
            .collect();
        Json::Object(object)
    }

    /// Serializes the node set in dereferenced form. Edges are not stored.
    pub fn to_json(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(&self.document())?)
    }

    pub fn to_json_pretty(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string_pretty(&self.document())?)
    }

    /// Parses a document written by [`to_json`](Self::to_json), rebuilds
    /// edges and resolves references back into embedded form.
    pub fn from_json(text: &str, registry: &FunctionRegistry) -> Result<ReferenceGraph, CoreError> {
        let document: Json = serde_json::from_str(text)?;
        let object = document.as_object().ok_or_else(|| CoreError::InvalidDocument {
            reason: "graph document must be an object".to_string(),
        })?;

        let mut graph = ReferenceGraph::new();
        for (id, encoded) in object {
            let cell = codec::decode_cell(encoded, registry)?;
            if cell.key().to_string() != *id {
                return Err(CoreError::InvalidDocument {
                    reason: format!("node '{id}' holds a cell with identity '{}'", cell.key()),
                });
            }
            graph.insert(cell);
        }
        graph.add_parents()?;
        tracing::debug!(nodes = graph.node_count(), edges = graph.edge_count(), "loaded graph");
        graph.from_id()
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluates the node at `key` with this graph resolving references.
    pub fn evaluate(&self, key: impl GraphKey, cache: &CellCache) -> Result<Value, CoreError> {
        self.evaluate_with(key, cache, EvalConfig::default())
    }

    pub fn evaluate_with(
        &self,
        key: impl GraphKey,
        cache: &CellCache,
        config: EvalConfig,
    ) -> Result<Value, CoreError> {
        let cell = self.cell(key)?;
        let ctx = EvalContext::new(cache)
            .with_resolver(self)
            .with_config(config);
        cell.evaluate(&ctx)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn topological_order(&self) -> Result<Vec<NodeKey>, CoreError> {
        self.dag.topological_order()
    }

    pub fn node_count(&self) -> usize {
        self.dag.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.dag.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.dag.is_empty()
    }

    /// Node keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &NodeKey> {
        self.dag.keys()
    }

    /// Stored cells in insertion order.
    pub fn cells(&self) -> impl Iterator<Item = (&NodeKey, &Arc<Cell>)> {
        self.dag
            .nodes()
            .filter_map(|(key, payload)| payload.value()?.as_cell().map(|c| (key, c)))
    }

    /// Edge endpoints in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&NodeKey, &NodeKey)> {
        self.dag.edges().map(|(from, to, _)| (from, to))
    }

    pub fn successors(&self, key: &NodeKey) -> impl Iterator<Item = &NodeKey> {
        self.dag.successors(key)
    }

    pub fn predecessors(&self, key: &NodeKey) -> impl Iterator<Item = &NodeKey> {
        self.dag.predecessors(key)
    }
}

impl Resolver for ReferenceGraph {
    fn lookup(&self, key: &NodeKey) -> Option<&Value> {
        self.dag.get(key)
    }
}

impl<V: Into<Value>> AddAssign<V> for ReferenceGraph {
    fn add_assign(&mut self, rhs: V) {
        self.insert(rhs);
    }
}

impl<V: Into<Value>> Add<V> for ReferenceGraph {
    type Output = ReferenceGraph;

    fn add(self, rhs: V) -> ReferenceGraph {
        self.with(rhs)
    }
}

impl fmt::Display for ReferenceGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_table() {
            Ok(table) => write!(f, "{table}"),
            Err(e) => write!(f, "<cyclic graph: {e}>"),
        }
    }
}
