//! Cells: deferred function calls with resolvable arguments.
//!
//! A [`Cell`] pairs an identity (its `node`) with a function, positional
//! arguments and keyword arguments. Arguments may be plain values, embedded
//! cells, or `@id` reference strings pointing at other nodes of an owning
//! graph. Evaluation resolves every argument recursively and then calls the
//! function.
//!
//! # Caching strategies
//!
//! - [`Strategy::Plain`]: recompute on every evaluation.
//! - [`Strategy::Memory`] (a "MemCell"): compute once per identity per
//!   [`CellCache`]; later evaluations return the stored value even if the
//!   function was swapped out.
//! - [`Strategy::Expires`] (an "EODCell" for [`Period::Day`]): like `Memory`,
//!   but the stored value goes stale once the cache clock crosses the next
//!   period boundary after it was computed.
//!
//! # Constant cells
//!
//! When the function position resolves to anything other than a
//! [`Value::Function`], the cell is a constant and evaluates to that value.
//! Graph inputs are constant cells: `Cell::new("a", 1)`.

use std::cell::RefCell;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::cache::CellCache;
use crate::calendar::Period;
use crate::codec;
use crate::error::CoreError;
use crate::hash::cell_key;
use crate::id::{parse_reference, NodeKey};
use crate::value::Value;

/// Key inside a mapping node that carries the cell's explicit id.
pub const ID_FIELD: &str = "id";

/// How a cell caches its evaluated result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    Plain,
    Memory,
    Expires(Period),
}

impl Strategy {
    /// The period after which cached values go stale, for expiring cells.
    pub fn expiry(self) -> Option<Period> {
        match self {
            Strategy::Expires(period) => Some(period),
            _ => None,
        }
    }
}

/// A deferred function call with identity.
#[derive(Debug, Clone)]
pub struct Cell {
    node: Value,
    key: NodeKey,
    function: Value,
    args: Vec<Value>,
    kwargs: IndexMap<String, Value>,
    strategy: Strategy,
}

impl Cell {
    /// Creates a plain cell. Add arguments with [`arg`](Self::arg) and
    /// [`kwarg`](Self::kwarg).
    pub fn new(node: impl Into<Value>, function: impl Into<Value>) -> Self {
        let node = node.into();
        let mut cell = Cell {
            key: NodeKey::Int(0),
            node,
            function: function.into(),
            args: Vec::new(),
            kwargs: IndexMap::new(),
            strategy: Strategy::Plain,
        };
        cell.key = cell_key(&cell);
        cell
    }

    /// Creates a cell that memoizes its result per identity.
    ///
    /// The cache key is the identity alone, so two memo cells sharing an
    /// identity but holding different arguments share one cached value.
    pub fn memo(node: impl Into<Value>, function: impl Into<Value>) -> Self {
        Self::new(node, function).with_strategy(Strategy::Memory)
    }

    /// Creates a cell whose memoized result expires at the end of each day.
    pub fn eod(node: impl Into<Value>, function: impl Into<Value>) -> Self {
        Self::expiring(node, function, Period::Day)
    }

    pub fn expiring(node: impl Into<Value>, function: impl Into<Value>, period: Period) -> Self {
        Self::new(node, function).with_strategy(Strategy::Expires(period))
    }

    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        self.args.push(value.into());
        self
    }

    pub fn args<V: Into<Value>>(mut self, values: impl IntoIterator<Item = V>) -> Self {
        self.args.extend(values.into_iter().map(Into::into));
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(name.into(), value.into());
        self
    }

    pub fn with_strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn node(&self) -> &Value {
        &self.node
    }

    /// The value that establishes identity: the `id` entry of a mapping
    /// node, otherwise the node itself.
    pub fn identity(&self) -> &Value {
        match &self.node {
            Value::Map(entries) => entries.get(ID_FIELD).unwrap_or(&self.node),
            other => other,
        }
    }

    /// The canonical key of this cell; fixed at construction.
    pub fn key(&self) -> NodeKey {
        self.key.clone()
    }

    pub fn function(&self) -> &Value {
        &self.function
    }

    pub fn arguments(&self) -> &[Value] {
        &self.args
    }

    pub fn kwargs(&self) -> &IndexMap<String, Value> {
        &self.kwargs
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Reference string addressing this cell, e.g. `@a`.
    pub fn reference(&self) -> String {
        self.key.to_reference()
    }

    // -----------------------------------------------------------------------
    // Graph-internal rewrites
    // -----------------------------------------------------------------------

    /// Builds a cell with the same identity and strategy but a new body.
    pub(crate) fn rewrite<F>(&self, mut f: F) -> Result<Cell, CoreError>
    where
        F: FnMut(&Value) -> Result<Value, CoreError>,
    {
        let function = f(&self.function)?;
        let args = self.args.iter().map(&mut f).collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = IndexMap::with_capacity(self.kwargs.len());
        for (name, value) in &self.kwargs {
            kwargs.insert(name.clone(), f(value)?);
        }
        Ok(Cell {
            node: self.node.clone(),
            key: self.key.clone(),
            function,
            args,
            kwargs,
            strategy: self.strategy,
        })
    }

    /// This cell with every embedded cell in its body replaced by an `@id`
    /// reference string.
    pub fn dereferenced(&self) -> Cell {
        Cell {
            node: self.node.clone(),
            key: self.key.clone(),
            function: to_reference(&self.function),
            args: self.args.iter().map(to_reference).collect(),
            kwargs: self
                .kwargs
                .iter()
                .map(|(k, v)| (k.clone(), to_reference(v)))
                .collect(),
            strategy: self.strategy,
        }
    }

    /// Direct dependencies found in the function, args and kwargs positions
    /// (lists are searched element-wise).
    pub fn dependencies(&self) -> Result<Vec<Dependency>, CoreError> {
        let mut deps = Vec::new();
        collect_dependencies(&self.function, &mut deps)?;
        for arg in &self.args {
            collect_dependencies(arg, &mut deps)?;
        }
        for value in self.kwargs.values() {
            collect_dependencies(value, &mut deps)?;
        }
        Ok(deps)
    }

    // -----------------------------------------------------------------------
    // Evaluation
    // -----------------------------------------------------------------------

    /// Evaluates this cell under `ctx`, honouring its caching strategy.
    pub fn evaluate(&self, ctx: &EvalContext<'_>) -> Result<Value, CoreError> {
        ctx.enter(&self.key)?;
        let result = match self.strategy {
            Strategy::Plain => self.compute(ctx),
            Strategy::Memory | Strategy::Expires(_) => {
                ctx.cache
                    .get_or_compute(&self.key, self.strategy.expiry(), || self.compute(ctx))
            }
        };
        ctx.exit();
        result
    }

    fn compute(&self, ctx: &EvalContext<'_>) -> Result<Value, CoreError> {
        let function = ctx.resolve(&self.function)?;
        let args = self
            .args
            .iter()
            .map(|a| ctx.resolve(a))
            .collect::<Result<Vec<_>, _>>()?;
        let mut kwargs = IndexMap::with_capacity(self.kwargs.len());
        for (name, value) in &self.kwargs {
            kwargs.insert(name.clone(), ctx.resolve(value)?);
        }

        match function {
            Value::Function(f) => {
                tracing::trace!(cell = %self.key, function = f.name(), "calling");
                f.call(&args, &kwargs).map_err(|source| CoreError::Evaluation {
                    id: self.key.clone(),
                    source,
                })
            }
            constant => Ok(constant),
        }
    }

    // -----------------------------------------------------------------------
    // Metadata
    // -----------------------------------------------------------------------

    /// Serializable facts identifying this cell, suitable for indexing in
    /// an external document store. Embedded cells appear as `@id` strings.
    pub fn metadata(&self) -> CellMetadata {
        let flat = self.dereferenced();
        CellMetadata {
            id: self.key.clone(),
            node: codec::encode_value(&self.node),
            function: codec::encode_value(&flat.function),
            args: flat.args.iter().map(codec::encode_value).collect(),
            kwargs: flat
                .kwargs
                .iter()
                .map(|(k, v)| (k.clone(), codec::encode_value(v)))
                .collect(),
            cache: self.strategy,
        }
    }
}

/// Replaces embedded cells by their reference strings, recursing into lists.
pub fn to_reference(value: &Value) -> Value {
    match value {
        Value::Cell(cell) => Value::Str(cell.reference()),
        Value::List(items) => Value::List(items.iter().map(to_reference).collect()),
        other => other.clone(),
    }
}

/// A structural dependency of a cell.
#[derive(Debug, Clone)]
pub enum Dependency {
    /// An embedded cell.
    Cell(Arc<Cell>),
    /// An `@id` reference to another node.
    Reference(NodeKey),
}

impl Dependency {
    pub fn key(&self) -> NodeKey {
        match self {
            Dependency::Cell(cell) => cell.key(),
            Dependency::Reference(key) => key.clone(),
        }
    }
}

fn collect_dependencies(value: &Value, deps: &mut Vec<Dependency>) -> Result<(), CoreError> {
    match value {
        Value::Cell(cell) => deps.push(Dependency::Cell(Arc::clone(cell))),
        Value::Str(s) => {
            if let Some(key) = parse_reference(s)? {
                deps.push(Dependency::Reference(key));
            }
        }
        Value::List(items) => {
            for item in items {
                collect_dependencies(item, deps)?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Serializable description of a cell for external indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellMetadata {
    pub id: NodeKey,
    pub node: serde_json::Value,
    pub function: serde_json::Value,
    pub args: Vec<serde_json::Value>,
    pub kwargs: IndexMap<String, serde_json::Value>,
    pub cache: Strategy,
}

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Looks up node payloads by key; implemented by graphs that own cells.
pub trait Resolver {
    fn lookup(&self, key: &NodeKey) -> Option<&Value>;
}

/// Configuration for cell evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvalConfig {
    /// Maximum nesting of cell evaluations. Default: 1024.
    pub max_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig { max_depth: 1024 }
    }
}

/// Everything one evaluation needs: the result cache, an optional resolver
/// for `@id` references, and the identities currently being evaluated.
///
/// Not `Sync`; use one context per thread and share the [`CellCache`].
pub struct EvalContext<'a> {
    cache: &'a CellCache,
    resolver: Option<&'a dyn Resolver>,
    config: EvalConfig,
    path: RefCell<Vec<NodeKey>>,
}

impl<'a> EvalContext<'a> {
    /// A context without a resolver: reference strings stay literal.
    pub fn new(cache: &'a CellCache) -> Self {
        EvalContext {
            cache,
            resolver: None,
            config: EvalConfig::default(),
            path: RefCell::new(Vec::new()),
        }
    }

    pub fn with_resolver(mut self, resolver: &'a dyn Resolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    pub fn with_config(mut self, config: EvalConfig) -> Self {
        self.config = config;
        self
    }

    pub fn cache(&self) -> &CellCache {
        self.cache
    }

    /// Resolves one argument: cells are evaluated, references are looked up
    /// (when a resolver is present) and lists are resolved element-wise.
    pub fn resolve(&self, value: &Value) -> Result<Value, CoreError> {
        match value {
            Value::Cell(cell) => cell.evaluate(self),
            Value::Str(s) => {
                let Some(resolver) = self.resolver else {
                    return Ok(value.clone());
                };
                let Some(key) = parse_reference(s)? else {
                    return Ok(value.clone());
                };
                match resolver.lookup(&key) {
                    Some(Value::Cell(cell)) => cell.evaluate(self),
                    Some(other) => Ok(other.clone()),
                    None => Err(CoreError::MissingNode { key }),
                }
            }
            Value::List(items) => items
                .iter()
                .map(|item| self.resolve(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    fn enter(&self, key: &NodeKey) -> Result<(), CoreError> {
        let mut path = self.path.borrow_mut();
        if let Some(pos) = path.iter().position(|k| k == key) {
            return Err(CoreError::Cycle {
                keys: path[pos..].to_vec(),
            });
        }
        if path.len() >= self.config.max_depth {
            return Err(CoreError::DepthExceeded {
                limit: self.config.max_depth,
            });
        }
        path.push(key.clone());
        Ok(())
    }

    fn exit(&self) {
        self.path.borrow_mut().pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::ManualClock;
    use crate::function::{FunctionError, FunctionRef};
    use crate::ops::BuiltinOp;
    use chrono::{Duration, NaiveDate};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_add(calls: Arc<AtomicUsize>) -> FunctionRef {
        FunctionRef::new("counting_add", move |args, kwargs| {
            calls.fetch_add(1, Ordering::SeqCst);
            BuiltinOp::Add.apply(args, kwargs)
        })
    }

    #[test]
    fn constant_cell_evaluates_to_value() {
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache);
        assert_eq!(Cell::new("a", 1).evaluate(&ctx).unwrap(), Value::Int(1));
    }

    #[test]
    fn nested_cells_evaluate() {
        let a = Cell::new("a", 1);
        let b = Cell::new("b", 2);
        let c = Cell::new("c", BuiltinOp::Add.function()).arg(a).arg(b);
        let cache = CellCache::new();
        assert_eq!(c.evaluate(&EvalContext::new(&cache)).unwrap(), Value::Int(3));
    }

    #[test]
    fn kwargs_are_resolved() {
        let b = Cell::new("b", 10);
        let c = Cell::new("c", BuiltinOp::Sub.function())
            .arg(1)
            .kwarg("b", b);
        let cache = CellCache::new();
        assert_eq!(c.evaluate(&EvalContext::new(&cache)).unwrap(), Value::Int(-9));
    }

    #[test]
    fn list_arguments_are_resolved_element_wise() {
        let a = Cell::new("a", 1);
        let b = Cell::new("b", 2);
        let total = Cell::new("total", BuiltinOp::Sum.function()).arg(Value::list([a, b]));
        let cache = CellCache::new();
        assert_eq!(total.evaluate(&EvalContext::new(&cache)).unwrap(), Value::Int(3));
    }

    #[test]
    fn plain_cell_recomputes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = Cell::new("k", counting_add(calls.clone())).args([1, 2]);
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache);
        cell.evaluate(&ctx).unwrap();
        cell.evaluate(&ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn memo_cell_computes_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = Cell::memo("k", counting_add(calls.clone())).args([1, 2]);
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache);
        assert_eq!(cell.evaluate(&ctx).unwrap(), Value::Int(3));
        assert_eq!(cell.evaluate(&ctx).unwrap(), Value::Int(3));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn memo_cache_is_keyed_by_identity_only() {
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache);
        let first = Cell::memo("k", BuiltinOp::Add.function()).args([1, 2]);
        let swapped = Cell::memo("k", BuiltinOp::Mul.function()).args([5, 5]);
        assert_eq!(first.evaluate(&ctx).unwrap(), Value::Int(3));
        assert_eq!(swapped.evaluate(&ctx).unwrap(), Value::Int(3));
    }

    #[test]
    fn eod_cell_expires_on_next_day() {
        let start = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(10, 0, 0)
            .unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let cache = CellCache::with_clock(clock.clone());
        let calls = Arc::new(AtomicUsize::new(0));
        let cell = Cell::eod("k", counting_add(calls.clone())).args([1, 2]);
        let ctx = EvalContext::new(&cache);

        cell.evaluate(&ctx).unwrap();
        clock.advance(Duration::hours(3));
        cell.evaluate(&ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        clock.advance(Duration::hours(12));
        cell.evaluate(&ctx).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn function_failure_carries_cell_id() {
        let cell = Cell::new("boom", BuiltinOp::Div.function()).args([1, 0]);
        let cache = CellCache::new();
        match cell.evaluate(&EvalContext::new(&cache)) {
            Err(CoreError::Evaluation { id, source }) => {
                assert_eq!(id, NodeKey::from("boom"));
                assert_eq!(source, FunctionError::DivideByZero);
            }
            other => panic!("expected Evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn nested_failure_propagates_unchanged() {
        let inner = Cell::new("inner", BuiltinOp::Div.function()).args([1, 0]);
        let outer = Cell::new("outer", BuiltinOp::Neg.function()).arg(inner);
        let cache = CellCache::new();
        match outer.evaluate(&EvalContext::new(&cache)) {
            Err(CoreError::Evaluation { id, .. }) => assert_eq!(id, NodeKey::from("inner")),
            other => panic!("expected Evaluation error, got {other:?}"),
        }
    }

    #[test]
    fn references_stay_literal_without_resolver() {
        let cell = Cell::new("c", BuiltinOp::Add.function()).args(["@a", "@b"]);
        let cache = CellCache::new();
        assert_eq!(
            cell.evaluate(&EvalContext::new(&cache)).unwrap(),
            Value::from("@a@b")
        );
    }

    struct Nodes(IndexMap<NodeKey, Value>);

    impl Resolver for Nodes {
        fn lookup(&self, key: &NodeKey) -> Option<&Value> {
            self.0.get(key)
        }
    }

    #[test]
    fn references_resolve_through_resolver() {
        let mut nodes = IndexMap::new();
        nodes.insert(NodeKey::from("a"), Value::from(Cell::new("a", 4)));
        let nodes = Nodes(nodes);
        let cell = Cell::new("c", BuiltinOp::Neg.function()).arg("@a");
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache).with_resolver(&nodes);
        assert_eq!(cell.evaluate(&ctx).unwrap(), Value::Int(-4));

        let missing = Cell::new("d", BuiltinOp::Neg.function()).arg("@zz");
        match missing.evaluate(&ctx) {
            Err(CoreError::MissingNode { key }) => assert_eq!(key, NodeKey::from("zz")),
            other => panic!("expected MissingNode, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_is_a_cycle() {
        let mut nodes = IndexMap::new();
        nodes.insert(
            NodeKey::from("x"),
            Value::from(Cell::new("x", BuiltinOp::Neg.function()).arg("@x")),
        );
        let nodes = Nodes(nodes);
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache).with_resolver(&nodes);
        let x = nodes.lookup(&NodeKey::from("x")).unwrap().as_cell().unwrap().clone();
        assert!(matches!(x.evaluate(&ctx), Err(CoreError::Cycle { .. })));
    }

    #[test]
    fn depth_limit_is_enforced() {
        let mut cell = Cell::new(0, 0);
        for i in 1..10 {
            cell = Cell::new(i, BuiltinOp::Identity.function()).arg(cell);
        }
        let cache = CellCache::new();
        let ctx = EvalContext::new(&cache).with_config(EvalConfig { max_depth: 5 });
        assert!(matches!(
            cell.evaluate(&ctx),
            Err(CoreError::DepthExceeded { limit: 5 })
        ));
    }

    #[test]
    fn dereferenced_body_uses_ids() {
        let a = Cell::new("a", 1);
        let c = Cell::new("c", BuiltinOp::Add.function())
            .arg(a.clone())
            .arg(Value::list([Value::from(a), Value::Int(2)]));
        let flat = c.dereferenced();
        assert_eq!(flat.arguments()[0], Value::from("@a"));
        assert_eq!(flat.arguments()[1], Value::list([Value::from("@a"), Value::Int(2)]));
        assert_eq!(flat.key(), c.key());
    }

    #[test]
    fn dependencies_cover_all_positions() {
        let f = Cell::new("f", BuiltinOp::Add.function());
        let c = Cell::new("c", f)
            .arg("@a")
            .arg(Value::list(["@b", "literal"]))
            .kwarg("k", Cell::new("k", 3));
        let keys: Vec<NodeKey> = c.dependencies().unwrap().iter().map(Dependency::key).collect();
        assert_eq!(
            keys,
            vec![
                NodeKey::from("f"),
                NodeKey::from("a"),
                NodeKey::from("b"),
                NodeKey::from("k")
            ]
        );
    }

    #[test]
    fn metadata_has_no_live_handles() {
        let a = Cell::new("a", 1);
        let c = Cell::memo("c", BuiltinOp::Add.function()).arg(a).arg(2);
        let meta = c.metadata();
        assert_eq!(meta.id, NodeKey::from("c"));
        assert_eq!(meta.function, serde_json::json!({"$fn": "add"}));
        assert_eq!(meta.args, vec![serde_json::json!("@a"), serde_json::json!(2)]);
        assert_eq!(meta.cache, Strategy::Memory);
        assert!(serde_json::to_string(&meta).is_ok());
    }
}
