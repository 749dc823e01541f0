//! Dynamic values carried by cells.
//!
//! [`Value`] is what flows through a cell graph: cell nodes, literal
//! arguments, function handles and nested cells are all values. A cell's
//! arguments may embed other cells directly ([`Value::Cell`]) or point at
//! them with `@id` reference strings once a graph has been dereferenced.
//!
//! Equality is the NaN-aware, structure-aware predicate [`eq`]: `NaN == NaN`,
//! `1 == 1.0`, maps compare regardless of insertion order and cells compare
//! by identity.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::cell::Cell;
use crate::function::FunctionRef;
use crate::id::{is_reference, parse_reference, NodeKey};

/// A value produced or consumed by cell evaluation.
#[derive(Debug, Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// String-keyed mapping in insertion order.
    Map(IndexMap<String, Value>),
    Function(FunctionRef),
    /// An embedded cell.
    Cell(Arc<Cell>),
}

impl Value {
    /// Returns a human-readable name of the value's variant.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Str(_) => "Str",
            Value::List(_) => "List",
            Value::Map(_) => "Map",
            Value::Function(_) => "Function",
            Value::Cell(_) => "Cell",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float` values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&Arc<Cell>> {
        match self {
            Value::Cell(c) => Some(c),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true for `@id` reference strings.
    pub fn is_reference(&self) -> bool {
        matches!(self, Value::Str(s) if is_reference(s))
    }

    /// The key this value refers to, if it is a well-formed reference string.
    pub fn reference_key(&self) -> Option<NodeKey> {
        match self {
            Value::Str(s) => parse_reference(s).ok().flatten(),
            _ => None,
        }
    }

    /// Builds a map value from `(key, value)` pairs.
    pub fn map<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Value::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a list value.
    pub fn list<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Value {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

/// NaN-aware, structure-aware deep equality.
pub fn eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => (x.is_nan() && y.is_nan()) || x == y,
        (Value::Int(i), Value::Float(f)) | (Value::Float(f), Value::Int(i)) => {
            integral_f64(*f) == Some(*i)
        }
        (Value::Str(x), Value::Str(y)) => x == y,
        (Value::List(xs), Value::List(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| eq(x, y))
        }
        (Value::Map(xs), Value::Map(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| eq(x, y)))
        }
        (Value::Function(f), Value::Function(g)) => f.name() == g.name(),
        (Value::Cell(c), Value::Cell(d)) => Arc::ptr_eq(c, d) || c.key() == d.key(),
        _ => false,
    }
}

/// Returns the integer a float is exactly equal to, if any.
pub(crate) fn integral_f64(f: f64) -> Option<i64> {
    // 2^63 is exactly representable; anything at or beyond it overflows i64.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    if f.is_finite() && f.fract() == 0.0 && (-LIMIT..LIMIT).contains(&f) {
        Some(f as i64)
    } else {
        None
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        eq(self, other)
    }
}

/// Compact rendering used by graph tables: strings print bare, cells print
/// as their reference and functions as their name.
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::Str(s) => write!(f, "{s}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "{}", func.name()),
            Value::Cell(cell) => write!(f, "{}", cell.reference()),
        }
    }
}

// Conversions from Rust primitives.

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(map: IndexMap<String, Value>) -> Self {
        Value::Map(map)
    }
}

impl From<FunctionRef> for Value {
    fn from(f: FunctionRef) -> Self {
        Value::Function(f)
    }
}

impl From<Cell> for Value {
    fn from(cell: Cell) -> Self {
        Value::Cell(Arc::new(cell))
    }
}

impl From<Arc<Cell>> for Value {
    fn from(cell: Arc<Cell>) -> Self {
        Value::Cell(cell)
    }
}

impl From<&Arc<Cell>> for Value {
    fn from(cell: &Arc<Cell>) -> Self {
        Value::Cell(Arc::clone(cell))
    }
}

impl From<NodeKey> for Value {
    fn from(key: NodeKey) -> Self {
        match key {
            NodeKey::Int(i) => Value::Int(i),
            NodeKey::Str(s) => Value::Str(s),
        }
    }
}
