//! Function handles and the name registry.
//!
//! A cell's function is an opaque [`FunctionRef`]: a native closure plus the
//! name that identifies it. Identity, hashing and serialization all go
//! through the name, never through the closure itself, so a persisted graph
//! re-links its functions by looking the names up in a [`FunctionRegistry`].

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use thiserror::Error;

use crate::error::CoreError;
use crate::ops::BuiltinOp;
use crate::value::Value;

/// Failure raised by a wrapped function.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FunctionError {
    #[error("{function}: expected {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: usize,
        got: usize,
    },

    #[error("{function}: expected {expected}, got {got}")]
    Type {
        function: String,
        expected: String,
        got: String,
    },

    #[error("divide by zero")]
    DivideByZero,

    #[error("integer overflow")]
    Overflow,

    #[error("{0}")]
    Failed(String),
}

/// Signature of every native cell function: positional args, keyword args.
pub type NativeFn =
    dyn Fn(&[Value], &IndexMap<String, Value>) -> Result<Value, FunctionError> + Send + Sync;

/// A named, cheaply clonable handle to a native function.
#[derive(Clone)]
pub struct FunctionRef {
    name: Arc<str>,
    params: Arc<[String]>,
    f: Arc<NativeFn>,
}

impl FunctionRef {
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value], &IndexMap<String, Value>) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        FunctionRef {
            name: Arc::from(name.into()),
            params: Arc::from(Vec::new()),
            f: Arc::new(f),
        }
    }

    /// Declares the parameter names, in order.
    pub fn with_params<S: Into<String>>(mut self, params: impl IntoIterator<Item = S>) -> Self {
        self.params = params.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared parameter names; empty when the function is variadic or
    /// undeclared.
    pub fn params(&self) -> &[String] {
        &self.params
    }

    pub fn call(
        &self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, FunctionError> {
        (self.f)(args, kwargs)
    }
}

impl fmt::Debug for FunctionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FunctionRef({})", self.name)
    }
}

impl PartialEq for FunctionRef {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

/// Name-indexed function handles, used to re-link deserialized cells.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    functions: IndexMap<String, FunctionRef>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry preloaded with every [`BuiltinOp`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for op in BuiltinOp::ALL {
            registry.register(op.function());
        }
        registry
    }

    /// Registers a handle under its own name, replacing any previous entry.
    pub fn register(&mut self, function: FunctionRef) -> FunctionRef {
        self.functions
            .insert(function.name().to_string(), function.clone());
        function
    }

    /// Wraps a closure into a handle and registers it.
    pub fn register_fn<F>(&mut self, name: impl Into<String>, f: F) -> FunctionRef
    where
        F: Fn(&[Value], &IndexMap<String, Value>) -> Result<Value, FunctionError>
            + Send
            + Sync
            + 'static,
    {
        self.register(FunctionRef::new(name, f))
    }

    pub fn get(&self, name: &str) -> Option<&FunctionRef> {
        self.functions.get(name)
    }

    /// Looks up a handle, failing with [`CoreError::UnknownFunction`].
    pub fn resolve(&self, name: &str) -> Result<FunctionRef, CoreError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| CoreError::UnknownFunction {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_compare_by_name() {
        let a = FunctionRef::new("f", |_, _| Ok(Value::Int(1)));
        let b = FunctionRef::new("f", |_, _| Ok(Value::Int(2)));
        assert_eq!(a, b);
        assert_eq!(format!("{a:?}"), "FunctionRef(f)");
    }

    #[test]
    fn params_are_declared_in_order() {
        let f = FunctionRef::new("f", |_, _| Ok(Value::Null)).with_params(["x", "y"]);
        assert_eq!(f.params(), ["x".to_string(), "y".to_string()]);
    }

    #[test]
    fn registry_resolves_builtins() {
        let registry = FunctionRegistry::with_builtins();
        let add = registry.resolve("add").unwrap();
        let out = add
            .call(&[Value::Int(1), Value::Int(2)], &IndexMap::new())
            .unwrap();
        assert_eq!(out, Value::Int(3));
        assert_eq!(registry.len(), BuiltinOp::ALL.len());
    }

    #[test]
    fn unknown_function_errors() {
        let registry = FunctionRegistry::new();
        match registry.resolve("nope") {
            Err(CoreError::UnknownFunction { name }) => assert_eq!(name, "nope"),
            other => panic!("expected UnknownFunction, got {other:?}"),
        }
    }
}
