//! Built-in operators available to every registry.
//!
//! [`BuiltinOp`] is the small operation vocabulary preloaded by
//! [`FunctionRegistry::with_builtins`](crate::function::FunctionRegistry::with_builtins):
//! arithmetic, comparison, logic and a few container helpers.
//!
//! # Numeric promotion
//!
//! `Int op Int` stays integral (checked, so overflow and division by zero
//! raise). Any `Float` operand promotes both sides to `f64`. Float division
//! by zero also raises rather than producing an infinity.
//!
//! # Argument binding
//!
//! Fixed-arity operators declare parameter names and accept their arguments
//! positionally, by keyword, or mixed (`add(1, b=2)`). Variadic operators
//! (`concat`, `sum`) take positional arguments only.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::function::{FunctionError, FunctionRef};
use crate::value::{eq, Value};

/// The built-in operation vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinOp {
    Add,
    Sub,
    Mul,
    /// Integer division truncates toward zero.
    Div,
    Rem,
    Neg,
    Abs,
    Eq,
    Lt,
    Gt,
    Not,
    /// Concatenates strings or lists.
    Concat,
    /// Sums its arguments, or the elements of a single list argument.
    Sum,
    Len,
    /// Indexes a list (negative counts from the end) or a map by key.
    Get,
    /// Returns its single argument unchanged.
    Identity,
}

impl BuiltinOp {
    pub const ALL: [BuiltinOp; 16] = [
        BuiltinOp::Add,
        BuiltinOp::Sub,
        BuiltinOp::Mul,
        BuiltinOp::Div,
        BuiltinOp::Rem,
        BuiltinOp::Neg,
        BuiltinOp::Abs,
        BuiltinOp::Eq,
        BuiltinOp::Lt,
        BuiltinOp::Gt,
        BuiltinOp::Not,
        BuiltinOp::Concat,
        BuiltinOp::Sum,
        BuiltinOp::Len,
        BuiltinOp::Get,
        BuiltinOp::Identity,
    ];

    /// The registry name of this operator.
    pub fn name(self) -> &'static str {
        match self {
            BuiltinOp::Add => "add",
            BuiltinOp::Sub => "sub",
            BuiltinOp::Mul => "mul",
            BuiltinOp::Div => "div",
            BuiltinOp::Rem => "rem",
            BuiltinOp::Neg => "neg",
            BuiltinOp::Abs => "abs",
            BuiltinOp::Eq => "eq",
            BuiltinOp::Lt => "lt",
            BuiltinOp::Gt => "gt",
            BuiltinOp::Not => "not",
            BuiltinOp::Concat => "concat",
            BuiltinOp::Sum => "sum",
            BuiltinOp::Len => "len",
            BuiltinOp::Get => "get",
            BuiltinOp::Identity => "identity",
        }
    }

    /// Declared parameter names; empty for variadic operators.
    pub fn params(self) -> &'static [&'static str] {
        match self {
            BuiltinOp::Add
            | BuiltinOp::Sub
            | BuiltinOp::Mul
            | BuiltinOp::Div
            | BuiltinOp::Rem
            | BuiltinOp::Eq
            | BuiltinOp::Lt
            | BuiltinOp::Gt => &["a", "b"],
            BuiltinOp::Neg | BuiltinOp::Abs | BuiltinOp::Not | BuiltinOp::Identity => &["value"],
            BuiltinOp::Len => &["container"],
            BuiltinOp::Get => &["container", "key"],
            BuiltinOp::Concat | BuiltinOp::Sum => &[],
        }
    }

    /// Wraps this operator into a named function handle.
    pub fn function(self) -> FunctionRef {
        FunctionRef::new(self.name(), move |args, kwargs| self.apply(args, kwargs))
            .with_params(self.params().iter().copied())
    }

    /// Applies the operator to already-resolved arguments.
    pub fn apply(
        self,
        args: &[Value],
        kwargs: &IndexMap<String, Value>,
    ) -> Result<Value, FunctionError> {
        if self.params().is_empty() {
            if !kwargs.is_empty() {
                return Err(FunctionError::Failed(format!(
                    "{}: keyword arguments are not supported",
                    self.name()
                )));
            }
            return match self {
                BuiltinOp::Concat => concat(args),
                _ => sum(args),
            };
        }

        let bound = bind(self.name(), self.params(), args, kwargs)?;
        match self {
            BuiltinOp::Add => add(&bound[0], &bound[1]),
            BuiltinOp::Sub => arith(self, &bound[0], &bound[1]),
            BuiltinOp::Mul => arith(self, &bound[0], &bound[1]),
            BuiltinOp::Div => arith(self, &bound[0], &bound[1]),
            BuiltinOp::Rem => arith(self, &bound[0], &bound[1]),
            BuiltinOp::Neg => match &bound[0] {
                Value::Int(i) => i.checked_neg().map(Value::Int).ok_or(FunctionError::Overflow),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(type_error(self, "numeric", other)),
            },
            BuiltinOp::Abs => match &bound[0] {
                Value::Int(i) => i.checked_abs().map(Value::Int).ok_or(FunctionError::Overflow),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                other => Err(type_error(self, "numeric", other)),
            },
            BuiltinOp::Eq => Ok(Value::Bool(eq(&bound[0], &bound[1]))),
            BuiltinOp::Lt => compare(self, &bound[0], &bound[1]).map(|o| Value::Bool(o.is_lt())),
            BuiltinOp::Gt => compare(self, &bound[0], &bound[1]).map(|o| Value::Bool(o.is_gt())),
            BuiltinOp::Not => match &bound[0] {
                Value::Bool(b) => Ok(Value::Bool(!b)),
                other => Err(type_error(self, "Bool", other)),
            },
            BuiltinOp::Len => match &bound[0] {
                Value::Str(s) => Ok(Value::from(s.chars().count())),
                Value::List(items) => Ok(Value::from(items.len())),
                Value::Map(entries) => Ok(Value::from(entries.len())),
                other => Err(type_error(self, "Str, List or Map", other)),
            },
            BuiltinOp::Get => get(&bound[0], &bound[1]),
            BuiltinOp::Identity => Ok(bound[0].clone()),
            BuiltinOp::Concat | BuiltinOp::Sum => unreachable!("variadic ops handled above"),
        }
    }
}

/// Matches positional and keyword arguments against declared parameters.
fn bind(
    function: &str,
    params: &[&str],
    args: &[Value],
    kwargs: &IndexMap<String, Value>,
) -> Result<Vec<Value>, FunctionError> {
    if args.len() > params.len() {
        return Err(FunctionError::Arity {
            function: function.to_string(),
            expected: params.len(),
            got: args.len() + kwargs.len(),
        });
    }
    if let Some(unknown) = kwargs.keys().find(|k| !params.contains(&k.as_str())) {
        return Err(FunctionError::Failed(format!(
            "{function}: unexpected keyword argument '{unknown}'"
        )));
    }

    let mut bound = Vec::with_capacity(params.len());
    for (i, param) in params.iter().enumerate() {
        let value = match (args.get(i), kwargs.get(*param)) {
            (Some(_), Some(_)) => {
                return Err(FunctionError::Failed(format!(
                    "{function}: multiple values for argument '{param}'"
                )))
            }
            (Some(v), None) | (None, Some(v)) => v.clone(),
            (None, None) => {
                return Err(FunctionError::Arity {
                    function: function.to_string(),
                    expected: params.len(),
                    got: args.len() + kwargs.len(),
                })
            }
        };
        bound.push(value);
    }
    Ok(bound)
}

fn type_error(op: BuiltinOp, expected: &str, got: &Value) -> FunctionError {
    FunctionError::Type {
        function: op.name().to_string(),
        expected: expected.to_string(),
        got: got.type_name().to_string(),
    }
}

fn add(lhs: &Value, rhs: &Value) -> Result<Value, FunctionError> {
    match (lhs, rhs) {
        (Value::Str(a), Value::Str(b)) => Ok(Value::Str(format!("{a}{b}"))),
        (Value::List(a), Value::List(b)) => Ok(Value::List(a.iter().chain(b).cloned().collect())),
        _ => arith(BuiltinOp::Add, lhs, rhs),
    }
}

fn arith(op: BuiltinOp, lhs: &Value, rhs: &Value) -> Result<Value, FunctionError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => {
            let result = match op {
                BuiltinOp::Add => a.checked_add(*b),
                BuiltinOp::Sub => a.checked_sub(*b),
                BuiltinOp::Mul => a.checked_mul(*b),
                BuiltinOp::Div | BuiltinOp::Rem if *b == 0 => {
                    return Err(FunctionError::DivideByZero)
                }
                BuiltinOp::Div => a.checked_div(*b),
                BuiltinOp::Rem => a.checked_rem(*b),
                _ => unreachable!("arith called with non-arithmetic op"),
            };
            result.map(Value::Int).ok_or(FunctionError::Overflow)
        }
        _ => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                let culprit = if lhs.as_f64().is_none() { lhs } else { rhs };
                return Err(type_error(op, "numeric", culprit));
            };
            Ok(Value::Float(match op {
                BuiltinOp::Add => a + b,
                BuiltinOp::Sub => a - b,
                BuiltinOp::Mul => a * b,
                BuiltinOp::Div | BuiltinOp::Rem if b == 0.0 => {
                    return Err(FunctionError::DivideByZero)
                }
                BuiltinOp::Div => a / b,
                BuiltinOp::Rem => a % b,
                _ => unreachable!("arith called with non-arithmetic op"),
            }))
        }
    }
}

fn compare(op: BuiltinOp, lhs: &Value, rhs: &Value) -> Result<std::cmp::Ordering, FunctionError> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => Ok(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Ok(a.cmp(b)),
        _ => match (lhs.as_f64(), rhs.as_f64()) {
            (Some(a), Some(b)) => a.partial_cmp(&b).ok_or_else(|| {
                FunctionError::Failed(format!("{}: NaN is not ordered", op.name()))
            }),
            _ => Err(type_error(op, "two numbers or two strings", rhs)),
        },
    }
}

fn concat(args: &[Value]) -> Result<Value, FunctionError> {
    match args.first() {
        None | Some(Value::Str(_)) => {
            let mut out = String::new();
            for arg in args {
                match arg {
                    Value::Str(s) => out.push_str(s),
                    other => return Err(type_error(BuiltinOp::Concat, "Str", other)),
                }
            }
            Ok(Value::Str(out))
        }
        Some(Value::List(_)) => {
            let mut out = Vec::new();
            for arg in args {
                match arg {
                    Value::List(items) => out.extend(items.iter().cloned()),
                    other => return Err(type_error(BuiltinOp::Concat, "List", other)),
                }
            }
            Ok(Value::List(out))
        }
        Some(other) => Err(type_error(BuiltinOp::Concat, "Str or List", other)),
    }
}

fn sum(args: &[Value]) -> Result<Value, FunctionError> {
    let items = match args {
        [Value::List(items)] => items.as_slice(),
        _ => args,
    };
    items
        .iter()
        .try_fold(Value::Int(0), |acc, item| arith(BuiltinOp::Add, &acc, item))
}

fn get(container: &Value, key: &Value) -> Result<Value, FunctionError> {
    match (container, key) {
        (Value::List(items), Value::Int(i)) => {
            let len = items.len() as i64;
            let idx = if *i < 0 { len + i } else { *i };
            usize::try_from(idx)
                .ok()
                .and_then(|idx| items.get(idx))
                .cloned()
                .ok_or_else(|| FunctionError::Failed(format!("get: index {i} out of range")))
        }
        (Value::Map(entries), Value::Str(k)) => entries
            .get(k)
            .cloned()
            .ok_or_else(|| FunctionError::Failed(format!("get: missing key '{k}'"))),
        (Value::List(_), other) => Err(type_error(BuiltinOp::Get, "Int index", other)),
        (Value::Map(_), other) => Err(type_error(BuiltinOp::Get, "Str key", other)),
        (other, _) => Err(type_error(BuiltinOp::Get, "List or Map", other)),
    }
}
