//! JSON encoding of values and cells (schema version 1).
//!
//! Values map onto plain JSON wherever JSON can express them. The rest use
//! single-key tagged objects:
//!
//! | value                       | encoding                          |
//! |-----------------------------|-----------------------------------|
//! | non-finite float            | `{"$float": "NaN" \| "inf" \| "-inf"}` |
//! | function handle             | `{"$fn": "name"}`                 |
//! | embedded cell               | `{"$cell": <encoded cell>}`       |
//! | map with one `$`-prefixed key | `{"$map": {...}}`               |
//!
//! An encoded cell is
//! `{"v":1,"node":..,"function":..,"args":[..],"kwargs":{..},"cache":..}`.
//! Function names are re-linked through a [`FunctionRegistry`] on decode.

use indexmap::IndexMap;
use serde_json::{json, Map as JsonMap, Value as Json};

use crate::cell::{Cell, Strategy};
use crate::error::CoreError;
use crate::function::FunctionRegistry;
use crate::value::Value;

/// Version written into every encoded cell.
pub const SCHEMA_VERSION: u64 = 1;

const TAG_FLOAT: &str = "$float";
const TAG_FN: &str = "$fn";
const TAG_CELL: &str = "$cell";
const TAG_MAP: &str = "$map";

/// Encodes one value.
pub fn encode_value(value: &Value) -> Json {
    match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(i) => Json::from(*i),
        Value::Float(f) if f.is_finite() => Json::from(*f),
        Value::Float(f) => {
            let name = if f.is_nan() {
                "NaN"
            } else if *f > 0.0 {
                "inf"
            } else {
                "-inf"
            };
            json!({ TAG_FLOAT: name })
        }
        Value::Str(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(items.iter().map(encode_value).collect()),
        Value::Map(entries) => {
            let object: JsonMap<String, Json> = entries
                .iter()
                .map(|(k, v)| (k.clone(), encode_value(v)))
                .collect();
            if object.len() == 1 && entries.keys().all(|k| k.starts_with('$')) {
                json!({ TAG_MAP: object })
            } else {
                Json::Object(object)
            }
        }
        Value::Function(f) => json!({ TAG_FN: f.name() }),
        Value::Cell(cell) => json!({ TAG_CELL: encode_cell(cell) }),
    }
}

/// Encodes a cell as it stands; embedded cells are nested under `$cell`.
pub fn encode_cell(cell: &Cell) -> Json {
    let kwargs: JsonMap<String, Json> = cell
        .kwargs()
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect();
    json!({
        "v": SCHEMA_VERSION,
        "node": encode_value(cell.node()),
        "function": encode_value(cell.function()),
        "args": cell.arguments().iter().map(encode_value).collect::<Vec<_>>(),
        "kwargs": kwargs,
        "cache": cell.strategy(),
    })
}

/// Decodes one value, resolving function names through `registry`.
pub fn decode_value(json: &Json, registry: &FunctionRegistry) -> Result<Value, CoreError> {
    Ok(match json {
        Json::Null => Value::Null,
        Json::Bool(b) => Value::Bool(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().ok_or_else(|| invalid(format!("number {n}")))?),
        },
        Json::String(s) => Value::Str(s.clone()),
        Json::Array(items) => Value::List(
            items
                .iter()
                .map(|item| decode_value(item, registry))
                .collect::<Result<_, _>>()?,
        ),
        Json::Object(object) => match tagged(object) {
            Some((TAG_FLOAT, Json::String(name))) => Value::Float(match name.as_str() {
                "NaN" => f64::NAN,
                "inf" => f64::INFINITY,
                "-inf" => f64::NEG_INFINITY,
                other => return Err(invalid(format!("unknown float constant '{other}'"))),
            }),
            Some((TAG_FN, Json::String(name))) => Value::Function(registry.resolve(name)?),
            Some((TAG_CELL, inner)) => Value::from(decode_cell(inner, registry)?),
            Some((TAG_MAP, Json::Object(inner))) => Value::Map(decode_map(inner, registry)?),
            Some((tag, _)) => return Err(invalid(format!("malformed '{tag}' object"))),
            None => Value::Map(decode_map(object, registry)?),
        },
    })
}

/// Decodes a cell, checking the schema version before anything else.
pub fn decode_cell(json: &Json, registry: &FunctionRegistry) -> Result<Cell, CoreError> {
    let object = json
        .as_object()
        .ok_or_else(|| invalid("encoded cell must be an object"))?;
    let version = object
        .get("v")
        .and_then(Json::as_u64)
        .ok_or_else(|| invalid("encoded cell has no schema version"))?;
    if version != SCHEMA_VERSION {
        return Err(CoreError::UnsupportedSchema { version });
    }

    let node = decode_value(required(object, "node")?, registry)?;
    let function = decode_value(required(object, "function")?, registry)?;
    let args = match object.get("args") {
        None => Vec::new(),
        Some(Json::Array(items)) => items
            .iter()
            .map(|item| decode_value(item, registry))
            .collect::<Result<Vec<_>, _>>()?,
        Some(_) => return Err(invalid("'args' must be an array")),
    };
    let kwargs = match object.get("kwargs") {
        None => IndexMap::new(),
        Some(Json::Object(entries)) => decode_map(entries, registry)?,
        Some(_) => return Err(invalid("'kwargs' must be an object")),
    };
    let strategy: Strategy = match object.get("cache") {
        None => Strategy::Plain,
        Some(cache) => serde_json::from_value(cache.clone())
            .map_err(|e| invalid(format!("bad cache strategy: {e}")))?,
    };

    let mut cell = Cell::new(node, function).args(args).with_strategy(strategy);
    for (name, value) in kwargs {
        cell = cell.kwarg(name, value);
    }
    Ok(cell)
}

fn decode_map(
    object: &JsonMap<String, Json>,
    registry: &FunctionRegistry,
) -> Result<IndexMap<String, Value>, CoreError> {
    object
        .iter()
        .map(|(k, v)| Ok::<_, CoreError>((k.clone(), decode_value(v, registry)?)))
        .collect()
}

/// The tag and payload of a single-key `$`-prefixed object.
fn tagged(object: &JsonMap<String, Json>) -> Option<(&str, &Json)> {
    if object.len() != 1 {
        return None;
    }
    object
        .iter()
        .next()
        .filter(|(k, _)| k.starts_with('$'))
        .map(|(k, v)| (k.as_str(), v))
}

fn required<'a>(object: &'a JsonMap<String, Json>, field: &str) -> Result<&'a Json, CoreError> {
    object
        .get(field)
        .ok_or_else(|| invalid(format!("encoded cell is missing '{field}'")))
}

fn invalid(reason: impl Into<String>) -> CoreError {
    CoreError::InvalidDocument {
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::Period;
    use crate::id::NodeKey;
    use crate::ops::BuiltinOp;

    fn registry() -> FunctionRegistry {
        FunctionRegistry::with_builtins()
    }

    #[test]
    fn memo_cell_encoding() {
        let cell = Cell::memo("c", BuiltinOp::Add.function())
            .arg("@a")
            .arg(2.5)
            .kwarg("scale", f64::NAN);
        let text = serde_json::to_string(&encode_cell(&cell)).unwrap();
        insta::assert_snapshot!(text, @r#"{"args":["@a",2.5],"cache":"memory","function":{"$fn":"add"},"kwargs":{"scale":{"$float":"NaN"}},"node":"c","v":1}"#);
    }

    #[test]
    fn eod_cell_with_dollar_map_node() {
        let cell = Cell::eod(Value::map([("$x", 1)]), 1);
        let text = serde_json::to_string(&encode_cell(&cell)).unwrap();
        insta::assert_snapshot!(text, @r#"{"args":[],"cache":{"expires":"day"},"function":1,"kwargs":{},"node":{"$map":{"$x":1}},"v":1}"#);
    }

    #[test]
    fn special_values_survive_decoding() {
        let value = Value::list([
            Value::Float(f64::INFINITY),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(f64::NAN),
            Value::Float(1.0),
            Value::map([("$only", 3)]),
            Value::map([("a", 1), ("$b", 2)]),
            Value::from(BuiltinOp::Mul.function()),
        ]);
        let decoded = decode_value(&encode_value(&value), &registry()).unwrap();
        assert_eq!(decoded, value);
        // Integral floats keep their type.
        assert!(matches!(decoded.as_list().unwrap()[3], Value::Float(_)));
    }

    #[test]
    fn nested_cells_decode_with_identity() {
        let a = Cell::new("a", 1);
        let c = Cell::new("c", BuiltinOp::Neg.function()).arg(a);
        let back = decode_cell(&encode_cell(&c), &registry()).unwrap();
        assert_eq!(back.key(), c.key());
        let inner = back.arguments()[0].as_cell().unwrap();
        assert_eq!(inner.key(), NodeKey::from("a"));
    }

    #[test]
    fn expiring_strategy_decodes() {
        let cell = Cell::expiring("h", 0, Period::Hours(4));
        let back = decode_cell(&encode_cell(&cell), &registry()).unwrap();
        assert_eq!(back.strategy(), Strategy::Expires(Period::Hours(4)));
    }

    #[test]
    fn unknown_function_is_reported() {
        let doc = json!({"v": 1, "node": "x", "function": {"$fn": "nope"}});
        match decode_cell(&doc, &registry()) {
            Err(CoreError::UnknownFunction { name }) => assert_eq!(name, "nope"),
            other => panic!("expected UnknownFunction, got {other:?}"),
        }
    }

    #[test]
    fn schema_version_is_checked_first() {
        let doc = json!({"v": 2, "node": {"$fn": "nope"}});
        assert!(matches!(
            decode_cell(&doc, &registry()),
            Err(CoreError::UnsupportedSchema { version: 2 })
        ));
    }

    #[test]
    fn malformed_documents() {
        for doc in [
            json!([1, 2]),
            json!({"node": "x", "function": 1}),
            json!({"v": 1, "function": 1}),
            json!({"v": 1, "node": "x", "function": 1, "args": {}}),
            json!({"v": 1, "node": "x", "function": 1, "cache": "sometimes"}),
            json!({"v": 1, "node": {"$float": "big"}, "function": 1}),
            json!({"v": 1, "node": {"$what": 1}, "function": 1}),
        ] {
            assert!(
                matches!(decode_cell(&doc, &registry()), Err(CoreError::InvalidDocument { .. })),
                "accepted {doc}"
            );
        }
    }
}
