//! Deterministic, value-based node keys using blake3.
//!
//! [`hash`] maps any [`Value`] to a [`NodeKey`]. Integers and non-empty
//! strings are their own keys so that explicit ids stay readable (`@a`,
//! `@42`); every other value is keyed by a blake3 digest of a canonical byte
//! encoding. A string that spells a decimal integer keys like that integer,
//! so the id `"12"` and the reference `@12` name the same node.
//!
//! # Determinism
//!
//! The canonical encoding is independent of process, platform and map
//! insertion order:
//! - every value is prefixed with a one-byte tag
//! - integral floats encode exactly like the equal integer, `-0.0` like `0`
//! - all NaN payloads encode identically
//! - map entries are sorted by key before encoding
//! - cells encode as their identity value, so wrapping content in a cell
//!   does not change its key
//!
//! Values equal under [`crate::value::eq`] therefore always hash equal.

use crate::cell::Cell;
use crate::id::NodeKey;
use crate::value::{integral_f64, Value};

const TAG_NULL: u8 = 0;
const TAG_BOOL: u8 = 1;
const TAG_INT: u8 = 2;
const TAG_FLOAT: u8 = 3;
const TAG_NAN: u8 = 4;
const TAG_STR: u8 = 5;
const TAG_LIST: u8 = 6;
const TAG_MAP: u8 = 7;
const TAG_FUNCTION: u8 = 8;

/// Computes the canonical node key of a value.
pub fn hash(value: &Value) -> NodeKey {
    match value {
        Value::Int(i) => NodeKey::Int(*i),
        Value::Str(s) => str_key(s),
        Value::Bool(b) => NodeKey::Int(*b as i64),
        Value::Float(f) => match integral_f64(*f) {
            Some(i) => NodeKey::Int(i),
            None => NodeKey::Int(digest_i64(value)),
        },
        Value::Function(f) => str_key(f.name()),
        Value::Cell(cell) => cell.key(),
        Value::Null | Value::List(_) | Value::Map(_) => NodeKey::Int(digest_i64(value)),
    }
}

/// Key of a bare string id. The empty string has no `@` form, so it is
/// keyed by its digest instead.
pub fn str_key(s: &str) -> NodeKey {
    if s.is_empty() {
        NodeKey::Int(digest_i64(&Value::Str(String::new())))
    } else {
        NodeKey::parse(s)
    }
}

/// Computes the blake3 digest of a value's canonical encoding.
pub fn digest(value: &Value) -> blake3::Hash {
    let mut hasher = blake3::Hasher::new();
    encode(value, &mut hasher);
    hasher.finalize()
}

/// First eight digest bytes as a little-endian signed integer.
fn digest_i64(value: &Value) -> i64 {
    let hash = digest(value);
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&hash.as_bytes()[..8]);
    i64::from_le_bytes(bytes)
}

fn encode(value: &Value, hasher: &mut blake3::Hasher) {
    match value {
        Value::Null => {
            hasher.update(&[TAG_NULL]);
        }
        Value::Bool(b) => {
            hasher.update(&[TAG_BOOL, *b as u8]);
        }
        Value::Int(i) => encode_int(*i, hasher),
        Value::Float(f) => {
            if f.is_nan() {
                hasher.update(&[TAG_NAN]);
            } else if let Some(i) = integral_f64(*f) {
                encode_int(i, hasher);
            } else {
                hasher.update(&[TAG_FLOAT]);
                hasher.update(&f.to_bits().to_le_bytes());
            }
        }
        Value::Str(s) => {
            hasher.update(&[TAG_STR]);
            encode_str(s, hasher);
        }
        Value::List(items) => {
            hasher.update(&[TAG_LIST]);
            hasher.update(&(items.len() as u64).to_le_bytes());
            for item in items {
                encode(item, hasher);
            }
        }
        Value::Map(entries) => {
            hasher.update(&[TAG_MAP]);
            hasher.update(&(entries.len() as u64).to_le_bytes());
            let mut sorted: Vec<(&String, &Value)> = entries.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            for (k, v) in sorted {
                encode_str(k, hasher);
                encode(v, hasher);
            }
        }
        Value::Function(f) => {
            hasher.update(&[TAG_FUNCTION]);
            encode_str(f.name(), hasher);
        }
        Value::Cell(cell) => encode(cell.identity(), hasher),
    }
}

fn encode_int(i: i64, hasher: &mut blake3::Hasher) {
    hasher.update(&[TAG_INT]);
    hasher.update(&i.to_le_bytes());
}

fn encode_str(s: &str, hasher: &mut blake3::Hasher) {
    hasher.update(&(s.len() as u64).to_le_bytes());
    hasher.update(s.as_bytes());
}

/// Key of a cell: its node, or the explicit `id` entry of a mapping node.
pub(crate) fn cell_key(cell: &Cell) -> NodeKey {
    hash(cell.identity())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use proptest::prelude::*;

    #[test]
    fn primitives_are_their_own_keys() {
        assert_eq!(hash(&Value::from("a")), NodeKey::from("a"));
        assert_eq!(hash(&Value::Int(-4)), NodeKey::Int(-4));
        assert_eq!(hash(&Value::Float(3.0)), NodeKey::Int(3));
    }

    #[test]
    fn list_hash_is_order_sensitive() {
        let a = Value::list([1, 2]);
        let b = Value::list([2, 1]);
        assert_ne!(hash(&a), hash(&b));
    }

    #[test]
    fn map_hash_ignores_insertion_order() {
        let a = Value::map([("x", 1), ("y", 2)]);
        let b = Value::map([("y", 2), ("x", 1)]);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn nan_arrays_hash_equal() {
        let a = Value::list([f64::NAN, 2.0]);
        let b = Value::list([f64::NAN, 2.0]);
        assert_eq!(hash(&a), hash(&b));
    }

    #[test]
    fn cell_hashes_like_its_node() {
        let node = Value::list(["x", "y"]);
        let cell = Cell::new(node.clone(), 1);
        assert_eq!(hash(&Value::from(cell)), hash(&node));
    }

    #[test]
    fn mapping_node_uses_explicit_id() {
        let cell = Cell::new(Value::map([("id", Value::from("spot")), ("ccy", "EUR".into())]), 1);
        assert_eq!(cell.key(), NodeKey::from("spot"));
    }

    #[test]
    fn numeric_strings_key_as_integers() {
        assert_eq!(hash(&Value::from("12")), NodeKey::Int(12));
        assert_eq!(hash(&Value::from("-3")), NodeKey::Int(-3));
        assert_eq!(hash(&Value::from("1.5")), NodeKey::Str("1.5".into()));
    }

    #[test]
    fn empty_string_gets_a_digest_key() {
        let key = hash(&Value::from(""));
        assert!(matches!(key, NodeKey::Int(_)));
        let reference = key.to_reference();
        assert_eq!(crate::id::parse_reference(&reference).unwrap(), Some(key));
    }

    #[test]
    fn hash_is_repeatable() {
        let key = hash(&Value::list([1, 2, 3]));
        let again = hash(&Value::list([1.0, 2.0, 3.0]));
        assert_eq!(key, again);
        assert_eq!(key, hash(&Value::list([1, 2, 3])));
    }

    #[test]
    fn digest_keys_are_pinned() {
        let cases = [
            (Value::list([1, 2, 3]), 1431560861467015801),
            (
                Value::map([("y", Value::from("b")), ("x", Value::from(1))]),
                -137206020651157311,
            ),
            (Value::list([f64::NAN, 2.0]), -2642785703642443559),
            (Value::Float(1.5), 5667216706085984353),
            (Value::Null, -1053530112171034067),
            (Value::from(""), 2034850144947686339),
        ];
        for (value, expected) in cases {
            assert_eq!(hash(&value), NodeKey::Int(expected), "{value}");
        }
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::Int),
            any::<f64>().prop_map(Value::Float),
            "[a-z]{0,6}".prop_map(Value::Str),
        ];
        leaf.prop_recursive(3, 24, 4, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(Value::List),
                prop::collection::vec(("[a-z]{1,3}", inner), 0..4)
                    .prop_map(|entries| Value::map(entries)),
            ]
        })
    }

    proptest! {
        #[test]
        fn equal_values_hash_equal(v in arb_value()) {
            let copy = v.clone();
            prop_assert!(crate::value::eq(&v, &copy));
            prop_assert_eq!(hash(&v), hash(&copy));
        }

        #[test]
        fn integral_floats_hash_like_ints(i in -1_000_000i64..1_000_000) {
            prop_assert_eq!(hash(&Value::Int(i)), hash(&Value::Float(i as f64)));
            let l = Value::list([Value::Int(i)]);
            let r = Value::list([Value::Float(i as f64)]);
            prop_assert_eq!(hash(&l), hash(&r));
        }
    }
}
