//! Value codec: converts between `BridgeValue`s and (wire value, cast tree)
//! pairs.
//!
//! Every serialized payload travels as two structurally mirrored JSON
//! documents: the value itself and a boolean-leafed *cast tree*. A `true`
//! leaf marks the co-located value as a numeric callback handle to be
//! resolved into a callable on arrival; a `false` leaf marks a literal.
//! The codec is agnostic about where handles come from: the caller supplies
//! an `obtain` function when serializing and a `resolve` function when
//! deserializing.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{BridgeError, Result};
use crate::value::{BridgeValue, CallbackFn};

/// Structural mirror of a wire value marking which leaves are callback
/// handles.
///
/// The untagged representation accepts exactly the JSON shapes that form a
/// valid cast tree: booleans, arrays of cast trees, and objects of cast
/// trees. Anything else (numbers, strings, null) fails to deserialize, so
/// `Cast::from_wire` doubles as the sanitizer for untrusted cast payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cast {
    Handle(bool),
    Seq(Vec<Cast>),
    Map(BTreeMap<String, Cast>),
}

impl Cast {
    /// Validate an untrusted wire structure as a cast tree.
    pub fn from_wire(value: &Value) -> Option<Cast> {
        serde_json::from_value(value.clone()).ok()
    }
}

const LITERAL: Cast = Cast::Handle(false);

/// Recursively serialize a value into its wire form and matching cast tree.
///
/// `obtain` maps a function reference to its numeric handle; it decides
/// whether to reuse an existing registration or mint a new one.
pub fn serialize<F>(value: &BridgeValue, obtain: &mut F) -> Result<(Value, Cast)>
where
    F: FnMut(&CallbackFn) -> Result<u64>,
{
    match value {
        BridgeValue::Null => Ok((Value::Null, LITERAL)),
        BridgeValue::Bool(b) => Ok((Value::Bool(*b), LITERAL)),
        BridgeValue::Number(n) => Ok((Value::Number(n.clone()), LITERAL)),
        BridgeValue::String(s) => Ok((Value::String(s.clone()), LITERAL)),
        BridgeValue::Array(items) => {
            let mut values = Vec::with_capacity(items.len());
            let mut casts = Vec::with_capacity(items.len());
            for item in items {
                let (v, c) = serialize(item, obtain)?;
                values.push(v);
                casts.push(c);
            }
            Ok((Value::Array(values), Cast::Seq(casts)))
        }
        BridgeValue::Object(fields) => {
            let mut values = serde_json::Map::with_capacity(fields.len());
            let mut casts = BTreeMap::new();
            for (key, field) in fields {
                let (v, c) = serialize(field, obtain)?;
                values.insert(key.clone(), v);
                casts.insert(key.clone(), c);
            }
            Ok((Value::Object(values), Cast::Map(casts)))
        }
        BridgeValue::Function(callback) => {
            let id = obtain(callback)?;
            Ok((Value::from(id), Cast::Handle(true)))
        }
    }
}

/// Recursively deserialize a wire value against its cast tree.
///
/// `resolve` maps a numeric handle back to a callable; returning `None`
/// signals the handle is unrecognized and aborts with `UnknownHandle`.
///
/// Mismatch rules mirror serialization one-directionally: an array value
/// requires a sequence cast and an object value requires a keyed cast, but
/// a scalar paired with a container cast simply passes through, as does a
/// non-numeric leaf under a `true` cast. Missing cast positions behave as
/// literal leaves.
pub fn deserialize<F>(value: &Value, cast: &Cast, resolve: &mut F) -> Result<BridgeValue>
where
    F: FnMut(u64) -> Option<CallbackFn>,
{
    match value {
        Value::Array(items) => {
            let Cast::Seq(casts) = cast else {
                return Err(BridgeError::ShapeMismatch {
                    expected: "a sequence",
                });
            };
            let mut out = Vec::with_capacity(items.len());
            for (index, item) in items.iter().enumerate() {
                let item_cast = casts.get(index).unwrap_or(&LITERAL);
                out.push(deserialize(item, item_cast, resolve)?);
            }
            Ok(BridgeValue::Array(out))
        }
        Value::Object(fields) => {
            let Cast::Map(casts) = cast else {
                return Err(BridgeError::ShapeMismatch {
                    expected: "a keyed structure",
                });
            };
            let mut out = BTreeMap::new();
            for (key, field) in fields {
                let field_cast = casts.get(key).unwrap_or(&LITERAL);
                out.insert(key.clone(), deserialize(field, field_cast, resolve)?);
            }
            Ok(BridgeValue::Object(out))
        }
        Value::Number(n) if matches!(cast, Cast::Handle(true)) => {
            // Fractional or negative handles can never have been minted.
            let id = n.as_u64().unwrap_or(u64::MAX);
            match resolve(id) {
                Some(callback) => Ok(BridgeValue::Function(callback)),
                None => Err(BridgeError::UnknownHandle { id }),
            }
        }
        Value::Null => Ok(BridgeValue::Null),
        Value::Bool(b) => Ok(BridgeValue::Bool(*b)),
        Value::Number(n) => Ok(BridgeValue::Number(n.clone())),
        Value::String(s) => Ok(BridgeValue::String(s.clone())),
    }
}

/// Serialize an argument list. Every wire payload is a list at top level.
pub fn serialize_args<F>(args: &[BridgeValue], obtain: &mut F) -> Result<(Vec<Value>, Vec<Cast>)>
where
    F: FnMut(&CallbackFn) -> Result<u64>,
{
    let mut values = Vec::with_capacity(args.len());
    let mut casts = Vec::with_capacity(args.len());
    for arg in args {
        let (v, c) = serialize(arg, obtain)?;
        values.push(v);
        casts.push(c);
    }
    Ok((values, casts))
}

/// Deserialize an argument list element-wise.
pub fn deserialize_args<F>(values: &[Value], casts: &[Cast], resolve: &mut F) -> Result<Vec<BridgeValue>>
where
    F: FnMut(u64) -> Option<CallbackFn>,
{
    values
        .iter()
        .enumerate()
        .map(|(index, value)| deserialize(value, casts.get(index).unwrap_or(&LITERAL), resolve))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::callback_fn;
    use serde_json::json;

    fn no_handles(_: &CallbackFn) -> Result<u64> {
        panic!("obtain must not be called for function-free values");
    }

    fn no_resolve(_: u64) -> Option<CallbackFn> {
        panic!("resolve must not be called for handle-free casts");
    }

    fn nested_sample() -> BridgeValue {
        BridgeValue::Array(vec![
            BridgeValue::Null,
            true.into(),
            7.into(),
            "text".into(),
            BridgeValue::Array(vec![1.into(), 2.into()]),
            BridgeValue::Object(BTreeMap::from([
                ("a".to_string(), BridgeValue::from(1)),
                ("b".to_string(), BridgeValue::Array(vec!["x".into()])),
            ])),
        ])
    }

    #[test]
    fn test_round_trip_without_functions() {
        let value = nested_sample();
        let (wire, cast) = serialize(&value, &mut no_handles).unwrap();
        let back = deserialize(&wire, &cast, &mut no_resolve).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_cast_mirrors_value_shape() {
        let (wire, cast) = serialize(&nested_sample(), &mut no_handles).unwrap();

        fn check(value: &Value, cast: &Cast) {
            match (value, cast) {
                (Value::Array(items), Cast::Seq(casts)) => {
                    assert_eq!(items.len(), casts.len());
                    for (v, c) in items.iter().zip(casts) {
                        check(v, c);
                    }
                }
                (Value::Object(fields), Cast::Map(casts)) => {
                    let keys: Vec<_> = fields.keys().collect();
                    let cast_keys: Vec<_> = casts.keys().collect();
                    assert_eq!(keys, cast_keys);
                    for (key, v) in fields {
                        check(v, &casts[key]);
                    }
                }
                (_, Cast::Handle(_)) => {}
                (v, c) => panic!("shape divergence: {v:?} vs {c:?}"),
            }
        }
        check(&wire, &cast);
    }

    #[test]
    fn test_function_becomes_handle() {
        let cb = callback_fn(|_| async { Ok(Vec::new()) });
        let value = BridgeValue::Array(vec![BridgeValue::Function(cb), 5.into()]);

        let (wire, cast) = serialize(&value, &mut |_| Ok(3)).unwrap();
        assert_eq!(wire, json!([3, 5]));
        assert_eq!(
            cast,
            Cast::Seq(vec![Cast::Handle(true), Cast::Handle(false)])
        );
    }

    #[test]
    fn test_obtain_failure_propagates() {
        let cb = callback_fn(|_| async { Ok(Vec::new()) });
        let value = BridgeValue::Function(cb);
        let result = serialize(&value, &mut |_| Err(BridgeError::CallbackNotFound));
        assert_eq!(result, Err(BridgeError::CallbackNotFound));
    }

    #[test]
    fn test_handle_leaf_resolves() {
        let cb = callback_fn(|_| async { Ok(Vec::new()) });
        let resolved = deserialize(&json!(4), &Cast::Handle(true), &mut |id| {
            assert_eq!(id, 4);
            Some(cb.clone())
        })
        .unwrap();
        assert!(resolved.as_function().is_some());
    }

    #[test]
    fn test_unknown_handle_fails() {
        let result = deserialize(&json!(9), &Cast::Handle(true), &mut |_| None);
        assert_eq!(result, Err(BridgeError::UnknownHandle { id: 9 }));
    }

    #[test]
    fn test_sequence_value_needs_sequence_cast() {
        let result = deserialize(&json!([1, 2]), &Cast::Handle(false), &mut no_resolve);
        assert!(matches!(result, Err(BridgeError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_keyed_value_needs_keyed_cast() {
        let result = deserialize(
            &json!({"k": 1}),
            &Cast::Seq(vec![LITERAL]),
            &mut no_resolve,
        );
        assert!(matches!(result, Err(BridgeError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_scalar_with_container_cast_passes_through() {
        let out = deserialize(&json!(5), &Cast::Seq(Vec::new()), &mut no_resolve).unwrap();
        assert_eq!(out, BridgeValue::from(5));
    }

    #[test]
    fn test_true_cast_over_non_number_passes_through() {
        let out = deserialize(&json!("text"), &Cast::Handle(true), &mut no_resolve).unwrap();
        assert_eq!(out, BridgeValue::from("text"));
    }

    #[test]
    fn test_missing_cast_positions_are_literal() {
        let out = deserialize(&json!([1, 2, 3]), &Cast::Seq(vec![LITERAL]), &mut no_resolve)
            .unwrap();
        assert_eq!(
            out,
            BridgeValue::Array(vec![1.into(), 2.into(), 3.into()])
        );
    }

    #[test]
    fn test_cast_from_wire_accepts_valid_trees() {
        assert_eq!(Cast::from_wire(&json!(true)), Some(Cast::Handle(true)));
        assert_eq!(
            Cast::from_wire(&json!([false, [true]])),
            Some(Cast::Seq(vec![
                Cast::Handle(false),
                Cast::Seq(vec![Cast::Handle(true)]),
            ]))
        );
        assert!(Cast::from_wire(&json!({"k": false})).is_some());
    }

    #[test]
    fn test_cast_from_wire_rejects_invalid_trees() {
        assert_eq!(Cast::from_wire(&json!(1)), None);
        assert_eq!(Cast::from_wire(&json!("true")), None);
        assert_eq!(Cast::from_wire(&json!(null)), None);
        assert_eq!(Cast::from_wire(&json!([true, 3])), None);
        assert_eq!(Cast::from_wire(&json!({"k": "v"})), None);
    }

    #[test]
    fn test_args_helpers_round_trip() {
        let args = vec![BridgeValue::from(1), BridgeValue::Array(vec!["a".into()])];
        let (values, casts) = serialize_args(&args, &mut no_handles).unwrap();
        let back = deserialize_args(&values, &casts, &mut no_resolve).unwrap();
        assert_eq!(back, args);
    }
}
