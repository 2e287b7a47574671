//! Canonical JSON and SHA-256 digests for plan checksums.
//!
//! Object keys are ordered by UTF-16 code units, integer-valued floats are
//! written as integers, and output is compact, so equal action lists hash
//! equally regardless of how they were produced.

use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use crate::error::{AmpError, AmpResult};

fn sort_keys_utf16(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_by(|a, b| a.encode_utf16().cmp(b.encode_utf16()));
            let mut sorted = Map::new();
            for key in keys {
                if let Some(v) = map.get(key) {
                    sorted.insert(key.clone(), sort_keys_utf16(v));
                }
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_keys_utf16).collect()),
        other => other.clone(),
    }
}

fn normalize_numbers(value: &Value) -> AmpResult<Value> {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            for (k, v) in map {
                out.insert(k.clone(), normalize_numbers(v)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => Ok(Value::Array(
            items.iter().map(normalize_numbers).collect::<AmpResult<Vec<_>>>()?,
        )),
        Value::Number(n) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(f64::NAN);
            if !f.is_finite() {
                return Err(AmpError::Serialization(
                    "non-finite number in canonical JSON".to_string(),
                ));
            }
            if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
                Ok(Value::Number(Number::from(f as i64)))
            } else {
                Ok(Value::Number(n.clone()))
            }
        }
        other => Ok(other.clone()),
    }
}

/// Canonical compact JSON text.
pub fn canonical_json(value: &Value) -> AmpResult<String> {
    let normalized = normalize_numbers(value)?;
    Ok(serde_json::to_string(&sort_keys_utf16(&normalized))?)
}

/// Hex SHA-256 of the canonical form.
pub fn compute_digest(value: &Value) -> AmpResult<String> {
    let canonical = canonical_json(value)?;
    Ok(hex::encode(Sha256::digest(canonical.as_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_matter() {
        let a = json!({"kind": "add", "rationale": "x", "payload": {"b": 1, "a": 2}});
        let b = json!({"payload": {"a": 2, "b": 1}, "rationale": "x", "kind": "add"});
        assert_eq!(canonical_json(&a).unwrap(), canonical_json(&b).unwrap());
        assert_eq!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn array_order_matters() {
        let a = json!([{"id": 1}, {"id": 2}]);
        let b = json!([{"id": 2}, {"id": 1}]);
        assert_ne!(compute_digest(&a).unwrap(), compute_digest(&b).unwrap());
    }

    #[test]
    fn integer_valued_floats_are_normalized() {
        assert_eq!(canonical_json(&json!({"v": 2.0})).unwrap(), r#"{"v":2}"#);
        assert_eq!(canonical_json(&json!({"v": 2.5})).unwrap(), r#"{"v":2.5}"#);
    }

    #[test]
    fn digest_is_hex_sha256() {
        let d = compute_digest(&json!({"a": 1})).unwrap();
        assert_eq!(d.len(), 64);
        assert!(d.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
