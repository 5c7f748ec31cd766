//! Dynamic value type used for `with`, agent inputs, and agent outputs.
//!
//! Kept as an explicit tagged union rather than `serde_json::Value` directly
//! so that merge/composition logic (`_config` injection, input composition)
//! goes through typed match arms instead of untyped object mutation.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// A mapping of named values, the shape of both agent `with` blocks and
/// agent inputs/outputs.
pub type Mapping = IndexMap<String, Value>;

/// Arbitrary structured data flowing between agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Absence of a value.
    Null,
    /// Boolean scalar.
    Bool(bool),
    /// Integer scalar.
    Int(i64),
    /// Floating point scalar.
    Float(f64),
    /// String scalar.
    String(String),
    /// Ordered list of values.
    List(Vec<Value>),
    /// Nested mapping of values.
    Map(Mapping),
}

impl Value {
    /// Build an empty mapping value.
    #[must_use]
    pub fn empty_map() -> Self {
        Value::Map(Mapping::new())
    }

    /// Borrow this value as a mapping, if it is one.
    #[must_use]
    pub fn as_map(&self) -> Option<&Mapping> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Mutably borrow this value as a mapping, if it is one.
    pub fn as_map_mut(&mut self) -> Option<&mut Mapping> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Merge `other` into `self` in place, with `other`'s keys taking
    /// precedence on conflict. Both values must be `Map`s; if `self` is not
    /// a map it is replaced outright by `other`.
    pub fn merge_from(&mut self, other: &Mapping) {
        match self {
            Value::Map(existing) => {
                for (key, value) in other {
                    existing.insert(key.clone(), value.clone());
                }
            }
            _ => {
                *self = Value::Map(other.clone());
            }
        }
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or_default())
                }
            }
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Map(
                map.into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for serde_json::Value {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(b),
            Value::Int(i) => serde_json::Value::Number(i.into()),
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(map) => serde_json::Value::Object(
                map.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_overwrites_conflicting_keys() {
        let mut base = Value::Map(Mapping::from_iter([
            ("a".to_string(), Value::Int(1)),
            ("b".to_string(), Value::Int(2)),
        ]));
        let overlay = Mapping::from_iter([("b".to_string(), Value::Int(99))]);
        base.merge_from(&overlay);

        let map = base.as_map().unwrap();
        assert_eq!(map.get("a"), Some(&Value::Int(1)));
        assert_eq!(map.get("b"), Some(&Value::Int(99)));
    }

    #[test]
    fn merge_into_non_map_replaces() {
        let mut base = Value::Null;
        let overlay = Mapping::from_iter([("x".to_string(), Value::Bool(true))]);
        base.merge_from(&overlay);
        assert_eq!(base.as_map().unwrap().get("x"), Some(&Value::Bool(true)));
    }

    #[test]
    fn json_roundtrip() {
        let json = serde_json::json!({
            "name": "a1",
            "count": 3,
            "tags": ["x", "y"],
            "nested": {"ok": true}
        });
        let value = Value::from(json.clone());
        let back: serde_json::Value = value.into();
        assert_eq!(json, back);
    }
}
