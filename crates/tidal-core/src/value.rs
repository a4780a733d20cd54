//! Dynamic tree values stored under each key

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A dynamic value that can represent any record state
///
/// Serializes as plain JSON-shaped data (untagged), so records and
/// parameters travel over the wire and into persisted storage unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    /// No value / null
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// List of values (always replaced whole by merges)
    List(Vec<Value>),
    /// Map of string keys to values
    Map(ValueMap),
}

/// A map of string keys to dynamic values
///
/// Uses IndexMap to preserve insertion order (useful for deterministic serialization)
pub type ValueMap = IndexMap<String, Value>;

impl Value {
    /// Create an empty map value
    pub fn map() -> Self {
        Value::Map(ValueMap::new())
    }

    /// Build a map value from key/value pairs
    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Try to get this value as a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get this value as an integer
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Try to get this value as a float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            Value::Int(i) => Some(*i as f64),
            _ => None,
        }
    }

    /// Try to get this value as a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get this value as a list
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(list) => Some(list),
            _ => None,
        }
    }

    /// Try to get this value as a map
    pub fn as_map(&self) -> Option<&ValueMap> {
        match self {
            Value::Map(map) => Some(map),
            _ => None,
        }
    }

    /// Look up a field when this value is a map
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(field))
    }

    /// Get the type name of this value
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }

    /// Deep-merge `patch` into this value.
    ///
    /// Maps merge field by field, recursively. A `Null` field in the patch
    /// deletes that field. Lists and scalars in the patch replace whatever
    /// was there, and a non-map on either side replaces the whole value.
    pub fn merge_patch(&mut self, patch: &Value) {
        match (self, patch) {
            (Value::Map(target), Value::Map(fields)) => {
                for (field, incoming) in fields {
                    if incoming.is_null() {
                        target.shift_remove(field);
                        continue;
                    }
                    match target.get_mut(field) {
                        Some(existing) => existing.merge_patch(incoming),
                        None => {
                            target.insert(field.clone(), incoming.without_nulls());
                        }
                    }
                }
            }
            (slot, incoming) => *slot = incoming.without_nulls(),
        }
    }

    /// Copy of this value with every `Null` map field removed, recursively.
    ///
    /// A patch that introduces a brand new map must not leave deletion
    /// markers behind as stored nulls.
    pub fn without_nulls(&self) -> Value {
        match self {
            Value::Map(map) => Value::Map(
                map.iter()
                    .filter(|(_, v)| !v.is_null())
                    .map(|(k, v)| (k.clone(), v.without_nulls()))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(fl) => write!(f, "{}", fl),
            Value::String(s) => write!(f, "\"{}\"", s),
            Value::List(list) => {
                write!(f, "[")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                }
                write!(f, "}}")
            }
        }
    }
}

// Convenient From implementations
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

impl From<u64> for Value {
    /// Values past `i64::MAX` become floats, like JSON numbers do
    fn from(i: u64) -> Self {
        i64::try_from(i).map_or(Value::Float(i as f64), Value::Int)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Value::Map(map)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(vec: Vec<T>) -> Self {
        Value::List(vec.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::List(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Map(
                fields
                    .into_iter()
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
            Value::Int(i) => serde_json::Value::from(i),
            // NaN and infinities have no JSON form
            Value::Float(f) => serde_json::Number::from_f64(f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s),
            Value::List(items) => {
                serde_json::Value::Array(items.into_iter().map(Into::into).collect())
            }
            Value::Map(fields) => serde_json::Value::Object(
                fields.into_iter().map(|(k, v)| (k, v.into())).collect(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Int(42).as_int(), Some(42));
        assert_eq!(Value::Float(3.5).as_float(), Some(3.5));
        assert_eq!(Value::Int(42).as_float(), Some(42.0));
        assert_eq!(Value::String("hello".into()).as_str(), Some("hello"));
    }

    #[test]
    fn test_large_unsigned_becomes_float() {
        assert_eq!(Value::from(5u64), Value::Int(5));
        assert_eq!(Value::from(i64::MAX as u64), Value::Int(i64::MAX));
        assert_eq!(Value::from(u64::MAX), Value::Float(u64::MAX as f64));
    }

    #[test]
    fn test_merge_patch_nested() {
        let mut report = Value::from_pairs([
            ("name", Value::from("Trip")),
            (
                "total",
                Value::from_pairs([("amount", Value::from(10)), ("currency", "USD".into())]),
            ),
        ]);
        let patch = Value::from_pairs([(
            "total",
            Value::from_pairs([("amount", Value::from(25))]),
        )]);

        report.merge_patch(&patch);

        let total = report.get("total").expect("total");
        assert_eq!(total.get("amount"), Some(&Value::Int(25)));
        assert_eq!(total.get("currency"), Some(&Value::from("USD")));
        assert_eq!(report.get("name"), Some(&Value::from("Trip")));
    }

    #[test]
    fn test_merge_patch_null_deletes_field() {
        let mut record = Value::from_pairs([
            ("pendingAction", Value::from("add")),
            ("text", Value::from("hi")),
        ]);
        record.merge_patch(&Value::from_pairs([("pendingAction", Value::Null)]));

        assert!(record.get("pendingAction").is_none());
        assert_eq!(record.get("text"), Some(&Value::from("hi")));
    }

    #[test]
    fn test_merge_patch_replaces_lists() {
        let mut record = Value::from_pairs([("tags", Value::from(vec!["a", "b", "c"]))]);
        record.merge_patch(&Value::from_pairs([("tags", Value::from(vec!["z"]))]));

        assert_eq!(record.get("tags"), Some(&Value::from(vec!["z"])));
    }

    #[test]
    fn test_merge_patch_new_subtree_drops_nulls() {
        let mut record = Value::map();
        record.merge_patch(&Value::from_pairs([(
            "errors",
            Value::from_pairs([("a", Value::from("bad")), ("b", Value::Null)]),
        )]));

        let errors = record.get("errors").and_then(Value::as_map).expect("errors");
        assert_eq!(errors.len(), 1);
        assert!(errors.get("b").is_none());
    }

    #[test]
    fn test_json_conversion() {
        let json = serde_json::json!({"id": 7, "ratio": 0.5, "tags": ["x"], "gone": null});
        let value = Value::from(json.clone());

        assert_eq!(value.get("id"), Some(&Value::Int(7)));
        assert_eq!(value.get("ratio"), Some(&Value::Float(0.5)));
        assert_eq!(serde_json::Value::from(value), json);
    }

    #[test]
    fn test_untagged_serialization() {
        let value = Value::from_pairs([("count", Value::from(3)), ("name", "x".into())]);
        let text = serde_json::to_string(&value).expect("serialize");
        assert_eq!(text, r#"{"count":3,"name":"x"}"#);

        let back: Value = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, value);
    }
}
