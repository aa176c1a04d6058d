//! record — the payload flowing through backup and restore.
//!
//! A Record is a field-name -> scalar map. Scalars are serde_json values
//! (null, integer, float, string); blobs are carried as base64 strings so
//! the serialized stream stays plain JSON.

use base64::Engine;
use rusqlite::types::ValueRef;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use serde_json::Value;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Record(BTreeMap<String, Value>);

impl Record {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Build from (field, value) pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Integer view of a field. Accepts JSON integers and numeric strings
    /// (archived data is often stringly typed). Null/empty -> None.
    pub fn get_i64(&self, field: &str) -> Option<i64> {
        value_as_i64(self.0.get(field)?)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.0.get(field).and_then(Value::as_str)
    }

    /// `id` field of the record, if any.
    pub fn id(&self) -> Option<i64> {
        self.get_i64("id")
    }

    pub fn set(&mut self, field: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(field.into(), value.into());
    }

    /// Write null into a field (optional reference that could not be resolved).
    pub fn clear(&mut self, field: &str) {
        self.0.insert(field.to_string(), Value::Null);
    }

    pub fn remove(&mut self, field: &str) -> Option<Value> {
        self.0.remove(field)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains_key(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Keep only the given fields, in that set; missing ones become null.
    pub fn project(&self, fields: &[String]) -> Record {
        let mut out = Record::new();
        for f in fields {
            out.set(f.clone(), self.0.get(f).cloned().unwrap_or(Value::Null));
        }
        out
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Integer view of a scalar. Floats count only when integral and in range.
pub fn value_as_i64(v: &Value) -> Option<i64> {
    match v {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => {
            let s = s.trim();
            if s.is_empty() {
                None
            } else {
                s.parse::<i64>().ok()
            }
        }
        Value::Bool(b) => Some(*b as i64),
        _ => None,
    }
}

/// SQLite cell -> Value.
pub fn value_from_sql(v: ValueRef<'_>) -> Value {
    match v {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(t) => Value::String(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => {
            Value::String(base64::engine::general_purpose::STANDARD.encode(b))
        }
    }
}

/// Value -> owned SQLite value for binding.
pub fn value_to_sql(v: &Value) -> rusqlite::types::Value {
    use rusqlite::types::Value as Sql;
    match v {
        Value::Null => Sql::Null,
        Value::Bool(b) => Sql::Integer(*b as i64),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Sql::Integer(i),
            None => Sql::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => Sql::Text(s.clone()),
        // nested payloads are stored as their JSON text
        other => Sql::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_i64_accepts_numeric_strings() {
        let r = Record::from_pairs([
            ("a", Value::from(5)),
            ("b", Value::from(" 42 ")),
            ("c", Value::from("")),
            ("d", Value::Null),
        ]);
        assert_eq!(r.get_i64("a"), Some(5));
        assert_eq!(r.get_i64("b"), Some(42));
        assert_eq!(r.get_i64("c"), None);
        assert_eq!(r.get_i64("d"), None);
        assert_eq!(r.get_i64("missing"), None);
    }

    #[test]
    fn fractional_numbers_are_not_ids() {
        let r = Record::from_pairs([
            ("whole", serde_json::json!(3.0)),
            ("frac", serde_json::json!(3.7)),
            ("huge", serde_json::json!(1e30)),
        ]);
        assert_eq!(r.get_i64("whole"), Some(3));
        assert_eq!(r.get_i64("frac"), None);
        assert_eq!(r.get_i64("huge"), None);
    }

    #[test]
    fn project_fills_missing_with_null() {
        let r = Record::from_pairs([("id", 1), ("x", 2)]);
        let p = r.project(&["id".to_string(), "y".to_string()]);
        assert_eq!(p.get_i64("id"), Some(1));
        assert_eq!(p.get("y"), Some(&Value::Null));
        assert!(!p.contains("x"));
    }
}
