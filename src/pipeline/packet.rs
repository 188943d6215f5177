//! Packages: the unit of data flowing along pipeline edges.
//!
//! A `Package` is an ordered map from variable name to `Value` that always
//! carries a `time` (seconds since the Unix epoch). Nodes read their
//! `input_var` from it and write their `output_var` back into it.

use crate::pipeline::error::NodeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Key under which every package stores its timestamp.
pub const TIME_KEY: &str = "time";

/// A single value carried by a package.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Int(i64),
    Float(f64),
    Null,
}

impl Value {
    /// Numeric view of the value. `Null` has none.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Null => None,
        }
    }

    /// Integer view. Floats are accepted only when they hold an integral value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Truthiness used by digital/pipeline control nodes: non-zero numbers are true.
    pub fn is_truthy(&self) -> bool {
        self.as_f64().map(|v| v != 0.0).unwrap_or(false)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<Option<f64>> for Value {
    fn from(v: Option<f64>) -> Self {
        v.map(Value::Float).unwrap_or(Value::Null)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Null => write!(f, "None"),
        }
    }
}

/// Named values plus a timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Package {
    pub time: f64,
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

impl Package {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            values: BTreeMap::new(),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set a variable. Writing `time` updates the timestamp instead.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if key == TIME_KEY {
            if let Some(t) = value.as_f64() {
                self.time = t;
            }
            return;
        }
        self.values.insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if key == TIME_KEY {
            return Some(Value::Float(self.time));
        }
        self.values.get(key).copied()
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        key == TIME_KEY || self.values.contains_key(key)
    }

    /// Numeric value of `key`, failing if it is missing or null.
    pub fn get_f64(&self, key: &str) -> Result<f64, NodeError> {
        match self.get(key) {
            Some(value) => value
                .as_f64()
                .ok_or_else(|| NodeError::NonNumeric(key.to_string())),
            None => Err(NodeError::MissingVariable(key.to_string())),
        }
    }

    /// Integer value of `key`, failing if it is missing, null or fractional.
    pub fn get_i64(&self, key: &str) -> Result<i64, NodeError> {
        match self.get(key) {
            Some(value) => value
                .as_i64()
                .ok_or_else(|| NodeError::NonNumeric(key.to_string())),
            None => Err(NodeError::MissingVariable(key.to_string())),
        }
    }

    /// Variable names, excluding `time`.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(|k| k.as_str())
    }

    /// Iterate over variables, excluding `time`.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Value)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_time_is_always_present() {
        let pkg = Package::new(12.5);
        assert!(pkg.contains_key("time"));
        assert_eq!(pkg.get_f64("time").unwrap(), 12.5);
    }

    #[test]
    fn test_insert_time_moves_timestamp() {
        let mut pkg = Package::new(1.0);
        pkg.insert("time", 3.0);
        assert_eq!(pkg.time, 3.0);
        assert!(pkg.is_empty());
    }

    #[test]
    fn test_missing_and_null_values() {
        let pkg = Package::new(0.0).with("a", Value::Null);
        assert!(matches!(pkg.get_f64("a"), Err(NodeError::NonNumeric(_))));
        assert!(matches!(pkg.get_f64("b"), Err(NodeError::MissingVariable(_))));
    }

    #[test]
    fn test_integer_views() {
        let pkg = Package::new(0.0).with("i", 7i64).with("f", 7.0).with("g", 7.5);
        assert_eq!(pkg.get_i64("i").unwrap(), 7);
        assert_eq!(pkg.get_i64("f").unwrap(), 7);
        assert!(pkg.get_i64("g").is_err());
    }

    #[test]
    fn test_serde_flattens_values() {
        let pkg = Package::new(2.0).with("x", 1.5).with("n", Value::Null);
        let json = serde_json::to_value(&pkg).unwrap();
        assert_eq!(json["time"], 2.0);
        assert_eq!(json["x"], 1.5);
        assert!(json["n"].is_null());
        let back: Package = serde_json::from_value(json).unwrap();
        assert_eq!(back, pkg);
    }

    #[test]
    fn test_display_null() {
        assert_eq!(Value::Null.to_string(), "None");
        assert_eq!(Value::Int(3).to_string(), "3");
    }
}
