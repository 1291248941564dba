//! The Value type - the serialized form of every model.
//!
//! Metas validate into it, models serialize to it, and the Notifier keeps a
//! mirror of each block as one big `Value` tree.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::Error;

/// Insertion-ordered map used for every structured value.
pub type Map = IndexMap<String, Value>;

/// A tree-shaped value.
///
/// # Design Notes
///
/// - Uses `IndexMap` so serialized models keep their field order (`typeid`
///   first, endpoints in insertion order)
/// - Uses `i64` for every integer dtype; metas enforce the narrower ranges
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Value {
    /// Absence of a value.
    #[default]
    Null,
    /// Boolean value.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit floating point.
    Float(f64),
    /// UTF-8 string.
    String(String),
    /// Ordered sequence of values.
    Array(Vec<Value>),
    /// Ordered key-value map.
    Map(Map),
}

impl Value {
    /// Create a null value.
    pub fn null() -> Self {
        Value::Null
    }

    /// Create an empty map.
    pub fn map() -> Self {
        Value::Map(Map::new())
    }

    /// Create an empty array.
    pub fn array() -> Self {
        Value::Array(Vec::new())
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, Value::Map(_))
    }

    /// Check if this value is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, Value::Array(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integer view; integral floats are accepted.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Integer(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_map_mut(&mut self) -> Option<&mut Map> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a direct member of a map.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(name))
    }

    /// The `typeid` member of a serialized model, if any.
    pub fn typeid(&self) -> Option<&str> {
        self.field("typeid").and_then(Value::as_str)
    }

    /// Get a reference to a nested value by path.
    ///
    /// Returns `None` if the path doesn't exist or can't be navigated
    /// (e.g., trying to index into a string).
    pub fn get(&self, path: &[String]) -> Option<&Value> {
        let mut current = self;
        for component in path {
            current = match current {
                Value::Map(map) => map.get(component)?,
                Value::Array(arr) => {
                    let index: usize = component.parse().ok()?;
                    arr.get(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Get a mutable reference to a nested value by path.
    pub fn get_mut(&mut self, path: &[String]) -> Option<&mut Value> {
        let mut current = self;
        for component in path {
            current = match current {
                Value::Map(map) => map.get_mut(component)?,
                Value::Array(arr) => {
                    let index: usize = component.parse().ok()?;
                    arr.get_mut(index)?
                }
                _ => return None,
            };
        }
        Some(current)
    }

    /// Set a value at a path, creating intermediate maps as needed.
    ///
    /// # Errors
    ///
    /// Returns a field error if the path traverses through a non-container
    /// value (e.g., trying to set `foo.bar` when `foo` is a string).
    pub fn set(&mut self, path: &[String], value: Value) -> Result<(), Error> {
        let Some((last, parents)) = path.split_last() else {
            *self = value;
            return Ok(());
        };

        let mut current = self;
        for component in parents {
            current = match current {
                Value::Map(map) => map.entry(component.clone()).or_insert_with(Value::map),
                Value::Array(arr) => {
                    let index = parse_index(component)?;
                    arr.get_mut(index).ok_or_else(|| {
                        Error::Field(format!("array index {} out of bounds", index))
                    })?
                }
                _ => {
                    return Err(Error::Field(format!(
                        "cannot navigate through non-container at '{}'",
                        component
                    )))
                }
            };
        }

        match current {
            Value::Map(map) => {
                map.insert(last.clone(), value);
                Ok(())
            }
            Value::Array(arr) => {
                let index = parse_index(last)?;
                if index < arr.len() {
                    arr[index] = value;
                } else if index == arr.len() {
                    arr.push(value);
                } else {
                    return Err(Error::Field(format!("array index {} out of bounds", index)));
                }
                Ok(())
            }
            _ => Err(Error::Field(format!(
                "cannot set child '{}' on non-container value",
                last
            ))),
        }
    }

    /// Remove a value at a path, returning it if it existed.
    ///
    /// Map removal keeps the order of the remaining keys.
    pub fn remove(&mut self, path: &[String]) -> Result<Option<Value>, Error> {
        let Some((last, parents)) = path.split_last() else {
            return Ok(Some(std::mem::take(self)));
        };

        let parent = match self.get_mut(parents) {
            Some(p) => p,
            None => return Ok(None),
        };

        match parent {
            Value::Map(map) => Ok(map.shift_remove(last)),
            Value::Array(arr) => {
                let index = parse_index(last)?;
                if index < arr.len() {
                    Ok(Some(arr.remove(index)))
                } else {
                    Ok(None)
                }
            }
            _ => Ok(None),
        }
    }

    /// Convert to a `serde_json::Value`, keeping key order.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Integer(i) => serde_json::Value::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(Value::to_json).collect()),
            Value::Map(m) => serde_json::Value::Object(
                m.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }
}

fn parse_index(component: &str) -> Result<usize, Error> {
    component
        .parse()
        .map_err(|_| Error::Field(format!("invalid array index: {}", component)))
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Integer(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from).collect()),
            serde_json::Value::Object(o) => {
                Value::Map(o.into_iter().map(|(k, v)| (k, Value::from(v))).collect())
            }
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Array(a) => a.serialize(serializer),
            Value::Map(m) => m.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

// Conversion from common types

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<usize> for Value {
    fn from(v: usize) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl From<Map> for Value {
    fn from(v: Map) -> Self {
        Value::Map(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::Array(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Build a map value from literal pairs.
///
/// ```rust
/// use malcolm_core::Value;
///
/// let v = Value::from([("name", Value::from("me")), ("sleep", Value::from(0.5))]);
/// assert_eq!(v.field("name"), Some(&Value::from("me")));
/// ```
impl<K: Into<String>, V: Into<Value>, const N: usize> From<[(K, V); N]> for Value {
    fn from(pairs: [(K, V); N]) -> Self {
        Value::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> Vec<String> {
        s.split('.').map(str::to_string).collect()
    }

    #[test]
    fn get_nested_value() {
        let mut value = Value::map();
        value.set(&p("foo.bar"), Value::from("hello")).unwrap();

        assert_eq!(value.get(&p("foo.bar")), Some(&Value::from("hello")));
        let foo = value.get(&p("foo")).unwrap();
        assert!(foo.is_map());
        assert_eq!(value.get(&p("nonexistent")), None);
    }

    #[test]
    fn set_creates_intermediate_maps() {
        let mut value = Value::map();
        value.set(&p("a.b.c"), Value::from(42i64)).unwrap();

        assert_eq!(value.get(&p("a.b.c")), Some(&Value::from(42i64)));
        assert!(value.get(&p("a.b")).unwrap().is_map());
    }

    #[test]
    fn set_through_scalar_fails() {
        let mut value = Value::from([("a", 1)]);
        assert!(value.set(&p("a.b"), Value::Null).is_err());
    }

    #[test]
    fn remove_keeps_order() {
        let mut value = Value::from([("a", 1), ("b", 2), ("c", 3)]);
        let removed = value.remove(&p("b")).unwrap();
        assert_eq!(removed, Some(Value::from(2)));
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn array_access_works() {
        let value = Value::from([("items", vec!["a", "b", "c"])]);
        assert_eq!(value.get(&p("items.1")), Some(&Value::from("b")));
        assert_eq!(value.get(&p("items.3")), None);
    }

    #[test]
    fn json_conversion_preserves_order() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"typeid": "x", "zeta": 1, "alpha": [1.5, null]}"#).unwrap();
        let value = Value::from(json.clone());
        assert_eq!(value.typeid(), Some("x"));
        let keys: Vec<_> = value.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["typeid", "zeta", "alpha"]);
        assert_eq!(value.to_json(), json);
        assert_eq!(
            serde_json::to_string(&value).unwrap(),
            r#"{"typeid":"x","zeta":1,"alpha":[1.5,null]}"#
        );
    }

    #[test]
    fn numeric_views() {
        assert_eq!(Value::Float(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float(3.5).as_i64(), None);
        assert_eq!(Value::Integer(2).as_f64(), Some(2.0));
    }
}
