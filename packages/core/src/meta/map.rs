//! MapMeta: an ordered record of named metas.

use indexmap::IndexMap;

use super::{elements_from_value, elements_value, string_list, VMeta};
use crate::value::Map;
use crate::{Error, Result, Value};

/// Ordered mapping of name to [`VMeta`] with a `required` subset.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapMeta {
    pub elements: IndexMap<String, VMeta>,
    pub required: Vec<String>,
}

impl MapMeta {
    pub const TYPEID: &'static str = "malcolm:core/MapMeta:1.0";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, name: impl Into<String>, meta: VMeta, required: bool) {
        let name = name.into();
        if required && !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.elements.insert(name, meta);
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Validate a parameter record.
    ///
    /// Unknown keys and missing required keys are rejected; the result is
    /// ordered like the elements.
    pub fn validate(&self, value: &Value) -> Result<Map> {
        let empty = Map::new();
        let given = match value {
            Value::Null => &empty,
            Value::Map(m) => m,
            other => {
                return Err(Error::Validation(format!(
                    "expected a map of parameters, got {}",
                    other
                )))
            }
        };
        for name in given.keys() {
            if name != "typeid" && !self.elements.contains_key(name) {
                return Err(Error::Validation(format!("unexpected argument '{}'", name)));
            }
        }
        for name in &self.required {
            if !given.contains_key(name) {
                return Err(Error::Validation(format!(
                    "missing required argument '{}'",
                    name
                )));
            }
        }
        let mut out = Map::new();
        for (name, meta) in &self.elements {
            if let Some(v) = given.get(name) {
                let v = meta
                    .validate(v)
                    .map_err(|e| Error::Validation(format!("{}: {}", name, e.message())))?;
                out.insert(name.clone(), v);
            }
        }
        Ok(out)
    }

    pub fn to_value(&self) -> Value {
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("elements", elements_value(&self.elements)),
            (
                "required",
                Value::Array(self.required.iter().map(Value::from).collect()),
            ),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(MapMeta {
            elements: elements_from_value(value.field("elements"))?,
            required: string_list(value.field("required")),
        })
    }
}
