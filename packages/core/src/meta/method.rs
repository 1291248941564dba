//! MethodMeta: the signature of a callable endpoint.

use super::{MapMeta, MetaBase, VMeta};
use crate::value::Map;
use crate::{Error, Result, Value};

/// Describes what a method takes and returns.
///
/// Built explicitly:
///
/// ```rust
/// use malcolm_core::{MethodMeta, NumberType, VMeta, Value};
///
/// let meta = MethodMeta::new("Say hello")
///     .arg("name", VMeta::string("The name of the person to greet"))
///     .arg_default("sleep", VMeta::number(NumberType::Float64, "Time to wait"), 0.0)
///     .ret("greeting", VMeta::string("The greeting"));
/// let params = meta.validate(&Value::from([("name", "me")])).unwrap();
/// assert_eq!(params["sleep"], Value::from(0.0));
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodMeta {
    pub base: MetaBase,
    pub takes: MapMeta,
    pub defaults: Map,
    pub returns: MapMeta,
}

impl MethodMeta {
    pub const TYPEID: &'static str = "malcolm:core/MethodMeta:1.1";

    pub fn new(description: impl Into<String>) -> Self {
        MethodMeta {
            base: MetaBase::new(description),
            ..Default::default()
        }
    }

    /// A required argument.
    #[must_use]
    pub fn arg(mut self, name: &str, meta: VMeta) -> Self {
        self.takes.add(name, meta, true);
        self
    }

    /// An optional argument filled from `default` when absent.
    #[must_use]
    pub fn arg_default(mut self, name: &str, meta: VMeta, default: impl Into<Value>) -> Self {
        self.defaults.insert(name.to_string(), default.into());
        self.takes.add(name, meta, false);
        self
    }

    /// An optional argument with no default.
    #[must_use]
    pub fn arg_optional(mut self, name: &str, meta: VMeta) -> Self {
        self.takes.add(name, meta, false);
        self
    }

    /// A required return value.
    #[must_use]
    pub fn ret(mut self, name: &str, meta: VMeta) -> Self {
        self.returns.add(name, meta, true);
        self
    }

    #[must_use]
    pub fn ret_optional(mut self, name: &str, meta: VMeta) -> Self {
        self.returns.add(name, meta, false);
        self
    }

    #[must_use]
    pub fn writeable(mut self, writeable: bool) -> Self {
        self.base.writeable = writeable;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.base.label = label.into();
        self
    }

    /// Validate call parameters, filling defaults for absent arguments.
    pub fn validate(&self, params: &Value) -> Result<Map> {
        let mut given = match params {
            Value::Null => Map::new(),
            Value::Map(m) => m.clone(),
            other => {
                return Err(Error::Validation(format!(
                    "expected a map of parameters, got {}",
                    other
                )))
            }
        };
        for (name, default) in &self.defaults {
            if !given.contains_key(name) {
                given.insert(name.clone(), default.clone());
            }
        }
        self.takes.validate(&Value::Map(given))
    }

    /// Validate what a method returned.
    pub fn validate_return(&self, returned: &Value) -> Result<Map> {
        if self.returns.is_empty() && returned.is_null() {
            return Ok(Map::new());
        }
        self.returns.validate(returned)
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(Self::TYPEID));
        map.insert("takes".into(), self.takes.to_value());
        map.insert("defaults".into(), Value::Map(self.defaults.clone()));
        self.base.write_into(&mut map);
        map.insert("returns".into(), self.returns.to_value());
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map_meta = |name: &str| {
            value
                .field(name)
                .map(MapMeta::from_value)
                .transpose()
                .map(Option::unwrap_or_default)
        };
        Ok(MethodMeta {
            base: MetaBase::from_value(value),
            takes: map_meta("takes")?,
            defaults: value
                .field("defaults")
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default(),
            returns: map_meta("returns")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::NumberType;

    fn greet() -> MethodMeta {
        MethodMeta::new("Say hello")
            .arg("name", VMeta::string("Name"))
            .arg_default("sleep", VMeta::number(NumberType::Float64, "Sleep"), 0)
            .ret("greeting", VMeta::string("Greeting"))
            .writeable(true)
    }

    #[test]
    fn defaults_fill_absent_args() {
        let params = greet().validate(&Value::from([("name", "me")])).unwrap();
        assert_eq!(params["name"], Value::from("me"));
        assert_eq!(params["sleep"], Value::from(0.0));
    }

    #[test]
    fn missing_and_unknown_rejected() {
        assert!(greet().validate(&Value::Null).is_err());
        assert!(greet()
            .validate(&Value::from([("name", "me"), ("age", "3")]))
            .is_err());
    }

    #[test]
    fn returns_validated() {
        let meta = greet();
        assert!(meta.validate_return(&Value::map()).is_err());
        let ok = meta
            .validate_return(&Value::from([("greeting", "Hello me")]))
            .unwrap();
        assert_eq!(ok["greeting"], Value::from("Hello me"));
        assert!(MethodMeta::new("noop").validate_return(&Value::Null).is_ok());
    }

    #[test]
    fn serialization_roundtrip() {
        let v = greet().to_value();
        let keys: Vec<_> = v.as_map().unwrap().keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                "typeid",
                "takes",
                "defaults",
                "description",
                "tags",
                "writeable",
                "label",
                "returns"
            ]
        );
        let back = MethodMeta::from_value(&v).unwrap();
        assert_eq!(back.to_value(), v);
    }
}
