//! Numeric dtypes and their casting rules.

use crate::value::Map;
use crate::{Error, Result, Value};

/// The dtype of a number meta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NumberType {
    Int8,
    Uint8,
    Int16,
    Uint16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl NumberType {
    pub fn name(&self) -> &'static str {
        match self {
            NumberType::Int8 => "int8",
            NumberType::Uint8 => "uint8",
            NumberType::Int16 => "int16",
            NumberType::Uint16 => "uint16",
            NumberType::Int32 => "int32",
            NumberType::Uint32 => "uint32",
            NumberType::Int64 => "int64",
            NumberType::Uint64 => "uint64",
            NumberType::Float32 => "float32",
            NumberType::Float64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let dtype = match name {
            "int8" => NumberType::Int8,
            "uint8" => NumberType::Uint8,
            "int16" => NumberType::Int16,
            "uint16" => NumberType::Uint16,
            "int32" => NumberType::Int32,
            "uint32" => NumberType::Uint32,
            "int64" => NumberType::Int64,
            "uint64" => NumberType::Uint64,
            "float32" => NumberType::Float32,
            "float64" => NumberType::Float64,
            _ => return None,
        };
        Some(dtype)
    }

    pub fn is_float(&self) -> bool {
        matches!(self, NumberType::Float32 | NumberType::Float64)
    }

    /// Inclusive bounds of an integer dtype. `uint64` is capped at `i64::MAX`
    /// because values are carried as `i64`.
    fn int_range(&self) -> (i64, i64) {
        match self {
            NumberType::Int8 => (i8::MIN.into(), i8::MAX.into()),
            NumberType::Uint8 => (0, u8::MAX.into()),
            NumberType::Int16 => (i16::MIN.into(), i16::MAX.into()),
            NumberType::Uint16 => (0, u16::MAX.into()),
            NumberType::Int32 => (i32::MIN.into(), i32::MAX.into()),
            NumberType::Uint32 => (0, u32::MAX.into()),
            NumberType::Int64 | NumberType::Float32 | NumberType::Float64 => (i64::MIN, i64::MAX),
            NumberType::Uint64 => (0, i64::MAX),
        }
    }

    /// Cast a value through this dtype.
    ///
    /// Integer dtypes truncate floats toward zero and reject out of range
    /// values; float dtypes widen integers.
    pub fn cast(&self, value: &Value) -> Result<Value> {
        match value {
            Value::Null => self.cast(&Value::Integer(0)),
            Value::Bool(b) => self.cast(&Value::Integer(i64::from(*b))),
            Value::Integer(i) => {
                if self.is_float() {
                    Ok(Value::Float(self.round_float(*i as f64)))
                } else {
                    self.check_range(*i as f64, *i)
                }
            }
            Value::Float(f) => {
                if self.is_float() {
                    Ok(Value::Float(self.round_float(*f)))
                } else if !f.is_finite() {
                    Err(Error::Validation(format!(
                        "cannot convert {} to {}",
                        f,
                        self.name()
                    )))
                } else {
                    let t = f.trunc();
                    self.check_range(t, t as i64)
                }
            }
            Value::String(s) => {
                let s = s.trim();
                if let Ok(i) = s.parse::<i64>() {
                    self.cast(&Value::Integer(i))
                } else if let Ok(f) = s.parse::<f64>() {
                    self.cast(&Value::Float(f))
                } else {
                    Err(Error::Validation(format!(
                        "cannot convert '{}' to {}",
                        s,
                        self.name()
                    )))
                }
            }
            other => Err(Error::Validation(format!(
                "cannot convert {} to {}",
                other,
                self.name()
            ))),
        }
    }

    fn round_float(&self, f: f64) -> f64 {
        match self {
            NumberType::Float32 => f64::from(f as f32),
            _ => f,
        }
    }

    fn check_range(&self, wide: f64, narrow: i64) -> Result<Value> {
        let (low, high) = self.int_range();
        if wide < low as f64 || wide > high as f64 || narrow < low || narrow > high {
            Err(Error::Validation(format!(
                "{} is out of range for {}",
                wide,
                self.name()
            )))
        } else {
            Ok(Value::Integer(narrow))
        }
    }
}

/// Display hints for a number meta.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Display {
    pub limit_low: f64,
    pub limit_high: f64,
    pub precision: i64,
    pub units: String,
    pub description: String,
}

impl Display {
    pub const TYPEID: &'static str = "display_t";

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(Self::TYPEID));
        map.insert("limitLow".into(), Value::Float(self.limit_low));
        map.insert("limitHigh".into(), Value::Float(self.limit_high));
        map.insert("description".into(), Value::from(self.description.as_str()));
        map.insert("precision".into(), Value::Integer(self.precision));
        map.insert("units".into(), Value::from(self.units.as_str()));
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Self {
        let float = |name: &str| value.field(name).and_then(Value::as_f64).unwrap_or(0.0);
        let text = |name: &str| {
            value
                .field(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        Display {
            limit_low: float("limitLow"),
            limit_high: float("limitHigh"),
            precision: value.field("precision").and_then(Value::as_i64).unwrap_or(0),
            units: text("units"),
            description: text("description"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_dtypes_truncate_and_parse() {
        assert_eq!(NumberType::Int32.cast(&Value::from(2.9)).unwrap(), Value::from(2));
        assert_eq!(NumberType::Int32.cast(&Value::from(-2.9)).unwrap(), Value::from(-2));
        assert_eq!(NumberType::Int32.cast(&Value::from("42")).unwrap(), Value::from(42));
        assert_eq!(NumberType::Int32.cast(&Value::from("4.5")).unwrap(), Value::from(4));
        assert_eq!(NumberType::Int8.cast(&Value::Null).unwrap(), Value::from(0));
        assert_eq!(NumberType::Uint8.cast(&Value::Bool(true)).unwrap(), Value::from(1));
    }

    #[test]
    fn integer_range_is_enforced() {
        assert!(NumberType::Int8.cast(&Value::from(128)).is_err());
        assert!(NumberType::Int8.cast(&Value::from(-129)).is_err());
        assert!(NumberType::Uint8.cast(&Value::from(-1)).is_err());
        assert!(NumberType::Uint32.cast(&Value::from(4_294_967_296i64)).is_err());
        assert!(NumberType::Int64.cast(&Value::from(f64::NAN)).is_err());
        assert!(NumberType::Int64.cast(&Value::from("abc")).is_err());
        assert!(NumberType::Int64.cast(&Value::array()).is_err());
    }

    #[test]
    fn float_dtypes_widen() {
        assert_eq!(NumberType::Float64.cast(&Value::from(3)).unwrap(), Value::from(3.0));
        let narrowed = NumberType::Float32.cast(&Value::from(0.1)).unwrap();
        assert_eq!(narrowed, Value::Float(f64::from(0.1f32)));
        assert_eq!(NumberType::Float32.cast(&narrowed).unwrap(), narrowed);
    }

    #[test]
    fn dtype_names_roundtrip() {
        for name in ["int8", "uint16", "int64", "float32"] {
            assert_eq!(NumberType::from_name(name).unwrap().name(), name);
        }
        assert!(NumberType::from_name("complex").is_none());
    }
}
