//! Scalar coercions shared by the scalar and array metas.

use crate::{Error, Result, Value};

const FALSY_STRINGS: [&str; 7] = ["0", "false", "False", "no", "No", "NO", ""];

pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Integer(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !FALSY_STRINGS.contains(&s.as_str()),
        Value::Array(a) => !a.is_empty(),
        Value::Map(m) => !m.is_empty(),
    }
}

pub(crate) fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub(crate) fn validate_choice(choices: &[String], value: &Value) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::from(choices.first().map(String::as_str).unwrap_or("")));
    }
    if let Value::String(s) = value {
        if choices.contains(s) {
            return Ok(value.clone());
        }
    }
    if let Some(choice) = value
        .as_i64()
        .and_then(|i| usize::try_from(i).ok())
        .and_then(|i| choices.get(i))
    {
        return Ok(Value::from(choice));
    }
    let text = stringify(value);
    if choices.contains(&text) {
        return Ok(Value::String(text));
    }
    Err(Error::Validation(format!(
        "{} is not a valid choice, expected one of {:?}",
        value, choices
    )))
}

/// Apply a scalar rule element-wise. Null is the empty array and a bare
/// scalar is a one-element array.
pub(crate) fn validate_array(
    value: &Value,
    element: impl Fn(&Value) -> Result<Value>,
) -> Result<Value> {
    match value {
        Value::Null => Ok(Value::array()),
        Value::Array(items) => items
            .iter()
            .map(element)
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Map(_) => Err(Error::Validation(format!(
            "expected an array, got {}",
            value
        ))),
        scalar => Ok(Value::Array(vec![element(scalar)?])),
    }
}
