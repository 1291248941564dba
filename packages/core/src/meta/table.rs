//! Table and union validation.

use indexmap::IndexMap;

use super::VMeta;
use crate::value::Map;
use crate::{Error, Result, Value};

/// Typeid that leads every validated table value.
pub const TABLE_TYPEID: &str = "malcolm:core/Table:1.0";

pub(crate) fn validate_table(elements: &IndexMap<String, VMeta>, value: &Value) -> Result<Value> {
    let columns = match value {
        Value::Null => {
            let mut map = Map::new();
            for name in elements.keys() {
                map.insert(name.clone(), Value::array());
            }
            map
        }
        Value::Map(map) => map.clone(),
        Value::Array(rows) => rows_to_columns(elements, rows)?,
        other => {
            return Err(Error::Validation(format!(
                "expected a table, got {}",
                other
            )))
        }
    };

    for name in columns.keys() {
        if name != "typeid" && !elements.contains_key(name) {
            return Err(Error::Validation(format!("unexpected column '{}'", name)));
        }
    }

    let mut out = Map::new();
    out.insert("typeid".into(), Value::from(TABLE_TYPEID));
    let mut length = None;
    for (name, meta) in elements {
        let column = columns
            .get(name)
            .ok_or_else(|| Error::Validation(format!("missing column '{}'", name)))?;
        let column = meta.validate(column)?;
        let len = column.as_array().map(Vec::len).unwrap_or(0);
        match length {
            None => length = Some(len),
            Some(expected) if expected != len => {
                return Err(Error::Validation(format!(
                    "column '{}' has {} rows, expected {}",
                    name, len, expected
                )))
            }
            Some(_) => {}
        }
        out.insert(name.clone(), column);
    }
    Ok(Value::Map(out))
}

fn rows_to_columns(elements: &IndexMap<String, VMeta>, rows: &[Value]) -> Result<Map> {
    let mut columns: Map = elements
        .keys()
        .map(|name| (name.clone(), Value::array()))
        .collect();
    for row in rows {
        let cells: Vec<Value> = match row {
            Value::Array(cells) if cells.len() == elements.len() => cells.clone(),
            Value::Map(cells) => elements
                .keys()
                .map(|name| {
                    cells
                        .get(name)
                        .cloned()
                        .ok_or_else(|| Error::Validation(format!("row missing '{}'", name)))
                })
                .collect::<Result<_>>()?,
            other => {
                return Err(Error::Validation(format!(
                    "row {} does not match {} columns",
                    other,
                    elements.len()
                )))
            }
        };
        for ((_, column), cell) in columns.iter_mut().zip(cells) {
            if let Value::Array(column) = column {
                column.push(cell);
            }
        }
    }
    Ok(columns)
}

pub(crate) fn validate_union(elements: &[VMeta], value: &Value) -> Result<Value> {
    if elements.is_empty() {
        return Ok(value.clone());
    }
    let mut errors = Vec::new();
    for meta in elements {
        match meta.validate(value) {
            Ok(v) => return Ok(v),
            Err(e) => errors.push(e.message()),
        }
    }
    Err(Error::Validation(format!(
        "{} matched no union element: {}",
        value,
        errors.join("; ")
    )))
}

/// Read a validated table value back as rows, one map per row.
pub fn table_rows(value: &Value) -> Vec<Map> {
    let Some(map) = value.as_map() else {
        return Vec::new();
    };
    let columns: Vec<(&String, &Vec<Value>)> = map
        .iter()
        .filter(|(name, _)| name.as_str() != "typeid")
        .filter_map(|(name, column)| column.as_array().map(|c| (name, c)))
        .collect();
    let len = columns.first().map(|(_, c)| c.len()).unwrap_or(0);
    (0..len)
        .map(|i| {
            columns
                .iter()
                .map(|(name, column)| {
                    ((*name).clone(), column.get(i).cloned().unwrap_or_default())
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::NumberType;

    fn layout_meta() -> VMeta {
        VMeta::table(
            "Layout",
            [
                ("name", VMeta::string_array("Name")),
                ("x", VMeta::number_array(NumberType::Float64, "X")),
                ("visible", VMeta::boolean_array("Visible")),
            ],
        )
    }

    #[test]
    fn null_is_empty_table() {
        let v = layout_meta().validate(&Value::Null).unwrap();
        assert_eq!(v.typeid(), Some(TABLE_TYPEID));
        assert_eq!(v.field("name"), Some(&Value::array()));
        assert!(table_rows(&v).is_empty());
    }

    #[test]
    fn columns_validated_in_meta_order() {
        let input = Value::from([
            ("visible", Value::from(vec!["1", "false"])),
            ("name", Value::from(vec!["A", "B"])),
            ("x", Value::from(vec![1, 2])),
        ]);
        let v = layout_meta().validate(&input).unwrap();
        let keys: Vec<_> = v.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["typeid", "name", "x", "visible"]);
        assert_eq!(v.field("x"), Some(&Value::from(vec![1.0, 2.0])));
        assert_eq!(v.field("visible"), Some(&Value::from(vec![true, false])));
        let rows = table_rows(&v);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get("name"), Some(&Value::from("B")));
    }

    #[test]
    fn bad_tables_rejected() {
        let meta = layout_meta();
        let missing = Value::from([("name", vec!["A"]), ("x", vec!["1"])]);
        assert!(meta.validate(&missing).is_err());
        let extra = Value::from([
            ("name", Value::from(vec!["A"])),
            ("x", Value::from(vec![1])),
            ("visible", Value::from(vec![true])),
            ("y", Value::from(vec![1])),
        ]);
        assert!(meta.validate(&extra).is_err());
        let ragged = Value::from([
            ("name", Value::from(vec!["A", "B"])),
            ("x", Value::from(vec![1])),
            ("visible", Value::from(vec![true])),
        ]);
        assert!(meta.validate(&ragged).is_err());
    }

    #[test]
    fn rows_are_accepted() {
        let rows = Value::Array(vec![
            Value::Array(vec![Value::from("A"), Value::from(1), Value::from(true)]),
            Value::from([
                ("name", Value::from("B")),
                ("x", Value::from(2)),
                ("visible", Value::from(false)),
            ]),
        ]);
        let v = layout_meta().validate(&rows).unwrap();
        assert_eq!(v.field("name"), Some(&Value::from(vec!["A", "B"])));
    }
}
