//! Metas: type descriptions that validate values.
//!
//! A [`VMeta`] is a validating meta. Its [`MetaKind`] decides how
//! [`VMeta::validate`] coerces incoming values; the shared [`MetaBase`]
//! carries the description, tags, writeable flag and label every meta has.
//!
//! ```rust
//! use malcolm_core::{VMeta, Value};
//!
//! let meta = VMeta::choice("Direction", ["up", "down"]);
//! assert_eq!(meta.validate(&Value::from(1)).unwrap(), Value::from("down"));
//! assert!(meta.validate(&Value::from("sideways")).is_err());
//! ```

mod block;
mod map;
mod method;
mod number;
mod scalar;
mod table;
pub mod tags;

pub use block::BlockMeta;
pub use map::MapMeta;
pub use method::MethodMeta;
pub use number::{Display, NumberType};
pub use table::{table_rows, TABLE_TYPEID};

use indexmap::IndexMap;

use crate::generator::CompoundGenerator;
use crate::value::Map;
use crate::{Error, Result, Value};

pub const BOOLEAN_META: &str = "malcolm:core/BooleanMeta:1.0";
pub const CHOICE_META: &str = "malcolm:core/ChoiceMeta:1.0";
pub const NUMBER_META: &str = "malcolm:core/NumberMeta:1.0";
pub const STRING_META: &str = "malcolm:core/StringMeta:1.0";
pub const BOOLEAN_ARRAY_META: &str = "malcolm:core/BooleanArrayMeta:1.0";
pub const CHOICE_ARRAY_META: &str = "malcolm:core/ChoiceArrayMeta:1.0";
pub const NUMBER_ARRAY_META: &str = "malcolm:core/NumberArrayMeta:1.0";
pub const STRING_ARRAY_META: &str = "malcolm:core/StringArrayMeta:1.0";
pub const TABLE_META: &str = "malcolm:core/TableMeta:1.0";
pub const UNION_META: &str = "malcolm:core/UnionMeta:1.0";
pub const POINT_GENERATOR_META: &str = "malcolm:core/PointGeneratorMeta:1.0";

pub const NT_SCALAR: &str = "epics:nt/NTScalar:1.0";
pub const NT_SCALAR_ARRAY: &str = "epics:nt/NTScalarArray:1.0";
pub const NT_TABLE: &str = "epics:nt/NTTable:1.0";
pub const NT_UNION: &str = "epics:nt/NTUnion:1.0";

/// Fields every meta carries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MetaBase {
    pub description: String,
    pub tags: Vec<String>,
    pub writeable: bool,
    pub label: String,
}

impl MetaBase {
    pub fn new(description: impl Into<String>) -> Self {
        MetaBase {
            description: description.into(),
            ..Default::default()
        }
    }

    pub(crate) fn write_into(&self, map: &mut Map) {
        map.insert("description".into(), Value::from(self.description.as_str()));
        map.insert(
            "tags".into(),
            Value::Array(self.tags.iter().map(Value::from).collect()),
        );
        map.insert("writeable".into(), Value::Bool(self.writeable));
        map.insert("label".into(), Value::from(self.label.as_str()));
    }

    pub(crate) fn from_value(value: &Value) -> Self {
        let text = |name: &str| {
            value
                .field(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };
        MetaBase {
            description: text("description"),
            tags: string_list(value.field("tags")),
            writeable: value
                .field("writeable")
                .and_then(Value::as_bool)
                .unwrap_or(false),
            label: text("label"),
        }
    }
}

/// The strings of an array value; anything else is skipped.
pub fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
        .unwrap_or_default()
}

/// What a [`VMeta`] validates.
#[derive(Debug, Clone, PartialEq)]
pub enum MetaKind {
    Boolean,
    Choice {
        choices: Vec<String>,
    },
    Number {
        dtype: NumberType,
        display: Option<Display>,
    },
    String,
    BooleanArray,
    ChoiceArray {
        choices: Vec<String>,
    },
    NumberArray {
        dtype: NumberType,
        display: Option<Display>,
    },
    StringArray,
    /// Named columns, each an array meta.
    Table {
        elements: IndexMap<String, VMeta>,
    },
    /// Tries each element in order; no elements accepts anything.
    Union {
        elements: Vec<VMeta>,
    },
    /// A scan descriptor.
    PointGenerator,
}

/// A validating meta.
#[derive(Debug, Clone, PartialEq)]
pub struct VMeta {
    pub base: MetaBase,
    pub kind: MetaKind,
}

impl VMeta {
    pub fn new(kind: MetaKind, description: impl Into<String>) -> Self {
        VMeta {
            base: MetaBase::new(description),
            kind,
        }
    }

    pub fn boolean(description: impl Into<String>) -> Self {
        Self::new(MetaKind::Boolean, description)
    }

    pub fn choice<I, S>(description: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices = choices.into_iter().map(Into::into).collect();
        Self::new(MetaKind::Choice { choices }, description)
    }

    pub fn number(dtype: NumberType, description: impl Into<String>) -> Self {
        Self::new(
            MetaKind::Number {
                dtype,
                display: None,
            },
            description,
        )
    }

    pub fn string(description: impl Into<String>) -> Self {
        Self::new(MetaKind::String, description)
    }

    pub fn boolean_array(description: impl Into<String>) -> Self {
        Self::new(MetaKind::BooleanArray, description)
    }

    pub fn choice_array<I, S>(description: impl Into<String>, choices: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let choices = choices.into_iter().map(Into::into).collect();
        Self::new(MetaKind::ChoiceArray { choices }, description)
    }

    pub fn number_array(dtype: NumberType, description: impl Into<String>) -> Self {
        Self::new(
            MetaKind::NumberArray {
                dtype,
                display: None,
            },
            description,
        )
    }

    pub fn string_array(description: impl Into<String>) -> Self {
        Self::new(MetaKind::StringArray, description)
    }

    /// A table whose columns are the given array metas.
    pub fn table<I, S>(description: impl Into<String>, columns: I) -> Self
    where
        I: IntoIterator<Item = (S, VMeta)>,
        S: Into<String>,
    {
        let elements = columns.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::new(MetaKind::Table { elements }, description)
    }

    pub fn union(description: impl Into<String>, elements: Vec<VMeta>) -> Self {
        Self::new(MetaKind::Union { elements }, description)
    }

    pub fn point_generator(description: impl Into<String>) -> Self {
        Self::new(MetaKind::PointGenerator, description)
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.base.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.base.tags.push(tag.into());
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

    /// Attach display limits to a number or number array meta.
    #[must_use]
    pub fn with_display(mut self, new: Display) -> Self {
        match &mut self.kind {
            MetaKind::Number { display, .. } | MetaKind::NumberArray { display, .. } => {
                *display = Some(new)
            }
            _ => {}
        }
        self
    }

    pub fn typeid(&self) -> &'static str {
        match self.kind {
            MetaKind::Boolean => BOOLEAN_META,
            MetaKind::Choice { .. } => CHOICE_META,
            MetaKind::Number { .. } => NUMBER_META,
            MetaKind::String => STRING_META,
            MetaKind::BooleanArray => BOOLEAN_ARRAY_META,
            MetaKind::ChoiceArray { .. } => CHOICE_ARRAY_META,
            MetaKind::NumberArray { .. } => NUMBER_ARRAY_META,
            MetaKind::StringArray => STRING_ARRAY_META,
            MetaKind::Table { .. } => TABLE_META,
            MetaKind::Union { .. } => UNION_META,
            MetaKind::PointGenerator => POINT_GENERATOR_META,
        }
    }

    /// Typeid of the attribute this meta describes.
    pub fn attribute_typeid(&self) -> &'static str {
        match self.kind {
            MetaKind::Boolean
            | MetaKind::Choice { .. }
            | MetaKind::Number { .. }
            | MetaKind::String => NT_SCALAR,
            MetaKind::BooleanArray
            | MetaKind::ChoiceArray { .. }
            | MetaKind::NumberArray { .. }
            | MetaKind::StringArray => NT_SCALAR_ARRAY,
            MetaKind::Table { .. } => NT_TABLE,
            MetaKind::Union { .. } | MetaKind::PointGenerator => NT_UNION,
        }
    }

    pub fn is_array(&self) -> bool {
        self.attribute_typeid() == NT_SCALAR_ARRAY
    }

    /// Choices of a choice or choice array meta.
    pub fn choices(&self) -> Option<&[String]> {
        match &self.kind {
            MetaKind::Choice { choices } | MetaKind::ChoiceArray { choices } => Some(choices),
            _ => None,
        }
    }

    /// Validate and coerce a value.
    ///
    /// The result is a fixed point: validating it again returns it unchanged.
    pub fn validate(&self, value: &Value) -> Result<Value> {
        match &self.kind {
            MetaKind::Boolean => Ok(Value::Bool(scalar::truthy(value))),
            MetaKind::Choice { choices } => scalar::validate_choice(choices, value),
            MetaKind::Number { dtype, .. } => dtype.cast(value),
            MetaKind::String => Ok(Value::String(scalar::stringify(value))),
            MetaKind::BooleanArray => {
                scalar::validate_array(value, |v| Ok(Value::Bool(scalar::truthy(v))))
            }
            MetaKind::ChoiceArray { choices } => {
                scalar::validate_array(value, |v| scalar::validate_choice(choices, v))
            }
            MetaKind::NumberArray { dtype, .. } => scalar::validate_array(value, |v| dtype.cast(v)),
            MetaKind::StringArray => {
                scalar::validate_array(value, |v| Ok(Value::String(scalar::stringify(v))))
            }
            MetaKind::Table { elements } => table::validate_table(elements, value),
            MetaKind::Union { elements } => table::validate_union(elements, value),
            MetaKind::PointGenerator => {
                if value.is_null() {
                    Ok(Value::Null)
                } else {
                    Ok(CompoundGenerator::from_value(value)?.to_value())
                }
            }
        }
    }

    /// The value an attribute of this meta starts with.
    pub fn default_value(&self) -> Value {
        self.validate(&Value::Null).unwrap_or(Value::Null)
    }

    /// Serialize with `typeid` first.
    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(self.typeid()));
        match &self.kind {
            MetaKind::Choice { choices } | MetaKind::ChoiceArray { choices } => {
                map.insert(
                    "choices".into(),
                    Value::Array(choices.iter().map(Value::from).collect()),
                );
            }
            MetaKind::Number { dtype, .. } | MetaKind::NumberArray { dtype, .. } => {
                map.insert("dtype".into(), Value::from(dtype.name()));
            }
            MetaKind::Table { elements } => {
                map.insert("elements".into(), elements_value(elements));
            }
            MetaKind::Union { elements } => {
                map.insert(
                    "elements".into(),
                    Value::Array(elements.iter().map(VMeta::to_value).collect()),
                );
            }
            _ => {}
        }
        self.base.write_into(&mut map);
        if let MetaKind::Number {
            display: Some(display),
            ..
        }
        | MetaKind::NumberArray {
            display: Some(display),
            ..
        } = &self.kind
        {
            map.insert("display".into(), display.to_value());
        }
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let typeid = value
            .typeid()
            .ok_or_else(|| Error::Validation(format!("meta without typeid: {}", value)))?;
        let choices = || string_list(value.field("choices"));
        let dtype = || -> Result<NumberType> {
            let name = value.field("dtype").and_then(Value::as_str).unwrap_or("float64");
            NumberType::from_name(name)
                .ok_or_else(|| Error::Validation(format!("unknown dtype '{}'", name)))
        };
        let display = || value.field("display").map(Display::from_value);
        let kind = match typeid {
            BOOLEAN_META => MetaKind::Boolean,
            CHOICE_META => MetaKind::Choice { choices: choices() },
            NUMBER_META => MetaKind::Number {
                dtype: dtype()?,
                display: display(),
            },
            STRING_META => MetaKind::String,
            BOOLEAN_ARRAY_META => MetaKind::BooleanArray,
            CHOICE_ARRAY_META => MetaKind::ChoiceArray { choices: choices() },
            NUMBER_ARRAY_META => MetaKind::NumberArray {
                dtype: dtype()?,
                display: display(),
            },
            STRING_ARRAY_META => MetaKind::StringArray,
            TABLE_META => MetaKind::Table {
                elements: elements_from_value(value.field("elements"))?,
            },
            UNION_META => MetaKind::Union {
                elements: value
                    .field("elements")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().map(VMeta::from_value).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default(),
            },
            POINT_GENERATOR_META => MetaKind::PointGenerator,
            other => {
                return Err(Error::Validation(format!(
                    "'{}' is not a validating meta",
                    other
                )))
            }
        };
        Ok(VMeta {
            base: MetaBase::from_value(value),
            kind,
        })
    }
}

pub(crate) fn elements_value(elements: &IndexMap<String, VMeta>) -> Value {
    Value::Map(
        elements
            .iter()
            .map(|(k, v)| (k.clone(), v.to_value()))
            .collect(),
    )
}

pub(crate) fn elements_from_value(value: Option<&Value>) -> Result<IndexMap<String, VMeta>> {
    let mut elements = IndexMap::new();
    if let Some(map) = value.and_then(Value::as_map) {
        for (name, meta) in map {
            if name == "typeid" {
                continue;
            }
            elements.insert(name.clone(), VMeta::from_value(meta)?);
        }
    }
    Ok(elements)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn boolean_falsy_strings() {
        let meta = VMeta::boolean("flag");
        for falsy in ["0", "false", "False", "no", "No", "NO", ""] {
            assert_eq!(meta.validate(&Value::from(falsy)).unwrap(), Value::Bool(false));
        }
        assert_eq!(meta.validate(&Value::Null).unwrap(), Value::Bool(false));
        assert_eq!(meta.validate(&Value::from(0.0)).unwrap(), Value::Bool(false));
        assert_eq!(meta.validate(&Value::from("yes")).unwrap(), Value::Bool(true));
        assert_eq!(meta.validate(&Value::from(2)).unwrap(), Value::Bool(true));
    }

    #[test]
    fn string_meta_stringifies() {
        let meta = VMeta::string("s");
        assert_eq!(meta.validate(&Value::Null).unwrap(), Value::from(""));
        assert_eq!(meta.validate(&Value::from(3)).unwrap(), Value::from("3"));
        assert_eq!(meta.validate(&Value::from("x")).unwrap(), Value::from("x"));
    }

    #[test]
    fn choice_accepts_value_index_and_null() {
        let meta = VMeta::choice("c", ["a", "b"]);
        assert_eq!(meta.validate(&Value::from("b")).unwrap(), Value::from("b"));
        assert_eq!(meta.validate(&Value::from(1)).unwrap(), Value::from("b"));
        assert_eq!(meta.validate(&Value::Null).unwrap(), Value::from("a"));
        assert_eq!(meta.default_value(), Value::from("a"));
        let err = meta.validate(&Value::from("x")).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Validation);
        assert!(meta.validate(&Value::from(2)).is_err());
    }

    #[test]
    fn choice_matches_string_form() {
        let meta = VMeta::choice("c", ["1", "2"]);
        assert_eq!(meta.validate(&Value::from("2")).unwrap(), Value::from("2"));
        // an index takes priority over the string form
        assert_eq!(meta.validate(&Value::from(1)).unwrap(), Value::from("2"));
        assert_eq!(meta.validate(&Value::from(2)).unwrap(), Value::from("2"));
        assert!(meta.validate(&Value::from(3)).is_err());
    }

    #[test]
    fn arrays_wrap_scalars_and_null() {
        let meta = VMeta::number_array(NumberType::Int32, "n");
        assert_eq!(meta.validate(&Value::Null).unwrap(), Value::array());
        assert_eq!(
            meta.validate(&Value::from(3)).unwrap(),
            Value::Array(vec![Value::from(3)])
        );
        assert_eq!(
            meta.validate(&Value::from(vec![1.7, -2.2])).unwrap(),
            Value::Array(vec![Value::from(1), Value::from(-2)])
        );
        let strings = VMeta::string_array("s");
        assert_eq!(
            strings.validate(&Value::from(vec![Value::Null, Value::from(1)])).unwrap(),
            Value::from(vec!["", "1"])
        );
    }

    #[test]
    fn union_takes_first_success() {
        let meta = VMeta::union(
            "u",
            vec![
                VMeta::number(NumberType::Int8, "n"),
                VMeta::string("s"),
            ],
        );
        assert_eq!(meta.validate(&Value::from("12")).unwrap(), Value::from(12));
        assert_eq!(meta.validate(&Value::from("abc")).unwrap(), Value::from("abc"));
        let any = VMeta::union("any", vec![]);
        let v = Value::from([("k", 1)]);
        assert_eq!(any.validate(&v).unwrap(), v);
    }

    #[test]
    fn validate_is_a_fixed_point() {
        let metas = vec![
            VMeta::boolean("b"),
            VMeta::choice("c", ["x", "y"]),
            VMeta::number(NumberType::Float32, "f"),
            VMeta::number(NumberType::Uint8, "u"),
            VMeta::string_array("sa"),
        ];
        let inputs = vec![
            Value::from("no"),
            Value::from(1),
            Value::from(0.1),
            Value::from("7"),
            Value::from("one"),
        ];
        for (meta, input) in metas.iter().zip(inputs) {
            let once = meta.validate(&input).unwrap();
            assert_eq!(meta.validate(&once).unwrap(), once);
        }
    }

    #[test]
    fn meta_serialization_roundtrip() {
        let meta = VMeta::number(NumberType::Uint16, "Steps")
            .with_tags(["config:1", "widget:textinput"])
            .writeable(true)
            .with_label("Steps")
            .with_display(Display {
                limit_low: 0.0,
                limit_high: 100.0,
                precision: 0,
                units: "steps".into(),
                description: String::new(),
            });
        let v = meta.to_value();
        assert_eq!(v.typeid(), Some(NUMBER_META));
        let keys: Vec<_> = v.as_map().unwrap().keys().cloned().collect();
        assert_eq!(
            keys,
            vec!["typeid", "dtype", "description", "tags", "writeable", "label", "display"]
        );
        let back = VMeta::from_value(&v).unwrap();
        assert_eq!(back, meta);
        assert_eq!(back.to_value(), v);
    }

    #[test]
    fn attribute_typeids() {
        assert_eq!(VMeta::boolean("").attribute_typeid(), NT_SCALAR);
        assert_eq!(VMeta::string_array("").attribute_typeid(), NT_SCALAR_ARRAY);
        assert_eq!(VMeta::table("", Vec::<(String, VMeta)>::new()).attribute_typeid(), NT_TABLE);
        assert_eq!(VMeta::union("", vec![]).attribute_typeid(), NT_UNION);
    }
}
