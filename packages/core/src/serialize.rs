//! Typeid registry: turn any serialized model back into its typed form.

use std::collections::HashMap;

use lazy_static::lazy_static;

use crate::alarm::{Alarm, TimeStamp};
use crate::generator::CompoundGenerator;
use crate::meta::{self, BlockMeta, Display, MapMeta, MethodMeta, VMeta};
use crate::model::{AttributeModel, BlockModel, MethodLog, MethodModel};
use crate::request::{self, Callback, Request, Response};
use crate::{Error, Result, Value};

/// Any object with a registered typeid.
#[derive(Debug, Clone, PartialEq)]
pub enum Object {
    Meta(VMeta),
    MapMeta(MapMeta),
    MethodMeta(MethodMeta),
    BlockMeta(BlockMeta),
    Attribute(AttributeModel),
    Method(MethodModel),
    MethodLog(MethodLog),
    Block(BlockModel),
    Alarm(Alarm),
    TimeStamp(TimeStamp),
    Display(Display),
    Generator(CompoundGenerator),
    /// Deserialized requests get a callback that drops responses.
    Request(Request),
    Response(Response),
}

impl Object {
    pub fn to_value(&self) -> Value {
        match self {
            Object::Meta(m) => m.to_value(),
            Object::MapMeta(m) => m.to_value(),
            Object::MethodMeta(m) => m.to_value(),
            Object::BlockMeta(m) => m.to_value(),
            Object::Attribute(a) => a.to_value(),
            Object::Method(m) => m.to_value(),
            Object::MethodLog(l) => l.to_value(),
            Object::Block(b) => b.to_value(),
            Object::Alarm(a) => a.to_value(),
            Object::TimeStamp(t) => t.to_value(),
            Object::Display(d) => d.to_value(),
            Object::Generator(g) => g.to_value(),
            Object::Request(r) => r.to_value(),
            Object::Response(r) => r.to_value(),
        }
    }
}

type Constructor = fn(&Value) -> Result<Object>;

fn vmeta(v: &Value) -> Result<Object> {
    VMeta::from_value(v).map(Object::Meta)
}

fn attribute(v: &Value) -> Result<Object> {
    AttributeModel::from_value(v).map(Object::Attribute)
}

fn request(v: &Value) -> Result<Object> {
    Request::from_value(v, Callback::noop()).map(Object::Request)
}

fn response(v: &Value) -> Result<Object> {
    Response::from_value(v).map(Object::Response)
}

lazy_static! {
    static ref REGISTRY: HashMap<&'static str, Constructor> = {
        let mut m: HashMap<&'static str, Constructor> = HashMap::new();
        for typeid in [
            meta::BOOLEAN_META,
            meta::CHOICE_META,
            meta::NUMBER_META,
            meta::STRING_META,
            meta::BOOLEAN_ARRAY_META,
            meta::CHOICE_ARRAY_META,
            meta::NUMBER_ARRAY_META,
            meta::STRING_ARRAY_META,
            meta::TABLE_META,
            meta::UNION_META,
            meta::POINT_GENERATOR_META,
        ] {
            m.insert(typeid, vmeta);
        }
        for typeid in [meta::NT_SCALAR, meta::NT_SCALAR_ARRAY, meta::NT_TABLE, meta::NT_UNION] {
            m.insert(typeid, attribute);
        }
        for typeid in [
            request::GET,
            request::PUT,
            request::POST,
            request::SUBSCRIBE,
            request::UNSUBSCRIBE,
        ] {
            m.insert(typeid, request);
        }
        for typeid in [request::RETURN, request::ERROR, request::UPDATE, request::DELTA] {
            m.insert(typeid, response);
        }
        m.insert(MapMeta::TYPEID, |v| MapMeta::from_value(v).map(Object::MapMeta));
        m.insert(MethodMeta::TYPEID, |v| {
            MethodMeta::from_value(v).map(Object::MethodMeta)
        });
        m.insert(BlockMeta::TYPEID, |v| BlockMeta::from_value(v).map(Object::BlockMeta));
        m.insert(MethodModel::TYPEID, |v| MethodModel::from_value(v).map(Object::Method));
        m.insert(MethodLog::TYPEID, |v| MethodLog::from_value(v).map(Object::MethodLog));
        m.insert(BlockModel::TYPEID, |v| BlockModel::from_value(v).map(Object::Block));
        m.insert(Alarm::TYPEID, |v| Alarm::from_value(v).map(Object::Alarm));
        m.insert(TimeStamp::TYPEID, |v| TimeStamp::from_value(v).map(Object::TimeStamp));
        m.insert(Display::TYPEID, |v| Ok(Object::Display(Display::from_value(v))));
        m.insert(CompoundGenerator::TYPEID, |v| {
            CompoundGenerator::from_value(v).map(Object::Generator)
        });
        m
    };
}

/// Construct the typed object a serialized value describes.
pub fn deserialize_object(value: &Value) -> Result<Object> {
    let typeid = value
        .typeid()
        .ok_or_else(|| Error::Validation(format!("no typeid in {}", value)))?;
    let constructor = REGISTRY
        .get(typeid)
        .ok_or_else(|| Error::Validation(format!("unknown typeid '{}'", typeid)))?;
    constructor(value)
}

/// Every typeid the registry knows.
pub fn registered_typeids() -> Vec<&'static str> {
    let mut ids: Vec<_> = REGISTRY.keys().copied().collect();
    ids.sort_unstable();
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generator::Dimension;
    use crate::meta::NumberType;
    use crate::model::Change;

    fn roundtrip(v: Value) {
        let obj = deserialize_object(&v).unwrap();
        assert_eq!(obj.to_value(), v);
    }

    #[test]
    fn models_roundtrip() {
        roundtrip(VMeta::choice("c", ["a", "b"]).writeable(true).to_value());
        roundtrip(
            VMeta::number(NumberType::Int16, "n")
                .create_attribute_model(Some(Value::from(4)))
                .unwrap()
                .to_value(),
        );
        let method = MethodModel::new(
            MethodMeta::new("greet").arg("name", VMeta::string("Name")),
        );
        roundtrip(method.to_value());
        let mut block = BlockModel::new("blk");
        block.set_endpoint("greet", method.into());
        roundtrip(block.to_value());
        roundtrip(Alarm::major("x").to_value());
        roundtrip(
            CompoundGenerator::new(vec![Dimension::new(["x"], 3)], 0.5).to_value(),
        );
    }

    #[test]
    fn messages_roundtrip() {
        roundtrip(
            Response::Delta {
                id: 2,
                changes: vec![Change::set(["a"], Value::from(1))],
            }
            .to_value(),
        );
        roundtrip(
            Request::subscribe(3, crate::path!("blk.a"), true, Callback::noop()).to_value(),
        );
    }

    #[test]
    fn unknown_typeid_rejected() {
        assert!(deserialize_object(&Value::from([("typeid", "foo:bar/Baz:1.0")])).is_err());
        assert!(deserialize_object(&Value::map()).is_err());
        assert!(registered_typeids().contains(&"malcolm:core/Block:1.0"));
    }
}
