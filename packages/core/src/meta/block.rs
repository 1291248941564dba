use super::{string_list, MetaBase};
use crate::value::Map;
use crate::{Result, Value};

/// Meta of a whole block; `fields` mirrors the endpoint order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockMeta {
    pub base: MetaBase,
    pub fields: Vec<String>,
}

impl BlockMeta {
    pub const TYPEID: &'static str = "malcolm:core/BlockMeta:1.0";

    pub fn new(description: impl Into<String>) -> Self {
        BlockMeta {
            base: MetaBase::new(description),
            fields: Vec::new(),
        }
    }

    pub fn fields_value(&self) -> Value {
        Value::Array(self.fields.iter().map(Value::from).collect())
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(Self::TYPEID));
        self.base.write_into(&mut map);
        map.insert("fields".into(), self.fields_value());
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(BlockMeta {
            base: MetaBase::from_value(value),
            fields: string_list(value.field("fields")),
        })
    }
}
