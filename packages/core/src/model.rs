//! Block, Attribute and Method models.
//!
//! Models own typed state. Every mutator returns the [`Change`]s it made,
//! with paths relative to the model, so the owner can feed them to the
//! Notifier inside one squashed batch.

use indexmap::IndexMap;

use crate::alarm::{Alarm, TimeStamp};
use crate::meta::{BlockMeta, MethodMeta, VMeta, NT_TABLE};
use crate::value::Map;
use crate::{camel_to_title, Error, Result, Value};

/// One entry of a change set: a path and its new value, or a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct Change {
    pub path: Vec<String>,
    pub value: Option<Value>,
}

impl Change {
    pub fn set<S: Into<String>>(path: impl IntoIterator<Item = S>, value: Value) -> Self {
        Change {
            path: path.into_iter().map(Into::into).collect(),
            value: Some(value),
        }
    }

    pub fn delete<S: Into<String>>(path: impl IntoIterator<Item = S>) -> Self {
        Change {
            path: path.into_iter().map(Into::into).collect(),
            value: None,
        }
    }

    /// Prefix the path, turning a model-relative change into a parent one.
    #[must_use]
    pub fn under(mut self, prefix: &[String]) -> Self {
        let mut path = prefix.to_vec();
        path.append(&mut self.path);
        self.path = path;
        self
    }

    /// `[path, value]` or `[path]` for a delete.
    pub fn to_value(&self) -> Value {
        let path = Value::Array(self.path.iter().map(Value::from).collect());
        match &self.value {
            Some(v) => Value::Array(vec![path, v.clone()]),
            None => Value::Array(vec![path]),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let items = value
            .as_array()
            .filter(|a| !a.is_empty() && a.len() <= 2)
            .ok_or_else(|| Error::Validation(format!("bad change {}", value)))?;
        let path = items[0]
            .as_array()
            .ok_or_else(|| Error::Validation(format!("bad change path {}", items[0])))?
            .iter()
            .map(|p| p.as_str().map(str::to_string))
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| Error::Validation(format!("bad change path {}", items[0])))?;
        Ok(Change {
            path,
            value: items.get(1).cloned(),
        })
    }
}

/// A typed value with alarm and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeModel {
    pub meta: VMeta,
    pub value: Value,
    pub alarm: Alarm,
    pub timestamp: TimeStamp,
}

impl AttributeModel {
    /// Typeid of the attribute model, taken from its meta.
    pub fn typeid(&self) -> &'static str {
        self.meta.attribute_typeid()
    }

    /// Set the value, returning the changes made.
    ///
    /// With `set_alarm_ts` the alarm is replaced (emitted only if it differs)
    /// and the timestamp is refreshed.
    pub fn set_value(
        &mut self,
        value: &Value,
        set_alarm_ts: bool,
        alarm: Option<Alarm>,
    ) -> Result<Vec<Change>> {
        let value = self.meta.validate(value)?;
        let mut changes = vec![Change::set(["value"], value.clone())];
        self.value = value;
        if set_alarm_ts {
            changes.extend(self.set_alarm(alarm.unwrap_or_default()));
            changes.extend(self.set_timestamp(TimeStamp::now()));
        }
        Ok(changes)
    }

    pub fn set_alarm(&mut self, alarm: Alarm) -> Vec<Change> {
        if alarm == self.alarm {
            return Vec::new();
        }
        self.alarm = alarm;
        vec![Change::set(["alarm"], self.alarm.to_value())]
    }

    pub fn set_timestamp(&mut self, timestamp: TimeStamp) -> Vec<Change> {
        self.timestamp = timestamp;
        vec![Change::set(["timeStamp"], timestamp.to_value())]
    }

    pub fn set_writeable(&mut self, writeable: bool) -> Vec<Change> {
        if self.meta.base.writeable == writeable {
            return Vec::new();
        }
        self.meta.base.writeable = writeable;
        vec![Change::set(["meta", "writeable"], Value::Bool(writeable))]
    }

    pub fn set_label(&mut self, label: &str) -> Vec<Change> {
        self.meta.base.label = label.to_string();
        vec![Change::set(["meta", "label"], Value::from(label))]
    }

    pub fn set_description(&mut self, description: &str) -> Vec<Change> {
        self.meta.base.description = description.to_string();
        vec![Change::set(["meta", "description"], Value::from(description))]
    }

    pub fn set_tags(&mut self, tags: Vec<String>) -> Vec<Change> {
        let v = Value::Array(tags.iter().map(Value::from).collect());
        self.meta.base.tags = tags;
        vec![Change::set(["meta", "tags"], v)]
    }

    fn labels(&self) -> Option<Value> {
        if let crate::meta::MetaKind::Table { elements } = &self.meta.kind {
            let labels = elements
                .iter()
                .map(|(name, meta)| {
                    if meta.base.label.is_empty() {
                        Value::from(camel_to_title(name))
                    } else {
                        Value::from(meta.base.label.as_str())
                    }
                })
                .collect();
            Some(Value::Array(labels))
        } else {
            None
        }
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(self.typeid()));
        if let Some(labels) = self.labels() {
            map.insert("labels".into(), labels);
        }
        map.insert("value".into(), self.value.clone());
        map.insert("alarm".into(), self.alarm.to_value());
        map.insert("timeStamp".into(), self.timestamp.to_value());
        map.insert("meta".into(), self.meta.to_value());
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let meta = VMeta::from_value(
            value
                .field("meta")
                .ok_or_else(|| Error::Validation(format!("attribute without meta: {}", value)))?,
        )?;
        let mut attr = meta.create_attribute_model(value.field("value").cloned())?;
        if let Some(alarm) = value.field("alarm") {
            attr.alarm = Alarm::from_value(alarm)?;
        }
        if let Some(ts) = value.field("timeStamp") {
            attr.timestamp = TimeStamp::from_value(ts)?;
        }
        Ok(attr)
    }
}

impl VMeta {
    /// Make an attribute holding `initial` (or the meta default).
    pub fn create_attribute_model(&self, initial: Option<Value>) -> Result<AttributeModel> {
        let value = match initial {
            Some(v) => self.validate(&v)?,
            None => self.default_value(),
        };
        Ok(AttributeModel {
            meta: self.clone(),
            value,
            alarm: Alarm::ok(),
            timestamp: TimeStamp::now(),
        })
    }
}

/// Record of a method call's arguments or results.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MethodLog {
    pub value: Map,
    pub present: Vec<String>,
    pub alarm: Alarm,
    pub timestamp: TimeStamp,
}

impl MethodLog {
    pub const TYPEID: &'static str = "malcolm:core/MethodLog:1.0";

    pub fn new(value: Map, present: Vec<String>, alarm: Alarm) -> Self {
        MethodLog {
            value,
            present,
            alarm,
            timestamp: TimeStamp::now(),
        }
    }

    pub fn to_value(&self) -> Value {
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("value", Value::Map(self.value.clone())),
            (
                "present",
                Value::Array(self.present.iter().map(Value::from).collect()),
            ),
            ("alarm", self.alarm.to_value()),
            ("timeStamp", self.timestamp.to_value()),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(MethodLog {
            value: value
                .field("value")
                .and_then(Value::as_map)
                .cloned()
                .unwrap_or_default(),
            present: crate::meta::string_list(value.field("present")),
            alarm: value
                .field("alarm")
                .map(Alarm::from_value)
                .transpose()?
                .unwrap_or_default(),
            timestamp: value
                .field("timeStamp")
                .map(TimeStamp::from_value)
                .transpose()?
                .unwrap_or_default(),
        })
    }
}

/// A callable endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodModel {
    pub meta: MethodMeta,
    pub took: MethodLog,
    pub returned: MethodLog,
}

impl MethodModel {
    pub const TYPEID: &'static str = "malcolm:core/Method:1.1";

    pub fn new(meta: MethodMeta) -> Self {
        MethodModel {
            meta,
            took: MethodLog::default(),
            returned: MethodLog::default(),
        }
    }

    pub fn set_took(&mut self, took: MethodLog) -> Vec<Change> {
        self.took = took;
        vec![Change::set(["took"], self.took.to_value())]
    }

    pub fn set_returned(&mut self, returned: MethodLog) -> Vec<Change> {
        self.returned = returned;
        vec![Change::set(["returned"], self.returned.to_value())]
    }

    pub fn set_writeable(&mut self, writeable: bool) -> Vec<Change> {
        if self.meta.base.writeable == writeable {
            return Vec::new();
        }
        self.meta.base.writeable = writeable;
        vec![Change::set(["meta", "writeable"], Value::Bool(writeable))]
    }

    pub fn to_value(&self) -> Value {
        Value::from([
            ("typeid", Value::from(Self::TYPEID)),
            ("took", self.took.to_value()),
            ("returned", self.returned.to_value()),
            ("meta", self.meta.to_value()),
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let meta = MethodMeta::from_value(
            value
                .field("meta")
                .ok_or_else(|| Error::Validation(format!("method without meta: {}", value)))?,
        )?;
        let log = |name: &str| {
            value
                .field(name)
                .map(MethodLog::from_value)
                .transpose()
                .map(Option::unwrap_or_default)
        };
        Ok(MethodModel {
            meta,
            took: log("took")?,
            returned: log("returned")?,
        })
    }
}

/// A block endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Endpoint {
    Attribute(AttributeModel),
    Method(MethodModel),
}

impl Endpoint {
    pub fn to_value(&self) -> Value {
        match self {
            Endpoint::Attribute(a) => a.to_value(),
            Endpoint::Method(m) => m.to_value(),
        }
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        match value.typeid() {
            Some(MethodModel::TYPEID) => Ok(Endpoint::Method(MethodModel::from_value(value)?)),
            Some(t) if t.starts_with("epics:nt/") => {
                Ok(Endpoint::Attribute(AttributeModel::from_value(value)?))
            }
            other => Err(Error::Validation(format!(
                "{:?} is not an endpoint typeid",
                other
            ))),
        }
    }

    pub fn set_writeable(&mut self, writeable: bool) -> Vec<Change> {
        match self {
            Endpoint::Attribute(a) => a.set_writeable(writeable),
            Endpoint::Method(m) => m.set_writeable(writeable),
        }
    }

    pub fn writeable(&self) -> bool {
        match self {
            Endpoint::Attribute(a) => a.meta.base.writeable,
            Endpoint::Method(m) => m.meta.base.writeable,
        }
    }
}

impl From<AttributeModel> for Endpoint {
    fn from(a: AttributeModel) -> Self {
        Endpoint::Attribute(a)
    }
}

impl From<MethodModel> for Endpoint {
    fn from(m: MethodModel) -> Self {
        Endpoint::Method(m)
    }
}

/// The model of a whole block: `meta` then the endpoints in insertion order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BlockModel {
    pub meta: BlockMeta,
    pub endpoints: IndexMap<String, Endpoint>,
}

impl BlockModel {
    pub const TYPEID: &'static str = "malcolm:core/Block:1.0";

    pub fn new(description: impl Into<String>) -> Self {
        BlockModel {
            meta: BlockMeta::new(description),
            endpoints: IndexMap::new(),
        }
    }

    /// Insert or replace an endpoint. A new name is appended to
    /// `meta.fields` in the same change set.
    pub fn set_endpoint(&mut self, name: &str, endpoint: Endpoint) -> Vec<Change> {
        let mut changes = vec![Change::set([name], endpoint.to_value())];
        self.endpoints.insert(name.to_string(), endpoint);
        if !self.meta.fields.iter().any(|f| f == name) {
            self.meta.fields.push(name.to_string());
            changes.push(Change::set(["meta", "fields"], self.meta.fields_value()));
        }
        changes
    }

    pub fn remove_endpoint(&mut self, name: &str) -> Result<Vec<Change>> {
        if self.endpoints.shift_remove(name).is_none() {
            return Err(Error::Field(format!("no endpoint '{}'", name)));
        }
        self.meta.fields.retain(|f| f != name);
        Ok(vec![
            Change::delete([name]),
            Change::set(["meta", "fields"], self.meta.fields_value()),
        ])
    }

    pub fn set_label(&mut self, label: &str) -> Vec<Change> {
        self.meta.base.label = label.to_string();
        vec![Change::set(["meta", "label"], Value::from(label))]
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeModel> {
        match self.endpoints.get(name) {
            Some(Endpoint::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn attribute_mut(&mut self, name: &str) -> Option<&mut AttributeModel> {
        match self.endpoints.get_mut(name) {
            Some(Endpoint::Attribute(a)) => Some(a),
            _ => None,
        }
    }

    pub fn method(&self, name: &str) -> Option<&MethodModel> {
        match self.endpoints.get(name) {
            Some(Endpoint::Method(m)) => Some(m),
            _ => None,
        }
    }

    pub fn method_mut(&mut self, name: &str) -> Option<&mut MethodModel> {
        match self.endpoints.get_mut(name) {
            Some(Endpoint::Method(m)) => Some(m),
            _ => None,
        }
    }

    /// Serialized subtree at a block-relative path.
    pub fn get(&self, path: &[String]) -> Result<Value> {
        let Some((first, rest)) = path.split_first() else {
            return Ok(self.to_value());
        };
        let root = if first == "meta" {
            self.meta.to_value()
        } else {
            self.endpoints
                .get(first)
                .map(Endpoint::to_value)
                .ok_or_else(|| Error::Field(format!("no endpoint '{}'", first)))?
        };
        root.get(rest)
            .cloned()
            .ok_or_else(|| Error::Field(format!("no path '{}'", path.join("."))))
    }

    pub fn to_value(&self) -> Value {
        let mut map = Map::new();
        map.insert("typeid".into(), Value::from(Self::TYPEID));
        map.insert("meta".into(), self.meta.to_value());
        for (name, endpoint) in &self.endpoints {
            map.insert(name.clone(), endpoint.to_value());
        }
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value
            .as_map()
            .ok_or_else(|| Error::Validation(format!("expected a block, got {}", value)))?;
        let mut block = BlockModel::default();
        for (name, v) in map {
            match name.as_str() {
                "typeid" => {}
                "meta" => block.meta = BlockMeta::from_value(v)?,
                _ => {
                    block.endpoints.insert(name.clone(), Endpoint::from_value(v)?);
                }
            }
        }
        Ok(block)
    }

    /// True if the value at `path` is an NTTable attribute.
    pub fn is_table(&self, name: &str) -> bool {
        self.attribute(name).map(|a| a.typeid() == NT_TABLE).unwrap_or(false)
    }
}
