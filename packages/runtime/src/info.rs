//! Typed reports from Parts to their Controller.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use malcolm_core::tags::{PortDirection, PortTag};
use malcolm_core::{Alarm, AttributeModel, Map, VMeta, Value};

use crate::{Error, Result};

/// Sets the block label.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelInfo {
    pub label: String,
}

/// A Part's health; `None` clears it.
#[derive(Debug, Clone, PartialEq)]
pub struct HealthInfo {
    pub alarm: Option<Alarm>,
}

/// A child MRI that should not be published.
#[derive(Debug, Clone, PartialEq)]
pub struct UnpublishedInfo {
    pub mri: String,
}

/// Returned from Validate to change a configure parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterTweakInfo {
    pub parameter: String,
    pub value: Value,
}

/// Extra configure parameters a Part takes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConfigureParamsInfo {
    pub metas: IndexMap<String, VMeta>,
    pub required: Vec<String>,
    pub defaults: Map,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunProgressInfo {
    pub steps: usize,
}

/// What a child block offers for export.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PartExportableInfo {
    pub mri: String,
    pub names: Vec<String>,
    pub ports: Vec<PortInfo>,
}

/// A part's place in the layout.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutInfo {
    pub name: String,
    pub mri: String,
    pub x: f64,
    pub y: f64,
    pub visible: bool,
}

/// A port declared by a tagged attribute.
#[derive(Debug, Clone, PartialEq)]
pub struct PortInfo {
    /// Attribute carrying the port tag.
    pub name: String,
    pub direction: PortDirection,
    pub port_type: String,
    /// Disconnected value for an inport, advertised value for an outport.
    pub value: String,
    /// The attribute's current value.
    pub current: String,
}

impl PortInfo {
    pub fn from_attribute(name: &str, attr: &AttributeModel) -> Option<PortInfo> {
        let tag = PortTag::find(&attr.meta.base.tags)?;
        Some(PortInfo {
            name: name.to_string(),
            direction: tag.direction,
            port_type: tag.port_type,
            value: tag.value,
            current: attr.value.as_str().unwrap_or_default().to_string(),
        })
    }

    /// An inport currently connected to something.
    pub fn is_connected_inport(&self) -> bool {
        self.direction == PortDirection::In && self.current != self.value
    }
}

/// A typed report.
#[derive(Debug, Clone, PartialEq)]
pub enum Info {
    Label(LabelInfo),
    Health(HealthInfo),
    Unpublished(UnpublishedInfo),
    ParameterTweak(ParameterTweakInfo),
    ConfigureParams(ConfigureParamsInfo),
    RunProgress(RunProgressInfo),
    PartExportable(PartExportableInfo),
    Layout(LayoutInfo),
    Port(PortInfo),
    /// Anything a Part and its Controller agree on.
    Custom { kind: String, value: Value },
}

/// Discriminant of an [`Info`], used to key handlers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum InfoKind {
    Label,
    Health,
    Unpublished,
    ParameterTweak,
    ConfigureParams,
    RunProgress,
    PartExportable,
    Layout,
    Port,
    Custom(String),
}

impl fmt::Display for InfoKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InfoKind::Custom(kind) => write!(f, "{}", kind),
            other => write!(f, "{:?}Info", other),
        }
    }
}

impl Info {
    pub fn kind(&self) -> InfoKind {
        match self {
            Info::Label(_) => InfoKind::Label,
            Info::Health(_) => InfoKind::Health,
            Info::Unpublished(_) => InfoKind::Unpublished,
            Info::ParameterTweak(_) => InfoKind::ParameterTweak,
            Info::ConfigureParams(_) => InfoKind::ConfigureParams,
            Info::RunProgress(_) => InfoKind::RunProgress,
            Info::PartExportable(_) => InfoKind::PartExportable,
            Info::Layout(_) => InfoKind::Layout,
            Info::Port(_) => InfoKind::Port,
            Info::Custom { kind, .. } => InfoKind::Custom(kind.clone()),
        }
    }
}

/// Infos grouped by the part that produced them, in part order.
pub type PartInfo = IndexMap<String, Vec<Info>>;

/// Pick out one kind of info from every part.
pub fn filter_values<T>(part_info: &PartInfo, pick: impl Fn(&Info) -> Option<T>) -> Vec<T> {
    part_info.values().flatten().filter_map(pick).collect()
}

/// As [`filter_values`] but keeping the part names.
pub fn filter_parts<T>(
    part_info: &PartInfo,
    pick: impl Fn(&Info) -> Option<T>,
) -> IndexMap<String, Vec<T>> {
    part_info
        .iter()
        .map(|(name, infos)| (name.clone(), infos.iter().filter_map(&pick).collect()))
        .collect()
}

pub type InfoHandler = Arc<dyn Fn(&str, &Info) -> Result<()> + Send + Sync>;

/// Routes reports to the handler registered for their kind.
#[derive(Default)]
pub struct InfoRegistry {
    handlers: HashMap<InfoKind, InfoHandler>,
}

impl InfoRegistry {
    pub fn register(&mut self, kind: InfoKind, handler: InfoHandler) {
        self.handlers.insert(kind, handler);
    }

    pub fn handler(&self, kind: &InfoKind) -> Result<InfoHandler> {
        self.handlers
            .get(kind)
            .cloned()
            .ok_or_else(|| Error::Unexpected(format!("no handler registered for {}", kind)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn unregistered_kind_is_unexpected() {
        let mut registry = InfoRegistry::default();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        registry.register(
            InfoKind::Label,
            Arc::new(move |part, info| {
                sink.lock().unwrap().push((part.to_string(), info.clone()));
                Ok(())
            }),
        );
        let label = Info::Label(LabelInfo {
            label: "Det".into(),
        });
        registry.handler(&label.kind()).unwrap()("det", &label).unwrap();
        assert_eq!(seen.lock().unwrap().len(), 1);

        let err = registry
            .handler(&InfoKind::Custom("MotorInfo".into()))
            .err()
            .unwrap();
        assert_eq!(err, Error::Unexpected("no handler registered for MotorInfo".into()));
    }

    #[test]
    fn port_from_tagged_attribute() {
        let meta = VMeta::string("in").with_tag(PortTag::inport("block", "ZERO"));
        let attr = meta.create_attribute_model(Some(Value::from("PCOMP1.OUT"))).unwrap();
        let port = PortInfo::from_attribute("inp", &attr).unwrap();
        assert_eq!(port.direction, PortDirection::In);
        assert_eq!(port.value, "ZERO");
        assert!(port.is_connected_inport());
        let plain = VMeta::string("x").create_attribute_model(None).unwrap();
        assert!(PortInfo::from_attribute("x", &plain).is_none());
    }

    #[test]
    fn filter_by_kind() {
        let mut part_info = PartInfo::new();
        part_info.insert(
            "a".into(),
            vec![
                Info::RunProgress(RunProgressInfo { steps: 3 }),
                Info::Unpublished(UnpublishedInfo { mri: "A".into() }),
            ],
        );
        part_info.insert("b".into(), vec![]);
        let mris = filter_values(&part_info, |i| match i {
            Info::Unpublished(u) => Some(u.mri.clone()),
            _ => None,
        });
        assert_eq!(mris, vec!["A"]);
        let by_part = filter_parts(&part_info, |i| match i {
            Info::RunProgress(p) => Some(p.steps),
            _ => None,
        });
        assert_eq!(by_part["a"], vec![3]);
        assert!(by_part["b"].is_empty());
    }
}
