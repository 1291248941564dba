//! Conventional meta tags: widgets, config persistence, groups and ports.
//!
//! Tags are plain strings of the form `<kind>:<args>`. Dots are never used
//! inside tag values.

/// UI widget hint, carried as `widget:<name>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Widget {
    TextInput,
    TextUpdate,
    MultiLineTextUpdate,
    Led,
    Combo,
    CheckBox,
    Icon,
    Group,
    Table,
    FlowGraph,
    Tree,
}

impl Widget {
    pub fn name(&self) -> &'static str {
        match self {
            Widget::TextInput => "textinput",
            Widget::TextUpdate => "textupdate",
            Widget::MultiLineTextUpdate => "multilinetextupdate",
            Widget::Led => "led",
            Widget::Combo => "combo",
            Widget::CheckBox => "checkbox",
            Widget::Icon => "icon",
            Widget::Group => "group",
            Widget::Table => "table",
            Widget::FlowGraph => "flowgraph",
            Widget::Tree => "tree",
        }
    }

    pub fn tag(&self) -> String {
        format!("widget:{}", self.name())
    }
}

/// Marks an attribute whose value is saved with a design and restored when
/// the design loads. Lower iterations load first.
pub fn config_tag(iteration: u32) -> String {
    format!("config:{}", iteration)
}

/// The config iteration of a tag list, if it is config-tagged.
pub fn get_config_tag(tags: &[String]) -> Option<u32> {
    tags.iter()
        .find_map(|t| t.strip_prefix("config:").and_then(|n| n.parse().ok()))
}

pub fn group_tag(group: &str) -> String {
    format!("group:{}", group)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortDirection {
    In,
    Out,
}

/// A parsed `inport:<type>:<disconnected>` or `outport:<type>:<connected>`
/// tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortTag {
    pub direction: PortDirection,
    pub port_type: String,
    /// The disconnected value of an inport, or the connected value an
    /// outport advertises.
    pub value: String,
}

impl PortTag {
    pub fn inport(port_type: &str, disconnected: &str) -> String {
        format!("inport:{}:{}", port_type, disconnected)
    }

    pub fn outport(port_type: &str, connected: &str) -> String {
        format!("outport:{}:{}", port_type, connected)
    }

    pub fn parse(tag: &str) -> Option<PortTag> {
        let mut split = tag.splitn(3, ':');
        let direction = match split.next()? {
            "inport" => PortDirection::In,
            "outport" => PortDirection::Out,
            _ => return None,
        };
        let port_type = split.next()?.to_string();
        let value = split.next().unwrap_or_default().to_string();
        Some(PortTag {
            direction,
            port_type,
            value,
        })
    }

    /// The first port tag in a tag list.
    pub fn find(tags: &[String]) -> Option<PortTag> {
        tags.iter().find_map(|t| PortTag::parse(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_tags_parse() {
        let tag = PortTag::outport("NDArray", "BL45P-ML-DET:POS");
        assert_eq!(tag, "outport:NDArray:BL45P-ML-DET:POS");
        let parsed = PortTag::parse(&tag).unwrap();
        assert_eq!(parsed.direction, PortDirection::Out);
        assert_eq!(parsed.port_type, "NDArray");
        assert_eq!(parsed.value, "BL45P-ML-DET:POS");
        let inport = PortTag::parse(&PortTag::inport("bool", "ZERO")).unwrap();
        assert_eq!(inport.direction, PortDirection::In);
        assert!(PortTag::parse("widget:led").is_none());
    }

    #[test]
    fn config_tags() {
        let tags = vec![Widget::TextInput.tag(), config_tag(2)];
        assert_eq!(get_config_tag(&tags), Some(2));
        assert_eq!(get_config_tag(&[group_tag("outputs")]), None);
    }
}
