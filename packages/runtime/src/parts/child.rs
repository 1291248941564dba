//! A Part standing for a child block on its parent.

use std::sync::{Arc, Mutex};

use indexmap::IndexSet;
use malcolm_core::tags::{get_config_tag, PortDirection};
use malcolm_core::{BlockModel, Endpoint, Map, Value};
use tracing::debug;

use crate::context::Context;
use crate::hook::{hook_fn, HookArgs, HookKind, HookReturn};
use crate::info::{Info, LayoutInfo, PartExportableInfo, PortInfo, UnpublishedInfo};
use crate::lock;
use crate::part::{Part, PartRegistrar};
use crate::statesets::{DISABLED, READY};
use crate::{Error, Result};

/// Fields every stateful block has, never offered for export.
const STATE_FIELDS: [&str; 5] = ["health", "state", "status", "busy", "disable"];

#[derive(Debug, Clone, Copy)]
struct Position {
    x: f64,
    y: f64,
    visible: bool,
}

/// Represents `mri` on its parent: hides it from publication, resets it
/// with the parent, offers its fields for export, places it in the layout
/// and saves its config-tagged attributes with the parent's design.
pub struct ChildPart {
    name: String,
    mri: String,
    position: Mutex<Position>,
}

impl ChildPart {
    pub fn new(name: &str, mri: &str) -> Self {
        ChildPart {
            name: name.to_string(),
            mri: mri.to_string(),
            position: Mutex::new(Position {
                x: 0.0,
                y: 0.0,
                visible: true,
            }),
        }
    }

    /// Start hidden from the layout.
    pub fn hidden(self) -> Self {
        lock(&self.position).visible = false;
        self
    }

    pub fn mri(&self) -> &str {
        &self.mri
    }

    fn model(&self, ctx: &Context) -> Result<BlockModel> {
        let child = ctx.process().get_controller(&self.mri)?;
        Ok(child.block().read(|m| m.clone()))
    }

    /// Reset the child once it is idle, if it allows it. A Disabled child
    /// is left to its own ProcessStart.
    pub(crate) async fn reset_child(&self, ctx: &mut Context) -> Result<()> {
        let mut child = ctx.block_view(&self.mri).await?;
        if !child.fields().iter().any(|f| f == "reset") {
            return Ok(());
        }
        child.when_value_matches("busy", false, None, None).await?;
        let state = child.get("state").await?;
        if matches!(state.as_str(), Some(READY) | Some(DISABLED)) {
            return Ok(());
        }
        if child.is_writeable("reset").await? {
            debug!(mri = %self.mri, "resetting child");
            child.post("reset", Value::map()).await?;
        }
        Ok(())
    }

    fn exportable(&self, ctx: &Context) -> Result<PartExportableInfo> {
        let model = self.model(ctx)?;
        let names = model
            .endpoints
            .keys()
            .filter(|name| !STATE_FIELDS.contains(&name.as_str()))
            .cloned()
            .collect();
        Ok(PartExportableInfo {
            mri: self.mri.clone(),
            names,
            ports: ports_of(&model),
        })
    }

    /// Take this part's row from the requested layout, sever inports fed
    /// by hidden parts, and report where the child now sits.
    async fn layout(&self, ctx: &mut Context, args: &HookArgs) -> Result<LayoutInfo> {
        let position = {
            let mut position = lock(&self.position);
            if let Some(row) = args.layout.iter().find(|r| r.name == self.name) {
                *position = Position {
                    x: row.x,
                    y: row.y,
                    visible: row.visible,
                };
            }
            *position
        };
        let hidden: IndexSet<&str> = args
            .layout
            .iter()
            .filter(|r| !r.visible)
            .map(|r| r.name.as_str())
            .collect();
        let hidden_outports: IndexSet<String> = args
            .part_info
            .iter()
            .filter(|(part, _)| hidden.contains(part.as_str()) && part.as_str() != self.name)
            .flat_map(|(_, infos)| infos.iter())
            .filter_map(|i| match i {
                Info::Port(p) if p.direction == PortDirection::Out => Some(p.value.clone()),
                _ => None,
            })
            .collect();
        let mine = args.part_info.get(&self.name).cloned().unwrap_or_default();
        for info in mine {
            let Info::Port(port) = info else { continue };
            if !port.is_connected_inport() {
                continue;
            }
            if !position.visible || hidden_outports.contains(&port.current) {
                debug!(mri = %self.mri, port = %port.name, "severing inport");
                ctx.put([self.mri.as_str(), port.name.as_str()], port.value.clone(), None)
                    .await?;
            }
        }
        Ok(LayoutInfo {
            name: self.name.clone(),
            mri: self.mri.clone(),
            x: position.x,
            y: position.y,
            visible: position.visible,
        })
    }

    /// `{attribute: value}` for every config-tagged attribute.
    fn save(&self, ctx: &Context) -> Result<Value> {
        let model = self.model(ctx)?;
        let structure: Map = config_attributes(&model)
            .into_iter()
            .map(|(name, value, _)| (name, value))
            .collect();
        Ok(Value::Map(structure))
    }

    /// Put saved values back, lowest config iteration first. Unknown
    /// attributes are skipped.
    async fn load(&self, ctx: &mut Context, structure: &Value) -> Result<()> {
        let Some(saved) = structure.as_map() else {
            return Err(Error::Validation(format!(
                "saved structure for {} is not an object",
                self.name
            )));
        };
        let model = self.model(ctx)?;
        let mut known = config_attributes(&model);
        known.sort_by_key(|(_, _, iteration)| *iteration);
        for (name, current, _) in known {
            let Some(value) = saved.get(&name) else { continue };
            if *value != current {
                ctx.put([self.mri.as_str(), name.as_str()], value.clone(), None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Everything but Init and Reset, which the wrapping part owns.
    pub(crate) fn setup_child(
        self: &Arc<Self>,
        registrar: &mut PartRegistrar<'_>,
    ) -> Result<()> {
        registrar.report(Info::Unpublished(UnpublishedInfo {
            mri: self.mri.clone(),
        }))?;

        let this = self.clone();
        registrar.hook(
            &[HookKind::ReportExportable],
            hook_fn(move |call| {
                let this = this.clone();
                async move {
                    let info = this.exportable(&call.context)?;
                    Ok(HookReturn::Infos(vec![Info::PartExportable(info)]))
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::ReportPorts],
            hook_fn(move |call| {
                let this = this.clone();
                async move {
                    let model = this.model(&call.context)?;
                    Ok(HookReturn::Infos(
                        ports_of(&model).into_iter().map(Info::Port).collect(),
                    ))
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Layout],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    let info = this.layout(&mut call.context, &call.args).await?;
                    Ok(HookReturn::Infos(vec![Info::Layout(info)]))
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Save],
            hook_fn(move |call| {
                let this = this.clone();
                async move { Ok(HookReturn::Structure(this.save(&call.context)?)) }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Load],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.load(&mut call.context, &call.args.structure).await?;
                    Ok(HookReturn::None)
                }
            }),
        )
    }
}

impl Part for ChildPart {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        self.setup_child(registrar)?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Init, HookKind::Reset],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.reset_child(&mut call.context).await?;
                    Ok(HookReturn::None)
                }
            }),
        )
    }
}

fn ports_of(model: &BlockModel) -> Vec<PortInfo> {
    model
        .endpoints
        .iter()
        .filter_map(|(name, endpoint)| match endpoint {
            Endpoint::Attribute(attr) => PortInfo::from_attribute(name, attr),
            Endpoint::Method(_) => None,
        })
        .collect()
}

fn config_attributes(model: &BlockModel) -> Vec<(String, Value, u32)> {
    model
        .endpoints
        .iter()
        .filter_map(|(name, endpoint)| match endpoint {
            Endpoint::Attribute(attr) => get_config_tag(&attr.meta.base.tags)
                .map(|iteration| (name.clone(), attr.value.clone(), iteration)),
            Endpoint::Method(_) => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use malcolm_core::tags::{config_tag, PortTag};
    use malcolm_core::VMeta;

    fn model() -> BlockModel {
        let mut model = BlockModel::new("child");
        let port = VMeta::string("input")
            .with_tag(PortTag::inport("bool", "ZERO"))
            .create_attribute_model(Some(Value::from("PULSE.OUT")))
            .unwrap();
        model.set_endpoint("inp", port.into());
        let saved = VMeta::string("saved")
            .with_tag(config_tag(2))
            .create_attribute_model(Some(Value::from("kept")))
            .unwrap();
        model.set_endpoint("exposure", saved.into());
        let first = VMeta::string("first")
            .with_tag(config_tag(1))
            .create_attribute_model(None)
            .unwrap();
        model.set_endpoint("mode", first.into());
        model
    }

    #[test]
    fn ports_come_from_tags() {
        let ports = ports_of(&model());
        assert_eq!(ports.len(), 1);
        assert_eq!(ports[0].name, "inp");
        assert!(ports[0].is_connected_inport());
    }

    #[test]
    fn config_attributes_carry_their_iteration() {
        let attrs = config_attributes(&model());
        let names: Vec<_> = attrs.iter().map(|(n, _, i)| (n.as_str(), *i)).collect();
        assert_eq!(names, vec![("exposure", 2), ("mode", 1)]);
        assert_eq!(attrs[0].1, Value::from("kept"));
    }
}
