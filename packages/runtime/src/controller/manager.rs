//! Design management: layout, exported fields, and persistence of the
//! children's configuration as named designs.
//!
//! A design is a JSON file at `{configDir}/{mri}/{design}.json`:
//!
//! ```json
//! {
//!   "layout": {"DET": {"x": 0.0, "y": 0.0, "visible": true}},
//!   "exports": {"DET.exposure": "detExposure"},
//!   "DET": {"exposure": 0.1}
//! }
//! ```

use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use indexmap::IndexMap;
use malcolm_core::meta::table_rows;
use malcolm_core::tags::Widget;
use malcolm_core::{
    validate_field_name, Callback, Endpoint, Map, MethodMeta, NumberType, Path, Request,
    Response, VMeta, Value,
};
use tracing::{debug, warn};

use super::stateful::{try_transition, Lifecycle, StatefulController};
use super::Controller;
use crate::hook::{HookArgs, HookKind, HookReturn};
use crate::info::{filter_parts, filter_values, Info, LayoutInfo, PartExportableInfo};
use crate::lock;
use crate::part::{PostHandler, PutHandler};
use crate::statesets::{
    StateSet, EDITABLE, EDITING, LOADING, READY, REVERTING, SAVING,
};
use crate::{Error, ManagerConfig, Result};

/// An exported field mirrored from a child block.
struct Mirror {
    export: String,
    child: String,
    id: u64,
    callback: Callback,
}

#[derive(Default)]
struct ManagerState {
    /// Structure of the last loaded or saved design.
    saved: Map,
    exportable: IndexMap<String, PartExportableInfo>,
    mirrors: Vec<Mirror>,
    next_id: u64,
}

/// A stateful controller that can edit, save, load and revert designs.
pub struct ManagerController {
    stateful: StatefulController,
    config: ManagerConfig,
    state: Mutex<ManagerState>,
}

#[async_trait]
impl Lifecycle for ManagerController {
    fn stateful(&self) -> &StatefulController {
        &self.stateful
    }

    async fn do_init(&self) -> Result<()> {
        self.manager_init().await
    }
}

impl ManagerController {
    pub fn new(mri: &str, description: &str, config: ManagerConfig) -> Result<Arc<Self>> {
        let this = Self::build(mri, description, config, StateSet::manager())?;
        this.stateful.install_lifecycle(this.clone())?;
        Ok(this)
    }

    /// Build without installing a lifecycle, for controllers that extend
    /// this one.
    pub(crate) fn build(
        mri: &str,
        description: &str,
        config: ManagerConfig,
        state_set: StateSet,
    ) -> Result<Arc<Self>> {
        fs::create_dir_all(&config.config_dir)?;
        let this = Arc::new(ManagerController {
            stateful: StatefulController::new(mri, description, state_set)?,
            config,
            state: Mutex::new(ManagerState::default()),
        });
        this.register_fields()?;
        Ok(this)
    }

    fn register_fields(self: &Arc<Self>) -> Result<()> {
        let controller = self.controller();
        let mut registrar = controller.registrar();

        let weak = Arc::downgrade(self);
        let design = VMeta::choice("Design name to load", self.design_choices())
            .with_tag(Widget::Combo.tag())
            .create_attribute_model(Some(Value::from("")))?;
        registrar.add_attribute_model(
            "design",
            design,
            Some(PutHandler::new(move |value| {
                let weak = weak.clone();
                async move {
                    let this = upgrade(&weak)?;
                    this.load(value.as_str().unwrap_or_default()).await
                }
            })),
        )?;

        let weak = Arc::downgrade(self);
        registrar.add_attribute_model(
            "layout",
            layout_meta().create_attribute_model(None)?,
            Some(PutHandler::new(move |value| {
                let weak = weak.clone();
                async move {
                    let this = upgrade(&weak)?;
                    let rows = table_rows(&value).iter().map(layout_from_row).collect();
                    this.set_layout(rows).await?;
                    this.set_modified(true)
                }
            })),
        )?;

        let weak = Arc::downgrade(self);
        registrar.add_attribute_model(
            "exports",
            exports_meta().create_attribute_model(None)?,
            Some(PutHandler::new(move |value| {
                let weak = weak.clone();
                async move { upgrade(&weak)?.set_exports(value) }
            })),
        )?;

        let modified = VMeta::boolean("Whether the design is modified")
            .with_tag(Widget::Led.tag())
            .create_attribute_model(Some(Value::from(false)))?;
        registrar.add_attribute_model("modified", modified, None)?;

        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "edit",
            MethodMeta::new("Start editing the design").writeable(true),
            PostHandler::new(move |_| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.edit().await?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "save",
            MethodMeta::new("Save the current design")
                .arg_optional("designName", VMeta::string("Name of design to save")),
            PostHandler::new(move |params| {
                let weak = weak.clone();
                async move {
                    let name = params
                        .get("designName")
                        .and_then(Value::as_str)
                        .map(str::to_string);
                    upgrade(&weak)?.save(name.as_deref()).await?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "revert",
            MethodMeta::new("Revert to the last saved design"),
            PostHandler::new(move |_| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.revert().await?;
                    Ok(Value::Null)
                }
            }),
        )?;

        registrar.set_writeable_in("design", &[READY])?;
        registrar.set_writeable_in("layout", &[READY, EDITABLE])?;
        registrar.set_writeable_in("exports", &[EDITABLE])?;
        registrar.set_writeable_in("edit", &[READY])?;
        registrar.set_writeable_in("save", &[EDITABLE])?;
        registrar.set_writeable_in("revert", &[EDITABLE])?;
        Ok(())
    }

    pub fn stateful(&self) -> &StatefulController {
        &self.stateful
    }

    pub fn controller(&self) -> &Controller {
        self.stateful.controller()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    fn lifecycle(&self) -> Result<Arc<dyn Lifecycle>> {
        self.controller()
            .lifecycle()
            .ok_or_else(|| Error::Unexpected(format!("{} has no lifecycle", self.stateful.mri())))
    }

    fn design_dir(&self) -> PathBuf {
        self.config.config_dir.join(self.stateful.mri())
    }

    fn design_path(&self, design: &str) -> PathBuf {
        self.design_dir().join(format!("{}.json", design))
    }

    /// `""` followed by every saved design, sorted.
    pub fn design_choices(&self) -> Vec<String> {
        let mut designs: Vec<String> = fs::read_dir(self.design_dir())
            .into_iter()
            .flatten()
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                match path.extension() {
                    Some(ext) if ext == "json" => path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string),
                    _ => None,
                }
            })
            .collect();
        designs.sort();
        designs.insert(0, String::new());
        designs
    }

    fn refresh_design_choices(&self) -> Result<()> {
        let meta = VMeta::choice("Design name to load", self.design_choices())
            .with_tag(Widget::Combo.tag());
        self.controller()
            .block()
            .changes_squashed(|s| s.set_attribute_meta("design", meta))
    }

    fn set_modified(&self, modified: bool) -> Result<()> {
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("modified", &Value::from(modified), true, None))
            .map(|_| ())
    }

    /// Init hook, layout discovery, then the initial design if any.
    pub(crate) async fn manager_init(&self) -> Result<()> {
        self.stateful.run_phase(HookKind::Init).await?;
        self.refresh_design_choices()?;
        self.set_layout(Vec::new()).await?;
        if !self.config.initial_design.is_empty() {
            let design = self.config.initial_design.clone();
            self.do_load(&design).await?;
        }
        self.attach_exports().await
    }

    /// Run Layout with the requested rows and store what the parts report.
    pub async fn set_layout(&self, requested: Vec<LayoutInfo>) -> Result<()> {
        let ports = self
            .stateful
            .run_hooks(HookKind::ReportPorts, HookArgs::default())
            .await?
            .into_iter()
            .map(|(name, ret)| (name, ret.infos()))
            .collect();
        let args = HookArgs {
            part_info: ports,
            layout: requested,
            ..HookArgs::default()
        };
        let returned = self
            .stateful
            .run_hooks(HookKind::Layout, args)
            .await?
            .into_iter()
            .map(|(name, ret)| (name, ret.infos()))
            .collect();
        let rows: Vec<Value> = filter_values(&returned, |i| match i {
            Info::Layout(l) => Some(layout_to_row(l)),
            _ => None,
        });
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("layout", &Value::Array(rows), true, None))
            .map(|_| ())
    }

    fn layout_rows(&self) -> Result<Vec<LayoutInfo>> {
        let layout = self.controller().block().value("layout")?;
        Ok(table_rows(&layout).iter().map(layout_from_row).collect())
    }

    /// Replace the export table; sources must name exportable fields.
    fn set_exports(&self, value: Value) -> Result<()> {
        {
            let state = lock(&self.state);
            for (source, _) in export_rows(&value) {
                let (part, field) = split_source(&source)?;
                let known = state
                    .exportable
                    .get(part)
                    .map(|info| info.names.iter().any(|n| n == field))
                    .unwrap_or(false);
                if !known {
                    return Err(Error::Validation(format!(
                        "{} is not an exportable field",
                        source
                    )));
                }
            }
        }
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("exports", &value, true, None))?;
        self.set_modified(true)
    }

    async fn refresh_exportable(&self) -> Result<()> {
        let part_info = self
            .stateful
            .run_hooks(HookKind::ReportExportable, HookArgs::default())
            .await?
            .into_iter()
            .map(|(name, ret)| (name, ret.infos()))
            .collect();
        let exportable = filter_parts(&part_info, |i| match i {
            Info::PartExportable(e) => Some(e.clone()),
            _ => None,
        })
        .into_iter()
        .filter_map(|(name, mut infos)| infos.pop().map(|info| (name, info)))
        .collect();
        lock(&self.state).exportable = exportable;
        Ok(())
    }

    /// Mirror every exported child field onto this block.
    async fn attach_exports(&self) -> Result<()> {
        self.detach_exports();
        self.refresh_exportable().await?;
        let exports = export_rows(&self.controller().block().value("exports")?);
        let process = self.controller().process()?;
        for (source, export) in exports {
            let (part, field) = split_source(&source)?;
            let child_mri = lock(&self.state)
                .exportable
                .get(part)
                .map(|info| info.mri.clone())
                .ok_or_else(|| Error::Validation(format!("no exportable part '{}'", part)))?;
            let export = if export.is_empty() {
                field.to_string()
            } else {
                export
            };
            validate_field_name(&export)?;
            let child = process.get_controller(&child_mri)?;
            let endpoint = child
                .block()
                .read(|m| m.endpoints.get(field).cloned())
                .ok_or_else(|| Error::Field(format!("{} has no field '{}'", child_mri, field)))?;
            let target = vec![child_mri.clone(), field.to_string()];
            let (put, post) = match &endpoint {
                Endpoint::Attribute(_) => {
                    let target = target.clone();
                    let put = PutHandler::with_context(move |mut ctx, value| {
                        let target = target.clone();
                        async move { ctx.put(target, value, None).await.map(|_| ()) }
                    });
                    (Some(put), None)
                }
                Endpoint::Method(_) => {
                    let target = target.clone();
                    let post = PostHandler::with_context(move |mut ctx, params| {
                        let target = target.clone();
                        async move { ctx.post(target, Value::Map(params), None).await }
                    });
                    (None, Some(post))
                }
            };
            self.controller()
                .add_field(part, &export, endpoint, put, post)?;

            let block = self.controller().block().clone();
            let name = export.clone();
            let callback = Callback::new(move |response| {
                if let Response::Update { value, .. } = response {
                    match Endpoint::from_value(&value) {
                        Ok(endpoint) => {
                            if let Err(e) = block.changes_squashed(|s| s.set_endpoint(&name, endpoint)) {
                                warn!(field = %name, error = %e, "cannot mirror export");
                            }
                        }
                        Err(e) => warn!(field = %name, error = %e, "bad export update"),
                    }
                }
            });
            let id = {
                let mut state = lock(&self.state);
                state.next_id += 1;
                state.next_id
            };
            child.handle_request(Request::subscribe(
                id,
                Path::try_from_components(target)?,
                false,
                callback.clone(),
            ));
            debug!(mri = self.stateful.mri(), %source, %export, "exported field");
            lock(&self.state).mirrors.push(Mirror {
                export,
                child: child_mri,
                id,
                callback,
            });
        }
        Ok(())
    }

    fn detach_exports(&self) {
        let mirrors: Vec<Mirror> = lock(&self.state).mirrors.drain(..).collect();
        let process = self.controller().process().ok();
        for mirror in mirrors {
            if let Some(child) = process.as_ref().and_then(|p| p.get_controller(&mirror.child).ok()) {
                child.handle_request(Request::unsubscribe(mirror.id, mirror.callback));
            }
            if let Err(e) = self.controller().remove_field(&mirror.export) {
                warn!(field = %mirror.export, error = %e, "cannot remove export");
            }
        }
    }

    /// Ready -> Editing -> Editable, with exports detached.
    pub async fn edit(&self) -> Result<()> {
        let lifecycle = self.lifecycle()?;
        try_transition(lifecycle.as_ref(), EDITING, EDITABLE, async {
            self.detach_exports();
            self.refresh_exportable().await
        })
        .await
    }

    /// Save to `design` (default: the current one). A failure returns the
    /// block to Editable.
    pub async fn save(&self, design: Option<&str>) -> Result<()> {
        self.stateful.transition(SAVING, "Saving")?;
        match self.do_save(design).await {
            Ok(()) => self.stateful.transition(READY, "Done saving"),
            Err(e) => {
                self.stateful.transition(EDITABLE, &e.message())?;
                Err(e)
            }
        }
    }

    async fn do_save(&self, design: Option<&str>) -> Result<()> {
        let design = match design {
            Some(d) if !d.is_empty() => d.to_string(),
            _ => self
                .controller()
                .block()
                .value("design")?
                .as_str()
                .unwrap_or_default()
                .to_string(),
        };
        if design.is_empty() || design.contains(['/', '.']) {
            return Err(Error::Validation(format!("bad design name '{}'", design)));
        }
        let mut structure = Map::new();
        let mut layout = Map::new();
        for row in self.layout_rows()? {
            layout.insert(
                row.name.clone(),
                Value::from([
                    ("x", Value::from(row.x)),
                    ("y", Value::from(row.y)),
                    ("visible", Value::from(row.visible)),
                ]),
            );
        }
        structure.insert("layout".into(), Value::Map(layout));
        let mut exports = Map::new();
        for (source, export) in export_rows(&self.controller().block().value("exports")?) {
            exports.insert(source, Value::from(export));
        }
        structure.insert("exports".into(), Value::Map(exports));
        for (part, ret) in self
            .stateful
            .run_hooks(HookKind::Save, HookArgs::default())
            .await?
        {
            if let HookReturn::Structure(value) = ret {
                structure.insert(part, value);
            }
        }

        let path = self.design_path(&design);
        fs::create_dir_all(self.design_dir())?;
        let text = serde_json::to_string_pretty(&Value::Map(structure.clone()))?;
        fs::write(&path, text)?;
        debug!(mri = self.stateful.mri(), path = %path.display(), "saved design");

        lock(&self.state).saved = structure;
        self.refresh_design_choices()?;
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("design", &Value::from(design), true, None))?;
        self.set_modified(false)?;
        self.attach_exports().await
    }

    /// Editable -> Reverting -> Ready, restoring the last saved structure.
    pub async fn revert(&self) -> Result<()> {
        self.stateful.transition(REVERTING, "Reverting")?;
        let saved = lock(&self.state).saved.clone();
        let result = async {
            self.apply_structure(&saved).await?;
            self.set_modified(false)?;
            self.attach_exports().await
        }
        .await;
        match result {
            Ok(()) => self.stateful.transition(READY, "Done reverting"),
            Err(e) => {
                self.stateful.transition(EDITABLE, &e.message())?;
                Err(e)
            }
        }
    }

    /// Ready -> Loading -> Ready with the named design applied.
    pub async fn load(&self, design: &str) -> Result<()> {
        let lifecycle = self.lifecycle()?;
        try_transition(lifecycle.as_ref(), LOADING, READY, async {
            self.do_load(design).await?;
            self.attach_exports().await
        })
        .await
    }

    async fn do_load(&self, design: &str) -> Result<()> {
        let structure = if design.is_empty() {
            Map::new()
        } else {
            let path = self.design_path(design);
            debug!(mri = self.stateful.mri(), path = %path.display(), "loading design");
            let text = fs::read_to_string(&path)?;
            match serde_json::from_str::<Value>(&text)? {
                Value::Map(map) => map,
                other => {
                    return Err(Error::Validation(format!(
                        "design {} is not an object: {}",
                        design, other
                    )))
                }
            }
        };
        self.apply_structure(&structure).await?;
        lock(&self.state).saved = structure;
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("design", &Value::from(design), true, None))?;
        self.set_modified(false)
    }

    async fn apply_structure(&self, structure: &Map) -> Result<()> {
        let layout: Vec<LayoutInfo> = structure
            .get("layout")
            .and_then(Value::as_map)
            .map(|parts| {
                parts
                    .iter()
                    .map(|(name, row)| LayoutInfo {
                        name: name.clone(),
                        mri: String::new(),
                        x: row.field("x").and_then(Value::as_f64).unwrap_or(0.0),
                        y: row.field("y").and_then(Value::as_f64).unwrap_or(0.0),
                        visible: row.field("visible").and_then(Value::as_bool).unwrap_or(true),
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.set_layout(layout).await?;

        let rows: Vec<Value> = structure
            .get("exports")
            .and_then(Value::as_map)
            .map(|exports| {
                exports
                    .iter()
                    .map(|(source, export)| {
                        Value::from([
                            ("source", Value::from(source)),
                            ("export", export.clone()),
                        ])
                    })
                    .collect()
            })
            .unwrap_or_default();
        self.controller()
            .block()
            .changes_squashed(|s| s.set_value("exports", &Value::Array(rows), true, None))?;

        let empty = Value::map();
        self.controller()
            .run_hooks_per_child(
                HookKind::Load,
                |part| HookArgs {
                    structure: structure.get(part).cloned().unwrap_or_else(|| empty.clone()),
                    ..HookArgs::default()
                },
                None,
            )
            .await
            .map(|_| ())
    }
}

fn upgrade(weak: &Weak<ManagerController>) -> Result<Arc<ManagerController>> {
    weak.upgrade()
        .ok_or_else(|| Error::Unexpected("manager has been dropped".to_string()))
}

fn layout_meta() -> VMeta {
    VMeta::table(
        "Layout of child blocks",
        [
            ("name", VMeta::string_array("Name of layout part")),
            ("mri", VMeta::string_array("Malcolm full name of child block")),
            ("x", VMeta::number_array(NumberType::Float64, "X co-ordinate of child block")),
            ("y", VMeta::number_array(NumberType::Float64, "Y co-ordinate of child block")),
            ("visible", VMeta::boolean_array("Whether child block is visible")),
        ],
    )
    .with_tag(Widget::FlowGraph.tag())
}

fn exports_meta() -> VMeta {
    VMeta::table(
        "Exported fields of child blocks",
        [
            ("source", VMeta::string_array("Name of the block.field to export")),
            ("export", VMeta::string_array("Name of the field to export as")),
        ],
    )
    .with_tag(Widget::Table.tag())
}

fn layout_from_row(row: &Map) -> LayoutInfo {
    LayoutInfo {
        name: row.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
        mri: row.get("mri").and_then(Value::as_str).unwrap_or_default().to_string(),
        x: row.get("x").and_then(Value::as_f64).unwrap_or(0.0),
        y: row.get("y").and_then(Value::as_f64).unwrap_or(0.0),
        visible: row.get("visible").and_then(Value::as_bool).unwrap_or(true),
    }
}

fn layout_to_row(info: &LayoutInfo) -> Value {
    Value::from([
        ("name", Value::from(&info.name)),
        ("mri", Value::from(&info.mri)),
        ("x", Value::from(info.x)),
        ("y", Value::from(info.y)),
        ("visible", Value::from(info.visible)),
    ])
}

fn export_rows(value: &Value) -> Vec<(String, String)> {
    table_rows(value)
        .iter()
        .map(|row| {
            let cell = |name: &str| {
                row.get(name)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string()
            };
            (cell("source"), cell("export"))
        })
        .collect()
}

fn split_source(source: &str) -> Result<(&str, &str)> {
    source
        .split_once('.')
        .ok_or_else(|| Error::Validation(format!("export source '{}' is not part.field", source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_sources_split_on_the_first_dot() {
        assert_eq!(split_source("DET.exposure").unwrap(), ("DET", "exposure"));
        assert!(split_source("exposure").is_err());
    }

    #[test]
    fn layout_rows_round_trip_through_the_table() {
        let info = LayoutInfo {
            name: "DET".into(),
            mri: "ML-DET".into(),
            x: 1.5,
            y: -2.0,
            visible: false,
        };
        let table = layout_meta()
            .validate(&Value::Array(vec![layout_to_row(&info)]))
            .unwrap();
        let rows: Vec<LayoutInfo> = table_rows(&table).iter().map(layout_from_row).collect();
        assert_eq!(rows, vec![info]);
    }

    #[test]
    fn design_choices_list_saved_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = ManagerConfig {
            config_dir: dir.path().to_path_buf(),
            initial_design: String::new(),
        };
        let manager = ManagerController::new("ML-MGR", "", config).unwrap();
        assert_eq!(manager.design_choices(), vec![""]);
        fs::create_dir_all(dir.path().join("ML-MGR")).unwrap();
        fs::write(dir.path().join("ML-MGR/b.json"), "{}").unwrap();
        fs::write(dir.path().join("ML-MGR/a.json"), "{}").unwrap();
        fs::write(dir.path().join("ML-MGR/notes.txt"), "").unwrap();
        assert_eq!(manager.design_choices(), vec!["", "a", "b"]);
    }
}
