use std::sync::Arc;

use malcolm_core::{ErrorKind, NumberType, VMeta, Value};
use malcolm_runtime::parts::{AttributePart, ChildPart};
use malcolm_runtime::{
    BasicStateful, Context, ManagerConfig, ManagerController, Process, ProcessConfig,
};
use tempfile::TempDir;

struct Design {
    process: Process,
    manager: Arc<ManagerController>,
    child: Arc<BasicStateful>,
    dir: TempDir,
}

/// MANAGER holds one child with a config-tagged `exposure`.
async fn design() -> Design {
    let dir = tempfile::tempdir().unwrap();
    let process = Process::new(ProcessConfig::default());
    let child = BasicStateful::new("DET", "A detector").unwrap();
    child
        .controller()
        .add_part(Arc::new(
            AttributePart::new(
                "exposure",
                VMeta::number(NumberType::Float64, "Exposure time"),
                Some(Value::from(0.1)),
            )
            .writeable(true)
            .with_config(1),
        ))
        .unwrap();
    process
        .add_controller(child.controller().clone(), None)
        .await
        .unwrap();
    let manager = ManagerController::new(
        "MANAGER",
        "A design manager",
        ManagerConfig {
            config_dir: dir.path().to_path_buf(),
            initial_design: String::new(),
        },
    )
    .unwrap();
    manager
        .controller()
        .add_part(Arc::new(ChildPart::new("det", "DET")))
        .unwrap();
    process
        .add_controller(manager.controller().clone(), None)
        .await
        .unwrap();
    process.start(None).await.unwrap();
    Design {
        process,
        manager,
        child,
        dir,
    }
}

fn value(block: &malcolm_runtime::Controller, name: &str) -> Value {
    block.block().value(name).unwrap()
}

fn exports(rows: &[(&str, &str)]) -> Value {
    Value::Array(
        rows.iter()
            .map(|(source, export)| Value::from([("source", *source), ("export", *export)]))
            .collect(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn save_export_and_load() {
    let d = design().await;
    let manager = d.manager.controller();
    let mut ctx = Context::new(d.process.clone());
    assert_eq!(manager.state().unwrap(), "Ready");
    assert_eq!(d.process.published(), vec!["MANAGER"]);

    // exports can only change while editing
    let err = ctx
        .put("MANAGER.exports", exports(&[("det.exposure", "")]), None)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::NotWriteable));

    ctx.post("MANAGER.edit", Value::map(), None).await.unwrap();
    assert_eq!(manager.state().unwrap(), "Editable");
    ctx.put("DET.exposure", 0.5, None).await.unwrap();
    ctx.put("MANAGER.exports", exports(&[("det.exposure", "")]), None)
        .await
        .unwrap();
    assert_eq!(value(manager, "modified"), Value::from(true));
    let err = ctx
        .put("MANAGER.exports", exports(&[("det.gain", "")]), None)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::Validation));

    ctx.post("MANAGER.save", Value::from([("designName", "first")]), None)
        .await
        .unwrap();
    assert_eq!(manager.state().unwrap(), "Ready");
    assert_eq!(value(manager, "design"), Value::from("first"));
    assert_eq!(value(manager, "modified"), Value::from(false));
    assert_eq!(d.manager.design_choices(), vec!["", "first"]);

    let saved = std::fs::read_to_string(d.dir.path().join("MANAGER/first.json")).unwrap();
    let saved: serde_json::Value = serde_json::from_str(&saved).unwrap();
    assert_eq!(saved["det"]["exposure"], serde_json::json!(0.5));
    assert_eq!(saved["exports"]["det.exposure"], serde_json::json!(""));
    assert_eq!(saved["layout"]["det"]["visible"], serde_json::json!(true));

    // the export forwards Puts to the child
    assert_eq!(value(manager, "exposure"), Value::from(0.5));
    ctx.put("MANAGER.exposure", 0.7, None).await.unwrap();
    assert_eq!(value(d.child.controller(), "exposure"), Value::from(0.7));

    ctx.put("MANAGER.design", "", None).await.unwrap();
    assert!(manager.block().value("exposure").is_err());

    ctx.put("MANAGER.design", "first", None).await.unwrap();
    assert_eq!(manager.state().unwrap(), "Ready");
    assert_eq!(value(d.child.controller(), "exposure"), Value::from(0.5));
    assert_eq!(value(manager, "exposure"), Value::from(0.5));
}

#[tokio::test(flavor = "multi_thread")]
async fn revert_restores_the_saved_design() {
    let d = design().await;
    let manager = d.manager.controller();
    let mut ctx = Context::new(d.process.clone());
    ctx.post("MANAGER.edit", Value::map(), None).await.unwrap();
    ctx.post("MANAGER.save", Value::from([("designName", "base")]), None)
        .await
        .unwrap();

    ctx.post("MANAGER.edit", Value::map(), None).await.unwrap();
    ctx.put("MANAGER.exports", exports(&[("det.exposure", "detExposure")]), None)
        .await
        .unwrap();
    assert_eq!(value(manager, "modified"), Value::from(true));
    ctx.post("MANAGER.revert", Value::map(), None).await.unwrap();
    assert_eq!(manager.state().unwrap(), "Ready");
    assert_eq!(value(manager, "modified"), Value::from(false));
    assert!(manager.block().value("detExposure").is_err());
}

#[tokio::test(flavor = "multi_thread")]
async fn bad_design_names_leave_the_block_editable() {
    let d = design().await;
    let manager = d.manager.controller();
    let mut ctx = Context::new(d.process.clone());
    ctx.post("MANAGER.edit", Value::map(), None).await.unwrap();
    let err = ctx
        .post("MANAGER.save", Value::from([("designName", "../escape")]), None)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::Validation));
    assert_eq!(manager.state().unwrap(), "Editable");
}

#[tokio::test(flavor = "multi_thread")]
async fn layout_moves_and_hides_children() {
    let d = design().await;
    let manager = d.manager.controller();
    let mut ctx = Context::new(d.process.clone());
    let row = Value::from([
        ("name", Value::from("det")),
        ("mri", Value::from("DET")),
        ("x", Value::from(10.0)),
        ("y", Value::from(20.0)),
        ("visible", Value::from(false)),
    ]);
    ctx.put("MANAGER.layout", Value::Array(vec![row]), None)
        .await
        .unwrap();
    let layout = value(manager, "layout");
    assert_eq!(layout.field("x"), Some(&Value::from(vec![10.0])));
    assert_eq!(layout.field("visible"), Some(&Value::from(vec![false])));
    assert_eq!(value(manager, "modified"), Value::from(true));
}

#[tokio::test(flavor = "multi_thread")]
async fn initial_design_loads_at_start() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("MANAGER")).unwrap();
    std::fs::write(
        dir.path().join("MANAGER/initial.json"),
        r#"{"layout": {}, "exports": {"det.exposure": "time"}, "det": {"exposure": 2.5}}"#,
    )
    .unwrap();
    let process = Process::new(ProcessConfig::default());
    let child = BasicStateful::new("DET", "").unwrap();
    child
        .controller()
        .add_part(Arc::new(
            AttributePart::new("exposure", VMeta::number(NumberType::Float64, ""), None)
                .writeable(true)
                .with_config(1),
        ))
        .unwrap();
    process
        .add_controller(child.controller().clone(), None)
        .await
        .unwrap();
    let manager = ManagerController::new(
        "MANAGER",
        "",
        ManagerConfig {
            config_dir: dir.path().to_path_buf(),
            initial_design: "initial".into(),
        },
    )
    .unwrap();
    manager
        .controller()
        .add_part(Arc::new(ChildPart::new("det", "DET")))
        .unwrap();
    process
        .add_controller(manager.controller().clone(), None)
        .await
        .unwrap();
    process.start(None).await.unwrap();
    assert_eq!(value(manager.controller(), "design"), Value::from("initial"));
    assert_eq!(value(child.controller(), "exposure"), Value::from(2.5));
    assert_eq!(value(manager.controller(), "time"), Value::from(2.5));
}
