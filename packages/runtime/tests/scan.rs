use std::sync::Arc;
use std::time::Duration;

use malcolm_core::{CompoundGenerator, Dimension, ErrorKind, Value};
use malcolm_runtime::parts::{RunnableChildPart, TickerPart};
use malcolm_runtime::{
    Context, ManagerConfig, Process, ProcessConfig, RunnableConfig, RunnableController,
};
use tempfile::TempDir;

struct Scan {
    process: Process,
    parent: Arc<RunnableController>,
    child: Arc<RunnableController>,
    _dir: TempDir,
}

/// MAINBLOCK drives TESTCHILD, which ticks an x and a y axis.
async fn scan() -> Scan {
    let dir = tempfile::tempdir().unwrap();
    let config = RunnableConfig {
        manager: ManagerConfig {
            config_dir: dir.path().to_path_buf(),
            initial_design: String::new(),
        },
        request_timeout: None,
    };
    let process = Process::new(ProcessConfig::default());
    let child = RunnableController::new("TESTCHILD", "A ticking child", config.clone()).unwrap();
    child
        .controller()
        .add_part(Arc::new(TickerPart::new("x", "x")))
        .unwrap();
    child
        .controller()
        .add_part(Arc::new(TickerPart::new("y", "y")))
        .unwrap();
    process
        .add_controller(child.controller().clone(), None)
        .await
        .unwrap();
    let parent = RunnableController::new("MAINBLOCK", "A scanning parent", config).unwrap();
    parent
        .controller()
        .add_part(Arc::new(RunnableChildPart::new("CHILD", "TESTCHILD")))
        .unwrap();
    process
        .add_controller(parent.controller().clone(), None)
        .await
        .unwrap();
    process.start(None).await.unwrap();
    Scan {
        process,
        parent,
        child,
        _dir: dir,
    }
}

/// Three rows of y, two points of x per row.
fn configure_params(duration: f64) -> Value {
    let generator = CompoundGenerator::new(
        vec![
            Dimension::new(["y"], 3).line(0.0, 2.0),
            Dimension::new(["x"], 2).line(0.0, 1.0),
        ],
        duration,
    );
    Value::from([
        ("generator", generator.to_value()),
        ("axesToMove", Value::from(vec!["x"])),
    ])
}

fn steps(controller: &RunnableController, name: &str) -> i64 {
    controller
        .controller()
        .block()
        .value(name)
        .unwrap()
        .as_i64()
        .unwrap()
}

/// `(configuredSteps, completedSteps)`
fn progress(controller: &RunnableController) -> (i64, i64) {
    (
        steps(controller, "configuredSteps"),
        steps(controller, "completedSteps"),
    )
}

fn state(controller: &RunnableController) -> String {
    controller.controller().state().unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn configure_then_run_each_batch() {
    let scan = scan().await;
    assert_eq!(state(&scan.parent), "Ready");
    assert_eq!(state(&scan.child), "Ready");
    assert_eq!(scan.process.published(), vec!["MAINBLOCK"]);

    let mut ctx = Context::new(scan.process.clone());
    ctx.post("MAINBLOCK.configure", configure_params(0.001), None)
        .await
        .unwrap();
    assert_eq!(steps(&scan.parent, "totalSteps"), 6);
    assert_eq!(progress(&scan.parent), (2, 0));
    assert_eq!(state(&scan.parent), "Armed");
    assert_eq!(state(&scan.child), "Armed");

    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(progress(&scan.parent), (4, 2));
    assert_eq!(state(&scan.parent), "Armed");
    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(progress(&scan.parent), (6, 4));
    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(progress(&scan.parent), (6, 6));
    assert_eq!(state(&scan.parent), "Ready");
    assert_eq!(state(&scan.child), "Ready");
    assert_eq!(
        scan.child.controller().block().value("x").unwrap(),
        Value::from(1.0)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_seeks_and_run_carries_on() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    ctx.post("MAINBLOCK.configure", configure_params(0.001), None)
        .await
        .unwrap();
    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(progress(&scan.parent), (4, 2));

    ctx.post("MAINBLOCK.pause", Value::from([("completedSteps", 1)]), None)
        .await
        .unwrap();
    assert_eq!(progress(&scan.parent), (2, 1));
    assert_eq!(state(&scan.parent), "Armed");
    assert_eq!(progress(&scan.child), (2, 1));

    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(progress(&scan.parent), (4, 2));

    ctx.put("MAINBLOCK.completedSteps", 5, None).await.unwrap();
    assert_eq!(progress(&scan.parent), (6, 5));
    assert_eq!(state(&scan.parent), "Armed");

    ctx.post("MAINBLOCK.run", Value::map(), None).await.unwrap();
    assert_eq!(state(&scan.parent), "Ready");
    assert_eq!(state(&scan.child), "Ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn abort_during_run() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    ctx.post("MAINBLOCK.configure", configure_params(0.1), None)
        .await
        .unwrap();

    let process = scan.process.clone();
    let run = tokio::spawn(async move {
        let mut ctx = Context::new(process);
        ctx.post("MAINBLOCK.run", Value::map(), None).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state(&scan.parent), "Running");
    ctx.post("MAINBLOCK.abort", Value::map(), None).await.unwrap();

    let err = run.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Response);
    assert_eq!(err.remote_kind(), Some(ErrorKind::Aborted));
    assert_eq!(state(&scan.parent), "Aborted");
    assert_eq!(state(&scan.child), "Aborted");

    ctx.post("MAINBLOCK.reset", Value::map(), None).await.unwrap();
    assert_eq!(state(&scan.parent), "Ready");
    assert_eq!(state(&scan.child), "Ready");
    assert_eq!(progress(&scan.parent), (0, 0));
}

#[tokio::test(flavor = "multi_thread")]
async fn pause_and_resume_mid_run() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    ctx.post("MAINBLOCK.configure", configure_params(0.05), None)
        .await
        .unwrap();

    let process = scan.process.clone();
    let run = tokio::spawn(async move {
        let mut ctx = Context::new(process);
        ctx.post("MAINBLOCK.run", Value::map(), None).await
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    ctx.post("MAINBLOCK.pause", Value::map(), None).await.unwrap();
    assert_eq!(state(&scan.parent), "Paused");
    assert_eq!(state(&scan.child), "Paused");
    assert!(!run.is_finished());

    ctx.post("MAINBLOCK.resume", Value::map(), None).await.unwrap();
    run.await.unwrap().unwrap();
    assert_eq!(progress(&scan.parent), (4, 2));
    assert_eq!(state(&scan.parent), "Armed");
}

#[tokio::test(flavor = "multi_thread")]
async fn run_is_not_writeable_before_configure() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    let err = ctx
        .post("MAINBLOCK.run", Value::map(), None)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::NotWriteable));

    let err = ctx
        .post("MAINBLOCK.configure", Value::map(), None)
        .await
        .unwrap_err();
    assert_eq!(err.remote_kind(), Some(ErrorKind::Validation));
    assert_eq!(state(&scan.parent), "Ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn validate_fills_axes_to_move() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    let mut params = configure_params(0.001);
    params.as_map_mut().unwrap().shift_remove("axesToMove");
    let returned = ctx
        .post("MAINBLOCK.validate", params, None)
        .await
        .unwrap();
    assert_eq!(
        returned.field("axesToMove"),
        Some(&Value::from(vec!["y", "x"]))
    );
    assert_eq!(state(&scan.parent), "Ready");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_second_run_is_refused_while_running() {
    let scan = scan().await;
    let mut ctx = Context::new(scan.process.clone());
    ctx.post("MAINBLOCK.configure", configure_params(0.1), None)
        .await
        .unwrap();

    let process = scan.process.clone();
    let run = tokio::spawn(async move {
        let mut ctx = Context::new(process);
        ctx.post("MAINBLOCK.run", Value::map(), None).await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(state(&scan.parent), "Running");
    let err = scan.parent.run().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotWriteable);
    assert_eq!(state(&scan.parent), "Running");

    ctx.post("MAINBLOCK.abort", Value::map(), None).await.unwrap();
    assert!(run.await.unwrap().is_err());
    assert_eq!(state(&scan.parent), "Aborted");
}
