//! Scans: configure, run, pause, seek, resume and abort.
//!
//! One operation at a time holds `op`: configure, a run (between its hook
//! phases), a pause, or an abort. A pause or abort first stops the running
//! hooks so the holder lets go. A run interrupted by a pause gives up `op`
//! and waits on `resume`; it then fires Resume and carries on from the seek
//! point.

use std::sync::{Arc, Mutex, Weak};

use async_trait::async_trait;
use indexmap::IndexMap;
use malcolm_core::meta::string_list;
use malcolm_core::tags::Widget;
use malcolm_core::{CompoundGenerator, ErrorKind, Map, MethodMeta, NumberType, VMeta, Value};
use tokio::sync::{MutexGuard as AsyncGuard, Notify};
use tracing::{debug, warn};

use super::manager::ManagerController;
use super::stateful::{try_transition, Lifecycle, StatefulController};
use super::Controller;
use crate::hook::{HookArgs, HookKind, HookReturn, ProgressReporter};
use crate::info::{filter_values, ConfigureParamsInfo, Info, InfoKind, PartInfo};
use crate::lock;
use crate::part::{PostHandler, PutHandler};
use crate::statesets::{
    StateSet, ABORTED, ABORTING, ARMED, CONFIGURING, PAUSED, POSTRUN, READY, RUNNING, SEEKING,
};
use crate::{Error, Result, RunnableConfig};

/// Rounds of Validate before giving up on convergence.
const VALIDATE_ROUNDS: usize = 10;

#[derive(Default)]
struct ScanState {
    generator: Option<CompoundGenerator>,
    axes_to_move: Vec<String>,
    steps_per_run: usize,
    /// Extra configure parameters, beyond generator and axesToMove.
    params: Map,
    part_info: PartInfo,
    progress: IndexMap<String, usize>,
    configure_params: IndexMap<String, ConfigureParamsInfo>,
}

/// A manager that runs scans.
pub struct RunnableController {
    manager: Arc<ManagerController>,
    config: RunnableConfig,
    op: tokio::sync::Mutex<()>,
    resume: Notify,
    scan: Mutex<ScanState>,
}

fn is_abort(error: &Error) -> bool {
    error.is_aborted() || error.remote_kind() == Some(ErrorKind::Aborted)
}

#[async_trait]
impl Lifecycle for RunnableController {
    fn stateful(&self) -> &StatefulController {
        self.manager.stateful()
    }

    async fn do_init(&self) -> Result<()> {
        self.manager.manager_init().await?;
        self.reset_steps()
    }

    async fn do_reset(&self) -> Result<()> {
        self.stateful().run_phase(HookKind::Reset).await?;
        self.reset_steps()
    }

    /// Abort the children, then Fault. An abort in progress owns the
    /// state, so nothing happens then.
    async fn go_to_error_state(&self, error: &Error) {
        let state = self.stateful().state().unwrap_or_default();
        if state == ABORTING || state == ABORTED {
            return;
        }
        if !is_abort(error) && self.stateful().transition(ABORTING, &error.message()).is_ok() {
            self.controller().stop_hooks();
            self.resume.notify_one();
            if let Err(e) = self.run_scan_hooks(HookKind::Abort, HookArgs::default()).await {
                warn!(mri = self.stateful().mri(), error = %e, "abort after failure failed");
            }
        }
        if let Err(e) = self.stateful().transition(crate::statesets::FAULT, &error.message()) {
            warn!(mri = self.stateful().mri(), error = %e, "cannot go to Fault");
        }
    }
}

impl RunnableController {
    pub fn new(mri: &str, description: &str, config: RunnableConfig) -> Result<Arc<Self>> {
        let manager =
            ManagerController::build(mri, description, config.manager.clone(), StateSet::runnable())?;
        let this = Arc::new(RunnableController {
            manager,
            config,
            op: tokio::sync::Mutex::new(()),
            resume: Notify::new(),
            scan: Mutex::new(ScanState::default()),
        });
        this.register_fields()?;
        this.stateful().install_lifecycle(this.clone())?;
        Ok(this)
    }

    pub fn controller(&self) -> &Controller {
        self.manager.controller()
    }

    pub fn manager(&self) -> &ManagerController {
        &self.manager
    }

    fn lifecycle(&self) -> Result<Arc<dyn Lifecycle>> {
        self.controller()
            .lifecycle()
            .ok_or_else(|| Error::Unexpected(format!("{} has no lifecycle", self.controller().mri())))
    }

    fn register_fields(self: &Arc<Self>) -> Result<()> {
        let controller = self.controller();
        let mut registrar = controller.registrar();
        let steps = |description: &str| {
            VMeta::number(NumberType::Int32, description)
                .with_tag(Widget::TextUpdate.tag())
                .create_attribute_model(Some(Value::from(0)))
        };

        let weak = Arc::downgrade(self);
        registrar.add_attribute_model(
            "completedSteps",
            steps("Readback of number of scan steps")?,
            Some(PutHandler::new(move |value| {
                let weak = weak.clone();
                async move {
                    let steps = value.as_i64().unwrap_or(0).max(0) as usize;
                    upgrade(&weak)?.seek(steps).await
                }
            })),
        )?;
        registrar.add_attribute_model(
            "configuredSteps",
            steps("Number of steps currently configured")?,
            None,
        )?;
        registrar.add_attribute_model(
            "totalSteps",
            steps("Readback of number of scan steps")?,
            None,
        )?;

        let meta = self.configure_meta();
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "validate",
            validate_meta(&meta),
            PostHandler::new(move |params| {
                let weak = weak.clone();
                async move { Ok(Value::Map(upgrade(&weak)?.validate(params).await?)) }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "configure",
            meta,
            PostHandler::new(move |params| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.configure(params).await?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "run",
            MethodMeta::new("Start a configured scan").writeable(true),
            PostHandler::new(move |_| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.run().await?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "pause",
            MethodMeta::new("Pause a run so that it can be resumed later")
                .arg_optional(
                    "completedSteps",
                    VMeta::number(NumberType::Int32, "Step to seek to, default current"),
                )
                .writeable(true),
            PostHandler::new(move |params| {
                let weak = weak.clone();
                async move {
                    let target = params
                        .get("completedSteps")
                        .and_then(Value::as_i64)
                        .map(|s| s.max(0) as usize);
                    upgrade(&weak)?.pause(target).await?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "resume",
            MethodMeta::new("Resume a paused scan").writeable(true),
            PostHandler::new(move |_| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.resume()?;
                    Ok(Value::Null)
                }
            }),
        )?;
        let weak = Arc::downgrade(self);
        registrar.add_method_model(
            "abort",
            MethodMeta::new("Abort the current scan").writeable(true),
            PostHandler::new(move |_| {
                let weak = weak.clone();
                async move {
                    upgrade(&weak)?.abort().await?;
                    Ok(Value::Null)
                }
            }),
        )?;

        let state_set = self.stateful().state_set();
        registrar.set_writeable_in("completedSteps", &[ARMED, PAUSED])?;
        registrar.set_writeable_in("configure", &state_set.sources_of(CONFIGURING))?;
        registrar.set_writeable_in("run", &[ARMED])?;
        registrar.set_writeable_in("pause", &state_set.sources_of(SEEKING))?;
        registrar.set_writeable_in("resume", &[PAUSED])?;
        registrar.set_writeable_in("abort", &state_set.sources_of(ABORTING))?;

        let weak = Arc::downgrade(self);
        controller.register_info(
            InfoKind::ConfigureParams,
            Arc::new(move |part, info| {
                if let Info::ConfigureParams(params) = info {
                    upgrade(&weak)?.add_configure_params(part, params.clone())?;
                }
                Ok(())
            }),
        );
        Ok(())
    }

    /// `configure` takes a generator, the axes to move and whatever extra
    /// parameters the parts asked for.
    fn configure_meta(&self) -> MethodMeta {
        let mut meta = MethodMeta::new("Validate params and configure the device")
            .arg("generator", VMeta::point_generator("Generator instance"))
            .arg_optional(
                "axesToMove",
                VMeta::string_array("List of axes in inner dimension of generator that should be moved"),
            )
            .writeable(true);
        let scan = lock(&self.scan);
        for info in scan.configure_params.values() {
            for (name, element) in &info.metas {
                meta = if info.required.contains(name) {
                    meta.arg(name, element.clone())
                } else if let Some(default) = info.defaults.get(name) {
                    meta.arg_default(name, element.clone(), default.clone())
                } else {
                    meta.arg_optional(name, element.clone())
                };
            }
        }
        meta
    }

    fn add_configure_params(&self, part: &str, params: ConfigureParamsInfo) -> Result<()> {
        lock(&self.scan)
            .configure_params
            .insert(part.to_string(), params);
        let meta = self.configure_meta();
        let validate = validate_meta(&meta);
        self.controller().block().changes_squashed(|s| {
            s.set_method_meta("configure", meta)?;
            s.set_method_meta("validate", validate)
        })
    }

    fn steps(&self, name: &str) -> Result<usize> {
        let value = self.controller().block().value(name)?;
        Ok(value.as_i64().unwrap_or(0).max(0) as usize)
    }

    fn set_steps(&self, values: &[(&str, usize)]) -> Result<()> {
        self.controller().block().changes_squashed(|s| {
            for (name, steps) in values {
                s.set_value(name, &Value::from(*steps), true, None)?;
            }
            Ok(())
        })
    }

    fn reset_steps(&self) -> Result<()> {
        self.set_steps(&[("completedSteps", 0), ("configuredSteps", 0), ("totalSteps", 0)])
    }

    async fn run_scan_hooks(
        &self,
        kind: HookKind,
        args: HookArgs,
    ) -> Result<IndexMap<String, HookReturn>> {
        self.controller()
            .run_hooks(kind, args, self.config.request_timeout())
            .await
    }

    async fn report_status(&self) -> Result<PartInfo> {
        Ok(self
            .run_scan_hooks(HookKind::ReportStatus, HookArgs::default())
            .await?
            .into_iter()
            .map(|(name, ret)| (name, ret.infos()))
            .collect())
    }

    /// Arguments for a scan phase from the configured scan.
    fn scan_args(&self, completed_steps: usize, steps_to_do: usize) -> HookArgs {
        let scan = lock(&self.scan);
        HookArgs {
            part_info: scan.part_info.clone(),
            generator: scan.generator.clone(),
            axes_to_move: scan.axes_to_move.clone(),
            completed_steps,
            steps_to_do,
            params: scan.params.clone(),
            ..HookArgs::default()
        }
    }

    /// Apply ParameterTweakInfos from Validate until none are returned.
    pub async fn validate(&self, params: Map) -> Result<Map> {
        let meta = self.configure_meta();
        let mut params = params;
        let generator = generator_of(&params)?;
        if !params.contains_key("axesToMove") {
            let axes = generator.axes().into_iter().map(Value::from).collect();
            params.insert("axesToMove".into(), Value::Array(axes));
        }
        let part_info = self.report_status().await?;
        for round in 0..VALIDATE_ROUNDS {
            let generator = generator_of(&params)?;
            let args = HookArgs {
                part_info: part_info.clone(),
                axes_to_move: string_list(params.get("axesToMove")),
                generator: Some(generator),
                params: extras(&params),
                ..HookArgs::default()
            };
            let returned: PartInfo = self
                .run_scan_hooks(HookKind::Validate, args)
                .await?
                .into_iter()
                .map(|(name, ret)| (name, ret.infos()))
                .collect();
            let tweaks = filter_values(&returned, |i| match i {
                Info::ParameterTweak(t) => Some(t.clone()),
                _ => None,
            });
            if tweaks.is_empty() {
                return Ok(params);
            }
            debug!(mri = self.controller().mri(), round, tweaks = tweaks.len(), "tweaking parameters");
            for tweak in tweaks {
                let element = meta.takes.elements.get(&tweak.parameter).ok_or_else(|| {
                    Error::Validation(format!("cannot tweak unknown parameter {}", tweak.parameter))
                })?;
                params.insert(tweak.parameter, element.validate(&tweak.value)?);
            }
        }
        Err(Error::Validation(format!(
            "parameters failed to converge after {} rounds",
            VALIDATE_ROUNDS
        )))
    }

    /// Validate, then Configuring -> Armed with the first batch configured.
    pub async fn configure(&self, params: Map) -> Result<()> {
        let params = self.validate(params).await?;
        let lifecycle = self.lifecycle()?;
        try_transition(lifecycle.as_ref(), CONFIGURING, ARMED, self.do_configure(params)).await
    }

    async fn do_configure(&self, params: Map) -> Result<()> {
        let generator = generator_of(&params)?;
        let axes_to_move = string_list(params.get("axesToMove"));
        let total = generator.size();
        let steps_per_run = generator.steps_per_run(&axes_to_move).max(1);
        self.set_steps(&[("totalSteps", total), ("completedSteps", 0), ("configuredSteps", 0)])?;
        let part_info = self.report_status().await?;
        {
            let mut scan = lock(&self.scan);
            scan.generator = Some(generator);
            scan.axes_to_move = axes_to_move;
            scan.steps_per_run = steps_per_run;
            scan.params = extras(&params);
            scan.part_info = part_info;
            scan.progress.clear();
        }
        let first = steps_per_run.min(total);
        self.run_scan_hooks(HookKind::Configure, self.scan_args(0, first))
            .await?;
        self.run_scan_hooks(HookKind::PostConfigure, self.scan_args(0, first))
            .await?;
        self.set_steps(&[("configuredSteps", first)])
    }

    /// Armed -> Running -> PostRun -> Armed or Ready.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let lifecycle = self.lifecycle()?;
        self.stateful().enter(RUNNING, "Running")?;
        let result = self.do_run().await;
        if let Err(e) = &result {
            lifecycle.go_to_error_state(e).await;
        }
        result
    }

    /// `Err(Aborted)` if an abort owns the block, `true` if a pause does.
    fn interrupted(&self) -> Result<bool> {
        match self.stateful().state()?.as_str() {
            ABORTING | ABORTED => Err(Error::Aborted(format!(
                "{} was aborted",
                self.controller().mri()
            ))),
            SEEKING | PAUSED => Ok(true),
            _ => Ok(false),
        }
    }

    async fn wait_for_resume(&self) -> Result<AsyncGuard<'_, ()>> {
        loop {
            self.resume.notified().await;
            let guard = self.op.lock().await;
            if self.interrupted()? {
                continue;
            }
            return Ok(guard);
        }
    }

    fn progress_reporter(self: &Arc<Self>) -> ProgressReporter {
        let weak = Arc::downgrade(self);
        ProgressReporter::new(move |part, steps| {
            if let Some(this) = weak.upgrade() {
                if let Err(e) = this.update_completed_steps(part, steps) {
                    warn!(part, error = %e, "cannot update progress");
                }
            }
        })
    }

    /// Completed steps are the minimum across reporting parts, and only
    /// ever increase.
    fn update_completed_steps(&self, part: &str, steps: usize) -> Result<()> {
        let least = {
            let mut scan = lock(&self.scan);
            scan.progress.insert(part.to_string(), steps);
            scan.progress.values().copied().min().unwrap_or(steps)
        };
        self.controller().block().changes_squashed(|s| {
            let current = s.value("completedSteps")?.as_i64().unwrap_or(0).max(0) as usize;
            if least > current {
                s.set_value("completedSteps", &Value::from(least), true, None)?;
            }
            Ok(())
        })
    }

    async fn do_run(self: &Arc<Self>) -> Result<()> {
        let mut guard = self.op.lock().await;
        let mut resuming = false;
        loop {
            let completed = self.steps("completedSteps")?;
            let configured = self.steps("configuredSteps")?;
            if resuming {
                let outcome = self
                    .run_scan_hooks(
                        HookKind::Resume,
                        self.scan_args(completed, configured.saturating_sub(completed)),
                    )
                    .await;
                if self.interrupted()? {
                    drop(guard);
                    guard = self.wait_for_resume().await?;
                    continue;
                }
                outcome?;
                resuming = false;
            }
            // a pause that landed between phases had no hooks to stop
            if self.interrupted()? {
                drop(guard);
                guard = self.wait_for_resume().await?;
                resuming = true;
                continue;
            }
            lock(&self.scan).progress.clear();
            let mut args = self.scan_args(completed, configured.saturating_sub(completed));
            args.progress = Some(self.progress_reporter());
            let outcome = self.run_scan_hooks(HookKind::Run, args).await;
            if self.interrupted()? {
                drop(guard);
                guard = self.wait_for_resume().await?;
                resuming = true;
                continue;
            }
            outcome?;

            if let Err(e) = self.stateful().transition(POSTRUN, "Finishing run") {
                if self.interrupted()? {
                    drop(guard);
                    guard = self.wait_for_resume().await?;
                    resuming = true;
                    continue;
                }
                return Err(e);
            }
            // the batch is done whether or not every part reported it
            let completed = configured;
            let total = self.steps("totalSteps")?;
            self.set_steps(&[("completedSteps", completed)])?;
            let steps_per_run = lock(&self.scan).steps_per_run;
            let next = (completed + steps_per_run).min(total);
            let (kind, end) = if completed < total {
                (HookKind::PostRunArmed, ARMED)
            } else {
                (HookKind::PostRunReady, READY)
            };
            let outcome = self
                .run_scan_hooks(kind, self.scan_args(completed, next - completed))
                .await;
            if self.interrupted()? {
                drop(guard);
                guard = self.wait_for_resume().await?;
                resuming = true;
                continue;
            }
            outcome?;
            if end == ARMED {
                self.set_steps(&[("configuredSteps", next)])?;
            }
            return self.stateful().transition(end, "Done running");
        }
    }

    /// Seeking: stop the run, fire Pause (if running) and Seek, then end
    /// Paused if a run was in progress, else Armed.
    pub async fn pause(&self, target: Option<usize>) -> Result<()> {
        let lifecycle = self.lifecycle()?;
        let was = self.stateful().state()?;
        self.stateful().transition(SEEKING, "Seeking")?;
        let in_run = was == RUNNING || was == POSTRUN || was == PAUSED;
        let result = async {
            self.controller().stop_hooks();
            let _guard = self.op.lock().await;
            if was == RUNNING || was == POSTRUN {
                let completed = self.steps("completedSteps")?;
                self.run_scan_hooks(HookKind::Pause, self.scan_args(completed, 0))
                    .await?;
            }
            let target = match target {
                Some(t) => t,
                None => self.steps("completedSteps")?,
            };
            self.do_seek(target).await?;
            let end = if in_run { PAUSED } else { ARMED };
            self.stateful().transition(end, "Done seeking")
        }
        .await;
        if let Err(e) = &result {
            lifecycle.go_to_error_state(e).await;
        }
        result
    }

    /// The pause algorithm from Armed; used by Puts to `completedSteps`.
    pub async fn seek(&self, steps: usize) -> Result<()> {
        self.pause(Some(steps)).await
    }

    async fn do_seek(&self, target: usize) -> Result<()> {
        let total = self.steps("totalSteps")?;
        let steps_per_run = lock(&self.scan).steps_per_run.max(1);
        let target = target.min(total);
        let in_batch = target % steps_per_run;
        let configured = (target + steps_per_run - in_batch).min(total);
        self.run_scan_hooks(HookKind::Seek, self.scan_args(target, configured - target))
            .await?;
        debug!(mri = self.controller().mri(), target, configured, "seeked");
        lock(&self.scan).progress.clear();
        self.set_steps(&[("completedSteps", target), ("configuredSteps", configured)])
    }

    /// Paused -> Running; the waiting run carries on.
    pub fn resume(&self) -> Result<()> {
        self.stateful().enter(RUNNING, "Running")?;
        self.resume.notify_one();
        Ok(())
    }

    /// Aborting: stop everything, wait for the current operation, fire
    /// Abort, then Aborted.
    pub async fn abort(&self) -> Result<()> {
        self.stateful().transition(ABORTING, "Aborting")?;
        let result = async {
            self.controller().stop_hooks();
            self.resume.notify_one();
            let _guard = self.op.lock().await;
            self.run_scan_hooks(HookKind::Abort, HookArgs::default())
                .await?;
            self.stateful().transition(ABORTED, "Aborted")
        }
        .await;
        if let Err(e) = &result {
            if let Err(fault) = self.stateful().transition(crate::statesets::FAULT, &e.message()) {
                warn!(mri = self.controller().mri(), error = %fault, "cannot go to Fault");
            }
        }
        result
    }
}

fn upgrade(weak: &Weak<RunnableController>) -> Result<Arc<RunnableController>> {
    weak.upgrade()
        .ok_or_else(|| Error::Unexpected("runnable has been dropped".to_string()))
}

fn generator_of(params: &Map) -> Result<CompoundGenerator> {
    let value = params
        .get("generator")
        .ok_or_else(|| Error::Validation("missing required argument 'generator'".to_string()))?;
    CompoundGenerator::from_value(value)
}

/// Every parameter but generator and axesToMove.
fn extras(params: &Map) -> Map {
    params
        .iter()
        .filter(|(k, _)| k.as_str() != "generator" && k.as_str() != "axesToMove")
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// `validate` takes what `configure` takes and returns the tweaked set.
fn validate_meta(configure: &MethodMeta) -> MethodMeta {
    let mut meta = MethodMeta::new("Validate configuration parameters").writeable(true);
    meta.takes = configure.takes.clone();
    meta.defaults = configure.defaults.clone();
    meta.returns = configure.takes.clone();
    meta.returns.required = vec!["generator".into(), "axesToMove".into()];
    meta
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_drop_the_scan_parameters() {
        let params: Map = [
            ("generator".to_string(), Value::Null),
            ("axesToMove".to_string(), Value::array()),
            ("exposure".to_string(), Value::from(0.1)),
        ]
        .into_iter()
        .collect();
        let extra = extras(&params);
        assert_eq!(extra.keys().collect::<Vec<_>>(), vec!["exposure"]);
    }

    #[test]
    fn validate_returns_what_configure_takes() {
        let configure = MethodMeta::new("c")
            .arg("generator", VMeta::point_generator("g"))
            .arg_optional("axesToMove", VMeta::string_array("a"));
        let meta = validate_meta(&configure);
        assert_eq!(
            meta.returns.elements.keys().collect::<Vec<_>>(),
            vec!["generator", "axesToMove"]
        );
        assert!(meta.base.writeable);
    }
}
