//! Drives a child RunnableController from its parent's scan phases.

use std::sync::{Arc, Mutex};

use malcolm_core::{Map, MethodModel, Value};
use tracing::debug;

use super::ChildPart;
use crate::context::{Context, Matcher};
use crate::hook::{hook_fn, HookArgs, HookCall, HookKind, HookReturn};
use crate::info::{ConfigureParamsInfo, Info};
use crate::lock;
use crate::part::{ArgsGen, Part, PartRegistrar, Reporter};
use crate::statesets::{ABORTED, ARMED, FAULT, READY};
use crate::{Error, Result};

/// A [`ChildPart`] whose child is itself runnable.
///
/// The child is configured with the parent's generator and axes plus
/// whatever extra parameters its own `configure` takes, and its
/// `completedSteps` is relayed as this part's progress.
pub struct RunnableChildPart {
    child: Arc<ChildPart>,
    /// Extra configure parameters the child takes.
    params: Arc<Mutex<Vec<String>>>,
    reporter: Mutex<Option<Reporter>>,
}

impl RunnableChildPart {
    pub fn new(name: &str, mri: &str) -> Self {
        RunnableChildPart {
            child: Arc::new(ChildPart::new(name, mri)),
            params: Arc::new(Mutex::new(Vec::new())),
            reporter: Mutex::new(None),
        }
    }

    fn mri(&self) -> &str {
        self.child.mri()
    }

    fn path<'a>(&'a self, field: &'a str) -> [&'a str; 2] {
        [self.mri(), field]
    }

    /// Tell the parent which extra configure parameters the child takes.
    fn report_configure_params(&self, ctx: &Context) -> Result<()> {
        let child = ctx.process().get_controller(self.mri())?;
        let Some(meta) = child
            .block()
            .read(|m| m.method("configure").map(|m: &MethodModel| m.meta.clone()))
        else {
            return Ok(());
        };
        let mut info = ConfigureParamsInfo::default();
        for (name, element) in &meta.takes.elements {
            if name == "generator" || name == "axesToMove" {
                continue;
            }
            info.metas.insert(name.clone(), element.clone());
            if meta.takes.required.contains(name) {
                info.required.push(name.clone());
            }
            if let Some(default) = meta.defaults.get(name) {
                info.defaults.insert(name.clone(), default.clone());
            }
        }
        *lock(&self.params) = info.metas.keys().cloned().collect();
        if info.metas.is_empty() {
            return Ok(());
        }
        let reporter = lock(&self.reporter)
            .clone()
            .ok_or_else(|| Error::Unexpected("runnable child is not set up".to_string()))?;
        reporter.report(Info::ConfigureParams(info))
    }

    fn configure_params(&self, args: &HookArgs) -> Result<Value> {
        let generator = args
            .generator
            .as_ref()
            .ok_or_else(|| Error::Validation("no generator to configure with".to_string()))?;
        let mut params: Map = args.params.clone();
        params.insert("generator".into(), generator.to_value());
        params.insert("axesToMove".into(), Value::from(args.axes_to_move.clone()));
        Ok(Value::Map(params))
    }

    async fn is_writeable(&self, ctx: &mut Context, field: &str) -> Result<bool> {
        Ok(ctx
            .get([self.mri(), field, "meta", "writeable"], None)
            .await?
            .as_bool()
            .unwrap_or(false))
    }

    async fn validate(&self, call: &mut HookCall) -> Result<()> {
        let params = self.configure_params(&call.args)?;
        call.context.post(self.path("validate"), params, None).await?;
        Ok(())
    }

    /// Reset the child if a previous scan left it Armed, Aborted or in
    /// Fault, then configure it.
    async fn configure(&self, call: &mut HookCall) -> Result<()> {
        let params = self.configure_params(&call.args)?;
        let ctx = &mut call.context;
        let state = ctx.get([self.mri(), "state", "value"], None).await?;
        if state.as_str() != Some(READY) && self.is_writeable(ctx, "reset").await? {
            ctx.post(self.path("reset"), Value::map(), None).await?;
        }
        debug!(mri = self.mri(), "configuring child");
        ctx.post(self.path("configure"), params, None).await?;
        Ok(())
    }

    /// Run the child (or wait for a resumed child to finish) while relaying
    /// its progress.
    async fn run(&self, call: &mut HookCall) -> Result<()> {
        let ctx = &mut call.context;
        if let Some(progress) = call.args.progress.clone() {
            let part = self.child.name().to_string();
            ctx.subscribe([self.mri(), "completedSteps", "value"], move |value| {
                let steps = value.as_i64().unwrap_or(0).max(0) as usize;
                progress.report(&part, steps);
                Ok(())
            })?;
        }
        if self.is_writeable(ctx, "run").await? {
            ctx.post(self.path("run"), Value::map(), None).await?;
        } else {
            let done = Matcher::predicate(|v| matches!(v.as_str(), Some(ARMED) | Some(READY)));
            ctx.when_matches(
                [self.mri(), "state", "value"],
                done,
                Some(vec![Value::from(FAULT), Value::from(ABORTED)]),
                None,
            )
            .await?;
        }
        ctx.unsubscribe_all();
        Ok(())
    }

    /// Post `method` if the child currently allows it.
    async fn post_if_writeable(&self, ctx: &mut Context, method: &str, params: Value) -> Result<()> {
        if self.is_writeable(ctx, method).await? {
            ctx.post(self.path(method), params, None).await?;
        }
        Ok(())
    }
}

impl Part for RunnableChildPart {
    fn name(&self) -> &str {
        self.child.name()
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        self.child.setup_child(registrar)?;
        *lock(&self.reporter) = Some(registrar.reporter());

        let this = self.clone();
        registrar.hook(
            &[HookKind::Init],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.child.reset_child(&mut call.context).await?;
                    this.report_configure_params(&call.context)?;
                    Ok(HookReturn::None)
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Reset],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.child.reset_child(&mut call.context).await?;
                    Ok(HookReturn::None)
                }
            }),
        )?;

        let demanded = self.params.clone();
        let args_gen: ArgsGen = Arc::new(move |supplied: &[String]| -> Vec<String> {
            let demanded = lock(&demanded);
            supplied
                .iter()
                .filter(|s| demanded.contains(*s))
                .cloned()
                .collect()
        });
        let this = self.clone();
        registrar.hook_with_args(
            &[HookKind::Validate],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.validate(&mut call).await?;
                    Ok(HookReturn::None)
                }
            }),
            args_gen.clone(),
        )?;
        let this = self.clone();
        registrar.hook_with_args(
            &[HookKind::Configure],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.configure(&mut call).await?;
                    Ok(HookReturn::None)
                }
            }),
            args_gen,
        )?;

        let this = self.clone();
        registrar.hook(
            &[HookKind::Run],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.run(&mut call).await?;
                    Ok(HookReturn::None)
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Pause],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.post_if_writeable(&mut call.context, "pause", Value::map())
                        .await?;
                    Ok(HookReturn::None)
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Seek],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    let params = Value::from([("completedSteps", call.args.completed_steps)]);
                    call.context.post(this.path("pause"), params, None).await?;
                    Ok(HookReturn::None)
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Resume],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.post_if_writeable(&mut call.context, "resume", Value::map())
                        .await?;
                    Ok(HookReturn::None)
                }
            }),
        )?;
        let this = self.clone();
        registrar.hook(
            &[HookKind::Abort],
            hook_fn(move |mut call| {
                let this = this.clone();
                async move {
                    this.post_if_writeable(&mut call.context, "abort", Value::map())
                        .await?;
                    Ok(HookReturn::None)
                }
            }),
        )
    }
}
