//! The basic state machine: `Disabled -> Resetting -> Ready`, Fault and
//! Disabling from everywhere.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use malcolm_core::tags::Widget;
use malcolm_core::{MethodMeta, VMeta, Value};
use tracing::warn;

use super::{Controller, WeakController};
use crate::hook::{HookArgs, HookKind, HookReturn};
use crate::part::PostHandler;
use crate::statesets::{StateSet, DISABLED, DISABLING, FAULT, READY, RESETTING};
use crate::{Error, Result};

/// The overridable steps of a state-machine controller.
///
/// Every `do_*` runs inside a [`try_transition`]; an error sends the block
/// to [`go_to_error_state`](Lifecycle::go_to_error_state).
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    fn stateful(&self) -> &StatefulController;

    async fn do_init(&self) -> Result<()> {
        self.stateful().run_phase(HookKind::Init).await
    }

    async fn do_reset(&self) -> Result<()> {
        self.stateful().run_phase(HookKind::Reset).await
    }

    async fn do_disable(&self) -> Result<()> {
        self.stateful().run_phase(HookKind::Disable).await
    }

    async fn do_halt(&self) -> Result<()> {
        self.stateful().run_phase(HookKind::Halt).await
    }

    async fn go_to_error_state(&self, error: &Error) {
        if let Err(e) = self.stateful().transition(FAULT, &error.message()) {
            warn!(mri = self.stateful().mri(), error = %e, "cannot go to Fault");
        }
    }
}

/// Go to `start`, run `body`, go to `end`. A failure after `start` is
/// handed to the lifecycle's error state and returned.
pub async fn try_transition<F>(lc: &dyn Lifecycle, start: &str, end: &str, body: F) -> Result<()>
where
    F: Future<Output = Result<()>> + Send,
{
    lc.stateful().transition(start, start)?;
    let result = match body.await {
        Ok(()) => lc.stateful().transition(end, "Done"),
        Err(e) => Err(e),
    };
    if let Err(e) = &result {
        lc.go_to_error_state(e).await;
    }
    result
}

pub async fn init(lc: &dyn Lifecycle) -> Result<()> {
    try_transition(lc, RESETTING, READY, lc.do_init()).await
}

pub async fn reset(lc: &dyn Lifecycle) -> Result<()> {
    try_transition(lc, RESETTING, READY, lc.do_reset()).await
}

pub async fn disable(lc: &dyn Lifecycle) -> Result<()> {
    try_transition(lc, DISABLING, DISABLED, lc.do_disable()).await
}

/// Halt the children then disable, unless already disabled.
pub async fn halt(lc: &dyn Lifecycle) -> Result<()> {
    lc.do_halt().await?;
    if lc.stateful().state()? == DISABLED {
        return Ok(());
    }
    disable(lc).await
}

/// A Controller with `state`, `status` and `busy` attributes governed by a
/// [`StateSet`].
pub struct StatefulController {
    controller: Controller,
    state_set: StateSet,
}

impl StatefulController {
    pub fn new(mri: &str, description: &str, state_set: StateSet) -> Result<Self> {
        let controller = Controller::new(mri, description)?;
        let mut registrar = controller.registrar();
        let state = VMeta::choice("State of Block", state_set.possible_states())
            .with_tag(Widget::TextUpdate.tag())
            .create_attribute_model(Some(Value::from(DISABLED)))?;
        registrar.add_attribute_model("state", state, None)?;
        let status = VMeta::string("Status of Block")
            .with_tag(Widget::TextUpdate.tag())
            .create_attribute_model(Some(Value::from("Disabled")))?;
        registrar.add_attribute_model("status", status, None)?;
        let busy = VMeta::boolean("Whether Block busy or not")
            .with_tag(Widget::Led.tag())
            .create_attribute_model(Some(Value::from(false)))?;
        registrar.add_attribute_model("busy", busy, None)?;
        Ok(StatefulController {
            controller,
            state_set,
        })
    }

    pub fn controller(&self) -> &Controller {
        &self.controller
    }

    pub fn mri(&self) -> &str {
        self.controller.mri()
    }

    pub fn state_set(&self) -> &StateSet {
        &self.state_set
    }

    pub fn state(&self) -> Result<String> {
        self.controller.state()
    }

    /// Change state if the StateSet allows it from the current one. Staying
    /// put is allowed too, and just updates the status.
    pub fn transition(&self, state: &str, message: &str) -> Result<()> {
        let busy = self.state_set.is_busy(state);
        self.controller.transition_block(state, message, busy, |current| {
            current == state || self.state_set.transition_allowed(current, state)
        })
    }

    /// As [`transition`](Self::transition), but only along an edge of the
    /// StateSet; already being in `state` is refused.
    pub fn enter(&self, state: &str, message: &str) -> Result<()> {
        let busy = self.state_set.is_busy(state);
        self.controller.transition_block(state, message, busy, |current| {
            self.state_set.transition_allowed(current, state)
        })
    }

    /// Run a phase with default arguments and no timeout.
    pub async fn run_phase(&self, kind: HookKind) -> Result<()> {
        self.run_hooks(kind, HookArgs::default()).await.map(|_| ())
    }

    pub async fn run_hooks(
        &self,
        kind: HookKind,
        args: HookArgs,
    ) -> Result<IndexMap<String, HookReturn>> {
        self.controller.run_hooks(kind, args, None).await
    }

    /// Register `reset` and `disable`, then hand the lifecycle to the
    /// controller so ProcessStart and ProcessStop drive it.
    pub fn install_lifecycle(&self, lifecycle: Arc<dyn Lifecycle>) -> Result<()> {
        let mut registrar = self.controller.registrar();
        let weak = self.controller.downgrade();
        registrar.add_method_model(
            "reset",
            MethodMeta::new("Reset the block").writeable(true),
            PostHandler::new(move |_| lifecycle_call(weak.clone(), LifecycleCall::Reset)),
        )?;
        let weak = self.controller.downgrade();
        registrar.add_method_model(
            "disable",
            MethodMeta::new("Disable the block").writeable(true),
            PostHandler::new(move |_| lifecycle_call(weak.clone(), LifecycleCall::Disable)),
        )?;
        self.controller
            .set_writeable_in("reset", &self.state_set.sources_of(RESETTING))?;
        self.controller
            .set_writeable_in("disable", &self.state_set.sources_of(DISABLING))?;
        self.controller.set_lifecycle(lifecycle);
        Ok(())
    }
}

enum LifecycleCall {
    Reset,
    Disable,
}

async fn lifecycle_call(weak: WeakController, call: LifecycleCall) -> Result<Value> {
    let lifecycle = weak
        .upgrade()?
        .lifecycle()
        .ok_or_else(|| Error::Unexpected("controller has no lifecycle".to_string()))?;
    match call {
        LifecycleCall::Reset => reset(lifecycle.as_ref()).await?,
        LifecycleCall::Disable => disable(lifecycle.as_ref()).await?,
    }
    Ok(Value::Null)
}

/// A stateful block with no behaviour beyond the base lifecycle.
pub struct BasicStateful {
    stateful: StatefulController,
}

#[async_trait]
impl Lifecycle for BasicStateful {
    fn stateful(&self) -> &StatefulController {
        &self.stateful
    }
}

impl BasicStateful {
    pub fn new(mri: &str, description: &str) -> Result<Arc<Self>> {
        let this = Arc::new(BasicStateful {
            stateful: StatefulController::new(mri, description, StateSet::stateful())?,
        });
        this.stateful.install_lifecycle(this.clone())?;
        Ok(this)
    }

    pub fn controller(&self) -> &Controller {
        self.stateful.controller()
    }
}
