//! Parts and the registrar they set themselves up through.

use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use malcolm_core::{Alarm, AttributeModel, Map, MethodMeta, MethodModel, Value};

use crate::block::BlockCell;
use crate::context::Context;
use crate::controller::{Controller, WeakController};
use crate::hook::{HookFn, HookKind};
use crate::info::Info;
use crate::Result;

/// A composable unit contributing fields and hook handlers to a Controller.
pub trait Part: Send + Sync + 'static {
    /// Letters, digits, `_` and `-`.
    fn name(&self) -> &str;

    /// Called once when the Controller is set up by the Process.
    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()>;
}

type PlainPut = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type ContextPut = Arc<dyn Fn(Context, Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;
type PlainPost = Arc<dyn Fn(Map) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
type ContextPost = Arc<dyn Fn(Context, Map) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// What runs when an attribute is Put. The value is already validated.
#[derive(Clone)]
pub enum PutHandler {
    Plain(PlainPut),
    /// Gets a fresh Context from the Controller.
    WithContext(ContextPut),
}

impl PutHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        PutHandler::Plain(Arc::new(move |v| f(v).boxed()))
    }

    pub fn with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        PutHandler::WithContext(Arc::new(move |c, v| f(c, v).boxed()))
    }
}

/// What runs when a method is Posted. Parameters are already validated and
/// defaulted; the return value is validated against `returns`.
#[derive(Clone)]
pub enum PostHandler {
    Plain(PlainPost),
    WithContext(ContextPost),
}

impl PostHandler {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Map) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        PostHandler::Plain(Arc::new(move |p| f(p).boxed()))
    }

    pub fn with_context<F, Fut>(f: F) -> Self
    where
        F: Fn(Context, Map) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        PostHandler::WithContext(Arc::new(move |c, p| f(c, p).boxed()))
    }
}

/// Filters the extra keyword parameters a part is given.
pub type ArgsGen = Arc<dyn Fn(&[String]) -> Vec<String> + Send + Sync>;

/// A Part's handle on one of its attributes.
#[derive(Clone)]
pub struct AttributeHandle {
    block: Arc<BlockCell>,
    name: String,
}

impl AttributeHandle {
    pub(crate) fn new(block: Arc<BlockCell>, name: &str) -> Self {
        AttributeHandle {
            block,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Set the value, clearing any alarm. Returns the validated value.
    pub fn set_value(&self, value: impl Into<Value>) -> Result<Value> {
        let value = value.into();
        self.block
            .changes_squashed(|s| s.set_value(&self.name, &value, true, None))
    }

    pub fn set_value_alarm(&self, value: impl Into<Value>, alarm: Alarm) -> Result<Value> {
        let value = value.into();
        self.block
            .changes_squashed(|s| s.set_value(&self.name, &value, true, Some(alarm)))
    }

    pub fn set_alarm(&self, alarm: Alarm) -> Result<()> {
        self.block.changes_squashed(|s| s.set_alarm(&self.name, alarm))
    }

    pub fn value(&self) -> Result<Value> {
        self.block.value(&self.name)
    }
}

/// Sends Infos to the Controller after setup.
#[derive(Clone)]
pub struct Reporter {
    controller: WeakController,
    part: String,
}

impl Reporter {
    pub fn report(&self, info: Info) -> Result<()> {
        self.controller.upgrade()?.report(&self.part, info)
    }
}

/// Collects what one Part (or the Controller itself) contributes.
pub struct PartRegistrar<'a> {
    controller: &'a Controller,
    owner: String,
}

impl<'a> PartRegistrar<'a> {
    pub(crate) fn new(controller: &'a Controller, owner: &str) -> Self {
        PartRegistrar {
            controller,
            owner: owner.to_string(),
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn mri(&self) -> &str {
        self.controller.mri()
    }

    /// Add `block.<name>`; Puts go to `writeable_func` or the default setter.
    pub fn add_attribute_model(
        &mut self,
        name: &str,
        attr: AttributeModel,
        writeable_func: Option<PutHandler>,
    ) -> Result<AttributeHandle> {
        self.controller
            .add_field(&self.owner, name, attr.into(), writeable_func, None)?;
        Ok(AttributeHandle::new(self.controller.block().clone(), name))
    }

    pub fn add_method_model(
        &mut self,
        name: &str,
        meta: MethodMeta,
        func: PostHandler,
    ) -> Result<()> {
        self.controller.add_field(
            &self.owner,
            name,
            MethodModel::new(meta).into(),
            None,
            Some(func),
        )
    }

    pub fn hook(&mut self, kinds: &[HookKind], func: HookFn) -> Result<()> {
        self.controller.add_hook(&self.owner, kinds, func, None)
    }

    pub fn hook_with_args(&mut self, kinds: &[HookKind], func: HookFn, args_gen: ArgsGen) -> Result<()> {
        self.controller
            .add_hook(&self.owner, kinds, func, Some(args_gen))
    }

    pub fn report(&mut self, info: Info) -> Result<()> {
        self.controller.report(&self.owner, info)
    }

    /// A handle for reporting after setup.
    pub fn reporter(&self) -> Reporter {
        Reporter {
            controller: self.controller.downgrade(),
            part: self.owner.clone(),
        }
    }

    pub fn set_writeable_in(&mut self, field: &str, states: &[&str]) -> Result<()> {
        self.controller.set_writeable_in(field, states)
    }
}
