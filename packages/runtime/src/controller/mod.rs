//! Controllers: the owners of Blocks.
//!
//! [`Controller`] is the basic controller every block has. It owns the
//! block lock, the Parts and their field bindings, the hook table and the
//! InfoRegistry, and turns Requests into Responses. The state-machine
//! controllers in [`stateful`], [`manager`] and [`runnable`] wrap one and
//! plug their behaviour in through the [`Lifecycle`] trait.

pub mod manager;
pub mod runnable;
pub mod stateful;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use indexmap::{IndexMap, IndexSet};
use malcolm_core::tags::Widget;
use malcolm_core::{
    deliver, validate_field_name, validate_mri, validate_part_name, Alarm, Endpoint, Map,
    MethodLog, Path, Request, RequestKind, VMeta, Value,
};
use tracing::{debug, info};

use crate::block::BlockCell;
use crate::context::Context;
use crate::hook::{hook_fn, start_hooks, wait_hooks, ActiveHooks, Hook, HookArgs, HookFn, HookKind, HookReturn};
use crate::info::{Info, InfoKind, InfoRegistry, PartInfo, UnpublishedInfo};
use crate::lock;
use crate::part::{ArgsGen, Part, PartRegistrar, PostHandler, PutHandler};
use crate::process::{Process, WeakProcess};
use crate::statesets::FAULT;
use crate::{Error, Result};

pub use stateful::{Lifecycle, StatefulController};

/// Owner of the fields and hooks a controller registers itself. Part
/// names cannot contain `<`, so no Part shares it, whatever the MRI.
const CONTROLLER_OWNER: &str = "<controller>";

struct FieldBinding {
    owner: String,
    put: Option<PutHandler>,
    post: Option<PostHandler>,
    writeable_in: Option<Vec<String>>,
}

struct HookEntry {
    kinds: Vec<HookKind>,
    func: HookFn,
    args_gen: Option<ArgsGen>,
}

struct ControllerInner {
    mri: String,
    block: Arc<BlockCell>,
    parts: Mutex<IndexMap<String, Arc<dyn Part>>>,
    bindings: Mutex<HashMap<String, FieldBinding>>,
    hooks: Mutex<IndexMap<String, Vec<HookEntry>>>,
    infos: Mutex<InfoRegistry>,
    health: Mutex<IndexMap<String, Alarm>>,
    unpublished: Mutex<IndexSet<String>>,
    process: Mutex<Option<WeakProcess>>,
    lifecycle: Mutex<Option<Arc<dyn Lifecycle>>>,
    active: ActiveHooks,
}

/// Owner of one Block: serializes access, runs hooks, routes Infos.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

/// A non-owning reference used by closures the Controller stores.
#[derive(Clone)]
pub struct WeakController(Weak<ControllerInner>);

impl WeakController {
    pub fn upgrade(&self) -> Result<Controller> {
        self.0
            .upgrade()
            .map(|inner| Controller { inner })
            .ok_or_else(|| Error::Unexpected("controller has been dropped".to_string()))
    }
}

impl Controller {
    /// A basic controller with a `health` attribute.
    pub fn new(mri: &str, description: &str) -> Result<Self> {
        validate_mri(mri)?;
        let controller = Controller {
            inner: Arc::new(ControllerInner {
                mri: mri.to_string(),
                block: BlockCell::new(mri, description),
                parts: Mutex::new(IndexMap::new()),
                bindings: Mutex::new(HashMap::new()),
                hooks: Mutex::new(IndexMap::new()),
                infos: Mutex::new(InfoRegistry::default()),
                health: Mutex::new(IndexMap::new()),
                unpublished: Mutex::new(IndexSet::new()),
                process: Mutex::new(None),
                lifecycle: Mutex::new(None),
                active: ActiveHooks::default(),
            }),
        };
        controller.setup_basic()?;
        Ok(controller)
    }

    fn setup_basic(&self) -> Result<()> {
        let health = VMeta::string("Displays OK or an error message")
            .with_tag(Widget::TextUpdate.tag())
            .create_attribute_model(Some(Value::from("OK")))?;
        let mut registrar = self.registrar();
        registrar.add_attribute_model("health", health, None)?;

        let weak = self.downgrade();
        registrar.hook(
            &[HookKind::ProcessStart],
            hook_fn(move |_call| {
                let weak = weak.clone();
                async move {
                    let controller = weak.upgrade()?;
                    if let Some(lifecycle) = controller.lifecycle() {
                        stateful::init(lifecycle.as_ref()).await?;
                    }
                    let infos = controller
                        .unpublished()
                        .into_iter()
                        .map(|mri| Info::Unpublished(UnpublishedInfo { mri }))
                        .collect();
                    Ok(HookReturn::Infos(infos))
                }
            }),
        )?;
        let weak = self.downgrade();
        registrar.hook(
            &[HookKind::ProcessStop],
            hook_fn(move |_call| {
                let weak = weak.clone();
                async move {
                    let controller = weak.upgrade()?;
                    if let Some(lifecycle) = controller.lifecycle() {
                        stateful::halt(lifecycle.as_ref()).await?;
                    }
                    Ok(HookReturn::None)
                }
            }),
        )?;

        let mut infos = lock(&self.inner.infos);
        let weak = self.downgrade();
        infos.register(
            InfoKind::Label,
            Arc::new(move |_part, info| {
                if let Info::Label(label) = info {
                    let controller = weak.upgrade()?;
                    controller
                        .block()
                        .changes_squashed(|s| s.set_label(&label.label))?;
                }
                Ok(())
            }),
        );
        let weak = self.downgrade();
        infos.register(
            InfoKind::Health,
            Arc::new(move |part, info| {
                if let Info::Health(health) = info {
                    weak.upgrade()?.update_health(part, health.alarm.clone())?;
                }
                Ok(())
            }),
        );
        let weak = self.downgrade();
        infos.register(
            InfoKind::Unpublished,
            Arc::new(move |_part, info| {
                if let Info::Unpublished(u) = info {
                    lock(&weak.upgrade()?.inner.unpublished).insert(u.mri.clone());
                }
                Ok(())
            }),
        );
        Ok(())
    }

    pub fn mri(&self) -> &str {
        &self.inner.mri
    }

    pub fn block(&self) -> &Arc<BlockCell> {
        &self.inner.block
    }

    pub fn downgrade(&self) -> WeakController {
        WeakController(Arc::downgrade(&self.inner))
    }

    /// A registrar for fields and hooks the controller itself owns.
    pub(crate) fn registrar(&self) -> PartRegistrar<'_> {
        PartRegistrar::new(self, CONTROLLER_OWNER)
    }

    pub fn process(&self) -> Result<Process> {
        lock(&self.inner.process)
            .as_ref()
            .and_then(WeakProcess::upgrade)
            .ok_or_else(|| {
                Error::Unexpected(format!("{} is not attached to a process", self.mri()))
            })
    }

    pub fn hook_timeout(&self) -> Option<Duration> {
        self.process().ok().and_then(|p| p.config().hook_timeout())
    }

    pub(crate) fn lifecycle(&self) -> Option<Arc<dyn Lifecycle>> {
        lock(&self.inner.lifecycle).clone()
    }

    pub(crate) fn set_lifecycle(&self, lifecycle: Arc<dyn Lifecycle>) {
        *lock(&self.inner.lifecycle) = Some(lifecycle);
    }

    /// Add a Part. Its `setup` runs when the Process adds this controller,
    /// or immediately if that has already happened.
    pub fn add_part(&self, part: Arc<dyn Part>) -> Result<()> {
        let name = part.name().to_string();
        validate_part_name(&name)?;
        {
            let mut parts = lock(&self.inner.parts);
            if parts.contains_key(&name) {
                return Err(Error::Validation(format!(
                    "part '{}' already exists in {}",
                    name,
                    self.mri()
                )));
            }
            parts.insert(name.clone(), part.clone());
        }
        if lock(&self.inner.process).is_some() {
            part.setup(&mut PartRegistrar::new(self, &name))?;
        }
        Ok(())
    }

    pub fn part_names(&self) -> Vec<String> {
        lock(&self.inner.parts).keys().cloned().collect()
    }

    /// Attach to a process and set up every part.
    pub(crate) fn setup(&self, process: &Process) -> Result<()> {
        *lock(&self.inner.process) = Some(process.downgrade());
        let parts: Vec<(String, Arc<dyn Part>)> = lock(&self.inner.parts)
            .iter()
            .map(|(n, p)| (n.clone(), p.clone()))
            .collect();
        for (name, part) in parts {
            part.setup(&mut PartRegistrar::new(self, &name))?;
        }
        Ok(())
    }

    /// Break the reference cycle through the lifecycle on removal.
    pub(crate) fn detach(&self) {
        *lock(&self.inner.lifecycle) = None;
        *lock(&self.inner.process) = None;
    }

    pub(crate) fn add_field(
        &self,
        owner: &str,
        name: &str,
        endpoint: Endpoint,
        put: Option<PutHandler>,
        post: Option<PostHandler>,
    ) -> Result<()> {
        validate_field_name(name)?;
        {
            let mut bindings = lock(&self.inner.bindings);
            if let Some(existing) = bindings.get(name) {
                return Err(Error::Validation(format!(
                    "field '{}' is already registered by '{}'",
                    name, existing.owner
                )));
            }
            if name == "meta" {
                return Err(Error::Validation("'meta' is reserved".to_string()));
            }
            bindings.insert(
                name.to_string(),
                FieldBinding {
                    owner: owner.to_string(),
                    put,
                    post,
                    writeable_in: None,
                },
            );
        }
        self.inner
            .block
            .changes_squashed(|s| s.set_endpoint(name, endpoint))
    }

    /// Replace a field's endpoint, keeping its binding.
    pub(crate) fn replace_endpoint(&self, name: &str, endpoint: Endpoint) -> Result<()> {
        self.inner
            .block
            .changes_squashed(|s| s.set_endpoint(name, endpoint))
    }

    pub(crate) fn remove_field(&self, name: &str) -> Result<()> {
        lock(&self.inner.bindings).remove(name);
        self.inner.block.changes_squashed(|s| s.remove_endpoint(name))
    }

    pub(crate) fn field_owner(&self, name: &str) -> Option<String> {
        lock(&self.inner.bindings).get(name).map(|b| b.owner.clone())
    }

    pub(crate) fn add_hook(
        &self,
        owner: &str,
        kinds: &[HookKind],
        func: HookFn,
        args_gen: Option<ArgsGen>,
    ) -> Result<()> {
        let mut hooks = lock(&self.inner.hooks);
        let entries = hooks.entry(owner.to_string()).or_default();
        if let Some(kind) = kinds
            .iter()
            .find(|k| entries.iter().any(|e| e.kinds.contains(k)))
        {
            return Err(Error::Validation(format!(
                "'{}' already hooks {}",
                owner, kind
            )));
        }
        entries.push(HookEntry {
            kinds: kinds.to_vec(),
            func,
            args_gen,
        });
        Ok(())
    }

    /// Make `field` writeable only in `states`. Applied on every transition.
    pub fn set_writeable_in(&self, field: &str, states: &[&str]) -> Result<()> {
        {
            let mut bindings = lock(&self.inner.bindings);
            let binding = bindings
                .get_mut(field)
                .ok_or_else(|| Error::Field(format!("no field '{}'", field)))?;
            binding.writeable_in = Some(states.iter().map(|s| s.to_string()).collect());
        }
        if let Ok(state) = self.state() {
            let writeable = states.contains(&state.as_str());
            self.inner
                .block
                .changes_squashed(|s| s.set_writeable(field, writeable))?;
        }
        Ok(())
    }

    fn writeables_in(&self, state: &str) -> Vec<(String, bool)> {
        lock(&self.inner.bindings)
            .iter()
            .filter_map(|(name, b)| {
                b.writeable_in
                    .as_ref()
                    .map(|states| (name.clone(), states.iter().any(|s| s == state)))
            })
            .collect()
    }

    /// Current value of the `state` attribute.
    pub fn state(&self) -> Result<String> {
        Ok(self
            .inner
            .block
            .value("state")?
            .as_str()
            .unwrap_or_default()
            .to_string())
    }

    /// Move to `state` if `allowed(current)`, updating status, busy and
    /// every writeable_in field in one squash.
    pub(crate) fn transition_block(
        &self,
        state: &str,
        message: &str,
        busy: bool,
        allowed: impl FnOnce(&str) -> bool,
    ) -> Result<()> {
        let writeables = self.writeables_in(state);
        self.inner.block.changes_squashed(|s| {
            let current = s.value("state")?;
            let current = current.as_str().unwrap_or_default();
            if !allowed(current) {
                return Err(Error::NotWriteable(format!(
                    "cannot transition from {} to {}",
                    current, state
                )));
            }
            let alarm = if state == FAULT {
                Alarm::major(message)
            } else {
                Alarm::ok()
            };
            s.set_value("state", &Value::from(state), true, Some(alarm))?;
            s.set_value("status", &Value::from(message), true, None)?;
            s.set_value("busy", &Value::from(busy), true, None)?;
            for (name, writeable) in &writeables {
                s.set_writeable(name, *writeable)?;
            }
            Ok(())
        })?;
        info!(mri = self.mri(), state, message, "transition");
        Ok(())
    }

    /// Route an Info to its registered handler.
    pub fn report(&self, part: &str, info: Info) -> Result<()> {
        let handler = lock(&self.inner.infos).handler(&info.kind())?;
        handler(part, &info)
    }

    pub(crate) fn register_info(&self, kind: InfoKind, handler: crate::info::InfoHandler) {
        lock(&self.inner.infos).register(kind, handler);
    }

    fn update_health(&self, part: &str, alarm: Option<Alarm>) -> Result<()> {
        let worst = {
            let mut health = lock(&self.inner.health);
            match alarm {
                Some(a) if a != Alarm::ok() => {
                    health.insert(part.to_string(), a);
                }
                _ => {
                    health.shift_remove(part);
                }
            }
            health
                .values()
                .max_by_key(|a| a.severity)
                .cloned()
        };
        let (message, alarm) = match worst {
            Some(a) => (a.message.clone(), a),
            None => ("OK".to_string(), Alarm::ok()),
        };
        self.inner
            .block
            .changes_squashed(|s| s.set_value("health", &Value::from(message), true, Some(alarm)))
            .map(|_| ())
    }

    /// MRIs of children reported as unpublished.
    pub fn unpublished(&self) -> Vec<String> {
        lock(&self.inner.unpublished).iter().cloned().collect()
    }

    /// Entry point for every Request aimed at this block.
    ///
    /// Get, Subscribe and Unsubscribe complete before this returns; Put and
    /// Post run on a task spawned through the Process so their handlers may
    /// call back into this controller, and `Process::stop` waits for them.
    pub fn handle_request(&self, request: Request) {
        debug!(mri = self.mri(), id = request.id, typeid = request.typeid(), "handling request");
        match &request.kind {
            RequestKind::Get { path } => {
                let delivery = match self.inner.block.get(path.tail()) {
                    Ok(value) => request.return_response(value),
                    Err(e) => request.error_response(e),
                };
                deliver(vec![delivery]);
            }
            RequestKind::Subscribe { .. } => self.inner.block.handle_subscribe(&request),
            RequestKind::Unsubscribe => self.inner.block.handle_unsubscribe(&request),
            RequestKind::Put { .. } | RequestKind::Post { .. } => {
                let process = match self.process() {
                    Ok(process) => process,
                    Err(e) => {
                        deliver(vec![request.error_response(e)]);
                        return;
                    }
                };
                let controller = self.clone();
                process.spawn(async move {
                    let result = match &request.kind {
                        RequestKind::Put { path, value, get } => {
                            controller.handle_put(path, value, *get).await
                        }
                        RequestKind::Post { path, parameters } => {
                            controller.handle_post(path, parameters).await
                        }
                        _ => Ok(Value::Null),
                    };
                    let delivery = match result {
                        Ok(value) => request.return_response(value),
                        Err(e) => request.error_response(e),
                    };
                    deliver(vec![delivery]);
                    Ok(())
                });
            }
        }
    }

    fn context(&self) -> Result<Context> {
        Ok(Context::new(self.process()?))
    }

    async fn handle_put(&self, path: &Path, value: &Value, get: bool) -> Result<Value> {
        let name = match path.tail() {
            [name] => name.as_str(),
            [name, v] if v == "value" => name.as_str(),
            _ => {
                return Err(Error::Field(format!(
                    "can only put to an attribute or its value, not {}",
                    path
                )))
            }
        };
        let validated = self.inner.block.read(|m| match m.endpoints.get(name) {
            None => Err(Error::Field(format!("{} has no field '{}'", self.mri(), name))),
            Some(Endpoint::Method(_)) => Err(Error::Field(format!(
                "{} is a method, not an attribute",
                name
            ))),
            Some(Endpoint::Attribute(a)) if !a.meta.base.writeable => Err(Error::NotWriteable(
                format!("{}.{} is not writeable", self.mri(), name),
            )),
            Some(Endpoint::Attribute(a)) => a.meta.validate(value),
        })?;
        let handler = lock(&self.inner.bindings)
            .get(name)
            .and_then(|b| b.put.clone());
        match handler {
            Some(PutHandler::Plain(f)) => f(validated).await?,
            Some(PutHandler::WithContext(f)) => f(self.context()?, validated).await?,
            None => {
                self.inner
                    .block
                    .changes_squashed(|s| s.set_value(name, &validated, true, None))?;
            }
        }
        if get {
            self.inner.block.value(name)
        } else {
            Ok(Value::Null)
        }
    }

    async fn handle_post(&self, path: &Path, parameters: &Value) -> Result<Value> {
        let [name] = path.tail() else {
            return Err(Error::Field(format!("can only post to a method, not {}", path)));
        };
        let name = name.as_str();
        let meta = self.inner.block.read(|m| match m.endpoints.get(name) {
            None => Err(Error::Field(format!("{} has no field '{}'", self.mri(), name))),
            Some(Endpoint::Attribute(_)) => Err(Error::Field(format!(
                "{} is an attribute, not a method",
                name
            ))),
            Some(Endpoint::Method(m)) if !m.meta.base.writeable => Err(Error::NotWriteable(
                format!("{}.{} is not writeable", self.mri(), name),
            )),
            Some(Endpoint::Method(m)) => Ok(m.meta.clone()),
        })?;
        let params = meta.validate(parameters)?;
        let present = parameters
            .as_map()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        self.inner.block.changes_squashed(|s| {
            s.set_took(name, MethodLog::new(params.clone(), present, Alarm::ok()))
        })?;
        let handler = lock(&self.inner.bindings)
            .get(name)
            .and_then(|b| b.post.clone())
            .ok_or_else(|| Error::Unexpected(format!("no handler bound to {}", name)))?;
        let result = match handler {
            PostHandler::Plain(f) => f(params).await,
            PostHandler::WithContext(f) => f(self.context()?, params).await,
        }
        .and_then(|returned| meta.validate_return(&returned));
        let log = match &result {
            Ok(returned) => MethodLog::new(
                returned.clone(),
                returned.keys().cloned().collect(),
                Alarm::ok(),
            ),
            Err(e) => MethodLog::new(Map::new(), Vec::new(), Alarm::major(e.message())),
        };
        self.inner
            .block
            .changes_squashed(|s| s.set_returned(name, log))?;
        result.map(Value::Map)
    }

    /// Fan a phase out to every child registered for it.
    pub async fn run_hooks(
        &self,
        kind: HookKind,
        args: HookArgs,
        timeout: Option<Duration>,
    ) -> Result<IndexMap<String, HookReturn>> {
        self.run_hooks_per_child(kind, |_| args.clone(), timeout).await
    }

    /// As [`run_hooks`](Self::run_hooks) with arguments built per child.
    pub async fn run_hooks_per_child(
        &self,
        kind: HookKind,
        args_for: impl Fn(&str) -> HookArgs,
        timeout: Option<Duration>,
    ) -> Result<IndexMap<String, HookReturn>> {
        let process = self.process()?;
        let registered: Vec<(String, HookFn, Option<ArgsGen>)> = lock(&self.inner.hooks)
            .iter()
            .filter_map(|(owner, entries)| {
                entries
                    .iter()
                    .find(|e| e.kinds.contains(&kind))
                    .map(|e| (owner.clone(), e.func.clone(), e.args_gen.clone()))
            })
            .collect();
        if registered.is_empty() {
            return Ok(IndexMap::new());
        }
        let hooks = registered
            .into_iter()
            .map(|(owner, func, args_gen)| {
                let mut args = args_for(&owner);
                if let Some(args_gen) = args_gen {
                    let supplied: Vec<String> = args.params.keys().cloned().collect();
                    let demanded = args_gen(&supplied);
                    args.params.retain(|k, _| demanded.contains(k));
                }
                Hook::new(kind, &owner, func, Context::new(process.clone()), args)
            })
            .collect();
        debug!(mri = self.mri(), %kind, "running hooks");
        let started = start_hooks(hooks);
        let id = self.inner.active.register(started.stoppers());
        let result = wait_hooks(started, timeout).await;
        self.inner.active.unregister(id);
        result
    }

    /// As [`run_hooks`](Self::run_hooks), keeping only the returned Infos.
    pub async fn run_hooks_infos(
        &self,
        kind: HookKind,
        args: HookArgs,
        timeout: Option<Duration>,
    ) -> Result<PartInfo> {
        Ok(self
            .run_hooks(kind, args, timeout)
            .await?
            .into_iter()
            .map(|(name, ret)| (name, ret.infos()))
            .collect())
    }

    /// Stop the Context of every hook running on this controller.
    pub fn stop_hooks(&self) {
        self.inner.active.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::LabelInfo;
    use crate::part::AttributeHandle;
    use crate::ProcessConfig;
    use malcolm_core::{path, Callback, ErrorKind, MethodMeta, NumberType, Response};
    use std::sync::Mutex as StdMutex;
    use tokio::sync::oneshot;

    struct Counter {
        handle: StdMutex<Option<AttributeHandle>>,
    }

    impl Part for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
            let meta = VMeta::number(NumberType::Float64, "A counter").writeable(true);
            let handle =
                registrar.add_attribute_model("counter", meta.create_attribute_model(None)?, None)?;
            *self.handle.lock().unwrap() = Some(handle.clone());
            let this = self.clone();
            registrar.add_method_model(
                "increment",
                MethodMeta::new("Add one").writeable(true),
                PostHandler::new(move |_| {
                    let this = this.clone();
                    async move {
                        let handle = this.handle.lock().unwrap().clone().unwrap();
                        let next = handle.value()?.as_f64().unwrap_or(0.0) + 1.0;
                        handle.set_value(next)?;
                        Ok(Value::Null)
                    }
                }),
            )?;
            registrar.report(Info::Label(LabelInfo {
                label: "Counting".into(),
            }))
        }
    }

    async fn counter() -> (Process, Controller) {
        let process = Process::new(ProcessConfig::default());
        let controller = Controller::new("COUNTER", "A counter block").unwrap();
        controller
            .add_part(Arc::new(Counter {
                handle: StdMutex::new(None),
            }))
            .unwrap();
        process.add_controller(controller.clone(), None).await.unwrap();
        (process, controller)
    }

    async fn request(controller: &Controller, build: impl FnOnce(Callback) -> Request) -> Response {
        let (tx, rx) = oneshot::channel();
        let tx = StdMutex::new(Some(tx));
        let cb = Callback::new(move |r| {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(r);
            }
        });
        controller.handle_request(build(cb));
        rx.await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_then_get() {
        let (_p, c) = counter().await;
        let r = request(&c, |cb| {
            Request::put(1, path!("COUNTER.counter.value"), Value::from("2.5"), true, cb)
        })
        .await;
        assert_eq!(r, Response::Return { id: 1, value: Value::from(2.5) });
        let r = request(&c, |cb| Request::get(2, path!("COUNTER.counter.value"), cb)).await;
        assert_eq!(r, Response::Return { id: 2, value: Value::from(2.5) });
        assert_eq!(
            c.block().read(|m| m.meta.base.label.clone()),
            "Counting".to_string()
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn put_errors_have_kinds() {
        let (_p, c) = counter().await;
        let kind = |r: Response| match r {
            Response::Error { error, .. } => error.kind(),
            other => panic!("expected error, got {:?}", other),
        };
        let r = request(&c, |cb| Request::put(1, path!("COUNTER.nope"), Value::Null, false, cb)).await;
        assert_eq!(kind(r), ErrorKind::Field);
        let r = request(&c, |cb| Request::put(2, path!("COUNTER.health"), Value::from("x"), false, cb))
            .await;
        assert_eq!(kind(r), ErrorKind::NotWriteable);
        let r = request(&c, |cb| {
            Request::put(3, path!("COUNTER.counter"), Value::from("abc"), false, cb)
        })
        .await;
        assert_eq!(kind(r), ErrorKind::Validation);
        let r = request(&c, |cb| {
            Request::put(4, path!("COUNTER.increment"), Value::Null, false, cb)
        })
        .await;
        assert_eq!(kind(r), ErrorKind::Field);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn post_records_took_and_returned() {
        let (_p, c) = counter().await;
        let r = request(&c, |cb| Request::post(1, path!("COUNTER.increment"), Value::Null, cb)).await;
        assert_eq!(r, Response::Return { id: 1, value: Value::map() });
        assert_eq!(c.block().value("counter").unwrap(), Value::from(1.0));
        let r = request(&c, |cb| {
            Request::post(2, path!("COUNTER.increment"), Value::from([("bad", 1)]), cb)
        })
        .await;
        assert!(matches!(r, Response::Error { .. }));
    }

    struct Starter {
        started: Arc<StdMutex<bool>>,
    }

    impl Part for Starter {
        fn name(&self) -> &str {
            "COUNTER"
        }

        fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
            let started = self.started.clone();
            registrar.hook(
                &[HookKind::ProcessStart],
                hook_fn(move |_call| {
                    let started = started.clone();
                    async move {
                        *started.lock().unwrap() = true;
                        Ok(HookReturn::None)
                    }
                }),
            )
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn part_may_share_the_controller_mri() {
        let (process, c) = counter().await;
        let started = Arc::new(StdMutex::new(false));
        c.add_part(Arc::new(Starter {
            started: started.clone(),
        }))
        .unwrap();
        process.start(None).await.unwrap();
        assert!(*started.lock().unwrap());
        assert_eq!(c.block().value("health").unwrap(), Value::from("OK"));
    }

    #[test]
    fn field_names_cannot_shadow() {
        let c = Controller::new("BLK", "").unwrap();
        let meta = VMeta::string("x");
        let mut r = c.registrar();
        assert!(r
            .add_attribute_model("health", meta.create_attribute_model(None).unwrap(), None)
            .is_err());
        assert!(r
            .add_attribute_model("Bad", meta.create_attribute_model(None).unwrap(), None)
            .is_err());
        assert!(c.report("p", Info::RunProgress(crate::info::RunProgressInfo { steps: 1 })).is_err());
    }
}
