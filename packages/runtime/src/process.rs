//! The Process: a fleet of Controllers addressed by MRI.

use std::future::Future;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::join_all;
use indexmap::{IndexMap, IndexSet};
use tracing::{debug, info};

use crate::controller::Controller;
use crate::hook::{HookArgs, HookKind};
use crate::info::{filter_values, Info};
use crate::lock;
use crate::spawned::{DoneSignal, Spawned};
use crate::{Error, ProcessConfig, Result};

struct ProcessInner {
    config: ProcessConfig,
    controllers: Mutex<IndexMap<String, Controller>>,
    started: Mutex<bool>,
    unpublished: Mutex<IndexSet<String>>,
    published: Mutex<Vec<String>>,
    spawned: Mutex<Vec<DoneSignal>>,
}

/// Hosts Controllers, routes their lifecycle phases and tracks spawned
/// tasks. Cheap to clone.
#[derive(Clone)]
pub struct Process {
    inner: Arc<ProcessInner>,
}

/// A non-owning Process reference held by Controllers.
#[derive(Clone)]
pub struct WeakProcess(Weak<ProcessInner>);

impl WeakProcess {
    pub fn upgrade(&self) -> Option<Process> {
        self.0.upgrade().map(|inner| Process { inner })
    }
}

impl Process {
    pub fn new(config: ProcessConfig) -> Self {
        Process {
            inner: Arc::new(ProcessInner {
                config,
                controllers: Mutex::new(IndexMap::new()),
                started: Mutex::new(false),
                unpublished: Mutex::new(IndexSet::new()),
                published: Mutex::new(Vec::new()),
                spawned: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn config(&self) -> &ProcessConfig {
        &self.inner.config
    }

    pub fn name(&self) -> &str {
        &self.inner.config.name
    }

    pub fn downgrade(&self) -> WeakProcess {
        WeakProcess(Arc::downgrade(&self.inner))
    }

    fn is_started(&self) -> bool {
        *lock(&self.inner.started)
    }

    fn timeout(&self, timeout: Option<Duration>) -> Option<Duration> {
        timeout.or_else(|| self.inner.config.hook_timeout())
    }

    /// Set up a controller's parts and register it. On a started Process
    /// the controller is started and the fleet republished.
    pub async fn add_controller(
        &self,
        controller: Controller,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let mri = controller.mri().to_string();
        {
            let mut controllers = lock(&self.inner.controllers);
            if controllers.contains_key(&mri) {
                return Err(Error::Validation(format!(
                    "controller {} already exists in {}",
                    mri,
                    self.name()
                )));
            }
            controllers.insert(mri.clone(), controller.clone());
        }
        if let Err(e) = controller.setup(self) {
            lock(&self.inner.controllers).shift_remove(&mri);
            controller.detach();
            return Err(e);
        }
        debug!(process = self.name(), %mri, "added controller");
        if self.is_started() {
            self.start_controllers(vec![controller], timeout).await?;
            self.publish(timeout).await?;
        }
        Ok(())
    }

    /// Stop a controller (if started) and forget it.
    pub async fn remove_controller(&self, mri: &str, timeout: Option<Duration>) -> Result<()> {
        let controller = self.get_controller(mri)?;
        if self.is_started() {
            controller
                .run_hooks(HookKind::ProcessStop, HookArgs::default(), self.timeout(timeout))
                .await?;
        }
        lock(&self.inner.controllers).shift_remove(mri);
        lock(&self.inner.unpublished).shift_remove(mri);
        controller.detach();
        debug!(process = self.name(), mri, "removed controller");
        if self.is_started() {
            self.publish(timeout).await?;
        }
        Ok(())
    }

    async fn start_controllers(
        &self,
        controllers: Vec<Controller>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let timeout = self.timeout(timeout);
        let results = join_all(controllers.iter().map(|c| {
            c.run_hooks_infos(HookKind::ProcessStart, HookArgs::default(), timeout)
        }))
        .await;
        let mut unpublished = Vec::new();
        for result in results {
            let part_info = result?;
            unpublished.extend(filter_values(&part_info, |i| match i {
                Info::Unpublished(u) => Some(u.mri.clone()),
                _ => None,
            }));
        }
        lock(&self.inner.unpublished).extend(unpublished);
        Ok(())
    }

    async fn publish(&self, timeout: Option<Duration>) -> Result<()> {
        let published: Vec<String> = {
            let unpublished = lock(&self.inner.unpublished);
            self.mri_list()
                .into_iter()
                .filter(|mri| !unpublished.contains(mri))
                .collect()
        };
        *lock(&self.inner.published) = published.clone();
        let args = HookArgs {
            published,
            ..HookArgs::default()
        };
        let timeout = self.timeout(timeout);
        let results = join_all(
            self.controllers()
                .iter()
                .map(|c| c.run_hooks(HookKind::ProcessPublish, args.clone(), timeout)),
        )
        .await;
        for result in results {
            result?;
        }
        Ok(())
    }

    /// Start every controller, then publish the fleet.
    pub async fn start(&self, timeout: Option<Duration>) -> Result<()> {
        info!(process = self.name(), "starting");
        *lock(&self.inner.started) = true;
        self.start_controllers(self.controllers(), timeout).await?;
        self.publish(timeout).await
    }

    /// Stop every controller, then wait for outstanding spawned tasks.
    pub async fn stop(&self, timeout: Option<Duration>) -> Result<()> {
        info!(process = self.name(), "stopping");
        let hook_timeout = self.timeout(timeout);
        let controllers = self.controllers();
        let results = join_all(
            controllers
                .iter()
                .map(|c| c.run_hooks(HookKind::ProcessStop, HookArgs::default(), hook_timeout)),
        )
        .await;
        *lock(&self.inner.started) = false;
        for result in results {
            result?;
        }
        let outstanding: Vec<DoneSignal> = lock(&self.inner.spawned).drain(..).collect();
        let stop_timeout = timeout.or_else(|| self.inner.config.stop_timeout());
        for done in outstanding {
            done.wait(stop_timeout).await?;
        }
        Ok(())
    }

    /// Run `future` on the pool, tracked until `stop`.
    pub fn spawn<T, F>(&self, future: F) -> Spawned<T>
    where
        T: Clone + Send + 'static,
        F: Future<Output = Result<T>> + Send + 'static,
    {
        let spawned = Spawned::spawn(future);
        let mut tracked = lock(&self.inner.spawned);
        tracked.retain(|done| !done.ready());
        tracked.push(spawned.done_signal());
        spawned
    }

    pub fn get_controller(&self, mri: &str) -> Result<Controller> {
        lock(&self.inner.controllers)
            .get(mri)
            .cloned()
            .ok_or_else(|| Error::Field(format!("no controller {}", mri)))
    }

    fn controllers(&self) -> Vec<Controller> {
        lock(&self.inner.controllers).values().cloned().collect()
    }

    /// Every MRI, in insertion order.
    pub fn mri_list(&self) -> Vec<String> {
        lock(&self.inner.controllers).keys().cloned().collect()
    }

    /// MRIs visible to clients: everything not reported as unpublished.
    pub fn published(&self) -> Vec<String> {
        lock(&self.inner.published).clone()
    }
}
