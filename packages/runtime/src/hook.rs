//! Phase fan-out.
//!
//! A Controller builds one [`Hook`] per child registered for a phase.
//! [`start_hooks`] spawns every handler onto the tokio pool with a shared
//! result queue; [`wait_hooks`] drains that queue. The first failure other
//! than `Aborted` stops every still-running hook and is re-raised once they
//! have finished (or the timeout elapses).

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use indexmap::{IndexMap, IndexSet};
use malcolm_core::{CompoundGenerator, Map, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::context::{Context, ContextStopper};
use crate::info::{Info, LayoutInfo, PartInfo};
use crate::{Error, Result};

/// Every phase a Controller can fan out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    ProcessStart,
    ProcessStop,
    ProcessPublish,
    Init,
    Halt,
    Reset,
    Disable,
    Layout,
    Load,
    Save,
    ReportPorts,
    ReportExportable,
    ReportStatus,
    Validate,
    Configure,
    PostConfigure,
    Run,
    PostRunArmed,
    PostRunReady,
    Pause,
    Seek,
    Resume,
    Abort,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}Hook", self)
    }
}

impl HookKind {
    /// Check a handler's return value against what this phase allows.
    pub fn validate_return(&self, child: &str, ret: HookReturn) -> Result<HookReturn> {
        let allowed: Option<fn(&Info) -> bool> = match self {
            HookKind::ProcessStart => Some(|i| matches!(i, Info::Unpublished(_))),
            HookKind::Validate => Some(|i| matches!(i, Info::ParameterTweak(_))),
            HookKind::ReportExportable => Some(|i| matches!(i, Info::PartExportable(_))),
            HookKind::Layout => Some(|i| matches!(i, Info::Layout(_))),
            HookKind::ReportPorts => Some(|i| matches!(i, Info::Port(_))),
            _ => None,
        };
        let problem = match &ret {
            HookReturn::None => None,
            HookReturn::Structure(_) if *self == HookKind::Save => None,
            HookReturn::Structure(v) => Some(format!("a structure {}", v)),
            HookReturn::Infos(_) if *self == HookKind::Save => Some("infos".to_string()),
            HookReturn::Infos(infos) => allowed.and_then(|ok| {
                infos
                    .iter()
                    .find(|i| !ok(i))
                    .map(|i| format!("{}", i.kind()))
            }),
        };
        match problem {
            Some(what) => Err(Error::Unexpected(format!(
                "{} of {} returned {}",
                self, child, what
            ))),
            None => Ok(ret),
        }
    }
}

/// Reports a part's completed steps during Run.
#[derive(Clone)]
pub struct ProgressReporter(Arc<dyn Fn(&str, usize) + Send + Sync>);

impl ProgressReporter {
    pub fn new(f: impl Fn(&str, usize) + Send + Sync + 'static) -> Self {
        ProgressReporter(Arc::new(f))
    }

    pub fn report(&self, part: &str, steps: usize) {
        (self.0)(part, steps)
    }
}

impl fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ProgressReporter")
    }
}

/// Typed arguments for a phase; each phase fills what it needs.
#[derive(Debug, Clone, Default)]
pub struct HookArgs {
    pub part_info: PartInfo,
    pub generator: Option<CompoundGenerator>,
    pub axes_to_move: Vec<String>,
    pub completed_steps: usize,
    pub steps_to_do: usize,
    /// Extra keyword parameters, filtered to what the part demands.
    pub params: Map,
    /// This part's saved structure (Load).
    pub structure: Value,
    /// The requested layout (Layout).
    pub layout: Vec<LayoutInfo>,
    /// Published MRIs (ProcessPublish).
    pub published: Vec<String>,
    pub progress: Option<ProgressReporter>,
}

/// What a hook handler returns.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum HookReturn {
    #[default]
    None,
    Infos(Vec<Info>),
    /// A saved structure (Save).
    Structure(Value),
}

impl HookReturn {
    pub fn infos(self) -> Vec<Info> {
        match self {
            HookReturn::Infos(infos) => infos,
            _ => Vec::new(),
        }
    }
}

/// Everything a handler receives.
pub struct HookCall {
    pub kind: HookKind,
    /// The part (or controller) name the hook runs for.
    pub child: String,
    pub context: Context,
    pub args: HookArgs,
}

pub type HookFn = Arc<dyn Fn(HookCall) -> BoxFuture<'static, Result<HookReturn>> + Send + Sync>;

/// Wrap an async closure as a [`HookFn`].
pub fn hook_fn<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookCall) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<HookReturn>> + Send + 'static,
{
    Arc::new(move |call| f(call).boxed())
}

/// One child's part in a phase.
pub struct Hook {
    pub func: HookFn,
    pub call: HookCall,
}

impl Hook {
    pub fn new(kind: HookKind, child: &str, func: HookFn, context: Context, args: HookArgs) -> Self {
        Hook {
            func,
            call: HookCall {
                kind,
                child: child.to_string(),
                context,
                args,
            },
        }
    }
}

/// Hooks in flight and the queue they report on.
pub struct StartedHooks {
    kind: Option<HookKind>,
    rx: mpsc::UnboundedReceiver<(String, Result<HookReturn>)>,
    stoppers: IndexMap<String, ContextStopper>,
}

impl StartedHooks {
    pub fn stoppers(&self) -> Vec<ContextStopper> {
        self.stoppers.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stoppers.is_empty()
    }
}

/// Spawn every hook's handler on its Process with a shared result queue.
pub fn start_hooks(hooks: Vec<Hook>) -> StartedHooks {
    let (tx, rx) = mpsc::unbounded_channel();
    let mut stoppers = IndexMap::new();
    let mut kind = None;
    for hook in hooks {
        let Hook { func, call } = hook;
        let child = call.child.clone();
        let hook_kind = call.kind;
        kind = Some(hook_kind);
        stoppers.insert(child.clone(), call.context.stopper());
        let process = call.context.process().clone();
        let future = func(call);
        let tx = tx.clone();
        process.spawn(async move {
            let result = match tokio::spawn(future).await {
                Ok(r) => r.and_then(|ret| hook_kind.validate_return(&child, ret)),
                Err(e) => Err(Error::Other(format!("{} of {} failed: {}", hook_kind, child, e))),
            };
            let _ = tx.send((child, result));
            Ok(())
        });
    }
    StartedHooks { kind, rx, stoppers }
}

/// Wait for every started hook, returning `{child: HookReturn}`.
pub async fn wait_hooks(
    mut started: StartedHooks,
    timeout: Option<Duration>,
) -> Result<IndexMap<String, HookReturn>> {
    let deadline = timeout.map(|t| Instant::now() + t);
    let mut remaining: IndexSet<String> = started.stoppers.keys().cloned().collect();
    let mut results = IndexMap::new();
    let mut first_error: Option<Error> = None;
    let stop_remaining = |remaining: &IndexSet<String>, stoppers: &IndexMap<String, ContextStopper>| {
        for name in remaining {
            if let Some(s) = stoppers.get(name) {
                s.stop();
            }
        }
    };
    while !remaining.is_empty() {
        let next = match deadline {
            Some(d) => match tokio::time::timeout_at(d, started.rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    stop_remaining(&remaining, &started.stoppers);
                    if let Some(e) = first_error {
                        return Err(e);
                    }
                    let names: Vec<_> = remaining.iter().cloned().collect();
                    return Err(Error::Timeout(format!(
                        "{} still running after {:?}: {:?}",
                        started.kind.map(|k| k.to_string()).unwrap_or_default(),
                        timeout.unwrap_or_default(),
                        names
                    )));
                }
            },
            None => started.rx.recv().await,
        };
        // each task sends exactly once, and start_hooks drops its sender
        let Some((child, result)) = next else {
            break;
        };
        remaining.shift_remove(&child);
        match result {
            Ok(ret) => {
                results.insert(child, ret);
            }
            Err(e) if e.is_aborted() => {
                debug!(%child, "hook aborted");
            }
            Err(e) => {
                warn!(%child, error = %e, "hook failed");
                if first_error.is_none() {
                    stop_remaining(&remaining, &started.stoppers);
                    first_error = Some(e);
                }
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(results),
    }
}

/// Contexts of hooks currently running on one Controller.
#[derive(Default)]
pub struct ActiveHooks {
    inner: Mutex<(u64, HashMap<u64, Vec<ContextStopper>>)>,
}

impl ActiveHooks {
    pub fn register(&self, stoppers: Vec<ContextStopper>) -> u64 {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.0 += 1;
        let id = inner.0;
        inner.1.insert(id, stoppers);
        id
    }

    pub fn unregister(&self, id: u64) {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .1
            .remove(&id);
    }

    /// Stop every running hook's Context.
    pub fn stop_all(&self) {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for stopper in inner.1.values().flatten() {
            stopper.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::info::{ParameterTweakInfo, UnpublishedInfo};
    use crate::{Process, ProcessConfig};
    use std::time::Instant as StdInstant;

    fn process() -> Process {
        Process::new(ProcessConfig::default())
    }

    fn hook(p: &Process, kind: HookKind, child: &str, func: HookFn) -> Hook {
        Hook::new(kind, child, func, Context::new(p.clone()), HookArgs::default())
    }

    fn sleeper(millis: u64) -> HookFn {
        hook_fn(move |mut call: HookCall| async move {
            call.context.sleep(Duration::from_millis(millis)).await?;
            Ok(HookReturn::None)
        })
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_cancels_peers() {
        let p = process();
        let aborted = Arc::new(Mutex::new(None));
        let seen = aborted.clone();
        let a = hook_fn(move |mut call: HookCall| {
            let seen = seen.clone();
            async move {
                let r = call.context.sleep(Duration::from_secs(1)).await;
                *seen.lock().unwrap() = Some(r.clone());
                r.map(|_| HookReturn::None)
            }
        });
        let b = hook_fn(|_call: HookCall| async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Err(Error::Other("ValueError: bad".into()))
        });
        let start = StdInstant::now();
        let started = start_hooks(vec![
            hook(&p, HookKind::Run, "a", a),
            hook(&p, HookKind::Run, "b", b),
        ]);
        let err = wait_hooks(started, Some(Duration::from_secs(5))).await.unwrap_err();
        assert_eq!(err, Error::Other("ValueError: bad".into()));
        assert!(start.elapsed() < Duration::from_millis(500));
        let a_result = aborted.lock().unwrap().clone().unwrap();
        assert!(a_result.unwrap_err().is_aborted());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn hooks_run_concurrently() {
        let p = process();
        let hooks = (0..4)
            .map(|i| hook(&p, HookKind::Configure, &format!("p{}", i), sleeper(100)))
            .collect();
        let start = StdInstant::now();
        let results = wait_hooks(start_hooks(hooks), None).await.unwrap();
        assert_eq!(results.len(), 4);
        assert!(start.elapsed() < Duration::from_millis(350));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn timeout_stops_everything() {
        let p = process();
        let started = start_hooks(vec![hook(&p, HookKind::Run, "slow", sleeper(2000))]);
        let err = wait_hooks(started, Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), malcolm_core::ErrorKind::Timeout);
    }

    #[test]
    fn return_validation() {
        let tweak = HookReturn::Infos(vec![Info::ParameterTweak(ParameterTweakInfo {
            parameter: "exposure".into(),
            value: Value::from(0.1),
        })]);
        assert!(HookKind::Validate.validate_return("p", tweak.clone()).is_ok());
        assert!(HookKind::ProcessStart.validate_return("p", tweak.clone()).is_err());
        assert!(HookKind::Configure.validate_return("p", tweak).is_ok());
        let unpublished = HookReturn::Infos(vec![Info::Unpublished(UnpublishedInfo {
            mri: "CHILD".into(),
        })]);
        assert!(HookKind::ProcessStart.validate_return("p", unpublished).is_ok());
        assert!(HookKind::Save
            .validate_return("p", HookReturn::Structure(Value::map()))
            .is_ok());
        assert!(HookKind::Run
            .validate_return("p", HookReturn::Structure(Value::map()))
            .is_err());
    }
}
