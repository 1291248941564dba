//! Malcolm runtime: Controllers, Parts, Hooks, Contexts and the Process.
//!
//! A [`Process`] hosts [`Controller`]s by MRI. Each Controller owns one
//! Block behind a lock and is composed of [`Part`]s that contribute fields
//! and handle the lifecycle phases ([`HookKind`]) the Controller fans out.
//! Callers talk to blocks through a [`Context`].
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use malcolm_runtime::parts::HelloPart;
//! use malcolm_runtime::{Context, Controller, Process, ProcessConfig};
//!
//! let process = Process::new(ProcessConfig::default());
//! let hello = Controller::new("hello", "A greeter")?;
//! hello.add_part(Arc::new(HelloPart::new("hello")))?;
//! process.add_controller(hello, None).await?;
//! process.start(None).await?;
//!
//! let mut ctx = Context::new(process.clone());
//! let out = ctx.post("hello.greet", [("name", "me")], None).await?;
//! assert_eq!(out.field("greeting").and_then(|v| v.as_str()), Some("Hello me"));
//! ```

use std::sync::{Mutex, MutexGuard};

pub mod block;
pub mod config;
pub mod context;
pub mod controller;
pub mod hook;
pub mod info;
pub mod part;
pub mod parts;
pub mod process;
pub mod spawned;
pub mod statesets;

pub use malcolm_core::{Error, ErrorKind, Result};

pub use block::{BlockCell, BlockState};
pub use config::{ManagerConfig, ProcessConfig, RunnableConfig};
pub use context::{BlockView, Context, ContextStopper, Matcher, RequestFuture};
pub use controller::manager::ManagerController;
pub use controller::runnable::RunnableController;
pub use controller::stateful::BasicStateful;
pub use controller::{Controller, Lifecycle, StatefulController, WeakController};
pub use hook::{hook_fn, HookArgs, HookCall, HookFn, HookKind, HookReturn};
pub use info::{Info, InfoKind, PartInfo};
pub use part::{AttributeHandle, Part, PartRegistrar, PostHandler, PutHandler, Reporter};
pub use process::Process;
pub use spawned::Spawned;
pub use statesets::StateSet;

/// Lock a std mutex, tolerating poison: every guarded structure here stays
/// consistent between statements.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
