//! Malcolm: device-control middleware where every device is a Block of
//! attributes and methods reached through Get, Put, Post and Subscribe on
//! paths of the form `[mri, field, ...]`.
//!
//! The typed data layer lives in [`core`]; Controllers, Parts, Contexts and
//! the Process live in [`runtime`].

pub use malcolm_core as core;
pub use malcolm_runtime as runtime;

pub use malcolm_core::{Error, ErrorKind, Path, Result, Value};
pub use malcolm_runtime::{Context, Controller, Process, ProcessConfig};
