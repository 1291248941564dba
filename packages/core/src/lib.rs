//! Malcolm core: the typed data layer
//!
//! Everything a Block is made of, without any runtime:
//! - `Value`: the ordered tree every model serializes to
//! - `Path`: `[mri, field, ...]` with the identifier grammar
//! - Metas (`VMeta`, `MapMeta`, `MethodMeta`, `BlockMeta`): validation
//! - Models (`AttributeModel`, `MethodModel`, `BlockModel`): state
//! - `Request` / `Response`: the messages clients exchange with blocks
//! - `Notifier`: subscription tree that squashes and dispatches changes
//!
//! # Example
//!
//! ```rust
//! use malcolm_core::{BlockModel, NumberType, VMeta, Value};
//!
//! let mut block = BlockModel::new("A counter");
//! let counter = VMeta::number(NumberType::Int32, "Current count")
//!     .create_attribute_model(Some(Value::from(0)))
//!     .unwrap();
//! block.set_endpoint("counter", counter.into());
//! assert_eq!(block.meta.fields, vec!["counter"]);
//! ```

mod alarm;
mod error;
pub mod generator;
pub mod meta;
pub mod model;
pub mod notifier;
mod path;
pub mod request;
pub mod serialize;
mod value;

pub use alarm::{Alarm, AlarmSeverity, AlarmStatus, TimeStamp};
pub use error::{Error, ErrorKind, Result};
pub use generator::{CompoundGenerator, Dimension};
pub use meta::{
    tags, BlockMeta, Display, MapMeta, MetaBase, MetaKind, MethodMeta, NumberType, VMeta,
};
pub use model::{AttributeModel, BlockModel, Change, Endpoint, MethodLog, MethodModel};
pub use notifier::Notifier;
pub use path::{
    camel_to_title, validate_field_name, validate_mri, validate_part_name, Path, PathError,
};
pub use request::{deliver, Callback, Delivery, Request, RequestKind, Response};
pub use serialize::{deserialize_object, Object};
pub use value::{Map, Value};
