//! Stock Parts.

mod attribute;
mod child;
mod hello;
mod label;
mod runnable_child;
mod ticker;

pub use attribute::AttributePart;
pub use child::ChildPart;
pub use hello::HelloPart;
pub use label::LabelPart;
pub use runnable_child::RunnableChildPart;
pub use ticker::TickerPart;
