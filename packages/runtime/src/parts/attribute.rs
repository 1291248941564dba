use std::sync::Arc;

use malcolm_core::tags::config_tag;
use malcolm_core::{VMeta, Value};

use crate::part::{Part, PartRegistrar};
use crate::Result;

/// One attribute named after the part.
///
/// Writeable attributes use the default setter; a config iteration makes
/// the value part of a saved design.
pub struct AttributePart {
    name: String,
    meta: VMeta,
    initial: Option<Value>,
}

impl AttributePart {
    pub fn new(name: &str, meta: VMeta, initial: Option<Value>) -> Self {
        AttributePart {
            name: name.to_string(),
            meta,
            initial,
        }
    }

    pub fn writeable(mut self, writeable: bool) -> Self {
        self.meta = self.meta.writeable(writeable);
        self
    }

    pub fn with_config(mut self, iteration: u32) -> Self {
        self.meta = self.meta.with_tag(config_tag(iteration));
        self
    }
}

impl Part for AttributePart {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        let attr = self.meta.create_attribute_model(self.initial.clone())?;
        registrar.add_attribute_model(&self.name, attr, None)?;
        Ok(())
    }
}
