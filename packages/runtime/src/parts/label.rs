use std::sync::{Arc, Mutex};

use malcolm_core::tags::{config_tag, Widget};
use malcolm_core::{VMeta, Value};

use crate::info::{Info, LabelInfo};
use crate::lock;
use crate::part::{AttributeHandle, Part, PartRegistrar, PutHandler, Reporter};
use crate::{Error, Result};

/// A writeable `label` attribute that also sets the block label.
pub struct LabelPart {
    initial: String,
    handle: Mutex<Option<(AttributeHandle, Reporter)>>,
}

impl LabelPart {
    pub fn new(initial: &str) -> Self {
        LabelPart {
            initial: initial.to_string(),
            handle: Mutex::new(None),
        }
    }

    fn set_label(&self, value: Value) -> Result<()> {
        let (handle, reporter) = lock(&self.handle)
            .clone()
            .ok_or_else(|| Error::Unexpected("label part is not set up".to_string()))?;
        let label = handle.set_value(value)?;
        reporter.report(Info::Label(LabelInfo {
            label: label.as_str().unwrap_or_default().to_string(),
        }))
    }
}

impl Part for LabelPart {
    fn name(&self) -> &str {
        "label"
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        let meta = VMeta::string("Label for the block")
            .with_tags([Widget::TextInput.tag(), config_tag(1)])
            .writeable(true);
        let this = self.clone();
        let handle = registrar.add_attribute_model(
            "label",
            meta.create_attribute_model(Some(Value::from(self.initial.as_str())))?,
            Some(PutHandler::new(move |value| {
                let this = this.clone();
                async move { this.set_label(value) }
            })),
        )?;
        *lock(&self.handle) = Some((handle, registrar.reporter()));
        if !self.initial.is_empty() {
            registrar.report(Info::Label(LabelInfo {
                label: self.initial.clone(),
            }))?;
        }
        Ok(())
    }
}
