use std::sync::{Arc, Mutex};
use std::time::Duration;

use malcolm_core::tags::Widget;
use malcolm_core::{NumberType, VMeta, Value};

use crate::hook::{hook_fn, HookCall, HookKind, HookReturn};
use crate::lock;
use crate::part::{AttributeHandle, Part, PartRegistrar};
use crate::{Error, Result};

/// A demo motor: on Run it steps its axis through the configured points,
/// one point duration each, reporting progress as it goes.
pub struct TickerPart {
    name: String,
    axis: String,
    handle: Mutex<Option<AttributeHandle>>,
}

impl TickerPart {
    /// `axis` names both the generator axis and the attribute it drives.
    pub fn new(name: &str, axis: &str) -> Self {
        TickerPart {
            name: name.to_string(),
            axis: axis.to_string(),
            handle: Mutex::new(None),
        }
    }

    async fn run(&self, mut call: HookCall) -> Result<HookReturn> {
        let handle = lock(&self.handle)
            .clone()
            .ok_or_else(|| Error::Unexpected(format!("{} is not set up", self.name)))?;
        let generator = call
            .args
            .generator
            .clone()
            .ok_or_else(|| Error::Validation("no generator to run".to_string()))?;
        let duration = Duration::from_secs_f64(generator.duration.max(0.0));
        let start = call.args.completed_steps;
        for step in start..start + call.args.steps_to_do {
            if let Some(position) = generator.positions(step).get(&self.axis) {
                handle.set_value(*position)?;
            }
            call.context.sleep(duration).await?;
            if let Some(progress) = &call.args.progress {
                progress.report(&self.name, step + 1);
            }
        }
        Ok(HookReturn::None)
    }
}

impl Part for TickerPart {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        let meta = VMeta::number(NumberType::Float64, "Current position of the axis")
            .with_tag(Widget::TextUpdate.tag());
        let handle =
            registrar.add_attribute_model(&self.axis, meta.create_attribute_model(Some(Value::from(0.0)))?, None)?;
        *lock(&self.handle) = Some(handle);
        let this = self.clone();
        registrar.hook(
            &[HookKind::Run],
            hook_fn(move |call| {
                let this = this.clone();
                async move { this.run(call).await }
            }),
        )
    }
}
