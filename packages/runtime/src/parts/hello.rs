use std::sync::Arc;
use std::time::Duration;

use malcolm_core::{MethodMeta, NumberType, VMeta, Value};
use tracing::debug;

use crate::part::{Part, PartRegistrar, PostHandler};
use crate::{Error, Result};

/// Demo methods: `greet` and `error`.
pub struct HelloPart {
    name: String,
}

impl HelloPart {
    pub fn new(name: &str) -> Self {
        HelloPart {
            name: name.to_string(),
        }
    }
}

impl Part for HelloPart {
    fn name(&self) -> &str {
        &self.name
    }

    fn setup(self: Arc<Self>, registrar: &mut PartRegistrar<'_>) -> Result<()> {
        let greet = MethodMeta::new("Optionally sleep <sleep> seconds, then return a greeting to <name>")
            .arg("name", VMeta::string("The name of the person to greet"))
            .arg_default(
                "sleep",
                VMeta::number(NumberType::Float64, "Time to wait before returning"),
                0.0,
            )
            .ret("greeting", VMeta::string("The manufactured greeting"))
            .writeable(true);
        registrar.add_method_model(
            "greet",
            greet,
            PostHandler::with_context(|mut ctx, params| async move {
                let name = params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let sleep = params.get("sleep").and_then(Value::as_f64).unwrap_or(0.0);
                if sleep > 0.0 {
                    ctx.sleep(Duration::from_secs_f64(sleep)).await?;
                }
                debug!(%name, "greeting");
                Ok(Value::from([("greeting", format!("Hello {}", name))]))
            }),
        )?;
        registrar.add_method_model(
            "error",
            MethodMeta::new("Raise an error").writeable(true),
            PostHandler::new(|_| async { Err(Error::Other("You called method error()".into())) }),
        )
    }
}
