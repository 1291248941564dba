//! The block lock: a Controller's model and notifier behind one mutex.
//!
//! Every mutation goes through [`BlockCell::changes_squashed`], which holds
//! the lock for the duration of the closure, squashes the model changes into
//! one notifier batch, and delivers the resulting responses only after the
//! lock is released. Nothing here is held across an `.await`.

use std::sync::{Arc, Mutex, MutexGuard};

use malcolm_core::{
    deliver, Alarm, BlockModel, Change, Endpoint, Error, MethodLog, MethodMeta, Notifier, Request,
    Result, VMeta, Value,
};

/// The state guarded by the block lock.
pub struct BlockState {
    pub model: BlockModel,
    pub notifier: Notifier,
}

impl BlockState {
    fn push(&mut self, changes: Vec<Change>, prefix: &[String]) -> Result<()> {
        self.notifier
            .add_squashed_changes(changes.into_iter().map(|c| c.under(prefix)).collect())
    }

    /// Attach or replace an endpoint.
    pub fn set_endpoint(&mut self, name: &str, endpoint: Endpoint) -> Result<()> {
        let changes = self.model.set_endpoint(name, endpoint);
        self.push(changes, &[])
    }

    /// Remove an endpoint; `meta.fields` updates in the same batch.
    pub fn remove_endpoint(&mut self, name: &str) -> Result<()> {
        let changes = self.model.remove_endpoint(name)?;
        self.push(changes, &[])
    }

    /// Set an attribute value, returning the validated value.
    pub fn set_value(
        &mut self,
        name: &str,
        value: &Value,
        set_alarm_ts: bool,
        alarm: Option<Alarm>,
    ) -> Result<Value> {
        let attr = self
            .model
            .attribute_mut(name)
            .ok_or_else(|| Error::Field(format!("no attribute '{}'", name)))?;
        let changes = attr.set_value(value, set_alarm_ts, alarm)?;
        let validated = attr.value.clone();
        self.push(changes, &[name.to_string()])?;
        Ok(validated)
    }

    pub fn set_alarm(&mut self, name: &str, alarm: Alarm) -> Result<()> {
        let attr = self
            .model
            .attribute_mut(name)
            .ok_or_else(|| Error::Field(format!("no attribute '{}'", name)))?;
        let changes = attr.set_alarm(alarm);
        self.push(changes, &[name.to_string()])
    }

    pub fn set_writeable(&mut self, name: &str, writeable: bool) -> Result<()> {
        let endpoint = self
            .model
            .endpoints
            .get_mut(name)
            .ok_or_else(|| Error::Field(format!("no endpoint '{}'", name)))?;
        let changes = endpoint.set_writeable(writeable);
        self.push(changes, &[name.to_string()])
    }

    /// Replace an attribute's meta, keeping its current writeable flag.
    pub fn set_attribute_meta(&mut self, name: &str, mut meta: VMeta) -> Result<()> {
        let attr = self
            .model
            .attribute_mut(name)
            .ok_or_else(|| Error::Field(format!("no attribute '{}'", name)))?;
        meta.base.writeable = attr.meta.base.writeable;
        let change = Change::set(["meta"], meta.to_value());
        attr.meta = meta;
        self.push(vec![change], &[name.to_string()])
    }

    /// Replace a method's meta, keeping its current writeable flag.
    pub fn set_method_meta(&mut self, name: &str, mut meta: MethodMeta) -> Result<()> {
        let method = self
            .model
            .method_mut(name)
            .ok_or_else(|| Error::Field(format!("no method '{}'", name)))?;
        meta.base.writeable = method.meta.base.writeable;
        let change = Change::set(["meta"], meta.to_value());
        method.meta = meta;
        self.push(vec![change], &[name.to_string()])
    }

    pub fn set_label(&mut self, label: &str) -> Result<()> {
        let changes = self.model.set_label(label);
        self.push(changes, &[])
    }

    pub fn set_took(&mut self, name: &str, took: MethodLog) -> Result<()> {
        let method = self
            .model
            .method_mut(name)
            .ok_or_else(|| Error::Field(format!("no method '{}'", name)))?;
        let changes = method.set_took(took);
        self.push(changes, &[name.to_string()])
    }

    pub fn set_returned(&mut self, name: &str, returned: MethodLog) -> Result<()> {
        let method = self
            .model
            .method_mut(name)
            .ok_or_else(|| Error::Field(format!("no method '{}'", name)))?;
        let changes = method.set_returned(returned);
        self.push(changes, &[name.to_string()])
    }

    /// Current value of an attribute.
    pub fn value(&self, name: &str) -> Result<Value> {
        self.model
            .attribute(name)
            .map(|a| a.value.clone())
            .ok_or_else(|| Error::Field(format!("no attribute '{}'", name)))
    }
}

/// A block model and its notifier behind the block lock.
pub struct BlockCell {
    mri: String,
    state: Mutex<BlockState>,
}

impl BlockCell {
    pub fn new(mri: &str, description: &str) -> Arc<Self> {
        let model = BlockModel::new(description);
        let notifier = Notifier::new(mri, model.to_value());
        Arc::new(BlockCell {
            mri: mri.to_string(),
            state: Mutex::new(BlockState { model, notifier }),
        })
    }

    pub fn mri(&self) -> &str {
        &self.mri
    }

    fn lock(&self) -> MutexGuard<'_, BlockState> {
        // a panic inside a squash leaves the model consistent per change
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mutate the block inside one squash; responses go out after unlock.
    pub fn changes_squashed<R>(&self, f: impl FnOnce(&mut BlockState) -> Result<R>) -> Result<R> {
        let (result, deliveries) = {
            let mut state = self.lock();
            state.notifier.begin_squash();
            let result = f(&mut state);
            let deliveries = state.notifier.end_squash();
            (result, deliveries)
        };
        deliver(deliveries);
        result
    }

    /// Read the model under the lock.
    pub fn read<R>(&self, f: impl FnOnce(&BlockModel) -> R) -> R {
        f(&self.lock().model)
    }

    /// Serialized subtree at a block-relative path.
    pub fn get(&self, path: &[String]) -> Result<Value> {
        self.lock().model.get(path)
    }

    pub fn value(&self, name: &str) -> Result<Value> {
        self.lock().value(name)
    }

    pub fn handle_subscribe(&self, request: &Request) {
        let deliveries = self.lock().notifier.handle_subscribe(request);
        deliver(deliveries);
    }

    pub fn handle_unsubscribe(&self, request: &Request) {
        let deliveries = self.lock().notifier.handle_unsubscribe(request);
        deliver(deliveries);
    }

    pub fn subscription_count(&self) -> usize {
        self.lock().notifier.subscription_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use malcolm_core::{path, Callback, Response, VMeta};
    use std::sync::Mutex as StdMutex;

    fn cell() -> Arc<BlockCell> {
        let cell = BlockCell::new("blk", "test block");
        cell.changes_squashed(|s| {
            s.set_endpoint(
                "attr",
                VMeta::string("a").create_attribute_model(None)?.into(),
            )
        })
        .unwrap();
        cell
    }

    #[test]
    fn squash_delivers_after_unlock() {
        let cell = cell();
        let seen = Arc::new(StdMutex::new(Vec::new()));
        let sink = seen.clone();
        let reader = cell.clone();
        // the callback re-enters the block, which would deadlock under the lock
        let cb = Callback::new(move |r| {
            let _ = reader.value("attr");
            sink.lock().unwrap().push(r);
        });
        cell.handle_subscribe(&Request::subscribe(1, path!("blk.attr.value"), false, cb));
        cell.changes_squashed(|s| s.set_value("attr", &Value::from("x"), false, None))
            .unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], Response::Update { id: 1, value: Value::from("x") });
    }

    #[test]
    fn fields_follow_endpoints() {
        let cell = cell();
        cell.changes_squashed(|s| s.remove_endpoint("attr")).unwrap();
        assert!(cell.read(|m| m.meta.fields.is_empty()));
        assert_eq!(
            cell.get(&["meta".to_string(), "fields".to_string()]).unwrap(),
            Value::array()
        );
    }

    #[test]
    fn failed_closure_still_closes_the_squash() {
        let cell = cell();
        let err = cell
            .changes_squashed(|s| s.set_value("missing", &Value::Null, true, None))
            .unwrap_err();
        assert_eq!(err.kind(), malcolm_core::ErrorKind::Field);
        cell.changes_squashed(|s| s.set_value("attr", &Value::from("y"), true, None))
            .unwrap();
        assert_eq!(cell.value("attr").unwrap(), Value::from("y"));
    }
}
