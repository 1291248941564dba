//! The in-process caller handle.
//!
//! A [`Context`] owns a response queue. Requests it issues carry a callback
//! that pushes onto that queue; every wait primitive drains the queue,
//! resolving futures, feeding subscription callbacks, and turning a queued
//! STOP into `Aborted`.
//!
//! # Example
//!
//! ```rust,ignore
//! let mut ctx = Context::new(process.clone());
//! ctx.put("counter.counter", 5, None).await?;
//! let value = ctx.get("counter.counter.value", None).await?;
//! ctx.when_matches("counter.counter.value", 5, None, Some(Duration::from_secs(1)))
//!     .await?;
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use malcolm_core::{Callback, Path, Request, Response, Value};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use crate::process::Process;
use crate::{Error, Result};

enum QueueItem {
    Response(Response),
    Stop,
    IgnoreMarker,
}

/// Cloneable handle that stops a Context from another task.
#[derive(Clone)]
pub struct ContextStopper {
    tx: mpsc::UnboundedSender<QueueItem>,
}

impl ContextStopper {
    pub fn stop(&self) {
        let _ = self.tx.send(QueueItem::Stop);
    }
}

/// A pending result owned by the Context that issued it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestFuture {
    id: u64,
}

impl RequestFuture {
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// What a `when_matches` wait is looking for.
#[derive(Clone)]
pub enum Matcher {
    Equals(Value),
    Predicate(Arc<dyn Fn(&Value) -> bool + Send + Sync>),
}

impl Matcher {
    pub fn predicate(f: impl Fn(&Value) -> bool + Send + Sync + 'static) -> Self {
        Matcher::Predicate(Arc::new(f))
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Matcher::Equals(good) => good == value,
            Matcher::Predicate(f) => f(value),
        }
    }
}

impl fmt::Debug for Matcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Matcher::Equals(v) => write!(f, "Equals({})", v),
            Matcher::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<Value> for Matcher {
    fn from(v: Value) -> Self {
        Matcher::Equals(v)
    }
}

impl From<&str> for Matcher {
    fn from(v: &str) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

impl From<String> for Matcher {
    fn from(v: String) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

impl From<bool> for Matcher {
    fn from(v: bool) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

impl From<i64> for Matcher {
    fn from(v: i64) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

impl From<i32> for Matcher {
    fn from(v: i32) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

impl From<f64> for Matcher {
    fn from(v: f64) -> Self {
        Matcher::Equals(Value::from(v))
    }
}

/// Anything a Context accepts as a request path.
pub trait IntoPath {
    fn into_path(self) -> Result<Path>;
}

impl IntoPath for Path {
    fn into_path(self) -> Result<Path> {
        Ok(self)
    }
}

impl IntoPath for &Path {
    fn into_path(self) -> Result<Path> {
        Ok(self.clone())
    }
}

impl IntoPath for &str {
    fn into_path(self) -> Result<Path> {
        Ok(Path::parse(self)?)
    }
}

impl IntoPath for String {
    fn into_path(self) -> Result<Path> {
        Ok(Path::parse(&self)?)
    }
}

impl IntoPath for &String {
    fn into_path(self) -> Result<Path> {
        Ok(Path::parse(self)?)
    }
}

impl IntoPath for Vec<String> {
    fn into_path(self) -> Result<Path> {
        Ok(Path::try_from_components(self)?)
    }
}

impl<const N: usize> IntoPath for [&str; N] {
    fn into_path(self) -> Result<Path> {
        Ok(Path::try_from_components(
            self.iter().map(|s| s.to_string()).collect(),
        )?)
    }
}

/// Callback invoked with each new value at a subscribed path.
pub type SubscriptionCallback = Box<dyn FnMut(Value) -> Result<()> + Send>;

enum Handler {
    Callback(SubscriptionCallback),
    When {
        future: u64,
        good: Matcher,
        bad_values: Vec<Value>,
    },
    /// Unsubscribe sent, waiting for the final Return.
    Closing,
}

struct Subscription {
    mri: String,
    handler: Handler,
}

enum Drained {
    Done,
    Deadline,
}

/// Per-caller handle: issues requests and multiplexes their responses.
pub struct Context {
    process: Process,
    next_id: u64,
    tx: mpsc::UnboundedSender<QueueItem>,
    rx: mpsc::UnboundedReceiver<QueueItem>,
    callback: Callback,
    pending: HashSet<u64>,
    results: HashMap<u64, Result<Value>>,
    subscriptions: HashMap<u64, Subscription>,
    errors: VecDeque<Error>,
    ignore_markers: usize,
}

impl Context {
    pub fn new(process: Process) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let sender = tx.clone();
        let callback = Callback::new(move |response| {
            let _ = sender.send(QueueItem::Response(response));
        });
        Context {
            process,
            next_id: 0,
            tx,
            rx,
            callback,
            pending: HashSet::new(),
            results: HashMap::new(),
            subscriptions: HashMap::new(),
            errors: VecDeque::new(),
            ignore_markers: 0,
        }
    }

    pub fn process(&self) -> &Process {
        &self.process
    }

    /// Queue a STOP; the current or next wait raises `Aborted`.
    pub fn stop(&self) {
        let _ = self.tx.send(QueueItem::Stop);
    }

    pub fn stopper(&self) -> ContextStopper {
        ContextStopper {
            tx: self.tx.clone(),
        }
    }

    /// STOPs queued before this call are dropped instead of raised.
    pub fn ignore_stops_before_now(&mut self) {
        self.ignore_markers += 1;
        let _ = self.tx.send(QueueItem::IgnoreMarker);
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn route(&self, mri: &str, request: Request) {
        debug!(mri, id = request.id, typeid = request.typeid(), "routing request");
        match self.process.get_controller(mri) {
            Ok(controller) => controller.handle_request(request),
            Err(error) => self.callback.call(Response::Error {
                id: request.id,
                error,
            }),
        }
    }

    fn issue(
        &mut self,
        path: impl IntoPath,
        build: impl FnOnce(u64, Path, Callback) -> Request,
    ) -> RequestFuture {
        let id = self.allocate_id();
        match path.into_path() {
            Ok(path) => {
                self.pending.insert(id);
                let mri = path.mri().to_string();
                let request = build(id, path, self.callback.clone());
                self.route(&mri, request);
            }
            Err(e) => {
                self.results.insert(id, Err(e));
            }
        }
        RequestFuture { id }
    }

    pub fn get_async(&mut self, path: impl IntoPath) -> RequestFuture {
        self.issue(path, Request::get)
    }

    pub fn put_async(&mut self, path: impl IntoPath, value: impl Into<Value>) -> RequestFuture {
        let value = value.into();
        self.issue(path, move |id, path, cb| Request::put(id, path, value, true, cb))
    }

    pub fn post_async(&mut self, path: impl IntoPath, params: impl Into<Value>) -> RequestFuture {
        let params = params.into();
        self.issue(path, move |id, path, cb| Request::post(id, path, params, cb))
    }

    pub async fn get(&mut self, path: impl IntoPath, timeout: Option<Duration>) -> Result<Value> {
        let future = self.get_async(path);
        self.wait_one(future, timeout).await
    }

    /// Put a value, returning the validated value the block now holds.
    pub async fn put(
        &mut self,
        path: impl IntoPath,
        value: impl Into<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let future = self.put_async(path, value);
        self.wait_one(future, timeout).await
    }

    pub async fn post(
        &mut self,
        path: impl IntoPath,
        params: impl Into<Value>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let future = self.post_async(path, params);
        self.wait_one(future, timeout).await
    }

    async fn wait_one(&mut self, future: RequestFuture, timeout: Option<Duration>) -> Result<Value> {
        let mut values = self.wait_all_futures(&[future], timeout).await?;
        Ok(values.pop().unwrap_or_default())
    }

    /// Subscribe to a path; `callback` runs inside this Context's waits.
    pub fn subscribe(
        &mut self,
        path: impl IntoPath,
        callback: impl FnMut(Value) -> Result<()> + Send + 'static,
    ) -> Result<u64> {
        let path = path.into_path()?;
        let id = self.allocate_id();
        self.open_subscription(id, path, Handler::Callback(Box::new(callback)));
        Ok(id)
    }

    fn open_subscription(&mut self, id: u64, path: Path, handler: Handler) {
        let mri = path.mri().to_string();
        self.subscriptions.insert(
            id,
            Subscription {
                mri: mri.clone(),
                handler,
            },
        );
        let request = Request::subscribe(id, path, false, self.callback.clone());
        self.route(&mri, request);
    }

    pub fn unsubscribe(&mut self, id: u64) -> Result<()> {
        let sub = self
            .subscriptions
            .get_mut(&id)
            .ok_or_else(|| Error::Unexpected(format!("no subscription {}", id)))?;
        if matches!(sub.handler, Handler::Closing) {
            return Ok(());
        }
        sub.handler = Handler::Closing;
        let mri = sub.mri.clone();
        self.route(&mri, Request::unsubscribe(id, self.callback.clone()));
        Ok(())
    }

    pub fn unsubscribe_all(&mut self) {
        let ids: Vec<u64> = self.subscriptions.keys().copied().collect();
        for id in ids {
            let _ = self.unsubscribe(id);
        }
    }

    /// Resolve once the value at `path` matches `good`; a value in
    /// `bad_values` fails the future with `BadValue`.
    pub fn when_matches_async(
        &mut self,
        path: impl IntoPath,
        good: impl Into<Matcher>,
        bad_values: Option<Vec<Value>>,
    ) -> RequestFuture {
        let future = self.allocate_id();
        match path.into_path() {
            Ok(path) => {
                self.pending.insert(future);
                let id = self.allocate_id();
                let handler = Handler::When {
                    future,
                    good: good.into(),
                    bad_values: bad_values.unwrap_or_default(),
                };
                self.open_subscription(id, path, handler);
            }
            Err(e) => {
                self.results.insert(future, Err(e));
            }
        }
        RequestFuture { id: future }
    }

    pub async fn when_matches(
        &mut self,
        path: impl IntoPath,
        good: impl Into<Matcher>,
        bad_values: Option<Vec<Value>>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let future = self.when_matches_async(path, good, bad_values);
        self.wait_one(future, timeout).await.map(|_| ())
    }

    /// Wait for every future, returning their values in order.
    ///
    /// Raises the first failed future's error, `Aborted` on STOP, `Timeout`
    /// when `timeout` elapses, or a pending subscription callback error.
    pub async fn wait_all_futures(
        &mut self,
        futures: &[RequestFuture],
        timeout: Option<Duration>,
    ) -> Result<Vec<Value>> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let ids: Vec<u64> = futures.iter().map(|f| f.id).collect();
        let drained = self
            .drain(|ctx| ids.iter().all(|id| !ctx.pending.contains(id)), deadline)
            .await?;
        if let Drained::Deadline = drained {
            return Err(Error::Timeout(format!(
                "{} of {} futures still pending after {:?}",
                ids.iter().filter(|id| self.pending.contains(id)).count(),
                ids.len(),
                timeout.unwrap_or_default()
            )));
        }
        let mut values = Vec::with_capacity(ids.len());
        let mut first_error = None;
        for id in ids {
            match self.results.remove(&id) {
                Some(Ok(v)) => values.push(v),
                Some(Err(e)) => {
                    first_error.get_or_insert(e);
                }
                None => values.push(Value::Null),
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(values),
        }
    }

    /// Sleep while still servicing subscriptions and STOPs.
    pub async fn sleep(&mut self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        self.drain(|_| false, Some(deadline)).await.map(|_| ())
    }

    async fn drain(
        &mut self,
        done: impl Fn(&Context) -> bool,
        deadline: Option<Instant>,
    ) -> Result<Drained> {
        loop {
            if let Some(e) = self.errors.pop_front() {
                return Err(e);
            }
            if done(self) {
                return Ok(Drained::Done);
            }
            let item = match deadline {
                Some(d) => match tokio::time::timeout_at(d, self.rx.recv()).await {
                    Ok(item) => item,
                    Err(_) => return Ok(Drained::Deadline),
                },
                None => self.rx.recv().await,
            };
            match item {
                // self.tx keeps the channel open
                None => return Err(Error::Unexpected("context queue closed".to_string())),
                Some(QueueItem::Stop) => {
                    if self.ignore_markers == 0 {
                        return Err(Error::Aborted("context stopped".to_string()));
                    }
                    debug!("ignoring stale stop");
                }
                Some(QueueItem::IgnoreMarker) => {
                    self.ignore_markers = self.ignore_markers.saturating_sub(1);
                }
                Some(QueueItem::Response(response)) => self.handle_response(response),
            }
        }
    }

    fn resolve(&mut self, future: u64, result: Result<Value>) {
        self.pending.remove(&future);
        self.results.insert(future, result);
    }

    fn handle_response(&mut self, response: Response) {
        let id = response.id();
        if !self.subscriptions.contains_key(&id) {
            if let Response::Update { .. } | Response::Delta { .. } = response {
                self.errors.push_back(Error::Unexpected(format!(
                    "update for id {} with no subscription",
                    id
                )));
                return;
            }
            if !self.pending.contains(&id) {
                debug!(id, "ignoring response for unknown id");
                return;
            }
            match response {
                Response::Return { value, .. } => self.resolve(id, Ok(value)),
                Response::Error { error, .. } => self.resolve(id, Err(error.into_response())),
                other => debug!(id, typeid = other.typeid(), "ignoring non-final response"),
            }
            return;
        }
        match response {
            Response::Update { value, .. } => self.handle_update(id, value),
            Response::Delta { .. } => debug!(id, "ignoring delta for a value subscription"),
            Response::Return { .. } => {
                self.subscriptions.remove(&id);
            }
            Response::Error { error, .. } => {
                let error = error.into_response();
                if let Some(sub) = self.subscriptions.remove(&id) {
                    match sub.handler {
                        Handler::When { future, .. } => self.resolve(future, Err(error)),
                        Handler::Callback(_) => self.errors.push_back(error),
                        Handler::Closing => {}
                    }
                }
            }
        }
    }

    fn handle_update(&mut self, id: u64, value: Value) {
        let Some(sub) = self.subscriptions.get_mut(&id) else {
            return;
        };
        let outcome = match &mut sub.handler {
            Handler::Callback(callback) => {
                if let Err(e) = callback(value) {
                    self.errors.push_back(e);
                }
                return;
            }
            Handler::When {
                future,
                good,
                bad_values,
            } => {
                if good.matches(&value) {
                    (*future, Ok(value))
                } else if bad_values.contains(&value) {
                    (
                        *future,
                        Err(Error::BadValue(format!(
                            "waiting for {:?}, got {}",
                            good, value
                        ))),
                    )
                } else {
                    return;
                }
            }
            Handler::Closing => return,
        };
        let (future, result) = outcome;
        self.resolve(future, result);
        let _ = self.unsubscribe(id);
    }

    /// Fetch a block once and return a field-checked view of it.
    pub async fn block_view(&mut self, mri: &str) -> Result<BlockView<'_>> {
        let block = self.get([mri], None).await?;
        let fields = malcolm_core::meta::string_list(
            block.field("meta").and_then(|m| m.field("fields")),
        );
        Ok(BlockView {
            context: self,
            mri: mri.to_string(),
            fields,
        })
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        self.unsubscribe_all();
    }
}

/// A block seen through a Context, with field names checked before use.
pub struct BlockView<'a> {
    context: &'a mut Context,
    mri: String,
    fields: Vec<String>,
}

impl BlockView<'_> {
    pub fn mri(&self) -> &str {
        &self.mri
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    fn path(&self, field: &str, rest: &[&str]) -> Result<Vec<String>> {
        if !self.fields.iter().any(|f| f == field) {
            return Err(Error::Field(format!("{} has no field '{}'", self.mri, field)));
        }
        let mut components = vec![self.mri.clone(), field.to_string()];
        components.extend(rest.iter().map(|s| s.to_string()));
        Ok(components)
    }

    /// Current value of an attribute.
    pub async fn get(&mut self, field: &str) -> Result<Value> {
        let path = self.path(field, &["value"])?;
        self.context.get(path, None).await
    }

    pub async fn is_writeable(&mut self, field: &str) -> Result<bool> {
        let path = self.path(field, &["meta", "writeable"])?;
        Ok(self.context.get(path, None).await?.as_bool().unwrap_or(false))
    }

    pub async fn put(&mut self, field: &str, value: impl Into<Value>) -> Result<Value> {
        let path = self.path(field, &[])?;
        self.context.put(path, value, None).await
    }

    pub async fn post(&mut self, method: &str, params: impl Into<Value>) -> Result<Value> {
        let path = self.path(method, &[])?;
        self.context.post(path, params, None).await
    }

    pub async fn when_value_matches(
        &mut self,
        field: &str,
        good: impl Into<Matcher>,
        bad_values: Option<Vec<Value>>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let path = self.path(field, &["value"])?;
        self.context.when_matches(path, good, bad_values, timeout).await
    }
}
