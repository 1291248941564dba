//! Requests and Responses.
//!
//! A [`Request`] carries a caller-assigned id and a [`Callback`] that every
//! [`Response`] to it is delivered through. Subscribes and Unsubscribes are
//! matched by the `(callback, id)` pair, so callback identity is pointer
//! identity.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::model::Change;
use crate::{Error, Path, Result, Value};

pub const GET: &str = "malcolm:core/Get:1.0";
pub const PUT: &str = "malcolm:core/Put:1.0";
pub const POST: &str = "malcolm:core/Post:1.0";
pub const SUBSCRIBE: &str = "malcolm:core/Subscribe:1.0";
pub const UNSUBSCRIBE: &str = "malcolm:core/Unsubscribe:1.0";
pub const RETURN: &str = "malcolm:core/Return:1.0";
pub const ERROR: &str = "malcolm:core/Error:1.0";
pub const UPDATE: &str = "malcolm:core/Update:1.0";
pub const DELTA: &str = "malcolm:core/Delta:1.0";

/// Where responses to a request go.
#[derive(Clone)]
pub struct Callback(Arc<dyn Fn(Response) + Send + Sync>);

impl Callback {
    pub fn new(f: impl Fn(Response) + Send + Sync + 'static) -> Self {
        Callback(Arc::new(f))
    }

    /// A callback that drops every response.
    pub fn noop() -> Self {
        Callback::new(|_| {})
    }

    pub fn call(&self, response: Response) {
        (self.0)(response)
    }

    fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for Callback {
    fn eq(&self, other: &Self) -> bool {
        self.addr() == other.addr()
    }
}

impl Eq for Callback {}

impl Hash for Callback {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.addr().hash(state)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({:#x})", self.addr())
    }
}

/// A response paired with the callback that should receive it.
pub type Delivery = (Callback, Response);

/// Deliver a batch of responses in order.
pub fn deliver(deliveries: Vec<Delivery>) {
    for (callback, response) in deliveries {
        callback.call(response);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestKind {
    Get {
        path: Path,
    },
    Put {
        path: Path,
        value: Value,
        get: bool,
    },
    Post {
        path: Path,
        parameters: Value,
    },
    Subscribe {
        path: Path,
        delta: bool,
    },
    Unsubscribe,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub id: u64,
    pub callback: Callback,
    pub kind: RequestKind,
}

impl Request {
    pub fn get(id: u64, path: Path, callback: Callback) -> Self {
        Request {
            id,
            callback,
            kind: RequestKind::Get { path },
        }
    }

    pub fn put(id: u64, path: Path, value: Value, get: bool, callback: Callback) -> Self {
        Request {
            id,
            callback,
            kind: RequestKind::Put { path, value, get },
        }
    }

    pub fn post(id: u64, path: Path, parameters: Value, callback: Callback) -> Self {
        Request {
            id,
            callback,
            kind: RequestKind::Post { path, parameters },
        }
    }

    pub fn subscribe(id: u64, path: Path, delta: bool, callback: Callback) -> Self {
        Request {
            id,
            callback,
            kind: RequestKind::Subscribe { path, delta },
        }
    }

    pub fn unsubscribe(id: u64, callback: Callback) -> Self {
        Request {
            id,
            callback,
            kind: RequestKind::Unsubscribe,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.kind {
            RequestKind::Get { path }
            | RequestKind::Put { path, .. }
            | RequestKind::Post { path, .. }
            | RequestKind::Subscribe { path, .. } => Some(path),
            RequestKind::Unsubscribe => None,
        }
    }

    pub fn typeid(&self) -> &'static str {
        match self.kind {
            RequestKind::Get { .. } => GET,
            RequestKind::Put { .. } => PUT,
            RequestKind::Post { .. } => POST,
            RequestKind::Subscribe { .. } => SUBSCRIBE,
            RequestKind::Unsubscribe => UNSUBSCRIBE,
        }
    }

    pub fn return_response(&self, value: Value) -> Delivery {
        (
            self.callback.clone(),
            Response::Return { id: self.id, value },
        )
    }

    pub fn error_response(&self, error: Error) -> Delivery {
        (
            self.callback.clone(),
            Response::Error { id: self.id, error },
        )
    }

    pub fn update_response(&self, value: Value) -> Delivery {
        (
            self.callback.clone(),
            Response::Update { id: self.id, value },
        )
    }

    pub fn delta_response(&self, changes: Vec<Change>) -> Delivery {
        (
            self.callback.clone(),
            Response::Delta {
                id: self.id,
                changes,
            },
        )
    }

    pub fn to_value(&self) -> Value {
        let mut pairs = vec![
            ("typeid", Value::from(self.typeid())),
            ("id", Value::from(self.id as i64)),
        ];
        if let Some(path) = self.path() {
            pairs.push((
                "path",
                Value::Array(path.iter().map(Value::from).collect()),
            ));
        }
        match &self.kind {
            RequestKind::Put { value, get, .. } => {
                pairs.push(("value", value.clone()));
                pairs.push(("get", Value::Bool(*get)));
            }
            RequestKind::Post { parameters, .. } => pairs.push(("parameters", parameters.clone())),
            RequestKind::Subscribe { delta, .. } => pairs.push(("delta", Value::Bool(*delta))),
            _ => {}
        }
        Value::Map(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }

    /// Rebuild a request from its dict form, attaching a transport callback.
    pub fn from_value(value: &Value, callback: Callback) -> Result<Self> {
        let id = read_id(value)?;
        let path = || -> Result<Path> {
            let components = crate::meta::string_list(value.field("path"));
            Ok(Path::try_from_components(components)?)
        };
        let flag = |name: &str| value.field(name).and_then(Value::as_bool).unwrap_or(false);
        let member = |name: &str| value.field(name).cloned().unwrap_or_default();
        let kind = match value.typeid() {
            Some(GET) => RequestKind::Get { path: path()? },
            Some(PUT) => RequestKind::Put {
                path: path()?,
                value: member("value"),
                get: flag("get"),
            },
            Some(POST) => RequestKind::Post {
                path: path()?,
                parameters: member("parameters"),
            },
            Some(SUBSCRIBE) => RequestKind::Subscribe {
                path: path()?,
                delta: flag("delta"),
            },
            Some(UNSUBSCRIBE) => RequestKind::Unsubscribe,
            other => {
                return Err(Error::Unexpected(format!(
                    "{:?} is not a request typeid",
                    other
                )))
            }
        };
        Ok(Request { id, callback, kind })
    }
}

fn read_id(value: &Value) -> Result<u64> {
    value
        .field("id")
        .and_then(Value::as_i64)
        .and_then(|i| u64::try_from(i).ok())
        .ok_or_else(|| Error::Unexpected(format!("missing id in {}", value)))
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Return { id: u64, value: Value },
    Error { id: u64, error: Error },
    Update { id: u64, value: Value },
    Delta { id: u64, changes: Vec<Change> },
}

impl Response {
    pub fn id(&self) -> u64 {
        match self {
            Response::Return { id, .. }
            | Response::Error { id, .. }
            | Response::Update { id, .. }
            | Response::Delta { id, .. } => *id,
        }
    }

    pub fn typeid(&self) -> &'static str {
        match self {
            Response::Return { .. } => RETURN,
            Response::Error { .. } => ERROR,
            Response::Update { .. } => UPDATE,
            Response::Delta { .. } => DELTA,
        }
    }

    pub fn to_value(&self) -> Value {
        let body = match self {
            Response::Return { value, .. } | Response::Update { value, .. } => {
                ("value", value.clone())
            }
            Response::Error { error, .. } => ("message", Value::from(error.wire_message())),
            Response::Delta { changes, .. } => (
                "changes",
                Value::Array(changes.iter().map(Change::to_value).collect()),
            ),
        };
        Value::from([
            ("typeid", Value::from(self.typeid())),
            ("id", Value::from(self.id() as i64)),
            body,
        ])
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let id = read_id(value)?;
        let member = |name: &str| value.field(name).cloned().unwrap_or_default();
        match value.typeid() {
            Some(RETURN) => Ok(Response::Return {
                id,
                value: member("value"),
            }),
            Some(UPDATE) => Ok(Response::Update {
                id,
                value: member("value"),
            }),
            Some(ERROR) => Ok(Response::Error {
                id,
                error: Error::from_wire(
                    value.field("message").and_then(Value::as_str).unwrap_or(""),
                ),
            }),
            Some(DELTA) => Ok(Response::Delta {
                id,
                changes: value
                    .field("changes")
                    .and_then(Value::as_array)
                    .map(|a| a.iter().map(Change::from_value).collect::<Result<Vec<_>>>())
                    .transpose()?
                    .unwrap_or_default(),
            }),
            other => Err(Error::Unexpected(format!(
                "{:?} is not a response typeid",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use std::sync::Mutex;

    #[test]
    fn callback_identity_is_pointer_identity() {
        let a = Callback::noop();
        let b = Callback::noop();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[test]
    fn responses_reach_the_callback() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let cb = Callback::new(move |r| sink.lock().unwrap().push(r));
        let req = Request::get(4, path!("blk.attr"), cb);
        deliver(vec![
            req.update_response(Value::from(1)),
            req.return_response(Value::Null),
        ]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[1], Response::Return { id: 4, value: Value::Null });
    }

    #[test]
    fn request_dict_form() {
        let cb = Callback::noop();
        let req = Request::put(7, path!("blk.attr.value"), Value::from(32), true, cb.clone());
        let v = req.to_value();
        let keys: Vec<_> = v.as_map().unwrap().keys().cloned().collect();
        assert_eq!(keys, vec!["typeid", "id", "path", "value", "get"]);
        assert_eq!(Request::from_value(&v, cb.clone()).unwrap(), req);

        let unsub = Request::unsubscribe(7, cb.clone());
        assert_eq!(Request::from_value(&unsub.to_value(), cb).unwrap(), unsub);
    }

    #[test]
    fn error_response_keeps_kind() {
        let r = Response::Error {
            id: 3,
            error: Error::Field("no attr".into()),
        };
        let v = r.to_value();
        assert_eq!(v.field("message"), Some(&Value::from("FieldError: no attr")));
        assert_eq!(Response::from_value(&v).unwrap(), r);
    }

    #[test]
    fn delta_dict_form() {
        let r = Response::Delta {
            id: 1,
            changes: vec![
                Change::set(["attr1", "value"], Value::from(33)),
                Change::delete(["attr2"]),
            ],
        };
        assert_eq!(Response::from_value(&r.to_value()).unwrap(), r);
    }
}
