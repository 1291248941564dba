//! Subscription tree and change dispatch for one block.
//!
//! The [`Notifier`] keeps a serialized mirror of its block and a tree of
//! nodes keyed by path component. Subscribers hang off the node for the path
//! they subscribed to. Changes are only accepted inside a squash; when the
//! outermost squash ends they are applied to the mirror and every affected
//! subscriber gets one Update or Delta for the whole batch.
//!
//! Nothing is delivered from here. Every operation returns the
//! [`Delivery`]s it produced so the caller can send them after releasing
//! whatever lock guards the notifier.
//!
//! ```rust
//! use malcolm_core::{path, Callback, Change, Notifier, Request, Value};
//!
//! let data = Value::from([("attr", Value::from([("value", 1)]))]);
//! let mut notifier = Notifier::new("blk", data);
//! let sub = Request::subscribe(1, path!("blk.attr.value"), false, Callback::noop());
//! assert_eq!(notifier.handle_subscribe(&sub).len(), 1);
//!
//! notifier.begin_squash();
//! notifier.add_squashed_change(Change::set(["attr", "value"], Value::from(2))).unwrap();
//! let deliveries = notifier.end_squash();
//! assert_eq!(deliveries.len(), 1);
//! ```

use std::collections::HashMap;

use indexmap::IndexMap;
use tracing::warn;

use crate::model::Change;
use crate::request::{Callback, Delivery, Request, RequestKind, Response};
use crate::{Error, Result, Value};

#[derive(Debug, Clone)]
struct Subscriber {
    request: Request,
    delta: bool,
}

#[derive(Debug, Default)]
struct NotifierNode {
    children: IndexMap<String, NotifierNode>,
    subscribers: Vec<Subscriber>,
}

impl NotifierNode {
    fn is_empty(&self) -> bool {
        self.children.is_empty() && self.subscribers.is_empty()
    }

    fn get_or_create(&mut self, path: &[String]) -> &mut NotifierNode {
        let mut current = self;
        for component in path {
            current = current.children.entry(component.clone()).or_default();
        }
        current
    }

    /// Remove a subscriber at `path`, pruning nodes left empty on the way
    /// back up.
    fn remove(&mut self, path: &[String], key: &(Callback, u64)) -> Option<Subscriber> {
        match path.split_first() {
            None => {
                let index = self
                    .subscribers
                    .iter()
                    .position(|s| s.request.callback == key.0 && s.request.id == key.1)?;
                Some(self.subscribers.remove(index))
            }
            Some((first, rest)) => {
                let child = self.children.get_mut(first)?;
                let removed = child.remove(rest, key);
                if child.is_empty() {
                    self.children.shift_remove(first);
                }
                removed
            }
        }
    }

    fn notify(
        &self,
        node_path: &mut Vec<String>,
        changes: &[Change],
        data: &Value,
        out: &mut Vec<Delivery>,
    ) {
        let mut child_changes: IndexMap<&str, Vec<Change>> = IndexMap::new();
        for change in changes {
            match change.path.split_first() {
                Some((first, rest)) => {
                    if self.children.contains_key(first) {
                        child_changes.entry(first.as_str()).or_default().push(Change {
                            path: rest.to_vec(),
                            value: change.value.clone(),
                        });
                    }
                }
                None => {
                    // replaced at this level, so each child sees its subset
                    for name in self.children.keys() {
                        let subset = change
                            .value
                            .as_ref()
                            .and_then(|v| v.field(name))
                            .cloned();
                        child_changes.entry(name.as_str()).or_default().push(Change {
                            path: Vec::new(),
                            value: subset,
                        });
                    }
                }
            }
        }

        if !self.subscribers.is_empty() {
            let current = data.get(node_path).cloned().unwrap_or_default();
            for sub in &self.subscribers {
                if sub.delta {
                    out.push(sub.request.delta_response(changes.to_vec()));
                } else {
                    out.push(sub.request.update_response(current.clone()));
                }
            }
        }

        for (name, changes) in child_changes {
            if let Some(child) = self.children.get(name) {
                node_path.push(name.to_string());
                child.notify(node_path, &changes, data, out);
                node_path.pop();
            }
        }
    }
}

/// The subscription tree of one block.
#[derive(Debug)]
pub struct Notifier {
    mri: String,
    root: NotifierNode,
    data: Value,
    squash_depth: usize,
    pending: Vec<Change>,
    index: HashMap<(Callback, u64), Vec<String>>,
}

impl Notifier {
    /// Create a notifier mirroring `data`, the serialized block.
    pub fn new(mri: impl Into<String>, data: Value) -> Self {
        Notifier {
            mri: mri.into(),
            root: NotifierNode::default(),
            data,
            squash_depth: 0,
            pending: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn mri(&self) -> &str {
        &self.mri
    }

    /// The serialized mirror of the block.
    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Number of live subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.index.len()
    }

    /// Register a Subscribe and produce its initial Update or Delta.
    pub fn handle_subscribe(&mut self, request: &Request) -> Vec<Delivery> {
        let RequestKind::Subscribe { path, delta } = &request.kind else {
            return vec![request.error_response(Error::Unexpected(format!(
                "expected a Subscribe, got {}",
                request.typeid()
            )))];
        };
        let key = (request.callback.clone(), request.id);
        if self.index.contains_key(&key) {
            return vec![request.error_response(Error::Unexpected(format!(
                "already subscribed with id {}",
                request.id
            )))];
        }
        let rel = path.tail().to_vec();
        let Some(current) = self.data.get(&rel).cloned() else {
            return vec![request.error_response(Error::Field(format!("no path '{}'", path)))];
        };
        self.root.get_or_create(&rel).subscribers.push(Subscriber {
            request: request.clone(),
            delta: *delta,
        });
        self.index.insert(key, rel);
        if *delta {
            vec![request.delta_response(vec![Change {
                path: Vec::new(),
                value: Some(current),
            }])]
        } else {
            vec![request.update_response(current)]
        }
    }

    /// Remove the Subscribe matching `(callback, id)`, returning its final
    /// Return response.
    pub fn handle_unsubscribe(&mut self, request: &Request) -> Vec<Delivery> {
        let key = (request.callback.clone(), request.id);
        let removed = self
            .index
            .remove(&key)
            .and_then(|path| self.root.remove(&path, &key));
        match removed {
            Some(sub) => vec![(
                sub.request.callback.clone(),
                Response::Return {
                    id: sub.request.id,
                    value: Value::Null,
                },
            )],
            None => vec![request.error_response(Error::Unexpected(format!(
                "no subscription with id {}",
                request.id
            )))],
        }
    }

    pub fn in_squash(&self) -> bool {
        self.squash_depth > 0
    }

    /// Enter a squash. Squashes nest.
    pub fn begin_squash(&mut self) {
        self.squash_depth += 1;
    }

    /// Leave a squash. The outermost exit applies and dispatches everything
    /// queued since the first `begin_squash`.
    pub fn end_squash(&mut self) -> Vec<Delivery> {
        self.squash_depth = self.squash_depth.saturating_sub(1);
        if self.squash_depth > 0 || self.pending.is_empty() {
            return Vec::new();
        }
        let changes = std::mem::take(&mut self.pending);
        for change in &changes {
            let applied = match &change.value {
                Some(v) => self.data.set(&change.path, v.clone()),
                None => self.data.remove(&change.path).map(|_| ()),
            };
            if let Err(e) = applied {
                warn!(mri = %self.mri, path = ?change.path, error = %e, "change did not apply to mirror");
            }
        }
        let mut out = Vec::new();
        self.root
            .notify(&mut Vec::new(), &changes, &self.data, &mut out);
        out
    }

    /// Run `f` inside a squash and return its result with the deliveries.
    pub fn changes_squashed<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> (R, Vec<Delivery>) {
        self.begin_squash();
        let r = f(self);
        let deliveries = self.end_squash();
        (r, deliveries)
    }

    /// Queue a change. Only legal inside a squash.
    pub fn add_squashed_change(&mut self, change: Change) -> Result<()> {
        if !self.in_squash() {
            return Err(Error::Unexpected(
                "changes must be added inside changes_squashed".to_string(),
            ));
        }
        self.pending.push(change);
        Ok(())
    }

    /// Queue a delete. Only legal inside a squash.
    pub fn add_squashed_delete(&mut self, path: Vec<String>) -> Result<()> {
        self.add_squashed_change(Change { path, value: None })
    }

    pub fn add_squashed_changes(&mut self, changes: Vec<Change>) -> Result<()> {
        for change in changes {
            self.add_squashed_change(change)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path;
    use std::sync::{Arc, Mutex};

    fn block_data() -> Value {
        Value::from([
            ("attr1", Value::from([("value", Value::from(1))])),
            ("attr2", Value::from([("value", Value::from("x"))])),
        ])
    }

    fn recorder() -> (Callback, Arc<Mutex<Vec<Response>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (Callback::new(move |r| sink.lock().unwrap().push(r)), seen)
    }

    fn run(deliveries: Vec<Delivery>) {
        crate::request::deliver(deliveries)
    }

    #[test]
    fn subscribe_sends_initial_value() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk.attr1.value"), false, cb.clone())));
        run(n.handle_subscribe(&Request::subscribe(2, path!("blk.attr2"), true, cb)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[0], Response::Update { id: 1, value: Value::from(1) });
        assert_eq!(
            seen[1],
            Response::Delta {
                id: 2,
                changes: vec![Change {
                    path: vec![],
                    value: Some(Value::from([("value", "x")]))
                }]
            }
        );
    }

    #[test]
    fn subscribe_to_missing_path_is_field_error() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk.nope"), false, cb)));
        match &seen.lock().unwrap()[0] {
            Response::Error { error, .. } => assert_eq!(error.kind(), crate::ErrorKind::Field),
            other => panic!("expected error, got {:?}", other),
        }
        assert_eq!(n.subscription_count(), 0);
    }

    #[test]
    fn squashed_changes_make_one_delta() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk"), true, cb)));
        n.begin_squash();
        n.add_squashed_change(Change::set(["attr1", "value"], Value::from(33)))
            .unwrap();
        n.begin_squash();
        n.add_squashed_change(Change::set(["attr2", "value"], Value::from("tr")))
            .unwrap();
        assert!(n.end_squash().is_empty());
        run(n.end_squash());

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        let expected = Value::Array(vec![
            Value::Array(vec![Value::from(vec!["attr1", "value"]), Value::from(33)]),
            Value::Array(vec![Value::from(vec!["attr2", "value"]), Value::from("tr")]),
        ]);
        assert_eq!(seen[1].to_value().field("changes"), Some(&expected));
        assert_eq!(n.data().get(&["attr1".to_string(), "value".to_string()]), Some(&Value::from(33)));
    }

    #[test]
    fn updates_carry_the_subscribed_subset() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk.attr1"), false, cb.clone())));
        run(n.handle_subscribe(&Request::subscribe(2, path!("blk.attr2.value"), true, cb)));
        let ((), deliveries) = n.changes_squashed(|n| {
            n.add_squashed_change(Change::set(["attr1", "value"], Value::from(5)))
                .unwrap();
            n.add_squashed_change(Change::set(
                ["attr2"],
                Value::from([("value", "replaced")]),
            ))
            .unwrap();
        });
        run(deliveries);
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen[2],
            Response::Update {
                id: 1,
                value: Value::from([("value", 5)])
            }
        );
        assert_eq!(
            seen[3],
            Response::Delta {
                id: 2,
                changes: vec![Change {
                    path: vec![],
                    value: Some(Value::from("replaced"))
                }]
            }
        );
    }

    #[test]
    fn deletes_propagate() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk"), true, cb)));
        let (r, deliveries) = n.changes_squashed(|n| n.add_squashed_delete(vec!["attr1".into()]));
        r.unwrap();
        run(deliveries);
        assert_eq!(
            seen.lock().unwrap()[1],
            Response::Delta {
                id: 1,
                changes: vec![Change::delete(["attr1"])]
            }
        );
        assert!(n.data().field("attr1").is_none());
    }

    #[test]
    fn changes_outside_squash_rejected() {
        let mut n = Notifier::new("blk", block_data());
        let err = n
            .add_squashed_change(Change::set(["attr1"], Value::Null))
            .unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Unexpected);
        assert!(n.add_squashed_delete(vec!["attr1".into()]).is_err());
    }

    #[test]
    fn unsubscribe_returns_once_and_prunes() {
        let mut n = Notifier::new("blk", block_data());
        let (cb, seen) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk.attr1.value"), false, cb.clone())));
        run(n.handle_unsubscribe(&Request::unsubscribe(1, cb.clone())));
        assert_eq!(n.subscription_count(), 0);
        assert!(n.root.is_empty());
        run(n.handle_unsubscribe(&Request::unsubscribe(1, cb)));
        let seen = seen.lock().unwrap();
        assert_eq!(seen[1], Response::Return { id: 1, value: Value::Null });
        assert!(matches!(seen[2], Response::Error { .. }));

        // nothing delivered after unsubscribe
        drop(seen);
        let ((), deliveries) = n.changes_squashed(|n| {
            n.add_squashed_change(Change::set(["attr1", "value"], Value::from(9)))
                .unwrap()
        });
        assert!(deliveries.is_empty());
    }

    #[test]
    fn same_id_different_callback_are_distinct() {
        let mut n = Notifier::new("blk", block_data());
        let (a, _) = recorder();
        let (b, _) = recorder();
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk"), false, a.clone())));
        run(n.handle_subscribe(&Request::subscribe(1, path!("blk"), false, b)));
        assert_eq!(n.subscription_count(), 2);
        run(n.handle_unsubscribe(&Request::unsubscribe(1, a)));
        assert_eq!(n.subscription_count(), 1);
    }
}
