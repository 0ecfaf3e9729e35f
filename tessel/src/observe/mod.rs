//! Observation of scope values.
//!
//! Objects and arrays are observed through an explicit wrapper, `Observed`: writes that go
//! through the wrapper mutate the value in place and notify the listeners attached to it.
//! `subscribe` builds on this to follow a path through nested values, re-subscribing below any
//! segment whose value is replaced.
use std::{cell::RefCell, rc::Rc};
use tessel_common::{Data, Value};
use tracing::{debug, warn};

mod change;
mod hub;
mod path;

pub use change::Change;
pub use path::{Path, Segment};

use crate::error::PathError;
use hub::{Hub, ListenKey, Registration};

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Observable wrapper over an object or array.
///
/// There is one wrapper state per underlying value: `wrap` called twice on the same value
/// returns handles to the same state (see `Observed::ptr_eq`).
#[derive(Clone)]
pub struct Observed {
    target: Value,
    hub: Rc<Hub>,
}

/// Wraps an object or array for observation.
///
/// Returns `None` for primitives, opaque host values and frozen objects or arrays; those are
/// read directly and never notify.
pub fn wrap(value: &Value) -> Option<Observed> {
    let hub = Hub::of(value)?;
    Some(Observed {
        target: value.clone(),
        hub,
    })
}

impl Observed {
    /// The wrapped value.
    pub fn value(&self) -> &Value {
        &self.target
    }

    /// Returns whether both handles wrap the same value.
    pub fn ptr_eq(&self, other: &Observed) -> bool {
        Rc::ptr_eq(&self.hub, &other.hub)
    }

    /// Number of listeners currently attached.
    pub fn listener_count(&self) -> usize {
        self.hub.len()
    }

    fn emit(&self, name: Option<&str>, change: Change) {
        if let Some(name) = name {
            self.hub.notify(&self.target, &ListenKey::Name(name.to_string()), &change);
        }
        self.hub.notify(&self.target, &ListenKey::Own, &change);
    }

    /// Reads a property. On arrays, `length` and numeric keys are supported.
    pub fn get(&self, key: &str) -> Value {
        Segment::Key(key.to_string()).resolve(&self.target)
    }

    /// Writes a property and notifies. Writing the value already there does nothing.
    ///
    /// On arrays, numeric keys write elements and `length` truncates or extends.
    pub fn set(&self, key: &str, value: impl Into<Value>) {
        let value = value.into();
        match self.target {
            Value::Object(ref o) => {
                let old = o.get(key);
                if o.contains_key(key) && old.same(&value) {
                    return;
                }
                o.insert(key, value.clone());
                self.emit(Some(key), Change::property(key, old, value));
            }
            Value::Array(ref a) => {
                if key == "length" {
                    let len = value.to_number();
                    if len.is_finite() && len >= 0.0 {
                        let len = len as usize;
                        let cur = a.len();
                        if len < cur {
                            self.splice(len, cur - len, vec![]);
                        } else if len > cur {
                            self.splice(cur, 0, vec![Value::Undefined; len - cur]);
                        }
                    }
                } else if let Ok(index) = key.parse::<usize>() {
                    self.set_index(index, value);
                } else {
                    warn!(key, "ignoring write of a non-index property on an array");
                }
            }
            _ => {}
        }
    }

    /// Removes a property of an object and notifies (the change record's `added` is `Undefined`).
    pub fn remove(&self, key: &str) -> Value {
        let Value::Object(ref o) = self.target else {
            return Value::Undefined;
        };
        if !o.contains_key(key) {
            return Value::Undefined;
        }
        let old = o.remove(key);
        self.emit(Some(key), Change::property(key, old.clone(), Value::Undefined));
        old
    }

    /// Number of properties, or elements.
    pub fn len(&self) -> usize {
        match self.target {
            Value::Object(ref o) => o.len(),
            Value::Array(ref a) => a.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Property names of an object, or element indices of an array.
    pub fn keys(&self) -> Vec<String> {
        match self.target {
            Value::Object(ref o) => o.keys(),
            Value::Array(ref a) => (0..a.len()).map(|i| i.to_string()).collect(),
            _ => vec![],
        }
    }

    /// Elements of an array (empty for objects).
    pub fn to_vec(&self) -> Vec<Value> {
        match self.target {
            Value::Array(ref a) => a.to_vec(),
            _ => vec![],
        }
    }

    pub fn get_index(&self, index: usize) -> Value {
        match self.target {
            Value::Array(ref a) => a.get(index),
            _ => Value::Undefined,
        }
    }

    /// Writes an array element, growing the array with `Undefined` if needed.
    pub fn set_index(&self, index: usize, value: impl Into<Value>) {
        let Value::Array(ref a) = self.target else { return };
        let value = value.into();
        let len = a.len();
        if index < len {
            let old = a.get(index);
            if old.same(&value) {
                return;
            }
            a.set(index, value.clone());
            self.emit(
                None,
                Change::Splice {
                    index,
                    removed: vec![old],
                    added: vec![value],
                },
            );
        } else {
            let mut added = vec![Value::Undefined; index - len];
            added.push(value);
            self.splice(len, 0, added);
        }
    }

    /// Removes `remove` elements at `index`, inserts `insert` in their place and notifies.
    /// Returns the removed elements.
    pub fn splice(&self, index: usize, remove: usize, insert: Vec<Value>) -> Vec<Value> {
        let Value::Array(ref a) = self.target else { return vec![] };
        let index = index.min(a.len());
        let removed = a.splice(index, remove, insert.clone());
        if !removed.is_empty() || !insert.is_empty() {
            self.emit(
                None,
                Change::Splice {
                    index,
                    removed: removed.clone(),
                    added: insert,
                },
            );
        }
        removed
    }

    pub fn push(&self, value: impl Into<Value>) {
        self.splice(usize::MAX, 0, vec![value.into()]);
    }

    pub fn pop(&self) -> Value {
        let len = self.len();
        if len == 0 {
            return Value::Undefined;
        }
        self.splice(len - 1, 1, vec![]).pop().unwrap_or_default()
    }

    pub fn insert(&self, index: usize, value: impl Into<Value>) {
        self.splice(index, 0, vec![value.into()]);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

type PathCallback = Rc<dyn Fn(&Value, Option<&Change>)>;

/// A live subscription. Dropping it unsubscribes, including everything subscribed below
/// intermediate path segments.
#[must_use]
#[derive(Default)]
pub struct Subscription {
    registration: Option<Registration>,
    level: Option<Rc<Level>>,
}

impl Subscription {
    /// A subscription that observes nothing.
    pub fn none() -> Subscription {
        Subscription::default()
    }

    /// Returns whether this subscription listens to anything.
    pub fn is_active(&self) -> bool {
        self.registration.is_some()
            || self
                .level
                .as_ref()
                .map_or(false, |level| level.child.borrow().is_active())
    }
}

/// State of a subscription at one intermediate path segment.
struct Level {
    path: Path,
    depth: usize,
    /// Current value of the segment.
    current: RefCell<Value>,
    /// Subscription to the rest of the path, rooted at `current`.
    child: RefCell<Subscription>,
    callback: PathCallback,
}

impl Level {
    fn update(&self, target: &Value, change: &Change) {
        let next = self.path.segments()[self.depth].resolve(target);
        if !change.is_refresh() && next.same(&self.current.borrow()) {
            return;
        }
        self.current.replace(next.clone());
        // tear down everything below before re-rooting
        drop(self.child.take());
        let leaf_change = (self.depth + 1 == self.path.segments().len()).then_some(change);
        let child = observe_from(&next, &self.path, self.depth + 1, &self.callback, leaf_change);
        *self.child.borrow_mut() = child;
    }
}

fn listen_key(segment: &Segment, value: &Value) -> ListenKey {
    match (segment, value) {
        (Segment::Key(k), Value::Object(_)) => ListenKey::Name(k.clone()),
        (Segment::Index(i), Value::Object(_)) => ListenKey::Name(i.to_string()),
        _ => ListenKey::Own,
    }
}

fn observe_from(
    value: &Value,
    path: &Path,
    depth: usize,
    callback: &PathCallback,
    change: Option<&Change>,
) -> Subscription {
    let segments = path.segments();

    if depth == segments.len() {
        callback(value, change);
        // arrays notify on their own mutations, objects only on forced refresh
        let Some(hub) = Hub::of(value) else {
            return Subscription::none();
        };
        let is_array = matches!(value, Value::Array(_));
        let callback = callback.clone();
        let registration = hub.add(
            ListenKey::Own,
            Rc::new(move |target, change| {
                if is_array || change.is_refresh() {
                    callback(target, Some(change))
                }
            }),
        );
        return Subscription {
            registration: Some(registration),
            level: None,
        };
    }

    let segment = &segments[depth];
    let next = segment.resolve(value);
    let level = Rc::new(Level {
        path: path.clone(),
        depth,
        current: RefCell::new(next.clone()),
        child: RefCell::new(Subscription::none()),
        callback: callback.clone(),
    });

    let registration = Hub::of(value).map(|hub| {
        let weak = Rc::downgrade(&level);
        hub.add(
            listen_key(segment, value),
            Rc::new(move |target, change| {
                if let Some(level) = weak.upgrade() {
                    level.update(target, change)
                }
            }),
        )
    });
    if registration.is_none() && depth == 0 {
        debug!(path = %path, kind = value.type_name(), "subscribing on a value that cannot be observed");
    }

    let child = observe_from(&next, path, depth + 1, callback, change);
    *level.child.borrow_mut() = child;
    Subscription {
        registration,
        level: Some(level),
    }
}

/// Subscribes to the value at `path`.
///
/// `callback` is invoked immediately with the current value (possibly `Undefined`), then every
/// time the resolved value changes. If the resolved value is an array, its own mutations are
/// reported too, with their change record; objects are not observed deeply.
pub fn subscribe(
    value: &Value,
    path: &str,
    callback: impl Fn(&Value, Option<&Change>) + 'static,
) -> Result<Subscription, PathError> {
    let path = Path::parse(path)?;
    Ok(subscribe_path(value, &path, callback))
}

/// Like `subscribe`, with a path parsed beforehand.
pub fn subscribe_path(
    value: &Value,
    path: &Path,
    callback: impl Fn(&Value, Option<&Change>) + 'static,
) -> Subscription {
    let callback: PathCallback = Rc::new(callback);
    observe_from(value, path, 0, &callback, None)
}

/// Listens to every change of an object or array itself.
pub fn watch(value: &Value, callback: impl Fn(&Value, &Change) + 'static) -> Subscription {
    match Hub::of(value) {
        Some(hub) => Subscription {
            registration: Some(hub.add(ListenKey::Own, Rc::new(callback))),
            level: None,
        },
        None => Subscription::none(),
    }
}

/// Forces the subscribers of `path` on `value` to re-evaluate (with `Change::Refresh`).
pub fn notify(value: &Value, path: &str) -> Result<(), PathError> {
    let path = Path::parse(path)?;
    match path.split_last() {
        None => {
            if let Some(hub) = Hub::existing(value) {
                hub.notify(value, &ListenKey::Own, &Change::Refresh);
            }
        }
        Some((parent, last)) => {
            let parent = parent.iter().fold(value.clone(), |v, s| s.resolve(&v));
            if let Some(hub) = Hub::existing(&parent) {
                hub.notify(&parent, &listen_key(last, &parent), &Change::Refresh);
            }
        }
    }
    Ok(())
}

/// Resolves a path.
pub fn get_path(value: &Value, path: &Path) -> Value {
    path.segments().iter().fold(value.clone(), |v, s| s.resolve(&v))
}

/// Writes the value at `path` through the observer of its parent.
///
/// Returns `false` if the parent cannot be written to (empty path, missing or non-observable
/// parent, no element matching a selector).
pub fn set_path(value: &Value, path: &Path, new: Value) -> bool {
    let Some((parent, last)) = path.split_last() else {
        warn!("cannot write to an empty path");
        return false;
    };
    let parent = parent.iter().fold(value.clone(), |v, s| s.resolve(&v));
    let Some(observed) = wrap(&parent) else {
        warn!(path = %path, "cannot write through a value that cannot be observed");
        return false;
    };
    match last {
        Segment::Key(k) => observed.set(k, new),
        Segment::Index(i) if matches!(parent, Value::Array(_)) => observed.set_index(*i, new),
        Segment::Index(i) => observed.set(&i.to_string(), new),
        Segment::Find { key, value: expected } => {
            let index = observed
                .to_vec()
                .iter()
                .position(|item| item.as_object().map_or(false, |o| o.get(key).same(expected)));
            match index {
                Some(index) => observed.set_index(index, new),
                None => return false,
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use tessel_common::{Array, Object};

    fn recorder() -> (Rc<RefCell<Vec<Value>>>, impl Fn(&Value, Option<&Change>) + 'static) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = log.clone();
        (log, move |v: &Value, _: Option<&Change>| l.borrow_mut().push(v.clone()))
    }

    fn obj(entries: Vec<(&str, Value)>) -> Value {
        Value::from(Object::from_entries(entries))
    }

    #[test]
    fn wrapping_is_idempotent() {
        let o = obj(vec![]);
        let a = wrap(&o).unwrap();
        let b = wrap(&o).unwrap();
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&wrap(&obj(vec![])).unwrap()));

        assert!(wrap(&Value::from(1)).is_none());
        assert!(wrap(&Value::Null).is_none());
        let frozen = Object::new();
        frozen.freeze();
        assert!(wrap(&Value::from(frozen)).is_none());
    }

    #[test]
    fn subscription_is_immediate() {
        let scope = obj(vec![("a", Value::from(1))]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "a", cb).unwrap();
        let (log2, cb2) = recorder();
        let _s2 = subscribe(&scope, "missing.deep", cb2).unwrap();
        assert_eq!(*log.borrow(), vec![Value::from(1)]);
        assert_eq!(*log2.borrow(), vec![Value::Undefined]);
    }

    #[test]
    fn writes_notify_and_same_value_does_not() {
        let scope = obj(vec![("a", Value::from(1))]);
        let (log, cb) = recorder();
        let sub = subscribe(&scope, "a", cb).unwrap();
        let o = wrap(&scope).unwrap();
        o.set("a", 2);
        o.set("a", 2);
        o.set("b", 3);
        assert_eq!(*log.borrow(), vec![Value::from(1), Value::from(2)]);
        drop(sub);
        o.set("a", 4);
        assert_eq!(log.borrow().len(), 2);
        assert_eq!(o.listener_count(), 0);
    }

    #[test]
    fn replacing_an_intermediate_value_reroots() {
        let first = obj(vec![("b", Value::from("x"))]);
        let scope = obj(vec![("a", first.clone())]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "a.b", cb).unwrap();

        let second = obj(vec![("b", Value::from("y"))]);
        wrap(&scope).unwrap().set("a", second.clone());
        // the old intermediate is no longer observed
        wrap(&first).unwrap().set("b", "ignored");
        wrap(&second).unwrap().set("b", "z");
        assert_eq!(
            *log.borrow(),
            vec![Value::from("x"), Value::from("y"), Value::from("z")]
        );
        assert_eq!(wrap(&first).unwrap().listener_count(), 0);
    }

    #[test]
    fn undefined_path_activates_later() {
        let scope = obj(vec![]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "user.name", cb).unwrap();
        wrap(&scope).unwrap().set("user", obj(vec![("name", Value::from("ann"))]));
        assert_eq!(*log.borrow(), vec![Value::Undefined, Value::from("ann")]);
    }

    #[test]
    fn leaf_arrays_report_splices() {
        let list = Value::from(Array::new());
        let scope = obj(vec![("list", list.clone())]);
        let changes = Rc::new(RefCell::new(Vec::new()));
        let c = changes.clone();
        let _s = subscribe(&scope, "list", move |_, change| c.borrow_mut().push(change.cloned())).unwrap();
        let l = wrap(&list).unwrap();
        l.push(1);
        l.set_index(0, 2);
        assert_eq!(
            *changes.borrow(),
            vec![
                None,
                Some(Change::insertion(0, vec![Value::from(1)])),
                Some(Change::Splice {
                    index: 0,
                    removed: vec![Value::from(1)],
                    added: vec![Value::from(2)]
                }),
            ]
        );
    }

    #[test]
    fn leaf_objects_are_not_deep() {
        let inner = obj(vec![("x", Value::from(1))]);
        let scope = obj(vec![("inner", inner.clone())]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "inner", cb).unwrap();
        wrap(&inner).unwrap().set("x", 2);
        assert_eq!(log.borrow().len(), 1);
        // but a refresh re-evaluates
        notify(&scope, "inner").unwrap();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn non_observable_root_reports_once() {
        let (log, cb) = recorder();
        let s = subscribe(&Value::from(5), "", cb).unwrap();
        assert!(!s.is_active());
        assert_eq!(*log.borrow(), vec![Value::from(5)]);
    }

    #[test]
    fn notify_forces_reevaluation_after_raw_writes() {
        let scope = obj(vec![("a", Value::from(1))]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "a", cb).unwrap();
        scope.as_object().unwrap().insert("a", 10);
        assert_eq!(log.borrow().len(), 1);
        notify(&scope, "a").unwrap();
        assert_eq!(*log.borrow(), vec![Value::from(1), Value::from(10)]);
    }

    #[test]
    fn selectors_follow_array_changes() {
        let items = Value::from(Array::new());
        let scope = obj(vec![("items", items.clone())]);
        let (log, cb) = recorder();
        let _s = subscribe(&scope, "items[id='b'].label", cb).unwrap();
        let list = wrap(&items).unwrap();
        list.push(obj(vec![("id", Value::from("a")), ("label", Value::from("A"))]));
        list.push(obj(vec![("id", Value::from("b")), ("label", Value::from("B"))]));
        assert_eq!(*log.borrow(), vec![Value::Undefined, Value::from("B")]);

        assert!(set_path(&scope, &Path::parse("items[id='b'].label").unwrap(), Value::from("C")));
        assert_eq!(log.borrow().last(), Some(&Value::from("C")));
    }

    #[test]
    fn invalid_paths_fail_immediately() {
        let scope = obj(vec![]);
        assert!(subscribe(&scope, "a..b", |_, _| {}).is_err());
    }
}
