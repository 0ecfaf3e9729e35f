//! Push-based value streams.
//!
//! Scopes flow into nodes through streams: directives receive the stream of their node and may
//! replace it with a derived one.
use slotmap::SlotMap;
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::{Rc, Weak},
};
use tessel_common::Value;
use tracing::trace;

slotmap::new_key_type! {
    struct SubscriberKey;
}

type Subscriber = Rc<dyn Fn(&Value)>;

struct StreamInner {
    latest: RefCell<Option<Value>>,
    subscribers: RefCell<SlotMap<SubscriberKey, Subscriber>>,
    teardown: RefCell<Vec<Box<dyn FnOnce()>>>,
    done: Cell<bool>,
}

/// A stream of values. Clones refer to the same stream.
#[derive(Clone)]
pub struct Stream(Rc<StreamInner>);

impl Default for Stream {
    fn default() -> Self {
        Stream::new()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Stream")
            .field("latest", &self.0.latest.borrow())
            .field("done", &self.0.done.get())
            .finish_non_exhaustive()
    }
}

impl Stream {
    pub fn new() -> Stream {
        Stream(Rc::new(StreamInner {
            latest: RefCell::new(None),
            subscribers: RefCell::new(SlotMap::with_key()),
            teardown: RefCell::new(Vec::new()),
            done: Cell::new(false),
        }))
    }

    /// Sends a value to the subscribers. Ignored once the stream is complete.
    pub fn push(&self, value: Value) {
        if self.0.done.get() {
            trace!("push on a completed stream");
            return;
        }
        self.0.latest.replace(Some(value.clone()));
        let subscribers: Vec<(SubscriberKey, Subscriber)> =
            self.0.subscribers.borrow().iter().map(|(k, s)| (k, s.clone())).collect();
        for (key, s) in subscribers {
            if !self.0.subscribers.borrow().contains_key(key) {
                continue;
            }
            s(&value);
        }
    }

    /// Adds a subscriber. It immediately receives the latest value, if any.
    pub fn subscribe(&self, f: impl Fn(&Value) + 'static) -> StreamSubscription {
        let f: Subscriber = Rc::new(f);
        let key = self.0.subscribers.borrow_mut().insert(f.clone());
        let latest = self.0.latest.borrow().clone();
        if let Some(latest) = latest {
            f(&latest);
        }
        StreamSubscription {
            stream: Rc::downgrade(&self.0),
            key,
        }
    }

    /// Runs `f` when the stream completes (immediately if it already has).
    pub fn on_complete(&self, f: impl FnOnce() + 'static) {
        if self.0.done.get() {
            f();
        } else {
            self.0.teardown.borrow_mut().push(Box::new(f));
        }
    }

    /// Completes the stream: drops the subscribers and runs the teardown handlers.
    pub fn complete(&self) {
        if self.0.done.replace(true) {
            return;
        }
        let subscribers = std::mem::take(&mut *self.0.subscribers.borrow_mut());
        drop(subscribers);
        let teardown = std::mem::take(&mut *self.0.teardown.borrow_mut());
        for f in teardown {
            f();
        }
    }

    pub fn is_done(&self) -> bool {
        self.0.done.get()
    }

    pub fn latest(&self) -> Option<Value> {
        self.0.latest.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.0.subscribers.borrow().len()
    }

    /// A stream of the values of this one, transformed by `f`. Completing either one completes
    /// the derived stream.
    pub fn map(&self, f: impl Fn(&Value) -> Value + 'static) -> Stream {
        let out = Stream::new();
        let target = out.clone();
        let sub = self.subscribe(move |v| target.push(f(v)));
        out.on_complete(move || drop(sub));
        let weak = Rc::downgrade(&out.0);
        self.on_complete(move || {
            if let Some(inner) = weak.upgrade() {
                Stream(inner).complete()
            }
        });
        out
    }

    /// Returns whether both handles refer to the same stream.
    pub fn ptr_eq(&self, other: &Stream) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// Removes a subscriber when dropped.
#[must_use]
pub struct StreamSubscription {
    stream: Weak<StreamInner>,
    key: SubscriberKey,
}

impl Drop for StreamSubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            inner.subscribers.borrow_mut().remove(self.key);
        }
    }
}
