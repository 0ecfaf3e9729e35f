//! Per-object listener lists.
use super::Change;
use slotmap::SlotMap;
use std::{
    cell::RefCell,
    rc::{Rc, Weak},
};
use tessel_common::Value;

slotmap::new_key_type! {
    pub(crate) struct ListenerKey;
}

/// What a listener is interested in.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ListenKey {
    /// Writes to one named property of an object.
    Name(String),
    /// Every change of the object or array itself.
    Own,
}

pub(crate) type Callback = Rc<dyn Fn(&Value, &Change)>;

/// Listeners attached to one object or array.
///
/// The hub is stored in the extension slot of the value it observes and never holds a strong
/// reference to it: the value is passed to listeners when notifying.
pub(crate) struct Hub {
    listeners: RefCell<SlotMap<ListenerKey, (ListenKey, Callback)>>,
}

impl Hub {
    fn new() -> Hub {
        Hub {
            listeners: RefCell::new(SlotMap::with_key()),
        }
    }

    /// Returns the hub of an object or array, creating it if necessary.
    ///
    /// Returns `None` for primitives, opaque values and frozen structures.
    pub(crate) fn of(value: &Value) -> Option<Rc<Hub>> {
        match value {
            Value::Object(o) if !o.is_frozen() => Some(match Hub::existing(value) {
                Some(hub) => hub,
                None => {
                    let hub = Rc::new(Hub::new());
                    o.set_extension(hub.clone());
                    hub
                }
            }),
            Value::Array(a) if !a.is_frozen() => Some(match Hub::existing(value) {
                Some(hub) => hub,
                None => {
                    let hub = Rc::new(Hub::new());
                    a.set_extension(hub.clone());
                    hub
                }
            }),
            _ => None,
        }
    }

    /// Returns the hub of a value if it was already created.
    pub(crate) fn existing(value: &Value) -> Option<Rc<Hub>> {
        let ext = match value {
            Value::Object(o) => o.extension()?,
            Value::Array(a) => a.extension()?,
            _ => return None,
        };
        ext.downcast::<Hub>().ok()
    }

    pub(crate) fn add(self: &Rc<Self>, key: ListenKey, callback: Callback) -> Registration {
        let id = self.listeners.borrow_mut().insert((key, callback));
        Registration {
            hub: Rc::downgrade(self),
            id,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    /// Invokes the listeners registered for `key`.
    ///
    /// Listeners are collected first, so they may add or remove listeners; a listener removed by
    /// a previous one is skipped.
    pub(crate) fn notify(&self, target: &Value, key: &ListenKey, change: &Change) {
        let callbacks: Vec<(ListenerKey, Callback)> = self
            .listeners
            .borrow()
            .iter()
            .filter(|(_, (k, _))| k == key)
            .map(|(id, (_, cb))| (id, cb.clone()))
            .collect();
        for (id, cb) in callbacks {
            if !self.listeners.borrow().contains_key(id) {
                continue;
            }
            cb(target, change);
        }
    }
}

/// Removes a listener from its hub when dropped.
pub(crate) struct Registration {
    hub: Weak<Hub>,
    id: ListenerKey,
}

impl Drop for Registration {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.listeners.borrow_mut().remove(self.id);
        }
    }
}
