use tessel_common::Value;

/// Describes a change applied to an observed object or array.
#[derive(Clone, Debug, PartialEq)]
pub enum Change {
    /// A property of an object was written or removed (`added` is `Undefined` on removal).
    Property { name: String, removed: Value, added: Value },
    /// Elements were removed from and/or inserted into an array at `index`.
    Splice {
        index: usize,
        removed: Vec<Value>,
        added: Vec<Value>,
    },
    /// Forced re-evaluation (see `observe::notify`).
    Refresh,
}

impl Change {
    pub fn property(name: impl Into<String>, removed: Value, added: Value) -> Change {
        Change::Property {
            name: name.into(),
            removed,
            added,
        }
    }

    pub fn insertion(at: usize, added: Vec<Value>) -> Change {
        Change::Splice {
            index: at,
            removed: vec![],
            added,
        }
    }

    pub fn deletion(at: usize, removed: Vec<Value>) -> Change {
        Change::Splice {
            index: at,
            removed,
            added: vec![],
        }
    }

    pub fn is_refresh(&self) -> bool {
        matches!(self, Change::Refresh)
    }
}
