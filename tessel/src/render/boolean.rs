use super::Sink;
use crate::{
    dom::{Document, NodeId},
    token::Template,
};
use tessel_common::Value;

/// Toggles a boolean attribute or property. The state is true when any token value is truthy.
pub struct BooleanSink {
    node: NodeId,
    name: String,
    last: bool,
}

impl BooleanSink {
    /// Creates the sink, taking the current state from the element.
    pub fn new(doc: &Document, node: NodeId, name: &str) -> BooleanSink {
        let last = if doc.has_property(node, name) {
            doc.property(node, name).map_or(false, |v| v.is_truthy())
        } else {
            doc.has_attribute(node, name)
        };
        BooleanSink {
            node,
            name: name.to_string(),
            last,
        }
    }
}

impl Sink for BooleanSink {
    fn render(&mut self, doc: &Document, _template: &Template, values: &[Value]) -> usize {
        let on = values.iter().any(Value::is_truthy);
        if on == self.last {
            return 0;
        }
        if doc.has_property(self.node, &self.name) {
            doc.set_property(self.node, &self.name, Value::Bool(on));
        } else if on {
            doc.set_attribute(self.node, &self.name, &self.name);
        } else {
            doc.remove_attribute(self.node, &self.name);
        }
        self.last = on;
        1
    }
}
