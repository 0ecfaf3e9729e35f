use super::{Renderer, Sink};
use crate::{
    dom::{Document, ListenerId, NodeId},
    observe,
    token::Template,
};
use smallvec::SmallVec;
use std::rc::Rc;
use tessel_common::{format_number, parse_float, Data, Value};
use tracing::trace;

/// The kind of form control a value binding targets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControlKind {
    /// Text inputs, textareas: the value is a string.
    Text,
    /// `number` and `range` inputs: the value is a number, or undefined when empty.
    Number,
    /// Checkboxes. Without a `value` attribute the scope value is a boolean; with one, the
    /// scope value is that string while checked.
    Checkbox(Option<String>),
    /// Radio buttons, same as checkboxes.
    Radio(Option<String>),
    /// Selects: the value of the selected option.
    Select,
}

impl ControlKind {
    pub fn of(doc: &Document, node: NodeId) -> ControlKind {
        match doc.tag(node).as_deref() {
            Some("select") => ControlKind::Select,
            Some("input") => {
                let ty = doc.attribute(node, "type").unwrap_or_default().to_ascii_lowercase();
                match ty.as_str() {
                    "number" | "range" => ControlKind::Number,
                    "checkbox" => ControlKind::Checkbox(doc.attribute(node, "value")),
                    "radio" => ControlKind::Radio(doc.attribute(node, "value")),
                    _ => ControlKind::Text,
                }
            }
            _ => ControlKind::Text,
        }
    }

    fn checkable(&self) -> Option<&Option<String>> {
        match self {
            ControlKind::Checkbox(v) | ControlKind::Radio(v) => Some(v),
            _ => None,
        }
    }
}

/// Two-way binding between a form control and a scope path.
///
/// Scope changes are written into the control; `input` and `change` events on the control
/// write its value back into the scope. The write-back does not schedule a render of the same
/// binding.
pub struct ValueSink {
    node: NodeId,
    kind: ControlKind,
    listeners: SmallVec<[ListenerId; 2]>,
}

impl ValueSink {
    /// Creates the binding renderer and attaches the event listeners to the control.
    pub fn bind(doc: &Document, node: NodeId, template: Template) -> Rc<Renderer<ValueSink>> {
        let sink = ValueSink {
            node,
            kind: ControlKind::of(doc, node),
            listeners: SmallVec::new(),
        };
        let renderer = Renderer::new(doc, template, sink);
        let mut listeners = SmallVec::new();
        for event in ["input", "change"] {
            let weak = renderer.weak();
            listeners.push(doc.add_listener(node, event, move |doc, _| {
                if let Some(renderer) = weak.upgrade() {
                    ValueSink::write_back(&renderer, doc)
                }
            }));
        }
        renderer.with_sink(|s| s.listeners = listeners);
        renderer
    }

    pub fn kind(&self) -> &ControlKind {
        &self.kind
    }

    /// Reads the control, converted to a scope value.
    fn read(&self, doc: &Document) -> Value {
        let value = doc.property(self.node, "value").unwrap_or_default();
        if let Some(fixed) = self.kind.checkable() {
            let checked = doc.property(self.node, "checked").map_or(false, |v| v.is_truthy());
            return match fixed {
                None => Value::Bool(checked),
                Some(v) if checked => Value::from(v.as_str()),
                Some(_) => Value::Undefined,
            };
        }
        match self.kind {
            ControlKind::Number => {
                let text = value.to_display_string();
                let text = text.trim();
                if text.is_empty() {
                    Value::Undefined
                } else {
                    Value::Number(parse_float(text))
                }
            }
            _ => Value::from(value.to_display_string()),
        }
    }

    fn write_back(renderer: &Renderer<ValueSink>, doc: &Document) {
        if renderer.is_stopped() {
            return;
        }
        let Some(token) = renderer.template().tokens().first() else { return };
        let value = renderer.with_sink(|s| s.read(doc));
        let scope = renderer.scope();
        trace!(path = %token.path, ?value, "control value written back");
        renderer.suppressed(|| observe::set_path(&scope, &token.path, value));
    }

    fn write(&self, doc: &Document, name: &str, value: Value) -> usize {
        if doc.property(self.node, name).map_or(false, |current| current.same(&value)) {
            return 0;
        }
        doc.set_property(self.node, name, value);
        1
    }
}

impl Sink for ValueSink {
    fn render(&mut self, doc: &Document, _template: &Template, values: &[Value]) -> usize {
        let value = values.first().cloned().unwrap_or_default();
        if let Some(fixed) = self.kind.checkable() {
            let checked = match fixed {
                None => value.same(&Value::Bool(true)),
                Some(v) => !value.is_nullish() && value.to_display_string() == *v,
            };
            return self.write(doc, "checked", Value::Bool(checked));
        }
        let text = match (&self.kind, &value) {
            (ControlKind::Number, Value::Number(n)) if n.is_nan() => String::new(),
            (ControlKind::Number, Value::Number(n)) => format_number(*n),
            (_, v) => v.to_display_string(),
        };
        self.write(doc, "value", Value::from(text))
    }

    fn pushed(renderer: &Renderer<ValueSink>) {
        // an undefined scope value takes the default of the control
        if !renderer.slot_value(0).is_undefined() {
            return;
        }
        let value = renderer.with_sink(|s| s.read(renderer.doc()));
        if value.is_undefined() {
            return;
        }
        let Some(token) = renderer.template().tokens().first() else { return };
        let scope = renderer.scope();
        renderer.suppressed(|| observe::set_path(&scope, &token.path, value));
    }

    fn stop(&mut self, doc: &Document) {
        for listener in self.listeners.drain(..) {
            doc.remove_listener(listener);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::FilterRegistry, frame, observe::wrap, render::Mountable};
    use tessel_common::Object;

    fn bind(doc: &Document, node: NodeId, path: &str) -> Rc<Renderer<ValueSink>> {
        let template = Template::parse(&format!("{{[{path}]}}"), &FilterRegistry::new()).unwrap();
        ValueSink::bind(doc, node, template)
    }

    #[test]
    fn number_input_write_back_does_not_echo() {
        let doc = Document::new();
        let input = doc.create_element("input");
        doc.set_attribute(input, "type", "number");
        let r = bind(&doc, input, "value");
        let scope = Value::from(Object::from_entries([("value", 5)]));
        r.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.property(input, "value"), Some(Value::from("5")));
        assert_eq!(r.mutations(), 1);

        doc.set_property(input, "value", Value::from("6"));
        doc.dispatch(input, "input");
        assert_eq!(scope.as_object().unwrap().get("value"), Value::from(6));
        assert_eq!(frame::pending_len(), 0);
        frame::run_frame().unwrap();
        assert_eq!(r.mutations(), 1);

        doc.set_property(input, "value", Value::from(""));
        doc.dispatch(input, "change");
        assert!(scope.as_object().unwrap().get("value").is_undefined());
    }

    #[test]
    fn number_input_reads_numeric_prefix() {
        let doc = Document::new();
        let input = doc.create_element("input");
        doc.set_attribute(input, "type", "number");
        let r = bind(&doc, input, "value");
        let scope = Value::from(Object::from_entries([("value", 1)]));
        r.push(&scope).unwrap();
        frame::run_frame().unwrap();
        let read = |text: &str| {
            doc.set_property(input, "value", Value::from(text));
            doc.dispatch(input, "change");
            scope.as_object().unwrap().get("value")
        };
        assert_eq!(read("12px"), Value::from(12));
        assert_eq!(read(" 2.5e1 "), Value::from(25));
        assert_eq!(read("1e"), Value::from(1));
        assert!(read("px").as_number().unwrap().is_nan());
    }

    #[test]
    fn control_default_fills_undefined_scope() {
        let doc = Document::new();
        let input = doc.create_element("input");
        doc.set_attribute(input, "value", "guest");
        let r = bind(&doc, input, "name");
        let scope = Value::from(Object::new());
        r.push(&scope).unwrap();
        assert_eq!(scope.as_object().unwrap().get("name"), Value::from("guest"));
        frame::run_frame().unwrap();
        assert_eq!(r.mutations(), 0);
    }

    #[test]
    fn checkboxes() {
        let doc = Document::new();
        let plain = doc.create_element("input");
        doc.set_attribute(plain, "type", "checkbox");
        let valued = doc.create_element("input");
        doc.set_attribute(valued, "type", "checkbox");
        doc.set_attribute(valued, "value", "red");
        let a = bind(&doc, plain, "agree");
        let b = bind(&doc, valued, "color");
        let scope = Value::from(Object::from_entries([("agree", Value::from(1)), ("color", Value::from("red"))]));
        a.push(&scope).unwrap();
        b.push(&scope).unwrap();
        frame::run_frame().unwrap();
        // only `true` checks a plain checkbox
        assert_eq!(doc.property(plain, "checked"), Some(Value::Bool(false)));
        assert_eq!(doc.property(valued, "checked"), Some(Value::Bool(true)));

        doc.set_property(valued, "checked", Value::Bool(false));
        doc.dispatch(valued, "change");
        assert!(scope.as_object().unwrap().get("color").is_undefined());
        doc.set_property(plain, "checked", Value::Bool(true));
        doc.dispatch(plain, "change");
        assert_eq!(scope.as_object().unwrap().get("agree"), Value::Bool(true));
    }

    #[test]
    fn select_value_and_teardown() {
        let doc = Document::new();
        let frag = doc
            .parse_html("<select><option>a</option><option value='2'>b</option></select>")
            .unwrap();
        let select = doc.first_child(frag).unwrap();
        let r = bind(&doc, select, "choice");
        let scope = Value::from(Object::from_entries([("choice", "2")]));
        r.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.property(select, "value"), Some(Value::from("2")));
        wrap(&scope).unwrap().set("choice", "a");
        frame::run_frame().unwrap();
        assert_eq!(doc.property(select, "value"), Some(Value::from("a")));

        assert_eq!(doc.listener_count(select), 2);
        r.stop();
        assert_eq!(doc.listener_count(select), 0);
    }
}
