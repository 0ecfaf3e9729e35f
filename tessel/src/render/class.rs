use super::Sink;
use crate::{
    dom::{Document, NodeId},
    token::Template,
};
use tessel_common::Value;

/// Maintains the dynamic part of a `class` attribute.
///
/// Literal classes of the template are written once, when the sink is created. On each
/// render, only the classes produced by the tokens are added or removed.
pub struct ClassSink {
    node: NodeId,
    fixed: Vec<String>,
    last: Vec<String>,
}

impl ClassSink {
    pub fn new(doc: &Document, node: NodeId, template: &Template) -> ClassSink {
        let fixed: Vec<String> = template.static_text().split_whitespace().map(str::to_string).collect();
        doc.set_attribute(node, "class", &fixed.join(" "));
        ClassSink {
            node,
            fixed,
            last: Vec::new(),
        }
    }
}

impl Sink for ClassSink {
    fn render(&mut self, doc: &Document, _template: &Template, values: &[Value]) -> usize {
        let mut next: Vec<String> = Vec::new();
        for v in values {
            for class in v.to_display_string().split_whitespace() {
                if !next.iter().any(|c| c == class) {
                    next.push(class.to_string());
                }
            }
        }
        let mut n = 0;
        for old in &self.last {
            if !next.contains(old) && !self.fixed.contains(old) && doc.remove_class(self.node, old) {
                n += 1;
            }
        }
        for new in &next {
            if doc.add_class(self.node, new) {
                n += 1;
            }
        }
        self.last = next;
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        filter::FilterRegistry,
        frame,
        observe::wrap,
        render::{Mountable, Renderer},
    };
    use tessel_common::Object;

    #[test]
    fn only_dynamic_classes_change() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let template = Template::parse("btn {[state]} large", &FilterRegistry::new()).unwrap();
        let sink = ClassSink::new(&doc, div, &template);
        assert_eq!(doc.attribute(div, "class").as_deref(), Some("btn large"));
        let r = Renderer::new(&doc, template, sink);
        let scope = Value::from(Object::from_entries([("state", "on")]));
        r.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.class_list(div), vec!["btn", "large", "on"]);

        doc.take_mutations();
        wrap(&scope).unwrap().set("state", "off");
        frame::run_frame().unwrap();
        assert_eq!(doc.class_list(div), vec!["btn", "large", "off"]);
        assert_eq!(doc.take_mutations().len(), 2);

        // a dynamic class equal to a literal one never removes it
        wrap(&scope).unwrap().set("state", "btn");
        frame::run_frame().unwrap();
        wrap(&scope).unwrap().set("state", Value::Undefined);
        frame::run_frame().unwrap();
        assert_eq!(doc.class_list(div), vec!["btn", "large"]);
    }
}
