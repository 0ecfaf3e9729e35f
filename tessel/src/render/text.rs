use super::Sink;
use crate::{
    dom::{Document, NodeId},
    token::Template,
};
use tessel_common::Value;

/// Writes the content of a text node.
pub struct TextSink {
    node: NodeId,
    last: Option<String>,
}

impl TextSink {
    pub fn new(node: NodeId) -> TextSink {
        TextSink { node, last: None }
    }
}

impl Sink for TextSink {
    fn render(&mut self, doc: &Document, template: &Template, values: &[Value]) -> usize {
        let text = template.join(values);
        if self.last.as_ref() == Some(&text) {
            return 0;
        }
        doc.set_text(self.node, &text);
        self.last = Some(text);
        1
    }
}

/// Writes an attribute. A template made of a single token whose value is null or undefined
/// removes the attribute.
pub struct AttributeSink {
    node: NodeId,
    name: String,
    last: Option<Option<String>>,
}

impl AttributeSink {
    pub fn new(node: NodeId, name: &str) -> AttributeSink {
        AttributeSink {
            node,
            name: name.to_string(),
            last: None,
        }
    }
}

impl Sink for AttributeSink {
    fn render(&mut self, doc: &Document, template: &Template, values: &[Value]) -> usize {
        let want = if template.is_single_token() && values.first().map_or(true, Value::is_nullish) {
            None
        } else {
            Some(template.join(values))
        };
        if self.last.as_ref() == Some(&want) {
            return 0;
        }
        let n = match &want {
            Some(v) => {
                doc.set_attribute(self.node, &self.name, v);
                1
            }
            None => doc.remove_attribute(self.node, &self.name) as usize,
        };
        self.last = Some(want);
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{filter::FilterRegistry, frame, observe::wrap, render::Mountable, render::Renderer};
    use tessel_common::Object;

    #[test]
    fn attribute_composition_and_removal() {
        let doc = Document::new();
        let a = doc.create_element("a");
        let filters = FilterRegistry::with_builtins();
        let href = Renderer::new(
            &doc,
            Template::parse("/users/{[id]}", &filters).unwrap(),
            AttributeSink::new(a, "href"),
        );
        let title = Renderer::new(
            &doc,
            Template::parse("{[title]}", &filters).unwrap(),
            AttributeSink::new(a, "title"),
        );
        let scope = Value::from(Object::from_entries([("id", Value::from(7)), ("title", Value::from("x"))]));
        href.push(&scope).unwrap();
        title.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.attribute(a, "href").as_deref(), Some("/users/7"));
        assert_eq!(doc.attribute(a, "title").as_deref(), Some("x"));

        let o = wrap(&scope).unwrap();
        o.set("title", Value::Null);
        o.set("id", Value::Undefined);
        frame::run_frame().unwrap();
        assert!(!doc.has_attribute(a, "title"));
        assert_eq!(doc.attribute(a, "href").as_deref(), Some("/users/"));
    }

    #[test]
    fn text_is_written_once_per_change() {
        let doc = Document::new();
        let t = doc.create_text("");
        let r = Renderer::new(
            &doc,
            Template::parse("{[n]} items", &FilterRegistry::new()).unwrap(),
            TextSink::new(t),
        );
        let scope = Value::from(Object::from_entries([("n", 2)]));
        r.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.text_content(t), "2 items");
        r.push(&Value::from(Object::from_entries([("n", 2)]))).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(r.mutations(), 1);
    }
}
