//! Markup parsing and serialization.
use super::{Content, Document, NodeId};
use crate::error::ParseError;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track", "wbr",
];

fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        rest = &rest[pos..];
        let decoded = rest.find(';').and_then(|end| {
            let c = match &rest[1..end] {
                "amp" => '&',
                "lt" => '<',
                "gt" => '>',
                "quot" => '"',
                "apos" | "#39" => '\'',
                "nbsp" => '\u{a0}',
                num if num.starts_with("#x") => char::from_u32(u32::from_str_radix(&num[2..], 16).ok()?)?,
                num if num.starts_with('#') => char::from_u32(num[1..].parse().ok()?)?,
                _ => return None,
            };
            Some((c, end + 1))
        });
        match decoded {
            Some((c, len)) => {
                out.push(c);
                rest = &rest[len..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' if !attribute => out.push_str("&lt;"),
            '>' if !attribute => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn error(&self, reason: &'static str) -> ParseError {
        ParseError::Html {
            position: self.pos,
            reason,
        }
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        self.pos += rest.len() - rest.trim_start().len();
    }

    fn name(&mut self) -> &'a str {
        let rest = self.rest();
        let len = rest
            .find(|c: char| c.is_whitespace() || matches!(c, '>' | '/' | '=' | '"' | '\''))
            .unwrap_or(rest.len());
        self.pos += len;
        &rest[..len]
    }

    fn attribute_value(&mut self) -> Result<String, ParseError> {
        let rest = self.rest();
        match rest.chars().next() {
            Some(q @ ('"' | '\'')) => {
                let end = rest[1..].find(q).ok_or_else(|| self.error("unterminated attribute value"))?;
                self.pos += end + 2;
                Ok(decode_entities(&rest[1..end + 1]))
            }
            Some(_) => {
                let len = rest
                    .find(|c: char| c.is_whitespace() || c == '>')
                    .unwrap_or(rest.len());
                self.pos += len;
                Ok(decode_entities(&rest[..len]))
            }
            None => Err(self.error("unexpected end of input")),
        }
    }

    /// Parses the inside of a start tag, after the tag name. Returns whether the tag is
    /// self-closing.
    fn attributes(&mut self, doc: &Document, element: NodeId) -> Result<bool, ParseError> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            if rest.starts_with("/>") {
                self.pos += 2;
                return Ok(true);
            }
            if rest.starts_with('>') {
                self.pos += 1;
                return Ok(false);
            }
            if rest.is_empty() {
                return Err(self.error("unterminated start tag"));
            }
            let name = self.name();
            if name.is_empty() {
                return Err(self.error("invalid attribute name"));
            }
            self.skip_ws();
            let value = if self.rest().starts_with('=') {
                self.pos += 1;
                self.skip_ws();
                self.attribute_value()?
            } else {
                String::new()
            };
            doc.set_attribute(element, &name.to_ascii_lowercase(), &value);
        }
    }
}

impl Document {
    /// Parses a markup fragment into a new, detached fragment node.
    ///
    /// Mismatched end tags close the innermost open element with that name; stray end tags are
    /// ignored.
    pub fn parse_html(&self, html: &str) -> Result<NodeId, ParseError> {
        let recorded = self.mutation_count();
        let fragment = self.create_fragment();
        let mut stack: Vec<(NodeId, String)> = vec![(fragment, String::new())];
        let mut p = Parser { src: html, pos: 0 };

        while p.pos < html.len() {
            let rest = p.rest();
            let parent = stack.last().map(|(n, _)| *n).unwrap_or(fragment);
            if let Some(comment) = rest.strip_prefix("<!--") {
                let end = comment.find("-->").ok_or_else(|| p.error("unterminated comment"))?;
                let node = self.create_comment(&comment[..end]);
                self.append_child(parent, node);
                p.pos += 4 + end + 3;
            } else if let Some(end_tag) = rest.strip_prefix("</") {
                let end = end_tag.find('>').ok_or_else(|| p.error("unterminated end tag"))?;
                let name = end_tag[..end].trim().to_ascii_lowercase();
                if let Some(i) = stack.iter().rposition(|(_, tag)| *tag == name) {
                    if i > 0 {
                        stack.truncate(i);
                    }
                }
                p.pos += 2 + end + 1;
            } else if rest.starts_with("<!") {
                // doctype
                let end = rest.find('>').ok_or_else(|| p.error("unterminated declaration"))?;
                p.pos += end + 1;
            } else if rest.starts_with('<') && rest[1..].starts_with(|c: char| c.is_ascii_alphabetic()) {
                p.pos += 1;
                let tag = p.name().to_ascii_lowercase();
                let element = self.create_element(&tag);
                let self_closing = p.attributes(self, element)?;
                self.append_child(parent, element);
                if !self_closing && !is_void(&tag) {
                    stack.push((element, tag));
                }
            } else {
                let len = rest
                    .char_indices()
                    .skip(1)
                    .find(|(_, c)| *c == '<')
                    .map(|(i, _)| i)
                    .unwrap_or(rest.len());
                let node = self.create_text(&decode_entities(&rest[..len]));
                self.append_child(parent, node);
                p.pos += len;
            }
        }

        // parsing doesn't count as a mutation
        self.0.borrow_mut().mutations.truncate(recorded);
        Ok(fragment)
    }

    fn write_html(&self, id: NodeId, out: &mut String) {
        enum Item {
            Open(String, Vec<(String, String)>, bool),
            Text(String),
            Comment(String),
            Container,
        }
        let item = {
            let tree = self.0.borrow();
            let Some(node) = tree.nodes.get(id) else { return };
            match node.content {
                Content::Element(ref e) => Item::Open(e.tag.clone(), e.attributes.clone(), is_void(&e.tag)),
                Content::Text(ref t) => Item::Text(t.clone()),
                Content::Comment(ref t) => Item::Comment(t.clone()),
                Content::Fragment => Item::Container,
            }
        };
        match item {
            Item::Open(tag, attributes, void) => {
                out.push('<');
                out.push_str(&tag);
                for (name, value) in attributes {
                    out.push(' ');
                    out.push_str(&name);
                    if !value.is_empty() {
                        out.push_str("=\"");
                        out.push_str(&escape(&value, true));
                        out.push('"');
                    }
                }
                out.push('>');
                if !void {
                    for c in self.children(id) {
                        self.write_html(c, out);
                    }
                    out.push_str("</");
                    out.push_str(&tag);
                    out.push('>');
                }
            }
            Item::Text(t) => out.push_str(&escape(&t, false)),
            Item::Comment(t) => {
                out.push_str("<!--");
                out.push_str(&t);
                out.push_str("-->");
            }
            Item::Container => {
                for c in self.children(id) {
                    self.write_html(c, out);
                }
            }
        }
    }

    /// Serializes a node and its descendants.
    pub fn to_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        self.write_html(id, &mut out);
        out
    }

    /// Serializes the children of a node.
    pub fn inner_html(&self, id: NodeId) -> String {
        let mut out = String::new();
        for c in self.children(id) {
            self.write_html(c, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::NodeKind;

    #[test]
    fn parse_and_serialize() {
        let doc = Document::new();
        let html = r#"<ul class="list"><li fn="each">{[name]} &amp; co</li></ul><input type=checkbox checked><!--x-->"#;
        let frag = doc.parse_html(html).unwrap();
        assert_eq!(doc.kind(frag), Some(NodeKind::Fragment));
        let children = doc.children(frag);
        assert_eq!(children.len(), 3);
        let li = doc.query_all(frag, "li")[0];
        assert_eq!(doc.attribute(li, "fn").as_deref(), Some("each"));
        assert_eq!(doc.text_content(li), "{[name]} & co");
        assert_eq!(
            doc.inner_html(frag),
            r#"<ul class="list"><li fn="each">{[name]} &amp; co</li></ul><input type="checkbox" checked><!--x-->"#
        );
        assert_eq!(doc.mutation_count(), 0);
    }

    #[test]
    fn quoted_brackets_in_attributes() {
        let doc = Document::new();
        let frag = doc.parse_html(r#"<p title='a > b' :class="{[x]}">t</p>"#).unwrap();
        let p = doc.children(frag)[0];
        assert_eq!(doc.attribute(p, "title").as_deref(), Some("a > b"));
        assert_eq!(doc.attribute(p, ":class").as_deref(), Some("{[x]}"));
    }

    #[test]
    fn mismatched_end_tags() {
        let doc = Document::new();
        let frag = doc.parse_html("<div><span>a</div>b</p>").unwrap();
        assert_eq!(doc.inner_html(frag), "<div><span>a</span></div>b");
        assert!(doc.parse_html("<div").is_err());
        assert!(doc.parse_html("<!-- open").is_err());
    }
}
