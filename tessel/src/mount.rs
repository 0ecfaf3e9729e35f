//! Mounting: walks a DOM subtree once and builds the renderers that keep it in sync with a scope.
use crate::{
    config::{Config, TagConfig},
    directive::DirectiveMount,
    dom::{Document, NodeId, NodeKind},
    error::MountError,
    include,
    render::{
        AttributeSink, BooleanSink, ClassSink, Mountable, Renderer, TextSink, ValueSink,
    },
    token::{has_tokens, Template},
};
use std::{cell::Cell, fmt, rc::Rc};
use tessel_common::Value;
use tracing::{debug, trace};

/// State shared by everything mounted from one `mount` call: the document and the configuration.
pub struct MountCx {
    doc: Document,
    config: Config,
}

impl fmt::Debug for MountCx {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MountCx").field("options", &self.config.options).finish_non_exhaustive()
    }
}

/// Mounts the subtree rooted at `root`.
///
/// Nothing is rendered until a scope is pushed into the returned handle.
pub fn mount(doc: &Document, root: NodeId, config: &Config) -> Result<Handle, MountError> {
    MountCx::new(doc, config.clone()).mount(root)
}

impl MountCx {
    pub fn new(doc: &Document, config: Config) -> Rc<MountCx> {
        Rc::new(MountCx {
            doc: doc.clone(),
            config,
        })
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Mounts a subtree with this context.
    pub fn mount(self: &Rc<Self>, root: NodeId) -> Result<Handle, MountError> {
        let mut members = Vec::new();
        self.mount_node(root, &mut members)?;
        trace!(members = members.len(), "mounted subtree");
        Ok(Handle::new(members))
    }

    fn mount_node(self: &Rc<Self>, node: NodeId, members: &mut Vec<Rc<dyn Mountable>>) -> Result<(), MountError> {
        match self.doc.kind(node) {
            Some(NodeKind::Element) => self.mount_element(node, members),
            Some(NodeKind::Text) => self.mount_text(node, members),
            Some(NodeKind::Fragment) => self.mount_children(node, members),
            Some(NodeKind::Comment) | None => Ok(()),
        }
    }

    fn mount_children(self: &Rc<Self>, node: NodeId, members: &mut Vec<Rc<dyn Mountable>>) -> Result<(), MountError> {
        // snapshot: nodes inserted while mounting are not visited
        for child in self.doc.children(node) {
            self.mount_node(child, members)?;
        }
        Ok(())
    }

    fn mount_text(&self, node: NodeId, members: &mut Vec<Rc<dyn Mountable>>) -> Result<(), MountError> {
        let text = self.doc.text(node).unwrap_or_default();
        if !has_tokens(&text) {
            return Ok(());
        }
        let template = Template::parse(&text, &self.config.filters)?;
        members.push(Renderer::new(&self.doc, template, TextSink::new(node)));
        Ok(())
    }

    fn mount_element(self: &Rc<Self>, node: NodeId, members: &mut Vec<Rc<dyn Mountable>>) -> Result<(), MountError> {
        if self.doc.is_element(node, "template") {
            return Ok(());
        }
        let fn_attribute = &self.config.options.attribute_fn;
        if let Some(directives) = self.doc.attribute(node, fn_attribute) {
            self.doc.remove_attribute(node, fn_attribute);
            let m = DirectiveMount::new(self, node, &directives)?;
            members.push(m);
            return Ok(());
        }
        self.mount_content(node, members)
    }

    /// Mounts the include, attribute bindings and children of an element.
    pub(crate) fn mount_content(
        self: &Rc<Self>,
        node: NodeId,
        members: &mut Vec<Rc<dyn Mountable>>,
    ) -> Result<(), MountError> {
        let include_attribute = &self.config.options.attribute_include;
        if let Some(reference) = self.doc.attribute(node, include_attribute) {
            self.doc.remove_attribute(node, include_attribute);
            include::include(self, node, &reference);
        }

        let tag = self.config.options.tag_config(&self.doc, node);
        let mut deferred = None;
        for (name, text) in self.doc.attributes(node) {
            let prefix = &self.config.options.attribute_prefix;
            let target = match name.strip_prefix(prefix.as_str()) {
                Some(target) if !prefix.is_empty() && !target.is_empty() => target.to_string(),
                _ if has_tokens(&text) && (name == "class" || tag.binds(&name)) => name.clone(),
                _ => continue,
            };
            self.doc.remove_attribute(node, &name);
            if let Some(m) = self.bind_attribute(node, &target, &text, &tag)? {
                // a select takes its value from its options: bind it after them
                if self.doc.is_element(node, "select") && tag.value.as_deref() == Some(target.as_str()) {
                    deferred = Some(m);
                } else {
                    members.push(m);
                }
            }
        }

        self.mount_children(node, members)?;
        members.extend(deferred);
        Ok(())
    }

    fn bind_attribute(
        &self,
        node: NodeId,
        name: &str,
        text: &str,
        tag: &TagConfig,
    ) -> Result<Option<Rc<dyn Mountable>>, MountError> {
        let template = Template::parse(text, &self.config.filters)?;
        if template.tokens().is_empty() {
            // prefixed attribute without tokens: plain value
            self.doc.set_attribute(node, name, text);
            return Ok(None);
        }
        let doc = &self.doc;
        let m: Rc<dyn Mountable> = if name == "class" {
            let sink = ClassSink::new(doc, node, &template);
            Renderer::new(doc, template, sink)
        } else if tag.value.as_deref() == Some(name) {
            ValueSink::bind(doc, node, template)
        } else if tag.booleans.iter().any(|b| b == name) {
            Renderer::new(doc, template, BooleanSink::new(doc, node, name))
        } else {
            Renderer::new(doc, template, AttributeSink::new(node, name))
        };
        debug!(attribute = name, "bound attribute");
        Ok(Some(m))
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// The renderers of a mounted subtree, pushed and stopped together.
///
/// Dropping the handle stops it.
pub struct Handle {
    members: Vec<Rc<dyn Mountable>>,
    stopped: Cell<bool>,
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Handle")
            .field("members", &self.members.len())
            .field("stopped", &self.stopped.get())
            .finish()
    }
}

impl Handle {
    pub fn new(members: Vec<Rc<dyn Mountable>>) -> Handle {
        Handle {
            members,
            stopped: Cell::new(false),
        }
    }

    /// Pushes a scope into every member.
    ///
    /// All members receive the scope even if one fails; the first error is returned.
    pub fn push(&self, scope: &Value) -> Result<(), MountError> {
        if self.stopped.get() {
            debug!("push into a stopped handle");
            return Ok(());
        }
        let mut result = Ok(());
        for m in &self.members {
            if let Err(err) = m.push(scope) {
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    /// Stops every member. Subsequent calls do nothing.
    pub fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        for m in &self.members {
            m.stop();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.get()
    }

    /// Number of direct members (renderers, directive runners).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

impl Mountable for Handle {
    fn push(&self, scope: &Value) -> Result<(), MountError> {
        Handle::push(self, scope)
    }

    fn stop(&self) {
        Handle::stop(self)
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.stop();
    }
}
