//! Template includes: `<div include="widgets.html#card">`.
use crate::{
    dom::{Document, NodeId},
    mount::MountCx,
};
use anyhow::{anyhow, Context};
use std::{cell::RefCell, collections::HashMap};
use tracing::{debug, error};

/// Resolves template references.
pub trait TemplateSource {
    /// Returns the node whose children are the content of the referenced template.
    fn resolve(&self, doc: &Document, url: &str, id: Option<&str>) -> anyhow::Result<NodeId>;
}

/// Templates looked up by id in the same document. The URL is ignored.
#[derive(Copy, Clone, Debug, Default)]
pub struct DocumentTemplates;

impl TemplateSource for DocumentTemplates {
    fn resolve(&self, doc: &Document, url: &str, id: Option<&str>) -> anyhow::Result<NodeId> {
        let id = id.ok_or_else(|| anyhow!("`{url}`: a template id is required"))?;
        doc.element_by_id(id)
            .ok_or_else(|| anyhow!("no template with id `{id}`"))
    }
}

/// Templates from HTML sources registered by URL.
///
/// Each source is parsed once, into the document it is first requested for.
#[derive(Default)]
pub struct HtmlTemplates {
    sources: HashMap<String, String>,
    cache: RefCell<HashMap<String, (Document, NodeId)>>,
}

impl HtmlTemplates {
    pub fn new() -> HtmlTemplates {
        HtmlTemplates::default()
    }

    pub fn insert(&mut self, url: &str, html: &str) {
        self.sources.insert(url.to_string(), html.to_string());
    }

    /// Number of sources parsed so far.
    pub fn cached(&self) -> usize {
        self.cache.borrow().len()
    }

    fn fragment(&self, doc: &Document, url: &str) -> anyhow::Result<NodeId> {
        if let Some((cached_doc, fragment)) = self.cache.borrow().get(url) {
            if cached_doc.ptr_eq(doc) && doc.contains(*fragment) {
                return Ok(*fragment);
            }
        }
        let html = self.sources.get(url).ok_or_else(|| anyhow!("unknown template source `{url}`"))?;
        let fragment = doc.parse_html(html).with_context(|| format!("parsing `{url}`"))?;
        debug!(url, "template source parsed");
        self.cache.borrow_mut().insert(url.to_string(), (doc.clone(), fragment));
        Ok(fragment)
    }
}

impl TemplateSource for HtmlTemplates {
    fn resolve(&self, doc: &Document, url: &str, id: Option<&str>) -> anyhow::Result<NodeId> {
        let fragment = self.fragment(doc, url)?;
        match id {
            None => Ok(fragment),
            Some(id) => doc
                .find_by_id(fragment, id)
                .ok_or_else(|| anyhow!("`{url}` has no template with id `{id}`")),
        }
    }
}

/// Copies the content of the referenced template into `node`. Failures are logged and leave the
/// node untouched.
pub(crate) fn include(cx: &MountCx, node: NodeId, reference: &str) {
    let (url, id) = match reference.split_once('#') {
        Some((url, id)) => (url, Some(id)),
        None => (reference, None),
    };
    let doc = cx.doc();
    let template = match cx.config().templates.resolve(doc, url, id) {
        Ok(template) => template,
        Err(err) => {
            error!(reference, "include failed: {err:#}");
            return;
        }
    };
    for child in doc.children(template) {
        if let Some(copy) = doc.clone_node(child, true) {
            doc.append_child(node, copy);
        }
    }
}
