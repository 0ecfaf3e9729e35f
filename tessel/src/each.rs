//! Repeated and conditional content.
//!
//! `Each` keeps one mounted clone of a template element per item of an array (or per entry of
//! an object), reusing clones by item identity. `Toggle` keeps at most one clone, present while
//! a condition holds. Both replace the template element with a marker comment and insert their
//! clones right after it.
use crate::{
    dom::{Document, NodeId, NodeKind},
    error::{MountError, RenderError},
    frame::{self, Render, RendererId},
    mount::{Handle, MountCx},
    observe::{self, wrap, Path, Subscription},
    render::Mountable,
};
use indexmap::IndexMap;
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};
use tessel_common::{Data, Object, Value};
use tracing::{debug, trace};

/// Takes a template element out of the document, leaving a marker comment in its place.
///
/// `directives` is written on the template so that clones run them.
fn detach_master(doc: &Document, node: NodeId, attribute_fn: &str, directives: &str, marker: &str) -> Result<NodeId, MountError> {
    if doc.kind(node) == Some(NodeKind::Fragment) {
        return Err(MountError::FragmentRoot);
    }
    let parent = doc.parent(node).ok_or(MountError::Detached)?;
    let comment = doc.create_comment(marker);
    doc.insert_before(parent, comment, Some(node));
    doc.remove(node);
    if directives.trim().is_empty() {
        doc.remove_attribute(node, attribute_fn);
    } else {
        doc.set_attribute(node, attribute_fn, directives.trim());
    }
    Ok(comment)
}

/// A mounted clone of the template.
struct Entry {
    item: Value,
    node: NodeId,
    handle: Handle,
}

fn dispose(doc: &Document, entry: Entry) {
    entry.handle.stop();
    doc.discard(entry.node);
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// List reconciler.
pub struct Each {
    id: RendererId,
    this: Weak<Each>,
    cx: Rc<MountCx>,
    master: NodeId,
    marker: NodeId,
    source: RefCell<Option<Value>>,
    subscription: RefCell<Subscription>,
    entries: RefCell<Vec<Entry>>,
    /// `{key, value}` records of an object source, by key.
    records: RefCell<IndexMap<String, Object>>,
    stopped: Cell<bool>,
}

impl Each {
    /// Takes over `node`: it becomes the template cloned for every item.
    ///
    /// `directives` are run on each clone.
    pub fn new(cx: &Rc<MountCx>, node: NodeId, directives: &str) -> Result<Rc<Each>, MountError> {
        let marker = detach_master(cx.doc(), node, &cx.config().options.attribute_fn, directives, "each")?;
        Ok(Rc::new_cyclic(|this| Each {
            id: RendererId::next(),
            this: this.clone(),
            cx: cx.clone(),
            master: node,
            marker,
            source: RefCell::new(None),
            subscription: RefCell::new(Subscription::none()),
            entries: RefCell::new(Vec::new()),
            records: RefCell::new(IndexMap::new()),
            stopped: Cell::new(false),
        }))
    }

    pub fn marker(&self) -> NodeId {
        self.marker
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    /// The root nodes of the clones, in order.
    pub fn nodes(&self) -> Vec<NodeId> {
        self.entries.borrow().iter().map(|e| e.node).collect()
    }

    fn cue(&self) {
        let weak: Weak<dyn Render> = self.this.clone();
        frame::cue(self.id, weak);
    }

    /// The items of the current source.
    fn items(&self) -> Vec<Value> {
        let source = self.source.borrow().clone().unwrap_or_default();
        match source {
            Value::Array(a) => a.to_vec(),
            Value::Object(o) => {
                let mut records = self.records.borrow_mut();
                let entries = o.entries();
                records.retain(|k, _| o.contains_key(k));
                entries
                    .into_iter()
                    .map(|(key, value)| {
                        let record = records.entry(key.clone()).or_insert_with(|| {
                            Object::from_entries([("key", Value::from(key.as_str())), ("value", value.clone())])
                        });
                        if !record.get("value").same(&value) {
                            if let Some(observed) = wrap(&Value::Object(record.clone())) {
                                observed.set("value", value);
                            }
                        }
                        Value::Object(record.clone())
                    })
                    .collect()
            }
            v if v.is_nullish() => Vec::new(),
            v => {
                debug!(kind = v.type_name(), "each: not a list, rendering nothing");
                Vec::new()
            }
        }
    }

    fn create(&self, item: &Value) -> Result<Entry, MountError> {
        let doc = self.cx.doc();
        let node = doc.clone_node(self.master, true).ok_or(MountError::Detached)?;
        let handle = match self.cx.mount(node) {
            Ok(handle) => handle,
            Err(err) => {
                doc.discard(node);
                return Err(err);
            }
        };
        let entry = Entry {
            item: item.clone(),
            node,
            handle,
        };
        if let Err(err) = entry.handle.push(item) {
            dispose(doc, entry);
            return Err(err);
        }
        Ok(entry)
    }

    fn reconcile(&self) -> Result<(), MountError> {
        let items = self.items();
        let mut entries = self.entries.take();
        let mut result = Ok(());
        for (i, item) in items.iter().enumerate() {
            if entries.get(i).map_or(false, |e| e.item.same(item)) {
                continue;
            }
            // the leftmost entry for this item that has not been claimed yet
            if let Some(j) = (i + 1..entries.len()).find(|&j| entries[j].item.same(item)) {
                let entry = entries.remove(j);
                entries.insert(i, entry);
                continue;
            }
            match self.create(item) {
                Ok(entry) => entries.insert(i, entry),
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }
        let surplus = if result.is_ok() {
            entries.split_off(items.len().min(entries.len()))
        } else {
            Vec::new()
        };
        let doc = self.cx.doc();
        for entry in surplus {
            dispose(doc, entry);
        }
        self.entries.replace(entries);
        self.place();
        result
    }

    /// Moves the clones into position after the marker.
    fn place(&self) {
        let doc = self.cx.doc();
        let Some(parent) = doc.parent(self.marker) else { return };
        // removing a selected option resets the value of its select
        let select = doc.is_element(self.master, "option").then(|| self.select()).flatten();
        let selected = select.and_then(|s| doc.property(s, "value"));

        let mut cursor = self.marker;
        for entry in self.entries.borrow().iter() {
            let next = doc.next_sibling(cursor);
            if next != Some(entry.node) {
                doc.insert_before(parent, entry.node, next);
            }
            cursor = entry.node;
        }

        if let (Some(select), Some(value)) = (select, selected) {
            if doc.property(select, "value").map_or(true, |v| !v.same(&value)) {
                doc.set_property(select, "value", value);
            }
        }
    }

    fn select(&self) -> Option<NodeId> {
        let doc = self.cx.doc();
        let mut node = doc.parent(self.marker);
        while let Some(n) = node {
            if doc.is_element(n, "select") {
                return Some(n);
            }
            node = doc.parent(n);
        }
        None
    }
}

impl Render for Each {
    fn id(&self) -> RendererId {
        self.id
    }

    fn fire(&self) -> Result<usize, RenderError> {
        if self.stopped.get() {
            return Ok(0);
        }
        let doc = self.cx.doc();
        let before = doc.mutation_count();
        self.reconcile()?;
        Ok(doc.mutation_count().saturating_sub(before))
    }
}

impl Mountable for Each {
    fn push(&self, scope: &Value) -> Result<(), MountError> {
        if self.stopped.get() {
            return Ok(());
        }
        if self.source.borrow().as_ref().map_or(false, |s| s.same(scope)) {
            trace!("each: same list pushed again");
            return Ok(());
        }
        self.source.replace(Some(scope.clone()));
        self.records.borrow_mut().clear();
        drop(self.subscription.take());
        let this = self.this.clone();
        let subscription = observe::watch(scope, move |_, _| {
            if let Some(this) = this.upgrade() {
                this.cue()
            }
        });
        *self.subscription.borrow_mut() = subscription;
        self.reconcile()
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        drop(self.subscription.take());
        frame::uncue(self.id);
        for entry in self.entries.borrow().iter() {
            entry.handle.stop();
        }
        // the template is not in the tree: nothing else frees it
        self.cx.doc().discard(self.master);
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Conditional content: a clone of the template is present while the value at `path` is truthy.
///
/// The clone receives the same scope as the toggle.
pub struct Toggle {
    id: RendererId,
    this: Weak<Toggle>,
    cx: Rc<MountCx>,
    master: NodeId,
    marker: NodeId,
    path: Path,
    scope: RefCell<Value>,
    visible: Cell<bool>,
    pushing: Cell<bool>,
    subscription: RefCell<Subscription>,
    entry: RefCell<Option<Entry>>,
    stopped: Cell<bool>,
}

impl Toggle {
    pub fn new(cx: &Rc<MountCx>, node: NodeId, path: Path, directives: &str) -> Result<Rc<Toggle>, MountError> {
        let marker = detach_master(cx.doc(), node, &cx.config().options.attribute_fn, directives, "if")?;
        Ok(Rc::new_cyclic(|this| Toggle {
            id: RendererId::next(),
            this: this.clone(),
            cx: cx.clone(),
            master: node,
            marker,
            path,
            scope: RefCell::new(Value::Undefined),
            visible: Cell::new(false),
            pushing: Cell::new(false),
            subscription: RefCell::new(Subscription::none()),
            entry: RefCell::new(None),
            stopped: Cell::new(false),
        }))
    }

    /// The root of the clone, if shown.
    pub fn node(&self) -> Option<NodeId> {
        self.entry.borrow().as_ref().map(|e| e.node)
    }

    fn apply(&self) -> Result<(), MountError> {
        let doc = self.cx.doc();
        let shown = self.entry.borrow().is_some();
        match (self.visible.get(), shown) {
            (true, false) => {
                let node = doc.clone_node(self.master, true).ok_or(MountError::Detached)?;
                let entry = Entry {
                    item: self.scope.borrow().clone(),
                    node,
                    handle: self.cx.mount(node)?,
                };
                entry.handle.push(&entry.item)?;
                if let Some(parent) = doc.parent(self.marker) {
                    doc.insert_before(parent, node, doc.next_sibling(self.marker));
                }
                self.entry.replace(Some(entry));
            }
            (false, true) => {
                if let Some(entry) = self.entry.take() {
                    dispose(doc, entry);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

impl Render for Toggle {
    fn id(&self) -> RendererId {
        self.id
    }

    fn fire(&self) -> Result<usize, RenderError> {
        if self.stopped.get() {
            return Ok(0);
        }
        let doc = self.cx.doc();
        let before = doc.mutation_count();
        self.apply()?;
        Ok(doc.mutation_count().saturating_sub(before))
    }
}

impl Mountable for Toggle {
    fn push(&self, scope: &Value) -> Result<(), MountError> {
        if self.stopped.get() {
            return Ok(());
        }
        self.scope.replace(scope.clone());
        drop(self.subscription.take());
        self.pushing.set(true);
        let this = self.this.clone();
        let subscription = observe::subscribe_path(scope, &self.path, move |value, _| {
            let Some(this) = this.upgrade() else { return };
            this.visible.set(value.is_truthy());
            if !this.pushing.get() {
                this.cue();
            }
        });
        *self.subscription.borrow_mut() = subscription;
        self.pushing.set(false);
        // a shown clone follows the new scope
        let shown = self.entry.borrow().as_ref().map(|e| e.handle.push(scope));
        if let Some(result) = shown {
            result?;
        }
        self.apply()
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        drop(self.subscription.take());
        frame::uncue(self.id);
        if let Some(entry) = &*self.entry.borrow() {
            entry.handle.stop();
        }
        self.cx.doc().discard(self.master);
    }
}

impl Toggle {
    fn cue(&self) {
        let weak: Weak<dyn Render> = self.this.clone();
        frame::cue(self.id, weak);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::Config, observe::wrap};
    use rand::{seq::SliceRandom, Rng};
    use tessel_common::Array;

    fn list(doc: &Document, html: &str) -> (NodeId, Rc<Each>) {
        let root = doc.parse_html(html).unwrap();
        let cx = MountCx::new(doc, Config::default());
        let li = doc.query_all(root, "li")[0];
        (root, Each::new(&cx, li, "").unwrap())
    }

    fn item(name: &str) -> Value {
        Value::from(Object::from_entries([("name", name)]))
    }

    #[test]
    fn identity_is_preserved() {
        let doc = Document::new();
        let (root, each) = list(&doc, "<ul><li>{[name]}</li></ul>");
        let (a, b, c) = (item("a"), item("b"), item("c"));
        each.push(&Value::from(vec![a.clone(), b.clone(), c.clone()])).unwrap();
        frame::run_frame().unwrap();
        let nodes = each.nodes();
        let ul = doc.first_child(root).unwrap();
        assert_eq!(doc.text_content(ul), "abc");

        each.push(&Value::from(vec![c.clone(), a.clone(), b.clone()])).unwrap();
        assert_eq!(each.nodes(), vec![nodes[2], nodes[0], nodes[1]]);
        assert_eq!(doc.text_content(ul), "cab");

        each.push(&Value::from(vec![a.clone(), c.clone()])).unwrap();
        assert_eq!(each.nodes(), vec![nodes[0], nodes[2]]);
        assert!(!doc.contains(nodes[1]));
        assert_eq!(doc.text_content(ul), "ac");
    }

    #[test]
    fn array_mutations_are_followed() {
        let doc = Document::new();
        let (root, each) = list(&doc, "<ul><li>{[name]}</li></ul>");
        let items = Value::from(Array::new());
        each.push(&items).unwrap();
        assert!(each.is_empty());
        let observed = wrap(&items).unwrap();
        observed.push(item("x"));
        observed.push(item("y"));
        frame::run_frame().unwrap();
        assert_eq!(doc.text_content(root), "xy");
        observed.splice(0, 2, Vec::new());
        frame::run_frame().unwrap();
        assert!(each.is_empty());
        assert_eq!(doc.inner_html(root), "<ul><!--each--></ul>");
    }

    #[test]
    fn duplicates_get_fresh_instances() {
        let doc = Document::new();
        let (_, each) = list(&doc, "<ul><li>{[name]}</li></ul>");
        let a = item("a");
        each.push(&Value::from(vec![a.clone()])).unwrap();
        let first = each.nodes()[0];
        each.push(&Value::from(vec![a.clone(), a.clone()])).unwrap();
        let nodes = each.nodes();
        assert_eq!(nodes[0], first);
        assert_ne!(nodes[1], first);
    }

    #[test]
    fn objects_become_records() {
        let doc = Document::new();
        let (root, each) = list(&doc, "<ul><li>{[key]}={[value]}</li></ul>");
        let map = Value::from(Object::from_entries([("x", 1), ("y", 2)]));
        each.push(&map).unwrap();
        frame::run_frame().unwrap();
        let nodes = each.nodes();
        assert_eq!(doc.text_content(root), "x=1y=2");
        wrap(&map).unwrap().set("x", 5);
        frame::run_frame().unwrap();
        assert_eq!(each.nodes(), nodes);
        assert_eq!(doc.text_content(root), "x=5y=2");
    }

    #[test]
    fn options_keep_the_select_value() {
        let doc = Document::new();
        let root = doc.parse_html("<select><option>{[name]}</option></select>").unwrap();
        let cx = MountCx::new(&doc, Config::default());
        let option = doc.query_all(root, "option")[0];
        let select = doc.first_child(root).unwrap();
        let each = Each::new(&cx, option, "").unwrap();
        let (a, b) = (item("a"), item("b"));
        each.push(&Value::from(vec![a.clone(), b.clone()])).unwrap();
        frame::run_frame().unwrap();
        doc.set_property(select, "value", Value::from("b"));
        each.push(&Value::from(vec![b.clone(), a.clone()])).unwrap();
        assert_eq!(doc.property(select, "value"), Some(Value::from("b")));
    }

    #[test]
    fn setup_errors() {
        let doc = Document::new();
        let cx = MountCx::new(&doc, Config::default());
        let fragment = doc.create_fragment();
        assert!(matches!(Each::new(&cx, fragment, ""), Err(MountError::FragmentRoot)));
        let orphan = doc.create_element("li");
        assert!(matches!(Each::new(&cx, orphan, ""), Err(MountError::Detached)));
    }

    #[test]
    fn randomized_reconciliation() {
        let doc = Document::new();
        let (root, each) = list(&doc, "<ul><li>{[name]}</li></ul>");
        let pool: Vec<Value> = (0..12).map(|i| item(&i.to_string())).collect();
        let mut rng = rand::thread_rng();
        let mut previous: Vec<(Value, NodeId)> = Vec::new();
        for _ in 0..50 {
            let n = rng.gen_range(0..pool.len());
            let mut items: Vec<Value> = pool.choose_multiple(&mut rng, n).cloned().collect();
            items.shuffle(&mut rng);
            each.push(&Value::from(items.clone())).unwrap();
            frame::run_frame().unwrap();

            let nodes = each.nodes();
            assert_eq!(nodes.len(), items.len());
            // every surviving item kept its node
            for (item, node) in &previous {
                if let Some(i) = items.iter().position(|x| x.same(item)) {
                    assert_eq!(nodes[i], *node);
                }
            }
            let expected: String = items
                .iter()
                .map(|v| v.as_object().unwrap().get("name").to_display_string())
                .collect();
            assert_eq!(doc.text_content(root), expected);
            previous = items.into_iter().zip(nodes).collect();
        }
    }

    #[test]
    fn disposed_items_free_their_nodes() {
        let doc = Document::new();
        let root = doc.parse_html(r#"<ul><li fn="each"><b fn="if:'x'">{[name]}</b></li></ul>"#).unwrap();
        let handle = crate::mount::mount(&doc, root, &Config::default()).unwrap();
        let fresh = || {
            let flagged = |name: &str| Value::from(Object::from_entries([("name", Value::from(name)), ("x", Value::from(true))]));
            Value::from(vec![flagged("a"), flagged("b"), item("c")])
        };
        handle.push(&fresh()).unwrap();
        handle.push(&Value::from(Array::new())).unwrap();
        let baseline = doc.node_count();
        for _ in 0..20 {
            handle.push(&fresh()).unwrap();
            frame::run_frame().unwrap();
            assert_eq!(doc.text_content(root), "ab");
            handle.push(&Value::from(Array::new())).unwrap();
        }
        frame::run_frame().unwrap();
        assert_eq!(doc.node_count(), baseline);

        handle.stop();
        // the template (`li`, `b` and its text) goes with the list
        assert_eq!(doc.node_count(), baseline - 3);
    }

    #[test]
    fn toggle_shows_and_hides() {
        let doc = Document::new();
        let root = doc.parse_html("<div><p>{[msg]}</p></div>").unwrap();
        let cx = MountCx::new(&doc, Config::default());
        let p = doc.query_all(root, "p")[0];
        let toggle = Toggle::new(&cx, p, Path::parse("show").unwrap(), "").unwrap();
        let scope = Value::from(Object::from_entries([("show", Value::from(false)), ("msg", Value::from("hi"))]));
        toggle.push(&scope).unwrap();
        assert!(toggle.node().is_none());
        wrap(&scope).unwrap().set("show", true);
        frame::run_frame().unwrap();
        assert_eq!(doc.inner_html(root), "<div><!--if--><p>hi</p></div>");
        wrap(&scope).unwrap().set("show", 0);
        frame::run_frame().unwrap();
        assert_eq!(doc.inner_html(root), "<div><!--if--></div>");
    }
}
