//! In-memory document tree.
//!
//! Nodes live in an arena and are linked to their parent and siblings. The document handle is
//! cheap to clone; all clones refer to the same tree.
use bitflags::bitflags;
use indexmap::IndexMap;
use slotmap::SlotMap;
use smallvec::SmallVec;
use std::{cell::RefCell, fmt, rc::Rc};
use tessel_common::Value;

mod html;

////////////////////////////////////////////////////////////////////////////////////////////////////

slotmap::new_key_type! {
    /// Identifies a node in a `Document`.
    pub struct NodeId;
    /// Identifies an event listener registered on a node.
    pub struct ListenerId;
}

bitflags! {
    /// Kinds of DOM writes.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct Mutation: u32 {
        const TEXT = (1 << 0);
        const ATTRIBUTE = (1 << 1);
        const PROPERTY = (1 << 2);
        const CLASS = (1 << 3);
        const INSERT = (1 << 4);
        const REMOVE = (1 << 5);
        const STRUCTURE = Self::INSERT.bits() | Self::REMOVE.bits();
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Text,
    Comment,
    Fragment,
}

/// An event delivered to listeners.
#[derive(Clone, Debug)]
pub struct Event {
    pub kind: String,
    pub target: NodeId,
}

type Callback = Rc<dyn Fn(&Document, &Event)>;

struct ElementData {
    tag: String,
    attributes: Vec<(String, String)>,
    /// Element state that is not reflected in attributes (`value`, `checked`, `selected`), and
    /// expando properties.
    properties: IndexMap<String, Value>,
}

enum Content {
    Element(ElementData),
    Text(String),
    Comment(String),
    Fragment,
}

struct Node {
    content: Content,
    parent: Option<NodeId>,
    prev_sibling: Option<NodeId>,
    next_sibling: Option<NodeId>,
    first_child: Option<NodeId>,
    last_child: Option<NodeId>,
    listeners: SmallVec<[ListenerId; 2]>,
}

impl Node {
    fn new(content: Content) -> Node {
        Node {
            content,
            parent: None,
            prev_sibling: None,
            next_sibling: None,
            first_child: None,
            last_child: None,
            listeners: SmallVec::new(),
        }
    }

    fn element(&self) -> Option<&ElementData> {
        match self.content {
            Content::Element(ref e) => Some(e),
            _ => None,
        }
    }

    fn element_mut(&mut self) -> Option<&mut ElementData> {
        match self.content {
            Content::Element(ref mut e) => Some(e),
            _ => None,
        }
    }
}

struct Listener {
    node: NodeId,
    event: String,
    callback: Callback,
}

/// How an element property maps onto the element state.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum PropertyKind {
    /// Boolean property reflected as the presence of the attribute of the same name.
    Reflected,
    /// `value` of text controls, defaults to the `value` attribute.
    Value,
    /// `checked` of inputs, defaults to the presence of the `checked` attribute.
    Checked,
    /// `selected` of options, defaults to the presence of the `selected` attribute.
    Selected,
    /// `value` of options: the `value` attribute, or the text content.
    OptionValue,
    /// `value` of selects: the value of the first selected option.
    SelectValue,
}

fn property_kind(tag: &str, name: &str) -> Option<PropertyKind> {
    const FORM: &[&str] = &["input", "textarea", "select", "option", "optgroup", "button", "fieldset"];
    match (tag, name) {
        (_, "hidden") => Some(PropertyKind::Reflected),
        (t, "disabled") if FORM.contains(&t) => Some(PropertyKind::Reflected),
        ("input" | "textarea" | "select", "required") => Some(PropertyKind::Reflected),
        ("input" | "textarea", "readonly") => Some(PropertyKind::Reflected),
        ("input" | "select", "multiple") => Some(PropertyKind::Reflected),
        ("input" | "textarea", "value") => Some(PropertyKind::Value),
        ("input", "checked") => Some(PropertyKind::Checked),
        ("option", "selected") => Some(PropertyKind::Selected),
        ("option", "value") => Some(PropertyKind::OptionValue),
        ("select", "value") => Some(PropertyKind::SelectValue),
        _ => None,
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

struct Tree {
    nodes: SlotMap<NodeId, Node>,
    listeners: SlotMap<ListenerId, Listener>,
    mutations: Vec<(NodeId, Mutation)>,
}

impl Tree {
    fn record(&mut self, node: NodeId, kind: Mutation) {
        self.mutations.push((node, kind));
    }

    fn attribute(&self, id: NodeId, name: &str) -> Option<&str> {
        let e = self.nodes.get(id)?.element()?;
        e.attributes.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    fn set_attribute(&mut self, id: NodeId, name: &str, value: &str) -> bool {
        let Some(e) = self.nodes.get_mut(id).and_then(Node::element_mut) else {
            return false;
        };
        match e.attributes.iter_mut().find(|(n, _)| n == name) {
            Some((_, v)) if v == value => return false,
            Some((_, v)) => *v = value.to_string(),
            None => e.attributes.push((name.to_string(), value.to_string())),
        }
        true
    }

    fn remove_attribute(&mut self, id: NodeId, name: &str) -> bool {
        let Some(e) = self.nodes.get_mut(id).and_then(Node::element_mut) else {
            return false;
        };
        let len = e.attributes.len();
        e.attributes.retain(|(n, _)| n != name);
        e.attributes.len() != len
    }

    fn children(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut next = self.nodes.get(id).and_then(|n| n.first_child);
        while let Some(c) = next {
            out.push(c);
            next = self.nodes[c].next_sibling;
        }
        out
    }

    /// Pre-order list of the descendants of `id` (excluding `id`).
    fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(id).into_iter().rev().collect();
        while let Some(n) = stack.pop() {
            out.push(n);
            stack.extend(self.children(n).into_iter().rev());
        }
        out
    }

    fn text_content(&self, id: NodeId) -> String {
        match self.nodes.get(id).map(|n| &n.content) {
            Some(Content::Text(t)) => t.clone(),
            Some(Content::Comment(_)) | None => String::new(),
            Some(_) => {
                let mut out = String::new();
                for d in self.descendants(id) {
                    if let Content::Text(ref t) = self.nodes[d].content {
                        out.push_str(t);
                    }
                }
                out
            }
        }
    }

    fn tag(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id)?.element().map(|e| e.tag.as_str())
    }

    fn option_value(&self, id: NodeId) -> String {
        match self.attribute(id, "value") {
            Some(v) => v.to_string(),
            None => self.text_content(id).trim().to_string(),
        }
    }

    fn option_selected(&self, id: NodeId) -> bool {
        match self.nodes.get(id).and_then(Node::element).and_then(|e| e.properties.get("selected")) {
            Some(v) => v.is_truthy(),
            None => self.attribute(id, "selected").is_some(),
        }
    }

    fn options(&self, select: NodeId) -> Vec<NodeId> {
        self.descendants(select)
            .into_iter()
            .filter(|&d| self.tag(d) == Some("option"))
            .collect()
    }

    /// Detaches a node from its parent.
    fn unlink(&mut self, child: NodeId) -> bool {
        let Some(node) = self.nodes.get(child) else { return false };
        let Some(parent) = node.parent else { return false };
        let (prev, next) = (node.prev_sibling, node.next_sibling);
        match prev {
            None => self.nodes[parent].first_child = next,
            Some(prev) => self.nodes[prev].next_sibling = next,
        }
        match next {
            None => self.nodes[parent].last_child = prev,
            Some(next) => self.nodes[next].prev_sibling = prev,
        }
        let node = &mut self.nodes[child];
        node.parent = None;
        node.prev_sibling = None;
        node.next_sibling = None;

        // a detached option loses its selectedness
        let mut options = self.descendants(child);
        options.push(child);
        for o in options {
            if self.tag(o) == Some("option") {
                if let Some(e) = self.nodes[o].element_mut() {
                    e.properties.insert("selected".to_string(), Value::Bool(false));
                }
            }
        }
        true
    }

    /// Inserts a detached node into `parent`, before `reference` (or at the end).
    fn link(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let prev = match reference {
            Some(before) => self.nodes[before].prev_sibling,
            None => self.nodes[parent].last_child,
        };
        {
            let node = &mut self.nodes[child];
            node.parent = Some(parent);
            node.prev_sibling = prev;
            node.next_sibling = reference;
        }
        match reference {
            Some(before) => self.nodes[before].prev_sibling = Some(child),
            None => self.nodes[parent].last_child = Some(child),
        }
        match prev {
            Some(prev) => self.nodes[prev].next_sibling = Some(child),
            None => self.nodes[parent].first_child = Some(child),
        }
    }

    fn is_ancestor_or_self(&self, ancestor: NodeId, mut node: NodeId) -> bool {
        loop {
            if node == ancestor {
                return true;
            }
            match self.nodes.get(node).and_then(|n| n.parent) {
                Some(p) => node = p,
                None => return false,
            }
        }
    }

    fn clone_node(&mut self, id: NodeId, deep: bool) -> Option<NodeId> {
        let content = match self.nodes.get(id)?.content {
            Content::Element(ref e) => Content::Element(ElementData {
                tag: e.tag.clone(),
                attributes: e.attributes.clone(),
                properties: e.properties.clone(),
            }),
            Content::Text(ref t) => Content::Text(t.clone()),
            Content::Comment(ref t) => Content::Comment(t.clone()),
            Content::Fragment => Content::Fragment,
        };
        let copy = self.nodes.insert(Node::new(content));
        if deep {
            for c in self.children(id) {
                if let Some(cc) = self.clone_node(c, true) {
                    self.link(copy, cc, None);
                }
            }
        }
        Some(copy)
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// A document: a forest of nodes sharing one arena.
#[derive(Clone)]
pub struct Document(Rc<RefCell<Tree>>);

impl Default for Document {
    fn default() -> Self {
        Document::new()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let tree = self.0.borrow();
        f.debug_struct("Document").field("nodes", &tree.nodes.len()).finish_non_exhaustive()
    }
}

impl Document {
    pub fn new() -> Document {
        Document(Rc::new(RefCell::new(Tree {
            nodes: SlotMap::with_key(),
            listeners: SlotMap::with_key(),
            mutations: Vec::new(),
        })))
    }

    /// Returns whether both handles refer to the same document.
    pub fn ptr_eq(&self, other: &Document) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn create(&self, content: Content) -> NodeId {
        self.0.borrow_mut().nodes.insert(Node::new(content))
    }

    /// Creates a detached element. Tag names are case-insensitive.
    pub fn create_element(&self, tag: &str) -> NodeId {
        self.create(Content::Element(ElementData {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
            properties: IndexMap::new(),
        }))
    }

    pub fn create_text(&self, text: &str) -> NodeId {
        self.create(Content::Text(text.to_string()))
    }

    pub fn create_comment(&self, text: &str) -> NodeId {
        self.create(Content::Comment(text.to_string()))
    }

    pub fn create_fragment(&self) -> NodeId {
        self.create(Content::Fragment)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.0.borrow().nodes.contains_key(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        Some(match self.0.borrow().nodes.get(id)?.content {
            Content::Element(_) => NodeKind::Element,
            Content::Text(_) => NodeKind::Text,
            Content::Comment(_) => NodeKind::Comment,
            Content::Fragment => NodeKind::Fragment,
        })
    }

    /// Returns the lowercase tag name of an element.
    pub fn tag(&self, id: NodeId) -> Option<String> {
        self.0.borrow().tag(id).map(str::to_string)
    }

    pub fn is_element(&self, id: NodeId, tag: &str) -> bool {
        self.0.borrow().tag(id) == Some(tag)
    }

    //----------------------------------------------------------------------------------------------
    // Tree

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.0.borrow().nodes.get(id)?.parent
    }

    pub fn first_child(&self, id: NodeId) -> Option<NodeId> {
        self.0.borrow().nodes.get(id)?.first_child
    }

    pub fn last_child(&self, id: NodeId) -> Option<NodeId> {
        self.0.borrow().nodes.get(id)?.last_child
    }

    pub fn next_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.0.borrow().nodes.get(id)?.next_sibling
    }

    pub fn prev_sibling(&self, id: NodeId) -> Option<NodeId> {
        self.0.borrow().nodes.get(id)?.prev_sibling
    }

    /// Returns a snapshot of the children of a node.
    pub fn children(&self, id: NodeId) -> Vec<NodeId> {
        self.0.borrow().children(id)
    }

    /// Pre-order list of all descendants of a node.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        self.0.borrow().descendants(id)
    }

    pub fn append_child(&self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None)
    }

    /// Inserts `child` into `parent` before `reference`, or at the end if `reference` is `None`.
    ///
    /// An attached `child` is moved. Inserting a fragment moves its children and leaves the
    /// fragment empty.
    pub fn insert_before(&self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        let mut tree = self.0.borrow_mut();
        if !tree.nodes.contains_key(parent) || !tree.nodes.contains_key(child) {
            return;
        }
        if let Some(r) = reference {
            assert_eq!(
                tree.nodes.get(r).and_then(|n| n.parent),
                Some(parent),
                "reference should be a child of parent"
            );
            if r == child {
                return;
            }
        }
        assert!(
            !tree.is_ancestor_or_self(child, parent),
            "cannot insert a node into itself or one of its descendants"
        );
        let moved = match tree.nodes[child].content {
            Content::Fragment => tree.children(child),
            _ => vec![child],
        };
        for c in moved {
            tree.unlink(c);
            tree.link(parent, c, reference);
            tree.record(c, Mutation::INSERT);
        }
    }

    /// Detaches a node from its parent. The node stays valid and can be inserted again.
    pub fn remove(&self, id: NodeId) {
        let mut tree = self.0.borrow_mut();
        if tree.unlink(id) {
            tree.record(id, Mutation::REMOVE);
        }
    }

    /// Detaches a node and frees it and its descendants, along with their listeners.
    pub fn discard(&self, id: NodeId) {
        let mut tree = self.0.borrow_mut();
        if tree.unlink(id) {
            tree.record(id, Mutation::REMOVE);
        }
        let mut nodes = tree.descendants(id);
        nodes.push(id);
        for n in nodes {
            if let Some(node) = tree.nodes.remove(n) {
                for l in node.listeners {
                    tree.listeners.remove(l);
                }
            }
        }
    }

    /// Copies a node, and its descendants if `deep`. Listeners are not copied.
    pub fn clone_node(&self, id: NodeId, deep: bool) -> Option<NodeId> {
        self.0.borrow_mut().clone_node(id, deep)
    }

    /// Elements with the given tag among the descendants of `root`, in document order.
    pub fn query_all(&self, root: NodeId, tag: &str) -> Vec<NodeId> {
        let tree = self.0.borrow();
        tree.descendants(root)
            .into_iter()
            .filter(|&d| tree.tag(d) == Some(tag))
            .collect()
    }

    /// Finds the element with the given `id` attribute among `root` and its descendants.
    pub fn find_by_id(&self, root: NodeId, id: &str) -> Option<NodeId> {
        let tree = self.0.borrow();
        std::iter::once(root)
            .chain(tree.descendants(root))
            .find(|&d| tree.attribute(d, "id") == Some(id))
    }

    /// Finds an element with the given `id` attribute anywhere in the arena, attached or not.
    pub fn element_by_id(&self, id: &str) -> Option<NodeId> {
        let tree = self.0.borrow();
        tree.nodes.keys().find(|&n| tree.attribute(n, "id") == Some(id))
    }

    //----------------------------------------------------------------------------------------------
    // Character data

    /// Data of a text or comment node.
    pub fn text(&self, id: NodeId) -> Option<String> {
        match self.0.borrow().nodes.get(id)?.content {
            Content::Text(ref t) | Content::Comment(ref t) => Some(t.clone()),
            _ => None,
        }
    }

    pub fn set_text(&self, id: NodeId, text: &str) {
        let mut tree = self.0.borrow_mut();
        let Some(node) = tree.nodes.get_mut(id) else { return };
        match node.content {
            Content::Text(ref mut t) | Content::Comment(ref mut t) => {
                *t = text.to_string();
            }
            _ => return,
        }
        tree.record(id, Mutation::TEXT);
    }

    /// Concatenated text of the node and its descendants.
    pub fn text_content(&self, id: NodeId) -> String {
        self.0.borrow().text_content(id)
    }

    //----------------------------------------------------------------------------------------------
    // Attributes

    pub fn attribute(&self, id: NodeId, name: &str) -> Option<String> {
        self.0.borrow().attribute(id, name).map(str::to_string)
    }

    pub fn has_attribute(&self, id: NodeId, name: &str) -> bool {
        self.0.borrow().attribute(id, name).is_some()
    }

    /// Attributes of an element, in document order.
    pub fn attributes(&self, id: NodeId) -> Vec<(String, String)> {
        let tree = self.0.borrow();
        tree.nodes
            .get(id)
            .and_then(Node::element)
            .map(|e| e.attributes.clone())
            .unwrap_or_default()
    }

    pub fn set_attribute(&self, id: NodeId, name: &str, value: &str) {
        let mut tree = self.0.borrow_mut();
        if tree.set_attribute(id, name, value) {
            tree.record(id, Mutation::ATTRIBUTE);
        }
    }

    /// Removes an attribute. Returns whether it was present.
    pub fn remove_attribute(&self, id: NodeId, name: &str) -> bool {
        let mut tree = self.0.borrow_mut();
        let removed = tree.remove_attribute(id, name);
        if removed {
            tree.record(id, Mutation::ATTRIBUTE);
        }
        removed
    }

    pub fn class_list(&self, id: NodeId) -> Vec<String> {
        self.attribute(id, "class")
            .map(|c| c.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.class_list(id).iter().any(|c| c == class)
    }

    /// Adds a class. Returns `false` if the element already had it.
    pub fn add_class(&self, id: NodeId, class: &str) -> bool {
        let mut classes = self.class_list(id);
        if classes.iter().any(|c| c == class) {
            return false;
        }
        classes.push(class.to_string());
        let mut tree = self.0.borrow_mut();
        tree.set_attribute(id, "class", &classes.join(" "));
        tree.record(id, Mutation::CLASS);
        true
    }

    /// Removes a class. Returns `false` if the element didn't have it.
    pub fn remove_class(&self, id: NodeId, class: &str) -> bool {
        let mut classes = self.class_list(id);
        let len = classes.len();
        classes.retain(|c| c != class);
        if classes.len() == len {
            return false;
        }
        let mut tree = self.0.borrow_mut();
        tree.set_attribute(id, "class", &classes.join(" "));
        tree.record(id, Mutation::CLASS);
        true
    }

    //----------------------------------------------------------------------------------------------
    // Properties

    /// Returns whether the element has a built-in property with this name.
    pub fn has_property(&self, id: NodeId, name: &str) -> bool {
        let tree = self.0.borrow();
        tree.tag(id).and_then(|t| property_kind(t, name)).is_some()
    }

    /// Reads an element property. Unknown properties read expando values.
    pub fn property(&self, id: NodeId, name: &str) -> Option<Value> {
        let tree = self.0.borrow();
        let e = tree.nodes.get(id)?.element()?;
        let Some(kind) = property_kind(&e.tag, name) else {
            return e.properties.get(name).cloned();
        };
        let v = match kind {
            PropertyKind::Reflected => Value::Bool(tree.attribute(id, name).is_some()),
            PropertyKind::Value => match e.properties.get("value") {
                Some(v) => v.clone(),
                None if e.tag == "textarea" => Value::from(tree.text_content(id)),
                None => Value::from(tree.attribute(id, "value").unwrap_or_default()),
            },
            PropertyKind::Checked => match e.properties.get("checked") {
                Some(v) => v.clone(),
                None => Value::Bool(tree.attribute(id, "checked").is_some()),
            },
            PropertyKind::Selected => Value::Bool(tree.option_selected(id)),
            PropertyKind::OptionValue => Value::from(tree.option_value(id)),
            PropertyKind::SelectValue => {
                let selected = tree.options(id).into_iter().find(|&o| tree.option_selected(o));
                Value::from(selected.map(|o| tree.option_value(o)).unwrap_or_default())
            }
        };
        Some(v)
    }

    /// Writes an element property.
    ///
    /// Reflected boolean properties toggle the attribute. Setting the `value` of a `<select>`
    /// selects the first option with that value and deselects the others.
    pub fn set_property(&self, id: NodeId, name: &str, value: Value) {
        let mut tree = self.0.borrow_mut();
        let Some(tag) = tree.tag(id).map(str::to_string) else { return };
        match property_kind(&tag, name) {
            Some(PropertyKind::Reflected) => {
                let changed = if value.is_truthy() {
                    tree.set_attribute(id, name, "")
                } else {
                    tree.remove_attribute(id, name)
                };
                if !changed {
                    return;
                }
            }
            Some(PropertyKind::Value) => {
                let v = Value::from(value.to_display_string());
                if let Some(e) = tree.nodes[id].element_mut() {
                    e.properties.insert("value".to_string(), v);
                }
            }
            Some(PropertyKind::Checked | PropertyKind::Selected) => {
                if let Some(e) = tree.nodes[id].element_mut() {
                    e.properties.insert(name.to_string(), Value::Bool(value.is_truthy()));
                }
            }
            Some(PropertyKind::OptionValue) => {
                tree.set_attribute(id, "value", &value.to_display_string());
            }
            Some(PropertyKind::SelectValue) => {
                let target = value.to_display_string();
                let mut found = false;
                for o in tree.options(id) {
                    let select = !found && tree.option_value(o) == target;
                    found |= select;
                    if let Some(e) = tree.nodes[o].element_mut() {
                        e.properties.insert("selected".to_string(), Value::Bool(select));
                    }
                }
            }
            None => {
                if let Some(e) = tree.nodes[id].element_mut() {
                    e.properties.insert(name.to_string(), value);
                }
            }
        }
        tree.record(id, Mutation::PROPERTY);
    }

    //----------------------------------------------------------------------------------------------
    // Events

    /// Registers a listener for events of kind `event` targeted at `id`.
    pub fn add_listener(&self, id: NodeId, event: &str, callback: impl Fn(&Document, &Event) + 'static) -> ListenerId {
        let mut tree = self.0.borrow_mut();
        let listener = tree.listeners.insert(Listener {
            node: id,
            event: event.to_string(),
            callback: Rc::new(callback),
        });
        if let Some(node) = tree.nodes.get_mut(id) {
            node.listeners.push(listener);
        }
        listener
    }

    pub fn remove_listener(&self, listener: ListenerId) {
        let mut tree = self.0.borrow_mut();
        if let Some(l) = tree.listeners.remove(listener) {
            if let Some(node) = tree.nodes.get_mut(l.node) {
                node.listeners.retain(|x| *x != listener);
            }
        }
    }

    /// Delivers an event to the listeners of `target`. Returns the number of listeners invoked.
    pub fn dispatch(&self, target: NodeId, event: &str) -> usize {
        let callbacks: Vec<(ListenerId, Callback)> = {
            let tree = self.0.borrow();
            let Some(node) = tree.nodes.get(target) else { return 0 };
            node.listeners
                .iter()
                .filter_map(|l| {
                    let listener = tree.listeners.get(*l)?;
                    (listener.event == event).then(|| (*l, listener.callback.clone()))
                })
                .collect()
        };
        let event = Event {
            kind: event.to_string(),
            target,
        };
        let mut count = 0;
        for (id, callback) in callbacks {
            // a previous listener may have removed this one
            if !self.0.borrow().listeners.contains_key(id) {
                continue;
            }
            callback(self, &event);
            count += 1;
        }
        count
    }

    pub fn listener_count(&self, id: NodeId) -> usize {
        self.0.borrow().nodes.get(id).map(|n| n.listeners.len()).unwrap_or(0)
    }

    //----------------------------------------------------------------------------------------------
    // Mutation log

    /// Number of live nodes, attached or not.
    pub fn node_count(&self) -> usize {
        self.0.borrow().nodes.len()
    }

    /// Number of mutations recorded since the last call to `take_mutations`.
    pub fn mutation_count(&self) -> usize {
        self.0.borrow().mutations.len()
    }

    pub fn take_mutations(&self) -> Vec<(NodeId, Mutation)> {
        std::mem::take(&mut self.0.borrow_mut().mutations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sibling_links() {
        let doc = Document::new();
        let ul = doc.create_element("UL");
        let a = doc.create_element("li");
        let b = doc.create_element("li");
        let c = doc.create_element("li");
        doc.append_child(ul, a);
        doc.append_child(ul, c);
        doc.insert_before(ul, b, Some(c));
        assert_eq!(doc.children(ul), vec![a, b, c]);
        assert_eq!(doc.tag(ul).as_deref(), Some("ul"));

        // moving a node
        doc.insert_before(ul, c, Some(a));
        assert_eq!(doc.children(ul), vec![c, a, b]);
        assert_eq!(doc.first_child(ul), Some(c));
        assert_eq!(doc.last_child(ul), Some(b));

        doc.remove(a);
        assert_eq!(doc.children(ul), vec![c, b]);
        assert_eq!(doc.parent(a), None);
        assert_eq!(doc.next_sibling(c), Some(b));
        assert_eq!(doc.prev_sibling(b), Some(c));
    }

    #[test]
    fn fragments_are_emptied_on_insert() {
        let doc = Document::new();
        let div = doc.create_element("div");
        let frag = doc.create_fragment();
        let t1 = doc.create_text("a");
        let t2 = doc.create_text("b");
        doc.append_child(frag, t1);
        doc.append_child(frag, t2);
        doc.append_child(div, frag);
        assert_eq!(doc.children(div), vec![t1, t2]);
        assert!(doc.children(frag).is_empty());
        assert_eq!(doc.text_content(div), "ab");
    }

    #[test]
    fn reflected_properties() {
        let doc = Document::new();
        let button = doc.create_element("button");
        assert!(doc.has_property(button, "disabled"));
        assert!(!doc.has_property(button, "checked"));
        doc.set_property(button, "disabled", Value::Bool(true));
        assert!(doc.has_attribute(button, "disabled"));
        doc.take_mutations();
        doc.set_property(button, "disabled", Value::Bool(true));
        assert_eq!(doc.mutation_count(), 0);
        doc.set_property(button, "disabled", Value::Bool(false));
        assert!(!doc.has_attribute(button, "disabled"));
        assert_eq!(doc.take_mutations(), vec![(button, Mutation::PROPERTY)]);
    }

    #[test]
    fn select_value_follows_options() {
        let doc = Document::new();
        let select = doc.create_element("select");
        let mut options = Vec::new();
        for v in ["a", "b", "c"] {
            let o = doc.create_element("option");
            doc.set_attribute(o, "value", v);
            doc.append_child(select, o);
            options.push(o);
        }
        assert_eq!(doc.property(select, "value"), Some(Value::from("")));
        doc.set_property(select, "value", Value::from("b"));
        assert_eq!(doc.property(select, "value"), Some(Value::from("b")));
        assert_eq!(doc.property(options[1], "selected"), Some(Value::Bool(true)));

        // moving the selected option clears the selection
        doc.insert_before(select, options[1], Some(options[0]));
        assert_eq!(doc.property(select, "value"), Some(Value::from("")));
    }

    #[test]
    fn listeners() {
        let doc = Document::new();
        let input = doc.create_element("input");
        let hits = Rc::new(std::cell::Cell::new(0));
        let h = hits.clone();
        let l = doc.add_listener(input, "input", move |doc, ev| {
            assert_eq!(doc.property(ev.target, "value"), Some(Value::from("x")));
            h.set(h.get() + 1);
        });
        doc.set_property(input, "value", Value::from("x"));
        assert_eq!(doc.dispatch(input, "input"), 1);
        assert_eq!(doc.dispatch(input, "change"), 0);
        doc.remove_listener(l);
        assert_eq!(doc.dispatch(input, "input"), 0);
        assert_eq!(hits.get(), 1);
    }

    #[test]
    fn classes() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "class", "a b");
        assert!(doc.add_class(div, "c"));
        assert!(!doc.add_class(div, "a"));
        assert!(doc.remove_class(div, "b"));
        assert_eq!(doc.class_list(div), vec!["a".to_string(), "c".to_string()]);
    }

    #[test]
    fn deep_clone() {
        let doc = Document::new();
        let div = doc.create_element("div");
        doc.set_attribute(div, "id", "x");
        let t = doc.create_text("hello");
        doc.append_child(div, t);
        let copy = doc.clone_node(div, true).unwrap();
        assert_ne!(copy, div);
        assert_eq!(doc.attribute(copy, "id").as_deref(), Some("x"));
        assert_eq!(doc.text_content(copy), "hello");
        assert_eq!(doc.parent(copy), None);
        doc.discard(copy);
        assert!(!doc.contains(copy));
        assert!(doc.contains(div));
    }
}
