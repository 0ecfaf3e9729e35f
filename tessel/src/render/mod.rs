//! Renderers: units that subscribe to scope paths and perform one kind of DOM write.
//!
//! All variants share `Renderer<S>`, which owns the subscriptions and the firing contract; the
//! sink `S` performs the actual write.
use crate::{
    dom::Document,
    error::{MountError, RenderError},
    frame::{self, Render, RendererId},
    observe::{self, Subscription},
    token::Template,
};
use bitflags::bitflags;
use std::{
    cell::{Cell, RefCell},
    rc::{Rc, Weak},
};
use tessel_common::Value;

mod boolean;
mod class;
mod text;
mod value;

pub use boolean::BooleanSink;
pub use class::ClassSink;
pub use text::{AttributeSink, TextSink};
pub use value::{ControlKind, ValueSink};

pub type TextRenderer = Renderer<TextSink>;
pub type AttributeRenderer = Renderer<AttributeSink>;
pub type BooleanRenderer = Renderer<BooleanSink>;
pub type ClassRenderer = Renderer<ClassSink>;
pub type ValueRenderer = Renderer<ValueSink>;

/// Something that can be bound to a scope and torn down.
pub trait Mountable {
    /// Binds to a new scope, replacing the previous bindings.
    fn push(&self, scope: &Value) -> Result<(), MountError>;
    /// Unbinds. Subsequent calls do nothing.
    fn stop(&self);
}

/// The DOM write of a renderer.
pub trait Sink: Sized + 'static {
    /// Writes the projection of the token values, if it differs from what was last written.
    /// Returns the number of DOM mutations.
    fn render(&mut self, doc: &Document, template: &Template, values: &[Value]) -> usize;

    /// Called after the renderer has subscribed to a new scope.
    fn pushed(_renderer: &Renderer<Self>) {}

    /// Called once when the renderer stops.
    fn stop(&mut self, _doc: &Document) {}
}

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    struct RendererFlags: u8 {
        /// Subscribing to a new scope.
        const PUSHING = (1 << 0);
        /// A value arrived while pushing.
        const CUE_AFTER_PUSH = (1 << 1);
        /// Values are stored without cueing.
        const SUPPRESS = (1 << 2);
        const STOPPED = (1 << 3);
    }
}

#[derive(Default)]
struct Slot {
    value: Value,
    subscription: Subscription,
}

pub struct Renderer<S> {
    id: RendererId,
    this: Weak<Renderer<S>>,
    doc: Document,
    template: Template,
    /// One per token.
    slots: RefCell<Vec<Slot>>,
    scope: RefCell<Value>,
    sink: RefCell<S>,
    flags: Cell<RendererFlags>,
    mutations: Cell<usize>,
}

impl<S: Sink> Renderer<S> {
    pub fn new(doc: &Document, template: Template, sink: S) -> Rc<Renderer<S>> {
        let slots = template.tokens().iter().map(|_| Slot::default()).collect();
        Rc::new_cyclic(|this| Renderer {
            id: RendererId::next(),
            this: this.clone(),
            doc: doc.clone(),
            template,
            slots: RefCell::new(slots),
            scope: RefCell::new(Value::Undefined),
            sink: RefCell::new(sink),
            flags: Cell::new(RendererFlags::empty()),
            mutations: Cell::new(0),
        })
    }

    pub fn id(&self) -> RendererId {
        self.id
    }

    pub fn doc(&self) -> &Document {
        &self.doc
    }

    pub fn template(&self) -> &Template {
        &self.template
    }

    pub fn weak(&self) -> Weak<Renderer<S>> {
        self.this.clone()
    }

    /// The scope last pushed.
    pub fn scope(&self) -> Value {
        self.scope.borrow().clone()
    }

    /// The current (unfiltered) value of a token.
    pub fn slot_value(&self, index: usize) -> Value {
        self.slots.borrow().get(index).map(|s| s.value.clone()).unwrap_or_default()
    }

    /// Total DOM mutations performed by this renderer.
    pub fn mutations(&self) -> usize {
        self.mutations.get()
    }

    pub fn is_stopped(&self) -> bool {
        self.flags.get().contains(RendererFlags::STOPPED)
    }

    pub fn with_sink<R>(&self, f: impl FnOnce(&mut S) -> R) -> R {
        f(&mut self.sink.borrow_mut())
    }

    fn set_flag(&self, flag: RendererFlags, on: bool) {
        let mut flags = self.flags.get();
        flags.set(flag, on);
        self.flags.set(flags);
    }

    /// Runs `f` with cueing suppressed: values that arrive are stored but don't schedule a write.
    pub fn suppressed<R>(&self, f: impl FnOnce() -> R) -> R {
        let was = self.flags.get().contains(RendererFlags::SUPPRESS);
        self.set_flag(RendererFlags::SUPPRESS, true);
        let r = f();
        self.set_flag(RendererFlags::SUPPRESS, was);
        r
    }

    pub fn cue(&self) {
        let weak: Weak<dyn Render> = self.this.clone();
        frame::cue(self.id, weak);
    }

    fn on_value(&self, index: usize, value: &Value) {
        let flags = self.flags.get();
        if flags.contains(RendererFlags::STOPPED) {
            return;
        }
        if let Some(slot) = self.slots.borrow_mut().get_mut(index) {
            slot.value = value.clone();
        }
        if flags.contains(RendererFlags::SUPPRESS) {
            return;
        }
        if flags.contains(RendererFlags::PUSHING) {
            self.set_flag(RendererFlags::CUE_AFTER_PUSH, true);
            return;
        }
        self.cue();
    }

    fn push_scope(&self, scope: &Value) {
        if self.is_stopped() {
            return;
        }
        self.scope.replace(scope.clone());
        self.set_flag(RendererFlags::PUSHING, true);
        for (index, token) in self.template.tokens().iter().enumerate() {
            let previous = std::mem::take(&mut self.slots.borrow_mut()[index].subscription);
            drop(previous);
            let this = self.this.clone();
            let subscription = observe::subscribe_path(scope, &token.path, move |value, _| {
                if let Some(this) = this.upgrade() {
                    this.on_value(index, value)
                }
            });
            self.slots.borrow_mut()[index].subscription = subscription;
        }
        self.set_flag(RendererFlags::PUSHING, false);
        S::pushed(self);
        if self.flags.get().contains(RendererFlags::CUE_AFTER_PUSH) {
            self.set_flag(RendererFlags::CUE_AFTER_PUSH, false);
            self.cue();
        }
    }
}

impl<S: Sink> Render for Renderer<S> {
    fn id(&self) -> RendererId {
        self.id
    }

    fn fire(&self) -> Result<usize, RenderError> {
        if self.is_stopped() {
            return Ok(0);
        }
        let values = {
            let slots = self.slots.borrow();
            self.template
                .tokens()
                .iter()
                .zip(slots.iter())
                .map(|(token, slot)| token.evaluate(&slot.value))
                .collect::<Result<Vec<_>, _>>()?
        };
        let n = self.sink.borrow_mut().render(&self.doc, &self.template, &values);
        self.mutations.set(self.mutations.get() + n);
        Ok(n)
    }
}

impl<S: Sink> Mountable for Renderer<S> {
    fn push(&self, scope: &Value) -> Result<(), MountError> {
        self.push_scope(scope);
        Ok(())
    }

    fn stop(&self) {
        if self.is_stopped() {
            return;
        }
        self.set_flag(RendererFlags::STOPPED, true);
        let slots = std::mem::take(&mut *self.slots.borrow_mut());
        drop(slots);
        frame::uncue(self.id);
        self.sink.borrow_mut().stop(&self.doc);
    }
}
