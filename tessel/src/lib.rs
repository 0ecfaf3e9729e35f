//! Binds DOM subtrees to observable scope values.
//!
//! `mount` walks a subtree for `{[path|filter]}` tokens, attribute bindings and directives, and
//! returns a `Handle`. Pushing a scope into the handle subscribes every renderer to the paths it
//! displays; writes made through `observe::wrap` are then rendered once per frame
//! (`frame::run_frame`).

// public modules
pub mod dom;
pub mod filter;
pub mod frame;
pub mod observe;
pub mod render;
pub mod stream;
pub mod token;

// internal modules
mod config;
mod directive;
mod each;
mod error;
mod include;
mod mount;

// public exports
pub use config::{Config, Options, TagConfig};
pub use directive::{run_directives, Directive, DirectiveContext, DirectiveRegistry, Loader, MemoryLoader, Outcome};
pub use dom::{Document, NodeId};
pub use each::{Each, Toggle};
pub use error::{ConfigError, FrameError, MountError, ParseError, PathError, RenderError};
pub use filter::{Filter, FilterRegistry};
pub use include::{DocumentTemplates, HtmlTemplates, TemplateSource};
pub use mount::{mount, Handle, MountCx};
pub use observe::{wrap, Observed, Subscription};
pub use render::Mountable;
pub use stream::Stream;
pub use tessel_common::{Array, Data, Object, Value};
