//! Directives: functions named in the `fn` attribute of an element, run on the stream of scopes
//! flowing into it.
//!
//! `fn="get:'/items.json' each"` loads a value and repeats the element for each of its items.
use crate::{
    config::Config,
    dom::{Document, NodeId},
    each::{Each, Toggle},
    error::{MountError, ParseError},
    mount::{Handle, MountCx},
    observe::{self, Path, Subscription},
    render::Mountable,
    stream::{Stream, StreamSubscription},
};
use anyhow::{anyhow, bail};
use nom::{
    bytes::complete::take_while1,
    character::complete::{char, multispace0, multispace1},
    combinator::{all_consuming, consumed, cut, map, opt},
    multi::separated_list0,
    sequence::{delimited, pair, preceded},
    Finish, IResult,
};
use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    fmt,
    rc::Rc,
};
use tessel_common::{literal, Value};
use tracing::{debug, error};

/// What a directive does with the stream of its element.
pub enum Outcome {
    /// Pass the stream on unchanged.
    Keep,
    /// Continue with another stream. It is completed along with the input stream.
    Replace(Stream),
    /// The directive took over the element; nothing else is mounted on it.
    Halt,
}

pub type Directive = Rc<dyn Fn(&DirectiveContext, &Stream, &[Value]) -> anyhow::Result<Outcome>>;

/// Named directives.
#[derive(Clone, Default)]
pub struct DirectiveRegistry {
    directives: HashMap<String, Directive>,
}

impl fmt::Debug for DirectiveRegistry {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names: Vec<_> = self.directives.keys().collect();
        names.sort();
        f.debug_tuple("DirectiveRegistry").field(&names).finish()
    }
}

fn path_arg(args: &[Value], directive: &str) -> anyhow::Result<Path> {
    let Some(path) = args.first().and_then(Value::as_str) else {
        bail!("{directive}: expected a path argument");
    };
    Ok(Path::parse(path)?)
}

impl DirectiveRegistry {
    pub fn new() -> DirectiveRegistry {
        DirectiveRegistry::default()
    }

    /// A registry with `each`, `if`, `scope`, `get` and `log`.
    pub fn with_builtins() -> DirectiveRegistry {
        let mut r = DirectiveRegistry::new();
        r.register("each", |cx, input, _| {
            let each = Each::new(cx.mount_cx(), cx.node(), &cx.remaining())?;
            cx.bind(input, each);
            Ok(Outcome::Halt)
        });
        r.register("if", |cx, input, args| {
            let path = path_arg(args, "if")?;
            let toggle = Toggle::new(cx.mount_cx(), cx.node(), path, &cx.remaining())?;
            cx.bind(input, toggle);
            Ok(Outcome::Halt)
        });
        r.register("scope", |_, input, args| {
            let path = path_arg(args, "scope")?;
            Ok(Outcome::Replace(scoped(input, path)))
        });
        r.register("get", |cx, _, args| {
            let Some(url) = args.first().and_then(Value::as_str) else {
                bail!("get: expected a URL argument");
            };
            let loader = cx.config().loader.clone().ok_or_else(|| anyhow!("get: no loader configured"))?;
            let out = Stream::new();
            let target = out.clone();
            let name = url.to_string();
            loader.load(
                url,
                Box::new(move |result| match result {
                    // the element may have been unmounted in the meantime
                    Ok(_) if target.is_done() => debug!(url = %name, "load completed after teardown"),
                    Ok(value) => target.push(value),
                    Err(err) => error!(url = %name, "load failed: {err:#}"),
                }),
            );
            Ok(Outcome::Replace(out))
        });
        r.register("log", |cx, input, _| {
            let node = cx.node();
            let out = input.map(move |scope| {
                debug!(?node, ?scope, "scope");
                scope.clone()
            });
            Ok(Outcome::Replace(out))
        });
        r
    }

    /// Registers (or replaces) a directive.
    pub fn register(
        &mut self,
        name: &str,
        directive: impl Fn(&DirectiveContext, &Stream, &[Value]) -> anyhow::Result<Outcome> + 'static,
    ) {
        self.directives.insert(name.to_string(), Rc::new(directive));
    }

    pub fn resolve(&self, name: &str) -> Option<Directive> {
        self.directives.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.directives.contains_key(name)
    }
}

/// The stream of the values at `path` in the scopes of `input`, following their changes.
fn scoped(input: &Stream, path: Path) -> Stream {
    let out = Stream::new();
    let current = Rc::new(RefCell::new(Subscription::none()));
    let target = out.clone();
    let slot = current.clone();
    let sub = input.subscribe(move |scope| {
        drop(slot.take());
        let target = target.clone();
        let subscription = observe::subscribe_path(scope, &path, move |value, _| target.push(value.clone()));
        *slot.borrow_mut() = subscription;
    });
    out.on_complete(move || {
        drop(sub);
        drop(current.take());
    });
    out
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// Asynchronous value source used by `get`.
pub trait Loader {
    /// Loads `url` and calls `done` with the result, now or later.
    fn load(&self, url: &str, done: Box<dyn FnOnce(anyhow::Result<Value>)>);
}

/// Loader serving values from memory.
///
/// In deferred mode, requests are queued until `resolve_pending` is called.
#[derive(Default)]
pub struct MemoryLoader {
    values: RefCell<HashMap<String, Value>>,
    deferred: bool,
    pending: RefCell<Vec<(String, Box<dyn FnOnce(anyhow::Result<Value>)>)>>,
}

impl MemoryLoader {
    pub fn new() -> MemoryLoader {
        MemoryLoader::default()
    }

    pub fn deferred() -> MemoryLoader {
        MemoryLoader {
            deferred: true,
            ..MemoryLoader::default()
        }
    }

    pub fn insert(&self, url: &str, value: Value) {
        self.values.borrow_mut().insert(url.to_string(), value);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.borrow().len()
    }

    fn get(&self, url: &str) -> anyhow::Result<Value> {
        self.values.borrow().get(url).cloned().ok_or_else(|| anyhow!("`{url}` not found"))
    }

    /// Completes the queued requests. Returns how many there were.
    pub fn resolve_pending(&self) -> usize {
        let pending = self.pending.take();
        let n = pending.len();
        for (url, done) in pending {
            done(self.get(&url));
        }
        n
    }
}

impl Loader for MemoryLoader {
    fn load(&self, url: &str, done: Box<dyn FnOnce(anyhow::Result<Value>)>) {
        if self.deferred {
            self.pending.borrow_mut().push((url.to_string(), done));
        } else {
            done(self.get(url));
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////////////////

/// What a directive sees of the element it runs on.
pub struct DirectiveContext {
    cx: Rc<MountCx>,
    node: NodeId,
    remaining: RefCell<String>,
    owned: RefCell<Vec<Rc<dyn Mountable>>>,
    subscriptions: RefCell<Vec<StreamSubscription>>,
    error: Rc<RefCell<Option<MountError>>>,
}

impl DirectiveContext {
    fn new(cx: &Rc<MountCx>, node: NodeId) -> DirectiveContext {
        DirectiveContext {
            cx: cx.clone(),
            node,
            remaining: RefCell::new(String::new()),
            owned: RefCell::new(Vec::new()),
            subscriptions: RefCell::new(Vec::new()),
            error: Rc::new(RefCell::new(None)),
        }
    }

    pub fn mount_cx(&self) -> &Rc<MountCx> {
        &self.cx
    }

    pub fn doc(&self) -> &Document {
        self.cx.doc()
    }

    pub fn config(&self) -> &Config {
        self.cx.config()
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    /// The directives after the one running, as written.
    pub fn remaining(&self) -> String {
        self.remaining.borrow().clone()
    }

    /// Pushes the values of `stream` into `target`. `target` is stopped with the element.
    ///
    /// Push errors are reported by the next push into the element.
    pub fn bind(&self, stream: &Stream, target: Rc<dyn Mountable>) {
        let error = self.error.clone();
        let t = target.clone();
        let sub = stream.subscribe(move |scope| {
            if let Err(err) = t.push(scope) {
                error!("push failed: {err}");
                error.borrow_mut().get_or_insert(err);
            }
        });
        self.subscriptions.borrow_mut().push(sub);
        self.owned.borrow_mut().push(target);
    }

    fn take_error(&self) -> Option<MountError> {
        self.error.borrow_mut().take()
    }
}

fn directive(input: &str) -> IResult<&str, (&str, Vec<Value>)> {
    pair(
        take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
        map(opt(preceded(char(':'), cut(literal::value_list))), Option::unwrap_or_default),
    )(input)
}

/// Parses a directive list into `(name, args, rest)` triples, `rest` being the text of the
/// directives that follow.
fn parse_directives(text: &str) -> Result<Vec<(String, Vec<Value>, String)>, ParseError> {
    let (_, parsed) = all_consuming(delimited(
        multispace0,
        separated_list0(multispace1, consumed(directive)),
        multispace0,
    ))(text)
    .finish()
    .map_err(|_| ParseError::Directive(text.to_string()))?;
    let sources: Vec<&str> = parsed.iter().map(|(source, _)| *source).collect();
    Ok(parsed
        .into_iter()
        .enumerate()
        .map(|(i, (_, (name, args)))| (name.to_string(), args, sources[i + 1..].join(" ")))
        .collect())
}

/// Runs the directives of `text` on `input`, in order.
///
/// Returns the resulting stream, or `None` if a directive halted.
pub fn run_directives(
    cx: &DirectiveContext,
    input: &Stream,
    text: &str,
    registry: &DirectiveRegistry,
) -> Result<Option<Stream>, MountError> {
    let mut stream = input.clone();
    for (name, args, rest) in parse_directives(text)? {
        let directive = registry
            .resolve(&name)
            .ok_or_else(|| MountError::MissingDirective(name.clone()))?;
        cx.remaining.replace(rest);
        let outcome = directive(cx, &stream, &args).map_err(|source| match source.downcast::<MountError>() {
            Ok(err) => err,
            Err(source) => MountError::Directive {
                name: name.clone(),
                source,
            },
        })?;
        match outcome {
            Outcome::Keep => {}
            Outcome::Replace(next) => {
                let chained = next.clone();
                stream.on_complete(move || chained.complete());
                stream = next;
            }
            Outcome::Halt => {
                debug!(directive = %name, "mount halted");
                return Ok(None);
            }
        }
    }
    Ok(Some(stream))
}

/// An element with directives: scopes pushed into it go through the directives before reaching
/// the content.
pub(crate) struct DirectiveMount {
    input: Stream,
    context: DirectiveContext,
    stopped: Cell<bool>,
}

impl DirectiveMount {
    pub(crate) fn new(cx: &Rc<MountCx>, node: NodeId, text: &str) -> Result<Rc<DirectiveMount>, MountError> {
        let input = Stream::new();
        let context = DirectiveContext::new(cx, node);
        let output = match run_directives(&context, &input, text, &cx.config().directives) {
            Ok(output) => output,
            Err(err) => {
                input.complete();
                return Err(err);
            }
        };
        if let Some(output) = output {
            let mut members = Vec::new();
            if let Err(err) = cx.mount_content(node, &mut members) {
                input.complete();
                return Err(err);
            }
            context.bind(&output, Rc::new(Handle::new(members)));
        }
        Ok(Rc::new(DirectiveMount {
            input,
            context,
            stopped: Cell::new(false),
        }))
    }
}

impl Mountable for DirectiveMount {
    fn push(&self, scope: &Value) -> Result<(), MountError> {
        if self.stopped.get() {
            return Ok(());
        }
        self.input.push(scope.clone());
        match self.context.take_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn stop(&self) {
        if self.stopped.replace(true) {
            return;
        }
        self.input.complete();
        self.context.subscriptions.take();
        for m in self.context.owned.take() {
            m.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{frame, mount::mount, observe::wrap};
    use tessel_common::{Array, Object};

    #[test]
    fn parse_list() {
        let parsed = parse_directives("get:'/a b.json' scope:'items[0]'  each").unwrap();
        let names: Vec<_> = parsed.iter().map(|(n, _, _)| n.as_str()).collect();
        assert_eq!(names, ["get", "scope", "each"]);
        assert_eq!(parsed[0].1, vec![Value::from("/a b.json")]);
        assert_eq!(parsed[0].2, "scope:'items[0]' each");
        assert_eq!(parsed[2].2, "");
        assert!(parse_directives("each:[1,").is_err());
        assert!(parse_directives("ea'ch").is_err());
        let parsed = parse_directives(" if:'a b'\n\teach:[1, 'x y'] ").unwrap();
        assert_eq!(parsed[0].1, vec![Value::from("a b")]);
        assert_eq!(parsed[0].2, "each:[1, 'x y']");
        assert_eq!(parsed[1].1[0].as_array().unwrap().len(), 2);
        assert!(parse_directives("   ").unwrap().is_empty());
    }

    #[test]
    fn unknown_directive() {
        let doc = Document::new();
        let root = doc.parse_html(r#"<p fn="nope"></p>"#).unwrap();
        assert!(matches!(
            mount(&doc, root, &Config::default()),
            Err(MountError::MissingDirective(name)) if name == "nope"
        ));
    }

    #[test]
    fn scope_follows_the_path() {
        let doc = Document::new();
        let root = doc.parse_html(r#"<p fn="scope:'user'">{[name]}</p>"#).unwrap();
        let handle = mount(&doc, root, &Config::default()).unwrap();
        let scope = Value::from(Object::from_entries([(
            "user",
            Value::from(Object::from_entries([("name", "ann")])),
        )]));
        handle.push(&scope).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.text_content(root), "ann");
        wrap(&scope)
            .unwrap()
            .set("user", Object::from_entries([("name", "bob")]));
        frame::run_frame().unwrap();
        assert_eq!(doc.text_content(root), "bob");
    }

    #[test]
    fn each_takes_the_remaining_directives() {
        let doc = Document::new();
        let root = doc.parse_html(r#"<ul><li fn="each scope:'label'">{[text]}</li></ul>"#).unwrap();
        let handle = mount(&doc, root, &Config::default()).unwrap();
        let label = |t: &str| Value::from(Object::from_entries([("label", Object::from_entries([("text", t)]))]));
        let items = Value::from(Array::from_vec(vec![label("a"), label("b")]));
        handle.push(&items).unwrap();
        frame::run_frame().unwrap();
        assert_eq!(doc.inner_html(root), "<ul><!--each--><li>a</li><li>b</li></ul>");
        handle.stop();
    }

    #[test]
    fn get_ignores_late_results() {
        let loader = Rc::new(MemoryLoader::deferred());
        loader.insert("/user", Value::from(Object::from_entries([("name", "ann")])));
        let config = Config::default().with_loader(loader.clone());
        let doc = Document::new();
        let root = doc.parse_html(r#"<p fn="get:'/user'">{[name]}</p><i fn="get:'/user'">{[name]}</i>"#).unwrap();
        let handle = mount(&doc, root, &config).unwrap();
        handle.push(&Value::Null).unwrap();
        assert_eq!(loader.pending_len(), 2);
        handle.stop();
        assert_eq!(loader.resolve_pending(), 2);
        assert_eq!(frame::pending_len(), 0);
        assert_eq!(doc.text_content(root), "{[name]}{[name]}");
    }

    #[test]
    fn get_without_loader_fails() {
        let doc = Document::new();
        let root = doc.parse_html(r#"<p fn="get:'/x'"></p>"#).unwrap();
        let err = mount(&doc, root, &Config::default()).unwrap_err();
        assert!(matches!(err, MountError::Directive { ref name, .. } if name == "get"));
    }

    #[test]
    fn fragment_errors_are_not_wrapped() {
        let doc = Document::new();
        let cx = MountCx::new(&doc, Config::default());
        let fragment = doc.create_fragment();
        let context = DirectiveContext::new(&cx, fragment);
        let err = run_directives(&context, &Stream::new(), "each", &DirectiveRegistry::with_builtins()).unwrap_err();
        assert!(matches!(err, MountError::FragmentRoot));
    }
}
