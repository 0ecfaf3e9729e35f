//! Frame scheduler.
//!
//! Renderers with pending work are "cued" and fired together once per display frame. The
//! scheduler lives in thread-local storage and is activated lazily by the first `cue`.
use crate::error::{FrameError, RenderError};
use indexmap::IndexMap;
use std::{
    cell::{Cell, RefCell},
    fmt,
    num::NonZeroU64,
    rc::{Rc, Weak},
};
use tessel_common::counter::Counter;
use tracing::{error, trace};

/// Unique identifier of a renderer.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RendererId(NonZeroU64);

impl RendererId {
    pub fn next() -> RendererId {
        static COUNTER: Counter = Counter::new();
        RendererId(COUNTER.next_nonzero())
    }
}

impl fmt::Debug for RendererId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{:016X}", self.0)
    }
}

/// A unit of DOM work fired by the scheduler.
pub trait Render {
    fn id(&self) -> RendererId;

    /// Performs the pending DOM write, if any. Returns the number of DOM mutations.
    fn fire(&self) -> Result<usize, RenderError>;
}

/// Source of display-frame callbacks.
///
/// When a requested frame comes, the embedder calls `run_frame`.
pub trait FrameHost {
    fn request_frame(&self);
    fn cancel_frame(&self);
}

/// Frame host that only records requests. The embedder calls `run_frame` itself.
#[derive(Default)]
pub struct ManualFrames {
    requested: Cell<bool>,
    requests: Cell<usize>,
}

impl ManualFrames {
    /// Returns whether a frame is currently requested.
    pub fn is_requested(&self) -> bool {
        self.requested.get()
    }

    /// Total number of frame requests.
    pub fn requests(&self) -> usize {
        self.requests.get()
    }
}

impl FrameHost for ManualFrames {
    fn request_frame(&self) {
        self.requested.set(true);
        self.requests.set(self.requests.get() + 1);
    }

    fn cancel_frame(&self) {
        self.requested.set(false);
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// No frame requested.
    Idle,
    /// A frame is requested and renderers are waiting for it.
    Queued,
    /// The frame callback is running.
    Flushing,
}

/// What happened during one frame.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Renderers fired from the pending set.
    pub fired: usize,
    /// Renderers cued during the flush and fired immediately.
    pub fired_sync: usize,
    /// DOM mutations reported by the renderers.
    pub mutations: usize,
}

struct Scheduler {
    state: FrameState,
    pending: IndexMap<RendererId, Weak<dyn Render>>,
    host: Rc<dyn FrameHost>,
    stats: FrameStats,
    errors: Vec<RenderError>,
}

thread_local! {
    static SCHEDULER: RefCell<Scheduler> = RefCell::new(Scheduler {
        state: FrameState::Idle,
        pending: IndexMap::new(),
        host: Rc::new(ManualFrames::default()),
        stats: FrameStats::default(),
        errors: Vec::new(),
    });
}

fn with_scheduler<R>(f: impl FnOnce(&mut Scheduler) -> R) -> R {
    SCHEDULER.with(|s| f(&mut s.borrow_mut()))
}

/// Replaces the frame host of this thread. Returns the previous one.
pub fn set_host(host: Rc<dyn FrameHost>) -> Rc<dyn FrameHost> {
    with_scheduler(|s| std::mem::replace(&mut s.host, host))
}

pub fn state() -> FrameState {
    with_scheduler(|s| s.state)
}

pub fn is_idle() -> bool {
    state() == FrameState::Idle
}

/// Number of renderers waiting for the next frame.
pub fn pending_len() -> usize {
    with_scheduler(|s| s.pending.len())
}

pub fn is_cued(id: RendererId) -> bool {
    with_scheduler(|s| s.pending.contains_key(&id))
}

fn fire_one(renderer: &dyn Render) -> Result<usize, RenderError> {
    let id = renderer.id();
    renderer.fire().map_err(|err| {
        error!(?id, "render failed: {err:#}");
        err
    })
}

/// Cues a renderer for the next frame.
///
/// While a frame is being flushed, the renderer is fired immediately instead (and removed from
/// the part of the pending set that has not been reached yet).
pub fn cue(id: RendererId, renderer: Weak<dyn Render>) {
    enum Action {
        None,
        Request(Rc<dyn FrameHost>),
        FireNow,
    }
    let action = with_scheduler(|s| match s.state {
        FrameState::Flushing => {
            s.pending.shift_remove(&id);
            Action::FireNow
        }
        FrameState::Queued => {
            s.pending.entry(id).or_insert(renderer.clone());
            Action::None
        }
        FrameState::Idle => {
            s.pending.insert(id, renderer.clone());
            s.state = FrameState::Queued;
            Action::Request(s.host.clone())
        }
    });
    match action {
        Action::None => trace!(?id, "cue"),
        Action::Request(host) => {
            trace!(?id, "cue, requesting frame");
            host.request_frame();
        }
        Action::FireNow => {
            let Some(renderer) = renderer.upgrade() else { return };
            trace!(?id, "cued during flush, firing now");
            let result = fire_one(&*renderer);
            with_scheduler(|s| {
                s.stats.fired_sync += 1;
                match result {
                    Ok(n) => s.stats.mutations += n,
                    Err(err) => s.errors.push(err),
                }
            });
        }
    }
}

/// Removes a renderer from the pending set. Cancels the frame request if nothing is left.
pub fn uncue(id: RendererId) {
    let cancel = with_scheduler(|s| {
        s.pending.shift_remove(&id);
        if s.pending.is_empty() && s.state == FrameState::Queued {
            s.state = FrameState::Idle;
            Some(s.host.clone())
        } else {
            None
        }
    });
    if let Some(host) = cancel {
        trace!(?id, "uncue, cancelling frame");
        host.cancel_frame();
    }
}

/// Frame callback: fires every pending renderer once, in cue order.
///
/// Errors don't interrupt the flush; they are returned together once every renderer has fired.
pub fn run_frame() -> Result<FrameStats, FrameError> {
    let entered = with_scheduler(|s| {
        if s.state == FrameState::Flushing {
            return false;
        }
        s.state = FrameState::Flushing;
        s.stats = FrameStats::default();
        true
    });
    if !entered {
        tracing::warn!("run_frame called during a flush");
        return Ok(FrameStats::default());
    }

    loop {
        // entries uncued or fired synchronously in the meantime are gone from the set
        let next = with_scheduler(|s| s.pending.shift_remove_index(0));
        let Some((id, renderer)) = next else { break };
        let Some(renderer) = renderer.upgrade() else {
            trace!(?id, "renderer dropped before the frame");
            continue;
        };
        let result = fire_one(&*renderer);
        with_scheduler(|s| {
            s.stats.fired += 1;
            match result {
                Ok(n) => s.stats.mutations += n,
                Err(err) => s.errors.push(err),
            }
        });
    }

    let (stats, errors) = with_scheduler(|s| {
        s.state = FrameState::Idle;
        (s.stats, std::mem::take(&mut s.errors))
    });
    trace!(?stats, "frame done");
    if errors.is_empty() {
        Ok(stats)
    } else {
        Err(FrameError { errors })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Tracker {
        id: RendererId,
        fired: Cell<usize>,
        fail: bool,
        on_fire: RefCell<Option<Box<dyn Fn()>>>,
    }

    impl Tracker {
        fn new(fail: bool) -> Rc<Tracker> {
            Rc::new(Tracker {
                id: RendererId::next(),
                fired: Cell::new(0),
                fail,
                on_fire: RefCell::new(None),
            })
        }

        fn cue(self: &Rc<Self>) {
            let weak: Weak<dyn Render> = Rc::downgrade(self) as Weak<Tracker>;
            cue(self.id, weak);
        }
    }

    impl Render for Tracker {
        fn id(&self) -> RendererId {
            self.id
        }

        fn fire(&self) -> Result<usize, RenderError> {
            self.fired.set(self.fired.get() + 1);
            if let Some(f) = &*self.on_fire.borrow() {
                f();
            }
            if self.fail {
                Err(RenderError::Filter {
                    name: "tracker".into(),
                    source: anyhow::anyhow!("failure"),
                })
            } else {
                Ok(1)
            }
        }
    }

    #[test]
    fn cue_is_a_set() {
        let host = Rc::new(ManualFrames::default());
        set_host(host.clone());
        let p = Tracker::new(false);
        p.cue();
        p.cue();
        assert_eq!(state(), FrameState::Queued);
        assert_eq!(pending_len(), 1);
        assert_eq!(host.requests(), 1);
        let stats = run_frame().unwrap();
        assert_eq!(stats.fired, 1);
        assert_eq!(p.fired.get(), 1);
        assert!(is_idle());
    }

    #[test]
    fn uncue_cancels_the_frame() {
        let host = Rc::new(ManualFrames::default());
        set_host(host.clone());
        let p = Tracker::new(false);
        p.cue();
        assert!(host.is_requested());
        uncue(p.id);
        assert!(!host.is_requested());
        assert!(is_idle());
        // no-op when not cued
        uncue(p.id);
    }

    #[test]
    fn cue_during_flush_fires_synchronously() {
        let a = Tracker::new(false);
        let b = Tracker::new(false);
        let c = Tracker::new(false);
        // `a` cues `b` (already pending, not reached yet) and `c` (not pending)
        let (wb, wc) = (Rc::downgrade(&b), Rc::downgrade(&c));
        *a.on_fire.borrow_mut() = Some(Box::new(move || {
            wb.upgrade().unwrap().cue();
            wc.upgrade().unwrap().cue();
        }));
        a.cue();
        b.cue();
        let stats = run_frame().unwrap();
        assert_eq!(b.fired.get(), 1);
        assert_eq!(c.fired.get(), 1);
        assert_eq!(stats.fired, 1);
        assert_eq!(stats.fired_sync, 2);
        assert_eq!(stats.mutations, 3);
        assert_eq!(pending_len(), 0);
    }

    #[test]
    fn errors_do_not_stop_the_flush() {
        let bad = Tracker::new(true);
        let good = Tracker::new(false);
        bad.cue();
        good.cue();
        let err = run_frame().unwrap_err();
        assert_eq!(err.errors.len(), 1);
        assert_eq!(good.fired.get(), 1);
        assert!(is_idle());
    }

    #[test]
    fn dropped_renderers_are_skipped() {
        let p = Tracker::new(false);
        p.cue();
        drop(p);
        let stats = run_frame().unwrap();
        assert_eq!(stats.fired, 0);
    }
}
