//! Action Bus
//!
//! The bus is the single multicast channel every producer pushes actions
//! onto and every consumer subscribes to.
//!
//! # How It Works
//!
//! 1. `dispatch` opens a turn on the scheduler.
//! 2. The action is delivered synchronously to every listener, in
//!    registration order. Listeners may dispatch again; the nested dispatch
//!    completes before the outer one continues.
//! 3. When the outermost turn closes, coalesced emissions are flushed and
//!    errors deferred by the rethrow channel are returned to the caller.
//!
//! There is no buffering or replay on the raw bus: a listener sees only
//! actions dispatched after it subscribed.

use std::fmt;
use std::sync::Arc;

use crate::action::{Action, Namespace};
use crate::error::Result;
use crate::marker::{Marker, MarkerKind};
use crate::stream::{Scheduler, Stream, Subject, Subscription};

/// The shared action channel.
///
/// Cloning is cheap; clones dispatch onto the same channel.
#[derive(Clone)]
pub struct Bus {
    subject: Subject<Action>,
    scheduler: Scheduler,
    marker: Arc<Marker>,
}

impl Bus {
    /// Create a bus whose dispatches run as turns of `scheduler`.
    pub fn new(scheduler: Scheduler) -> Self {
        Self {
            subject: Subject::new(),
            scheduler,
            marker: Marker::derived(MarkerKind::Source, Vec::new()),
        }
    }

    /// Broadcast `action` to every listener.
    pub fn dispatch(&self, action: Action) -> Result<()> {
        tracing::debug!(
            action = %action.action_type(),
            namespace = ?action.namespace().map(Namespace::as_str),
            qualifiers = action.qualifiers().len(),
            "dispatch"
        );
        self.scheduler.turn(|| self.subject.next(action))
    }

    /// Broadcast `action` stamped with `namespace`, replacing any namespace
    /// it already carried.
    pub fn dispatch_namespaced(
        &self,
        action: Action,
        namespace: impl Into<Namespace>,
    ) -> Result<()> {
        self.dispatch(action.with_namespace(namespace))
    }

    /// Raw listener registration.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Action) + Send + Sync + 'static,
    {
        self.subject.subscribe(listener)
    }

    /// The bus as a stream, marked as a source.
    pub fn actions(&self) -> Stream<Action> {
        self.subject
            .as_stream()
            .with_marker(Some(Arc::clone(&self.marker)))
    }

    /// A dispatch function bound to this bus.
    pub fn dispatcher(&self) -> Dispatcher {
        let bus = self.clone();
        Dispatcher::new(move |action| bus.dispatch(action))
    }

    /// The scheduler every dispatch on this bus is a turn of.
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Number of live listeners. Mostly useful in tests.
    pub fn listener_count(&self) -> usize {
        self.subject.observer_count()
    }
}

impl fmt::Debug for Bus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bus")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// A dispatch function, possibly wrapped with scoping.
#[derive(Clone)]
pub struct Dispatcher {
    dispatch: Arc<dyn Fn(Action) -> Result<()> + Send + Sync>,
}

impl Dispatcher {
    /// Wrap a dispatch function.
    pub fn new<F>(dispatch: F) -> Self
    where
        F: Fn(Action) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            dispatch: Arc::new(dispatch),
        }
    }

    pub fn dispatch(&self, action: Action) -> Result<()> {
        (self.dispatch)(action)
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Dispatcher")
    }
}
