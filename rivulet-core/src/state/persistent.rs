//! Persistent state streams.
//!
//! A persistent stream owns its bus subscription. Folding is independent of
//! subscriber count: the fold keeps running with zero subscribers and runs
//! exactly once no matter how many are attached.
//!
//! # Lifecycle
//!
//! ```text
//! Idle --connect/start_reducing--> Connected --stop_reducing--> Idle
//!   \                                  |
//!    `-------------- unsubscribe ------+-----> Closed (terminal)
//! ```
//!
//! `state` and `subscribe` fail only in `Closed`.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::action::{ActionStreamExt, Namespace};
use crate::bus::Bus;
use crate::error::{Error, Result};
use crate::marker::{Inspector, Marked, Marker, MarkerKind};
use crate::reducer::Fold;
use crate::stream::{ErrorChannel, Item, Observer, Scheduler, Stream, Subject, Subscription};

/// Optional settings for a persistent reduced stream.
#[derive(Debug, Clone, Default)]
pub struct PersistentOptions {
    /// Channel for fold errors. Defaults to the context's rethrow channel.
    pub errors: Option<ErrorChannel>,
    /// Only fold actions in this namespace (or without one).
    pub namespace: Option<Namespace>,
    /// Bus used by `connect`. Defaults to the context's bus.
    pub bus: Option<Bus>,
}

enum Lifecycle {
    Idle,
    Connected(Subscription),
    Closed,
}

struct Inner<S> {
    name: String,
    fold: Fold<S>,
    namespace: Option<Namespace>,
    bus: Bus,
    inspector: Inspector,
    marker: Arc<Marker>,
    lifecycle: Mutex<Lifecycle>,
    current: Mutex<Versioned<S>>,
    subscribers: Subject<(u64, S)>,
    notify_pending: AtomicBool,
}

/// The current state and a counter bumped on every change, so a subscriber
/// never sees the same change twice.
struct Versioned<S> {
    version: u64,
    value: S,
}

impl<S: Item> Inner<S> {
    fn replace(&self, value: S) {
        let mut current = self.current.lock();
        current.version += 1;
        current.value = value;
    }

    fn snapshot(&self) -> (u64, S) {
        let current = self.current.lock();
        (current.version, current.value.clone())
    }
}

/// A named state stream with an explicit connect/unsubscribe lifecycle.
///
/// Cloning is cheap; clones share the same state.
pub struct PersistentStateStream<S> {
    inner: Arc<Inner<S>>,
}

impl<S: Item> PersistentStateStream<S> {
    /// Create a disconnected stream holding `initial`.
    pub fn new(
        name: &str,
        fold: Fold<S>,
        bus: Bus,
        namespace: Option<Namespace>,
        inspector: Inspector,
    ) -> Self {
        let marker = Marker::named(
            MarkerKind::Name,
            name,
            vec![Marked::marker(&bus.actions()).cloned()],
        );
        let seed = fold.seed().clone();
        Self {
            inner: Arc::new(Inner {
                name: name.to_string(),
                fold,
                namespace,
                bus,
                inspector,
                marker,
                lifecycle: Mutex::new(Lifecycle::Idle),
                current: Mutex::new(Versioned {
                    version: 0,
                    value: seed,
                }),
                subscribers: Subject::new(),
                notify_pending: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Start folding actions from the stream's own bus.
    pub fn connect(&self) -> Result<()> {
        let bus = self.inner.bus.clone();
        self.start_reducing(&bus, None)
    }

    /// Start folding actions from `bus`, optionally replacing the current
    /// state with `initial` first.
    ///
    /// Fails if the stream is already connected or has been torn down.
    pub fn start_reducing(&self, bus: &Bus, initial: Option<S>) -> Result<()> {
        self.check_idle()?;

        let start = match initial {
            Some(initial) => {
                self.inner.replace(initial.clone());
                let weak = Arc::downgrade(&self.inner);
                schedule_notify(&self.inner, &weak, bus.scheduler());
                initial
            }
            None => self.inner.current.lock().value.clone(),
        };

        let actions = match &self.inner.namespace {
            Some(namespace) => bus.actions().with_namespace(namespace.clone()),
            None => bus.actions(),
        };

        // Subscribing may run fold functions synchronously (stream-keyed
        // entries that replay), so the lifecycle lock is not held here.
        let weak: Weak<Inner<S>> = Arc::downgrade(&self.inner);
        let scheduler = bus.scheduler().clone();
        let subscription = self
            .inner
            .fold
            .updates_from(&actions, start)
            .subscribe(move |next: S| {
                if let Some(inner) = weak.upgrade() {
                    inner.replace(next);
                    schedule_notify(&inner, &weak, &scheduler);
                }
            });

        let mut lifecycle = self.inner.lifecycle.lock();
        if !matches!(*lifecycle, Lifecycle::Idle) {
            drop(lifecycle);
            drop(subscription);
            return self.check_idle();
        }
        *lifecycle = Lifecycle::Connected(subscription);
        drop(lifecycle);

        tracing::debug!(stream = %self.inner.name, "persistent stream connected");
        Ok(())
    }

    fn check_idle(&self) -> Result<()> {
        match &*self.inner.lifecycle.lock() {
            Lifecycle::Idle => Ok(()),
            Lifecycle::Connected(_) => Err(Error::AlreadyConnected(self.inner.name.clone())),
            Lifecycle::Closed => Err(Error::StreamClosed(self.inner.name.clone())),
        }
    }

    /// Stop folding, keeping the current state. The stream can be started
    /// again.
    pub fn stop_reducing(&self) {
        let released = {
            let mut lifecycle = self.inner.lifecycle.lock();
            match std::mem::replace(&mut *lifecycle, Lifecycle::Idle) {
                Lifecycle::Connected(subscription) => Some(subscription),
                Lifecycle::Closed => {
                    *lifecycle = Lifecycle::Closed;
                    None
                }
                Lifecycle::Idle => None,
            }
        };
        if released.is_some() {
            tracing::debug!(stream = %self.inner.name, "persistent stream stopped");
        }
    }

    /// Tear the stream down permanently.
    pub fn unsubscribe(&self) {
        let previous = std::mem::replace(&mut *self.inner.lifecycle.lock(), Lifecycle::Closed);
        drop(previous);
        self.inner.subscribers.clear();
        tracing::debug!(stream = %self.inner.name, "persistent stream torn down");
    }

    /// Current state.
    pub fn state(&self) -> Result<S> {
        if self.is_closed() {
            return Err(Error::StreamClosed(self.inner.name.clone()));
        }
        Ok(self.inner.current.lock().value.clone())
    }

    /// Replace the current state and notify subscribers at the next flush
    /// point.
    pub fn set_state(&self, state: S) -> Result<()> {
        if self.is_closed() {
            return Err(Error::StreamClosed(self.inner.name.clone()));
        }
        self.inner.replace(state);
        let weak = Arc::downgrade(&self.inner);
        schedule_notify(&self.inner, &weak, self.inner.bus.scheduler());
        Ok(())
    }

    /// Attach `observer`; it receives the current state immediately.
    ///
    /// A change already queued for the flush point when `observer` attaches
    /// is not delivered again.
    pub fn subscribe<F>(&self, observer: F) -> Result<Subscription>
    where
        F: Fn(S) + Send + Sync + 'static,
    {
        self.subscribe_observer(Arc::new(observer))
    }

    fn subscribe_observer(&self, observer: Observer<S>) -> Result<Subscription> {
        if self.is_closed() {
            return Err(Error::StreamClosed(self.inner.name.clone()));
        }
        let (version, current) = self.inner.snapshot();
        self.inner.inspector.notify(&self.inner.marker);

        let seen = Arc::new(AtomicU64::new(version));
        let subscription = self.inner.subscribers.subscribe({
            let observer = Arc::clone(&observer);
            move |(version, value)| {
                if seen.fetch_max(version, Ordering::SeqCst) < version {
                    observer(value);
                }
            }
        });
        observer(current);
        Ok(subscription)
    }

    /// View as a stream. Subscribing after teardown yields nothing.
    pub fn as_stream(&self) -> Stream<S> {
        let this = self.clone();
        Stream::new(move |observer| match this.subscribe_observer(observer) {
            Ok(subscription) => subscription,
            Err(error) => {
                tracing::warn!(%error, "subscribed to a torn-down stream");
                Subscription::empty()
            }
        })
        .with_marker(Some(Arc::clone(&self.inner.marker)))
    }

    /// Whether the stream is currently folding actions from a bus.
    pub fn is_connected(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Connected(_))
    }

    /// Whether [`PersistentStateStream::close`] has been called.
    pub fn is_closed(&self) -> bool {
        matches!(*self.inner.lifecycle.lock(), Lifecycle::Closed)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.observer_count()
    }
}

/// Queue one delivery of the current state for the flush point, unless one
/// is already queued.
fn schedule_notify<S: Item>(
    inner: &Inner<S>,
    weak: &Weak<Inner<S>>,
    scheduler: &Scheduler,
) {
    if inner.notify_pending.swap(true, Ordering::SeqCst) {
        return;
    }
    let weak = weak.clone();
    scheduler.schedule(move || {
        let Some(inner) = weak.upgrade() else {
            return;
        };
        inner.notify_pending.store(false, Ordering::SeqCst);
        inner.subscribers.next(inner.snapshot());
    });
}

impl<S> Clone for PersistentStateStream<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S> Marked for PersistentStateStream<S> {
    fn marker(&self) -> Option<&Arc<Marker>> {
        Some(&self.inner.marker)
    }
}

impl<S> fmt::Debug for PersistentStateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.inner.lifecycle.lock() {
            Lifecycle::Idle => "idle",
            Lifecycle::Connected(_) => "connected",
            Lifecycle::Closed => "closed",
        };
        f.debug_struct("PersistentStateStream")
            .field("name", &self.inner.name)
            .field("lifecycle", &state)
            .finish()
    }
}
