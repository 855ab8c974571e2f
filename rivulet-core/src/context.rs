//! Rivulet Context
//!
//! The [`Context`] owns everything a process would otherwise keep in
//! globals: the turn scheduler, the action bus, the persistent stream
//! registry, the marker inspector and the default error channel.
//!
//! # Lifecycle
//!
//! 1. Build with [`Context::new`] (or `Default` for development settings).
//! 2. Create streams and routines through it; persistent streams register
//!    themselves.
//! 3. [`Context::start`] connects the registry to the bus.
//! 4. [`Context::shutdown`] stops every persistent stream.
//!
//! Cloning a context is cheap and shares all of the above.

use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::action::{create_child_action_stream, Action, Namespace, Qualifier};
use crate::bus::{Bus, Dispatcher};
use crate::config::Config;
use crate::error::Result;
use crate::marker::{detect_glitch, Glitch, Inspector, Marked};
use crate::reducer::{combine, Fold, ReducerEntry};
use crate::routine::{subscribe_routine, Routine};
use crate::state::{PersistentOptions, PersistentStateStream, Registry, Snapshot, StateStream};
use crate::stream::{
    combine_latest, combine_latest_all, ErrorChannel, Item, Scheduler, Stream, Subscription,
};

struct ContextInner {
    config: Config,
    scheduler: Scheduler,
    bus: Bus,
    registry: Registry,
    inspector: Inspector,
    errors: ErrorChannel,
}

#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Build a context with its own scheduler, bus and registry.
    pub fn new(config: Config) -> Self {
        let scheduler = Scheduler::new();
        let bus = Bus::new(scheduler.clone());
        let errors = ErrorChannel::rethrow(&scheduler);
        tracing::debug!(
            mode = ?config.mode,
            strict_glitches = config.strict_glitches,
            "context created"
        );
        Self {
            inner: Arc::new(ContextInner {
                registry: Registry::new(config.mode),
                config,
                scheduler,
                bus,
                inspector: Inspector::new(),
                errors,
            }),
        }
    }

    /// Build from environment variables. See [`Config::from_env`].
    pub fn from_env() -> Self {
        Self::new(Config::from_env())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn bus(&self) -> &Bus {
        &self.inner.bus
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    /// Hook point for marker creation, shared by every stream built here.
    pub fn inspector(&self) -> &Inspector {
        &self.inner.inspector
    }

    /// The default error channel: defers errors to the end of the turn.
    pub fn errors(&self) -> &ErrorChannel {
        &self.inner.errors
    }

    // Bus

    /// Dispatch `action` on the bus. Errors deferred during the dispatch
    /// come back as [`Error::Uncaught`](crate::Error::Uncaught).
    pub fn dispatch(&self, action: Action) -> Result<()> {
        self.inner.bus.dispatch(action)
    }

    pub fn dispatch_namespaced(
        &self,
        action: Action,
        namespace: impl Into<Namespace>,
    ) -> Result<()> {
        self.inner.bus.dispatch_namespaced(action, namespace)
    }

    /// Listen to every action dispatched on the bus.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Action) + Send + Sync + 'static,
    {
        self.inner.bus.subscribe(listener)
    }

    /// Every dispatched action as a hot stream.
    pub fn actions(&self) -> Stream<Action> {
        self.inner.bus.actions()
    }

    /// A dispatcher that sends straight to this context's bus.
    pub fn dispatcher(&self) -> Dispatcher {
        self.inner.bus.dispatcher()
    }

    /// Bus actions addressed to the child `token`, with the token popped.
    ///
    /// Unqualified actions reaching the child are reported on the default
    /// error channel.
    pub fn child_actions(&self, token: impl Into<Qualifier>) -> Stream<Action> {
        create_child_action_stream(&self.actions(), token, &self.inner.errors)
    }

    /// Drain coalesced emissions and deferred errors outside a dispatch.
    pub fn flush(&self) -> Result<()> {
        self.inner.scheduler.flush()
    }

    // Reducers and state

    /// Combine reducer entries using the default error channel.
    pub fn combine<S: Item>(&self, seed: S, entries: Vec<ReducerEntry<S>>) -> Fold<S> {
        combine(seed, entries, self.inner.errors.clone())
    }

    /// Ephemeral state stream folded over the bus.
    pub fn reduce_state<S: Item>(
        &self,
        name: &str,
        seed: S,
        entries: Vec<ReducerEntry<S>>,
    ) -> StateStream<S> {
        self.reduce_state_with(name, seed, entries, self.inner.errors.clone())
    }

    /// Like [`Context::reduce_state`], reporting reducer errors to `errors`
    /// instead of the context's channel.
    pub fn reduce_state_with<S: Item>(
        &self,
        name: &str,
        seed: S,
        entries: Vec<ReducerEntry<S>>,
        errors: ErrorChannel,
    ) -> StateStream<S> {
        let fold = combine(seed, entries, errors);
        crate::state::reduce_state(
            name,
            &fold,
            &self.actions(),
            &self.inner.scheduler,
            &self.inner.inspector,
        )
    }

    /// Persistent state stream, registered with the context's registry.
    ///
    /// The stream is connected when the registry starts (or immediately if
    /// it already has). Registering a name that is already taken follows the
    /// registry's duplicate rules.
    pub fn persistent_reduced_stream<S>(
        &self,
        name: &str,
        seed: S,
        entries: Vec<ReducerEntry<S>>,
        options: PersistentOptions,
    ) -> Result<PersistentStateStream<S>>
    where
        S: Item + Serialize + DeserializeOwned,
    {
        let errors = options.errors.unwrap_or_else(|| self.inner.errors.clone());
        let bus = options.bus.unwrap_or_else(|| self.inner.bus.clone());
        let stream = PersistentStateStream::new(
            name,
            combine(seed, entries, errors),
            bus,
            options.namespace,
            self.inner.inspector.clone(),
        );
        self.inner.registry.register(stream.clone())?;
        Ok(stream)
    }

    /// Wrap an arbitrary stream as a named, coalesced, ref-counted state
    /// stream. `source` must emit on subscription.
    pub fn state_stream<S: Item>(&self, name: &str, source: &Stream<S>) -> StateStream<S> {
        StateStream::new(name, source, &self.inner.scheduler, &self.inner.inspector)
    }

    /// State derived from the latest values of two streams.
    pub fn derived_stream<A, B, S, F>(
        &self,
        name: &str,
        a: &Stream<A>,
        b: &Stream<B>,
        derive: F,
    ) -> StateStream<S>
    where
        A: Item,
        B: Item,
        S: Item,
        F: Fn(A, B) -> S + Send + Sync + 'static,
    {
        let source = combine_latest(a, b).map(move |(a, b)| derive(a, b));
        self.derived(name, &source)
    }

    /// State derived from the latest values of any number of streams.
    pub fn derived_stream_all<T, S, F>(
        &self,
        name: &str,
        sources: Vec<Stream<T>>,
        derive: F,
    ) -> StateStream<S>
    where
        T: Item,
        S: Item,
        F: Fn(Vec<T>) -> S + Send + Sync + 'static,
    {
        let source = combine_latest_all(sources).map(derive);
        self.derived(name, &source)
    }

    fn derived<S: Item>(&self, name: &str, source: &Stream<S>) -> StateStream<S> {
        let state = self.state_stream(name, source);
        if self.inner.config.strict_glitches {
            self.check_glitches(&state);
        }
        state
    }

    // Routines

    /// Subscribe `routine` to the bus using the default error channel.
    pub fn subscribe_routine(&self, routine: &Routine) -> Subscription {
        subscribe_routine(&self.actions(), routine, &self.inner.errors)
    }

    /// Like [`Context::subscribe_routine`] with an explicit error channel.
    pub fn subscribe_routine_with(&self, routine: &Routine, errors: &ErrorChannel) -> Subscription {
        subscribe_routine(&self.actions(), routine, errors)
    }

    // Diagnostics

    /// Run glitch detection on `stream`'s marker and log any finding.
    pub fn check_glitches<M: Marked + ?Sized>(&self, stream: &M) -> Option<Glitch> {
        let marker = stream.marker()?;
        let glitch = detect_glitch(marker)?;
        tracing::warn!(
            stream = %marker.label(),
            paths = %glitch,
            "duplicate propagation path detected"
        );
        Some(glitch)
    }

    // Lifecycle

    /// Connect every registered persistent stream to the bus.
    pub fn start(&self, initial: Option<&Snapshot>) -> Result<()> {
        self.inner.registry.start_all(&self.inner.bus, initial)
    }

    /// Snapshot of every registered persistent stream.
    pub fn get_states(&self) -> Result<Snapshot> {
        self.inner.registry.get_states()
    }

    /// Stop every registered persistent stream and drain pending work.
    pub fn shutdown(&self) -> Result<()> {
        self.inner.registry.stop_all();
        self.flush()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("config", &self.inner.config)
            .field("scheduler", &self.inner.scheduler)
            .field("registry", &self.inner.registry)
            .finish()
    }
}
