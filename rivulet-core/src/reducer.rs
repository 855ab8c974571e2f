//! Reducer Fold Engine
//!
//! Reducer entries map an event source to a fold function. [`combine`]
//! merges any number of entries into one synchronous accumulate-over-bus
//! operation, a [`Fold`].
//!
//! # Sources
//!
//! - Action entries are keyed by [`ActionType`]. They are gathered into one
//!   lookup table; registering two entries for the same type keeps the
//!   later fold function.
//! - Stream entries are keyed by an auxiliary [`Stream`]; every value it
//!   emits is folded.
//!
//! Updates from all sources are applied in the order they are emitted, not
//! the order entries were registered.
//!
//! # Errors
//!
//! A fold error is isolated to its event: the accumulator keeps its previous
//! value, the error goes to the fold's [`ErrorChannel`], and folding
//! continues with the next event.
//!
//! Reducers run with no lock held. An event arriving while a reducer of the
//! same subscription is running (a reducer that dispatches) is folded after
//! it, in arrival order.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::Serialize;

use crate::action::{Action, ActionCreator, ActionType, Namespace};
use crate::error::{BoxError, Error, Result};
use crate::marker::Marked;
use crate::stream::{merge, ErrorChannel, Item, Stream};

type FoldFn<S> = Arc<dyn Fn(&S, &Action) -> Result<S> + Send + Sync>;

/// A pending state transition produced by one event.
type Update<S> = Arc<dyn Fn(&S) -> Result<S> + Send + Sync>;

enum EntrySource<S> {
    Action {
        action_type: ActionType,
        fold: FoldFn<S>,
    },
    Stream {
        updates: Stream<Update<S>>,
    },
}

/// One `(event source, fold function)` registration.
pub struct ReducerEntry<S> {
    source: EntrySource<S>,
}

impl<S: Item> ReducerEntry<S> {
    /// Fold actions built by `creator`.
    ///
    /// `fold` receives the current state, the payload and the action's
    /// namespace.
    pub fn on<P, F>(creator: &ActionCreator<P>, fold: F) -> Self
    where
        P: Serialize + Send + Sync + 'static,
        F: Fn(&S, &P, Option<&Namespace>) -> S + Send + Sync + 'static,
    {
        Self::try_on(creator, move |state: &S, payload: &P, namespace: Option<&Namespace>| {
            Ok::<S, BoxError>(fold(state, payload, namespace))
        })
    }

    /// Fold actions built by `creator` with a fallible fold function.
    pub fn try_on<P, E, F>(creator: &ActionCreator<P>, fold: F) -> Self
    where
        P: Serialize + Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&S, &P, Option<&Namespace>) -> std::result::Result<S, E> + Send + Sync + 'static,
    {
        let action_type = creator.action_type().clone();
        let label = action_type.label().to_string();
        let fold: FoldFn<S> = Arc::new(move |state: &S, action: &Action| {
            let payload = action
                .payload_as::<P>()
                .ok_or_else(|| Error::reducer(label.as_str(), "payload type mismatch"))?;
            fold(state, payload, action.namespace()).map_err(|e| Error::reducer(label.as_str(), e))
        });
        Self {
            source: EntrySource::Action { action_type, fold },
        }
    }

    /// Fold every value emitted by an auxiliary stream.
    pub fn from_stream<T, F>(stream: &Stream<T>, fold: F) -> Self
    where
        T: Item,
        F: Fn(&S, &T) -> S + Send + Sync + 'static,
    {
        Self::try_from_stream(stream, move |state: &S, value: &T| {
            Ok::<S, BoxError>(fold(state, value))
        })
    }

    /// Fold every value emitted by an auxiliary stream, fallibly.
    pub fn try_from_stream<T, E, F>(stream: &Stream<T>, fold: F) -> Self
    where
        T: Item,
        E: Into<BoxError>,
        F: Fn(&S, &T) -> std::result::Result<S, E> + Send + Sync + 'static,
    {
        let label: Arc<str> = match stream.marker() {
            Some(marker) => Arc::from(marker.label()),
            None => Arc::from("stream"),
        };
        let fold = Arc::new(fold);
        let updates = stream.map(move |value: T| {
            let (fold, label) = (Arc::clone(&fold), Arc::clone(&label));
            Arc::new(move |state: &S| {
                fold(state, &value).map_err(|e| Error::reducer(&*label, e))
            }) as Update<S>
        });
        Self {
            source: EntrySource::Stream { updates },
        }
    }
}

impl<S> fmt::Debug for ReducerEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            EntrySource::Action { action_type, .. } => {
                f.debug_tuple("ReducerEntry::Action").field(action_type).finish()
            }
            EntrySource::Stream { updates } => f
                .debug_tuple("ReducerEntry::Stream")
                .field(&Marked::marker(updates).map(|m| m.label()))
                .finish(),
        }
    }
}

/// A combined reducer set with its seed state.
///
/// Applying it to an action stream produces the sequence of states. Each
/// subscription to that sequence folds independently from its starting
/// state; share the result to fold once for many subscribers.
pub struct Fold<S> {
    seed: S,
    by_type: Arc<IndexMap<ActionType, FoldFn<S>>>,
    streams: Vec<Stream<Update<S>>>,
    errors: ErrorChannel,
}

/// Combine reducer entries into a [`Fold`].
///
/// Entries registered later for an already-registered action type replace
/// the earlier fold function.
pub fn combine<S: Item>(seed: S, entries: Vec<ReducerEntry<S>>, errors: ErrorChannel) -> Fold<S> {
    let mut by_type = IndexMap::new();
    let mut streams = Vec::new();
    for entry in entries {
        match entry.source {
            EntrySource::Action { action_type, fold } => {
                by_type.insert(action_type, fold);
            }
            EntrySource::Stream { updates } => streams.push(updates),
        }
    }
    Fold {
        seed,
        by_type: Arc::new(by_type),
        streams,
        errors,
    }
}

impl<S: Item> Fold<S> {
    /// The state a stream built from this fold starts with.
    pub fn seed(&self) -> &S {
        &self.seed
    }

    /// Action types this fold reacts to, in registration order.
    pub fn action_types(&self) -> impl Iterator<Item = &ActionType> {
        self.by_type.keys()
    }

    /// Use a different error channel.
    pub fn with_errors(mut self, errors: ErrorChannel) -> Self {
        self.errors = errors;
        self
    }

    /// States folded over `actions`, starting with the seed.
    pub fn over(&self, actions: &Stream<Action>) -> Stream<S> {
        self.over_from(actions, self.seed.clone())
    }

    /// States folded over `actions`, starting with (and first emitting)
    /// `initial`.
    pub fn over_from(&self, actions: &Stream<Action>, initial: S) -> Stream<S> {
        self.updates_from(actions, initial.clone()).start_with(initial)
    }

    /// Like [`Fold::over_from`] but without emitting the starting state.
    pub fn updates_from(&self, actions: &Stream<Action>, initial: S) -> Stream<S> {
        let by_type = Arc::clone(&self.by_type);
        let from_actions = actions.filter_map(move |action: Action| {
            let fold = Arc::clone(by_type.get(action.action_type())?);
            Some(Arc::new(move |state: &S| fold(state, &action)) as Update<S>)
        });

        let mut sources = vec![from_actions];
        sources.extend(self.streams.iter().cloned());
        let updates = merge(sources);

        let errors = self.errors.clone();
        let upstream = updates.clone();
        Stream::new(move |observer| {
            let acc = Mutex::new(initial.clone());
            let backlog: Mutex<VecDeque<Update<S>>> = Mutex::new(VecDeque::new());
            let folding = AtomicBool::new(false);
            let errors = errors.clone();
            upstream.subscribe(move |update: Update<S>| {
                backlog.lock().push_back(update);
                // Re-entrant updates wait for the outer one to finish.
                if folding.swap(true, Ordering::SeqCst) {
                    return;
                }
                loop {
                    let Some(update) = backlog.lock().pop_front() else {
                        break;
                    };
                    let current = acc.lock().clone();
                    match update(&current) {
                        Ok(next) => {
                            *acc.lock() = next.clone();
                            observer(next);
                        }
                        Err(error) => {
                            tracing::debug!(%error, "fold error isolated, state unchanged");
                            errors.send(error);
                        }
                    }
                }
                folding.store(false, Ordering::SeqCst);
            })
        })
        .inherit(&updates)
    }
}

impl<S: Clone> Clone for Fold<S> {
    fn clone(&self) -> Self {
        Self {
            seed: self.seed.clone(),
            by_type: Arc::clone(&self.by_type),
            streams: self.streams.clone(),
            errors: self.errors.clone(),
        }
    }
}

impl<S: fmt::Debug> fmt::Debug for Fold<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fold")
            .field("seed", &self.seed)
            .field("action_types", &self.by_type.keys().collect::<Vec<_>>())
            .field("streams", &self.streams.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::stream::{Scheduler, Subject};

    fn collecting() -> (ErrorChannel, Arc<Mutex<Vec<Error>>>) {
        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        (ErrorChannel::new(move |e| sink.lock().push(e)), errors)
    }

    fn last<S: Item>(stream: &Stream<S>) -> (Arc<Mutex<Vec<S>>>, crate::stream::Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = stream.subscribe(move |s| sink.lock().push(s));
        (seen, sub)
    }

    #[test]
    fn increments_fold_to_six() {
        let bus = Bus::new(Scheduler::new());
        let increment_one = ActionCreator::<()>::new("increment one");
        let increment_many = ActionCreator::<i64>::new("increment many");
        let (errors, _) = collecting();

        let fold = combine(
            0i64,
            vec![
                ReducerEntry::on(&increment_one, |s: &i64, _: &(), _| s + 1),
                ReducerEntry::on(&increment_many, |s: &i64, n: &i64, _| s + n),
            ],
            errors,
        );
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(increment_one.empty()).unwrap();
        bus.dispatch(increment_many.create(5)).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 6]);
    }

    #[test]
    fn unknown_actions_pass_through_without_emission() {
        let bus = Bus::new(Scheduler::new());
        let known = ActionCreator::<()>::new("known");
        let unknown = ActionCreator::<()>::new("unknown");
        let (errors, _) = collecting();

        let fold = combine(0, vec![ReducerEntry::on(&known, |s: &i32, _: &(), _| s + 1)], errors);
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(unknown.empty()).unwrap();
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn failing_fold_is_isolated() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let explode = ActionCreator::<()>::new("explode");
        let (errors, received) = collecting();

        let fold = combine(
            0,
            vec![
                ReducerEntry::on(&add, |s: &i32, n: &i32, _| s + n),
                ReducerEntry::try_on(&explode, |_: &i32, _: &(), _| Err("boom")),
            ],
            errors,
        );
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(add.create(1)).unwrap();
        bus.dispatch(explode.empty()).unwrap();
        bus.dispatch(add.create(2)).unwrap();

        assert_eq!(seen.lock().last(), Some(&3));
        assert_eq!(received.lock().len(), 1);
        assert!(received.lock()[0].to_string().contains("explode"));
    }

    #[test]
    fn later_registration_for_same_type_wins() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let (errors, _) = collecting();

        let fold = combine(
            0,
            vec![
                ReducerEntry::on(&add, |s: &i32, n: &i32, _| s + n),
                ReducerEntry::on(&add, |s: &i32, n: &i32, _| s + n * 100),
            ],
            errors,
        );
        assert_eq!(fold.action_types().count(), 1);
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(add.create(1)).unwrap();
        assert_eq!(seen.lock().last(), Some(&100));
    }

    #[test]
    fn reducer_receives_namespace() {
        let bus = Bus::new(Scheduler::new());
        let tag = ActionCreator::<()>::new("tag");
        let (errors, _) = collecting();

        let fold = combine(
            String::new(),
            vec![ReducerEntry::on(&tag, |_: &String, _: &(), ns: Option<&Namespace>| {
                ns.map(|ns| ns.to_string()).unwrap_or_default()
            })],
            errors,
        );
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch_namespaced(tag.empty(), "left").unwrap();
        assert_eq!(seen.lock().last().map(String::as_str), Some("left"));
    }

    #[test]
    fn stream_entries_interleave_in_emission_order() {
        let bus = Bus::new(Scheduler::new());
        let push = ActionCreator::<char>::new("push");
        let aux = Subject::new();
        let (errors, _) = collecting();

        let fold = combine(
            String::new(),
            vec![
                ReducerEntry::on(&push, |s: &String, c: &char, _| format!("{s}{c}")),
                ReducerEntry::from_stream(&aux.as_stream(), |s: &String, c: &char| {
                    format!("{s}{}", c.to_ascii_uppercase())
                }),
            ],
            errors,
        );
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(push.create('a')).unwrap();
        aux.next('b');
        bus.dispatch(push.create('c')).unwrap();
        assert_eq!(seen.lock().last().map(String::as_str), Some("aBc"));
    }

    #[test]
    fn each_subscription_folds_from_its_own_start() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let (errors, _) = collecting();
        let fold = combine(0, vec![ReducerEntry::on(&add, |s: &i32, n: &i32, _| s + n)], errors);

        let (first, _a) = last(&fold.over(&bus.actions()));
        bus.dispatch(add.create(2)).unwrap();
        let (second, _b) = last(&fold.over_from(&bus.actions(), 10));
        bus.dispatch(add.create(1)).unwrap();

        assert_eq!(*first.lock(), vec![0, 2, 3]);
        assert_eq!(*second.lock(), vec![10, 11]);
    }

    #[test]
    fn reentrant_dispatch_from_reducer_folds_in_order() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let (nested, again) = (bus.clone(), add.clone());
        let fold = combine(
            0,
            vec![ReducerEntry::on(&add, move |s: &i32, n: &i32, _| {
                if *n == 1 {
                    nested.dispatch(again.create(10)).unwrap();
                }
                s + n
            })],
            ErrorChannel::log_only(),
        );
        let (seen, _sub) = last(&fold.over(&bus.actions()));

        bus.dispatch(add.create(1)).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 11]);
    }
}
