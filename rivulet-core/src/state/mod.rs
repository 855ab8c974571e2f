//! State Streams
//!
//! A state stream wraps the output of a [`Fold`] in a hot container that
//! always has a value.
//!
//! # Lifecycles
//!
//! ## Ephemeral ([`StateStream`])
//!
//! Ref-counted. The fold starts when the first subscriber arrives and is
//! shared by every later one, each of which immediately receives the latest
//! value. When the last subscriber leaves, the stream forgets everything; the
//! next first subscriber starts again from the seed.
//!
//! ## Persistent ([`PersistentStateStream`])
//!
//! Explicit. `connect` starts folding, and folding continues with or without
//! subscribers until `stop_reducing` or the permanent `unsubscribe`. The
//! current value is readable at any time through `state`. Persistent
//! streams are usually tracked by a [`Registry`] which starts, stops and
//! snapshots all of them together.
//!
//! # Coalescing
//!
//! Both forms deliver at most one value per turn to their subscribers: the
//! state as it stands at the flush point. Several updates triggered by one
//! dispatch (a diamond in the stream graph, or re-entrant dispatches) are
//! observed as one.

mod persistent;
mod registry;
mod snapshot;

use std::fmt;
use std::sync::Arc;

use crate::action::Action;
use crate::marker::{Inspector, Marked, Marker};
use crate::reducer::Fold;
use crate::stream::{Item, Scheduler, Stream, Subscription};

pub use persistent::{PersistentOptions, PersistentStateStream};
pub use registry::{RegisteredStream, Registry};
pub use snapshot::Snapshot;

/// Ephemeral, named, ref-counted state stream.
pub struct StateStream<S> {
    name: Arc<str>,
    stream: Stream<S>,
}

impl<S: Item> StateStream<S> {
    /// Wrap `source` as a named state stream.
    ///
    /// `source` must emit synchronously on subscription; the first value is
    /// passed through immediately and later values are coalesced per turn.
    pub fn new(
        name: &str,
        source: &Stream<S>,
        scheduler: &Scheduler,
        inspector: &Inspector,
    ) -> Self {
        let stream = source
            .debounce(scheduler)
            .mark_name(name)
            .share_replay()
            .observed(inspector);
        Self {
            name: Arc::from(name),
            stream,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Subscribe with a closure. The current state is delivered immediately.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(S) + Send + Sync + 'static,
    {
        self.stream.subscribe(observer)
    }

    /// The underlying shared stream, for composing further.
    pub fn as_stream(&self) -> Stream<S> {
        self.stream.clone()
    }
}

/// Fold `actions` into an ephemeral state stream named `name`.
pub fn reduce_state<S: Item>(
    name: &str,
    fold: &Fold<S>,
    actions: &Stream<Action>,
    scheduler: &Scheduler,
    inspector: &Inspector,
) -> StateStream<S> {
    StateStream::new(name, &fold.over(actions), scheduler, inspector)
}

impl<S> Clone for StateStream<S> {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            stream: self.stream.clone(),
        }
    }
}

impl<S> Marked for StateStream<S> {
    fn marker(&self) -> Option<&Arc<Marker>> {
        Marked::marker(&self.stream)
    }
}

impl<S> fmt::Debug for StateStream<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateStream").field("name", &self.name).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::ActionCreator;
    use crate::bus::Bus;
    use crate::marker::MarkerKind;
    use crate::reducer::{combine, ReducerEntry};
    use crate::stream::{ErrorChannel, Subject};
    use parking_lot::Mutex;

    fn counter(bus: &Bus, add: &ActionCreator<i32>) -> StateStream<i32> {
        let fold = combine(
            0,
            vec![ReducerEntry::on(add, |s: &i32, n: &i32, _| s + n)],
            ErrorChannel::log_only(),
        );
        reduce_state("counter", &fold, &bus.actions(), bus.scheduler(), &Inspector::new())
    }

    fn record(stream: &StateStream<i32>) -> (Arc<Mutex<Vec<i32>>>, Subscription) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = stream.subscribe(move |v| sink.lock().push(v));
        (seen, sub)
    }

    #[test]
    fn emits_seed_synchronously_on_subscribe() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let (seen, _sub) = record(&counter(&bus, &add));
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn late_subscriber_gets_latest_and_fold_runs_once() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let state = counter(&bus, &add);

        let (first, _a) = record(&state);
        bus.dispatch(add.create(2)).unwrap();
        let (second, _b) = record(&state);
        bus.dispatch(add.create(3)).unwrap();

        assert_eq!(*first.lock(), vec![0, 2, 5]);
        assert_eq!(*second.lock(), vec![2, 5]);
        assert_eq!(bus.listener_count(), 1);
    }

    #[test]
    fn resets_to_seed_after_last_unsubscribe() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let state = counter(&bus, &add);

        let (_, sub) = record(&state);
        bus.dispatch(add.create(7)).unwrap();
        drop(sub);
        assert_eq!(bus.listener_count(), 0);

        let (seen, _sub) = record(&state);
        assert_eq!(*seen.lock(), vec![0]);
    }

    #[test]
    fn same_turn_updates_are_coalesced() {
        let scheduler = Scheduler::new();
        let subject = Subject::new();
        let source = subject.as_stream().scan(0, |acc, v: i32| acc + v).start_with(0);
        let state = StateStream::new("sum", &source, &scheduler, &Inspector::new());
        let (seen, _sub) = record(&state);

        scheduler
            .turn(|| {
                subject.next(1);
                subject.next(2);
            })
            .unwrap();
        assert_eq!(*seen.lock(), vec![0, 3]);
    }

    #[test]
    fn carries_a_named_marker() {
        let bus = Bus::new(Scheduler::new());
        let add = ActionCreator::<i32>::new("add");
        let state = counter(&bus, &add);
        let marker = Marked::marker(&state).unwrap();
        assert_eq!(marker.kind(), MarkerKind::Name);
        assert_eq!(marker.name(), Some("counter"));
    }

    #[test]
    fn auxiliary_source_outside_dispatch_is_delivered() {
        let bus = Bus::new(Scheduler::new());
        let aux = Subject::new();
        let fold = combine(
            0,
            vec![ReducerEntry::from_stream(&aux.as_stream(), |s: &i32, n: &i32| s + n)],
            ErrorChannel::log_only(),
        );
        let state =
            reduce_state("aux", &fold, &bus.actions(), bus.scheduler(), &Inspector::new());
        let (seen, _sub) = record(&state);

        aux.next(5);
        assert_eq!(*seen.lock(), vec![0, 5]);

        bus.scheduler()
            .turn(|| {
                aux.next(1);
                aux.next(1);
            })
            .unwrap();
        assert_eq!(*seen.lock(), vec![0, 5, 7]);
    }
}
