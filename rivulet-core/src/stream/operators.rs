//! Stream operators.
//!
//! Unary transforms (`map`, `filter`, `filter_map`, `scan`, `start_with`)
//! are marker-transparent: the result carries its input's marker. Operators
//! that join or reshape timing (`merge`, `combine_latest`, `zip`,
//! `with_latest_from`, `debounce`) attach a new marker whose sources are the
//! markers of their inputs, recorded at construction time.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::marker::{Inspector, Marker, MarkerKind};

use super::{Item, Scheduler, Stream, Subscription};

impl<T: Item> Stream<T> {
    /// Transform each value with `f`.
    pub fn map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Item,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        Stream::new(move |observer| {
            let f = Arc::clone(&f);
            upstream.subscribe(move |value| observer(f(value)))
        })
        .inherit(self)
    }

    /// Keep only the values `predicate` accepts.
    pub fn filter<F>(&self, predicate: F) -> Stream<T>
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let predicate = Arc::new(predicate);
        Stream::new(move |observer| {
            let predicate = Arc::clone(&predicate);
            upstream.subscribe(move |value| {
                if predicate(&value) {
                    observer(value);
                }
            })
        })
        .inherit(self)
    }

    pub fn filter_map<U, F>(&self, f: F) -> Stream<U>
    where
        U: Item,
        F: Fn(T) -> Option<U> + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        Stream::new(move |observer| {
            let f = Arc::clone(&f);
            upstream.subscribe(move |value| {
                if let Some(mapped) = f(value) {
                    observer(mapped);
                }
            })
        })
        .inherit(self)
    }

    /// Accumulate values, emitting every intermediate accumulator.
    ///
    /// Each subscription starts from its own copy of `seed`. The seed itself
    /// is not emitted.
    pub fn scan<S, F>(&self, seed: S, f: F) -> Stream<S>
    where
        S: Item,
        F: Fn(&S, T) -> S + Send + Sync + 'static,
    {
        let upstream = self.clone();
        let f = Arc::new(f);
        Stream::new(move |observer| {
            let f = Arc::clone(&f);
            let acc = Mutex::new(seed.clone());
            upstream.subscribe(move |value| {
                let current = acc.lock().clone();
                let next = f(&current, value);
                *acc.lock() = next.clone();
                observer(next);
            })
        })
        .inherit(self)
    }

    /// Emit `first` synchronously on subscription, then everything upstream.
    pub fn start_with(&self, first: T) -> Stream<T> {
        let upstream = self.clone();
        Stream::new(move |observer| {
            observer(first.clone());
            upstream.subscribe_observer(observer)
        })
        .inherit(self)
    }

    /// Pair each value with the latest value of `other`.
    ///
    /// `other` is informational: it never triggers an emission and is
    /// recorded as a dependency, not a source. Values arriving before
    /// `other` has produced anything are dropped.
    pub fn with_latest_from<U: Item>(&self, other: &Stream<U>) -> Stream<(T, U)> {
        let upstream = self.clone();
        let other_stream = other.clone();
        let marker = Marker::with_dependencies(
            MarkerKind::WithLatestFrom,
            vec![self.marker.clone()],
            vec![other.marker.clone()],
        );

        Stream::new(move |observer| {
            let latest: Arc<Mutex<Option<U>>> = Arc::new(Mutex::new(None));

            let mut subscription = Subscription::empty();
            let slot = Arc::clone(&latest);
            subscription.add(other_stream.subscribe(move |value| {
                *slot.lock() = Some(value);
            }));
            subscription.add(upstream.subscribe(move |value| {
                let paired = latest.lock().clone();
                if let Some(other) = paired {
                    observer((value, other));
                }
            }));
            subscription
        })
        .with_marker(Some(marker))
    }

    /// Zero-delay debounce.
    ///
    /// Values produced while a subscriber is attaching pass through
    /// synchronously, so subscribers always see a first value immediately.
    /// Later values are held and only the last one per turn is delivered,
    /// when `scheduler` reaches its flush point. A value arriving outside
    /// any turn is its own turn and is delivered at once.
    pub fn debounce(&self, scheduler: &Scheduler) -> Stream<T> {
        let upstream = self.clone();
        let scheduler = scheduler.clone();
        let marker = Marker::derived(MarkerKind::Debounce, vec![self.marker.clone()]);

        Stream::new(move |observer| {
            let state = Arc::new(DebounceState::<T> {
                pending: Mutex::new(None),
                scheduled: AtomicBool::new(false),
                attaching: AtomicBool::new(true),
                closed: AtomicBool::new(false),
            });

            let inner = Arc::clone(&state);
            let scheduler = scheduler.clone();
            let mut subscription = upstream.subscribe(move |value| {
                if inner.attaching.load(Ordering::SeqCst) {
                    observer(value);
                    return;
                }
                *inner.pending.lock() = Some(value);
                if inner.scheduled.swap(true, Ordering::SeqCst) {
                    return;
                }
                let flush = Arc::clone(&inner);
                let observer = Arc::clone(&observer);
                scheduler.schedule(move || {
                    flush.scheduled.store(false, Ordering::SeqCst);
                    if flush.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    let latest = flush.pending.lock().take();
                    if let Some(value) = latest {
                        observer(value);
                    }
                });
            });
            state.attaching.store(false, Ordering::SeqCst);

            subscription.add_fn(move || {
                state.closed.store(true, Ordering::SeqCst);
                state.pending.lock().take();
            });
            subscription
        })
        .with_marker(Some(marker))
    }

    /// Attach a [`MarkerKind::Name`] marker, making this stream a named node
    /// in the marker graph.
    pub fn mark_name(&self, name: &str) -> Stream<T> {
        let marker = Marker::named(MarkerKind::Name, name, vec![self.marker.clone()]);
        self.clone().with_marker(Some(marker))
    }

    /// Report this stream's marker to `inspector` each time it gains a
    /// subscriber.
    pub fn observed(&self, inspector: &Inspector) -> Stream<T> {
        let upstream = self.clone();
        let inspector = inspector.clone();
        let marker = self.marker.clone();
        Stream::new(move |observer| {
            if let Some(marker) = &marker {
                inspector.notify(marker);
            }
            upstream.subscribe_observer(observer)
        })
        .inherit(self)
    }
}

struct DebounceState<T> {
    pending: Mutex<Option<T>>,
    scheduled: AtomicBool,
    attaching: AtomicBool,
    closed: AtomicBool,
}

/// Interleave values from every input in emission order.
pub fn merge<T: Item>(streams: Vec<Stream<T>>) -> Stream<T> {
    if streams.len() == 1 {
        return streams.into_iter().next().unwrap_or_else(Stream::never);
    }
    let marker = Marker::derived(
        MarkerKind::Merge,
        streams.iter().map(|s| s.marker.clone()).collect(),
    );
    Stream::new(move |observer| {
        let mut subscription = Subscription::empty();
        for stream in &streams {
            subscription.add(stream.subscribe_observer(Arc::clone(&observer)));
        }
        subscription
    })
    .with_marker(Some(marker))
}

/// Emit the pair of latest values whenever either side emits, once both
/// have produced something.
pub fn combine_latest<A: Item, B: Item>(a: &Stream<A>, b: &Stream<B>) -> Stream<(A, B)> {
    let (left, right) = (a.clone(), b.clone());
    let marker = Marker::derived(
        MarkerKind::Combine,
        vec![a.marker.clone(), b.marker.clone()],
    );

    Stream::new(move |observer| {
        let latest: Arc<Mutex<(Option<A>, Option<B>)>> = Arc::new(Mutex::new((None, None)));

        let mut subscription = Subscription::empty();
        let (slot, emit) = (Arc::clone(&latest), Arc::clone(&observer));
        subscription.add(left.subscribe(move |value| {
            let pair = {
                let mut latest = slot.lock();
                latest.0 = Some(value);
                both(&latest)
            };
            if let Some(pair) = pair {
                emit(pair);
            }
        }));
        subscription.add(right.subscribe(move |value| {
            let pair = {
                let mut latest = latest.lock();
                latest.1 = Some(value);
                both(&latest)
            };
            if let Some(pair) = pair {
                observer(pair);
            }
        }));
        subscription
    })
    .with_marker(Some(marker))
}

fn both<A: Clone, B: Clone>(latest: &(Option<A>, Option<B>)) -> Option<(A, B)> {
    match latest {
        (Some(a), Some(b)) => Some((a.clone(), b.clone())),
        _ => None,
    }
}

/// Homogeneous variant of [`combine_latest`] over any number of inputs.
pub fn combine_latest_all<T: Item>(streams: Vec<Stream<T>>) -> Stream<Vec<T>> {
    let marker = Marker::derived(
        MarkerKind::Combine,
        streams.iter().map(|s| s.marker.clone()).collect(),
    );

    Stream::new(move |observer| {
        if streams.is_empty() {
            observer(Vec::new());
            return Subscription::empty();
        }
        let latest: Arc<Mutex<Vec<Option<T>>>> = Arc::new(Mutex::new(vec![None; streams.len()]));

        let mut subscription = Subscription::empty();
        for (index, stream) in streams.iter().enumerate() {
            let latest = Arc::clone(&latest);
            let observer = Arc::clone(&observer);
            subscription.add(stream.subscribe(move |value| {
                let all = {
                    let mut latest = latest.lock();
                    latest[index] = Some(value);
                    latest.iter().cloned().collect::<Option<Vec<T>>>()
                };
                if let Some(all) = all {
                    observer(all);
                }
            }));
        }
        subscription
    })
    .with_marker(Some(marker))
}

/// Pair values by arrival index.
pub fn zip<A: Item, B: Item>(a: &Stream<A>, b: &Stream<B>) -> Stream<(A, B)> {
    let (left, right) = (a.clone(), b.clone());
    let marker = Marker::derived(MarkerKind::Zip, vec![a.marker.clone(), b.marker.clone()]);

    Stream::new(move |observer| {
        let queues: Arc<Mutex<(VecDeque<A>, VecDeque<B>)>> =
            Arc::new(Mutex::new((VecDeque::new(), VecDeque::new())));

        let mut subscription = Subscription::empty();
        let (slot, emit) = (Arc::clone(&queues), Arc::clone(&observer));
        subscription.add(left.subscribe(move |value| {
            let pair = {
                let mut queues = slot.lock();
                queues.0.push_back(value);
                pop_pair(&mut queues)
            };
            if let Some(pair) = pair {
                emit(pair);
            }
        }));
        subscription.add(right.subscribe(move |value| {
            let pair = {
                let mut queues = queues.lock();
                queues.1.push_back(value);
                pop_pair(&mut queues)
            };
            if let Some(pair) = pair {
                observer(pair);
            }
        }));
        subscription
    })
    .with_marker(Some(marker))
}

fn pop_pair<A, B>(queues: &mut (VecDeque<A>, VecDeque<B>)) -> Option<(A, B)> {
    if queues.0.is_empty() || queues.1.is_empty() {
        return None;
    }
    Some((queues.0.pop_front()?, queues.1.pop_front()?))
}
