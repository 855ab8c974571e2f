//! Ref-counted sharing.
//!
//! A shared stream subscribes to its source once, when the first subscriber
//! arrives, and multicasts to everyone attached. When the last subscriber
//! leaves the source subscription is released and, for the replaying
//! variant, the cached latest value is forgotten. A later first subscriber
//! starts the source again from scratch.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::{deliver, Item, Slot, Stream, Subscription};

struct ShareState<T> {
    slots: Vec<Slot<T>>,
    latest: Option<T>,
    upstream: Option<Subscription>,
    connecting: bool,
}

impl<T: Item> Stream<T> {
    /// Multicast with ref-counting and no replay.
    pub fn share(&self) -> Stream<T> {
        shared(self, false)
    }

    /// Multicast with ref-counting, replaying the latest value to late
    /// subscribers. Resets when the subscriber count drops to zero.
    pub fn share_replay(&self) -> Stream<T> {
        shared(self, true)
    }
}

fn shared<T: Item>(source: &Stream<T>, replay: bool) -> Stream<T> {
    let upstream = source.clone();
    let state = Arc::new(Mutex::new(ShareState::<T> {
        slots: Vec::new(),
        latest: None,
        upstream: None,
        connecting: false,
    }));

    Stream::new(move |observer| {
        let slot = Slot::new(Arc::clone(&observer));
        let (id, active) = (slot.id, Arc::clone(&slot.active));

        let (cached, connect) = {
            let mut st = state.lock();
            st.slots.push(slot);
            let connect = st.upstream.is_none() && !st.connecting;
            if connect {
                st.connecting = true;
            }
            (st.latest.clone(), connect)
        };

        if connect {
            tracing::trace!("shared stream connecting to source");
            let inner = Arc::clone(&state);
            let subscription = upstream.subscribe(move |value: T| {
                let targets: Vec<_> = {
                    let mut st = inner.lock();
                    if replay {
                        st.latest = Some(value.clone());
                    }
                    st.slots.iter().map(Slot::target).collect()
                };
                deliver(targets, value);
            });

            let orphaned = {
                let mut st = state.lock();
                st.connecting = false;
                if st.slots.is_empty() {
                    st.latest = None;
                    Some(subscription)
                } else {
                    st.upstream = Some(subscription);
                    None
                }
            };
            drop(orphaned);
        } else if let Some(value) = cached.filter(|_| replay) {
            observer(value);
        }

        let state = Arc::clone(&state);
        Subscription::from_fn(move || {
            active.store(false, Ordering::SeqCst);
            let released = {
                let mut st = state.lock();
                st.slots.retain(|slot| slot.id != id);
                if st.slots.is_empty() && !st.connecting {
                    st.latest = None;
                    st.upstream.take()
                } else {
                    None
                }
            };
            if released.is_some() {
                tracing::trace!("shared stream reset after last unsubscribe");
            }
            drop(released);
        })
    })
    .inherit(source)
}
