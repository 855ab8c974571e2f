//! Hot multicast subject.
//!
//! A [`Subject`] pushes each value to every attached observer, synchronously
//! and in attach order. It keeps no history.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::subscription::{ObserverId, Subscription};
use super::{Item, Observer, Stream};

/// One attached observer.
///
/// `active` is flipped before the slot is removed so an observer detached in
/// the middle of an emission is not called with the rest of it.
pub(crate) struct Slot<T> {
    pub(crate) id: ObserverId,
    pub(crate) active: Arc<AtomicBool>,
    pub(crate) observer: Observer<T>,
}

impl<T> Slot<T> {
    pub(crate) fn new(observer: Observer<T>) -> Self {
        Self {
            id: ObserverId::new(),
            active: Arc::new(AtomicBool::new(true)),
            observer,
        }
    }

    pub(crate) fn target(&self) -> (Arc<AtomicBool>, Observer<T>) {
        (Arc::clone(&self.active), Arc::clone(&self.observer))
    }
}

/// Call every still-active target with a clone of `value`.
///
/// Callers collect targets under their lock and release it before calling
/// this, so observers may re-enter.
pub(crate) fn deliver<T: Item>(targets: Vec<(Arc<AtomicBool>, Observer<T>)>, value: T) {
    for (active, observer) in targets {
        if active.load(Ordering::SeqCst) {
            observer(value.clone());
        }
    }
}

/// A hot, multicast source of values.
pub struct Subject<T> {
    slots: Arc<Mutex<Vec<Slot<T>>>>,
}

impl<T: Item> Subject<T> {
    /// Create a subject with no observers.
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Push `value` to every attached observer.
    pub fn next(&self, value: T) {
        let targets: Vec<_> = self.slots.lock().iter().map(Slot::target).collect();
        deliver(targets, value);
    }

    /// Attach a listener directly.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        attach(&self.slots, Arc::new(observer))
    }

    /// View this subject as an (unmarked) stream.
    pub fn as_stream(&self) -> Stream<T> {
        let slots = Arc::clone(&self.slots);
        Stream::new(move |observer| attach(&slots, observer))
    }

    /// Detach every observer.
    pub fn clear(&self) {
        let drained: Vec<_> = self.slots.lock().drain(..).collect();
        for slot in drained {
            slot.active.store(false, Ordering::SeqCst);
        }
    }

    /// Number of live observers.
    pub fn observer_count(&self) -> usize {
        self.slots.lock().len()
    }
}

fn attach<T: Item>(slots: &Arc<Mutex<Vec<Slot<T>>>>, observer: Observer<T>) -> Subscription {
    let slot = Slot::new(observer);
    let id = slot.id;
    let active = Arc::clone(&slot.active);
    slots.lock().push(slot);

    let slots = Arc::clone(slots);
    Subscription::from_fn(move || {
        active.store(false, Ordering::SeqCst);
        slots.lock().retain(|slot| slot.id != id);
    })
}

impl<T: Item> Default for Subject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Subject<T> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
        }
    }
}
