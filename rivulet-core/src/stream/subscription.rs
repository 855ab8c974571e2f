//! Subscription handles.
//!
//! Every subscribe-like operation returns a [`Subscription`]. Dropping it (or
//! calling [`Subscription::unsubscribe`]) detaches the listener. For
//! ref-counted streams the last detach also resets the stream.

use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for an attached observer.
///
/// Used by subjects and shared streams to find the slot to remove when a
/// subscription is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

type Teardown = Box<dyn FnOnce() + Send>;

/// Handle to an active subscription.
///
/// Teardowns run in reverse order of registration, so a downstream operator
/// releases its own state before its upstream is detached.
#[must_use = "dropping a Subscription unsubscribes immediately"]
#[derive(Default)]
pub struct Subscription {
    teardowns: Vec<Teardown>,
}

impl Subscription {
    /// A subscription with nothing to tear down.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A subscription that runs `teardown` when released.
    pub fn from_fn<F>(teardown: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            teardowns: vec![Box::new(teardown)],
        }
    }

    /// Tie another subscription's lifetime to this one.
    pub fn add(&mut self, other: Subscription) {
        self.teardowns.push(Box::new(move || drop(other)));
    }

    /// Register an extra teardown callback.
    pub fn add_fn<F>(&mut self, teardown: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.teardowns.push(Box::new(teardown));
    }

    /// Detach now. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// True when there is nothing left to tear down.
    pub fn is_empty(&self) -> bool {
        self.teardowns.is_empty()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        while let Some(teardown) = self.teardowns.pop() {
            teardown();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("teardowns", &self.teardowns.len())
            .finish()
    }
}
