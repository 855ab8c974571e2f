//! Push Streams
//!
//! This module implements the small push-based stream toolkit the rest of
//! the crate is built on.
//!
//! # Concepts
//!
//! ## Streams
//!
//! A [`Stream`] is a cold description of a source of values. Nothing
//! happens until it is subscribed; each subscription runs the source anew.
//! Every stream may carry a [`Marker`] describing how it was built.
//!
//! ## Subjects
//!
//! A [`Subject`] is hot: it multicasts values pushed into it to whoever is
//! attached at the time. The action bus is a subject.
//!
//! ## Sharing
//!
//! [`Stream::share_replay`] turns a cold stream into a ref-counted hot one
//! that replays its latest value and resets when the last subscriber leaves.
//!
//! ## Turns and coalescing
//!
//! The [`Scheduler`] groups synchronous work into turns. [`Stream::debounce`]
//! collapses all values produced within a turn to the last one, delivered
//! when the outermost turn ends.
//!
//! # Implementation Notes
//!
//! Values are delivered synchronously on the caller's stack. Locks guard
//! operator state but are never held while an observer runs, so observers
//! may dispatch or subscribe re-entrantly.

mod channel;
mod operators;
mod scheduler;
mod share;
mod subject;
mod subscription;

use std::sync::Arc;

use crate::marker::{Marked, Marker};

pub use channel::ErrorChannel;
pub use operators::{combine_latest, combine_latest_all, merge, zip};
pub use scheduler::Scheduler;
pub use subject::Subject;
pub use subscription::{ObserverId, Subscription};

pub(crate) use subject::{deliver, Slot};

/// Bound required of every value flowing through a stream.
pub trait Item: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> Item for T {}

/// Receiver of stream values.
pub type Observer<T> = Arc<dyn Fn(T) + Send + Sync>;

type Source<T> = Arc<dyn Fn(Observer<T>) -> Subscription + Send + Sync>;

/// A cold, subscribable source of values carrying an optional [`Marker`].
pub struct Stream<T> {
    source: Source<T>,
    marker: Option<Arc<Marker>>,
}

impl<T: Item> Stream<T> {
    /// Create a stream from a subscribe function.
    ///
    /// The function receives the observer and returns the handle that
    /// releases whatever it attached.
    pub fn new<F>(subscribe: F) -> Self
    where
        F: Fn(Observer<T>) -> Subscription + Send + Sync + 'static,
    {
        Self {
            source: Arc::new(subscribe),
            marker: None,
        }
    }

    /// A stream that emits `values` synchronously on each subscription.
    pub fn of(values: Vec<T>) -> Self {
        Self::new(move |observer| {
            for value in &values {
                observer(value.clone());
            }
            Subscription::empty()
        })
    }

    /// A stream that never emits.
    pub fn never() -> Self {
        Self::new(|_| Subscription::empty())
    }

    /// Subscribe with a closure called for every value.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        (self.source)(Arc::new(observer))
    }

    pub fn subscribe_observer(&self, observer: Observer<T>) -> Subscription {
        (self.source)(observer)
    }

    /// This stream's marker, if markers are enabled for it.
    pub fn marker(&self) -> Option<&Arc<Marker>> {
        self.marker.as_ref()
    }

    /// Replace the attached marker.
    pub fn with_marker(mut self, marker: Option<Arc<Marker>>) -> Self {
        self.marker = marker;
        self
    }

    /// Carry over the marker of `upstream`; used by marker-transparent
    /// operators.
    pub(crate) fn inherit<U>(self, upstream: &Stream<U>) -> Self {
        self.with_marker(upstream.marker.clone())
    }
}

impl<T> Clone for Stream<T> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            marker: self.marker.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Stream<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stream")
            .field("marker", &self.marker)
            .finish_non_exhaustive()
    }
}

impl<T> Marked for Stream<T> {
    fn marker(&self) -> Option<&Arc<Marker>> {
        self.marker.as_ref()
    }
}
