//! Rivulet Core
//!
//! This crate provides an in-process reactive state-derivation engine.
//! It implements:
//!
//! - A typed action bus with namespace and qualifier scoping
//! - A reducer fold engine combining independently registered reducers
//! - Ephemeral (ref-counted) and persistent (registry-backed) state streams
//! - A dependency marker graph with glitch detection
//! - Error-isolated side-effect routines
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `action`: Action records, creators and scoping helpers
//! - `stream`: Push streams, subjects, operators and the turn scheduler
//! - `bus`: The shared action channel
//! - `reducer`: Reducer entries and the fold engine
//! - `state`: State streams, the registry and snapshots
//! - `marker`: Stream provenance and glitch detection
//! - `routine`: Side-effect pipelines
//! - `context`: The injectable owner of all shared state
//!
//! # Example
//!
//! ```rust
//! use rivulet_core::{ActionCreator, Context, ReducerEntry};
//! use std::sync::{Arc, Mutex};
//!
//! let ctx = Context::default();
//! let increment_one = ActionCreator::<()>::new("increment one");
//! let increment_many = ActionCreator::<i64>::new("increment many");
//!
//! let count = ctx.reduce_state(
//!     "count",
//!     0i64,
//!     vec![
//!         ReducerEntry::on(&increment_one, |n: &i64, _: &(), _| n + 1),
//!         ReducerEntry::on(&increment_many, |n: &i64, by: &i64, _| n + by),
//!     ],
//! );
//!
//! let latest = Arc::new(Mutex::new(0));
//! let sink = latest.clone();
//! let _sub = count.subscribe(move |n| *sink.lock().unwrap() = n);
//!
//! ctx.dispatch(increment_one.empty()).unwrap();
//! ctx.dispatch(increment_many.create(5)).unwrap();
//! assert_eq!(*latest.lock().unwrap(), 6);
//! ```

pub mod action;
pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod marker;
pub mod reducer;
pub mod routine;
pub mod state;
pub mod stream;

pub use action::{Action, ActionCreator, ActionStreamExt, ActionType, Meta, Namespace, Qualifier};
pub use bus::{Bus, Dispatcher};
pub use config::{Config, Mode};
pub use context::Context;
pub use error::{BoxError, Error, Result};
pub use marker::{detect_glitch, find_marker, Glitch, Inspector, Marked, Marker, MarkerKind};
pub use reducer::{combine, Fold, ReducerEntry};
pub use routine::{collect_routines, subscribe_routine, Failure, Outcome, Routine};
pub use state::{
    PersistentOptions, PersistentStateStream, RegisteredStream, Registry, Snapshot, StateStream,
};
pub use stream::{ErrorChannel, Scheduler, Stream, Subject, Subscription};
