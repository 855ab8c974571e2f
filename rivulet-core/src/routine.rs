//! Routines
//!
//! A routine is a side-effect pipeline over the action stream: it reacts to
//! actions by calling out, logging, or dispatching further actions. Its
//! output is one [`Outcome`] per handled action.
//!
//! # Error isolation
//!
//! A [`Failure`] from a routine is wrapped as [`Error::Routine`] and sent to
//! the routine's error channel. The subscription is unaffected, so one bad
//! action never stops the routine from seeing the next.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;

use crate::action::{Action, ActionCreator, ActionStreamExt};
use crate::error::{BoxError, Error};
use crate::stream::{merge, ErrorChannel, Stream, Subscription};

/// Per-action outcome of a routine.
pub type Outcome = Result<(), Failure>;

/// A routine failure as it travels through the pipeline.
///
/// Outcomes are stream values and must be cheap to clone, so the user error
/// is held behind an `Arc`. `routine` is set by the innermost routine that
/// reported it; outer layers leave it alone.
#[derive(Clone)]
pub struct Failure {
    routine: Option<Arc<str>>,
    error: Arc<dyn std::error::Error + Send + Sync + 'static>,
}

impl Failure {
    /// Wrap a user error that no routine has claimed yet.
    pub fn new(error: impl Into<BoxError>) -> Self {
        let error: BoxError = error.into();
        Self {
            routine: None,
            error: Arc::from(error),
        }
    }

    /// Name of the routine the failure came from, once one has claimed it.
    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }

    fn claimed_by(mut self, routine: &Arc<str>) -> Self {
        if self.routine.is_none() {
            self.routine = Some(Arc::clone(routine));
        }
        self
    }

    fn into_error(self, fallback: &Arc<str>) -> Error {
        let routine = self.routine.unwrap_or_else(|| Arc::clone(fallback));
        Error::routine(&*routine, Box::new(self.error) as BoxError)
    }
}

impl fmt::Debug for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Failure")
            .field("routine", &self.routine)
            .field("error", &self.error.to_string())
            .finish()
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.routine {
            Some(routine) => write!(f, "routine `{routine}`: {}", self.error),
            None => write!(f, "{}", self.error),
        }
    }
}

type Pipeline = Arc<dyn Fn(&Stream<Action>) -> Stream<Outcome> + Send + Sync>;

#[derive(Clone)]
pub struct Routine {
    name: Arc<str>,
    pipeline: Pipeline,
}

impl Routine {
    /// Build a routine from an arbitrary pipeline over the action stream.
    pub fn new<F>(name: &str, pipeline: F) -> Self
    where
        F: Fn(&Stream<Action>) -> Stream<Outcome> + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            pipeline: Arc::new(pipeline),
        }
    }

    /// Run `handler` for every action built by `creator`.
    pub fn on<P, E, F>(name: &str, creator: &ActionCreator<P>, handler: F) -> Self
    where
        P: Serialize + Send + Sync + 'static,
        E: Into<BoxError>,
        F: Fn(&P, &Action) -> Result<(), E> + Send + Sync + 'static,
    {
        let creator = creator.clone();
        let handler = Arc::new(handler);
        Self::new(name, move |actions| {
            let handler = Arc::clone(&handler);
            let label = creator.action_type().label().to_string();
            actions.of_type(&creator).map(move |action: Action| -> Outcome {
                let payload = action.payload_as::<P>().ok_or_else(|| {
                    Failure::new(format!("payload of `{label}` has unexpected type"))
                })?;
                handler(payload, &action).map_err(Failure::new)
            })
        })
    }

    /// Same pipeline under a different name.
    pub fn named(mut self, name: &str) -> Self {
        self.name = Arc::from(name);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Apply the pipeline to `actions`.
    pub fn run(&self, actions: &Stream<Action>) -> Stream<Outcome> {
        (self.pipeline)(actions)
    }
}

impl fmt::Debug for Routine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routine").field("name", &self.name).finish()
    }
}

/// Subscribe `routine` to `actions`, sending its failures to `errors`.
pub fn subscribe_routine(
    actions: &Stream<Action>,
    routine: &Routine,
    errors: &ErrorChannel,
) -> Subscription {
    let errors = errors.clone();
    let name = Arc::clone(&routine.name);
    tracing::debug!(routine = %name, "routine subscribed");
    routine.run(actions).subscribe(move |outcome: Outcome| {
        if let Err(failure) = outcome {
            errors.send(failure.into_error(&name));
        }
    })
}

/// Merge several routines into one that subscribes to the action stream
/// once and fans out to each of them.
///
/// Failures keep the name of the routine they came from, not `name`.
pub fn collect_routines(name: &str, routines: Vec<Routine>) -> Routine {
    Routine::new(name, move |actions| {
        let shared = actions.share();
        merge(
            routines
                .iter()
                .map(|routine| {
                    let inner = Arc::clone(&routine.name);
                    routine.run(&shared).map(move |outcome: Outcome| {
                        outcome.map_err(|failure| failure.claimed_by(&inner))
                    })
                })
                .collect(),
        )
    })
}
