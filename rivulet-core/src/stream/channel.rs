//! Error channels.
//!
//! Reducers and routines never unwind through a dispatch. Their failures are
//! sent to an [`ErrorChannel`] instead. The default channel defers the error
//! to the end of the current turn so the dispatch in progress completes
//! first.

use std::sync::Arc;

use crate::error::Error;

use super::Scheduler;

/// Sink for isolated per-event errors.
#[derive(Clone)]
pub struct ErrorChannel {
    sink: Arc<dyn Fn(Error) + Send + Sync>,
}

impl ErrorChannel {
    /// Route errors to an arbitrary sink.
    pub fn new<F>(sink: F) -> Self
    where
        F: Fn(Error) + Send + Sync + 'static,
    {
        Self {
            sink: Arc::new(sink),
        }
    }

    /// Defer errors to the end of the outermost turn on `scheduler`, where
    /// they are returned as [`Error::Uncaught`].
    pub fn rethrow(scheduler: &Scheduler) -> Self {
        let scheduler = scheduler.clone();
        Self::new(move |error| {
            tracing::error!(%error, "unhandled error, deferring to end of turn");
            scheduler.report(error);
        })
    }

    /// Discard errors after logging them.
    pub fn log_only() -> Self {
        Self::new(|error| tracing::warn!(%error, "error dropped"))
    }

    /// Report an error. Rethrowing channels hand it to the current turn.
    pub fn send(&self, error: Error) {
        (self.sink)(error);
    }
}

impl std::fmt::Debug for ErrorChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ErrorChannel")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn custom_sink_receives_errors() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let channel = ErrorChannel::new(move |e| sink.lock().push(e.to_string()));

        channel.send(Error::RegistryStarted);
        assert_eq!(seen.lock().len(), 1);
    }

    #[test]
    fn rethrow_surfaces_at_turn_end() {
        let scheduler = Scheduler::new();
        let channel = ErrorChannel::rethrow(&scheduler);

        let result = scheduler.turn(|| channel.send(Error::reducer("inc", "boom")));
        assert!(matches!(result, Err(Error::Uncaught(ref errors)) if errors.len() == 1));
    }
}
