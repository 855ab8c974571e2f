//! Turn Scheduler
//!
//! The scheduler defines the flush point for same-turn coalescing and for
//! deferred errors.
//!
//! # Turns
//!
//! A turn is one synchronous unit of work, usually a dispatch. Turns nest:
//! a listener that dispatches again opens an inner turn. Only when the
//! outermost turn ends does the scheduler drain:
//!
//! 1. Run queued tasks (coalesced emissions) in FIFO order. Tasks may queue
//!    more tasks or dispatch; both are handled within the same drain.
//! 2. Collect errors reported through the rethrow channel and hand them back
//!    to the caller of the outermost turn as [`Error::Uncaught`].
//!
//! Work queued outside any turn (a value pushed by an auxiliary source, a
//! state set directly) is a turn of its own and runs immediately. Errors
//! reported outside a turn wait for the next turn or for an explicit
//! [`Scheduler::flush`].

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};

type Task = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SchedulerState {
    /// Nesting depth of open turns. Draining counts as one open turn.
    depth: usize,
    queue: VecDeque<Task>,
    uncaught: Vec<Error>,
}

/// Cooperative scheduler shared by the bus and every coalescing stream.
///
/// Cloning is cheap and shares state.
#[derive(Clone, Default)]
pub struct Scheduler {
    state: Arc<Mutex<SchedulerState>>,
}

/// Guard for an open turn.
///
/// Restores the depth counter if the turn body unwinds, so a panicking
/// listener does not leave the scheduler thinking a turn is still open.
struct TurnGuard<'a> {
    scheduler: &'a Scheduler,
    closed: bool,
}

impl TurnGuard<'_> {
    /// Close the turn. Returns true if this was the outermost one.
    fn close(mut self) -> bool {
        self.closed = true;
        let mut state = self.scheduler.state.lock();
        state.depth -= 1;
        state.depth == 0
    }
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.scheduler.state.lock().depth -= 1;
        }
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> TurnGuard<'_> {
        self.state.lock().depth += 1;
        TurnGuard {
            scheduler: self,
            closed: false,
        }
    }

    /// Run `body` as a turn.
    ///
    /// If this is the outermost turn, queued work is drained before
    /// returning and any deferred errors are returned as
    /// [`Error::Uncaught`].
    pub fn turn<R>(&self, body: impl FnOnce() -> R) -> Result<R> {
        let guard = self.open();
        let out = body();
        if guard.close() {
            self.drain()?;
        }
        Ok(out)
    }

    /// Drain queued work now.
    ///
    /// Inside a turn this is a no-op; the outermost turn drains on exit.
    pub fn flush(&self) -> Result<()> {
        if self.in_turn() {
            return Ok(());
        }
        self.drain()
    }

    fn drain(&self) -> Result<()> {
        self.run_queue();

        let errors = std::mem::take(&mut self.state.lock().uncaught);
        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Uncaught(errors))
        }
    }

    /// Run queued tasks, including any they queue, as one turn.
    fn run_queue(&self) {
        let guard = self.open();
        loop {
            let task = self.state.lock().queue.pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        guard.close();
    }

    /// Queue `task` for the flush point of the current turn.
    ///
    /// Outside a turn the task runs before this returns.
    pub fn schedule<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let idle = {
            let mut state = self.state.lock();
            state.queue.push_back(Box::new(task));
            state.depth == 0
        };
        if idle {
            self.run_queue();
        }
    }

    /// Record an error to be surfaced at the end of the outermost turn.
    pub fn report(&self, error: Error) {
        self.state.lock().uncaught.push(error);
    }

    /// Whether a turn is open on this scheduler right now.
    pub fn in_turn(&self) -> bool {
        self.state.lock().depth > 0
    }

    /// Number of tasks waiting for the flush point.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Scheduler")
            .field("depth", &state.depth)
            .field("pending", &state.queue.len())
            .field("uncaught", &state.uncaught.len())
            .finish()
    }
}
