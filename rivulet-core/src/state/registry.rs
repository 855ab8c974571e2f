//! State Stream Registry
//!
//! Tracks persistent streams by name and drives them as a group.
//!
//! # Phases
//!
//! - `Idle`: streams can be registered; nothing is folding.
//! - `Started`: every registered stream is connected to the bus given to
//!   [`Registry::start_all`]. Streams registered now are connected at once.
//! - `Stopped`: folding has stopped, states are kept. `start_all` may be
//!   called again; `get_states` fails until it is.
//!
//! # Duplicate names
//!
//! Registering a name twice always replaces the earlier stream. In
//! production this is reported as [`Error::DuplicateStream`]. In
//! development it is treated as a hot swap: the old stream's state moves
//! into the new one, and if the registry is running the old stream is
//! stopped and the new one connected.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::bus::Bus;
use crate::config::Mode;
use crate::error::{Error, Result};
use crate::stream::Item;

use super::{PersistentStateStream, Snapshot};

// ----------------------------------------------------------------------------
// Registered streams
// ----------------------------------------------------------------------------

/// Type-erased view of a persistent stream, as the registry drives it.
pub trait RegisteredStream: Send + Sync {
    /// Registry key. Unique within one registry.
    fn name(&self) -> &str;

    /// Connect to `bus`, seeding the state from `initial` if given.
    fn start_reducing(&self, bus: &Bus, initial: Option<&Value>) -> Result<()>;

    /// Unsubscribe from the bus. The current state is kept.
    fn stop_reducing(&self);

    /// Current state as JSON.
    fn snapshot(&self) -> Result<Value>;

    /// Replace the current state from JSON.
    fn restore(&self, state: &Value) -> Result<()>;
}

impl<S> RegisteredStream for PersistentStateStream<S>
where
    S: Item + Serialize + DeserializeOwned,
{
    fn name(&self) -> &str {
        PersistentStateStream::name(self)
    }

    fn start_reducing(&self, bus: &Bus, initial: Option<&Value>) -> Result<()> {
        let initial = initial.map(|value| decode::<S>(self.name(), value)).transpose()?;
        PersistentStateStream::start_reducing(self, bus, initial)
    }

    fn stop_reducing(&self) {
        PersistentStateStream::stop_reducing(self);
    }

    fn snapshot(&self) -> Result<Value> {
        let state = self.state()?;
        serde_json::to_value(state).map_err(|error| Error::State {
            stream: self.name().to_string(),
            error,
        })
    }

    fn restore(&self, state: &Value) -> Result<()> {
        let state = decode::<S>(self.name(), state)?;
        self.set_state(state)
    }
}

fn decode<S: DeserializeOwned>(stream: &str, value: &Value) -> Result<S> {
    serde_json::from_value(value.clone()).map_err(|error| Error::State {
        stream: stream.to_string(),
        error,
    })
}

// ----------------------------------------------------------------------------
// Registry
// ----------------------------------------------------------------------------

/// Undo a partial `start_all`.
fn rollback(connected: Vec<(Arc<dyn RegisteredStream>, Option<Value>)>) {
    for (stream, before) in connected.into_iter().rev() {
        stream.stop_reducing();
        if let Some(before) = before {
            if let Err(error) = stream.restore(&before) {
                tracing::warn!(stream = %stream.name(), %error, "could not restore state");
            }
        }
    }
}

enum Phase {
    Idle,
    Started(Bus),
    Stopped,
}

struct RegistryState {
    streams: IndexMap<String, Arc<dyn RegisteredStream>>,
    phase: Phase,
}

/// Named collection of persistent streams.
pub struct Registry {
    mode: Mode,
    state: Mutex<RegistryState>,
}

impl Registry {
    /// Create an empty registry that has not been started.
    pub fn new(mode: Mode) -> Self {
        Self {
            mode,
            state: Mutex::new(RegistryState {
                streams: IndexMap::new(),
                phase: Phase::Idle,
            }),
        }
    }

    /// Decides whether a duplicate name is an error or a hot swap.
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Track `stream` under its name.
    ///
    /// If the registry is started, the stream is connected immediately. A
    /// duplicate name replaces the earlier stream; in development mode the
    /// earlier stream's state carries over. The new stream is prepared
    /// (restored, connected) before it takes the old one's place, so a
    /// failure leaves the registry exactly as it was.
    pub fn register<R>(&self, stream: R) -> Result<()>
    where
        R: RegisteredStream + 'static,
    {
        let stream: Arc<dyn RegisteredStream> = Arc::new(stream);
        let name = stream.name().to_string();

        let (previous, running) = {
            let state = self.state.lock();
            let running = match &state.phase {
                Phase::Started(bus) => Some(bus.clone()),
                _ => None,
            };
            (state.streams.get(&name).cloned(), running)
        };

        if let Some(previous) = &previous {
            tracing::warn!(
                stream = %name,
                mode = ?self.mode,
                "duplicate state stream registration"
            );
            if self.mode == Mode::Development {
                // A torn-down predecessor has nothing to hand over.
                if let Ok(state) = previous.snapshot() {
                    stream.restore(&state)?;
                }
            }
        }

        if let Some(bus) = &running {
            stream.start_reducing(bus, None)?;
        }

        self.state.lock().streams.insert(name.clone(), stream);

        match previous {
            Some(previous) => {
                if running.is_some() {
                    previous.stop_reducing();
                }
                match self.mode {
                    Mode::Production => Err(Error::DuplicateStream(name)),
                    Mode::Development => Ok(()),
                }
            }
            None => {
                tracing::debug!(stream = %name, "state stream registered");
                Ok(())
            }
        }
    }

    /// Connect every registered stream to `bus`.
    ///
    /// States found in `initial` by stream name replace the streams'
    /// current values before they connect. Fails if already started.
    ///
    /// Starting is all or nothing: if any stream fails to start, the ones
    /// connected so far are stopped and given back their earlier states,
    /// and the registry returns to the phase it was in.
    pub fn start_all(&self, bus: &Bus, initial: Option<&Snapshot>) -> Result<()> {
        let (streams, previous) = {
            let mut state = self.state.lock();
            if matches!(state.phase, Phase::Started(_)) {
                return Err(Error::RegistryStarted);
            }
            let previous = std::mem::replace(&mut state.phase, Phase::Started(bus.clone()));
            (state.streams.values().cloned().collect::<Vec<_>>(), previous)
        };

        tracing::info!(streams = streams.len(), "starting state streams");
        let mut connected = Vec::with_capacity(streams.len());
        for stream in streams {
            let seed = initial.and_then(|snapshot| snapshot.get(stream.name()));
            let before = stream.snapshot().ok();
            match stream.start_reducing(bus, seed) {
                Ok(()) => connected.push((stream, before)),
                Err(Error::AlreadyConnected(name)) => {
                    tracing::debug!(stream = %name, "already connected, left as is");
                }
                Err(error) => {
                    tracing::warn!(
                        stream = %stream.name(),
                        %error,
                        "state stream failed to start, rolling back"
                    );
                    rollback(connected);
                    self.state.lock().phase = previous;
                    return Err(error);
                }
            }
        }
        Ok(())
    }

    /// Stop every registered stream, keeping their states.
    pub fn stop_all(&self) {
        let streams = {
            let mut state = self.state.lock();
            state.phase = Phase::Stopped;
            state.streams.values().cloned().collect::<Vec<_>>()
        };

        tracing::info!(streams = streams.len(), "stopping state streams");
        for stream in streams {
            stream.stop_reducing();
        }
    }

    /// Current state of every registered stream.
    pub fn get_states(&self) -> Result<Snapshot> {
        let streams = {
            let state = self.state.lock();
            if matches!(state.phase, Phase::Stopped) {
                return Err(Error::RegistryStopped);
            }
            state.streams.values().cloned().collect::<Vec<_>>()
        };

        streams
            .iter()
            .map(|stream| -> Result<(String, Value)> {
                Ok((stream.name().to_string(), stream.snapshot()?))
            })
            .collect()
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state.lock().phase, Phase::Started(_))
    }

    /// Registered names, in registration order.
    pub fn names(&self) -> Vec<String> {
        self.state.lock().streams.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(Mode::default())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        let phase = match state.phase {
            Phase::Idle => "idle",
            Phase::Started(_) => "started",
            Phase::Stopped => "stopped",
        };
        f.debug_struct("Registry")
            .field("mode", &self.mode)
            .field("phase", &phase)
            .field("streams", &state.streams.keys().collect::<Vec<_>>())
            .finish()
    }
}
