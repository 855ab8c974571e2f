//! Dependency Markers
//!
//! Markers record how a stream was built. Every operator that derives one
//! stream from others attaches a [`Marker`] referencing the markers of its
//! inputs as they were at construction time, or `None` for unmarked inputs.
//!
//! # Overview
//!
//! The markers form a directed acyclic graph where:
//!
//! - Roots are `None` (unmarked origins) or named origin points
//! - Edges point upstream: `sources` feed emissions, `dependencies` only
//!   supply context (e.g. the right-hand side of `with_latest_from`)
//!
//! The graph is purely diagnostic. [`detect_glitch`] walks it to find a
//! named ancestor reachable over two different paths, the shape that
//! produces duplicate propagation in a single turn. The practical mitigation
//! is the coalescing debounce applied by state streams; the detector explains
//! where it was needed.
//!
//! # Observation
//!
//! An [`Inspector`] holds an optional hook invoked with a stream's marker
//! whenever that stream gains a subscriber. External inspection tooling
//! installs the hook; the core never depends on it.

mod glitch;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

pub use glitch::{detect_glitch, Glitch};

/// Unique identifier for a marker node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MarkerId(u64);

impl MarkerId {
    /// Generate a new unique marker ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for MarkerId {
    fn default() -> Self {
        Self::new()
    }
}

/// What kind of construction a marker describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// A named stream, usually a state stream.
    Name,
    /// A raw origin such as the action bus.
    Source,
    /// A stream filtered to one action type.
    Action,
    /// Latest-value combination of several inputs.
    Combine,
    /// Interleaving of several inputs.
    Merge,
    /// Index-wise pairing of several inputs.
    Zip,
    /// Same-turn coalescing.
    Debounce,
    /// Primary source plus informational dependencies.
    WithLatestFrom,
}

impl fmt::Display for MarkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self {
            Self::Name => "name",
            Self::Source => "source",
            Self::Action => "action",
            Self::Combine => "combine",
            Self::Merge => "merge",
            Self::Zip => "zip",
            Self::Debounce => "debounce",
            Self::WithLatestFrom => "with-latest",
        };
        f.write_str(tag)
    }
}

/// A node in the marker graph.
pub struct Marker {
    id: MarkerId,
    kind: MarkerKind,
    name: Option<String>,
    sources: Vec<Option<Arc<Marker>>>,
    dependencies: Vec<Option<Arc<Marker>>>,
}

impl Marker {
    /// Build a marker node.
    pub fn new(
        kind: MarkerKind,
        name: Option<String>,
        sources: Vec<Option<Arc<Marker>>>,
        dependencies: Vec<Option<Arc<Marker>>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            id: MarkerId::new(),
            kind,
            name,
            sources,
            dependencies,
        })
    }

    /// An unnamed derived node.
    pub fn derived(kind: MarkerKind, sources: Vec<Option<Arc<Marker>>>) -> Arc<Self> {
        Self::new(kind, None, sources, Vec::new())
    }

    /// A named node.
    pub fn named(kind: MarkerKind, name: &str, sources: Vec<Option<Arc<Marker>>>) -> Arc<Self> {
        Self::new(kind, Some(name.to_string()), sources, Vec::new())
    }

    /// An unnamed node with informational dependencies.
    pub fn with_dependencies(
        kind: MarkerKind,
        sources: Vec<Option<Arc<Marker>>>,
        dependencies: Vec<Option<Arc<Marker>>>,
    ) -> Arc<Self> {
        Self::new(kind, None, sources, dependencies)
    }

    pub fn id(&self) -> MarkerId {
        self.id
    }

    pub fn kind(&self) -> MarkerKind {
        self.kind
    }

    /// Diagnostic name. Only named streams (state streams) have one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Markers of the immediate upstreams, in argument order.
    pub fn sources(&self) -> &[Option<Arc<Marker>>] {
        &self.sources
    }

    /// Direct dependencies, each listed once.
    pub fn dependencies(&self) -> &[Option<Arc<Marker>>] {
        &self.dependencies
    }

    /// Human-readable label: the name if any, else the kind tag.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.kind.to_string(),
        }
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Marker")
            .field("id", &self.id.raw())
            .field("kind", &self.kind)
            .field("name", &self.name)
            .field("sources", &self.sources.len())
            .field("dependencies", &self.dependencies.len())
            .finish()
    }
}

/// Anything that may carry a marker.
pub trait Marked {
    fn marker(&self) -> Option<&Arc<Marker>>;
}

/// Find the nearest marker attached to `stream`.
///
/// Marker-transparent operators forward their input's marker, so this is
/// the marker of the closest marking operator upstream.
pub fn find_marker<M: Marked + ?Sized>(stream: &M) -> Option<Arc<Marker>> {
    stream.marker().cloned()
}

/// Callback invoked with a stream's marker when it gains a subscriber.
pub type MarkerHook = Arc<dyn Fn(&Arc<Marker>) + Send + Sync>;

/// Pluggable marker observation hook.
///
/// Cloning shares the hook slot.
#[derive(Clone, Default)]
pub struct Inspector {
    hook: Arc<RwLock<Option<MarkerHook>>>,
}

impl Inspector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the hook called for every marker created from now on.
    pub fn set_hook<F>(&self, hook: F)
    where
        F: Fn(&Arc<Marker>) + Send + Sync + 'static,
    {
        *self.hook.write() = Some(Arc::new(hook));
    }

    pub fn clear_hook(&self) {
        *self.hook.write() = None;
    }

    /// Report `marker` to the installed hook, if any.
    pub fn notify(&self, marker: &Arc<Marker>) {
        let hook = self.hook.read().clone();
        if let Some(hook) = hook {
            hook(marker);
        }
    }
}

impl fmt::Debug for Inspector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inspector")
            .field("hooked", &self.hook.read().is_some())
            .finish()
    }
}
