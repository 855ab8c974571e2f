//! Glitch Detection
//!
//! A glitch is a named node reachable from a stream over two different
//! paths. When that node emits, the change propagates down both paths and
//! the stream at the top observes it twice in one turn (the diamond
//! problem).
//!
//! # Algorithm
//!
//! Depth-first walk over `sources` and `dependencies`, carrying the path
//! from the starting marker:
//!
//! 1. On reaching a named node for the first time, record the current path.
//! 2. On reaching it again, compare paths by node identity. A different path
//!    is a glitch; both paths are returned.
//! 3. Unnamed nodes are walked through but never recorded.
//!
//! The walk revisits shared subgraphs rather than memoizing them, which is
//! fine for the graph sizes a process builds by hand.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use super::{Marker, MarkerId};

/// Two distinct paths from a marker to the same named ancestor.
#[derive(Clone)]
pub struct Glitch {
    first: Vec<Arc<Marker>>,
    second: Vec<Arc<Marker>>,
}

impl Glitch {
    /// Path of first arrival, starting at the inspected marker.
    pub fn first(&self) -> &[Arc<Marker>] {
        &self.first
    }

    /// Path of second arrival, starting at the inspected marker.
    pub fn second(&self) -> &[Arc<Marker>] {
        &self.second
    }

    /// The named node both paths end at.
    pub fn ancestor(&self) -> Option<&Arc<Marker>> {
        self.first.last()
    }
}

fn render(path: &[Arc<Marker>]) -> String {
    path.iter()
        .map(|marker| marker.label())
        .collect::<Vec<_>>()
        .join(" <- ")
}

impl fmt::Display for Glitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] and [{}]", render(&self.first), render(&self.second))
    }
}

impl fmt::Debug for Glitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Glitch")
            .field("first", &render(&self.first))
            .field("second", &render(&self.second))
            .finish()
    }
}

/// Search for a duplicate propagation path below `marker`.
pub fn detect_glitch(marker: &Arc<Marker>) -> Option<Glitch> {
    let mut seen = HashMap::new();
    let mut path = Vec::new();
    walk(marker, &mut path, &mut seen)
}

fn walk(
    node: &Arc<Marker>,
    path: &mut Vec<Arc<Marker>>,
    seen: &mut HashMap<MarkerId, Vec<Arc<Marker>>>,
) -> Option<Glitch> {
    path.push(Arc::clone(node));

    if node.name().is_some() {
        match seen.get(&node.id()) {
            Some(previous) if !same_path(previous, path) => {
                return Some(Glitch {
                    first: previous.clone(),
                    second: path.clone(),
                });
            }
            Some(_) => {}
            None => {
                seen.insert(node.id(), path.clone());
            }
        }
    }

    let upstream = node.sources().iter().chain(node.dependencies()).flatten();
    for next in upstream {
        if let Some(glitch) = walk(next, path, seen) {
            return Some(glitch);
        }
    }

    path.pop();
    None
}

fn same_path(a: &[Arc<Marker>], b: &[Arc<Marker>]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.id() == y.id())
}
