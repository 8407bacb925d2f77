//! Reactive Marker
//!
//! A node that has been made reactive carries a hidden marker: a set-once
//! slot holding the effect its writes invoke. The marker is not an entry, so
//! it never shows up in `keys()`, `values()`, JSON output, or `len()`, and it
//! cannot be replaced once set.
//!
//! The marker is what stops deep wrapping from recursing forever through
//! cyclic data and from wrapping the same node twice.

use super::{Data, Effect, Node};

/// Whether `value` can still be made reactive.
///
/// False for scalars and for nodes that already carry the marker.
pub fn can_be_reactive(value: &Data) -> bool {
    match value {
        Data::Composite(node) => !node.is_marked(),
        _ => false,
    }
}

/// Whether `value` is a node that already carries the marker.
pub fn is_reactive(value: &Data) -> bool {
    value.as_node().is_some_and(Node::is_marked)
}

/// Attach the marker to `node`.
///
/// Marking an already-marked node does nothing; the first effect wins.
pub fn mark_as_reactive(node: &Node, effect: &Effect) {
    if node.is_marked() {
        return;
    }
    if !node.set_marker(effect.clone()) {
        tracing::trace!("node was marked concurrently, keeping the first effect");
    }
}
