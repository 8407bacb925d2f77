//! Disposal Registry
//!
//! Records which observers have been detached. Nothing is unsubscribed
//! eagerly: a cell does not know every list its callbacks ended up in, so the
//! registry is consulted during each notification walk instead (see
//! `ObserverList::notify`).
//!
//! One id can sit in several lists (a computed cell's trigger is registered
//! with every dependency), so the registry also counts how many list entries
//! carry each id. A disposed id is forgotten once the last of those entries
//! has been pruned or its list dropped.

use dashmap::{DashMap, DashSet};

use super::observer::ObserverId;

/// Identity-keyed set of disposed observers.
#[derive(Debug, Default)]
pub struct DisposalRegistry {
    disposed: DashSet<ObserverId>,
    /// Live list entries per id.
    registrations: DashMap<ObserverId, usize>,
}

impl DisposalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an observer as disposed. Disposing twice is harmless.
    pub fn dispose(&self, id: ObserverId) {
        if self.disposed.insert(id) {
            tracing::trace!(?id, "observer disposed");
        }
    }

    pub fn contains(&self, id: ObserverId) -> bool {
        self.disposed.contains(&id)
    }

    /// Number of disposed ids still tracked.
    pub fn len(&self) -> usize {
        self.disposed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.disposed.is_empty()
    }

    /// An entry carrying `id` was added to an observer list.
    pub(crate) fn register(&self, id: ObserverId) {
        *self.registrations.entry(id).or_insert(0) += 1;
    }

    /// An entry carrying `id` left an observer list.
    pub(crate) fn release(&self, id: ObserverId) {
        let remaining = match self.registrations.get_mut(&id) {
            Some(mut count) => {
                *count = count.saturating_sub(1);
                *count
            }
            None => return,
        };
        if remaining > 0 {
            return;
        }
        if self.registrations.remove_if(&id, |_, count| *count == 0).is_some()
            && self.disposed.remove(&id).is_some()
        {
            tracing::trace!(?id, "disposed observer forgotten");
        }
    }

    /// Drop `id` from the disposed set. Only for ids whose owner is gone, so
    /// no live entry can carry them any more.
    pub(crate) fn forget(&self, id: ObserverId) {
        self.disposed.remove(&id);
    }
}
