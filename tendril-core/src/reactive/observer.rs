//! Observer identities and observer lists.
//!
//! Every cell owns an ordered list of observers. An observer is either a
//! user callback that receives the new value, or a trigger that re-runs a
//! computed cell. Triggers are held weakly so a computed cell does not keep
//! itself alive through its own dependencies.
//!
//! # Lazy Pruning
//!
//! Observers are never removed when they are disposed. The list is append-only
//! until the next notification walk, which skips and then drops every entry
//! whose id is in the disposal registry (or whose trigger target is gone).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use smallvec::SmallVec;

use super::disposal::DisposalRegistry;

/// Unique identifier for an observer callback.
///
/// Closures have no identity in Rust, so the disposal registry keys on this
/// id instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl ObserverId {
    /// Generate a new unique observer ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for ObserverId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for a cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellId(u64);

impl CellId {
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for CellId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cell#{}", self.0)
    }
}

/// Callback invoked with a cell's new value.
pub type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Something a notification can re-run. Implemented by computed cells.
pub(crate) trait Trigger: Send + Sync {
    fn fire(self: Arc<Self>);
}

enum Action<T> {
    Callback(Callback<T>),
    Trigger(Weak<dyn Trigger>),
}

impl<T> Clone for Action<T> {
    fn clone(&self) -> Self {
        match self {
            Action::Callback(callback) => Action::Callback(Arc::clone(callback)),
            Action::Trigger(trigger) => Action::Trigger(Weak::clone(trigger)),
        }
    }
}

struct Entry<T> {
    id: ObserverId,
    action: Action<T>,
}

impl<T> Clone for Entry<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            action: self.action.clone(),
        }
    }
}

/// Ordered observer list of one cell.
///
/// Every entry is registered with the disposal registry while it sits in
/// the list, so disposed ids can be forgotten once no list carries them.
pub(crate) struct ObserverList<T> {
    entries: Mutex<SmallVec<[Entry<T>; 4]>>,
    disposal: Arc<DisposalRegistry>,
}

impl<T> ObserverList<T> {
    pub(crate) fn new(disposal: Arc<DisposalRegistry>) -> Self {
        Self {
            entries: Mutex::new(SmallVec::new()),
            disposal,
        }
    }

    pub(crate) fn push_callback(&self, id: ObserverId, callback: Callback<T>) {
        self.push(Entry {
            id,
            action: Action::Callback(callback),
        });
    }

    pub(crate) fn push_trigger(&self, id: ObserverId, trigger: Weak<dyn Trigger>) {
        self.push(Entry {
            id,
            action: Action::Trigger(trigger),
        });
    }

    fn push(&self, entry: Entry<T>) {
        self.disposal.register(entry.id);
        self.entries.lock().push(entry);
    }

    /// Entries physically present, including disposed ones not yet pruned.
    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Walk the list in registration order and deliver `value`.
    ///
    /// The walk runs over a snapshot, so observers may subscribe, dispose or
    /// write to other cells without deadlocking. Observers added during the
    /// walk are first called on the next notification.
    pub(crate) fn notify(&self, value: &T) {
        let snapshot = self.entries.lock().clone();
        let mut dead: SmallVec<[ObserverId; 4]> = SmallVec::new();

        for entry in &snapshot {
            if self.disposal.contains(entry.id) {
                dead.push(entry.id);
                continue;
            }
            match &entry.action {
                Action::Callback(callback) => callback(value),
                Action::Trigger(trigger) => match trigger.upgrade() {
                    Some(trigger) => trigger.fire(),
                    None => dead.push(entry.id),
                },
            }
        }
        drop(snapshot);

        if !dead.is_empty() {
            let mut pruned: SmallVec<[ObserverId; 4]> = SmallVec::new();
            self.entries.lock().retain(|entry| {
                let keep = !dead.contains(&entry.id);
                if !keep {
                    pruned.push(entry.id);
                }
                keep
            });
            for id in &pruned {
                self.disposal.release(*id);
            }
            tracing::trace!(pruned = pruned.len(), "pruned disposed observers");
        }
    }
}

impl<T> Drop for ObserverList<T> {
    fn drop(&mut self) {
        for entry in self.entries.get_mut().iter() {
            self.disposal.release(entry.id);
        }
    }
}
