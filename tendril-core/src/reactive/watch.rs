//! Watching and Ref Helpers
//!
//! Framework code often receives a value that may or may not be a cell (a
//! component prop, say). [`MaybeRef`] names that situation, and
//! [`Runtime::watch`] subscribes to whichever kind of source it is handed.

use std::sync::Arc;

use smallvec::SmallVec;

use super::computed::ComputedRef;
use super::observer::ObserverId;
use super::runtime::{Detach, Runtime};
use super::signal::ValueRef;
use super::value::CellValue;
use crate::error::{ReactiveError, Result};

/// A value that may be a plain value or a cell.
pub enum MaybeRef<T: CellValue> {
    Plain(T),
    Value(ValueRef<T>),
    Computed(ComputedRef<T>),
}

impl<T: CellValue> MaybeRef<T> {
    /// Whether this is a cell.
    pub fn is_ref(&self) -> bool {
        !matches!(self, MaybeRef::Plain(_))
    }

    /// The current value: the plain value itself, or the cell's value.
    ///
    /// Reading a cell this way is tracked. Returns `None` only for a computed
    /// cell that has not been populated.
    pub fn unref(&self) -> Option<T> {
        match self {
            MaybeRef::Plain(value) => Some(value.clone()),
            MaybeRef::Value(cell) => Some(cell.get()),
            MaybeRef::Computed(cell) => cell.get(),
        }
    }
}

impl<T: CellValue> Clone for MaybeRef<T> {
    fn clone(&self) -> Self {
        match self {
            MaybeRef::Plain(value) => MaybeRef::Plain(value.clone()),
            MaybeRef::Value(cell) => MaybeRef::Value(cell.clone()),
            MaybeRef::Computed(cell) => MaybeRef::Computed(cell.clone()),
        }
    }
}

impl<T: CellValue> From<ValueRef<T>> for MaybeRef<T> {
    fn from(cell: ValueRef<T>) -> Self {
        MaybeRef::Value(cell)
    }
}

impl<T: CellValue> From<ComputedRef<T>> for MaybeRef<T> {
    fn from(cell: ComputedRef<T>) -> Self {
        MaybeRef::Computed(cell)
    }
}

/// Anything [`Runtime::watch`] can be asked to watch.
pub enum WatchSource<T: CellValue> {
    /// A cell, or a plain value (which is rejected).
    Ref(MaybeRef<T>),
    /// A getter, watched through a computed cell.
    Getter(Arc<dyn Fn() -> T + Send + Sync>),
}

impl<T: CellValue> WatchSource<T> {
    pub fn getter<F>(getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        WatchSource::Getter(Arc::new(getter))
    }
}

impl<T: CellValue> From<MaybeRef<T>> for WatchSource<T> {
    fn from(source: MaybeRef<T>) -> Self {
        WatchSource::Ref(source)
    }
}

impl<T: CellValue> From<ValueRef<T>> for WatchSource<T> {
    fn from(cell: ValueRef<T>) -> Self {
        WatchSource::Ref(MaybeRef::Value(cell))
    }
}

impl<T: CellValue> From<ComputedRef<T>> for WatchSource<T> {
    fn from(cell: ComputedRef<T>) -> Self {
        WatchSource::Ref(MaybeRef::Computed(cell))
    }
}

/// Handle to an active watch.
///
/// Dropping a watcher created from a getter stops it, since the computed cell
/// behind it goes away. Watchers on cells stay subscribed until
/// [`stop`](Watcher::stop) or [`Runtime::detach`].
#[must_use = "getter watchers stop once the handle is dropped"]
pub struct Watcher<T: CellValue> {
    runtime: Runtime,
    observer: Option<ObserverId>,
    computed: Option<ComputedRef<T>>,
}

impl<T: CellValue> Watcher<T> {
    /// Stop delivering to the callback.
    pub fn stop(&self) {
        self.runtime.detach(self);
    }

    /// The computed cell behind a getter watch.
    pub fn computed(&self) -> Option<&ComputedRef<T>> {
        self.computed.as_ref()
    }
}

impl<T: CellValue> Detach for Watcher<T> {
    fn propagation_ids(&self) -> SmallVec<[ObserverId; 2]> {
        match (&self.computed, self.observer) {
            (Some(computed), _) => computed.propagation_ids(),
            (None, Some(id)) => SmallVec::from_slice(&[id]),
            (None, None) => SmallVec::new(),
        }
    }
}

impl Runtime {
    /// Call `callback` whenever `source` changes.
    ///
    /// - A cell is watched directly; the callback first runs on the next
    ///   change.
    /// - A getter is wrapped in a computed cell; the callback runs once with
    ///   the first value and then on every change.
    /// - A plain value can never change, so it is rejected with
    ///   [`ReactiveError::NotWatchable`].
    pub fn watch<T, S, C>(&self, source: S, callback: C) -> Result<Watcher<T>>
    where
        T: CellValue,
        S: Into<WatchSource<T>>,
        C: Fn(&T) + Send + Sync + 'static,
    {
        let (observer, computed) = match source.into() {
            WatchSource::Ref(MaybeRef::Plain(_)) => {
                return Err(ReactiveError::NotWatchable {
                    type_name: std::any::type_name::<T>(),
                });
            }
            WatchSource::Ref(MaybeRef::Value(cell)) => (Some(cell.watch(callback)), None),
            WatchSource::Ref(MaybeRef::Computed(cell)) => (Some(cell.watch(callback)), None),
            WatchSource::Getter(getter) => {
                let computed = ComputedRef::with_callback(self, move || getter(), callback);
                (None, Some(computed))
            }
        };

        Ok(Watcher {
            runtime: self.clone(),
            observer,
            computed,
        })
    }
}
