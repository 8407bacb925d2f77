//! Value Cell Implementation
//!
//! A [`ValueRef`] is the mutable leaf of the graph. It holds a value and an
//! ordered list of observers.
//!
//! # How Value Cells Work
//!
//! 1. Reading with [`get`](ValueRef::get) while a computed cell is capturing
//!    registers this cell as one of its dependencies.
//!
//! 2. Writing with [`set`](ValueRef::set) first compares against the stored
//!    value. An identical value is a no-op and notifies nobody.
//!
//! 3. Unless the cell is shallow, a composite value is deep-wrapped before it
//!    is stored, with an effect that re-notifies *this* cell. A write deep
//!    inside the stored value therefore looks like a write to the cell.
//!
//! 4. Observers run synchronously, in registration order, before `set`
//!    returns. Computed cells that depend on this one recompute as part of
//!    that walk, and so on down the chain.
//!
//! # Thread Safety
//!
//! Cells are `Send + Sync`. The value and the observer list each have their
//! own lock, and neither is held while observer code runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use super::observer::{Callback, CellId, ObserverId, ObserverList, Trigger};
use super::runtime::{Detach, Runtime};
use super::scheduler::Source;
use super::value::CellValue;
use crate::config::ValueOptions;
use crate::data::Effect;

struct ValueInner<T: CellValue> {
    id: CellId,
    runtime: Runtime,
    value: RwLock<T>,
    observers: ObserverList<T>,
    shallow: bool,
    /// While set, notifications are dropped. See [`ValueRef::suspend`].
    suspended: AtomicBool,
    /// Id of the effect passed at construction, if any.
    effect_id: Option<ObserverId>,
}

impl<T: CellValue> ValueInner<T> {
    /// Effect installed on deep-wrapped values: re-notify this cell.
    fn nested_effect(weak: Weak<Self>) -> Effect {
        Arc::new(move || {
            if let Some(cell) = weak.upgrade() {
                cell.notify();
            }
        })
    }

    fn prepare(&self, value: T, weak: Weak<Self>) -> T {
        if self.shallow || !value.can_be_reactive() {
            value
        } else {
            value.into_reactive(Self::nested_effect(weak))
        }
    }

    fn notify(&self) {
        let current = self.value.read().clone();
        self.notify_with(&current);
    }

    fn notify_with(&self, value: &T) {
        if self.suspended.load(Ordering::SeqCst) {
            tracing::trace!(cell = %self.id, "notification suppressed while suspended");
            return;
        }
        self.observers.notify(value);
    }
}

impl<T: CellValue> Source for ValueInner<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn subscribe_trigger(&self, id: ObserverId, trigger: Weak<dyn Trigger>) {
        self.observers.push_trigger(id, trigger);
    }
}

/// A mutable, observable value.
///
/// Cloning a `ValueRef` creates another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use tendril_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.value_ref(0);
///
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct ValueRef<T: CellValue> {
    inner: Arc<ValueInner<T>>,
}

impl<T: CellValue> ValueRef<T> {
    /// Create a deep value cell.
    pub fn new(runtime: &Runtime, initial: T) -> Self {
        Self::build(runtime, initial, None, ValueOptions::default())
    }

    /// Create a cell with explicit options.
    pub fn with_options(runtime: &Runtime, initial: T, options: ValueOptions) -> Self {
        Self::build(runtime, initial, None, options)
    }

    /// Create a cell whose `effect` observes every change.
    ///
    /// The effect is detached by [`Runtime::detach`] on this cell.
    pub fn with_effect<F>(runtime: &Runtime, initial: T, effect: F, options: ValueOptions) -> Self
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let effect: Callback<T> = Arc::new(effect);
        Self::build(runtime, initial, Some(effect), options)
    }

    fn build(runtime: &Runtime, initial: T, effect: Option<Callback<T>>, options: ValueOptions) -> Self {
        let effect_id = effect.as_ref().map(|_| ObserverId::new());

        let inner = Arc::new_cyclic(|weak: &Weak<ValueInner<T>>| {
            let value = if options.shallow || !initial.can_be_reactive() {
                initial
            } else {
                initial.into_reactive(ValueInner::nested_effect(weak.clone()))
            };
            ValueInner {
                id: CellId::new(),
                runtime: runtime.clone(),
                value: RwLock::new(value),
                observers: ObserverList::new(runtime.disposal_handle()),
                shallow: options.shallow,
                suspended: AtomicBool::new(false),
                effect_id,
            }
        });

        if let (Some(id), Some(effect)) = (effect_id, effect) {
            inner.observers.push_callback(id, effect);
        }

        Self { inner }
    }

    /// The cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    pub fn is_shallow(&self) -> bool {
        self.inner.shallow
    }

    /// Get the current value.
    ///
    /// If a computed cell is capturing, this read makes it depend on this
    /// cell.
    pub fn get(&self) -> T {
        self.track();
        self.inner.value.read().clone()
    }

    /// Borrow the current value. Tracks like [`get`](ValueRef::get).
    ///
    /// The cell's value lock is held while `f` runs; `f` must not write to
    /// this cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.track();
        f(&self.inner.value.read())
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.inner.value.read().clone()
    }

    fn track(&self) {
        let source: Arc<dyn Source> = self.inner.clone();
        self.inner.runtime.track(source);
    }

    /// Store a new value and notify observers.
    ///
    /// Returns `false`, and notifies nobody, if `value` is the same as the
    /// stored value.
    pub fn set(&self, value: T) -> bool {
        if self.inner.value.read().same(&value) {
            return false;
        }

        let value = self.inner.prepare(value, Arc::downgrade(&self.inner));

        {
            let mut slot = self.inner.value.write();
            if slot.same(&value) {
                return false;
            }
            *slot = value.clone();
        }

        self.inner.notify_with(&value);
        true
    }

    /// Replace the value with one computed from the current value.
    ///
    /// `f` runs on a copy, with no lock held, so it may read or write this
    /// cell itself. Whatever `f` returns is written last.
    pub fn update(&self, f: impl FnOnce(&T) -> T) -> bool {
        let current = self.inner.value.read().clone();
        self.set(f(&current))
    }

    /// Subscribe `observer` to changes. It receives the new value.
    ///
    /// The returned id can be passed to [`unwatch`](ValueRef::unwatch).
    pub fn watch<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.inner.observers.push_callback(id, Arc::new(observer));
        id
    }

    /// Dispose one observer. It is skipped from now on and dropped from the
    /// list on the next notification.
    pub fn unwatch(&self, id: ObserverId) {
        self.inner.runtime.disposal().dispose(id);
    }

    /// Observer entries currently in the list, including disposed entries
    /// that have not been pruned yet.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }

    /// Notify observers with the current value, changed or not.
    ///
    /// This is how a batch of writes made while suspended is flushed.
    pub fn notify(&self) {
        self.inner.notify();
    }

    /// Stop delivering notifications. Writes still update the value.
    pub fn suspend(&self) {
        self.inner.suspended.store(true, Ordering::SeqCst);
    }

    /// Resume delivering notifications. Does not notify by itself; call
    /// [`notify`](ValueRef::notify) to flush.
    pub fn unsuspend(&self) {
        self.inner.suspended.store(false, Ordering::SeqCst);
    }

    pub fn is_suspended(&self) -> bool {
        self.inner.suspended.load(Ordering::SeqCst)
    }
}

impl<T: CellValue> Detach for ValueRef<T> {
    fn propagation_ids(&self) -> SmallVec<[ObserverId; 2]> {
        match self.inner.effect_id {
            Some(id) => smallvec![id],
            None => SmallVec::new(),
        }
    }
}

impl<T: CellValue> Clone for ValueRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ValueRef<T>
where
    T: CellValue + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueRef")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("observer_count", &self.observer_count())
            .field("shallow", &self.inner.shallow)
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
