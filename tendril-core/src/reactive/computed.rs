//! Computed Cell Implementation
//!
//! A [`ComputedRef`] is a derived value produced by a getter. It finds its
//! own dependencies: whatever cells the getter reads during its first
//! evaluation become the cells it listens to.
//!
//! # How Computed Cells Work
//!
//! 1. Construction enqueues the cell with the runtime's capture scheduler and
//!    kicks the drain loop. If nothing else is capturing, the getter runs
//!    right away and the cell is ready when the constructor returns.
//!    Otherwise the cell is a placeholder (`get()` returns `None`) until its
//!    turn comes.
//!
//! 2. During that first evaluation every tracked read is recorded. When the
//!    session closes the cell subscribes a recompute trigger to each of
//!    those cells, and, if a callback was supplied, registers it and calls
//!    it once with the fresh value.
//!
//! 3. From then on a change to any dependency re-runs the whole getter
//!    directly (not through the queue), stores the result, and notifies this
//!    cell's own observers. Chains of computed cells propagate this way,
//!    synchronously, before the original write returns.
//!
//! # Dependencies Are Fixed
//!
//! The dependency set is the one captured in the first session. A getter
//! that branches on some condition only listens to the cells it read on the
//! branch taken back then.
//!
//! # Failure Modes
//!
//! - **Initial evaluation fails** (error or panic): logged and kept in
//!   [`last_error`](ComputedRef::last_error). The cell stays unset and only
//!   listens to whatever was read before the failure, possibly nothing.
//! - **Recomputation fails**: logged, recorded, and the last good value is
//!   kept. Observers are not notified.
//! - **Every handle dropped**: the recompute triggers left in dependency lists
//!   go inert and are pruned on the next walk.

use std::panic::{self, AssertUnwindSafe};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use futures_util::future::BoxFuture;
use futures_util::FutureExt;
use parking_lot::RwLock;
use smallvec::{smallvec, SmallVec};

use super::context::{self, Frame, FrameGuard, SessionId};
use super::observer::{Callback, CellId, ObserverId, ObserverList, Trigger};
use super::runtime::{Detach, Runtime};
use super::scheduler::{Capture, CaptureStep, Source};
use super::value::CellValue;
use crate::error::{ReactiveError, Result};

type SyncGetter<T> = Arc<dyn Fn() -> Result<T> + Send + Sync>;
type AsyncGetter<T> = Arc<dyn Fn() -> BoxFuture<'static, Result<T>> + Send + Sync>;

enum Getter<T> {
    Sync(SyncGetter<T>),
    Async(AsyncGetter<T>),
}

struct ComputedInner<T: CellValue> {
    id: CellId,
    runtime: Runtime,
    getter: Getter<T>,

    /// Last successfully computed value. `None` until the first capture
    /// succeeds.
    value: RwLock<Option<T>>,

    /// Most recent getter failure, cleared by the next success.
    last_error: RwLock<Option<ReactiveError>>,

    observers: ObserverList<T>,

    /// Identity of the recompute trigger registered with every dependency.
    trigger_id: ObserverId,

    /// Callback supplied at construction, registered once capture finishes.
    callback: Option<(ObserverId, Callback<T>)>,

    /// Cells captured in the first session.
    dependencies: RwLock<SmallVec<[CellId; 4]>>,

    /// The first capture session has closed.
    ready: AtomicBool,

    /// An async recompute is parked and has not started yet.
    recompute_pending: AtomicBool,
}

/// Run a synchronous getter, turning panics into errors.
fn evaluate<T>(getter: &SyncGetter<T>) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(|| getter()))
        .unwrap_or_else(|payload| Err(ReactiveError::from_panic(payload)))
}

/// Start an async getter, turning panics (at call or poll time) into errors.
fn evaluate_async<T: Send + 'static>(getter: &AsyncGetter<T>) -> BoxFuture<'static, Result<T>> {
    match panic::catch_unwind(AssertUnwindSafe(|| getter())) {
        Ok(future) => AssertUnwindSafe(future)
            .catch_unwind()
            .map(|outcome| outcome.unwrap_or_else(|payload| Err(ReactiveError::from_panic(payload))))
            .boxed(),
        Err(payload) => futures_util::future::ready(Err(ReactiveError::from_panic(payload))).boxed(),
    }
}

impl<T: CellValue> ComputedInner<T> {
    /// Store the outcome of the first evaluation.
    fn store_initial(&self, outcome: Result<T>) {
        match outcome {
            Ok(value) => *self.value.write() = Some(value),
            Err(err) => {
                tracing::warn!(cell = %self.id, error = %err, "initial capture failed");
                *self.last_error.write() = Some(err);
            }
        }
    }

    /// Store the outcome of a recomputation and notify if it changed.
    fn apply(&self, outcome: Result<T>) {
        match outcome {
            Ok(value) => {
                let changed = {
                    let mut slot = self.value.write();
                    let changed = !slot.as_ref().is_some_and(|old| old.same(&value));
                    if changed {
                        *slot = Some(value.clone());
                    }
                    changed
                };
                *self.last_error.write() = None;
                if changed {
                    self.observers.notify(&value);
                } else {
                    tracing::trace!(cell = %self.id, "recomputed to the same value");
                }
            }
            Err(err) => {
                tracing::warn!(cell = %self.id, error = %err, "recompute failed, keeping last value");
                *self.last_error.write() = Some(err);
            }
        }
    }

    /// Re-run the getter outside any capture session.
    fn recompute(self: Arc<Self>) {
        match &self.getter {
            Getter::Sync(getter) => {
                let outcome = context::untracked(|| evaluate(getter));
                self.apply(outcome);
            }
            Getter::Async(getter) => {
                // Writes made before the parked run starts are picked up by it.
                if self.recompute_pending.swap(true, Ordering::SeqCst) {
                    tracing::trace!(cell = %self.id, "async recompute already pending");
                    return;
                }
                let getter = Arc::clone(getter);
                let this = Arc::clone(&self);
                let recompute = async move {
                    this.recompute_pending.store(false, Ordering::SeqCst);
                    let outcome = evaluate_async(&getter).await;
                    this.apply(outcome);
                }
                .boxed();
                self.runtime
                    .scheduler()
                    .defer(context::in_frame(Frame::Untracked, recompute));
            }
        }
    }
}

impl<T: CellValue> Drop for ComputedInner<T> {
    fn drop(&mut self) {
        // Entries left behind hold dead weak triggers and are pruned anyway.
        let disposal = self.runtime.disposal();
        disposal.forget(self.trigger_id);
        if let Some((id, _)) = &self.callback {
            disposal.forget(*id);
        }
    }
}

impl<T: CellValue> Trigger for ComputedInner<T> {
    fn fire(self: Arc<Self>) {
        self.recompute();
    }
}

impl<T: CellValue> Source for ComputedInner<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn subscribe_trigger(&self, id: ObserverId, trigger: Weak<dyn Trigger>) {
        self.observers.push_trigger(id, trigger);
    }
}

impl<T: CellValue> Capture for ComputedInner<T> {
    fn cell_id(&self) -> CellId {
        self.id
    }

    fn begin(self: Arc<Self>, session: SessionId) -> CaptureStep {
        match &self.getter {
            Getter::Sync(getter) => {
                let outcome = {
                    let _frame = FrameGuard::enter(Frame::Capture(session));
                    evaluate(getter)
                };
                self.store_initial(outcome);
                CaptureStep::Ready
            }
            Getter::Async(getter) => {
                let future = {
                    let _frame = FrameGuard::enter(Frame::Capture(session));
                    evaluate_async(getter)
                };
                let this = Arc::clone(&self);
                let capture = async move { this.store_initial(future.await) }.boxed();
                CaptureStep::Pending(context::in_frame(Frame::Capture(session), capture))
            }
        }
    }

    fn finish(self: Arc<Self>, dependencies: Vec<Arc<dyn Source>>) {
        let trigger: Arc<dyn Trigger> = self.clone();
        let trigger = Arc::downgrade(&trigger);
        for dependency in &dependencies {
            dependency.subscribe_trigger(self.trigger_id, trigger.clone());
        }
        *self.dependencies.write() = dependencies.iter().map(|d| d.cell_id()).collect();
        self.ready.store(true, Ordering::SeqCst);

        if let Some((id, callback)) = &self.callback {
            self.observers.push_callback(*id, Arc::clone(callback));
            let current = self.value.read().clone();
            if let Some(value) = current {
                callback(&value);
            }
        }
    }
}

/// A derived value that recomputes when the cells it read change.
///
/// Cloning a `ComputedRef` creates another handle to the same cell. Keep at
/// least one handle alive for as long as the cell should keep updating.
#[must_use = "a computed cell stops updating once every handle is dropped"]
pub struct ComputedRef<T: CellValue> {
    inner: Arc<ComputedInner<T>>,
}

impl<T: CellValue> ComputedRef<T> {
    /// Create a computed cell from an infallible getter.
    pub fn new<F>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
    {
        let getter = move || Ok::<T, ReactiveError>(getter());
        Self::create(runtime, Getter::Sync(Arc::new(getter)), None)
    }

    /// Create a computed cell whose getter can fail.
    pub fn try_new<F, E>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> std::result::Result<T, E> + Send + Sync + 'static,
        E: std::fmt::Display,
    {
        let getter = move || getter().map_err(ReactiveError::getter);
        Self::create(runtime, Getter::Sync(Arc::new(getter)), None)
    }

    /// Create a computed cell that calls `callback` with every new value,
    /// starting with the first one.
    pub fn with_callback<F, C>(runtime: &Runtime, getter: F, callback: C) -> Self
    where
        F: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T) + Send + Sync + 'static,
    {
        let getter = move || Ok::<T, ReactiveError>(getter());
        let callback: Callback<T> = Arc::new(callback);
        Self::create(
            runtime,
            Getter::Sync(Arc::new(getter)),
            Some((ObserverId::new(), callback)),
        )
    }

    /// Create a computed cell from an async getter.
    ///
    /// The first evaluation holds the capture session until its future
    /// resolves; drive it with [`Runtime::settle`]. Later recomputations are
    /// also parked until the next `settle`.
    pub fn new_async<F, Fut>(runtime: &Runtime, getter: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        let getter = move || getter().map(Ok::<T, ReactiveError>).boxed();
        Self::create(runtime, Getter::Async(Arc::new(getter)), None)
    }

    fn create(runtime: &Runtime, getter: Getter<T>, callback: Option<(ObserverId, Callback<T>)>) -> Self {
        let inner = Arc::new(ComputedInner {
            id: CellId::new(),
            runtime: runtime.clone(),
            getter,
            value: RwLock::new(None),
            last_error: RwLock::new(None),
            observers: ObserverList::new(runtime.disposal_handle()),
            trigger_id: ObserverId::new(),
            callback,
            dependencies: RwLock::new(SmallVec::new()),
            ready: AtomicBool::new(false),
            recompute_pending: AtomicBool::new(false),
        });

        let scheduler = runtime.scheduler();
        scheduler.enqueue(inner.clone());
        scheduler.drain();

        Self { inner }
    }

    /// The cell's unique ID.
    pub fn id(&self) -> CellId {
        self.inner.id
    }

    /// Get the last computed value, or `None` if the cell has not been
    /// populated yet (or its first evaluation failed).
    ///
    /// If another computed cell is capturing, this read makes it depend on
    /// this cell.
    pub fn get(&self) -> Option<T> {
        let source: Arc<dyn Source> = self.inner.clone();
        self.inner.runtime.track(source);
        self.inner.value.read().clone()
    }

    /// Get the last computed value without recording a dependency.
    pub fn get_untracked(&self) -> Option<T> {
        self.inner.value.read().clone()
    }

    /// Whether the first capture session has finished.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.load(Ordering::SeqCst)
    }

    /// The most recent getter failure, if the last evaluation failed.
    pub fn last_error(&self) -> Option<ReactiveError> {
        self.inner.last_error.read().clone()
    }

    /// Number of distinct cells captured as dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependencies.read().len()
    }

    /// Ids of the captured dependencies, in first-read order.
    pub fn dependencies(&self) -> Vec<CellId> {
        self.inner.dependencies.read().to_vec()
    }

    /// Re-run the getter now and notify observers if the value changed.
    pub fn update(&self) {
        Arc::clone(&self.inner).recompute();
    }

    /// Subscribe `observer` to changes of this cell.
    pub fn watch<F>(&self, observer: F) -> ObserverId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ObserverId::new();
        self.inner.observers.push_callback(id, Arc::new(observer));
        id
    }

    /// Dispose one observer.
    pub fn unwatch(&self, id: ObserverId) {
        self.inner.runtime.disposal().dispose(id);
    }

    /// Observer entries currently in the list, including disposed entries
    /// that have not been pruned yet.
    pub fn observer_count(&self) -> usize {
        self.inner.observers.len()
    }
}

impl<T: CellValue> Detach for ComputedRef<T> {
    fn propagation_ids(&self) -> SmallVec<[ObserverId; 2]> {
        let mut ids = smallvec![self.inner.trigger_id];
        if let Some((id, _)) = &self.inner.callback {
            ids.push(*id);
        }
        ids
    }
}

impl<T: CellValue> Clone for ComputedRef<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> std::fmt::Debug for ComputedRef<T>
where
    T: CellValue + std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputedRef")
            .field("id", &self.inner.id)
            .field("value", &self.get_untracked())
            .field("ready", &self.is_ready())
            .field("dependency_count", &self.dependency_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ValueRef;
    use std::sync::atomic::AtomicI32;

    #[test]
    fn computed_sums_sources() {
        let rt = Runtime::new();
        let a = ValueRef::new(&rt, 1);
        let b = ValueRef::new(&rt, 10);

        let (a2, b2) = (a.clone(), b.clone());
        let sum = ComputedRef::new(&rt, move || a2.get() + b2.get());

        assert!(sum.is_ready());
        assert_eq!(sum.get(), Some(11));
        assert_eq!(sum.dependencies(), vec![a.id(), b.id()]);

        a.set(5);
        assert_eq!(sum.get(), Some(15));
    }

    #[test]
    fn computed_recomputes_once_per_change() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 0);
        let runs = Arc::new(AtomicI32::new(0));

        let (source2, runs2) = (source.clone(), runs.clone());
        let doubled = ComputedRef::new(&rt, move || {
            runs2.fetch_add(1, Ordering::SeqCst);
            source2.get() * 2
        });
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(0);
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(3);
        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(doubled.get(), Some(6));
    }

    #[test]
    fn callback_runs_immediately_and_on_change() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 2);
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let (source2, seen2) = (source.clone(), seen.clone());
        let _squared = ComputedRef::with_callback(
            &rt,
            move || source2.get() * source2.get(),
            move |v| seen2.lock().push(*v),
        );
        assert_eq!(*seen.lock(), vec![4]);

        source.set(3);
        assert_eq!(*seen.lock(), vec![4, 9]);
    }

    #[test]
    fn unchanged_result_does_not_notify() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 1);
        let source2 = source.clone();
        let parity = ComputedRef::new(&rt, move || source2.get() % 2);

        let notified = Arc::new(AtomicI32::new(0));
        let notified2 = notified.clone();
        parity.watch(move |_| {
            notified2.fetch_add(1, Ordering::SeqCst);
        });

        source.set(3);
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        source.set(4);
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn manual_update_reruns_getter() {
        let rt = Runtime::new();
        let external = Arc::new(AtomicI32::new(1));
        let external2 = external.clone();
        let cell = ComputedRef::new(&rt, move || external2.load(Ordering::SeqCst));

        let notified = Arc::new(AtomicI32::new(0));
        let notified2 = notified.clone();
        cell.watch(move |_| {
            notified2.fetch_add(1, Ordering::SeqCst);
        });

        cell.update();
        assert_eq!(notified.load(Ordering::SeqCst), 0);

        external.store(7, Ordering::SeqCst);
        cell.update();
        assert_eq!(cell.get(), Some(7));
        assert_eq!(notified.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failing_initial_capture_leaves_cell_unset() {
        let rt = Runtime::new();
        let broken: ComputedRef<i32> = ComputedRef::try_new(&rt, || Err("no data"));

        assert!(broken.is_ready());
        assert_eq!(broken.get(), None);
        assert_eq!(broken.dependency_count(), 0);
        assert_eq!(broken.last_error(), Some(ReactiveError::getter("no data")));
    }

    #[test]
    fn panicking_getter_is_contained() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 0);
        let source2 = source.clone();

        let guarded = ComputedRef::new(&rt, move || {
            let v = source2.get();
            if v == 13 {
                panic!("unlucky");
            }
            v
        });
        assert_eq!(guarded.get(), Some(0));

        source.set(13);
        assert_eq!(guarded.get(), Some(0));
        assert!(matches!(guarded.last_error(), Some(ReactiveError::Panicked { .. })));

        source.set(14);
        assert_eq!(guarded.get(), Some(14));
        assert!(guarded.last_error().is_none());
    }

    #[test]
    fn dependencies_are_fixed_after_first_capture() {
        let rt = Runtime::new();
        let flag = ValueRef::new(&rt, false);
        let left = ValueRef::new(&rt, 1);
        let right = ValueRef::new(&rt, 2);

        let (f, l, r) = (flag.clone(), left.clone(), right.clone());
        let pick = ComputedRef::new(&rt, move || if f.get() { r.get() } else { l.get() });
        assert_eq!(pick.dependencies(), vec![flag.id(), left.id()]);

        flag.set(true);
        assert_eq!(pick.get(), Some(2));

        // `right` was never captured, so it does not drive recomputation.
        right.set(20);
        assert_eq!(pick.get(), Some(2));
        assert_eq!(pick.dependency_count(), 2);
    }

    #[test]
    fn detach_stops_recomputation() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 1);
        let runs = Arc::new(AtomicI32::new(0));

        let (source2, runs2) = (source.clone(), runs.clone());
        let cell = ComputedRef::new(&rt, move || {
            runs2.fetch_add(1, Ordering::SeqCst);
            source2.get()
        });

        rt.detach(&cell);
        assert_eq!(source.observer_count(), 1);

        source.set(2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(cell.get(), Some(1));
        assert_eq!(source.observer_count(), 0);
    }

    #[test]
    fn dropped_cell_is_pruned() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 1);
        let source2 = source.clone();
        let cell = ComputedRef::new(&rt, move || source2.get());
        assert_eq!(source.observer_count(), 1);

        drop(cell);
        source.set(2);
        assert_eq!(source.observer_count(), 0);
    }

    #[tokio::test]
    async fn async_getter_populates_after_settle() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 4);
        let source2 = source.clone();

        let cell = ComputedRef::new_async(&rt, move || {
            let source = source2.clone();
            async move {
                tokio::task::yield_now().await;
                source.get() + 1
            }
        });
        assert!(!cell.is_ready());
        assert_eq!(cell.get(), None);

        rt.settle().await;
        assert_eq!(cell.get(), Some(5));
        assert_eq!(cell.dependencies(), vec![source.id()]);

        source.set(9);
        // Async recomputation waits for the next settle.
        assert_eq!(cell.get(), Some(5));
        rt.settle().await;
        assert_eq!(cell.get(), Some(10));
    }

    #[tokio::test]
    async fn async_recomputes_are_coalesced() {
        let rt = Runtime::new();
        let source = ValueRef::new(&rt, 0);
        let runs = Arc::new(AtomicI32::new(0));

        let (source2, runs2) = (source.clone(), runs.clone());
        let cell = ComputedRef::new_async(&rt, move || {
            let (source, runs) = (source2.clone(), runs2.clone());
            async move {
                runs.fetch_add(1, Ordering::SeqCst);
                source.get()
            }
        });
        rt.settle().await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        source.set(1);
        source.set(2);
        source.set(3);
        rt.settle().await;

        assert_eq!(runs.load(Ordering::SeqCst), 2);
        assert_eq!(cell.get(), Some(3));
    }
}
