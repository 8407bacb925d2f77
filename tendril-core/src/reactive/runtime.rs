//! Reactive Runtime
//!
//! The runtime is the explicit owner of everything the graph shares: the
//! capture scheduler, the disposal registry, and the configuration. There is
//! no global state; every cell holds a handle to the runtime it was created
//! in, and cells from different runtimes never see each other's captures.
//!
//! # How It Works
//!
//! 1. Value cells are created directly and only need the runtime for read
//!    tracking and disposal checks.
//!
//! 2. Computed cells are enqueued with the scheduler, which runs their first
//!    evaluation inside a capture session, one at a time.
//!
//! 3. Writes propagate synchronously through observer lists; the runtime is
//!    only consulted to skip detached observers.
//!
//! # Thread Safety
//!
//! `Runtime` is a cheap, cloneable `Send + Sync` handle. The scheduler keeps
//! its queue and session behind one mutex; each observer list has its own.

use std::future::Future;
use std::sync::Arc;

use smallvec::SmallVec;

use super::computed::ComputedRef;
use super::disposal::DisposalRegistry;
use super::observer::ObserverId;
use super::scheduler::{CaptureScheduler, Source};
use super::signal::ValueRef;
use super::value::CellValue;
use crate::config::{RuntimeConfig, ValueOptions};

/// Cells (and watchers) whose propagation callbacks can be detached.
pub trait Detach {
    /// Ids of the callbacks this cell contributes to other cells' observer
    /// lists: its recompute trigger and/or its construction-time callback.
    fn propagation_ids(&self) -> SmallVec<[ObserverId; 2]>;
}

struct RuntimeInner {
    config: RuntimeConfig,
    scheduler: CaptureScheduler,
    disposal: Arc<DisposalRegistry>,
}

/// Handle to a reactive runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Arc<RuntimeInner>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        tracing::debug!(label = config.label.as_deref(), "reactive runtime created");
        Self {
            inner: Arc::new(RuntimeInner {
                scheduler: CaptureScheduler::new(config.dedupe_dependencies),
                disposal: Arc::new(DisposalRegistry::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    pub fn scheduler(&self) -> &CaptureScheduler {
        &self.inner.scheduler
    }

    pub fn disposal(&self) -> &DisposalRegistry {
        &self.inner.disposal
    }

    pub(crate) fn disposal_handle(&self) -> Arc<DisposalRegistry> {
        Arc::clone(&self.inner.disposal)
    }

    /// Whether two handles refer to the same runtime.
    pub fn ptr_eq(&self, other: &Runtime) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Create a deep value cell.
    pub fn value_ref<T: CellValue>(&self, initial: T) -> ValueRef<T> {
        ValueRef::new(self, initial)
    }

    /// Create a shallow value cell.
    pub fn shallow_ref<T: CellValue>(&self, initial: T) -> ValueRef<T> {
        ValueRef::with_options(self, initial, ValueOptions::shallow())
    }

    /// Create a computed cell.
    pub fn computed_ref<T, F>(&self, getter: F) -> ComputedRef<T>
    where
        T: CellValue,
        F: Fn() -> T + Send + Sync + 'static,
    {
        ComputedRef::new(self, getter)
    }

    /// Create a computed cell with a callback primed with its first value.
    pub fn computed_with<T, F, C>(&self, getter: F, callback: C) -> ComputedRef<T>
    where
        T: CellValue,
        F: Fn() -> T + Send + Sync + 'static,
        C: Fn(&T) + Send + Sync + 'static,
    {
        ComputedRef::with_callback(self, getter, callback)
    }

    /// Create a computed cell from an async getter.
    pub fn computed_async<T, F, Fut>(&self, getter: F) -> ComputedRef<T>
    where
        T: CellValue,
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        ComputedRef::new_async(self, getter)
    }

    /// Detach a cell's propagation callbacks.
    ///
    /// The callbacks stay in the observer lists they were registered with
    /// until those lists are next walked; they are skipped and pruned then.
    /// A notification already in progress may still reach them.
    pub fn detach<D: Detach + ?Sized>(&self, cell: &D) {
        let ids = cell.propagation_ids();
        if ids.is_empty() {
            tracing::trace!("detach on a cell without propagation callbacks");
        }
        for id in ids {
            self.inner.disposal.dispose(id);
        }
    }

    /// Whether a capture session is open.
    pub fn is_capturing(&self) -> bool {
        self.inner.scheduler.is_capturing()
    }

    /// Drive in-flight async captures and recomputations until idle.
    pub async fn settle(&self) {
        self.inner.scheduler.settle().await;
    }

    pub(crate) fn track(&self, source: Arc<dyn Source>) {
        self.inner.scheduler.track(source);
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("scheduler", &self.inner.scheduler)
            .field("disposed", &self.inner.disposal.len())
            .finish()
    }
}
