//! Reactive Cells
//!
//! This module implements the cell layer of the graph: value cells, computed
//! cells, and the machinery that lets computed cells discover what they
//! depend on.
//!
//! # Concepts
//!
//! ## Value Cells
//!
//! A [`ValueRef`] holds one mutable value. Reading it while a computed cell
//! is capturing registers it as a dependency. Writing a different value
//! notifies every observer, synchronously and in subscription order.
//! Composite values are wrapped in a deep reactive proxy, so mutating a
//! nested field notifies the cell's observers as well.
//!
//! ## Computed Cells
//!
//! A [`ComputedRef`] is a value derived by a getter. Its dependencies are
//! whatever cells the getter read during its first evaluation. Whenever one
//! of them changes the getter runs again and the cell's own observers hear
//! about the new value.
//!
//! ## Capture Sessions
//!
//! Dependency discovery records reads into shared scratch state, so only one
//! discovery may run at a time. The [`CaptureScheduler`] queues computed
//! cells and runs their first evaluations one after another, including async
//! getters that suspend part way through.
//!
//! ## Disposal
//!
//! [`Runtime::detach`] marks a cell's propagation callbacks as disposed. They
//! are skipped and pruned the next time the lists holding them are walked.
//!
//! # Implementation Notes
//!
//! Dependency tracking is automatic: a thread-local stack of tracking frames
//! says whether the running code belongs to the open capture session. All
//! shared state lives behind an explicit [`Runtime`] handle rather than in
//! globals, so independent graphs can coexist in one process.

mod computed;
mod context;
mod disposal;
mod observer;
mod runtime;
mod scheduler;
mod signal;
mod value;
mod watch;

pub use computed::ComputedRef;
pub use context::{untracked, SessionId};
pub use disposal::DisposalRegistry;
pub use observer::{Callback, CellId, ObserverId};
pub use runtime::{Detach, Runtime};
pub use scheduler::{CaptureScheduler, CaptureSession};
pub use signal::ValueRef;
pub use value::CellValue;
pub use watch::{MaybeRef, WatchSource, Watcher};
