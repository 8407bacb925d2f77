//! Capture Scheduler
//!
//! Dependency discovery works by recording every cell read while a getter
//! runs. That record is shared mutable state, so two discoveries must never
//! overlap. The scheduler serializes them.
//!
//! # State Machine
//!
//! ```text
//!            queue non-empty, no session
//!   Idle ───────────────────────────────▶ Capturing
//!    ▲                                        │
//!    └────────────────────────────────────────┘
//!          getter settled (value or error)
//! ```
//!
//! After each session the drain loop immediately checks the queue again, so
//! cells created while another cell was capturing run next, in FIFO order.
//!
//! # Sync and Async Getters
//!
//! A synchronous getter finishes inside [`CaptureScheduler::drain`]. An async
//! getter returns a pending future; the session then stays open and the
//! future is parked in the scheduler until someone drives it with
//! [`CaptureScheduler::settle`]. Nothing else may capture in the meantime,
//! whether the future eventually resolves, fails, or panics.
//!
//! Only the *first* evaluation of a computed cell goes through the queue.
//! Later recomputations are direct; async recomputations are parked in a
//! separate FIFO that `settle` also drains.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use smallvec::SmallVec;
use tokio::sync::Notify;

use super::context::{self, SessionId};
use super::observer::{CellId, ObserverId, Trigger};

/// A cell that can be depended on.
pub(crate) trait Source: Send + Sync {
    fn cell_id(&self) -> CellId;

    /// Register `trigger` to fire whenever this cell changes.
    fn subscribe_trigger(&self, id: ObserverId, trigger: std::sync::Weak<dyn Trigger>);
}

/// Outcome of starting a capture.
pub(crate) enum CaptureStep {
    /// The getter already ran to completion.
    Ready,
    /// The getter is still running; the session stays open until this
    /// future resolves.
    Pending(BoxFuture<'static, ()>),
}

/// A queued dependency discovery. Implemented by computed cells.
pub(crate) trait Capture: Send + Sync {
    fn cell_id(&self) -> CellId;

    /// Evaluate the getter inside `session`.
    fn begin(self: Arc<Self>, session: SessionId) -> CaptureStep;

    /// Called once the session has closed, with the cells it read.
    fn finish(self: Arc<Self>, dependencies: Vec<Arc<dyn Source>>);
}

/// Scratch state of the single active session.
pub struct CaptureSession {
    id: SessionId,
    owner: CellId,
    dependencies: SmallVec<[Arc<dyn Source>; 8]>,
}

impl CaptureSession {
    fn new(id: SessionId, owner: CellId) -> Self {
        Self {
            id,
            owner,
            dependencies: SmallVec::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The computed cell whose getter is being captured.
    pub fn owner(&self) -> CellId {
        self.owner
    }

    fn record(&mut self, source: Arc<dyn Source>, dedupe: bool) {
        let id = source.cell_id();
        // A getter reading its own cell would subscribe the cell to itself.
        if id == self.owner {
            return;
        }
        if dedupe && self.dependencies.iter().any(|dep| dep.cell_id() == id) {
            return;
        }
        self.dependencies.push(source);
    }

    fn into_dependencies(self) -> Vec<Arc<dyn Source>> {
        self.dependencies.into_vec()
    }
}

struct InFlight {
    job: Arc<dyn Capture>,
    future: BoxFuture<'static, ()>,
}

#[derive(Default)]
struct SchedulerState {
    queue: VecDeque<Arc<dyn Capture>>,
    /// The open session. `Some` means Capturing.
    session: Option<CaptureSession>,
    /// A drain loop is running somewhere.
    draining: bool,
    /// Pending async capture, waiting to be driven by `settle`.
    in_flight: Option<InFlight>,
    /// Pending async recomputations, in the order they were triggered.
    recomputes: VecDeque<BoxFuture<'static, ()>>,
}

enum Work {
    Capture(InFlight),
    Recompute(BoxFuture<'static, ()>),
    Drain,
    Wait,
    Done,
}

enum Parked {
    Capture(InFlight),
    Recompute(BoxFuture<'static, ()>),
}

/// Holds work taken out of the state while `settle` drives it. If the
/// `settle` future is dropped mid-await the work goes back where it came
/// from, so the next caller resumes it.
struct Requeue<'a> {
    scheduler: &'a CaptureScheduler,
    work: Option<Parked>,
}

impl Requeue<'_> {
    fn future(&mut self) -> Option<&mut BoxFuture<'static, ()>> {
        match self.work.as_mut()? {
            Parked::Capture(in_flight) => Some(&mut in_flight.future),
            Parked::Recompute(future) => Some(future),
        }
    }
}

impl Drop for Requeue<'_> {
    fn drop(&mut self) {
        let Some(work) = self.work.take() else {
            return;
        };
        {
            let mut state = self.scheduler.state.lock();
            match work {
                Parked::Capture(in_flight) => state.in_flight = Some(in_flight),
                Parked::Recompute(future) => state.recomputes.push_front(future),
            }
        }
        tracing::debug!("settle cancelled, pending work requeued");
        self.scheduler.settled.notify_waiters();
    }
}

/// Serializes dependency-capture sessions.
pub struct CaptureScheduler {
    state: Mutex<SchedulerState>,
    /// Woken whenever a session closes or a drain loop exits.
    settled: Notify,
    dedupe: bool,
}

impl CaptureScheduler {
    pub(crate) fn new(dedupe: bool) -> Self {
        Self {
            state: Mutex::new(SchedulerState::default()),
            settled: Notify::new(),
            dedupe,
        }
    }

    /// Whether a capture session is currently open.
    pub fn is_capturing(&self) -> bool {
        self.state.lock().session.is_some()
    }

    /// Number of cells waiting for their first capture.
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Whether there is nothing queued, capturing or recomputing.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.session.is_none()
            && !state.draining
            && state.queue.is_empty()
            && state.in_flight.is_none()
            && state.recomputes.is_empty()
    }

    pub(crate) fn enqueue(&self, job: Arc<dyn Capture>) {
        let mut state = self.state.lock();
        tracing::trace!(cell = %job.cell_id(), queued = state.queue.len() + 1, "capture queued");
        state.queue.push_back(job);
    }

    /// Record a read of `source` if it belongs to the open session.
    pub(crate) fn track(&self, source: Arc<dyn Source>) {
        let Some(current) = context::current_session() else {
            return;
        };
        let mut state = self.state.lock();
        match state.session.as_mut() {
            Some(session) if session.id == current => session.record(source, self.dedupe),
            _ => {}
        }
    }

    /// Run queued captures until the queue is empty or an async getter is
    /// left pending. Returns immediately if a session is already open or
    /// another drain loop is running; that loop will pick up new entries.
    pub(crate) fn drain(&self) {
        {
            let mut state = self.state.lock();
            if state.draining || state.session.is_some() {
                return;
            }
            state.draining = true;
        }

        loop {
            let (job, session) = {
                let mut state = self.state.lock();
                if state.session.is_some() {
                    state.draining = false;
                    break;
                }
                let Some(job) = state.queue.pop_front() else {
                    state.draining = false;
                    break;
                };
                let session = SessionId::next();
                state.session = Some(CaptureSession::new(session, job.cell_id()));
                (job, session)
            };

            tracing::debug!(cell = %job.cell_id(), session = session.0, "capture session started");

            match Arc::clone(&job).begin(session) {
                CaptureStep::Ready => self.complete(job),
                CaptureStep::Pending(future) => {
                    let mut state = self.state.lock();
                    tracing::debug!(cell = %job.cell_id(), "capture session suspended");
                    state.in_flight = Some(InFlight { job, future });
                    state.draining = false;
                    break;
                }
            }
        }

        self.settled.notify_waiters();
    }

    /// Close the open session and hand its dependencies to `job`.
    fn complete(&self, job: Arc<dyn Capture>) {
        let session = self.state.lock().session.take();
        let dependencies = session
            .map(CaptureSession::into_dependencies)
            .unwrap_or_default();

        tracing::debug!(
            cell = %job.cell_id(),
            dependencies = dependencies.len(),
            "capture session finished"
        );

        job.finish(dependencies);
        self.settled.notify_waiters();
    }

    /// Park an async recomputation until the next `settle`.
    pub(crate) fn defer(&self, recompute: BoxFuture<'static, ()>) {
        self.state.lock().recomputes.push_back(recompute);
    }

    /// Drive pending async work until the scheduler is idle.
    ///
    /// Several tasks may call this at once; whichever picks up a piece of
    /// work drives it and the others wait to be woken.
    pub async fn settle(&self) {
        loop {
            let notified = self.settled.notified();

            let work = {
                let mut state = self.state.lock();
                if let Some(in_flight) = state.in_flight.take() {
                    Work::Capture(in_flight)
                } else if let Some(recompute) = state.recomputes.pop_front() {
                    Work::Recompute(recompute)
                } else if state.session.is_some() || state.draining {
                    Work::Wait
                } else if !state.queue.is_empty() {
                    Work::Drain
                } else {
                    Work::Done
                }
            };

            match work {
                Work::Capture(in_flight) => {
                    if let Some(InFlight { job, .. }) = self.drive(Parked::Capture(in_flight)).await {
                        self.complete(job);
                    }
                }
                Work::Recompute(recompute) => {
                    self.drive(Parked::Recompute(recompute)).await;
                    self.settled.notify_waiters();
                }
                Work::Drain => self.drain(),
                Work::Wait => notified.await,
                Work::Done => return,
            }
        }
    }

    /// Poll parked work to completion. Returns the capture job, if any, once
    /// its future has resolved.
    async fn drive(&self, work: Parked) -> Option<InFlight> {
        let mut guard = Requeue {
            scheduler: self,
            work: Some(work),
        };
        if let Some(future) = guard.future() {
            future.await;
        }
        match guard.work.take()? {
            Parked::Capture(in_flight) => Some(in_flight),
            Parked::Recompute(_) => None,
        }
    }
}

impl std::fmt::Debug for CaptureScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CaptureScheduler")
            .field("queued", &state.queue.len())
            .field("capturing", &state.session.is_some())
            .field("in_flight", &state.in_flight.is_some())
            .field("recomputes", &state.recomputes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::context::{Frame, FrameGuard};
    use futures_util::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Leaf(CellId);

    impl Source for Leaf {
        fn cell_id(&self) -> CellId {
            self.0
        }

        fn subscribe_trigger(&self, _id: ObserverId, _trigger: std::sync::Weak<dyn Trigger>) {}
    }

    /// A job that reads `reads` and reports what it captured.
    struct Job {
        id: CellId,
        scheduler: Arc<CaptureScheduler>,
        reads: Vec<Arc<Leaf>>,
        captured: Mutex<Option<Vec<CellId>>>,
        pending: bool,
    }

    impl Job {
        fn new(scheduler: &Arc<CaptureScheduler>, reads: Vec<Arc<Leaf>>, pending: bool) -> Arc<Self> {
            Arc::new(Self {
                id: CellId::new(),
                scheduler: scheduler.clone(),
                reads,
                captured: Mutex::new(None),
                pending,
            })
        }

        fn read_all(&self) {
            for leaf in &self.reads {
                self.scheduler.track(leaf.clone());
            }
        }
    }

    impl Capture for Job {
        fn cell_id(&self) -> CellId {
            self.id
        }

        fn begin(self: Arc<Self>, session: SessionId) -> CaptureStep {
            if self.pending {
                let this = self.clone();
                let future = async move {
                    tokio::task::yield_now().await;
                    this.read_all();
                }
                .boxed();
                CaptureStep::Pending(context::in_frame(Frame::Capture(session), future))
            } else {
                let _frame = FrameGuard::enter(Frame::Capture(session));
                self.read_all();
                CaptureStep::Ready
            }
        }

        fn finish(self: Arc<Self>, dependencies: Vec<Arc<dyn Source>>) {
            *self.captured.lock() = Some(dependencies.iter().map(|d| d.cell_id()).collect());
        }
    }

    fn leaves(n: usize) -> Vec<Arc<Leaf>> {
        (0..n).map(|_| Arc::new(Leaf(CellId::new()))).collect()
    }

    #[test]
    fn sync_capture_completes_in_drain() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let reads = leaves(2);
        let job = Job::new(&scheduler, reads.clone(), false);

        scheduler.enqueue(job.clone());
        scheduler.drain();

        let captured = job.captured.lock().clone().unwrap();
        assert_eq!(captured, vec![reads[0].0, reads[1].0]);
        assert!(scheduler.is_idle());
    }

    #[test]
    fn repeated_reads_are_deduplicated() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let leaf = leaves(1).remove(0);
        let job = Job::new(&scheduler, vec![leaf.clone(), leaf.clone()], false);

        scheduler.enqueue(job.clone());
        scheduler.drain();
        assert_eq!(job.captured.lock().as_ref().unwrap().len(), 1);

        let scheduler = Arc::new(CaptureScheduler::new(false));
        let job = Job::new(&scheduler, vec![leaf.clone(), leaf], false);
        scheduler.enqueue(job.clone());
        scheduler.drain();
        assert_eq!(job.captured.lock().as_ref().unwrap().len(), 2);
    }

    #[test]
    fn reads_outside_a_capture_frame_are_ignored() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let leaf = leaves(1).remove(0);

        scheduler.track(leaf);
        assert!(!scheduler.is_capturing());
    }

    #[tokio::test]
    async fn pending_capture_blocks_the_queue() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let first_reads = leaves(1);
        let second_reads = leaves(1);
        let first = Job::new(&scheduler, first_reads.clone(), true);
        let second = Job::new(&scheduler, second_reads.clone(), false);

        scheduler.enqueue(first.clone());
        scheduler.drain();
        assert!(scheduler.is_capturing());

        scheduler.enqueue(second.clone());
        scheduler.drain();
        // Still waiting behind the async session.
        assert!(second.captured.lock().is_none());
        assert_eq!(scheduler.pending(), 1);

        scheduler.settle().await;

        assert_eq!(first.captured.lock().clone().unwrap(), vec![first_reads[0].0]);
        assert_eq!(second.captured.lock().clone().unwrap(), vec![second_reads[0].0]);
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn deferred_recomputes_run_in_order() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let order = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::new(AtomicUsize::new(0));

        for tag in 0..3 {
            let order = order.clone();
            let counter = counter.clone();
            scheduler.defer(
                async move {
                    tokio::task::yield_now().await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    order.lock().push(tag);
                }
                .boxed(),
            );
        }

        scheduler.settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(*order.lock(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn dropped_settle_requeues_the_open_capture() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let reads = leaves(1);
        let first = Job::new(&scheduler, reads.clone(), true);
        let second = Job::new(&scheduler, leaves(1), false);

        scheduler.enqueue(first.clone());
        scheduler.drain();
        scheduler.enqueue(second.clone());

        // One poll reaches the job's yield, then the settle future is dropped.
        assert!(scheduler.settle().now_or_never().is_none());
        assert!(scheduler.is_capturing());
        assert!(first.captured.lock().is_none());

        scheduler.settle().await;
        assert_eq!(first.captured.lock().clone().unwrap(), vec![reads[0].0]);
        assert!(second.captured.lock().is_some());
        assert!(scheduler.is_idle());
    }

    #[tokio::test]
    async fn dropped_settle_keeps_recompute_at_the_front() {
        let scheduler = Arc::new(CaptureScheduler::new(true));
        let order = Arc::new(Mutex::new(Vec::new()));

        for tag in 0..2 {
            let order = order.clone();
            scheduler.defer(
                async move {
                    tokio::task::yield_now().await;
                    order.lock().push(tag);
                }
                .boxed(),
            );
        }

        assert!(scheduler.settle().now_or_never().is_none());
        assert!(order.lock().is_empty());

        scheduler.settle().await;
        assert_eq!(*order.lock(), vec![0, 1]);
    }
}
