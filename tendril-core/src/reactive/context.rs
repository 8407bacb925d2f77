//! Tracking Context
//!
//! The scheduler knows *which* capture session is open. The tracking context
//! knows whether the code running *right now, on this thread* belongs to it.
//! Reads are only recorded when both agree.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Running a capturing getter pushes a
//! `Capture` frame; running a recomputation (or user code wrapped in
//! [`untracked`]) pushes an `Untracked` frame. A cell read consults the top
//! frame only.
//!
//! Async getters do not stay on one stack. Their futures are wrapped so the
//! frame is pushed for the duration of every `poll` and popped before the
//! future yields, which keeps reads made by unrelated tasks out of the
//! session while the getter is suspended.

use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;

/// Identifier of one capture session. Unique across runtimes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(pub(crate) u64);

impl SessionId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// One entry in the tracking stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Frame {
    /// Reads belong to the given capture session.
    Capture(SessionId),
    /// Reads are not recorded.
    Untracked,
}

thread_local! {
    static FRAME_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Guard that pops its frame when dropped.
///
/// Dropping restores the stack even if the code inside panicked, which is
/// what lets a panicking getter be caught without leaving the thread stuck
/// in a capture.
pub(crate) struct FrameGuard {
    frame: Frame,
}

impl FrameGuard {
    pub(crate) fn enter(frame: Frame) -> Self {
        FRAME_STACK.with(|stack| stack.borrow_mut().push(frame));
        Self { frame }
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAME_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();
            debug_assert_eq!(
                popped,
                Some(self.frame),
                "tracking frame mismatch: expected {:?}, got {:?}",
                self.frame,
                popped
            );
        });
    }
}

/// The capture session the current code is reading on behalf of, if any.
pub(crate) fn current_session() -> Option<SessionId> {
    FRAME_STACK.with(|stack| match stack.borrow().last() {
        Some(Frame::Capture(session)) => Some(*session),
        _ => None,
    })
}

/// Run `f` without recording any reads it makes.
///
/// Useful inside a getter that needs to peek at a cell without depending on
/// it.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    let _guard = FrameGuard::enter(Frame::Untracked);
    f()
}

/// Future that re-enters a frame around every poll of its inner future.
pub(crate) struct InFrame {
    frame: Frame,
    inner: BoxFuture<'static, ()>,
}

impl Future for InFrame {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let _guard = FrameGuard::enter(self.frame);
        self.inner.as_mut().poll(cx)
    }
}

/// Wrap `inner` so it is always polled inside `frame`.
pub(crate) fn in_frame(frame: Frame, inner: BoxFuture<'static, ()>) -> BoxFuture<'static, ()> {
    Box::pin(InFrame { frame, inner })
}
