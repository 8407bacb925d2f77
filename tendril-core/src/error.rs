//! Error types for the reactive engine.
//!
//! Most of the engine is infallible by construction. The two places where
//! something can go wrong are:
//!
//! - A getter fails (returns an error or panics). The failure is recorded on
//!   the computed cell and logged; it never escapes to the writer that
//!   triggered the recomputation.
//! - `Runtime::watch` is handed something that is neither a cell nor a
//!   getter. That is rejected up front, since the resulting watcher could
//!   never fire.

use std::any::Any;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReactiveError {
    /// A watch source that can never change was passed to `watch`.
    #[error("cannot watch a plain {type_name}: expected a cell or a getter")]
    NotWatchable {
        /// Type name of the rejected value.
        type_name: &'static str,
    },

    /// A getter returned an error.
    #[error("getter failed: {message}")]
    Getter {
        /// Rendered error message.
        message: String,
    },

    /// A getter panicked.
    #[error("getter panicked: {message}")]
    Panicked {
        /// Panic payload, if it was a string.
        message: String,
    },
}

impl ReactiveError {
    /// Create a getter failure from any displayable error.
    pub fn getter(err: impl std::fmt::Display) -> Self {
        Self::Getter {
            message: err.to_string(),
        }
    }

    /// Build an error from a panic payload caught with `catch_unwind`.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Panicked { message }
    }
}

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;
