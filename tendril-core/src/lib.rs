//! Tendril Core
//!
//! This crate provides the reactive value graph that the Tendril UI framework
//! builds on. It implements:
//!
//! - Deep reactive proxies over composite data
//! - Value cells with observer notification
//! - Computed cells with automatic dependency discovery
//! - A scheduler that serializes dependency capture, sync or async
//! - Disposal of propagation callbacks
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `data`: The dynamic [`Data`] model, the reactivity marker, and the proxy
//! - `reactive`: Cells, capture scheduling, disposal, and watching
//! - `config`: Runtime and cell options
//! - `error`: The crate's error type
//!
//! # Example
//!
//! ```rust
//! use tendril_core::Runtime;
//!
//! let rt = Runtime::new();
//!
//! // Create value cells
//! let source1 = rt.value_ref(1);
//! let source2 = rt.value_ref(10);
//!
//! // Create a derived value
//! let (a, b) = (source1.clone(), source2.clone());
//! let sum = rt.computed_ref(move || a.get() + b.get());
//! assert_eq!(sum.get(), Some(11));
//!
//! // Writes propagate before `set` returns
//! source1.set(5);
//! assert_eq!(sum.get(), Some(15));
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod reactive;

pub use config::{RuntimeConfig, ValueOptions};
pub use data::{reactive, Data, Effect, Key, Node};
pub use error::{ReactiveError, Result};
pub use reactive::{ComputedRef, Detach, Runtime, ValueRef};
