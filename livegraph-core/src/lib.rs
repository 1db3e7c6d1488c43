//! Livegraph Core
//!
//! This crate provides an in-process incremental computation runtime. It
//! implements:
//!
//! - Live values fed by external sources through a [`Sender`]
//! - Derived values, memoized per argument tuple, with dependencies
//!   discovered while they run
//! - Suspension: reading a live value that has no data yet interrupts the
//!   reader, which re-runs once the data arrives
//! - Synchronous, depth-first propagation
//! - Reference-counted teardown that runs connector cleanups
//!
//! # Architecture
//!
//! - `reactive`: the runtime, evaluation context and value engines
//! - `graph`: untyped node store, edges and cascading teardown
//! - `error`: the `Interrupt` read result and runtime errors
//! - `config`: runtime configuration
//! - `key`: identity-compared key wrapper
//!
//! # Example
//!
//! ```rust,ignore
//! use livegraph_core::{Cleanup, Cx, DerivedValue, LiveValue, Runtime, Sender};
//!
//! let runtime = Runtime::new();
//!
//! let numbers: LiveValue<(), i32> = LiveValue::new(&runtime, |_: &(), send: Sender<i32>| {
//!     stash(send);
//!     Cleanup::none()
//! });
//!
//! let doubled = DerivedValue::new(&runtime, move |_: &()| {
//!     let numbers = numbers.clone();
//!     move |cx: &mut Cx| Ok(numbers.get(cx, ())? * 2)
//! });
//!
//! // Nothing is printed until the live value has data.
//! let _subscription = doubled.subscribe((), |value| println!("{value}"))?;
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod key;
pub mod reactive;

pub use config::{EdgePolicy, RuntimeConfig};
pub use error::{BoxError, Error, Interrupt};
pub use graph::{NodeId, NodeState};
pub use key::ByRef;
pub use reactive::{
    Cleanup, Cx, DerivedBuilder, DerivedValue, LiveValue, Runtime, Sender, Subscription, Value,
};
