//! Reactive Primitives
//!
//! This module implements the engine: live values, derived values and
//! subscriptions, all hanging off one [`Runtime`].
//!
//! # Concepts
//!
//! ## Live Values
//!
//! A [`LiveValue`] connects to something outside the graph (a timer, a
//! socket, a manual test driver) and pushes whatever it receives through a
//! [`Sender`]. Until the first value arrives, reading it suspends the
//! reader.
//!
//! ## Derived Values
//!
//! A [`DerivedValue`] is a computation over other values. Both kinds are
//! memoized per argument tuple: reading the same value with equal arguments
//! always reaches the same node, for as long as that node has consumers.
//!
//! ## Subscriptions
//!
//! A [`Subscription`] is how the outside world observes a value. It keeps
//! the value's node (and everything upstream) alive until closed.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered while computations run. A computation gets a
//! [`Cx`] naming the node being evaluated, and every read through it adds
//! an edge. Propagation is synchronous and depth-first: by the time
//! [`Sender::send`] returns, every affected subscriber has been called.

mod context;
mod derived;
mod live;
mod runtime;
mod subscription;

pub use context::Cx;
pub use derived::{DerivedBuilder, DerivedValue};
pub use live::{Cleanup, LiveValue, Sender};
pub use runtime::Runtime;
pub use subscription::Subscription;

use crate::error::{Error, Interrupt};

/// Anything that can be read inside a computation and subscribed to from
/// outside.
pub trait Value<A, T> {
    /// Read the value at `args`, recording a dependency of the node
    /// evaluated by `cx`.
    fn get(&self, cx: &mut Cx, args: A) -> Result<T, Interrupt>;

    /// Observe the value at `args` from outside the graph.
    fn subscribe<F>(&self, args: A, on_value: F) -> Result<Subscription, Error>
    where
        F: FnMut(&T) + 'static;
}
