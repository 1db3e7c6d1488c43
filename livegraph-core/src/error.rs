//! Error types.
//!
//! Reads inside a computation return `Result<T, Interrupt>`:
//!
//! - `Ok(value)` the value is ready.
//! - `Err(Interrupt::Pending)` some live value it depends on has not
//!   delivered yet. This is a control signal, not a failure. Evaluation
//!   boundaries absorb it and re-run the computation later.
//! - `Err(Interrupt::Failed(_))` a real error, surfaced to the caller that
//!   drove the evaluation as an [`Error`].

use thiserror::Error;

use crate::graph::NodeId;

/// A boxed user error.
pub type BoxError = Box<dyn std::error::Error + 'static>;

/// Errors surfaced by the runtime.
#[derive(Debug, Error)]
pub enum Error {
    /// A node was read while its own evaluation was still on the stack.
    #[error("cycle detected: node {0} was read during its own evaluation")]
    Cycle(NodeId),

    /// A node tried to record new dependencies after it was torn down.
    #[error("node {0} is no longer part of the graph")]
    Detached(NodeId),

    /// A computation or connector returned an error.
    #[error(transparent)]
    Computation(BoxError),
}

impl Error {
    /// Recover a runtime error that travelled through a computation as a
    /// boxed error; anything else is a computation error.
    pub fn from_boxed(error: BoxError) -> Self {
        match error.downcast::<Error>() {
            Ok(error) => *error,
            Err(error) => Error::Computation(error),
        }
    }

    pub fn is_cycle(&self) -> bool {
        matches!(self, Error::Cycle(_))
    }
}

/// Why a read did not produce a value.
#[derive(Debug)]
pub enum Interrupt {
    /// No value yet; the computation will be re-run when one arrives.
    Pending,

    /// The read failed.
    Failed(BoxError),
}

impl Interrupt {
    /// Build a failure from anything that converts into a boxed error,
    /// including plain strings.
    pub fn failed(error: impl Into<BoxError>) -> Self {
        Interrupt::Failed(error.into())
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Interrupt::Pending)
    }
}

impl<E> From<E> for Interrupt
where
    E: std::error::Error + 'static,
{
    fn from(error: E) -> Self {
        Interrupt::Failed(Box::new(error))
    }
}
