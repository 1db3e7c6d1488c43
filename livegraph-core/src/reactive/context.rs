//! Evaluation Context
//!
//! The evaluation context tracks which node is currently being computed.
//! Every dependency edge is attributed to the node on top of the stack.
//!
//! # Implementation
//!
//! Each [`Runtime`] owns a stack of frames. Entering evaluation of a node
//! pushes a frame; the guard pops it when dropped, so a nested evaluation
//! (a derived node computing another derived node on first read) restores
//! the outer frame even if the inner computation panics.
//!
//! Computations never see the stack. They receive a [`Cx`], an explicit
//! handle naming the node being evaluated, and pass it to every read.

use std::cell::RefCell;

use smallvec::SmallVec;

use super::runtime::Runtime;
use super::Value;
use crate::error::{Error, Interrupt};
use crate::graph::{Consumer, NodeId};

/// Reads made by one evaluation, in order.
pub(crate) type ReadSet = SmallVec<[NodeId; 4]>;

/// An entry in the context stack.
#[derive(Debug, Clone)]
struct Frame {
    node: NodeId,
    reads: ReadSet,
}

/// The per-runtime context stack.
#[derive(Debug, Default)]
pub(crate) struct ContextStack {
    frames: Vec<Frame>,
}

impl ContextStack {
    fn push(&mut self, node: NodeId) {
        self.frames.push(Frame {
            node,
            reads: SmallVec::new(),
        });
    }

    fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub(crate) fn current(&self) -> Option<NodeId> {
        self.frames.last().map(|frame| frame.node)
    }

    #[cfg(test)]
    pub(crate) fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Check whether `node` is anywhere on the stack.
    pub(crate) fn contains(&self, node: NodeId) -> bool {
        self.frames.iter().any(|frame| frame.node == node)
    }

    fn record_read(&mut self, reader: NodeId, parent: NodeId) {
        if let Some(frame) = self.frames.last_mut() {
            debug_assert_eq!(frame.node, reader, "read attributed to a node that is not on top of the stack");
            if !frame.reads.contains(&parent) {
                frame.reads.push(parent);
            }
        }
    }

    fn reads(&self) -> ReadSet {
        self.frames
            .last()
            .map(|frame| frame.reads.clone())
            .unwrap_or_default()
    }
}

/// Guard that pops the context frame when dropped.
pub(crate) struct ContextGuard<'a> {
    stack: &'a RefCell<ContextStack>,
    node: NodeId,
}

impl<'a> ContextGuard<'a> {
    /// Enter evaluation of `node` on `runtime`.
    pub(crate) fn enter(runtime: &'a Runtime, node: NodeId) -> Self {
        let stack = runtime.context_stack();
        stack.borrow_mut().push(node);
        Self { stack, node }
    }

    /// The parents read so far by this evaluation.
    pub(crate) fn reads(&self) -> ReadSet {
        self.stack.borrow().reads()
    }
}

impl Drop for ContextGuard<'_> {
    fn drop(&mut self) {
        let popped = self.stack.borrow_mut().pop();

        if let Some(frame) = popped {
            debug_assert_eq!(
                frame.node, self.node,
                "context mismatch: expected {}, got {}",
                self.node, frame.node
            );
        }
    }
}

/// Handle for the node currently being evaluated.
///
/// A `Cx` is only ever created by the runtime and lent to a computation
/// for the duration of one evaluation. Every read made through it records
/// the evaluated node as a dependent of the value read.
pub struct Cx {
    runtime: Runtime,
    node: NodeId,
}

impl Cx {
    pub(crate) fn new(runtime: Runtime, node: NodeId) -> Self {
        Self { runtime, node }
    }

    /// The node being evaluated.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Read `value` at `args`, recording the dependency.
    pub fn read<A, T, V>(&mut self, value: &V, args: A) -> Result<T, Interrupt>
    where
        V: Value<A, T>,
    {
        value.get(self, args)
    }

    /// Fail fast if this handle belongs to another runtime. Reading a value
    /// with no active context on its own runtime is a programming error.
    pub(crate) fn ensure_bound(&self, runtime: &Runtime) {
        assert!(
            self.runtime.same_runtime(runtime),
            "no active context: value read with a context from another runtime"
        );
    }

    /// Fail if the node being evaluated was torn down mid-evaluation.
    pub(crate) fn ensure_attached(&self) -> Result<(), Interrupt> {
        if self.runtime.contains(self.node) {
            Ok(())
        } else {
            Err(Error::Detached(self.node).into())
        }
    }

    /// Record that the evaluated node read `parent`.
    pub(crate) fn track(&mut self, parent: NodeId) -> Result<(), Interrupt> {
        if self.runtime.context_stack().borrow().contains(parent) {
            return Err(Error::Cycle(parent).into());
        }
        if !self.runtime.add_edge(parent, Consumer::Node(self.node)) {
            return Err(Error::Detached(self.node).into());
        }
        self.runtime
            .context_stack()
            .borrow_mut()
            .record_read(self.node, parent);
        Ok(())
    }
}

impl std::fmt::Debug for Cx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cx").field("node", &self.node).finish()
    }
}
