//! Graph Nodes
//!
//! This module defines the untyped node records that live in the graph.
//! Typed values and computations are owned by the engine that created the
//! node; the graph only knows identity, state and edges.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexSet;

/// Unique identifier for a node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Generate a new unique subscription ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

/// The kind of node in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A node fed by an external connector. Never reads other nodes, so it
    /// never has parents.
    Live,

    /// A node computed from other nodes.
    Derived,
}

/// Evaluation state of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// No value has been produced yet.
    Empty,

    /// The node's computation is currently on the evaluation stack.
    Evaluating,

    /// A value exists. It may be stale if the latest run was interrupted.
    Ready,
}

/// Something that has read a node and must hear about its updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// Another node; propagation continues into it.
    Node(NodeId),

    /// A terminal subscription with no children of its own.
    Subscription(SubscriptionId),
}

/// A node in the graph.
#[derive(Debug)]
pub struct Node {
    id: NodeId,
    kind: NodeKind,
    state: NodeState,

    /// Consumers that read this node, in registration order.
    children: IndexSet<Consumer>,

    /// Nodes this node has read, used for cascading teardown.
    parents: IndexSet<NodeId>,

    /// The live node whose missing value interrupted the latest run.
    suspended_on: Option<NodeId>,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(id: NodeId, kind: NodeKind) -> Self {
        Self {
            id,
            kind,
            state: NodeState::Empty,
            children: IndexSet::new(),
            parents: IndexSet::new(),
            suspended_on: None,
        }
    }

    /// Create a new live node.
    pub fn live(id: NodeId) -> Self {
        Self::new(id, NodeKind::Live)
    }

    /// Create a new derived node.
    pub fn derived(id: NodeId) -> Self {
        Self::new(id, NodeKind::Derived)
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    pub fn set_state(&mut self, state: NodeState) {
        self.state = state;
    }

    pub fn suspended_on(&self) -> Option<NodeId> {
        self.suspended_on
    }

    pub fn set_suspended_on(&mut self, live: Option<NodeId>) {
        self.suspended_on = live;
    }

    /// Add a consumer. Returns false if it was already a child.
    pub fn add_child(&mut self, consumer: Consumer) -> bool {
        self.children.insert(consumer)
    }

    /// Remove a consumer, preserving the order of the remaining children.
    pub fn remove_child(&mut self, consumer: &Consumer) -> bool {
        self.children.shift_remove(consumer)
    }

    pub fn children(&self) -> &IndexSet<Consumer> {
        &self.children
    }

    pub fn has_child(&self, consumer: &Consumer) -> bool {
        self.children.contains(consumer)
    }

    pub fn add_parent(&mut self, node_id: NodeId) -> bool {
        self.parents.insert(node_id)
    }

    pub fn remove_parent(&mut self, node_id: &NodeId) -> bool {
        self.parents.shift_remove(node_id)
    }

    pub fn parents(&self) -> &IndexSet<NodeId> {
        &self.parents
    }

    /// Take the parent set, leaving it empty. Used by teardown.
    pub(crate) fn take_parents(&mut self) -> IndexSet<NodeId> {
        std::mem::take(&mut self.parents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
        assert_ne!(id1.to_string(), id2.to_string());
        assert!(id1.to_string().starts_with('#'));
    }

    #[test]
    fn new_nodes_start_empty() {
        let live = Node::live(NodeId::new());
        assert_eq!(live.kind(), NodeKind::Live);
        assert_eq!(live.state(), NodeState::Empty);

        let derived = Node::derived(NodeId::new());
        assert_eq!(derived.kind(), NodeKind::Derived);
        assert_eq!(derived.state(), NodeState::Empty);
        assert!(derived.suspended_on().is_none());
    }

    #[test]
    fn children_keep_registration_order() {
        let mut node = Node::live(NodeId::new());
        let a = Consumer::Node(NodeId::new());
        let b = Consumer::Subscription(SubscriptionId::new());
        let c = Consumer::Node(NodeId::new());

        assert!(node.add_child(a));
        assert!(node.add_child(b));
        assert!(node.add_child(c));
        assert!(!node.add_child(a));

        node.remove_child(&b);
        let order: Vec<_> = node.children().iter().copied().collect();
        assert_eq!(order, vec![a, c]);
    }

    #[test]
    fn parent_management() {
        let mut node = Node::derived(NodeId::new());
        let dep1 = NodeId::new();
        let dep2 = NodeId::new();

        node.add_parent(dep1);
        node.add_parent(dep2);
        assert_eq!(node.parents().len(), 2);

        node.remove_parent(&dep1);
        assert!(!node.parents().contains(&dep1));

        let taken = node.take_parents();
        assert_eq!(taken.len(), 1);
        assert!(node.parents().is_empty());
    }
}
