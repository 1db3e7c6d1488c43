//! Node Store
//!
//! The store owns every node record and keeps the two edge directions in
//! sync. It is the only place where edges are removed, which keeps the
//! teardown rules in one spot:
//!
//! 1. Removing a consumer from a node whose child set then becomes empty
//!    removes that node as a child of each of its parents, recursively.
//! 2. The node itself is deleted after its parents have been visited.
//! 3. The removal stops at the first node that still has other children.
//!
//! The store never runs user code. Callers receive the removed node IDs in
//! teardown order and perform disposal themselves, once the store is no
//! longer borrowed.

use std::collections::HashMap;

use super::node::{Consumer, Node, NodeId, NodeState};

/// All nodes in the graph, indexed by ID.
#[derive(Debug, Default)]
pub struct NodeStore {
    nodes: HashMap<NodeId, Node>,
}

impl NodeStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
        }
    }

    /// Add a node to the graph.
    pub fn insert(&mut self, node: Node) -> NodeId {
        let id = node.id();
        self.nodes.insert(id, node);
        id
    }

    pub fn get(&self, node_id: NodeId) -> Option<&Node> {
        self.nodes.get(&node_id)
    }

    pub fn get_mut(&mut self, node_id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(&node_id)
    }

    pub fn contains(&self, node_id: NodeId) -> bool {
        self.nodes.contains_key(&node_id)
    }

    /// Get the total number of nodes in the graph.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Record that `consumer` has read `parent`.
    ///
    /// Returns false if either end of the edge is not in the store.
    pub fn add_edge(&mut self, parent: NodeId, consumer: Consumer) -> bool {
        if let Consumer::Node(child) = consumer {
            if !self.nodes.contains_key(&child) {
                return false;
            }
        }

        let Some(parent_node) = self.nodes.get_mut(&parent) else {
            return false;
        };
        parent_node.add_child(consumer);

        if let Consumer::Node(child) = consumer {
            if let Some(child_node) = self.nodes.get_mut(&child) {
                child_node.add_parent(parent);
            }
        }
        true
    }

    pub fn is_child(&self, parent: NodeId, consumer: &Consumer) -> bool {
        self.nodes
            .get(&parent)
            .map(|node| node.has_child(consumer))
            .unwrap_or(false)
    }

    /// Copy out the children of a node so they can be visited without
    /// holding a borrow of the store.
    pub fn children_snapshot(&self, node_id: NodeId) -> Vec<Consumer> {
        self.nodes
            .get(&node_id)
            .map(|node| node.children().iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn set_state(&mut self, node_id: NodeId, state: NodeState) {
        if let Some(node) = self.nodes.get_mut(&node_id) {
            node.set_state(state);
        }
    }

    /// Remove `consumer` from `node_id`'s children and cascade.
    ///
    /// Returns every node deleted by the cascade, in the order they were
    /// deleted (parents before the node that referenced them).
    pub fn remove_child(&mut self, node_id: NodeId, consumer: Consumer) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.remove_child_into(node_id, consumer, &mut removed);
        removed
    }

    /// Delete `node_id` if nothing consumes it, cascading into its parents
    /// as in [`remove_child`].
    ///
    /// [`remove_child`]: NodeStore::remove_child
    pub fn release_if_unused(&mut self, node_id: NodeId) -> Vec<NodeId> {
        let mut removed = Vec::new();
        self.release_into(node_id, &mut removed);
        removed
    }

    fn remove_child_into(&mut self, node_id: NodeId, consumer: Consumer, removed: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if node.remove_child(&consumer) {
            self.release_into(node_id, removed);
        }
    }

    fn release_into(&mut self, node_id: NodeId, removed: &mut Vec<NodeId>) {
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return;
        };
        if !node.children().is_empty() {
            return;
        }

        let parents = node.take_parents();
        for parent in parents {
            self.remove_child_into(parent, Consumer::Node(node_id), removed);
        }

        self.nodes.remove(&node_id);
        removed.push(node_id);
    }

    /// Detach every parent of `node_id` that is not in `keep`.
    ///
    /// Parents left without children are torn down as in [`remove_child`].
    ///
    /// [`remove_child`]: NodeStore::remove_child
    pub fn prune_parents(&mut self, node_id: NodeId, keep: &[NodeId]) -> Vec<NodeId> {
        let mut removed = Vec::new();
        let Some(node) = self.nodes.get_mut(&node_id) else {
            return removed;
        };

        let stale: Vec<NodeId> = node
            .parents()
            .iter()
            .filter(|parent| !keep.contains(parent))
            .copied()
            .collect();
        for parent in &stale {
            node.remove_parent(parent);
        }

        for parent in stale {
            self.remove_child_into(parent, Consumer::Node(node_id), &mut removed);
        }
        removed
    }
}
