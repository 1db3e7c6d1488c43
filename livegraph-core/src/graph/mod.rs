//! Dependency Graph
//!
//! This module holds the structural half of the runtime: node records and
//! the edges between them. It knows nothing about values or computations.
//!
//! # Overview
//!
//! - Nodes are live values (fed from outside) or derived values (computed
//!   from other nodes).
//! - An edge from P to C means C read P during some evaluation. P lists C
//!   among its children; C lists P among its parents.
//! - Subscriptions are children that are not nodes. They end a branch.
//!
//! # Lifetime
//!
//! Nodes are reference counted by their child sets. When the last child of
//! a node goes away the node is deleted and the removal repeats for each of
//! its parents. See [`NodeStore::remove_child`].
//!
//! Edges are kept even if a later evaluation stops reading a parent, unless
//! the runtime is configured with [`EdgePolicy::Prune`].
//!
//! [`EdgePolicy::Prune`]: crate::config::EdgePolicy::Prune

mod node;
mod store;

pub use node::{Consumer, Node, NodeId, NodeKind, NodeState, SubscriptionId};
pub use store::NodeStore;
