//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects live values,
//! derived values and subscriptions. It owns the node store, the context
//! stack and the subscription callbacks.
//!
//! # How It Works
//!
//! 1. Reading a value inside an evaluation adds an edge from the value's
//!    node to the node being evaluated.
//!
//! 2. When a live value receives data, the runtime visits its children in
//!    registration order, depth-first:
//!    a. A derived child re-runs its computation; if its value should be
//!       propagated, its own children are visited before the next sibling.
//!    b. A subscription child is handed the new value.
//!
//! 3. When a subscription closes, the runtime removes it and tears down
//!    every node left without children, running live cleanups.
//!
//! # Re-entrancy
//!
//! Everything here runs on one thread, and user code (computations,
//! connectors, callbacks) may call back into the runtime at any point. No
//! `RefCell` borrow is ever held while user code runs.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::context::{ContextStack, ReadSet};
use crate::config::{EdgePolicy, RuntimeConfig};
use crate::error::Error;
use crate::graph::{Consumer, Node, NodeId, NodeState, NodeStore, SubscriptionId};

use super::subscription::Subscription;

/// Behavior attached to a node by the engine that created it.
pub(crate) trait Reactive {
    fn id(&self) -> NodeId;

    /// Re-run the node and propagate if needed. Suspension is absorbed;
    /// any other failure is returned.
    fn evaluate(&self, runtime: &Runtime) -> Result<(), Error>;

    /// Forget the node in its factory so the next read creates a new one.
    fn unregister(&self);

    /// Release external resources. Called once, after `unregister`.
    fn dispose(&self) {}
}

struct RuntimeInner {
    config: RuntimeConfig,
    graph: RefCell<NodeStore>,
    behaviors: RefCell<HashMap<NodeId, Rc<dyn Reactive>>>,
    subscriptions: RefCell<HashMap<SubscriptionId, Rc<dyn Fn()>>>,
    context: RefCell<ContextStack>,
}

/// Handle to a reactive graph.
///
/// Cloning the handle shares the graph. All values built on a runtime must
/// be read through contexts from the same runtime.
#[derive(Clone)]
pub struct Runtime {
    inner: Rc<RuntimeInner>,
}

/// Non-owning handle, held by senders and subscriptions.
#[derive(Clone)]
pub(crate) struct WeakRuntime {
    inner: Weak<RuntimeInner>,
}

impl WeakRuntime {
    pub(crate) fn upgrade(&self) -> Option<Runtime> {
        self.inner.upgrade().map(|inner| Runtime { inner })
    }
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        debug!(edge_policy = ?config.edge_policy, "runtime created");
        Self {
            inner: Rc::new(RuntimeInner {
                config,
                graph: RefCell::new(NodeStore::new()),
                behaviors: RefCell::new(HashMap::new()),
                subscriptions: RefCell::new(HashMap::new()),
                context: RefCell::new(ContextStack::default()),
            }),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.inner.config
    }

    /// Number of nodes currently alive.
    pub fn node_count(&self) -> usize {
        self.inner.graph.borrow().len()
    }

    /// Number of open subscriptions.
    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.borrow().len()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.inner.graph.borrow().contains(node)
    }

    pub fn state_of(&self, node: NodeId) -> Option<NodeState> {
        self.inner.graph.borrow().get(node).map(Node::state)
    }

    /// Consumers of `node`, in registration order.
    pub fn children_of(&self, node: NodeId) -> Vec<Consumer> {
        self.inner.graph.borrow().children_snapshot(node)
    }

    /// Nodes read by `node` that it still depends on.
    pub fn parents_of(&self, node: NodeId) -> Vec<NodeId> {
        self.inner
            .graph
            .borrow()
            .get(node)
            .map(|node| node.parents().iter().copied().collect())
            .unwrap_or_default()
    }

    /// The node being evaluated right now, if any.
    pub fn current_node(&self) -> Option<NodeId> {
        self.inner.context.borrow().current()
    }

    pub(crate) fn downgrade(&self) -> WeakRuntime {
        WeakRuntime {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub(crate) fn same_runtime(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn context_stack(&self) -> &RefCell<ContextStack> {
        &self.inner.context
    }

    pub(crate) fn insert_node(&self, node: Node, behavior: Rc<dyn Reactive>) {
        let id = node.id();
        self.inner.graph.borrow_mut().insert(node);
        self.inner.behaviors.borrow_mut().insert(id, behavior);
    }

    pub(crate) fn add_edge(&self, parent: NodeId, consumer: Consumer) -> bool {
        self.inner.graph.borrow_mut().add_edge(parent, consumer)
    }

    pub(crate) fn set_state(&self, node: NodeId, state: NodeState) {
        self.inner.graph.borrow_mut().set_state(node, state);
    }

    /// Record that `reader`'s latest run stopped on `live`, which has no
    /// value yet.
    pub(crate) fn mark_suspended(&self, reader: NodeId, live: NodeId) {
        if let Some(node) = self.inner.graph.borrow_mut().get_mut(reader) {
            node.set_suspended_on(Some(live));
        }
    }

    pub(crate) fn begin_evaluation(&self, node: NodeId) {
        if let Some(node) = self.inner.graph.borrow_mut().get_mut(node) {
            node.set_state(NodeState::Evaluating);
            node.set_suspended_on(None);
        }
    }

    /// Settle a successful evaluation, detaching stale parents when the
    /// edge policy asks for it.
    pub(crate) fn finish_evaluation(&self, node: NodeId, reads: &ReadSet) {
        let removed = {
            let mut graph = self.inner.graph.borrow_mut();
            graph.set_state(node, NodeState::Ready);
            match self.inner.config.edge_policy {
                EdgePolicy::Retain => Vec::new(),
                EdgePolicy::Prune => graph.prune_parents(node, reads),
            }
        };
        if !removed.is_empty() {
            trace!(node = %node, pruned = removed.len(), "stale dependencies torn down");
        }
        self.teardown(removed);
    }

    /// Settle an interrupted evaluation. The previous value, if any, stays.
    pub(crate) fn abandon_evaluation(&self, node: NodeId, has_value: bool) {
        let state = if has_value {
            NodeState::Ready
        } else {
            NodeState::Empty
        };
        self.set_state(node, state);
    }

    /// Notify every current child of `node`, depth-first, in registration
    /// order. Stops at the first failing child.
    pub(crate) fn propagate(&self, node: NodeId) -> Result<(), Error> {
        let children = self.inner.graph.borrow().children_snapshot(node);
        trace!(node = %node, children = children.len(), "propagating");

        for child in children {
            // A previous sibling may have closed this consumer.
            let still_child = self.inner.graph.borrow().is_child(node, &child);
            if !still_child {
                continue;
            }

            match child {
                Consumer::Node(id) => {
                    let behavior = self.inner.behaviors.borrow().get(&id).cloned();
                    if let Some(behavior) = behavior {
                        behavior.evaluate(self)?;
                    }
                }
                Consumer::Subscription(id) => {
                    let notify = self.inner.subscriptions.borrow().get(&id).cloned();
                    if let Some(notify) = notify {
                        notify();
                    }
                }
            }
        }
        Ok(())
    }

    /// Re-run `waiter` if it is still stopped on `live`.
    ///
    /// Usually the fan-out that preceded this call has already re-run it,
    /// in which case this does nothing.
    pub(crate) fn resume(&self, waiter: NodeId, live: NodeId) -> Result<(), Error> {
        let still_waiting = self
            .inner
            .graph
            .borrow()
            .get(waiter)
            .map(|node| node.suspended_on() == Some(live))
            .unwrap_or(false);
        if !still_waiting {
            return Ok(());
        }

        trace!(node = %waiter, live = %live, "resuming waiter");
        let behavior = self.inner.behaviors.borrow().get(&waiter).cloned();
        match behavior {
            Some(behavior) => behavior.evaluate(self),
            None => Ok(()),
        }
    }

    /// Register `notify` as a terminal consumer of `node`.
    pub(crate) fn attach(&self, node: NodeId, notify: Rc<dyn Fn()>) -> Subscription {
        let id = SubscriptionId::new();
        self.inner.subscriptions.borrow_mut().insert(id, notify);
        self.inner
            .graph
            .borrow_mut()
            .add_edge(node, Consumer::Subscription(id));
        debug!(node = %node, subscription = ?id, "subscription opened");
        Subscription::new(self.downgrade(), id, node)
    }

    /// Remove a subscription and tear down whatever it kept alive.
    pub(crate) fn detach(&self, node: NodeId, subscription: SubscriptionId) {
        let notify = self.inner.subscriptions.borrow_mut().remove(&subscription);
        let removed = self
            .inner
            .graph
            .borrow_mut()
            .remove_child(node, Consumer::Subscription(subscription));
        debug!(node = %node, subscription = ?subscription, removed = removed.len(), "subscription closed");
        self.teardown(removed);
        drop(notify);
    }

    /// Tear down `node` if it ended up with no consumers, e.g. when the
    /// reader that created it was detached before the edge was recorded.
    pub(crate) fn release_if_unused(&self, node: NodeId) {
        let removed = self.inner.graph.borrow_mut().release_if_unused(node);
        if !removed.is_empty() {
            debug!(node = %node, removed = removed.len(), "unconsumed node released");
        }
        self.teardown(removed);
    }

    /// Drop removed nodes from their factories, then dispose of them, in
    /// teardown order.
    fn teardown(&self, removed: Vec<NodeId>) {
        if removed.is_empty() {
            return;
        }

        let behaviors: Vec<Rc<dyn Reactive>> = {
            let mut map = self.inner.behaviors.borrow_mut();
            removed.iter().filter_map(|id| map.remove(id)).collect()
        };

        for behavior in &behaviors {
            behavior.unregister();
        }
        for behavior in behaviors {
            debug!(node = %behavior.id(), "node torn down");
            behavior.dispose();
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.inner.config)
            .field("node_count", &self.node_count())
            .field("subscription_count", &self.subscription_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct MockReactive {
        id: NodeId,
        evaluated: Cell<usize>,
        unregistered: Cell<bool>,
        log: Rc<RefCell<Vec<NodeId>>>,
    }

    impl MockReactive {
        fn install(runtime: &Runtime, log: &Rc<RefCell<Vec<NodeId>>>) -> Rc<Self> {
            let reactive = Rc::new(Self {
                id: NodeId::new(),
                evaluated: Cell::new(0),
                unregistered: Cell::new(false),
                log: log.clone(),
            });
            runtime.insert_node(Node::derived(reactive.id), reactive.clone());
            reactive
        }
    }

    impl Reactive for MockReactive {
        fn id(&self) -> NodeId {
            self.id
        }

        fn evaluate(&self, _runtime: &Runtime) -> Result<(), Error> {
            self.evaluated.set(self.evaluated.get() + 1);
            Ok(())
        }

        fn unregister(&self) {
            self.unregistered.set(true);
        }

        fn dispose(&self) {
            assert!(self.unregistered.get(), "dispose before unregister");
            self.log.borrow_mut().push(self.id);
        }
    }

    #[test]
    fn propagate_visits_node_children() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let source = MockReactive::install(&runtime, &log);
        let first = MockReactive::install(&runtime, &log);
        let second = MockReactive::install(&runtime, &log);

        runtime.add_edge(source.id, Consumer::Node(first.id));
        runtime.add_edge(source.id, Consumer::Node(second.id));
        runtime.propagate(source.id).unwrap();

        assert_eq!(first.evaluated.get(), 1);
        assert_eq!(second.evaluated.get(), 1);
        assert_eq!(source.evaluated.get(), 0);
    }

    #[test]
    fn closing_subscription_disposes_in_teardown_order() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let source = MockReactive::install(&runtime, &log);
        let derived = MockReactive::install(&runtime, &log);
        runtime.add_edge(source.id, Consumer::Node(derived.id));

        let subscription = runtime.attach(derived.id, Rc::new(|| {}));
        assert_eq!(runtime.subscription_count(), 1);

        subscription.close();

        assert_eq!(*log.borrow(), vec![source.id, derived.id]);
        assert_eq!(runtime.node_count(), 0);
        assert_eq!(runtime.subscription_count(), 0);
    }

    #[test]
    fn resume_skips_nodes_no_longer_waiting() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let live = NodeId::new();
        let reader = MockReactive::install(&runtime, &log);

        runtime.resume(reader.id, live).unwrap();
        assert_eq!(reader.evaluated.get(), 0);

        runtime.mark_suspended(reader.id, live);
        runtime.resume(reader.id, live).unwrap();
        assert_eq!(reader.evaluated.get(), 1);
    }

    #[test]
    fn evaluation_states() {
        let runtime = Runtime::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        let node = MockReactive::install(&runtime, &log);

        assert_eq!(runtime.state_of(node.id), Some(NodeState::Empty));
        runtime.begin_evaluation(node.id);
        assert_eq!(runtime.state_of(node.id), Some(NodeState::Evaluating));
        runtime.abandon_evaluation(node.id, false);
        assert_eq!(runtime.state_of(node.id), Some(NodeState::Empty));
        runtime.begin_evaluation(node.id);
        runtime.finish_evaluation(node.id, &ReadSet::new());
        assert_eq!(runtime.state_of(node.id), Some(NodeState::Ready));
    }
}
