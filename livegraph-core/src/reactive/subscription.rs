//! Subscriptions.
//!
//! A subscription is a terminal consumer: it receives every propagated
//! value of one node and has no children of its own. Closing it is the
//! only way for the outside world to shrink the graph.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use tracing::warn;

use super::runtime::WeakRuntime;
use crate::graph::{NodeId, SubscriptionId};

/// Read access to a node's latest value.
pub(crate) trait Current<T> {
    fn current(&self) -> Option<T>;
}

/// The user callback behind a subscription.
pub(crate) struct Sink<T> {
    on_value: RefCell<Box<dyn FnMut(&T)>>,
    delivered: Cell<bool>,
}

impl<T: 'static> Sink<T> {
    pub(crate) fn new<F>(on_value: F) -> Rc<Self>
    where
        F: FnMut(&T) + 'static,
    {
        Rc::new(Self {
            on_value: RefCell::new(Box::new(on_value)),
            delivered: Cell::new(false),
        })
    }

    pub(crate) fn deliver(&self, value: &T) {
        match self.on_value.try_borrow_mut() {
            Ok(mut on_value) => {
                self.delivered.set(true);
                on_value(value);
            }
            Err(_) => warn!("subscription callback re-entered itself; update dropped"),
        }
    }

    /// Whether the callback has run at least once.
    pub(crate) fn delivered(&self) -> bool {
        self.delivered.get()
    }

    /// Build the notifier the runtime calls during propagation.
    pub(crate) fn notifier(sink: &Rc<Self>, source: Rc<dyn Current<T>>) -> Rc<dyn Fn()> {
        let sink = Rc::clone(sink);
        let source: Weak<dyn Current<T>> = Rc::downgrade(&source);
        Rc::new(move || {
            let value = source.upgrade().and_then(|source| source.current());
            if let Some(value) = value {
                sink.deliver(&value);
            }
        })
    }
}

/// Handle to an open subscription.
///
/// Dropping the handle closes the subscription.
pub struct Subscription {
    runtime: WeakRuntime,
    id: SubscriptionId,
    node: NodeId,
    closed: Cell<bool>,
}

impl Subscription {
    pub(crate) fn new(runtime: WeakRuntime, id: SubscriptionId, node: NodeId) -> Self {
        Self {
            runtime,
            id,
            node,
            closed: Cell::new(false),
        }
    }

    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// The node this subscription listens to.
    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_closed(&self) -> bool {
        self.closed.get()
    }

    /// Detach from the graph, tearing down every node that no longer has a
    /// consumer. Calling it again does nothing.
    pub fn close(&self) {
        if self.closed.replace(true) {
            return;
        }
        if let Some(runtime) = self.runtime.upgrade() {
            runtime.detach(self.node, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("node", &self.node)
            .field("closed", &self.is_closed())
            .finish()
    }
}
