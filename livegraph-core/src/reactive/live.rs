//! Live Values
//!
//! A live value wraps an external event source. Like a derived value it is
//! a family of nodes keyed by argument tuple, but its nodes are fed from
//! outside through a [`Sender`] instead of computing anything.
//!
//! # How Live Values Work
//!
//! 1. The first read at some arguments creates a node and calls the
//!    connector once with those arguments and a sender. The connector
//!    returns a [`Cleanup`].
//!
//! 2. A read before any value has arrived returns [`Interrupt::Pending`]
//!    and registers the reader as a waiter.
//!
//! 3. [`Sender::send`] stores the value and re-runs every child, in the
//!    order they first read the node, each child's whole reaction finishing
//!    before the next one starts. Waiters that are still stuck on this node
//!    afterwards are re-run too.
//!
//! 4. When the last consumer goes away, the cleanup runs exactly once and
//!    the node is forgotten. The next read connects again.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use indexmap::IndexSet;
use tracing::{debug, trace};

use super::context::Cx;
use super::runtime::{Reactive, Runtime, WeakRuntime};
use super::subscription::{Current, Sink, Subscription};
use super::Value;
use crate::error::{Error, Interrupt};
use crate::graph::{Node, NodeId, NodeState};

type Connect<A, T> = Box<dyn Fn(&A, Sender<T>) -> Cleanup>;

/// Teardown callback returned by a connector.
///
/// It runs at most once, when the live node it belongs to is torn down,
/// and must stop the connector from sending any further values.
#[derive(Default)]
pub struct Cleanup(Option<Box<dyn FnOnce()>>);

impl Cleanup {
    pub fn new<F>(cleanup: F) -> Self
    where
        F: FnOnce() + 'static,
    {
        Self(Some(Box::new(cleanup)))
    }

    /// A cleanup that does nothing.
    pub fn none() -> Self {
        Self(None)
    }

    fn run(&mut self) {
        if let Some(cleanup) = self.0.take() {
            cleanup();
        }
    }
}

impl fmt::Debug for Cleanup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Cleanup").field(&self.0.is_some()).finish()
    }
}

/// Feeds values into one live node.
///
/// Senders are cheap to clone. Once their node has been torn down, sending
/// does nothing.
pub struct Sender<T> {
    node: Weak<dyn Inlet<T>>,
    runtime: WeakRuntime,
}

trait Inlet<T> {
    fn receive(&self, runtime: &Runtime, value: T) -> Result<(), Error>;
    fn is_open(&self) -> bool;
}

impl<T> Sender<T> {
    /// Deliver a value and propagate it through the graph before
    /// returning. Errors raised by dependent computations are returned
    /// here.
    pub fn send(&self, value: T) -> Result<(), Error> {
        let (Some(node), Some(runtime)) = (self.node.upgrade(), self.runtime.upgrade()) else {
            trace!("send to a torn-down live value ignored");
            return Ok(());
        };
        node.receive(&runtime, value)
    }

    /// Whether the node behind this sender is still part of the graph.
    pub fn is_connected(&self) -> bool {
        self.node.upgrade().map(|node| node.is_open()).unwrap_or(false)
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            node: Weak::clone(&self.node),
            runtime: self.runtime.clone(),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("connected", &self.is_connected())
            .finish()
    }
}

/// A memoized connection to an external source, keyed by argument tuple.
///
/// # Example
///
/// ```rust,ignore
/// let ticker = LiveValue::new(&runtime, |period: &u64, send: Sender<u64>| {
///     let handle = timers.every(*period, move |tick| { let _ = send.send(tick); });
///     Cleanup::new(move || handle.cancel())
/// });
/// ```
pub struct LiveValue<A, T> {
    shared: Rc<LiveShared<A, T>>,
}

struct LiveShared<A, T> {
    runtime: Runtime,
    name: Option<String>,
    connect: Connect<A, T>,
    nodes: RefCell<HashMap<A, Rc<LiveNode<A, T>>>>,
}

struct LiveNode<A, T> {
    id: NodeId,
    key: A,
    shared: Weak<LiveShared<A, T>>,
    value: RefCell<Option<T>>,
    cleanup: RefCell<Cleanup>,

    /// Readers whose latest run stopped here.
    waiters: RefCell<IndexSet<NodeId>>,
    disposed: Cell<bool>,
}

impl<A, T> LiveValue<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    pub fn new<C>(runtime: &Runtime, connect: C) -> Self
    where
        C: Fn(&A, Sender<T>) -> Cleanup + 'static,
    {
        Self::build(runtime, None, Box::new(connect))
    }

    /// Like [`LiveValue::new`], with a label for log output.
    pub fn named<C>(runtime: &Runtime, name: impl Into<String>, connect: C) -> Self
    where
        C: Fn(&A, Sender<T>) -> Cleanup + 'static,
    {
        Self::build(runtime, Some(name.into()), Box::new(connect))
    }

    fn build(runtime: &Runtime, name: Option<String>, connect: Connect<A, T>) -> Self {
        Self {
            shared: Rc::new(LiveShared {
                runtime: runtime.clone(),
                name,
                connect,
                nodes: RefCell::new(HashMap::new()),
            }),
        }
    }

    /// Read the latest value at `args` from inside a computation.
    ///
    /// Connects on first access. Returns [`Interrupt::Pending`] until the
    /// connector has sent something.
    pub fn get(&self, cx: &mut Cx, args: A) -> Result<T, Interrupt> {
        let runtime = &self.shared.runtime;
        cx.ensure_bound(runtime);
        cx.ensure_attached()?;

        let node = self.shared.find_or_create(args);
        if let Err(interrupt) = cx.track(node.id) {
            // Connecting may have closed the reader's last consumer; a
            // fresh connection nobody reads must not outlive it.
            runtime.release_if_unused(node.id);
            return Err(interrupt);
        }

        match node.current() {
            Some(value) => Ok(value),
            None => {
                node.waiters.borrow_mut().insert(cx.node());
                runtime.mark_suspended(cx.node(), node.id);
                trace!(node = %node.id, reader = %cx.node(), "read suspended");
                Err(Interrupt::Pending)
            }
        }
    }

    /// Call `on_value` with every value sent at `args`, starting with the
    /// current one if there is one.
    pub fn subscribe<F>(&self, args: A, on_value: F) -> Result<Subscription, Error>
    where
        F: FnMut(&T) + 'static,
    {
        let node = self.shared.find_or_create(args);
        let sink = Sink::new(on_value);
        let subscription = self
            .shared
            .runtime
            .attach(node.id, Sink::notifier(&sink, node.clone()));

        if let Some(value) = node.current() {
            sink.deliver(&value);
        }
        Ok(subscription)
    }

    /// The latest value at `args`, without connecting or recording a
    /// dependency.
    pub fn peek(&self, args: &A) -> Option<T> {
        let node = self.shared.nodes.borrow().get(args).cloned();
        node.and_then(|node| node.current())
    }

    pub fn node_id(&self, args: &A) -> Option<NodeId> {
        self.shared.nodes.borrow().get(args).map(|node| node.id)
    }

    /// Number of open connections.
    pub fn instance_count(&self) -> usize {
        self.shared.nodes.borrow().len()
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }
}

impl<A, T> LiveShared<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("live")
    }

    fn find_or_create(self: &Rc<Self>, args: A) -> Rc<LiveNode<A, T>> {
        let existing = self.nodes.borrow().get(&args).cloned();
        if let Some(node) = existing {
            return node;
        }

        let node = Rc::new(LiveNode {
            id: NodeId::new(),
            key: args.clone(),
            shared: Rc::downgrade(self),
            value: RefCell::new(None),
            cleanup: RefCell::new(Cleanup::none()),
            waiters: RefCell::new(IndexSet::new()),
            disposed: Cell::new(false),
        });
        self.nodes.borrow_mut().insert(args.clone(), node.clone());
        self.runtime.insert_node(Node::live(node.id), node.clone());

        // The node is in the graph before connecting, so values sent
        // synchronously by the connector are kept.
        let inlet: Weak<dyn Inlet<T>> = Rc::downgrade(&node) as Weak<LiveNode<A, T>>;
        let sender = Sender {
            node: inlet,
            runtime: self.runtime.downgrade(),
        };
        debug!(node = %node.id, name = self.label(), "connecting live node");
        let cleanup = (self.connect)(&args, sender);

        if node.disposed.get() {
            // Torn down by a re-entrant close while connecting.
            let mut cleanup = cleanup;
            cleanup.run();
        } else {
            *node.cleanup.borrow_mut() = cleanup;
        }
        node
    }
}

impl<A, T> Current<T> for LiveNode<A, T>
where
    T: Clone,
{
    fn current(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

impl<A, T> Inlet<T> for LiveNode<A, T> {
    fn receive(&self, runtime: &Runtime, value: T) -> Result<(), Error> {
        if self.disposed.get() {
            trace!(node = %self.id, "value for a torn-down live node ignored");
            return Ok(());
        }

        self.value.replace(Some(value));
        runtime.set_state(self.id, NodeState::Ready);
        trace!(node = %self.id, "value received");

        runtime.propagate(self.id)?;

        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            runtime.resume(waiter, self.id)?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.disposed.get()
    }
}

impl<A, T> Reactive for LiveNode<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn evaluate(&self, _runtime: &Runtime) -> Result<(), Error> {
        // Live nodes never read other nodes, so they are never children.
        Ok(())
    }

    fn unregister(&self) {
        self.disposed.set(true);
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        let removed = {
            let mut nodes = shared.nodes.borrow_mut();
            let is_self = nodes.get(&self.key).map(|node| node.id) == Some(self.id);
            if is_self {
                nodes.remove(&self.key)
            } else {
                None
            }
        };
        drop(removed);
    }

    fn dispose(&self) {
        let mut cleanup = std::mem::take(&mut *self.cleanup.borrow_mut());
        debug!(node = %self.id, "running live cleanup");
        cleanup.run();
        self.waiters.borrow_mut().clear();
    }
}

impl<A, T> Value<A, T> for LiveValue<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn get(&self, cx: &mut Cx, args: A) -> Result<T, Interrupt> {
        LiveValue::get(self, cx, args)
    }

    fn subscribe<F>(&self, args: A, on_value: F) -> Result<Subscription, Error>
    where
        F: FnMut(&T) + 'static,
    {
        LiveValue::subscribe(self, args, on_value)
    }
}

impl<A, T> Clone for LiveValue<A, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<A, T> fmt::Debug for LiveValue<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LiveValue")
            .field("name", &self.shared.name)
            .field("instances", &self.shared.nodes.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Log = Rc<RefCell<Vec<String>>>;

    /// A live value whose senders are handed back to the test.
    fn manual(runtime: &Runtime, senders: &Rc<RefCell<Vec<Sender<i32>>>>, log: &Log) -> LiveValue<&'static str, i32> {
        let senders = senders.clone();
        let log = log.clone();
        LiveValue::new(runtime, move |name: &&'static str, send: Sender<i32>| {
            senders.borrow_mut().push(send);
            let log = log.clone();
            let name = *name;
            Cleanup::new(move || log.borrow_mut().push(format!("cleanup-{name}")))
        })
    }

    #[test]
    fn subscribe_receives_every_send() {
        let runtime = Runtime::new();
        let senders = Rc::new(RefCell::new(Vec::new()));
        let log = Log::default();
        let live = manual(&runtime, &senders, &log);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let subscription = live.subscribe("a", move |v| seen_clone.borrow_mut().push(*v)).unwrap();
        let send = senders.borrow()[0].clone();
        send.send(1).unwrap();
        send.send(2).unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
        assert_eq!(live.peek(&"a"), Some(2));

        subscription.close();
        assert_eq!(*log.borrow(), vec!["cleanup-a"]);
        assert!(!send.is_connected());

        // Sending after teardown is ignored.
        send.send(3).unwrap();
        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn late_subscriber_gets_current_value() {
        let runtime = Runtime::new();
        let live: LiveValue<(), i32> = LiveValue::new(&runtime, |_: &(), send: Sender<i32>| {
            send.send(7).unwrap();
            Cleanup::none()
        });
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let _subscription = live.subscribe((), move |v| seen_clone.borrow_mut().push(*v)).unwrap();

        assert_eq!(*seen.borrow(), vec![7]);
    }

    #[test]
    fn connects_once_per_key() {
        let runtime = Runtime::new();
        let senders = Rc::new(RefCell::new(Vec::new()));
        let log = Log::default();
        let live = manual(&runtime, &senders, &log);

        let _a1 = live.subscribe("a", |_| {}).unwrap();
        let _a2 = live.subscribe("a", |_| {}).unwrap();
        let _b = live.subscribe("b", |_| {}).unwrap();

        assert_eq!(senders.borrow().len(), 2);
        assert_eq!(live.instance_count(), 2);
    }

    #[test]
    fn cleanup_waits_for_last_consumer() {
        let runtime = Runtime::new();
        let senders = Rc::new(RefCell::new(Vec::new()));
        let log = Log::default();
        let live = manual(&runtime, &senders, &log);

        let first = live.subscribe("a", |_| {}).unwrap();
        let second = live.subscribe("a", |_| {}).unwrap();

        first.close();
        assert!(log.borrow().is_empty());
        drop(second);
        assert_eq!(*log.borrow(), vec!["cleanup-a"]);
        assert_eq!(runtime.node_count(), 0);
    }

    #[test]
    fn cleanup_runs_at_most_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mut cleanup = Cleanup::new(move || counter.set(counter.get() + 1));
        cleanup.run();
        cleanup.run();
        assert_eq!(calls.get(), 1);
    }
}
