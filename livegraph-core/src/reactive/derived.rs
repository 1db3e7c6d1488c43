//! Derived Values
//!
//! A derived value is a family of memoized computations, one node per
//! distinct argument tuple.
//!
//! # How Derived Values Work
//!
//! 1. The first read at some arguments creates a node. The factory runs
//!    once for that node and returns its recompute closure. Anything the
//!    closure captures is private state of that node and survives every
//!    re-run.
//!
//! 2. A read adds an edge from the node to the reader. If the node has
//!    never produced a value it is computed on the spot.
//!
//! 3. When a parent changes, the node re-runs from the top. The node's
//!    first value is always propagated; after that, the optional predicate
//!    decides whether dependents hear about a new value.
//!
//! 4. A run that reads a live value with no data yet stops with
//!    [`Interrupt::Pending`]. The node keeps its previous value (if any)
//!    and stays quiet until the live value delivers.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::{Rc, Weak};

use tracing::{debug, trace};

use super::context::{ContextGuard, Cx};
use super::runtime::{Reactive, Runtime};
use super::subscription::{Current, Sink, Subscription};
use super::Value;
use crate::error::{Error, Interrupt};
use crate::graph::{Node, NodeId};

type Recompute<T> = Box<dyn FnMut(&mut Cx) -> Result<T, Interrupt>>;
type Factory<A, T> = Box<dyn Fn(&A) -> Recompute<T>>;
type Predicate<T> = Rc<dyn Fn(&T, &T) -> bool>;

/// A memoized computation over other values, keyed by argument tuple.
///
/// # Example
///
/// ```rust,ignore
/// let numbers = LiveValue::new(&runtime, |_: &(), send| { ... });
///
/// let doubled = DerivedValue::new(&runtime, move |_: &()| {
///     let numbers = numbers.clone();
///     move |cx: &mut Cx| Ok(numbers.get(cx, ())? * 2)
/// });
///
/// let _subscription = doubled.subscribe((), |value| println!("{value}"))?;
/// ```
pub struct DerivedValue<A, T> {
    shared: Rc<DerivedShared<A, T>>,
}

struct DerivedShared<A, T> {
    runtime: Runtime,
    name: Option<String>,
    factory: Factory<A, T>,
    propagate: Option<Predicate<T>>,
    nodes: RefCell<HashMap<A, Rc<DerivedNode<A, T>>>>,
}

struct DerivedNode<A, T> {
    id: NodeId,
    key: A,
    shared: Weak<DerivedShared<A, T>>,
    recompute: RefCell<Recompute<T>>,
    value: RefCell<Option<T>>,
    propagate: Option<Predicate<T>>,
}

/// Options for a [`DerivedValue`].
///
/// ```rust,ignore
/// let top10 = DerivedBuilder::new(&runtime)
///     .name("top10")
///     .distinct()
///     .build(move |_: &()| { ... });
/// ```
pub struct DerivedBuilder<T> {
    runtime: Runtime,
    name: Option<String>,
    propagate: Option<Predicate<T>>,
}

impl<T> DerivedBuilder<T>
where
    T: Clone + 'static,
{
    pub fn new(runtime: &Runtime) -> Self {
        Self {
            runtime: runtime.clone(),
            name: None,
            propagate: None,
        }
    }

    /// Label used in log output.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Decide whether a new value reaches dependents, given the previous
    /// and the new value. The cached value is updated either way.
    pub fn propagate<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&T, &T) -> bool + 'static,
    {
        self.propagate = Some(Rc::new(predicate));
        self
    }

    /// Only propagate values that differ from the previous one.
    pub fn distinct(self) -> Self
    where
        T: PartialEq,
    {
        self.propagate(|old, new| old != new)
    }

    pub fn build<A, F, R>(self, factory: F) -> DerivedValue<A, T>
    where
        A: Eq + Hash + Clone + 'static,
        F: Fn(&A) -> R + 'static,
        R: FnMut(&mut Cx) -> Result<T, Interrupt> + 'static,
    {
        let factory: Factory<A, T> = Box::new(move |args: &A| -> Recompute<T> { Box::new(factory(args)) });
        DerivedValue {
            shared: Rc::new(DerivedShared {
                runtime: self.runtime,
                name: self.name,
                factory,
                propagate: self.propagate,
                nodes: RefCell::new(HashMap::new()),
            }),
        }
    }
}

impl<A, T> DerivedValue<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    /// Create a derived value that propagates every new value.
    pub fn new<F, R>(runtime: &Runtime, factory: F) -> Self
    where
        F: Fn(&A) -> R + 'static,
        R: FnMut(&mut Cx) -> Result<T, Interrupt> + 'static,
    {
        DerivedBuilder::new(runtime).build(factory)
    }

    /// Read the value at `args` from inside another computation.
    pub fn get(&self, cx: &mut Cx, args: A) -> Result<T, Interrupt> {
        let runtime = &self.shared.runtime;
        cx.ensure_bound(runtime);
        cx.ensure_attached()?;

        let node = self.shared.find_or_create(args);
        if let Err(interrupt) = cx.track(node.id) {
            // The factory may have closed the reader's last consumer.
            runtime.release_if_unused(node.id);
            return Err(interrupt);
        }

        if !node.has_value() {
            node.compute(runtime)?;
        }
        node.current().ok_or(Interrupt::Pending)
    }

    /// Call `on_value` with every propagated value at `args`.
    ///
    /// The node is evaluated once right away; `on_value` runs as soon as a
    /// value exists. If that evaluation fails the subscription is closed
    /// and the error returned.
    pub fn subscribe<F>(&self, args: A, on_value: F) -> Result<Subscription, Error>
    where
        F: FnMut(&T) + 'static,
    {
        let runtime = &self.shared.runtime;
        let node = self.shared.find_or_create(args);
        let sink = Sink::new(on_value);
        let subscription = runtime.attach(node.id, Sink::notifier(&sink, node.clone()));

        if let Err(error) = node.evaluate(runtime) {
            subscription.close();
            return Err(error);
        }

        // A suppressed propagation would leave this subscriber empty-handed.
        if !sink.delivered() && !subscription.is_closed() {
            if let Some(value) = node.current() {
                sink.deliver(&value);
            }
        }
        Ok(subscription)
    }

    /// The cached value at `args`, without recording a dependency or
    /// computing anything.
    pub fn peek(&self, args: &A) -> Option<T> {
        let node = self.shared.nodes.borrow().get(args).cloned();
        node.and_then(|node| node.current())
    }

    /// The node currently backing `args`, if any.
    pub fn node_id(&self, args: &A) -> Option<NodeId> {
        self.shared.nodes.borrow().get(args).map(|node| node.id)
    }

    /// Number of live nodes created by this value.
    pub fn instance_count(&self) -> usize {
        self.shared.nodes.borrow().len()
    }

    pub fn name(&self) -> Option<&str> {
        self.shared.name.as_deref()
    }
}

impl<A, T> DerivedShared<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("derived")
    }

    fn find_or_create(self: &Rc<Self>, args: A) -> Rc<DerivedNode<A, T>> {
        let existing = self.nodes.borrow().get(&args).cloned();
        if let Some(node) = existing {
            return node;
        }

        let recompute = (self.factory)(&args);
        let node = Rc::new(DerivedNode {
            id: NodeId::new(),
            key: args.clone(),
            shared: Rc::downgrade(self),
            recompute: RefCell::new(recompute),
            value: RefCell::new(None),
            propagate: self.propagate.clone(),
        });

        self.nodes.borrow_mut().insert(args, node.clone());
        self.runtime.insert_node(Node::derived(node.id), node.clone());
        debug!(node = %node.id, name = self.label(), "derived node created");
        node
    }
}

impl<A, T> DerivedNode<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn has_value(&self) -> bool {
        self.value.borrow().is_some()
    }

    /// Run the computation once. Returns whether the new value should be
    /// propagated to dependents.
    fn compute(&self, runtime: &Runtime) -> Result<bool, Interrupt> {
        let Ok(mut recompute) = self.recompute.try_borrow_mut() else {
            return Err(Error::Cycle(self.id).into());
        };

        runtime.begin_evaluation(self.id);
        let (result, reads) = {
            let ctx = ContextGuard::enter(runtime, self.id);
            let mut cx = Cx::new(runtime.clone(), self.id);
            let result = (&mut *recompute)(&mut cx);
            (result, ctx.reads())
        };
        drop(recompute);

        match result {
            Ok(value) => {
                let previous = self.value.replace(Some(value));
                runtime.finish_evaluation(self.id, &reads);
                Ok(self.should_propagate(previous))
            }
            Err(interrupt) => {
                runtime.abandon_evaluation(self.id, self.has_value());
                Err(interrupt)
            }
        }
    }

    fn should_propagate(&self, previous: Option<T>) -> bool {
        let (Some(old), Some(predicate)) = (previous, self.propagate.as_ref()) else {
            return true;
        };
        match self.current() {
            Some(new) => predicate(&old, &new),
            None => true,
        }
    }
}

impl<A, T> Current<T> for DerivedNode<A, T>
where
    T: Clone,
{
    fn current(&self) -> Option<T> {
        self.value.borrow().clone()
    }
}

impl<A, T> Reactive for DerivedNode<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn id(&self) -> NodeId {
        self.id
    }

    fn evaluate(&self, runtime: &Runtime) -> Result<(), Error> {
        if !runtime.contains(self.id) {
            trace!(node = %self.id, "skipping evaluation of a torn-down node");
            return Ok(());
        }

        match self.compute(runtime) {
            Ok(true) => runtime.propagate(self.id),
            Ok(false) => {
                trace!(node = %self.id, "propagation suppressed");
                Ok(())
            }
            Err(Interrupt::Pending) => {
                trace!(node = %self.id, "evaluation suspended");
                Ok(())
            }
            Err(Interrupt::Failed(error)) => match Error::from_boxed(error) {
                Error::Detached(_) if !runtime.contains(self.id) => {
                    trace!(node = %self.id, "node torn down during its own evaluation");
                    Ok(())
                }
                error => Err(error),
            },
        }
    }

    fn unregister(&self) {
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
}

impl<A, T> Value<A, T> for DerivedValue<A, T>
where
    A: Eq + Hash + Clone + 'static,
    T: Clone + 'static,
{
    fn get(&self, cx: &mut Cx, args: A) -> Result<T, Interrupt> {
        DerivedValue::get(self, cx, args)
    }

    fn subscribe<F>(&self, args: A, on_value: F) -> Result<Subscription, Error>
    where
        F: FnMut(&T) + 'static,
    {
        DerivedValue::subscribe(self, args, on_value)
    }
}

impl<A, T> Clone for DerivedValue<A, T> {
    fn clone(&self) -> Self {
        Self {
            shared: Rc::clone(&self.shared),
        }
    }
}

impl<A, T> fmt::Debug for DerivedValue<A, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedValue")
            .field("name", &self.shared.name)
            .field("instances", &self.shared.nodes.borrow().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counted(runtime: &Runtime, calls: &Rc<Cell<usize>>) -> DerivedValue<i32, i32> {
        let calls = calls.clone();
        DerivedValue::new(runtime, move |base: &i32| {
            let base = *base;
            let calls = calls.clone();
            move |_cx: &mut Cx| {
                calls.set(calls.get() + 1);
                Ok(base * 10)
            }
        })
    }

    #[test]
    fn subscribe_computes_immediately() {
        let runtime = Runtime::new();
        let calls = Rc::new(Cell::new(0));
        let value = counted(&runtime, &calls);
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_clone = seen.clone();
        let _subscription = value
            .subscribe(4, move |v| seen_clone.borrow_mut().push(*v))
            .unwrap();

        assert_eq!(*seen.borrow(), vec![40]);
        assert_eq!(calls.get(), 1);
        assert_eq!(value.peek(&4), Some(40));
    }

    #[test]
    fn factory_runs_once_per_key() {
        let runtime = Runtime::new();
        let factories = Rc::new(Cell::new(0));

        let factories_clone = factories.clone();
        let value: DerivedValue<i32, i32> = DerivedValue::new(&runtime, move |base: &i32| {
            factories_clone.set(factories_clone.get() + 1);
            let base = *base;
            move |_cx: &mut Cx| Ok(base)
        });

        let _a = value.subscribe(1, |_| {}).unwrap();
        let _b = value.subscribe(1, |_| {}).unwrap();
        let _c = value.subscribe(2, |_| {}).unwrap();

        assert_eq!(factories.get(), 2);
        assert_eq!(value.instance_count(), 2);
        assert_ne!(value.node_id(&1), value.node_id(&2));
    }

    #[test]
    fn node_state_survives_reruns() {
        let runtime = Runtime::new();
        let value: DerivedValue<(), usize> = DerivedValue::new(&runtime, |_: &()| {
            let mut runs = 0;
            move |_cx: &mut Cx| {
                runs += 1;
                Ok(runs)
            }
        });
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_a = seen.clone();
        let _a = value.subscribe((), move |v| seen_a.borrow_mut().push(*v)).unwrap();
        let seen_b = seen.clone();
        let _b = value.subscribe((), move |v| seen_b.borrow_mut().push(*v)).unwrap();

        // The second subscribe re-runs the node and notifies both.
        assert_eq!(*seen.borrow(), vec![1, 2, 2]);
    }

    #[test]
    fn distinct_still_delivers_to_new_subscribers() {
        let runtime = Runtime::new();
        let value: DerivedValue<(), i32> = DerivedBuilder::new(&runtime)
            .distinct()
            .build(|_: &()| |_cx: &mut Cx| Ok(5));
        let seen = Rc::new(RefCell::new(Vec::new()));

        let seen_a = seen.clone();
        let _a = value.subscribe((), move |v| seen_a.borrow_mut().push(("a", *v))).unwrap();
        let seen_b = seen.clone();
        let _b = value.subscribe((), move |v| seen_b.borrow_mut().push(("b", *v))).unwrap();

        assert_eq!(*seen.borrow(), vec![("a", 5), ("b", 5)]);
    }

    #[test]
    fn failing_subscribe_closes_and_tears_down() {
        let runtime = Runtime::new();
        let value: DerivedValue<(), i32> =
            DerivedValue::new(&runtime, |_: &()| |_cx: &mut Cx| Err(Interrupt::failed("unauthorized")));

        let error = value.subscribe((), |_| {}).unwrap_err();

        assert_eq!(error.to_string(), "unauthorized");
        assert_eq!(runtime.node_count(), 0);
        assert_eq!(value.instance_count(), 0);
    }

    #[test]
    fn builder_sets_name() {
        let runtime = Runtime::new();
        let value: DerivedValue<(), i32> = DerivedBuilder::new(&runtime)
            .name("average")
            .build(|_: &()| |_cx: &mut Cx| Ok(0));
        assert_eq!(value.name(), Some("average"));
    }
}
