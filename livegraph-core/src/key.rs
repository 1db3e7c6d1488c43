//! Node keys.
//!
//! A factory memoizes one node per argument tuple. Tuples are compared with
//! their own `Eq`/`Hash`, field by field. Fields that should be compared by
//! identity rather than by content go in a [`ByRef`].

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::rc::Rc;

/// A shared value compared by pointer identity.
///
/// Two `ByRef`s are equal only if they point to the same allocation, so
/// structurally equal but distinct values select distinct nodes.
pub struct ByRef<T: ?Sized>(pub Rc<T>);

impl<T> ByRef<T> {
    pub fn new(value: T) -> Self {
        Self(Rc::new(value))
    }
}

impl<T: ?Sized> Clone for ByRef<T> {
    fn clone(&self) -> Self {
        Self(Rc::clone(&self.0))
    }
}

impl<T: ?Sized> PartialEq for ByRef<T> {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

impl<T: ?Sized> Eq for ByRef<T> {}

impl<T: ?Sized> Hash for ByRef<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Rc::as_ptr(&self.0).cast::<()>().hash(state);
    }
}

impl<T: ?Sized> Deref for ByRef<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T: ?Sized + fmt::Debug> fmt::Debug for ByRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ByRef").field(&&*self.0).finish()
    }
}

impl<T> From<Rc<T>> for ByRef<T> {
    fn from(value: Rc<T>) -> Self {
        Self(value)
    }
}
