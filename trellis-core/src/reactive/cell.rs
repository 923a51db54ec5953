//! Cell Implementation
//!
//! A Cell is the leaf reactive primitive. It holds a value and tracks which
//! computations read it.
//!
//! # How Cells Work
//!
//! 1. When a cell is read within a collecting context (memo or reaction
//!    body), the cell links itself to that computation.
//!
//! 2. A write compares the new value with the old one. Equal writes are
//!    ignored entirely.
//!
//! 3. A write that changes the value runs inside a batch and pushes
//!    dirtiness out to every subscriber.
//!
//! # Lifetime
//!
//! `Cell<T>` is a reference-counted handle. Clones share the same node, and
//! the node (with all of its edges) is freed when the last handle drops.
//!
//! The value itself sits behind an `Rc`, so `with` hands out a reference
//! that stays valid while the callback writes the cell.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use tracing::trace;

use crate::graph::{Node, NodeId};

use super::batch::batch;
use super::context::track;
use super::runtime::{try_with_runtime, with_runtime};

struct CellInner<T> {
    id: NodeId,
    value: RefCell<Rc<T>>,
}

impl<T> Drop for CellInner<T> {
    fn drop(&mut self) {
        let id = self.id;
        let node = try_with_runtime(|rt| rt.graph.remove(id)).flatten();
        drop(node);
    }
}

/// A mutable reactive value.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
///
/// // Read the value
/// let value = count.get();
///
/// // Write it (subscribers are notified only if it changed)
/// count.set(5);
/// count.update(|n| n + 1);
/// ```
pub struct Cell<T: 'static> {
    inner: Rc<CellInner<T>>,
}

impl<T: 'static> Cell<T> {
    pub fn new(value: T) -> Self {
        let id = with_runtime(|rt| rt.graph.insert(Node::cell()));
        Self {
            inner: Rc::new(CellInner {
                id,
                value: RefCell::new(Rc::new(value)),
            }),
        }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Attach a label shown by inspectors.
    pub fn labeled(self, label: &str) -> Self {
        with_runtime(|rt| rt.graph.set_label(self.inner.id, label));
        self
    }

    /// Get the current value, recording a dependency if a computation is
    /// collecting.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the current value, recording a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track(self.inner.id);
        let value = Rc::clone(&self.inner.value.borrow());
        f(&value)
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        T::clone(&self.inner.value.borrow())
    }

    /// Store `value` and notify subscribers if it differs from the current
    /// value.
    pub fn set(&self, value: T)
    where
        T: PartialEq,
    {
        let changed = {
            let mut current = self.inner.value.borrow_mut();
            if **current == value {
                false
            } else {
                *current = Rc::new(value);
                true
            }
        };
        if !changed {
            return;
        }

        let id = self.inner.id;
        trace!(?id, "cell written");
        batch(|| with_runtime(|rt| rt.propagate_write(id)));
    }

    /// Replace the value with `f(&current)`.
    pub fn update(&self, f: impl FnOnce(&T) -> T)
    where
        T: PartialEq,
    {
        let current = Rc::clone(&self.inner.value.borrow());
        self.set(f(&current));
    }
}

impl<T: 'static> Clone for Cell<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Cell<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.inner.id)
            .field("value", &**self.inner.value.borrow())
            .finish()
    }
}
