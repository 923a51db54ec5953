//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On construction, the memo runs its computation once and caches the
//!    result.
//!
//! 2. When a dependency changes, the memo is flagged `Dirty` (direct
//!    dependency) or `MaybeDirty` (something further upstream).
//!
//! 3. On the next read, a dirty memo recomputes. A maybe-dirty memo first
//!    brings its own dependencies up to date, and recomputes only if one of
//!    them actually produced a new value.
//!
//! 4. A recompute that yields a value equal to the previous one leaves the
//!    memo's subscribers alone.
//!
//! # Why This Matters
//!
//! Memos that are never read stay dirty and cost nothing, and an unchanged
//! intermediate result stops a change from rippling any further.

use std::cell::{Cell as Flagged, RefCell};
use std::fmt;
use std::rc::Rc;

use crate::graph::{Node, NodeId};

use super::context::{collect, track};
use super::dirtiness::{recompute, refresh};
use super::runtime::{try_with_runtime, with_runtime};

/// A memo's computation as stored in the graph.
pub(crate) trait Computation {
    /// Evaluate under dependency collection for `id`, cache the result and
    /// report whether it differs from the previous value.
    fn recompute(&self, id: NodeId) -> bool;
}

struct MemoState<T> {
    compute: Box<dyn Fn() -> T>,
    value: RefCell<Option<Rc<T>>>,
    computing: Flagged<bool>,
}

struct Computing<'a>(&'a Flagged<bool>);

impl Drop for Computing<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

impl<T: PartialEq> Computation for MemoState<T> {
    fn recompute(&self, id: NodeId) -> bool {
        if self.computing.replace(true) {
            panic!("memo {id:?} read itself while computing");
        }
        let _computing = Computing(&self.computing);

        let next = collect(id, || (self.compute)());
        let mut value = self.value.borrow_mut();
        let changed = value.as_deref() != Some(&next);
        *value = Some(Rc::new(next));
        changed
    }
}

struct MemoInner<T> {
    id: NodeId,
    state: Rc<MemoState<T>>,
}

impl<T> Drop for MemoInner<T> {
    fn drop(&mut self) {
        let id = self.id;
        let node = try_with_runtime(|rt| rt.graph.remove(id)).flatten();
        drop(node);
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// # Type Parameters
///
/// - `T`: The computed value. `PartialEq` lets the memo detect when a
///   recompute produced the same value, so its subscribers can be spared.
///
/// # Example
///
/// ```rust,ignore
/// let first = Cell::new("Ada".to_owned());
/// let last = Cell::new("Lovelace".to_owned());
///
/// let full = Memo::new(move || format!("{} {}", first.get(), last.get()));
/// assert_eq!(full.get(), "Ada Lovelace");
/// ```
pub struct Memo<T: 'static> {
    inner: Rc<MemoInner<T>>,
}

impl<T: PartialEq + 'static> Memo<T> {
    /// Create a memo. The computation runs once, right away.
    pub fn new(compute: impl Fn() -> T + 'static) -> Self {
        let state = Rc::new(MemoState {
            compute: Box::new(compute),
            value: RefCell::new(None),
            computing: Flagged::new(false),
        });
        let computation: Rc<dyn Computation> = state.clone();
        let id = with_runtime(|rt| rt.graph.insert(Node::memo(computation)));
        recompute(id);

        Self {
            inner: Rc::new(MemoInner { id, state }),
        }
    }
}

impl<T: 'static> Memo<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Attach a label shown by inspectors.
    pub fn labeled(self, label: &str) -> Self {
        with_runtime(|rt| rt.graph.set_label(self.inner.id, label));
        self
    }

    /// Get the current value, recomputing first if it is stale, and record
    /// a dependency if a computation is collecting.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Borrow the up-to-date value, recording a dependency.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        // Refresh before tracking: a recompute notifies current subscribers,
        // and the reader is not one of them yet.
        refresh(self.inner.id);
        track(self.inner.id);
        self.read(f)
    }

    /// Get the up-to-date value without recording a dependency.
    pub fn get_untracked(&self) -> T
    where
        T: Clone,
    {
        refresh(self.inner.id);
        self.read(T::clone)
    }

    fn read<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        // Cloned out so `f` may write cells this memo reads.
        let value = self.inner.state.value.borrow().clone();
        f(value.as_deref().expect("memo is evaluated at construction"))
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.inner.id)
            .field("value", &self.inner.state.value.borrow().as_deref())
            .finish()
    }
}
