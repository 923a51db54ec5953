//! Reaction Implementation
//!
//! A Reaction is a side-effecting computation that reruns whenever what it
//! read last time changes. Reactions form an ownership tree: each one is
//! owned by a root or by the reaction whose body created it.
//!
//! # How Reactions Work
//!
//! 1. A reaction must be created inside a root or another reaction's body;
//!    that owner adopts it.
//!
//! 2. An `Immediate` reaction runs right away. A `Deferred` one is queued and
//!    first runs at the next flush.
//!
//! 3. Before rerunning, the previous cleanup runs with [`Teardown::Rerun`],
//!    the old dependencies are dropped and every child reaction is destroyed.
//!    The body then runs with the reaction as collector and owner, so it
//!    tracks fresh dependencies and adopts fresh children.
//!
//! # Cleanup
//!
//! A body may return a cleanup closure. It runs before the next rerun with
//! [`Teardown::Rerun`], or on destruction with [`Teardown::Destroy`]. Whatever
//! a rerun teardown returns is handed to the next body invocation, so state
//! can be carried from one run to the next.
//!
//! # Disposal
//!
//! Destruction is depth-first: children are destroyed (and their cleanups
//! run) before the parent's own cleanup. A reaction destroyed while its body
//! is executing finishes tearing down as soon as the body returns.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::error::{ReactiveError, Result};
use crate::graph::{Flag, Node, NodeId, NodeKind, Payload, Timing};

use super::batch::batch;
use super::context::{untrack, ContextGuard};
use super::root::Root;
use super::runtime::with_runtime;

/// Why a cleanup is being called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Teardown {
    /// The reaction is about to rerun.
    Rerun,

    /// The reaction is being destroyed; it will never run again.
    Destroy,
}

/// Cleanup returned by a reaction body. Its result on [`Teardown::Rerun`]
/// is passed to the next run of the body.
pub type Cleanup<M> = Box<dyn FnOnce(Teardown) -> M>;

/// Type-erased reaction body stored in the graph.
pub(crate) trait ReactionBody {
    fn run(&mut self);
    fn teardown(&mut self, teardown: Teardown);
}

struct BodyState<F, M> {
    body: F,
    cleanup: Option<Cleanup<M>>,
    memory: Option<M>,
}

impl<F, M> ReactionBody for BodyState<F, M>
where
    F: FnMut(Option<M>) -> Option<Cleanup<M>>,
{
    fn run(&mut self) {
        let memory = self.memory.take();
        self.cleanup = (self.body)(memory);
    }

    fn teardown(&mut self, teardown: Teardown) {
        if let Some(cleanup) = self.cleanup.take() {
            let result = cleanup(teardown);
            if teardown == Teardown::Rerun {
                self.memory = Some(result);
            }
        }
    }
}

/// Handle to a reaction in the ownership tree.
///
/// # Example
///
/// ```rust,ignore
/// let root = Root::new(|| {
///     Reaction::new(Timing::Immediate, move || {
///         println!("count is {}", count.get());
///     })?;
/// });
///
/// count.set(5); // prints "count is 5"
/// root.destroy()?;
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reaction {
    id: NodeId,
}

impl Reaction {
    /// Create a reaction owned by the active root or reaction.
    ///
    /// Fails with [`ReactiveError::NoOwner`] outside of any owner.
    pub fn new(timing: Timing, mut body: impl FnMut() + 'static) -> Result<Self> {
        Self::with_cleanup(timing, move |_: Option<()>| {
            body();
            None
        })
    }

    /// Create a reaction whose body may return a cleanup.
    ///
    /// The body receives whatever the previous cleanup returned on
    /// [`Teardown::Rerun`] (`None` on the first run, or when the previous run
    /// returned no cleanup).
    pub fn with_cleanup<F, M>(timing: Timing, body: F) -> Result<Self>
    where
        F: FnMut(Option<M>) -> Option<Cleanup<M>> + 'static,
        M: 'static,
    {
        let body: Rc<RefCell<dyn ReactionBody>> = Rc::new(RefCell::new(BodyState {
            body,
            cleanup: None,
            memory: None,
        }));

        let id = with_runtime(|rt| -> Result<NodeId> {
            let owner = rt
                .context
                .owner
                .filter(|&owner| rt.graph.get(owner).is_some_and(Node::can_own))
                .ok_or(ReactiveError::NoOwner)?;
            let id = rt.graph.insert(Node::reaction(timing, body));
            rt.graph.adopt(owner, id);
            if timing == Timing::Deferred {
                rt.enqueue_reaction(id, Flag::Dirty);
            }
            Ok(id)
        })?;
        debug!(?id, ?timing, "reaction created");

        if timing == Timing::Immediate {
            batch(|| rerun(id))?;
        }
        Ok(Self { id })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Attach a label shown by inspectors.
    pub fn labeled(self, label: &str) -> Self {
        with_runtime(|rt| rt.graph.set_label(self.id, label));
        self
    }

    pub fn timing(&self) -> Option<Timing> {
        with_runtime(|rt| rt.graph.get(self.id).and_then(Node::timing))
    }

    pub fn is_destroyed(&self) -> bool {
        with_runtime(|rt| !rt.graph.is_live(self.id))
    }

    /// Rerun the body now, inside a batch.
    pub fn rerun(&self) -> Result<()> {
        batch(|| rerun(self.id))
    }

    /// Destroy this reaction and everything it owns.
    pub fn destroy(&self) -> Result<()> {
        dispose(self.id)
    }

    /// Walk up the ownership tree to the owning root.
    pub fn root(&self) -> Result<Root> {
        with_runtime(|rt| {
            if !rt.graph.is_live(self.id) {
                return Err(ReactiveError::AlreadyDestroyed(self.id));
            }
            rt.graph.root_of(self.id).map(Root::from_id)
        })
    }

    /// Reactions created by the most recent run of this one.
    pub fn children(&self) -> Vec<Reaction> {
        children_of(self.id).into_iter().map(Self::from_id).collect()
    }

    pub(crate) fn from_id(id: NodeId) -> Self {
        Self { id }
    }
}

pub(crate) fn children_of(id: NodeId) -> SmallVec<[NodeId; 4]> {
    with_runtime(|rt| {
        rt.graph
            .get(id)
            .map(|node| node.children.iter().copied().collect())
            .unwrap_or_default()
    })
}

/// Rerun a reaction's body: teardown, disconnect, destroy children, run.
pub(crate) fn rerun(id: NodeId) -> Result<()> {
    let body = with_runtime(|rt| match rt.graph.get(id) {
        Some(node) if !node.destroyed => node.body().ok_or(ReactiveError::AlreadyDestroyed(id)),
        _ => Err(ReactiveError::AlreadyDestroyed(id)),
    })?;
    let Ok(mut state) = body.try_borrow_mut() else {
        return Err(ReactiveError::Reentrant(id));
    };

    untrack(|| state.teardown(Teardown::Rerun));
    with_runtime(|rt| rt.graph.disconnect(id));
    for child in children_of(id) {
        dispose_quietly(child);
    }

    // The cleanup may have destroyed us.
    let live = with_runtime(|rt| {
        let live = rt.graph.is_live(id);
        if live {
            rt.graph.set_flag(id, Flag::Clean);
        }
        live
    });
    if live {
        trace!(?id, "running reaction body");
        let _guard = ContextGuard::install(|ctx| {
            ctx.collector = Some(id);
            ctx.owner = Some(id);
            ctx.untracked = false;
        });
        state.run();
    }
    drop(state);

    if !with_runtime(|rt| rt.graph.is_live(id)) {
        finish_disposal(id, &body);
    }
    Ok(())
}

/// Destroy a reaction or root and its whole subtree, depth-first.
///
/// A reaction is marked destroyed before its children go; a root only once
/// they are gone.
pub(crate) fn dispose(id: NodeId) -> Result<()> {
    let (kind, body) = with_runtime(|rt| {
        let node = match rt.graph.get_mut(id) {
            Some(node) if !node.destroyed => node,
            _ => return Err(ReactiveError::AlreadyDestroyed(id)),
        };
        let kind = node.kind();
        if kind != NodeKind::Root {
            node.destroyed = true;
        }
        let body = node.body();
        rt.graph.disconnect(id);
        rt.scheduler.forget(id);
        if let Some(queue) = rt.batch.as_mut() {
            queue.remove(id);
        }
        Ok((kind, body))
    })?;
    debug!(?id, ?kind, "disposing");

    for child in children_of(id) {
        dispose_quietly(child);
    }

    match body {
        Some(body) => match body.try_borrow_mut() {
            Ok(mut state) => {
                untrack(|| state.teardown(Teardown::Destroy));
                drop(state);
                release(id);
            }
            // Running right now; `rerun` finishes the job when the body returns.
            Err(_) => trace!(?id, "deferring disposal of running reaction"),
        },
        None => {
            let teardown = with_runtime(|rt| match rt.graph.get_mut(id) {
                Some(node) if !node.destroyed => {
                    node.destroyed = true;
                    match &mut node.payload {
                        Payload::Root { teardown } => Some(teardown.take()),
                        _ => Some(None),
                    }
                }
                _ => None,
            });
            // A child's cleanup may have destroyed the root already.
            let Some(teardown) = teardown else {
                return Ok(());
            };
            if let Some(teardown) = teardown {
                untrack(teardown);
            }
            release(id);
        }
    }
    Ok(())
}

fn dispose_quietly(id: NodeId) {
    if let Err(err) = dispose(id) {
        trace!(?id, %err, "child already disposed");
    }
}

fn finish_disposal(id: NodeId, body: &Rc<RefCell<dyn ReactionBody>>) {
    with_runtime(|rt| rt.graph.disconnect(id));
    for child in children_of(id) {
        dispose_quietly(child);
    }
    if let Ok(mut state) = body.try_borrow_mut() {
        untrack(|| state.teardown(Teardown::Destroy));
    }
    release(id);
}

/// Free the arena slot. The node (and the closures it owns) is dropped after
/// the runtime is released.
fn release(id: NodeId) {
    let node = with_runtime(|rt| rt.graph.remove(id));
    drop(node);
}
