//! Ownership roots.
//!
//! A root is the top of an ownership tree. Reactions can only be created
//! while a root (or a reaction under one) is the active owner, and
//! destroying the root tears the whole tree down.

use tracing::debug;

use crate::error::Result;
use crate::graph::{Node, NodeId, Payload};

use super::context::ContextGuard;
use super::reaction::{children_of, dispose, Reaction};
use super::runtime::with_runtime;

/// Handle to an ownership root.
///
/// # Example
///
/// ```rust,ignore
/// let root = Root::with_teardown(
///     || {
///         Reaction::new(Timing::Deferred, move || render(&model.get())).unwrap();
///     },
///     || println!("view closed"),
/// );
///
/// root.destroy()?; // destroys the reaction, then prints "view closed"
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Root {
    id: NodeId,
}

impl Root {
    /// Create a root and run `f` with it as the active owner.
    pub fn new(f: impl FnOnce()) -> Self {
        let id = with_runtime(|rt| rt.graph.insert(Node::root()));
        debug!(?id, "root created");
        {
            let _guard = ContextGuard::install(|ctx| {
                ctx.collector = None;
                ctx.untracked = false;
                ctx.owner = Some(id);
            });
            f();
        }
        Self { id }
    }

    /// Like [`Root::new`], and runs `teardown` once when the root is
    /// destroyed, after all of its reactions.
    pub fn with_teardown(f: impl FnOnce(), teardown: impl FnOnce() + 'static) -> Self {
        let root = Self::new(f);
        with_runtime(|rt| {
            if let Some(Payload::Root { teardown: slot }) = rt.graph.get_mut(root.id).map(|node| &mut node.payload) {
                *slot = Some(Box::new(teardown));
            }
        });
        root
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Attach a label shown by inspectors.
    pub fn labeled(self, label: &str) -> Self {
        with_runtime(|rt| rt.graph.set_label(self.id, label));
        self
    }

    /// Destroy every reaction in the tree, innermost first, then the root.
    pub fn destroy(&self) -> Result<()> {
        dispose(self.id)
    }

    pub fn is_destroyed(&self) -> bool {
        with_runtime(|rt| !rt.graph.is_live(self.id))
    }

    /// Reactions owned directly by this root.
    pub fn children(&self) -> Vec<Reaction> {
        children_of(self.id).into_iter().map(Reaction::from_id).collect()
    }

    pub(crate) fn from_id(id: NodeId) -> Self {
        Self { id }
    }
}
