//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! Every cell, memo, reaction and root owns exactly one slot in the arena;
//! handles address it by a generational [`NodeId`], so a handle to a freed
//! node can never alias a newer one.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;

use crate::reactive::{Computation, ReactionBody};

new_key_type! {
    /// Stable handle to a node in the dependency graph.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    /// A leaf value (cell). Has subscribers, never dependencies.
    Cell,

    /// A derived value (memo). Has dependencies and subscribers and caches
    /// its computed value.
    Memo,

    /// A side-effecting subscriber. Has dependencies and owns child
    /// reactions, but nothing subscribes to it.
    Reaction,

    /// Top of an ownership tree. Has children only.
    Root,
}

/// Freshness of a memo or queued reaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Flag {
    /// The cached value is up-to-date.
    Clean,

    /// Something upstream changed, but it is not yet known whether any input
    /// of this node actually differs.
    MaybeDirty,

    /// An input definitely changed; the node must recompute.
    Dirty,
}

/// When a reaction evaluates relative to the write that dirtied it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timing {
    /// Evaluates synchronously at construction and at the end of the batch
    /// that dirtied it.
    Immediate,

    /// Evaluates during the next scheduler flush, so bursts of writes collapse
    /// into a single execution.
    Deferred,
}

/// Per-kind state carried by a node.
pub(crate) enum Payload {
    Cell,
    Memo(Rc<dyn Computation>),
    Reaction {
        timing: Timing,
        body: Rc<RefCell<dyn ReactionBody>>,
    },
    Root {
        teardown: Option<Box<dyn FnOnce()>>,
    },
}

/// A node in the dependency graph.
pub(crate) struct Node {
    pub(crate) payload: Payload,

    /// Optional human-readable name for inspectors.
    pub(crate) label: Option<String>,

    pub(crate) flag: Flag,

    /// Nodes this node read during its last evaluation (backward edges).
    pub(crate) deps: IndexSet<NodeId>,

    /// Nodes that read this node (forward edges).
    pub(crate) subscribers: IndexSet<NodeId>,

    /// Reactions owned by this node (roots and reactions only).
    pub(crate) children: IndexSet<NodeId>,

    pub(crate) parent: Option<NodeId>,

    pub(crate) destroyed: bool,
}

impl Node {
    fn new(payload: Payload, flag: Flag) -> Self {
        Self {
            payload,
            label: None,
            flag,
            deps: IndexSet::new(),
            subscribers: IndexSet::new(),
            children: IndexSet::new(),
            parent: None,
            destroyed: false,
        }
    }

    pub(crate) fn cell() -> Self {
        Self::new(Payload::Cell, Flag::Clean)
    }

    /// Memos start dirty; construction evaluates them once.
    pub(crate) fn memo(computation: Rc<dyn Computation>) -> Self {
        Self::new(Payload::Memo(computation), Flag::Dirty)
    }

    pub(crate) fn reaction(timing: Timing, body: Rc<RefCell<dyn ReactionBody>>) -> Self {
        Self::new(Payload::Reaction { timing, body }, Flag::Dirty)
    }

    pub(crate) fn root() -> Self {
        Self::new(Payload::Root { teardown: None }, Flag::Clean)
    }

    pub(crate) fn kind(&self) -> NodeKind {
        match self.payload {
            Payload::Cell => NodeKind::Cell,
            Payload::Memo(_) => NodeKind::Memo,
            Payload::Reaction { .. } => NodeKind::Reaction,
            Payload::Root { .. } => NodeKind::Root,
        }
    }

    pub(crate) fn timing(&self) -> Option<Timing> {
        match self.payload {
            Payload::Reaction { timing, .. } => Some(timing),
            _ => None,
        }
    }

    pub(crate) fn computation(&self) -> Option<Rc<dyn Computation>> {
        match &self.payload {
            Payload::Memo(computation) => Some(Rc::clone(computation)),
            _ => None,
        }
    }

    pub(crate) fn body(&self) -> Option<Rc<RefCell<dyn ReactionBody>>> {
        match &self.payload {
            Payload::Reaction { body, .. } => Some(Rc::clone(body)),
            _ => None,
        }
    }

    /// Live owners may adopt new reactions.
    pub(crate) fn can_own(&self) -> bool {
        !self.destroyed && matches!(self.kind(), NodeKind::Root | NodeKind::Reaction)
    }
}
