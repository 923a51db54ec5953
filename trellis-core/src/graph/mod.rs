//! Dependency Graph
//!
//! This module implements the graph that tracks relationships between
//! reactive values, computations and their owners.
//!
//! # Overview
//!
//! - Nodes represent cells, memos, reactions and roots.
//! - Dependency edges point backward from a reader to what it read; subscriber
//!   edges point forward from a value to whatever must be notified. The two
//!   are always created and removed as a matched pair.
//! - Ownership links (parent/children) connect roots and reactions and govern
//!   cascading disposal.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a generational arena addressed by [`NodeId`] rather than
//!    behind owning pointers, so the cyclic value/reader graph needs no cycle
//!    collection: disposal is "remove edges by handle".
//!
//! 2. Adjacency sets are insertion-ordered, which keeps notification and
//!    scheduling order deterministic.
//!
//! 3. The graph itself never runs user code. Anything that may call back into
//!    user closures lives in the `reactive` module and only borrows the graph
//!    between calls.

mod node;
mod scheduler;

pub use node::{Flag, NodeId, NodeKind, Timing};
pub use scheduler::Phase;

pub(crate) use node::{Node, Payload};
pub(crate) use scheduler::{Scheduler, Step};

use indexmap::IndexSet;
use slotmap::SlotMap;

use crate::error::{ReactiveError, Result};
use crate::inspect::{GraphEvent, GraphSnapshot, NodeSnapshot};

/// Arena of nodes plus the buffered events describing changes to it.
pub(crate) struct Graph {
    nodes: SlotMap<NodeId, Node>,
    events: Vec<GraphEvent>,
    recording: bool,
}

impl Graph {
    pub(crate) fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            events: Vec::new(),
            recording: false,
        }
    }

    pub(crate) fn insert(&mut self, node: Node) -> NodeId {
        let kind = node.kind();
        let id = self.nodes.insert(node);
        self.emit(GraphEvent::NodeCreated { id, kind });
        id
    }

    /// Remove a node and every edge touching it, in both directions.
    ///
    /// The node is handed back so the caller can drop it (and any user
    /// closures it owns) after releasing the runtime.
    pub(crate) fn remove(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;

        for &dep in &node.deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.subscribers.shift_remove(&id);
            }
            self.emit(GraphEvent::EdgeRemoved { source: dep, target: id });
        }
        for &subscriber in &node.subscribers {
            if let Some(subscriber_node) = self.nodes.get_mut(subscriber) {
                subscriber_node.deps.shift_remove(&id);
            }
            self.emit(GraphEvent::EdgeRemoved { source: id, target: subscriber });
        }
        if let Some(parent) = node.parent.and_then(|parent| self.nodes.get_mut(parent)) {
            parent.children.shift_remove(&id);
        }
        for &child in &node.children {
            if let Some(child_node) = self.nodes.get_mut(child) {
                child_node.parent = None;
            }
        }

        self.emit(GraphEvent::NodeDestroyed { id });
        Some(node)
    }

    pub(crate) fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub(crate) fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    /// A node that exists and has not started disposal.
    pub(crate) fn is_live(&self, id: NodeId) -> bool {
        self.nodes.get(id).is_some_and(|node| !node.destroyed)
    }

    pub(crate) fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Record that `reader` read `dep`: adds the dependency edge and its
    /// matching subscriber edge.
    pub(crate) fn link(&mut self, dep: NodeId, reader: NodeId) {
        if dep == reader || !self.nodes.contains_key(dep) {
            return;
        }
        let added = match self.nodes.get_mut(reader) {
            Some(node) => node.deps.insert(dep),
            None => return,
        };
        if added {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.subscribers.insert(reader);
            }
            self.emit(GraphEvent::EdgeAdded { source: dep, target: reader });
        }
    }

    /// Remove every dependency edge of `reader`, both directions.
    pub(crate) fn disconnect(&mut self, reader: NodeId) {
        let deps = match self.nodes.get_mut(reader) {
            Some(node) => std::mem::take(&mut node.deps),
            None => return,
        };
        for dep in deps {
            if let Some(dep_node) = self.nodes.get_mut(dep) {
                dep_node.subscribers.shift_remove(&reader);
            }
            self.emit(GraphEvent::EdgeRemoved { source: dep, target: reader });
        }
    }

    pub(crate) fn adopt(&mut self, parent: NodeId, child: NodeId) {
        if let Some(parent_node) = self.nodes.get_mut(parent) {
            parent_node.children.insert(child);
        }
        if let Some(child_node) = self.nodes.get_mut(child) {
            child_node.parent = Some(parent);
        }
    }

    pub(crate) fn set_flag(&mut self, id: NodeId, flag: Flag) {
        let changed = match self.nodes.get_mut(id) {
            Some(node) if node.flag != flag => {
                node.flag = flag;
                true
            }
            _ => false,
        };
        if changed {
            self.emit(GraphEvent::FlagChanged { id, flag });
        }
    }

    pub(crate) fn set_label(&mut self, id: NodeId, label: &str) {
        if let Some(node) = self.nodes.get_mut(id) {
            node.label = Some(label.to_owned());
            self.emit(GraphEvent::NodeLabelled { id, label: label.to_owned() });
        }
    }

    pub(crate) fn subscribers(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|node| node.subscribers.iter().copied().collect())
            .unwrap_or_default()
    }

    pub(crate) fn deps(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|node| node.deps.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Walk up the ownership chain from a reaction to its root.
    pub(crate) fn root_of(&self, id: NodeId) -> Result<NodeId> {
        let mut current = id;
        loop {
            let node = self.nodes.get(current).ok_or(ReactiveError::Orphaned(id))?;
            match node.kind() {
                NodeKind::Root => return Ok(current),
                NodeKind::Reaction => {
                    current = node.parent.ok_or(ReactiveError::Orphaned(id))?;
                }
                NodeKind::Cell | NodeKind::Memo => return Err(ReactiveError::Orphaned(id)),
            }
        }
    }

    /// Drop every queued reaction that has a queued reaction ancestor: the
    /// ancestor's rerun destroys and recreates it anyway. Survivors keep
    /// their queue order; pruned reactions are flagged clean.
    pub(crate) fn prune_redundant(&mut self, queued: IndexSet<NodeId>) -> IndexSet<NodeId> {
        let mut survivors = IndexSet::with_capacity(queued.len());
        for &id in &queued {
            if !self.is_live(id) {
                continue;
            }
            if self.has_queued_ancestor(id, &queued) {
                self.set_flag(id, Flag::Clean);
            } else {
                survivors.insert(id);
            }
        }
        survivors
    }

    fn has_queued_ancestor(&self, id: NodeId, queued: &IndexSet<NodeId>) -> bool {
        let mut current = self.nodes.get(id).and_then(|node| node.parent);
        while let Some(ancestor) = current {
            match self.nodes.get(ancestor) {
                Some(node) if node.kind() == NodeKind::Reaction => {
                    if queued.contains(&ancestor) {
                        return true;
                    }
                    current = node.parent;
                }
                _ => break,
            }
        }
        false
    }

    pub(crate) fn snapshot(&self) -> GraphSnapshot {
        let mut snapshot = GraphSnapshot::default();
        for (id, node) in &self.nodes {
            snapshot.nodes.push(NodeSnapshot {
                id,
                kind: node.kind(),
                label: node.label.clone(),
                flag: node.flag,
                parent: node.parent,
            });
            snapshot
                .edges
                .extend(node.subscribers.iter().map(|&subscriber| (id, subscriber)));
        }
        snapshot
    }

    pub(crate) fn set_recording(&mut self, recording: bool) {
        self.recording = recording;
        if !recording {
            self.events.clear();
        }
    }

    pub(crate) fn emit(&mut self, event: GraphEvent) {
        if self.recording {
            self.events.push(event);
        }
    }

    pub(crate) fn take_events(&mut self) -> Vec<GraphEvent> {
        std::mem::take(&mut self.events)
    }

    pub(crate) fn has_events(&self) -> bool {
        !self.events.is_empty()
    }
}
